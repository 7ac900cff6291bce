//! Server multiplexer
//!
//! Owns the listener, the poll and the session table on a single thread.
//! Each iteration blocks on readiness, accepts pending connections, drains
//! readable peers and broadcasts every non-empty message to all peers.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, info, warn};

use crate::broadcast::broadcast;
use crate::config::ServerConfig;
use crate::error::{ChatError, PeerError};
use crate::events::{ServerEvent, ServerEvents};
use crate::peer::Peer;
use crate::reactor::{self, Readiness, StopHandle, WAKER};
use crate::session::SessionTable;
use crate::types::{PeerId, State};

const LISTENER: Token = Token(1);
const FIRST_PEER: usize = 2;

/// Wait before retrying accept after a non-transient failure
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// What the accept loop does after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptRetry {
    /// Backlog is empty until the next readiness edge
    Done,
    /// Try the next queued connection now
    Next,
    /// Give up for this cycle and retry after `ACCEPT_RETRY`
    Later,
}

impl AcceptRetry {
    fn after(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::WouldBlock => AcceptRetry::Done,
            ErrorKind::Interrupted
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset => AcceptRetry::Next,
            _ => AcceptRetry::Later,
        }
    }
}

/// The broadcast chat server
///
/// Not thread-safe; hand a `StopHandle` to other threads instead.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    sessions: SessionTable<TcpStream>,
    next_peer: usize,
    scratch: Vec<u8>,
    config: ServerConfig,
    notify: ServerEvents,
    stop: StopHandle,
    state: State,
    /// Set when accept failed with connections possibly still queued
    retry_accept: bool,
}

impl Server {
    /// Bind the listener and register accept interest
    ///
    /// Fails with `ChatError::Bind` when the address cannot be acquired;
    /// the server never reaches `Running` in that case.
    pub fn start(config: ServerConfig, notify: ServerEvents) -> Result<Self, ChatError> {
        let target = config.address();
        let bind_error = |source| ChatError::Bind {
            addr: target.clone(),
            source,
        };

        let addrs = reactor::resolve(&config.host, config.port).map_err(bind_error)?;
        let std_listener = std::net::TcpListener::bind(&addrs[..]).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;

        let mut listener = TcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER)?;

        info!(%local_addr, "Server listening");

        let mut server = Self {
            poll,
            events: Events::with_capacity(config.max_events),
            listener,
            local_addr,
            sessions: SessionTable::new(),
            next_peer: FIRST_PEER,
            scratch: vec![0; config.buffer_size],
            config,
            notify,
            stop: StopHandle::new(waker),
            state: State::Init,
            retry_accept: false,
        };
        server.state.advance(State::Listening);
        server.emit(ServerEvent::Started { addr: local_addr });
        Ok(server)
    }

    /// Run until the stop handle is triggered
    ///
    /// Only a failed readiness wait ends the loop with an error.
    pub fn run(mut self) -> Result<(), ChatError> {
        info!("Server loop started");
        let timeout = self.config.poll_timeout;

        while self.state != State::Stopped {
            if let Err(e) = self.poll_once(timeout) {
                self.shutdown();
                return Err(e);
            }
        }

        info!("Server loop finished");
        Ok(())
    }

    /// Run exactly one readiness cycle
    ///
    /// Once the stop flag is observed nothing further is accepted, read or
    /// broadcast, even when events are still pending.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<(), ChatError> {
        if self.state == State::Stopped {
            return Ok(());
        }
        if !self.stop.is_running() {
            self.shutdown();
            return Ok(());
        }
        self.state.advance(State::Running);

        // The listener edge was consumed by the failed accept, so wake up on
        // our own to try again
        let wait_for = if self.retry_accept {
            Some(timeout.map_or(ACCEPT_RETRY, |t| t.min(ACCEPT_RETRY)))
        } else {
            timeout
        };
        let ready = reactor::wait(&mut self.poll, &mut self.events, wait_for)?;

        if !self.stop.is_running() {
            debug!(pending = ready.len(), "Stop observed, discarding readiness");
            self.shutdown();
            return Ok(());
        }

        if std::mem::take(&mut self.retry_accept) {
            self.accept_pending();
        }

        for event in ready {
            match event.token {
                LISTENER => self.accept_pending(),
                WAKER => {}
                token => self.service_peer(PeerId::from(token), event),
            }
        }
        Ok(())
    }

    /// Handle for stopping the loop from another thread
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close one peer; returns false if it was already gone
    pub fn disconnect(&mut self, peer: PeerId) -> bool {
        self.close_peer(peer, None)
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.register_peer(stream, addr),
                Err(e) => match AcceptRetry::after(e.kind()) {
                    AcceptRetry::Done => break,
                    AcceptRetry::Next => {
                        debug!(error = %e, "Transient accept error");
                        continue;
                    }
                    AcceptRetry::Later => {
                        warn!(error = %e, retry_in = ?ACCEPT_RETRY, "Failed to accept connection");
                        self.retry_accept = true;
                        break;
                    }
                },
            }
        }
    }

    fn register_peer(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        let id = PeerId(self.next_peer);
        self.next_peer += 1;

        if let Err(e) = self
            .poll
            .registry()
            .register(&mut stream, id.into(), Interest::READABLE)
        {
            warn!(peer = %id, %addr, error = %e, "Failed to register connection");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %id, error = %e, "Failed to set TCP_NODELAY");
        }

        self.sessions
            .insert(Peer::new(id, stream, addr, self.config.backlog_limit()));

        info!(peer = %id, %addr, "Client connected");
        debug!(peers = ?self.sessions.addresses(), "Connected clients");

        self.emit(ServerEvent::Connected { peer: id, addr });
        self.emit(ServerEvent::ClientCount {
            count: self.sessions.len(),
        });
    }

    fn service_peer(&mut self, id: PeerId, event: Readiness) {
        if event.writable {
            // Removed earlier in this pass
            let Some(peer) = self.sessions.get_mut(id) else {
                return;
            };
            match peer.flush() {
                Ok(_) => self.refresh_interest(id),
                Err(e) => {
                    self.close_peer(id, Some(e));
                    return;
                }
            }
        }

        if event.readable {
            let Some(peer) = self.sessions.get_mut(id) else {
                return;
            };
            match peer.drain(&mut self.scratch) {
                Ok(drained) => {
                    if !drained.text.is_empty() {
                        self.dispatch(id, drained.text);
                    }
                    if drained.closed {
                        self.close_peer(id, None);
                    }
                }
                Err(e) => {
                    self.close_peer(id, Some(e));
                }
            }
        }
    }

    /// Hand one assembled message to the broadcaster
    fn dispatch(&mut self, origin: PeerId, text: String) {
        debug!(peer = %origin, bytes = text.len(), "Broadcasting message");

        let report = broadcast(&mut self.sessions, text.as_bytes());

        for (id, err) in report.failed {
            self.close_peer(id, Some(err));
        }
        for id in report.backlogged {
            self.refresh_interest(id);
        }

        self.emit(ServerEvent::Message { peer: origin, text });
    }

    /// Re-register a peer if its wanted interest changed
    fn refresh_interest(&mut self, id: PeerId) {
        let Some(peer) = self.sessions.get_mut(id) else {
            return;
        };
        let wanted = peer.wanted_interest();
        if wanted == peer.interest {
            return;
        }

        match self
            .poll
            .registry()
            .reregister(&mut peer.stream, id.into(), wanted)
        {
            Ok(()) => peer.interest = wanted,
            Err(e) => {
                self.close_peer(id, Some(PeerError::Write(e)));
            }
        }
    }

    /// Remove, deregister and close a peer
    ///
    /// Calling this for a peer that is already gone does nothing.
    fn close_peer(&mut self, id: PeerId, reason: Option<PeerError>) -> bool {
        let Some(mut peer) = self.sessions.remove(id) else {
            return false;
        };

        if let Err(e) = self.poll.registry().deregister(&mut peer.stream) {
            debug!(peer = %id, error = %e, "Failed to deregister connection");
        }

        match reason {
            Some(err) => warn!(peer = %id, addr = %peer.addr, error = %err, "Closing connection"),
            None => info!(peer = %id, addr = %peer.addr, "Client disconnected"),
        }

        self.emit(ServerEvent::Disconnected {
            peer: id,
            addr: peer.addr,
        });
        self.emit(ServerEvent::ClientCount {
            count: self.sessions.len(),
        });
        true
    }

    /// Release every stream and enter `Stopped`
    fn shutdown(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.stop.stop();

        for id in self.sessions.ids() {
            self.close_peer(id, None);
        }
        if let Err(e) = self.poll.registry().deregister(&mut self.listener) {
            debug!(error = %e, "Failed to deregister listener");
        }

        self.state.advance(State::Stopped);
        info!(addr = %self.local_addr, "Server stopped");
        self.emit(ServerEvent::Stopped);
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.notify.send(event);
    }
}
