//! Client multiplexer
//!
//! Same readiness loop as the server with exactly one stream. Incoming
//! drains are forwarded to the host as `ClientEvent::Message`; outgoing
//! text is written immediately, with write interest registered only while
//! a short write leaves bytes behind.

use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr};
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ChatError, PeerError, SendError};
use crate::events::{ClientEvent, ClientEvents};
use crate::peer::{Peer, WriteStatus};
use crate::reactor::{self, Readiness, StopHandle, WAKER};
use crate::types::{PeerId, State};

const STREAM: Token = Token(1);

/// Thread-safe handle for submitting messages to a running client
///
/// Text is queued on a channel and the poll is woken; the loop thread
/// performs the actual write.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    outbox: mpsc::UnboundedSender<String>,
    stop: StopHandle,
}

impl ClientHandle {
    pub fn send(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.outbox
            .send(text.into())
            .map_err(|_| SendError::ChannelClosed)?;
        self.stop.wake()?;
        Ok(())
    }

    /// Same as [`ClientHandle::send`]
    pub fn message(&self, text: impl Into<String>) -> Result<(), SendError> {
        self.send(text)
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }
}

/// The chat client
pub struct Client {
    poll: Poll,
    events: Events,
    peer: Peer<TcpStream>,
    scratch: Vec<u8>,
    config: ClientConfig,
    notify: ClientEvents,
    outbox_tx: mpsc::UnboundedSender<String>,
    outbox: mpsc::UnboundedReceiver<String>,
    stop: StopHandle,
    state: State,
}

impl Client {
    /// Open the outbound connection and wait for it to complete
    ///
    /// Registers connect (write) interest first and switches to read
    /// interest once the handshake finishes. Fails with
    /// `ChatError::Connect` if no resolved address accepts within
    /// `connect_timeout`.
    pub fn connect(config: ClientConfig, notify: ClientEvents) -> Result<Self, ChatError> {
        let target = config.address();
        let addrs = reactor::resolve(&config.host, config.port).map_err(|source| {
            warn!(addr = %target, error = %source, "Failed to resolve server address");
            ChatError::Connect {
                addr: target.clone(),
                source,
            }
        })?;

        let mut poll = Poll::new()?;
        let mut events = Events::with_capacity(8);

        let mut last_error = None;
        let mut connected = None;
        for addr in addrs {
            debug!(%addr, "Connecting");
            match establish(&mut poll, &mut events, addr, config.connect_timeout) {
                Ok(stream) => {
                    connected = Some((stream, addr));
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let Some((mut stream, addr)) = connected else {
            let source = last_error.unwrap_or_else(|| ErrorKind::AddrNotAvailable.into());
            warn!(addr = %target, error = %source, "Failed to connect");
            return Err(ChatError::Connect {
                addr: target,
                source,
            });
        };

        poll.registry()
            .reregister(&mut stream, STREAM, Interest::READABLE)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let waker = Waker::new(poll.registry(), WAKER)?;
        let (outbox_tx, outbox) = mpsc::unbounded_channel();

        info!(%addr, name = %config.name, "Connected to server");

        let client = Self {
            poll,
            events,
            peer: Peer::new(PeerId(STREAM.0), stream, addr, config.backlog_limit()),
            scratch: vec![0; config.buffer_size],
            config,
            notify,
            outbox_tx,
            outbox,
            stop: StopHandle::new(waker),
            state: State::Connecting,
        };
        client.emit(ClientEvent::Connected { addr });
        Ok(client)
    }

    /// Run until stopped or until the server closes the connection
    pub fn run(mut self) -> Result<(), ChatError> {
        info!("Client loop started");
        let timeout = self.config.poll_timeout;

        while self.state != State::Stopped {
            if let Err(e) = self.poll_once(timeout) {
                self.shutdown();
                return Err(e);
            }
        }

        info!("Client loop finished");
        Ok(())
    }

    /// Run exactly one readiness cycle
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<(), ChatError> {
        if self.state == State::Stopped {
            return Ok(());
        }
        if !self.stop.is_running() {
            self.shutdown();
            return Ok(());
        }
        self.state.advance(State::Running);

        let ready = reactor::wait(&mut self.poll, &mut self.events, timeout)?;

        if !self.stop.is_running() {
            self.shutdown();
            return Ok(());
        }

        for event in ready {
            match event.token {
                WAKER => self.flush_outbox(),
                STREAM => self.service_stream(event),
                _ => {}
            }
            if self.state == State::Stopped {
                break;
            }
        }
        Ok(())
    }

    /// Write `text` to the server right away
    ///
    /// Does not wait for a reply; echoes arrive through the read path.
    pub fn send(&mut self, text: &str) -> Result<(), PeerError> {
        if self.state == State::Stopped {
            return Err(PeerError::Closed);
        }

        let result = match self.peer.send(text.as_bytes()) {
            Ok(WriteStatus::Complete) => Ok(()),
            Ok(WriteStatus::Backlogged) => {
                debug!(pending = self.peer.pending(), "Write backlogged");
                self.refresh_interest()
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(error = %e, "Failed to send message");
        }
        result
    }

    /// Same as [`Client::send`]
    pub fn message(&mut self, text: &str) -> Result<(), PeerError> {
        self.send(text)
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            outbox: self.outbox_tx.clone(),
            stop: self.stop.clone(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.peer.addr
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn flush_outbox(&mut self) {
        while let Ok(text) = self.outbox.try_recv() {
            match self.send(&text) {
                Ok(()) => {}
                // Only this message is lost; the stream is still healthy
                Err(PeerError::BacklogFull { .. }) => continue,
                Err(_) => {
                    self.shutdown();
                    return;
                }
            }
        }
    }

    fn service_stream(&mut self, event: Readiness) {
        if event.writable {
            let flushed = self.peer.flush().and_then(|_| self.refresh_interest());
            if let Err(e) = flushed {
                warn!(error = %e, "Write to server failed");
                self.shutdown();
                return;
            }
        }

        if event.readable {
            match self.peer.drain(&mut self.scratch) {
                Ok(drained) => {
                    if !drained.text.is_empty() {
                        debug!(bytes = drained.bytes, "Message received");
                        self.emit(ClientEvent::Message { text: drained.text });
                    }
                    if drained.closed {
                        info!("Server closed the connection");
                        self.shutdown();
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Read from server failed");
                    self.shutdown();
                }
            }
        }
    }

    fn refresh_interest(&mut self) -> Result<(), PeerError> {
        let wanted = self.peer.wanted_interest();
        if wanted != self.peer.interest {
            self.poll
                .registry()
                .reregister(&mut self.peer.stream, STREAM, wanted)
                .map_err(PeerError::Write)?;
            self.peer.interest = wanted;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.stop.stop();

        if let Err(e) = self.poll.registry().deregister(&mut self.peer.stream) {
            debug!(error = %e, "Failed to deregister stream");
        }
        if let Err(e) = self.peer.stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "Failed to shut down stream");
        }

        self.state.advance(State::Stopped);
        info!(addr = %self.peer.addr, "Client stopped");
        self.emit(ClientEvent::Disconnected);
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.notify.send(event);
    }
}

/// Start a non-blocking connect and wait for it to complete or fail
fn establish(
    poll: &mut Poll,
    events: &mut Events,
    addr: SocketAddr,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)?;
    poll.registry()
        .register(&mut stream, STREAM, Interest::WRITABLE)?;

    let deadline = Instant::now() + timeout;
    let outcome = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break Err(io::Error::new(ErrorKind::TimedOut, "connect timed out"));
        }

        match poll.poll(events, Some(remaining)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
        if !events.iter().any(|event| event.token() == STREAM) {
            continue;
        }

        match stream.take_error() {
            Ok(Some(e)) | Err(e) => break Err(e),
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(_) => break Ok(()),
            // Spurious wakeup, handshake still in progress
            Err(e) if e.kind() == ErrorKind::NotConnected => continue,
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(()) => Ok(stream),
        Err(e) => {
            if let Err(dereg) = poll.registry().deregister(&mut stream) {
                debug!(%addr, error = %dereg, "Failed to deregister stream");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener as StdListener;

    use super::*;

    const TICK: Option<Duration> = Some(Duration::from_millis(20));

    fn connect_to(listener: &StdListener) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
        let port = listener.local_addr().unwrap().port();
        connect_with(ClientConfig::new("127.0.0.1", port))
    }

    fn connect_with(config: ClientConfig) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client::connect(config, tx).unwrap();
        (client, rx)
    }

    #[test]
    fn test_connect_emits_connected() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let (client, mut rx) = connect_to(&listener);

        assert_eq!(client.state(), State::Connecting);
        assert_eq!(
            rx.try_recv().unwrap(),
            ClientEvent::Connected {
                addr: listener.local_addr().unwrap()
            }
        );
    }

    #[test]
    fn test_connect_refused() {
        let port = {
            let spare = StdListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = Client::connect(ClientConfig::new("127.0.0.1", port), tx);
        assert!(matches!(result, Err(ChatError::Connect { .. })));
    }

    #[test]
    fn test_unresolvable_host_is_connect_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        match Client::connect(ClientConfig::new("not a host name", 5000), tx) {
            Err(ChatError::Connect { addr, .. }) => assert_eq!(addr, "not a host name:5000"),
            Err(other) => panic!("expected Connect error, got {}", other),
            Ok(_) => panic!("connect unexpectedly succeeded"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_writes_immediately() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let (mut client, _rx) = connect_to(&listener);
        let (mut server_side, _) = listener.accept().unwrap();

        client.send("hello").unwrap();
        client.message(" world").unwrap();

        server_side
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut received = vec![0u8; 11];
        server_side.read_exact(&mut received).unwrap();
        assert_eq!(received, b"hello world");
    }

    #[test]
    fn test_incoming_bytes_become_message_event() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let (mut client, mut rx) = connect_to(&listener);
        let (mut server_side, _) = listener.accept().unwrap();
        let _ = rx.try_recv();

        server_side.write_all("héllo".as_bytes()).unwrap();

        let mut got = String::new();
        for _ in 0..250 {
            client.poll_once(TICK).unwrap();
            while let Ok(event) = rx.try_recv() {
                if let ClientEvent::Message { text } = event {
                    got.push_str(&text);
                }
            }
            if got == "héllo" {
                break;
            }
        }
        assert_eq!(got, "héllo");
    }

    #[test]
    fn test_server_close_stops_client() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let (mut client, mut rx) = connect_to(&listener);
        let (server_side, _) = listener.accept().unwrap();
        drop(server_side);

        for _ in 0..250 {
            client.poll_once(TICK).unwrap();
            if client.state() == State::Stopped {
                break;
            }
        }
        assert_eq!(client.state(), State::Stopped);

        let mut saw_disconnect = false;
        while let Ok(event) = rx.try_recv() {
            saw_disconnect |= event == ClientEvent::Disconnected;
        }
        assert!(saw_disconnect);
        assert!(matches!(client.send("late"), Err(PeerError::Closed)));
    }

    #[test]
    fn test_handle_marshals_send_into_loop() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let (mut client, _rx) = connect_to(&listener);
        let (mut server_side, _) = listener.accept().unwrap();

        let handle = client.handle();
        std::thread::spawn(move || handle.send("from another thread").unwrap())
            .join()
            .unwrap();

        client.poll_once(Some(Duration::from_secs(5))).unwrap();

        server_side
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut received = vec![0u8; "from another thread".len()];
        server_side.read_exact(&mut received).unwrap();
        assert_eq!(received, b"from another thread");
    }

    #[test]
    fn test_stalled_send_drops_message_but_keeps_connection() {
        const BIG: usize = 32 * 1024 * 1024;

        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut config = ClientConfig::new("127.0.0.1", port);
        config.max_pending_bytes = 16;
        config.stall_timeout = Duration::ZERO;
        let (mut client, mut rx) = connect_with(config);
        let (mut server_side, _) = listener.accept().unwrap();

        // Nobody reads yet, so the first message backlogs and the second is refused
        let handle = client.handle();
        handle.send("x".repeat(BIG)).unwrap();
        handle.send("lost").unwrap();
        client.poll_once(Some(Duration::from_secs(5))).unwrap();

        assert_eq!(client.state(), State::Running);
        assert!(client.peer.pending() > 0);
        while let Ok(event) = rx.try_recv() {
            assert_ne!(event, ClientEvent::Disconnected);
        }

        let reader = std::thread::spawn(move || {
            server_side
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            let mut received = vec![0u8; BIG + "after".len()];
            server_side.read_exact(&mut received).unwrap();
            received
        });

        let deadline = Instant::now() + Duration::from_secs(30);
        while client.peer.pending() > 0 {
            assert!(Instant::now() < deadline, "backlog never drained");
            client.poll_once(TICK).unwrap();
        }
        client.send("after").unwrap();

        let received = reader.join().unwrap();
        assert!(received[..BIG].iter().all(|&b| b == b'x'));
        assert_eq!(&received[BIG..], b"after");
        assert_eq!(client.state(), State::Running);
    }

    #[test]
    fn test_handle_after_client_dropped() {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let (client, _rx) = connect_to(&listener);
        let handle = client.handle();
        drop(client);

        assert!(matches!(handle.send("x"), Err(SendError::ChannelClosed)));
    }
}
