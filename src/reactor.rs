//! Readiness-loop plumbing shared by the server and client multiplexers
//!
//! - `StopHandle`: external "should continue" flag plus a waker so a
//!   blocked poll notices it promptly
//! - `Readiness`: owned snapshot of one poll event
//! - address resolution and the poll wait itself

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::event::Event;
use mio::{Events, Poll, Token, Waker};
use tracing::{error, warn};

use crate::error::ChatError;

/// Token reserved for the waker on every poll
pub(crate) const WAKER: Token = Token(0);

/// Shared run flag for one multiplexer
///
/// Cloneable and `Send`; any thread may stop the loop. The flag is checked
/// once per loop iteration, so an in-flight read or write always finishes
/// its current non-blocking attempt first.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    pub(crate) fn new(waker: Waker) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            waker: Arc::new(waker),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to exit; idempotent
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.waker.wake() {
                warn!(error = %e, "Failed to wake multiplexer for stop");
            }
        }
    }

    /// Interrupt a blocked poll without stopping it
    pub(crate) fn wake(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

/// Owned copy of one readiness event
///
/// Events are snapshotted before dispatch because handlers need `&mut`
/// access to the multiplexer that owns the event buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Readiness {
    pub token: Token,
    /// Readable, or a condition (hang-up, error) only a read will surface
    pub readable: bool,
    pub writable: bool,
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable() || event.is_read_closed() || event.is_error(),
            writable: event.is_writable(),
        }
    }
}

/// Block until something is ready and snapshot the events
///
/// An interrupted wait yields no events; any other failure is fatal.
pub(crate) fn wait(
    poll: &mut Poll,
    events: &mut Events,
    timeout: Option<Duration>,
) -> Result<Vec<Readiness>, ChatError> {
    match poll.poll(events, timeout) {
        Ok(()) => Ok(events.iter().map(Readiness::from).collect()),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(Vec::new()),
        Err(e) => {
            error!(error = %e, "Readiness wait failed");
            Err(ChatError::Poll(e))
        }
    }
}

/// Resolve `host:port` to every candidate socket address
///
/// Callers wrap the error as `Bind` or `Connect` for their side.
pub(crate) fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("{}:{} resolved to no addresses", host, port),
        ));
    }
    Ok(addrs)
}
