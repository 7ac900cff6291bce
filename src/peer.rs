//! Peer connection state
//!
//! One open stream plus everything the multiplexer tracks about it: the
//! current readiness interest, a UTF-8 decoder for partial characters and
//! the outbound backlog left by short non-blocking writes.

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::Interest;

use crate::assembler::{self, Drained, Utf8Decoder};
use crate::error::PeerError;
use crate::types::PeerId;

/// Outcome of a write attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Every byte reached the socket
    Complete,
    /// Some bytes are waiting for the stream to become writable
    Backlogged,
}

/// When an outbound backlog counts as a persistent write failure
///
/// A backlog may grow past `max_bytes` as long as the peer keeps taking
/// bytes. Only a peer that is over the limit and has written nothing for
/// `stall_timeout` is refused further messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogLimit {
    pub max_bytes: usize,
    pub stall_timeout: Duration,
}

/// A connected stream
///
/// Generic over the stream so the broadcaster and assembler can be driven
/// with in-memory doubles.
#[derive(Debug)]
pub struct Peer<S> {
    pub id: PeerId,
    pub stream: S,
    /// Remote address (diagnostic only)
    pub addr: SocketAddr,
    /// Interest currently registered with the poll
    pub interest: Interest,
    decoder: Utf8Decoder,
    backlog: Vec<u8>,
    limit: BacklogLimit,
    /// Last time the socket took bytes or the backlog was empty
    progress: Instant,
}

impl<S> Peer<S> {
    /// Create a peer registered for read interest
    pub fn new(id: PeerId, stream: S, addr: SocketAddr, limit: BacklogLimit) -> Self {
        Self {
            id,
            stream,
            addr,
            interest: Interest::READABLE,
            decoder: Utf8Decoder::new(),
            backlog: Vec::new(),
            limit,
            progress: Instant::now(),
        }
    }

    /// Bytes accepted for sending but not yet written
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    /// Interest this peer needs: write interest only while a backlog exists
    pub fn wanted_interest(&self) -> Interest {
        if self.backlog.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        }
    }

    /// True once the existing backlog is over the limit and has not moved
    /// for the stall timeout
    ///
    /// Judged on the backlog before a new message is added, so a single
    /// message larger than the limit never fails a healthy peer.
    pub fn is_stalled(&self) -> bool {
        self.backlog.len() > self.limit.max_bytes
            && self.progress.elapsed() >= self.limit.stall_timeout
    }

    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), PeerError> {
        if self.is_stalled() {
            return Err(PeerError::BacklogFull {
                pending: self.backlog.len() + bytes.len(),
            });
        }
        self.backlog.extend_from_slice(bytes);
        Ok(())
    }
}

impl<S: Read> Peer<S> {
    /// Drain everything currently readable into one message
    pub fn drain(&mut self, scratch: &mut [u8]) -> Result<Drained, PeerError> {
        assembler::drain(&mut self.stream, scratch, &mut self.decoder).map_err(PeerError::Read)
    }
}

impl<S: Write> Peer<S> {
    /// Write `bytes`, keeping whatever the socket does not take right now
    ///
    /// Bytes are appended behind an existing backlog so ordering is kept.
    pub fn send(&mut self, bytes: &[u8]) -> Result<WriteStatus, PeerError> {
        if !self.backlog.is_empty() {
            self.enqueue(bytes)?;
            return Ok(WriteStatus::Backlogged);
        }

        self.progress = Instant::now();
        let written = write_available(&mut self.stream, bytes)?;
        if written == bytes.len() {
            Ok(WriteStatus::Complete)
        } else {
            self.enqueue(&bytes[written..])?;
            Ok(WriteStatus::Backlogged)
        }
    }

    /// Push the backlog out on write readiness
    pub fn flush(&mut self) -> Result<WriteStatus, PeerError> {
        if self.backlog.is_empty() {
            return Ok(WriteStatus::Complete);
        }

        let written = write_available(&mut self.stream, &self.backlog)?;
        self.backlog.drain(..written);
        if written > 0 {
            self.progress = Instant::now();
        }

        if self.backlog.is_empty() {
            Ok(WriteStatus::Complete)
        } else {
            Ok(WriteStatus::Backlogged)
        }
    }
}

/// Write until done or the stream would block; returns bytes written
fn write_available<W: Write>(writer: &mut W, buf: &[u8]) -> Result<usize, PeerError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => return Err(PeerError::Write(ErrorKind::WriteZero.into())),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(PeerError::Write(e)),
        }
    }
    Ok(written)
}

/// In-memory stream doubles shared by unit tests
#[cfg(test)]
pub(crate) mod mock {
    use std::io::{self, ErrorKind, Read, Write};
    use std::net::SocketAddr;
    use std::time::Duration;

    use super::{BacklogLimit, Peer};
    use crate::types::PeerId;

    /// Writer that accepts `budget` bytes and then would block
    #[derive(Debug, Default)]
    pub struct MockStream {
        pub written: Vec<u8>,
        pub budget: usize,
        pub max_per_write: usize,
        pub fail: Option<ErrorKind>,
    }

    impl MockStream {
        pub fn unlimited() -> Self {
            Self {
                budget: usize::MAX,
                max_per_write: usize::MAX,
                ..Self::default()
            }
        }

        pub fn with_budget(budget: usize) -> Self {
            Self {
                budget,
                max_per_write: usize::MAX,
                ..Self::default()
            }
        }

        pub fn failing(kind: ErrorKind) -> Self {
            Self {
                fail: Some(kind),
                ..Self::unlimited()
            }
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.fail {
                return Err(kind.into());
            }
            if self.budget == 0 {
                return Err(ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget).min(self.max_per_write);
            self.written.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for MockStream {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(ErrorKind::WouldBlock.into())
        }
    }

    /// Limit used by `peer`: 64 bytes, stalled as soon as nothing moves
    pub const LIMIT: BacklogLimit = BacklogLimit {
        max_bytes: 64,
        stall_timeout: Duration::ZERO,
    };

    pub fn peer(id: usize, stream: MockStream) -> Peer<MockStream> {
        peer_with_limit(id, stream, LIMIT)
    }

    pub fn peer_with_limit(id: usize, stream: MockStream, limit: BacklogLimit) -> Peer<MockStream> {
        let addr: SocketAddr = format!("127.0.0.1:{}", 40000 + id).parse().unwrap();
        Peer::new(PeerId(id), stream, addr, limit)
    }
}
