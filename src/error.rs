//! Error types for the chat service
//!
//! Splits failures into mechanism-level errors that reach the host
//! (bind, connect, poll) and per-peer errors that are contained at the
//! peer boundary. Uses thiserror for ergonomic error definitions.

use std::io;

use thiserror::Error;

/// Mechanism-level errors
///
/// Fatal to the multiplexer that returns them: the server does not start,
/// the client does not connect, or a running loop terminates.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Listening address could not be resolved or acquired (e.g. already in use)
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Server address could not be resolved or reached
    #[error("failed to connect to {addr}: {source}")]
    Connect { addr: String, source: io::Error },

    /// The readiness wait itself failed
    #[error("poll error: {0}")]
    Poll(#[source] io::Error),

    /// Registration or waker setup failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Per-peer errors
///
/// Recovered locally by closing and deregistering the one stream involved.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Reading from the peer failed
    #[error("read error: {0}")]
    Read(#[source] io::Error),

    /// Writing to the peer failed
    #[error("write error: {0}")]
    Write(#[source] io::Error),

    /// Outbound backlog is over the limit and the peer stopped taking bytes
    #[error("outbound backlog stalled ({pending} bytes pending)")]
    BacklogFull { pending: usize },

    /// Peer closed the stream
    #[error("connection closed by peer")]
    Closed,
}

/// Cross-thread submission errors
///
/// Occurs when a handle is used after its multiplexer has shut down.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The poll could not be woken
    #[error("failed to wake multiplexer: {0}")]
    Wake(#[from] io::Error),
}
