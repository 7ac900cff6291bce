//! Broadcast TCP Chat Library
//!
//! A single-threaded chat server and client built on readiness-based I/O
//! (mio). Every message a client sends is rebroadcast to every connected
//! client, the sender included.
//!
//! # Features
//! - Non-blocking accept, drain-until-would-block reads, fan-out writes
//! - Partial writes kept per peer and finished on write readiness
//! - UTF-8 decoding that survives characters split across reads
//! - Per-peer failures contained; only bind/connect/poll errors surface
//! - Events delivered to the host over a channel, never via callbacks
//!   into presentation code
//!
//! # Architecture
//! One thread owns each multiplexer and all of its streams:
//! - `Server` polls the listener and every peer, hands drained text to
//!   the broadcaster and writes it to the whole `SessionTable`
//! - `Client` runs the same loop over a single outbound stream
//! - `StopHandle` / `ClientHandle` are the only cross-thread entry points
//!
//! # Example
//! ```ignore
//! use tokio::sync::mpsc;
//! use tchat::{Server, ServerConfig};
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let server = Server::start(ServerConfig::new("127.0.0.1", 5000), tx)?;
//! let stop = server.stop_handle();
//!
//! std::thread::spawn(move || server.run());
//!
//! while let Some(event) = rx.blocking_recv() {
//!     println!("{}", event);
//! }
//! ```

pub mod assembler;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod reactor;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, ClientHandle};
pub use config::{ClientConfig, ServerConfig, BUFFER_SIZE};
pub use error::{ChatError, PeerError, SendError};
pub use events::{ClientEvent, ServerEvent};
pub use peer::BacklogLimit;
pub use reactor::StopHandle;
pub use server::Server;
pub use session::SessionTable;
pub use types::{PeerId, State};
