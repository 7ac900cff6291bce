//! Broadcaster
//!
//! Writes one message to every peer in the session table, the sender
//! included. Per-peer failures are collected rather than acted on so the
//! caller can remove those peers after the walk is complete.

use std::io::Write;

use tracing::{debug, warn};

use crate::error::PeerError;
use crate::peer::WriteStatus;
use crate::session::SessionTable;
use crate::types::PeerId;

/// Per-peer outcome of one broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Peers that took the whole message
    pub delivered: Vec<PeerId>,
    /// Peers holding part of the message in their backlog
    pub backlogged: Vec<PeerId>,
    /// Peers whose write failed; the caller must close them
    pub failed: Vec<(PeerId, PeerError)>,
}

impl BroadcastReport {
    /// Number of peers the message was handed to without error
    pub fn reached(&self) -> usize {
        self.delivered.len() + self.backlogged.len()
    }
}

/// Send `bytes` to every registered peer
pub fn broadcast<S: Write>(sessions: &mut SessionTable<S>, bytes: &[u8]) -> BroadcastReport {
    let mut report = BroadcastReport::default();

    for peer in sessions.iter_mut() {
        match peer.send(bytes) {
            Ok(WriteStatus::Complete) => report.delivered.push(peer.id),
            Ok(WriteStatus::Backlogged) => {
                debug!(peer = %peer.id, pending = peer.pending(), "Write backlogged");
                report.backlogged.push(peer.id);
            }
            Err(e) => {
                warn!(peer = %peer.id, addr = %peer.addr, error = %e, "Broadcast write failed");
                report.failed.push((peer.id, e));
            }
        }
    }

    debug!(
        bytes = bytes.len(),
        delivered = report.delivered.len(),
        backlogged = report.backlogged.len(),
        failed = report.failed.len(),
        "Broadcast complete"
    );
    report
}
