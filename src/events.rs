//! Domain events emitted to the host
//!
//! Multiplexers never call into presentation code. They push these events
//! onto a channel; the host renders them on its own thread. Events
//! serialize as tagged JSON (snake_case) and `Display` as log lines.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::types::PeerId;

/// Server → host notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Listener bound and registered
    Started { addr: SocketAddr },
    /// New peer accepted
    Connected { peer: PeerId, addr: SocketAddr },
    /// Peer removed from the session table
    Disconnected { peer: PeerId, addr: SocketAddr },
    /// Raw message drained from a peer and broadcast
    Message { peer: PeerId, text: String },
    /// Session table size changed
    ClientCount { count: usize },
    /// Loop exited and resources were released
    Stopped,
}

/// Client → host notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Outbound connection established
    Connected { addr: SocketAddr },
    /// One drained read cycle with non-empty content
    Message { text: String },
    /// Stream closed (by the server, an error, or a local stop)
    Disconnected,
}

pub type ServerEvents = mpsc::UnboundedSender<ServerEvent>;
pub type ClientEvents = mpsc::UnboundedSender<ClientEvent>;

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Started { addr } => write!(f, "server started on {}", addr),
            ServerEvent::Connected { addr, .. } => write!(f, "client connected: {}", addr),
            ServerEvent::Disconnected { addr, .. } => write!(f, "client disconnected: {}", addr),
            ServerEvent::Message { text, .. } => f.write_str(text),
            ServerEvent::ClientCount { count } => write!(f, "{} client(s) connected", count),
            ServerEvent::Stopped => f.write_str("server stopped"),
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Connected { addr } => write!(f, "connected to {}", addr),
            ClientEvent::Message { text } => f.write_str(text),
            ClientEvent::Disconnected => f.write_str("disconnected from server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_server_event_serialize() {
        let event = ServerEvent::Connected {
            peer: PeerId(2),
            addr: addr(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
        assert!(json.contains("\"peer\":2"));
        assert!(json.contains("\"addr\":\"127.0.0.1:5000\""));
    }

    #[test]
    fn test_client_count_serialize() {
        let json = serde_json::to_string(&ServerEvent::ClientCount { count: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"client_count","count":3}"#);
    }

    #[test]
    fn test_log_lines() {
        assert_eq!(
            ServerEvent::Started { addr: addr() }.to_string(),
            "server started on 127.0.0.1:5000"
        );
        assert_eq!(
            ServerEvent::Connected {
                peer: PeerId(2),
                addr: addr()
            }
            .to_string(),
            "client connected: 127.0.0.1:5000"
        );
        assert_eq!(
            ServerEvent::Message {
                peer: PeerId(2),
                text: "hello".to_string()
            }
            .to_string(),
            "hello"
        );
    }

    #[test]
    fn test_client_event_serialize() {
        let json = serde_json::to_string(&ClientEvent::Message {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"message","text":"hi"}"#);
        assert_eq!(
            serde_json::to_string(&ClientEvent::Disconnected).unwrap(),
            r#"{"type":"disconnected"}"#
        );
    }
}
