//! Basic type definitions for the chat service
//!
//! - `PeerId`: diagnostic handle for a registered stream
//! - `State`: multiplexer lifecycle

use mio::Token;
use serde::Serialize;

/// Identifier of a registered peer (newtype over the poll token)
///
/// Peers carry no identity beyond their registration; this only exists
/// so logs and events can tell streams apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PeerId(pub usize);

impl From<Token> for PeerId {
    fn from(token: Token) -> Self {
        Self(token.0)
    }
}

impl From<PeerId> for Token {
    fn from(id: PeerId) -> Self {
        Token(id.0)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Multiplexer lifecycle
///
/// `Init -> Listening | Connecting -> Running -> Stopped`. There is no
/// transition out of `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Init,
    Listening,
    Connecting,
    Running,
    Stopped,
}

impl State {
    /// Move to `next` unless already stopped
    pub fn advance(&mut self, next: State) {
        if *self != State::Stopped {
            *self = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_token_conversion() {
        let id = PeerId::from(Token(7));
        assert_eq!(Token::from(id), Token(7));
        assert_eq!(id.to_string(), "#7");
    }

    #[test]
    fn test_state_stopped_is_terminal() {
        let mut state = State::Init;
        state.advance(State::Listening);
        state.advance(State::Running);
        assert_eq!(state, State::Running);

        state.advance(State::Stopped);
        state.advance(State::Running);
        assert_eq!(state, State::Stopped);
    }
}
