//! Error types for the session layer.

use crate::{SessionId, SessionState};

/// Errors that can occur during session management.
///
/// The first three are protocol faults: the server core answers them by
/// dropping the offending session, never by failing the frame.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Accepting another reliable command would overwrite one the client
    /// has not acknowledged yet.
    #[error("server command overflow (sequence {sequence}, acknowledge {acknowledge})")]
    ChannelOverflow {
        /// Current outgoing reliable sequence.
        sequence: u32,
        /// Last sequence the client acknowledged.
        acknowledge: u32,
    },

    /// The client acknowledged a reliable command it was never sent.
    #[error("acknowledged {ack} beyond sequence {sequence}")]
    AckBeyondSequence {
        /// The acknowledgment the client sent.
        ack: u32,
        /// The highest sequence the server has assigned.
        sequence: u32,
    },

    /// A client reliable command arrived with a gap before it.
    #[error("Lost reliable commands (expected {expected}, got {got})")]
    LostReliableCommands {
        /// The next sequence the server was waiting for.
        expected: u32,
        /// The sequence that actually arrived.
        got: u32,
    },

    /// The requested state change is not an edge of the state machine.
    #[error("invalid session transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// The slot index is outside the table.
    #[error("slot {0} out of range")]
    SlotOutOfRange(usize),

    /// The session handle refers to a slot that has since been reused.
    #[error("stale session handle {0}")]
    Stale(SessionId),
}

impl SessionError {
    /// Whether the error is a protocol fault that must drop the session.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            Self::ChannelOverflow { .. }
                | Self::AckBeyondSequence { .. }
                | Self::LostReliableCommands { .. }
        )
    }
}
