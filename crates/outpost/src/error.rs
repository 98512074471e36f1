//! Unified error type for the Outpost server.

use outpost_protocol::ProtocolError;
use outpost_session::SessionError;
use outpost_transport::TransportError;

/// Failure of an operator or rcon command.
///
/// The `Display` text is exactly what the console prints.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command needs a loaded map.
    #[error("Server is not running.")]
    NotRunning,

    /// Wrong argument count or shape.
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// No player matched the given name or number.
    #[error("Player {0} is not on the server")]
    PlayerNotFound(String),

    /// A slot number that does not parse or is out of range.
    #[error("Bad client slot: {0}")]
    BadSlot(String),

    /// A valid slot nobody occupies.
    #[error("Client {0} is not active")]
    InactiveSlot(usize),

    /// The command ran and failed for a stated reason.
    #[error("{0}")]
    Failed(String),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant auto-generates `From` impls,
/// so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum OutpostError {
    /// A transport-level error (bind, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, payload encoding, argument validation).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (window overflow, bad ack, state machine).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An operator command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The simulation refused a map or a client.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The configuration file could not be read or parsed.
    #[error("config: {0}")]
    Config(String),
}
