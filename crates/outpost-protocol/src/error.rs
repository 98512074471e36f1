//! Error types for the protocol layer.
//!
//! Each crate in Outpost defines its own error enum. A `ProtocolError`
//! always means the bytes or text themselves were wrong (framing, payload
//! encoding, argument validation), never that a session or socket failed.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization of an in-band payload failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization of an in-band payload failed.
    ///
    /// Common causes: truncated datagrams, garbage from a stray sender,
    /// or a client speaking a different payload revision.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The handshake payload could not be run through the decompression
    /// transform.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// A command argument or info-string field contained a character the
    /// text protocol reserves (`\`, `;` or `"`).
    #[error("reserved character in {field}: {value:?}")]
    ReservedCharacter {
        /// Which field was being set.
        field: &'static str,
        /// The offending value.
        value: String,
    },

    /// A built command or info string would exceed its length bound.
    #[error("{what} exceeds {limit} bytes")]
    TooLong {
        /// What was being built.
        what: &'static str,
        /// The bound that was exceeded.
        limit: usize,
    },

    /// The message is invalid at the protocol level.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
