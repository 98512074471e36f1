/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the socket failed.
    #[error("bind failed: {0}")]
    BindFailed(#[source] std::io::Error),

    /// Sending a datagram failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving a datagram failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Only part of a datagram was written.
    #[error("short send: {sent} of {len} bytes")]
    ShortSend {
        /// Bytes the socket accepted.
        sent: usize,
        /// Bytes that should have gone out.
        len: usize,
    },
}
