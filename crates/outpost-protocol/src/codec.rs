//! Codec for the opaque payload inside a sequenced envelope.
//!
//! The envelope itself is fixed binary framing (see [`WireCodec`]); what it
//! carries is a [`ClientFrame`] or [`ServerFrame`] encoded by a [`Codec`].
//! [`JsonCodec`] is the default. A compact binary codec can be dropped in
//! without touching the session layer.
//!
//! [`WireCodec`]: crate::WireCodec
//! [`ClientFrame`]: crate::ClientFrame
//! [`ServerFrame`]: crate::ServerFrame

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Converts in-band frames to and from bytes.
///
/// `Send + Sync + 'static` so the server core can hold one inside the
/// async runner.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// truncated, or describe a different type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// Behind the `json` feature (on by default).
///
/// ```rust
/// use outpost_protocol::{ClientFrame, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let frame = ClientFrame { reliable_ack: 3, ..Default::default() };
///
/// let bytes = codec.encode(&frame).unwrap();
/// let decoded: ClientFrame = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, frame);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ClientFrame, FrameBody, SequencedCommand, ServerFrame};

    #[test]
    fn test_json_codec_server_frame() {
        let codec = JsonCodec;
        let frame = ServerFrame {
            server_time: 50,
            command_ack: 0,
            commands: vec![SequencedCommand {
                sequence: 1,
                text: "cs 0 \"\"".into(),
            }],
            body: FrameBody::None,
        };

        let bytes = codec.encode(&frame).unwrap();
        let decoded: ServerFrame = codec.decode(&bytes).unwrap();

        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result: Result<ClientFrame, _> = JsonCodec.decode(b"\x01\x02not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_rejects_wrong_shape() {
        let result: Result<ClientFrame, _> = JsonCodec.decode(br#"{"nope": 1}"#);
        assert!(result.is_err());
    }
}
