//! Datagram framing: the outermost layer of every packet.
//!
//! Two envelope shapes share one socket:
//!
//! ```text
//! connectionless:  ff ff ff ff | ASCII command line ...
//! sequenced:       sequence (u32 LE) | qport (u16 LE) | opaque payload ...
//! ```
//!
//! Server → client sequenced datagrams omit the qport; only clients need to
//! disambiguate themselves behind NAT.
//!
//! The codec does framing only. It never interprets the command line or the
//! payload, with one exception: the `connect` handshake is compressed by
//! legacy clients, so its tail is run through a [`PayloadTransform`] before
//! anyone tries to tokenize it.

use std::fmt;

use crate::ProtocolError;

/// Leading marker of a connectionless datagram (a little-endian `-1`).
pub const CONNECTIONLESS_MARKER: [u8; 4] = [0xff; 4];

/// Length of the client → server sequenced header (sequence + qport).
pub const SEQUENCED_HEADER_LEN: usize = 6;

/// The only connectionless command whose tail is compressed.
const CONNECT_COMMAND: &[u8] = b"connect";

/// Bytes of the connectionless payload left uncompressed: `"connect "`.
const CONNECT_PLAIN_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Decompression hook
// ---------------------------------------------------------------------------

/// Reverses the bit-level compression legacy clients apply to the `connect`
/// handshake.
///
/// The compressor itself lives outside this crate. Servers that only talk to
/// clients sending plain text use [`Uncompressed`].
pub trait PayloadTransform: Send + Sync + 'static {
    /// Expands the compressed tail of a `connect` payload.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError>;
}

/// Identity transform: the handshake arrives as plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncompressed;

impl PayloadTransform for Uncompressed {
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        Ok(data.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A decoded datagram envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Out-of-band request. The bytes follow the marker and are ready to be
    /// tokenized as a command line.
    Connectionless(Vec<u8>),

    /// In-band datagram belonging to an established session.
    Sequenced {
        /// Sender's outgoing sequence number.
        sequence: u32,
        /// Client-chosen port tag.
        qport: u16,
        /// Opaque application payload.
        payload: Vec<u8>,
    },

    /// Shorter than any header. Ignore it.
    TooShort,
}

impl Envelope {
    /// Whether this is an out-of-band request.
    pub fn is_connectionless(&self) -> bool {
        matches!(self, Self::Connectionless(_))
    }
}

// ---------------------------------------------------------------------------
// WireCodec
// ---------------------------------------------------------------------------

/// Encodes and decodes datagram envelopes.
pub struct WireCodec {
    transform: Box<dyn PayloadTransform>,
}

impl WireCodec {
    /// Creates a codec using `transform` for compressed `connect` payloads.
    pub fn new(transform: impl PayloadTransform) -> Self {
        Self {
            transform: Box::new(transform),
        }
    }

    /// Splits a raw datagram into its envelope.
    ///
    /// Input shorter than the header decodes to [`Envelope::TooShort`];
    /// only a failing decompression transform produces an error.
    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, ProtocolError> {
        if bytes.len() >= CONNECTIONLESS_MARKER.len()
            && bytes[..4] == CONNECTIONLESS_MARKER
        {
            let payload = &bytes[4..];
            if payload.starts_with(CONNECT_COMMAND)
                && payload.len() > CONNECT_PLAIN_LEN
            {
                let mut expanded = payload[..CONNECT_PLAIN_LEN].to_vec();
                expanded.extend(
                    self.transform.decompress(&payload[CONNECT_PLAIN_LEN..])?,
                );
                return Ok(Envelope::Connectionless(expanded));
            }
            return Ok(Envelope::Connectionless(payload.to_vec()));
        }

        if bytes.len() < SEQUENCED_HEADER_LEN {
            return Ok(Envelope::TooShort);
        }

        let sequence = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let qport = u16::from_le_bytes([bytes[4], bytes[5]]);
        Ok(Envelope::Sequenced {
            sequence,
            qport,
            payload: bytes[SEQUENCED_HEADER_LEN..].to_vec(),
        })
    }

    /// Frames an out-of-band payload.
    pub fn encode_connectionless(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.extend_from_slice(&CONNECTIONLESS_MARKER);
        out.extend_from_slice(payload);
        out
    }

    /// Frames an out-of-band text reply (`print`, `infoResponse`, ...).
    pub fn encode_connectionless_text(text: &str) -> Vec<u8> {
        Self::encode_connectionless(text.as_bytes())
    }

    /// Frames a server → client in-band datagram.
    pub fn encode_sequenced(sequence: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Frames a client → server in-band datagram. Used by clients and tests.
    pub fn encode_client_sequenced(
        sequence: u32,
        qport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(payload.len() + SEQUENCED_HEADER_LEN);
        out.extend_from_slice(&sequence.to_le_bytes());
        out.extend_from_slice(&qport.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(Uncompressed)
    }
}

impl fmt::Debug for WireCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireCodec").finish_non_exhaustive()
    }
}
