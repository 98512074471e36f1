//! Wire protocol for Outpost.
//!
//! This crate is the text and byte layer every other crate speaks:
//!
//! - **Envelopes** ([`WireCodec`], [`Envelope`]): connectionless vs.
//!   sequenced datagram framing.
//! - **Command lines** ([`Args`]): the tokenizer for out-of-band requests,
//!   rcon, client commands and the operator console.
//! - **Info strings** ([`InfoString`]): `\key\value` blobs.
//! - **Reliable commands** ([`ServerCommand`], [`CommandBuilder`]): typed,
//!   length-bounded construction of server → client command lines.
//! - **In-band frames** ([`ClientFrame`], [`ServerFrame`]) and the
//!   [`Codec`] that turns them into bytes.
//!
//! # Architecture
//!
//! ```text
//! Transport (datagrams) → Protocol (Envelope / Args / frames) → Session
//! ```
//!
//! Nothing here knows about sessions, slots or time.

mod args;
mod codec;
mod command;
mod envelope;
mod error;
mod info;
mod types;

pub use args::{Args, MAX_TOKENS, read_line};
pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use command::{
    CommandBuilder, MAX_COMMAND_LEN, MAX_CONFIG_STRING_CHUNK, ServerCommand,
};
pub use envelope::{
    CONNECTIONLESS_MARKER, Envelope, PayloadTransform, SEQUENCED_HEADER_LEN,
    Uncompressed, WireCodec,
};
pub use error::ProtocolError;
pub use info::{InfoString, RESERVED_CHARS, has_reserved_chars};
pub use types::{
    BIG_INFO_STRING, CS_SERVERINFO, CS_SYSTEMINFO, CS_WARMUP, ClientFrame,
    FrameBody, HEARTBEAT_GAME, MAX_CHALLENGES, MAX_CONFIGSTRINGS,
    MAX_INFO_STRING, MAX_MASTER_SERVERS, MAX_MSGLEN, MAX_RELIABLE_COMMANDS,
    MAX_STRING_CHARS, PACKET_BACKUP, PING_UNKNOWN, PORT_AUTHORIZE,
    PORT_MASTER, PORT_SERVER, PROTOCOL_VERSION, SequencedCommand,
    ServerFrame,
};
