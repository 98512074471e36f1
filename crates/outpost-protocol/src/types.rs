//! Protocol constants and the in-band payload types.
//!
//! The sequenced envelope carries an opaque payload. Outpost encodes it
//! with a [`Codec`](crate::Codec) as one of two frames:
//!
//! - [`ClientFrame`]: client → server. Acknowledgments, client reliable
//!   commands and opaque simulation input.
//! - [`ServerFrame`]: server → client. Every unacknowledged reliable
//!   command plus either the full gamestate or a snapshot.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Protocol revision clients must present in `connect`.
pub const PROTOCOL_VERSION: i32 = 26;

/// Size of the reliable command ring. Must be a power of two.
pub const MAX_RELIABLE_COMMANDS: usize = 128;

/// Bound on a single reliable command, terminator included.
pub const MAX_STRING_CHARS: usize = 1024;

/// Bound on a rendered info string.
pub const MAX_INFO_STRING: usize = 1024;

/// Bound on system info, which is split across `bcs` fragments.
pub const BIG_INFO_STRING: usize = 8192;

/// Bound on any single datagram.
pub const MAX_MSGLEN: usize = 49152;

/// Depth of the per-session outgoing frame history.
pub const PACKET_BACKUP: usize = 32;

/// Number of replicated configuration strings.
pub const MAX_CONFIGSTRINGS: usize = 1700;

/// Config string holding the server info string.
pub const CS_SERVERINFO: usize = 0;

/// Config string holding the system info string.
pub const CS_SYSTEMINFO: usize = 1;

/// Config string holding the scheduled restart time.
pub const CS_WARMUP: usize = 5;

/// Capacity of the connection challenge table.
pub const MAX_CHALLENGES: usize = 1024;

/// Number of directory server slots (`sv_master1` .. `sv_master5`).
pub const MAX_MASTER_SERVERS: usize = 5;

/// Default directory server port.
pub const PORT_MASTER: u16 = 29060;

/// Default authorize server port.
pub const PORT_AUTHORIZE: u16 = 29952;

/// Default game server port.
pub const PORT_SERVER: u16 = 27960;

/// Game name sent in heartbeats.
pub const HEARTBEAT_GAME: &str = "QuakeArena-1";

/// Ping reported for sessions with no samples.
pub const PING_UNKNOWN: i32 = 999;

// ---------------------------------------------------------------------------
// Reliable commands on the wire
// ---------------------------------------------------------------------------

/// One reliable command together with its sequence number.
///
/// Used in both directions. The receiver executes commands strictly in
/// sequence order and skips the ones it has already seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedCommand {
    pub sequence: u32,
    pub text: String,
}

// ---------------------------------------------------------------------------
// ClientFrame
// ---------------------------------------------------------------------------

/// Client → server in-band payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Last server reliable command the client has received.
    pub reliable_ack: u32,

    /// Last server message sequence the client has received, if any.
    #[serde(default)]
    pub message_ack: Option<u32>,

    /// Client reliable commands not yet acknowledged by the server.
    #[serde(default)]
    pub commands: Vec<SequencedCommand>,

    /// Movement input, opaque to the network layer.
    #[serde(default)]
    pub input: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ServerFrame
// ---------------------------------------------------------------------------

/// Server → client in-band payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFrame {
    /// Server time at which the frame was built.
    pub server_time: i32,

    /// Last client reliable command the server executed.
    pub command_ack: u32,

    /// Every reliable command the client has not acknowledged yet.
    pub commands: Vec<SequencedCommand>,

    /// Gamestate, snapshot or nothing.
    pub body: FrameBody,
}

/// What follows the reliable commands in a [`ServerFrame`].
///
/// Internally tagged, so a gamestate looks like
/// `{ "type": "Gamestate", "config_strings": [...], "client_slot": 3 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameBody {
    /// Full baseline: every non-empty config string. Sent while the client
    /// is still Connected.
    Gamestate {
        config_strings: Vec<(usize, String)>,
        client_slot: usize,
    },

    /// Simulation state for Primed and Active clients.
    Snapshot { data: Vec<u8> },

    /// Zombies only get their pending reliable commands.
    None,
}

// =========================================================================
// Tests
// =========================================================================
