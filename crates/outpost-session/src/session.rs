//! Session types: one record per client slot and its state machine.
//!
//! ```text
//!   Free ──connect──▶ Connected ──baseline acked──▶ Primed ──begin──▶ Active
//!    ▲                   │                            │                 │
//!    │                   └────────────drop────────────┴────────┬────────┘
//!    │                                                         ▼
//!    └──────────────────grace elapsed────────────────────── Zombie
//! ```
//!
//! Every state can also go straight to `Free` when the trailing
//! reliable messages need not be delivered.

use std::fmt;
use std::net::SocketAddr;

use outpost_protocol::{InfoString, PING_UNKNOWN, SequencedCommand};

use crate::{Netchan, ReliableChannel, SessionError};

/// Name used when a client's user info carries none.
pub const DEFAULT_NAME: &str = "UnnamedPlayer";

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Limits and timeouts for the session table.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of slots.
    pub max_clients: usize,

    /// Silence (ms of server time) after which a tick counts towards a
    /// timeout.
    pub timeout_ms: i32,

    /// Consecutive over-threshold ticks before the session is dropped.
    pub timeout_strikes: u32,

    /// How long (ms) a zombie keeps its slot.
    pub zombie_ms: i32,

    /// Replace unsent `cs` updates for the same index instead of queueing
    /// a second one.
    pub coalesce_config_strings: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_clients: 8,
            timeout_ms: 200_000,
            timeout_strikes: 6,
            zombie_ms: 2_000,
            coalesce_config_strings: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Connection state of one slot. Ordered, so `state >= Primed` reads as
/// "has a baseline".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    /// Slot is unused.
    Free,
    /// Dropped; kept briefly so the final reliable message can be resent.
    Zombie,
    /// Handshake done, gamestate not yet acknowledged.
    Connected,
    /// Gamestate acknowledged, not yet in the world.
    Primed,
    /// In the world.
    Active,
}

impl SessionState {
    /// Whether moving from `self` to `next` is an edge of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Free, Connected)
                | (Connected, Primed)
                | (Primed, Active)
                | (Connected | Primed | Active, Zombie)
                | (Zombie | Connected | Primed | Active, Free)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Free => "free",
            Self::Zombie => "zombie",
            Self::Connected => "connected",
            Self::Primed => "primed",
            Self::Active => "active",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Endpoint / SessionId
// ---------------------------------------------------------------------------

/// Where a session's traffic goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A network client. Several may share an IP; the qport tells them apart.
    Remote { addr: SocketAddr, qport: u16 },
    /// A server-side bot. Never sends or receives datagrams.
    Bot,
}

impl Endpoint {
    /// Whether this is a bot.
    pub fn is_bot(&self) -> bool {
        matches!(self, Self::Bot)
    }

    /// The network address, if any.
    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Remote { addr, .. } => Some(*addr),
            Self::Bot => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { addr, qport } => write!(f, "{addr} (qport {qport})"),
            Self::Bot => f.write_str("bot"),
        }
    }
}

/// A handle to one occupancy of a slot. The generation changes every time
/// the slot is reallocated, so a handle held across a reconnect goes stale
/// instead of aliasing the new client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub slot: usize,
    pub generation: u32,
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// Everything the server tracks about one slot.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub(crate) slot: usize,
    pub(crate) generation: u32,
    pub(crate) state: SessionState,

    /// Traffic destination.
    pub endpoint: Endpoint,

    /// User info negotiated at connect time and updated by `userinfo`.
    pub userinfo: InfoString,

    /// Display name taken from the user info.
    pub name: String,

    /// Outbound reliable commands.
    pub reliable: ReliableChannel,

    /// Datagram sequencing and frame history.
    pub netchan: Netchan,

    /// Last client reliable command executed.
    pub last_client_command: u32,

    /// Server time of the last accepted datagram.
    pub last_packet_time: i32,

    /// Server time of the last successful connect.
    pub last_connect_time: i32,

    /// Consecutive over-threshold timeout ticks.
    pub timeout_count: u32,

    /// Current ping estimate in ms.
    pub ping: i32,

    /// Challenge presented at connect.
    pub challenge: i32,

    /// Outgoing message sequence that first carried the gamestate.
    pub gamestate_message: Option<u32>,
}

impl ClientSession {
    pub(crate) fn free(slot: usize) -> Self {
        Self {
            slot,
            generation: 0,
            state: SessionState::Free,
            endpoint: Endpoint::Bot,
            userinfo: InfoString::new(),
            name: String::new(),
            reliable: ReliableChannel::default(),
            netchan: Netchan::new(),
            last_client_command: 0,
            last_packet_time: 0,
            last_connect_time: 0,
            timeout_count: 0,
            ping: PING_UNKNOWN,
            challenge: 0,
            gamestate_message: None,
        }
    }

    /// Slot index.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Handle to this occupancy of the slot.
    pub fn id(&self) -> SessionId {
        SessionId {
            slot: self.slot,
            generation: self.generation,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether this slot is a bot.
    pub fn is_bot(&self) -> bool {
        self.endpoint.is_bot()
    }

    /// Moves along one edge of the state machine.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] for anything that is not an edge.
    pub fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            slot = self.slot,
            name = %self.name,
            from = %self.state,
            to = %next,
            "session state change"
        );
        self.state = next;
        Ok(())
    }

    /// Replaces the user info and refreshes the display name.
    pub fn set_userinfo(&mut self, userinfo: InfoString) {
        let name = userinfo.get("name");
        self.name = if name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            name.to_string()
        };
        self.userinfo = userinfo;
    }

    /// Filters incoming client reliable commands down to the ones not yet
    /// executed, in order, and advances [`last_client_command`].
    ///
    /// # Errors
    /// [`SessionError::LostReliableCommands`] if a command is missing
    /// before one that arrived.
    ///
    /// [`last_client_command`]: Self::last_client_command
    pub fn take_new_commands(
        &mut self,
        commands: &[SequencedCommand],
    ) -> Result<Vec<String>, SessionError> {
        let mut fresh = Vec::new();
        for cmd in commands {
            let delta = cmd.sequence.wrapping_sub(self.last_client_command) as i32;
            if delta <= 0 {
                continue;
            }
            if delta > 1 {
                return Err(SessionError::LostReliableCommands {
                    expected: self.last_client_command.wrapping_add(1),
                    got: cmd.sequence,
                });
            }
            self.last_client_command = cmd.sequence;
            fresh.push(cmd.text.clone());
        }
        Ok(fresh)
    }

    /// Resets per-connection state for a new occupant.
    pub(crate) fn reset(&mut self, endpoint: Endpoint, coalesce: bool, now: i32) {
        self.generation = self.generation.wrapping_add(1);
        self.endpoint = endpoint;
        self.userinfo = InfoString::new();
        self.name = DEFAULT_NAME.to_string();
        self.reliable = ReliableChannel::new(coalesce);
        self.netchan = Netchan::new();
        self.last_client_command = 0;
        self.last_packet_time = now;
        self.last_connect_time = now;
        self.timeout_count = 0;
        self.ping = PING_UNKNOWN;
        self.challenge = 0;
        self.gamestate_message = None;
    }
}

/// Strips `^N` colour codes from a player name.
pub fn clean_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '^' {
            if let Some(next) = chars.peek() {
                if next.is_ascii_alphanumeric() {
                    chars.next();
                    continue;
                }
            }
        }
        if c.is_ascii_graphic() || c == ' ' {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    #[test]
    fn test_state_machine_edges() {
        let allowed = [
            (Free, Connected),
            (Connected, Primed),
            (Primed, Active),
            (Connected, Zombie),
            (Primed, Zombie),
            (Active, Zombie),
            (Zombie, Free),
            (Active, Free),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{from} -> {to} should be allowed");
        }

        let rejected = [
            (Connected, Active),
            (Free, Active),
            (Free, Zombie),
            (Zombie, Connected),
            (Active, Primed),
            (Free, Free),
        ];
        for (from, to) in rejected {
            assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
        }
    }

    #[test]
    fn test_transition_connected_to_active_is_rejected() {
        let mut s = ClientSession::free(0);
        s.transition(Connected).unwrap();

        let err = s.transition(Active).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition { from: Connected, to: Active }
        ));
        assert_eq!(s.state(), Connected);
    }

    #[test]
    fn test_full_lifecycle_never_skips() {
        let mut s = ClientSession::free(3);
        for next in [Connected, Primed, Active, Zombie, Free] {
            s.transition(next).unwrap();
            assert_eq!(s.state(), next);
        }
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(Free < Zombie);
        assert!(Zombie < Connected);
        assert!(Primed >= Connected);
        assert!(Active >= Primed);
    }

    #[test]
    fn test_set_userinfo_updates_name() {
        let mut s = ClientSession::free(0);
        s.set_userinfo(InfoString::parse(r"\name\^1Red^7Guy\rate\25000"));
        assert_eq!(s.name, "^1Red^7Guy");

        s.set_userinfo(InfoString::parse(r"\rate\25000"));
        assert_eq!(s.name, DEFAULT_NAME);
    }

    #[test]
    fn test_reset_bumps_generation() {
        let mut s = ClientSession::free(1);
        let before = s.id();
        s.reset(Endpoint::Bot, false, 10);
        assert_ne!(s.id(), before);
        assert_eq!(s.id().slot, 1);
        assert_eq!(s.last_packet_time, 10);
    }

    fn cmd(sequence: u32, text: &str) -> SequencedCommand {
        SequencedCommand {
            sequence,
            text: text.into(),
        }
    }

    #[test]
    fn test_take_new_commands_skips_already_executed() {
        let mut s = ClientSession::free(0);
        let first = s
            .take_new_commands(&[cmd(1, "userinfo a"), cmd(2, "begin")])
            .unwrap();
        assert_eq!(first, vec!["userinfo a", "begin"]);

        // retransmission of 1..=2 plus a new 3
        let second = s
            .take_new_commands(&[cmd(1, "userinfo a"), cmd(2, "begin"), cmd(3, "say hi")])
            .unwrap();
        assert_eq!(second, vec!["say hi"]);
        assert_eq!(s.last_client_command, 3);
    }

    #[test]
    fn test_take_new_commands_gap_is_fault() {
        let mut s = ClientSession::free(0);
        let err = s.take_new_commands(&[cmd(2, "begin")]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::LostReliableCommands { expected: 1, got: 2 }
        ));
        assert!(err.is_protocol_fault());
    }

    #[test]
    fn test_clean_name_strips_colour_codes() {
        assert_eq!(clean_name("^1Red^7Guy"), "RedGuy");
        assert_eq!(clean_name("plain name"), "plain name");
        assert_eq!(clean_name("trail^"), "trail^");
    }
}
