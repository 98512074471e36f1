//! Client session management for Outpost.
//!
//! This crate owns everything the server remembers about a client between
//! datagrams:
//!
//! 1. **Slots**: a fixed arena of [`ClientSession`]s ([`SessionTable`]),
//!    each running the Free → Connected → Primed → Active → Zombie state
//!    machine.
//! 2. **Reliable commands**: the per-session [`ReliableChannel`] ring with
//!    sequence/acknowledge tracking and overflow detection.
//! 3. **Sequencing**: per-session [`Netchan`] duplicate filtering and the
//!    frame history behind ping.
//! 4. **Challenges**: the anti-spoofing [`ChallengeTable`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Server core (above)  ← drives the table every frame, decides drops
//!     ↕
//! Session Layer (this crate)  ← slots, reliable commands, timeouts
//!     ↕
//! Protocol Layer (below)  ← constants, InfoString, SequencedCommand
//! ```

mod challenge;
mod error;
mod netchan;
mod reliable;
mod session;
mod table;

pub use challenge::{CHALLENGE_VALIDITY_MS, Challenge, ChallengeTable};
pub use error::SessionError;
pub use netchan::{FrameRecord, Netchan};
pub use reliable::ReliableChannel;
pub use session::{
    ClientSession, DEFAULT_NAME, Endpoint, SessionConfig, SessionId,
    SessionState, clean_name,
};
pub use table::{SessionTable, TimeoutSweep};
