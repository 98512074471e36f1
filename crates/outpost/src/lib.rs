//! # Outpost
//!
//! Session layer of a dedicated multiplayer game server.
//!
//! Outpost speaks a datagram protocol in which out-of-band text commands
//! (status queries, the challenge/connect handshake, remote console) share
//! a UDP port with sequenced in-band traffic from connected clients. It
//! owns the client slots, the reliable command channel, the frame clock
//! and the master server listing; the game itself is a [`Simulation`]
//! plugged in by the embedder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outpost::prelude::*;
//!
//! # async fn start() -> Result<(), OutpostError> {
//! let mut server = OutpostServer::builder()
//!     .bind("0.0.0.0:27960")
//!     .build(NullSimulation::default())
//!     .await?;
//! server.core_mut().spawn_map("q3dm1")?;
//! server.run().await
//! # }
//! ```
//!
//! [`ServerCore`] is the same server without a socket, driven by hand;
//! the integration tests use it that way.

mod client;
pub mod commands;
pub mod config;
pub mod console;
mod dispatcher;
pub mod error;
pub mod frame;
pub mod master;
pub mod server;
pub mod simulation;
pub mod state;

pub use commands::{CommandContext, CommandHandler, CommandRegistry};
pub use config::{CvarFlags, CvarStore, CvarTable, MAX_CLIENTS, ServerConfig, atoi};
pub use console::{Console, RedirectScope};
pub use dispatcher::{AUTHORIZE_TIMEOUT_MSEC, RCON_INTERVAL_MSEC};
pub use error::{CommandError, OutpostError};
pub use frame::{FrameOutcome, ServerCore};
pub use master::{
    HEARTBEAT_MSEC, MasterEntry, MasterRegistrar, Resolution, Resolve, SystemResolver,
};
pub use server::{OutpostServer, OutpostServerBuilder};
pub use simulation::{NullSimulation, SimEvent, Simulation};
pub use state::{GT_SINGLE_PLAYER, Outgoing, ServerState};

// Re-export sub-crates for advanced usage.
pub use outpost_protocol as protocol;
pub use outpost_session as session;
pub use outpost_tick as tick;
pub use outpost_transport as transport;

/// Convenience re-exports for embedding the server.
pub mod prelude {
    pub use crate::{
        CommandContext, CommandError, Console, CvarStore, FrameOutcome, NullSimulation,
        OutpostError, OutpostServer, OutpostServerBuilder, ServerConfig, ServerCore, SimEvent,
        Simulation,
    };
    pub use outpost_protocol::{Args, InfoString};
    pub use outpost_session::SessionState;
}
