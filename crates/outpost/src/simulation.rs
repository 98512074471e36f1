//! The `Simulation` trait: the game the server hosts.
//!
//! The server core knows nothing about game rules. Once per tick it calls
//! [`Simulation::run_frame`]; around connections it asks the simulation to
//! admit, start and forget clients; for every snapshot it asks for the
//! opaque state bytes of one client. Anything the simulation wants the
//! server to do in return (change a config string, send a command, drop a
//! client, add a bot) it queues as a [`SimEvent`] that the core drains
//! after each tick.
//!
//! All methods are synchronous and must return promptly: they run on the
//! frame thread and stall every session equally.

use outpost_protocol::{Args, InfoString};

/// A request from the simulation to the server core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Replicate `value` in config string `index`.
    ConfigString { index: usize, value: String },
    /// Send a reliable command to one slot, or to everyone with `None`.
    Command { target: Option<usize>, text: String },
    /// Drop a client with a reason.
    DropClient { slot: usize, reason: String },
    /// Put a bot with this user info into a free slot.
    AddBot { userinfo: String },
}

/// The game logic hosted by the server.
///
/// Only [`spawn_map`](Self::spawn_map) and [`run_frame`](Self::run_frame)
/// are required; every other hook has a do-nothing default.
pub trait Simulation: Send + 'static {
    /// Loads `map`. An `Err` carries the reason shown to the operator.
    fn spawn_map(&mut self, map: &str) -> Result<(), String>;

    /// Advances the world to `server_time` (ms).
    fn run_frame(&mut self, server_time: i32);

    /// Ticks the bots once per frame, after the world ticks.
    fn bot_frame(&mut self, _server_time: i32) {}

    /// Unloads the current map.
    fn shutdown(&mut self, _restart: bool) {}

    /// Resets the current map in place for a warm restart.
    fn restart(&mut self) {}

    /// Decides whether a client may take `slot`. `Some(reason)` refuses.
    ///
    /// `first_time` is false when an already connected client is
    /// re-admitted after a map restart.
    fn client_connect(
        &mut self,
        _slot: usize,
        _first_time: bool,
        _is_bot: bool,
        _userinfo: &InfoString,
    ) -> Option<String> {
        None
    }

    /// The client in `slot` enters the world.
    fn client_begin(&mut self, _slot: usize) {}

    /// The client in `slot` sent new user info.
    fn client_userinfo_changed(&mut self, _slot: usize, _userinfo: &InfoString) {}

    /// A reliable command from an active client that the server does not
    /// handle itself.
    fn client_command(&mut self, _slot: usize, _args: &Args) {}

    /// Movement or other per-packet input from an active client.
    fn client_think(&mut self, _slot: usize, _input: &[u8]) {}

    /// The client in `slot` is leaving.
    fn client_disconnect(&mut self, _slot: usize) {}

    /// Score shown in status replies.
    fn client_score(&self, _slot: usize) -> i32 {
        0
    }

    /// State bytes for the next snapshot sent to `slot`.
    fn snapshot(&mut self, _slot: usize) -> Vec<u8> {
        Vec::new()
    }

    /// Cumulative snapshot entity counter, checked for wraparound.
    fn entity_counter(&self) -> u32 {
        0
    }

    /// A console command the server does not know. Return `true` if the
    /// simulation handled it.
    fn console_command(&mut self, _args: &Args) -> bool {
        false
    }

    /// Requests queued since the last call.
    fn drain_events(&mut self) -> Vec<SimEvent> {
        Vec::new()
    }
}

/// A simulation with no world: every map loads, nothing happens.
///
/// The dedicated binary runs this when no game is linked in, which is
/// enough to exercise connections, rcon and master listing.
#[derive(Debug, Default, Clone)]
pub struct NullSimulation {
    map: Option<String>,
}

impl NullSimulation {
    /// The map last loaded, if any.
    pub fn map(&self) -> Option<&str> {
        self.map.as_deref()
    }
}

impl Simulation for NullSimulation {
    fn spawn_map(&mut self, map: &str) -> Result<(), String> {
        self.map = Some(map.to_string());
        Ok(())
    }

    fn run_frame(&mut self, _server_time: i32) {}

    fn shutdown(&mut self, _restart: bool) {
        self.map = None;
    }
}
