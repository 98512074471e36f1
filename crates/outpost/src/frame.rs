//! `ServerCore`: the synchronous heart of the server.
//!
//! The core owns all server state and advances it one call at a time:
//! [`handle_datagram`](ServerCore::handle_datagram) for every packet,
//! [`run_frame`](ServerCore::run_frame) with the milliseconds that passed,
//! [`execute`](ServerCore::execute) for console lines. It never blocks
//! and never touches a socket; [`take_outbox`](ServerCore::take_outbox)
//! hands the packets to whoever does.

use std::net::SocketAddr;
use std::time::Duration;

use outpost_protocol::{
    Envelope, InfoString, PACKET_BACKUP, PayloadTransform, RESERVED_CHARS, WireCodec,
    has_reserved_chars,
};
use outpost_tick::{TickMetrics, pause_applies};
use tracing::{debug, info, trace, warn};

use crate::OutpostError;
use crate::commands::{CommandHandler, CommandRegistry, execute_line};
use crate::config::{CvarStore, CvarTable, ServerConfig, session_config};
use crate::console::Console;
use crate::master::{Resolve, SystemResolver};
use crate::simulation::Simulation;
use crate::state::{Outgoing, ServerState};

/// Entities one client snapshot may add. Sizes the headroom kept below
/// the entity counter's wrap point.
const MAX_SNAPSHOT_ENTITIES: u32 = 256;

/// What one [`ServerCore::run_frame`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// No map is loaded.
    Stopped,
    /// `sv_killserver` was set; the server shut down.
    Killed,
    /// The listen server is paused.
    Paused,
    /// A dedicated server with nothing due yet. Sleep this long, or until
    /// a packet arrives.
    Idle(Duration),
    /// The map was restarted (scheduled restart or counter wraparound).
    Restarted,
    /// The frame ran `ticks` simulation ticks.
    Ran { ticks: u32 },
}

/// The server without its socket.
pub struct ServerCore<S: Simulation> {
    pub(crate) state: ServerState<S>,
    pub(crate) console: Console,
    pub(crate) registry: CommandRegistry<S>,
    wire: WireCodec,
}

impl<S: Simulation> ServerCore<S> {
    /// A core configured from `config`, resolving names through the
    /// system resolver.
    pub fn new(config: &ServerConfig, simulation: S) -> Self {
        Self::with_parts(
            Box::new(CvarTable::from_config(config)),
            simulation,
            Box::new(SystemResolver::new()),
        )
    }

    /// A core over an existing variable store and resolver.
    pub fn with_parts(cvars: Box<dyn CvarStore>, simulation: S, resolver: Box<dyn Resolve>) -> Self {
        Self {
            state: ServerState::new(cvars, simulation, resolver),
            console: Console::new(),
            registry: CommandRegistry::new(),
            wire: WireCodec::default(),
        }
    }

    /// Replaces the decompressor used for `connect` payloads.
    pub fn set_payload_transform(&mut self, transform: impl PayloadTransform) {
        self.wire = WireCodec::new(transform);
    }

    /// Replaces the console, for example with one that keeps a transcript.
    pub fn set_console(&mut self, console: Console) {
        self.console = console;
    }

    /// Adds or replaces an operator command.
    pub fn register_command(&mut self, name: &str, handler: CommandHandler<S>) {
        self.registry.register(name, handler);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Server state.
    pub fn state(&self) -> &ServerState<S> {
        &self.state
    }

    /// Mutable server state.
    pub fn state_mut(&mut self) -> &mut ServerState<S> {
        &mut self.state
    }

    /// The console.
    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Whether the server was killed and the runner should exit.
    pub fn is_killed(&self) -> bool {
        self.state.killed
    }

    /// How long until the next tick is due.
    pub fn idle_time(&self) -> Option<Duration> {
        self.state.scheduler.idle_time()
    }

    /// Tick counts and timings from the scheduler.
    pub fn tick_metrics(&self) -> &TickMetrics {
        self.state.scheduler.metrics()
    }

    /// Drains every packet produced since the last call.
    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        let mut out = std::mem::take(&mut self.state.outbox);
        out.extend(
            self.console
                .take_outbound()
                .into_iter()
                .map(|(to, data)| Outgoing { to, data }),
        );
        out
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Loads `map`.
    ///
    /// # Errors
    /// [`OutpostError::Rejected`] if the simulation cannot load it.
    pub fn spawn_map(&mut self, map: &str) -> Result<(), OutpostError> {
        self.state.spawn_map(map)
    }

    /// Adds a bot with the given `\key\value` user info.
    ///
    /// # Errors
    /// [`OutpostError::Rejected`] when there is no room or the
    /// simulation refuses.
    pub fn add_bot(&mut self, userinfo: &str) -> Result<usize, OutpostError> {
        self.state.add_bot(InfoString::parse(userinfo))
    }

    /// Shuts the server down with a message to every client.
    pub fn shutdown(&mut self, reason: &str) {
        self.state.shutdown(reason);
    }

    /// Runs a console line.
    pub fn execute(&mut self, line: &str) {
        execute_line(&self.registry, &mut self.state, &mut self.console, line);
    }

    /// Handles one received datagram. Packets are ignored while no map
    /// is loaded.
    pub fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        if !self.state.running {
            trace!(%from, "packet ignored, server not running");
            return;
        }
        match self.wire.decode(bytes) {
            Ok(Envelope::Connectionless(payload)) => self.handle_connectionless(from, &payload),
            Ok(Envelope::Sequenced {
                sequence,
                qport,
                payload,
            }) => self.state.handle_sequenced(from, sequence, qport, &payload),
            Ok(Envelope::TooShort) => trace!(%from, len = bytes.len(), "runt packet"),
            Err(e) => debug!(%from, error = %e, "undecodable packet"),
        }
    }

    // -----------------------------------------------------------------------
    // The frame
    // -----------------------------------------------------------------------

    /// Advances the server by `msec` milliseconds of wall time.
    ///
    /// Runs as many simulation ticks as have come due, then the per-frame
    /// housekeeping: pings, timeouts, frames to every client, the master
    /// heartbeat.
    pub fn run_frame(&mut self, msec: i32) -> FrameOutcome {
        let st = &mut self.state;
        st.realtime = st.realtime.saturating_add(u64::try_from(msec).unwrap_or(0));

        if st.cvars.integer("sv_killserver") != 0 {
            st.cvars.set("sv_killserver", "0");
            st.shutdown("Server was killed.");
            st.killed = true;
            return FrameOutcome::Killed;
        }
        if !st.running {
            return FrameOutcome::Stopped;
        }

        let dedicated = st.cvars.integer("dedicated") != 0;
        if !dedicated && pause_applies(st.cvars.integer("cl_paused") != 0, st.sessions.human_count())
        {
            st.cvars.set("sv_paused", "1");
            return FrameOutcome::Paused;
        }
        st.cvars.set("sv_paused", "0");

        if st.cvars.integer("sv_fps") < 1 {
            st.cvars.set("sv_fps", "10");
        }
        let fps = st.cvars.integer("sv_fps");
        if fps != st.scheduler.fps() {
            st.scheduler.set_fps(fps);
        }

        st.scheduler.add_elapsed(msec);
        if dedicated {
            if let Some(idle) = st.scheduler.idle_time() {
                return FrameOutcome::Idle(idle);
            }
        }

        let capacity = u32::try_from(st.sessions.capacity()).unwrap_or(u32::MAX);
        let headroom = capacity
            .saturating_mul(PACKET_BACKUP as u32)
            .saturating_mul(MAX_SNAPSHOT_ENTITIES);
        if let Some(reason) = st.scheduler.check_wrap(st.sim.entity_counter(), headroom) {
            warn!(%reason, "counter wraparound");
            let map = st.cvars.string("mapname");
            st.shutdown(&reason.to_string());
            st.scheduler.reset_time();
            if let Err(e) = st.spawn_map(&map) {
                warn!(map, error = %e, "map reload after wraparound failed");
            }
            return FrameOutcome::Restarted;
        }

        if st.scheduler.take_due_restart() {
            st.restart_map_now();
            return FrameOutcome::Restarted;
        }

        // a new capacity waits for the next map load
        let config = session_config(st.cvars.as_ref());
        if config.max_clients == st.sessions.capacity() {
            st.sessions.reconfigure(config);
        }
        st.flush_info_strings();

        let mut ticks = 0;
        while let Some(time) = st.scheduler.next_tick() {
            st.sim.run_frame(time);
            st.apply_sim_events();
            st.scheduler.record_tick_end();
            ticks += 1;
        }

        let now = st.scheduler.server_time();
        st.sim.bot_frame(now);
        st.apply_sim_events();

        st.sessions.calc_pings();
        let sweep = st.sessions.check_timeouts(now);
        for slot in sweep.timed_out {
            st.drop_client(slot, "timed out");
        }
        for slot in sweep.freed {
            trace!(slot, "zombie freed");
        }

        st.send_client_frames();

        let hostname = st.cvars.string("sv_hostname");
        if has_reserved_chars(&hostname) {
            info!("sv_hostname contained reserved characters, sanitized");
            let clean: String = hostname
                .chars()
                .map(|c| if RESERVED_CHARS.contains(&c) { '.' } else { c })
                .collect();
            st.cvars.set("sv_hostname", &clean);
        }

        st.heartbeat();
        FrameOutcome::Ran { ticks }
    }
}
