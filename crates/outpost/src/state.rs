//! Server-wide state and the operations every other module builds on.
//!
//! [`ServerState`] owns the session table, the config strings, the
//! simulation and the outgoing packet queue. Nothing here touches a
//! socket: every reply is pushed to the outbox and the async runner
//! sends it after the frame.

use std::net::SocketAddr;

use outpost_protocol::{
    BIG_INFO_STRING, CS_SERVERINFO, CS_SYSTEMINFO, CS_WARMUP, Codec, FrameBody, InfoString,
    JsonCodec, MAX_CONFIGSTRINGS, MAX_INFO_STRING, MAX_MSGLEN, ProtocolError, ServerCommand,
    ServerFrame, WireCodec,
};
use outpost_session::{ChallengeTable, SessionState, SessionTable};
use outpost_tick::FrameScheduler;
use tracing::{debug, info, warn};

use crate::config::{CvarFlags, CvarStore, session_config};
use crate::master::{MasterRegistrar, Resolve};
use crate::simulation::{SimEvent, Simulation};
use crate::OutpostError;

/// `g_gametype` value of single-player mode. Status queries are ignored
/// and challenges are not issued in it.
pub const GT_SINGLE_PLAYER: i32 = 2;

/// A packet waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Destination.
    pub to: SocketAddr,
    /// Complete datagram, envelope included.
    pub data: Vec<u8>,
}

/// Everything the server knows between frames.
pub struct ServerState<S: Simulation> {
    pub(crate) cvars: Box<dyn CvarStore>,
    pub(crate) sim: S,
    pub(crate) sessions: SessionTable,
    pub(crate) challenges: ChallengeTable,
    pub(crate) scheduler: FrameScheduler,
    pub(crate) masters: MasterRegistrar,
    pub(crate) resolver: Box<dyn Resolve>,
    pub(crate) codec: JsonCodec,
    pub(crate) config_strings: Vec<String>,
    pub(crate) running: bool,
    pub(crate) killed: bool,
    /// Wall-clock ms since start. Unlike server time it never resets.
    pub(crate) realtime: u64,
    pub(crate) last_rcon: Option<u64>,
    /// Authorization server name and the address it resolved to.
    pub(crate) authorize: Option<(String, Option<SocketAddr>)>,
    pub(crate) outbox: Vec<Outgoing>,
}

impl<S: Simulation> ServerState<S> {
    pub(crate) fn new(cvars: Box<dyn CvarStore>, sim: S, resolver: Box<dyn Resolve>) -> Self {
        let sessions = SessionTable::new(session_config(cvars.as_ref()));
        let scheduler = FrameScheduler::with_fps(cvars.integer("sv_fps"));
        Self {
            cvars,
            sim,
            sessions,
            challenges: ChallengeTable::new(),
            scheduler,
            masters: MasterRegistrar::new(),
            resolver,
            codec: JsonCodec,
            config_strings: vec![String::new(); MAX_CONFIGSTRINGS],
            running: false,
            killed: false,
            realtime: 0,
            last_rcon: None,
            authorize: None,
            outbox: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The configuration variables.
    pub fn cvars(&self) -> &dyn CvarStore {
        self.cvars.as_ref()
    }

    /// Mutable access to the configuration variables.
    pub fn cvars_mut(&mut self) -> &mut dyn CvarStore {
        self.cvars.as_mut()
    }

    /// The hosted simulation.
    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// Mutable access to the hosted simulation.
    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    /// The client slots.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Outstanding connection challenges.
    pub fn challenges(&self) -> &ChallengeTable {
        &self.challenges
    }

    /// The frame clock.
    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Current server time (ms).
    pub fn server_time(&self) -> i32 {
        self.scheduler.server_time()
    }

    /// Whether a map is loaded.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Config string `index`, empty when unset or out of range.
    pub fn config_string(&self, index: usize) -> &str {
        self.config_strings.get(index).map_or("", String::as_str)
    }

    /// First slot open to clients without the private password.
    pub(crate) fn private_clients(&self) -> usize {
        usize::try_from(self.cvars.integer("sv_privateClients"))
            .unwrap_or(0)
            .min(self.sessions.capacity())
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Queues an out-of-band text reply.
    pub fn send_oob(&mut self, to: SocketAddr, text: &str) {
        self.outbox.push(Outgoing {
            to,
            data: WireCodec::encode_connectionless_text(text),
        });
    }

    /// Queues a reliable command for one client. A client whose window
    /// is full is dropped. Free slots and bots are skipped.
    pub fn send_command(&mut self, slot: usize, text: &str) {
        match self.sessions.get(slot) {
            Some(s) if s.state() != SessionState::Free && !s.is_bot() => {}
            _ => return,
        }
        match self.sessions.enqueue(slot, text) {
            Ok(_) => {}
            Err(e) if e.is_protocol_fault() => {
                warn!(slot, error = %e, "reliable command overflow");
                self.drop_client(slot, "Server command overflow");
            }
            Err(e) => debug!(slot, error = %e, "command not queued"),
        }
    }

    /// Queues a reliable command for every Primed or Active client,
    /// dropping the ones whose window is full.
    pub fn broadcast_command(&mut self, text: &str) {
        for slot in self.sessions.broadcast(text) {
            warn!(slot, "reliable command overflow");
            self.drop_client(slot, "Server command overflow");
        }
    }

    /// `print` to everyone.
    pub fn broadcast_print(&mut self, text: &str) {
        match ServerCommand::print(&strip_quotes(text)) {
            Ok(cmd) => self.broadcast_command(cmd.as_str()),
            Err(e) => debug!(error = %e, "print not broadcast"),
        }
    }

    // -----------------------------------------------------------------------
    // Config strings
    // -----------------------------------------------------------------------

    /// Sets config string `index`, replicating the change to every client
    /// already past the gamestate. Setting the current value does nothing.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] for an index out of range, or a
    /// value that cannot be quoted.
    pub fn set_config_string(&mut self, index: usize, value: &str) -> Result<(), OutpostError> {
        let Some(current) = self.config_strings.get(index) else {
            return Err(ProtocolError::InvalidMessage(format!(
                "config string index {index} out of range"
            ))
            .into());
        };
        if current == value {
            return Ok(());
        }
        let commands = ServerCommand::config_string(index, value)?;
        self.config_strings[index] = value.to_string();

        if self.running {
            for cmd in commands {
                self.broadcast_command(cmd.as_str());
            }
        }
        Ok(())
    }

    /// Copies changed serverinfo and systeminfo cvars into their config
    /// strings.
    pub(crate) fn flush_info_strings(&mut self) {
        if self.cvars.scope_modified(CvarFlags::SYSTEM_INFO) {
            let info = self
                .cvars
                .info_string(CvarFlags::SYSTEM_INFO, BIG_INFO_STRING)
                .to_string();
            self.cvars.clear_scope_modified(CvarFlags::SYSTEM_INFO);
            if let Err(e) = self.set_config_string(CS_SYSTEMINFO, &info) {
                warn!(error = %e, "systeminfo not replicated");
            }
        }
        if self.cvars.scope_modified(CvarFlags::SERVER_INFO) {
            let info = self
                .cvars
                .info_string(CvarFlags::SERVER_INFO, MAX_INFO_STRING)
                .to_string();
            self.cvars.clear_scope_modified(CvarFlags::SERVER_INFO);
            if let Err(e) = self.set_config_string(CS_SERVERINFO, &info) {
                warn!(error = %e, "serverinfo not replicated");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------------

    /// Disconnects the client in `slot`.
    ///
    /// Everyone is told why. A human's slot becomes a zombie for a few
    /// seconds so its final `disconnect` command can still be delivered;
    /// if even that does not fit in its window the slot is freed at once,
    /// as is a bot's. Free and zombie slots are left alone.
    pub fn drop_client(&mut self, slot: usize, reason: &str) {
        let Some(session) = self.sessions.get(slot) else {
            return;
        };
        if session.state() <= SessionState::Zombie {
            return;
        }
        let is_bot = session.is_bot();
        let name = session.name.clone();
        info!(slot, name = %name, reason, "dropping client");

        self.sim.client_disconnect(slot);

        // out of the game before the broadcast, so an overflow there can
        // never recurse into this client
        if is_bot {
            self.sessions.free(slot);
        } else if let Some(session) = self.sessions.get_mut(slot) {
            if let Err(e) = session.transition(SessionState::Zombie) {
                warn!(slot, error = %e, "drop left session in place");
            }
        }

        let announcement = format!("{name} {reason}\n");
        self.broadcast_print(&announcement);

        if !is_bot {
            let final_message = ServerCommand::print(&strip_quotes(&announcement))
                .and_then(|print| Ok((print, ServerCommand::disconnect(&strip_quotes(reason))?)));
            let Some(session) = self.sessions.get_mut(slot) else {
                return;
            };
            let queued = final_message.map_err(OutpostError::from).and_then(|(print, disconnect)| {
                session.reliable.enqueue(print.as_str())?;
                Ok(session.reliable.enqueue(disconnect.as_str())?)
            });
            if let Err(e) = queued {
                debug!(slot, error = %e, "final disconnect not queued");
                self.sessions.free(slot);
            }
        }

        if !is_bot && self.sessions.human_count() == 0 {
            self.masters.force();
        }
    }

    /// Puts a bot into the lowest free slot.
    ///
    /// # Errors
    /// [`OutpostError::Rejected`] when the server is full or the
    /// simulation refuses the bot.
    pub fn add_bot(&mut self, userinfo: InfoString) -> Result<usize, OutpostError> {
        if !self.running {
            return Err(OutpostError::Rejected("server is not running".into()));
        }
        let slot = self
            .sessions
            .free_slot(0)
            .ok_or_else(|| OutpostError::Rejected("no free slot for a bot".into()))?;
        let now = self.server_time();
        let session = self.sessions.connect_bot(slot, now)?;
        session.set_userinfo(userinfo.clone());

        if let Some(reason) = self.sim.client_connect(slot, true, true, &userinfo) {
            self.sessions.free(slot);
            return Err(OutpostError::Rejected(reason));
        }
        self.sim.client_begin(slot);
        Ok(slot)
    }

    /// Carries out what the simulation asked for since the last call.
    pub(crate) fn apply_sim_events(&mut self) {
        for event in self.sim.drain_events() {
            match event {
                SimEvent::ConfigString { index, value } => {
                    if let Err(e) = self.set_config_string(index, &value) {
                        warn!(index, error = %e, "config string from simulation rejected");
                    }
                }
                SimEvent::Command {
                    target: Some(slot),
                    text,
                } => self.send_command(slot, &text),
                SimEvent::Command { target: None, text } => self.broadcast_command(&text),
                SimEvent::DropClient { slot, reason } => self.drop_client(slot, &reason),
                SimEvent::AddBot { userinfo } => {
                    if let Err(e) = self.add_bot(InfoString::parse(&userinfo)) {
                        warn!(error = %e, "bot not added");
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    /// Every non-empty config string, as sent in a gamestate.
    fn gamestate(&self) -> Vec<(usize, String)> {
        self.config_strings
            .iter()
            .enumerate()
            .filter(|(_, value)| !value.is_empty())
            .map(|(index, value)| (index, value.clone()))
            .collect()
    }

    /// Builds and queues one sequenced frame for `slot`.
    ///
    /// Connected clients get the gamestate until they acknowledge it,
    /// Primed and Active ones a snapshot, zombies only their pending
    /// reliable commands. Bots get nothing.
    pub(crate) fn transmit(&mut self, slot: usize) {
        let now = self.server_time();
        let (state, addr) = match self.sessions.get(slot) {
            Some(s) => (s.state(), s.endpoint.addr()),
            None => return,
        };
        let Some(addr) = addr else {
            return;
        };
        let body = match state {
            SessionState::Free => return,
            SessionState::Zombie => FrameBody::None,
            SessionState::Connected => FrameBody::Gamestate {
                config_strings: self.gamestate(),
                client_slot: slot,
            },
            SessionState::Primed | SessionState::Active => FrameBody::Snapshot {
                data: self.sim.snapshot(slot),
            },
        };

        let Some(session) = self.sessions.get_mut(slot) else {
            return;
        };
        let frame = ServerFrame {
            server_time: now,
            command_ack: session.last_client_command,
            commands: session.reliable.pending_commands(),
            body,
        };
        let sequence = session.netchan.next_outgoing(now);
        if state == SessionState::Connected && session.gamestate_message.is_none() {
            session.gamestate_message = Some(sequence);
        }
        session.reliable.mark_sent();

        match self.codec.encode(&frame) {
            Ok(payload) => {
                if payload.len() > MAX_MSGLEN {
                    warn!(slot, len = payload.len(), "frame exceeds message limit");
                }
                self.outbox.push(Outgoing {
                    to: addr,
                    data: WireCodec::encode_sequenced(sequence, &payload),
                });
            }
            Err(e) => warn!(slot, error = %e, "frame not encoded"),
        }
    }

    /// One frame to every remote client.
    pub(crate) fn send_client_frames(&mut self) {
        for slot in 0..self.sessions.capacity() {
            self.transmit(slot);
        }
    }

    /// Sends a heartbeat if one is due.
    pub(crate) fn heartbeat(&mut self) {
        let now = self.server_time();
        let packets = self.masters.heartbeat(
            now,
            self.realtime,
            self.cvars.as_mut(),
            self.resolver.as_ref(),
        );
        self.outbox
            .extend(packets.into_iter().map(|(to, data)| Outgoing { to, data }));
    }

    // -----------------------------------------------------------------------
    // Map lifecycle
    // -----------------------------------------------------------------------

    /// Loads `map`, replacing whatever runs now.
    ///
    /// Human clients are told to reconnect; bots are carried over. A
    /// changed `sv_maxclients` takes effect here.
    ///
    /// # Errors
    /// [`OutpostError::Rejected`] when the simulation cannot load the
    /// map. The server is left stopped.
    pub fn spawn_map(&mut self, map: &str) -> Result<(), OutpostError> {
        info!(map, "spawning server");

        if self.running {
            let humans: Vec<usize> = self
                .sessions
                .at_least(SessionState::Connected)
                .filter(|s| !s.is_bot())
                .map(|s| s.slot())
                .collect();
            for slot in humans {
                self.drop_client(slot, "changed map, reconnect");
            }
            self.send_client_frames();
            self.sim.shutdown(false);
            self.running = false;
        }

        let config = session_config(self.cvars.as_ref());
        if config.max_clients == self.sessions.capacity() {
            self.sessions.reconfigure(config);
        } else {
            info!(
                old = self.sessions.capacity(),
                new = config.max_clients,
                "resizing client table"
            );
            self.sessions = SessionTable::new(config);
        }
        self.cvars.clear_modified("sv_maxclients");
        self.cvars.clear_modified("g_gametype");

        self.config_strings.iter_mut().for_each(String::clear);
        self.scheduler.cancel_restart();

        if let Err(reason) = self.sim.spawn_map(map) {
            warn!(map, reason = %reason, "map failed to load");
            return Err(OutpostError::Rejected(reason));
        }
        self.cvars.set("mapname", map);
        self.running = true;

        let bots: Vec<usize> = self
            .sessions
            .at_least(SessionState::Connected)
            .filter(|s| s.is_bot())
            .map(|s| s.slot())
            .collect();
        for slot in bots {
            self.readmit(slot);
        }

        // both info strings go out in full on a new map
        let systeminfo = self
            .cvars
            .info_string(CvarFlags::SYSTEM_INFO, BIG_INFO_STRING)
            .to_string();
        let serverinfo = self
            .cvars
            .info_string(CvarFlags::SERVER_INFO, MAX_INFO_STRING)
            .to_string();
        self.cvars
            .clear_scope_modified(CvarFlags::SYSTEM_INFO | CvarFlags::SERVER_INFO);
        self.set_config_string(CS_SYSTEMINFO, &systeminfo)?;
        self.set_config_string(CS_SERVERINFO, &serverinfo)?;

        let now = self.server_time();
        self.sessions.touch_all(now);
        self.masters.force();
        info!(map, "server spawned");
        Ok(())
    }

    /// Re-admits a carried-over client after a map change or restart.
    /// Returns false if the simulation refused it and it was dropped.
    fn readmit(&mut self, slot: usize) -> bool {
        let Some(session) = self.sessions.get(slot) else {
            return false;
        };
        let is_bot = session.is_bot();
        let userinfo = session.userinfo.clone();
        if let Some(reason) = self.sim.client_connect(slot, false, is_bot, &userinfo) {
            self.drop_client(slot, &reason);
            return false;
        }
        if is_bot {
            self.sim.client_begin(slot);
        }
        true
    }

    /// Schedules a warm restart `delay_secs` from now and announces it in
    /// the warmup config string.
    pub(crate) fn schedule_restart(&mut self, delay_secs: i32) {
        let at = self
            .server_time()
            .saturating_add(delay_secs.saturating_mul(1000));
        self.scheduler.schedule_restart(at);
        if let Err(e) = self.set_config_string(CS_WARMUP, &at.to_string()) {
            warn!(error = %e, "warmup not announced");
        }
        info!(delay_secs, at, "map restart scheduled");
    }

    /// Resets the current map in place. Clients keep their slots and
    /// their state.
    pub fn restart_map_now(&mut self) {
        if !self.running {
            return;
        }
        info!("warm map restart");
        self.scheduler.cancel_restart();
        if let Err(e) = self.set_config_string(CS_WARMUP, "") {
            warn!(error = %e, "warmup not cleared");
        }
        self.sim.restart();

        for slot in 0..self.sessions.capacity() {
            let (state, is_bot) = match self.sessions.get(slot) {
                Some(s) if s.state() >= SessionState::Connected => (s.state(), s.is_bot()),
                _ => continue,
            };
            if is_bot {
                self.readmit(slot);
                continue;
            }

            self.send_command(slot, ServerCommand::map_restart().as_str());
            let still_here = self
                .sessions
                .get(slot)
                .is_some_and(|s| s.state() >= SessionState::Connected);
            if !still_here || !self.readmit(slot) {
                continue;
            }
            match state {
                SessionState::Active => self.sim.client_begin(slot),
                SessionState::Primed => {
                    if let Some(session) = self.sessions.get_mut(slot) {
                        if let Err(e) = session.transition(SessionState::Active) {
                            warn!(slot, error = %e, "restart could not activate client");
                            continue;
                        }
                    }
                    self.sim.client_begin(slot);
                }
                _ => {}
            }
        }
    }

    /// Stops the server: final heartbeats to the masters, a last message
    /// to every client, then the map is unloaded and every slot freed.
    pub fn shutdown(&mut self, reason: &str) {
        if !self.running {
            return;
        }
        info!(reason, "server shutdown");

        let now = self.server_time();
        let packets = self.masters.shutdown(
            now,
            self.realtime,
            self.cvars.as_mut(),
            self.resolver.as_ref(),
        );
        self.outbox
            .extend(packets.into_iter().map(|(to, data)| Outgoing { to, data }));

        let reason = strip_quotes(reason);
        let remote: Vec<usize> = self
            .sessions
            .at_least(SessionState::Connected)
            .filter(|s| !s.is_bot())
            .map(|s| s.slot())
            .collect();
        for &slot in &remote {
            let Some(session) = self.sessions.get_mut(slot) else {
                continue;
            };
            let final_message = ServerCommand::print(&format!("{reason}\n"))
                .and_then(|print| Ok((print, ServerCommand::disconnect(&reason)?)));
            match final_message {
                Ok((print, disconnect)) => {
                    // a full window still gets the frames below
                    for command in [print, disconnect] {
                        if let Err(e) = session.reliable.enqueue(command.as_str()) {
                            debug!(slot, error = %e, "final message not queued");
                        }
                    }
                }
                Err(e) => debug!(slot, error = %e, "final message not built"),
            }
        }
        // twice, in case the first is lost
        for _ in 0..2 {
            for &slot in &remote {
                self.transmit(slot);
            }
        }

        self.sim.shutdown(false);
        for slot in 0..self.sessions.capacity() {
            self.sessions.free(slot);
        }
        self.config_strings.iter_mut().for_each(String::clear);
        self.scheduler.cancel_restart();
        self.running = false;
    }
}

/// Replaces `"` so text can be sent quoted.
pub(crate) fn strip_quotes(text: &str) -> String {
    text.replace('"', "'")
}
