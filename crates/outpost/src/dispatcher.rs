//! Connectionless request handling.
//!
//! Anything arriving with the `0xFFFFFFFF` marker is a text command line:
//! server browser queries, the challenge/connect handshake, replies from
//! the authorization server, and remote console requests.

use std::net::SocketAddr;

use outpost_protocol::{Args, InfoString, MAX_INFO_STRING, MAX_MSGLEN, PORT_AUTHORIZE, PROTOCOL_VERSION};
use outpost_session::{Endpoint, SessionState};
use outpost_transport::is_lan_address;
use tracing::{debug, info, trace, warn};

use crate::commands::execute_line;
use crate::config::{CvarFlags, atoi};
use crate::frame::ServerCore;
use crate::master::Resolution;
use crate::simulation::Simulation;
use crate::state::{GT_SINGLE_PLAYER, ServerState};

/// How long (ms) a challenge waits on the authorization server before the
/// client is let in without it.
pub const AUTHORIZE_TIMEOUT_MSEC: i32 = 5000;

/// Minimum wall-clock ms between two rcon requests, good password or not.
pub const RCON_INTERVAL_MSEC: u64 = 500;

impl<S: Simulation> ServerCore<S> {
    /// Dispatches one out-of-band request by its first token.
    pub(crate) fn handle_connectionless(&mut self, from: SocketAddr, payload: &[u8]) {
        let args = Args::from_datagram(payload);
        let command = args.command().to_ascii_lowercase();
        trace!(%from, command = %command, "connectionless packet");

        match command.as_str() {
            "getstatus" => self.state.status_response(from, &args),
            "getinfo" => self.state.info_response(from, &args),
            "getchallenge" => self.state.get_challenge(from),
            "connect" => self.state.direct_connect(from, &args),
            "ipauthorize" => self.state.authorize_ip(from, &args),
            "rcon" => self.remote_command(from, &args),
            // sent by clients leaving a server that already forgot them
            "disconnect" => {}
            _ => debug!(%from, command = %args.command(), "bad connectionless packet"),
        }
    }

    /// `rcon <password> <command...>`: runs a console command on behalf of
    /// a remote operator and sends the output back.
    fn remote_command(&mut self, from: SocketAddr, args: &Args) {
        let now = self.state.realtime;
        if let Some(last) = self.state.last_rcon {
            if now.saturating_sub(last) < RCON_INTERVAL_MSEC {
                debug!(%from, "rcon ignored, too soon after the last one");
                return;
            }
        }
        self.state.last_rcon = Some(now);

        let password = self.state.cvars.string("rconpassword");
        let valid = !password.is_empty() && args.argv(1) == password;
        let command = args.args_from(2);
        if valid {
            info!(%from, command = %command, "rcon");
        } else {
            info!(%from, "bad rcon");
        }

        let mut scope = self.console.redirect(from);
        if password.is_empty() {
            scope.print("No rconpassword set on the server.\n");
        } else if !valid {
            scope.print("Bad rconpassword.\n");
        } else {
            execute_line(&self.registry, &mut self.state, &mut scope, &command);
        }
    }
}

impl<S: Simulation> ServerState<S> {
    /// `getstatus <challenge>`: serverinfo plus one line per player.
    pub(crate) fn status_response(&mut self, from: SocketAddr, args: &Args) {
        if self.cvars.integer("g_gametype") == GT_SINGLE_PLAYER {
            return;
        }
        let mut info = self.cvars.info_string(CvarFlags::SERVER_INFO, MAX_INFO_STRING);
        if let Err(e) = info.set("challenge", args.argv(1)) {
            debug!(%from, error = %e, "status challenge rejected");
            return;
        }

        let header = format!("statusResponse\n{info}\n");
        let mut players = String::new();
        for session in self.sessions.at_least(SessionState::Connected) {
            let line = format!(
                "{} {} \"{}\"\n",
                self.sim.client_score(session.slot()),
                session.ping,
                session.name
            );
            if header.len() + players.len() + line.len() >= MAX_MSGLEN {
                break;
            }
            players.push_str(&line);
        }
        self.send_oob(from, &format!("{header}{players}"));
    }

    /// `getinfo <challenge>`: the short summary server browsers list.
    pub(crate) fn info_response(&mut self, from: SocketAddr, args: &Args) {
        if self.cvars.integer("g_gametype") == GT_SINGLE_PLAYER {
            return;
        }
        let mut info = InfoString::new();
        if let Err(e) = info.set("challenge", args.argv(1)) {
            debug!(%from, error = %e, "info challenge rejected");
            return;
        }

        let private = self.private_clients();
        let public_slots = self.sessions.capacity() - private;
        let clients = self.sessions.connected_count_from(private);

        let mut fields = vec![
            ("protocol", PROTOCOL_VERSION.to_string()),
            ("hostname", self.cvars.string("sv_hostname")),
            ("mapname", self.cvars.string("mapname")),
            ("clients", clients.to_string()),
            ("sv_maxclients", public_slots.to_string()),
            ("gametype", self.cvars.integer("g_gametype").to_string()),
            ("pure", "0".to_string()),
        ];
        for (key, cvar) in [("minPing", "sv_minPing"), ("maxPing", "sv_maxPing")] {
            let value = self.cvars.integer(cvar);
            if value != 0 {
                fields.push((key, value.to_string()));
            }
        }
        let game = self.cvars.string("fs_game");
        if !game.is_empty() {
            fields.push(("game", game));
        }
        fields.push(("needpass", self.cvars.integer("g_needpass").to_string()));

        for (key, value) in &fields {
            if let Err(e) = info.set(key, value) {
                debug!(key, error = %e, "infoResponse field left out");
            }
        }
        self.send_oob(from, &format!("infoResponse\n{info}"));
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// `getchallenge`: hands out (or repeats) the address's challenge.
    ///
    /// With an authorization server configured, remote addresses are
    /// vetted by it first; the client hears back once `ipAuthorize`
    /// arrives, or directly if the authorization server has not answered
    /// within [`AUTHORIZE_TIMEOUT_MSEC`] of the first request.
    pub(crate) fn get_challenge(&mut self, from: SocketAddr) {
        if self.cvars.integer("g_gametype") == GT_SINGLE_PLAYER {
            return;
        }
        let now = self.server_time();
        let authorize = if is_lan_address(from.ip()) {
            None
        } else {
            self.authorize_address()
        };

        let (value, first_time) = {
            let challenge = self.challenges.issue(from, now);
            (challenge.value, challenge.first_time)
        };

        match authorize {
            Some(server) if now.wrapping_sub(first_time) <= AUTHORIZE_TIMEOUT_MSEC => {
                debug!(%from, %server, "asking authorize server");
                self.send_oob(server, &format!("getIpAuthorize {value} {}", from.ip()));
            }
            Some(_) => {
                debug!(%from, "authorize server timed out, letting the client in");
                self.challenge_response(from, value);
            }
            None => self.challenge_response(from, value),
        }
    }

    fn challenge_response(&mut self, to: SocketAddr, value: i32) {
        let now = self.server_time();
        if let Some(challenge) = self.challenges.validate(to, value) {
            challenge.ping_time = Some(now);
        }
        self.send_oob(to, &format!("challengeResponse {value}"));
    }

    /// The authorization server address, resolved once per name.
    ///
    /// While the lookup is in flight clients are let in unvetted.
    fn authorize_address(&mut self) -> Option<SocketAddr> {
        let host = self.cvars.string("sv_authorizeServer");
        if host.is_empty() {
            self.authorize = None;
            return None;
        }
        if let Some((name, addr)) = &self.authorize {
            if *name == host {
                return *addr;
            }
        }

        let addr = match self.resolver.resolve(&host, PORT_AUTHORIZE) {
            Resolution::Ready(addr) => {
                info!(server = %host, %addr, "resolved authorize server");
                Some(addr)
            }
            Resolution::Pending => {
                debug!(server = %host, "authorize server lookup in flight");
                return None;
            }
            Resolution::Failed => {
                warn!(server = %host, "couldn't resolve authorize server");
                None
            }
        };
        self.authorize = Some((host, addr));
        addr
    }

    /// `ipAuthorize <challenge> <accept|demo|unknown|...> [reason]` from the
    /// authorization server.
    pub(crate) fn authorize_ip(&mut self, from: SocketAddr, args: &Args) {
        let expected = self.authorize.as_ref().and_then(|(_, addr)| *addr);
        if expected.map(|a| a.ip()) != Some(from.ip()) {
            debug!(%from, "ipAuthorize not from the authorize server");
            return;
        }

        let value = atoi(args.argv(1));
        let now = self.server_time();
        let Some(client) = self.challenges.find_by_value(value).map(|c| {
            c.ping_time = Some(now);
            c.addr
        }) else {
            debug!(value, "ipAuthorize for an unknown challenge");
            return;
        };

        let verdict = args.argv(2).to_ascii_lowercase();
        let reason = args.args_from(3);
        let anonymous = self.cvars.integer("sv_allowAnonymous") != 0;

        let refusal = match verdict.as_str() {
            "accept" => None,
            "demo" | "unknown" if anonymous => None,
            "demo" => Some("Server is not a demo server".to_string()),
            "unknown" if reason.is_empty() => Some("Awaiting CD key authorization".to_string()),
            _ if reason.is_empty() => Some("Someone is using this CD Key".to_string()),
            _ => Some(reason),
        };

        match refusal {
            None => {
                debug!(%client, verdict = %verdict, "authorized");
                self.send_oob(client, &format!("challengeResponse {value}"));
            }
            Some(reason) => {
                info!(%client, verdict = %verdict, reason = %reason, "authorization refused");
                self.send_oob(client, &format!("print\n{reason}\n"));
                self.challenges.remove(value);
            }
        }
    }

    /// `connect "<userinfo>"`: admits a client into a slot.
    pub(crate) fn direct_connect(&mut self, from: SocketAddr, args: &Args) {
        let now = self.server_time();
        let mut userinfo = InfoString::parse(args.argv(1));

        let version = atoi(userinfo.get("protocol"));
        if version != PROTOCOL_VERSION {
            debug!(%from, version, "connect with the wrong protocol");
            self.send_oob(
                from,
                &format!("print\nServer uses protocol version {PROTOCOL_VERSION}.\n"),
            );
            return;
        }

        let challenge = atoi(userinfo.get("challenge"));
        let qport = atoi(userinfo.get("qport")) as u16;
        let lan = is_lan_address(from.ip());

        if !lan {
            let ping = match self.challenges.validate(from, challenge) {
                Some(entry) => {
                    entry.connected = true;
                    entry.ping_time.map_or(0, |sent| now.wrapping_sub(sent))
                }
                None => {
                    debug!(%from, challenge, "connect without a valid challenge");
                    self.send_oob(from, "print\nNo or bad challenge for address.\n");
                    return;
                }
            };

            let min_ping = self.cvars.integer("sv_minPing");
            let max_ping = self.cvars.integer("sv_maxPing");
            if min_ping > 0 && ping < min_ping {
                debug!(%from, ping, "rejected, ping too low");
                self.send_oob(from, "print\nServer is for high pings only\n");
                return;
            }
            if max_ping > 0 && ping > max_ping {
                debug!(%from, ping, "rejected, ping too high");
                self.send_oob(from, "print\nServer is for low pings only\n");
                return;
            }
        }

        let reuse = self.sessions.find_reconnect(from, qport);
        if let Some(slot) = reuse {
            let limit = self.cvars.integer("sv_reconnectlimit").saturating_mul(1000);
            let too_soon = self
                .sessions
                .get(slot)
                .is_some_and(|s| now.wrapping_sub(s.last_connect_time) < limit);
            if too_soon {
                debug!(%from, slot, "reconnect too soon, rejected");
                self.send_oob(from, "print\nReconnect rejected : too soon\n");
                return;
            }
        }

        if let Err(e) = userinfo.set("ip", &from.ip().to_string()) {
            debug!(%from, error = %e, "userinfo too long");
            self.send_oob(from, "print\nUserinfo string length exceeded.\n");
            return;
        }

        let slot = match reuse {
            Some(slot) => {
                info!(%from, slot, "reconnect");
                let playing = self
                    .sessions
                    .get(slot)
                    .is_some_and(|s| s.state() > SessionState::Zombie);
                if playing {
                    self.sim.client_disconnect(slot);
                }
                slot
            }
            None => {
                let private_password = self.cvars.string("sv_privatePassword");
                let start = if !private_password.is_empty()
                    && userinfo.get("password") == private_password
                {
                    0
                } else {
                    self.private_clients()
                };
                let found = self
                    .sessions
                    .free_slot(start)
                    .or_else(|| self.evict_bot_for_local(from, start));
                match found {
                    Some(slot) => slot,
                    None => {
                        debug!(%from, "rejected, server is full");
                        self.send_oob(from, "print\nServer is full.\n");
                        return;
                    }
                }
            }
        };

        let endpoint = Endpoint::Remote { addr: from, qport };
        match self.sessions.connect(slot, endpoint, now) {
            Ok(session) => {
                session.challenge = challenge;
                session.set_userinfo(userinfo.clone());
            }
            Err(e) => {
                warn!(slot, error = %e, "slot could not be taken");
                return;
            }
        }

        if let Some(reason) = self.sim.client_connect(slot, true, false, &userinfo) {
            debug!(%from, slot, reason = %reason, "simulation refused the client");
            self.sessions.free(slot);
            self.send_oob(from, &format!("print\n{reason}\n"));
            return;
        }
        self.sim.client_userinfo_changed(slot, &userinfo);
        self.send_oob(from, "connectResponse");

        let humans = self.sessions.human_count();
        if humans == 1 || humans == self.sessions.capacity() {
            self.masters.force();
        }
    }

    /// A full server still lets a local player in by dropping a bot, as
    /// long as only bots hold the public slots.
    fn evict_bot_for_local(&mut self, from: SocketAddr, start: usize) -> Option<usize> {
        if !from.ip().is_loopback() {
            return None;
        }
        let public = self.sessions.capacity().saturating_sub(start);
        let bots: Vec<usize> = self
            .sessions
            .iter()
            .skip(start)
            .filter(|s| s.is_bot() && s.state() >= SessionState::Connected)
            .map(|s| s.slot())
            .collect();
        if bots.is_empty() || bots.len() < public {
            return None;
        }
        let slot = *bots.last()?;
        self.drop_client(slot, "was kicked to make room");
        Some(slot)
    }
}
