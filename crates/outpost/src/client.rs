//! In-band traffic from connected clients.
//!
//! A sequenced datagram is routed to its session by IP and qport, checked
//! for sequencing, and its [`ClientFrame`] applied in order: reliable
//! acknowledgment, message acknowledgment (which is what promotes a
//! Connected client to Primed), new reliable commands, then input.

use std::net::SocketAddr;

use outpost_protocol::{Args, ClientFrame, Codec, InfoString};
use outpost_session::SessionState;
use tracing::{debug, trace, warn};

use crate::simulation::Simulation;
use crate::state::ServerState;

impl<S: Simulation> ServerState<S> {
    /// Handles one sequenced datagram.
    pub(crate) fn handle_sequenced(
        &mut self,
        from: SocketAddr,
        sequence: u32,
        qport: u16,
        payload: &[u8],
    ) {
        let Some(slot) = self.sessions.route(from, qport) else {
            // a client that thinks it is still connected
            debug!(%from, qport, "sequenced packet from unknown client");
            self.send_oob(from, "disconnect");
            return;
        };

        let now = self.server_time();
        let Some(session) = self.sessions.get_mut(slot) else {
            return;
        };
        let Some(dropped) = session.netchan.accept_incoming(sequence) else {
            trace!(slot, sequence, "out of order packet discarded");
            return;
        };
        if dropped > 0 {
            debug!(slot, dropped, "packets dropped");
        }
        // a zombie only lingers so its disconnect gets through
        if session.state() == SessionState::Zombie {
            return;
        }
        session.last_packet_time = now;

        let frame: ClientFrame = match self.codec.decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(slot, error = %e, "undecodable client frame");
                return;
            }
        };
        self.apply_client_frame(slot, frame);
    }

    fn apply_client_frame(&mut self, slot: usize, frame: ClientFrame) {
        let now = self.server_time();
        let Some(session) = self.sessions.get_mut(slot) else {
            return;
        };

        if let Err(e) = session.reliable.acknowledge(frame.reliable_ack) {
            warn!(slot, error = %e, "bad reliable acknowledge");
            self.drop_client(slot, "illegible client message");
            return;
        }

        if let Some(ack) = frame.message_ack {
            session.netchan.acknowledge_message(ack, now);
            if session.state() == SessionState::Connected {
                if let Some(gamestate) = session.gamestate_message {
                    if ack.wrapping_sub(gamestate) as i32 >= 0 {
                        if let Err(e) = session.transition(SessionState::Primed) {
                            warn!(slot, error = %e, "gamestate acknowledged out of turn");
                        }
                    }
                }
            }
        }

        let commands = match session.take_new_commands(&frame.commands) {
            Ok(commands) => commands,
            Err(e) => {
                warn!(slot, error = %e, "client reliable commands lost");
                self.drop_client(slot, "Lost reliable commands");
                return;
            }
        };
        for text in commands {
            if !self.execute_client_command(slot, &text) {
                return;
            }
        }

        let active = self
            .sessions
            .get(slot)
            .is_some_and(|s| s.state() == SessionState::Active);
        if active && !frame.input.is_empty() {
            self.sim.client_think(slot, &frame.input);
        }
    }

    /// Runs one client reliable command. Returns false once the client
    /// is gone and the rest of its frame must be ignored.
    fn execute_client_command(&mut self, slot: usize, text: &str) -> bool {
        let args = Args::tokenize(text);
        let Some(state) = self.sessions.get(slot).map(|s| s.state()) else {
            return false;
        };
        if state <= SessionState::Zombie {
            return false;
        }
        trace!(slot, command = %text, "client command");

        match args.command().to_ascii_lowercase().as_str() {
            "" => {}
            "userinfo" => self.update_userinfo(slot, args.argv(1)),
            "disconnect" => {
                self.drop_client(slot, "disconnected");
                return false;
            }
            "begin" => {
                if state != SessionState::Primed {
                    debug!(slot, %state, "begin ignored");
                    return true;
                }
                if let Some(session) = self.sessions.get_mut(slot) {
                    if let Err(e) = session.transition(SessionState::Active) {
                        warn!(slot, error = %e, "begin failed");
                        return true;
                    }
                }
                self.sim.client_begin(slot);
            }
            _ if state == SessionState::Active => self.sim.client_command(slot, &args),
            _ => debug!(slot, command = %args.command(), "command before entering the world"),
        }

        self.sessions
            .get(slot)
            .is_some_and(|s| s.state() > SessionState::Zombie)
    }

    fn update_userinfo(&mut self, slot: usize, raw: &str) {
        let mut userinfo = InfoString::parse(raw);
        let Some(session) = self.sessions.get_mut(slot) else {
            return;
        };
        if let Some(addr) = session.endpoint.addr() {
            if let Err(e) = userinfo.set("ip", &addr.ip().to_string()) {
                debug!(slot, error = %e, "userinfo ip not recorded");
            }
        }
        session.set_userinfo(userinfo.clone());
        self.sim.client_userinfo_changed(slot, &userinfo);
    }
}
