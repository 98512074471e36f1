//! Integration tests for the Outpost server core and the UDP runner.

use std::net::SocketAddr;
use std::time::Duration;

use outpost::prelude::*;
use outpost::protocol::{
    CONNECTIONLESS_MARKER, CS_SERVERINFO, CS_WARMUP, ClientFrame, Codec, FrameBody, JsonCodec,
    SequencedCommand, ServerFrame, WireCodec,
};
use outpost::{CvarTable, Outgoing, Resolution, Resolve};

// =========================================================================
// Mock simulation and resolver
// =========================================================================

/// Records every hook call as a short string.
#[derive(Default)]
struct ScriptedSim {
    calls: Vec<String>,
    refuse: Option<String>,
    entities: u32,
    events: Vec<SimEvent>,
}

impl ScriptedSim {
    fn called(&self, call: &str) -> bool {
        self.calls.iter().any(|c| c == call)
    }
}

impl Simulation for ScriptedSim {
    fn spawn_map(&mut self, map: &str) -> Result<(), String> {
        if map == "missing" {
            return Err("no such map".to_string());
        }
        self.calls.push(format!("spawn {map}"));
        Ok(())
    }

    fn run_frame(&mut self, _server_time: i32) {}

    fn restart(&mut self) {
        self.calls.push("restart".to_string());
    }

    fn client_connect(
        &mut self,
        slot: usize,
        first_time: bool,
        _is_bot: bool,
        _userinfo: &InfoString,
    ) -> Option<String> {
        self.calls.push(format!("connect {slot} {first_time}"));
        self.refuse.clone()
    }

    fn client_begin(&mut self, slot: usize) {
        self.calls.push(format!("begin {slot}"));
    }

    fn client_command(&mut self, slot: usize, args: &Args) {
        self.calls.push(format!("cmd {slot} {}", args.command()));
    }

    fn client_disconnect(&mut self, slot: usize) {
        self.calls.push(format!("disconnect {slot}"));
    }

    fn entity_counter(&self) -> u32 {
        self.entities
    }

    fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Resolves nothing; no test talks to a real master.
struct NoResolver;

impl Resolve for NoResolver {
    fn resolve(&self, _host: &str, _default_port: u16) -> Resolution {
        Resolution::Failed
    }
}

// =========================================================================
// Helpers
// =========================================================================

const QPORT: u16 = 7;

fn lan() -> SocketAddr {
    "10.0.0.5:27005".parse().unwrap()
}

fn internet() -> SocketAddr {
    "203.0.113.9:27005".parse().unwrap()
}

fn config() -> ServerConfig {
    ServerConfig {
        masters: Vec::new(),
        ..ServerConfig::default()
    }
}

/// A core with `q3dm1` loaded and the spawn traffic discarded.
fn start(config: ServerConfig) -> ServerCore<ScriptedSim> {
    let mut core = ServerCore::with_parts(
        Box::new(CvarTable::from_config(&config)),
        ScriptedSim::default(),
        Box::new(NoResolver),
    );
    core.spawn_map("q3dm1").expect("map should load");
    core.take_outbox();
    core
}

fn send_oob(core: &mut ServerCore<ScriptedSim>, from: SocketAddr, text: &str) {
    core.handle_datagram(from, &WireCodec::encode_connectionless_text(text));
}

/// Out-of-band replies, marker stripped.
fn oob_replies(out: &[Outgoing]) -> Vec<(SocketAddr, String)> {
    out.iter()
        .filter(|o| o.data.starts_with(&CONNECTIONLESS_MARKER))
        .map(|o| (o.to, String::from_utf8_lossy(&o.data[4..]).into_owned()))
        .collect()
}

/// Sequenced frames sent to `to`, with their sequence numbers.
fn frames_to(out: &[Outgoing], to: SocketAddr) -> Vec<(u32, ServerFrame)> {
    out.iter()
        .filter(|o| o.to == to && !o.data.starts_with(&CONNECTIONLESS_MARKER))
        .map(|o| {
            let sequence = u32::from_le_bytes([o.data[0], o.data[1], o.data[2], o.data[3]]);
            let frame = JsonCodec.decode(&o.data[4..]).expect("frame should decode");
            (sequence, frame)
        })
        .collect()
}

fn connect_line(name: &str, challenge: i32) -> String {
    format!("connect \"\\protocol\\26\\qport\\{QPORT}\\challenge\\{challenge}\\name\\{name}\"")
}

fn slot_of(core: &ServerCore<ScriptedSim>, from: SocketAddr) -> usize {
    core.state()
        .sessions()
        .iter()
        .find(|s| s.state() != SessionState::Free && s.endpoint.addr() == Some(from))
        .map(|s| s.slot())
        .expect("client should hold a slot")
}

fn state_of(core: &ServerCore<ScriptedSim>, slot: usize) -> SessionState {
    core.state().sessions().get(slot).unwrap().state()
}

/// Connects a LAN client (no challenge needed) and returns its slot.
fn connect(core: &mut ServerCore<ScriptedSim>, from: SocketAddr, name: &str) -> usize {
    send_oob(core, from, &connect_line(name, 0));
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies, vec![(from, "connectResponse".to_string())]);
    slot_of(core, from)
}

fn send_frame(core: &mut ServerCore<ScriptedSim>, from: SocketAddr, sequence: u32, frame: &ClientFrame) {
    let payload = JsonCodec.encode(frame).unwrap();
    core.handle_datagram(from, &WireCodec::encode_client_sequenced(sequence, QPORT, &payload));
}

/// Connects a LAN client and walks it to Active.
fn activate(core: &mut ServerCore<ScriptedSim>, from: SocketAddr, name: &str) -> usize {
    let slot = connect(core, from, name);
    core.run_frame(50);
    let frames = frames_to(&core.take_outbox(), from);
    let gamestate_seq = frames[0].0;

    send_frame(
        core,
        from,
        1,
        &ClientFrame {
            message_ack: Some(gamestate_seq),
            ..ClientFrame::default()
        },
    );
    send_frame(
        core,
        from,
        2,
        &ClientFrame {
            commands: vec![SequencedCommand {
                sequence: 1,
                text: "begin".to_string(),
            }],
            ..ClientFrame::default()
        },
    );
    assert_eq!(state_of(core, slot), SessionState::Active);
    slot
}

fn console_output(core: &mut ServerCore<ScriptedSim>, line: &str) -> String {
    core.set_console(Console::with_transcript());
    core.execute(line);
    core.console_mut().take_transcript()
}

// =========================================================================
// Status queries
// =========================================================================

#[test]
fn test_getinfo_echoes_challenge_and_counts() {
    let mut core = start(config());
    connect(&mut core, lan(), "alice");

    send_oob(&mut core, internet(), "getinfo xyz");
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies.len(), 1);
    let (to, text) = &replies[0];
    assert_eq!(*to, internet());
    assert!(text.starts_with("infoResponse\n"));
    let info = InfoString::parse(&text["infoResponse\n".len()..]);
    assert_eq!(info.get("challenge"), "xyz");
    assert_eq!(info.get("protocol"), "26");
    assert_eq!(info.get("mapname"), "q3dm1");
    assert_eq!(info.get("clients"), "1");
    assert_eq!(info.get("sv_maxclients"), "8");
}

#[test]
fn test_getstatus_lists_players() {
    let mut core = start(config());
    connect(&mut core, lan(), "alice");

    send_oob(&mut core, internet(), "getstatus 42");
    let replies = oob_replies(&core.take_outbox());
    let text = &replies[0].1;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("statusResponse"));
    let info = InfoString::parse(lines.next().unwrap());
    assert_eq!(info.get("challenge"), "42");
    assert_eq!(info.get("sv_hostname"), "noname");
    assert_eq!(lines.next(), Some("0 999 \"alice\""));
}

#[test]
fn test_queries_ignored_in_single_player() {
    let mut core = start(ServerConfig {
        gametype: 2,
        ..config()
    });
    send_oob(&mut core, internet(), "getinfo a");
    send_oob(&mut core, internet(), "getstatus a");
    send_oob(&mut core, internet(), "getchallenge");
    assert!(core.take_outbox().is_empty());
}

#[test]
fn test_unknown_connectionless_command_is_ignored() {
    let mut core = start(config());
    send_oob(&mut core, internet(), "frobnicate 1 2");
    send_oob(&mut core, internet(), "disconnect");
    assert!(core.take_outbox().is_empty());
}

#[test]
fn test_packets_ignored_while_stopped() {
    let mut core = ServerCore::with_parts(
        Box::new(CvarTable::from_config(&config())),
        ScriptedSim::default(),
        Box::new(NoResolver),
    );
    send_oob(&mut core, internet(), "getinfo a");
    assert!(core.take_outbox().is_empty());
    assert_eq!(core.run_frame(50), FrameOutcome::Stopped);
}

// =========================================================================
// Handshake
// =========================================================================

#[test]
fn test_internet_client_needs_challenge() {
    let mut core = start(config());

    send_oob(&mut core, internet(), &connect_line("bob", 1234));
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "print\nNo or bad challenge for address.\n");

    send_oob(&mut core, internet(), "getchallenge");
    let replies = oob_replies(&core.take_outbox());
    let value: i32 = replies[0]
        .1
        .strip_prefix("challengeResponse ")
        .expect("challenge reply")
        .parse()
        .unwrap();
    assert!(value > 0);

    // asking again within the validity window repeats the same value
    send_oob(&mut core, internet(), "getchallenge");
    let again = oob_replies(&core.take_outbox());
    assert_eq!(again[0].1, format!("challengeResponse {value}"));

    send_oob(&mut core, internet(), &connect_line("bob", value));
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "connectResponse");

    let slot = slot_of(&core, internet());
    let session = core.state().sessions().get(slot).unwrap();
    assert_eq!(session.name, "bob");
    assert_eq!(session.userinfo.get("ip"), "203.0.113.9");
    assert_eq!(session.challenge, value);
}

#[test]
fn test_wrong_protocol_is_rejected() {
    let mut core = start(config());
    send_oob(&mut core, lan(), "connect \"\\protocol\\25\\qport\\1\\name\\old\"");
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "print\nServer uses protocol version 26.\n");
    assert_eq!(core.state().sessions().occupied_count(), 0);
}

#[test]
fn test_full_server_rejects() {
    let mut core = start(ServerConfig {
        max_clients: 1,
        ..config()
    });
    connect(&mut core, lan(), "alice");

    let other: SocketAddr = "10.0.0.6:27005".parse().unwrap();
    send_oob(&mut core, other, &connect_line("bob", 0));
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "print\nServer is full.\n");
}

#[test]
fn test_private_slots_need_password() {
    let mut core = start(ServerConfig {
        max_clients: 2,
        private_clients: 1,
        private_password: "vip".into(),
        ..config()
    });
    let public = connect(&mut core, lan(), "alice");
    assert_eq!(public, 1);

    let other: SocketAddr = "10.0.0.6:27005".parse().unwrap();
    send_oob(&mut core, other, &connect_line("bob", 0));
    assert_eq!(
        oob_replies(&core.take_outbox())[0].1,
        "print\nServer is full.\n"
    );

    send_oob(
        &mut core,
        other,
        "connect \"\\protocol\\26\\qport\\9\\name\\bob\\password\\vip\"",
    );
    assert_eq!(oob_replies(&core.take_outbox())[0].1, "connectResponse");
    assert_eq!(slot_of(&core, other), 0);
}

#[test]
fn test_simulation_can_refuse() {
    let mut core = start(config());
    core.state_mut().simulation_mut().refuse = Some("Banned.".into());

    send_oob(&mut core, lan(), &connect_line("mallory", 0));
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "print\nBanned.\n");
    assert_eq!(core.state().sessions().occupied_count(), 0);
}

#[test]
fn test_quick_reconnect_is_rejected() {
    let mut core = start(config());
    connect(&mut core, lan(), "alice");

    send_oob(&mut core, lan(), &connect_line("alice", 0));
    assert_eq!(
        oob_replies(&core.take_outbox()),
        vec![(lan(), "print\nReconnect rejected : too soon\n".to_string())]
    );
    assert!(!core.state().simulation().called("disconnect 0"));

    // past the reconnect limit the same slot is reused
    for _ in 0..70 {
        core.run_frame(50);
    }
    core.take_outbox();
    let slot = connect(&mut core, lan(), "alice");
    assert_eq!(slot, 0);
    assert!(core.state().simulation().called("disconnect 0"));
}

// =========================================================================
// In-band traffic
// =========================================================================

#[test]
fn test_connected_client_gets_gamestate_then_enters_world() {
    let mut core = start(config());
    let slot = connect(&mut core, lan(), "alice");
    assert_eq!(state_of(&core, slot), SessionState::Connected);

    assert_eq!(core.run_frame(50), FrameOutcome::Ran { ticks: 1 });
    let frames = frames_to(&core.take_outbox(), lan());
    assert_eq!(frames.len(), 1);
    match &frames[0].1.body {
        FrameBody::Gamestate {
            config_strings,
            client_slot,
        } => {
            assert_eq!(*client_slot, slot);
            let serverinfo = config_strings
                .iter()
                .find(|(index, _)| *index == CS_SERVERINFO)
                .map(|(_, value)| InfoString::parse(value))
                .expect("serverinfo in gamestate");
            assert_eq!(serverinfo.get("mapname"), "q3dm1");
        }
        other => panic!("expected a gamestate, got {other:?}"),
    }

    activate_from_connected(&mut core, frames[0].0);
    assert!(core.state().simulation().called("begin 0"));

    core.run_frame(50);
    let frames = frames_to(&core.take_outbox(), lan());
    assert!(matches!(frames[0].1.body, FrameBody::Snapshot { .. }));
    assert_eq!(frames[0].1.command_ack, 1);
}

fn activate_from_connected(core: &mut ServerCore<ScriptedSim>, gamestate_seq: u32) {
    send_frame(
        core,
        lan(),
        1,
        &ClientFrame {
            message_ack: Some(gamestate_seq),
            ..ClientFrame::default()
        },
    );
    assert_eq!(state_of(core, 0), SessionState::Primed);
    send_frame(
        core,
        lan(),
        2,
        &ClientFrame {
            commands: vec![SequencedCommand {
                sequence: 1,
                text: "begin".to_string(),
            }],
            ..ClientFrame::default()
        },
    );
    assert_eq!(state_of(core, 0), SessionState::Active);
}

#[test]
fn test_client_commands_reach_simulation_once() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    let say = ClientFrame {
        commands: vec![
            SequencedCommand {
                sequence: 1,
                text: "begin".to_string(),
            },
            SequencedCommand {
                sequence: 2,
                text: "say hi".to_string(),
            },
        ],
        ..ClientFrame::default()
    };
    send_frame(&mut core, lan(), 3, &say);
    // the same commands again in a later packet are not executed twice
    send_frame(&mut core, lan(), 4, &say);

    let sim = core.state().simulation();
    assert_eq!(sim.calls.iter().filter(|c| *c == &format!("cmd {slot} say")).count(), 1);
}

#[test]
fn test_out_of_order_packet_is_discarded() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    let late = ClientFrame {
        commands: vec![SequencedCommand {
            sequence: 2,
            text: "say late".to_string(),
        }],
        ..ClientFrame::default()
    };
    send_frame(&mut core, lan(), 1, &late);
    assert!(!core.state().simulation().called(&format!("cmd {slot} say")));
}

#[test]
fn test_lost_reliable_commands_drop_client() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    let gap = ClientFrame {
        commands: vec![SequencedCommand {
            sequence: 5,
            text: "say skipped".to_string(),
        }],
        ..ClientFrame::default()
    };
    send_frame(&mut core, lan(), 3, &gap);
    assert_eq!(state_of(&core, slot), SessionState::Zombie);
}

#[test]
fn test_ack_beyond_sequence_drops_client() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    send_frame(
        &mut core,
        lan(),
        3,
        &ClientFrame {
            reliable_ack: 500,
            ..ClientFrame::default()
        },
    );
    assert_eq!(state_of(&core, slot), SessionState::Zombie);
    assert!(core.state().simulation().called(&format!("disconnect {slot}")));
}

#[test]
fn test_unknown_sender_is_told_to_disconnect() {
    let mut core = start(config());
    send_frame(&mut core, internet(), 1, &ClientFrame::default());
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies, vec![(internet(), "disconnect".to_string())]);
}

#[test]
fn test_client_disconnect_command() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");
    send_frame(
        &mut core,
        lan(),
        3,
        &ClientFrame {
            commands: vec![SequencedCommand {
                sequence: 2,
                text: "disconnect".to_string(),
            }],
            ..ClientFrame::default()
        },
    );
    assert_eq!(state_of(&core, slot), SessionState::Zombie);
}

#[test]
fn test_reliable_window_overflow_drops_client() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    for i in 0..200 {
        core.state_mut().send_command(slot, &format!("print \"{i}\""));
    }

    // not even the final disconnect fits, so the slot is freed outright
    assert_eq!(state_of(&core, slot), SessionState::Free);
    let sim = core.state().simulation();
    assert_eq!(
        sim.calls.iter().filter(|c| *c == &format!("disconnect {slot}")).count(),
        1
    );
}

// =========================================================================
// Timeouts
// =========================================================================

#[test]
fn test_silent_client_times_out_then_frees() {
    let mut core = start(ServerConfig {
        timeout_secs: 1,
        ..config()
    });
    let slot = connect(&mut core, lan(), "alice");

    // 1.5 s of silence: past the timeout and six strikes
    for _ in 0..30 {
        core.run_frame(50);
    }
    assert_eq!(state_of(&core, slot), SessionState::Zombie);
    assert!(core.state().simulation().called(&format!("disconnect {slot}")));

    let frames = frames_to(&core.take_outbox(), lan());
    let last = &frames.last().unwrap().1;
    assert!(last.commands.iter().any(|c| c.text == "disconnect \"timed out\""));
    assert_eq!(last.body, FrameBody::None);

    // zombie grace is two seconds
    for _ in 0..40 {
        core.run_frame(50);
    }
    assert_eq!(state_of(&core, slot), SessionState::Free);
}

#[test]
fn test_talking_client_does_not_time_out() {
    let mut core = start(ServerConfig {
        timeout_secs: 1,
        ..config()
    });
    let slot = activate(&mut core, lan(), "alice");

    for sequence in 3..60 {
        core.run_frame(50);
        send_frame(&mut core, lan(), sequence, &ClientFrame::default());
    }
    assert_eq!(state_of(&core, slot), SessionState::Active);
}

// =========================================================================
// Remote console
// =========================================================================

#[test]
fn test_rcon_without_password_configured() {
    let mut core = start(config());
    send_oob(&mut core, internet(), "rcon anything status");
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies, vec![(internet(), "print\nNo rconpassword set on the server.\n".to_string())]);
}

#[test]
fn test_rcon_bad_password_runs_nothing() {
    let mut core = start(ServerConfig {
        rcon_password: "secret".into(),
        ..config()
    });
    send_oob(&mut core, internet(), "rcon wrong killserver");
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "print\nBad rconpassword.\n");

    assert!(matches!(core.run_frame(50), FrameOutcome::Ran { .. }));
    assert!(core.state().is_running());
}

#[test]
fn test_rcon_runs_command_and_is_rate_limited() {
    let mut core = start(ServerConfig {
        rcon_password: "secret".into(),
        ..config()
    });
    send_oob(&mut core, internet(), "rcon secret status");
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies.len(), 1);
    assert!(replies[0].1.starts_with("print\nmap: q3dm1\n"));

    // too soon: dropped without a reply, good password or not
    send_oob(&mut core, internet(), "rcon secret status");
    assert!(core.take_outbox().is_empty());

    core.run_frame(600);
    core.take_outbox();
    send_oob(&mut core, internet(), "rcon secret sv_hostname");
    let replies = oob_replies(&core.take_outbox());
    assert_eq!(replies[0].1, "print\n\"sv_hostname\" is:\"noname\"\n");
}

// =========================================================================
// Operator commands
// =========================================================================

#[test]
fn test_unknown_command_and_cvar_access() {
    let mut core = start(config());
    assert_eq!(console_output(&mut core, "frobnicate"), "Unknown command \"frobnicate\"\n");
    assert_eq!(
        console_output(&mut core, "sv_hostname"),
        "\"sv_hostname\" is:\"noname\"\n"
    );
    assert_eq!(console_output(&mut core, "protocol 5"), "protocol is read only.\n");

    console_output(&mut core, "sv_hostname frag");
    assert_eq!(core.state().cvars().get("sv_hostname"), Some("frag"));
}

#[test]
fn test_commands_need_running_server() {
    let mut core = start(config());
    core.shutdown("bye");
    assert_eq!(console_output(&mut core, "status"), "Server is not running.\n");
    assert_eq!(console_output(&mut core, "kick all"), "Server is not running.\n");
}

#[test]
fn test_kick_by_name() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    assert_eq!(console_output(&mut core, "kick nobody"), "Player nobody is not on the server\n");
    assert_eq!(console_output(&mut core, "kick alice"), "");
    assert_eq!(state_of(&core, slot), SessionState::Zombie);

    let pending: Vec<String> = core
        .state()
        .sessions()
        .get(slot)
        .unwrap()
        .reliable
        .pending()
        .map(|(_, text)| text.to_string())
        .collect();
    assert!(pending.contains(&"disconnect \"was kicked\"".to_string()));
}

#[test]
fn test_clientkick_validates_slot() {
    let mut core = start(config());
    assert_eq!(
        console_output(&mut core, "clientkick x"),
        "Bad client slot: x\n"
    );
    assert_eq!(
        console_output(&mut core, "clientkick 3"),
        "Client 3 is not active\n"
    );
    assert_eq!(
        console_output(&mut core, "clientkick"),
        "Usage: clientkick <client number>\n"
    );
}

#[test]
fn test_bots_join_and_leave() {
    let mut core = start(config());
    let slot = core.add_bot("\\name\\Sarge").unwrap();
    assert_eq!(slot, 0);
    assert_eq!(state_of(&core, slot), SessionState::Active);
    assert!(core.state().simulation().called("begin 0"));

    // bots get no packets
    core.run_frame(50);
    assert!(core.take_outbox().is_empty());

    console_output(&mut core, "kick allbots");
    assert_eq!(state_of(&core, slot), SessionState::Free);
}

#[test]
fn test_simulation_events_are_applied() {
    let mut core = start(config());
    core.state_mut().simulation_mut().events = vec![
        SimEvent::ConfigString {
            index: 20,
            value: "scores".into(),
        },
        SimEvent::AddBot {
            userinfo: "\\name\\Doom".into(),
        },
    ];
    core.run_frame(50);
    assert_eq!(core.state().config_string(20), "scores");
    assert_eq!(core.state().sessions().get(0).unwrap().name, "Doom");
}

#[test]
fn test_config_string_change_reaches_active_clients() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    core.state_mut().set_config_string(30, "red 5").unwrap();
    core.state_mut().set_config_string(30, "red 5").unwrap();

    let pending: Vec<String> = core
        .state()
        .sessions()
        .get(slot)
        .unwrap()
        .reliable
        .pending()
        .map(|(_, text)| text.to_string())
        .collect();
    assert_eq!(pending.iter().filter(|t| *t == "cs 30 \"red 5\"").count(), 1);
}

#[test]
fn test_map_restart_is_delayed() {
    let mut core = start(config());
    activate(&mut core, lan(), "alice");

    console_output(&mut core, "map_restart 1");
    assert!(!core.state().config_string(CS_WARMUP).is_empty());

    let mut restarted = false;
    for _ in 0..40 {
        if core.run_frame(50) == FrameOutcome::Restarted {
            restarted = true;
            break;
        }
    }
    assert!(restarted);
    assert!(core.state().simulation().called("restart"));
    assert_eq!(core.state().config_string(CS_WARMUP), "");
    assert_eq!(state_of(&core, 0), SessionState::Active);

    let pending: Vec<String> = core
        .state()
        .sessions()
        .get(0)
        .unwrap()
        .reliable
        .pending()
        .map(|(_, text)| text.to_string())
        .collect();
    assert!(pending.contains(&"map_restart\n".to_string()));
}

#[test]
fn test_map_change_tells_clients_to_reconnect() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");

    console_output(&mut core, "map q3dm7");
    assert_eq!(core.state().cvars().get("mapname"), Some("q3dm7"));
    assert_eq!(state_of(&core, slot), SessionState::Zombie);
    assert!(core.state().simulation().called("spawn q3dm7"));

    assert_eq!(
        console_output(&mut core, "map missing"),
        "no such map\n"
    );
}

#[test]
fn test_killserver_stops_the_loop() {
    let mut core = start(config());
    activate(&mut core, lan(), "alice");

    console_output(&mut core, "killserver");
    assert_eq!(core.run_frame(50), FrameOutcome::Killed);
    assert!(core.is_killed());
    assert!(!core.state().is_running());

    // the client was told, twice
    let frames = frames_to(&core.take_outbox(), lan());
    assert_eq!(frames.len(), 2);
    assert!(frames[1].1.commands.iter().any(|c| c.text.starts_with("disconnect")));
}

#[test]
fn test_shutdown_with_full_window_still_sends_frames() {
    let mut core = start(config());
    let slot = activate(&mut core, lan(), "alice");
    while !core.state().sessions().get(slot).unwrap().reliable.is_full() {
        core.state_mut().send_command(slot, "print \"spam\"");
    }
    core.take_outbox();

    console_output(&mut core, "killserver");
    assert_eq!(core.run_frame(50), FrameOutcome::Killed);

    // the final print and disconnect did not fit; the frames still go out
    let frames = frames_to(&core.take_outbox(), lan());
    assert_eq!(frames.len(), 2);
    assert!(!frames[1].1.commands.iter().any(|c| c.text.starts_with("disconnect")));
    assert_eq!(state_of(&core, slot), SessionState::Free);
}

#[test]
fn test_entity_wraparound_restarts_map() {
    let mut core = start(config());
    core.state_mut().simulation_mut().entities = 0x7FFF_FFF0;

    assert_eq!(core.run_frame(50), FrameOutcome::Restarted);
    let spawns = core
        .state()
        .simulation()
        .calls
        .iter()
        .filter(|c| *c == "spawn q3dm1")
        .count();
    assert_eq!(spawns, 2);
    assert_eq!(core.state().server_time(), 0);
}

#[test]
fn test_dedicated_server_idles_between_ticks() {
    let mut core = start(config());
    core.run_frame(50);
    match core.run_frame(10) {
        FrameOutcome::Idle(wait) => assert_eq!(wait, Duration::from_millis(40)),
        other => panic!("expected idle, got {other:?}"),
    }
}

#[test]
fn test_tick_metrics_count_realized_ticks() {
    let mut core = start(config());
    let before = core.tick_metrics().total_ticks;
    assert_eq!(core.run_frame(150), FrameOutcome::Ran { ticks: 3 });
    assert_eq!(core.tick_metrics().total_ticks, before + 3);
}

#[test]
fn test_listen_server_pauses_for_a_lone_human() {
    let mut core = start(ServerConfig {
        dedicated: 0,
        ..config()
    });
    connect(&mut core, lan(), "alice");
    core.state_mut().cvars_mut().set("cl_paused", "1");

    let before = core.state().server_time();
    assert_eq!(core.run_frame(50), FrameOutcome::Paused);
    assert_eq!(core.run_frame(50), FrameOutcome::Paused);
    assert_eq!(core.state().server_time(), before);
    assert_eq!(core.state().cvars().integer("sv_paused"), 1);
    assert!(core.take_outbox().is_empty());
}

#[test]
fn test_pause_ignored_with_two_humans() {
    let mut core = start(ServerConfig {
        dedicated: 0,
        ..config()
    });
    connect(&mut core, lan(), "alice");
    connect(&mut core, "10.0.0.6:27005".parse().unwrap(), "bob");
    core.state_mut().cvars_mut().set("cl_paused", "1");

    let before = core.state().server_time();
    assert_eq!(core.run_frame(50), FrameOutcome::Ran { ticks: 1 });
    assert!(core.state().server_time() > before);
    assert_eq!(core.state().cvars().integer("sv_paused"), 0);
}

// =========================================================================
// UDP runner
// =========================================================================

#[tokio::test]
async fn test_server_answers_getinfo_over_udp() {
    let mut server = OutpostServer::builder()
        .config(ServerConfig {
            bind: "127.0.0.1:0".into(),
            ..config()
        })
        .resolver(NoResolver)
        .build(NullSimulation::default())
        .await
        .expect("server should build");
    server.core_mut().spawn_map("q3dm1").unwrap();
    let addr = server.local_addr().unwrap();
    let console = server.console_input();
    let handle = tokio::spawn(server.run());

    let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&WireCodec::encode_connectionless_text("getinfo ping"), addr)
        .await
        .unwrap();

    let mut buf = vec![0u8; 2048];
    let (len, from) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("reply should arrive")
        .unwrap();
    assert_eq!(from, addr);
    let text = String::from_utf8_lossy(&buf[4..len]);
    assert!(text.starts_with("infoResponse\n"));
    assert!(text.contains("\\challenge\\ping"));

    console.send("killserver".to_string()).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("server should exit")
        .unwrap();
    assert!(result.is_ok());
}
