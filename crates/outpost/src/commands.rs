//! Operator commands.
//!
//! The same commands are reachable from the local console and, through
//! rcon, from a remote operator; the [`Console`] decides where the output
//! goes. A command line is split into commands at `;` and newlines outside
//! quotes. Each command is looked up in the [`CommandRegistry`]; a name
//! that is not a command but is a cvar reads or sets that cvar, and
//! anything else is offered to the simulation.

use std::collections::BTreeMap;

use outpost_protocol::{Args, BIG_INFO_STRING, MAX_INFO_STRING, ServerCommand};
use outpost_session::{Endpoint, SessionState, clean_name};

use crate::config::{CvarFlags, atoi};
use crate::console::Console;
use crate::error::CommandError;
use crate::simulation::Simulation;
use crate::state::{GT_SINGLE_PLAYER, ServerState, strip_quotes};
use crate::OutpostError;

/// What a command handler gets to work with.
pub struct CommandContext<'a, S: Simulation> {
    /// The server.
    pub server: &'a mut ServerState<S>,
    /// Where output goes.
    pub console: &'a mut Console,
}

/// A command implementation.
pub type CommandHandler<S> = fn(&mut CommandContext<'_, S>, &Args) -> Result<(), CommandError>;

/// Command names (lowercase) to handlers.
pub struct CommandRegistry<S: Simulation> {
    handlers: BTreeMap<String, CommandHandler<S>>,
}

impl<S: Simulation> CommandRegistry<S> {
    /// A registry with no commands.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// A registry with every built-in server command.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("heartbeat", heartbeat);
        registry.register("kick", kick);
        registry.register("clientkick", client_kick);
        registry.register("status", status);
        registry.register("serverinfo", server_info);
        registry.register("systeminfo", system_info);
        registry.register("dumpuser", dump_user);
        registry.register("map_restart", map_restart);
        for name in ["map", "devmap", "spmap", "spdevmap", "devmapmdl", "devmapall"] {
            registry.register(name, map);
        }
        registry.register("killserver", kill_server);
        registry.register("svsay", say);
        registry
    }

    /// Adds or replaces a command. Names are case-insensitive.
    pub fn register(&mut self, name: &str, handler: CommandHandler<S>) {
        self.handlers.insert(name.to_ascii_lowercase(), handler);
    }

    /// The handler for `name`.
    pub fn get(&self, name: &str) -> Option<CommandHandler<S>> {
        self.handlers.get(&name.to_ascii_lowercase()).copied()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl<S: Simulation> Default for CommandRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs every command on `line`.
pub fn execute_line<S: Simulation>(
    registry: &CommandRegistry<S>,
    server: &mut ServerState<S>,
    console: &mut Console,
    line: &str,
) {
    for text in split_commands(line) {
        let args = Args::tokenize(text);
        if args.is_empty() {
            continue;
        }

        if let Some(handler) = registry.get(args.command()) {
            let mut ctx = CommandContext {
                server: &mut *server,
                console: &mut *console,
            };
            if let Err(e) = handler(&mut ctx, &args) {
                console.print(&format!("{e}\n"));
            }
            continue;
        }

        if cvar_command(server, console, &args) {
            continue;
        }
        if server.sim.console_command(&args) {
            continue;
        }
        console.print(&format!("Unknown command \"{}\"\n", args.command()));
    }
}

/// Splits at `;` and newlines that are not inside quotes.
fn split_commands(line: &str) -> Vec<&str> {
    let mut commands = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' | '\n' | '\r' if !quoted => {
                commands.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    commands.push(&line[start..]);
    commands.retain(|c| !c.trim().is_empty());
    commands
}

/// `<cvar>` prints a variable, `<cvar> <value>` sets it.
fn cvar_command<S: Simulation>(
    server: &mut ServerState<S>,
    console: &mut Console,
    args: &Args,
) -> bool {
    let name = args.command();
    let Some(flags) = server.cvars.flags(name) else {
        return false;
    };
    if args.argc() == 1 {
        let value = server.cvars.string(name);
        console.print(&format!("\"{name}\" is:\"{value}\"\n"));
    } else if flags.contains(CvarFlags::ROM) {
        console.print(&format!("{name} is read only.\n"));
    } else {
        server.cvars.set(name, args.argv(1));
    }
    true
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_running<S: Simulation>(ctx: &CommandContext<'_, S>) -> Result<(), CommandError> {
    if ctx.server.running {
        Ok(())
    } else {
        Err(CommandError::NotRunning)
    }
}

/// A slot number or player name.
fn player_by_handle<S: Simulation>(
    server: &ServerState<S>,
    handle: &str,
) -> Result<usize, CommandError> {
    if handle.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        if let Ok(slot) = handle.parse::<usize>() {
            if server
                .sessions
                .get(slot)
                .is_some_and(|s| s.state() >= SessionState::Connected)
            {
                return Ok(slot);
            }
        }
    }
    server
        .sessions
        .find_by_name(handle)
        .ok_or_else(|| CommandError::PlayerNotFound(handle.to_string()))
}

fn kick_slot<S: Simulation>(server: &mut ServerState<S>, slot: usize) {
    server.drop_client(slot, "was kicked");
    let now = server.server_time();
    // the zombie gets its full grace period from now
    if let Some(session) = server.sessions.get_mut(slot) {
        session.last_packet_time = now;
    }
}

fn to_failed(e: OutpostError) -> CommandError {
    match e {
        OutpostError::Rejected(reason) => CommandError::Failed(reason),
        OutpostError::Command(e) => e,
        other => CommandError::Failed(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn heartbeat<S: Simulation>(ctx: &mut CommandContext<'_, S>, _args: &Args) -> Result<(), CommandError> {
    ctx.server.masters.force();
    Ok(())
}

fn kick<S: Simulation>(ctx: &mut CommandContext<'_, S>, args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    if args.argc() != 2 {
        return Err(CommandError::Usage(
            "kick <player name>\nkick all = kick everyone\nkick allbots = kick all bots",
        ));
    }
    let target = args.argv(1);
    let bots_only = target.eq_ignore_ascii_case("allbots");

    if bots_only || target.eq_ignore_ascii_case("all") {
        let slots: Vec<usize> = ctx
            .server
            .sessions
            .at_least(SessionState::Connected)
            .filter(|s| !bots_only || s.is_bot())
            .map(|s| s.slot())
            .collect();
        for slot in slots {
            kick_slot(ctx.server, slot);
        }
        return Ok(());
    }

    let slot = player_by_handle(ctx.server, target)?;
    kick_slot(ctx.server, slot);
    Ok(())
}

fn client_kick<S: Simulation>(
    ctx: &mut CommandContext<'_, S>,
    args: &Args,
) -> Result<(), CommandError> {
    require_running(ctx)?;
    if args.argc() != 2 {
        return Err(CommandError::Usage("clientkick <client number>"));
    }
    let raw = args.argv(1);
    let slot: usize = raw
        .parse()
        .map_err(|_| CommandError::BadSlot(raw.to_string()))?;
    let session = ctx
        .server
        .sessions
        .get(slot)
        .ok_or_else(|| CommandError::BadSlot(raw.to_string()))?;
    if session.state() < SessionState::Connected {
        return Err(CommandError::InactiveSlot(slot));
    }
    kick_slot(ctx.server, slot);
    Ok(())
}

fn status<S: Simulation>(ctx: &mut CommandContext<'_, S>, args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    let truncate = !args.argv(1).eq_ignore_ascii_case("notrunc");
    let server = &*ctx.server;
    let now = server.server_time();

    let mut out = format!("map: {}\n", server.cvars.string("mapname"));
    out.push_str("num score ping name            lastmsg address               qport rate\n");
    out.push_str("--- ----- ---- --------------- ------- --------------------- ----- -----\n");

    for session in server.sessions.iter().filter(|s| s.state() != SessionState::Free) {
        let slot = session.slot();
        let ping = match session.state() {
            SessionState::Connected | SessionState::Primed => "CNCT".to_string(),
            SessionState::Zombie => "ZMBI".to_string(),
            _ => session.ping.min(9999).to_string(),
        };
        let mut name = clean_name(&session.name);
        if truncate {
            name = name.chars().take(15).collect();
        }
        let (address, qport) = match session.endpoint.addr() {
            Some(addr) => (addr.to_string(), session_qport(&session.endpoint)),
            None => ("bot".to_string(), 0),
        };
        out.push_str(&format!(
            "{slot:3} {score:5} {ping:>4} {name:<15} {lastmsg:7} {address:<21} {qport:5} {rate:5}\n",
            score = server.sim.client_score(slot),
            lastmsg = now.wrapping_sub(session.last_packet_time),
            rate = session.userinfo.get("rate"),
        ));
    }
    out.push('\n');
    ctx.console.print(&out);
    Ok(())
}

fn session_qport(endpoint: &Endpoint) -> u16 {
    match endpoint {
        Endpoint::Remote { qport, .. } => *qport,
        Endpoint::Bot => 0,
    }
}

fn server_info<S: Simulation>(ctx: &mut CommandContext<'_, S>, _args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    let info = ctx.server.cvars.info_string(CvarFlags::SERVER_INFO, MAX_INFO_STRING);
    ctx.console.print("Server info settings:\n");
    ctx.console.print(&info.print());
    Ok(())
}

fn system_info<S: Simulation>(ctx: &mut CommandContext<'_, S>, _args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    let info = ctx.server.cvars.info_string(CvarFlags::SYSTEM_INFO, BIG_INFO_STRING);
    ctx.console.print("System info settings:\n");
    ctx.console.print(&info.print());
    Ok(())
}

fn dump_user<S: Simulation>(ctx: &mut CommandContext<'_, S>, args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    if args.argc() != 2 {
        return Err(CommandError::Usage("dumpuser <userid>"));
    }
    let slot = player_by_handle(ctx.server, args.argv(1))?;
    let text = ctx
        .server
        .sessions
        .get(slot)
        .map(|s| s.userinfo.print())
        .unwrap_or_default();
    ctx.console.print("userinfo\n--------\n");
    ctx.console.print(&text);
    Ok(())
}

/// `map_restart [delay]`: a warm restart, by default after five seconds.
fn map_restart<S: Simulation>(ctx: &mut CommandContext<'_, S>, args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    if ctx.server.scheduler.restart_time().is_some() {
        return Ok(());
    }

    let delay = if args.argc() > 1 { atoi(args.argv(1)) } else { 5 };
    if delay > 0 && ctx.server.cvars.integer("g_doWarmup") == 0 {
        ctx.server.schedule_restart(delay);
        return Ok(());
    }

    // these only take effect on a full map load
    if ctx.server.cvars.is_modified("sv_maxclients") || ctx.server.cvars.is_modified("g_gametype") {
        ctx.console.print("variable change -- restarting.\n");
        let map = ctx.server.cvars.string("mapname");
        return ctx.server.spawn_map(&map).map_err(to_failed);
    }

    ctx.server.restart_map_now();
    Ok(())
}

/// `map <name>` and its variants. `sp*` switches to single player,
/// `*devmap*` enables cheats.
fn map<S: Simulation>(ctx: &mut CommandContext<'_, S>, args: &Args) -> Result<(), CommandError> {
    if args.argc() < 2 {
        return Err(CommandError::Usage("map <mapname>"));
    }
    let command = args.command().to_ascii_lowercase();
    let cheats = command.contains("devmap");
    let map = args.argv(1);

    let cvars = ctx.server.cvars.as_mut();
    if command.starts_with("sp") {
        cvars.set_integer("g_gametype", GT_SINGLE_PLAYER);
    } else if cvars.integer("g_gametype") == GT_SINGLE_PLAYER {
        cvars.set_integer("g_gametype", 0);
    }

    ctx.server.spawn_map(map).map_err(to_failed)?;
    ctx.server
        .cvars
        .set("sv_cheats", if cheats { "1" } else { "0" });
    Ok(())
}

fn kill_server<S: Simulation>(ctx: &mut CommandContext<'_, S>, _args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    ctx.server.cvars.set("sv_killserver", "1");
    Ok(())
}

/// `svsay <text>`: chat line from the console to everyone.
fn say<S: Simulation>(ctx: &mut CommandContext<'_, S>, args: &Args) -> Result<(), CommandError> {
    require_running(ctx)?;
    if args.argc() < 2 {
        return Err(CommandError::Usage("svsay <text>"));
    }
    let text = format!("console: {}\n", strip_quotes(&args.args()));
    let cmd = ServerCommand::chat(&text).map_err(|e| CommandError::Failed(e.to_string()))?;
    ctx.server.broadcast_command(cmd.as_str());
    Ok(())
}
