//! Server configuration: the cvar capability and the file-backed defaults.
//!
//! The server never owns its settings directly. Everything it reads at run
//! time goes through a [`CvarStore`] (named, string-valued variables with a
//! modified flag), so an embedding engine can hand in its own variable
//! system. [`CvarTable`] is the in-memory implementation the dedicated
//! binary uses, seeded from a [`ServerConfig`].

use std::ops::{BitOr, BitOrAssign};

use outpost_protocol::{InfoString, MAX_MASTER_SERVERS, PROTOCOL_VERSION};
use outpost_session::SessionConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// Cvar attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CvarFlags(u32);

impl CvarFlags {
    /// No attributes.
    pub const NONE: Self = Self(0);
    /// Part of the serverinfo string sent to clients and queries.
    pub const SERVER_INFO: Self = Self(1);
    /// Part of the systeminfo string sent to clients.
    pub const SYSTEM_INFO: Self = Self(1 << 1);
    /// Cannot be changed from the console.
    pub const ROM: Self = Self(1 << 2);

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for CvarFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CvarFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// The capability
// ---------------------------------------------------------------------------

/// Named configuration variables, as consumed by the server.
///
/// Names are case-insensitive. Setting a name that was never registered
/// creates it without flags.
pub trait CvarStore: Send {
    /// Creates `name` with `default` unless it exists; either way adds
    /// `flags`.
    fn register(&mut self, name: &str, default: &str, flags: CvarFlags);

    /// Current value, if the variable exists.
    fn get(&self, name: &str) -> Option<&str>;

    /// Sets the value, marking the variable (and its info scopes) modified
    /// when it changes.
    fn set(&mut self, name: &str, value: &str);

    /// Attribute bits, if the variable exists.
    fn flags(&self, name: &str) -> Option<CvarFlags>;

    /// Whether the value changed since [`clear_modified`](Self::clear_modified).
    fn is_modified(&self, name: &str) -> bool;

    /// Resets the per-variable modified flag.
    fn clear_modified(&mut self, name: &str);

    /// Whether any variable carrying `scope` changed.
    fn scope_modified(&self, scope: CvarFlags) -> bool;

    /// Resets the modified flag of `scope`.
    fn clear_scope_modified(&mut self, scope: CvarFlags);

    /// `\key\value` string of every non-empty variable carrying `scope`.
    fn info_string(&self, scope: CvarFlags, limit: usize) -> InfoString;

    /// Value as a string, empty if unset.
    fn string(&self, name: &str) -> String {
        self.get(name).unwrap_or_default().to_string()
    }

    /// Value as an integer with C `atoi` semantics.
    fn integer(&self, name: &str) -> i32 {
        atoi(self.get(name).unwrap_or_default())
    }

    /// Sets an integer value.
    fn set_integer(&mut self, name: &str, value: i32) {
        self.set(name, &value.to_string());
    }
}

/// C `atoi`: optional whitespace, optional sign, leading digits; anything
/// unparsable is 0. Saturates instead of overflowing.
pub fn atoi(s: &str) -> i32 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let mut value: i64 = 0;
    for b in digits.bytes().take_while(u8::is_ascii_digit) {
        value = (value * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
    }
    if negative {
        value = -value;
    }
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Cvar {
    name: String,
    value: String,
    flags: CvarFlags,
    modified: bool,
}

/// In-memory [`CvarStore`], in registration order.
#[derive(Debug, Default)]
pub struct CvarTable {
    vars: Vec<Cvar>,
    modified_scopes: CvarFlags,
}

impl CvarTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every server variable registered from `config`.
    pub fn from_config(config: &ServerConfig) -> Self {
        let mut table = Self::new();
        config.apply(&mut table);
        table
    }

    /// Names and values, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|v| (v.name.as_str(), v.value.as_str()))
    }

    fn find(&self, name: &str) -> Option<&Cvar> {
        self.vars.iter().find(|v| v.name.eq_ignore_ascii_case(name))
    }

    fn find_mut(&mut self, name: &str) -> Option<&mut Cvar> {
        self.vars.iter_mut().find(|v| v.name.eq_ignore_ascii_case(name))
    }
}

impl CvarStore for CvarTable {
    fn register(&mut self, name: &str, default: &str, flags: CvarFlags) {
        if let Some(var) = self.find_mut(name) {
            var.flags |= flags;
            self.modified_scopes |= flags;
            return;
        }
        self.vars.push(Cvar {
            name: name.to_string(),
            value: default.to_string(),
            flags,
            modified: true,
        });
        self.modified_scopes |= flags;
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.find(name).map(|v| v.value.as_str())
    }

    fn set(&mut self, name: &str, value: &str) {
        let scopes = match self.find_mut(name) {
            Some(var) if var.value == value => return,
            Some(var) => {
                var.value = value.to_string();
                var.modified = true;
                var.flags
            }
            None => {
                self.register(name, value, CvarFlags::NONE);
                return;
            }
        };
        self.modified_scopes |= scopes;
    }

    fn flags(&self, name: &str) -> Option<CvarFlags> {
        self.find(name).map(|v| v.flags)
    }

    fn is_modified(&self, name: &str) -> bool {
        self.find(name).is_some_and(|v| v.modified)
    }

    fn clear_modified(&mut self, name: &str) {
        if let Some(var) = self.find_mut(name) {
            var.modified = false;
        }
    }

    fn scope_modified(&self, scope: CvarFlags) -> bool {
        self.modified_scopes.intersects(scope)
    }

    fn clear_scope_modified(&mut self, scope: CvarFlags) {
        self.modified_scopes = CvarFlags(self.modified_scopes.0 & !scope.0);
    }

    fn info_string(&self, scope: CvarFlags, limit: usize) -> InfoString {
        let mut info = InfoString::with_limit(limit);
        for var in self.vars.iter().filter(|v| v.flags.intersects(scope)) {
            if var.value.is_empty() {
                continue;
            }
            if let Err(e) = info.set(&var.name, &var.value) {
                tracing::debug!(cvar = %var.name, error = %e, "cvar left out of info string");
            }
        }
        info
    }
}

// ---------------------------------------------------------------------------
// File-backed defaults
// ---------------------------------------------------------------------------

/// Highest accepted `max_clients`.
pub const MAX_CLIENTS: usize = 64;

/// Server settings as read from the config file.
///
/// Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP address to bind.
    pub bind: String,
    /// Name shown in server browsers.
    pub hostname: String,
    /// Number of client slots.
    pub max_clients: usize,
    /// Slots reserved for holders of `private_password`.
    pub private_clients: usize,
    /// Password for the reserved slots.
    pub private_password: String,
    /// Password every client must present (empty: open server).
    pub password: String,
    /// Simulation ticks per second.
    pub fps: i32,
    /// Seconds of silence before a client counts as timing out.
    pub timeout_secs: i32,
    /// Seconds a dropped client's slot stays reserved.
    pub zombie_secs: i32,
    /// Remote console password (empty: rcon disabled).
    pub rcon_password: String,
    /// Directory servers to heartbeat (up to five).
    pub masters: Vec<String>,
    /// 0 listen server, 1 LAN dedicated, 2 public dedicated.
    pub dedicated: i32,
    /// Minimum seconds between connects from one endpoint.
    pub reconnect_limit: i32,
    /// Reject clients whose challenge ping is below this (0: off).
    pub min_ping: i32,
    /// Reject clients whose challenge ping is above this (0: off).
    pub max_ping: i32,
    /// Game type number passed to the simulation and advertised.
    pub gametype: i32,
    /// Map loaded at startup.
    pub map: String,
    /// IP authorization server (empty: no authorization).
    pub authorize_server: String,
    /// Admit clients the authorization server reports as demo or unknown.
    pub allow_anonymous: bool,
    /// Coalesce pending `cs` updates for the same index.
    pub coalesce_config_strings: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:27960".to_string(),
            hostname: "noname".to_string(),
            max_clients: 8,
            private_clients: 0,
            private_password: String::new(),
            password: String::new(),
            fps: 20,
            timeout_secs: 200,
            zombie_secs: 2,
            rcon_password: String::new(),
            masters: vec!["master.quake3arena.com".to_string()],
            dedicated: 1,
            reconnect_limit: 3,
            min_ping: 0,
            max_ping: 0,
            gametype: 0,
            map: "q3dm1".to_string(),
            authorize_server: String::new(),
            allow_anonymous: false,
            coalesce_config_strings: false,
        }
    }
}

impl ServerConfig {
    /// Reads a JSON config file.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Registers every value as a cvar. Values already present in `cvars`
    /// are overwritten.
    pub fn apply(&self, cvars: &mut dyn CvarStore) {
        use CvarFlags as F;

        let mut put = |name: &str, value: String, flags: CvarFlags| {
            cvars.register(name, &value, flags);
            cvars.set(name, &value);
        };

        put("protocol", PROTOCOL_VERSION.to_string(), F::SERVER_INFO | F::ROM);
        put("sv_hostname", self.hostname.clone(), F::SERVER_INFO);
        put("sv_maxclients", self.max_clients.clamp(1, MAX_CLIENTS).to_string(), F::SERVER_INFO);
        put("sv_privateClients", self.private_clients.to_string(), F::SERVER_INFO);
        put("sv_privatePassword", self.private_password.clone(), F::NONE);
        put("g_password", self.password.clone(), F::NONE);
        put("g_needpass", i32::from(!self.password.is_empty()).to_string(), F::SERVER_INFO);
        put("sv_fps", self.fps.to_string(), F::NONE);
        put("sv_timeout", self.timeout_secs.to_string(), F::NONE);
        put("sv_zombietime", self.zombie_secs.to_string(), F::NONE);
        put("rconpassword", self.rcon_password.clone(), F::NONE);
        for i in 0..MAX_MASTER_SERVERS {
            let host = self.masters.get(i).cloned().unwrap_or_default();
            put(&format!("sv_master{}", i + 1), host, F::NONE);
        }
        put("dedicated", self.dedicated.to_string(), F::ROM);
        put("sv_reconnectlimit", self.reconnect_limit.to_string(), F::NONE);
        put("sv_minPing", self.min_ping.to_string(), F::SERVER_INFO);
        put("sv_maxPing", self.max_ping.to_string(), F::SERVER_INFO);
        put("g_gametype", self.gametype.to_string(), F::SERVER_INFO);
        put("mapname", "nomap".to_string(), F::SERVER_INFO | F::ROM);
        put("sv_authorizeServer", self.authorize_server.clone(), F::NONE);
        put("sv_allowAnonymous", i32::from(self.allow_anonymous).to_string(), F::NONE);
        put(
            "sv_coalesceConfigStrings",
            i32::from(self.coalesce_config_strings).to_string(),
            F::NONE,
        );
        put("sv_killserver", "0".to_string(), F::NONE);
        put("sv_paused", "0".to_string(), F::ROM);
        put("cl_paused", "0".to_string(), F::ROM);
        put("sv_cheats", "0".to_string(), F::SYSTEM_INFO | F::ROM);
        put("g_doWarmup", "0".to_string(), F::NONE);
        put("fs_game", String::new(), F::SERVER_INFO | F::SYSTEM_INFO);
    }
}

/// Session table settings as currently configured.
pub fn session_config(cvars: &dyn CvarStore) -> SessionConfig {
    let max_clients = usize::try_from(cvars.integer("sv_maxclients"))
        .unwrap_or(1)
        .clamp(1, MAX_CLIENTS);
    SessionConfig {
        max_clients,
        timeout_ms: cvars.integer("sv_timeout").saturating_mul(1000),
        zombie_ms: cvars.integer("sv_zombietime").saturating_mul(1000),
        coalesce_config_strings: cvars.integer("sv_coalesceConfigStrings") != 0,
        ..SessionConfig::default()
    }
}
