//! Master server heartbeats.
//!
//! A publicly listed server (`dedicated 2`) tells each configured directory
//! server it exists once every [`HEARTBEAT_MSEC`]. Host names come from the
//! `sv_master1` .. `sv_master5` cvars and are resolved lazily: an address
//! is cached until the cvar changes or the cache is older than
//! [`RESOLVE_INTERVAL_MSEC`] of wall time. A name that fails to resolve
//! has its cvar cleared so the dead name is not looked up again every
//! cycle.
//!
//! Lookups never run on the frame. [`SystemResolver`] starts them on the
//! tokio runtime and answers [`Resolution::Pending`] until they finish; a
//! master whose lookup is in flight gets its heartbeat on the first frame
//! after the answer arrives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use outpost_protocol::{HEARTBEAT_GAME, MAX_MASTER_SERVERS, PORT_MASTER, WireCodec};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::CvarStore;

/// Interval between heartbeats (ms of server time).
pub const HEARTBEAT_MSEC: i32 = 300 * 1000;

/// Age (ms of wall time) after which a cached master address is resolved
/// again.
pub const RESOLVE_INTERVAL_MSEC: u64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Name resolution
// ---------------------------------------------------------------------------

/// Outcome of one [`Resolve::resolve`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The name resolved to this address.
    Ready(SocketAddr),
    /// A lookup is in flight; ask again later.
    Pending,
    /// The name does not resolve.
    Failed,
}

/// Turns `host` or `host:port` into an address.
///
/// Called from inside the frame, so implementations must return at once.
pub trait Resolve: Send + 'static {
    /// Resolves `host`, using `default_port` when it names none.
    fn resolve(&self, host: &str, default_port: u16) -> Resolution;
}

enum Lookup {
    InFlight,
    Done(Option<SocketAddr>),
}

/// Resolver backed by the system's name lookup. Prefers IPv4 answers.
///
/// Address literals answer immediately. Names are looked up with
/// [`tokio::net::lookup_host`] on a spawned task; the answer is handed out
/// once and then forgotten, the caller keeps its own cache. Outside a
/// tokio runtime every name fails.
#[derive(Clone, Default)]
pub struct SystemResolver {
    lookups: Arc<Mutex<HashMap<(String, u16), Lookup>>>,
}

impl SystemResolver {
    /// A resolver with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self
            .lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("SystemResolver")
            .field("lookups", &in_flight)
            .finish()
    }
}

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str, default_port: u16) -> Resolution {
        if let Ok(addr) = host.parse::<SocketAddr>() {
            return Resolution::Ready(addr);
        }
        let (name, port) = split_port(host).unwrap_or((host, default_port));
        let key = (name.to_string(), port);

        let mut lookups = self.lookups.lock().unwrap_or_else(PoisonError::into_inner);
        match lookups.get(&key) {
            Some(Lookup::InFlight) => return Resolution::Pending,
            Some(Lookup::Done(answer)) => {
                let answer = *answer;
                lookups.remove(&key);
                return answer.map_or(Resolution::Failed, Resolution::Ready);
            }
            None => {}
        }

        let Ok(runtime) = Handle::try_current() else {
            debug!(host, "no runtime for name lookup");
            return Resolution::Failed;
        };
        lookups.insert(key.clone(), Lookup::InFlight);
        let lookups = Arc::clone(&self.lookups);
        runtime.spawn(async move {
            let answer = match tokio::net::lookup_host((key.0.as_str(), key.1)).await {
                Ok(addrs) => prefer_ipv4(addrs.collect()),
                Err(e) => {
                    debug!(host = %key.0, error = %e, "name lookup failed");
                    None
                }
            };
            lookups
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, Lookup::Done(answer));
        });
        Resolution::Pending
    }
}

fn prefer_ipv4(candidates: Vec<SocketAddr>) -> Option<SocketAddr> {
    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
}

fn split_port(host: &str) -> Option<(&str, u16)> {
    let (name, port) = host.rsplit_once(':')?;
    if name.contains(':') {
        return None;
    }
    Some((name, port.parse().ok()?))
}

// ---------------------------------------------------------------------------
// Registrar
// ---------------------------------------------------------------------------

/// One directory server slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterEntry {
    /// Host name as configured.
    pub host: String,
    /// Cached address, if the last resolve succeeded.
    pub addr: Option<SocketAddr>,
    /// Wall time (ms) of the last finished resolve.
    pub resolved_at: Option<u64>,
    /// A lookup for `host` is in flight.
    pub pending: bool,
}

/// Heartbeat scheduling and the per-master resolve cache.
#[derive(Debug)]
pub struct MasterRegistrar {
    entries: Vec<MasterEntry>,
    next_heartbeat: Option<i32>,
}

impl MasterRegistrar {
    /// A registrar that will heartbeat on its first check.
    pub fn new() -> Self {
        Self {
            entries: vec![MasterEntry::default(); MAX_MASTER_SERVERS],
            next_heartbeat: None,
        }
    }

    /// Makes the next [`heartbeat`](Self::heartbeat) call send regardless
    /// of the interval.
    pub fn force(&mut self) {
        self.next_heartbeat = None;
    }

    /// The resolve cache, one entry per `sv_masterN`.
    pub fn entries(&self) -> &[MasterEntry] {
        &self.entries
    }

    /// Sends a heartbeat to every master if one is due, and to any master
    /// whose lookup finished since the last call.
    ///
    /// `now` is server time and paces the heartbeats; `realtime` is wall
    /// time and ages the resolve cache. Returns the packets to send.
    /// Nothing is sent unless `dedicated` is 2.
    pub fn heartbeat(
        &mut self,
        now: i32,
        realtime: u64,
        cvars: &mut dyn CvarStore,
        resolver: &dyn Resolve,
    ) -> Vec<(SocketAddr, Vec<u8>)> {
        if cvars.integer("dedicated") != 2 {
            return Vec::new();
        }
        let due = match self.next_heartbeat {
            None => true,
            // a restart resets server time; treat a big jump back as due
            Some(next) => now >= next || next - now > HEARTBEAT_MSEC,
        };
        if due {
            self.next_heartbeat = Some(now.saturating_add(HEARTBEAT_MSEC));
        } else if !self.entries.iter().any(|e| e.pending) {
            return Vec::new();
        }

        let payload =
            WireCodec::encode_connectionless_text(&format!("heartbeat {HEARTBEAT_GAME}\n"));
        let mut packets = Vec::new();

        for (i, entry) in self.entries.iter_mut().enumerate() {
            if !due && !entry.pending {
                continue;
            }
            let cvar = format!("sv_master{}", i + 1);
            let host = cvars.string(&cvar);
            if host.is_empty() {
                *entry = MasterEntry::default();
                continue;
            }

            let stale = entry
                .resolved_at
                .is_none_or(|at| realtime.saturating_sub(at) > RESOLVE_INTERVAL_MSEC);
            let changed = cvars.is_modified(&cvar) || host != entry.host;

            if entry.addr.is_none() || stale || changed || entry.pending {
                cvars.clear_modified(&cvar);
                entry.host = host.clone();
                match resolver.resolve(&host, PORT_MASTER) {
                    Resolution::Ready(addr) => {
                        info!(master = %host, %addr, "resolved master server");
                        entry.addr = Some(addr);
                        entry.resolved_at = Some(realtime);
                        entry.pending = false;
                    }
                    Resolution::Pending => {
                        debug!(master = %host, "master server lookup in flight");
                        entry.addr = None;
                        entry.pending = true;
                        continue;
                    }
                    Resolution::Failed => {
                        warn!(master = %host, "couldn't resolve master server, disabling");
                        entry.addr = None;
                        entry.resolved_at = Some(realtime);
                        entry.pending = false;
                        cvars.set(&cvar, "");
                        cvars.clear_modified(&cvar);
                        continue;
                    }
                }
            }

            if let Some(addr) = entry.addr {
                info!(master = %host, %addr, "sending heartbeat");
                packets.push((addr, payload.clone()));
            }
        }

        packets
    }

    /// Two back-to-back heartbeats, sent when the server goes down so the
    /// masters notice promptly.
    pub fn shutdown(
        &mut self,
        now: i32,
        realtime: u64,
        cvars: &mut dyn CvarStore,
        resolver: &dyn Resolve,
    ) -> Vec<(SocketAddr, Vec<u8>)> {
        debug!("master shutdown heartbeats");
        self.force();
        let mut packets = self.heartbeat(now, realtime, cvars, resolver);
        self.force();
        packets.extend(self.heartbeat(now, realtime, cvars, resolver));
        packets
    }
}

impl Default for MasterRegistrar {
    fn default() -> Self {
        Self::new()
    }
}
