//! The client session table: a fixed arena of slots.
//!
//! Slots are addressed by index. Anything that keeps a reference to a
//! session across frames holds a [`SessionId`] (slot + generation) and
//! resolves it through [`SessionTable::resolve`], which refuses handles
//! to a slot that has since been reused.
//!
//! The table owns lookup, allocation, the timeout sweep and ping
//! computation. Dropping a session (notifying the simulation, telling the
//! other players) is the server core's job; the table only reports who
//! has to go.

use std::net::SocketAddr;

use outpost_protocol::PING_UNKNOWN;

use crate::{
    ClientSession, Endpoint, SessionConfig, SessionError, SessionId,
    SessionState, clean_name,
};

/// Result of one [`SessionTable::check_timeouts`] sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TimeoutSweep {
    /// Sessions silent for too many consecutive ticks. The caller drops them.
    pub timed_out: Vec<usize>,
    /// Zombies whose grace period ran out. Already freed.
    pub freed: Vec<usize>,
}

/// Fixed-capacity table of client sessions.
#[derive(Debug)]
pub struct SessionTable {
    slots: Vec<ClientSession>,
    config: SessionConfig,
}

impl SessionTable {
    /// Creates a table with `config.max_clients` free slots.
    pub fn new(config: SessionConfig) -> Self {
        let slots = (0..config.max_clients).map(ClientSession::free).collect();
        Self { slots, config }
    }

    /// The table's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replaces timeouts and coalescing. Capacity changes need a fresh table.
    pub fn reconfigure(&mut self, config: SessionConfig) {
        debug_assert_eq!(config.max_clients, self.slots.len());
        self.config = config;
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The session in `slot`, whatever its state.
    pub fn get(&self, slot: usize) -> Option<&ClientSession> {
        self.slots.get(slot)
    }

    /// Mutable access to `slot`.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut ClientSession> {
        self.slots.get_mut(slot)
    }

    /// Resolves a handle, rejecting stale ones.
    ///
    /// # Errors
    /// [`SessionError::SlotOutOfRange`] or [`SessionError::Stale`].
    pub fn resolve(&mut self, id: SessionId) -> Result<&mut ClientSession, SessionError> {
        let session = self
            .slots
            .get_mut(id.slot)
            .ok_or(SessionError::SlotOutOfRange(id.slot))?;
        if session.generation != id.generation || session.state == SessionState::Free {
            return Err(SessionError::Stale(id));
        }
        Ok(session)
    }

    /// All slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientSession> {
        self.slots.iter()
    }

    /// All slots in index order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientSession> {
        self.slots.iter_mut()
    }

    /// Slots in at least `state`.
    pub fn at_least(&self, state: SessionState) -> impl Iterator<Item = &ClientSession> {
        self.slots.iter().filter(move |s| s.state >= state)
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Finds the session a sequenced datagram belongs to.
    ///
    /// Matches on IP and qport. When the IP and qport match but the UDP
    /// port changed (a NAT rebinding), the stored port is corrected in
    /// place and the same slot is returned.
    pub fn route(&mut self, from: SocketAddr, qport: u16) -> Option<usize> {
        let session = self.slots.iter_mut().find(|s| {
            s.state != SessionState::Free
                && matches!(s.endpoint, Endpoint::Remote { addr, qport: q }
                    if addr.ip() == from.ip() && q == qport)
        })?;

        if let Endpoint::Remote { addr, .. } = &mut session.endpoint {
            if addr.port() != from.port() {
                tracing::info!(
                    slot = session.slot,
                    old = %addr,
                    new = %from,
                    "fixing up a translated port"
                );
                addr.set_port(from.port());
            }
        }
        Some(session.slot)
    }

    /// Finds a non-free session a new `connect` from `from` should replace:
    /// same IP, and either the same qport or the same UDP port.
    pub fn find_reconnect(&self, from: SocketAddr, qport: u16) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| {
                s.state != SessionState::Free
                    && matches!(s.endpoint, Endpoint::Remote { addr, qport: q }
                        if addr.ip() == from.ip() && (q == qport || addr.port() == from.port()))
            })
            .map(ClientSession::slot)
    }

    /// Finds a player by name, case-insensitively, with or without colour
    /// codes.
    pub fn find_by_name(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|s| {
                s.state != SessionState::Free
                    && (s.name.eq_ignore_ascii_case(name)
                        || clean_name(&s.name).eq_ignore_ascii_case(name))
            })
            .map(ClientSession::slot)
    }

    /// First free slot at or after `start`.
    pub fn free_slot(&self, start: usize) -> Option<usize> {
        self.slots
            .iter()
            .skip(start)
            .find(|s| s.state == SessionState::Free)
            .map(ClientSession::slot)
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Occupies `slot` with a new network client in state Connected.
    ///
    /// A non-free slot (a reconnect from the same endpoint) is recycled.
    ///
    /// # Errors
    /// [`SessionError::SlotOutOfRange`].
    pub fn connect(
        &mut self,
        slot: usize,
        endpoint: Endpoint,
        now: i32,
    ) -> Result<&mut ClientSession, SessionError> {
        let coalesce = self.config.coalesce_config_strings;
        let session = self
            .slots
            .get_mut(slot)
            .ok_or(SessionError::SlotOutOfRange(slot))?;
        session.state = SessionState::Free;
        session.reset(endpoint, coalesce, now);
        session.transition(SessionState::Connected)?;
        tracing::info!(slot, %endpoint, "client connected");
        Ok(session)
    }

    /// Occupies `slot` with a bot and walks it straight to Active.
    ///
    /// # Errors
    /// [`SessionError::SlotOutOfRange`], or
    /// [`SessionError::InvalidTransition`] if the slot is not free.
    pub fn connect_bot(&mut self, slot: usize, now: i32) -> Result<&mut ClientSession, SessionError> {
        let coalesce = self.config.coalesce_config_strings;
        let session = self
            .slots
            .get_mut(slot)
            .ok_or(SessionError::SlotOutOfRange(slot))?;
        if session.state != SessionState::Free {
            return Err(SessionError::InvalidTransition {
                from: session.state,
                to: SessionState::Connected,
            });
        }
        session.reset(Endpoint::Bot, coalesce, now);
        session.transition(SessionState::Connected)?;
        session.transition(SessionState::Primed)?;
        session.transition(SessionState::Active)?;
        session.ping = 0;
        Ok(session)
    }

    /// Releases `slot` immediately.
    pub fn free(&mut self, slot: usize) {
        if let Some(session) = self.slots.get_mut(slot) {
            if session.state != SessionState::Free {
                tracing::debug!(slot, name = %session.name, "slot freed");
                session.state = SessionState::Free;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reliable commands
    // -----------------------------------------------------------------------

    /// Queues a reliable command for `slot`.
    ///
    /// # Errors
    /// [`SessionError::ChannelOverflow`]: the caller must drop the session.
    pub fn enqueue(&mut self, slot: usize, text: &str) -> Result<u32, SessionError> {
        let session = self
            .slots
            .get_mut(slot)
            .ok_or(SessionError::SlotOutOfRange(slot))?;
        session.reliable.enqueue(text)
    }

    /// Queues a reliable command for every network session that has a
    /// baseline (Primed or Active). Sessions still Connected are skipped,
    /// and so are bots, which never acknowledge anything.
    ///
    /// Returns the slots whose window overflowed; the caller drops them.
    pub fn broadcast(&mut self, text: &str) -> Vec<usize> {
        let mut overflowed = Vec::new();
        for session in self
            .slots
            .iter_mut()
            .filter(|s| s.state >= SessionState::Primed && !s.is_bot())
        {
            if let Err(err) = session.reliable.enqueue(text) {
                tracing::warn!(slot = session.slot, error = %err, "broadcast overflowed");
                overflowed.push(session.slot);
            }
        }
        overflowed
    }

    // -----------------------------------------------------------------------
    // Per-tick maintenance
    // -----------------------------------------------------------------------

    /// The timeout sweep, run once per tick with the current server time.
    ///
    /// A connected network session whose last packet is older than the
    /// timeout gains a strike; once it has `timeout_strikes` consecutive
    /// strikes it is reported in [`TimeoutSweep::timed_out`]. Any fresh
    /// packet resets the count. Zombies past their grace are freed.
    pub fn check_timeouts(&mut self, now: i32) -> TimeoutSweep {
        let drop_point = now.wrapping_sub(self.config.timeout_ms);
        let zombie_point = now.wrapping_sub(self.config.zombie_ms);
        let mut sweep = TimeoutSweep::default();

        for session in &mut self.slots {
            // packet times can be ahead after a restart
            if session.last_packet_time > now {
                session.last_packet_time = now;
            }

            if session.state == SessionState::Zombie && session.last_packet_time < zombie_point {
                tracing::debug!(slot = session.slot, name = %session.name, "zombie -> free");
                session.state = SessionState::Free;
                sweep.freed.push(session.slot);
                continue;
            }

            if session.state >= SessionState::Connected
                && !session.is_bot()
                && session.last_packet_time < drop_point
            {
                session.timeout_count += 1;
                if session.timeout_count >= self.config.timeout_strikes {
                    sweep.timed_out.push(session.slot);
                }
            } else {
                session.timeout_count = 0;
            }
        }

        sweep
    }

    /// Recomputes every session's ping from its frame history.
    ///
    /// Non-Active sessions and Active ones without samples report
    /// [`PING_UNKNOWN`]; bots report 0.
    pub fn calc_pings(&mut self) {
        for session in &mut self.slots {
            session.ping = if session.state != SessionState::Active {
                PING_UNKNOWN
            } else if session.is_bot() {
                0
            } else {
                session.netchan.average_ping().unwrap_or(PING_UNKNOWN)
            };
        }
    }

    /// Resets every session's packet time to `now`. Used after server time
    /// jumps (restarts) so nobody times out spuriously.
    pub fn touch_all(&mut self, now: i32) {
        for session in &mut self.slots {
            session.last_packet_time = now;
        }
    }

    // -----------------------------------------------------------------------
    // Counts
    // -----------------------------------------------------------------------

    /// Non-bot sessions that are Connected or further.
    pub fn human_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state >= SessionState::Connected && !s.is_bot())
            .count()
    }

    /// Sessions Connected or further, bots included, from `start` onward.
    pub fn connected_count_from(&self, start: usize) -> usize {
        self.slots
            .iter()
            .skip(start)
            .filter(|s| s.state >= SessionState::Connected)
            .count()
    }

    /// Sessions not Free.
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.state != SessionState::Free).count()
    }
}

// =========================================================================
// Tests
// =========================================================================
