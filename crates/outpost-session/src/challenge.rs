//! Connection challenges.
//!
//! Before `connect`, a client asks for a challenge number with
//! `getchallenge` and must echo it back. Replies only go to the address
//! that asked, so a spoofed source never learns the number and cannot
//! flood the server with fake connects.
//!
//! Entries are keyed by the full address (IP and port). Asking again
//! within the validity window returns the same number; the table has a
//! fixed capacity and recycles its oldest entry when full.

use std::net::SocketAddr;

use outpost_protocol::MAX_CHALLENGES;
use rand::Rng;

/// How long (ms) a challenge is handed out unchanged.
pub const CHALLENGE_VALIDITY_MS: i32 = 30_000;

/// One issued challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Address the challenge was issued to.
    pub addr: SocketAddr,
    /// The number the client must present.
    pub value: i32,
    /// Server time the number was generated.
    pub time: i32,
    /// Server time the address first asked. Drives the authorize timeout.
    pub first_time: i32,
    /// Server time the `challengeResponse` went out, if it has.
    pub ping_time: Option<i32>,
    /// Whether a connect has already used it.
    pub connected: bool,
}

/// Fixed-capacity table of outstanding challenges.
#[derive(Debug)]
pub struct ChallengeTable {
    entries: Vec<Challenge>,
    capacity: usize,
    validity_ms: i32,
}

impl ChallengeTable {
    /// An empty table with the default capacity and validity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_CHALLENGES, CHALLENGE_VALIDITY_MS)
    }

    /// An empty table with explicit limits.
    pub fn with_capacity(capacity: usize, validity_ms: i32) -> Self {
        Self {
            entries: Vec::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
            validity_ms,
        }
    }

    /// The challenge for `addr`, issuing or refreshing one as needed.
    pub fn issue(&mut self, addr: SocketAddr, now: i32) -> &mut Challenge {
        let validity = self.validity_ms;

        if let Some(i) = self.entries.iter().position(|c| c.addr == addr) {
            let entry = &mut self.entries[i];
            if now.wrapping_sub(entry.time) >= validity {
                entry.value = random_challenge();
                entry.time = now;
                entry.first_time = now;
                entry.ping_time = None;
                entry.connected = false;
            }
            return entry;
        }

        let fresh = Challenge {
            addr,
            value: random_challenge(),
            time: now,
            first_time: now,
            ping_time: None,
            connected: false,
        };

        if self.entries.len() < self.capacity {
            self.entries.push(fresh);
            let last = self.entries.len() - 1;
            return &mut self.entries[last];
        }

        // full: recycle the oldest
        let oldest = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| c.time)
            .map_or(0, |(i, _)| i);
        tracing::trace!(old = %self.entries[oldest].addr, new = %addr, "challenge slot recycled");
        self.entries[oldest] = fresh;
        &mut self.entries[oldest]
    }

    /// The challenge issued to exactly `addr` with number `value`.
    pub fn validate(&mut self, addr: SocketAddr, value: i32) -> Option<&mut Challenge> {
        self.entries
            .iter_mut()
            .find(|c| c.addr == addr && c.value == value)
    }

    /// The challenge with number `value`, whoever it went to.
    pub fn find_by_value(&mut self, value: i32) -> Option<&mut Challenge> {
        self.entries.iter_mut().find(|c| c.value == value)
    }

    /// Forgets the challenge with number `value`.
    pub fn remove(&mut self, value: i32) {
        self.entries.retain(|c| c.value != value);
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of outstanding challenges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChallengeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A positive random challenge number. Zero is never issued so it can
/// mean "none presented".
fn random_challenge() -> i32 {
    rand::rng().random_range(1..i32::MAX)
}
