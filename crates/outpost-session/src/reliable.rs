//! The reliable command channel: ordered, acknowledged server → client
//! command strings layered on top of lossy snapshots.
//!
//! Each session owns one [`ReliableChannel`]. Commands are numbered with a
//! monotonically increasing sequence and kept in a fixed ring of
//! [`MAX_RELIABLE_COMMANDS`] slots until the client acknowledges them.
//! Every outgoing frame repeats all unacknowledged commands, so the
//! client sees each one at least once and executes them in order.
//!
//! ```text
//!  acknowledge            sequence
//!       │ pending commands  │
//!  ─────┼───────────────────┼────▶
//!       └─── ≤ window ──────┘
//! ```
//!
//! Sequence numbers are `u32` and all comparisons are wrapping, so the
//! channel keeps working past `u32::MAX`.

use outpost_protocol::{MAX_RELIABLE_COMMANDS, MAX_STRING_CHARS, SequencedCommand};

use crate::SessionError;

/// Window size as a sequence delta.
const WINDOW: u32 = MAX_RELIABLE_COMMANDS as u32;

/// Longest text stored per command.
const MAX_COMMAND_BYTES: usize = MAX_STRING_CHARS - 1;

/// Ring of outbound reliable commands with acknowledgment tracking.
#[derive(Debug, Clone)]
pub struct ReliableChannel {
    /// Last sequence assigned.
    sequence: u32,
    /// Last sequence the client acknowledged.
    acknowledge: u32,
    /// Last sequence that went out in a datagram.
    sent: u32,
    commands: Vec<String>,
    coalesce_config_strings: bool,
}

impl ReliableChannel {
    /// An empty channel. With `coalesce_config_strings`, a `cs <index>`
    /// update replaces a not-yet-sent update for the same index instead
    /// of taking a new slot.
    pub fn new(coalesce_config_strings: bool) -> Self {
        Self {
            sequence: 0,
            acknowledge: 0,
            sent: 0,
            commands: vec![String::new(); MAX_RELIABLE_COMMANDS],
            coalesce_config_strings,
        }
    }

    /// Appends a command and returns its sequence number.
    ///
    /// Text longer than the command bound is truncated.
    ///
    /// # Errors
    /// [`SessionError::ChannelOverflow`] if the window is full. The channel
    /// is left unchanged and the caller must drop the session: skipping the
    /// command would desynchronize the client.
    pub fn enqueue(&mut self, text: &str) -> Result<u32, SessionError> {
        if self.coalesce_config_strings {
            if let Some(sequence) = self.replace_pending_config_string(text) {
                return Ok(sequence);
            }
        }

        if self.sequence.wrapping_add(1).wrapping_sub(self.acknowledge) > WINDOW {
            return Err(SessionError::ChannelOverflow {
                sequence: self.sequence,
                acknowledge: self.acknowledge,
            });
        }

        self.sequence = self.sequence.wrapping_add(1);
        let index = slot(self.sequence);
        self.commands[index].clear();
        self.commands[index].push_str(truncate(text, MAX_COMMAND_BYTES));
        Ok(self.sequence)
    }

    /// Records the client's acknowledgment.
    ///
    /// Returns `Ok(true)` if the acknowledgment advanced and `Ok(false)` if
    /// it was a duplicate or arrived out of order (ignored).
    ///
    /// # Errors
    /// [`SessionError::AckBeyondSequence`] if the client claims a sequence
    /// the server never assigned.
    pub fn acknowledge(&mut self, ack: u32) -> Result<bool, SessionError> {
        if (ack.wrapping_sub(self.acknowledge) as i32) <= 0 {
            return Ok(false);
        }
        if (self.sequence.wrapping_sub(ack) as i32) < 0 {
            return Err(SessionError::AckBeyondSequence {
                ack,
                sequence: self.sequence,
            });
        }
        self.acknowledge = ack;
        Ok(true)
    }

    /// Every unacknowledged command, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        (1..=self.pending_len() as u32).map(move |offset| {
            let sequence = self.acknowledge.wrapping_add(offset);
            (sequence, self.commands[slot(sequence)].as_str())
        })
    }

    /// Unacknowledged commands in wire form.
    pub fn pending_commands(&self) -> Vec<SequencedCommand> {
        self.pending()
            .map(|(sequence, text)| SequencedCommand {
                sequence,
                text: text.to_string(),
            })
            .collect()
    }

    /// Number of unacknowledged commands.
    pub fn pending_len(&self) -> usize {
        self.sequence.wrapping_sub(self.acknowledge) as usize
    }

    /// Whether another command would overflow the window.
    pub fn is_full(&self) -> bool {
        self.pending_len() >= MAX_RELIABLE_COMMANDS
    }

    /// Marks everything enqueued so far as transmitted.
    pub fn mark_sent(&mut self) {
        self.sent = self.sequence;
    }

    /// Last sequence assigned.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Last sequence acknowledged.
    pub fn acknowledged(&self) -> u32 {
        self.acknowledge
    }

    /// Text stored for `sequence`, if it is still pending.
    pub fn get(&self, sequence: u32) -> Option<&str> {
        let offset = sequence.wrapping_sub(self.acknowledge);
        if offset == 0 || offset as usize > self.pending_len() {
            return None;
        }
        Some(self.commands[slot(sequence)].as_str())
    }

    fn replace_pending_config_string(&mut self, text: &str) -> Option<u32> {
        let index = config_string_index(text)?;
        let unsent = self.sequence.wrapping_sub(self.sent);
        (1..=unsent).map(|o| self.sent.wrapping_add(o)).find_map(|sequence| {
            let stored = &mut self.commands[slot(sequence)];
            if config_string_index(stored) == Some(index) {
                stored.clear();
                stored.push_str(truncate(text, MAX_COMMAND_BYTES));
                Some(sequence)
            } else {
                None
            }
        })
    }
}

impl Default for ReliableChannel {
    fn default() -> Self {
        Self::new(false)
    }
}

fn slot(sequence: u32) -> usize {
    sequence as usize & (MAX_RELIABLE_COMMANDS - 1)
}

/// The index of a `cs <index> ...` command.
fn config_string_index(text: &str) -> Option<usize> {
    let mut tokens = text.split_ascii_whitespace();
    if tokens.next()? != "cs" {
        return None;
    }
    tokens.next()?.parse().ok()
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
