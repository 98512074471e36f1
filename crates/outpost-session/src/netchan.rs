//! Per-session datagram sequencing and the outgoing frame history.
//!
//! Incoming sequenced datagrams must be strictly newer than the last one
//! accepted; anything else is a duplicate or arrived out of order and is
//! dropped. Every outgoing message takes the next sequence and records the
//! server time it was sent, so a later acknowledgment can be turned into a
//! round-trip sample for ping.

use outpost_protocol::{PACKET_BACKUP, PING_UNKNOWN};

/// Send/acknowledge times of one outgoing message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRecord {
    /// Server time the message went out.
    pub sent: i32,
    /// Server time the client's acknowledgment was first seen.
    pub acked: Option<i32>,
}

/// Sequencing state for one session.
#[derive(Debug, Clone)]
pub struct Netchan {
    incoming_sequence: u32,
    outgoing_sequence: u32,
    dropped: u32,
    frames: [FrameRecord; PACKET_BACKUP],
}

impl Netchan {
    /// Fresh sequencing state. The first outgoing message is sequence 1.
    pub fn new() -> Self {
        Self {
            incoming_sequence: 0,
            outgoing_sequence: 1,
            dropped: 0,
            frames: [FrameRecord::default(); PACKET_BACKUP],
        }
    }

    /// Accepts `sequence` if it is newer than the last accepted one.
    ///
    /// Returns the number of datagrams skipped over (lost in transit), or
    /// `None` for a duplicate or out-of-order datagram.
    pub fn accept_incoming(&mut self, sequence: u32) -> Option<u32> {
        let delta = sequence.wrapping_sub(self.incoming_sequence) as i32;
        if delta <= 0 {
            return None;
        }
        let dropped = (delta - 1) as u32;
        self.dropped = dropped;
        self.incoming_sequence = sequence;
        Some(dropped)
    }

    /// Claims the next outgoing sequence and records its send time.
    pub fn next_outgoing(&mut self, server_time: i32) -> u32 {
        let sequence = self.outgoing_sequence;
        self.frames[frame_slot(sequence)] = FrameRecord {
            sent: server_time,
            acked: None,
        };
        self.outgoing_sequence = sequence.wrapping_add(1);
        sequence
    }

    /// Stamps the acknowledgment time of message `message_ack`.
    ///
    /// Only the first acknowledgment of a message counts. Acknowledgments
    /// of messages older than the history, or never sent, are ignored.
    /// Returns whether a sample was recorded.
    pub fn acknowledge_message(&mut self, message_ack: u32, server_time: i32) -> bool {
        let age = self.outgoing_sequence.wrapping_sub(message_ack);
        if age == 0 || age as usize > PACKET_BACKUP {
            return false;
        }
        let frame = &mut self.frames[frame_slot(message_ack)];
        if frame.acked.is_some() {
            return false;
        }
        frame.acked = Some(server_time);
        true
    }

    /// Average round trip over the acknowledged frames in history, capped
    /// at [`PING_UNKNOWN`]. `None` without samples.
    pub fn average_ping(&self) -> Option<i32> {
        let (total, count) = self
            .frames
            .iter()
            .filter_map(|f| f.acked.map(|acked| acked - f.sent))
            .fold((0i64, 0i64), |(total, count), delta| {
                (total + i64::from(delta), count + 1)
            });
        if count == 0 {
            return None;
        }
        Some((total / count).min(i64::from(PING_UNKNOWN)) as i32)
    }

    /// Last incoming sequence accepted.
    pub fn incoming_sequence(&self) -> u32 {
        self.incoming_sequence
    }

    /// Sequence the next outgoing message will take.
    pub fn outgoing_sequence(&self) -> u32 {
        self.outgoing_sequence
    }

    /// Datagrams lost immediately before the last accepted one.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// The record for outgoing message `sequence`, if still in history.
    pub fn frame(&self, sequence: u32) -> Option<&FrameRecord> {
        let age = self.outgoing_sequence.wrapping_sub(sequence);
        (age != 0 && age as usize <= PACKET_BACKUP).then(|| &self.frames[frame_slot(sequence)])
    }
}

impl Default for Netchan {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_slot(sequence: u32) -> usize {
    sequence as usize & (PACKET_BACKUP - 1)
}
