//! # Packet Records
//!
//! The small value types that flow between the application, the pacer, the
//! router and the estimator. None of them carry payload bytes; the RTP send
//! modules own the packets, the send path only moves metadata around.

use serde::Serialize;

// ─── Priority ────────────────────────────────────────────────────────────────

/// Pacing priority. Higher priorities leave the pacer queue first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Priority {
    /// Video and FEC. May wait behind everything else.
    Low = 0,
    /// Regular media.
    #[default]
    Normal = 1,
    /// Audio and retransmissions.
    High = 2,
}

// ─── Paced Packet ────────────────────────────────────────────────────────────

/// A packet waiting in the pacer for its send slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacedPacket {
    pub priority: Priority,
    pub ssrc: u32,
    pub sequence_number: u16,
    pub capture_time_ms: i64,
    /// Size on the wire in bytes.
    pub bytes: usize,
    pub retransmission: bool,
}

impl PacedPacket {
    pub fn new(ssrc: u32, sequence_number: u16, bytes: usize) -> Self {
        PacedPacket {
            priority: Priority::Normal,
            ssrc,
            sequence_number,
            capture_time_ms: 0,
            bytes,
            retransmission: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capture_time(mut self, capture_time_ms: i64) -> Self {
        self.capture_time_ms = capture_time_ms;
        self
    }

    pub fn as_retransmission(mut self) -> Self {
        self.retransmission = true;
        self
    }
}

// ─── Sent Packet ─────────────────────────────────────────────────────────────

/// Notification from the socket layer that a packet actually left the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentPacket {
    /// Transport-wide sequence number, if the packet carried one.
    pub packet_id: Option<u16>,
    pub send_time_ms: i64,
}

// ─── Transport Feedback ──────────────────────────────────────────────────────

/// Per-packet result delivered to packet-feedback observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketFeedback {
    pub ssrc: u32,
    pub sequence_number: u16,
    pub payload_size: usize,
    pub send_time_ms: Option<i64>,
    /// `None` when the receiver reported the packet as lost.
    pub arrival_time_ms: Option<i64>,
}

impl PacketFeedback {
    pub fn is_lost(&self) -> bool {
        self.arrival_time_ms.is_none()
    }
}

/// A decoded transport-wide feedback report: which transport sequence numbers
/// arrived and when.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportFeedback {
    pub packets: Vec<ReceivedStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedStatus {
    pub sequence_number: u16,
    pub arrival_time_ms: Option<i64>,
}

impl TransportFeedback {
    pub fn received(&mut self, sequence_number: u16, arrival_time_ms: i64) -> &mut Self {
        self.packets.push(ReceivedStatus {
            sequence_number,
            arrival_time_ms: Some(arrival_time_ms),
        });
        self
    }

    pub fn lost(&mut self, sequence_number: u16) -> &mut Self {
        self.packets.push(ReceivedStatus {
            sequence_number,
            arrival_time_ms: None,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn packet_builders() {
        let p = PacedPacket::new(7, 100, 1200)
            .with_priority(Priority::High)
            .with_capture_time(42)
            .as_retransmission();
        assert_eq!(p.priority, Priority::High);
        assert_eq!(p.capture_time_ms, 42);
        assert!(p.retransmission);
    }

    #[test]
    fn feedback_builder_marks_losses() {
        let mut fb = TransportFeedback::default();
        fb.received(1, 10).lost(2).received(3, 30);
        assert_eq!(fb.packets.len(), 3);
        assert!(fb.packets[1].arrival_time_ms.is_none());
    }
}
