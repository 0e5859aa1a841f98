//! A segment sitting in the retransmission queue, and the ordering used
//! to buffer segments that arrive out of order.

use std::cmp::Ordering;

use crate::codec::{Kind, Packet};
use crate::seqnum::mod32;

/// Whether a packet's kind occupies a sequence number of its own, beyond
/// any payload bytes it carries. The handshake and teardown kinds do;
/// plain `DATA`/`ACK` only occupy sequence numbers for their payload.
fn consumes_seq(kind: Kind) -> bool {
    matches!(kind, Kind::Syn | Kind::SynAck | Kind::Fin | Kind::FinAck)
}

/// An outbound packet sitting in the retransmission queue, annotated for
/// Karn's rule: a segment that has been retransmitted can never
/// contribute a valid RTT sample, since an ACK for it might be acking
/// either the original transmission or the retransmission.
#[derive(Debug, Clone)]
pub struct Segment {
    pub packet: Packet,
    pub retransmitted: bool,
    /// Set whenever the segment is queued or retransmitted, cleared once
    /// [`Tcb::take_outgoing`](super::Tcb::take_outgoing) has sent it.
    /// Lets a segment that is still waiting on its first transmission
    /// share the same queue as ones only due for retransmission.
    pub needs_transmit: bool,
}

impl Segment {
    pub fn new(packet: Packet) -> Self {
        Self {
            packet,
            retransmitted: false,
            needs_transmit: true,
        }
    }

    /// A segment entering the retransmission queue whose first
    /// transmission is the caller's own responsibility (e.g.
    /// [`Tcb::segmentize`](super::Tcb::segmentize), whose return value
    /// the caller sends directly) rather than `take_outgoing`'s.
    pub fn already_sent(packet: Packet) -> Self {
        Self {
            packet,
            retransmitted: false,
            needs_transmit: false,
        }
    }

    /// The number of sequence numbers this segment occupies.
    pub fn seg_len(&self) -> u32 {
        self.packet.payload.len() as u32 + consumes_seq(self.packet.kind) as u32
    }

    /// The sequence number one past the last byte (or control bit) this
    /// segment occupies.
    pub fn end_seq(&self) -> u32 {
        self.packet.seq.wrapping_add(self.seg_len())
    }
}

/// Wraps a [`Packet`] buffered because it arrived ahead of `rcv.nxt`,
/// ordered by sequence number under modular arithmetic so a
/// [`BinaryHeap`](std::collections::BinaryHeap) always pops the
/// lowest-sequence segment first rather than the numerically largest
/// one.
#[derive(Debug, Clone)]
pub struct Reordered(pub Packet);

impl PartialEq for Reordered {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq == other.0.seq
    }
}

impl Eq for Reordered {}

impl PartialOrd for Reordered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reordered {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.0.seq == other.0.seq {
            Ordering::Equal
        } else if mod32::lt(self.0.seq, other.0.seq) {
            // Reversed so a max-heap pops the smallest sequence first.
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}
