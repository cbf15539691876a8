//! # ARQ Events and Statistics
//!
//! Outcome vocabulary shared by both reliability protocols
//! ([`crate::stop_and_wait`] and [`crate::block_ack`]). Engines queue
//! [`ArqEvent`]s; the station drains them and routes each to rate
//! adaptation, the layer above or the reply path.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::frame::{Frame, PeerAddress, SequenceNumber};

#[derive(Debug, Clone)]
pub enum ArqEvent {
    /// The peer acknowledged the frame.
    Confirmed {
        peer: PeerAddress,
        sn: SequenceNumber,
        attempts: u32,
    },
    /// An attempt failed; the frame stays queued for retransmission.
    Failed {
        peer: PeerAddress,
        sn: SequenceNumber,
        attempt: u32,
    },
    /// Retry budget exhausted; the frame is discarded.
    Dropped {
        peer: PeerAddress,
        sn: SequenceNumber,
        attempts: u32,
    },
    /// In-order payload for the layer above.
    Deliver(Frame),
    /// Control reply to transmit SIFS after the soliciting frame.
    Reply(Frame),
}

/// Counters shared by both reliability protocols.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ArqStats {
    /// Data attempts put on air, retransmissions included.
    pub transmissions: u64,
    pub retransmissions: u64,
    pub confirmed: u64,
    pub dropped: u64,
    /// Frames handed to the layer above.
    pub delivered: u64,
    /// Received frames discarded as duplicates.
    pub duplicates: u64,
    /// ACKs and Block-Acks generated.
    pub replies: u64,
    /// Block-Ack requests sent.
    pub requests: u64,
    /// Attempts needed per confirmed frame.
    pub attempts_per_delivery: BTreeMap<u32, u64>,
}

impl ArqStats {
    pub(crate) fn record_confirmed(&mut self, attempts: u32) {
        self.confirmed += 1;
        *self.attempts_per_delivery.entry(attempts).or_insert(0) += 1;
    }

    /// Mean attempts per confirmed frame.
    pub fn mean_attempts(&self) -> f64 {
        let (n, sum) = self
            .attempts_per_delivery
            .iter()
            .fold((0u64, 0u64), |(n, sum), (a, c)| (n + c, sum + u64::from(*a) * c));
        if n == 0 {
            0.0
        } else {
            sum as f64 / n as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_attempts_over_histogram() {
        let mut s = ArqStats::default();
        s.record_confirmed(1);
        s.record_confirmed(1);
        s.record_confirmed(4);
        assert_eq!(s.confirmed, 3);
        assert!((s.mean_attempts() - 2.0).abs() < 1e-12);
    }
}
