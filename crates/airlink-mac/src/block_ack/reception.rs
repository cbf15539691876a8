//! Receiver-side reorder window for one transmitter.

use std::collections::{BTreeMap, BTreeSet};

use crate::frame::{Frame, SequenceNumber};

use super::BlockAckReply;

/// What happened to an arriving data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Delivered, possibly releasing buffered successors.
    InOrder,
    /// Held until the gap before it closes.
    Buffered,
    /// Already delivered or already buffered.
    Duplicate,
}

/// Reorder window: holds frames received ahead of a gap and releases them
/// strictly in sequence-number order, each exactly once.
#[derive(Debug)]
pub struct ReceptionQueue {
    /// Next sequence number needed for in-order delivery.
    waiting_for: SequenceNumber,
    buffered: BTreeMap<SequenceNumber, Frame>,
    /// Received sequence numbers not yet covered by the cumulative
    /// `waiting_for` of an issued acknowledgement.
    observed: BTreeSet<SequenceNumber>,
}

impl ReceptionQueue {
    pub fn new(first: SequenceNumber) -> Self {
        ReceptionQueue {
            waiting_for: first,
            buffered: BTreeMap::new(),
            observed: BTreeSet::new(),
        }
    }

    pub fn waiting_for(&self) -> SequenceNumber {
        self.waiting_for
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn observed_len(&self) -> usize {
        self.observed.len()
    }

    /// Bits held in the buffer.
    pub fn storage_bits(&self) -> u64 {
        self.buffered.values().map(|f| u64::from(f.psdu_bits())).sum()
    }

    /// Process a data frame, appending every frame that becomes deliverable
    /// to `out` in sequence order.
    ///
    /// # Panics
    ///
    /// If the frame carries no sequence number.
    pub fn receive(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Arrival {
        let sn = match frame.sequence {
            Some(sn) => sn,
            None => panic!("block-ack data frame without sequence number"),
        };
        self.observed.insert(sn);

        if sn < self.waiting_for || self.buffered.contains_key(&sn) {
            return Arrival::Duplicate;
        }
        if sn > self.waiting_for {
            self.buffered.insert(sn, frame);
            return Arrival::Buffered;
        }

        out.push(frame);
        self.waiting_for += 1;
        self.drain_contiguous(out);
        Arrival::InOrder
    }

    fn drain_contiguous(&mut self, out: &mut Vec<Frame>) {
        while let Some(frame) = self.buffered.remove(&self.waiting_for) {
            out.push(frame);
            self.waiting_for += 1;
        }
    }

    /// Process an acknowledgement request.
    ///
    /// The transmitter will not resend anything below `start`, so buffered
    /// frames behind the abandoned gap are released (in order), the window
    /// jumps to `start` and any contiguous run after it drains. The reply
    /// acknowledges everything below the new `waiting_for` cumulatively
    /// plus each observed sequence number above it.
    pub fn on_request(&mut self, start: SequenceNumber, out: &mut Vec<Frame>) -> BlockAckReply {
        if start > self.waiting_for {
            let ahead = self.buffered.split_off(&start);
            out.extend(std::mem::replace(&mut self.buffered, ahead).into_values());
            self.waiting_for = start;
        }
        self.drain_contiguous(out);

        let reply = BlockAckReply {
            start_sn: self.waiting_for,
            acked: self.observed.range(self.waiting_for..).copied().collect(),
        };

        self.observed = self.observed.split_off(&self.waiting_for);
        reply
    }
}
