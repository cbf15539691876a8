//! # Block-Ack ARQ
//!
//! Windowed reliability with selective acknowledgement. The sender keeps up
//! to `max_on_air` unacknowledged frames towards one receiver
//! ([`TransmissionQueue`]) and closes each burst with a Block-Ack request;
//! the receiver reorders per transmitter ([`ReceptionQueue`]) and answers
//! the request with a [`BlockAckReply`].
//!
//! [`BlockAck`] ties both sides together for one station: it serves one
//! receiver at a time, switching only after every frame to the previous one
//! has been confirmed or dropped, and keeps sequence numbers per receiver.

mod reception;
mod transmission;

pub use reception::{Arrival, ReceptionQueue};
pub use transmission::{TransmissionQueue, TransmissionQueueConfig};

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

use crate::arq::{ArqEvent, ArqStats};
use crate::frame::{Frame, FrameKind, PeerAddress, SequenceNumber};
use crate::peer_table::PeerTable;
use crate::timer::{TimerOwner, TimerService, TimerToken, Timeout};

// ─── BlockAckReply ───────────────────────────────────────────────────────────

/// Acknowledgement state carried by a Block-Ack: everything below
/// `start_sn` was received, plus each sequence number in `acked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockAckReply {
    pub start_sn: SequenceNumber,
    pub acked: BTreeSet<SequenceNumber>,
}

impl BlockAckReply {
    pub fn contains(&self, sn: SequenceNumber) -> bool {
        sn < self.start_sn || self.acked.contains(&sn)
    }

    /// Compressed 64-bit bitmap, bit `i` set when `start_sn + i` was
    /// received.
    pub fn bitmap(&self) -> u64 {
        self.acked
            .range(self.start_sn..self.start_sn + 64)
            .fold(0u64, |map, sn| map | 1 << (sn - self.start_sn))
    }
}

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BlockAckConfig {
    /// Frames buffered for the current receiver.
    pub capacity: usize,
    pub queue: TransmissionQueueConfig,
    pub sifs: Duration,
    /// Airtime of a Block-Ack at the basic rate.
    pub expected_block_ack: Duration,
    pub processing_margin: Duration,
    pub rx_guard: Duration,
}

impl Default for BlockAckConfig {
    fn default() -> Self {
        BlockAckConfig {
            capacity: 100,
            queue: TransmissionQueueConfig::default(),
            sifs: Duration::from_micros(16),
            expected_block_ack: Duration::from_micros(68),
            processing_margin: Duration::from_micros(21),
            rx_guard: Duration::from_micros(1),
        }
    }
}

impl BlockAckConfig {
    pub fn ack_timeout(&self) -> Duration {
        self.sifs + self.expected_block_ack + self.processing_margin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaState {
    Idle,
    WaitForAck,
    ReceivingAck,
}

// ─── BlockAck ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BlockAck {
    config: BlockAckConfig,
    local: PeerAddress,
    tx: Option<TransmissionQueue>,
    /// Next sequence number per receiver, kept across queue switches.
    next_sn: PeerTable<SequenceNumber>,
    rx: PeerTable<ReceptionQueue>,
    state: BaState,
    timeout: Timeout,
    events: Vec<ArqEvent>,
    stats: ArqStats,
}

impl BlockAck {
    pub fn new(config: BlockAckConfig, local: PeerAddress) -> Self {
        BlockAck {
            config,
            local,
            tx: None,
            next_sn: PeerTable::new(),
            rx: PeerTable::new(),
            state: BaState::Idle,
            timeout: Timeout::new(TimerOwner::BlockAckTimeout),
            events: Vec::new(),
            stats: ArqStats::default(),
        }
    }

    pub fn state(&self) -> BaState {
        self.state
    }

    /// Receiver currently served, if any.
    pub fn current_receiver(&self) -> Option<PeerAddress> {
        self.tx.as_ref().map(TransmissionQueue::receiver)
    }

    /// Whether a data frame for `receiver` can be accepted now.
    pub fn is_accepting(&self, receiver: PeerAddress) -> bool {
        match &self.tx {
            None => true,
            Some(q) => q.receiver() == receiver && q.len() < self.config.capacity,
        }
    }

    /// # Panics
    ///
    /// If the frame is not accepted (see [`BlockAck::is_accepting`]).
    pub fn send(&mut self, frame: Frame) {
        assert!(
            self.is_accepting(frame.receiver),
            "block-ack is not accepting frames for {}",
            frame.receiver
        );
        let receiver = frame.receiver;
        let queue = match self.tx.take() {
            Some(q) => q,
            None => {
                let first = self.next_sn.get(receiver).copied().unwrap_or(0);
                tracing::debug!(peer = %receiver, first_sn = first, "opening block-ack session");
                TransmissionQueue::new(self.config.queue.clone(), self.local, receiver, first)
            }
        };
        let tx = self.tx.insert(queue);
        tx.push(frame);
    }

    /// Ask for an acknowledgement of what is on air without waiting for
    /// the window to fill.
    pub fn flush(&mut self) {
        if let Some(q) = self.tx.as_mut() {
            q.request_ack();
        }
    }

    pub fn has_data(&self) -> bool {
        self.state == BaState::Idle && self.tx.as_ref().is_some_and(TransmissionQueue::has_data)
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.state != BaState::Idle {
            return None;
        }
        let frame = self.tx.as_mut()?.next_frame()?;
        match frame.kind {
            FrameKind::BlockAckRequest => self.stats.requests += 1,
            _ => {
                self.stats.transmissions += 1;
                if frame.attempt > 1 {
                    self.stats.retransmissions += 1;
                }
            }
        }
        Some(frame)
    }

    /// A transmission ended. Arms the Block-Ack timeout if it carried our
    /// request.
    pub fn on_tx_end(&mut self, frames: &[Frame], timers: &mut dyn TimerService) {
        let carried_request = frames
            .iter()
            .any(|f| f.kind == FrameKind::BlockAckRequest && f.transmitter == self.local);
        if carried_request && self.tx.as_ref().is_some_and(TransmissionQueue::is_waiting_for_ack) {
            self.state = BaState::WaitForAck;
            self.timeout.set(timers, self.config.ack_timeout());
        }
    }

    pub fn on_rx_start(&mut self, timers: &mut dyn TimerService) {
        if self.state == BaState::WaitForAck {
            self.timeout.cancel(timers);
            self.state = BaState::ReceivingAck;
        }
    }

    pub fn on_rx_end(&mut self, timers: &mut dyn TimerService) {
        if self.state == BaState::ReceivingAck {
            self.state = BaState::WaitForAck;
            self.timeout.set(timers, self.config.rx_guard);
        }
    }

    pub fn on_rx_error(&mut self, timers: &mut dyn TimerService) {
        self.on_rx_end(timers);
    }

    /// # Panics
    ///
    /// If no request is outstanding or the Block-Ack comes from a peer
    /// other than the current receiver.
    pub fn on_block_ack(&mut self, ba: &Frame, timers: &mut dyn TimerService) {
        assert!(
            matches!(self.state, BaState::WaitForAck | BaState::ReceivingAck),
            "block-ack from {} without outstanding request",
            ba.transmitter
        );
        assert_eq!(
            Some(ba.transmitter),
            self.current_receiver(),
            "block-ack from a peer that is not the current receiver"
        );
        self.timeout.cancel(timers);
        self.complete_exchange(ba.block_ack.as_ref());
    }

    fn complete_exchange(&mut self, reply: Option<&BlockAckReply>) {
        self.state = BaState::Idle;
        let Some(tx) = self.tx.as_mut() else {
            return;
        };
        let before = self.events.len();
        tx.on_block_ack(reply, &mut self.events);
        for event in &self.events[before..] {
            match event {
                ArqEvent::Confirmed { attempts, .. } => self.stats.record_confirmed(*attempts),
                ArqEvent::Dropped { .. } => self.stats.dropped += 1,
                _ => {}
            }
        }
        if tx.is_finished() {
            let receiver = tx.receiver();
            let next = tx.next_sn();
            *self.next_sn.get_or_insert_with(receiver, || next) = next;
            self.tx = None;
            tracing::debug!(peer = %receiver, next_sn = next, "block-ack session drained");
        }
    }

    /// Receiving side: buffer or deliver a data frame.
    pub fn on_data(&mut self, frame: Frame) {
        let mut out = Vec::new();
        let queue = self
            .rx
            .get_or_insert_with(frame.transmitter, || ReceptionQueue::new(0));
        if queue.receive(frame, &mut out) == Arrival::Duplicate {
            self.stats.duplicates += 1;
        }
        self.deliver(out);
    }

    /// Receiving side: answer a request with a Block-Ack.
    pub fn on_request(&mut self, bar: &Frame, sinr_db: Option<f64>) {
        let start = match bar.bar_start {
            Some(s) => s,
            None => panic!("block-ack request without start sequence number"),
        };
        let mut out = Vec::new();
        let reply = self
            .rx
            .get_or_insert_with(bar.transmitter, || ReceptionQueue::new(0))
            .on_request(start, &mut out);
        self.deliver(out);
        tracing::debug!(peer = %bar.transmitter, start, window = reply.start_sn, "answering block-ack request");
        self.stats.replies += 1;
        self.events.push(ArqEvent::Reply(Frame::block_ack(
            self.local,
            bar.transmitter,
            reply,
            sinr_db,
        )));
    }

    fn deliver(&mut self, frames: Vec<Frame>) {
        self.stats.delivered += frames.len() as u64;
        self.events.extend(frames.into_iter().map(ArqEvent::Deliver));
    }

    /// A missing Block-Ack counts as an empty reply.
    pub fn on_timer(&mut self, token: TimerToken, _timers: &mut dyn TimerService) {
        if !self.timeout.accept(token) {
            return;
        }
        tracing::debug!(peer = ?self.current_receiver(), "block-ack timeout");
        self.complete_exchange(None);
    }

    pub fn reception_queue(&self, transmitter: PeerAddress) -> Option<&ReceptionQueue> {
        self.rx.get(transmitter)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ArqEvent> + '_ {
        self.events.drain(..)
    }

    pub fn stats(&self) -> &ArqStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimers;
    use bytes::Bytes;

    const A: PeerAddress = PeerAddress(1);
    const B: PeerAddress = PeerAddress(2);
    const C: PeerAddress = PeerAddress(3);

    fn data(to: PeerAddress) -> Frame {
        Frame::data(A, to, Bytes::from_static(b"d"), Duration::ZERO)
    }

    fn burst(ba: &mut BlockAck, timers: &mut ManualTimers) -> Vec<Frame> {
        let frames: Vec<Frame> = std::iter::from_fn(|| ba.next_frame()).collect();
        ba.on_tx_end(&frames, timers);
        frames
    }

    #[test]
    fn bitmap_is_relative_to_start() {
        let reply = BlockAckReply {
            start_sn: 10,
            acked: BTreeSet::from([10, 12, 80]),
        };
        assert_eq!(reply.bitmap(), 0b101);
        assert!(reply.contains(3));
        assert!(!reply.contains(11));
    }

    #[test]
    fn full_exchange_confirms_and_frees_receiver() {
        let mut timers = ManualTimers::new();
        let mut tx = BlockAck::new(BlockAckConfig::default(), A);
        let mut rx = BlockAck::new(BlockAckConfig::default(), B);

        tx.send(data(B));
        tx.send(data(B));
        assert!(!tx.is_accepting(C));
        let frames = burst(&mut tx, &mut timers);
        assert_eq!(frames.len(), 3);
        assert_eq!(tx.state(), BaState::WaitForAck);
        assert!(timers.is_armed(TimerOwner::BlockAckTimeout));

        for f in frames {
            match f.kind {
                FrameKind::Data => rx.on_data(f),
                FrameKind::BlockAckRequest => rx.on_request(&f, Some(25.0)),
                _ => unreachable!(),
            }
        }
        let reply = rx
            .drain_events()
            .find_map(|e| match e {
                ArqEvent::Reply(f) => Some(f),
                _ => None,
            })
            .unwrap();
        assert_eq!(rx.stats().delivered, 2);

        tx.on_block_ack(&reply, &mut timers);
        assert!(!timers.is_armed(TimerOwner::BlockAckTimeout));
        assert_eq!(tx.stats().confirmed, 2);
        assert_eq!(tx.current_receiver(), None);
        assert!(tx.is_accepting(C));

        // sequence numbers continue per receiver
        tx.send(data(B));
        assert_eq!(tx.next_frame().unwrap().sequence, Some(2));
    }

    #[test]
    fn timeout_requeues_every_frame() {
        let mut timers = ManualTimers::new();
        let mut tx = BlockAck::new(BlockAckConfig::default(), A);
        tx.send(data(B));
        burst(&mut tx, &mut timers);

        let token = timers.fire(TimerOwner::BlockAckTimeout).unwrap();
        tx.on_timer(token, &mut timers);
        assert_eq!(tx.state(), BaState::Idle);
        let events: Vec<_> = tx.drain_events().collect();
        assert!(matches!(events.as_slice(), [ArqEvent::Failed { sn: 0, attempt: 1, .. }]));
        let retry = tx.next_frame().unwrap();
        assert_eq!((retry.sequence, retry.attempt), (Some(0), 2));
    }

    #[test]
    #[should_panic(expected = "without outstanding request")]
    fn unsolicited_block_ack_is_fatal() {
        let mut timers = ManualTimers::new();
        let mut tx = BlockAck::new(BlockAckConfig::default(), A);
        let reply = BlockAckReply {
            start_sn: 0,
            acked: BTreeSet::new(),
        };
        tx.on_block_ack(&Frame::block_ack(B, A, reply, None), &mut timers);
    }
}
