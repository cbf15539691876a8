//! Sender-side window of frames towards the current receiver.

use std::collections::VecDeque;

use crate::arq::ArqEvent;
use crate::frame::{Frame, PeerAddress, SequenceNumber};

use super::BlockAckReply;

#[derive(Debug, Clone)]
pub struct TransmissionQueueConfig {
    /// Unacknowledged frames allowed on air before a request is forced.
    pub max_on_air: usize,
    /// Attempts per frame before it is dropped.
    pub max_transmissions: u32,
    /// Request an acknowledgement as soon as nothing else is queued.
    pub impatient: bool,
}

impl Default for TransmissionQueueConfig {
    fn default() -> Self {
        TransmissionQueueConfig {
            max_on_air: 10,
            max_transmissions: 4,
            impatient: true,
        }
    }
}

#[derive(Debug)]
pub struct TransmissionQueue {
    config: TransmissionQueueConfig,
    receiver: PeerAddress,
    local: PeerAddress,
    next_sn: SequenceNumber,
    /// Frames not yet sent, retransmissions first.
    pending: VecDeque<Frame>,
    /// Sent and not yet acknowledged, in transmission order.
    on_air: VecDeque<Frame>,
    /// Frames went on air since the last request.
    bar_required: bool,
    /// A request was asked for regardless of window and queue state.
    bar_forced: bool,
    wait_for_ack: bool,
}

impl TransmissionQueue {
    pub fn new(
        config: TransmissionQueueConfig,
        local: PeerAddress,
        receiver: PeerAddress,
        first_sn: SequenceNumber,
    ) -> Self {
        TransmissionQueue {
            config,
            receiver,
            local,
            next_sn: first_sn,
            pending: VecDeque::new(),
            on_air: VecDeque::new(),
            bar_required: false,
            bar_forced: false,
            wait_for_ack: false,
        }
    }

    pub fn receiver(&self) -> PeerAddress {
        self.receiver
    }

    pub fn next_sn(&self) -> SequenceNumber {
        self.next_sn
    }

    /// Frames held, sent or not.
    pub fn len(&self) -> usize {
        self.pending.len() + self.on_air.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_air_len(&self) -> usize {
        self.on_air.len()
    }

    pub fn is_waiting_for_ack(&self) -> bool {
        self.wait_for_ack
    }

    /// Nothing left to send or confirm.
    pub fn is_finished(&self) -> bool {
        self.is_empty() && !self.wait_for_ack
    }

    pub fn push(&mut self, mut frame: Frame) {
        assert_eq!(frame.receiver, self.receiver, "frame for a different receiver");
        if frame.sequence.is_none() {
            frame.sequence = Some(self.next_sn);
            self.next_sn += 1;
        }
        frame.attempt = frame.attempt.max(1);
        self.pending.push_back(frame);
    }

    /// Request an acknowledgement once the queued frames that fit the
    /// window are on air, without waiting for the window to fill.
    pub fn request_ack(&mut self) {
        if !self.wait_for_ack {
            self.bar_forced = true;
        }
    }

    fn window_open(&self) -> bool {
        !self.pending.is_empty() && self.on_air.len() < self.config.max_on_air
    }

    fn request_due(&self) -> bool {
        self.bar_required
            && !self.on_air.is_empty()
            && (self.bar_forced
                || self.config.impatient
                || self.on_air.len() >= self.config.max_on_air)
    }

    pub fn has_data(&self) -> bool {
        !self.wait_for_ack && (self.window_open() || self.request_due())
    }

    /// Next frame to put on air. Queued data goes first while the window
    /// has room; the request follows when the queue has drained
    /// (impatient) or the window is full.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.wait_for_ack {
            return None;
        }
        if self.window_open() {
            let frame = self.pending.pop_front()?;
            self.on_air.push_back(frame.clone());
            self.bar_required = true;
            return Some(frame);
        }
        if !self.request_due() {
            return None;
        }
        let start = self
            .on_air
            .iter()
            .filter_map(|f| f.sequence)
            .min()
            .unwrap_or(self.next_sn);
        self.bar_required = false;
        self.bar_forced = false;
        self.wait_for_ack = true;
        Some(Frame::block_ack_request(self.local, self.receiver, start))
    }

    /// Apply a Block-Ack (or its absence, as an empty reply). Acknowledged
    /// frames retire; the rest go back to the head of the queue in sequence
    /// order, or are dropped once their attempts are used up.
    pub fn on_block_ack(&mut self, reply: Option<&BlockAckReply>, events: &mut Vec<ArqEvent>) {
        self.wait_for_ack = false;
        let mut missing: Vec<Frame> = Vec::new();

        for frame in self.on_air.drain(..) {
            let sn = frame.sequence.unwrap_or_default();
            if reply.is_some_and(|r| r.contains(sn)) {
                events.push(ArqEvent::Confirmed {
                    peer: self.receiver,
                    sn,
                    attempts: frame.attempt,
                });
                continue;
            }
            if frame.attempt >= self.config.max_transmissions {
                tracing::warn!(peer = %self.receiver, sn, attempts = frame.attempt, "block-ack frame dropped");
                events.push(ArqEvent::Dropped {
                    peer: self.receiver,
                    sn,
                    attempts: frame.attempt,
                });
                continue;
            }
            events.push(ArqEvent::Failed {
                peer: self.receiver,
                sn,
                attempt: frame.attempt,
            });
            missing.push(frame);
        }

        missing.sort_by_key(|f| f.sequence);
        for mut frame in missing.into_iter().rev() {
            frame.attempt += 1;
            self.pending.push_front(frame);
        }
    }
}
