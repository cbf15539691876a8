//! # Stop-and-Wait ARQ
//!
//! One outstanding data frame at a time. After the frame leaves the air an
//! ACK timeout of `SIFS + expected ACK duration + processing margin` is armed.
//! An ACK before expiry confirms the frame; an expiry counts as a failed
//! attempt and either schedules a retransmission (same sequence number,
//! attempt + 1) or drops the frame once the retry limit is used up.
//!
//! The receiving side answers every data frame with an ACK and filters
//! retransmissions whose ACK was lost, keyed by the last sequence number
//! delivered per transmitter.
//!
//! ```text
//!  Idle ─send─► Ready ─granted─► OnAir ─tx end─► WaitForAck ─ACK─► Idle
//!                 ▲                                  │  ▲
//!                 │                           rx start│  │rx end (guard)
//!                 │                                  ▼  │
//!                 └──── timeout, attempt < limit ── ReceivingAck
//! ```

use std::time::Duration;

use crate::arq::{ArqEvent, ArqStats};
use crate::frame::{Frame, FrameKind, PeerAddress, SequenceNumber};
use crate::peer_table::PeerTable;
use crate::timer::{TimerOwner, TimerService, TimerToken, Timeout};

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StopAndWaitConfig {
    pub sifs: Duration,
    /// Airtime of an ACK at the basic rate.
    pub expected_ack: Duration,
    /// Extra wait covering preamble detection at the transmitter.
    pub processing_margin: Duration,
    /// Wait after a reception ends for its frame to be handed over.
    pub rx_guard: Duration,
    /// Attempts allowed for frames below the RTS threshold.
    pub short_retry_limit: u32,
    /// Attempts allowed for frames at or above the RTS threshold.
    pub long_retry_limit: u32,
    pub rts_threshold_bytes: usize,
}

impl Default for StopAndWaitConfig {
    fn default() -> Self {
        StopAndWaitConfig {
            sifs: Duration::from_micros(16),
            expected_ack: Duration::from_micros(44),
            processing_margin: Duration::from_micros(21),
            rx_guard: Duration::from_micros(1),
            short_retry_limit: 7,
            long_retry_limit: 4,
            rts_threshold_bytes: 3000,
        }
    }
}

impl StopAndWaitConfig {
    pub fn ack_timeout(&self) -> Duration {
        self.sifs + self.expected_ack + self.processing_margin
    }

    pub fn retry_limit(&self, payload_bytes: usize) -> u32 {
        if payload_bytes < self.rts_threshold_bytes {
            self.short_retry_limit
        } else {
            self.long_retry_limit
        }
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SawState {
    Idle,
    /// Frame waiting for channel access.
    Ready,
    OnAir,
    WaitForAck,
    /// A reception started while waiting; the timeout is suspended.
    ReceivingAck,
}

#[derive(Debug)]
pub struct StopAndWait {
    config: StopAndWaitConfig,
    next_sn: SequenceNumber,
    active: Option<Frame>,
    state: SawState,
    timeout: Timeout,
    /// Last sequence number delivered per transmitter.
    last_delivered: PeerTable<SequenceNumber>,
    events: Vec<ArqEvent>,
    stats: ArqStats,
}

impl StopAndWait {
    pub fn new(config: StopAndWaitConfig) -> Self {
        StopAndWait {
            config,
            next_sn: 0,
            active: None,
            state: SawState::Idle,
            timeout: Timeout::new(TimerOwner::AckTimeout),
            last_delivered: PeerTable::new(),
            events: Vec::new(),
            stats: ArqStats::default(),
        }
    }

    pub fn state(&self) -> SawState {
        self.state
    }

    pub fn has_capacity(&self) -> bool {
        self.active.is_none()
    }

    /// Accept a frame for delivery.
    ///
    /// # Panics
    ///
    /// If a frame is already outstanding.
    pub fn send(&mut self, mut frame: Frame) {
        assert!(self.has_capacity(), "stop-and-wait already has a frame outstanding");
        if frame.sequence.is_none() {
            frame.sequence = Some(self.next_sn);
            self.next_sn += 1;
        }
        frame.attempt = frame.attempt.max(1);
        tracing::debug!(
            peer = %frame.receiver,
            sn = frame.sequence,
            attempt = frame.attempt,
            "accepted frame"
        );
        self.active = Some(frame);
        self.state = SawState::Ready;
    }

    /// The frame awaiting channel access, if any.
    pub fn ready_frame(&self) -> Option<&Frame> {
        match self.state {
            SawState::Ready => self.active.as_ref(),
            _ => None,
        }
    }

    pub fn ready_frame_mut(&mut self) -> Option<&mut Frame> {
        match self.state {
            SawState::Ready => self.active.as_mut(),
            _ => None,
        }
    }

    /// Copy of the ready frame for the transceiver; the queued frame stays
    /// here until it is confirmed or dropped.
    pub fn take_for_transmission(&mut self) -> Option<Frame> {
        let frame = self.ready_frame()?.clone();
        self.state = SawState::OnAir;
        self.stats.transmissions += 1;
        if frame.attempt > 1 {
            self.stats.retransmissions += 1;
        }
        Some(frame)
    }

    pub fn on_tx_end(&mut self, timers: &mut dyn TimerService) {
        if self.state == SawState::OnAir {
            self.state = SawState::WaitForAck;
            self.timeout.set(timers, self.config.ack_timeout());
        }
    }

    pub fn on_rx_start(&mut self, timers: &mut dyn TimerService) {
        if self.state == SawState::WaitForAck {
            self.timeout.cancel(timers);
            self.state = SawState::ReceivingAck;
        }
    }

    pub fn on_rx_end(&mut self, timers: &mut dyn TimerService) {
        if self.state == SawState::ReceivingAck {
            self.state = SawState::WaitForAck;
            self.timeout.set(timers, self.config.rx_guard);
        }
    }

    /// A reception failed to decode; whatever it was, the ACK is lost.
    pub fn on_rx_error(&mut self, timers: &mut dyn TimerService) {
        self.on_rx_end(timers);
    }

    /// Handle an ACK addressed to this station. Returns `false` for an ACK
    /// that matches nothing outstanding (late or duplicate).
    ///
    /// # Panics
    ///
    /// If the ACK comes from a peer other than the outstanding frame's
    /// receiver while an ACK is awaited.
    pub fn on_ack(&mut self, ack: &Frame, timers: &mut dyn TimerService) -> bool {
        debug_assert_eq!(ack.kind, FrameKind::Ack);
        if !matches!(self.state, SawState::WaitForAck | SawState::ReceivingAck) {
            tracing::debug!(peer = %ack.transmitter, "ignoring unexpected ACK");
            return false;
        }
        let Some(frame) = self.active.take() else {
            return false;
        };
        assert_eq!(
            ack.transmitter, frame.receiver,
            "ACK from a peer with no outstanding frame"
        );
        if ack.sequence.is_some() && ack.sequence != frame.sequence {
            tracing::debug!(expected = ?frame.sequence, got = ?ack.sequence, "stale ACK");
            self.active = Some(frame);
            return false;
        }

        self.timeout.cancel(timers);
        self.state = SawState::Idle;
        let sn = frame.sequence.unwrap_or_default();
        self.stats.record_confirmed(frame.attempt);
        tracing::debug!(peer = %frame.receiver, sn, attempts = frame.attempt, "frame confirmed");
        self.events.push(ArqEvent::Confirmed {
            peer: frame.receiver,
            sn,
            attempts: frame.attempt,
        });
        true
    }

    /// Receiving side: acknowledge and deliver a data frame, filtering
    /// duplicates.
    pub fn on_data(&mut self, frame: Frame, sinr_db: Option<f64>) {
        self.events.push(ArqEvent::Reply(Frame::ack_for(&frame, sinr_db)));
        self.stats.replies += 1;

        let Some(sn) = frame.sequence else {
            self.stats.delivered += 1;
            self.events.push(ArqEvent::Deliver(frame));
            return;
        };
        let last = self.last_delivered.get(frame.transmitter).copied();
        if last == Some(sn) {
            self.stats.duplicates += 1;
            tracing::debug!(peer = %frame.transmitter, sn, "duplicate frame dropped");
            return;
        }
        *self.last_delivered.get_or_insert_with(frame.transmitter, || sn) = sn;
        self.stats.delivered += 1;
        self.events.push(ArqEvent::Deliver(frame));
    }

    /// Handle an expiry. Returns `true` if a retransmission is now ready.
    pub fn on_timer(&mut self, token: TimerToken, _timers: &mut dyn TimerService) -> bool {
        if !self.timeout.accept(token) {
            return false;
        }
        let Some(frame) = self.active.as_mut() else {
            self.state = SawState::Idle;
            return false;
        };
        let peer = frame.receiver;
        let sn = frame.sequence.unwrap_or_default();
        let limit = self.config.retry_limit(frame.payload.len());

        if frame.attempt >= limit {
            let attempts = frame.attempt;
            self.active = None;
            self.state = SawState::Idle;
            self.stats.dropped += 1;
            tracing::warn!(%peer, sn, attempts, "retry limit reached, frame dropped");
            self.events.push(ArqEvent::Dropped { peer, sn, attempts });
            return false;
        }

        self.events.push(ArqEvent::Failed {
            peer,
            sn,
            attempt: frame.attempt,
        });
        frame.attempt += 1;
        tracing::debug!(%peer, sn, attempt = frame.attempt, "ACK timeout, retransmitting");
        self.state = SawState::Ready;
        true
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ArqEvent> + '_ {
        self.events.drain(..)
    }

    pub fn stats(&self) -> &ArqStats {
        &self.stats
    }
}
