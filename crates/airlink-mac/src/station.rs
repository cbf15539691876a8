//! # Station
//!
//! One node's lower MAC: Backoff, the configured reliability protocol,
//! optional aggregation, rate adaptation and frame synchronization wired
//! together against an injected [`TimerService`].
//!
//! The station is sans-IO. The driver feeds it channel state, receptions,
//! timer expiries and the end of its own transmissions; the station queues
//! [`StationEvent`]s that the driver drains after every call.
//!
//! ## Send path
//!
//! ```text
//! enqueue ─► queue ─► Stop-and-Wait ────────────────┐
//!                 └─► Block-Ack ─► [Aggregation] ───┴─► Backoff grant ─► Transmit
//! ```
//!
//! Sending is pulled by [`Station::try_to_send`], a loop guarded against
//! re-entry. Control replies bypass contention and go out SIFS after the
//! frame that solicited them.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

use crate::aggregation::{Aggregation, AggregationStats};
use crate::airtime::BASIC_DBPS;
use crate::arq::{ArqEvent, ArqStats};
use crate::backoff::{Backoff, BackoffStats};
use crate::block_ack::{BaState, BlockAck};
use crate::config::{MacConfig, ReliabilityConfig};
use crate::frame::{Frame, FrameKind, PeerAddress, SequenceNumber, Transmission};
use crate::frame_sync::{FrameSync, FrameSyncStats, Preamble, RxIndication};
use crate::phy_mode::PhyMode;
use crate::rate::{RateAdaptation, RateStats};
use crate::stop_and_wait::StopAndWait;
use crate::timer::{TimerOwner, TimerService, TimerToken, Timeout};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StationEvent {
    /// Put `transmission` on the medium for `duration`. The driver answers
    /// with [`Station::on_tx_end`] once it is over.
    Transmit {
        transmission: Transmission,
        duration: Duration,
    },
    /// Payload for the layer above, in order.
    Deliver(Frame),
    Confirmed {
        peer: PeerAddress,
        sn: SequenceNumber,
        attempts: u32,
    },
    Dropped {
        peer: PeerAddress,
        sn: SequenceNumber,
        attempts: u32,
    },
}

// ─── Stats ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StationStats {
    pub address: PeerAddress,
    pub enqueued: u64,
    pub queued: usize,
    pub transmissions: u64,
    pub replies_sent: u64,
    pub frames_received: u64,
    pub delivered: u64,
    pub confirmed: u64,
    pub dropped: u64,
    pub backoff: BackoffStats,
    pub arq: ArqStats,
    pub aggregation: Option<AggregationStats>,
    pub rate: RateStats,
    pub frame_sync: FrameSyncStats,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: u64,
    transmissions: u64,
    replies_sent: u64,
    frames_received: u64,
    delivered: u64,
    confirmed: u64,
    dropped: u64,
}

// ─── Station ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Reliability {
    StopAndWait(StopAndWait),
    BlockAck(BlockAck),
}

/// Access requested from Backoff, waiting for the grant.
#[derive(Debug)]
enum Pending {
    /// The Stop-and-Wait frame is taken from the engine only at grant time.
    Single { receiver: PeerAddress, attempt: u32 },
    /// Frames already pulled from Block-Ack or aggregation, never empty.
    Frames { receiver: PeerAddress, frames: Vec<Frame> },
}

impl Pending {
    /// `None` for an empty batch.
    fn frames(frames: Vec<Frame>) -> Option<Pending> {
        let receiver = frames.first()?.receiver;
        Some(Pending::Frames { receiver, frames })
    }

    fn receiver_and_attempt(&self) -> (PeerAddress, u32) {
        match self {
            Pending::Single { receiver, attempt } => (*receiver, *attempt),
            Pending::Frames { receiver, frames } => {
                let attempt = frames.iter().map(|f| f.attempt).max().unwrap_or(1).max(1);
                (*receiver, attempt)
            }
        }
    }
}

#[derive(Debug)]
pub struct Station {
    address: PeerAddress,
    config: MacConfig,
    backoff: Backoff,
    reliability: Reliability,
    aggregation: Option<Aggregation>,
    rate: RateAdaptation,
    frame_sync: FrameSync,
    queue: VecDeque<Frame>,
    pending: Option<Pending>,
    replies: VecDeque<Frame>,
    sifs: Timeout,
    /// Frames of our own transmission while it is on air.
    on_air: Option<Vec<Frame>>,
    sending: bool,
    events: Vec<StationEvent>,
    counters: Counters,
}

impl Station {
    pub fn new(address: PeerAddress, config: MacConfig, timers: &mut dyn TimerService) -> Self {
        let backoff = Backoff::new(config.backoff.clone(), timers);
        let reliability = match &config.reliability {
            ReliabilityConfig::StopAndWait(c) => Reliability::StopAndWait(StopAndWait::new(c.clone())),
            ReliabilityConfig::BlockAck(c) => Reliability::BlockAck(BlockAck::new(c.clone(), address)),
        };
        let aggregation = config.aggregation.clone().map(Aggregation::new);
        let rate = RateAdaptation::new(config.rate.clone(), config.rate_table.clone());
        let frame_sync = FrameSync::new(config.frame_sync.clone());
        tracing::debug!(%address, block_ack = config.uses_block_ack(), aggregation = aggregation.is_some(), "station created");
        Station {
            address,
            backoff,
            reliability,
            aggregation,
            rate,
            frame_sync,
            queue: VecDeque::new(),
            pending: None,
            replies: VecDeque::new(),
            sifs: Timeout::new(TimerOwner::Sifs),
            on_air: None,
            sending: false,
            events: Vec::new(),
            counters: Counters::default(),
            config,
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn rate_adaptation(&self) -> &RateAdaptation {
        &self.rate
    }

    /// Antenna count of `peer`, as learned out of band.
    pub fn set_peer_antennas(&mut self, peer: PeerAddress, antennas: u8) {
        self.rate.set_peer_antennas(peer, antennas);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_transmitting(&self) -> bool {
        self.on_air.is_some()
    }

    /// Hand a data frame from the layer above.
    ///
    /// # Panics
    ///
    /// If the frame is not a data frame sent by this station.
    pub fn enqueue(&mut self, frame: Frame, timers: &mut dyn TimerService) {
        assert_eq!(frame.kind, FrameKind::Data, "only data frames are enqueued");
        assert_eq!(frame.transmitter, self.address, "frame from a foreign transmitter");
        self.counters.enqueued += 1;
        self.queue.push_back(frame);
        self.try_to_send(timers);
    }

    // ─── Send path ───────────────────────────────────────────────────────

    /// Move frames down the send path until nothing more can progress.
    pub fn try_to_send(&mut self, timers: &mut dyn TimerService) {
        if self.sending {
            return;
        }
        self.sending = true;
        loop {
            self.feed(timers);
            if self.pending.is_some() || self.on_air.is_some() {
                break;
            }
            let Some(pending) = self.next_pending(timers) else {
                break;
            };
            let (_, attempt) = pending.receiver_and_attempt();
            self.pending = Some(pending);
            if self.backoff.transmission_request(attempt) {
                self.start_pending(timers);
            }
        }
        self.sending = false;
    }

    /// Queue to reliability engine.
    fn feed(&mut self, timers: &mut dyn TimerService) {
        match &mut self.reliability {
            Reliability::StopAndWait(saw) => {
                if saw.has_capacity() {
                    if let Some(frame) = self.queue.pop_front() {
                        saw.send(frame);
                    }
                }
            }
            Reliability::BlockAck(ba) => {
                while let Some(front) = self.queue.front() {
                    if !ba.is_accepting(front.receiver) {
                        if ba.current_receiver() != Some(front.receiver) {
                            // drain the session before switching receivers
                            ba.flush();
                        }
                        break;
                    }
                    if let Some(frame) = self.queue.pop_front() {
                        ba.send(frame);
                    }
                }
                if let Some(agg) = self.aggregation.as_mut() {
                    while agg.is_accepting() {
                        match ba.next_frame() {
                            Some(frame) => agg.push(frame, timers),
                            None => break,
                        }
                    }
                }
            }
        }
    }

    fn next_pending(&mut self, timers: &mut dyn TimerService) -> Option<Pending> {
        match &mut self.reliability {
            Reliability::StopAndWait(saw) => saw.ready_frame().map(|f| Pending::Single {
                receiver: f.receiver,
                attempt: f.attempt.max(1),
            }),
            Reliability::BlockAck(ba) => match self.aggregation.as_mut() {
                Some(agg) => agg.take_train(timers).and_then(Pending::frames),
                None => ba.next_frame().and_then(|f| Pending::frames(vec![f])),
            },
        }
    }

    /// Backoff granted access: choose the mode and put the frames on air.
    fn start_pending(&mut self, timers: &mut dyn TimerService) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if self.on_air.is_some() {
            // a reply is on air; contend again once it is over
            let (_, attempt) = pending.receiver_and_attempt();
            self.pending = Some(pending);
            let immediate = self.backoff.transmission_request(attempt);
            debug_assert!(!immediate, "backoff granted twice in a row");
            tracing::debug!(station = %self.address, "grant while transmitting, deferred");
            return;
        }

        let now = timers.now();
        let (receiver, attempt) = pending.receiver_and_attempt();
        let phy_mode = self.rate.phy_mode(receiver, attempt, now);
        self.rate.set_current(receiver, phy_mode, now);

        let frames = match pending {
            Pending::Frames { frames, .. } => frames,
            Pending::Single { .. } => match &mut self.reliability {
                Reliability::StopAndWait(saw) => match saw.take_for_transmission() {
                    Some(frame) => vec![frame],
                    None => return,
                },
                Reliability::BlockAck(_) => return,
            },
        };
        self.counters.transmissions += 1;
        self.transmit(frames, phy_mode, timers);
    }

    fn transmit(&mut self, mut frames: Vec<Frame>, phy_mode: PhyMode, timers: &mut dyn TimerService) {
        for f in &mut frames {
            f.phy_mode = Some(phy_mode);
        }
        let transmission = Transmission {
            transmitter: self.address,
            receiver: frames.first().map_or(self.address, |f| f.receiver),
            phy_mode,
            frames,
        };
        let duration = if transmission.is_reply() {
            self.config
                .airtime
                .frame_with_dbps(transmission.psdu_bits(), BASIC_DBPS)
        } else {
            self.config.airtime.frame(transmission.psdu_bits(), &phy_mode)
        };
        tracing::debug!(
            station = %self.address,
            to = %transmission.receiver,
            frames = transmission.frames.len(),
            mode = %phy_mode,
            ?duration,
            "transmit"
        );

        self.frame_sync.on_transmit(timers);
        self.route_indications(timers);
        self.on_air = Some(transmission.frames.clone());
        self.events.push(StationEvent::Transmit { transmission, duration });
    }

    /// Our own transmission is over.
    pub fn on_tx_end(&mut self, timers: &mut dyn TimerService) {
        let Some(frames) = self.on_air.take() else {
            return;
        };
        let was_reply = frames.len() == 1 && frames[0].kind.is_reply();
        if !was_reply {
            match &mut self.reliability {
                Reliability::StopAndWait(saw) => saw.on_tx_end(timers),
                Reliability::BlockAck(ba) => ba.on_tx_end(&frames, timers),
            }
        }
        if !self.replies.is_empty() && !self.sifs.is_set() {
            self.sifs.set(timers, self.config.sifs);
        }
        self.process_arq_events(timers);
        self.try_to_send(timers);
    }

    // ─── Channel ─────────────────────────────────────────────────────────

    pub fn on_channel_busy(&mut self, timers: &mut dyn TimerService) {
        self.backoff.on_channel_busy(timers);
    }

    pub fn on_channel_idle(&mut self, timers: &mut dyn TimerService) {
        self.backoff.on_channel_idle(timers);
        self.try_to_send(timers);
    }

    // ─── Receive path ────────────────────────────────────────────────────

    /// A preamble arrived from the medium.
    pub fn on_preamble(&mut self, preamble: &Preamble, timers: &mut dyn TimerService) {
        if preamble.transmitter == self.address {
            return;
        }
        self.frame_sync.on_preamble(preamble, timers);
        self.route_indications(timers);
    }

    /// A PSDU finished on the medium. Delivered to the MAC only if frame
    /// synchronization held and the CRC is good.
    pub fn on_psdu(
        &mut self,
        transmission: &Transmission,
        crc_ok: bool,
        sinr_db: f64,
        timers: &mut dyn TimerService,
    ) {
        if transmission.transmitter == self.address {
            return;
        }
        let deliver = self.frame_sync.on_psdu(transmission.transmitter, crc_ok, timers);
        self.route_indications(timers);
        if deliver {
            self.on_receive(transmission.frames.clone(), sinr_db, timers);
        }
    }

    fn route_indications(&mut self, timers: &mut dyn TimerService) {
        let indications: Vec<RxIndication> = self.frame_sync.drain_indications().collect();
        for indication in indications {
            match (&mut self.reliability, indication) {
                (Reliability::StopAndWait(saw), RxIndication::Start { .. }) => saw.on_rx_start(timers),
                (Reliability::StopAndWait(saw), RxIndication::End) => saw.on_rx_end(timers),
                (Reliability::StopAndWait(saw), RxIndication::Error) => saw.on_rx_error(timers),
                (Reliability::BlockAck(ba), RxIndication::Start { .. }) => ba.on_rx_start(timers),
                (Reliability::BlockAck(ba), RxIndication::End) => ba.on_rx_end(timers),
                (Reliability::BlockAck(ba), RxIndication::Error) => ba.on_rx_error(timers),
            }
        }
    }

    /// Frames decoded from one PSDU, with the SINR they were received at.
    pub fn on_receive(&mut self, frames: Vec<Frame>, sinr_db: f64, timers: &mut dyn TimerService) {
        let now = timers.now();
        if let Some(first) = frames.first() {
            self.rate.on_measurement(first.transmitter, sinr_db, now);
        }
        for frame in frames {
            if frame.receiver != self.address {
                continue;
            }
            self.counters.frames_received += 1;
            if let Some(reported) = frame.reported_sinr_db {
                self.rate.on_peer_report(frame.transmitter, reported);
            }
            match (frame.kind, &mut self.reliability) {
                (FrameKind::Data, Reliability::StopAndWait(saw)) => saw.on_data(frame, Some(sinr_db)),
                (FrameKind::Data, Reliability::BlockAck(ba)) => ba.on_data(frame),
                (FrameKind::Ack, Reliability::StopAndWait(saw)) => {
                    saw.on_ack(&frame, timers);
                }
                (FrameKind::BlockAckRequest, Reliability::BlockAck(ba)) => ba.on_request(&frame, Some(sinr_db)),
                (FrameKind::BlockAck, Reliability::BlockAck(ba)) => {
                    let awaited = matches!(ba.state(), BaState::WaitForAck | BaState::ReceivingAck)
                        && ba.current_receiver() == Some(frame.transmitter);
                    if awaited {
                        ba.on_block_ack(&frame, timers);
                    } else {
                        tracing::debug!(station = %self.address, from = %frame.transmitter, "late block-ack ignored");
                    }
                }
                (kind, _) => {
                    tracing::trace!(station = %self.address, ?kind, "frame not handled by this reliability protocol");
                }
            }
        }
        self.process_arq_events(timers);
        self.try_to_send(timers);
    }

    fn process_arq_events(&mut self, timers: &mut dyn TimerService) {
        let now = timers.now();
        let events: Vec<ArqEvent> = match &mut self.reliability {
            Reliability::StopAndWait(saw) => saw.drain_events().collect(),
            Reliability::BlockAck(ba) => ba.drain_events().collect(),
        };
        for event in events {
            match event {
                ArqEvent::Confirmed { peer, sn, attempts } => {
                    self.rate.on_success(peer, now);
                    self.counters.confirmed += 1;
                    self.events.push(StationEvent::Confirmed { peer, sn, attempts });
                }
                ArqEvent::Failed { peer, .. } => self.rate.on_failure(peer, now),
                ArqEvent::Dropped { peer, sn, attempts } => {
                    self.rate.on_failure(peer, now);
                    self.counters.dropped += 1;
                    tracing::info!(station = %self.address, %peer, sn, attempts, "frame dropped");
                    self.events.push(StationEvent::Dropped { peer, sn, attempts });
                }
                ArqEvent::Deliver(frame) => {
                    self.counters.delivered += 1;
                    self.events.push(StationEvent::Deliver(frame));
                }
                ArqEvent::Reply(frame) => {
                    self.replies.push_back(frame);
                    if !self.sifs.is_set() && self.on_air.is_none() {
                        self.sifs.set(timers, self.config.sifs);
                    }
                }
            }
        }
    }

    fn send_reply(&mut self, timers: &mut dyn TimerService) {
        if self.on_air.is_some() {
            return;
        }
        let Some(reply) = self.replies.pop_front() else {
            return;
        };
        self.counters.replies_sent += 1;
        let mode = self.rate.control_phy_mode();
        self.transmit(vec![reply], mode, timers);
    }

    // ─── Timers ──────────────────────────────────────────────────────────

    pub fn on_timer(&mut self, token: TimerToken, timers: &mut dyn TimerService) {
        match token.owner {
            TimerOwner::Backoff => {
                if self.backoff.on_timer(token, timers) {
                    self.start_pending(timers);
                }
            }
            TimerOwner::AckTimeout => {
                if let Reliability::StopAndWait(saw) = &mut self.reliability {
                    saw.on_timer(token, timers);
                }
            }
            TimerOwner::BlockAckTimeout => {
                if let Reliability::BlockAck(ba) = &mut self.reliability {
                    ba.on_timer(token, timers);
                }
            }
            TimerOwner::Aggregation => {
                if let Some(agg) = self.aggregation.as_mut() {
                    agg.on_timer(token, timers);
                }
            }
            TimerOwner::FrameSync => {
                self.frame_sync.on_timer(token, timers);
                self.route_indications(timers);
            }
            TimerOwner::Sifs => {
                if self.sifs.accept(token) {
                    self.send_reply(timers);
                }
            }
        }
        self.process_arq_events(timers);
        self.try_to_send(timers);
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = StationEvent> + '_ {
        self.events.drain(..)
    }

    pub fn stats(&self, now: Duration) -> StationStats {
        let arq = match &self.reliability {
            Reliability::StopAndWait(saw) => saw.stats().clone(),
            Reliability::BlockAck(ba) => ba.stats().clone(),
        };
        StationStats {
            address: self.address,
            enqueued: self.counters.enqueued,
            queued: self.queue.len(),
            transmissions: self.counters.transmissions,
            replies_sent: self.counters.replies_sent,
            frames_received: self.counters.frames_received,
            delivered: self.counters.delivered,
            confirmed: self.counters.confirmed,
            dropped: self.counters.dropped,
            backoff: self.backoff.stats().clone(),
            arq,
            aggregation: self.aggregation.as_ref().map(|a| a.stats().clone()),
            rate: self.rate.stats(now),
            frame_sync: self.frame_sync.stats().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimers;
    use bytes::Bytes;

    const A: PeerAddress = PeerAddress(1);
    const B: PeerAddress = PeerAddress(2);

    fn data(to: PeerAddress) -> Frame {
        Frame::data(A, to, Bytes::from(vec![0u8; 100]), Duration::ZERO)
    }

    #[test]
    fn pending_batch_takes_receiver_from_first_frame() {
        assert!(Pending::frames(Vec::new()).is_none());

        let mut retry = data(B);
        retry.attempt = 3;
        let pending = Pending::frames(vec![data(B), retry]).unwrap();
        assert_eq!(pending.receiver_and_attempt(), (B, 3));
    }

    /// Fire timers until the station emits a transmission.
    fn run_until_transmit(station: &mut Station, timers: &mut ManualTimers) -> Option<(Transmission, Duration)> {
        for _ in 0..10_000 {
            if let Some(ev) = station.drain_events().find_map(|e| match e {
                StationEvent::Transmit { transmission, duration } => Some((transmission, duration)),
                _ => None,
            }) {
                return Some(ev);
            }
            let token = timers.fire_next()?;
            station.on_timer(token, timers);
        }
        None
    }

    #[test]
    fn enqueued_frame_goes_on_air_after_backoff() {
        let mut timers = ManualTimers::new();
        let mut station = Station::new(A, MacConfig::default(), &mut timers);
        station.enqueue(data(B), &mut timers);
        let (tx, duration) = run_until_transmit(&mut station, &mut timers).unwrap();
        assert_eq!(tx.receiver, B);
        assert_eq!(tx.frames[0].sequence, Some(0));
        assert_eq!(tx.frames[0].attempt, 1);
        assert!(duration > Duration::ZERO);
        assert!(station.is_transmitting());

        station.on_tx_end(&mut timers);
        assert!(timers.is_armed(TimerOwner::AckTimeout));
    }

    #[test]
    fn data_is_acknowledged_after_sifs() {
        let mut timers = ManualTimers::new();
        let mut station = Station::new(B, MacConfig::default(), &mut timers);
        let frame = data(B).with_sequence(0);
        station.on_receive(vec![frame], 20.0, &mut timers);

        let delivered: Vec<_> = station.drain_events().collect();
        assert!(matches!(delivered.as_slice(), [StationEvent::Deliver(_)]));
        assert_eq!(timers.deadline(TimerOwner::Sifs), Some(Duration::from_micros(16)));

        let token = timers.fire(TimerOwner::Sifs).unwrap();
        station.on_timer(token, &mut timers);
        let (tx, duration) = run_until_transmit(&mut station, &mut timers).unwrap();
        assert!(tx.is_reply());
        assert_eq!(tx.receiver, A);
        assert_eq!(tx.frames[0].reported_sinr_db, Some(20.0));
        assert_eq!(duration, Duration::from_micros(44));
    }

    #[test]
    fn frames_for_other_stations_are_ignored() {
        let mut timers = ManualTimers::new();
        let mut station = Station::new(PeerAddress(3), MacConfig::default(), &mut timers);
        station.on_receive(vec![data(B).with_sequence(0)], 20.0, &mut timers);
        assert_eq!(station.drain_events().count(), 0);
        assert!(!timers.is_armed(TimerOwner::Sifs));
    }
}
