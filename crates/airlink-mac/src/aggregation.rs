//! # Aggregation
//!
//! Collects frames for one receiver into a train that goes on air as a
//! single PSDU. A train opens with its first frame and closes when:
//!
//! - a frame that solicits an immediate reply is added (a lone one is sent
//!   alone),
//! - a frame for another receiver arrives (it seeds the next train),
//! - the impatient flag is set (one frame per train),
//! - the entry or size limit is reached,
//! - the max-delay timer armed at opening fires.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::frame::{Frame, PeerAddress};
use crate::timer::{TimerOwner, TimerService, TimerToken, Timeout};

#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub max_entries: usize,
    pub max_delay: Duration,
    pub max_size_bits: u32,
    pub impatient: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            max_entries: 10,
            max_delay: Duration::from_millis(10),
            max_size_bits: 65535 * 8,
            impatient: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationStats {
    pub trains: u64,
    pub frames: u64,
    /// Trains per size.
    pub train_size: BTreeMap<usize, u64>,
    /// Trains closed by the max-delay timer.
    pub timeouts: u64,
}

impl AggregationStats {
    pub fn mean_train_size(&self) -> f64 {
        if self.trains == 0 {
            0.0
        } else {
            self.frames as f64 / self.trains as f64
        }
    }
}

#[derive(Debug)]
pub struct Aggregation {
    config: AggregationConfig,
    train: Vec<Frame>,
    train_bits: u32,
    receiver: Option<PeerAddress>,
    /// First frame of the next train.
    parked: Option<Frame>,
    closed: bool,
    timeout: Timeout,
    stats: AggregationStats,
}

impl Aggregation {
    pub fn new(config: AggregationConfig) -> Self {
        assert!(config.max_entries >= 1, "a train holds at least one frame");
        Aggregation {
            config,
            train: Vec::new(),
            train_bits: 0,
            receiver: None,
            parked: None,
            closed: false,
            timeout: Timeout::new(TimerOwner::Aggregation),
            stats: AggregationStats::default(),
        }
    }

    /// Frames can be added until the train closes.
    pub fn is_accepting(&self) -> bool {
        !self.closed && self.parked.is_none()
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    pub fn receiver(&self) -> Option<PeerAddress> {
        self.receiver
    }

    /// # Panics
    ///
    /// If the train is not accepting.
    pub fn push(&mut self, frame: Frame, timers: &mut dyn TimerService) {
        assert!(self.is_accepting(), "aggregation train is closed");

        if self.train.is_empty() {
            self.open(frame, timers);
            return;
        }
        if Some(frame.receiver) != self.receiver
            || self.train_bits + frame.psdu_bits() > self.config.max_size_bits
        {
            self.parked = Some(frame);
            self.close(timers);
            return;
        }

        let solicits = frame.kind.solicits_reply();
        self.append(frame);
        if solicits || self.config.impatient || self.train.len() >= self.config.max_entries {
            self.close(timers);
        }
    }

    fn append(&mut self, frame: Frame) {
        self.train_bits += frame.psdu_bits();
        self.train.push(frame);
    }

    fn open(&mut self, frame: Frame, timers: &mut dyn TimerService) {
        self.receiver = Some(frame.receiver);
        let alone = frame.kind.solicits_reply();
        self.append(frame);
        if alone || self.config.impatient || self.config.max_entries == 1 {
            self.close(timers);
        } else {
            self.timeout.set(timers, self.config.max_delay);
        }
    }

    fn close(&mut self, timers: &mut dyn TimerService) {
        self.closed = true;
        self.timeout.cancel(timers);
    }

    /// Close the open train now, e.g. because nothing else is queued.
    pub fn close_now(&mut self, timers: &mut dyn TimerService) {
        if !self.train.is_empty() {
            self.close(timers);
        }
    }

    pub fn has_train(&self) -> bool {
        self.closed && !self.train.is_empty()
    }

    /// Hand over the closed train. A parked frame opens the next one.
    pub fn take_train(&mut self, timers: &mut dyn TimerService) -> Option<Vec<Frame>> {
        if !self.has_train() {
            return None;
        }
        let train = std::mem::take(&mut self.train);
        self.train_bits = 0;
        self.closed = false;
        self.receiver = None;

        self.stats.trains += 1;
        self.stats.frames += train.len() as u64;
        *self.stats.train_size.entry(train.len()).or_insert(0) += 1;
        tracing::trace!(size = train.len(), "aggregation train closed");

        if let Some(next) = self.parked.take() {
            self.open(next, timers);
        }
        Some(train)
    }

    /// Returns `true` when the max-delay timer closed the train.
    pub fn on_timer(&mut self, token: TimerToken, timers: &mut dyn TimerService) -> bool {
        if !self.timeout.accept(token) {
            return false;
        }
        self.stats.timeouts += 1;
        self.close(timers);
        true
    }

    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimers;
    use bytes::Bytes;

    const A: PeerAddress = PeerAddress(1);

    fn data(to: u32) -> Frame {
        Frame::data(A, PeerAddress(to), Bytes::from_static(b"abc"), Duration::ZERO)
    }

    #[test]
    fn closes_at_max_entries() {
        let mut timers = ManualTimers::new();
        let cfg = AggregationConfig {
            max_entries: 3,
            ..Default::default()
        };
        let mut agg = Aggregation::new(cfg);
        for _ in 0..3 {
            assert!(agg.is_accepting());
            agg.push(data(2), &mut timers);
        }
        assert!(!agg.is_accepting());
        assert!(!timers.is_armed(TimerOwner::Aggregation));
        assert_eq!(agg.take_train(&mut timers).unwrap().len(), 3);
        assert_eq!(agg.stats().train_size.get(&3), Some(&1));
    }

    #[test]
    fn different_receiver_seeds_next_train() {
        let mut timers = ManualTimers::new();
        let mut agg = Aggregation::new(AggregationConfig::default());
        agg.push(data(2), &mut timers);
        agg.push(data(2), &mut timers);
        agg.push(data(3), &mut timers);
        assert!(agg.has_train());

        let first = agg.take_train(&mut timers).unwrap();
        assert!(first.iter().all(|f| f.receiver == PeerAddress(2)));
        assert_eq!(agg.receiver(), Some(PeerAddress(3)));
        assert_eq!(agg.len(), 1);
        assert!(timers.is_armed(TimerOwner::Aggregation));
    }

    #[test]
    fn request_alone_is_sent_immediately() {
        let mut timers = ManualTimers::new();
        let mut agg = Aggregation::new(AggregationConfig::default());
        agg.push(Frame::block_ack_request(A, PeerAddress(2), 0), &mut timers);
        assert!(agg.has_train());
        assert_eq!(agg.take_train(&mut timers).unwrap().len(), 1);
    }

    #[test]
    fn request_closes_a_running_train() {
        let mut timers = ManualTimers::new();
        let mut agg = Aggregation::new(AggregationConfig::default());
        agg.push(data(2), &mut timers);
        agg.push(Frame::block_ack_request(A, PeerAddress(2), 0), &mut timers);
        assert_eq!(agg.take_train(&mut timers).unwrap().len(), 2);
    }

    #[test]
    fn max_delay_closes_partial_train() {
        let mut timers = ManualTimers::new();
        let mut agg = Aggregation::new(AggregationConfig::default());
        agg.push(data(2), &mut timers);
        assert!(!agg.has_train());
        let token = timers.fire(TimerOwner::Aggregation).unwrap();
        assert_eq!(timers.now(), Duration::from_millis(10));
        assert!(agg.on_timer(token, &mut timers));
        assert!(agg.has_train());
        assert_eq!(agg.stats().timeouts, 1);
    }

    #[test]
    fn impatient_sends_single_frames() {
        let mut timers = ManualTimers::new();
        let cfg = AggregationConfig {
            impatient: true,
            ..Default::default()
        };
        let mut agg = Aggregation::new(cfg);
        agg.push(data(2), &mut timers);
        assert!(agg.has_train());
        assert!(!agg.is_accepting());
    }

    #[test]
    fn size_limit_parks_overflow() {
        let mut timers = ManualTimers::new();
        let cfg = AggregationConfig {
            max_size_bits: 2 * data(2).psdu_bits(),
            ..Default::default()
        };
        let mut agg = Aggregation::new(cfg);
        for _ in 0..3 {
            agg.push(data(2), &mut timers);
            if !agg.is_accepting() {
                break;
            }
        }
        assert_eq!(agg.take_train(&mut timers).unwrap().len(), 2);
        assert_eq!(agg.len(), 1);
    }
}
