//! # Event Queue
//!
//! Discrete-event clock. Events are ordered by time, then by insertion, so
//! two events due at the same instant run in the order they were scheduled
//! and every run with the same inputs replays identically.
//!
//! Each station sees the queue through [`StationTimers`], its
//! [`TimerService`]. Cancellation is lazy: the token is remembered and the
//! entry is skipped when it reaches the head of the heap.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use airlink_mac::timer::{TimerService, TimerToken};

use crate::medium::TxId;

/// Index of a station in the simulation.
pub type StationId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Timer { station: StationId, token: TimerToken },
    /// A transmission leaves the medium.
    TxEnd(TxId),
    /// The station's traffic source produces a frame.
    Traffic(StationId),
}

#[derive(Debug)]
struct Scheduled {
    at: Duration,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    now: Duration,
    seq: u64,
    heap: BinaryHeap<Scheduled>,
    cancelled: HashSet<(StationId, TimerToken)>,
    processed: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Events handed out so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// # Panics
    ///
    /// If `at` lies in the past.
    pub fn schedule_at(&mut self, at: Duration, event: Event) {
        assert!(at >= self.now, "event scheduled in the past: {at:?} < {:?}", self.now);
        self.heap.push(Scheduled {
            at,
            seq: self.seq,
            event,
        });
        self.seq += 1;
    }

    pub fn schedule_in(&mut self, after: Duration, event: Event) {
        self.schedule_at(self.now + after, event);
    }

    /// Pop the next live event due no later than `until`, advancing the
    /// clock to it.
    pub fn pop_until(&mut self, until: Duration) -> Option<(Duration, Event)> {
        loop {
            if self.heap.peek()?.at > until {
                return None;
            }
            let next = self.heap.pop()?;
            if let Event::Timer { station, token } = next.event {
                if self.cancelled.remove(&(station, token)) {
                    continue;
                }
            }
            self.now = next.at;
            self.processed += 1;
            return Some((next.at, next.event));
        }
    }

    /// Timer view for one station.
    pub fn timers(&mut self, station: StationId) -> StationTimers<'_> {
        StationTimers { queue: self, station }
    }
}

/// A station's [`TimerService`] backed by the shared queue.
#[derive(Debug)]
pub struct StationTimers<'a> {
    queue: &'a mut EventQueue,
    station: StationId,
}

impl TimerService for StationTimers<'_> {
    fn now(&self) -> Duration {
        self.queue.now
    }

    fn schedule(&mut self, token: TimerToken, after: Duration) {
        self.queue.schedule_in(
            after,
            Event::Timer {
                station: self.station,
                token,
            },
        );
    }

    fn cancel(&mut self, token: TimerToken) {
        self.queue.cancelled.insert((self.station, token));
    }
}
