//! # Backoff Engine
//!
//! Link-wide contention countdown (DCF/EDCA style). Pure logic: reacts to
//! channel busy/idle notifications, timer expiries and transmission
//! requests, and reports when the pending transmission may start.
//!
//! ## Timing
//!
//! ```text
//!   idle ──► AIFS ──► slot ─► slot ─► ... ─► counter == 0 ─► grant
//!    ▲         │        │
//!    └── busy ─┴────────┘   (timer cancelled, counter frozen)
//! ```
//!
//! The full AIFS must elapse on an idle channel before any slot is counted.
//! A busy period freezes the counter; it is only redrawn once it has reached
//! zero.

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;
use std::time::Duration;

use crate::timer::{TimerOwner, TimerService, TimerToken, Timeout};

// ─── Configuration ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub cw_min: u32,
    pub cw_max: u32,
    pub slot: Duration,
    /// Inter-frame gap observed before counting slots.
    pub aifs: Duration,
    /// Seed for the counter draws.
    pub seed: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            cw_min: 15,
            cw_max: 1023,
            slot: Duration::from_micros(9),
            aifs: Duration::from_micros(34),
            seed: 0,
        }
    }
}

/// Contention window for the `attempt`-th transmission of a frame:
/// `min(cw_max, 2^(attempt-1) * (cw_min + 1) - 1)`.
pub fn contention_window(attempt: u32, cw_min: u32, cw_max: u32) -> u32 {
    assert!(attempt >= 1, "attempt numbers start at 1");
    let mut cw = cw_min;
    for _ in 1..attempt {
        cw = cw.saturating_mul(2).saturating_add(1);
        if cw >= cw_max {
            return cw_max;
        }
    }
    cw.min(cw_max)
}

// ─── Stats ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackoffStats {
    /// Fresh counters drawn.
    pub draws: u64,
    /// Slots counted down.
    pub slots: u64,
    /// Countdowns interrupted by a busy channel.
    pub freezes: u64,
    /// Requests granted without waiting (post-backoff already done).
    pub immediate_grants: u64,
    /// Grants after counting down.
    pub expirations: u64,
}

// ─── Backoff ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPhase {
    /// AIFS timer running.
    Gap,
    /// Slot timer running.
    Counting,
    /// Channel busy, no timer.
    Frozen,
    /// Counter reached zero on an idle channel with nothing pending.
    Expired,
    /// Access granted; waiting for the medium to turn busy.
    Granted,
}

#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    phase: BackoffPhase,
    counter: u32,
    cw: u32,
    pending: bool,
    timeout: Timeout,
    rng: StdRng,
    stats: BackoffStats,
}

impl Backoff {
    /// Create the engine and start the initial gap, assuming an idle channel.
    pub fn new(config: BackoffConfig, timers: &mut dyn TimerService) -> Self {
        assert!(
            config.cw_min <= config.cw_max,
            "cw_min must not exceed cw_max"
        );
        let mut backoff = Backoff {
            phase: BackoffPhase::Gap,
            counter: 0,
            cw: config.cw_min,
            pending: false,
            timeout: Timeout::new(TimerOwner::Backoff),
            rng: StdRng::seed_from_u64(config.seed),
            stats: BackoffStats::default(),
            config,
        };
        backoff.start_gap(timers);
        backoff
    }

    fn start_gap(&mut self, timers: &mut dyn TimerService) {
        self.phase = BackoffPhase::Gap;
        self.timeout.set(timers, self.config.aifs);
    }

    pub fn on_channel_busy(&mut self, timers: &mut dyn TimerService) {
        if matches!(self.phase, BackoffPhase::Gap | BackoffPhase::Counting) {
            self.stats.freezes += 1;
            tracing::trace!(counter = self.counter, "backoff frozen");
        }
        self.timeout.cancel(timers);
        self.phase = BackoffPhase::Frozen;
    }

    /// Restart the gap from zero. Slots are counted only once it has
    /// fully elapsed.
    pub fn on_channel_idle(&mut self, timers: &mut dyn TimerService) {
        self.start_gap(timers);
    }

    /// Request channel access for the `attempt`-th transmission of a frame.
    ///
    /// Returns `true` when access is granted immediately (the countdown
    /// already finished on an idle channel). Otherwise the grant is
    /// reported later by [`Backoff::on_timer`].
    ///
    /// # Panics
    ///
    /// If a request is already pending or `attempt` is zero.
    pub fn transmission_request(&mut self, attempt: u32) -> bool {
        assert!(!self.pending, "a transmission is already pending");
        self.cw = contention_window(attempt, self.config.cw_min, self.config.cw_max);
        tracing::debug!(attempt, cw = self.cw, phase = ?self.phase, "transmission request");

        if self.phase == BackoffPhase::Expired {
            self.phase = BackoffPhase::Granted;
            self.stats.immediate_grants += 1;
            return true;
        }
        self.pending = true;
        false
    }

    /// Handle an expiry. Returns `true` when the pending transmission may
    /// start now.
    pub fn on_timer(&mut self, token: TimerToken, timers: &mut dyn TimerService) -> bool {
        if !self.timeout.accept(token) {
            return false;
        }

        match self.phase {
            BackoffPhase::Gap => {
                if self.counter == 0 {
                    if !self.pending {
                        // no retransmission outstanding
                        self.cw = self.config.cw_min;
                    }
                    self.counter = self.draw();
                }
            }
            BackoffPhase::Counting => {
                self.counter -= 1;
                self.stats.slots += 1;
            }
            phase => panic!("backoff timer fired in phase {phase:?}"),
        }

        if self.counter > 0 {
            self.phase = BackoffPhase::Counting;
            self.timeout.set(timers, self.config.slot);
            return false;
        }

        if self.pending {
            self.pending = false;
            self.phase = BackoffPhase::Granted;
            self.stats.expirations += 1;
            tracing::trace!(cw = self.cw, "backoff expired");
            true
        } else {
            self.phase = BackoffPhase::Expired;
            false
        }
    }

    /// Uniform draw from `[0, cw]`.
    fn draw(&mut self) -> u32 {
        let u = self.rng.random::<f64>();
        let mut counter = (u * f64::from(self.cw + 1)) as u32;
        if counter > self.cw {
            // u rounded up to exactly 1.0
            counter -= 1;
        }
        self.stats.draws += 1;
        tracing::trace!(counter, cw = self.cw, "backoff counter drawn");
        counter
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn cw(&self) -> u32 {
        self.cw
    }

    pub fn phase(&self) -> BackoffPhase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_expired(&self) -> bool {
        self.phase == BackoffPhase::Expired
    }

    pub fn stats(&self) -> &BackoffStats {
        &self.stats
    }
}
