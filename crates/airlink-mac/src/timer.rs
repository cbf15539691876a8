//! # Timers
//!
//! The only suspension primitive the MAC engines use: "arm a timer for
//! duration D, resume on expiry or explicit cancellation". The scheduler is
//! injected as a [`TimerService`]; engines never own a clock.
//!
//! Each engine keeps a [`Timeout`] per logical timer. Arming bumps a
//! generation counter that is baked into the [`TimerToken`], so an expiry
//! delivered for an older arming is recognised and ignored even if the
//! scheduler could not remove it.

use std::time::Duration;

// ─── Tokens ──────────────────────────────────────────────────────────────────

/// Which engine a timer belongs to. A station owns at most one live timer
/// per owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerOwner {
    Backoff,
    AckTimeout,
    BlockAckTimeout,
    Aggregation,
    FrameSync,
    /// Deferred control-frame reply.
    Sifs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken {
    pub owner: TimerOwner,
    pub generation: u64,
}

/// Scheduler capability handed to every engine call that may arm or cancel
/// a timer.
pub trait TimerService {
    /// Current simulated time.
    fn now(&self) -> Duration;
    /// Fire `token` after `after` has elapsed.
    fn schedule(&mut self, token: TimerToken, after: Duration);
    /// Forget `token`. Cancelling an unknown or already fired token is a no-op.
    fn cancel(&mut self, token: TimerToken);
}

// ─── Timeout ─────────────────────────────────────────────────────────────────

/// A single re-armable timer slot.
#[derive(Debug, Clone)]
pub struct Timeout {
    owner: TimerOwner,
    generation: u64,
    armed: bool,
}

impl Timeout {
    pub fn new(owner: TimerOwner) -> Self {
        Self {
            owner,
            generation: 0,
            armed: false,
        }
    }

    fn token(&self) -> TimerToken {
        TimerToken {
            owner: self.owner,
            generation: self.generation,
        }
    }

    /// Arm (or re-arm) the timer. A previous arming is cancelled first.
    pub fn set(&mut self, timers: &mut dyn TimerService, after: Duration) {
        if self.armed {
            timers.cancel(self.token());
        }
        self.generation += 1;
        self.armed = true;
        timers.schedule(self.token(), after);
    }

    /// Idempotent.
    pub fn cancel(&mut self, timers: &mut dyn TimerService) {
        if self.armed {
            timers.cancel(self.token());
            self.armed = false;
        }
    }

    pub fn is_set(&self) -> bool {
        self.armed
    }

    /// Consume an expiry. Returns `true` only for the live arming of this
    /// timer; stale or foreign tokens return `false`.
    pub fn accept(&mut self, token: TimerToken) -> bool {
        if self.armed && token == self.token() {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

// ─── ManualTimers ────────────────────────────────────────────────────────────

/// Fake clock for driving engines by hand: records armed timers and lets the
/// caller fire them in deadline order.
#[derive(Debug, Default)]
pub struct ManualTimers {
    now: Duration,
    armed: Vec<(Duration, TimerToken)>,
    pub cancelled: usize,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward without firing anything.
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Deadline of the live timer for `owner`, if any.
    pub fn deadline(&self, owner: TimerOwner) -> Option<Duration> {
        self.armed
            .iter()
            .find(|(_, t)| t.owner == owner)
            .map(|(at, _)| *at)
    }

    pub fn is_armed(&self, owner: TimerOwner) -> bool {
        self.deadline(owner).is_some()
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Remove the earliest timer, jump the clock to its deadline and return
    /// its token.
    pub fn fire_next(&mut self) -> Option<TimerToken> {
        let idx = self
            .armed
            .iter()
            .enumerate()
            .min_by_key(|(_, (at, _))| *at)
            .map(|(i, _)| i)?;
        let (at, token) = self.armed.remove(idx);
        self.now = self.now.max(at);
        Some(token)
    }

    /// Fire the live timer of `owner`, if armed.
    pub fn fire(&mut self, owner: TimerOwner) -> Option<TimerToken> {
        let idx = self.armed.iter().position(|(_, t)| t.owner == owner)?;
        let (at, token) = self.armed.remove(idx);
        self.now = self.now.max(at);
        Some(token)
    }
}

impl TimerService for ManualTimers {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, token: TimerToken, after: Duration) {
        self.armed.push((self.now + after, token));
    }

    fn cancel(&mut self, token: TimerToken) {
        let before = self.armed.len();
        self.armed.retain(|(_, t)| *t != token);
        self.cancelled += before - self.armed.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearm_invalidates_previous_token() {
        let mut timers = ManualTimers::new();
        let mut t = Timeout::new(TimerOwner::AckTimeout);
        t.set(&mut timers, Duration::from_micros(10));
        let stale = TimerToken {
            owner: TimerOwner::AckTimeout,
            generation: 1,
        };
        t.set(&mut timers, Duration::from_micros(20));

        assert_eq!(timers.armed_count(), 1);
        assert!(!t.accept(stale));
        let live = timers.fire_next().unwrap();
        assert!(t.accept(live));
        assert!(!t.is_set());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut timers = ManualTimers::new();
        let mut t = Timeout::new(TimerOwner::Backoff);
        t.set(&mut timers, Duration::from_micros(5));
        let token = TimerToken {
            owner: TimerOwner::Backoff,
            generation: 1,
        };
        t.cancel(&mut timers);
        t.cancel(&mut timers);
        assert_eq!(timers.cancelled, 1);
        assert!(!t.accept(token));
    }

    #[test]
    fn fire_next_follows_deadlines() {
        let mut timers = ManualTimers::new();
        let mut a = Timeout::new(TimerOwner::Aggregation);
        let mut b = Timeout::new(TimerOwner::Sifs);
        a.set(&mut timers, Duration::from_micros(30));
        b.set(&mut timers, Duration::from_micros(10));

        assert_eq!(timers.fire_next().unwrap().owner, TimerOwner::Sifs);
        assert_eq!(timers.now(), Duration::from_micros(10));
        assert_eq!(timers.fire_next().unwrap().owner, TimerOwner::Aggregation);
        assert_eq!(timers.now(), Duration::from_micros(30));
    }
}
