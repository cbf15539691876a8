//! Property-based tests for the backoff engine.
//!
//! Random interleavings of channel busy/idle notifications, timer expiries
//! and transmission requests must never let the counter move on a busy
//! channel, and the contention window must always follow the exponential
//! formula for the latest requested attempt.

use proptest::prelude::*;
use std::time::Duration;

use airlink_mac::backoff::{contention_window, Backoff, BackoffConfig, BackoffPhase};
use airlink_mac::timer::{ManualTimers, TimerOwner};

// ─── Strategies ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Busy,
    Idle,
    Fire,
    Request(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Busy),
        2 => Just(Op::Idle),
        6 => Just(Op::Fire),
        1 => (1u32..9).prop_map(Op::Request),
    ]
}

fn window_bounds() -> impl Strategy<Value = (u32, u32)> {
    prop_oneof![
        Just((15u32, 1023u32)),
        Just((7, 255)),
        Just((0, 0)),
        (0u32..64).prop_flat_map(|min| (Just(min), min..4096)),
    ]
}

// ─── Contention Window ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn contention_window_matches_formula((cw_min, cw_max) in window_bounds(), attempt in 1u32..24) {
        let expected = (u64::from(cw_min + 1) << (attempt - 1)) - 1;
        let expected = expected.min(u64::from(cw_max)) as u32;
        prop_assert_eq!(contention_window(attempt, cw_min, cw_max), expected);
    }

    #[test]
    fn contention_window_is_monotone((cw_min, cw_max) in window_bounds(), attempt in 1u32..40) {
        let cw = contention_window(attempt, cw_min, cw_max);
        let next = contention_window(attempt + 1, cw_min, cw_max);
        prop_assert!(next >= cw);
        prop_assert!(next <= cw_max);
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn counter_frozen_while_busy(seed in any::<u64>(), ops in prop::collection::vec(op(), 1..200)) {
        let config = BackoffConfig {
            seed,
            ..BackoffConfig::default()
        };
        let (cw_min, cw_max) = (config.cw_min, config.cw_max);
        let mut timers = ManualTimers::new();
        let mut backoff = Backoff::new(config, &mut timers);
        let mut busy = false;

        for op in ops {
            let before = backoff.counter();
            match op {
                Op::Busy => {
                    backoff.on_channel_busy(&mut timers);
                    busy = true;
                }
                Op::Idle => {
                    backoff.on_channel_idle(&mut timers);
                    busy = false;
                }
                Op::Fire => {
                    if let Some(token) = timers.fire(TimerOwner::Backoff) {
                        prop_assert!(!busy, "timer armed on a busy channel");
                        backoff.on_timer(token, &mut timers);
                    }
                }
                Op::Request(attempt) => {
                    if !backoff.is_pending() {
                        backoff.transmission_request(attempt);
                        prop_assert_eq!(backoff.cw(), contention_window(attempt, cw_min, cw_max));
                    }
                }
            }

            if busy {
                prop_assert_eq!(backoff.phase(), BackoffPhase::Frozen);
                prop_assert!(!timers.is_armed(TimerOwner::Backoff));
                prop_assert_eq!(backoff.counter(), before);
            }
            prop_assert!(backoff.counter() <= backoff.cw());
            timers.advance(Duration::from_micros(1));
        }
    }

    #[test]
    fn pending_request_is_eventually_granted(seed in any::<u64>(), attempt in 1u32..8) {
        let config = BackoffConfig {
            seed,
            ..BackoffConfig::default()
        };
        let mut timers = ManualTimers::new();
        let mut backoff = Backoff::new(config, &mut timers);
        let mut granted = backoff.transmission_request(attempt);

        // one AIFS plus at most cw slots
        let budget = contention_window(attempt, 15, 1023) + 2;
        for _ in 0..budget {
            if granted {
                break;
            }
            let token = timers.fire(TimerOwner::Backoff);
            prop_assert!(token.is_some());
            if let Some(token) = token {
                granted = backoff.on_timer(token, &mut timers);
            }
        }
        prop_assert!(granted);
        prop_assert_eq!(backoff.phase(), BackoffPhase::Granted);
    }
}
