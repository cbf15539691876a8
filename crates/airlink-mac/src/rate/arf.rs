//! Automatic Rate Fallback.
//!
//! Walks a ladder of modes sorted by throughput. After `success_threshold`
//! consecutive successes, or after staying down for `timer`, the next frame
//! goes out one rung higher as a probe. A failed probe, or two failed
//! attempts of any frame, steps back down.
//!
//! With `exponential_backoff` the threshold adapts: a failed probe doubles
//! it (up to `max_success_threshold`), an ordinary step down halves it
//! (never below `initial_success_threshold`).
//!
//! The single-stream variant uses the MCS list as its ladder; the MIMO
//! variant uses every (MCS, streams) pair, thinned to strictly increasing
//! bits per symbol.

use std::cmp::Ordering;
use std::time::Duration;

use super::{LinkFeedback, RateStrategy};
use crate::phy_mode::PhyMode;

#[derive(Debug, Clone)]
pub struct ArfConfig {
    pub initial_success_threshold: u32,
    pub max_success_threshold: u32,
    /// Time spent down after which a probe is sent regardless of successes.
    pub timer: Duration,
    pub exponential_backoff: bool,
}

impl Default for ArfConfig {
    fn default() -> Self {
        ArfConfig {
            initial_success_threshold: 10,
            max_success_threshold: 50,
            timer: Duration::from_millis(100),
            exponential_backoff: true,
        }
    }
}

#[derive(Debug)]
pub struct Arf {
    name: &'static str,
    config: ArfConfig,
    ladder: Vec<PhyMode>,
    current: usize,
    success_threshold: u32,
    probe: bool,
    stepped_down_at: Option<Duration>,
}

impl Arf {
    /// # Panics
    ///
    /// If `ladder` is empty.
    pub fn new(name: &'static str, config: ArfConfig, ladder: Vec<PhyMode>, initial: PhyMode) -> Self {
        assert!(!ladder.is_empty(), "ARF needs at least one mode");
        let mut arf = Arf {
            name,
            success_threshold: config.initial_success_threshold.max(1),
            config,
            ladder,
            current: 0,
            probe: false,
            stepped_down_at: None,
        };
        arf.current = arf.rung_of(&initial);
        arf
    }

    /// Exact rung of `pm`, or the highest rung not faster than it.
    fn rung_of(&self, pm: &PhyMode) -> usize {
        if let Some(i) = self.ladder.iter().position(|p| p == pm) {
            return i;
        }
        self.ladder
            .iter()
            .rposition(|p| p.throughput_cmp(pm) != Ordering::Greater)
            .unwrap_or(0)
    }

    fn up(&self) -> PhyMode {
        self.ladder[(self.current + 1).min(self.ladder.len() - 1)]
    }

    fn down(&self) -> PhyMode {
        self.ladder[self.current.saturating_sub(1)]
    }

    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }

    pub fn is_probing(&self) -> bool {
        self.probe
    }

    fn timer_expired(&self, now: Duration) -> bool {
        self.stepped_down_at
            .is_some_and(|at| now.saturating_sub(at) >= self.config.timer)
    }
}

impl RateStrategy for Arf {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phy_mode(&self, attempt: u32, feedback: &LinkFeedback) -> PhyMode {
        if (self.probe && attempt == 2) || attempt >= 3 {
            return self.down();
        }
        if feedback.successes >= self.success_threshold || self.timer_expired(feedback.now) {
            return self.up();
        }
        self.ladder[self.current]
    }

    fn set_current_phy_mode(&mut self, pm: PhyMode, feedback: &LinkFeedback) {
        let next = self.rung_of(&pm);
        match next.cmp(&self.current) {
            Ordering::Equal => {
                self.probe = false;
            }
            Ordering::Less => {
                self.current = next;
                if self.stepped_down_at.is_none() {
                    self.stepped_down_at = Some(feedback.now);
                }
                if self.probe {
                    self.probe = false;
                    if self.config.exponential_backoff
                        && self.success_threshold < self.config.max_success_threshold
                    {
                        self.success_threshold =
                            (self.success_threshold * 2).min(self.config.max_success_threshold);
                    }
                    tracing::debug!(strategy = self.name, to = %pm, threshold = self.success_threshold, "probe failed");
                } else if self.config.exponential_backoff {
                    self.success_threshold =
                        (self.success_threshold / 2).max(self.config.initial_success_threshold.max(1));
                }
            }
            Ordering::Greater => {
                self.current = next;
                self.probe = true;
                self.stepped_down_at = None;
            }
        }
    }

    fn current_phy_mode(&self) -> PhyMode {
        self.ladder[self.current]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy_mode::RateTable;

    fn arf(start: usize) -> (RateTable, Arf) {
        let table = RateTable::ieee80211a();
        let arf = Arf::new("ARF", ArfConfig::default(), table.throughput_ladder(1), table.phy_mode(start, 1));
        (table, arf)
    }

    fn fb(successes: u32, now_ms: u64) -> LinkFeedback {
        LinkFeedback {
            successes,
            ..LinkFeedback::empty(Duration::from_millis(now_ms))
        }
    }

    #[test]
    fn threshold_successes_trigger_probe() {
        let (table, mut arf) = arf(3);
        assert_eq!(arf.phy_mode(1, &fb(9, 0)), table.phy_mode(3, 1));
        let up = arf.phy_mode(1, &fb(10, 0));
        assert_eq!(up, table.phy_mode(4, 1));
        arf.set_current_phy_mode(up, &fb(10, 0));
        assert!(arf.is_probing());
        // the probe's retry goes back down
        assert_eq!(arf.phy_mode(2, &fb(0, 1)), table.phy_mode(3, 1));
    }

    #[test]
    fn failed_probe_doubles_threshold() {
        let (table, mut arf) = arf(3);
        arf.set_current_phy_mode(table.phy_mode(4, 1), &fb(10, 0));
        let down = arf.phy_mode(2, &fb(0, 1));
        arf.set_current_phy_mode(down, &fb(0, 1));
        assert_eq!(arf.success_threshold(), 20);
        assert!(!arf.is_probing());
    }

    #[test]
    fn ordinary_failure_halves_down_to_initial() {
        let (table, mut arf) = arf(4);
        // two failed probes push the threshold to 40
        for t in 0..2 {
            arf.set_current_phy_mode(table.phy_mode(5, 1), &fb(0, t));
            arf.set_current_phy_mode(table.phy_mode(4, 1), &fb(0, t));
        }
        assert_eq!(arf.success_threshold(), 40);
        arf.set_current_phy_mode(table.phy_mode(3, 1), &fb(0, 5));
        assert_eq!(arf.success_threshold(), 20);
        arf.set_current_phy_mode(table.phy_mode(2, 1), &fb(0, 6));
        arf.set_current_phy_mode(table.phy_mode(1, 1), &fb(0, 7));
        assert_eq!(arf.success_threshold(), 10);
    }

    #[test]
    fn third_attempt_always_steps_down() {
        let (table, arf) = arf(3);
        assert_eq!(arf.phy_mode(2, &fb(0, 0)), table.phy_mode(3, 1));
        assert_eq!(arf.phy_mode(3, &fb(0, 0)), table.phy_mode(2, 1));
    }

    #[test]
    fn timer_probes_after_staying_down() {
        let (table, mut arf) = arf(3);
        arf.set_current_phy_mode(table.phy_mode(2, 1), &fb(0, 0));
        assert_eq!(arf.phy_mode(1, &fb(0, 99)), table.phy_mode(2, 1));
        assert_eq!(arf.phy_mode(1, &fb(0, 100)), table.phy_mode(3, 1));
    }

    #[test]
    fn mimo_ladder_crosses_stream_counts() {
        let table = RateTable::ieee80211n();
        let ladder = table.throughput_ladder(2);
        let top = *ladder.last().unwrap();
        assert_eq!(top, table.highest(2));
        let mut arf = Arf::new("ARFwithMIMO", ArfConfig::default(), ladder, table.highest(1));
        let up = arf.phy_mode(1, &fb(10, 0));
        assert_eq!(up.spatial_streams(), 2);
        arf.set_current_phy_mode(up, &fb(10, 0));
        assert_eq!(arf.current_phy_mode(), up);
    }
}
