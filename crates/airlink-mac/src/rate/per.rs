//! PER-threshold strategy with a hysteresis band.

use std::sync::Arc;

use super::{LinkFeedback, RateStrategy, Stepping};
use crate::phy_mode::{PhyMode, RateTable};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerThresholds {
    /// Step down when the PER exceeds this.
    pub down: f64,
    /// Step up when the PER falls below this.
    pub up: f64,
}

impl Default for PerThresholds {
    fn default() -> Self {
        PerThresholds { down: 0.25, up: 0.05 }
    }
}

impl PerThresholds {
    /// Apply the thresholds to `current`; inside the band the mode holds.
    pub(crate) fn decide(
        &self,
        per: f64,
        current: PhyMode,
        table: &RateTable,
        stepping: Stepping,
        max_streams: u8,
    ) -> PhyMode {
        if per > self.down {
            stepping.down(table, current)
        } else if per < self.up {
            stepping.up(table, current, max_streams)
        } else {
            current
        }
    }
}

#[derive(Debug)]
pub struct PerThreshold {
    name: &'static str,
    table: Arc<RateTable>,
    thresholds: PerThresholds,
    stepping: Stepping,
    current: PhyMode,
}

impl PerThreshold {
    pub fn new(
        name: &'static str,
        table: Arc<RateTable>,
        thresholds: PerThresholds,
        stepping: Stepping,
        initial: PhyMode,
    ) -> Self {
        PerThreshold {
            name,
            table,
            thresholds,
            stepping,
            current: initial,
        }
    }
}

impl RateStrategy for PerThreshold {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phy_mode(&self, _attempt: u32, feedback: &LinkFeedback) -> PhyMode {
        match feedback.per {
            Some(per) => self.thresholds.decide(
                per,
                self.current,
                &self.table,
                self.stepping,
                feedback.max_streams(),
            ),
            None => self.current,
        }
    }

    fn set_current_phy_mode(&mut self, pm: PhyMode, _feedback: &LinkFeedback) {
        self.current = pm;
    }

    fn current_phy_mode(&self) -> PhyMode {
        self.current
    }
}
