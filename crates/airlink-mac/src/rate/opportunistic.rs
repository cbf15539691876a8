//! Opportunistic strategy: PER thresholds once the PER is known, otherwise
//! one step down per retransmission from the last used mode.

use std::sync::Arc;

use super::{LinkFeedback, PerThresholds, RateStrategy, Stepping};
use crate::phy_mode::{PhyMode, RateTable};

#[derive(Debug)]
pub struct Opportunistic {
    name: &'static str,
    table: Arc<RateTable>,
    thresholds: PerThresholds,
    stepping: Stepping,
    current: PhyMode,
}

impl Opportunistic {
    pub fn new(
        name: &'static str,
        table: Arc<RateTable>,
        thresholds: PerThresholds,
        stepping: Stepping,
        initial: PhyMode,
    ) -> Self {
        Opportunistic {
            name,
            table,
            thresholds,
            stepping,
            current: initial,
        }
    }

    fn fallback(&self, attempt: u32) -> PhyMode {
        let mut pm = self.current;
        for _ in 1..attempt {
            if self.table.is_lowest(&pm) && pm.spatial_streams() == 1 {
                break;
            }
            pm = self.stepping.down(&self.table, pm);
        }
        pm
    }
}

impl RateStrategy for Opportunistic {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phy_mode(&self, attempt: u32, feedback: &LinkFeedback) -> PhyMode {
        match feedback.per {
            Some(per) => self.thresholds.decide(
                per,
                self.current,
                &self.table,
                self.stepping,
                feedback.max_streams(),
            ),
            None => self.fallback(attempt),
        }
    }

    fn set_current_phy_mode(&mut self, pm: PhyMode, _feedback: &LinkFeedback) {
        self.current = pm;
    }

    fn current_phy_mode(&self) -> PhyMode {
        self.current
    }
}
