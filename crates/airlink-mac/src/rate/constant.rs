//! Fixed-mode strategy.

use super::{LinkFeedback, RateStrategy};
use crate::phy_mode::PhyMode;

#[derive(Debug)]
pub struct Constant {
    name: &'static str,
    mode: PhyMode,
}

impl Constant {
    pub fn new(name: &'static str, mode: PhyMode) -> Self {
        Constant { name, mode }
    }
}

impl RateStrategy for Constant {
    fn name(&self) -> &'static str {
        self.name
    }

    fn phy_mode(&self, _attempt: u32, _feedback: &LinkFeedback) -> PhyMode {
        self.mode
    }

    fn set_current_phy_mode(&mut self, pm: PhyMode, _feedback: &LinkFeedback) {
        debug_assert_eq!(pm, self.mode, "constant strategy asked to switch mode");
    }

    fn current_phy_mode(&self) -> PhyMode {
        self.mode
    }
}
