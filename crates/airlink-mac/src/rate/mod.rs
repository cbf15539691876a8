//! # Rate Adaptation
//!
//! Chooses the [`PhyMode`] for every transmission attempt, per peer.
//!
//! Strategies implement [`RateStrategy`] and are selected by name through
//! [`StrategyKind`]. They are pure with respect to mode selection: all
//! inputs arrive in a [`LinkFeedback`] snapshot, so repeated calls with the
//! same snapshot return the same mode. State changes only in
//! [`RateStrategy::set_current_phy_mode`], when the station reports which
//! mode it actually used.
//!
//! [`RateAdaptation`] owns one lazily created strategy per peer together
//! with the PER and SINR information bases that feed the snapshots.
//!
//! ## Strategies
//!
//! - [`arf`]: loss-count stepping with probe frames and an adaptive success
//!   threshold (single stream, or over a MIMO throughput ladder)
//! - [`per`]: PER thresholds with hysteresis
//! - [`sinr`]: direct SINR-to-MCS mapping, with a MIMO stream search
//! - [`opportunistic`]: PER thresholds, stepping down per retry while the
//!   PER is unknown
//! - [`constant`]: fixed mode

pub mod arf;
pub mod constant;
pub mod opportunistic;
pub mod per;
pub mod per_info;
pub mod sinr;
pub mod sinr_info;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::PeerAddress;
use crate::peer_table::PeerTable;
use crate::phy_mode::{PhyMode, RateTable};

pub use arf::{Arf, ArfConfig};
pub use constant::Constant;
pub use opportunistic::Opportunistic;
pub use per::{PerThreshold, PerThresholds};
pub use per_info::PerInformationBase;
pub use sinr::{post_sinr_factor_db, Sinr, SinrMimo};
pub use sinr_info::SinrInformationBase;

// ─── Strategy Interface ──────────────────────────────────────────────────────

/// Everything a strategy may look at when picking a mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkFeedback {
    pub now: Duration,
    /// Windowed PER, `None` until enough samples exist.
    pub per: Option<f64>,
    /// Successes since the last failure or mode change.
    pub successes: u32,
    /// Latest SINR the peer reported for our frames.
    pub peer_sinr_db: Option<f64>,
    pub local_antennas: u8,
    pub peer_antennas: u8,
}

impl LinkFeedback {
    /// Snapshot with no history, single antennas.
    pub fn empty(now: Duration) -> Self {
        LinkFeedback {
            now,
            per: None,
            successes: 0,
            peer_sinr_db: None,
            local_antennas: 1,
            peer_antennas: 1,
        }
    }

    /// Spatial streams usable towards the peer.
    pub fn max_streams(&self) -> u8 {
        self.local_antennas.min(self.peer_antennas).max(1)
    }
}

pub trait RateStrategy: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// Mode for the `attempt`-th transmission of the next frame.
    fn phy_mode(&self, attempt: u32, feedback: &LinkFeedback) -> PhyMode;

    /// Mode for the `attempt`-th transmission given a link-quality sample.
    fn phy_mode_with_quality(&self, attempt: u32, _sinr_db: f64, feedback: &LinkFeedback) -> PhyMode {
        self.phy_mode(attempt, feedback)
    }

    /// The mode actually used for the latest attempt.
    fn set_current_phy_mode(&mut self, pm: PhyMode, feedback: &LinkFeedback);

    fn current_phy_mode(&self) -> PhyMode;
}

// ─── Mode Stepping ───────────────────────────────────────────────────────────

/// How threshold strategies move one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stepping {
    /// Along the MCS list, keeping the stream count.
    Mcs,
    /// Along the MCS list; at the ends, trade MCS steps for a stream.
    Streams {
        /// MCS steps up after shedding a stream at the lowest MCS.
        increase_on_stream_decrease: u32,
        /// MCS steps down after adding a stream at the highest MCS.
        decrease_on_stream_increase: u32,
    },
}

impl Stepping {
    pub fn down(&self, table: &RateTable, pm: PhyMode) -> PhyMode {
        match *self {
            Stepping::Streams {
                increase_on_stream_decrease,
                ..
            } if table.is_lowest(&pm) && pm.spatial_streams() > 1 => {
                let mut next = pm.with_spatial_streams(pm.spatial_streams() - 1);
                for _ in 0..increase_on_stream_decrease {
                    next = table.step_up(&next);
                }
                next
            }
            _ => table.step_down(&pm),
        }
    }

    pub fn up(&self, table: &RateTable, pm: PhyMode, max_streams: u8) -> PhyMode {
        match *self {
            Stepping::Streams {
                decrease_on_stream_increase,
                ..
            } if table.is_highest(&pm) && pm.spatial_streams() < max_streams => {
                let mut next = pm.with_spatial_streams(pm.spatial_streams() + 1);
                for _ in 0..decrease_on_stream_increase {
                    next = table.step_down(&next);
                }
                next
            }
            _ => table.step_up(&pm),
        }
    }
}

// ─── Factory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StrategyKind {
    Arf,
    Per,
    Sinr,
    Opportunistic,
    Constant,
    ConstantLow,
    SinrWithMimo,
    PerWithMimo,
    ArfWithMimo,
    OpportunisticWithMimo,
}

impl StrategyKind {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        Ok(match name {
            "ARF" => StrategyKind::Arf,
            "PER" => StrategyKind::Per,
            "SINR" => StrategyKind::Sinr,
            "Opportunistic" => StrategyKind::Opportunistic,
            "Constant" => StrategyKind::Constant,
            "ConstantLow" => StrategyKind::ConstantLow,
            "SINRwithMIMO" => StrategyKind::SinrWithMimo,
            "PERwithMIMO" => StrategyKind::PerWithMimo,
            "ARFwithMIMO" => StrategyKind::ArfWithMimo,
            "OpportunisticwithMIMO" => StrategyKind::OpportunisticWithMimo,
            other => return Err(ConfigError::UnknownStrategy(other.to_string())),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            StrategyKind::Arf => "ARF",
            StrategyKind::Per => "PER",
            StrategyKind::Sinr => "SINR",
            StrategyKind::Opportunistic => "Opportunistic",
            StrategyKind::Constant => "Constant",
            StrategyKind::ConstantLow => "ConstantLow",
            StrategyKind::SinrWithMimo => "SINRwithMIMO",
            StrategyKind::PerWithMimo => "PERwithMIMO",
            StrategyKind::ArfWithMimo => "ARFwithMIMO",
            StrategyKind::OpportunisticWithMimo => "OpportunisticwithMIMO",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateConfig {
    pub strategy: StrategyKind,
    /// Table index of the mode used before any feedback exists.
    pub initial_mcs: usize,
    /// Table index used by the `Constant` strategy.
    pub constant_mcs: usize,
    pub thresholds: PerThresholds,
    pub arf: ArfConfig,
    /// Quality margin given up per retransmission, in dB.
    pub retransmission_lqm_reduction_db: f64,
    pub increase_on_stream_decrease: u32,
    pub decrease_on_stream_increase: u32,
    /// Correlation between MIMO sub-channels, `0.0..1.0`.
    pub mimo_correlation: f64,
    pub local_antennas: u8,
    pub per_window: Duration,
    pub per_min_samples: usize,
    pub sinr_window: Duration,
}

impl Default for RateConfig {
    fn default() -> Self {
        RateConfig {
            strategy: StrategyKind::Opportunistic,
            initial_mcs: 0,
            constant_mcs: 0,
            thresholds: PerThresholds::default(),
            arf: ArfConfig::default(),
            retransmission_lqm_reduction_db: 3.0,
            increase_on_stream_decrease: 3,
            decrease_on_stream_increase: 3,
            mimo_correlation: 0.0,
            local_antennas: 1,
            per_window: Duration::from_secs(1),
            per_min_samples: 10,
            sinr_window: Duration::from_secs(1),
        }
    }
}

impl RateConfig {
    fn mimo_stepping(&self) -> Stepping {
        Stepping::Streams {
            increase_on_stream_decrease: self.increase_on_stream_decrease,
            decrease_on_stream_increase: self.decrease_on_stream_increase,
        }
    }
}

/// Build the configured strategy for a peer reachable over at most
/// `max_streams` spatial streams.
pub fn create_strategy(
    config: &RateConfig,
    table: &Arc<RateTable>,
    max_streams: u8,
) -> Box<dyn RateStrategy> {
    let initial = table.phy_mode(config.initial_mcs.min(table.len() - 1), 1);
    match config.strategy {
        StrategyKind::Constant => Box::new(Constant::new(
            "Constant",
            table.phy_mode(config.constant_mcs.min(table.len() - 1), 1),
        )),
        StrategyKind::ConstantLow => Box::new(Constant::new("ConstantLow", table.lowest(1))),
        StrategyKind::Arf => Box::new(Arf::new("ARF", config.arf.clone(), table.throughput_ladder(1), initial)),
        StrategyKind::ArfWithMimo => Box::new(Arf::new(
            "ARFwithMIMO",
            config.arf.clone(),
            table.throughput_ladder(max_streams),
            initial,
        )),
        StrategyKind::Per => Box::new(PerThreshold::new(
            "PER",
            Arc::clone(table),
            config.thresholds,
            Stepping::Mcs,
            initial,
        )),
        StrategyKind::PerWithMimo => Box::new(PerThreshold::new(
            "PERwithMIMO",
            Arc::clone(table),
            config.thresholds,
            config.mimo_stepping(),
            initial,
        )),
        StrategyKind::Opportunistic => Box::new(Opportunistic::new(
            "Opportunistic",
            Arc::clone(table),
            config.thresholds,
            Stepping::Mcs,
            initial,
        )),
        StrategyKind::OpportunisticWithMimo => Box::new(Opportunistic::new(
            "OpportunisticwithMIMO",
            Arc::clone(table),
            config.thresholds,
            config.mimo_stepping(),
            initial,
        )),
        StrategyKind::Sinr => Box::new(Sinr::new(
            Arc::clone(table),
            config.retransmission_lqm_reduction_db,
            Arf::new("ARF", config.arf.clone(), table.throughput_ladder(1), initial),
        )),
        StrategyKind::SinrWithMimo => Box::new(SinrMimo::new(
            Arc::clone(table),
            config.retransmission_lqm_reduction_db,
            config.mimo_correlation,
            Opportunistic::new(
                "OpportunisticwithMIMO",
                Arc::clone(table),
                config.thresholds,
                config.mimo_stepping(),
                initial,
            ),
        )),
    }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PeerRateSnapshot {
    pub peer: PeerAddress,
    pub strategy: &'static str,
    pub phy_mode: String,
    pub mcs_index: Option<usize>,
    pub spatial_streams: u8,
    pub per: Option<f64>,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateStats {
    pub mode_changes: u64,
    pub peers: Vec<PeerRateSnapshot>,
}

#[derive(Debug)]
pub struct RateAdaptation {
    config: RateConfig,
    table: Arc<RateTable>,
    strategies: PeerTable<Box<dyn RateStrategy>>,
    peer_antennas: PeerTable<u8>,
    per: PerInformationBase,
    sinr: SinrInformationBase,
    mode_changes: u64,
}

impl RateAdaptation {
    pub fn new(config: RateConfig, table: Arc<RateTable>) -> Self {
        RateAdaptation {
            per: PerInformationBase::new(config.per_window, config.per_min_samples),
            sinr: SinrInformationBase::new(config.sinr_window),
            strategies: PeerTable::new(),
            peer_antennas: PeerTable::new(),
            mode_changes: 0,
            config,
            table,
        }
    }

    pub fn table(&self) -> &Arc<RateTable> {
        &self.table
    }

    /// Mode for control replies: the most robust single-stream entry.
    pub fn control_phy_mode(&self) -> PhyMode {
        self.table.lowest(1)
    }

    /// Antenna count learned for `peer` (beacons, association).
    pub fn set_peer_antennas(&mut self, peer: PeerAddress, antennas: u8) {
        *self.peer_antennas.get_or_insert_with(peer, || antennas) = antennas.max(1);
    }

    pub fn feedback(&self, peer: PeerAddress, now: Duration) -> LinkFeedback {
        LinkFeedback {
            now,
            per: self.per.per(peer, now),
            successes: self.per.consecutive_successes(peer),
            peer_sinr_db: self.sinr.peer_report(peer),
            local_antennas: self.config.local_antennas.max(1),
            peer_antennas: self.peer_antennas.get(peer).copied().unwrap_or(1),
        }
    }

    fn strategy(&mut self, peer: PeerAddress, max_streams: u8) -> &mut Box<dyn RateStrategy> {
        let (config, table) = (&self.config, &self.table);
        self.strategies.get_or_insert_with(peer, || {
            tracing::debug!(%peer, strategy = config.strategy.name(), max_streams, "rate adaptation for new peer");
            create_strategy(config, table, max_streams)
        })
    }

    /// Mode for the `attempt`-th transmission towards `peer`.
    pub fn phy_mode(&mut self, peer: PeerAddress, attempt: u32, now: Duration) -> PhyMode {
        let fb = self.feedback(peer, now);
        let strategy = self.strategy(peer, fb.max_streams());
        match fb.peer_sinr_db {
            Some(sinr) => strategy.phy_mode_with_quality(attempt, sinr, &fb),
            None => strategy.phy_mode(attempt, &fb),
        }
    }

    /// Report the mode actually used. A change resets the peer's PER window.
    pub fn set_current(&mut self, peer: PeerAddress, pm: PhyMode, now: Duration) {
        let fb = self.feedback(peer, now);
        let strategy = self.strategy(peer, fb.max_streams());
        let previous = strategy.current_phy_mode();
        strategy.set_current_phy_mode(pm, &fb);
        if previous != pm {
            self.mode_changes += 1;
            tracing::info!(%peer, from = %previous, to = %pm, per = ?fb.per, "phy mode changed");
            self.per.reset(peer);
        }
    }

    pub fn on_success(&mut self, peer: PeerAddress, now: Duration) {
        self.per.on_success(peer, now);
    }

    pub fn on_failure(&mut self, peer: PeerAddress, now: Duration) {
        self.per.on_failure(peer, now);
    }

    /// Quality `peer` reported for our frames.
    pub fn on_peer_report(&mut self, peer: PeerAddress, sinr_db: f64) {
        self.sinr.put_peer_report(peer, sinr_db);
    }

    /// Quality measured on a frame received from `peer`.
    pub fn on_measurement(&mut self, peer: PeerAddress, sinr_db: f64, now: Duration) {
        self.sinr.put_measurement(peer, sinr_db, now);
    }

    pub fn measured_sinr(&self, peer: PeerAddress, now: Duration) -> Option<f64> {
        self.sinr.average_measured(peer, now)
    }

    pub fn current(&self, peer: PeerAddress) -> Option<PhyMode> {
        self.strategies.get(peer).map(|s| s.current_phy_mode())
    }

    pub fn per(&self, peer: PeerAddress, now: Duration) -> Option<f64> {
        self.per.per(peer, now)
    }

    pub fn stats(&self, now: Duration) -> RateStats {
        let mut peers: Vec<PeerRateSnapshot> = self
            .strategies
            .iter()
            .map(|(peer, s)| {
                let pm = s.current_phy_mode();
                let (successes, failures) = self.per.totals(peer);
                PeerRateSnapshot {
                    peer,
                    strategy: s.name(),
                    phy_mode: pm.to_string(),
                    mcs_index: self.table.index_of(&pm),
                    spatial_streams: pm.spatial_streams(),
                    per: self.per.per(peer, now),
                    successes,
                    failures,
                }
            })
            .collect();
        peers.sort_by_key(|p| p.peer);
        RateStats {
            mode_changes: self.mode_changes,
            peers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PeerAddress = PeerAddress(2);

    fn manager(kind: StrategyKind) -> RateAdaptation {
        let cfg = RateConfig {
            strategy: kind,
            per_min_samples: 4,
            ..Default::default()
        };
        RateAdaptation::new(cfg, Arc::new(RateTable::ieee80211a()))
    }

    #[test]
    fn factory_accepts_every_name() {
        for name in [
            "ARF",
            "PER",
            "SINR",
            "Opportunistic",
            "Constant",
            "ConstantLow",
            "SINRwithMIMO",
            "PERwithMIMO",
            "ARFwithMIMO",
            "OpportunisticwithMIMO",
        ] {
            let kind = StrategyKind::from_name(name).unwrap();
            assert_eq!(kind.name(), name);
            let cfg = RateConfig {
                strategy: kind,
                ..Default::default()
            };
            let table = Arc::new(RateTable::ieee80211n());
            let s = create_strategy(&cfg, &table, 2);
            assert_eq!(s.current_phy_mode(), table.lowest(1));
        }
        assert!(matches!(
            StrategyKind::from_name("Minstrel"),
            Err(ConfigError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn mode_change_resets_per_window() {
        let mut ra = manager(StrategyKind::Per);
        let now = Duration::from_millis(5);
        for _ in 0..4 {
            ra.on_success(P, now);
        }
        assert_eq!(ra.per(P, now), Some(0.0));
        let up = ra.phy_mode(P, 1, now);
        assert_eq!(up, ra.table().phy_mode(1, 1));
        ra.set_current(P, up, now);
        assert_eq!(ra.per(P, now), None);
        assert_eq!(ra.stats(now).mode_changes, 1);
    }

    #[test]
    fn peer_report_routes_to_quality_path() {
        let mut ra = manager(StrategyKind::Sinr);
        let now = Duration::ZERO;
        assert_eq!(ra.phy_mode(P, 1, now), ra.table().lowest(1));
        ra.on_peer_report(P, 30.0);
        assert_eq!(ra.phy_mode(P, 1, now), ra.table().highest(1));
    }

    #[test]
    fn stepping_trades_mcs_for_streams() {
        let table = RateTable::ieee80211n();
        let stepping = Stepping::Streams {
            increase_on_stream_decrease: 3,
            decrease_on_stream_increase: 3,
        };
        let top1 = table.highest(1);
        let up = stepping.up(&table, top1, 2);
        assert_eq!(up, table.phy_mode(table.len() - 4, 2));
        assert_eq!(stepping.up(&table, top1, 1), top1);

        let low2 = table.lowest(2);
        assert_eq!(stepping.down(&table, low2), table.phy_mode(3, 1));
        assert_eq!(stepping.down(&table, table.lowest(1)), table.lowest(1));
    }
}
