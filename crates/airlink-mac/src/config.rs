//! TOML configuration for a whole MAC instance.
//!
//! Follows an input/resolve split: [`MacConfigInput`] mirrors the file with
//! every field optional, [`MacConfigInput::resolve`] validates it and fills
//! in defaults to produce a typed [`MacConfig`].
//!
//! ```toml
//! reliability = "block_ack"
//! rate_table = "ieee80211n"
//! antennas = 2
//!
//! [backoff]
//! cw_min = 15
//! cw_max = 1023
//!
//! [aggregation]
//! enabled = true
//! max_delay_ms = 5
//!
//! [rate]
//! strategy = "SINRwithMIMO"
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::airtime::Airtime;
use crate::aggregation::AggregationConfig;
use crate::backoff::BackoffConfig;
use crate::block_ack::{BlockAckConfig, TransmissionQueueConfig};
use crate::error::ConfigError;
use crate::frame_sync::FrameSyncConfig;
use crate::phy_mode::RateTable;
use crate::rate::{ArfConfig, PerThresholds, RateConfig, StrategyKind};
use crate::stop_and_wait::StopAndWaitConfig;

/// Spatial streams the HT table is defined for.
pub const MAX_ANTENNAS: u8 = 4;

// ─── Input ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MacConfigInput {
    /// `"stop_and_wait"` or `"block_ack"`.
    pub reliability: Option<String>,
    /// `"ieee80211a"` or `"ieee80211n"`.
    pub rate_table: Option<String>,
    pub antennas: Option<u8>,
    pub sifs_us: Option<u64>,
    pub backoff: BackoffInput,
    pub stop_and_wait: StopAndWaitInput,
    pub block_ack: BlockAckInput,
    pub aggregation: AggregationInput,
    pub rate: RateInput,
    pub frame_sync: FrameSyncInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackoffInput {
    pub cw_min: Option<u32>,
    pub cw_max: Option<u32>,
    pub slot_us: Option<u64>,
    pub aifs_us: Option<u64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StopAndWaitInput {
    pub short_retry_limit: Option<u32>,
    pub long_retry_limit: Option<u32>,
    pub rts_threshold_bytes: Option<usize>,
    pub processing_margin_us: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlockAckInput {
    pub capacity: Option<usize>,
    pub max_on_air: Option<usize>,
    pub max_transmissions: Option<u32>,
    pub impatient: Option<bool>,
    pub processing_margin_us: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AggregationInput {
    pub enabled: bool,
    pub max_entries: Option<usize>,
    pub max_delay_ms: Option<u64>,
    pub max_size_bytes: Option<u32>,
    pub impatient: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateInput {
    pub strategy: Option<String>,
    pub initial_mcs: Option<usize>,
    pub constant_mcs: Option<usize>,
    pub per_for_going_down: Option<f64>,
    pub per_for_going_up: Option<f64>,
    pub arf_initial_success_threshold: Option<u32>,
    pub arf_max_success_threshold: Option<u32>,
    pub arf_timer_ms: Option<u64>,
    pub arf_exponential_backoff: Option<bool>,
    pub retransmission_lqm_reduction_db: Option<f64>,
    pub phy_mode_increase_on_antenna_decrease: Option<u32>,
    pub phy_mode_decrease_on_antenna_increase: Option<u32>,
    pub mimo_correlation: Option<f64>,
    pub per_window_ms: Option<u64>,
    pub per_min_samples: Option<usize>,
    pub sinr_window_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrameSyncInput {
    pub idle_capture_db: Option<f64>,
    pub slc_capture_db: Option<f64>,
    pub slg_capture_db: Option<f64>,
    pub detection_threshold_db: Option<f64>,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTableKind {
    Ieee80211a,
    Ieee80211n,
}

impl RateTableKind {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "ieee80211a" => Ok(RateTableKind::Ieee80211a),
            "ieee80211n" => Ok(RateTableKind::Ieee80211n),
            other => Err(ConfigError::UnknownRateTable(other.to_string())),
        }
    }

    pub fn table(self) -> RateTable {
        match self {
            RateTableKind::Ieee80211a => RateTable::ieee80211a(),
            RateTableKind::Ieee80211n => RateTable::ieee80211n(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReliabilityConfig {
    StopAndWait(StopAndWaitConfig),
    BlockAck(BlockAckConfig),
}

#[derive(Debug, Clone)]
pub struct MacConfig {
    pub reliability: ReliabilityConfig,
    pub rate_table: Arc<RateTable>,
    pub airtime: Airtime,
    pub sifs: Duration,
    pub backoff: BackoffConfig,
    /// Present only together with Block-Ack.
    pub aggregation: Option<AggregationConfig>,
    pub rate: RateConfig,
    pub frame_sync: FrameSyncConfig,
}

impl Default for MacConfig {
    fn default() -> Self {
        MacConfig {
            reliability: ReliabilityConfig::StopAndWait(StopAndWaitConfig::default()),
            rate_table: Arc::new(RateTable::ieee80211a()),
            airtime: Airtime::default(),
            sifs: Duration::from_micros(16),
            backoff: BackoffConfig::default(),
            aggregation: None,
            rate: RateConfig::default(),
            frame_sync: FrameSyncConfig::default(),
        }
    }
}

fn us(v: Option<u64>, default: Duration) -> Duration {
    v.map_or(default, Duration::from_micros)
}

fn ms(v: Option<u64>, default: Duration) -> Duration {
    v.map_or(default, Duration::from_millis)
}

impl MacConfigInput {
    pub fn resolve(self) -> Result<MacConfig, ConfigError> {
        let airtime = Airtime::default();
        let sifs = us(self.sifs_us, airtime.sifs());

        let table_kind = RateTableKind::from_name(self.rate_table.as_deref().unwrap_or("ieee80211a"))?;
        let rate_table = Arc::new(table_kind.table());

        let antennas = self.antennas.unwrap_or(1);
        if antennas == 0 || antennas > MAX_ANTENNAS {
            return Err(ConfigError::invalid(
                "antennas",
                format!("{antennas} outside 1..={MAX_ANTENNAS}"),
            ));
        }

        let backoff = resolve_backoff(self.backoff)?;

        let reliability = match self.reliability.as_deref().unwrap_or("stop_and_wait") {
            "stop_and_wait" => ReliabilityConfig::StopAndWait(resolve_stop_and_wait(self.stop_and_wait, sifs, &airtime)?),
            "block_ack" => ReliabilityConfig::BlockAck(resolve_block_ack(self.block_ack, sifs, &airtime)?),
            other => {
                return Err(ConfigError::invalid(
                    "reliability",
                    format!("{other:?} is neither \"stop_and_wait\" nor \"block_ack\""),
                ))
            }
        };

        let aggregation = if self.aggregation.enabled {
            if !matches!(reliability, ReliabilityConfig::BlockAck(_)) {
                return Err(ConfigError::invalid(
                    "aggregation",
                    "aggregation requires block_ack reliability",
                ));
            }
            Some(resolve_aggregation(self.aggregation)?)
        } else {
            None
        };

        let rate = resolve_rate(self.rate, &rate_table, antennas)?;

        let defaults = FrameSyncConfig::default();
        let fs = self.frame_sync;
        let frame_sync = FrameSyncConfig {
            idle_capture_db: fs.idle_capture_db.unwrap_or(defaults.idle_capture_db),
            slc_capture_db: fs.slc_capture_db.unwrap_or(defaults.slc_capture_db),
            slg_capture_db: fs.slg_capture_db.unwrap_or(defaults.slg_capture_db),
            detection_threshold_db: fs.detection_threshold_db.unwrap_or(defaults.detection_threshold_db),
        };

        Ok(MacConfig {
            reliability,
            rate_table,
            airtime,
            sifs,
            backoff,
            aggregation,
            rate,
            frame_sync,
        })
    }
}

fn resolve_backoff(input: BackoffInput) -> Result<BackoffConfig, ConfigError> {
    let d = BackoffConfig::default();
    let cfg = BackoffConfig {
        cw_min: input.cw_min.unwrap_or(d.cw_min),
        cw_max: input.cw_max.unwrap_or(d.cw_max),
        slot: us(input.slot_us, d.slot),
        aifs: us(input.aifs_us, d.aifs),
        seed: input.seed.unwrap_or(d.seed),
    };
    if cfg.cw_min > cfg.cw_max {
        return Err(ConfigError::invalid(
            "backoff.cw_min",
            format!("cw_min {} exceeds cw_max {}", cfg.cw_min, cfg.cw_max),
        ));
    }
    if cfg.slot.is_zero() {
        return Err(ConfigError::invalid("backoff.slot_us", "must be positive"));
    }
    Ok(cfg)
}

fn resolve_stop_and_wait(
    input: StopAndWaitInput,
    sifs: Duration,
    airtime: &Airtime,
) -> Result<StopAndWaitConfig, ConfigError> {
    let d = StopAndWaitConfig::default();
    let cfg = StopAndWaitConfig {
        sifs,
        expected_ack: airtime.ack(),
        processing_margin: us(input.processing_margin_us, d.processing_margin),
        rx_guard: d.rx_guard,
        short_retry_limit: input.short_retry_limit.unwrap_or(d.short_retry_limit),
        long_retry_limit: input.long_retry_limit.unwrap_or(d.long_retry_limit),
        rts_threshold_bytes: input.rts_threshold_bytes.unwrap_or(d.rts_threshold_bytes),
    };
    if cfg.short_retry_limit == 0 || cfg.long_retry_limit == 0 {
        return Err(ConfigError::invalid(
            "stop_and_wait.retry_limit",
            "retry limits count attempts and must be at least 1",
        ));
    }
    Ok(cfg)
}

fn resolve_block_ack(input: BlockAckInput, sifs: Duration, airtime: &Airtime) -> Result<BlockAckConfig, ConfigError> {
    let d = BlockAckConfig::default();
    let q = TransmissionQueueConfig::default();
    let cfg = BlockAckConfig {
        capacity: input.capacity.unwrap_or(d.capacity),
        queue: TransmissionQueueConfig {
            max_on_air: input.max_on_air.unwrap_or(q.max_on_air),
            max_transmissions: input.max_transmissions.unwrap_or(q.max_transmissions),
            impatient: input.impatient.unwrap_or(q.impatient),
        },
        sifs,
        expected_block_ack: airtime.block_ack(),
        processing_margin: us(input.processing_margin_us, d.processing_margin),
        rx_guard: d.rx_guard,
    };
    if cfg.capacity == 0 {
        return Err(ConfigError::invalid("block_ack.capacity", "must be positive"));
    }
    if cfg.queue.max_on_air == 0 {
        return Err(ConfigError::invalid("block_ack.max_on_air", "must be positive"));
    }
    if cfg.queue.max_transmissions == 0 {
        return Err(ConfigError::invalid("block_ack.max_transmissions", "must be positive"));
    }
    Ok(cfg)
}

fn resolve_aggregation(input: AggregationInput) -> Result<AggregationConfig, ConfigError> {
    let d = AggregationConfig::default();
    let cfg = AggregationConfig {
        max_entries: input.max_entries.unwrap_or(d.max_entries),
        max_delay: ms(input.max_delay_ms, d.max_delay),
        max_size_bits: input.max_size_bytes.map_or(d.max_size_bits, |b| b.saturating_mul(8)),
        impatient: input.impatient.unwrap_or(d.impatient),
    };
    if cfg.max_entries == 0 {
        return Err(ConfigError::invalid("aggregation.max_entries", "must be positive"));
    }
    if cfg.max_delay.is_zero() {
        return Err(ConfigError::invalid("aggregation.max_delay_ms", "must be positive"));
    }
    Ok(cfg)
}

fn resolve_rate(input: RateInput, table: &RateTable, antennas: u8) -> Result<RateConfig, ConfigError> {
    let d = RateConfig::default();
    let strategy = match input.strategy.as_deref() {
        Some(name) => StrategyKind::from_name(name)?,
        None => d.strategy,
    };

    let thresholds = PerThresholds {
        down: input.per_for_going_down.unwrap_or(d.thresholds.down),
        up: input.per_for_going_up.unwrap_or(d.thresholds.up),
    };
    if !(0.0..=1.0).contains(&thresholds.down) || !(0.0..=1.0).contains(&thresholds.up) {
        return Err(ConfigError::invalid("rate.per_for_going_down", "PER thresholds lie in 0..=1"));
    }
    if thresholds.up >= thresholds.down {
        return Err(ConfigError::invalid(
            "rate.per_for_going_up",
            format!(
                "up threshold {} must lie below down threshold {}",
                thresholds.up, thresholds.down
            ),
        ));
    }

    let arf = ArfConfig {
        initial_success_threshold: input.arf_initial_success_threshold.unwrap_or(d.arf.initial_success_threshold),
        max_success_threshold: input.arf_max_success_threshold.unwrap_or(d.arf.max_success_threshold),
        timer: ms(input.arf_timer_ms, d.arf.timer),
        exponential_backoff: input.arf_exponential_backoff.unwrap_or(d.arf.exponential_backoff),
    };
    if arf.initial_success_threshold == 0 || arf.initial_success_threshold > arf.max_success_threshold {
        return Err(ConfigError::invalid(
            "rate.arf_initial_success_threshold",
            "must be positive and not above arf_max_success_threshold",
        ));
    }

    let initial_mcs = input.initial_mcs.unwrap_or(d.initial_mcs);
    let constant_mcs = input.constant_mcs.unwrap_or(d.constant_mcs);
    for (field, idx) in [("rate.initial_mcs", initial_mcs), ("rate.constant_mcs", constant_mcs)] {
        if idx >= table.len() {
            return Err(ConfigError::invalid(field, format!("index {idx} beyond a table of {}", table.len())));
        }
    }

    let mimo_correlation = input.mimo_correlation.unwrap_or(d.mimo_correlation);
    if !(0.0..1.0).contains(&mimo_correlation) {
        return Err(ConfigError::invalid("rate.mimo_correlation", "must lie in 0..1"));
    }

    let cfg = RateConfig {
        strategy,
        initial_mcs,
        constant_mcs,
        thresholds,
        arf,
        retransmission_lqm_reduction_db: input
            .retransmission_lqm_reduction_db
            .unwrap_or(d.retransmission_lqm_reduction_db),
        increase_on_stream_decrease: input
            .phy_mode_increase_on_antenna_decrease
            .unwrap_or(d.increase_on_stream_decrease),
        decrease_on_stream_increase: input
            .phy_mode_decrease_on_antenna_increase
            .unwrap_or(d.decrease_on_stream_increase),
        mimo_correlation,
        local_antennas: antennas,
        per_window: ms(input.per_window_ms, d.per_window),
        per_min_samples: input.per_min_samples.unwrap_or(d.per_min_samples),
        sinr_window: ms(input.sinr_window_ms, d.sinr_window),
    };
    if cfg.per_window.is_zero() || cfg.sinr_window.is_zero() {
        return Err(ConfigError::invalid("rate.per_window_ms", "windows must be positive"));
    }
    Ok(cfg)
}

impl MacConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(MacConfig::default());
        }
        let parsed: MacConfigInput = toml::from_str(input)?;
        parsed.resolve().inspect_err(|e| tracing::warn!(error = %e, "rejected MAC configuration"))
    }

    pub fn uses_block_ack(&self) -> bool {
        matches!(self.reliability, ReliabilityConfig::BlockAck(_))
    }
}
