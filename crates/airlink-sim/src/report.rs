//! Run summary, serialized as JSON.

use anyhow::Context;
use serde::Serialize;

use airlink_mac::station::StationStats;
use airlink_mac::PeerAddress;

use crate::medium::MediumStats;

#[derive(Debug, Clone, Serialize)]
pub struct StationReport {
    pub address: PeerAddress,
    /// Frames produced by the traffic source.
    pub generated: u64,
    /// Frames turned away because the MAC queue was full.
    pub refused: u64,
    pub delivered_frames: u64,
    pub delivered_bytes: u64,
    /// Goodput received by this station over the whole run.
    pub throughput_mbps: f64,
    /// Mean time from creation at the sender to delivery here.
    pub mean_latency_us: f64,
    pub mac: StationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub seed: u64,
    pub duration_ms: u64,
    pub events: u64,
    pub medium: MediumStats,
    pub stations: Vec<StationReport>,
}

impl Report {
    pub fn station(&self, address: PeerAddress) -> Option<&StationReport> {
        self.stations.iter().find(|s| s.address == address)
    }

    pub fn total_delivered(&self) -> u64 {
        self.stations.iter().map(|s| s.delivered_frames).sum()
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize report")
    }
}
