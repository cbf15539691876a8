//! # Scenario
//!
//! TOML description of a simulation run:
//!
//! ```toml
//! seed = 7
//! duration_ms = 500
//! fading_std_db = 2.0
//!
//! [mac]
//! reliability = "block_ack"
//!
//! [mac.aggregation]
//! enabled = true
//!
//! [[station]]
//! address = 1
//! destination = 2
//! frames_per_second = 2000
//! payload_bytes = 1500
//!
//! [[station]]
//! address = 2
//!
//! [[link]]
//! a = 1
//! b = 2
//! sinr_db = 22.0
//! ```
//!
//! The `[mac]` table is shared by every station; a station may override
//! its antenna count. Each station's backoff seed is derived from the
//! scenario seed and its address.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use airlink_mac::config::MacConfigInput;
use airlink_mac::{MacConfig, PeerAddress};

// ─── Input ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioInput {
    pub seed: Option<u64>,
    pub duration_ms: Option<u64>,
    pub fading_std_db: Option<f64>,
    pub logistic_slope: Option<f64>,
    pub mac: MacConfigInput,
    #[serde(rename = "station")]
    pub stations: Vec<StationInput>,
    #[serde(rename = "link")]
    pub links: Vec<LinkInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationInput {
    pub address: u32,
    pub antennas: Option<u8>,
    /// Traffic sink; no traffic when absent.
    pub destination: Option<u32>,
    #[serde(default)]
    pub frames_per_second: f64,
    pub payload_bytes: Option<usize>,
    /// Frames held above the MAC before new ones are refused.
    pub max_queue: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkInput {
    pub a: u32,
    pub b: u32,
    pub sinr_db: f64,
}

// ─── Resolved ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Traffic {
    pub destination: PeerAddress,
    pub interval: Duration,
    pub payload_bytes: usize,
    pub max_queue: usize,
}

#[derive(Debug, Clone)]
pub struct StationSpec {
    pub address: PeerAddress,
    pub mac: MacConfig,
    pub antennas: u8,
    pub traffic: Option<Traffic>,
}

#[derive(Debug, Clone)]
pub struct LinkSpec {
    pub a: PeerAddress,
    pub b: PeerAddress,
    pub sinr_db: f64,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub seed: u64,
    pub duration: Duration,
    pub fading_std_db: f64,
    pub logistic_slope: f64,
    pub stations: Vec<StationSpec>,
    pub links: Vec<LinkSpec>,
}

/// Per-station seed: the scenario seed mixed with the address.
pub fn station_seed(seed: u64, address: PeerAddress) -> u64 {
    (seed ^ u64::from(address.0).wrapping_mul(0x9E37_79B9_7F4A_7C15)).rotate_left(17)
}

impl ScenarioInput {
    pub fn resolve(self) -> anyhow::Result<Scenario> {
        let seed = self.seed.unwrap_or(0);
        let duration = Duration::from_millis(self.duration_ms.unwrap_or(1000));
        if duration.is_zero() {
            bail!("duration_ms must be greater than zero");
        }
        let fading_std_db = self.fading_std_db.unwrap_or(2.0);
        if !(0.0..=20.0).contains(&fading_std_db) {
            bail!("fading_std_db must be within 0..=20, got {fading_std_db}");
        }
        let logistic_slope = self.logistic_slope.unwrap_or(1.5);
        if logistic_slope <= 0.0 {
            bail!("logistic_slope must be positive, got {logistic_slope}");
        }
        if self.stations.is_empty() {
            bail!("scenario has no [[station]]");
        }

        let mut known = BTreeSet::new();
        for s in &self.stations {
            if s.address == 0 {
                bail!("station address 0 is reserved");
            }
            if !known.insert(s.address) {
                bail!("station {} declared twice", s.address);
            }
        }

        let mut stations = Vec::with_capacity(self.stations.len());
        for s in self.stations {
            let address = PeerAddress(s.address);
            let mut mac = self.mac.clone();
            mac.backoff.seed = Some(station_seed(seed, address));
            if s.antennas.is_some() {
                mac.antennas = s.antennas;
            }
            let mac = mac
                .resolve()
                .with_context(|| format!("invalid [mac] configuration for station {address}"))?;

            let traffic = match s.destination {
                None => None,
                Some(dest) => {
                    if !known.contains(&dest) || dest == s.address {
                        bail!("station {address} sends to unknown destination {dest}");
                    }
                    if !(s.frames_per_second > 0.0 && s.frames_per_second.is_finite()) {
                        bail!("station {address} needs a positive frames_per_second");
                    }
                    Some(Traffic {
                        destination: PeerAddress(dest),
                        interval: Duration::from_secs_f64(1.0 / s.frames_per_second),
                        payload_bytes: s.payload_bytes.unwrap_or(1500),
                        max_queue: s.max_queue.unwrap_or(1000),
                    })
                }
            };

            stations.push(StationSpec {
                address,
                antennas: mac.rate.local_antennas,
                mac,
                traffic,
            });
        }

        let mut links = Vec::with_capacity(self.links.len());
        for l in self.links {
            if !known.contains(&l.a) || !known.contains(&l.b) {
                bail!("link {}-{} names an unknown station", l.a, l.b);
            }
            if l.a == l.b {
                bail!("link from station {} to itself", l.a);
            }
            links.push(LinkSpec {
                a: PeerAddress(l.a),
                b: PeerAddress(l.b),
                sinr_db: l.sinr_db,
            });
        }

        Ok(Scenario {
            seed,
            duration,
            fading_std_db,
            logistic_slope,
            stations,
            links,
        })
    }
}

impl ScenarioInput {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("failed to parse scenario TOML")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in scenario {}", path.display()))
    }
}

impl Scenario {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        ScenarioInput::from_toml_str(input)?.resolve()
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        ScenarioInput::load(path)?
            .resolve()
            .with_context(|| format!("in scenario {}", path.display()))
    }
}
