//! # Medium
//!
//! One shared half-duplex channel. A station hears a transmission when a
//! link to its transmitter exists and it is not transmitting itself: the
//! preamble at the start and the PSDU at the end.
//!
//! ## Error model
//!
//! A link carries a mean SINR from the scenario. Each reception draws a
//! Gaussian fading offset, and overlapping transmissions add their mean
//! power as interference for as long as they overlap. A PSDU decodes with
//! probability
//!
//! ```text
//! p = 1 / (1 + exp(-slope * (sinr - min_sinr(phy_mode))))
//! ```
//!
//! using one uniform draw per reception, so the preamble and the PSDU
//! verdicts agree unless interference arrived in between.

use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use airlink_mac::frame_sync::Preamble;
use airlink_mac::{PeerAddress, Transmission};

/// Handle of a transmission on the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

#[derive(Debug, Clone)]
pub struct MediumConfig {
    /// Standard deviation of the per-reception fading, in dB.
    pub fading_std_db: f64,
    /// Steepness of the success curve, per dB.
    pub logistic_slope: f64,
    pub seed: u64,
}

impl Default for MediumConfig {
    fn default() -> Self {
        MediumConfig {
            fading_std_db: 2.0,
            logistic_slope: 1.5,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MediumStats {
    pub transmissions: u64,
    /// Transmissions that started while another was on air.
    pub overlaps: u64,
    pub receptions: u64,
    pub decoded: u64,
}

#[derive(Debug)]
struct Reception {
    receiver: PeerAddress,
    signal_db: f64,
    /// Largest interference power seen during the frame, linear.
    worst_interference: f64,
    draw: f64,
}

#[derive(Debug)]
struct ActiveTransmission {
    id: TxId,
    transmission: Transmission,
    receptions: Vec<Reception>,
}

/// What [`Medium::start`] asks the driver to do.
#[derive(Debug)]
pub struct Started {
    pub id: TxId,
    pub preambles: Vec<(PeerAddress, Preamble)>,
}

#[derive(Debug, Clone, Copy)]
pub struct Received {
    pub receiver: PeerAddress,
    pub crc_ok: bool,
    pub sinr_db: f64,
}

/// What [`Medium::finish`] asks the driver to do.
#[derive(Debug)]
pub struct Finished {
    pub transmission: Transmission,
    pub receptions: Vec<Received>,
}

#[derive(Debug)]
pub struct Medium {
    config: MediumConfig,
    rng: StdRng,
    /// Mean SINR per unordered station pair.
    links: BTreeMap<(PeerAddress, PeerAddress), f64>,
    active: Vec<ActiveTransmission>,
    next_id: u64,
    stats: MediumStats,
}

fn pair(a: PeerAddress, b: PeerAddress) -> (PeerAddress, PeerAddress) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Box-Muller standard normal.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Probability that a PSDU received at `sinr_db` decodes when the mode
/// needs `min_sinr_db`.
pub fn success_probability(sinr_db: f64, min_sinr_db: f64, slope: f64) -> f64 {
    1.0 / (1.0 + (-slope * (sinr_db - min_sinr_db)).exp())
}

impl Medium {
    pub fn new(config: MediumConfig) -> Self {
        Medium {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            links: BTreeMap::new(),
            active: Vec::new(),
            next_id: 0,
            stats: MediumStats::default(),
        }
    }

    /// Set the mean SINR between two stations, both directions.
    pub fn set_link(&mut self, a: PeerAddress, b: PeerAddress, sinr_db: f64) {
        self.links.insert(pair(a, b), sinr_db);
    }

    pub fn link(&self, a: PeerAddress, b: PeerAddress) -> Option<f64> {
        self.links.get(&pair(a, b)).copied()
    }

    pub fn is_busy(&self) -> bool {
        !self.active.is_empty()
    }

    /// Whether `station` is transmitting right now.
    pub fn is_transmitting(&self, station: PeerAddress) -> bool {
        self.active
            .iter()
            .any(|a| a.transmission.transmitter == station)
    }

    pub fn stats(&self) -> &MediumStats {
        &self.stats
    }

    /// Mean interference power at `receiver` from everything on air except
    /// `except`.
    fn interference_at(&self, receiver: PeerAddress, except: TxId) -> f64 {
        self.active
            .iter()
            .filter(|a| a.id != except && a.transmission.transmitter != receiver)
            .filter_map(|a| self.link(a.transmission.transmitter, receiver))
            .map(linear)
            .sum()
    }

    /// Put a transmission on air. `listeners` are the stations that may
    /// hear it; those transmitting themselves are skipped.
    pub fn start(&mut self, transmission: Transmission, duration: Duration, listeners: &[PeerAddress]) -> Started {
        let id = TxId(self.next_id);
        self.next_id += 1;
        self.stats.transmissions += 1;
        if !self.active.is_empty() {
            self.stats.overlaps += 1;
            tracing::debug!(from = %transmission.transmitter, on_air = self.active.len(), "overlapping transmission");
        }
        let min_sinr = transmission.phy_mode.min_sinr_db();
        let transmitter = transmission.transmitter;

        self.active.push(ActiveTransmission {
            id,
            transmission,
            receptions: Vec::new(),
        });

        // the new signal interferes with everything already on air
        for i in 0..self.active.len() {
            let receivers: Vec<PeerAddress> = self.active[i].receptions.iter().map(|r| r.receiver).collect();
            let other = self.active[i].id;
            let levels: Vec<f64> = receivers.iter().map(|r| self.interference_at(*r, other)).collect();
            for (reception, level) in self.active[i].receptions.iter_mut().zip(levels) {
                reception.worst_interference = reception.worst_interference.max(level);
            }
        }

        let mut preambles = Vec::new();
        let mut receptions = Vec::new();
        for &receiver in listeners {
            if receiver == transmitter || self.is_transmitting(receiver) {
                continue;
            }
            let Some(mean) = self.link(transmitter, receiver) else {
                continue;
            };
            let signal_db = mean + self.config.fading_std_db * standard_normal(&mut self.rng);
            let interference = self.interference_at(receiver, id);
            let sinr_db = signal_db - 10.0 * (1.0 + interference).log10();
            let draw = self.rng.random::<f64>();
            let crc_ok = draw < success_probability(sinr_db, min_sinr, self.config.logistic_slope);

            receptions.push(Reception {
                receiver,
                signal_db,
                worst_interference: interference,
                draw,
            });
            preambles.push((
                receiver,
                Preamble {
                    transmitter,
                    sinr_db,
                    crc_ok,
                    duration,
                },
            ));
        }
        if let Some(active) = self.active.iter_mut().find(|a| a.id == id) {
            active.receptions = receptions;
        }

        Started { id, preambles }
    }

    /// Take a transmission off air and decide every reception.
    ///
    /// # Panics
    ///
    /// If `id` is not on air.
    pub fn finish(&mut self, id: TxId) -> Finished {
        let idx = match self.active.iter().position(|a| a.id == id) {
            Some(i) => i,
            None => panic!("transmission {id:?} is not on air"),
        };
        let active = self.active.remove(idx);
        let min_sinr = active.transmission.phy_mode.min_sinr_db();

        let receptions: Vec<Received> = active
            .receptions
            .iter()
            .map(|r| {
                let sinr_db = r.signal_db - 10.0 * (1.0 + r.worst_interference).log10();
                let crc_ok = r.draw < success_probability(sinr_db, min_sinr, self.config.logistic_slope);
                Received {
                    receiver: r.receiver,
                    crc_ok,
                    sinr_db,
                }
            })
            .collect();

        self.stats.receptions += receptions.len() as u64;
        self.stats.decoded += receptions.iter().filter(|r| r.crc_ok).count() as u64;

        Finished {
            transmission: active.transmission,
            receptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlink_mac::phy_mode::RateTable;
    use airlink_mac::Frame;
    use bytes::Bytes;

    const A: PeerAddress = PeerAddress(1);
    const B: PeerAddress = PeerAddress(2);
    const C: PeerAddress = PeerAddress(3);

    fn tx(from: PeerAddress, to: PeerAddress) -> Transmission {
        let frame = Frame::data(from, to, Bytes::from_static(b"payload"), Duration::ZERO);
        Transmission::single(frame, RateTable::ieee80211a().lowest(1))
    }

    fn quiet() -> Medium {
        Medium::new(MediumConfig {
            fading_std_db: 0.0,
            ..MediumConfig::default()
        })
    }

    #[test]
    fn success_curve_is_centered_on_threshold() {
        assert!((success_probability(5.0, 5.0, 1.5) - 0.5).abs() < 1e-12);
        assert!(success_probability(15.0, 5.0, 1.5) > 0.999);
        assert!(success_probability(-5.0, 5.0, 1.5) < 0.001);
    }

    #[test]
    fn strong_link_decodes() {
        let mut m = quiet();
        m.set_link(A, B, 30.0);
        let started = m.start(tx(A, B), Duration::from_micros(100), &[A, B]);
        assert!(m.is_busy());
        assert_eq!(started.preambles.len(), 1);
        assert!(started.preambles[0].1.crc_ok);

        let done = m.finish(started.id);
        assert!(!m.is_busy());
        assert_eq!(done.receptions.len(), 1);
        assert!(done.receptions[0].crc_ok);
        assert!((done.receptions[0].sinr_db - 30.0).abs() < 1e-9);
    }

    #[test]
    fn overlap_degrades_sinr() {
        let mut m = quiet();
        m.set_link(A, B, 20.0);
        m.set_link(C, B, 20.0);
        let first = m.start(tx(A, B), Duration::from_micros(100), &[A, B, C]);
        let second = m.start(tx(C, B), Duration::from_micros(100), &[A, B, C]);
        assert_eq!(m.stats().overlaps, 1);

        let done = m.finish(first.id);
        assert!(m.is_busy());
        let at_b = done.receptions.iter().find(|r| r.receiver == B).unwrap();
        // equal powers: roughly 0 dB
        assert!(at_b.sinr_db < 1.0);
        m.finish(second.id);
        assert!(!m.is_busy());
    }

    #[test]
    fn transmitting_station_hears_nothing() {
        let mut m = quiet();
        m.set_link(A, B, 20.0);
        let _first = m.start(tx(B, A), Duration::from_micros(100), &[A, B]);
        let second = m.start(tx(A, B), Duration::from_micros(100), &[A, B]);
        assert!(second.preambles.is_empty());
    }
}
