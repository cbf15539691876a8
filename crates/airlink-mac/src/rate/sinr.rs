//! SINR-driven strategies.
//!
//! [`Sinr`] maps the quality the peer reported for our frames straight to
//! the fastest MCS whose threshold it clears, giving up
//! `retransmission_lqm_reduction_db` per retransmission. Without a report it
//! behaves like ARF.
//!
//! [`SinrMimo`] additionally searches the spatial-stream count. The
//! reported quality is taken as a single-stream post-combining SINR; for
//! every feasible stream count it is re-scaled with [`post_sinr_factor_db`]
//! and the candidate with the most data bits per symbol wins. Without a
//! report it behaves like `OpportunisticwithMIMO`.

use std::sync::Arc;

use super::{Arf, LinkFeedback, Opportunistic, RateStrategy};
use crate::phy_mode::{PhyMode, RateTable};

/// Expected post-combining SINR gain (dB) of `streams` streams received on
/// `rx_antennas` antennas, for sub-channels with pairwise `correlation`.
///
/// Linear factor `cF * (r - n + 1) / n`, where `cF` is the squared last
/// diagonal entry of the Cholesky factor of the `n x n` correlation matrix.
pub fn post_sinr_factor_db(streams: u8, rx_antennas: u8, correlation: f64) -> f64 {
    let n = usize::from(streams.max(1));
    let r = f64::from(rx_antennas.max(streams).max(1));
    let cf = cholesky_last_diagonal(n, correlation.clamp(0.0, 0.999)).powi(2);
    let linear = cf * (r - n as f64 + 1.0) / n as f64;
    10.0 * linear.log10()
}

fn cholesky_last_diagonal(n: usize, rho: f64) -> f64 {
    let mut l = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let a = if i == j { 1.0 } else { rho };
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                l[i][j] = (a - sum).max(0.0).sqrt();
            } else if l[j][j] > 0.0 {
                l[i][j] = (a - sum) / l[j][j];
            }
        }
    }
    l[n - 1][n - 1]
}

// ─── Single stream ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Sinr {
    table: Arc<RateTable>,
    reduction_db: f64,
    fallback: Arf,
    current: PhyMode,
}

impl Sinr {
    pub fn new(table: Arc<RateTable>, reduction_db: f64, fallback: Arf) -> Self {
        let current = fallback.current_phy_mode();
        Sinr {
            table,
            reduction_db,
            fallback,
            current,
        }
    }
}

fn reduced(sinr_db: f64, attempt: u32, reduction_db: f64) -> f64 {
    sinr_db - f64::from(attempt.saturating_sub(1)) * reduction_db
}

impl RateStrategy for Sinr {
    fn name(&self) -> &'static str {
        "SINR"
    }

    fn phy_mode(&self, attempt: u32, feedback: &LinkFeedback) -> PhyMode {
        match feedback.peer_sinr_db {
            Some(sinr) => self.phy_mode_with_quality(attempt, sinr, feedback),
            None => self.fallback.phy_mode(attempt, feedback),
        }
    }

    fn phy_mode_with_quality(&self, attempt: u32, sinr_db: f64, _feedback: &LinkFeedback) -> PhyMode {
        self.table
            .phy_mode_for_sinr(reduced(sinr_db, attempt, self.reduction_db), 1)
    }

    fn set_current_phy_mode(&mut self, pm: PhyMode, feedback: &LinkFeedback) {
        self.current = pm;
        if feedback.peer_sinr_db.is_none() {
            self.fallback.set_current_phy_mode(pm, feedback);
        }
    }

    fn current_phy_mode(&self) -> PhyMode {
        self.current
    }
}

// ─── MIMO ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SinrMimo {
    table: Arc<RateTable>,
    reduction_db: f64,
    correlation: f64,
    fallback: Opportunistic,
}

impl SinrMimo {
    pub fn new(table: Arc<RateTable>, reduction_db: f64, correlation: f64, fallback: Opportunistic) -> Self {
        SinrMimo {
            table,
            reduction_db,
            correlation,
            fallback,
        }
    }

    /// Post-combining SINR for `streams` streams, given a single-stream
    /// quality sample.
    fn post_sinr(&self, quality_db: f64, streams: u8, rx_antennas: u8) -> f64 {
        quality_db - post_sinr_factor_db(1, rx_antennas, self.correlation)
            + post_sinr_factor_db(streams, rx_antennas, self.correlation)
    }
}

impl RateStrategy for SinrMimo {
    fn name(&self) -> &'static str {
        "SINRwithMIMO"
    }

    fn phy_mode(&self, attempt: u32, feedback: &LinkFeedback) -> PhyMode {
        match feedback.peer_sinr_db {
            Some(sinr) => self.phy_mode_with_quality(attempt, sinr, feedback),
            None => self.fallback.phy_mode(attempt, feedback),
        }
    }

    fn phy_mode_with_quality(&self, attempt: u32, sinr_db: f64, feedback: &LinkFeedback) -> PhyMode {
        let quality = reduced(sinr_db, attempt, self.reduction_db);
        let floor = self.table.min_sinr_db();

        let best = (1..=feedback.max_streams())
            .rev()
            .filter_map(|ss| {
                let post = self.post_sinr(quality, ss, feedback.peer_antennas);
                (post > floor).then(|| self.table.phy_mode_for_sinr(post, ss))
            })
            .fold(None::<PhyMode>, |best, pm| match best {
                Some(b) if b.data_bits_per_symbol() >= pm.data_bits_per_symbol() => Some(b),
                _ => Some(pm),
            });

        match best {
            Some(pm) => pm,
            None => {
                tracing::debug!(quality_db = quality, "link too weak for any stream count");
                self.table.lowest(1)
            }
        }
    }

    fn set_current_phy_mode(&mut self, pm: PhyMode, feedback: &LinkFeedback) {
        self.fallback.set_current_phy_mode(pm, feedback);
    }

    fn current_phy_mode(&self) -> PhyMode {
        self.fallback.current_phy_mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate::{ArfConfig, PerThresholds, Stepping};
    use std::time::Duration;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn uncorrelated_factor_is_array_gain_share() {
        // one stream on two antennas: 2x
        assert!(close(post_sinr_factor_db(1, 2, 0.0), 10.0 * 2f64.log10()));
        // two streams on two antennas: half each
        assert!(close(post_sinr_factor_db(2, 2, 0.0), 10.0 * 0.5f64.log10()));
        assert!(close(post_sinr_factor_db(1, 1, 0.0), 0.0));
    }

    #[test]
    fn correlation_costs_multi_stream_gain() {
        let clean = post_sinr_factor_db(2, 2, 0.0);
        let correlated = post_sinr_factor_db(2, 2, 0.5);
        // 1 - rho^2 = 0.75
        assert!(close(clean - correlated, -10.0 * 0.75f64.log10()));
        assert!(close(post_sinr_factor_db(1, 2, 0.5), post_sinr_factor_db(1, 2, 0.0)));
    }

    #[test]
    fn sinr_backs_off_per_retransmission() {
        let table = Arc::new(RateTable::ieee80211a());
        let arf = Arf::new("ARF", ArfConfig::default(), table.throughput_ladder(1), table.lowest(1));
        let s = Sinr::new(Arc::clone(&table), 3.0, arf);
        let fb = LinkFeedback::empty(Duration::ZERO);
        assert_eq!(s.phy_mode_with_quality(1, 20.0, &fb), table.phy_mode(5, 1));
        assert_eq!(s.phy_mode_with_quality(3, 20.0, &fb), table.phy_mode(3, 1));
    }

    fn mimo(table: &Arc<RateTable>) -> SinrMimo {
        let stepping = Stepping::Streams {
            increase_on_stream_decrease: 3,
            decrease_on_stream_increase: 3,
        };
        let fallback = Opportunistic::new(
            "OpportunisticwithMIMO",
            Arc::clone(table),
            PerThresholds::default(),
            stepping,
            table.lowest(1),
        );
        SinrMimo::new(Arc::clone(table), 3.0, 0.0, fallback)
    }

    #[test]
    fn good_link_uses_two_streams() {
        let table = Arc::new(RateTable::ieee80211n());
        let s = mimo(&table);
        let fb = LinkFeedback {
            local_antennas: 2,
            peer_antennas: 2,
            ..LinkFeedback::empty(Duration::ZERO)
        };
        let pm = s.phy_mode_with_quality(1, 30.0, &fb);
        assert_eq!(pm.spatial_streams(), 2);
        assert_eq!(pm.data_bits_per_symbol(), 312);
    }

    #[test]
    fn hopeless_link_gets_lowest_single_stream() {
        let table = Arc::new(RateTable::ieee80211n());
        let s = mimo(&table);
        let fb = LinkFeedback {
            local_antennas: 2,
            peer_antennas: 2,
            ..LinkFeedback::empty(Duration::ZERO)
        };
        assert_eq!(s.phy_mode_with_quality(1, -3.0, &fb), table.lowest(1));
    }

    #[test]
    fn single_antenna_peer_limits_streams() {
        let table = Arc::new(RateTable::ieee80211n());
        let s = mimo(&table);
        let fb = LinkFeedback {
            local_antennas: 4,
            peer_antennas: 1,
            ..LinkFeedback::empty(Duration::ZERO)
        };
        let pm = s.phy_mode_with_quality(1, 30.0, &fb);
        assert_eq!(pm, table.highest(1));
    }
}
