//! Per-peer packet-error-rate estimate over a sliding time window.

use std::collections::VecDeque;
use std::time::Duration;

use crate::frame::PeerAddress;
use crate::peer_table::PeerTable;

#[derive(Debug, Default)]
struct PeerSamples {
    /// `(time, success)` in arrival order.
    window: VecDeque<(Duration, bool)>,
    consecutive_successes: u32,
    successes: u64,
    failures: u64,
}

impl PeerSamples {
    fn prune(&mut self, now: Duration, width: Duration) {
        while let Some(&(at, _)) = self.window.front() {
            if now.saturating_sub(at) > width {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct PerInformationBase {
    window: Duration,
    min_samples: usize,
    peers: PeerTable<PeerSamples>,
}

impl PerInformationBase {
    pub fn new(window: Duration, min_samples: usize) -> Self {
        PerInformationBase {
            window,
            min_samples,
            peers: PeerTable::new(),
        }
    }

    pub fn on_success(&mut self, peer: PeerAddress, now: Duration) {
        let s = self.peers.get_or_insert_with(peer, PeerSamples::default);
        s.window.push_back((now, true));
        s.consecutive_successes += 1;
        s.successes += 1;
        s.prune(now, self.window);
    }

    pub fn on_failure(&mut self, peer: PeerAddress, now: Duration) {
        let s = self.peers.get_or_insert_with(peer, PeerSamples::default);
        s.window.push_back((now, false));
        s.consecutive_successes = 0;
        s.failures += 1;
        s.prune(now, self.window);
    }

    /// Samples inside the window ending at `now`.
    fn live(&self, peer: PeerAddress, now: Duration) -> impl Iterator<Item = bool> + '_ {
        let width = self.window;
        self.peers
            .get(peer)
            .into_iter()
            .flat_map(|s| s.window.iter())
            .filter(move |(at, _)| now.saturating_sub(*at) <= width)
            .map(|(_, ok)| *ok)
    }

    pub fn knows_per(&self, peer: PeerAddress, now: Duration) -> bool {
        self.live(peer, now).count() >= self.min_samples.max(1)
    }

    /// Failure ratio inside the window, once at least `min_samples`
    /// outcomes are available.
    pub fn per(&self, peer: PeerAddress, now: Duration) -> Option<f64> {
        let (n, failed) = self
            .live(peer, now)
            .fold((0usize, 0usize), |(n, f), ok| (n + 1, f + usize::from(!ok)));
        (n >= self.min_samples.max(1)).then(|| failed as f64 / n as f64)
    }

    /// Successes since the last failure or reset.
    pub fn consecutive_successes(&self, peer: PeerAddress) -> u32 {
        self.peers.get(peer).map_or(0, |s| s.consecutive_successes)
    }

    /// Lifetime totals `(successes, failures)`.
    pub fn totals(&self, peer: PeerAddress) -> (u64, u64) {
        self.peers.get(peer).map_or((0, 0), |s| (s.successes, s.failures))
    }

    /// Forget the window and the success run, e.g. after a mode change.
    pub fn reset(&mut self, peer: PeerAddress) {
        if let Some(s) = self.peers.get_mut(peer) {
            s.window.clear();
            s.consecutive_successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PeerAddress = PeerAddress(7);

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn unknown_until_min_samples() {
        let mut per = PerInformationBase::new(ms(1000), 4);
        for i in 0..3 {
            per.on_failure(P, ms(i));
        }
        assert!(!per.knows_per(P, ms(3)));
        assert_eq!(per.per(P, ms(3)), None);
        per.on_success(P, ms(3));
        assert_eq!(per.per(P, ms(3)), Some(0.75));
    }

    #[test]
    fn old_samples_leave_the_window() {
        let mut per = PerInformationBase::new(ms(100), 2);
        per.on_failure(P, ms(0));
        per.on_failure(P, ms(10));
        per.on_success(P, ms(150));
        per.on_success(P, ms(160));
        assert_eq!(per.per(P, ms(160)), Some(0.0));
        // nothing recent enough
        assert_eq!(per.per(P, ms(400)), None);
    }

    #[test]
    fn failure_breaks_success_run() {
        let mut per = PerInformationBase::new(ms(1000), 1);
        per.on_success(P, ms(0));
        per.on_success(P, ms(1));
        assert_eq!(per.consecutive_successes(P), 2);
        per.on_failure(P, ms(2));
        assert_eq!(per.consecutive_successes(P), 0);
        per.on_success(P, ms(3));
        per.reset(P);
        assert_eq!(per.consecutive_successes(P), 0);
        assert!(!per.knows_per(P, ms(3)));
        assert_eq!(per.totals(P), (3, 1));
    }
}
