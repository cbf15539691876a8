//! Per-peer link-quality samples.
//!
//! Two views per peer: the SINR this station measured on frames received
//! from the peer (averaged over a time window), and the SINR the peer
//! reported back for our frames (latest value wins).

use std::collections::VecDeque;
use std::time::Duration;

use crate::frame::PeerAddress;
use crate::peer_table::PeerTable;

#[derive(Debug, Default)]
struct PeerQuality {
    measured: VecDeque<(Duration, f64)>,
    reported: Option<f64>,
}

#[derive(Debug)]
pub struct SinrInformationBase {
    window: Duration,
    peers: PeerTable<PeerQuality>,
}

impl SinrInformationBase {
    pub fn new(window: Duration) -> Self {
        SinrInformationBase {
            window,
            peers: PeerTable::new(),
        }
    }

    /// Record the SINR of a frame received from `peer`.
    pub fn put_measurement(&mut self, peer: PeerAddress, sinr_db: f64, now: Duration) {
        let q = self.peers.get_or_insert_with(peer, PeerQuality::default);
        q.measured.push_back((now, sinr_db));
        while let Some(&(at, _)) = q.measured.front() {
            if now.saturating_sub(at) > self.window {
                q.measured.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean measured SINR (dB) inside the window ending at `now`.
    pub fn average_measured(&self, peer: PeerAddress, now: Duration) -> Option<f64> {
        let q = self.peers.get(peer)?;
        let (n, sum) = q
            .measured
            .iter()
            .filter(|(at, _)| now.saturating_sub(*at) <= self.window)
            .fold((0u32, 0.0), |(n, sum), (_, v)| (n + 1, sum + v));
        (n > 0).then(|| sum / f64::from(n))
    }

    /// Record the quality `peer` reported for our transmissions.
    pub fn put_peer_report(&mut self, peer: PeerAddress, sinr_db: f64) {
        self.peers.get_or_insert_with(peer, PeerQuality::default).reported = Some(sinr_db);
    }

    pub fn peer_report(&self, peer: PeerAddress) -> Option<f64> {
        self.peers.get(peer).and_then(|q| q.reported)
    }
}
