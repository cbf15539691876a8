//! # Frame Synchronization
//!
//! Receiver-side capture model. Decides whether a physical reception is
//! handed to the MAC at all, and tells the reliability engines when a
//! reception starts and ends so that reply timeouts are not raced.
//!
//! States:
//!
//! ```text
//!            preamble > idle_capture
//!   Idle ───────────────────────────────► Synchronized ──(frame end)──► WaitForFinalDelivery
//!    ▲  └─ preamble too weak ─► Garbled ◄─┘ weaker overlap                    │
//!    └──────────────── last overlapping frame over ◄───────────────────────────┘
//! ```
//!
//! A stronger preamble can capture the receiver: above `slc_capture` while
//! synchronized, above `slg_capture` while garbled.

use serde::Serialize;
use std::time::Duration;

use crate::frame::PeerAddress;
use crate::timer::{TimerOwner, TimerService, TimerToken, Timeout};

/// Time the receiver lingers after the synchronized frame ends, waiting for
/// its PSDU.
const FINAL_DELIVERY_GRACE: Duration = Duration::from_nanos(10);

#[derive(Debug, Clone)]
pub struct FrameSyncConfig {
    pub idle_capture_db: f64,
    /// Capture threshold while synchronized to a clean reception.
    pub slc_capture_db: f64,
    /// Capture threshold while garbled.
    pub slg_capture_db: f64,
    pub detection_threshold_db: f64,
}

impl Default for FrameSyncConfig {
    fn default() -> Self {
        FrameSyncConfig {
            idle_capture_db: 0.0,
            slc_capture_db: 10.0,
            slg_capture_db: 18.0,
            detection_threshold_db: -5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Synchronized,
    WaitForFinalDelivery,
    Garbled,
}

/// Reception indications for the reliability engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxIndication {
    /// A reception of `duration` has started.
    Start { duration: Duration },
    /// The synchronized reception ended cleanly.
    End,
    /// The synchronized reception was lost.
    Error,
}

/// What the PHY reports when a preamble arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preamble {
    pub transmitter: PeerAddress,
    pub sinr_db: f64,
    pub crc_ok: bool,
    /// Air time of the whole frame the preamble belongs to.
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameSyncStats {
    pub preambles: u64,
    pub below_detection: u64,
    pub synchronized: u64,
    pub captures: u64,
    pub garbled: u64,
    pub delivered: u64,
    pub crc_errors: u64,
    pub not_synchronized: u64,
}

#[derive(Debug)]
pub struct FrameSync {
    config: FrameSyncConfig,
    state: SyncState,
    synced_to: Option<PeerAddress>,
    last_frame_end: Duration,
    timeout: Timeout,
    indications: Vec<RxIndication>,
    stats: FrameSyncStats,
}

impl FrameSync {
    pub fn new(config: FrameSyncConfig) -> Self {
        FrameSync {
            config,
            state: SyncState::Idle,
            synced_to: None,
            last_frame_end: Duration::ZERO,
            timeout: Timeout::new(TimerOwner::FrameSync),
            indications: Vec::new(),
            stats: FrameSyncStats::default(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn synchronized_to(&self) -> Option<PeerAddress> {
        self.synced_to
    }

    pub fn on_preamble(&mut self, preamble: &Preamble, timers: &mut dyn TimerService) {
        self.stats.preambles += 1;
        if preamble.sinr_db < self.config.detection_threshold_db {
            self.stats.below_detection += 1;
            tracing::trace!(from = %preamble.transmitter, sinr_db = preamble.sinr_db, "preamble below detection threshold");
            return;
        }

        let threshold = match self.state {
            SyncState::Idle => self.config.idle_capture_db,
            SyncState::Synchronized | SyncState::WaitForFinalDelivery => self.config.slc_capture_db,
            SyncState::Garbled => self.config.slg_capture_db,
        };

        if preamble.sinr_db > threshold {
            if self.state == SyncState::Synchronized {
                self.stats.captures += 1;
                self.indications.push(RxIndication::Error);
            }
            if preamble.crc_ok {
                self.sync_to(preamble, timers);
            } else {
                self.fail_sync(preamble.duration, timers);
            }
            return;
        }

        match self.state {
            SyncState::Synchronized | SyncState::WaitForFinalDelivery => {
                // keep decoding; garbled afterwards if the overlap outlasts us
                let end = timers.now() + preamble.duration;
                if end > self.last_frame_end {
                    self.last_frame_end = end;
                }
            }
            SyncState::Idle | SyncState::Garbled => self.fail_sync(preamble.duration, timers),
        }
    }

    fn sync_to(&mut self, preamble: &Preamble, timers: &mut dyn TimerService) {
        assert!(preamble.duration > Duration::ZERO, "preamble with zero frame duration");
        self.stats.synchronized += 1;
        self.indications.push(RxIndication::Start {
            duration: preamble.duration,
        });
        self.timeout.set(timers, preamble.duration);
        let end = timers.now() + preamble.duration;
        if end >= self.last_frame_end {
            self.last_frame_end = end;
        }
        self.synced_to = Some(preamble.transmitter);
        self.state = SyncState::Synchronized;
        tracing::trace!(from = %preamble.transmitter, until = ?self.last_frame_end, "synchronized");
    }

    fn fail_sync(&mut self, duration: Duration, timers: &mut dyn TimerService) {
        let end = timers.now() + duration;
        if end > self.last_frame_end {
            self.last_frame_end = end;
            self.timeout.set(timers, duration);
        }
        self.stats.garbled += 1;
        self.synced_to = None;
        self.state = SyncState::Garbled;
    }

    /// A PSDU finished. Returns `true` when it must be handed to the MAC.
    pub fn on_psdu(&mut self, transmitter: PeerAddress, crc_ok: bool, timers: &mut dyn TimerService) -> bool {
        let synced = matches!(self.state, SyncState::Synchronized | SyncState::WaitForFinalDelivery)
            && self.synced_to == Some(transmitter);

        if !synced {
            self.stats.not_synchronized += 1;
            return false;
        }

        let deliver = if crc_ok {
            if self.state == SyncState::Synchronized {
                self.timeout.cancel(timers);
                self.frame_over(timers);
            }
            self.stats.delivered += 1;
            true
        } else {
            self.stats.crc_errors += 1;
            self.indications.push(RxIndication::Error);
            self.state = SyncState::WaitForFinalDelivery;
            false
        };

        if self.state == SyncState::WaitForFinalDelivery {
            self.timeout.cancel(timers);
            self.frame_over(timers);
        }
        deliver
    }

    /// Our own transmission starts: any reception is lost.
    pub fn on_transmit(&mut self, timers: &mut dyn TimerService) {
        if self.state == SyncState::Idle {
            return;
        }
        if self.state == SyncState::Synchronized {
            self.indications.push(RxIndication::Error);
        }
        self.last_frame_end = timers.now();
        self.timeout.cancel(timers);
        self.state = SyncState::Idle;
        self.synced_to = None;
    }

    pub fn on_timer(&mut self, token: TimerToken, timers: &mut dyn TimerService) -> bool {
        if !self.timeout.accept(token) {
            return false;
        }
        self.frame_over(timers);
        true
    }

    fn frame_over(&mut self, timers: &mut dyn TimerService) {
        if self.state == SyncState::Synchronized {
            self.indications.push(RxIndication::End);
            self.state = SyncState::WaitForFinalDelivery;
            self.timeout.set(timers, FINAL_DELIVERY_GRACE);
            return;
        }

        let now = timers.now();
        if self.last_frame_end > now {
            self.state = SyncState::Garbled;
            self.timeout.set(timers, self.last_frame_end - now);
        } else {
            self.state = SyncState::Idle;
        }
        self.synced_to = None;
    }

    pub fn drain_indications(&mut self) -> impl Iterator<Item = RxIndication> + '_ {
        self.indications.drain(..)
    }

    pub fn stats(&self) -> &FrameSyncStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::ManualTimers;

    const A: PeerAddress = PeerAddress(1);
    const B: PeerAddress = PeerAddress(2);

    fn preamble(from: PeerAddress, sinr_db: f64, us: u64) -> Preamble {
        Preamble {
            transmitter: from,
            sinr_db,
            crc_ok: true,
            duration: Duration::from_micros(us),
        }
    }

    fn indications(sync: &mut FrameSync) -> Vec<RxIndication> {
        sync.drain_indications().collect()
    }

    #[test]
    fn clean_reception_is_delivered() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, 12.0, 100), &mut timers);
        assert_eq!(sync.state(), SyncState::Synchronized);
        assert_eq!(
            indications(&mut sync),
            vec![RxIndication::Start {
                duration: Duration::from_micros(100)
            }]
        );

        timers.advance(Duration::from_micros(100));
        assert!(sync.on_psdu(A, true, &mut timers));
        assert_eq!(indications(&mut sync), vec![RxIndication::End]);
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!timers.is_armed(TimerOwner::FrameSync));
    }

    #[test]
    fn weak_preamble_is_ignored() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, -7.0, 100), &mut timers);
        assert_eq!(sync.state(), SyncState::Idle);
        assert_eq!(sync.stats().below_detection, 1);
    }

    #[test]
    fn undecodable_preamble_garbles_until_frame_end() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, -2.0, 100), &mut timers);
        assert_eq!(sync.state(), SyncState::Garbled);
        timers.advance(Duration::from_micros(100));
        assert!(!sync.on_psdu(A, true, &mut timers));

        let token = timers.fire(TimerOwner::FrameSync).unwrap();
        assert!(sync.on_timer(token, &mut timers));
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn strong_preamble_captures_clean_reception() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, 5.0, 200), &mut timers);
        indications(&mut sync);

        timers.advance(Duration::from_micros(20));
        sync.on_preamble(&preamble(B, 16.0, 100), &mut timers);
        assert_eq!(sync.synchronized_to(), Some(B));
        assert_eq!(
            indications(&mut sync),
            vec![
                RxIndication::Error,
                RxIndication::Start {
                    duration: Duration::from_micros(100)
                }
            ]
        );
        assert_eq!(sync.stats().captures, 1);
    }

    #[test]
    fn weaker_overlap_extends_into_garbled() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, 15.0, 100), &mut timers);
        timers.advance(Duration::from_micros(50));
        sync.on_preamble(&preamble(B, 3.0, 200), &mut timers);
        assert_eq!(sync.state(), SyncState::Synchronized);

        // decoding timer at 100us, PSDU of A arrives then
        timers.advance(Duration::from_micros(50));
        assert!(sync.on_psdu(A, true, &mut timers));
        assert_eq!(sync.state(), SyncState::Garbled);
        assert_eq!(timers.deadline(TimerOwner::FrameSync), Some(Duration::from_micros(250)));
    }

    #[test]
    fn own_transmission_aborts_reception() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, 15.0, 100), &mut timers);
        indications(&mut sync);
        sync.on_transmit(&mut timers);
        assert_eq!(indications(&mut sync), vec![RxIndication::Error]);
        assert_eq!(sync.state(), SyncState::Idle);
        assert!(!timers.is_armed(TimerOwner::FrameSync));
    }

    #[test]
    fn corrupted_psdu_signals_error() {
        let mut timers = ManualTimers::new();
        let mut sync = FrameSync::new(FrameSyncConfig::default());
        sync.on_preamble(&preamble(A, 15.0, 100), &mut timers);
        indications(&mut sync);
        timers.advance(Duration::from_micros(100));
        assert!(!sync.on_psdu(A, false, &mut timers));
        assert_eq!(indications(&mut sync), vec![RxIndication::Error]);
    }
}
