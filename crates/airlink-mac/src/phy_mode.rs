//! # PhyMode and Rate Table
//!
//! Static catalogue of modulation-and-coding schemes (MCS), ordered by
//! throughput, each with the minimum SINR required for reliable decoding.
//!
//! A [`PhyMode`] is one MCS applied uniformly over a number of spatial
//! streams. The [`RateTable`] is read-only once built and is shared by every
//! per-peer rate-adaptation instance.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ─── Modulation / Coding ─────────────────────────────────────────────────────

/// Subcarrier modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Qam16,
    Qam64,
}

impl Modulation {
    /// Coded bits carried by one subcarrier in one symbol.
    pub fn bits_per_subcarrier(self) -> u32 {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Qam16 => 4,
            Modulation::Qam64 => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Modulation::Bpsk => "BPSK",
            Modulation::Qpsk => "QPSK",
            Modulation::Qam16 => "QAM16",
            Modulation::Qam64 => "QAM64",
        }
    }
}

/// Convolutional code rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodingRate {
    Half,
    TwoThirds,
    ThreeQuarters,
    FiveSixths,
}

impl CodingRate {
    /// `(numerator, denominator)` of the code rate.
    pub fn ratio(self) -> (u32, u32) {
        match self {
            CodingRate::Half => (1, 2),
            CodingRate::TwoThirds => (2, 3),
            CodingRate::ThreeQuarters => (3, 4),
            CodingRate::FiveSixths => (5, 6),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CodingRate::Half => "1/2",
            CodingRate::TwoThirds => "2/3",
            CodingRate::ThreeQuarters => "3/4",
            CodingRate::FiveSixths => "5/6",
        }
    }
}

// ─── Mcs ─────────────────────────────────────────────────────────────────────

/// One modulation-and-coding scheme with its decoding threshold.
///
/// Identity is the (modulation, coding rate) pair; the threshold is a
/// property of the table entry and does not take part in equality.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Mcs {
    pub modulation: Modulation,
    pub coding_rate: CodingRate,
    /// Minimum SINR (dB) for reliable decoding of a single stream.
    pub min_sinr_db: f64,
}

impl Mcs {
    pub const fn new(modulation: Modulation, coding_rate: CodingRate, min_sinr_db: f64) -> Self {
        Mcs {
            modulation,
            coding_rate,
            min_sinr_db,
        }
    }

    /// Information bits per subcarrier, scaled by 12 to stay integral
    /// for every supported code rate.
    fn scaled_bits(&self) -> u32 {
        let (num, den) = self.coding_rate.ratio();
        self.modulation.bits_per_subcarrier() * num * 12 / den
    }
}

impl PartialEq for Mcs {
    fn eq(&self, other: &Self) -> bool {
        self.modulation == other.modulation && self.coding_rate == other.coding_rate
    }
}

impl Eq for Mcs {}

impl fmt::Display for Mcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.modulation.name(), self.coding_rate.name())
    }
}

// ─── PhyMode ─────────────────────────────────────────────────────────────────

/// Transmission descriptor: one MCS used on every spatial stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhyMode {
    mcs: Mcs,
    spatial_streams: u8,
    data_subcarriers: u16,
}

impl PhyMode {
    pub fn new(mcs: Mcs, data_subcarriers: u16, spatial_streams: u8) -> Self {
        assert!(spatial_streams >= 1, "a PhyMode needs at least one stream");
        assert!(data_subcarriers > 0, "a PhyMode needs data subcarriers");
        PhyMode {
            mcs,
            spatial_streams,
            data_subcarriers,
        }
    }

    pub fn mcs(&self) -> Mcs {
        self.mcs
    }

    pub fn spatial_streams(&self) -> u8 {
        self.spatial_streams
    }

    pub fn data_subcarriers(&self) -> u16 {
        self.data_subcarriers
    }

    pub fn min_sinr_db(&self) -> f64 {
        self.mcs.min_sinr_db
    }

    /// Same MCS over a different number of streams.
    pub fn with_spatial_streams(self, spatial_streams: u8) -> Self {
        PhyMode::new(self.mcs, self.data_subcarriers, spatial_streams)
    }

    /// Same stream layout with another MCS.
    pub fn with_mcs(self, mcs: Mcs) -> Self {
        PhyMode { mcs, ..self }
    }

    /// Data bits carried by one OFDM symbol on one stream.
    pub fn data_bits_per_symbol_per_stream(&self) -> u32 {
        u32::from(self.data_subcarriers) * self.mcs.scaled_bits() / 12
    }

    /// Data bits carried by one OFDM symbol over all streams.
    pub fn data_bits_per_symbol(&self) -> u32 {
        self.data_bits_per_symbol_per_stream() * u32::from(self.spatial_streams)
    }

    /// Throughput ordering. Modes with equal bits per symbol compare equal
    /// even when their MCS differs.
    pub fn throughput_cmp(&self, other: &PhyMode) -> Ordering {
        self.data_bits_per_symbol()
            .cmp(&other.data_bits_per_symbol())
    }
}

impl fmt::Display for PhyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.mcs, self.spatial_streams)
    }
}

// ─── RateTable ───────────────────────────────────────────────────────────────

/// Ordered MCS catalogue for one PHY flavour.
#[derive(Debug, Clone)]
pub struct RateTable {
    /// Sorted by ascending throughput.
    entries: Vec<Mcs>,
    data_subcarriers: u16,
    switching_point_offset_db: f64,
}

impl RateTable {
    pub fn new(mut entries: Vec<Mcs>, data_subcarriers: u16, switching_point_offset_db: f64) -> Self {
        assert!(!entries.is_empty(), "rate table must not be empty");
        entries.sort_by_key(|m| m.scaled_bits());
        RateTable {
            entries,
            data_subcarriers,
            switching_point_offset_db,
        }
    }

    /// 802.11a/g: 48 data subcarriers, eight single-stream schemes.
    pub fn ieee80211a() -> Self {
        use CodingRate::*;
        use Modulation::*;
        RateTable::new(
            vec![
                Mcs::new(Bpsk, Half, 6.0),
                Mcs::new(Bpsk, ThreeQuarters, 8.7),
                Mcs::new(Qpsk, Half, 8.8),
                Mcs::new(Qpsk, ThreeQuarters, 12.0),
                Mcs::new(Qam16, Half, 15.4),
                Mcs::new(Qam16, ThreeQuarters, 18.8),
                Mcs::new(Qam64, TwoThirds, 23.5),
                Mcs::new(Qam64, ThreeQuarters, 24.8),
            ],
            48,
            1.0,
        )
    }

    /// 802.11n HT: 52 data subcarriers, per-stream MCS 0..7.
    pub fn ieee80211n() -> Self {
        use CodingRate::*;
        use Modulation::*;
        RateTable::new(
            vec![
                Mcs::new(Bpsk, Half, 6.0),
                Mcs::new(Qpsk, Half, 8.8),
                Mcs::new(Qpsk, ThreeQuarters, 12.0),
                Mcs::new(Qam16, Half, 15.4),
                Mcs::new(Qam16, ThreeQuarters, 18.8),
                Mcs::new(Qam64, TwoThirds, 23.5),
                Mcs::new(Qam64, ThreeQuarters, 24.8),
                Mcs::new(Qam64, FiveSixths, 26.5),
            ],
            52,
            1.0,
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Mcs] {
        &self.entries
    }

    pub fn data_subcarriers(&self) -> u16 {
        self.data_subcarriers
    }

    pub fn switching_point_offset_db(&self) -> f64 {
        self.switching_point_offset_db
    }

    /// PhyMode for the `index`-th entry over `streams` streams.
    pub fn phy_mode(&self, index: usize, streams: u8) -> PhyMode {
        assert!(index < self.entries.len(), "MCS index {index} out of range");
        PhyMode::new(self.entries[index], self.data_subcarriers, streams)
    }

    pub fn lowest(&self, streams: u8) -> PhyMode {
        self.phy_mode(0, streams)
    }

    pub fn highest(&self, streams: u8) -> PhyMode {
        self.phy_mode(self.entries.len() - 1, streams)
    }

    /// Position of the mode's MCS in the table.
    pub fn index_of(&self, pm: &PhyMode) -> Option<usize> {
        self.entries.iter().position(|m| *m == pm.mcs())
    }

    fn known_index(&self, pm: &PhyMode) -> usize {
        match self.index_of(pm) {
            Some(i) => i,
            None => panic!("PhyMode {pm} is not part of this rate table"),
        }
    }

    pub fn is_lowest(&self, pm: &PhyMode) -> bool {
        self.known_index(pm) == 0
    }

    pub fn is_highest(&self, pm: &PhyMode) -> bool {
        self.known_index(pm) + 1 == self.entries.len()
    }

    /// Next faster MCS, same stream count. Clamps at the top.
    pub fn step_up(&self, pm: &PhyMode) -> PhyMode {
        let i = self.known_index(pm);
        let next = (i + 1).min(self.entries.len() - 1);
        pm.with_mcs(self.entries[next])
    }

    /// Next slower MCS, same stream count. Clamps at the bottom.
    pub fn step_down(&self, pm: &PhyMode) -> PhyMode {
        let i = self.known_index(pm);
        pm.with_mcs(self.entries[i.saturating_sub(1)])
    }

    /// Fastest entry whose threshold lies below `sinr_db` minus the
    /// switching-point offset; the lowest entry when none qualifies.
    pub fn mcs_index_for_sinr(&self, sinr_db: f64) -> usize {
        let usable = sinr_db - self.switching_point_offset_db;
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, m)| m.min_sinr_db < usable)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0)
    }

    pub fn phy_mode_for_sinr(&self, sinr_db: f64, streams: u8) -> PhyMode {
        self.phy_mode(self.mcs_index_for_sinr(sinr_db), streams)
    }

    /// SINR below which not even the most robust entry can be used.
    pub fn min_sinr_db(&self) -> f64 {
        let lowest = self
            .entries
            .iter()
            .map(|m| m.min_sinr_db)
            .fold(f64::INFINITY, f64::min);
        lowest + self.switching_point_offset_db
    }

    /// Every (MCS, streams) combination up to `max_streams`, reduced to a
    /// ladder where each rung carries strictly more bits per symbol than
    /// the one below.
    pub fn throughput_ladder(&self, max_streams: u8) -> Vec<PhyMode> {
        let mut all: Vec<PhyMode> = (1..=max_streams.max(1))
            .flat_map(|ss| (0..self.entries.len()).map(move |i| (i, ss)))
            .map(|(i, ss)| self.phy_mode(i, ss))
            .collect();
        all.sort_by(|a, b| a.throughput_cmp(b));

        let mut ladder: Vec<PhyMode> = Vec::new();
        for pm in all {
            let higher = ladder
                .last()
                .is_none_or(|top| pm.data_bits_per_symbol() > top.data_bits_per_symbol());
            if higher {
                ladder.push(pm);
            }
        }
        ladder
    }
}
