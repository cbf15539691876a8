//! # Airtime
//!
//! OFDM frame-duration arithmetic for the basic (non-HT) PLCP format.
//! Used to derive inter-frame spaces, the expected ACK duration and the
//! airtime of data frames.

use std::time::Duration;

use crate::phy_mode::PhyMode;

/// PLCP service field.
pub const SERVICE_BITS: u32 = 16;
/// Convolutional code tail.
pub const TAIL_BITS: u32 = 6;
/// ACK / CTS MPDU length.
pub const ACK_BITS: u32 = 14 * 8;
/// Block-Ack MPDU length (compressed bitmap).
pub const BLOCK_ACK_BITS: u32 = 32 * 8;
/// Bits per symbol of the basic (control frame) rate, BPSK-1/2 on 48 carriers.
pub const BASIC_DBPS: u32 = 24;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Airtime {
    pub symbol: Duration,
    pub slot: Duration,
    /// Training fields before the signal symbol.
    pub training: Duration,
}

impl Default for Airtime {
    fn default() -> Self {
        Self {
            symbol: Duration::from_micros(4),
            slot: Duration::from_micros(9),
            training: Duration::from_micros(16),
        }
    }
}

impl Airtime {
    /// Short inter-frame space: four symbols.
    pub fn sifs(&self) -> Duration {
        self.symbol * 4
    }

    /// Arbitration inter-frame space for `aifsn` slots.
    pub fn aifs(&self, aifsn: u32) -> Duration {
        self.sifs() + self.slot * aifsn
    }

    /// Training sequence plus the signal symbol.
    pub fn preamble(&self) -> Duration {
        self.training + self.symbol
    }

    /// Time after the start of a frame until the receiver has decoded the
    /// preamble and knows a frame is arriving.
    pub fn preamble_processing(&self) -> Duration {
        self.preamble() + Duration::from_micros(1)
    }

    pub fn symbols(&self, psdu_bits: u32, dbps: u32) -> u32 {
        assert!(dbps > 0, "bits per symbol must be positive");
        (psdu_bits + SERVICE_BITS + TAIL_BITS).div_ceil(dbps)
    }

    pub fn frame_with_dbps(&self, psdu_bits: u32, dbps: u32) -> Duration {
        self.preamble() + self.symbol * self.symbols(psdu_bits, dbps)
    }

    pub fn frame(&self, psdu_bits: u32, phy_mode: &PhyMode) -> Duration {
        self.frame_with_dbps(psdu_bits, phy_mode.data_bits_per_symbol())
    }

    pub fn ack(&self) -> Duration {
        self.frame_with_dbps(ACK_BITS, BASIC_DBPS)
    }

    pub fn block_ack(&self) -> Duration {
        self.frame_with_dbps(BLOCK_ACK_BITS, BASIC_DBPS)
    }
}
