//! # Frames
//!
//! Opaque payloads plus the protocol metadata the MAC attaches to them, and
//! the physical [`Transmission`] that carries one or more frames on air.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::airtime::{ACK_BITS, BLOCK_ACK_BITS};
use crate::block_ack::BlockAckReply;
use crate::phy_mode::PhyMode;

/// Logical, unbounded per-link sequence counter.
pub type SequenceNumber = u64;

/// MAC header plus FCS of a data frame.
pub const DATA_OVERHEAD_BYTES: usize = 28;
/// Block-Ack request MPDU.
pub const BLOCK_ACK_REQUEST_BITS: u32 = 24 * 8;

// ─── PeerAddress ─────────────────────────────────────────────────────────────

/// Opaque link-endpoint identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerAddress(pub u32);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sta{}", self.0)
    }
}

// ─── Frame ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FrameKind {
    Data,
    Ack,
    BlockAckRequest,
    BlockAck,
    Beacon,
}

impl FrameKind {
    /// Replies sent SIFS after the soliciting frame, outside contention.
    pub fn is_reply(self) -> bool {
        matches!(self, FrameKind::Ack | FrameKind::BlockAck)
    }

    /// The receiver must answer immediately after this frame.
    pub fn solicits_reply(self) -> bool {
        matches!(self, FrameKind::BlockAckRequest)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub transmitter: PeerAddress,
    pub receiver: PeerAddress,
    /// Assigned once by the reliability engine; retransmissions keep it.
    pub sequence: Option<SequenceNumber>,
    /// Mode selected for the latest attempt.
    pub phy_mode: Option<PhyMode>,
    /// Transmission attempt, starting at 1 once handed to the reliability
    /// engine.
    pub attempt: u32,
    pub payload: Bytes,
    /// Start sequence number carried by a Block-Ack request.
    pub bar_start: Option<SequenceNumber>,
    /// Acknowledged set carried by a Block-Ack.
    pub block_ack: Option<BlockAckReply>,
    /// SINR the sender of a reply measured on the frame it answers.
    pub reported_sinr_db: Option<f64>,
    /// Enqueue time, for lifetime accounting.
    pub created_at: Duration,
}

impl Frame {
    fn bare(kind: FrameKind, transmitter: PeerAddress, receiver: PeerAddress) -> Self {
        Frame {
            kind,
            transmitter,
            receiver,
            sequence: None,
            phy_mode: None,
            attempt: 0,
            payload: Bytes::new(),
            bar_start: None,
            block_ack: None,
            reported_sinr_db: None,
            created_at: Duration::ZERO,
        }
    }

    pub fn data(
        transmitter: PeerAddress,
        receiver: PeerAddress,
        payload: Bytes,
        created_at: Duration,
    ) -> Self {
        Frame {
            payload,
            created_at,
            ..Frame::bare(FrameKind::Data, transmitter, receiver)
        }
    }

    /// ACK answering `data`, addressed back to its transmitter.
    pub fn ack_for(data: &Frame, sinr_db: Option<f64>) -> Self {
        Frame {
            sequence: data.sequence,
            reported_sinr_db: sinr_db,
            ..Frame::bare(FrameKind::Ack, data.receiver, data.transmitter)
        }
    }

    pub fn block_ack_request(
        transmitter: PeerAddress,
        receiver: PeerAddress,
        start: SequenceNumber,
    ) -> Self {
        Frame {
            bar_start: Some(start),
            ..Frame::bare(FrameKind::BlockAckRequest, transmitter, receiver)
        }
    }

    pub fn block_ack(
        transmitter: PeerAddress,
        receiver: PeerAddress,
        reply: BlockAckReply,
        sinr_db: Option<f64>,
    ) -> Self {
        Frame {
            block_ack: Some(reply),
            reported_sinr_db: sinr_db,
            ..Frame::bare(FrameKind::BlockAck, transmitter, receiver)
        }
    }

    pub fn with_sequence(mut self, sn: SequenceNumber) -> Self {
        self.sequence = Some(sn);
        self
    }

    /// PSDU length on air.
    pub fn psdu_bits(&self) -> u32 {
        match self.kind {
            FrameKind::Ack => ACK_BITS,
            FrameKind::BlockAck => BLOCK_ACK_BITS,
            FrameKind::BlockAckRequest => BLOCK_ACK_REQUEST_BITS,
            FrameKind::Data | FrameKind::Beacon => {
                ((self.payload.len() + DATA_OVERHEAD_BYTES) * 8) as u32
            }
        }
    }
}

// ─── Transmission ────────────────────────────────────────────────────────────

/// One PSDU on air: a single frame or an aggregate addressed to one receiver.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub transmitter: PeerAddress,
    pub receiver: PeerAddress,
    pub phy_mode: PhyMode,
    pub frames: Vec<Frame>,
}

impl Transmission {
    pub fn single(frame: Frame, phy_mode: PhyMode) -> Self {
        Transmission {
            transmitter: frame.transmitter,
            receiver: frame.receiver,
            phy_mode,
            frames: vec![frame],
        }
    }

    pub fn psdu_bits(&self) -> u32 {
        self.frames.iter().map(Frame::psdu_bits).sum()
    }

    /// An ACK or Block-Ack, sent without contention.
    pub fn is_reply(&self) -> bool {
        self.frames.len() == 1 && self.frames[0].kind.is_reply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_swaps_addresses_and_keeps_sequence() {
        let data = Frame::data(PeerAddress(1), PeerAddress(2), Bytes::from_static(b"x"), Duration::ZERO)
            .with_sequence(7);
        let ack = Frame::ack_for(&data, Some(12.5));
        assert_eq!(ack.transmitter, PeerAddress(2));
        assert_eq!(ack.receiver, PeerAddress(1));
        assert_eq!(ack.sequence, Some(7));
        assert_eq!(ack.psdu_bits(), ACK_BITS);
        assert!(ack.kind.is_reply());
    }

    #[test]
    fn data_size_includes_header() {
        let data = Frame::data(
            PeerAddress(1),
            PeerAddress(2),
            Bytes::from(vec![0u8; 100]),
            Duration::ZERO,
        );
        assert_eq!(data.psdu_bits(), 128 * 8);
    }
}
