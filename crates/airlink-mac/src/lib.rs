//! # airlink-mac
//!
//! Sans-IO IEEE 802.11 lower MAC.
//!
//! Every engine is a state machine that takes an injected
//! [`timer::TimerService`] and queues events; nothing here performs I/O or
//! owns a clock. A driver (see the `airlink-sim` crate) feeds channel state,
//! receptions and timer expiries into a [`station::Station`] and acts on
//! the events it drains.
//!
//! ## Crate structure
//!
//! - [`timer`]: timer tokens, the scheduler capability, a manual fake clock
//! - [`phy_mode`]: modulation and coding descriptors, 802.11a/n rate tables
//! - [`airtime`]: OFDM frame durations and inter-frame spaces
//! - [`frame`]: MAC frames and transmissions
//! - [`backoff`]: DCF/EDCA contention with binary exponential backoff
//! - [`stop_and_wait`]: single-outstanding-frame ARQ with ACKs
//! - [`block_ack`]: windowed ARQ with Block-Ack requests and reordering
//! - [`aggregation`]: A-MPDU style frame trains
//! - [`rate`]: rate adaptation strategies and their information bases
//! - [`frame_sync`]: receiver capture model
//! - [`station`]: everything wired together for one node
//! - [`config`]: TOML configuration

pub mod aggregation;
pub mod airtime;
pub mod arq;
pub mod backoff;
pub mod block_ack;
pub mod config;
pub mod error;
pub mod frame;
pub mod frame_sync;
pub mod peer_table;
pub mod phy_mode;
pub mod rate;
pub mod station;
pub mod stop_and_wait;
pub mod timer;

pub use config::MacConfig;
pub use error::ConfigError;
pub use frame::{Frame, FrameKind, PeerAddress, Transmission};
pub use station::{Station, StationEvent};
