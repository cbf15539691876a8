//! # airlink-sim
//!
//! Deterministic discrete-event driver for `airlink-mac`. A scenario file
//! names the stations, their traffic and the mean SINR of every link; the
//! simulation runs the stations' MACs over a shared fading channel and
//! reports per-station statistics. The same scenario and seed always
//! produce the same report.
//!
//! ## Crate structure
//!
//! - [`event_queue`]: time-ordered events and the per-station timer service
//! - [`medium`]: shared channel with fading, interference and decode draws
//! - [`scenario`]: TOML scenario loading and validation
//! - [`simulation`]: the event loop wiring stations to the medium
//! - [`report`]: JSON run summary

pub mod event_queue;
pub mod medium;
pub mod report;
pub mod scenario;
pub mod simulation;

pub use report::Report;
pub use scenario::Scenario;
pub use simulation::Simulation;
