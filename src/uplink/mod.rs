//! # Uplink Module
//!
//! The periodic temperature uplink controller and the status events it
//! reports.
//!
//! This module handles:
//! - Joining the network at startup
//! - Sampling, encoding and sending on a fixed interval
//! - Backing off when the stack reports a duty-cycle restriction
//! - Reacting to stack events (downlinks, join failure, disconnect)

pub mod scheduler;
pub mod status;

pub use scheduler::{UplinkScheduler, UplinkSettings};
pub use status::{ConnectionState, StatusEvent, TelemetrySample, UplinkMessage};
