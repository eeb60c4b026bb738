//! # LoRa Uplink Library
//!
//! Periodic temperature telemetry over LoRaWAN.
//!
//! This library samples a temperature sensor, encodes readings as Cayenne LPP
//! and hands them to an external LoRaWAN stack from a single-threaded event
//! loop that also handles joins, duty-cycle backoff and downlinks.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod link;
pub mod payload;
pub mod sensor;
pub mod telemetry;
pub mod uplink;
