//! # LoRaWAN Link Module
//!
//! The connectivity port: everything the uplink scheduler needs from a
//! LoRaWAN stack, expressed as the [`LoRaWanStack`] trait.
//!
//! This module handles:
//! - Stack status codes, events and message flags
//! - An in-process simulated stack for bench runs and tests
//! - A serial AT-command modem driver for real networks
//!
//! The MAC state machine, radio driver, ADR and duty-cycle accounting all
//! live inside the stack behind this trait.

pub mod at;
pub mod modem;
pub mod protocol;
pub mod simulated;

pub use protocol::{
    ConnectStatus, DeviceIdentity, EventSender, LoRaWanEvent, MessageFlags, OtaaParams,
    StackStatus,
};

use tracing::info;

use crate::config::{StackConfig, StackKind};
use crate::error::Result;
use modem::SerialModem;
use simulated::SimulatedStack;

/// Capabilities consumed from an external LoRaWAN stack
///
/// Calls are expected to return quickly: `send` only schedules the uplink,
/// and completion is reported later through the registered event sender.
#[cfg_attr(test, mockall::automock)]
pub trait LoRaWanStack {
    /// Bring the stack up
    fn initialize(&mut self) -> std::result::Result<(), StackStatus>;

    /// Register the channel that receives [`LoRaWanEvent`]s
    fn register_events(&mut self, events: EventSender) -> std::result::Result<(), StackStatus>;

    /// Number of retransmissions for confirmed uplinks
    fn set_confirmed_msg_retries(&mut self, count: u8) -> std::result::Result<(), StackStatus>;

    /// Enable or disable adaptive data rate
    fn set_adaptive_datarate(&mut self, enabled: bool) -> std::result::Result<(), StackStatus>;

    /// Start an over-the-air activation
    fn connect(&mut self, params: &OtaaParams) -> std::result::Result<ConnectStatus, StackStatus>;

    /// Tear the session down; a `Disconnected` event follows
    fn disconnect(&mut self) -> std::result::Result<(), StackStatus>;

    /// Schedule an uplink, returning the number of bytes accepted
    fn send(&mut self, port: u8, data: &[u8], flags: MessageFlags)
        -> std::result::Result<usize, StackStatus>;

    /// Copy the pending downlink into `buffer`
    ///
    /// Returns the port the downlink arrived on and the number of bytes
    /// copied.
    fn receive(&mut self, port: u8, buffer: &mut [u8], flags: MessageFlags)
        -> std::result::Result<(u8, usize), StackStatus>;
}

/// Build the stack selected by configuration
///
/// # Errors
///
/// Returns error if the serial modem cannot be opened
pub fn open_stack(config: &StackConfig) -> Result<Box<dyn LoRaWanStack>> {
    match config.kind {
        StackKind::Simulated => {
            info!("Using simulated LoRaWAN stack");
            Ok(Box::new(SimulatedStack::new(config.simulated_settings())))
        }
        StackKind::Serial => {
            let modem = if config.port.is_empty() {
                SerialModem::open(config.baud_rate)?
            } else {
                SerialModem::open_with_paths(&[config.port.as_str()], config.baud_rate)?
            };
            info!("LoRaWAN modem opened at: {}", modem.device_path());
            Ok(Box::new(modem))
        }
    }
}
