//! Scheduler data model and the status events it reports.

use serde::Serialize;

use crate::link::{LoRaWanEvent, MessageFlags};

/// One temperature reading, captured per send
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub channel: u8,
    pub celsius: f32,
}

/// Encoded uplink, owned by the send that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkMessage {
    pub port: u8,
    pub payload: Vec<u8>,
    pub confirmed: bool,
}

impl UplinkMessage {
    pub fn flags(&self) -> MessageFlags {
        MessageFlags::for_uplink(self.confirmed)
    }
}

/// Network session state as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connect was rejected or the join failed without retry
    Faulted,
}

/// Observable outcome of a scheduler operation
///
/// Emitted to an optional observer channel; the status journal serializes
/// these as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    ConnectInProgress,
    Connected,
    Scheduled { bytes: usize },
    DutyCycleBlocked { retry_in_ms: u64 },
    SendFailed { code: i16 },
    SampleFailed { reason: String },
    TxDone,
    TransmissionError { cause: LoRaWanEvent },
    Received { port: u8, payload: Vec<u8> },
    ReceiveFailed { code: i16 },
    ReceptionError { cause: LoRaWanEvent },
    /// `retry_in_ms` is `None` when join retry is disabled
    JoinFailed { retry_in_ms: Option<u64> },
    UplinkRequired,
    Disconnected,
}

/// Format bytes as lowercase hex pairs separated by spaces
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
