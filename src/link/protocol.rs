//! # LoRaWAN Stack Protocol Types
//!
//! Status codes, events, message flags and activation parameters exchanged
//! with the external LoRaWAN stack. Numeric codes follow the mbed LoRaWAN
//! interface so logs stay comparable with devices running that stack.

use serde::Serialize;
use tokio::sync::mpsc;

/// DevEUI length in bytes
pub const DEV_EUI_LEN: usize = 8;

/// AppEUI (JoinEUI) length in bytes
pub const APP_EUI_LEN: usize = 8;

/// AppKey length in bytes
pub const APP_KEY_LEN: usize = 16;

/// Lowest application port usable for uplinks (port 0 carries MAC commands)
pub const MIN_APP_PORT: u8 = 1;

/// Highest application port usable for uplinks (224+ are reserved)
pub const MAX_APP_PORT: u8 = 223;

bitflags::bitflags! {
    /// Message type flags passed to `send` and `receive`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MessageFlags: u8 {
        /// Network server does not acknowledge
        const UNCONFIRMED = 0x01;
        /// Network server must acknowledge
        const CONFIRMED = 0x02;
    }
}

impl MessageFlags {
    /// Flags for an uplink with the given confirmation semantics
    pub fn for_uplink(confirmed: bool) -> Self {
        if confirmed {
            MessageFlags::CONFIRMED
        } else {
            MessageFlags::UNCONFIRMED
        }
    }
}

/// Failure status reported by the LoRaWAN stack
///
/// Success is expressed by `Ok(..)`; every variant here is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StackStatus {
    #[error("stack busy (-1000)")]
    Busy,
    #[error("would block (-1001)")]
    WouldBlock,
    #[error("service unknown (-1002)")]
    ServiceUnknown,
    #[error("parameter invalid (-1003)")]
    ParameterInvalid,
    #[error("no network joined (-1009)")]
    NoNetworkJoined,
    #[error("length error (-1010)")]
    LengthError,
    #[error("device off (-1011)")]
    DeviceOff,
    #[error("not initialized (-1012)")]
    NotInitialized,
    #[error("unsupported (-1013)")]
    Unsupported,
    #[error("crypto failure (-1014)")]
    CryptoFail,
    #[error("port invalid (-1015)")]
    PortInvalid,
    #[error("no active sessions (-1017)")]
    NoActiveSessions,
    #[error("duty cycle restricted (-1020)")]
    DutyCycleRestricted,
    #[error("no channel found (-1021)")]
    NoChannelFound,
    #[error("already connected (-1024)")]
    AlreadyConnected,
    #[error("stack error ({0})")]
    Other(i16),
}

impl StackStatus {
    /// Numeric status code as reported by the stack
    pub fn code(&self) -> i16 {
        match self {
            StackStatus::Busy => -1000,
            StackStatus::WouldBlock => -1001,
            StackStatus::ServiceUnknown => -1002,
            StackStatus::ParameterInvalid => -1003,
            StackStatus::NoNetworkJoined => -1009,
            StackStatus::LengthError => -1010,
            StackStatus::DeviceOff => -1011,
            StackStatus::NotInitialized => -1012,
            StackStatus::Unsupported => -1013,
            StackStatus::CryptoFail => -1014,
            StackStatus::PortInvalid => -1015,
            StackStatus::NoActiveSessions => -1017,
            StackStatus::DutyCycleRestricted => -1020,
            StackStatus::NoChannelFound => -1021,
            StackStatus::AlreadyConnected => -1024,
            StackStatus::Other(code) => *code,
        }
    }

    /// True when the stack refused the send because of duty-cycle accounting
    pub fn is_duty_cycle(&self) -> bool {
        matches!(self, StackStatus::WouldBlock | StackStatus::DutyCycleRestricted)
    }
}

/// Outcome of an accepted connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Session already established (e.g. restored)
    Connected,
    /// Join procedure running, a `Connected` or `JoinFailure` event follows
    InProgress,
}

/// Events emitted asynchronously by the LoRaWAN stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoRaWanEvent {
    Connected,
    Disconnected,
    TxDone,
    TxTimeout,
    TxError,
    TxCryptoError,
    TxSchedulingError,
    RxDone,
    RxTimeout,
    RxError,
    JoinFailure,
    UplinkRequired,
}

impl LoRaWanEvent {
    /// Numeric event code, matching the stack's event enumeration order
    pub fn code(&self) -> u8 {
        match self {
            LoRaWanEvent::Connected => 0,
            LoRaWanEvent::Disconnected => 1,
            LoRaWanEvent::TxDone => 2,
            LoRaWanEvent::TxTimeout => 3,
            LoRaWanEvent::TxError => 4,
            LoRaWanEvent::TxCryptoError => 5,
            LoRaWanEvent::TxSchedulingError => 6,
            LoRaWanEvent::RxDone => 7,
            LoRaWanEvent::RxTimeout => 8,
            LoRaWanEvent::RxError => 9,
            LoRaWanEvent::JoinFailure => 10,
            LoRaWanEvent::UplinkRequired => 11,
        }
    }
}

/// Channel half used by a stack to post events into the dispatcher
pub type EventSender = mpsc::UnboundedSender<LoRaWanEvent>;

/// Device identity used for over-the-air activation
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub dev_eui: [u8; DEV_EUI_LEN],
    pub app_eui: [u8; APP_EUI_LEN],
    pub app_key: [u8; APP_KEY_LEN],
}

// The AppKey is a root secret; keep it out of logs.
impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("dev_eui", &hex::encode_upper(self.dev_eui))
            .field("app_eui", &hex::encode_upper(self.app_eui))
            .field("app_key", &"<redacted>")
            .finish()
    }
}

/// Parameters for an OTAA connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaaParams {
    pub identity: DeviceIdentity,
    /// Number of join attempts the stack makes before reporting `JoinFailure`
    pub nb_trials: u8,
}
