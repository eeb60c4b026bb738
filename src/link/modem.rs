//! # Serial LoRaWAN Modem
//!
//! Drives an external LoRaWAN modem (RAK3172-class, RUI3 AT firmware) over a
//! serial port. The modem runs the MAC; this driver only forwards commands
//! and turns unsolicited lines into [`LoRaWanEvent`]s.
//!
//! This module handles:
//! - Opening the serial port (auto-detecting common device paths)
//! - A writer task draining queued AT commands
//! - A reader task parsing modem lines and posting stack events
//! - Buffering downlinks until the scheduler reads them
//!
//! Only one uplink may be in flight; a second send before the modem reports
//! completion returns [`StackStatus::WouldBlock`], which the scheduler treats
//! like a duty-cycle restriction. An uplink the modem never reports on is
//! given up after [`MODEM_TX_TIMEOUT`] and surfaces as `TxTimeout`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::at::{self, ModemLine, AT_LINE_END};
use super::protocol::*;
use super::LoRaWanStack;
use crate::error::{Result, UplinkError};

/// Default modem baud rate
pub const MODEM_BAUD_RATE: u32 = 115_200;

/// Largest application payload the modem accepts
pub const MODEM_MAX_PAYLOAD: usize = 242;

/// How long an uplink may stay unacknowledged before it is abandoned
///
/// Covers a confirmed uplink at the slowest data rate with every retry.
pub const MODEM_TX_TIMEOUT: Duration = Duration::from_secs(60);

/// Default modem device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC modems
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// State shared between the driver and its reader task
#[derive(Debug, Default)]
struct ModemShared {
    events: Option<EventSender>,
    joined: bool,
    tx_started: Option<Instant>,
    downlinks: VecDeque<(u8, Vec<u8>)>,
}

impl ModemShared {
    fn post(&self, event: LoRaWanEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("Dropping {:?}: dispatcher is gone", event);
            }
        }
    }

    /// Clear the in-flight uplink, returning whether there was one
    fn finish_tx(&mut self) -> bool {
        self.tx_started.take().is_some()
    }

    /// Claim the single uplink slot
    ///
    /// An uplink older than [`MODEM_TX_TIMEOUT`] is abandoned first.
    fn start_tx(&mut self, now: Instant) -> std::result::Result<(), StackStatus> {
        if let Some(started) = self.tx_started {
            if now.duration_since(started) < MODEM_TX_TIMEOUT {
                return Err(StackStatus::WouldBlock);
            }
            warn!("No completion from modem after {:?}, abandoning uplink", MODEM_TX_TIMEOUT);
            self.tx_started = None;
            self.post(LoRaWanEvent::TxTimeout);
        }
        self.tx_started = Some(now);
        Ok(())
    }

    /// The serial stream is gone; nothing sent from here on can complete
    fn link_lost(&mut self) {
        self.joined = false;
        self.tx_started = None;
        self.post(LoRaWanEvent::Disconnected);
    }

    /// Apply one modem line to the shared state
    fn apply(&mut self, line: ModemLine) {
        match line {
            ModemLine::Joined => {
                info!("Modem joined the network");
                self.joined = true;
                self.post(LoRaWanEvent::Connected);
            }
            ModemLine::JoinFailed => self.post(LoRaWanEvent::JoinFailure),
            ModemLine::TxDone | ModemLine::SendConfirmed(true) => {
                self.finish_tx();
                self.post(LoRaWanEvent::TxDone);
            }
            ModemLine::SendConfirmed(false) => {
                self.finish_tx();
                self.post(LoRaWanEvent::TxTimeout);
            }
            ModemLine::Downlink { port, payload } => {
                debug!("Modem downlink on port {} ({} bytes)", port, payload.len());
                self.downlinks.push_back((port, payload));
                self.post(LoRaWanEvent::RxDone);
            }
            ModemLine::Busy => {
                if self.finish_tx() {
                    self.post(LoRaWanEvent::TxSchedulingError);
                }
            }
            ModemLine::NoNetworkJoined => {
                self.joined = false;
                if self.finish_tx() {
                    self.post(LoRaWanEvent::TxError);
                }
            }
            ModemLine::Error(token) => {
                warn!("Modem rejected command: {}", token);
                if self.finish_tx() {
                    self.post(LoRaWanEvent::TxError);
                }
            }
            ModemLine::UnknownEvent(event) => warn!("Unrecognised modem event: {}", event),
            ModemLine::Ok | ModemLine::Other(_) => {}
        }
    }
}

/// LoRaWAN modem attached over a serial port
pub struct SerialModem {
    commands: mpsc::UnboundedSender<String>,
    shared: Arc<Mutex<ModemShared>>,
    device_path: String,
    initialized: bool,
}

impl std::fmt::Debug for SerialModem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialModem")
            .field("device_path", &self.device_path)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl SerialModem {
    /// Open the modem, auto-detecting the device by trying common paths
    ///
    /// Must be called from within a tokio runtime (the I/O tasks are spawned).
    ///
    /// # Errors
    ///
    /// Returns error if no device could be opened
    pub fn open(baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, baud_rate)
    }

    /// Open the modem, trying each path in order
    ///
    /// # Errors
    ///
    /// Returns [`UplinkError::SerialPortNotFound`] if every path fails
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened LoRaWAN modem at {}", path);
                    let (reader, writer) = tokio::io::split(port);
                    return Ok(Self::spawn(reader, writer, path));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(UplinkError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| UplinkError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Start the I/O tasks on an arbitrary byte stream
    pub fn spawn<R, W>(reader: R, writer: W, device_path: &str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Mutex::new(ModemShared::default()));
        let (commands, queued) = mpsc::unbounded_channel();

        tokio::spawn(write_commands(writer, queued));
        tokio::spawn(read_lines(reader, Arc::clone(&shared)));

        Self {
            commands,
            shared,
            device_path: device_path.to_string(),
            initialized: false,
        }
    }

    /// Path of the opened serial device
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    fn shared(&self) -> MutexGuard<'_, ModemShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, command: String) -> std::result::Result<(), StackStatus> {
        self.commands.send(command).map_err(|_| StackStatus::DeviceOff)
    }
}

async fn write_commands<W>(mut writer: W, mut queued: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = queued.recv().await {
        let framed = format!("{}{}", command, AT_LINE_END);
        if let Err(e) = writer.write_all(framed.as_bytes()).await {
            warn!("Failed to write modem command: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("Failed to flush serial port: {}", e);
            break;
        }
        debug!("Sent modem command: {}", redact(&command));
    }
}

async fn read_lines<R>(reader: R, shared: Arc<Mutex<ModemShared>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("Modem: {}", line.trim());
                if let Some(parsed) = at::parse_line(&line) {
                    shared.lock().unwrap_or_else(PoisonError::into_inner).apply(parsed);
                }
            }
            Ok(None) => {
                warn!("Modem serial stream closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read from modem: {}", e);
                break;
            }
        }
    }
    shared.lock().unwrap_or_else(PoisonError::into_inner).link_lost();
}

/// Hide the AppKey when echoing commands into the log
fn redact(command: &str) -> &str {
    if command.starts_with("AT+APPKEY=") {
        "AT+APPKEY=<redacted>"
    } else {
        command
    }
}

impl LoRaWanStack for SerialModem {
    fn initialize(&mut self) -> std::result::Result<(), StackStatus> {
        self.queue("AT".to_string())?;
        self.initialized = true;
        Ok(())
    }

    fn register_events(&mut self, events: EventSender) -> std::result::Result<(), StackStatus> {
        if !self.initialized {
            return Err(StackStatus::NotInitialized);
        }
        self.shared().events = Some(events);
        Ok(())
    }

    fn set_confirmed_msg_retries(&mut self, count: u8) -> std::result::Result<(), StackStatus> {
        if count == 0 {
            return Err(StackStatus::ParameterInvalid);
        }
        self.queue(at::confirmed_retries_command(count))
    }

    fn set_adaptive_datarate(&mut self, enabled: bool) -> std::result::Result<(), StackStatus> {
        self.queue(at::adaptive_datarate_command(enabled))
    }

    fn connect(&mut self, params: &OtaaParams) -> std::result::Result<ConnectStatus, StackStatus> {
        if !self.initialized {
            return Err(StackStatus::NotInitialized);
        }
        if self.shared().joined {
            return Err(StackStatus::AlreadyConnected);
        }

        for command in at::join_commands(params) {
            self.queue(command)?;
        }
        Ok(ConnectStatus::InProgress)
    }

    fn disconnect(&mut self) -> std::result::Result<(), StackStatus> {
        // LoRaWAN has no over-the-air detach; forget the session locally.
        let mut shared = self.shared();
        shared.joined = false;
        shared.tx_started = None;
        shared.downlinks.clear();
        shared.post(LoRaWanEvent::Disconnected);
        Ok(())
    }

    fn send(&mut self, port: u8, data: &[u8], flags: MessageFlags)
        -> std::result::Result<usize, StackStatus> {
        if !(MIN_APP_PORT..=MAX_APP_PORT).contains(&port) {
            return Err(StackStatus::PortInvalid);
        }
        if data.len() > MODEM_MAX_PAYLOAD {
            return Err(StackStatus::LengthError);
        }

        {
            let mut shared = self.shared();
            if !shared.joined {
                return Err(StackStatus::NoActiveSessions);
            }
            shared.start_tx(Instant::now())?;
        }

        let confirmed = flags.contains(MessageFlags::CONFIRMED);
        for command in at::send_commands(port, data, confirmed) {
            if let Err(status) = self.queue(command) {
                self.shared().finish_tx();
                return Err(status);
            }
        }
        Ok(data.len())
    }

    fn receive(&mut self, _port: u8, buffer: &mut [u8], _flags: MessageFlags)
        -> std::result::Result<(u8, usize), StackStatus> {
        let (port, payload) = self.shared().downlinks.pop_front().ok_or(StackStatus::WouldBlock)?;
        let len = payload.len().min(buffer.len());
        if len < payload.len() {
            warn!("Downlink on port {} truncated from {} to {} bytes", port, payload.len(), len);
        }
        buffer[..len].copy_from_slice(&payload[..len]);
        Ok((port, len))
    }
}
