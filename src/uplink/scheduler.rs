//! # Uplink Scheduler
//!
//! Single-threaded controller that connects to the network, sends a
//! temperature reading on a fixed interval and reacts to stack events.
//!
//! Every method runs on the dispatcher task; timer callbacks and stack events
//! are delivered through the same [`EventQueue`], so state is never touched
//! concurrently.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::status::{hex_dump, ConnectionState, StatusEvent, TelemetrySample, UplinkMessage};
use crate::config::Config;
use crate::dispatch::{EventHandler, EventQueue, TimerHandle};
use crate::error::{Result, UplinkError};
use crate::link::{
    ConnectStatus, DeviceIdentity, LoRaWanEvent, LoRaWanStack, MessageFlags, OtaaParams,
    StackStatus,
};
use crate::payload::CayenneLpp;
use crate::sensor::TemperatureSensor;

/// Runtime settings for the scheduler
#[derive(Debug, Clone)]
pub struct UplinkSettings {
    /// Delay between uplinks, and after a failed send
    pub interval: Duration,
    /// Delay before retrying a duty-cycle-blocked send
    pub backoff: Duration,
    pub port: u8,
    pub confirmed: bool,
    /// LPP channel the temperature record is tagged with
    pub channel: u8,
    pub max_payload_size: usize,
    pub rx_buffer_size: usize,
    pub confirmed_msg_retries: u8,
    pub adaptive_datarate: bool,
    pub otaa: OtaaParams,
    pub retry_on_join_failure: bool,
    pub join_retry_delay: Duration,
}

impl UplinkSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.uplink.interval(),
            backoff: config.uplink.backoff(),
            port: config.uplink.port,
            confirmed: config.uplink.confirmed,
            channel: config.uplink.channel,
            max_payload_size: config.uplink.max_payload_size,
            rx_buffer_size: config.downlink.rx_buffer_size,
            confirmed_msg_retries: config.lorawan.confirmed_msg_retries,
            adaptive_datarate: config.lorawan.adaptive_datarate,
            otaa: config.otaa_params(),
            retry_on_join_failure: config.lorawan.retry_on_join_failure,
            join_retry_delay: config.lorawan.join_retry_delay(),
        }
    }
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(10000),
            backoff: Duration::from_millis(3000),
            port: 15,
            confirmed: false,
            channel: 1,
            max_payload_size: 50,
            rx_buffer_size: 50,
            confirmed_msg_retries: 3,
            adaptive_datarate: false,
            otaa: OtaaParams {
                identity: DeviceIdentity {
                    dev_eui: [0; 8],
                    app_eui: [0; 8],
                    app_key: [0; 16],
                },
                nb_trials: 10,
            },
            retry_on_join_failure: false,
            join_retry_delay: Duration::from_millis(30000),
        }
    }
}

/// Periodic temperature uplink controller
pub struct UplinkScheduler {
    stack: Box<dyn LoRaWanStack>,
    sensor: Box<dyn TemperatureSensor>,
    settings: UplinkSettings,
    state: ConnectionState,
    pending_send: Option<TimerHandle>,
    pending_join: Option<TimerHandle>,
    observer: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl UplinkScheduler {
    pub fn new(
        stack: Box<dyn LoRaWanStack>,
        sensor: Box<dyn TemperatureSensor>,
        settings: UplinkSettings,
    ) -> Self {
        Self {
            stack,
            sensor,
            settings,
            state: ConnectionState::Disconnected,
            pending_send: None,
            pending_join: None,
            observer: None,
        }
    }

    /// Report every [`StatusEvent`] to `observer`
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<StatusEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn settings(&self) -> &UplinkSettings {
        &self.settings
    }

    /// Handle of the armed send timer, if any
    pub fn pending_send(&self) -> Option<TimerHandle> {
        self.pending_send
    }

    /// Handle of the armed join retry timer, if any
    pub fn pending_join(&self) -> Option<TimerHandle> {
        self.pending_join
    }

    /// Bring the stack up and start joining the network
    ///
    /// Registers `queue` as the stack's event sink, so this must be called
    /// with the queue that will later be dispatched.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Any stack setup step is rejected
    /// - The connect request is rejected (state becomes `Faulted`)
    pub fn start(&mut self, queue: &mut EventQueue<Self>) -> Result<()> {
        self.stack
            .initialize()
            .map_err(|status| setup_failed("initialize", status))?;
        info!("LoRaWAN stack initialized");

        self.stack
            .register_events(queue.sender())
            .map_err(|status| setup_failed("register_events", status))?;

        let retries = self.settings.confirmed_msg_retries;
        self.stack
            .set_confirmed_msg_retries(retries)
            .map_err(|status| setup_failed("set_confirmed_msg_retries", status))?;
        info!("Confirmed message retries set to {}", retries);

        let adr = self.settings.adaptive_datarate;
        self.stack
            .set_adaptive_datarate(adr)
            .map_err(|status| setup_failed("set_adaptive_datarate", status))?;
        info!(
            "Adaptive data rate (ADR) - {}",
            if adr { "enabled" } else { "disabled" }
        );

        self.request_connect()
    }

    /// Ask the stack to tear the session down
    ///
    /// The loop keeps running until the stack reports `Disconnected`.
    pub fn disconnect(&mut self) -> std::result::Result<(), StackStatus> {
        info!("Disconnecting from network");
        self.stack.disconnect()
    }

    /// Sample, encode and send one uplink, then re-arm the send timer
    pub fn send_now(&mut self, queue: &mut EventQueue<Self>) {
        let message = match self.build_message() {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping uplink: {}", e);
                self.emit(StatusEvent::SampleFailed { reason: e.to_string() });
                self.schedule_send(queue, self.settings.interval);
                return;
            }
        };

        match self.stack.send(message.port, &message.payload, message.flags()) {
            Ok(bytes) => {
                info!("{} bytes scheduled for transmission", bytes);
                self.emit(StatusEvent::Scheduled { bytes });
                self.schedule_send(queue, self.settings.interval);
            }
            Err(status) if status.is_duty_cycle() => {
                warn!("send - Duty cycle violation");
                let backoff = self.settings.backoff;
                self.emit(StatusEvent::DutyCycleBlocked {
                    retry_in_ms: backoff.as_millis() as u64,
                });
                self.schedule_send(queue, backoff);
            }
            Err(status) => {
                error!("send() - Error code {}", status.code());
                self.emit(StatusEvent::SendFailed { code: status.code() });
                self.schedule_send(queue, self.settings.interval);
            }
        }
    }

    fn on_connected(&mut self, queue: &mut EventQueue<Self>) {
        info!("Connection - Successful");
        self.state = ConnectionState::Connected;
        if let Some(handle) = self.pending_join.take() {
            queue.cancel(handle);
        }
        self.emit(StatusEvent::Connected);
        self.schedule_send(queue, self.settings.interval);
    }

    fn on_disconnected(&mut self, queue: &mut EventQueue<Self>) {
        for handle in [self.pending_send.take(), self.pending_join.take()]
            .into_iter()
            .flatten()
        {
            queue.cancel(handle);
        }
        self.state = ConnectionState::Disconnected;
        queue.stop();
        info!("Disconnected Successfully");
        self.emit(StatusEvent::Disconnected);
    }

    fn on_tx_done(&mut self) {
        info!("Message Sent to Network Server");
        self.emit(StatusEvent::TxDone);
    }

    fn on_transmission_error(&mut self, event: LoRaWanEvent) {
        error!("Transmission Error - EventCode = {}", event.code());
        self.emit(StatusEvent::TransmissionError { cause: event });
    }

    fn on_receive_ready(&mut self) {
        info!("Received message from Network Server");

        let mut buffer = vec![0u8; self.settings.rx_buffer_size];
        let flags = MessageFlags::CONFIRMED | MessageFlags::UNCONFIRMED;
        match self.stack.receive(self.settings.port, &mut buffer, flags) {
            Ok((port, len)) => {
                buffer.truncate(len);
                info!("RX Data on port {} ({} bytes): {}", port, len, hex_dump(&buffer));
                self.emit(StatusEvent::Received { port, payload: buffer });
            }
            Err(status) => {
                error!("receive() - Error code {}", status.code());
                self.emit(StatusEvent::ReceiveFailed { code: status.code() });
            }
        }
    }

    fn on_reception_error(&mut self, event: LoRaWanEvent) {
        error!("Error in reception - Code = {}", event.code());
        self.emit(StatusEvent::ReceptionError { cause: event });
    }

    fn on_join_failure(&mut self, queue: &mut EventQueue<Self>) {
        error!("OTAA Failed - Check Keys");

        if !self.settings.retry_on_join_failure {
            self.state = ConnectionState::Faulted;
            self.emit(StatusEvent::JoinFailed { retry_in_ms: None });
            return;
        }

        let delay = self.settings.join_retry_delay;
        warn!("Retrying join in {} ms", delay.as_millis());
        self.emit(StatusEvent::JoinFailed {
            retry_in_ms: Some(delay.as_millis() as u64),
        });

        self.schedule_join_retry(queue);
    }

    /// Arm the join retry timer; a rejected connect re-arms it
    fn schedule_join_retry(&mut self, queue: &mut EventQueue<Self>) {
        if let Some(handle) = self.pending_join.take() {
            queue.cancel(handle);
        }
        let handle = queue.schedule_after(self.settings.join_retry_delay, |scheduler, queue| {
            scheduler.pending_join = None;
            if let Err(e) = scheduler.request_connect() {
                error!("Join retry failed: {}", e);
                warn!(
                    "Retrying join in {} ms",
                    scheduler.settings.join_retry_delay.as_millis()
                );
                scheduler.schedule_join_retry(queue);
            }
        });
        self.pending_join = Some(handle);
    }

    fn on_uplink_required(&mut self, queue: &mut EventQueue<Self>) {
        info!("Uplink required by NS");
        self.emit(StatusEvent::UplinkRequired);
        self.send_now(queue);
    }

    fn request_connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        match self.stack.connect(&self.settings.otaa) {
            Ok(ConnectStatus::InProgress) | Ok(ConnectStatus::Connected) => {
                info!("Connection - In Progress ...");
                self.emit(StatusEvent::ConnectInProgress);
                Ok(())
            }
            Err(status) => {
                error!("Connection error, code = {}", status.code());
                self.state = ConnectionState::Faulted;
                Err(UplinkError::Connect(status))
            }
        }
    }

    /// Replace any armed send timer with one firing after `delay`
    fn schedule_send(&mut self, queue: &mut EventQueue<Self>, delay: Duration) {
        if let Some(handle) = self.pending_send.take() {
            queue.cancel(handle);
        }
        let handle = queue.schedule_after(delay, |scheduler, queue| {
            scheduler.pending_send = None;
            scheduler.send_now(queue);
        });
        self.pending_send = Some(handle);
    }

    fn build_message(&mut self) -> Result<UplinkMessage> {
        let sample = TelemetrySample {
            channel: self.settings.channel,
            celsius: self.sensor.read_temperature()?,
        };
        info!("Temperature is {:.2}", sample.celsius);

        let mut lpp = CayenneLpp::new(self.settings.max_payload_size);
        lpp.add_temperature(sample.channel, sample.celsius)?;

        Ok(UplinkMessage {
            port: self.settings.port,
            payload: lpp.into_bytes(),
            confirmed: self.settings.confirmed,
        })
    }

    fn emit(&mut self, event: StatusEvent) {
        if let Some(observer) = &self.observer {
            if observer.send(event).is_err() {
                debug!("Status observer closed");
                self.observer = None;
            }
        }
    }
}

impl EventHandler for UplinkScheduler {
    type Event = LoRaWanEvent;

    fn handle_event(&mut self, event: LoRaWanEvent, queue: &mut EventQueue<Self>) {
        debug!("Stack event: {:?}", event);
        match event {
            LoRaWanEvent::Connected => self.on_connected(queue),
            LoRaWanEvent::Disconnected => self.on_disconnected(queue),
            LoRaWanEvent::TxDone => self.on_tx_done(),
            LoRaWanEvent::TxTimeout
            | LoRaWanEvent::TxError
            | LoRaWanEvent::TxCryptoError
            | LoRaWanEvent::TxSchedulingError => self.on_transmission_error(event),
            LoRaWanEvent::RxDone => self.on_receive_ready(),
            LoRaWanEvent::RxTimeout | LoRaWanEvent::RxError => self.on_reception_error(event),
            LoRaWanEvent::JoinFailure => self.on_join_failure(queue),
            LoRaWanEvent::UplinkRequired => self.on_uplink_required(queue),
        }
    }
}

fn setup_failed(step: &'static str, status: StackStatus) -> UplinkError {
    error!("{} failed: {}", step, status);
    UplinkError::Initialization { step, status }
}
