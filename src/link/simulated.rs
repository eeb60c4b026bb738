//! # Simulated LoRaWAN Stack
//!
//! In-process stand-in for a real stack, used for bench runs without radio
//! hardware. Joins succeed immediately, accepted uplinks report `TxDone`,
//! and a minimum gap between uplinks emulates duty-cycle restrictions.

use std::collections::VecDeque;

use tokio::time::{Duration, Instant};
use tracing::{debug, info};

use super::protocol::*;
use super::LoRaWanStack;

/// Largest application payload accepted (EU868 DR5)
pub const SIMULATED_MAX_PAYLOAD: usize = 242;

/// Behaviour knobs for [`SimulatedStack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimulatedSettings {
    /// Minimum time between accepted uplinks; sends inside the gap would block
    pub duty_cycle_gap: Duration,
    /// Queue a downlink after every N-th accepted uplink (0 disables)
    pub downlink_every: u32,
}

/// In-process LoRaWAN stack
#[derive(Debug)]
pub struct SimulatedStack {
    settings: SimulatedSettings,
    events: Option<EventSender>,
    initialized: bool,
    joined: bool,
    confirmed_retries: u8,
    adaptive_datarate: bool,
    last_uplink: Option<Instant>,
    uplinks: u32,
    downlinks: VecDeque<(u8, Vec<u8>)>,
}

impl SimulatedStack {
    pub fn new(settings: SimulatedSettings) -> Self {
        Self {
            settings,
            events: None,
            initialized: false,
            joined: false,
            confirmed_retries: 0,
            adaptive_datarate: false,
            last_uplink: None,
            uplinks: 0,
            downlinks: VecDeque::new(),
        }
    }

    /// Queue a downlink and announce it with `RxDone`
    pub fn inject_downlink(&mut self, port: u8, payload: Vec<u8>) {
        self.downlinks.push_back((port, payload));
        self.post(LoRaWanEvent::RxDone);
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn confirmed_retries(&self) -> u8 {
        self.confirmed_retries
    }

    pub fn adaptive_datarate(&self) -> bool {
        self.adaptive_datarate
    }

    fn post(&self, event: LoRaWanEvent) {
        match &self.events {
            Some(events) => {
                if events.send(event).is_err() {
                    debug!("Dropping {:?}: dispatcher is gone", event);
                }
            }
            None => debug!("Dropping {:?}: no event sender registered", event),
        }
    }

    fn duty_cycle_blocked(&self, now: Instant) -> bool {
        match self.last_uplink {
            Some(last) => now.duration_since(last) < self.settings.duty_cycle_gap,
            None => false,
        }
    }
}

impl LoRaWanStack for SimulatedStack {
    fn initialize(&mut self) -> Result<(), StackStatus> {
        self.initialized = true;
        Ok(())
    }

    fn register_events(&mut self, events: EventSender) -> Result<(), StackStatus> {
        if !self.initialized {
            return Err(StackStatus::NotInitialized);
        }
        self.events = Some(events);
        Ok(())
    }

    fn set_confirmed_msg_retries(&mut self, count: u8) -> Result<(), StackStatus> {
        if count == 0 {
            return Err(StackStatus::ParameterInvalid);
        }
        self.confirmed_retries = count;
        Ok(())
    }

    fn set_adaptive_datarate(&mut self, enabled: bool) -> Result<(), StackStatus> {
        self.adaptive_datarate = enabled;
        Ok(())
    }

    fn connect(&mut self, params: &OtaaParams) -> Result<ConnectStatus, StackStatus> {
        if !self.initialized || self.events.is_none() {
            return Err(StackStatus::NotInitialized);
        }
        if self.joined {
            return Err(StackStatus::AlreadyConnected);
        }
        if params.nb_trials == 0 {
            return Err(StackStatus::ParameterInvalid);
        }

        info!("Simulated join for DevEUI {}", hex::encode_upper(params.identity.dev_eui));
        self.joined = true;
        self.post(LoRaWanEvent::Connected);
        Ok(ConnectStatus::InProgress)
    }

    fn disconnect(&mut self) -> Result<(), StackStatus> {
        self.joined = false;
        self.downlinks.clear();
        self.post(LoRaWanEvent::Disconnected);
        Ok(())
    }

    fn send(&mut self, port: u8, data: &[u8], _flags: MessageFlags) -> Result<usize, StackStatus> {
        if !self.joined {
            return Err(StackStatus::NoActiveSessions);
        }
        if !(MIN_APP_PORT..=MAX_APP_PORT).contains(&port) {
            return Err(StackStatus::PortInvalid);
        }
        if data.len() > SIMULATED_MAX_PAYLOAD {
            return Err(StackStatus::LengthError);
        }

        let now = Instant::now();
        if self.duty_cycle_blocked(now) {
            return Err(StackStatus::WouldBlock);
        }

        self.last_uplink = Some(now);
        self.uplinks += 1;
        debug!("Simulated uplink #{} on port {} ({} bytes)", self.uplinks, port, data.len());
        self.post(LoRaWanEvent::TxDone);

        let every = self.settings.downlink_every;
        if every > 0 && self.uplinks % every == 0 {
            let counter = self.uplinks.to_be_bytes().to_vec();
            self.inject_downlink(port, counter);
        }

        Ok(data.len())
    }

    fn receive(&mut self, _port: u8, buffer: &mut [u8], _flags: MessageFlags)
        -> Result<(u8, usize), StackStatus> {
        if !self.joined {
            return Err(StackStatus::NoActiveSessions);
        }

        let (port, payload) = self.downlinks.pop_front().ok_or(StackStatus::WouldBlock)?;
        let len = payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&payload[..len]);
        Ok((port, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn params() -> OtaaParams {
        OtaaParams {
            identity: DeviceIdentity {
                dev_eui: [1; DEV_EUI_LEN],
                app_eui: [2; APP_EUI_LEN],
                app_key: [3; APP_KEY_LEN],
            },
            nb_trials: 10,
        }
    }

    fn joined_stack(settings: SimulatedSettings) -> (SimulatedStack, mpsc::UnboundedReceiver<LoRaWanEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut stack = SimulatedStack::new(settings);
        stack.initialize().unwrap();
        stack.register_events(tx).unwrap();
        assert_eq!(stack.connect(&params()), Ok(ConnectStatus::InProgress));
        assert_eq!(rx.try_recv(), Ok(LoRaWanEvent::Connected));
        (stack, rx)
    }

    #[test]
    fn test_connect_requires_initialization() {
        let mut stack = SimulatedStack::new(SimulatedSettings::default());
        assert_eq!(stack.connect(&params()), Err(StackStatus::NotInitialized));
    }

    #[test]
    fn test_register_events_before_initialize_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut stack = SimulatedStack::new(SimulatedSettings::default());
        assert_eq!(stack.register_events(tx), Err(StackStatus::NotInitialized));
    }

    #[test]
    fn test_second_connect_is_rejected() {
        let (mut stack, _rx) = joined_stack(SimulatedSettings::default());
        assert_eq!(stack.connect(&params()), Err(StackStatus::AlreadyConnected));
    }

    #[test]
    fn test_send_before_join_fails() {
        let mut stack = SimulatedStack::new(SimulatedSettings::default());
        let result = stack.send(15, &[1, 2, 3], MessageFlags::UNCONFIRMED);
        assert_eq!(result, Err(StackStatus::NoActiveSessions));
    }

    #[test]
    fn test_send_reports_tx_done() {
        let (mut stack, mut rx) = joined_stack(SimulatedSettings::default());
        assert_eq!(stack.send(15, &[0x01, 0x67, 0x00, 0xD7], MessageFlags::UNCONFIRMED), Ok(4));
        assert_eq!(rx.try_recv(), Ok(LoRaWanEvent::TxDone));
    }

    #[test]
    fn test_send_rejects_reserved_ports() {
        let (mut stack, _rx) = joined_stack(SimulatedSettings::default());
        assert_eq!(stack.send(0, &[1], MessageFlags::UNCONFIRMED), Err(StackStatus::PortInvalid));
        assert_eq!(stack.send(224, &[1], MessageFlags::UNCONFIRMED), Err(StackStatus::PortInvalid));
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let (mut stack, _rx) = joined_stack(SimulatedSettings::default());
        let data = vec![0u8; SIMULATED_MAX_PAYLOAD + 1];
        assert_eq!(stack.send(15, &data, MessageFlags::UNCONFIRMED), Err(StackStatus::LengthError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duty_cycle_gap_blocks_then_clears() {
        let settings = SimulatedSettings {
            duty_cycle_gap: Duration::from_secs(5),
            downlink_every: 0,
        };
        let (mut stack, _rx) = joined_stack(settings);

        assert_eq!(stack.send(15, &[1], MessageFlags::UNCONFIRMED), Ok(1));
        assert_eq!(stack.send(15, &[1], MessageFlags::UNCONFIRMED), Err(StackStatus::WouldBlock));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(stack.send(15, &[1], MessageFlags::UNCONFIRMED), Ok(1));
    }

    #[test]
    fn test_periodic_downlink_is_delivered() {
        let settings = SimulatedSettings {
            duty_cycle_gap: Duration::ZERO,
            downlink_every: 2,
        };
        let (mut stack, mut rx) = joined_stack(settings);

        stack.send(15, &[1], MessageFlags::UNCONFIRMED).unwrap();
        stack.send(15, &[1], MessageFlags::UNCONFIRMED).unwrap();

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events, vec![LoRaWanEvent::TxDone, LoRaWanEvent::TxDone, LoRaWanEvent::RxDone]);

        let mut buffer = [0u8; 50];
        let flags = MessageFlags::CONFIRMED | MessageFlags::UNCONFIRMED;
        assert_eq!(stack.receive(15, &mut buffer, flags), Ok((15, 4)));
        assert_eq!(&buffer[..4], &[0, 0, 0, 2]);
        assert_eq!(stack.receive(15, &mut buffer, flags), Err(StackStatus::WouldBlock));
    }

    #[test]
    fn test_receive_truncates_to_buffer() {
        let (mut stack, _rx) = joined_stack(SimulatedSettings::default());
        stack.inject_downlink(15, vec![1, 2, 3, 4]);

        let mut buffer = [0u8; 2];
        assert_eq!(stack.receive(15, &mut buffer, MessageFlags::UNCONFIRMED), Ok((15, 2)));
        assert_eq!(buffer, [1, 2]);
    }

    #[test]
    fn test_receive_reports_downlink_port() {
        let (mut stack, _rx) = joined_stack(SimulatedSettings::default());
        stack.inject_downlink(42, vec![0xAB]);

        let mut buffer = [0u8; 8];
        assert_eq!(stack.receive(15, &mut buffer, MessageFlags::UNCONFIRMED), Ok((42, 1)));
        assert_eq!(buffer[0], 0xAB);
    }

    #[test]
    fn test_disconnect_posts_event() {
        let (mut stack, mut rx) = joined_stack(SimulatedSettings::default());
        stack.disconnect().unwrap();
        assert!(!stack.is_joined());
        assert_eq!(rx.try_recv(), Ok(LoRaWanEvent::Disconnected));
    }

    #[test]
    fn test_configuration_calls_are_recorded() {
        let mut stack = SimulatedStack::new(SimulatedSettings::default());
        stack.set_confirmed_msg_retries(3).unwrap();
        stack.set_adaptive_datarate(false).unwrap();
        assert_eq!(stack.confirmed_retries(), 3);
        assert!(!stack.adaptive_datarate());
        assert_eq!(stack.set_confirmed_msg_retries(0), Err(StackStatus::ParameterInvalid));
    }
}
