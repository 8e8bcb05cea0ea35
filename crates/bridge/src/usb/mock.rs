//! Scripted transport for tests
//!
//! Every device operation is appended to a shared call log so tests can
//! assert the exact order of open steps and the bytes of each transfer.

use crate::usb::transport::{
    DeviceLocation, PresenceEvent, TransportDevice, TransportError, UsbTransport,
};
use protocol::{ControlSetup, DeviceInfo};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Open(String),
    SelectConfiguration(String, u8),
    ClaimInterface(String, u8),
    Close(String),
    ControlOut {
        serial_number: String,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        payload: Vec<u8>,
    },
}

/// Operation a mock device can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    Open,
    SelectConfiguration,
    ClaimInterface,
    Transfer,
}

pub type CallLog = Arc<Mutex<Vec<MockCall>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    serial_number: String,
    usb_version_major: u8,
    location: DeviceLocation,
    configuration: Option<u8>,
    open: bool,
    claimed: Vec<u8>,
    fail_at: Option<MockStep>,
    log: CallLog,
}

impl MockDevice {
    /// Unconfigured device on bus 1 at `address`
    pub fn new(serial_number: &str, usb_version_major: u8, address: u8) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            usb_version_major,
            location: DeviceLocation { bus: 1, address },
            configuration: None,
            open: false,
            claimed: Vec::new(),
            fail_at: None,
            log: CallLog::default(),
        }
    }

    pub fn with_configuration(mut self, configuration: u8) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn failing_at(mut self, step: MockStep) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn claimed_interfaces(&self) -> &[u8] {
        &self.claimed
    }

    fn record(&self, call: MockCall) {
        lock(&self.log).push(call);
    }

    fn check(&self, step: MockStep) -> Result<(), TransportError> {
        if self.fail_at == Some(step) {
            return Err(TransportError::Usb(rusb::Error::Pipe));
        }
        Ok(())
    }
}

impl TransportDevice for MockDevice {
    fn serial_number(&self) -> &str {
        &self.serial_number
    }

    fn usb_version_major(&self) -> u8 {
        self.usb_version_major
    }

    fn location(&self) -> DeviceLocation {
        self.location
    }

    fn configuration(&self) -> Option<u8> {
        self.configuration
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.record(MockCall::Open(self.serial_number.clone()));
        self.check(MockStep::Open)?;
        self.open = true;
        Ok(())
    }

    fn select_configuration(&mut self, configuration: u8) -> Result<(), TransportError> {
        self.record(MockCall::SelectConfiguration(
            self.serial_number.clone(),
            configuration,
        ));
        self.check(MockStep::SelectConfiguration)?;
        self.configuration = Some(configuration);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.record(MockCall::ClaimInterface(
            self.serial_number.clone(),
            interface,
        ));
        self.check(MockStep::ClaimInterface)?;
        self.claimed.push(interface);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.record(MockCall::Close(self.serial_number.clone()));
        }
        self.open = false;
        self.claimed.clear();
    }

    fn control_transfer_out(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.record(MockCall::ControlOut {
            serial_number: self.serial_number.clone(),
            request_type: setup.request_type(),
            request: setup.request,
            value: setup.value,
            index: setup.index,
            payload: payload.to_vec(),
        });
        self.check(MockStep::Transfer)?;
        Ok(payload.len())
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            serial_number: self.serial_number.clone(),
            usb_version_major: self.usb_version_major,
            is_open: self.open,
            vendor_id: 0x16c0,
            product_id: 0x05dc,
            bus_number: self.location.bus,
            device_address: self.location.address,
            product: Some("Mock Lamp".to_string()),
        }
    }
}

#[derive(Default)]
struct MockState {
    connected: Vec<MockDevice>,
    pending: VecDeque<PresenceEvent<MockDevice>>,
    enumeration_fails: bool,
}

/// Test-side handle to a [`MockTransport`] that may live on another thread
#[derive(Clone, Default)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    log: CallLog,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> MockTransport {
        MockTransport {
            controller: self.clone(),
        }
    }

    /// Make a device visible to enumeration without an attach notification
    pub fn connect(&self, device: MockDevice) {
        let device = device.with_log(self.log.clone());
        lock(&self.state).connected.push(device);
    }

    /// Plug a device in: visible to enumeration and announced as arrived
    pub fn attach(&self, device: MockDevice) {
        let device = device.with_log(self.log.clone());
        let mut state = lock(&self.state);
        state.connected.push(device.clone());
        state.pending.push_back(PresenceEvent::Arrived(device));
    }

    /// Unplug the device at `location`
    pub fn detach(&self, location: DeviceLocation) {
        let mut state = lock(&self.state);
        state.connected.retain(|device| device.location != location);
        state.pending.push_back(PresenceEvent::Left(location));
    }

    pub fn set_enumeration_fails(&self, fails: bool) {
        lock(&self.state).enumeration_fails = fails;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.log).clone()
    }

    pub fn transfers(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, MockCall::ControlOut { .. }))
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.log).clear();
    }
}

pub struct MockTransport {
    controller: MockController,
}

impl UsbTransport for MockTransport {
    type Device = MockDevice;

    fn connected_devices(&mut self) -> Result<Vec<MockDevice>, TransportError> {
        let state = lock(&self.controller.state);
        if state.enumeration_fails {
            return Err(TransportError::Usb(rusb::Error::Io));
        }
        Ok(state.connected.clone())
    }

    fn poll_presence(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<PresenceEvent<MockDevice>>, TransportError> {
        let events: Vec<_> = lock(&self.controller.state).pending.drain(..).collect();
        if events.is_empty() {
            // Stand in for libusb blocking in handle_events
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
        }
        Ok(events)
    }
}
