//! Command dispatcher
//!
//! Owns the device registry and the transport, and turns caller commands and
//! presence notifications into registry updates, transport I/O and events.
//! Runs on the USB worker thread; every method completes (events emitted,
//! result produced) before it returns.

use crate::usb::registry::{DeviceRegistry, Registration};
use crate::usb::transport::{PresenceEvent, TransportDevice, TransportError, UsbTransport};
use common::UsbEvent;
use protocol::{BridgeError, ColorPayload, ConnectReport, DeviceInfo, Rgb, SET_RGB_REQUEST};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Configuration selected when a device reports none active
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Interface carrying the vendor control requests
pub const CONTROL_INTERFACE: u8 = 0;

pub struct Dispatcher<T: UsbTransport> {
    transport: T,
    registry: DeviceRegistry<T::Device>,
    event_sender: async_channel::Sender<UsbEvent>,
}

impl<T: UsbTransport> Dispatcher<T> {
    pub fn new(transport: T, event_sender: async_channel::Sender<UsbEvent>) -> Self {
        Self {
            transport,
            registry: DeviceRegistry::new(),
            event_sender,
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &DeviceRegistry<T::Device> {
        &self.registry
    }

    /// Enumerate, replace the registry and open every connected device
    ///
    /// Each device is opened independently; failures are collected in the
    /// report and do not stop the remaining devices.
    pub fn connect_all(&mut self) -> Result<ConnectReport, BridgeError> {
        let devices = self
            .transport
            .connected_devices()
            .map_err(|e| BridgeError::EnumerationFailed {
                message: e.to_string(),
            })?;

        debug!("Enumerated {} devices", devices.len());
        self.registry.replace_all(devices);
        if self.registry.is_empty() {
            info!("No RGB devices connected");
        }

        let mut report = ConnectReport::default();
        let mut serial_numbers = self.registry.serial_numbers();
        serial_numbers.sort();

        for serial_number in serial_numbers {
            match self.open_registered(&serial_number) {
                Ok(()) => report.opened.push(serial_number),
                Err(e) => {
                    warn!("{}", e);
                    report.failed.push(e);
                }
            }
        }

        info!(
            "Connected {} of {} devices",
            report.opened.len(),
            self.registry.len()
        );
        Ok(report)
    }

    /// Register and open the connected device with this serial number
    ///
    /// A serial number that is not currently connected fails with
    /// [`BridgeError::NotFound`].
    pub fn connect_device(&mut self, serial_number: &str) -> Result<(), BridgeError> {
        let device = self
            .transport
            .connected_devices()
            .map_err(|e| BridgeError::EnumerationFailed {
                message: e.to_string(),
            })?
            .into_iter()
            .find(|device| device.serial_number() == serial_number)
            .ok_or_else(|| BridgeError::NotFound {
                serial_number: serial_number.to_string(),
            })?;

        self.register(device);
        self.open_registered(serial_number)
    }

    /// Send `color` to a registered device
    ///
    /// A registered device that is not open is skipped without error.
    pub fn set_color(&mut self, serial_number: &str, color: Rgb) -> Result<(), BridgeError> {
        let device = self.registry.find(serial_number)?;

        if !device.is_open() {
            debug!(
                "Device {} is not open, ignoring color {:?}",
                serial_number, color
            );
            return Ok(());
        }

        let payload = ColorPayload::for_firmware(device.usb_version_major(), color)?;

        self.registry
            .find_mut(serial_number)?
            .control_transfer_out(&SET_RGB_REQUEST, payload.as_bytes())
            .map_err(|e| BridgeError::TransferFailed {
                serial_number: serial_number.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            "Set color of {} to #{:02x}{:02x}{:02x}",
            serial_number, color.r, color.g, color.b
        );
        Ok(())
    }

    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.registry.device_infos()
    }

    /// Apply one attach/detach notification
    pub fn handle_presence(&mut self, event: PresenceEvent<T::Device>) {
        match event {
            PresenceEvent::Arrived(device) => {
                let serial_number = device.serial_number().to_string();
                info!("Device {} arrived at {}", serial_number, device.location());

                self.register(device);
                if let Err(e) = self.open_registered(&serial_number) {
                    warn!("{}", e);
                }
            }
            PresenceEvent::Left(location) => match self.registry.unregister_at(location) {
                Some(device) => {
                    info!("Device {} left {}", device.serial_number(), location);
                    self.emit(UsbEvent::DeviceDisconnected {
                        serial_number: device.serial_number().to_string(),
                    });
                }
                None => debug!("Ignoring departure of unregistered device at {}", location),
            },
        }
    }

    /// Wait up to `timeout` for presence notifications and apply them in order
    pub fn poll_presence(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let events = self.transport.poll_presence(timeout)?;
        let count = events.len();
        for event in events {
            self.handle_presence(event);
        }
        Ok(count)
    }

    fn register(&mut self, device: T::Device) {
        if let Registration::Replaced(mut previous) = self.registry.register(device) {
            previous.close();
        }
    }

    fn open_registered(&mut self, serial_number: &str) -> Result<(), BridgeError> {
        let device = self.registry.find_mut(serial_number)?;
        open_device(device)?;

        info!("Device {} opened", serial_number);
        self.emit(UsbEvent::DeviceOpened {
            serial_number: serial_number.to_string(),
        });
        Ok(())
    }

    fn emit(&self, event: UsbEvent) {
        if let Err(e) = self.event_sender.send_blocking(event) {
            error!("Failed to send device event: {}", e);
        }
    }
}

/// Run the open sequence: open, select a configuration if none is active,
/// claim the control interface
///
/// On failure the device is closed again so it is never left half open.
pub fn open_device<D: TransportDevice>(device: &mut D) -> Result<(), BridgeError> {
    let result = open_steps(device);
    if let Err(e) = &result {
        debug!("Open sequence for {} failed: {}", device.serial_number(), e);
        device.close();
    }

    result.map_err(|e| BridgeError::OpenFailed {
        serial_number: device.serial_number().to_string(),
        message: e.to_string(),
    })
}

fn open_steps<D: TransportDevice>(device: &mut D) -> Result<(), TransportError> {
    device.open()?;

    if device.configuration().is_none() {
        debug!(
            "Device {} is unconfigured, selecting configuration {}",
            device.serial_number(),
            DEFAULT_CONFIGURATION
        );
        device.select_configuration(DEFAULT_CONFIGURATION)?;
    }

    device.claim_interface(CONTROL_INTERFACE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::mock::{MockCall, MockController, MockDevice, MockStep, MockTransport};

    struct Harness {
        controller: MockController,
        dispatcher: Dispatcher<MockTransport>,
        events: async_channel::Receiver<UsbEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let controller = MockController::new();
            let (tx, events) = async_channel::unbounded();
            let dispatcher = Dispatcher::new(controller.transport(), tx);
            Self {
                controller,
                dispatcher,
                events,
            }
        }

        fn drain_events(&self) -> Vec<UsbEvent> {
            std::iter::from_fn(|| self.events.try_recv().ok()).collect()
        }

        fn poll(&mut self) {
            self.dispatcher
                .poll_presence(Duration::from_millis(1))
                .unwrap();
        }
    }

    fn opened(serial: &str) -> UsbEvent {
        UsbEvent::DeviceOpened {
            serial_number: serial.to_string(),
        }
    }

    fn disconnected(serial: &str) -> UsbEvent {
        UsbEvent::DeviceDisconnected {
            serial_number: serial.to_string(),
        }
    }

    #[test]
    fn test_attach_opens_and_registers() {
        let mut h = Harness::new();
        h.controller.attach(MockDevice::new("S1", 2, 1));
        h.poll();

        assert_eq!(h.drain_events(), vec![opened("S1")]);
        assert!(h.dispatcher.registry().find("S1").unwrap().is_open());
    }

    #[test]
    fn test_open_selects_configuration_then_claims() {
        let mut h = Harness::new();
        h.controller.attach(MockDevice::new("S1", 2, 1));
        h.poll();

        assert_eq!(
            h.controller.calls(),
            vec![
                MockCall::Open("S1".to_string()),
                MockCall::SelectConfiguration("S1".to_string(), 1),
                MockCall::ClaimInterface("S1".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_open_skips_configuration_when_already_configured() {
        let mut h = Harness::new();
        h.controller
            .attach(MockDevice::new("S1", 2, 1).with_configuration(1));
        h.poll();

        assert_eq!(
            h.controller.calls(),
            vec![
                MockCall::Open("S1".to_string()),
                MockCall::ClaimInterface("S1".to_string(), 0),
            ]
        );
    }

    #[test]
    fn test_failed_claim_closes_device_and_keeps_registration() {
        let mut h = Harness::new();
        h.controller
            .attach(MockDevice::new("S1", 2, 1).failing_at(MockStep::ClaimInterface));
        h.poll();

        assert!(h.drain_events().is_empty());
        let device = h.dispatcher.registry().find("S1").unwrap();
        assert!(!device.is_open());
        assert!(device.claimed_interfaces().is_empty());
        assert_eq!(
            h.controller.calls().last(),
            Some(&MockCall::Close("S1".to_string()))
        );
    }

    #[test]
    fn test_failed_open_stops_sequence() {
        let mut device = MockDevice::new("S1", 2, 1).failing_at(MockStep::Open);
        let err = open_device(&mut device).unwrap_err();

        assert!(matches!(
            err,
            BridgeError::OpenFailed { ref serial_number, .. } if serial_number == "S1"
        ));
        assert!(!device.is_open());
    }

    #[test]
    fn test_set_color_v1_payload() {
        let mut h = Harness::new();
        h.controller.attach(MockDevice::new("S1", 1, 1));
        h.poll();
        h.controller.clear_calls();

        h.dispatcher.set_color("S1", Rgb::new(10, 20, 30)).unwrap();

        assert_eq!(
            h.controller.transfers(),
            vec![MockCall::ControlOut {
                serial_number: "S1".to_string(),
                request_type: 0x40,
                request: 1,
                value: 0,
                index: 0,
                payload: vec![0xFF, 10, 20, 30],
            }]
        );
    }

    #[test]
    fn test_set_color_v2_payload() {
        let mut h = Harness::new();
        h.controller.attach(MockDevice::new("S1", 2, 1));
        h.poll();

        h.dispatcher.set_color("S1", Rgb::new(1, 2, 3)).unwrap();

        match h.controller.transfers().as_slice() {
            [MockCall::ControlOut { payload, .. }] => assert_eq!(payload, &vec![1, 2, 3]),
            other => panic!("unexpected transfers: {:?}", other),
        }
    }

    #[test]
    fn test_set_color_unsupported_version() {
        let mut h = Harness::new();
        h.controller.attach(MockDevice::new("S1", 3, 1));
        h.poll();

        assert_eq!(
            h.dispatcher.set_color("S1", Rgb::new(1, 2, 3)),
            Err(BridgeError::UnsupportedFirmwareVersion { version: 3 })
        );
        assert!(h.controller.transfers().is_empty());
    }

    #[test]
    fn test_set_color_unknown_serial() {
        let mut h = Harness::new();

        assert_eq!(
            h.dispatcher.set_color("S2", Rgb::new(0, 0, 0)),
            Err(BridgeError::NotFound {
                serial_number: "S2".to_string()
            })
        );
    }

    #[test]
    fn test_set_color_on_unopened_device_is_noop() {
        let mut h = Harness::new();
        h.controller
            .attach(MockDevice::new("S1", 2, 1).failing_at(MockStep::Open));
        h.poll();

        assert!(h.dispatcher.registry().find("S1").is_ok());
        assert_eq!(h.dispatcher.set_color("S1", Rgb::new(9, 9, 9)), Ok(()));
        assert!(h.controller.transfers().is_empty());
    }

    #[test]
    fn test_set_color_transfer_failure() {
        let mut h = Harness::new();
        h.controller
            .attach(MockDevice::new("S1", 2, 1).failing_at(MockStep::Transfer));
        h.poll();

        let err = h.dispatcher.set_color("S1", Rgb::new(1, 1, 1)).unwrap_err();
        assert!(matches!(err, BridgeError::TransferFailed { .. }));

        // Registry and dispatcher remain usable
        assert!(h.dispatcher.registry().find("S1").unwrap().is_open());
    }

    #[test]
    fn test_detach_removes_and_emits_once() {
        let mut h = Harness::new();
        let device = MockDevice::new("S1", 2, 4);
        let location = device.location();
        h.controller.attach(device);
        h.poll();
        h.drain_events();

        h.controller.detach(location);
        h.controller.detach(location);
        h.poll();

        assert_eq!(h.drain_events(), vec![disconnected("S1")]);
        assert!(matches!(
            h.dispatcher.registry().find("S1"),
            Err(BridgeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_detach_of_unknown_device_emits_nothing() {
        let mut h = Harness::new();
        h.controller.detach(crate::usb::transport::DeviceLocation { bus: 3, address: 9 });
        h.poll();

        assert!(h.drain_events().is_empty());
    }

    #[test]
    fn test_connect_all_isolates_failures() {
        let mut h = Harness::new();
        h.controller.connect(MockDevice::new("A", 2, 1));
        h.controller
            .connect(MockDevice::new("B", 2, 2).failing_at(MockStep::Open));
        h.controller.connect(MockDevice::new("C", 1, 3));

        let report = h.dispatcher.connect_all().unwrap();

        assert_eq!(report.opened, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            &report.failed[0],
            BridgeError::OpenFailed { serial_number, .. } if serial_number == "B"
        ));
        assert_eq!(h.drain_events(), vec![opened("A"), opened("C")]);
        assert_eq!(h.dispatcher.registry().len(), 3);
    }

    #[test]
    fn test_connect_all_replaces_registry() {
        let mut h = Harness::new();
        h.controller.attach(MockDevice::new("GONE", 2, 1));
        h.poll();
        // Unplugged but the departure is never polled
        h.controller.detach(h.dispatcher.registry().find("GONE").unwrap().location());
        h.controller.connect(MockDevice::new("NEW", 2, 2));

        h.dispatcher.connect_all().unwrap();

        assert!(h.dispatcher.registry().find("GONE").is_err());
        assert!(h.dispatcher.registry().find("NEW").is_ok());
    }

    #[test]
    fn test_connect_all_enumeration_failure() {
        let mut h = Harness::new();
        h.controller.set_enumeration_fails(true);

        assert!(matches!(
            h.dispatcher.connect_all(),
            Err(BridgeError::EnumerationFailed { .. })
        ));
    }

    #[test]
    fn test_connect_device_by_serial() {
        let mut h = Harness::new();
        h.controller.connect(MockDevice::new("A", 2, 1));
        h.controller.connect(MockDevice::new("B", 2, 2));

        h.dispatcher.connect_device("B").unwrap();

        assert_eq!(h.drain_events(), vec![opened("B")]);
        assert_eq!(h.dispatcher.registry().serial_numbers(), vec!["B"]);
    }

    #[test]
    fn test_connect_device_missing_serial() {
        let mut h = Harness::new();
        h.controller.connect(MockDevice::new("A", 2, 1));

        assert_eq!(
            h.dispatcher.connect_device("Z"),
            Err(BridgeError::NotFound {
                serial_number: "Z".to_string()
            })
        );
        assert!(h.drain_events().is_empty());
        assert!(h.dispatcher.registry().is_empty());
    }

    #[test]
    fn test_reconnect_replaces_and_closes_previous_handle() {
        let mut h = Harness::new();
        h.controller.connect(MockDevice::new("A", 2, 1));
        h.dispatcher.connect_device("A").unwrap();
        h.controller.clear_calls();

        h.dispatcher.connect_device("A").unwrap();

        let calls = h.controller.calls();
        assert_eq!(calls.first(), Some(&MockCall::Close("A".to_string())));
        assert_eq!(h.dispatcher.registry().len(), 1);
        assert!(h.dispatcher.registry().find("A").unwrap().is_open());
    }

    #[test]
    fn test_list_devices_reflects_open_state() {
        let mut h = Harness::new();
        h.controller.connect(MockDevice::new("A", 2, 1));
        h.controller
            .connect(MockDevice::new("B", 1, 2).failing_at(MockStep::ClaimInterface));
        h.dispatcher.connect_all().unwrap();

        let devices = h.dispatcher.list_devices();
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_open);
        assert!(!devices[1].is_open);
        assert_eq!(devices[1].usb_version_major, 1);
    }
}
