//! libusb transport
//!
//! Implements the transport traits on top of rusb. Devices are wrapped with
//! their cached descriptor and serial number; hot-plug notifications are
//! queued by a libusb callback and handed out by `poll_presence`.

use crate::usb::transport::{
    DeviceLocation, PresenceEvent, TransportDevice, TransportError, UsbTransport,
};
use protocol::{ControlSetup, DeviceInfo};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, Hotplug, HotplugBuilder, UsbContext};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// USB device wrapper with cached information
pub struct RusbDevice {
    /// Underlying rusb device
    device: Device<Context>,
    /// Cached device descriptor
    descriptor: DeviceDescriptor,
    /// Serial number read at probe time
    serial_number: String,
    /// Product string read at probe time
    product: Option<String>,
    /// Device handle (if opened)
    handle: Option<DeviceHandle<Context>>,
    /// Interfaces claimed by us
    claimed_interfaces: Vec<u8>,
    transfer_timeout: Duration,
}

impl RusbDevice {
    /// Read the descriptor and serial number of `device`
    ///
    /// Returns `Ok(None)` for devices without a serial number string, which
    /// cannot be addressed by callers.
    pub fn probe(
        device: Device<Context>,
        transfer_timeout: Duration,
    ) -> Result<Option<Self>, rusb::Error> {
        let descriptor = device.device_descriptor()?;

        let Some(serial_index) = descriptor.serial_number_string_index() else {
            debug!(
                "Skipping device without serial number: bus={}, addr={}",
                device.bus_number(),
                device.address()
            );
            return Ok(None);
        };

        // Temporary handle just for the string descriptors
        let handle = device.open()?;
        let serial_number = handle.read_string_descriptor_ascii(serial_index)?;
        let product = descriptor
            .product_string_index()
            .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok());
        drop(handle);

        Ok(Some(Self {
            device,
            descriptor,
            serial_number,
            product,
            handle: None,
            claimed_interfaces: Vec::new(),
            transfer_timeout,
        }))
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>, TransportError> {
        self.handle.as_ref().ok_or(TransportError::NotOpen)
    }

    fn handle_mut(&mut self) -> Result<&mut DeviceHandle<Context>, TransportError> {
        self.handle.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl TransportDevice for RusbDevice {
    fn serial_number(&self) -> &str {
        &self.serial_number
    }

    fn usb_version_major(&self) -> u8 {
        self.descriptor.usb_version().major()
    }

    fn location(&self) -> DeviceLocation {
        DeviceLocation {
            bus: self.device.bus_number(),
            address: self.device.address(),
        }
    }

    fn configuration(&self) -> Option<u8> {
        match &self.handle {
            // bConfigurationValue 0 means unconfigured
            Some(handle) => handle.active_configuration().ok().filter(|&value| value != 0),
            None => self
                .device
                .active_config_descriptor()
                .ok()
                .map(|config| config.number()),
        }
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if self.handle.is_some() {
            return Ok(()); // Already open
        }

        let handle = self.device.open().inspect_err(|e| {
            warn!("Failed to open device {}: {}", self.serial_number, e);
        })?;

        debug!("Opened device {}", self.serial_number);
        self.handle = Some(handle);
        Ok(())
    }

    fn select_configuration(&mut self, configuration: u8) -> Result<(), TransportError> {
        self.handle_mut()?.set_active_configuration(configuration)?;
        debug!(
            "Selected configuration {} on device {}",
            configuration, self.serial_number
        );
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        let serial_number = self.serial_number.clone();
        let handle = self.handle_mut()?;

        // Detach kernel driver if active
        match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!(
                    "Detaching kernel driver from interface {} on device {}",
                    interface, serial_number
                );
                if let Err(e) = handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => trace!("No kernel driver active on interface {}", interface),
            Err(e) => trace!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }

        handle.claim_interface(interface).inspect_err(|e| {
            warn!("Failed to claim interface {}: {}", interface, e);
        })?;

        debug!("Claimed interface {} on device {}", interface, serial_number);
        self.claimed_interfaces.push(interface);
        Ok(())
    }

    /// Release claimed interfaces and reattach kernel drivers
    fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            for interface in &self.claimed_interfaces {
                if let Err(e) = handle.release_interface(*interface) {
                    warn!("Failed to release interface {}: {}", interface, e);
                }

                if let Err(e) = handle.attach_kernel_driver(*interface) {
                    trace!(
                        "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                        interface, e
                    );
                }
            }
            self.claimed_interfaces.clear();

            debug!("Closed device {}", self.serial_number);
        }
    }

    fn control_transfer_out(
        &mut self,
        setup: &ControlSetup,
        payload: &[u8],
    ) -> Result<usize, TransportError> {
        debug!(
            "Control transfer: request_type={:#x}, request={:#x}, value={:#x}, index={:#x}, data_len={}",
            setup.request_type(),
            setup.request,
            setup.value,
            setup.index,
            payload.len()
        );

        let written = self.handle()?.write_control(
            setup.request_type(),
            setup.request,
            setup.value,
            setup.index,
            payload,
            self.transfer_timeout,
        )?;
        Ok(written)
    }

    fn info(&self) -> DeviceInfo {
        let location = self.location();
        DeviceInfo {
            serial_number: self.serial_number.clone(),
            usb_version_major: self.usb_version_major(),
            is_open: self.is_open(),
            vendor_id: self.descriptor.vendor_id(),
            product_id: self.descriptor.product_id(),
            bus_number: location.bus,
            device_address: location.address,
            product: self.product.clone(),
        }
    }
}

impl Drop for RusbDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// Raw hot-plug notification queued by the libusb callback
enum HotplugNotice {
    Arrived(Device<Context>),
    Left(DeviceLocation),
}

/// libusb-backed transport
pub struct RusbTransport {
    /// USB context for device operations
    context: Context,
    /// Device filters (VID:PID patterns)
    allowed_filters: Vec<String>,
    transfer_timeout: Duration,
    hotplug_rx: async_channel::Receiver<HotplugNotice>,
    /// Hot-plug registration, kept alive for the lifetime of the transport
    _hotplug_registration: Option<rusb::Registration<Context>>,
}

impl RusbTransport {
    /// Create the libusb context and register for hot-plug notifications
    /// where the platform supports them
    pub fn new(
        allowed_filters: Vec<String>,
        transfer_timeout: Duration,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (hotplug_tx, hotplug_rx) = async_channel::unbounded();

        let registration = if rusb::has_hotplug() {
            let registration = HotplugBuilder::new()
                .enumerate(false) // Enumeration is driven by connect commands
                .register(&context, Box::new(HotplugCallback { hotplug_tx }))?;
            debug!("Hot-plug callbacks registered");
            Some(registration)
        } else {
            warn!("libusb has no hot-plug support here, attach/detach will not be tracked");
            None
        };

        Ok(Self {
            context,
            allowed_filters,
            transfer_timeout,
            hotplug_rx,
            _hotplug_registration: registration,
        })
    }

    /// Apply filters and probe a raw device
    fn admit(&self, device: Device<Context>) -> Option<RusbDevice> {
        let bus = device.bus_number();
        let address = device.address();

        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                debug!("Cannot read descriptor of bus={}, addr={}: {}", bus, address, e);
                return None;
            }
        };

        // Root hubs are VID 0x1d6b (Linux Foundation) with device class 9 (Hub)
        if desc.vendor_id() == 0x1d6b && desc.class_code() == 9 {
            trace!("Skipping root hub: bus={}, addr={}", bus, address);
            return None;
        }

        if !check_filter(desc.vendor_id(), desc.product_id(), &self.allowed_filters) {
            trace!(
                "Device ignored by filter: bus={}, addr={}, vid={:#x}, pid={:#x}",
                bus,
                address,
                desc.vendor_id(),
                desc.product_id()
            );
            return None;
        }

        match RusbDevice::probe(device, self.transfer_timeout) {
            Ok(probed) => probed,
            Err(e) => {
                debug!("Failed to probe device bus={}, addr={}: {}", bus, address, e);
                None
            }
        }
    }
}

impl UsbTransport for RusbTransport {
    type Device = RusbDevice;

    fn connected_devices(&mut self) -> Result<Vec<RusbDevice>, TransportError> {
        let devices = self.context.devices()?;
        Ok(devices
            .iter()
            .filter_map(|device| self.admit(device))
            .collect())
    }

    fn poll_presence(
        &mut self,
        timeout: Duration,
    ) -> Result<Vec<PresenceEvent<RusbDevice>>, TransportError> {
        match self.context.handle_events(Some(timeout)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => debug!("USB event handling interrupted"),
            Err(e) => return Err(e.into()),
        }

        let mut events = Vec::new();
        while let Ok(notice) = self.hotplug_rx.try_recv() {
            match notice {
                HotplugNotice::Arrived(device) => {
                    if let Some(device) = self.admit(device) {
                        events.push(PresenceEvent::Arrived(device));
                    }
                }
                HotplugNotice::Left(location) => events.push(PresenceEvent::Left(location)),
            }
        }
        Ok(events)
    }
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filter format: "0xVID:0xPID", "0xVID:*" or "*:0xPID". An empty filter
/// list admits nothing; `"*:*"` has to be listed to manage every device.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    let matches = |pattern: &str, id: u16| {
        pattern == "*"
            || u16::from_str_radix(pattern.trim_start_matches("0x").trim_start_matches("0X"), 16)
                .map(|value| value == id)
                .unwrap_or(false)
    };

    filters.iter().any(|filter| match filter.split_once(':') {
        Some((filter_vid, filter_pid)) => matches(filter_vid, vid) && matches(filter_pid, pid),
        None => false,
    })
}

/// Hot-plug callback handler
///
/// libusb forbids blocking calls inside the callback, so it only queues the
/// raw device; probing happens in `poll_presence`.
struct HotplugCallback {
    hotplug_tx: async_channel::Sender<HotplugNotice>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        trace!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.hotplug_tx.try_send(HotplugNotice::Arrived(device)) {
            warn!("Dropped hot-plug arrival: {}", e);
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let location = DeviceLocation {
            bus: device.bus_number(),
            address: device.address(),
        };
        trace!("Hot-plug callback: device left ({})", location);
        if let Err(e) = self.hotplug_tx.try_send(HotplugNotice::Left(location)) {
            warn!("Dropped hot-plug departure: {}", e);
        }
    }
}
