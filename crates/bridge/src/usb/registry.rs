//! Device registry
//!
//! Tracks the devices currently known to the bridge, keyed by serial number.
//! A serial number present here was seen through enumeration or an attach
//! notification and has not been detached since.

use crate::usb::transport::{DeviceLocation, TransportDevice};
use protocol::{BridgeError, DeviceInfo};
use std::collections::HashMap;
use tracing::debug;

/// Result of [`DeviceRegistry::register`]
///
/// Registration overwrites: a second device with a known serial number
/// replaces the first, which is handed back to the caller.
#[derive(Debug)]
pub enum Registration<D> {
    Inserted,
    Replaced(D),
}

#[cfg(test)]
impl<D> Registration<D> {
    pub fn is_replaced(&self) -> bool {
        matches!(self, Self::Replaced(_))
    }
}

/// Registry of known devices
pub struct DeviceRegistry<D> {
    devices: HashMap<String, D>,
}

impl<D> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }
}

impl<D: TransportDevice> DeviceRegistry<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device keyed by its serial number, replacing any previous entry
    pub fn register(&mut self, device: D) -> Registration<D> {
        let serial_number = device.serial_number().to_string();
        debug!(
            "Registering device {} at {}",
            serial_number,
            device.location()
        );

        match self.devices.insert(serial_number, device) {
            Some(previous) => {
                debug!(
                    "Replaced device {} previously at {}",
                    previous.serial_number(),
                    previous.location()
                );
                Registration::Replaced(previous)
            }
            None => Registration::Inserted,
        }
    }

    /// Remove the entry for `serial_number`; no-op if absent
    pub fn unregister(&mut self, serial_number: &str) -> Option<D> {
        self.devices.remove(serial_number)
    }

    /// Remove the entry whose device sits at `location`
    ///
    /// An entry that was overwritten by a handle at a different location is
    /// left alone, so a late detach for a replaced handle is harmless.
    pub fn unregister_at(&mut self, location: DeviceLocation) -> Option<D> {
        let serial_number = self
            .devices
            .iter()
            .find(|(_, device)| device.location() == location)
            .map(|(serial, _)| serial.clone())?;

        self.unregister(&serial_number)
    }

    pub fn find(&self, serial_number: &str) -> Result<&D, BridgeError> {
        self.devices
            .get(serial_number)
            .ok_or_else(|| not_found(serial_number))
    }

    pub fn find_mut(&mut self, serial_number: &str) -> Result<&mut D, BridgeError> {
        self.devices
            .get_mut(serial_number)
            .ok_or_else(|| not_found(serial_number))
    }

    /// All registered devices, in no particular order
    pub fn list(&self) -> impl Iterator<Item = &D> {
        self.devices.values()
    }

    /// Device summaries sorted by serial number
    pub fn device_infos(&self) -> Vec<DeviceInfo> {
        let mut infos: Vec<DeviceInfo> = self.list().map(|device| device.info()).collect();
        infos.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        infos
    }

    pub fn serial_numbers(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Drop every entry and register `devices` in their place
    pub fn replace_all(&mut self, devices: impl IntoIterator<Item = D>) {
        self.devices.clear();
        for device in devices {
            self.register(device);
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn not_found(serial_number: &str) -> BridgeError {
    BridgeError::NotFound {
        serial_number: serial_number.to_string(),
    }
}
