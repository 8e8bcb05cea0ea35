//! Test utilities for usb-rgb-bridge
//!
//! Provides mock data and helper functions for testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_device_info;
//!
//! let device = create_mock_device_info("S1", 2);
//! assert_eq!(device.serial_number, "S1");
//! ```

use protocol::DeviceInfo;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceInfo for an opened device
///
/// # Arguments
/// * `serial_number` - Registry key of the device
/// * `usb_version_major` - Firmware generation (1 or 2 for real devices)
pub fn create_mock_device_info(serial_number: &str, usb_version_major: u8) -> DeviceInfo {
    DeviceInfo {
        serial_number: serial_number.to_string(),
        usb_version_major,
        is_open: true,
        vendor_id: 0x16c0,
        product_id: 0x05dc,
        bus_number: 1,
        device_address: 1,
        product: Some(format!("Test Lamp {}", serial_number)),
    }
}

/// Create a list of mock devices with serials `SN000001`, `SN000002`, ...
///
/// # Example
/// ```
/// use common::test_utils::create_mock_device_list;
///
/// let devices = create_mock_device_list(5);
/// assert_eq!(devices.len(), 5);
/// assert_eq!(devices[0].serial_number, "SN000001");
/// ```
pub fn create_mock_device_list(count: u32) -> Vec<DeviceInfo> {
    (1..=count)
        .map(|i| {
            let mut info = create_mock_device_info(&format!("SN{:06}", i), 2);
            info.device_address = (i % 128) as u8;
            info
        })
        .collect()
}

/// Fail a test with [`TimeoutError`] instead of hanging on `future`
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// A future passed to [`with_timeout`] did not finish in time
#[derive(Debug, Error)]
#[error("Test timed out after {duration:?}")]
pub struct TimeoutError {
    pub duration: Duration,
}
