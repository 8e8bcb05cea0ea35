//! Async channel bridge between Tokio runtime and USB thread

use async_channel::{Receiver, Sender, bounded};
use protocol::{BridgeError, ConnectReport, DeviceInfo, MessagePayload, Rgb};
use tokio::sync::oneshot;

/// Commands from Tokio runtime to USB thread
///
/// The USB thread drains these one at a time, in the order they were sent,
/// and answers each on its `response` channel before taking the next.
#[derive(Debug)]
pub enum UsbCommand {
    /// Enumerate, replace the registry and open every connected device
    ConnectAll {
        /// Channel to send response back
        response: oneshot::Sender<Result<ConnectReport, BridgeError>>,
    },

    /// Register and open the connected device with this serial number
    ConnectDevice {
        /// Serial number to look for
        serial_number: String,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), BridgeError>>,
    },

    /// Set the LED color of a registered device
    SetColor {
        /// Target device
        serial_number: String,
        /// Color to send
        color: Rgb,
        /// Channel to send response back
        response: oneshot::Sender<Result<(), BridgeError>>,
    },

    /// Snapshot the device registry
    ListDevices {
        /// Channel to send response back
        response: oneshot::Sender<Vec<DeviceInfo>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Device events pushed by the USB thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    /// A device completed the open sequence
    DeviceOpened { serial_number: String },

    /// A registered device was unplugged and removed from the registry
    DeviceDisconnected { serial_number: String },
}

impl UsbEvent {
    pub fn serial_number(&self) -> &str {
        match self {
            Self::DeviceOpened { serial_number } | Self::DeviceDisconnected { serial_number } => {
                serial_number
            }
        }
    }
}

impl From<UsbEvent> for MessagePayload {
    fn from(event: UsbEvent) -> Self {
        match event {
            UsbEvent::DeviceOpened { serial_number } => {
                MessagePayload::DeviceOpened { serial_number }
            }
            UsbEvent::DeviceDisconnected { serial_number } => {
                MessagePayload::DeviceDisconnected { serial_number }
            }
        }
    }
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Run connect-all on the USB thread and wait for its report
    pub async fn connect_all(&self) -> crate::Result<Result<ConnectReport, BridgeError>> {
        let (response, rx) = oneshot::channel();
        self.send_command(UsbCommand::ConnectAll { response }).await?;
        Self::await_response(rx).await
    }

    /// Run connect-by-serial on the USB thread
    pub async fn connect_device(
        &self,
        serial_number: impl Into<String>,
    ) -> crate::Result<Result<(), BridgeError>> {
        let (response, rx) = oneshot::channel();
        self.send_command(UsbCommand::ConnectDevice {
            serial_number: serial_number.into(),
            response,
        })
        .await?;
        Self::await_response(rx).await
    }

    /// Run set-color on the USB thread
    pub async fn set_color(
        &self,
        serial_number: impl Into<String>,
        color: Rgb,
    ) -> crate::Result<Result<(), BridgeError>> {
        let (response, rx) = oneshot::channel();
        self.send_command(UsbCommand::SetColor {
            serial_number: serial_number.into(),
            color,
            response,
        })
        .await?;
        Self::await_response(rx).await
    }

    /// Fetch a snapshot of the registered devices
    pub async fn list_devices(&self) -> crate::Result<Vec<DeviceInfo>> {
        let (response, rx) = oneshot::channel();
        self.send_command(UsbCommand::ListDevices { response })
            .await?;
        Self::await_response(rx).await
    }

    /// Ask the USB thread to stop
    pub async fn shutdown(&self) -> crate::Result<()> {
        self.send_command(UsbCommand::Shutdown).await
    }

    async fn await_response<T>(rx: oneshot::Receiver<T>) -> crate::Result<T> {
        rx.await
            .map_err(|_| crate::Error::Channel("USB thread dropped the response".to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
    /// Event sender (public for USB worker thread to access)
    pub event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Whether every `UsbBridge` has been dropped
    pub fn is_disconnected(&self) -> bool {
        self.cmd_rx.is_closed()
    }

    /// Refuse further commands and fail the ones still queued
    ///
    /// A caller waiting on a queued command gets a channel error instead of
    /// a response that never arrives. Event receivers see the channel close.
    pub fn close(self) {
        self.cmd_rx.close();
        self.event_tx.close();

        let mut abandoned = 0;
        while self.cmd_rx.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            tracing::debug!("Dropped {} queued USB commands", abandoned);
        }
    }

    /// Send an event to Tokio runtime (blocking)
    pub fn send_event(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}
