//! USB worker thread
//!
//! Dedicated thread that owns the transport and the dispatcher. Commands from
//! the Tokio runtime are drained one at a time; between commands the thread
//! waits for USB events so attach/detach notifications are applied without
//! ever interleaving with a command in progress.

use crate::usb::dispatcher::Dispatcher;
use crate::usb::rusb_transport::RusbTransport;
use crate::usb::transport::{TransportError, UsbTransport};
use common::{UsbCommand, UsbWorker};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Settings the worker needs from the bridge configuration
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// VID:PID patterns of devices to manage
    pub filters: Vec<String>,
    /// How long one poll waits for USB events
    pub poll_interval: Duration,
    /// Timeout applied to each control transfer
    pub transfer_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            poll_interval: Duration::from_millis(100),
            transfer_timeout: Duration::from_millis(1000),
        }
    }
}

/// USB worker thread
///
/// Processes commands from the Tokio runtime and sends events back.
pub struct UsbWorkerThread<T: UsbTransport> {
    dispatcher: Dispatcher<T>,
    /// Communication channel with Tokio runtime
    worker: UsbWorker,
    poll_interval: Duration,
}

impl<T: UsbTransport> UsbWorkerThread<T> {
    pub fn new(transport: T, worker: UsbWorker, poll_interval: Duration) -> Self {
        let dispatcher = Dispatcher::new(transport, worker.event_tx.clone());
        Self {
            dispatcher,
            worker,
            poll_interval,
        }
    }

    /// Run the USB worker thread event loop
    ///
    /// Each iteration takes at most one command, runs it to completion, then
    /// waits up to the poll interval for attach/detach notifications. The
    /// loop ends on a Shutdown command or once every bridge handle is gone.
    pub fn run(mut self) {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(cmd) => self.handle_command(cmd),
                None if self.worker.is_disconnected() => {
                    info!("All bridge handles dropped, stopping USB worker");
                    break;
                }
                None => {}
            }

            if let Err(e) = self.dispatcher.poll_presence(self.poll_interval) {
                warn!("Error handling USB events: {}", e);
                // Don't spin on a persistent error
                std::thread::sleep(self.poll_interval);
            }
        }

        self.worker.close();
        info!("USB worker thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: UsbCommand) {
        // A panic must not take the registry down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&mut self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ConnectAll { response } => {
                debug!("Connecting all devices");
                let _ = response.send(self.dispatcher.connect_all());
            }

            UsbCommand::ConnectDevice {
                serial_number,
                response,
            } => {
                debug!("Connecting device {}", serial_number);
                let _ = response.send(self.dispatcher.connect_device(&serial_number));
            }

            UsbCommand::SetColor {
                serial_number,
                color,
                response,
            } => {
                debug!("Setting color of {} to {:?}", serial_number, color);
                let _ = response.send(self.dispatcher.set_color(&serial_number, color));
            }

            UsbCommand::ListDevices { response } => {
                let devices = self.dispatcher.list_devices();
                debug!("Listing {} devices", devices.len());
                let _ = response.send(devices);
            }

            UsbCommand::Shutdown => {
                // Already handled in main loop
                unreachable!()
            }
        }
    }
}

/// Spawn a worker thread around the transport built by `make_transport`
///
/// The transport is created on the worker thread itself, so it does not
/// need to be `Send`.
pub fn spawn_worker_with<T, F>(
    worker: UsbWorker,
    poll_interval: Duration,
    make_transport: F,
) -> std::io::Result<std::thread::JoinHandle<Result<(), TransportError>>>
where
    T: UsbTransport,
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
{
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let transport = match make_transport() {
                Ok(transport) => transport,
                Err(e) => {
                    error!("Failed to initialize USB transport: {}", e);
                    worker.close();
                    return Err(e);
                }
            };
            UsbWorkerThread::new(transport, worker, poll_interval).run();
            Ok(())
        })
}

/// Spawn the libusb-backed USB worker thread
pub fn spawn_usb_worker(
    worker: UsbWorker,
    settings: WorkerSettings,
) -> std::io::Result<std::thread::JoinHandle<Result<(), TransportError>>> {
    let WorkerSettings {
        filters,
        poll_interval,
        transfer_timeout,
    } = settings;

    spawn_worker_with(worker, poll_interval, move || {
        RusbTransport::new(filters, transfer_timeout).map_err(TransportError::from)
    })
}
