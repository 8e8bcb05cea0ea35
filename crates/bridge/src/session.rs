//! Caller session
//!
//! Speaks the framed protocol with one caller: requests arrive on the
//! reader, responses and device events leave on the writer. Requests are
//! answered strictly in order; events are forwarded whenever the session is
//! not busy with a request.

use anyhow::{Context, Result};
use common::UsbBridge;
use protocol::{
    BridgeError, Message, MessagePayload, ProtocolError, Rgb, read_framed_async, validate_version,
    write_framed_async,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Frames decoded by the reader task, buffered ahead of the session loop
const INCOMING_QUEUE: usize = 32;

type Incoming = std::result::Result<Message, ProtocolError>;

/// Protocol session bound to one reader/writer pair
pub struct Session<W> {
    bridge: UsbBridge,
    writer: W,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    pub fn new(bridge: UsbBridge, writer: W) -> Self {
        Self { bridge, writer }
    }

    /// Serve requests from `reader` until it reaches end of input
    ///
    /// Returns an error only when the writer fails; bad frames are reported
    /// to the caller and the session carries on. So does a dead USB worker:
    /// device requests are then answered with `Unavailable`.
    pub async fn run<R>(mut self, reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        info!("Caller session started");

        let (incoming_tx, mut incoming_rx) = mpsc::channel(INCOMING_QUEUE);
        // Frame reads are not cancel safe, so they get their own task
        let reader_task = tokio::spawn(read_requests(reader, incoming_tx));

        // Cleared once the USB worker is gone; requests are still answered,
        // each with an `Unavailable` error
        let mut events_open = true;

        let result = loop {
            tokio::select! {
                incoming = incoming_rx.recv() => {
                    let Some(incoming) = incoming else {
                        debug!("Caller closed its input");
                        break Ok(());
                    };
                    if let Err(e) = self.handle_incoming(incoming).await {
                        break Err(e);
                    }
                }

                event = self.bridge.recv_event(), if events_open => {
                    match event {
                        Ok(event) => {
                            debug!("Forwarding device event {:?}", event);
                            if let Err(e) = self.send(event.into()).await {
                                break Err(e);
                            }
                        }
                        Err(e) => {
                            error!("USB worker stopped, device commands will fail: {:#}", e);
                            events_open = false;
                        }
                    }
                }
            }
        };

        reader_task.abort();
        info!("Caller session stopped");
        result
    }

    async fn handle_incoming(&mut self, incoming: Incoming) -> Result<()> {
        let message = match incoming {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejected malformed frame: {}", e);
                return self
                    .send(MessagePayload::Error {
                        message: format!("Malformed message: {}", e),
                    })
                    .await;
            }
        };

        trace!("Received message: {:?}", message.payload);

        if let Err(e) = validate_version(&message.version) {
            warn!("Protocol version mismatch: {}", e);
            return self
                .send(MessagePayload::Error {
                    message: e.to_string(),
                })
                .await;
        }

        let response = self.handle_message(message.payload).await;
        self.send(response).await
    }

    /// Handle a protocol message and return the response payload
    async fn handle_message(&self, payload: MessagePayload) -> MessagePayload {
        match payload {
            MessagePayload::ConnectAllRequest => {
                let result = flatten(self.bridge.connect_all().await);
                if let Ok(report) = &result {
                    info!(
                        "Connect-all opened {} devices, {} failed",
                        report.opened.len(),
                        report.failed.len()
                    );
                }
                MessagePayload::ConnectAllResponse { result }
            }

            MessagePayload::ConnectDeviceRequest { serial_number } => {
                let result = flatten(self.bridge.connect_device(serial_number).await);
                MessagePayload::ConnectDeviceResponse { result }
            }

            MessagePayload::SetColorRequest {
                serial_number,
                r,
                g,
                b,
            } => {
                let result = match Rgb::from_components(r, g, b) {
                    Ok(color) => flatten(self.bridge.set_color(serial_number, color).await),
                    Err(e) => Err(e),
                };
                MessagePayload::SetColorResponse { result }
            }

            MessagePayload::ListDevicesRequest => match self.bridge.list_devices().await {
                Ok(devices) => MessagePayload::ListDevicesResponse { devices },
                Err(e) => MessagePayload::Error {
                    message: BridgeError::from(e).to_string(),
                },
            },

            MessagePayload::Ping => MessagePayload::Pong,

            other => {
                warn!("Unexpected message type: {:?}", other);
                MessagePayload::Error {
                    message: "Unsupported message type".to_string(),
                }
            }
        }
    }

    async fn send(&mut self, payload: MessagePayload) -> Result<()> {
        write_framed_async(&mut self.writer, &Message::new(payload))
            .await
            .context("Failed to write message to caller")
    }
}

/// Fold a worker-unreachable failure into the command's own error type
fn flatten<T>(
    result: common::Result<std::result::Result<T, BridgeError>>,
) -> std::result::Result<T, BridgeError> {
    result.unwrap_or_else(|e| Err(e.into()))
}

/// Decode frames from `reader` and queue them for the session loop
///
/// A frame whose body fails to decode was still consumed whole, so reading
/// continues after it. Any other failure leaves the stream position unknown
/// and ends the reader.
async fn read_requests<R>(mut reader: R, incoming: mpsc::Sender<Incoming>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = read_framed_async(&mut reader).await;

        let keep_reading = match &frame {
            Ok(_) | Err(ProtocolError::Serialization(_)) => true,
            Err(e) if e.is_eof() => break,
            Err(_) => false,
        };

        if incoming.send(frame).await.is_err() || !keep_reading {
            break;
        }
    }
}

/// Run a session over the given reader and writer
pub async fn run_session<R, W>(reader: R, writer: W, bridge: UsbBridge) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    Session::new(bridge, writer).run(reader).await
}
