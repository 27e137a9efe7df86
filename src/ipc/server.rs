//! Unix domain socket server for IPC
//!
//! Provides request-response access to the detector and pushes detector
//! events to subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::detector::MuteDetector;
use crate::events::DetectorEvent;

use super::protocol::{DaemonStatus, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    detector: MuteDetector,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket and serve `detector`
    pub fn bind(socket_path: &Path, detector: MuteDetector) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            detector,
            start_time: Instant::now(),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let client = Client {
                        detector: self.detector.clone(),
                        start_time: self.start_time,
                        events: None,
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = client.serve(stream) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Per-connection state
struct Client {
    detector: MuteDetector,
    start_time: Instant,
    /// Present once the client subscribed
    events: Option<broadcast::Receiver<DetectorEvent>>,
}

impl Client {
    async fn serve(mut self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so event pushes never interrupt a
        // partially read request
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let read_task = tokio::spawn(read_requests(reader, request_tx));

        // Manual checks wait on playback, their results come back here
        let (deferred_tx, mut deferred_rx) = mpsc::channel(8);

        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    debug!(?request, "received request");
                    if let Some(response) = self.process_request(request, &deferred_tx).await {
                        write_frame(&mut writer, &response).await?;
                    }
                }

                Some(response) = deferred_rx.recv() => {
                    write_frame(&mut writer, &response).await?;
                }

                event = next_event(&mut self.events) => match event {
                    Ok(event) => {
                        write_frame(&mut writer, &Response::Event { event }).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.events = None;
                    }
                },
            }
        }

        match read_task.await {
            Ok(result) => result,
            Err(e) => bail!("request reader failed: {e}"),
        }
    }

    /// Process a request and return a response.
    ///
    /// `None` means the response is sent later through `deferred`.
    async fn process_request(
        &mut self,
        request: Request,
        deferred: &mpsc::Sender<Response>,
    ) -> Option<Response> {
        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match self.detector.status().await {
                Ok(detector) => Response::Status(DaemonStatus::new(
                    self.start_time.elapsed().as_secs(),
                    detector,
                )),
                Err(e) => Response::error("detector_closed", e.to_string()),
            },

            Request::CheckNow => {
                let ticket = self.detector.check_once();
                let deferred = deferred.clone();
                tokio::spawn(async move {
                    let muted = ticket.await;
                    if deferred.send(Response::CheckResult { muted }).await.is_err() {
                        debug!("client gone before check completed");
                    }
                });
                return None;
            }

            Request::SetPeriodic { enabled } => {
                self.detector.set_periodic(enabled);
                Response::Ok
            }

            Request::SetPaused { paused } => {
                info!(paused, "pause changed via IPC");
                self.detector.set_paused(paused);
                Response::Ok
            }

            Request::SetInterval { seconds } => {
                self.detector.set_probe_interval(seconds);
                Response::Ok
            }

            Request::SetNotifyEveryProbe { enabled } => {
                self.detector.set_notify_every_probe(enabled);
                Response::Ok
            }

            Request::Subscribe => {
                if self.events.is_none() {
                    self.events = Some(self.detector.subscribe());
                    debug!("client subscribed to notifications");
                }
                Response::Subscribed
            }
        };
        Some(response)
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<DetectorEvent>>,
) -> Result<DetectorEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read requests until the client disconnects
async fn read_requests<R>(mut reader: R, request_tx: mpsc::Sender<Request>) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    while let Some(request) = read_frame::<_, Request>(&mut reader).await? {
        if request_tx.send(request).await.is_err() {
            break;
        }
    }
    debug!("client disconnected");
    Ok(())
}

/// Read one length-prefixed JSON message, `None` on clean EOF
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("message too large ({len} bytes)");
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;

    let msg = serde_json::from_slice(&msg_buf).context("failed to parse message")?;
    Ok(Some(msg))
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}
