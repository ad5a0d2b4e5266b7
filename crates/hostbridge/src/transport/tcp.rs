//! Newline-framed TCP transport.
//!
//! Per connection: Accepted → Reading → Dispatched → Responding → Closed,
//! or back to Reading when persistent connections are enabled. One JSON
//! object per line in each direction.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bridge::codec::JsonLinesCodec;
use crate::bridge::protocol::{Command, ErrorKind, Outcome, WireResponse};
use crate::config::BridgeConfig;
use crate::service::BridgeService;

/// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long a rejected connection keeps reading the rest of the bad frame
/// before closing. Closing with unread input makes the kernel send RST,
/// which can destroy the error response in flight.
const REJECT_LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct ConnectionSettings {
    read_timeout: Duration,
    max_frame_bytes: usize,
    persistent: bool,
}

impl From<&BridgeConfig> for ConnectionSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            max_frame_bytes: config.max_frame_bytes,
            persistent: config.persistent_connections,
        }
    }
}

/// Handle to a running socket server.
///
/// Dropping the handle without calling [`stop`](Self::stop) leaves the
/// server running until the service itself shuts down.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, then wait (bounded by the shutdown grace) for open
    /// connections to finish.
    pub async fn stop(self) {
        info!(addr = %self.local_addr, "Stopping socket server");
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Socket server task failed");
        }
    }

    /// Wait for the server to stop on its own (service shutdown).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Socket server task failed");
        }
    }
}

pub struct TcpBridgeServer;

impl TcpBridgeServer {
    /// Bind `config.host:config.port` and start serving `service`.
    pub async fn start<S: 'static>(
        config: &BridgeConfig,
        service: Arc<BridgeService<S>>,
    ) -> anyhow::Result<ServerHandle> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Starting hostbridge socket server on {}", local_addr);

        let (stop_tx, stop_rx) = watch::channel(false);
        let settings = ConnectionSettings::from(config);
        let grace = config.shutdown_grace;
        let task = tokio::spawn(accept_loop(listener, service, settings, grace, stop_rx));

        Ok(ServerHandle {
            local_addr,
            stop_tx,
            task,
        })
    }
}

/// Resolve once `rx` holds true. Never resolves if the sender is gone.
async fn wait_for_true(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn accept_loop<S: 'static>(
    listener: TcpListener,
    service: Arc<BridgeService<S>>,
    settings: ConnectionSettings,
    grace: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut service_shutdown = service.shutdown_rx();
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            biased;

            _ = wait_for_true(&mut stop_rx) => {
                debug!("Stop signal received");
                break;
            }
            _ = wait_for_true(&mut service_shutdown) => {
                debug!("Service shutdown observed");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let service = Arc::clone(&service);
                        let settings = settings.clone();
                        let stop_rx = stop_rx.clone();
                        tracker.spawn(async move {
                            handle_connection(stream, peer, service, settings, stop_rx).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }

    drop(listener);
    tracker.close();
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(
            open_connections = tracker.len(),
            "Connections still open after shutdown grace period"
        );
    }
    info!("Socket server stopped");
}

enum ReadResult {
    Command(Command),
    Rejected(Outcome),
    Closed,
}

async fn read_command(
    reader: &mut FramedRead<tokio::net::tcp::OwnedReadHalf, JsonLinesCodec<Command>>,
    peer: SocketAddr,
    read_timeout: Duration,
) -> ReadResult {
    match tokio::time::timeout(read_timeout, reader.next()).await {
        Err(_) => {
            warn!(%peer, timeout_ms = read_timeout.as_millis() as u64, "No complete request in time, closing");
            ReadResult::Closed
        }
        Ok(None) => {
            debug!(%peer, "Peer closed connection");
            ReadResult::Closed
        }
        Ok(Some(Ok(command))) => ReadResult::Command(command),
        Ok(Some(Err(e))) if e.is_decode_error() => {
            warn!(%peer, error = %e, "Malformed request");
            ReadResult::Rejected(Outcome::failure(ErrorKind::DecodeError, e.to_string()))
        }
        Ok(Some(Err(e))) => {
            warn!(%peer, error = %e, "Read failed");
            ReadResult::Closed
        }
    }
}

async fn handle_connection<S>(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<BridgeService<S>>,
    settings: ConnectionSettings,
    mut stop_rx: watch::Receiver<bool>,
) {
    debug!(%peer, "Connection accepted");
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        JsonLinesCodec::<Command>::with_max_frame_bytes(settings.max_frame_bytes),
    );
    let mut writer = FramedWrite::new(
        write_half,
        JsonLinesCodec::<WireResponse>::with_max_frame_bytes(settings.max_frame_bytes),
    );

    let mut rejected = false;
    loop {
        let read = tokio::select! {
            _ = wait_for_true(&mut stop_rx) => {
                debug!(%peer, "Server stopping, closing connection");
                break;
            }
            read = read_command(&mut reader, peer, settings.read_timeout) => read,
        };

        // A framing error leaves the stream unusable, so answer and close.
        let (outcome, close_after) = match read {
            ReadResult::Closed => break,
            ReadResult::Rejected(outcome) => {
                rejected = true;
                (outcome, true)
            }
            ReadResult::Command(command) => {
                debug!(%peer, tool = %command.tool, "Dispatching");
                (service.execute(command).await, !settings.persistent)
            }
        };

        if let Err(e) = writer.send(outcome.into_wire()).await {
            warn!(%peer, error = %e, "Failed to write response");
            break;
        }
        if close_after {
            break;
        }
    }

    if let Err(e) = shutdown_writer(writer).await {
        debug!(%peer, error = %e, "Error closing connection");
    }
    if rejected {
        let discarded = discard_input(reader.into_inner(), REJECT_LINGER).await;
        debug!(%peer, discarded_bytes = discarded, "Discarded input after rejected frame");
    }
    debug!(%peer, "Connection closed");
}

/// Read and drop whatever the peer still sends, until EOF or `linger`.
async fn discard_input(mut read_half: tokio::net::tcp::OwnedReadHalf, linger: Duration) -> usize {
    use tokio::io::AsyncReadExt;
    let mut buf = [0u8; 8192];
    let mut discarded = 0;
    let _ = tokio::time::timeout(linger, async {
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => discarded += n,
            }
        }
    })
    .await;
    discarded
}

async fn shutdown_writer(
    mut writer: FramedWrite<tokio::net::tcp::OwnedWriteHalf, JsonLinesCodec<WireResponse>>,
) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;
    writer.get_mut().shutdown().await
}
