//! Per-connection relay handling
//!
//! Each accepted socket gets a [`RelaySession`] that owns it outright. The
//! session splits the socket: its reader relays every complete record to the
//! other sessions through the [`SessionRegistry`], and a writer task drains
//! the session's own bounded outbound queue onto the socket.

use crate::network::ServerConfig;
use crate::registry::{Record, SessionHandle, SessionId, SessionRegistry};
use log::{debug, info, warn};
use shared::framing::frame;
use shared::{decode, encode_record, Envelope, MessageType, Reassembler};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// How long a finished session waits for its writer to flush queued records.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct RelaySession {
    handle: SessionHandle,
    stream: TcpStream,
    outbound_rx: mpsc::Receiver<Record>,
    alive: Arc<AtomicBool>,
    registry: Arc<SessionRegistry>,
    read_buffer_size: usize,
}

impl RelaySession {
    pub fn new(
        id: SessionId,
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<SessionRegistry>,
        config: &ServerConfig,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let alive = Arc::new(AtomicBool::new(true));

        Self {
            handle: SessionHandle::new(id, peer, outbound_tx, Arc::clone(&alive)),
            stream,
            outbound_rx,
            alive,
            registry,
            read_buffer_size: config.read_buffer_size,
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.handle.peer
    }

    /// Handle to register with the registry before the session runs.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Relays until the peer closes, a read fails, or the writer dies.
    /// Then tells everyone else the peer left and unregisters.
    pub async fn run(self) {
        let RelaySession {
            handle,
            stream,
            outbound_rx,
            alive,
            registry,
            read_buffer_size,
        } = self;
        let id = handle.id;
        let origin = handle.peer.to_string();

        let (reader, writer) = stream.into_split();
        let mut writer_task = tokio::spawn(write_loop(writer, outbound_rx, alive, id));

        match relay_loop(reader, &registry, id, read_buffer_size, &mut writer_task).await {
            Ok(()) => info!("Session {} ({}) closed", id, origin),
            Err(e) => warn!("Session {} ({}) read failed: {}", id, origin, e),
        }

        registry.unregister(id).await;
        match encode_record(&Envelope::disconnect(origin.as_str())) {
            Ok(record) => {
                let report = registry.broadcast(Arc::from(record), Some(id)).await;
                debug!(
                    "Disconnect of {} sent to {} sessions",
                    origin, report.delivered
                );
            }
            Err(e) => warn!("Failed to encode disconnect for {}: {}", origin, e),
        }

        // Last sender goes with the handle, letting the writer drain and stop.
        drop(handle);
        if !writer_task.is_finished()
            && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task)
                .await
                .is_err()
        {
            debug!("Session {} writer did not drain in time", id);
            writer_task.abort();
        }
    }
}

/// Reads records and broadcasts each one, verbatim, to every other session.
///
/// Returns when the reader hits end-of-stream or `stop` completes.
pub(crate) async fn relay_loop<R, F>(
    mut reader: R,
    registry: &SessionRegistry,
    id: SessionId,
    buffer_size: usize,
    stop: F,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    F: Future,
{
    tokio::pin!(stop);
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut reassembler = Reassembler::with_capacity(buffer_size);

    loop {
        let len = tokio::select! {
            _ = &mut stop => {
                debug!("Session {} writer stopped, ending relay", id);
                return Ok(());
            }
            result = reader.read(&mut buffer) => result?,
        };

        if len == 0 {
            return Ok(());
        }

        reassembler
            .feed(&buffer[..len])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for record in reassembler.take_records() {
            log_record(id, &record);
            registry.broadcast(Arc::from(frame(&record)), Some(id)).await;
        }
    }
}

/// Best-effort decode purely for logging. Undecodable records are still relayed.
fn log_record(id: SessionId, record: &[u8]) {
    match decode(record) {
        Ok(envelope) => {
            let data = &envelope.data;
            match envelope.kind {
                MessageType::Update => debug!(
                    "Session {}: update from {} pos {} rot {}",
                    id, data.id, data.position, data.rotation
                ),
                MessageType::Fire => info!(
                    "Session {}: fire from {} pos {} rot {}",
                    id, data.id, data.position, data.rotation
                ),
                MessageType::Disconnect => info!("Session {}: disconnect from {}", id, data.id),
                MessageType::Unknown => debug!("Session {}: record of unknown type", id),
            }
        }
        Err(e) => warn!("Session {}: relaying undecodable record: {}", id, e),
    }
}

/// Drains the outbound queue onto the socket until the queue closes or a write fails.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Record>,
    alive: Arc<AtomicBool>,
    id: SessionId,
) {
    while let Some(record) = outbound_rx.recv().await {
        if let Err(e) = writer.write_all(&record).await {
            warn!("Session {} write failed: {}", id, e);
            alive.store(false, Ordering::SeqCst);
            return;
        }
    }

    let _ = writer.shutdown().await;
}
