//! Client network pump bridging background socket I/O and the simulation loop
//!
//! A connected pump runs two tasks on the tokio runtime it was given:
//! - **Send loop**: every `send_interval` writes the latest pose record from the
//!   pending-outbound slot, and writes fire records the moment they are queued.
//! - **Receive loop**: reads, reassembles and decodes records, and queues one
//!   [`DeferredAction`] per remote event for the simulation thread.
//!
//! The simulation thread only ever touches the slot (under a lock held for a
//! copy) and the action queue (drained by [`NetworkPump::pump_deferred_actions`]).
//! It never waits on the socket.

use crate::actions::{DeferredAction, SimulationHandler};
use log::{debug, error, info, warn};
use shared::{
    decode, encode_record, EncodeError, Envelope, Reassembler, Vec3, DEFAULT_SEND_INTERVAL_MS,
    READ_BUFFER_SIZE,
};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("not connected")]
    NotConnected,
    #[error("connection is already {0}")]
    AlreadyActive(ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Period of the pose send loop.
    pub send_interval: Duration,
    /// Size of the socket read buffer.
    pub read_buffer_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(DEFAULT_SEND_INTERVAL_MS),
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

/// State shared between the simulation thread and the connection tasks.
struct PumpShared {
    state: Mutex<ConnectionState>,
    /// Pending-outbound slot: latest encoded `update` record, overwritten each frame.
    pending_update: Mutex<Option<Vec<u8>>>,
    /// Our address as the relay sees it. Set only while connected.
    local_id: Mutex<Option<String>>,
    actions: mpsc::UnboundedSender<DeferredAction>,
}

/// One connection attempt and, if it succeeds, its lifetime.
struct Link {
    shutdown: watch::Sender<bool>,
    fire_tx: mpsc::UnboundedSender<Vec<u8>>,
    established: AtomicBool,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PumpShared {
    fn enqueue(&self, action: DeferredAction) {
        // Fails only once the pump itself is gone.
        let _ = self.actions.send(action);
    }

    /// Queues an action on behalf of `link`, unless the link was already torn
    /// down. Nothing a link queues can land after its `ConnectionLost`.
    fn enqueue_for(&self, link: &Link, action: DeferredAction) -> bool {
        let _state = lock(&self.state);
        if link.closed.load(Ordering::SeqCst) {
            return false;
        }

        self.enqueue(action);
        true
    }

    /// `Connecting -> Connected`, unless the link was torn down meanwhile.
    fn mark_connected(&self, link: &Link, local_id: &str) -> bool {
        let mut state = lock(&self.state);
        if link.closed.load(Ordering::SeqCst) {
            return false;
        }

        *lock(&self.pending_update) = None;
        *lock(&self.local_id) = Some(local_id.to_string());
        link.established.store(true, Ordering::SeqCst);
        *state = ConnectionState::Connected;
        self.enqueue(DeferredAction::Connected {
            local_id: local_id.to_string(),
        });
        true
    }

    /// `Connecting -> Disconnected` after a failed connect.
    fn mark_connect_failed(&self, link: &Link, error: &PumpError) {
        let mut state = lock(&self.state);
        if link.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        *state = ConnectionState::Disconnected;
        self.enqueue(DeferredAction::ConnectFailed {
            reason: error.to_string(),
        });
    }

    /// Stops both loops and returns to `Disconnected`. Runs once per link;
    /// later calls are no-ops.
    fn teardown(&self, link: &Link) {
        let mut state = lock(&self.state);
        if link.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = link.shutdown.send(true);
        *lock(&self.pending_update) = None;
        *lock(&self.local_id) = None;
        *state = ConnectionState::Disconnected;

        if link.established.load(Ordering::SeqCst) {
            self.enqueue(DeferredAction::ConnectionLost);
        }
    }
}

/// Owns one outbound relay connection on behalf of a single-threaded simulation.
///
/// All methods take `&self` so the pump can be shared (`Arc<NetworkPump>`)
/// with whatever fires weapons, while one simulation thread drains actions.
pub struct NetworkPump {
    runtime: Handle,
    config: PumpConfig,
    shared: Arc<PumpShared>,
    inbound: Mutex<mpsc::UnboundedReceiver<DeferredAction>>,
    link: Mutex<Option<Arc<Link>>>,
}

impl NetworkPump {
    /// Creates a disconnected pump whose background tasks will run on `runtime`.
    pub fn new(runtime: Handle, config: PumpConfig) -> Self {
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();

        Self {
            runtime,
            config,
            shared: Arc::new(PumpShared {
                state: Mutex::new(ConnectionState::Disconnected),
                pending_update: Mutex::new(None),
                local_id: Mutex::new(None),
                actions: actions_tx,
            }),
            inbound: Mutex::new(actions_rx),
            link: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Identifier peers see for us; `None` unless connected.
    pub fn local_id(&self) -> Option<String> {
        lock(&self.shared.local_id).clone()
    }

    /// Starts connecting in the background and returns immediately.
    ///
    /// The outcome arrives through the action queue as `on_connected` or
    /// `on_connect_failed`. Fails only if a connection is already in progress.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), PumpError> {
        let mut state = lock(&self.shared.state);
        if *state != ConnectionState::Disconnected {
            return Err(PumpError::AlreadyActive(*state));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            shutdown: shutdown_tx,
            fire_tx,
            established: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        *lock(&self.link) = Some(Arc::clone(&link));
        *state = ConnectionState::Connecting;

        let addr = format!("{}:{}", host, port);
        info!("Connecting to {}", addr);
        self.runtime.spawn(run_connection(
            addr,
            self.config.clone(),
            Arc::clone(&self.shared),
            link,
            fire_rx,
            shutdown_rx,
        ));

        Ok(())
    }

    /// Overwrites the pending-outbound slot with our latest pose.
    ///
    /// Call once per frame. Only the newest pose is ever sent; older ones are
    /// replaced, not queued. Ignored while not connected.
    pub fn set_local_pose(&self, position: Vec3, rotation: Vec3) {
        let Some(local_id) = self.local_id() else {
            return;
        };

        match encode_record(&Envelope::update(local_id, position, rotation)) {
            Ok(record) => *lock(&self.shared.pending_update) = Some(record),
            Err(e) => warn!("Failed to encode local pose: {}", e),
        }
    }

    /// Sends a fire event right away, bypassing the pose slot and its tick.
    pub fn send_fire_event(&self, position: Vec3, rotation: Vec3) -> Result<(), PumpError> {
        let local_id = self.local_id().ok_or(PumpError::NotConnected)?;
        let link = lock(&self.link).clone().ok_or(PumpError::NotConnected)?;

        let record = encode_record(&Envelope::fire(local_id, position, rotation))?;
        debug!("Queueing fire event at {}", position);
        link.fire_tx
            .send(record)
            .map_err(|_| PumpError::NotConnected)
    }

    /// Applies every queued action, oldest first, on the calling thread.
    ///
    /// Must be called from the simulation thread once per frame. Actions queued
    /// while the handler runs are left for the next call. Returns how many
    /// actions were applied.
    pub fn pump_deferred_actions<H>(&self, handler: &mut H) -> usize
    where
        H: SimulationHandler + ?Sized,
    {
        let drained: Vec<DeferredAction> = {
            let mut inbound = lock(&self.inbound);
            std::iter::from_fn(|| inbound.try_recv().ok()).collect()
        };

        let applied = drained.len();
        for action in drained {
            action.apply(handler);
        }
        applied
    }

    /// Tears the connection down. Safe to call repeatedly or while disconnected.
    pub fn disconnect(&self) {
        let link = lock(&self.link).take();
        if let Some(link) = link {
            info!("Disconnecting");
            self.shared.teardown(&link);
        }
    }
}

impl Drop for NetworkPump {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Connects, then runs the receive loop on this task and the send loop on another.
async fn run_connection(
    addr: String,
    config: PumpConfig,
    shared: Arc<PumpShared>,
    link: Arc<Link>,
    fire_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let connected = tokio::select! {
        _ = shutdown_rx.changed() => {
            debug!("Connect to {} abandoned", addr);
            return;
        }
        result = TcpStream::connect(&addr) => result,
    };

    let (stream, local_id) = match connected.and_then(|stream| {
        let local_addr = stream.local_addr()?;
        Ok((stream, local_addr.to_string()))
    }) {
        Ok(connected) => connected,
        Err(source) => {
            let error = PumpError::Connect { addr, source };
            error!("{}", error);
            shared.mark_connect_failed(&link, &error);
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to disable Nagle on {}: {}", addr, e);
    }

    if !shared.mark_connected(&link, &local_id) {
        debug!("Connection to {} closed before it was established", addr);
        return;
    }
    info!("Connected to {} as {}", addr, local_id);

    let (reader, writer) = stream.into_split();
    let send_task = tokio::spawn(send_loop(
        writer,
        Arc::clone(&shared),
        Arc::clone(&link),
        fire_rx,
        shutdown_rx.clone(),
        config.send_interval,
    ));

    match receive_loop(
        reader,
        &local_id,
        &shared,
        &link,
        shutdown_rx,
        config.read_buffer_size,
    )
    .await
    {
        Ok(()) => info!("Connection to {} closed", addr),
        Err(e) => warn!("Lost connection to {}: {}", addr, PumpError::Io(e)),
    }

    shared.teardown(&link);
    let _ = send_task.await;
}

/// Writes the pose slot on every tick and fire records as soon as they arrive.
async fn send_loop(
    mut writer: OwnedWriteHalf,
    shared: Arc<PumpShared>,
    link: Arc<Link>,
    mut fire_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
    send_interval: Duration,
) {
    let mut ticker = interval(send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let record = tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,
            Some(record) = fire_rx.recv() => record,
            _ = ticker.tick() => {
                let pending = lock(&shared.pending_update).clone();
                match pending {
                    Some(record) => record,
                    None => continue,
                }
            }
        };

        if let Err(e) = writer.write_all(&record).await {
            warn!("Failed to send record: {}", PumpError::Io(e));
            shared.teardown(&link);
            break;
        }
    }

    let _ = writer.shutdown().await;
}

/// Reads until end-of-stream, error, or shutdown, queueing one action per
/// remote event. Malformed records are logged and skipped.
///
/// Returns `Ok(())` on a clean end (remote close or local shutdown), including
/// a teardown that lands while records from the last read are still queued.
async fn receive_loop<R>(
    mut reader: R,
    local_id: &str,
    shared: &PumpShared,
    link: &Link,
    mut shutdown_rx: watch::Receiver<bool>,
    buffer_size: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut reassembler = Reassembler::with_capacity(buffer_size);

    loop {
        let len = tokio::select! {
            _ = shutdown_rx.changed() => return Ok(()),
            result = reader.read(&mut buffer) => result?,
        };

        if len == 0 {
            return Ok(());
        }

        reassembler
            .feed(&buffer[..len])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for record in reassembler.take_records() {
            let envelope = match decode(&record) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        "Discarding record {:?}: {}",
                        String::from_utf8_lossy(&record),
                        e
                    );
                    continue;
                }
            };

            if let Some(action) = DeferredAction::from_envelope(envelope, local_id) {
                if !shared.enqueue_for(link, action) {
                    debug!("Link closed, dropping remaining inbound records");
                    return Ok(());
                }
            }
        }
    }
}
