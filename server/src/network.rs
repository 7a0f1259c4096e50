//! Server network layer: listening socket and connection acceptor

use crate::registry::SessionRegistry;
use crate::session::RelaySession;
use log::{debug, error, info, warn};
use shared::{DEFAULT_PORT, READ_BUFFER_SIZE};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

/// Outbound records a single session may have queued before new ones are dropped.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Back-off after a transient accept failure.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("server I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Capacity of each session's outbound queue.
    pub outbound_queue_capacity: usize,
    pub read_buffer_size: usize,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            read_buffer_size: READ_BUFFER_SIZE,
        }
    }
}

/// Relay server: accepts connections and runs one [`RelaySession`] per socket.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    config: ServerConfig,
}

impl RelayServer {
    /// Binds the listening socket. Nothing is accepted until [`run`](Self::run).
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Listen {
                addr: addr.clone(),
                source,
            })?;
        info!("Relay server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            registry: Arc::new(SessionRegistry::new()),
            config,
        })
    }

    /// Actual bound address; resolves port `0` to the one the OS picked.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections forever.
    ///
    /// Transient accept failures are logged and retried after a short pause.
    /// Returns only if the listening socket itself becomes unusable.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("Failed to disable Nagle for {}: {}", peer, e);
                    }

                    let id = self.registry.next_session_id();
                    let session = RelaySession::new(
                        id,
                        stream,
                        peer,
                        Arc::clone(&self.registry),
                        &self.config,
                    );
                    info!("Accepted {} as session {}", peer, id);

                    self.registry.register(session.handle()).await;
                    tokio::spawn(session.run());
                }
                Err(e) if is_fatal_accept_error(&e) => {
                    error!("Listening socket failed: {}", e);
                    return Err(ServerError::Listen {
                        addr: self.config.bind_address(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    debug!("Retrying accept in {:?}", ACCEPT_RETRY_DELAY);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
}

/// Errors that mean the listener itself is broken rather than one connection.
fn is_fatal_accept_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
    )
}
