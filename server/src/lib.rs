//! # Pose Relay Server Library
//!
//! A stateless TCP relay. Clients send newline-delimited JSON records describing
//! their pose or a fire event; the server forwards every record, byte for byte,
//! to every other connected client. It keeps no game state of its own and never
//! interprets what it relays beyond logging it.
//!
//! ## Core Responsibilities
//!
//! ### Connection Acceptance
//! Listens on a configurable address, gives each accepted socket a session id,
//! registers it and spawns its handler. A failure on one incoming connection
//! never stops the accept loop.
//!
//! ### Relaying
//! Each session reassembles its inbound byte stream into records and broadcasts
//! every complete record to all other sessions, never back to the sender. A
//! record that fails to decode is logged and relayed anyway.
//!
//! ### Departure Notices
//! When a connection ends, for any reason, the server synthesizes a
//! `disconnect` record carrying that client's address and broadcasts it, then
//! removes the session.
//!
//! ## Architecture Design
//!
//! ### Task per Direction
//! Every session runs a reader on its own task and a writer on another. Readers
//! hand records to other sessions through bounded per-session queues, so a slow
//! or stalled client only ever loses its own records.
//!
//! ### Shared Registry
//! The [`SessionRegistry`](registry::SessionRegistry) is the only state shared
//! between sessions. It is created by the server and injected into every
//! session, behind a tokio `RwLock`.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - [`RelayServer`](network::RelayServer) binding and the accept loop
//! - [`ServerConfig`](network::ServerConfig) and [`ServerError`](network::ServerError)
//!
//! ### Session Module (`session`)
//! - [`RelaySession`](session::RelaySession) reader, writer and teardown
//!
//! ### Registry Module (`registry`)
//! - Session registration, removal and best-effort broadcast
//!
//! ## Usage Example
//!
//! ```no_run
//! use server::network::{RelayServer, ServerConfig};
//!
//! # async fn serve() -> Result<(), server::network::ServerError> {
//! let server = RelayServer::bind(ServerConfig::default()).await?;
//! println!("listening on {}", server.local_addr()?);
//! server.run().await
//! # }
//! ```

pub mod network;
pub mod registry;
pub mod session;

pub use network::{RelayServer, ServerConfig, ServerError};
pub use registry::{SessionId, SessionRegistry};
