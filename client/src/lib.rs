//! # Pose Relay Client Library
//!
//! Client side of the pose relay: a background network pump that keeps one TCP
//! connection to the relay server, and the hooks a single-threaded simulation
//! uses to publish its own pose and mirror everyone else's.
//!
//! ## Architecture Overview
//!
//! The simulation owns its objects and never waits on the network. Socket I/O
//! runs on tokio tasks, and the two sides meet at exactly two points:
//!
//! ### Pending-Outbound Slot
//! Each frame the simulation overwrites a single slot with its latest pose.
//! The send loop copies whatever is in the slot on a fixed interval, so a slow
//! link only ever carries the newest pose and never a backlog of stale ones.
//! Fire events skip the slot and are written immediately.
//!
//! ### Deferred Action Queue
//! The receive loop reassembles records, decodes them and queues one action per
//! remote event. The simulation drains the queue once per frame and applies the
//! actions in arrival order through a [`SimulationHandler`]. Echoes of our own
//! updates and fires are filtered out before they are queued.
//!
//! ## Module Organization
//!
//! ### Actions Module (`actions`)
//! - [`SimulationHandler`] callbacks for remote updates, fires and departures
//! - [`DeferredAction`] queue items and their mapping from inbound envelopes
//!
//! ### Network Module (`network`)
//! - [`NetworkPump`] connection lifecycle, pose slot and fire path
//! - Send and receive loops, teardown exactly once per connection
//!
//! ### Game Module (`game`)
//! - [`RemotePlayers`](game::RemotePlayers), a ready-made handler that tracks
//!   remote poses and fire events
//!
//! ### Input Module (`input`)
//! - [`PoseSource`](input::PoseSource) and a scripted orbit path
//! - [`FireTrigger`](input::FireTrigger), which holds the pump it fires through
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::game::RemotePlayers;
//! use client::network::{NetworkPump, PumpConfig};
//! use shared::Vec3;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let pump = NetworkPump::new(runtime.handle().clone(), PumpConfig::default());
//! let mut players = RemotePlayers::new();
//!
//! pump.connect("127.0.0.1", shared::DEFAULT_PORT)?;
//! for frame in 0..600 {
//!     pump.pump_deferred_actions(&mut players);
//!     pump.set_local_pose(Vec3::new(frame as f32 * 0.1, 0.0, 2.0), Vec3::ZERO);
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! pump.disconnect();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod actions;
pub mod game;
pub mod input;
pub mod network;

pub use actions::{DeferredAction, SimulationHandler};
pub use network::{ConnectionState, NetworkPump, PumpConfig, PumpError};
