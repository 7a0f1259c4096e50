//! Deferred actions handed from the network tasks to the simulation thread.
//!
//! The receive loop never touches simulation objects. It turns each inbound
//! envelope into a [`DeferredAction`] and queues it; the simulation loop drains
//! the queue once per frame and applies the actions, in order, through a
//! [`SimulationHandler`].

use shared::{Envelope, MessageType, UserState, Vec3};

/// Callbacks the simulation layer implements to mirror remote peers.
///
/// All methods run synchronously on the thread that calls
/// [`NetworkPump::pump_deferred_actions`](crate::network::NetworkPump::pump_deferred_actions).
pub trait SimulationHandler {
    /// A remote peer moved, or appeared for the first time.
    fn on_remote_update(&mut self, id: &str, position: Vec3, rotation: Vec3);

    /// A remote peer fired.
    fn on_remote_fire(&mut self, id: &str, position: Vec3, rotation: Vec3);

    /// A remote peer left the session.
    fn on_remote_disconnect(&mut self, id: &str);

    /// Our own connection is up; `local_id` is how peers will see us.
    fn on_connected(&mut self, _local_id: &str) {}

    fn on_connect_failed(&mut self, _reason: &str) {}

    /// Our connection ended. Anything created for remote peers should go.
    fn on_connection_lost(&mut self) {}
}

/// One unit of work queued for the simulation thread.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredAction {
    Connected { local_id: String },
    ConnectFailed { reason: String },
    RemoteUpdate(UserState),
    RemoteFire(UserState),
    RemoteDisconnect { id: String },
    ConnectionLost,
}

impl DeferredAction {
    /// Maps an inbound envelope to the action it should trigger.
    ///
    /// Returns `None` for unknown types and for `update`/`fire` records that
    /// carry our own id, since the relay echoes everything to everyone else
    /// and we already applied those locally.
    pub fn from_envelope(envelope: Envelope, local_id: &str) -> Option<Self> {
        match envelope.kind {
            MessageType::Update if envelope.data.id != local_id => {
                Some(DeferredAction::RemoteUpdate(envelope.data))
            }
            MessageType::Fire if envelope.data.id != local_id => {
                Some(DeferredAction::RemoteFire(envelope.data))
            }
            MessageType::Disconnect => Some(DeferredAction::RemoteDisconnect {
                id: envelope.data.id,
            }),
            _ => None,
        }
    }

    pub fn apply<H>(self, handler: &mut H)
    where
        H: SimulationHandler + ?Sized,
    {
        match self {
            DeferredAction::Connected { local_id } => handler.on_connected(&local_id),
            DeferredAction::ConnectFailed { reason } => handler.on_connect_failed(&reason),
            DeferredAction::RemoteUpdate(state) => {
                handler.on_remote_update(&state.id, state.position, state.rotation)
            }
            DeferredAction::RemoteFire(state) => {
                handler.on_remote_fire(&state.id, state.position, state.rotation)
            }
            DeferredAction::RemoteDisconnect { id } => handler.on_remote_disconnect(&id),
            DeferredAction::ConnectionLost => handler.on_connection_lost(),
        }
    }
}
