use crate::actions::SimulationHandler;
use log::{debug, info, warn};
use shared::Vec3;
use std::collections::{HashMap, VecDeque};

/// Undrained fire events kept before the oldest are dropped.
pub const MAX_PENDING_FIRE_EVENTS: usize = 256;

/// Last known pose of one remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub id: String,
    pub position: Vec3,
    pub rotation: Vec3,
    /// Number of pose updates applied since the peer appeared.
    pub updates: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FireEvent {
    pub id: String,
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Mirror of the remote peers seen through the relay.
///
/// Peers are created on their first update, moved on every later one and
/// dropped on their disconnect notice. A fire from a peer we have never seen
/// is still recorded. Losing our own connection clears everything.
///
/// Fire events pile up until [`take_fire_events`](Self::take_fire_events) is
/// called, so drain them every frame. Past [`MAX_PENDING_FIRE_EVENTS`] the
/// oldest are discarded.
#[derive(Debug, Default)]
pub struct RemotePlayers {
    players: HashMap<String, RemotePlayer>,
    fire_events: VecDeque<FireEvent>,
    local_id: Option<String>,
    connection_ended: bool,
}

impl RemotePlayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&RemotePlayer> {
        self.players.get(id)
    }

    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// True once a connection attempt failed or an established one was lost.
    pub fn connection_ended(&self) -> bool {
        self.connection_ended
    }

    /// Hands over the fire events recorded since the last call.
    pub fn take_fire_events(&mut self) -> Vec<FireEvent> {
        self.fire_events.drain(..).collect()
    }
}

impl SimulationHandler for RemotePlayers {
    fn on_remote_update(&mut self, id: &str, position: Vec3, rotation: Vec3) {
        let player = self.players.entry(id.to_string()).or_insert_with(|| {
            info!("Player {} joined", id);
            RemotePlayer {
                id: id.to_string(),
                position,
                rotation,
                updates: 0,
            }
        });

        player.position = position;
        player.rotation = rotation;
        player.updates += 1;
    }

    fn on_remote_fire(&mut self, id: &str, position: Vec3, rotation: Vec3) {
        debug!("Player {} fired from {} facing {}", id, position, rotation);
        if self.fire_events.len() == MAX_PENDING_FIRE_EVENTS {
            self.fire_events.pop_front();
            debug!("Fire events not drained, dropped the oldest");
        }
        self.fire_events.push_back(FireEvent {
            id: id.to_string(),
            position,
            rotation,
        });
    }

    fn on_remote_disconnect(&mut self, id: &str) {
        if self.players.remove(id).is_some() {
            info!("Player {} left", id);
        }
    }

    fn on_connected(&mut self, local_id: &str) {
        self.local_id = Some(local_id.to_string());
        self.connection_ended = false;
    }

    fn on_connect_failed(&mut self, reason: &str) {
        warn!("Could not reach relay: {}", reason);
        self.connection_ended = true;
    }

    fn on_connection_lost(&mut self) {
        info!("Relay connection lost, removing {} players", self.players.len());
        self.players.clear();
        self.local_id = None;
        self.connection_ended = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_first_update_creates_player() {
        let mut players = RemotePlayers::new();
        players.on_remote_update("B", Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 90.0, 0.0));

        let player = players.get("B").unwrap();
        assert_eq!(player.position, Vec3::new(1.0, 2.0, 3.0));
        assert_approx_eq!(player.rotation.y, 90.0);
        assert_eq!(player.updates, 1);
    }

    #[test]
    fn test_later_updates_move_player() {
        let mut players = RemotePlayers::new();
        players.on_remote_update("B", Vec3::ZERO, Vec3::ZERO);
        players.on_remote_update("B", Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO);

        assert_eq!(players.len(), 1);
        let player = players.get("B").unwrap();
        assert_approx_eq!(player.position.x, 5.0);
        assert_eq!(player.updates, 2);
    }

    #[test]
    fn test_disconnect_removes_only_that_player() {
        let mut players = RemotePlayers::new();
        players.on_remote_update("B", Vec3::ZERO, Vec3::ZERO);
        players.on_remote_update("C", Vec3::ZERO, Vec3::ZERO);

        players.on_remote_disconnect("B");
        players.on_remote_disconnect("never-seen");

        assert!(players.get("B").is_none());
        assert!(players.get("C").is_some());
    }

    #[test]
    fn test_fire_events_are_taken_once() {
        let mut players = RemotePlayers::new();
        players.on_remote_fire("B", Vec3::ZERO, Vec3::new(0.0, 45.0, 0.0));

        let events = players.take_fire_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "B");
        assert!(players.take_fire_events().is_empty());
        assert!(players.is_empty());
    }

    #[test]
    fn test_undrained_fire_events_keep_the_newest() {
        let mut players = RemotePlayers::new();
        for i in 0..300 {
            players.on_remote_fire(&format!("P{}", i), Vec3::ZERO, Vec3::ZERO);
        }

        let events = players.take_fire_events();
        assert_eq!(events.len(), MAX_PENDING_FIRE_EVENTS);
        assert_eq!(events[0].id, "P44");
        assert_eq!(events[MAX_PENDING_FIRE_EVENTS - 1].id, "P299");
    }

    #[test]
    fn test_connection_lost_clears_players() {
        let mut players = RemotePlayers::new();
        players.on_connected("127.0.0.1:40000");
        players.on_remote_update("B", Vec3::ZERO, Vec3::ZERO);
        assert_eq!(players.local_id(), Some("127.0.0.1:40000"));

        players.on_connection_lost();

        assert!(players.is_empty());
        assert_eq!(players.local_id(), None);
        assert!(players.connection_ended());
    }
}
