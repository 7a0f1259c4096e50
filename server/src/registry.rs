//! Session registry and fan-out for the relay server
//!
//! This module tracks every live session and delivers relayed records to them:
//! - Session lifecycle (register on accept, unregister on teardown)
//! - Broadcast to all sessions except the originator
//! - Per-session bounded outbound queues, so one slow peer never stalls the rest
//!
//! Delivery is best-effort. A record that does not fit in a peer's queue is
//! dropped for that peer only.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

/// Server-assigned session identifier, unique for the server's lifetime.
pub type SessionId = u64;

/// A framed record shared by every queue it is broadcast into.
pub type Record = Arc<[u8]>;

/// The registry's view of one session: where to send it records.
///
/// The session itself owns the socket; this handle only carries the sending
/// side of its outbound queue and a liveness flag.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: SessionId,
    pub peer: SocketAddr,
    outbound: mpsc::Sender<Record>,
    alive: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<Record>,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            peer,
            outbound,
            alive,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one broadcast, mostly for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sessions the record was queued for.
    pub delivered: usize,
    /// Sessions whose queue was full; they miss this record.
    pub dropped: usize,
    /// Sessions already closing; skipped.
    pub skipped: usize,
}

/// All live sessions, keyed by id.
///
/// Shared between the acceptor and every session task as `Arc<SessionRegistry>`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the next session id. Ids start at 1 and are never reused.
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Adds a session. It receives every broadcast that starts after this returns.
    pub async fn register(&self, handle: SessionHandle) {
        let mut sessions = self.sessions.write().await;
        info!("Session {} registered for {}", handle.id, handle.peer);
        sessions.insert(handle.id, handle);
        debug!("{} sessions live", sessions.len());
    }

    /// Removes a session and marks it dead. Unknown ids are ignored, so this is
    /// safe to call more than once.
    pub async fn unregister(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(&id);

        if let Some(handle) = &removed {
            handle.mark_dead();
            info!("Session {} ({}) unregistered", id, handle.peer);
        }
        removed
    }

    /// Queues `record` for every live session except `exclude`.
    ///
    /// Never waits on a peer: a full queue drops the record for that peer.
    /// Registration cannot interleave with a broadcast in progress.
    pub async fn broadcast(&self, record: Record, exclude: Option<SessionId>) -> BroadcastReport {
        let sessions = self.sessions.read().await;
        let mut report = BroadcastReport::default();

        for handle in sessions.values() {
            if Some(handle.id) == exclude {
                continue;
            }
            if !handle.is_alive() {
                report.skipped += 1;
                continue;
            }

            match handle.outbound.try_send(Arc::clone(&record)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Outbound queue for session {} ({}) is full, dropping record",
                        handle.id, handle.peer
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Session {} is closing, skipping", handle.id);
                    handle.mark_dead();
                    report.skipped += 1;
                }
            }
        }

        report
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(
        registry: &SessionRegistry,
        capacity: usize,
    ) -> (SessionHandle, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = registry.next_session_id();
        let peer: SocketAddr = format!("127.0.0.1:{}", 40000 + id).parse().unwrap();
        (
            SessionHandle::new(id, peer, tx, Arc::new(AtomicBool::new(true))),
            rx,
        )
    }

    fn record(text: &str) -> Record {
        Arc::from(text.as_bytes())
    }

    #[test]
    fn test_session_ids_are_unique_and_start_at_one() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.next_session_id(), 1);
        assert_eq!(registry.next_session_id(), 2);
        assert_eq!(registry.next_session_id(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = session(&registry, 8);
        let (b, mut b_rx) = session(&registry, 8);
        let (c, mut c_rx) = session(&registry, 8);
        let a_id = a.id;
        for handle in [a, b, c] {
            registry.register(handle).await;
        }

        let report = registry.broadcast(record("hello\n"), Some(a_id)).await;

        assert_eq!(report.delivered, 2);
        assert!(a_rx.try_recv().is_err());
        assert_eq!(&*b_rx.try_recv().unwrap(), b"hello\n");
        assert_eq!(&*c_rx.try_recv().unwrap(), b"hello\n");
    }

    #[tokio::test]
    async fn test_broadcast_without_exclusion_reaches_everyone() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = session(&registry, 8);
        registry.register(a).await;

        let report = registry.broadcast(record("x\n"), None).await;

        assert_eq!(report.delivered, 1);
        assert!(a_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_peer_only() {
        let registry = SessionRegistry::new();
        let (slow, mut slow_rx) = session(&registry, 1);
        let (fast, mut fast_rx) = session(&registry, 8);
        registry.register(slow).await;
        registry.register(fast).await;

        registry.broadcast(record("1\n"), None).await;
        let report = registry.broadcast(record("2\n"), None).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(&*slow_rx.try_recv().unwrap(), b"1\n");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(&*fast_rx.try_recv().unwrap(), b"1\n");
        assert_eq!(&*fast_rx.try_recv().unwrap(), b"2\n");
    }

    #[tokio::test]
    async fn test_closed_queue_is_skipped_and_marked_dead() {
        let registry = SessionRegistry::new();
        let (gone, gone_rx) = session(&registry, 8);
        let (live, mut live_rx) = session(&registry, 8);
        let gone_handle = gone.clone();
        registry.register(gone).await;
        registry.register(live).await;
        drop(gone_rx);

        let report = registry.broadcast(record("x\n"), None).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert!(!gone_handle.is_alive());
        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_unregister_removes_and_is_idempotent() {
        let registry = SessionRegistry::new();
        let (a, mut a_rx) = session(&registry, 8);
        let id = a.id;
        let a_handle = a.clone();
        registry.register(a).await;
        assert!(registry.contains(id).await);

        assert!(registry.unregister(id).await.is_some());
        assert!(registry.unregister(id).await.is_none());

        assert!(registry.is_empty().await);
        assert!(!a_handle.is_alive());
        registry.broadcast(record("x\n"), None).await;
        assert!(a_rx.try_recv().is_err());
    }
}
