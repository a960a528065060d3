//! Per-call session storage.
//!
//! Different call ids never contend: the map is sharded and each call owns its
//! own async mutex. A turn holds that mutex for its whole read-decide-write
//! cycle (see [`SessionLease`]), so duplicate deliveries for the same call are
//! serialised instead of interleaved.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::session::CallSession;

#[derive(Debug)]
struct Slot {
    session: Option<CallSession>,
    touched: Instant,
    /// Set once the slot has left the map; a waiter that wakes up holding a
    /// retired slot must look the call up again.
    retired: bool,
}

impl Slot {
    fn empty() -> Self {
        Self {
            session: None,
            touched: Instant::now(),
            retired: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Finished {
    reply: String,
    at: Instant,
}

/// Concurrent session store with idle eviction and finished-call tombstones.
#[derive(Debug)]
pub struct SessionStore {
    slots: DashMap<String, Arc<Mutex<Slot>>>,
    finished: DashMap<String, Finished>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            finished: DashMap::new(),
            ttl,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Exclusive access to one call's session for the duration of a turn.
    pub async fn lease(&self, call_id: &str) -> SessionLease<'_> {
        loop {
            let slot = self
                .slots
                .entry(call_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::empty())))
                .value()
                .clone();
            let mut guard = slot.lock_owned().await;
            if guard.retired {
                continue;
            }
            guard.touched = Instant::now();
            return SessionLease {
                store: self,
                call_id: call_id.to_string(),
                guard,
            };
        }
    }

    pub async fn get(&self, call_id: &str) -> Option<CallSession> {
        let slot = self.slots.get(call_id)?.value().clone();
        let guard = slot.lock().await;
        if guard.retired {
            return None;
        }
        guard.session.clone()
    }

    pub async fn get_or_create(&self, call_id: &str) -> CallSession {
        let mut lease = self.lease(call_id).await;
        lease.get_or_create().0.clone()
    }

    pub async fn put(&self, call_id: &str, session: CallSession) {
        let mut lease = self.lease(call_id).await;
        lease.put(session);
    }

    pub async fn remove(&self, call_id: &str) -> Option<CallSession> {
        let lease = self.lease(call_id).await;
        lease.remove()
    }

    /// Final reply of a call that already reached a terminal step, if it is
    /// still within the retention window.
    pub fn finished_reply(&self, call_id: &str) -> Option<String> {
        self.finished.get(call_id).map(|f| f.reply.clone())
    }

    /// Drop sessions idle for longer than the TTL and expired tombstones.
    /// Sessions locked by an in-flight turn are left alone.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.ttl;
        let mut evicted = 0;
        self.slots.retain(|call_id, slot| match slot.try_lock() {
            Ok(mut guard) if guard.touched.elapsed() > ttl => {
                guard.retired = true;
                evicted += 1;
                tracing::info!(call_id = %call_id, "Evicting idle call session");
                false
            }
            _ => true,
        });
        self.finished.retain(|_, finished| finished.at.elapsed() <= ttl);
        evicted
    }

    /// Run [`SessionStore::evict_idle`] on a fixed interval until the runtime shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.evict_idle();
                if evicted > 0 {
                    tracing::debug!(evicted, live = self.len(), "Session sweep finished");
                }
            }
        })
    }
}

/// Locked view of a single call's session. Dropping the lease releases the call.
pub struct SessionLease<'a> {
    store: &'a SessionStore,
    call_id: String,
    guard: OwnedMutexGuard<Slot>,
}

impl SessionLease<'_> {
    /// Returns the session and whether it was created by this call.
    pub fn get_or_create(&mut self) -> (&mut CallSession, bool) {
        let created = self.guard.session.is_none();
        let call_id = &self.call_id;
        let session = self
            .guard
            .session
            .get_or_insert_with(|| CallSession::new(call_id.clone()));
        (session, created)
    }

    pub fn put(&mut self, session: CallSession) {
        self.guard.session = Some(session);
        self.guard.touched = Instant::now();
    }

    pub fn remove(mut self) -> Option<CallSession> {
        self.retire()
    }

    /// Remove the session and remember the call's final reply so that late
    /// retries of the last turn are answered identically.
    pub fn finish(mut self, reply: String) -> Option<CallSession> {
        self.store.finished.insert(
            self.call_id.clone(),
            Finished {
                reply,
                at: Instant::now(),
            },
        );
        self.retire()
    }

    fn retire(&mut self) -> Option<CallSession> {
        self.guard.retired = true;
        self.store.slots.remove(&self.call_id);
        self.guard.session.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DialogueStep;

    #[tokio::test]
    async fn get_or_create_then_put_round_trips() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut session = store.get_or_create("CA1").await;
        assert_eq!(session.step, DialogueStep::Greeting);

        session.advance(DialogueStep::AwaitAddress);
        store.put("CA1", session).await;

        let loaded = store.get("CA1").await.expect("session should exist");
        assert_eq!(loaded.step, DialogueStep::AwaitAddress);
        assert!(store.get("CA2").await.is_none());
    }

    #[tokio::test]
    async fn remove_deletes_session() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.get_or_create("CA1").await;
        assert!(store.remove("CA1").await.is_some());
        assert!(store.get("CA1").await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn finish_leaves_a_tombstone_reply() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut lease = store.lease("CA1").await;
        lease.get_or_create();
        lease.finish("<Response/>".to_string());

        assert!(store.get("CA1").await.is_none());
        assert_eq!(store.finished_reply("CA1").as_deref(), Some("<Response/>"));
    }

    #[tokio::test]
    async fn concurrent_turns_for_one_call_are_serialised() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut lease = store.lease("CA1").await;
                let (session, _) = lease.get_or_create();
                let seen = session.address_attempts;
                tokio::task::yield_now().await;
                session.address_attempts = seen + 1;
            }));
        }
        for handle in handles {
            handle.await.expect("task should finish");
        }

        let session = store.get("CA1").await.expect("session should exist");
        assert_eq!(session.address_attempts, 16);
    }

    #[tokio::test]
    async fn waiter_on_removed_call_gets_a_fresh_slot() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        let lease = store.lease("CA1").await;

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut lease = store.lease("CA1").await;
                let (_, created) = lease.get_or_create();
                created
            })
        };
        tokio::task::yield_now().await;
        lease.remove();

        let created = waiter.await.expect("waiter should finish");
        assert!(created, "waiter must not reuse the retired slot");
        assert!(store.get("CA1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_drops_stale_sessions_only() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.get_or_create("old").await;
        tokio::time::advance(Duration::from_secs(61)).await;
        store.get_or_create("fresh").await;

        assert_eq!(store.evict_idle(), 1);
        assert!(store.get("old").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_idle_skips_locked_sessions() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut lease = store.lease("busy").await;
        lease.get_or_create();
        tokio::time::advance(Duration::from_secs(120)).await;

        assert_eq!(store.evict_idle(), 0);
        drop(lease);
        assert_eq!(store.evict_idle(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tombstones_expire_with_the_ttl() {
        let store = SessionStore::new(Duration::from_secs(60));
        let lease = store.lease("CA1").await;
        lease.finish("<Response/>".to_string());
        tokio::time::advance(Duration::from_secs(61)).await;

        store.evict_idle();
        assert!(store.finished_reply("CA1").is_none());
    }
}
