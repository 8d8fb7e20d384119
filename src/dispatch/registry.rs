use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::constants::LIVENESS_WINDOW_SECS;
use crate::error::{DispatchError, Result};

use super::rendezvous::{new_slot, RendezvousOutcome, RendezvousReceiver, RendezvousSender};
use super::task_queue::TaskQueue;

/// Per-agent structural state: the task queue and the map of in-flight
/// rendezvous slots. Created together and destroyed together.
struct Meta {
    queues: HashMap<String, Arc<TaskQueue>>,
    pending: HashMap<String, HashMap<u64, RendezvousSender>>,
}

impl Meta {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            pending: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Liveness {
    online: bool,
    last_seen: Instant,
}

/// Tracks which agent names have state, their task queues and pending
/// rendezvous slots (under `metaLock`), and their online/last-seen
/// liveness (under a separate `livenessLock`), following the two-mutex
/// discipline of `agents/orchestrator/atomic_state.rs`'s
/// `AtomicTaskStateManager`, which already acquires multiple locks in a
/// consistent order for atomic state transitions.
pub struct AgentRegistry {
    meta: Mutex<Meta>,
    liveness: RwLock<HashMap<String, Liveness>>,
    queue_capacity: usize,
}

impl AgentRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            meta: Mutex::new(Meta::new()),
            liveness: RwLock::new(HashMap::new()),
            queue_capacity,
        }
    }

    /// Lazily creates AgentState for `name` if it doesn't exist, returning
    /// a handle to its queue. Safe to call repeatedly.
    pub async fn ensure_agent(&self, name: &str) -> Arc<TaskQueue> {
        let mut meta = self.meta.lock().await;
        if let Some(queue) = meta.queues.get(name) {
            return queue.clone();
        }
        let queue = Arc::new(TaskQueue::new(self.queue_capacity));
        meta.queues.insert(name.to_string(), queue.clone());
        meta.pending.entry(name.to_string()).or_default();
        drop(meta);

        let mut liveness = self.liveness.write().await;
        liveness.entry(name.to_string()).or_insert(Liveness {
            online: false,
            last_seen: Instant::now(),
        });
        queue
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.meta.lock().await.queues.contains_key(name)
    }

    /// Registers a new rendezvous slot for `(agent, id)`. Errors if a slot
    /// already exists for that id, which would indicate id reuse.
    pub async fn prepare_slot(&self, agent: &str, id: u64) -> Result<RendezvousReceiver> {
        let mut meta = self.meta.lock().await;
        let (tx, rx) = new_slot();
        let slots = meta.pending.entry(agent.to_string()).or_default();
        if slots.contains_key(&id) {
            return Err(DispatchError::Internal(anyhow::anyhow!(
                "rendezvous slot already exists for agent {agent} id {id}"
            )));
        }
        slots.insert(id, tx);
        Ok(rx)
    }

    /// Publishes `payload` to the slot for `(agent, id)`. Returns `false`
    /// if no slot exists (the waiter already timed out).
    pub async fn deliver(&self, agent: &str, id: u64, payload: serde_json::Value) -> bool {
        let mut meta = self.meta.lock().await;
        let Some(slots) = meta.pending.get_mut(agent) else {
            return false;
        };
        let Some(tx) = slots.remove(&id) else {
            return false;
        };
        drop(meta);
        tx.send(RendezvousOutcome::Delivered(payload)).is_ok()
    }

    /// Removes the slot for `(agent, id)` and releases its waiter with a
    /// "timed out" outcome. No-op if the slot is already gone.
    pub async fn cancel_slot(&self, agent: &str, id: u64) {
        let mut meta = self.meta.lock().await;
        let tx = meta
            .pending
            .get_mut(agent)
            .and_then(|slots| slots.remove(&id));
        drop(meta);
        if let Some(tx) = tx {
            let _ = tx.send(RendezvousOutcome::TimedOut);
        }
    }

    /// Tears down all state for `agent`: closes its queue, releases every
    /// pending waiter with "agent deregistered", and removes it from the
    /// registry entirely.
    pub async fn close_all(&self, agent: &str) {
        let mut meta = self.meta.lock().await;
        let queue = meta.queues.remove(agent);
        let slots = meta.pending.remove(agent).unwrap_or_default();
        drop(meta);

        if let Some(queue) = queue {
            queue.close();
        }
        for (_, tx) in slots {
            let _ = tx.send(RendezvousOutcome::AgentDeregistered);
        }

        self.liveness.write().await.remove(agent);
    }

    /// Atomically moves `old`'s structural state (queue + pending slots)
    /// under `new`. Rejects if `new` already has state. Callers are
    /// responsible for the corresponding AuthZ rename.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut meta = self.meta.lock().await;
        if meta.queues.contains_key(new) {
            return Err(DispatchError::Validation(format!(
                "agent {new} already exists"
            )));
        }
        let Some(queue) = meta.queues.remove(old) else {
            return Err(DispatchError::UnknownAgent);
        };
        let slots = meta.pending.remove(old).unwrap_or_default();
        meta.queues.insert(new.to_string(), queue);
        meta.pending.insert(new.to_string(), slots);
        drop(meta);

        let mut liveness = self.liveness.write().await;
        if let Some(state) = liveness.remove(old) {
            liveness.insert(new.to_string(), state);
        }
        debug!(old, new, "renamed agent state");
        Ok(())
    }

    pub async fn mark_online(&self, agent: &str) {
        let mut liveness = self.liveness.write().await;
        let entry = liveness.entry(agent.to_string()).or_insert(Liveness {
            online: false,
            last_seen: Instant::now(),
        });
        entry.online = true;
        entry.last_seen = Instant::now();
    }

    pub async fn mark_offline(&self, agent: &str) {
        let mut liveness = self.liveness.write().await;
        if let Some(entry) = liveness.get_mut(agent) {
            entry.online = false;
            entry.last_seen = Instant::now();
        }
    }

    pub async fn touch_last_seen(&self, agent: &str) {
        let mut liveness = self.liveness.write().await;
        let entry = liveness.entry(agent.to_string()).or_insert(Liveness {
            online: false,
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
    }

    /// `online || now - lastSeen < LIVENESS_WINDOW_SECS`.
    pub async fn is_live(&self, agent: &str) -> bool {
        let liveness = self.liveness.read().await;
        match liveness.get(agent) {
            Some(state) => {
                state.online
                    || state.last_seen.elapsed() < Duration::from_secs(LIVENESS_WINDOW_SECS)
            }
            None => false,
        }
    }

    /// Snapshot of every known agent name and its liveness, for the
    /// `/agents` listing endpoint.
    pub async fn liveness_snapshot(&self) -> HashMap<String, bool> {
        let meta = self.meta.lock().await;
        let names: Vec<String> = meta.queues.keys().cloned().collect();
        drop(meta);

        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            let live = self.is_live(&name).await;
            out.insert(name, live);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazy_creation_then_exists() {
        let reg = AgentRegistry::new(16);
        assert!(!reg.exists("a").await);
        reg.ensure_agent("a").await;
        assert!(reg.exists("a").await);
    }

    #[tokio::test]
    async fn deliver_without_prepare_returns_false() {
        let reg = AgentRegistry::new(16);
        reg.ensure_agent("a").await;
        assert!(!reg.deliver("a", 1, serde_json::json!({})).await);
    }

    #[tokio::test]
    async fn prepare_then_deliver_round_trips() {
        let reg = AgentRegistry::new(16);
        reg.ensure_agent("a").await;
        let rx = reg.prepare_slot("a", 1).await.unwrap();
        assert!(reg.deliver("a", 1, serde_json::json!({"ok": true})).await);
        match rx.await.unwrap() {
            RendezvousOutcome::Delivered(v) => assert_eq!(v, serde_json::json!({"ok": true})),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_all_releases_waiters() {
        let reg = AgentRegistry::new(16);
        reg.ensure_agent("a").await;
        let rx = reg.prepare_slot("a", 1).await.unwrap();
        reg.close_all("a").await;
        assert!(matches!(
            rx.await.unwrap(),
            RendezvousOutcome::AgentDeregistered
        ));
        assert!(!reg.exists("a").await);
    }

    #[tokio::test]
    async fn rename_preserves_queue_identity() {
        let reg = AgentRegistry::new(16);
        let queue = reg.ensure_agent("old").await;
        reg.rename("old", "new").await.unwrap();
        assert!(!reg.exists("old").await);
        let renamed_queue = reg.ensure_agent("new").await;
        assert!(Arc::ptr_eq(&queue, &renamed_queue));
    }

    #[tokio::test]
    async fn online_flag_reflects_parked_poll() {
        let reg = AgentRegistry::new(16);
        // Freshly created state is live: lastSeen was just set.
        reg.ensure_agent("a").await;
        assert!(reg.is_live("a").await);
        reg.mark_online("a").await;
        assert!(reg.is_live("a").await);
        reg.mark_offline("a").await;
        // Still within the liveness window right after going offline.
        assert!(reg.is_live("a").await);
        assert!(!reg.is_live("unknown-agent").await);
    }
}
