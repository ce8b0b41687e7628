use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::engine::EngineId;
use crate::error::Result;
use crate::event::Event;

/// A boxed, pinned, single-use stream of domain events produced by one run.
pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// An opaque handle usable to resume a prior engine session.
///
/// `raw` is the engine-formatted command-line fragment as it would appear in
/// a user's message (e.g. `"claude --resume abc123"`); it doubles as the key
/// for per-resume serialization (§ resume lock pool) and is compared for
/// equality by `(engine_id, raw)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResumeToken {
    pub engine_id: EngineId,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ResumeToken {
    pub fn new(engine_id: EngineId, raw: impl Into<String>) -> Self {
        Self {
            engine_id,
            raw: raw.into(),
            session_path: None,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_session_path(mut self, path: impl Into<String>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    fn lock_key(&self) -> String {
        format!("{}\u{0}{}", self.engine_id, self.raw)
    }
}

/// Trait implemented by each engine adapter.
///
/// The runner owns one engine invocation end-to-end: it knows how to check
/// binary availability, how to detect its own resume syntax in free text, and
/// how to spawn and translate a run into the unified `Event` stream.
#[async_trait]
pub trait Runner: Send + Sync {
    /// The engine id this runner serves.
    fn engine_id(&self) -> &EngineId;

    /// Check whether the engine binary is available on the system.
    fn is_available(&self) -> bool;

    /// Pure scan for this engine's resume syntax in a block of text. No I/O.
    fn resolve_resume(&self, text: &str) -> Option<ResumeToken>;

    /// Spawn the engine and return its event stream.
    ///
    /// Pre-spawn failures (binary missing, spawn error, invalid cwd) are
    /// returned as `Err`. Once the child is spawned, every other outcome
    /// (non-zero exit, malformed output, cancellation) is folded into the
    /// stream's terminal `Event::Completed`.
    async fn run(
        &self,
        prompt: &str,
        resume: Option<ResumeToken>,
        cancel: CancellationToken,
    ) -> Result<EventStream>;
}

/// A keyed, reference-counted mutex pool used to serialize runs that share a
/// resume token. Entries are removed once their refcount drops to zero, so
/// the map never grows without bound (a "weak-valued" map in spirit).
#[derive(Default)]
pub struct ResumeLockPool {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// RAII guard for a held resume-token lock. Dropping it releases the mutex
/// and, if no other run is waiting on the same key, prunes the pool entry.
pub struct ResumeLockGuard {
    pool: Arc<ResumeLockPool>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for ResumeLockGuard {
    fn drop(&mut self) {
        self.pool.prune(&self.key);
    }
}

impl ResumeLockPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the lock for `token`, blocking until any other run holding the
    /// same `(engine_id, raw)` key has finished.
    pub async fn acquire(self: &Arc<Self>, token: &ResumeToken) -> ResumeLockGuard {
        let key = token.lock_key();
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        ResumeLockGuard {
            pool: self.clone(),
            key,
            _guard: guard,
        }
    }

    /// Remove the pool entry for `key` if nothing else references it.
    /// `Arc::strong_count == 1` means only the map's own entry remains.
    fn prune(&self, key: &str) {
        if let Some(entry) = self.locks.get(key) {
            if Arc::strong_count(&entry) <= 1 {
                drop(entry);
                self.locks.remove(key);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

/// A keyed registry of runners, built once at startup and looked up by
/// `EngineId` from the router and the message handler.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<EngineId, Arc<dyn Runner>>,
    /// Registration order, used by the auto-router's stable tie-break rule.
    order: Vec<EngineId>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runner: Arc<dyn Runner>) {
        let id = runner.engine_id().clone();
        if !self.runners.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.runners.insert(id, runner);
    }

    pub fn get(&self, id: &EngineId) -> Option<Arc<dyn Runner>> {
        self.runners.get(id).cloned()
    }

    /// Runners in stable registration order, used by the router when
    /// scanning for resume syntax matches.
    pub fn in_order(&self) -> impl Iterator<Item = Arc<dyn Runner>> + '_ {
        self.order.iter().filter_map(|id| self.runners.get(id).cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resume_lock_pool_serializes_same_key() {
        let pool = ResumeLockPool::new();
        let token = ResumeToken::new(EngineId::new("codex").unwrap(), "codex resume abc");

        let g1 = pool.acquire(&token).await;
        assert_eq!(pool.len(), 1);
        drop(g1);
        assert_eq!(pool.len(), 0, "entry pruned once refcount drops to zero");

        let _g2 = pool.acquire(&token).await;
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn resume_lock_pool_distinct_keys_independent() {
        let pool = ResumeLockPool::new();
        let t1 = ResumeToken::new(EngineId::new("codex").unwrap(), "codex resume a");
        let t2 = ResumeToken::new(EngineId::new("codex").unwrap(), "codex resume b");
        let _g1 = pool.acquire(&t1).await;
        let _g2 = pool.acquire(&t2).await;
        assert_eq!(pool.len(), 2);
    }
}
