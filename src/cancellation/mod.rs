//! Cooperative cancellation tokens with checkpoints and LIFO cleanup, plus
//! time/token budget guards (spec §4.2).
//!
//! Grounded in `original_source/common/cancellation.py`'s `CancellationToken`
//! / `CancellationManager`; the wake-signal itself is delegated to
//! `tokio_util::sync::CancellationToken`, the same type the teacher crate
//! threads through `agents/agent.rs::reply()`.

mod budget;
pub use budget::{BudgetGuard, estimate_tokens};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken as TokioCancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::DeepSearchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Checkpoint {
    pub name: String,
    pub ts: u64,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct TokenState {
    task_id: String,
    reason: Option<String>,
    created_at: u64,
    cancelled_at: Option<u64>,
    status: TaskStatus,
    metadata: Value,
    checkpoints: Vec<Checkpoint>,
    cleanup_callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// A live cancellation token for one task (spec §3).
#[derive(Clone)]
pub struct CancellationToken {
    signal: TokioCancellationToken,
    state: Arc<AsyncMutex<TokenState>>,
}

impl CancellationToken {
    pub(crate) fn new(task_id: impl Into<String>, metadata: Value) -> Self {
        CancellationToken {
            signal: TokioCancellationToken::new(),
            state: Arc::new(AsyncMutex::new(TokenState {
                task_id: task_id.into(),
                reason: None,
                created_at: now_unix(),
                cancelled_at: None,
                status: TaskStatus::Pending,
                metadata,
                checkpoints: Vec::new(),
                cleanup_callbacks: Vec::new(),
            })),
        }
    }

    pub async fn task_id(&self) -> String {
        self.state.lock().await.task_id.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub async fn status(&self) -> TaskStatus {
        self.state.lock().await.status
    }

    /// Register a cleanup callback; callbacks run once, in LIFO order, when
    /// [`Self::cancel`] is invoked.
    pub async fn register_cleanup<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.lock().await.cleanup_callbacks.push(Box::new(callback));
    }

    /// Run all registered cleanups once, in LIFO order, swallowing panics
    /// from any individual callback the way the source wraps each in a
    /// try/except so one bad cleanup never blocks the rest.
    async fn run_cleanup(&self) {
        let callbacks = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.cleanup_callbacks)
        };
        for callback in callbacks.into_iter().rev() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || callback()));
            if result.is_err() {
                warn!("cancellation cleanup callback panicked");
            }
        }
    }

    /// Idempotent: invoking cancel twice has the same observable effect as
    /// once (spec §8 invariant).
    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, reason: impl Into<String>) {
        let already = {
            let mut state = self.state.lock().await;
            if state.status == TaskStatus::Cancelled {
                true
            } else {
                state.status = TaskStatus::Cancelled;
                state.reason = Some(reason.into());
                state.cancelled_at = Some(now_unix());
                false
            }
        };
        if already {
            return;
        }
        self.signal.cancel();
        self.run_cleanup().await;
    }

    /// Poll for cancellation at a named checkpoint. If cancelled, returns a
    /// [`DeepSearchError::Cancelled`] carrying the task id, the checkpoint
    /// just attempted, and the cancellation reason; otherwise appends the
    /// checkpoint to the trail and returns `Ok(())`.
    pub async fn check(&self, checkpoint: &str) -> Result<(), DeepSearchError> {
        let mut state = self.state.lock().await;
        if self.signal.is_cancelled() {
            return Err(DeepSearchError::Cancelled {
                task_id: state.task_id.clone(),
                checkpoint: Some(checkpoint.to_string()),
                reason: state.reason.clone().unwrap_or_default(),
            });
        }
        state.checkpoints.push(Checkpoint { name: checkpoint.to_string(), ts: now_unix() });
        Ok(())
    }

    pub async fn mark_running(&self) {
        let mut state = self.state.lock().await;
        if state.status != TaskStatus::Cancelled {
            state.status = TaskStatus::Running;
        }
    }

    pub async fn mark_paused(&self) {
        let mut state = self.state.lock().await;
        if state.status == TaskStatus::Running {
            state.status = TaskStatus::Paused;
        }
    }

    pub async fn mark_completed(&self) {
        let mut state = self.state.lock().await;
        if state.status != TaskStatus::Cancelled {
            state.status = TaskStatus::Completed;
        }
    }

    pub async fn mark_failed(&self, _error: impl std::fmt::Display) {
        let mut state = self.state.lock().await;
        if state.status != TaskStatus::Cancelled {
            state.status = TaskStatus::Failed;
        }
    }

    pub async fn created_at(&self) -> u64 {
        self.state.lock().await.created_at
    }
}

/// Process-wide registry of live cancellation tokens (spec §4.2, §5).
///
/// Mutating operations (create/cancel/cleanup) go through a coarse async
/// mutex; lookups of an already-acquired handle are lock-free via the
/// underlying `DashMap`, matching spec §5's "guarded by a process-wide mutex
/// for create/remove; reads are lock-free by key lookup" policy.
pub struct CancellationManager {
    tokens: DashMap<String, CancellationToken>,
    write_lock: AsyncMutex<()>,
}

impl Default for CancellationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationManager {
    pub fn new() -> Self {
        CancellationManager { tokens: DashMap::new(), write_lock: AsyncMutex::new(()) }
    }

    /// Create a token for `task_id`. If a live token already exists for this
    /// id, it is cancelled with reason "Replaced by new task" and its
    /// cleanups are awaited before the replacement is installed.
    #[instrument(skip(self, task_id, metadata))]
    pub async fn create_token(&self, task_id: impl Into<String>, metadata: Value) -> CancellationToken {
        let task_id = task_id.into();
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.tokens.get(&task_id) {
            if !existing.is_cancelled() {
                existing.cancel("Replaced by new task").await;
            }
        }
        let token = CancellationToken::new(task_id.clone(), metadata);
        self.tokens.insert(task_id, token.clone());
        token
    }

    pub fn get(&self, task_id: &str) -> Option<CancellationToken> {
        self.tokens.get(task_id).map(|t| t.clone())
    }

    pub async fn cancel(&self, task_id: &str, reason: impl Into<String>) {
        if let Some(token) = self.tokens.get(task_id) {
            token.cancel(reason).await;
        }
    }

    pub async fn cancel_all(&self, reason: impl Into<String> + Clone) {
        let ids: Vec<String> = self.tokens.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel(&id, reason.clone()).await;
        }
    }

    /// Remove tokens older than `max_age_seconds` (background janitor pass).
    pub async fn cleanup(&self, max_age_seconds: u64) {
        let _guard = self.write_lock.lock().await;
        let now = now_unix();
        let mut stale = Vec::new();
        for entry in self.tokens.iter() {
            let age = now.saturating_sub(entry.value().created_at().await);
            if age > max_age_seconds {
                stale.push(entry.key().clone());
            }
        }
        for id in stale {
            self.tokens.remove(&id);
            debug!(task_id = %id, "janitor removed stale cancellation token");
        }
    }

    /// Spawn the background janitor loop. The caller owns the returned
    /// handle and may abort it on shutdown.
    pub fn start_janitor(self: &Arc<Self>, interval: std::time::Duration, max_age_seconds: u64) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.cleanup(max_age_seconds).await;
            }
        })
    }

    pub fn active_task_count(&self) -> usize {
        self.tokens.len()
    }
}

static NEXT_ANON_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a task id for callers that don't have a natural session/task key.
pub fn anonymous_task_id() -> String {
    format!("task-{}", NEXT_ANON_TASK_ID.fetch_add(1, Ordering::SeqCst))
}
