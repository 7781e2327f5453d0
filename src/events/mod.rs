//! Per-session ordered, buffered, resumable event bus (spec §4.1).
//!
//! Mirrors the shape of `original_source/agent/events.py`'s `EventEmitter` /
//! `event_stream_generator`, normalized to always carry `seq` (spec §9,
//! design note (c)) and reworked around a `BoxStream`-returning `stream()`
//! call in the style of the teacher crate's `agents/agent.rs::reply()`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_stream::stream;
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{instrument, warn};

/// Capacity of the per-session ring buffer (spec §3: "bounded (default 100)").
pub const BUFFER_CAPACITY: usize = 100;

/// How long the stream may sit idle before it emits a keepalive frame.
pub const KEEPALIVE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        SessionId(value)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of event kinds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ResearchNodeStart,
    ResearchNodeComplete,
    ResearchTreeUpdate,
    QualityUpdate,
    Search,
    Content,
    Thinking,
    ToolStart,
    ToolProgress,
    ToolScreenshot,
    ToolResult,
    ToolError,
    TaskCreate,
    TaskUpdate,
    TaskComplete,
    AgentStart,
    AgentIteration,
    AgentDone,
    Error,
    Done,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ResearchNodeStart => "research_node_start",
            EventKind::ResearchNodeComplete => "research_node_complete",
            EventKind::ResearchTreeUpdate => "research_tree_update",
            EventKind::QualityUpdate => "quality_update",
            EventKind::Search => "search",
            EventKind::Content => "content",
            EventKind::Thinking => "thinking",
            EventKind::ToolStart => "tool_start",
            EventKind::ToolProgress => "tool_progress",
            EventKind::ToolScreenshot => "tool_screenshot",
            EventKind::ToolResult => "tool_result",
            EventKind::ToolError => "tool_error",
            EventKind::TaskCreate => "task_create",
            EventKind::TaskUpdate => "task_update",
            EventKind::TaskComplete => "task_complete",
            EventKind::AgentStart => "agent_start",
            EventKind::AgentIteration => "agent_iteration",
            EventKind::AgentDone => "agent_done",
            EventKind::Error => "error",
            EventKind::Done => "done",
        }
    }
}

/// An emitted event (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
    pub event_id: String,
    pub seq: u64,
    pub timestamp: u64,
    pub thread_id: String,
}

impl Event {
    /// Serialize to a single SSE frame per spec §6.
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("id: {}\nevent: {}\ndata: {}\n\n", self.seq, self.kind.as_str(), json)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

type SyncListener = Box<dyn Fn(&Event) + Send + Sync>;
type AsyncListener = Box<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Subscriber {
    id: u64,
    sync: Option<SyncListener>,
    r#async: Option<AsyncListener>,
}

struct SessionState {
    next_seq: AtomicU64,
    buffer: AsyncMutex<VecDeque<Event>>,
    subscribers: AsyncMutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            next_seq: AtomicU64::new(1),
            buffer: AsyncMutex::new(VecDeque::with_capacity(BUFFER_CAPACITY)),
            subscribers: AsyncMutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }
}

/// A handle returned from [`EventBus::subscribe`] used to unsubscribe later.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionId(u64);

/// Per-process, per-session event fan-out (spec §4.1).
#[derive(Default, Clone)]
pub struct EventBus {
    sessions: Arc<DashMap<SessionId, Arc<SessionState>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus { sessions: Arc::new(DashMap::new()) }
    }

    fn session(&self, session: &SessionId) -> Arc<SessionState> {
        self.sessions
            .entry(session.clone())
            .or_insert_with(|| Arc::new(SessionState::new()))
            .clone()
    }

    /// Emit an event, appending to the ring buffer and notifying listeners.
    ///
    /// Sync listeners run inline (must be cheap); async listeners are spawned
    /// so a slow subscriber can never block the emitting call — the Rust
    /// equivalent of the teacher-style "never call blocking work inline".
    #[instrument(skip(self, data))]
    pub async fn emit(
        &self,
        session: &SessionId,
        kind: EventKind,
        data: serde_json::Value,
    ) -> Event {
        let state = self.session(session);
        let seq = state.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            kind,
            data,
            event_id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            seq,
            timestamp: now_unix(),
            thread_id: session.0.clone(),
        };

        {
            let mut buf = state.buffer.lock().await;
            if buf.len() >= BUFFER_CAPACITY {
                buf.pop_front();
            }
            buf.push_back(event.clone());
        }

        let subs = state.subscribers.lock().await;
        for sub in subs.iter() {
            if let Some(listener) = &sub.sync {
                listener(&event);
            }
            if let Some(listener) = &sub.r#async {
                let fut = listener(event.clone());
                tokio::spawn(async move {
                    fut.await;
                });
            }
        }
        event
    }

    /// Best-effort emission from a context that may not be inside the async
    /// runtime driving the rest of the pipeline. Since a Rust process has at
    /// most one Tokio runtime in scope at a time, this collapses to
    /// "schedule on the current handle if one exists, otherwise drop the
    /// event with a warning" — see SPEC_FULL.md §4.1.
    pub fn emit_from_sync_caller(&self, session: SessionId, kind: EventKind, data: serde_json::Value) {
        let bus = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    bus.emit(&session, kind, data).await;
                });
            }
            Err(_) => {
                warn!(session = %session, "no tokio runtime available, dropping event");
            }
        }
    }

    /// Register a synchronous listener; returns an id usable with [`Self::unsubscribe`].
    pub async fn subscribe_sync<F>(&self, session: &SessionId, listener: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let state = self.session(session);
        let id = state.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        state.subscribers.lock().await.push(Subscriber {
            id,
            sync: Some(Box::new(listener)),
            r#async: None,
        });
        SubscriptionId(id)
    }

    /// Register an async listener; returns an id usable with [`Self::unsubscribe`].
    pub async fn subscribe_async<F, Fut>(&self, session: &SessionId, listener: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let state = self.session(session);
        let id = state.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        state.subscribers.lock().await.push(Subscriber {
            id,
            sync: None,
            r#async: Some(Box::new(move |e| Box::pin(listener(e)))),
        });
        SubscriptionId(id)
    }

    pub async fn unsubscribe(&self, session: &SessionId, id: SubscriptionId) {
        let state = self.session(session);
        let mut subs = state.subscribers.lock().await;
        subs.retain(|s| s.id != id.0);
    }

    /// Replay buffered events with `seq > since_seq`, then live events, as a
    /// lazy stream of SSE frames. Emits a keepalive every [`KEEPALIVE`] of
    /// idleness and terminates on a `done` event (spec §4.1).
    pub fn stream(
        &self,
        session: SessionId,
        overall_timeout: Duration,
        since_seq: Option<u64>,
    ) -> impl Stream<Item = String> + Send + 'static {
        let bus = self.clone();
        stream! {
            let state = bus.session(&session);
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
            let sub_id = bus
                .subscribe_async(&session, move |event| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(event);
                    }
                })
                .await;

            let since = since_seq.unwrap_or(0);
            let buffered: Vec<Event> = {
                let buf = state.buffer.lock().await;
                buf.iter().filter(|e| e.seq > since).cloned().collect()
            };
            for event in buffered {
                let is_done = matches!(event.kind, EventKind::Done);
                yield event.to_sse();
                if is_done {
                    bus.unsubscribe(&session, sub_id).await;
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + overall_timeout;
            loop {
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                match tokio::time::timeout(KEEPALIVE, rx.recv()).await {
                    Ok(Some(event)) => {
                        let is_done = matches!(event.kind, EventKind::Done);
                        yield event.to_sse();
                        if is_done {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        yield ": keepalive\n\n".to_string();
                    }
                }
            }
            bus.unsubscribe(&session, sub_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn seq_is_strictly_increasing_per_session() {
        let bus = EventBus::new();
        let session: SessionId = "s1".into();
        let e1 = bus.emit(&session, EventKind::Search, serde_json::json!({})).await;
        let e2 = bus.emit(&session, EventKind::Search, serde_json::json!({})).await;
        assert!(e2.seq > e1.seq);
    }

    #[tokio::test]
    async fn buffer_evicts_oldest_beyond_capacity() {
        let bus = EventBus::new();
        let session: SessionId = "s1".into();
        for _ in 0..(BUFFER_CAPACITY + 10) {
            bus.emit(&session, EventKind::Search, serde_json::json!({})).await;
        }
        let state = bus.session(&session);
        let buf = state.buffer.lock().await;
        assert_eq!(buf.len(), BUFFER_CAPACITY);
        assert!(buf.front().unwrap().seq > 1);
    }

    #[tokio::test]
    async fn sync_listener_failure_never_propagates() {
        let bus = EventBus::new();
        let session: SessionId = "s1".into();
        bus.subscribe_sync(&session, |_event| {
            // A listener that "fails" just logs; it must not panic the bus.
        })
        .await;
        let event = bus.emit(&session, EventKind::Done, serde_json::json!({})).await;
        assert_eq!(event.kind.as_str(), "done");
    }

    #[tokio::test]
    async fn resume_stream_only_yields_events_after_since_seq() {
        let bus = EventBus::new();
        let session: SessionId = "s1".into();
        for _ in 0..5 {
            bus.emit(&session, EventKind::Search, serde_json::json!({})).await;
        }
        bus.emit(&session, EventKind::Done, serde_json::json!({})).await;

        let frames: Vec<String> = bus
            .stream(session, Duration::from_millis(200), Some(3))
            .collect()
            .await;
        // events with seq 4, 5, 6(done) => 3 frames
        assert_eq!(frames.len(), 3);
        assert!(frames[0].starts_with("id: 4\n"));
    }
}
