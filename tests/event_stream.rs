//! End-to-end coverage of spec §8 scenario 9: resuming an SSE stream from
//! a `Last-Event-ID`-style sequence number replays only events the caller
//! hasn't seen yet, then terminates once a `done` event is replayed.

use std::time::Duration;

use futures::StreamExt;

use deepsearch_core::events::{EventBus, EventKind, SessionId};

#[tokio::test]
async fn resuming_from_a_sequence_number_only_replays_newer_events() {
    let bus = EventBus::new();
    let session = SessionId::from("resume-session");

    let first = bus.emit(&session, EventKind::Search, serde_json::json!({"query": "a"})).await;
    let second = bus.emit(&session, EventKind::Content, serde_json::json!({"chunk": "b"})).await;
    let done = bus.emit(&session, EventKind::Done, serde_json::json!({})).await;

    let frames: Vec<String> = bus
        .stream(session, Duration::from_millis(200), Some(first.seq))
        .take_until(tokio::time::sleep(Duration::from_millis(150)))
        .collect()
        .await;

    assert_eq!(frames.len(), 2, "only the second and done events should replay after resuming from the first");
    assert!(frames[0].contains(&format!("id: {}", second.seq)));
    assert!(frames[0].contains("event: content"));
    assert!(frames[1].contains(&format!("id: {}", done.seq)));
    assert!(frames[1].contains("event: done"));
}

#[tokio::test]
async fn resuming_from_the_latest_sequence_replays_nothing_but_still_closes_on_done() {
    let bus = EventBus::new();
    let session = SessionId::from("resume-session-2");

    let _first = bus.emit(&session, EventKind::Search, serde_json::json!({"query": "a"})).await;
    let done = bus.emit(&session, EventKind::Done, serde_json::json!({})).await;

    let frames: Vec<String> = bus
        .stream(session, Duration::from_millis(200), Some(done.seq))
        .take_until(tokio::time::sleep(Duration::from_millis(150)))
        .collect()
        .await;

    assert!(frames.is_empty(), "nothing newer than the done event's own sequence should replay");
}
