//! Realtime watch authorization and streaming behaviour.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};

use emvox_core::progress::Phase;
use emvox_core::types::{TaskId, TaskStatus};

use crate::handlers::realtime::{
    CLOSE_BAD_REQUEST, CLOSE_FORBIDDEN, CLOSE_UNAUTHENTICATED, authorize,
};

use super::test_utils::{
    ADMIN_TOKEN, ALICE_TOKEN, InMemoryStore, active_audio, bearer, task_row, test_server,
    test_state,
};

fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn watch_refuses_anonymous_and_stale_tokens() {
    let ctx = test_state(InMemoryStore::with_audio(active_audio(10, 1)));

    let close = authorize(&ctx.state, &HashMap::new(), &HeaderMap::new())
        .await
        .unwrap_err();
    assert_eq!(close.code, CLOSE_UNAUTHENTICATED);
    assert_eq!(close.reason, "missing access token");

    let close = authorize(
        &ctx.state,
        &query(&[("accessToken", "tok-stale")]),
        &HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(close.code, CLOSE_UNAUTHENTICATED);
    assert_eq!(close.reason, "invalid or expired token");
}

#[tokio::test]
async fn watch_requires_a_parseable_known_task() {
    let ctx = test_state(InMemoryStore::with_audio(active_audio(10, 1)));
    ctx.store.push_task(task_row(7, 10, TaskStatus::Running));

    let close = authorize(
        &ctx.state,
        &query(&[("accessToken", ALICE_TOKEN)]),
        &HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(close.code, CLOSE_BAD_REQUEST);
    assert_eq!(close.reason, "missing or malformed taskId");

    let close = authorize(
        &ctx.state,
        &query(&[("accessToken", ALICE_TOKEN), ("taskId", "seven")]),
        &HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(close.code, CLOSE_BAD_REQUEST);

    let close = authorize(
        &ctx.state,
        &query(&[("accessToken", ALICE_TOKEN), ("taskId", "42")]),
        &HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(close.code, CLOSE_BAD_REQUEST);
    assert_eq!(close.reason, "task 42 not found");

    let task = authorize(
        &ctx.state,
        &query(&[("accessToken", ALICE_TOKEN), ("taskId", "7")]),
        &HeaderMap::new(),
    )
    .await
    .expect("owner with a valid token watches their task");
    assert_eq!(task, TaskId(7));
}

#[tokio::test]
async fn watch_enforces_ownership_but_admits_admins() {
    let ctx = test_state(InMemoryStore::with_audio(active_audio(10, 2)));
    ctx.store.push_task(task_row(7, 10, TaskStatus::Running));

    let close = authorize(
        &ctx.state,
        &query(&[("accessToken", ALICE_TOKEN), ("taskId", "7")]),
        &HeaderMap::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(close.code, CLOSE_FORBIDDEN);
    assert_eq!(close.reason, "not the owner of this recording");

    let task = authorize(
        &ctx.state,
        &query(&[("accessToken", ADMIN_TOKEN), ("taskId", "7")]),
        &HeaderMap::new(),
    )
    .await
    .expect("admins watch any task");
    assert_eq!(task, TaskId(7));
}

#[tokio::test]
async fn token_falls_back_to_header_then_cookie() {
    let ctx = test_state(InMemoryStore::with_audio(active_audio(10, 1)));
    ctx.store.push_task(task_row(7, 10, TaskStatus::Running));
    let params = query(&[("taskId", "7")]);

    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        HeaderValue::from_str(&bearer(ALICE_TOKEN)).unwrap(),
    );
    assert!(authorize(&ctx.state, &params, &headers).await.is_ok());

    let mut headers = HeaderMap::new();
    headers.insert(
        "cookie",
        HeaderValue::from_static("theme=dark; access_token=tok-alice"),
    );
    assert!(authorize(&ctx.state, &params, &headers).await.is_ok());
}

#[tokio::test]
async fn watcher_gets_a_frame_then_silence_while_nothing_changes() {
    let ctx = test_state(InMemoryStore::with_audio(active_audio(10, 1)));
    ctx.store.push_task(task_row(7, 10, TaskStatus::Running));
    let server = test_server(ctx.state.clone());

    let mut ws = server
        .get_websocket(&format!("/ws/tasks?taskId=7&accessToken={ALICE_TOKEN}"))
        .await
        .into_websocket()
        .await;

    let first = ws.receive_text().await;
    assert!(
        first.starts_with(r#"{"event":"snapshot","taskId":7"#),
        "got {first}"
    );
    assert!(first.contains(r#""status":"RUNNING""#));
    assert!(first.contains(r#""terminal":false"#));

    let quiet = tokio::time::timeout(Duration::from_millis(300), ws.receive_text()).await;
    assert!(quiet.is_err(), "unchanged snapshots must not be re-pushed");
}

#[tokio::test]
async fn watcher_sees_changes_and_a_terminal_frame() {
    let ctx = test_state(InMemoryStore::with_audio(active_audio(10, 1)));
    ctx.store.push_task(task_row(7, 10, TaskStatus::Running));
    ctx.state.progress.publish(
        TaskId(7),
        Phase::Emotion,
        "running emotion analysis",
        BTreeMap::new(),
    );
    let server = test_server(ctx.state.clone());

    let mut ws = server
        .get_websocket(&format!("/ws/tasks?taskId=7&accessToken={ALICE_TOKEN}"))
        .await
        .into_websocket()
        .await;

    let first = ws.receive_text().await;
    assert!(first.contains(r#""status":"RUNNING""#));
    assert!(first.contains(r#""phase":"EMOTION""#));

    ctx.store.update_task(TaskId(7), |task| {
        task.status = TaskStatus::RetryWait;
        task.attempt_count = 1;
        task.error_message = Some("TIMEOUT: ser deadline exceeded".into());
    });
    let retry = tokio::time::timeout(Duration::from_secs(2), ws.receive_text())
        .await
        .expect("status change should be pushed");
    assert!(retry.contains(r#""status":"RETRY_WAIT""#));
    assert!(retry.contains("TIMEOUT: ser deadline exceeded"));

    ctx.store.update_task(TaskId(7), |task| {
        task.status = TaskStatus::Success;
        task.error_message = None;
    });
    let last = tokio::time::timeout(Duration::from_secs(2), ws.receive_text())
        .await
        .expect("terminal frame should be pushed");
    assert!(last.contains(r#""status":"SUCCESS""#));
    assert!(last.contains(r#""terminal":true"#));

    // The terminal push releases the progress entry.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while ctx.state.progress.current(TaskId(7)).is_some() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "progress should be cleared after the terminal push"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
