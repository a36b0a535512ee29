//! End-to-end API tests over a real PostgreSQL instance.
//!
//! `cargo test -- --ignored` with `DATABASE_URL` pointing at a Postgres
//! instance; sqlx provisions an isolated schema per test through the
//! migrator. The second test also spins up the embedded worker with the
//! fixture model clients and follows one recording from enqueue to the
//! terminal websocket frame.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use emvox_core::clients::{FixtureEmotionClient, FixtureTranscriptionClient};
use emvox_core::progress::ProgressTracker;
use emvox_core::realtime::{DEFAULT_CURVE_LIMIT, SnapshotService};
use emvox_core::service::AnalysisTaskService;
use emvox_core::store::{PgSessionDirectory, PgTaskStore, SessionDirectory, TaskStore};
use emvox_core::worker::{BackoffPolicy, Worker, WorkerSettings};
use emvox_server::infra::app_state::{AppState, WorkerHandle};
use emvox_server::routes;

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

fn build_state(pool: PgPool) -> AppState {
    let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.clone()));
    let sessions: Arc<dyn SessionDirectory> = Arc::new(PgSessionDirectory::new(pool));
    let progress = ProgressTracker::new();

    AppState {
        store: store.clone(),
        sessions,
        tasks: AnalysisTaskService::new(store.clone(), 4),
        snapshots: SnapshotService::new(store, progress.clone(), DEFAULT_CURVE_LIMIT),
        progress,
        worker: WorkerHandle::disabled("emvox-live".to_string()),
        push_interval_ms: 100,
    }
}

fn test_server(state: &AppState) -> Result<TestServer> {
    TestServer::builder()
        .http_transport()
        .build(routes::create_app(state.clone()))
        .map_err(|err| anyhow::anyhow!(err.to_string()))
}

#[sqlx::test(
    migrator = "emvox_core::MIGRATOR",
    fixtures(path = "../fixtures", scripts("seed_base"))
)]
#[ignore = "requires a PostgreSQL database"]
async fn api_flow_from_enqueue_to_status(pool: PgPool) -> Result<()> {
    let state = build_state(pool);
    let server = test_server(&state)?;

    let denied = server
        .post("/api/v1/analysis/tasks")
        .json(&json!({"audioId": 10}))
        .await;
    denied.assert_status(StatusCode::UNAUTHORIZED);

    let created = server
        .post("/api/v1/analysis/tasks")
        .add_header("Authorization", bearer("tok-alice"))
        .json(&json!({"audioId": 10}))
        .await;
    created.assert_status_ok();
    let body: Value = created.json();
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["audioId"], 10);
    let task_id = body["taskId"].as_i64().expect("task id");
    assert!(
        body["taskNo"]
            .as_str()
            .unwrap_or_default()
            .starts_with("U0001-"),
        "got {}",
        body["taskNo"]
    );

    // Re-posting the same recording hands back the live task.
    let again = server
        .post("/api/v1/analysis/tasks")
        .add_header("Authorization", bearer("tok-alice"))
        .json(&json!({"audioId": 10}))
        .await;
    again.assert_status_ok();
    let body: Value = again.json();
    assert_eq!(body["taskId"].as_i64(), Some(task_id));

    // Expired sessions do not authenticate.
    let expired = server
        .get(&format!("/api/v1/analysis/tasks/{task_id}"))
        .add_header("Authorization", bearer("tok-expired"))
        .await;
    expired.assert_status(StatusCode::UNAUTHORIZED);

    let detail = server
        .get(&format!("/api/v1/analysis/tasks/{task_id}"))
        .add_header("Authorization", bearer("tok-alice"))
        .await;
    detail.assert_status_ok();
    let body: Value = detail.json();
    assert_eq!(body["status"], "PENDING");
    assert!(body["riskSummary"].is_null());
    assert!(body["result"].is_null());

    let segments = server
        .get(&format!("/api/v1/analysis/tasks/{task_id}/segments"))
        .add_header("Authorization", bearer("tok-alice"))
        .await;
    segments.assert_status_ok();
    let body: Value = segments.json();
    assert_eq!(body["total"], 0);
    assert_eq!(body["limit"], 50);

    // The operator surface is admin-gated and sees the backlog.
    let forbidden = server
        .get("/api/v1/system/status")
        .add_header("Authorization", bearer("tok-alice"))
        .await;
    forbidden.assert_status(StatusCode::FORBIDDEN);

    let status = server
        .get("/api/v1/system/status")
        .add_header("Authorization", bearer("tok-admin"))
        .await;
    status.assert_status_ok();
    let body: Value = status.json();
    assert_eq!(body["queue"]["active"], 1);
    assert_eq!(body["worker"]["enabled"], false);

    Ok(())
}

#[sqlx::test(
    migrator = "emvox_core::MIGRATOR",
    fixtures(path = "../fixtures", scripts("seed_base"))
)]
#[ignore = "requires a PostgreSQL database"]
async fn embedded_worker_drives_a_task_to_success(pool: PgPool) -> Result<()> {
    // Point the seeded recording at a real file so the pipeline can read
    // it. 48000 bytes maps to two fixture segments, neutral overall.
    let mut audio = tempfile::NamedTempFile::new()?;
    audio.write_all(&vec![0u8; 48_000])?;
    audio.flush()?;
    sqlx::query("UPDATE audio_files SET storage_path = $1 WHERE id = 10")
        .bind(audio.path().to_string_lossy().as_ref())
        .execute(&pool)
        .await?;

    let state = build_state(pool);
    let server = test_server(&state)?;

    let worker = Worker::new(
        state.store.clone(),
        Arc::new(FixtureEmotionClient::default()),
        Arc::new(FixtureTranscriptionClient),
        state.progress.clone(),
        WorkerSettings {
            poll_interval_ms: 50,
            batch_size: 5,
            backoff: BackoffPolicy::default(),
            probe_health: false,
            health_cooldown_ms: 1_000,
        },
        "emvox-live-w1".to_string(),
    );
    let shutdown = CancellationToken::new();
    let worker_task = tokio::spawn(worker.run(shutdown.clone()));

    let created = server
        .post("/api/v1/analysis/tasks")
        .add_header("Authorization", bearer("tok-alice"))
        .json(&json!({"audioId": 10}))
        .await;
    created.assert_status_ok();
    let body: Value = created.json();
    let task_id = body["taskId"].as_i64().expect("task id");

    // Poll the detail endpoint until the worker lands the result.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let detail = loop {
        let response = server
            .get(&format!("/api/v1/analysis/tasks/{task_id}"))
            .add_header("Authorization", bearer("tok-alice"))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        match body["status"].as_str() {
            Some("SUCCESS") => break body,
            Some("FAILED") => bail!("task failed: {}", body["errorMessage"]),
            _ => {}
        }
        ensure!(
            tokio::time::Instant::now() < deadline,
            "task did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    assert_eq!(detail["attemptCount"], 0);
    assert_eq!(detail["result"]["overallEmotion"], "neutral");
    assert_eq!(detail["result"]["hasTranscript"], true);
    assert_eq!(detail["riskSummary"]["risk_level"], "NORMAL");

    let segments = server
        .get(&format!("/api/v1/analysis/tasks/{task_id}/segments"))
        .add_header("Authorization", bearer("tok-alice"))
        .await;
    segments.assert_status_ok();
    let body: Value = segments.json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["items"][0]["seq"], 0);
    assert_eq!(body["items"][0]["endMs"], 8_000);

    // A watcher connecting after completion still gets one terminal frame.
    let mut ws = server
        .get_websocket(&format!(
            "/ws/tasks?taskId={task_id}&accessToken=tok-alice"
        ))
        .await
        .into_websocket()
        .await;
    let frame = ws.receive_text().await;
    assert!(frame.contains(r#""status":"SUCCESS""#), "got {frame}");
    assert!(frame.contains(r#""terminal":true"#));
    assert!(frame.contains(r#""riskCurve":[{"#));

    shutdown.cancel();
    worker_task.await?;

    Ok(())
}
