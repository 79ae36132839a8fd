//! HTTP tests driving the router with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use lumen_api::{create_router, ApiConfig, AppState, IdentityProvider, JwtIdentityProvider};
use lumen_models::{Job, JobId, JobPatch, JobStatus, ProcessingOptions};
use lumen_store::{JobStore, MemoryJobStore};
use lumen_worker::WorkerConfig;

const BOUNDARY: &str = "lumenflow-test-boundary";
const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    store: Arc<MemoryJobStore>,
    state: AppState,
    _dir: TempDir,
}

async fn test_app(recent_fallback: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryJobStore::new());

    let mut worker = WorkerConfig::default()
        .with_storage_path(dir.path().join("storage"))
        .with_ffmpeg_path(dir.path().join("missing-ffmpeg"));
    worker.download_recent_fallback = recent_fallback;

    let config = ApiConfig {
        events_poll_interval: Duration::from_millis(10),
        ..ApiConfig::default()
    };
    let identity: Arc<dyn IdentityProvider> = Arc::new(JwtIdentityProvider::new(SECRET));

    let state = AppState::from_parts(config, &worker, store.clone(), identity);
    state.prepare().await.unwrap();

    TestApp {
        router: create_router(state.clone(), None),
        store,
        state,
        _dir: dir,
    }
}

fn multipart_body(file: Option<(&str, &[u8])>, options: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(options) = options {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"options\"\r\n\r\n{options}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: video/mp4\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn pro_token() -> String {
    encode(
        &Header::default(),
        &json!({
            "sub": "user-42",
            "exp": chrono::Utc::now().timestamp() + 3600,
            "app_metadata": { "subscription_tier": "pro" },
        }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn intake_job(store: &MemoryJobStore, id: &str) -> JobId {
    let job_id = JobId::from_string(id);
    store
        .create(Job::intake(
            job_id.clone(),
            "clip.mp4".to_string(),
            ProcessingOptions::default(),
            None,
            true,
        ))
        .await
        .unwrap();
    job_id
}

async fn completed_job(store: &MemoryJobStore, id: &str, output: &str) -> JobId {
    let job_id = intake_job(store, id).await;
    store
        .upsert(&job_id, JobPatch::completed(output))
        .await
        .unwrap();
    job_id
}

#[tokio::test]
async fn test_health_reports_healthy() {
    let app = test_app(true).await;

    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_degrades_without_ffmpeg() {
    let app = test_app(true).await;

    let response = app.router.oneshot(get("/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["store"]["status"], "ok");
    assert_eq!(body["checks"]["store"]["backend"], "memory");
    assert_eq!(body["checks"]["ffmpeg"]["status"], "error");
}

#[tokio::test]
async fn test_upload_without_file_is_rejected() {
    let app = test_app(true).await;

    let body = multipart_body(None, Some("{}"));
    let response = app.router.oneshot(upload_request(body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("No file uploaded"));
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let app = test_app(true).await;

    let body = multipart_body(Some(("clip.mp4", &b""[..])), None);
    let response = app.router.oneshot(upload_request(body, None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "empty_upload");
}

#[tokio::test]
async fn test_malformed_multipart_is_rejected() {
    let app = test_app(true).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_anonymous_upload_creates_watermarked_job() {
    let app = test_app(true).await;

    let body = multipart_body(
        Some(("my clip.mp4", &b"video bytes"[..])),
        Some("{\"quality\":\"best\"}"),
    );
    let response = app
        .router
        .clone()
        .oneshot(upload_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["filename"], "my clip.mp4");
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let job = app
        .store
        .get(&JobId::from_string(job_id.as_str()))
        .await
        .unwrap()
        .unwrap();
    assert!(job.has_watermark);
    assert!(job.owner_id.is_none());
    // Free plan: quality is forced to fast
    assert_eq!(job.options.quality.as_str(), "fast");

    let input = app
        .state
        .orchestrator
        .layout()
        .input_dir()
        .join(format!("{job_id}.mp4"));
    assert_eq!(std::fs::read(input).unwrap(), b"video bytes");

    let response = app
        .router
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body = body_json(response).await;
    assert_eq!(body["id"], job_id);
    assert_eq!(body["hasWatermark"], true);
    assert!(body["progress"].as_u64().is_some());
    assert!(body.get("createdAt").is_some());
}

#[tokio::test]
async fn test_pro_token_uploads_without_watermark() {
    let app = test_app(true).await;

    let body = multipart_body(
        Some(("clip.mov", &b"video bytes"[..])),
        Some("{\"quality\":\"best\"}"),
    );
    let response = app
        .router
        .oneshot(upload_request(body, Some(&pro_token())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let job_id = body_json(response).await["jobId"].as_str().unwrap().to_string();
    let job = app
        .store
        .get(&JobId::from_string(job_id))
        .await
        .unwrap()
        .unwrap();
    assert!(!job.has_watermark);
    assert_eq!(job.owner_id.as_deref(), Some("user-42"));
    assert_eq!(job.options.quality.as_str(), "best");
}

#[tokio::test]
async fn test_invalid_token_is_treated_as_anonymous() {
    let app = test_app(true).await;

    let body = multipart_body(Some(("clip.mp4", &b"video bytes"[..])), None);
    let response = app
        .router
        .oneshot(upload_request(body, Some("garbage")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let job_id = body_json(response).await["jobId"].as_str().unwrap().to_string();
    let job = app
        .store
        .get(&JobId::from_string(job_id))
        .await
        .unwrap()
        .unwrap();
    assert!(job.has_watermark);
    assert!(job.owner_id.is_none());
}

#[tokio::test]
async fn test_job_lookup_errors() {
    let app = test_app(true).await;

    let response = app
        .router
        .clone()
        .oneshot(get("/api/jobs/00000000-0000-4000-8000-000000000000"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router
        .oneshot(get("/api/jobs/not!valid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_completed_job_has_download_url() {
    let app = test_app(true).await;
    let job_id = completed_job(&app.store, "job-done", "clip-job-done.webm").await;

    let response = app
        .router
        .oneshot(get(&format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    let body = body_json(response).await;

    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["outputFilename"], "clip-job-done.webm");
    assert_eq!(body["downloadUrl"], "/api/download/job-done");
}

#[tokio::test]
async fn test_download_streams_output() {
    let app = test_app(true).await;
    let job_id = completed_job(&app.store, "job-dl", "clip-job-dl.webm").await;
    let layout = app.state.orchestrator.layout();
    std::fs::write(layout.output_path("clip-job-dl.webm"), b"webm data").unwrap();

    let response = app
        .router
        .oneshot(get(&format!("/api/download/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/webm"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"clip-job-dl.webm\""
    );
    assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "9");
    assert_eq!(body_bytes(response).await, b"webm data");
}

#[tokio::test]
async fn test_download_scans_by_job_id_without_record() {
    let app = test_app(false).await;
    let layout = app.state.orchestrator.layout();
    std::fs::write(layout.output_path("video-orphan-1.webm"), b"x").unwrap();

    let response = app
        .router
        .clone()
        .oneshot(get("/api/download/orphan-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // No match and no recency fallback
    let response = app
        .router
        .oneshot(get("/api/download/unknown-job"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("/api/jobs/unknown-job"));
}

#[tokio::test]
async fn test_download_refuses_job_still_processing() {
    let app = test_app(true).await;
    let job_id = intake_job(&app.store, "job-busy").await;
    app.store
        .upsert(&job_id, JobPatch::progress(40))
        .await
        .unwrap();
    let layout = app.state.orchestrator.layout();
    std::fs::write(layout.output_path("clip-job-busy.webm"), b"half").unwrap();

    let response = app
        .router
        .oneshot(get("/api/download/job-busy"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("processing"));
}

#[tokio::test]
async fn test_download_refuses_failed_job() {
    let app = test_app(true).await;
    let job_id = intake_job(&app.store, "job-failed").await;
    app.store
        .upsert(&job_id, JobPatch::failed("ffmpeg exited with code 1"))
        .await
        .unwrap();
    let layout = app.state.orchestrator.layout();
    std::fs::write(layout.output_path("clip-job-failed.webm"), b"truncated").unwrap();

    let response = app
        .router
        .oneshot(get("/api/download/job-failed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("error"));
}

#[tokio::test]
async fn test_download_completed_job_falls_back_to_scan() {
    let app = test_app(false).await;
    completed_job(&app.store, "job-moved", "gone-job-moved.webm").await;
    let layout = app.state.orchestrator.layout();
    std::fs::write(layout.output_path("renamed-job-moved.webm"), b"moved").unwrap();

    let response = app
        .router
        .oneshot(get("/api/download/job-moved"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"moved");
}

#[tokio::test]
async fn test_events_stream_ends_after_terminal_status() {
    let app = test_app(true).await;
    let job_id = completed_job(&app.store, "job-sse", "clip-job-sse.webm").await;

    let response = app
        .router
        .oneshot(get(&format!("/api/jobs/{job_id}/events")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );

    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(body.matches("event: job").count(), 1);
    assert!(body.contains("\"status\":\"completed\""));
}

#[tokio::test]
async fn test_events_follow_progress_until_failure() {
    let app = test_app(true).await;
    let job_id = intake_job(&app.store, "job-live").await;

    let store = app.store.clone();
    let writer_id = job_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.upsert(&writer_id, JobPatch::progress(40)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        store
            .upsert(&writer_id, JobPatch::failed("ffmpeg exited with code 1"))
            .await
            .unwrap();
    });

    let response = app
        .router
        .oneshot(get(&format!("/api/jobs/{job_id}/events")))
        .await
        .unwrap();
    let body = String::from_utf8(body_bytes(response).await).unwrap();

    assert_eq!(body.matches("event: job").count(), 3);
    assert!(body.contains("\"progress\":40"));
    assert!(body.contains("\"status\":\"error\""));
    assert!(body.contains("ffmpeg exited with code 1"));
    assert_eq!(
        app.store.get(&job_id).await.unwrap().unwrap().status,
        JobStatus::Error
    );
}

#[tokio::test]
async fn test_events_for_unknown_job_is_not_found() {
    let app = test_app(true).await;

    let response = app
        .router
        .oneshot(get("/api/jobs/nope/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let dir = tempfile::tempdir().unwrap();
    let worker = WorkerConfig::default().with_storage_path(dir.path());
    let config = ApiConfig {
        rate_limit_rps: 1,
        rate_limit_burst: 1,
        ..ApiConfig::default()
    };
    let state = AppState::from_parts(
        config,
        &worker,
        Arc::new(MemoryJobStore::new()),
        Arc::new(JwtIdentityProvider::new(SECRET)),
    );
    let router = create_router(state, None);

    let request = |ip: &str| {
        Request::builder()
            .uri("/api/jobs/some-job")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    };

    let first = router.clone().oneshot(request("203.0.113.9")).await.unwrap();
    assert_eq!(first.status(), StatusCode::NOT_FOUND);

    let second = router.clone().oneshot(request("203.0.113.9")).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.headers().get(header::RETRY_AFTER).unwrap(), "1");

    let other = router.oneshot(request("203.0.113.10")).await.unwrap();
    assert_eq!(other.status(), StatusCode::NOT_FOUND);
}
