//! Prometheus metrics for the API server.

use std::sync::LazyLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "lumen_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "lumen_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "lumen_http_requests_in_flight";

    // Intake metrics
    pub const UPLOADS_TOTAL: &str = "lumen_uploads_total";
    pub const UPLOAD_BYTES: &str = "lumen_upload_bytes";
    pub const DOWNLOADS_TOTAL: &str = "lumen_downloads_total";

    // Subscriptions
    pub const EVENT_STREAMS_ACTIVE: &str = "lumen_event_streams_active";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "lumen_rate_limit_hits_total";
}

static JOB_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/api/(jobs|download)/[^/]+").unwrap());

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an accepted upload.
pub fn record_upload(tier: &str, bytes: u64) {
    let labels = [("tier", tier.to_string())];
    counter!(names::UPLOADS_TOTAL, &labels).increment(1);
    histogram!(names::UPLOAD_BYTES).record(bytes as f64);
}

/// Record a served download and how the file was found.
pub fn record_download(matched_by: &str) {
    let labels = [("matched_by", matched_by.to_string())];
    counter!(names::DOWNLOADS_TOTAL, &labels).increment(1);
}

pub fn event_stream_opened() {
    gauge!(names::EVENT_STREAMS_ACTIVE).increment(1.0);
}

pub fn event_stream_closed() {
    gauge!(names::EVENT_STREAMS_ACTIVE).decrement(1.0);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Sanitize path for metrics labels (replace job ids).
fn sanitize_path(path: &str) -> String {
    JOB_PATH_RE.replace(path, "/api/$1/:job_id").to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);

    let response = next.run(request).await;

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_request(&method, &path, status, duration);

    response
}
