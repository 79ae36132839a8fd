//! Output download.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use lumen_models::JobStatus;
use lumen_worker::OutputMatch;

use crate::error::{ApiError, ApiResult};
use crate::handlers::jobs::parse_job_id;
use crate::metrics;
use crate::state::AppState;

/// Stream a job's WebM output as an attachment.
///
/// Works without a job record too, as long as an output file for the id is
/// on disk. Jobs that have not completed get a 409.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = parse_job_id(job_id)?;

    // Only a completed job, or an id with no record at all, may hit the disk scan
    let stored = match state.store.get(&job_id).await {
        Ok(Some(job)) if job.status != JobStatus::Completed => {
            return Err(ApiError::conflict(format!(
                "Job status is {}; output is available once it completes",
                job.status.as_str()
            )));
        }
        Ok(job) => job.and_then(|j| j.output_filename),
        Err(e) => {
            warn!(job_id = %job_id, "Job lookup failed, scanning outputs: {}", e);
            None
        }
    };

    let found = state
        .outputs
        .locate(&job_id, stored.as_deref())
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!(
                "Output not found. If the job is still processing, check /api/jobs/{}",
                job_id
            ))
        })?;

    let file = tokio::fs::File::open(&found.path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to open output: {}", e)))?;

    let matched_by = match found.matched_by {
        OutputMatch::Stored => "stored",
        OutputMatch::JobIdScan => "job_id_scan",
        OutputMatch::MostRecent => "most_recent",
    };
    metrics::record_download(matched_by);
    info!(
        job_id = %job_id,
        file = %found.filename,
        size = found.size,
        matched_by,
        "Serving download"
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/webm")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", found.filename),
        )
        .header(header::CONTENT_LENGTH, found.size)
        .header(header::CACHE_CONTROL, "no-store")
        .header("Cross-Origin-Resource-Policy", "cross-origin")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}
