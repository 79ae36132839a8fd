//! Job status handlers.
//!
//! Provides:
//! - `GET /api/jobs/:job_id` for polling
//! - `GET /api/jobs/:job_id/events`, a Server-Sent Events stream that ends
//!   after the terminal status

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tracing::warn;

use lumen_models::{Job, JobId, JobStatus};
use lumen_store::JobStore;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const MAX_JOB_ID_LEN: usize = 64;

/// Job status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    pub status: JobStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_filename: Option<String>,
    pub has_watermark: bool,
    /// Present once an output exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let download_url = job
            .output_filename
            .as_ref()
            .map(|_| format!("/api/download/{}", job.id));

        Self {
            id: job.id.to_string(),
            status: job.status,
            progress: job.progress,
            error: job.error,
            filename: job.filename,
            output_filename: job.output_filename,
            has_watermark: job.has_watermark,
            download_url,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Validate job ID format.
///
/// Valid format: alphanumeric characters, hyphens and underscores, 1-64 chars.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_JOB_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parse a job id from the path, rejecting malformed ones.
pub(crate) fn parse_job_id(raw: String) -> ApiResult<JobId> {
    if is_valid_job_id(&raw) {
        Ok(JobId::from(raw))
    } else {
        Err(ApiError::bad_request("Invalid job ID"))
    }
}

/// Get the current state of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = parse_job_id(job_id)?;

    let job = state
        .store
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        Json(JobResponse::from(job)),
    )
        .into_response())
}

/// Stream job updates as Server-Sent Events.
///
/// Emits a `job` event whenever the record changes and closes after the
/// terminal status has been sent.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id = parse_job_id(job_id)?;

    if state.store.get(&job_id).await?.is_none() {
        return Err(ApiError::not_found("Job not found"));
    }

    let watch = JobWatch::new(
        state.store.clone(),
        job_id,
        state.config.events_poll_interval,
    );
    Ok(Sse::new(watch.into_stream()).keep_alive(KeepAlive::default()))
}

/// Polls one job record and yields each distinct version of it.
struct JobWatch {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    interval: Duration,
    last: Option<Job>,
    finished: bool,
}

impl JobWatch {
    fn new(store: Arc<dyn JobStore>, job_id: JobId, interval: Duration) -> Self {
        metrics::event_stream_opened();
        Self {
            store,
            job_id,
            interval,
            last: None,
            finished: false,
        }
    }

    fn into_stream(self) -> impl Stream<Item = Result<Event, Infallible>> {
        stream::unfold(self, |mut watch| async move {
            let event = watch.next_event().await?;
            Some((Ok(event), watch))
        })
    }

    async fn next_event(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }

        loop {
            match self.store.get(&self.job_id).await {
                Ok(Some(job)) if self.last.as_ref() != Some(&job) => {
                    self.finished = job.is_terminal();
                    let event = job_event(&job);
                    self.last = Some(job);
                    return Some(event);
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.finished = true;
                    return Some(Event::default().event("error").data("Job not found"));
                }
                Err(e) => warn!(job_id = %self.job_id, "Job event poll failed: {}", e),
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

impl Drop for JobWatch {
    fn drop(&mut self) {
        metrics::event_stream_closed();
    }
}

fn job_event(job: &Job) -> Event {
    let body = JobResponse::from(job.clone());
    Event::default()
        .event("job")
        .json_data(&body)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
