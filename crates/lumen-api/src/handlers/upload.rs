//! Upload intake.
//!
//! `POST /api/upload` takes a multipart body with a `file` part and an
//! optional `options` part holding JSON text. The file is streamed to disk as
//! it arrives; the job is only created once the whole body has been read.

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::Json;
use futures_util::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::info;

use lumen_worker::{Intake, JobOrchestrator, WorkerError};

use crate::auth::CallerIdentity;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Name used when the client sends no filename.
const FALLBACK_FILENAME: &str = "upload.mp4";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub job_id: String,
    pub filename: String,
}

/// Accept an upload and start processing it.
pub async fn upload(
    State(state): State<AppState>,
    CallerIdentity(identity): CallerIdentity,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let orchestrator = &state.orchestrator;
    let mut intake: Option<Intake> = None;
    let mut options: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                let err = ApiError::bad_request(format!("Malformed multipart body: {}", e));
                return Err(reject(orchestrator, intake, err).await);
            }
        };

        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") if intake.is_none() => {
                intake = Some(persist_field(orchestrator, field).await?);
            }
            Some("options") => match field.text().await {
                Ok(text) => options = Some(text),
                Err(e) => {
                    let err = ApiError::bad_request(format!("Unreadable options field: {}", e));
                    return Err(reject(orchestrator, intake, err).await);
                }
            },
            // Unknown parts are skipped by the next `next_field` call
            _ => {}
        }
    }

    let intake = intake.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let bytes = intake.bytes();

    let launched = orchestrator
        .launch(intake, options.as_deref(), &identity)
        .await?;

    metrics::record_upload(identity.tier.as_str(), bytes);
    info!(
        job_id = %launched.job_id,
        bytes,
        anonymous = identity.is_anonymous(),
        "Upload accepted"
    );

    Ok(Json(UploadResponse {
        job_id: launched.job_id.to_string(),
        filename: launched.filename,
    }))
}

/// Stream a `file` part to the input directory.
async fn persist_field(orchestrator: &JobOrchestrator, field: Field<'_>) -> ApiResult<Intake> {
    let filename = field
        .file_name()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string();

    let job_id = orchestrator.begin_intake();
    let reader = StreamReader::new(field.map_err(std::io::Error::other));
    tokio::pin!(reader);

    match orchestrator.persist(&job_id, &filename, reader).await {
        Ok(intake) => Ok(intake),
        // The client stream broke off, not the disk
        Err(WorkerError::Io(e))
            if e.get_ref().is_some_and(|inner| inner.is::<MultipartError>()) =>
        {
            Err(ApiError::bad_request(format!("Upload interrupted: {}", e)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Drop a persisted upload before failing the request.
async fn reject(orchestrator: &JobOrchestrator, intake: Option<Intake>, err: ApiError) -> ApiError {
    if let Some(intake) = intake {
        orchestrator.discard(intake).await;
    }
    err
}
