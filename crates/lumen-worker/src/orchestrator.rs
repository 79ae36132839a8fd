//! Job orchestration: intake, detached processing, and terminal writes.
//!
//! Intake is staged because multipart uploads deliver the file before the
//! options field:
//!
//! 1. [`JobOrchestrator::begin_intake`] allocates the job id.
//! 2. [`JobOrchestrator::persist`] streams the upload to `input/<jobId>.<ext>`.
//! 3. [`JobOrchestrator::launch`] resolves options, writes the
//!    `processing`/10 record and spawns the pipeline.
//!
//! The pipeline runs inside a supervisor task. Whatever happens in it, an
//! error return or a panic, the supervisor writes a terminal status.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

use lumen_media::{
    chroma_key_command, detect_key_color, validate_paths, FfmpegRunner, ProgressTracker,
    WatermarkConfig,
};
use lumen_models::{
    resolve_options, Identity, Job, JobId, JobPatch, PlanTier, RawProcessingOptions,
    ResolvedOptions,
};
use lumen_store::{JobStore, StoreError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::layout::StorageLayout;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, FailureTracker, RetryConfig, RetryResult};

/// Progress written once the encoder is about to start.
pub const ENCODE_START_PROGRESS: u8 = 20;

/// An upload that has been written to disk but not yet launched.
#[derive(Debug)]
pub struct Intake {
    job_id: JobId,
    filename: String,
    input_path: PathBuf,
    bytes: u64,
}

impl Intake {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// A job accepted for processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchedJob {
    pub job_id: JobId,
    pub filename: String,
}

/// Everything the detached pipeline needs for one job.
#[derive(Debug)]
struct JobPlan {
    job_id: JobId,
    input_path: PathBuf,
    output_filename: String,
    resolved: ResolvedOptions,
}

struct Pipeline {
    store: Arc<dyn JobStore>,
    layout: StorageLayout,
    runner: FfmpegRunner,
    watermark: WatermarkConfig,
    threads: u32,
    terminal_retry: RetryConfig,
}

/// Accepts uploads and runs chroma-key jobs.
#[derive(Clone)]
pub struct JobOrchestrator {
    pipeline: Arc<Pipeline>,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, config: &WorkerConfig) -> Self {
        let mut runner = FfmpegRunner::new(&config.ffmpeg_path);
        if let Some(timeout) = config.ffmpeg_timeout {
            runner = runner.with_timeout(timeout);
        }

        Self {
            pipeline: Arc::new(Pipeline {
                store,
                layout: StorageLayout::new(&config.storage_path),
                runner,
                watermark: WatermarkConfig::default().with_text(&config.watermark_text),
                threads: config.ffmpeg_threads,
                terminal_retry: RetryConfig::new("terminal_write")
                    .with_max_retries(config.terminal_write_retries),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.pipeline.store
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.pipeline.layout
    }

    /// Create the storage directories. Call once at startup.
    pub async fn prepare(&self) -> WorkerResult<()> {
        self.pipeline.layout.ensure_dirs().await?;
        Ok(())
    }

    /// Allocate the id for a new upload.
    pub fn begin_intake(&self) -> JobId {
        JobId::new()
    }

    /// Stream an upload to `input/<jobId>.<ext>`.
    ///
    /// An empty upload is removed and rejected.
    pub async fn persist<R>(
        &self,
        job_id: &JobId,
        filename: &str,
        mut reader: R,
    ) -> WorkerResult<Intake>
    where
        R: AsyncRead + Unpin,
    {
        let layout = &self.pipeline.layout;
        tokio::fs::create_dir_all(layout.input_dir()).await?;

        let input_path = layout.input_path(job_id, filename);
        let mut file = tokio::fs::File::create(&input_path).await?;

        let copied = tokio::io::copy(&mut reader, &mut file).await;
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                remove_quietly(&input_path).await;
                return Err(e.into());
            }
        };
        file.flush().await?;
        drop(file);

        if bytes == 0 {
            remove_quietly(&input_path).await;
            return Err(WorkerError::EmptyUpload);
        }

        tracing::debug!(job_id = %job_id, bytes, "Persisted upload");
        Ok(Intake {
            job_id: job_id.clone(),
            filename: filename.to_string(),
            input_path,
            bytes,
        })
    }

    /// Drop a persisted upload that will not be launched.
    pub async fn discard(&self, intake: Intake) {
        remove_quietly(&intake.input_path).await;
    }

    /// Create the job record and start processing in the background.
    ///
    /// `raw_options` is the client's JSON; anything unreadable falls back to
    /// defaults. Returns as soon as the record is written.
    pub async fn launch(
        &self,
        intake: Intake,
        raw_options: Option<&str>,
        identity: &Identity,
    ) -> WorkerResult<LaunchedJob> {
        let logger = JobLogger::new(&intake.job_id, "intake");
        let raw = parse_raw_options(raw_options, &logger);
        let resolved = resolve_options(&raw, identity.tier);

        let job = Job::intake(
            intake.job_id.clone(),
            intake.filename.clone(),
            resolved.options.clone(),
            identity.user_id.clone(),
            resolved.has_watermark,
        );

        if let Err(e) = self.pipeline.store.create(job).await {
            self.discard(intake).await;
            return Err(e.into());
        }

        logger.log_start(&format!(
            "tier={} quality={} codec={} watermark={}",
            resolved.tier, resolved.options.quality, resolved.options.codec, resolved.has_watermark
        ));
        metrics::record_job_started(resolved.tier.as_str());

        let plan = JobPlan {
            job_id: intake.job_id.clone(),
            output_filename: self
                .pipeline
                .layout
                .output_filename(&intake.job_id, &intake.filename),
            input_path: intake.input_path,
            resolved,
        };
        self.spawn_supervised(plan);

        Ok(LaunchedJob {
            job_id: intake.job_id,
            filename: intake.filename,
        })
    }

    fn spawn_supervised(&self, plan: JobPlan) {
        let job_id = plan.job_id.clone();
        let tier = plan.resolved.tier;
        let work = self.pipeline.clone().run(plan);
        self.supervise(job_id, tier, work);
    }

    /// Run `work` in its own task and finalize the job from the outside.
    fn supervise<F>(&self, job_id: JobId, tier: PlanTier, work: F) -> JoinHandle<()>
    where
        F: Future<Output = WorkerResult<String>> + Send + 'static,
    {
        let pipeline = self.pipeline.clone();
        let logger = JobLogger::new(&job_id, "chroma_key");
        let span = logger.create_span();

        tokio::spawn(
            async move {
                let worker = tokio::spawn(work.in_current_span());

                let outcome = match worker.await {
                    Ok(Ok(output_filename)) => Ok(output_filename),
                    Ok(Err(e)) => {
                        logger.log_error(&e.to_string());
                        Err(e.job_message())
                    }
                    Err(join) if join.is_panic() => {
                        logger.log_error("processing task panicked");
                        Err("Internal error: processing task panicked".to_string())
                    }
                    Err(_) => {
                        logger.log_error("processing task was cancelled");
                        Err("Processing was cancelled".to_string())
                    }
                };

                match &outcome {
                    Ok(output) => {
                        metrics::record_job_completed(tier.as_str());
                        logger.log_completion(output);
                    }
                    Err(_) => metrics::record_job_failed(tier.as_str()),
                }

                pipeline.finalize(&job_id, outcome, &logger).await;
            }
            .instrument(span),
        )
    }
}

impl Pipeline {
    /// Process one job. Returns the output filename.
    async fn run(self: Arc<Self>, plan: JobPlan) -> WorkerResult<String> {
        let (progress_tx, writer) = self.spawn_progress_writer(&plan.job_id);

        let result = self.encode(&plan, progress_tx).await;

        // Every queued progress write lands before the terminal write.
        if let Err(e) = writer.await {
            warn!("Progress writer task failed: {}", e);
        }

        result
    }

    async fn encode(
        &self,
        plan: &JobPlan,
        progress: mpsc::UnboundedSender<u8>,
    ) -> WorkerResult<String> {
        let logger = JobLogger::new(&plan.job_id, "chroma_key");
        let output_path = self.layout.output_path(&plan.output_filename);

        validate_paths(&plan.input_path, &output_path).await?;

        let _ = progress.send(ENCODE_START_PROGRESS);

        let key_color = self.key_color(plan, &logger).await;
        let cmd = chroma_key_command(
            &plan.input_path,
            &output_path,
            &plan.resolved,
            &key_color,
            &self.watermark,
            self.threads,
        );

        let started = Instant::now();
        self.runner
            .run_with_progress(&cmd, ProgressTracker::default(), move |percent| {
                let _ = progress.send(percent);
            })
            .await?;
        metrics::record_ffmpeg_duration(
            plan.resolved.options.codec.as_str(),
            started.elapsed().as_secs_f64(),
        );

        if tokio::fs::metadata(&output_path).await.is_err() {
            logger.log_warning("ffmpeg exited cleanly but the output file is missing");
        }

        Ok(plan.output_filename.clone())
    }

    /// Configured color, or the sampled one when auto-detection is on.
    async fn key_color(&self, plan: &JobPlan, logger: &JobLogger) -> String {
        let configured = plan.resolved.options.background_color.clone();
        if !plan.resolved.options.auto_detect_color {
            return configured;
        }

        match detect_key_color(&self.runner, &plan.input_path).await {
            Ok(color) => {
                logger.log_progress(&format!("detected key color {}", color));
                color
            }
            Err(e) => {
                logger.log_warning(&format!(
                    "key color detection failed, using {}: {}",
                    configured, e
                ));
                metrics::record_key_color_fallback();
                configured
            }
        }
    }

    /// Single writer per job so progress reaches the store in order.
    fn spawn_progress_writer(&self, job_id: &JobId) -> (mpsc::UnboundedSender<u8>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let store = self.store.clone();
        let job_id = job_id.clone();

        let handle = tokio::spawn(
            async move {
                let mut failures = FailureTracker::new(3);
                while let Some(percent) = rx.recv().await {
                    match store.upsert(&job_id, JobPatch::progress(percent)).await {
                        Ok(_) => failures.record_success(),
                        Err(e) if e.is_terminal() => {
                            warn!(
                                job_id = %job_id,
                                "Job finalized early; dropping progress updates"
                            );
                            break;
                        }
                        Err(e) => {
                            if failures.record_failure() {
                                warn!(job_id = %job_id, "Progress write failed: {}", e);
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        (tx, handle)
    }

    /// Write the terminal status, retrying transient store failures.
    async fn finalize(&self, job_id: &JobId, outcome: Result<String, String>, logger: &JobLogger) {
        let patch = match outcome {
            Ok(output_filename) => JobPatch::completed(output_filename),
            Err(message) => JobPatch::failed(message),
        };

        let result = retry_async(
            &self.terminal_retry,
            || self.store.upsert(job_id, patch.clone()),
            StoreError::is_retryable,
        )
        .await;

        match result {
            RetryResult::Success(_) => {}
            RetryResult::Failed { error, .. } if error.is_terminal() => {
                logger.log_warning("job was already finalized");
            }
            RetryResult::Failed { error, attempts } => {
                logger.log_error(&format!(
                    "terminal status write failed after {} attempts: {}",
                    attempts, error
                ));
            }
        }
    }
}

fn parse_raw_options(raw_options: Option<&str>, logger: &JobLogger) -> RawProcessingOptions {
    let Some(payload) = raw_options.filter(|p| !p.trim().is_empty()) else {
        return RawProcessingOptions::default();
    };

    match RawProcessingOptions::from_json(payload) {
        Ok(raw) => {
            if !raw.rejected.is_empty() {
                logger.log_warning(&format!(
                    "ignoring invalid option fields: {}",
                    raw.rejected.join(", ")
                ));
            }
            raw
        }
        Err(e) => {
            logger.log_warning(&format!("using default options: {}", e));
            RawProcessingOptions::default()
        }
    }
}

async fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove upload: {}", e);
        }
    }
}
