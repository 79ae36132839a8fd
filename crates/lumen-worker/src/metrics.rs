//! Job pipeline metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "lumen_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "lumen_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "lumen_jobs_failed_total";
    pub const FFMPEG_DURATION_SECONDS: &str = "lumen_ffmpeg_duration_seconds";
    pub const KEY_COLOR_FALLBACKS_TOTAL: &str = "lumen_key_color_fallbacks_total";
}

pub fn record_job_started(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
}

pub fn record_job_failed(tier: &str) {
    let labels = [("tier", tier.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record wall-clock encode time.
pub fn record_ffmpeg_duration(codec: &str, duration_secs: f64) {
    let labels = [("codec", codec.to_string())];
    histogram!(names::FFMPEG_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Auto-detection failed and the configured color was used.
pub fn record_key_color_fallback() {
    counter!(names::KEY_COLOR_FALLBACKS_TOTAL).increment(1);
}
