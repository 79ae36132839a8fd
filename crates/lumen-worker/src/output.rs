//! Locating a job's encoded output for download.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::{debug, warn};

use lumen_models::JobId;

use crate::error::WorkerResult;
use crate::layout::StorageLayout;

/// How the output file was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMatch {
    /// The filename recorded on the job
    Stored,
    /// A `.webm` whose name contains the job id
    JobIdScan,
    /// The most recently modified `.webm`
    MostRecent,
}

#[derive(Debug, Clone)]
pub struct LocatedOutput {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub matched_by: OutputMatch,
}

/// Resolves download requests against the output directory.
#[derive(Debug, Clone)]
pub struct OutputLocator {
    layout: StorageLayout,
    recent_fallback: bool,
}

struct Candidate {
    path: PathBuf,
    filename: String,
    size: u64,
    modified: SystemTime,
}

impl OutputLocator {
    pub fn new(layout: StorageLayout, recent_fallback: bool) -> Self {
        Self {
            layout,
            recent_fallback,
        }
    }

    /// Find the output for a job, trying each strategy in order.
    ///
    /// The newest-file fallback can serve another job's output and is only
    /// used when enabled.
    pub async fn locate(
        &self,
        job_id: &JobId,
        stored_filename: Option<&str>,
    ) -> WorkerResult<Option<LocatedOutput>> {
        if let Some(name) = stored_filename.filter(|n| is_plain_filename(n)) {
            let path = self.layout.output_path(name);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {
                    return Ok(Some(LocatedOutput {
                        path,
                        filename: name.to_string(),
                        size: meta.len(),
                        matched_by: OutputMatch::Stored,
                    }));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(job_id = %job_id, "Stored output file is missing, scanning");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let candidates = self.scan().await?;

        let by_id = candidates
            .iter()
            .filter(|c| c.filename.contains(job_id.as_str()))
            .max_by_key(|c| c.modified);
        if let Some(found) = by_id {
            return Ok(Some(found.to_located(OutputMatch::JobIdScan)));
        }

        if !self.recent_fallback {
            return Ok(None);
        }

        let newest = candidates.iter().max_by_key(|c| c.modified);
        if let Some(found) = newest {
            warn!(
                job_id = %job_id,
                file = %found.filename,
                "Serving most recent output as download fallback"
            );
            return Ok(Some(found.to_located(OutputMatch::MostRecent)));
        }

        Ok(None)
    }

    async fn scan(&self) -> WorkerResult<Vec<Candidate>> {
        let mut entries = match tokio::fs::read_dir(self.layout.output_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut candidates = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if !filename.ends_with(".webm") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            candidates.push(Candidate {
                path: entry.path(),
                filename,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(candidates)
    }
}

impl Candidate {
    fn to_located(&self, matched_by: OutputMatch) -> LocatedOutput {
        LocatedOutput {
            path: self.path.clone(),
            filename: self.filename.clone(),
            size: self.size,
            matched_by,
        }
    }
}

fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".."
}
