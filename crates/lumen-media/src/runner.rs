//! FFmpeg subprocess runner with progress tracking and timeout.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::progress::ProgressTracker;

/// Number of stderr lines kept for failure diagnostics.
pub const STDERR_TAIL_LINES: usize = 20;

/// Splits a byte stream into lines on both `\n` and `\r`.
///
/// ffmpeg redraws its stats line with bare carriage returns, so splitting on
/// `\n` alone would only surface progress at the very end.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return every line it completed. Empty lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush a trailing line without terminator.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

/// Runner for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    /// Encoder binary, `ffmpeg` on PATH by default
    program: PathBuf,
    /// Wall-clock limit
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run a command, reporting throttled progress percentages.
    ///
    /// `on_progress` is called from the stderr reader task, in order.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        mut tracker: ProgressTracker,
        mut on_progress: F,
    ) -> MediaResult<()>
    where
        F: FnMut(u8) + Send + 'static,
    {
        let args = cmd.build_args();
        debug!(
            "Running FFmpeg: {} {}",
            self.program.display(),
            args.join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(MediaError::SpawnFailed)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr was not captured"))?;

        let reader = tokio::spawn(async move {
            scan_diagnostics(stderr, |line| {
                if let Some(percent) = tracker.observe(line) {
                    on_progress(percent);
                }
            })
            .await
        });

        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => {
                    warn!("FFmpeg timed out after {:?}, killing process", limit);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill timed out ffmpeg: {}", e);
                    }
                    None
                }
            },
            None => Some(child.wait().await),
        };

        // Drain stderr before reporting so every progress callback has run.
        let tail = reader
            .await
            .map_err(|e| MediaError::internal(format!("stderr reader failed: {e}")))?;

        let Some(status) = waited else {
            log_tail(&tail);
            return Err(MediaError::Timeout(self.timeout.unwrap_or_default()));
        };
        let status = status?;

        if status.success() {
            info!("FFmpeg finished successfully");
            return Ok(());
        }

        log_tail(&tail);
        Err(MediaError::ffmpeg_failed(
            describe_failure(&status),
            Some(tail.into_iter().collect::<Vec<_>>().join("\n")),
            status.code(),
        ))
    }

    /// Run a command and collect its stdout. Used for short probes.
    pub async fn run_capture_stdout(&self, cmd: &FfmpegCommand) -> MediaResult<Vec<u8>> {
        let args = cmd.build_args();
        debug!(
            "Running FFmpeg probe: {} {}",
            self.program.display(),
            args.join(" ")
        );

        let future = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| MediaError::Timeout(limit))?,
            None => future.await,
        }
        .map_err(MediaError::SpawnFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(MediaError::ffmpeg_failed(
                describe_failure(&output.status),
                Some(stderr),
                output.status.code(),
            ));
        }

        Ok(output.stdout)
    }
}

/// Read diagnostics line by line, returning the last [`STDERR_TAIL_LINES`].
async fn scan_diagnostics<R, F>(mut stream: R, mut on_line: F) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut splitter = LineSplitter::new();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut buf = [0u8; 4096];

    let mut keep = |line: String, tail: &mut VecDeque<String>| {
        on_line(&line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    };

    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in splitter.push(&buf[..n]) {
                    keep(line, &mut tail);
                }
            }
            Err(e) => {
                warn!("Error reading ffmpeg stderr: {}", e);
                break;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        keep(line, &mut tail);
    }

    tail
}

fn log_tail(tail: &VecDeque<String>) {
    for line in tail {
        warn!(target: "ffmpeg", "{}", line);
    }
}

/// Human-readable exit reason, stored as the job error.
fn describe_failure(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("ffmpeg exited with code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("ffmpeg terminated by signal {}", signal);
        }
    }

    "ffmpeg exited abnormally".to_string()
}

/// Check if FFmpeg is available, resolving bare names against PATH.
pub fn check_ffmpeg(program: impl AsRef<Path>) -> MediaResult<PathBuf> {
    which::which(program.as_ref()).map_err(|_| MediaError::FfmpegNotFound)
}
