//! FFmpeg command builder and chroma-key invocation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lumen_models::{ResolvedOptions, VideoCodec};

use crate::error::{MediaError, MediaResult};
use crate::filters::FilterChain;
use crate::watermark::WatermarkConfig;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path (or `pipe:1`)
    output: PathBuf,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            // `info` is required for the Duration header and stats lines.
            log_level: "info".to_string(),
        }
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn pixel_format(self, format: impl Into<String>) -> Self {
        self.output_arg("-pix_fmt").output_arg(format)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn video_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:v").output_arg(bitrate)
    }

    pub fn threads(self, threads: u32) -> Self {
        self.output_arg("-threads").output_arg(threads.to_string())
    }

    /// Drop all audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-loglevel".to_string());
        args.push(self.log_level.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Bitrate ceiling for VP8; libvpx needs one in CRF mode.
pub const VP8_MAX_BITRATE: &str = "2M";

/// Default encoder thread count.
pub const DEFAULT_THREADS: u32 = 8;

/// Build the transparent-WebM encode for a job.
///
/// The watermark is drawn only when `resolved.has_watermark` is set.
pub fn chroma_key_command(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    resolved: &ResolvedOptions,
    key_color: &str,
    watermark: &WatermarkConfig,
    threads: u32,
) -> FfmpegCommand {
    let options = &resolved.options;
    let chain = FilterChain::for_options(
        options,
        key_color,
        resolved.has_watermark.then_some(watermark),
    );

    let codec = options.codec;
    let bitrate = match codec {
        VideoCodec::Vp8 => VP8_MAX_BITRATE,
        VideoCodec::Vp9 => "0",
    };

    let mut cmd = FfmpegCommand::new(input, output)
        .video_filter(chain.build())
        .video_codec(codec.encoder())
        .pixel_format("yuva420p")
        .output_args(["-auto-alt-ref", "0"])
        .crf(resolved.crf())
        .video_bitrate(bitrate)
        .output_args(["-speed".to_string(), options.processing_speed.to_string()]);

    if codec == VideoCodec::Vp9 {
        cmd = cmd.output_args(["-row-mt", "1"]);
    }

    cmd.threads(threads.max(1)).no_audio()
}

/// Check the input is a readable file and the output directory accepts writes.
///
/// Runs before any subprocess is spawned.
pub async fn validate_paths(input: &Path, output: &Path) -> MediaResult<()> {
    let metadata = match tokio::fs::metadata(input).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(MediaError::InputNotFound(input.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(MediaError::InputNotAFile(input.to_path_buf()));
    }

    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match tokio::fs::metadata(&dir).await {
        Ok(m) if m.is_dir() => {}
        Ok(_) => return Err(MediaError::output_not_writable(&dir, "not a directory")),
        Err(e) => return Err(MediaError::output_not_writable(&dir, e)),
    }

    let probe_dir = dir.clone();
    tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".write-probe-")
            .tempfile_in(&probe_dir)
            .map(drop)
    })
    .await
    .map_err(|e| MediaError::internal(format!("write probe task failed: {e}")))?
    .map_err(|e| MediaError::output_not_writable(&dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_models::{resolve_options, PlanTier, RawProcessingOptions};

    fn resolved(payload: &str, tier: PlanTier) -> ResolvedOptions {
        resolve_options(&RawProcessingOptions::from_json(payload).unwrap(), tier)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_command_builder() {
        let args = FfmpegCommand::new("input.mp4", "output.webm")
            .video_codec("libvpx")
            .crf(30)
            .build_args();

        assert_eq!(&args[..4], &["-y", "-hide_banner", "-loglevel", "info"]);
        assert_eq!(value_after(&args, "-i"), Some("input.mp4"));
        assert_eq!(value_after(&args, "-c:v"), Some("libvpx"));
        assert_eq!(args.last().map(String::as_str), Some("output.webm"));
    }

    #[test]
    fn test_free_tier_invocation() {
        let opts = resolved(r#"{"quality":"best","codec":"vp9"}"#, PlanTier::Free);
        let args = chroma_key_command(
            "in.mp4",
            "out.webm",
            &opts,
            &opts.options.background_color,
            &WatermarkConfig::default(),
            DEFAULT_THREADS,
        )
        .build_args();

        assert_eq!(value_after(&args, "-c:v"), Some("libvpx"));
        assert_eq!(value_after(&args, "-crf"), Some("40"));
        assert_eq!(value_after(&args, "-b:v"), Some("2M"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuva420p"));
        assert_eq!(value_after(&args, "-auto-alt-ref"), Some("0"));
        assert_eq!(value_after(&args, "-speed"), Some("4"));
        assert_eq!(value_after(&args, "-threads"), Some("8"));
        assert!(!args.contains(&"-row-mt".to_string()));
        assert!(args.contains(&"-an".to_string()));

        let chain = value_after(&args, "-vf").unwrap();
        assert!(chain.contains("drawtext="));
        assert!(chain.ends_with("format=yuva420p"));
    }

    #[test]
    fn test_pro_vp9_invocation() {
        let opts = resolved(
            r#"{"quality":"good","codec":"vp9","resizeEnabled":true,"resizeWidth":1280}"#,
            PlanTier::Pro,
        );
        let args = chroma_key_command(
            "in.mp4",
            "out.webm",
            &opts,
            "#00FF00",
            &WatermarkConfig::default(),
            4,
        )
        .build_args();

        assert_eq!(value_after(&args, "-c:v"), Some("libvpx-vp9"));
        assert_eq!(value_after(&args, "-crf"), Some("30"));
        assert_eq!(value_after(&args, "-b:v"), Some("0"));
        assert_eq!(value_after(&args, "-row-mt"), Some("1"));

        let chain = value_after(&args, "-vf").unwrap();
        assert!(chain.contains("scale=1280:-2"));
        assert!(!chain.contains("drawtext="));
    }

    #[tokio::test]
    async fn test_validate_paths() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.mp4");
        let output = dir.path().join("webm").join("out.webm");

        let err = validate_paths(&input, &output).await.unwrap_err();
        assert!(matches!(err, MediaError::InputNotFound(_)));

        let err = validate_paths(dir.path(), &output).await.unwrap_err();
        assert!(matches!(err, MediaError::InputNotAFile(_)));

        std::fs::write(&input, b"video").unwrap();
        let err = validate_paths(&input, &output).await.unwrap_err();
        assert!(matches!(err, MediaError::OutputNotWritable { .. }));
        assert!(err.is_pre_launch());

        std::fs::create_dir(dir.path().join("webm")).unwrap();
        validate_paths(&input, &output).await.unwrap();
    }
}
