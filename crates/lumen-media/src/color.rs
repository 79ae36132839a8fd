//! Key color detection from the first frame.

use std::path::Path;

use tracing::debug;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::runner::FfmpegRunner;

/// Top-left sample block, averaged down to one pixel.
const SAMPLE_FILTER: &str = "crop=w=min(16\\,iw):h=min(16\\,ih):x=0:y=0,scale=1:1";

/// Build the probe that writes one RGB24 pixel to stdout.
pub fn sample_command(input: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::new(input, "pipe:1")
        .overwrite(false)
        .log_level("error")
        .single_frame()
        .video_filter(SAMPLE_FILTER)
        .output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
}

/// Sample the backdrop color of a video as uppercase `#RRGGBB`.
pub async fn detect_key_color(runner: &FfmpegRunner, input: &Path) -> MediaResult<String> {
    let pixel = runner.run_capture_stdout(&sample_command(input)).await?;
    let color = pixel_to_hex(&pixel)?;
    debug!(color = %color, input = %input.display(), "Detected key color");
    Ok(color)
}

fn pixel_to_hex(pixel: &[u8]) -> MediaResult<String> {
    match pixel {
        [r, g, b, ..] => Ok(format!("#{:02X}{:02X}{:02X}", r, g, b)),
        _ => Err(MediaError::color_detection(format!(
            "expected 3 bytes of rgb24, got {}",
            pixel.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_to_hex() {
        assert_eq!(pixel_to_hex(&[0, 255, 16]).unwrap(), "#00FF10");
        assert!(matches!(
            pixel_to_hex(&[1, 2]),
            Err(MediaError::ColorDetection(_))
        ));
    }

    #[test]
    fn test_sample_command_writes_to_stdout() {
        let args = sample_command("in.mp4").build_args();
        assert!(!args.contains(&"-y".to_string()));
        assert!(args.contains(&"rgb24".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detect_key_color_with_fake_encoder() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("fake-ffmpeg");
        std::fs::write(&program, "#!/bin/sh\nprintf '\\001\\377\\020'\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let color = detect_key_color(&FfmpegRunner::new(&program), Path::new("in.mp4"))
            .await
            .unwrap();
        assert_eq!(color, "#01FF10");
    }
}
