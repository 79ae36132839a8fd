//! FFmpeg progress parsing.
//!
//! ffmpeg prints the input duration once in its header and then rewrites a
//! stats line (`frame=... time=00:00:04.20 ...`) using carriage returns.
//! [`ProgressTracker`] turns that stream into throttled percentages inside a
//! fixed band.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap()
});

// Also matches `out_time=` from `-progress` output.
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=(\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap());

fn captures_to_duration(caps: &regex::Captures<'_>) -> Option<Duration> {
    let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    let total = (hours * 3600 + minutes * 60) as f64 + seconds;
    Duration::try_from_secs_f64(total).ok()
}

/// Parse the total duration from a `Duration: HH:MM:SS.xx` header line.
///
/// Returns `None` for `Duration: N/A` and unrelated lines.
pub fn parse_duration_line(line: &str) -> Option<Duration> {
    DURATION_RE
        .captures(line)
        .and_then(|caps| captures_to_duration(&caps))
}

/// Parse the elapsed output time from a stats line.
pub fn parse_progress_line(line: &str) -> Option<Duration> {
    TIME_RE
        .captures(line)
        .and_then(|caps| captures_to_duration(&caps))
}

/// Percentage range that encoding progress is mapped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressBand {
    pub start: u8,
    pub end: u8,
}

impl Default for ProgressBand {
    fn default() -> Self {
        Self { start: 20, end: 95 }
    }
}

impl ProgressBand {
    /// Map elapsed/total into the band, rounding down.
    pub fn map(&self, elapsed: Duration, total: Duration) -> u8 {
        if total.is_zero() {
            return self.start;
        }
        let ratio = (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0);
        let span = f64::from(self.end.saturating_sub(self.start));
        self.start + (ratio * span).floor() as u8
    }
}

/// Minimum percentage-point change between two reports.
pub const DEFAULT_PROGRESS_STEP: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackerState {
    AwaitingDuration,
    Tracking { total: Duration },
}

/// Stateful progress inference over ffmpeg's diagnostic lines.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    band: ProgressBand,
    step: u8,
    state: TrackerState,
    last_reported: u8,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(ProgressBand::default(), DEFAULT_PROGRESS_STEP)
    }
}

impl ProgressTracker {
    pub fn new(band: ProgressBand, step: u8) -> Self {
        Self {
            band,
            step: step.max(1),
            state: TrackerState::AwaitingDuration,
            last_reported: band.start,
        }
    }

    /// Total duration, once known.
    pub fn total(&self) -> Option<Duration> {
        match self.state {
            TrackerState::AwaitingDuration => None,
            TrackerState::Tracking { total } => Some(total),
        }
    }

    pub fn last_reported(&self) -> u8 {
        self.last_reported
    }

    /// Feed one line; returns a new percentage when it should be reported.
    ///
    /// A report happens when progress advanced by at least the step, or when
    /// it reached the end of the band. Reports never go backwards.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        match self.state {
            TrackerState::AwaitingDuration => {
                if let Some(total) = parse_duration_line(line).filter(|d| !d.is_zero()) {
                    self.state = TrackerState::Tracking { total };
                }
                None
            }
            TrackerState::Tracking { total } => {
                let elapsed = parse_progress_line(line)?;
                let percent = self.band.map(elapsed, total);
                if percent <= self.last_reported {
                    return None;
                }
                if percent - self.last_reported >= self.step || percent == self.band.end {
                    self.last_reported = percent;
                    Some(percent)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "  Duration: 00:00:10.00, start: 0.000000, bitrate: 1205 kb/s";

    fn stats(time: &str) -> String {
        format!("frame=  120 fps= 30 q=-0.0 size=     256kB time={time} bitrate= 512.0kbits/s speed=1.2x")
    }

    #[test]
    fn test_parse_duration_line() {
        assert_eq!(parse_duration_line(HEADER), Some(Duration::from_secs(10)));
        assert_eq!(
            parse_duration_line("Duration: 01:02:03.50"),
            Some(Duration::from_secs_f64(3723.5))
        );
        assert_eq!(parse_duration_line("  Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration_line("Stream #0:0: Video: h264"), None);
    }

    #[test]
    fn test_parse_progress_line() {
        assert_eq!(
            parse_progress_line(&stats("00:00:05.00")),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse_progress_line("out_time=00:00:02.500000"),
            Some(Duration::from_secs_f64(2.5))
        );
        assert_eq!(parse_progress_line("time=N/A"), None);
        assert_eq!(parse_progress_line("time=-00:00:00.02"), None);
    }

    #[test]
    fn test_band_mapping() {
        let band = ProgressBand::default();
        let total = Duration::from_secs(10);
        assert_eq!(band.map(Duration::ZERO, total), 20);
        assert_eq!(band.map(Duration::from_secs(5), total), 57);
        assert_eq!(band.map(Duration::from_secs(10), total), 95);
        assert_eq!(band.map(Duration::from_secs(30), total), 95);
    }

    #[test]
    fn test_time_before_duration_is_ignored() {
        let mut tracker = ProgressTracker::default();
        assert_eq!(tracker.observe(&stats("00:00:05.00")), None);
        assert_eq!(tracker.total(), None);
        assert_eq!(tracker.observe(HEADER), None);
        assert_eq!(tracker.total(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_duration_is_parsed_once() {
        let mut tracker = ProgressTracker::default();
        tracker.observe(HEADER);
        tracker.observe("  Duration: 00:10:00.00, start: 0.0");
        assert_eq!(tracker.total(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_reports_are_throttled_and_monotonic() {
        let mut tracker = ProgressTracker::default();
        tracker.observe(HEADER);

        // 20 + 0.1 * 75 = 27
        assert_eq!(tracker.observe(&stats("00:00:01.00")), Some(27));
        // 29: below the step
        assert_eq!(tracker.observe(&stats("00:00:01.20")), None);
        // Backwards time never regresses
        assert_eq!(tracker.observe(&stats("00:00:00.50")), None);
        assert_eq!(tracker.observe(&stats("00:00:05.00")), Some(57));
        // End of band is always reported
        assert_eq!(tracker.observe(&stats("00:00:09.90")), Some(94));
        assert_eq!(tracker.observe(&stats("00:00:10.00")), Some(95));
        assert_eq!(tracker.observe(&stats("00:00:10.00")), None);
        assert_eq!(tracker.last_reported(), 95);
    }

    #[test]
    fn test_zero_duration_keeps_waiting() {
        let mut tracker = ProgressTracker::default();
        tracker.observe("Duration: 00:00:00.00");
        assert_eq!(tracker.total(), None);
    }
}
