//! Text watermark for free-tier exports.
//!
//! The watermark is a repeating `drawtext` pattern placed at fixed relative
//! coordinates, so it scales with the output resolution and sits in the
//! same filter chain as the chroma key.

/// Default watermark text.
pub const DEFAULT_WATERMARK_TEXT: &str = "LumenFlow";

/// Relative (x, y) anchors: two columns by three rows.
pub const WATERMARK_GRID: [(f32, f32); 6] = [
    (0.08, 0.12),
    (0.58, 0.12),
    (0.08, 0.45),
    (0.58, 0.45),
    (0.08, 0.78),
    (0.58, 0.78),
];

/// Configuration for the text watermark.
///
/// ```ignore
/// let config = WatermarkConfig::default()
///     .with_text("Preview")
///     .with_opacity(0.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkConfig {
    pub text: String,
    /// Opacity (0.0 to 1.0)
    pub opacity: f32,
    /// Font size as a divisor of frame height (`h/<n>`)
    pub font_divisor: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            text: DEFAULT_WATERMARK_TEXT.to_string(),
            opacity: 0.35,
            font_divisor: 14,
        }
    }
}

impl WatermarkConfig {
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set watermark opacity (0.0 = invisible, 1.0 = fully opaque).
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// One `drawtext` filter per grid anchor.
    pub fn filters(&self) -> Vec<String> {
        let text = sanitize_text(&self.text);
        WATERMARK_GRID
            .iter()
            .map(|(x, y)| {
                format!(
                    "drawtext=text='{}':fontcolor=white@{:.2}:fontsize=h/{}:x=w*{:.2}:y=h*{:.2}",
                    text, self.opacity, self.font_divisor, x, y
                )
            })
            .collect()
    }
}

/// Keep only characters that need no filtergraph or drawtext escaping.
fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_'))
        .collect()
}
