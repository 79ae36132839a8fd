//! FFmpeg video filter definitions for chroma-key removal.

use lumen_models::ProcessingOptions;

use crate::watermark::WatermarkConfig;

/// Edge blend passed to `chromakey`.
pub const CHROMAKEY_BLEND: f64 = 0.1;

/// Similarity bounds for `chromakey`.
pub const MIN_SIMILARITY: f64 = 0.15;
pub const MAX_SIMILARITY: f64 = 0.5;

/// Final conversion that keeps the alpha plane.
pub const FILTER_ALPHA_FORMAT: &str = "format=yuva420p";

/// Map chroma tolerance (0-1) onto `chromakey` similarity.
///
/// Affine and monotonic: `0.15 + t * 0.35`, clamped to [0.15, 0.5].
pub fn chromakey_similarity(tolerance: f64) -> f64 {
    if !tolerance.is_finite() {
        return MIN_SIMILARITY;
    }
    (MIN_SIMILARITY + tolerance * (MAX_SIMILARITY - MIN_SIMILARITY))
        .clamp(MIN_SIMILARITY, MAX_SIMILARITY)
}

/// Build the `chromakey` filter for a `#RRGGBB` color.
pub fn filter_chromakey(color: &str, similarity: f64) -> String {
    let hex = color.trim_start_matches('#');
    format!(
        "chromakey=0x{}:{:.3}:{}",
        hex.to_ascii_uppercase(),
        similarity,
        CHROMAKEY_BLEND
    )
}

/// Build filter for resizing to a width, keeping aspect and an even height.
pub fn filter_scale(width: u32) -> String {
    format!("scale={}:-2", width)
}

/// Ordered filter chain: key, optional scale, optional watermark, alpha format.
///
/// The order is fixed by [`FilterChain::build`], not by the order the
/// builder methods are called in.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    key: String,
    scale: Option<String>,
    overlay: Vec<String>,
}

impl FilterChain {
    pub fn chroma_key(color: &str, tolerance: f64) -> Self {
        Self {
            key: filter_chromakey(color, chromakey_similarity(tolerance)),
            scale: None,
            overlay: Vec::new(),
        }
    }

    /// Chain for a job's resolved options.
    pub fn for_options(
        options: &ProcessingOptions,
        key_color: &str,
        watermark: Option<&WatermarkConfig>,
    ) -> Self {
        let mut chain = Self::chroma_key(key_color, options.chroma_tolerance);
        if options.resize_enabled {
            chain = chain.scale(options.resize_width);
        }
        if let Some(config) = watermark {
            chain = chain.watermark(config);
        }
        chain
    }

    pub fn scale(mut self, width: u32) -> Self {
        self.scale = Some(filter_scale(width));
        self
    }

    pub fn watermark(mut self, config: &WatermarkConfig) -> Self {
        self.overlay = config.filters();
        self
    }

    /// Filter graph string for `-vf`.
    pub fn build(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3 + self.overlay.len());
        parts.push(&self.key);
        if let Some(scale) = &self.scale {
            parts.push(scale);
        }
        parts.extend(self.overlay.iter().map(String::as_str));
        parts.push(FILTER_ALPHA_FORMAT);
        parts.join(",")
    }
}
