//! Processing options and the tier-aware resolver.
//!
//! Clients submit options as loosely-typed JSON. Every field is optional and
//! validated on its own: a bad value falls back to that field's default
//! without affecting the others. [`resolve_options`] then merges the result
//! over the defaults and applies the caller's plan policy.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::plan::{PlanPolicy, PlanTier};

pub const DEFAULT_CHROMA_TOLERANCE: f64 = 0.3;
pub const DEFAULT_PROCESSING_SPEED: u8 = 4;
pub const DEFAULT_BACKGROUND_COLOR: &str = "#00FF00";
pub const DEFAULT_RESIZE_WIDTH: u32 = 1354;

pub const MAX_PROCESSING_SPEED: u8 = 8;
pub const MIN_RESIZE_WIDTH: u32 = 64;
pub const MAX_RESIZE_WIDTH: u32 = 3840;

/// Encoding quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    #[default]
    Good,
    Best,
}

impl Quality {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Some(Quality::Fast),
            "good" => Some(Quality::Good),
            "best" => Some(Quality::Best),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Fast => "fast",
            Quality::Good => "good",
            Quality::Best => "best",
        }
    }

    /// Constant rate factor for this preset. Lower is better.
    pub fn crf(&self) -> u8 {
        match self {
            Quality::Fast => 40,
            Quality::Good => 30,
            Quality::Best => 20,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output video codec. Both produce WebM with alpha.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Vp8,
    Vp9,
}

impl VideoCodec {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vp8" | "libvpx" => Some(VideoCodec::Vp8),
            "vp9" | "libvpx-vp9" => Some(VideoCodec::Vp9),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
        }
    }

    /// ffmpeg encoder name.
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::Vp8 => "libvpx",
            VideoCodec::Vp9 => "libvpx-vp9",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fully resolved processing options, snapshotted onto the job at intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    pub quality: Quality,
    /// Chroma tolerance (0.0-1.0)
    pub chroma_tolerance: f64,
    /// Encoder speed hint (0 = slowest/best, 8 = fastest)
    pub processing_speed: u8,
    /// Key color as uppercase `#RRGGBB`
    pub background_color: String,
    pub codec: VideoCodec,
    pub resize_enabled: bool,
    pub resize_width: u32,
    pub auto_detect_color: bool,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            chroma_tolerance: DEFAULT_CHROMA_TOLERANCE,
            processing_speed: DEFAULT_PROCESSING_SPEED,
            background_color: DEFAULT_BACKGROUND_COLOR.to_string(),
            codec: VideoCodec::default(),
            resize_enabled: false,
            resize_width: DEFAULT_RESIZE_WIDTH,
            auto_detect_color: false,
        }
    }
}

/// The options payload could not be read at all.
#[derive(Debug, Error)]
pub enum OptionsParseError {
    #[error("options payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("options payload must be a JSON object")]
    NotAnObject,
}

/// Client-submitted options after per-field validation.
///
/// `None` means the field was absent or invalid; invalid field names are
/// collected in `rejected` so the caller can log them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProcessingOptions {
    pub quality: Option<Quality>,
    pub chroma_tolerance: Option<f64>,
    pub processing_speed: Option<u8>,
    pub background_color: Option<String>,
    pub codec: Option<VideoCodec>,
    pub resize_enabled: Option<bool>,
    pub resize_width: Option<u32>,
    pub auto_detect_color: Option<bool>,
    pub rejected: Vec<&'static str>,
}

impl RawProcessingOptions {
    /// Parse the `options` form field.
    pub fn from_json(payload: &str) -> Result<Self, OptionsParseError> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(&value)
    }

    /// Validate each field of a JSON object independently.
    pub fn from_value(value: &Value) -> Result<Self, OptionsParseError> {
        let map = value.as_object().ok_or(OptionsParseError::NotAnObject)?;
        let mut raw = Self::default();

        raw.quality = raw.field(map.get("quality"), "quality", |v| {
            v.as_str().and_then(Quality::parse)
        });
        raw.chroma_tolerance = raw.field(map.get("chromaTolerance"), "chromaTolerance", |v| {
            v.as_f64()
                .filter(|t| t.is_finite())
                .map(|t| t.clamp(0.0, 1.0))
        });
        raw.processing_speed = raw.field(map.get("processingSpeed"), "processingSpeed", |v| {
            v.as_f64()
                .filter(|s| s.is_finite())
                .map(|s| s.round().clamp(0.0, MAX_PROCESSING_SPEED as f64) as u8)
        });
        raw.background_color = raw.field(map.get("backgroundColor"), "backgroundColor", |v| {
            v.as_str().and_then(normalize_hex_color)
        });
        raw.codec = raw.field(map.get("codec"), "codec", |v| {
            v.as_str().and_then(VideoCodec::parse)
        });
        raw.resize_enabled = raw.field(map.get("resizeEnabled"), "resizeEnabled", Value::as_bool);
        raw.resize_width = raw.field(map.get("resizeWidth"), "resizeWidth", |v| {
            v.as_f64().filter(|w| w.is_finite()).map(normalize_width)
        });
        raw.auto_detect_color = raw.field(
            map.get("autoDetectColor"),
            "autoDetectColor",
            Value::as_bool,
        );

        Ok(raw)
    }

    fn field<T>(
        &mut self,
        value: Option<&Value>,
        name: &'static str,
        parse: impl FnOnce(&Value) -> Option<T>,
    ) -> Option<T> {
        match value {
            None | Some(Value::Null) => None,
            Some(v) => {
                let parsed = parse(v);
                if parsed.is_none() {
                    self.rejected.push(name);
                }
                parsed
            }
        }
    }
}

fn normalize_width(width: f64) -> u32 {
    let clamped = width.clamp(MIN_RESIZE_WIDTH as f64, MAX_RESIZE_WIDTH as f64) as u32;
    clamped & !1
}

/// Normalize a hex color to uppercase `#RRGGBB`.
///
/// Accepts `#RRGGBB`, `RRGGBB`, `0xRRGGBB` and the short `#RGB` form.
pub fn normalize_hex_color(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let expanded = match digits.len() {
        6 => digits.to_string(),
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        _ => return None,
    };

    Some(format!("#{}", expanded.to_ascii_uppercase()))
}

/// Options after tier policy, plus the decisions derived from the tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub options: ProcessingOptions,
    pub has_watermark: bool,
    pub tier: PlanTier,
}

impl ResolvedOptions {
    /// Constant rate factor for the encoder. Free output is always the
    /// lowest-quality preset.
    pub fn crf(&self) -> u8 {
        match self.tier {
            PlanTier::Free => Quality::Fast.crf(),
            PlanTier::Pro => self.options.quality.crf(),
        }
    }
}

/// Merge raw options over the defaults and apply the tier's policy.
pub fn resolve_options(raw: &RawProcessingOptions, tier: PlanTier) -> ResolvedOptions {
    let defaults = ProcessingOptions::default();
    let policy = PlanPolicy::for_tier(tier);

    let requested_resize = raw.resize_enabled.unwrap_or(defaults.resize_enabled);

    let options = ProcessingOptions {
        quality: policy
            .forced_quality
            .or(raw.quality)
            .unwrap_or(defaults.quality),
        chroma_tolerance: raw.chroma_tolerance.unwrap_or(defaults.chroma_tolerance),
        processing_speed: raw.processing_speed.unwrap_or(defaults.processing_speed),
        background_color: raw
            .background_color
            .clone()
            .unwrap_or(defaults.background_color),
        codec: policy.forced_codec.or(raw.codec).unwrap_or(defaults.codec),
        resize_enabled: policy.allows_resize && requested_resize,
        resize_width: raw.resize_width.unwrap_or(defaults.resize_width),
        auto_detect_color: raw.auto_detect_color.unwrap_or(defaults.auto_detect_color),
    };

    ResolvedOptions {
        options,
        has_watermark: policy.requires_watermark,
        tier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(payload: &str) -> RawProcessingOptions {
        RawProcessingOptions::from_json(payload).unwrap()
    }

    #[test]
    fn test_empty_payload_gives_defaults() {
        let resolved = resolve_options(&raw("{}"), PlanTier::Pro);
        assert_eq!(resolved.options, ProcessingOptions::default());
        assert!(!resolved.has_watermark);
    }

    #[test]
    fn test_free_tier_policy_is_enforced() {
        let payload = raw(
            r#"{"quality":"best","codec":"vp9","resizeEnabled":true,"resizeWidth":720}"#,
        );
        let resolved = resolve_options(&payload, PlanTier::Free);
        assert_eq!(resolved.options.quality, Quality::Fast);
        assert_eq!(resolved.options.codec, VideoCodec::Vp8);
        assert!(!resolved.options.resize_enabled);
        assert!(resolved.has_watermark);
        assert_eq!(resolved.crf(), 40);
    }

    #[test]
    fn test_pro_tier_honors_request() {
        let payload = raw(
            r#"{"quality":"best","codec":"vp9","resizeEnabled":true,"resizeWidth":720}"#,
        );
        let resolved = resolve_options(&payload, PlanTier::Pro);
        assert_eq!(resolved.options.quality, Quality::Best);
        assert_eq!(resolved.options.codec, VideoCodec::Vp9);
        assert!(resolved.options.resize_enabled);
        assert_eq!(resolved.options.resize_width, 720);
        assert!(!resolved.has_watermark);
        assert_eq!(resolved.crf(), 20);
    }

    #[test]
    fn test_malformed_payload_is_an_error_for_the_caller() {
        assert!(matches!(
            RawProcessingOptions::from_json("not json"),
            Err(OptionsParseError::Json(_))
        ));
        assert!(matches!(
            RawProcessingOptions::from_json("[1,2]"),
            Err(OptionsParseError::NotAnObject)
        ));
    }

    #[test]
    fn test_invalid_field_falls_back_alone() {
        let payload = raw(r#"{"quality":"ultra","chromaTolerance":0.8,"codec":7}"#);
        assert_eq!(payload.quality, None);
        assert_eq!(payload.codec, None);
        assert_eq!(payload.chroma_tolerance, Some(0.8));
        assert_eq!(payload.rejected, vec!["quality", "codec"]);

        let resolved = resolve_options(&payload, PlanTier::Pro);
        assert_eq!(resolved.options.quality, Quality::Good);
        assert_eq!(resolved.options.chroma_tolerance, 0.8);
    }

    #[test]
    fn test_numeric_fields_are_normalized() {
        let payload = raw(
            r#"{"chromaTolerance":4.2,"processingSpeed":99,"resizeWidth":1001}"#,
        );
        assert_eq!(payload.chroma_tolerance, Some(1.0));
        assert_eq!(payload.processing_speed, Some(MAX_PROCESSING_SPEED));
        assert_eq!(payload.resize_width, Some(1000));

        let payload = raw(r#"{"chromaTolerance":-1,"processingSpeed":-3,"resizeWidth":2}"#);
        assert_eq!(payload.chroma_tolerance, Some(0.0));
        assert_eq!(payload.processing_speed, Some(0));
        assert_eq!(payload.resize_width, Some(MIN_RESIZE_WIDTH));
    }

    #[test]
    fn test_null_fields_count_as_absent() {
        let payload = raw(r#"{"quality":null}"#);
        assert_eq!(payload.quality, None);
        assert!(payload.rejected.is_empty());
    }

    #[test]
    fn test_normalize_hex_color() {
        assert_eq!(normalize_hex_color("#00ff00").as_deref(), Some("#00FF00"));
        assert_eq!(normalize_hex_color("00FF00").as_deref(), Some("#00FF00"));
        assert_eq!(normalize_hex_color("0x1a2b3c").as_deref(), Some("#1A2B3C"));
        assert_eq!(normalize_hex_color("#0f0").as_deref(), Some("#00FF00"));
        assert_eq!(normalize_hex_color("green"), None);
        assert_eq!(normalize_hex_color("#12345"), None);
        assert_eq!(normalize_hex_color(""), None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let payload =
            raw(r##"{"quality":"fast","chromaTolerance":0.45,"backgroundColor":"#0000ff"}"##);
        let a = resolve_options(&payload, PlanTier::Pro);
        let b = resolve_options(&payload, PlanTier::Pro);
        assert_eq!(a, b);
        assert_eq!(a.options.background_color, "#0000FF");
    }
}
