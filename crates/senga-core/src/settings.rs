//! Enhancement settings snapshots and the partial-update format.
//!
//! [`EnhancementSettings`] is an immutable value.  The frame processor holds
//! it behind an `Arc` and replaces the whole snapshot between cycles, so a
//! cycle never observes a half-applied update.
//!
//! Updates arrive from the settings collaborator as a JSON object carrying
//! any subset of the recognized keys:
//!
//! | key                  | field             | range            |
//! |----------------------|-------------------|------------------|
//! | `sharpness`          | `sharpness`       | `[0, 2]`         |
//! | `edgeEnhance`        | `edge_enhance`    | `[0, 1]`         |
//! | `noiseReduction`     | `noise_reduction` | `[0, 1]`         |
//! | `upscaling`          | `upscaling`       | `0/1/2`, `Off/2x/4x` |
//! | `gamma`              | `gamma`           | `[0.5, 1.5]`     |
//! | `colorBoost`         | `color_boost`     | `[0.5, 2]`       |
//! | `debanding`          | `debanding`       | `[0, 1]`         |
//! | `enhancementEnabled` | `enabled`         | bool             |
//!
//! Unknown keys are ignored and reported.  Missing keys leave the prior
//! value unchanged.  Out-of-range numbers are clamped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

pub const SHARPNESS_RANGE: (f32, f32) = (0.0, 2.0);
pub const EDGE_ENHANCE_RANGE: (f32, f32) = (0.0, 1.0);
pub const NOISE_REDUCTION_RANGE: (f32, f32) = (0.0, 1.0);
pub const GAMMA_RANGE: (f32, f32) = (0.5, 1.5);
pub const COLOR_BOOST_RANGE: (f32, f32) = (0.5, 2.0);
pub const DEBANDING_RANGE: (f32, f32) = (0.0, 1.0);

/// Recognized update keys, in the order the control panel sends them.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "sharpness",
    "edgeEnhance",
    "noiseReduction",
    "upscaling",
    "gamma",
    "colorBoost",
    "debanding",
    "enhancementEnabled",
];

// ─── Upscaling ───────────────────────────────────────────────────────────────

/// Requested super-resolution factor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Upscaling {
    #[default]
    Off,
    #[serde(rename = "2x")]
    X2,
    #[serde(rename = "4x")]
    X4,
}

impl Upscaling {
    /// Spatial factor (`1` when off).
    pub fn factor(self) -> u32 {
        match self {
            Self::Off => 1,
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }

    /// Slider encoding used by the control panel: `0`, `1`, `2`.
    pub fn from_slider(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::X2),
            2 => Some(Self::X4),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::X2 => "2x",
            Self::X4 => "4x",
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().and_then(Self::from_slider),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromStr for Upscaling {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<i64>()
            && let Some(u) = Self::from_slider(n)
        {
            return Ok(u);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "2x" | "x2" => Ok(Self::X2),
            "4x" | "x4" => Ok(Self::X4),
            _ => Err(EngineError::InvalidSetting {
                key: "upscaling".into(),
                reason: format!("expected 0/1/2 or Off/2x/4x, got '{s}'"),
            }),
        }
    }
}

impl fmt::Display for Upscaling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// One immutable settings snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnhancementSettings {
    pub sharpness: f32,
    pub edge_enhance: f32,
    pub noise_reduction: f32,
    pub upscaling: Upscaling,
    /// Accepted and stored.  The GPU tone curve uses a fixed exponent and
    /// does not read this value.
    pub gamma: f32,
    pub color_boost: f32,
    pub debanding: f32,
    #[serde(rename = "enhancementEnabled")]
    pub enabled: bool,
}

impl Default for EnhancementSettings {
    fn default() -> Self {
        Self {
            sharpness: 1.5,
            edge_enhance: 0.8,
            noise_reduction: 0.5,
            upscaling: Upscaling::Off,
            gamma: 0.9,
            color_boost: 1.1,
            debanding: 0.5,
            enabled: true,
        }
    }
}

impl EnhancementSettings {
    /// Build the next snapshot: fields present in `patch` replace the
    /// current ones (clamped to range), everything else carries over.
    pub fn merged(&self, patch: &SettingsPatch) -> Self {
        let pick = |current: f32, update: Option<f32>, range: (f32, f32)| {
            update.map_or(current, |v| v.clamp(range.0, range.1))
        };
        Self {
            sharpness: pick(self.sharpness, patch.sharpness, SHARPNESS_RANGE),
            edge_enhance: pick(self.edge_enhance, patch.edge_enhance, EDGE_ENHANCE_RANGE),
            noise_reduction: pick(
                self.noise_reduction,
                patch.noise_reduction,
                NOISE_REDUCTION_RANGE,
            ),
            upscaling: patch.upscaling.unwrap_or(self.upscaling),
            gamma: pick(self.gamma, patch.gamma, GAMMA_RANGE),
            color_boost: pick(self.color_boost, patch.color_boost, COLOR_BOOST_RANGE),
            debanding: pick(self.debanding, patch.debanding, DEBANDING_RANGE),
            enabled: patch.enabled.unwrap_or(self.enabled),
        }
    }

    /// Clamp every numeric field into range.  Used on snapshots that did not
    /// come through [`merged`](Self::merged), e.g. deserialized configs.
    pub fn normalized(&self) -> Self {
        Self::default().merged(&SettingsPatch::from(self))
    }
}

// ─── Partial update ──────────────────────────────────────────────────────────

/// A closed partial update.  `None` leaves the field unchanged.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SettingsPatch {
    pub sharpness: Option<f32>,
    pub edge_enhance: Option<f32>,
    pub noise_reduction: Option<f32>,
    pub upscaling: Option<Upscaling>,
    pub gamma: Option<f32>,
    pub color_boost: Option<f32>,
    pub debanding: Option<f32>,
    pub enabled: Option<bool>,
}

/// A key the parser skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedKey {
    pub key: String,
    pub reason: SkipReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Not one of [`RECOGNIZED_KEYS`].
    Unrecognized,
    /// Recognized key with a value of the wrong type or an unparseable value.
    InvalidValue,
}

/// Result of parsing an update object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedPatch {
    pub patch: SettingsPatch,
    pub skipped: Vec<SkippedKey>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Parse an update object from JSON text.
    pub fn from_json_str(data: &str) -> Result<ParsedPatch> {
        let value: Value = serde_json::from_str(data)
            .map_err(|err| EngineError::Config(format!("Invalid settings JSON: {err}")))?;
        Self::from_json_value(&value)
    }

    /// Parse an update object.  Only a non-object top level is an error;
    /// individual bad keys are skipped and reported.
    pub fn from_json_value(value: &Value) -> Result<ParsedPatch> {
        let Some(map) = value.as_object() else {
            return Err(EngineError::Config(
                "Settings update must be a JSON object".into(),
            ));
        };

        let mut parsed = ParsedPatch::default();
        for (key, value) in map {
            let accepted = match key.as_str() {
                "sharpness" => number(value).map(|v| parsed.patch.sharpness = Some(v)),
                "edgeEnhance" => number(value).map(|v| parsed.patch.edge_enhance = Some(v)),
                "noiseReduction" => number(value).map(|v| parsed.patch.noise_reduction = Some(v)),
                "upscaling" => {
                    Upscaling::from_json(value).map(|v| parsed.patch.upscaling = Some(v))
                }
                "gamma" => number(value).map(|v| parsed.patch.gamma = Some(v)),
                "colorBoost" => number(value).map(|v| parsed.patch.color_boost = Some(v)),
                "debanding" => number(value).map(|v| parsed.patch.debanding = Some(v)),
                "enhancementEnabled" => boolean(value).map(|v| parsed.patch.enabled = Some(v)),
                _ => {
                    debug!(key = %key, "Ignoring unrecognized settings key");
                    parsed.skipped.push(SkippedKey {
                        key: key.clone(),
                        reason: SkipReason::Unrecognized,
                    });
                    continue;
                }
            };
            if accepted.is_none() {
                warn!(key = %key, value = %value, "Ignoring invalid settings value");
                parsed.skipped.push(SkippedKey {
                    key: key.clone(),
                    reason: SkipReason::InvalidValue,
                });
            }
        }
        Ok(parsed)
    }
}

impl From<&EnhancementSettings> for SettingsPatch {
    fn from(s: &EnhancementSettings) -> Self {
        Self {
            sharpness: Some(s.sharpness),
            edge_enhance: Some(s.edge_enhance),
            noise_reduction: Some(s.noise_reduction),
            upscaling: Some(s.upscaling),
            gamma: Some(s.gamma),
            color_boost: Some(s.color_boost),
            debanding: Some(s.debanding),
            enabled: Some(s.enabled),
        }
    }
}

fn number(value: &Value) -> Option<f32> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v as f32)
}

fn boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ─── Presets ─────────────────────────────────────────────────────────────────

/// Named settings bundles offered by the control panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Preset {
    Default,
    OldAnime,
    LowQuality,
    HighQuality,
}

impl Preset {
    pub const ALL: [Preset; 4] = [
        Self::Default,
        Self::OldAnime,
        Self::LowQuality,
        Self::HighQuality,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::OldAnime => "oldAnime",
            Self::LowQuality => "lowQuality",
            Self::HighQuality => "highQuality",
        }
    }

    /// The update this preset applies.  Leaves `enabled` untouched.
    pub fn patch(self) -> SettingsPatch {
        let (sharpness, edge, noise, upscaling, gamma, color, deband) = match self {
            Self::Default => (1.5, 0.8, 0.5, Upscaling::Off, 0.9, 1.1, 0.5),
            Self::OldAnime => (1.2, 0.9, 0.8, Upscaling::X2, 0.8, 1.0, 0.7),
            Self::LowQuality => (1.7, 0.7, 0.9, Upscaling::X2, 0.9, 1.1, 0.8),
            Self::HighQuality => (1.0, 0.5, 0.3, Upscaling::X4, 1.0, 1.2, 0.3),
        };
        SettingsPatch {
            sharpness: Some(sharpness),
            edge_enhance: Some(edge),
            noise_reduction: Some(noise),
            upscaling: Some(upscaling),
            gamma: Some(gamma),
            color_boost: Some(color),
            debanding: Some(deband),
            enabled: None,
        }
    }

    /// Defaults with this preset applied.
    pub fn settings(self) -> EnhancementSettings {
        EnhancementSettings::default().merged(&self.patch())
    }
}

impl FromStr for Preset {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let folded = s.trim().replace(['-', '_'], "").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "Unknown preset '{s}' (expected one of: default, oldAnime, lowQuality, highQuality)"
                ))
            })
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_control_panel() {
        let s = EnhancementSettings::default();
        assert_eq!(s.sharpness, 1.5);
        assert_eq!(s.edge_enhance, 0.8);
        assert_eq!(s.noise_reduction, 0.5);
        assert_eq!(s.upscaling, Upscaling::Off);
        assert_eq!(s.gamma, 0.9);
        assert_eq!(s.color_boost, 1.1);
        assert_eq!(s.debanding, 0.5);
        assert!(s.enabled);
    }

    #[test]
    fn slider_string_upscaling_merges_into_defaults() {
        let parsed = SettingsPatch::from_json_value(&json!({"sharpness": 1.7, "upscaling": "1"}))
            .expect("object parses");
        assert!(parsed.skipped.is_empty());

        let merged = EnhancementSettings::default().merged(&parsed.patch);
        let expected = EnhancementSettings {
            sharpness: 1.7,
            upscaling: Upscaling::X2,
            ..EnhancementSettings::default()
        };
        assert_eq!(merged, expected);
    }

    #[test]
    fn unknown_keys_are_skipped_not_merged() {
        let parsed = SettingsPatch::from_json_value(&json!({
            "sharpness": 0.3,
            "brightness": 9,
            "__proto__": {}
        }))
        .expect("object parses");

        assert_eq!(parsed.patch.sharpness, Some(0.3));
        let mut keys: Vec<_> = parsed.skipped.iter().map(|s| s.key.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["__proto__", "brightness"]);
        assert!(parsed.skipped.iter().all(|s| s.reason == SkipReason::Unrecognized));
    }

    #[test]
    fn invalid_values_leave_field_unchanged() {
        let parsed = SettingsPatch::from_json_value(&json!({
            "gamma": "bright",
            "upscaling": 7,
            "enhancementEnabled": "false"
        }))
        .expect("object parses");

        assert_eq!(parsed.patch.gamma, None);
        assert_eq!(parsed.patch.upscaling, None);
        assert_eq!(parsed.patch.enabled, Some(false));
        assert_eq!(parsed.skipped.len(), 2);
        assert!(parsed.skipped.iter().all(|s| s.reason == SkipReason::InvalidValue));
    }

    #[test]
    fn merged_clamps_out_of_range_values() {
        let patch = SettingsPatch {
            sharpness: Some(5.0),
            gamma: Some(0.1),
            color_boost: Some(-1.0),
            ..SettingsPatch::default()
        };
        let merged = EnhancementSettings::default().merged(&patch);
        assert_eq!(merged.sharpness, 2.0);
        assert_eq!(merged.gamma, 0.5);
        assert_eq!(merged.color_boost, 0.5);
    }

    #[test]
    fn non_object_update_is_rejected() {
        let err = SettingsPatch::from_json_str("[1,2]").expect_err("array must fail");
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn presets_parse_and_preserve_enabled_flag() {
        assert_eq!("oldAnime".parse::<Preset>().ok(), Some(Preset::OldAnime));
        assert_eq!("high-quality".parse::<Preset>().ok(), Some(Preset::HighQuality));
        assert!("vivid".parse::<Preset>().is_err());

        let disabled = EnhancementSettings {
            enabled: false,
            ..EnhancementSettings::default()
        };
        let applied = disabled.merged(&Preset::HighQuality.patch());
        assert!(!applied.enabled);
        assert_eq!(applied.upscaling, Upscaling::X4);
        assert_eq!(applied.color_boost, 1.2);
        assert_eq!(Preset::Default.settings(), EnhancementSettings::default());
    }

    #[test]
    fn snapshot_serializes_with_collaborator_keys() {
        let value = serde_json::to_value(EnhancementSettings::default()).expect("serialize");
        for key in RECOGNIZED_KEYS {
            assert!(value.get(*key).is_some(), "missing key {key}");
        }
        assert_eq!(value["upscaling"], json!("Off"));
    }
}
