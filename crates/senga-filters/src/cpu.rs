//! CPU filter backend.
//!
//! Used when no fragment device is available or the program failed to
//! build.  Three passes per pixel:
//!
//! 1. Linear contrast stretch around mid-grey with the classic
//!    `259(C+255) / (255(259-C))` factor.
//! 2. Composite contrast, brightness and saturation adjustment (CSS filter
//!    semantics).  Re-samples the source frame, not the stretched buffer,
//!    and writes over it in `f32` with a single rounding at the end.
//! 3. Near-black pass: pixels with R, G and B all below 50 get one random
//!    offset in `[0, 5)` added to all three channels.
//!
//! Channel values are clamped to `[0, 255]` after every arithmetic step.
//!
//! Two constructor forms select where the amounts come from:
//! [`CpuFilter::fixed_preset`] uses constants, [`CpuFilter::settings_driven`]
//! derives them from the settings snapshot and finishes with the same fixed
//! tone lift the GPU program applies.  In settings-driven mode the brightness
//! and saturation amounts scale with `sharpness`, so `sharpness = 0` and
//! `edge_enhance = 0` leave only the tone lift.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use senga_core::backend::{BackendKind, FilterBackend};
use senga_core::error::Result;
use senga_core::frame::Frame;
use senga_core::settings::EnhancementSettings;

use crate::fragment::GAMMA_LIFT;

/// Stretch amount `C` in fixed-preset mode.
pub const FIXED_STRETCH: f32 = 1.2;
/// Composite amounts in fixed-preset mode.
pub const FIXED_COMPOSITE: Composite = Composite {
    contrast: 1.1,
    brightness: 1.05,
    saturation: 1.1,
};
/// Settings-driven stretch: `C = STRETCH_PER_SHARPNESS * sharpness`.
pub const STRETCH_PER_SHARPNESS: f32 = 0.8;
/// Settings-driven composite contrast: `1 + CONTRAST_PER_EDGE * edge_enhance`.
pub const CONTRAST_PER_EDGE: f32 = 0.125;
/// Settings-driven brightness: `1 + BRIGHTNESS_PER_GAMMA * (1 - gamma) * w`.
pub const BRIGHTNESS_PER_GAMMA: f32 = 0.5;
/// Sharpness at which the settings-driven composite weight `w` is 1.
pub const COMPOSITE_REFERENCE_SHARPNESS: f32 = 1.5;
/// Near-black threshold (exclusive) on each of R, G, B.
pub const NEAR_BLACK_THRESHOLD: u8 = 50;
/// Upper bound (exclusive) of the near-black offset.
pub const NEAR_BLACK_MAX_OFFSET: f32 = 5.0;

const MID_GREY: f32 = 128.0;
const CSS_MID: f32 = 127.5;
const LUMA_R: f32 = 0.213;
const LUMA_G: f32 = 0.715;
const LUMA_B: f32 = 0.072;

/// Where the CPU backend takes its amounts from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMode {
    FixedPreset,
    #[default]
    SettingsDriven,
}

/// Composite adjustment amounts.  `1.0` is neutral for all three.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Composite {
    pub contrast: f32,
    pub brightness: f32,
    pub saturation: f32,
}

/// Stretch factor for contrast amount `c`.
#[inline]
pub fn contrast_factor(c: f32) -> f32 {
    (259.0 * (c + 255.0)) / (255.0 * (259.0 - c))
}

#[inline]
fn clamp8(v: f32) -> f32 {
    v.clamp(0.0, 255.0)
}

pub struct CpuFilter {
    mode: CpuMode,
    rng: StdRng,
}

impl std::fmt::Debug for CpuFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuFilter").field("mode", &self.mode).finish()
    }
}

impl CpuFilter {
    pub fn new(mode: CpuMode) -> Self {
        Self {
            mode,
            rng: StdRng::from_entropy(),
        }
    }

    /// Constant amounts: `C = 1.2`, contrast 1.1, brightness 1.05,
    /// saturation 1.1.  Settings are ignored.
    pub fn fixed_preset() -> Self {
        Self::new(CpuMode::FixedPreset)
    }

    /// Amounts derived from each snapshot.
    pub fn settings_driven() -> Self {
        Self::new(CpuMode::SettingsDriven)
    }

    /// Reseed the near-black offset generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    /// Stretch amount `C` for this snapshot.
    pub fn stretch_amount(&self, settings: &EnhancementSettings) -> f32 {
        match self.mode {
            CpuMode::FixedPreset => FIXED_STRETCH,
            CpuMode::SettingsDriven => STRETCH_PER_SHARPNESS * settings.sharpness,
        }
    }

    /// Composite amounts for this snapshot.
    pub fn composite(&self, settings: &EnhancementSettings) -> Composite {
        match self.mode {
            CpuMode::FixedPreset => FIXED_COMPOSITE,
            CpuMode::SettingsDriven => {
                let w = settings.sharpness / COMPOSITE_REFERENCE_SHARPNESS;
                Composite {
                    contrast: 1.0 + CONTRAST_PER_EDGE * settings.edge_enhance,
                    brightness: 1.0 + BRIGHTNESS_PER_GAMMA * (1.0 - settings.gamma) * w,
                    saturation: 1.0 + (settings.color_boost - 1.0) * w,
                }
            }
        }
    }

    /// Composite of one source sample, tone lift included in settings-driven
    /// mode.
    pub fn adjust(&self, rgb: [f32; 3], k: &Composite) -> [f32; 3] {
        let contrasted = rgb.map(|v| clamp8((v - CSS_MID) * k.contrast + CSS_MID));
        let [r, g, b] = contrasted.map(|v| clamp8(v * k.brightness));

        let s = k.saturation;
        let saturated = [
            clamp8((LUMA_R + (1.0 - LUMA_R) * s) * r + (LUMA_G - LUMA_G * s) * g + (LUMA_B - LUMA_B * s) * b),
            clamp8((LUMA_R - LUMA_R * s) * r + (LUMA_G + (1.0 - LUMA_G) * s) * g + (LUMA_B - LUMA_B * s) * b),
            clamp8((LUMA_R - LUMA_R * s) * r + (LUMA_G - LUMA_G * s) * g + (LUMA_B + (1.0 - LUMA_B) * s) * b),
        ];

        match self.mode {
            CpuMode::FixedPreset => saturated,
            CpuMode::SettingsDriven => {
                saturated.map(|v| clamp8((v / 255.0).powf(GAMMA_LIFT) * 255.0))
            }
        }
    }
}

impl FilterBackend for CpuFilter {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn name(&self) -> &str {
        match self.mode {
            CpuMode::FixedPreset => "cpu/fixed_preset",
            CpuMode::SettingsDriven => "cpu/settings_driven",
        }
    }

    fn render(
        &mut self,
        input: &Frame,
        settings: &EnhancementSettings,
        _time: f32,
        output: &mut Frame,
    ) -> Result<()> {
        output.resize_to(input.width(), input.height());
        let factor = contrast_factor(self.stretch_amount(settings));
        let composite = self.composite(settings);

        let src = input.as_bytes();
        let dst = output.as_bytes_mut();

        // Pass 1: stretch into the working buffer.
        for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
            for ch in 0..3 {
                d[ch] = clamp8(factor * (s[ch] as f32 - MID_GREY) + MID_GREY).round() as u8;
            }
            d[3] = s[3];
        }

        // Passes 2 and 3: composite from the source, then near-black offset.
        for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
            let rgb = [s[0] as f32, s[1] as f32, s[2] as f32];
            let mut out = self.adjust(rgb, &composite).map(|v| v.round() as u8);

            if out.iter().all(|&c| c < NEAR_BLACK_THRESHOLD) {
                let offset: f32 = self.rng.gen_range(0.0..NEAR_BLACK_MAX_OFFSET);
                out = out.map(|c| clamp8(c as f32 + offset).round() as u8);
            }

            d[..3].copy_from_slice(&out);
            d[3] = s[3];
        }
        Ok(())
    }
}
