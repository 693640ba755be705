//! Animated-content classifier.
//!
//! Three checks in priority order, first match wins:
//!
//! 1. the source locator contains a keyword,
//! 2. the page text contains a keyword,
//! 3. pixel statistics over one sampled frame.
//!
//! The sampler is only invoked when neither keyword check matched.  A
//! sampling failure yields "not animated" and is logged, never returned.
//!
//! # Pixel statistics
//!
//! The scan visits every [`SAMPLE_STRIDE_PIXELS`]th pixel in row-major
//! order.  For each visited pixel `p` at index `i`:
//!
//! - `edge_count += 1` when `Σ|p - pixel[i-1]| > EDGE_DIFF_THRESHOLD`
//!   (skipped for `i == 0`),
//! - `flat_count += 1` when every `|p - pixel[i+1]| < FLAT_CHANNEL_THRESHOLD`
//!   (skipped for the last pixel).
//!
//! Animated iff `edge_count > MIN_EDGE_COUNT && flat_count > MIN_FLAT_COUNT`.

use serde::Serialize;
use tracing::{debug, warn};

use senga_core::frame::{CHANNELS, Frame};
use senga_core::source::FrameSampler;

/// Case-folded substrings that mark animated content.
pub const KEYWORDS: &[&str] = &[
    "anime",
    "manga",
    "otaku",
    "crunchyroll",
    "funimation",
    "hidive",
    "wakanim",
    "9anime",
];

/// Visit every Nth pixel.
pub const SAMPLE_STRIDE_PIXELS: usize = 4;
/// Summed RGB difference to the preceding pixel that counts as an edge.
pub const EDGE_DIFF_THRESHOLD: u32 = 100;
/// Per-channel difference to the following pixel below which a pixel is flat.
pub const FLAT_CHANNEL_THRESHOLD: u8 = 10;
/// Edge count must exceed this.
pub const MIN_EDGE_COUNT: usize = 100;
/// Flat count must exceed this.
pub const MIN_FLAT_COUNT: usize = 50;

/// Which check decided the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationReason {
    SourceLocator,
    PageText,
    PixelStatistics,
    SamplingFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PixelStats {
    pub edge_count: usize,
    pub flat_count: usize,
}

impl PixelStats {
    /// Scan an RGBA8 frame.
    pub fn scan(frame: &Frame) -> Self {
        Self::scan_rgba(frame.as_bytes())
    }

    /// Scan a tightly packed RGBA8 buffer.
    pub fn scan_rgba(data: &[u8]) -> Self {
        let pixels = data.len() / CHANNELS;
        let at = |i: usize| &data[i * CHANNELS..i * CHANNELS + 3];
        let mut stats = Self::default();

        for i in (0..pixels).step_by(SAMPLE_STRIDE_PIXELS) {
            let p = at(i);
            if i > 0 {
                let prev = at(i - 1);
                let diff: u32 = (0..3).map(|c| p[c].abs_diff(prev[c]) as u32).sum();
                if diff > EDGE_DIFF_THRESHOLD {
                    stats.edge_count += 1;
                }
            }
            if i + 1 < pixels {
                let next = at(i + 1);
                if (0..3).all(|c| p[c].abs_diff(next[c]) < FLAT_CHANNEL_THRESHOLD) {
                    stats.flat_count += 1;
                }
            }
        }
        stats
    }

    pub fn is_animated(&self) -> bool {
        self.edge_count > MIN_EDGE_COUNT && self.flat_count > MIN_FLAT_COUNT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub is_animated: bool,
    pub reason: ClassificationReason,
    /// Present when the pixel path ran.
    pub stats: Option<PixelStats>,
}

/// True when `text`, case-folded, contains any of [`KEYWORDS`].
pub fn contains_keyword(text: &str) -> bool {
    let folded = text.to_lowercase();
    KEYWORDS.iter().any(|k| folded.contains(k))
}

/// Classify one source.  Never fails.
pub fn classify(
    locator: &str,
    page_text: &str,
    sampler: &mut dyn FrameSampler,
) -> ClassificationResult {
    if contains_keyword(locator) {
        debug!(locator, "Classified animated by source locator");
        return ClassificationResult {
            is_animated: true,
            reason: ClassificationReason::SourceLocator,
            stats: None,
        };
    }
    if contains_keyword(page_text) {
        debug!("Classified animated by page text");
        return ClassificationResult {
            is_animated: true,
            reason: ClassificationReason::PageText,
            stats: None,
        };
    }

    match sampler.sample() {
        Ok(frame) => {
            let stats = PixelStats::scan(&frame);
            let is_animated = stats.is_animated();
            debug!(
                edge_count = stats.edge_count,
                flat_count = stats.flat_count,
                is_animated,
                "Classified by pixel statistics"
            );
            ClassificationResult {
                is_animated,
                reason: ClassificationReason::PixelStatistics,
                stats: Some(stats),
            }
        }
        Err(err) => {
            warn!(error = %err, code = err.error_code(), "Classification sampling failed; treating as not animated");
            ClassificationResult {
                is_animated: false,
                reason: ClassificationReason::SamplingFailed,
                stats: None,
            }
        }
    }
}
