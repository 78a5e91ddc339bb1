//! Quality Policy
//!
//! Picks the encoder quality parameter for a source: a fixed palette size for
//! png, and a megapixel-banded quality for webp.

use crate::error::{Result, ShrinkError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// The two raster formats the tool manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    /// Lossless, quantised to a palette of `png_q` colours.
    Png,
    /// Lossy, quality chosen by source megapixels.
    Webp,
}

impl RasterFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(RasterFormat::Png),
            "webp" => Some(RasterFormat::Webp),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        Self::from_extension(&shared_utils::get_extension_lowercase(path))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Png => "png",
            RasterFormat::Webp => "webp",
        }
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityPolicy {
    png_q: u32,
    /// `(megapixel lower bound, quality)`, ascending by bound, first bound 0.
    webp_bands: Vec<(f64, u32)>,
}

impl QualityPolicy {
    /// Build from the raw config table, whose keys are decimal strings.
    ///
    /// Keys are ordered numerically, so `"10"` sorts after `"2"`.
    pub fn from_config(png_q: u32, webp_mp_to_max_q: &BTreeMap<String, u32>) -> Result<Self> {
        let mut bands = Vec::with_capacity(webp_mp_to_max_q.len());
        for (key, quality) in webp_mp_to_max_q {
            let threshold: f64 = key.trim().parse().map_err(|_| {
                ShrinkError::Config(format!(
                    "webp_mp_to_max_q key {:?} is not a number",
                    key
                ))
            })?;
            if !threshold.is_finite() || threshold < 0.0 {
                return Err(ShrinkError::Config(format!(
                    "webp_mp_to_max_q key {:?} must be a non-negative number",
                    key
                )));
            }
            if *quality > 100 {
                return Err(ShrinkError::Config(format!(
                    "webp_mp_to_max_q[{:?}] = {} is outside 0..=100",
                    key, quality
                )));
            }
            bands.push((threshold, *quality));
        }
        Self::new(png_q, bands)
    }

    pub fn new(png_q: u32, mut webp_bands: Vec<(f64, u32)>) -> Result<Self> {
        webp_bands.sort_by(|a, b| a.0.total_cmp(&b.0));
        if webp_bands.first().map(|(t, _)| *t) != Some(0.0) {
            return Err(ShrinkError::Config(
                "webp_mp_to_max_q must contain the key \"0\"".into(),
            ));
        }
        if webp_bands.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(ShrinkError::Config(
                "webp_mp_to_max_q has duplicate thresholds".into(),
            ));
        }
        Ok(Self { png_q, webp_bands })
    }

    /// Quality for a source of `megapixels` in `format`.
    ///
    /// For webp, a band applies from its threshold upwards (inclusive), so a
    /// source exactly on a threshold takes that band's quality.
    pub fn quality_for(&self, format: RasterFormat, megapixels: f64) -> u32 {
        match format {
            RasterFormat::Png => self.png_q,
            RasterFormat::Webp => {
                let mut quality = self.webp_bands[0].1;
                for (threshold, q) in &self.webp_bands {
                    if *threshold > megapixels {
                        break;
                    }
                    quality = *q;
                }
                quality
            }
        }
    }
}
