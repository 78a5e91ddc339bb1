//! Resolution Planner
//!
//! Reproduces the set of derivative sizes the CMS generates at upload time
//! for a source of a given resolution. The rounding here has to agree with
//! the CMS to the pixel, otherwise re-encoded derivatives would not match the
//! dimensions recorded in attachment metadata.

use shared_utils::common_utils::split_key;

/// `(width, height)` in pixels.
pub type Dims = (u32, u32);

/// Fixed-width breakpoint; not configurable in the CMS.
pub const MEDIUM_LARGE_WIDTH: u32 = 768;

/// Extra large caps added by newer CMS releases, applied after medium and
/// large.
pub const EXTRA_LARGE_CAPS: [Dims; 2] = [(1536, 1536), (2048, 2048)];

/// Round half up, matching the CMS's "traditional" rounding.
///
/// Inputs are non-negative pixel quantities; `f64::round` rounds half away
/// from zero, which is half up on that domain. Negative or NaN inputs clamp
/// to 0.
pub fn round_half_up(value: f64) -> u32 {
    if value.is_nan() || value <= 0.0 {
        return 0;
    }
    value.round() as u32
}

// ═══════════════════════════════════════════════════════════════
// Resolution List
// ═══════════════════════════════════════════════════════════════

/// Ordered collection of derivative dimensions. Rounding happens in
/// [`ResolutionList::push_rounded`] so raw arithmetic results never land in
/// the list directly.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResolutionList {
    dims: Vec<Dims>,
}

impl ResolutionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dims: Dims) {
        self.dims.push(dims);
    }

    pub fn push_rounded(&mut self, width: f64, height: f64) {
        self.dims.push((round_half_up(width), round_half_up(height)));
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// Ascending by width then height, duplicates collapsed.
    pub fn into_sorted_unique(mut self) -> Vec<Dims> {
        self.dims.sort_unstable();
        self.dims.dedup();
        self.dims
    }
}

// ═══════════════════════════════════════════════════════════════
// Planner
// ═══════════════════════════════════════════════════════════════

/// Named size caps from the CMS media settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCaps {
    pub medium: Dims,
    pub large: Dims,
    pub thumbnail: Dims,
}

impl Default for SizeCaps {
    fn default() -> Self {
        Self {
            medium: (300, 300),
            large: (1024, 1024),
            thumbnail: (150, 150),
        }
    }
}

/// Result of planning a source resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionPlan {
    /// Contain-fit derivatives, sorted and unique.
    pub derivatives: Vec<Dims>,
    /// Final cropped thumbnail size, if the source warrants one.
    pub thumbnail: Option<Dims>,
}

impl ResolutionPlan {
    /// Every size the CMS would store for this source, thumbnail included.
    pub fn all_sizes(&self) -> Vec<Dims> {
        let mut all = ResolutionList::new();
        for dims in &self.derivatives {
            all.push(*dims);
        }
        if let Some(thumb) = self.thumbnail {
            all.push(thumb);
        }
        all.into_sorted_unique()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImgScaler {
    pub src_w: u32,
    pub src_h: u32,
    pub caps: SizeCaps,
}

impl ImgScaler {
    pub fn new(src_w: u32, src_h: u32) -> Self {
        Self::with_caps(src_w, src_h, SizeCaps::default())
    }

    pub fn with_caps(src_w: u32, src_h: u32, caps: SizeCaps) -> Self {
        Self { src_w, src_h, caps }
    }

    pub fn plan(&self) -> ResolutionPlan {
        let mut sizes = ResolutionList::new();
        if self.src_w > MEDIUM_LARGE_WIDTH {
            sizes.push(self.fixed_width(MEDIUM_LARGE_WIDTH));
        }
        // Caps are independent of each other, not cumulative.
        self.push_bounded_fit(&mut sizes, self.caps.medium);
        self.push_bounded_fit(&mut sizes, self.caps.large);
        for cap in EXTRA_LARGE_CAPS {
            self.push_bounded_fit(&mut sizes, cap);
        }
        ResolutionPlan {
            derivatives: sizes.into_sorted_unique(),
            thumbnail: self.thumbnail(),
        }
    }

    /// `(width, round(src_h * width / src_w))`.
    pub fn fixed_width(&self, width: u32) -> Dims {
        let height = f64::from(self.src_h) * f64::from(width) / f64::from(self.src_w);
        (width, round_half_up(height))
    }

    fn push_bounded_fit(&self, sizes: &mut ResolutionList, (cap_w, cap_h): Dims) {
        if self.src_w <= cap_w && self.src_h <= cap_h {
            return;
        }
        let w_over = f64::from(self.src_w) / f64::from(cap_w);
        let h_over = f64::from(self.src_h) / f64::from(cap_h);
        let constraint = w_over.max(h_over);
        sizes.push_rounded(
            f64::from(self.src_w) / constraint,
            f64::from(self.src_h) / constraint,
        );
    }

    /// Final thumbnail size after cropping.
    ///
    /// `None` only when the source is smaller than the cap on both axes; an
    /// axis already below the cap keeps the source's extent.
    pub fn thumbnail(&self) -> Option<Dims> {
        let (tw, th) = self.caps.thumbnail;
        if self.src_w < tw && self.src_h < th {
            return None;
        }
        Some((tw.min(self.src_w), th.min(self.src_h)))
    }

    /// Size the source is scaled to before the thumbnail crop.
    ///
    /// The crop fills the frame, so the scale factor is the smaller of the two
    /// axis ratios. A source below the cap on either axis is not scaled.
    pub fn thumbnail_intermediate(&self) -> Dims {
        let (tw, th) = self.caps.thumbnail;
        if self.src_w < tw || self.src_h < th {
            return (self.src_w, self.src_h);
        }
        let constraint = (f64::from(self.src_w) / f64::from(tw))
            .min(f64::from(self.src_h) / f64::from(th));
        (
            round_half_up(f64::from(self.src_w) / constraint),
            round_half_up(f64::from(self.src_h) / constraint),
        )
    }
}

// ═══════════════════════════════════════════════════════════════
// Derivative file names
// ═══════════════════════════════════════════════════════════════

/// Suffix the CMS appends to derivative file names: `-{w}x{h}.{ext}`.
pub fn name_decoration(width: u32, height: u32, ext: &str) -> String {
    format!("-{}x{}.{}", width, height, ext)
}

/// Leaf file name of the derivative of `base_file` at `dims`.
///
/// `base_file` may be a relative path like `2022/08/photo.png`; the result is
/// a leaf name (`photo-300x118.png`), which is how the CMS stores derivative
/// names.
pub fn derivative_file_name(base_file: &str, (width, height): Dims) -> String {
    let (_, leaf) = split_key(base_file);
    match leaf.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = (&leaf[..dot], &leaf[dot + 1..]);
            format!("{}{}", stem, name_decoration(width, height, ext))
        }
        _ => format!("{}-{}x{}", leaf, width, height),
    }
}
