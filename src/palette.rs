use std::cmp::Ordering;
use std::collections::HashMap;

use rgb::RGBA8;

use crate::frame::{key_rgb, rgb_key};
use crate::histogram::ColorHistogram;
use crate::median_cut::median_cut;
use crate::oklab::{Hcl, srgb_to_oklab};

/// Number of entries in a legacy palette.
pub const PALETTE_SIZE: usize = 256;

/// The authoring-tool convention for "this entry is transparent".
pub const TRANSPARENT_GREEN: RGBA8 = RGBA8 {
    r: 0,
    g: 255,
    b: 0,
    a: 255,
};

/// A 256-entry palette with one designated transparent index.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    entries: Vec<RGBA8>,
    /// Entries actually chosen from the source; the rest is black padding.
    used: usize,
    transparent_index: u8,
    /// The transparent entry is the green sentinel rather than an image color.
    reserved: bool,
}

impl Palette {
    /// Wrap an explicit color table. Missing entries are padded with black.
    pub fn from_colors(colors: &[RGBA8]) -> Self {
        let used = colors.len().min(PALETTE_SIZE);
        let mut entries: Vec<RGBA8> = colors[..used]
            .iter()
            .map(|c| RGBA8::new(c.r, c.g, c.b, 255))
            .collect();
        entries.resize(PALETTE_SIZE, RGBA8::new(0, 0, 0, 255));
        let transparent_index = reserve_transparent_index(&entries[..used.max(1)]);
        let reserved = entries[transparent_index as usize] == TRANSPARENT_GREEN;
        Self {
            entries,
            used: used.max(1),
            transparent_index,
            reserved,
        }
    }

    /// All 256 entries. The transparent entry carries alpha 0.
    pub fn entries(&self) -> Vec<RGBA8> {
        let mut out = self.entries.clone();
        out[self.transparent_index as usize].a = 0;
        out
    }

    /// The raw color at `index`, as stored.
    pub fn color(&self, index: u8) -> RGBA8 {
        self.entries[index as usize]
    }

    /// Number of meaningful entries (at least one).
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn transparent_index(&self) -> u8 {
        self.transparent_index
    }

    /// Whether the transparent entry is reserved exclusively for transparency.
    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    /// Precompute the perceptual representation used by [`nearest_color_index`].
    pub fn to_hcl_space(&self) -> HclPalette {
        let skip = self.reserved.then_some(self.transparent_index);
        let entries = self.entries[..self.used]
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i as u8) != skip)
            .map(|(i, c)| (i as u8, Hcl::from_rgb(c.r, c.g, c.b)))
            .collect();
        HclPalette { entries }
    }
}

/// Select up to `max_colors` representative colors from `histogram`.
///
/// Colors come from a weighted median cut and are always colors present in
/// the histogram; when the histogram holds few enough colors they are all
/// kept. Entries are ordered by lightness. The green sentinel is placed at
/// index 0 whenever there is room, and room is always made when the source
/// has transparent pixels or must be reduced.
pub fn build_palette(histogram: &ColorHistogram, max_colors: usize) -> Palette {
    let max_colors = max_colors.clamp(1, PALETTE_SIZE);
    // Keep a slot for the sentinel unless every opaque color fits as-is.
    let lossless = !histogram.has_transparent() && histogram.len() <= max_colors;
    let budget = if lossless { max_colors } else { max_colors - 1 };

    let mut keys = median_cut(histogram.entries(), budget);
    keys.sort_by(|&a, &b| {
        let (pa, pb) = (key_rgb(a), key_rgb(b));
        let la = srgb_to_oklab(pa.r, pa.g, pa.b).l;
        let lb = srgb_to_oklab(pb.r, pb.g, pb.b).l;
        la.partial_cmp(&lb).unwrap_or(Ordering::Equal).then(a.cmp(&b))
    });

    let green = rgb_key(TRANSPARENT_GREEN);
    if !keys.contains(&green) && keys.len() < max_colors {
        keys.insert(0, green);
    }

    let colors: Vec<RGBA8> = keys.into_iter().map(key_rgb).collect();
    let palette = Palette::from_colors(&colors);
    log::debug!(
        "built palette: {} of {} colors, transparent index {}",
        palette.used(),
        histogram.len(),
        palette.transparent_index()
    );
    palette
}

/// Index of the first pure green entry, or 0 when there is none.
pub fn reserve_transparent_index(entries: &[RGBA8]) -> u8 {
    entries
        .iter()
        .position(|c| rgb_key(*c) == rgb_key(TRANSPARENT_GREEN))
        .map(|i| i as u8)
        .unwrap_or(0)
}

/// Palette entries in HCL space, computed once per conversion.
#[derive(Debug, Clone)]
pub struct HclPalette {
    entries: Vec<(u8, Hcl)>,
}

impl HclPalette {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exact-match cache from 24-bit color to palette index.
pub type ColorCache = HashMap<u32, u8>;

/// Palette index perceptually closest to `rgb`; lowest index wins ties.
///
/// The cache is consulted first and filled on a miss.
pub fn nearest_color_index(rgb: RGBA8, palette: &HclPalette, cache: &mut ColorCache) -> u8 {
    let key = rgb_key(rgb);
    if let Some(&idx) = cache.get(&key) {
        return idx;
    }

    let target = Hcl::from_rgb(rgb.r, rgb.g, rgb.b);
    let mut best_idx = 0u8;
    let mut best_dist = f32::MAX;
    // Entries are in ascending index order, so strict `<` keeps the lowest index on ties.
    for &(idx, hcl) in &palette.entries {
        let d = target.distance_sq(hcl);
        if d < best_dist {
            best_dist = d;
            best_idx = idx;
        }
    }

    cache.insert(key, best_idx);
    best_idx
}
