use std::collections::BTreeMap;

use rgb::RGBA8;

use crate::frame::{FrameImage, key_rgb, rgb_key};
use crate::oklab::{OKLab, srgb_to_oklab};
use crate::remap::is_transparent_color;

/// A histogram entry as handed to median cut: perceptual position, weight, source color key.
#[derive(Debug, Clone, Copy)]
pub struct HistEntry {
    pub lab: OKLab,
    pub weight: f32,
    pub key: u32,
}

/// Reference-counted occurrence counts of 24-bit colors across a set of frames.
///
/// Keyed by a `BTreeMap` so iteration order, and therefore palette generation,
/// is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorHistogram {
    counts: BTreeMap<u32, u64>,
    /// Pixels skipped as transparent, tracked so the palette can reserve a slot.
    transparent: u64,
}

impl ColorHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the visible pixels of `image`. Transparent pixels (see [`is_transparent_color`]) are skipped.
    pub fn register_colors(&mut self, image: &FrameImage, alpha_threshold: u8) {
        let (colors, transparent) = frame_counts(image, alpha_threshold);
        for (key, n) in colors {
            *self.counts.entry(key).or_insert(0) += n;
        }
        self.transparent += transparent;
    }

    /// Remove what a matching [`register_colors`](Self::register_colors) call added.
    ///
    /// Counts that reach zero are dropped; removing more than was added saturates at zero.
    pub fn unregister_colors(&mut self, image: &FrameImage, alpha_threshold: u8) {
        let (colors, transparent) = frame_counts(image, alpha_threshold);
        for (key, n) in colors {
            if let Some(count) = self.counts.get_mut(&key) {
                *count = count.saturating_sub(n);
                if *count == 0 {
                    self.counts.remove(&key);
                }
            }
        }
        self.transparent = self.transparent.saturating_sub(transparent);
    }

    pub fn clear(&mut self) {
        self.counts.clear();
        self.transparent = 0;
    }

    /// Number of distinct colors.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, rgb: RGBA8) -> u64 {
        self.counts.get(&rgb_key(rgb)).copied().unwrap_or(0)
    }

    pub fn has_transparent(&self) -> bool {
        self.transparent > 0
    }

    /// Distinct colors in ascending key order.
    pub fn colors(&self) -> impl Iterator<Item = RGBA8> + '_ {
        self.counts.keys().map(|&k| key_rgb(k))
    }

    /// Weighted OKLab entries for median cut, in ascending key order.
    pub fn entries(&self) -> Vec<HistEntry> {
        self.counts
            .iter()
            .map(|(&key, &n)| {
                let p = key_rgb(key);
                HistEntry {
                    lab: srgb_to_oklab(p.r, p.g, p.b),
                    weight: n as f32,
                    key,
                }
            })
            .collect()
    }
}

fn frame_counts(image: &FrameImage, alpha_threshold: u8) -> (BTreeMap<u32, u64>, u64) {
    let mut colors = BTreeMap::new();
    let mut transparent = 0u64;
    match image {
        FrameImage::Indexed { pixels, palette } => {
            // Count indices first; palettes are tiny compared to pixel data.
            let mut per_index = [0u64; 256];
            for &i in pixels {
                per_index[i as usize] += 1;
            }
            for (i, &n) in per_index.iter().enumerate().filter(|(_, n)| **n > 0) {
                let p = palette.get(i).copied().unwrap_or(RGBA8::new(0, 0, 0, 0));
                if is_transparent_color(p, alpha_threshold) {
                    transparent += n;
                } else {
                    *colors.entry(rgb_key(p)).or_insert(0) += n;
                }
            }
        }
        FrameImage::Rgba(pixels) => {
            for &p in pixels {
                if is_transparent_color(p, alpha_threshold) {
                    transparent += 1;
                } else {
                    *colors.entry(rgb_key(p)).or_insert(0) += 1;
                }
            }
        }
    }
    (colors, transparent)
}
