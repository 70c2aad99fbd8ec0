use rgb::RGBA8;

use crate::frame::FrameImage;
use crate::palette::{ColorCache, HclPalette, Palette, nearest_color_index};

/// A pixel is transparent when its alpha is below `alpha_threshold`.
///
/// A zero threshold makes every pixel visible, alpha 0 included.
///
/// Raising the threshold can only turn opaque pixels transparent, never the reverse.
#[inline]
pub fn is_transparent_color(pixel: RGBA8, alpha_threshold: u8) -> bool {
    pixel.a < alpha_threshold
}

/// Map a frame onto `palette`. Transparent pixels get the transparent index.
///
/// `hcl` must come from the same palette; `cache` may be shared across frames
/// of one conversion.
pub fn remap_frame(
    image: &FrameImage,
    palette: &Palette,
    hcl: &HclPalette,
    cache: &mut ColorCache,
    alpha_threshold: u8,
) -> Vec<u8> {
    let transparent_idx = palette.transparent_index();
    match image {
        FrameImage::Indexed { pixels, palette: local } => {
            // Resolve each local entry once, then translate the index stream.
            let mut lut = [transparent_idx; 256];
            for (i, &c) in local.iter().enumerate().take(256) {
                if !is_transparent_color(c, alpha_threshold) {
                    lut[i] = nearest_color_index(c, hcl, cache);
                }
            }
            pixels.iter().map(|&i| lut[i as usize]).collect()
        }
        FrameImage::Rgba(pixels) => pixels
            .iter()
            .map(|&p| {
                if is_transparent_color(p, alpha_threshold) {
                    transparent_idx
                } else {
                    nearest_color_index(p, hcl, cache)
                }
            })
            .collect(),
    }
}
