//! DXT1/DXT5 block compression using bounding-box endpoints.
//!
//! Fast rather than optimal: endpoints are the per-channel minimum and
//! maximum of the block, and each pixel picks the nearest interpolated color.

use rgb::RGBA8;

use crate::config::DxtFormat;

/// Alpha below this is encoded as transparent in DXT1.
const DXT1_ALPHA_CUTOFF: u8 = 128;

fn to_565(c: RGBA8) -> u16 {
    (u16::from(c.r) >> 3) << 11 | (u16::from(c.g) >> 2) << 5 | u16::from(c.b) >> 3
}

fn from_565(v: u16) -> RGBA8 {
    let r = ((v >> 11) & 0x1F) as u8;
    let g = ((v >> 5) & 0x3F) as u8;
    let b = (v & 0x1F) as u8;
    RGBA8::new(r << 3 | r >> 2, g << 2 | g >> 4, b << 3 | b >> 2, 255)
}

fn lerp(a: RGBA8, b: RGBA8, wa: u32, wb: u32) -> RGBA8 {
    let d = wa + wb;
    let mix = |x: u8, y: u8| ((u32::from(x) * wa + u32::from(y) * wb) / d) as u8;
    RGBA8::new(mix(a.r, b.r), mix(a.g, b.g), mix(a.b, b.b), 255)
}

fn rgb_distance(a: RGBA8, b: RGBA8) -> u32 {
    let d = |x: u8, y: u8| {
        let v = i32::from(x) - i32::from(y);
        (v * v) as u32
    };
    d(a.r, b.r) + d(a.g, b.g) + d(a.b, b.b)
}

/// The four colors a decoder derives from a pair of endpoints.
fn color_palette(c0: u16, c1: u16, four_color: bool) -> [RGBA8; 4] {
    let (p0, p1) = (from_565(c0), from_565(c1));
    if four_color {
        [p0, p1, lerp(p0, p1, 2, 1), lerp(p0, p1, 1, 2)]
    } else {
        [p0, p1, lerp(p0, p1, 1, 1), RGBA8::new(0, 0, 0, 0)]
    }
}

/// Encode the 8-byte color half of a block.
///
/// With `punch_through`, pixels whose alpha is below the DXT1 cutoff use the
/// transparent slot of the three-color mode.
fn encode_color_block(block: &[RGBA8; 16], punch_through: bool) -> [u8; 8] {
    let visible = |p: &&RGBA8| !punch_through || p.a >= DXT1_ALPHA_CUTOFF;
    let Some(first) = block.iter().find(visible) else {
        // Fully transparent: three-color mode, every index on the transparent slot.
        return [0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF];
    };

    let (mut lo, mut hi) = (*first, *first);
    for p in block.iter().filter(visible) {
        lo = RGBA8::new(lo.r.min(p.r), lo.g.min(p.g), lo.b.min(p.b), 255);
        hi = RGBA8::new(hi.r.max(p.r), hi.g.max(p.g), hi.b.max(p.b), 255);
    }
    let (lo, hi) = (to_565(lo), to_565(hi));

    let has_transparent = punch_through && block.iter().any(|p| p.a < DXT1_ALPHA_CUTOFF);
    // Endpoint order selects the mode: c0 > c1 is four-color, c0 <= c1 three-color.
    let (c0, c1) = if has_transparent { (lo, hi) } else { (hi, lo) };
    let four_color = !has_transparent && c0 != c1;
    let palette = color_palette(c0, c1, four_color);
    let candidates = if four_color { 4 } else { 3 };

    let mut indices = 0u32;
    for (i, p) in block.iter().enumerate() {
        let idx = if has_transparent && p.a < DXT1_ALPHA_CUTOFF {
            3
        } else {
            (0..candidates)
                .min_by_key(|&k| rgb_distance(*p, palette[k]))
                .unwrap_or(0) as u32
        };
        indices |= idx << (2 * i);
    }

    let mut out = [0u8; 8];
    out[..2].copy_from_slice(&c0.to_le_bytes());
    out[2..4].copy_from_slice(&c1.to_le_bytes());
    out[4..].copy_from_slice(&indices.to_le_bytes());
    out
}

/// Eight-value alpha ramp for `a0 > a1`.
fn alpha_palette(a0: u8, a1: u8) -> [u8; 8] {
    let mut out = [a0, a1, 0, 0, 0, 0, 0, 0];
    if a0 > a1 {
        for (i, v) in out.iter_mut().enumerate().skip(2) {
            let i = i as u32;
            *v = (((8 - i) * u32::from(a0) + (i - 1) * u32::from(a1)) / 7) as u8;
        }
    } else {
        for (i, v) in out.iter_mut().enumerate().take(6).skip(2) {
            let i = i as u32;
            *v = (((6 - i) * u32::from(a0) + (i - 1) * u32::from(a1)) / 5) as u8;
        }
        out[7] = 255;
    }
    out
}

fn encode_alpha_block(block: &[RGBA8; 16]) -> [u8; 8] {
    let a0 = block.iter().map(|p| p.a).max().unwrap_or(255);
    let a1 = block.iter().map(|p| p.a).min().unwrap_or(255);
    let ramp = alpha_palette(a0, a1);

    let mut indices = 0u64;
    for (i, p) in block.iter().enumerate() {
        let idx = if a0 == a1 {
            0
        } else {
            (0..8)
                .min_by_key(|&k| (i32::from(p.a) - i32::from(ramp[k])).abs())
                .unwrap_or(0) as u64
        };
        indices |= idx << (3 * i);
    }

    let mut out = [0u8; 8];
    out[0] = a0;
    out[1] = a1;
    out[2..].copy_from_slice(&indices.to_le_bytes()[..6]);
    out
}

/// One DXT1 block with one-bit alpha.
pub fn encode_dxt1_block(block: &[RGBA8; 16]) -> [u8; 8] {
    encode_color_block(block, true)
}

/// One DXT5 block: interpolated alpha followed by a four-color block.
pub fn encode_dxt5_block(block: &[RGBA8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&encode_alpha_block(block));
    out[8..].copy_from_slice(&encode_color_block(block, false));
    out
}

/// Compress a row-major image whose sides are multiples of four.
pub fn compress_image(pixels: &[RGBA8], width: usize, height: usize, format: DxtFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity((width / 4) * (height / 4) * format.block_size());
    let mut block = [RGBA8::new(0, 0, 0, 0); 16];
    for by in (0..height).step_by(4) {
        for bx in (0..width).step_by(4) {
            for y in 0..4 {
                let row = (by + y) * width + bx;
                block[y * 4..y * 4 + 4].copy_from_slice(&pixels[row..row + 4]);
            }
            match format {
                DxtFormat::Dxt1 => out.extend_from_slice(&encode_dxt1_block(&block)),
                DxtFormat::Dxt5 => out.extend_from_slice(&encode_dxt5_block(&block)),
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn decode_dxt1_block(data: &[u8]) -> [RGBA8; 16] {
        let c0 = u16::from_le_bytes([data[0], data[1]]);
        let c1 = u16::from_le_bytes([data[2], data[3]]);
        let indices = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let palette = color_palette(c0, c1, c0 > c1);
        std::array::from_fn(|i| palette[((indices >> (2 * i)) & 3) as usize])
    }

    pub(crate) fn decode_dxt5_block(data: &[u8]) -> [RGBA8; 16] {
        let ramp = alpha_palette(data[0], data[1]);
        let mut bits = [0u8; 8];
        bits[..6].copy_from_slice(&data[2..8]);
        let alpha_indices = u64::from_le_bytes(bits);
        let c0 = u16::from_le_bytes([data[8], data[9]]);
        let c1 = u16::from_le_bytes([data[10], data[11]]);
        let indices = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        let palette = color_palette(c0, c1, true);
        std::array::from_fn(|i| {
            let mut p = palette[((indices >> (2 * i)) & 3) as usize];
            p.a = ramp[((alpha_indices >> (3 * i)) & 7) as usize];
            p
        })
    }

    fn close(a: RGBA8, b: RGBA8, tol: i32) -> bool {
        let d = |x: u8, y: u8| (i32::from(x) - i32::from(y)).abs() <= tol;
        d(a.r, b.r) && d(a.g, b.g) && d(a.b, b.b)
    }

    #[test]
    fn solid_block_survives() {
        let c = RGBA8::new(200, 100, 40, 255);
        let out = decode_dxt1_block(&encode_dxt1_block(&[c; 16]));
        assert!(out.iter().all(|p| close(*p, c, 8) && p.a == 255));
    }

    #[test]
    fn dxt1_punch_through_alpha() {
        let mut block = [RGBA8::new(255, 0, 0, 255); 16];
        block[3] = RGBA8::new(0, 0, 0, 0);
        block[7] = RGBA8::new(0, 0, 255, 100);
        let out = decode_dxt1_block(&encode_dxt1_block(&block));
        assert_eq!(out[3].a, 0);
        assert_eq!(out[7].a, 0);
        assert!(close(out[0], block[0], 8));
        assert_eq!(out[0].a, 255);
    }

    #[test]
    fn fully_transparent_dxt1() {
        let out = decode_dxt1_block(&encode_dxt1_block(&[RGBA8::new(9, 9, 9, 0); 16]));
        assert!(out.iter().all(|p| p.a == 0));
    }

    #[test]
    fn dxt1_gradient_uses_endpoints() {
        let block: [RGBA8; 16] = std::array::from_fn(|i| {
            let v = (i * 17) as u8;
            RGBA8::new(v, v, v, 255)
        });
        let out = decode_dxt1_block(&encode_dxt1_block(&block));
        assert!(close(out[0], block[0], 8));
        assert!(close(out[15], block[15], 8));
        assert!(out.iter().zip(&block).all(|(a, b)| close(*a, *b, 48)));
    }

    #[test]
    fn dxt5_keeps_interpolated_alpha() {
        let block: [RGBA8; 16] = std::array::from_fn(|i| RGBA8::new(10, 200, 30, (i * 17) as u8));
        let out = decode_dxt5_block(&encode_dxt5_block(&block));
        for (a, b) in out.iter().zip(&block) {
            assert!((i32::from(a.a) - i32::from(b.a)).abs() <= 19, "{} vs {}", a.a, b.a);
            assert!(close(*a, *b, 8));
        }
        assert_eq!(out[0].a, 0);
        assert_eq!(out[15].a, 255);
    }

    #[test]
    fn image_is_split_into_row_major_blocks() {
        let mut pixels = vec![RGBA8::new(0, 0, 0, 255); 8 * 4];
        for y in 0..4 {
            for x in 4..8 {
                pixels[y * 8 + x] = RGBA8::new(255, 255, 255, 255);
            }
        }
        let data = compress_image(&pixels, 8, 4, DxtFormat::Dxt1);
        assert_eq!(data.len(), 16);
        assert!(decode_dxt1_block(&data[..8]).iter().all(|p| p.r == 0));
        assert!(decode_dxt1_block(&data[8..]).iter().all(|p| p.r == 255));
    }
}
