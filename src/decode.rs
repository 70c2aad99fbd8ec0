//! BAM V1 reader, for importing existing animations.

use std::io::Read;

use flate2::read::ZlibDecoder;
use rgb::RGBA8;

use crate::error::BamError;
use crate::frame::{CycleEntry, FrameEntry, FrameOptions};
use crate::palette::reserve_transparent_index;

/// Upper bound on how far deflate can expand its input.
const MAX_DEFLATE_RATIO: usize = 1032;

/// Frames and cycles recovered from a BAM file.
#[derive(Debug, Clone, Default)]
pub struct BamContents {
    pub frames: Vec<FrameEntry>,
    pub cycles: Vec<CycleEntry>,
    /// Palette index treated as transparent.
    pub transparent_index: u8,
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], BamError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(BamError::Malformed("offset past end of data"))
    }

    fn u8(&self, offset: usize) -> Result<u8, BamError> {
        Ok(self.bytes(offset, 1)?[0])
    }

    fn u16(&self, offset: usize) -> Result<u16, BamError> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&self, offset: usize) -> Result<i16, BamError> {
        Ok(self.u16(offset)? as i16)
    }

    fn u32(&self, offset: usize) -> Result<u32, BamError> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Decode a BAM V1 file, inflating a BAMC wrapper first if present.
pub fn read_bam(data: &[u8]) -> Result<BamContents, BamError> {
    match data.get(..8) {
        Some(b"BAMCV1  ") => {
            let expected = Reader { data }.u32(8)? as usize;
            let payload = &data[12..];
            let mut inflated =
                Vec::with_capacity(expected.min(payload.len().saturating_mul(MAX_DEFLATE_RATIO)));
            // One byte past the declared size is enough to detect a mismatch.
            ZlibDecoder::new(payload)
                .take(expected as u64 + 1)
                .read_to_end(&mut inflated)?;
            if inflated.len() != expected {
                return Err(BamError::Malformed("BAMC size mismatch"));
            }
            read_bam_v1(&inflated)
        }
        Some(b"BAM V1  ") => read_bam_v1(data),
        Some(b"BAM V2  ") => Err(BamError::Malformed(
            "BAM V2 import is not supported; pixel data lives in PVRZ pages",
        )),
        _ => Err(BamError::Malformed("not a BAM file")),
    }
}

fn read_bam_v1(data: &[u8]) -> Result<BamContents, BamError> {
    let r = Reader { data };
    let frame_count = r.u16(8)? as usize;
    let cycle_count = r.u8(10)? as usize;
    let rle_color = r.u8(11)?;
    let frames_offset = r.u32(12)? as usize;
    let palette_offset = r.u32(16)? as usize;
    let lookup_offset = r.u32(20)? as usize;

    let raw_palette = r.bytes(palette_offset, 1024)?;
    let mut palette: Vec<RGBA8> = raw_palette
        .chunks_exact(4)
        .map(|c| RGBA8::new(c[2], c[1], c[0], 255))
        .collect();
    let transparent_index = reserve_transparent_index(&palette);
    palette[transparent_index as usize].a = 0;

    let mut frames = Vec::with_capacity(frame_count);
    for i in 0..frame_count {
        let base = frames_offset + i * 12;
        let width = r.u16(base)?;
        let height = r.u16(base + 2)?;
        let center_x = r.i16(base + 4)?;
        let center_y = r.i16(base + 6)?;
        let raw_offset = r.u32(base + 8)?;
        let compressed = raw_offset & 0x8000_0000 == 0;
        let offset = (raw_offset & 0x7FFF_FFFF) as usize;
        let len = width as usize * height as usize;

        let pixels = if compressed {
            rle_decode(&data[offset.min(data.len())..], rle_color, len)?
        } else {
            r.bytes(offset, len)?.to_vec()
        };
        frames.push(FrameEntry {
            width,
            height,
            center_x,
            center_y,
            image: crate::frame::FrameImage::Indexed {
                pixels,
                palette: palette.clone(),
            },
            options: FrameOptions {
                compressed,
                rle_index: Some(rle_color),
                ..FrameOptions::default()
            },
        });
    }

    let cycles_offset = frames_offset + frame_count * 12;
    let mut cycles = Vec::with_capacity(cycle_count);
    for i in 0..cycle_count {
        let base = cycles_offset + i * 4;
        let count = r.u16(base)? as usize;
        let start = r.u16(base + 2)? as usize;
        let mut indices = Vec::with_capacity(count);
        for j in 0..count {
            let idx = r.u16(lookup_offset + (start + j) * 2)? as usize;
            // Dangling references are dropped rather than carried into the store.
            if idx < frame_count {
                indices.push(idx);
            }
        }
        cycles.push(CycleEntry::new(indices));
    }

    Ok(BamContents {
        frames,
        cycles,
        transparent_index,
    })
}

/// Expand `[rle_color, n]` pairs into `n + 1` copies of `rle_color`.
pub fn rle_decode(data: &[u8], rle_color: u8, len: usize) -> Result<Vec<u8>, BamError> {
    // A two-byte run expands to at most 256 bytes.
    let mut out = Vec::with_capacity(len.min(data.len().saturating_mul(128)));
    let mut i = 0;
    while out.len() < len {
        let Some(&b) = data.get(i) else {
            return Err(BamError::Malformed("RLE data truncated"));
        };
        if b == rle_color {
            let n = *data
                .get(i + 1)
                .ok_or(BamError::Malformed("RLE data truncated"))? as usize;
            out.extend(std::iter::repeat_n(b, n + 1));
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    out.truncate(len);
    Ok(out)
}
