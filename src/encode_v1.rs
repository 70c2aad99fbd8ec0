//! Legacy palette-indexed BAM V1 encoder.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use log::{debug, info};

use crate::config::ConvertConfig;
use crate::document::FinalDocument;
use crate::error::BamError;
use crate::histogram::ColorHistogram;
use crate::palette::{ColorCache, Palette, build_palette};
use crate::progress::Progress;
use crate::remap::remap_frame;

pub(crate) const V1_SIGNATURE: &[u8; 8] = b"BAM V1  ";
pub(crate) const BAMC_SIGNATURE: &[u8; 8] = b"BAMCV1  ";

const HEADER_SIZE: usize = 24;
const FRAME_ENTRY_SIZE: usize = 12;
const CYCLE_ENTRY_SIZE: usize = 4;
const PALETTE_BYTES: usize = 1024;
const UNCOMPRESSED_FLAG: u32 = 0x8000_0000;
const MAX_FRAMES: usize = u16::MAX as usize;
const MAX_CYCLES: usize = u8::MAX as usize;
/// Longest run a single `[color, count]` pair can express.
const MAX_RUN: usize = 256;

/// A frame after quantization, ready for layout.
struct EncodedFrame {
    width: u16,
    height: u16,
    center_x: i16,
    center_y: i16,
    data: Vec<u8>,
    compressed: bool,
}

fn check_limit(what: &'static str, count: usize, limit: usize) -> Result<(), BamError> {
    if count > limit {
        return Err(BamError::TooMany { what, count, limit });
    }
    Ok(())
}

/// Encode the final document as BAM V1 bytes, BAMC-wrapped if configured.
pub(crate) fn encode_v1(
    doc: &FinalDocument<'_>,
    config: &ConvertConfig,
    progress: &mut dyn Progress,
) -> Result<Vec<u8>, BamError> {
    check_limit("frame", doc.frames.len(), MAX_FRAMES)?;
    check_limit("cycle", doc.cycles.len(), MAX_CYCLES)?;
    let lookup_len: usize = doc.cycles.iter().map(|c| c.len()).sum();
    check_limit("cycle frame reference", lookup_len, u16::MAX as usize)?;

    let threshold = config.alpha_threshold();
    let owned;
    let histogram = match doc.histogram {
        Some(h) => h,
        None => {
            let mut h = ColorHistogram::new();
            for frame in doc.frames {
                h.register_colors(&frame.image, threshold);
            }
            owned = h;
            &owned
        }
    };
    let palette = build_palette(histogram, config.max_colors as usize);
    let hcl = palette.to_hcl_space();
    let mut cache = ColorCache::new();
    let transparent = palette.transparent_index();

    let rle_color = select_rle_color(doc, transparent);
    let total = doc.frames.len();
    let mut frames = Vec::with_capacity(total);
    for (i, frame) in doc.frames.iter().enumerate() {
        if progress.is_cancelled() {
            info!("V1 encode cancelled after {i} of {total} frames");
            return Err(BamError::Cancelled);
        }
        let indices = remap_frame(&frame.image, &palette, &hcl, &mut cache, threshold);
        let wants_rle = frame.options.compressed
            && config.compress_rle
            && frame.options.rle_index.unwrap_or(transparent) == rle_color;
        let (data, compressed) = match wants_rle.then(|| rle_encode(&indices, rle_color)) {
            Some(rle) if rle.len() < indices.len() => (rle, true),
            _ => (indices, false),
        };
        frames.push(EncodedFrame {
            width: frame.width,
            height: frame.height,
            center_x: frame.center_x,
            center_y: frame.center_y,
            data,
            compressed,
        });
        progress.report(i + 1, total);
    }
    debug!(
        "quantized {total} frames, {} cached colors, RLE color {rle_color}",
        cache.len()
    );

    let bam = layout(doc, &frames, &palette, rle_color)?;
    if config.compress_bamc {
        wrap_bamc(&bam)
    } else {
        Ok(bam)
    }
}

/// Most common RLE escape among frames flagged for compression, lowest value on ties.
fn select_rle_color(doc: &FinalDocument<'_>, transparent: u8) -> u8 {
    let mut votes: BTreeMap<u8, usize> = BTreeMap::new();
    for frame in doc.frames.iter().filter(|f| f.options.compressed) {
        *votes
            .entry(frame.options.rle_index.unwrap_or(transparent))
            .or_insert(0) += 1;
    }
    let mut best = (transparent, 0);
    for (&color, &n) in &votes {
        if n > best.1 {
            best = (color, n);
        }
    }
    best.0
}

/// Run-length encode occurrences of `rle_color` as `[rle_color, run - 1]`.
pub(crate) fn rle_encode(indices: &[u8], rle_color: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len());
    let mut i = 0;
    while i < indices.len() {
        let b = indices[i];
        if b != rle_color {
            out.push(b);
            i += 1;
            continue;
        }
        let run = indices[i..]
            .iter()
            .take(MAX_RUN)
            .take_while(|&&v| v == rle_color)
            .count();
        out.push(rle_color);
        out.push((run - 1) as u8);
        i += run;
    }
    out
}

fn layout(
    doc: &FinalDocument<'_>,
    frames: &[EncodedFrame],
    palette: &Palette,
    rle_color: u8,
) -> Result<Vec<u8>, BamError> {
    let frames_offset = HEADER_SIZE;
    let cycles_offset = frames_offset + frames.len() * FRAME_ENTRY_SIZE;
    let palette_offset = cycles_offset + doc.cycles.len() * CYCLE_ENTRY_SIZE;
    let lookup_offset = palette_offset + PALETTE_BYTES;
    let lookup_len: usize = doc.cycles.iter().map(|c| c.len()).sum();
    let data_offset = lookup_offset + lookup_len * 2;

    // Identical blocks are stored once; entries carry their own compression flag.
    let mut blocks: HashMap<&[u8], u32> = HashMap::new();
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(frames.len());
    for frame in frames {
        let offset = match blocks.get(frame.data.as_slice()) {
            Some(&off) => off,
            None => {
                let off = data_offset + data.len();
                let off = u32::try_from(off)
                    .ok()
                    .filter(|&o| o & UNCOMPRESSED_FLAG == 0)
                    .ok_or(BamError::TooMany {
                        what: "output byte",
                        count: off,
                        limit: (UNCOMPRESSED_FLAG - 1) as usize,
                    })?;
                data.extend_from_slice(&frame.data);
                blocks.insert(&frame.data, off);
                off
            }
        };
        offsets.push(offset);
    }
    debug!(
        "{} frames share {} data blocks",
        frames.len(),
        blocks.len()
    );

    let mut out = Vec::with_capacity(data_offset + data.len());
    out.extend_from_slice(V1_SIGNATURE);
    out.extend_from_slice(&(frames.len() as u16).to_le_bytes());
    out.push(doc.cycles.len() as u8);
    out.push(rle_color);
    out.extend_from_slice(&(frames_offset as u32).to_le_bytes());
    out.extend_from_slice(&(palette_offset as u32).to_le_bytes());
    out.extend_from_slice(&(lookup_offset as u32).to_le_bytes());

    for (frame, &offset) in frames.iter().zip(&offsets) {
        out.extend_from_slice(&frame.width.to_le_bytes());
        out.extend_from_slice(&frame.height.to_le_bytes());
        out.extend_from_slice(&frame.center_x.to_le_bytes());
        out.extend_from_slice(&frame.center_y.to_le_bytes());
        let flag = if frame.compressed { 0 } else { UNCOMPRESSED_FLAG };
        out.extend_from_slice(&(offset | flag).to_le_bytes());
    }

    let mut start = 0usize;
    for cycle in doc.cycles {
        out.extend_from_slice(&(cycle.len() as u16).to_le_bytes());
        out.extend_from_slice(&(start as u16).to_le_bytes());
        start += cycle.len();
    }

    // BGRA with a zero alpha byte for every entry.
    for c in palette.entries() {
        out.extend_from_slice(&[c.b, c.g, c.r, 0]);
    }

    for cycle in doc.cycles {
        for &idx in &cycle.frames {
            out.extend_from_slice(&(idx as u16).to_le_bytes());
        }
    }

    out.extend_from_slice(&data);
    info!(
        "encoded BAM V1: {} frames ({} RLE), {} cycles, {} bytes",
        frames.len(),
        frames.iter().filter(|f| f.compressed).count(),
        doc.cycles.len(),
        out.len()
    );
    Ok(out)
}

/// Wrap a V1 file in the zlib-compressed BAMC container.
pub(crate) fn wrap_bamc(bam: &[u8]) -> Result<Vec<u8>, BamError> {
    let mut out = Vec::with_capacity(bam.len() / 2 + 12);
    out.extend_from_slice(BAMC_SIGNATURE);
    out.extend_from_slice(&(bam.len() as u32).to_le_bytes());
    let mut encoder = ZlibEncoder::new(out, Compression::best());
    encoder.write_all(bam)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use rgb::RGBA8;

    use super::*;
    use crate::decode::{read_bam, rle_decode};
    use crate::frame::{CycleEntry, FrameEntry};
    use crate::progress::{Callbacks, NoProgress};

    fn frame(pixels: Vec<RGBA8>, w: u16, h: u16) -> FrameEntry {
        FrameEntry::from_rgba(w, h, pixels).unwrap()
    }

    fn doc<'a>(frames: &'a [FrameEntry], cycles: &'a [CycleEntry]) -> FinalDocument<'a> {
        FinalDocument {
            frames,
            cycles,
            histogram: None,
        }
    }

    #[test]
    fn rle_caps_runs_at_256() {
        let mut indices = vec![0u8; 300];
        indices.push(7);
        let rle = rle_encode(&indices, 0);
        assert_eq!(rle, vec![0, 255, 0, 43, 7]);
        assert_eq!(rle_decode(&rle, 0, indices.len()).unwrap(), indices);
    }

    #[test]
    fn header_and_tables_line_up() {
        let red = RGBA8::new(255, 0, 0, 255);
        let clear = RGBA8::new(0, 0, 0, 0);
        let frames = vec![
            frame(vec![clear, clear, clear, red], 2, 2).with_center(3, -4),
            frame(vec![red; 4], 2, 2),
        ];
        let cycles = vec![CycleEntry::new(vec![1, 0, 1])];
        let bytes = encode_v1(&doc(&frames, &cycles), &ConvertConfig::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(&bytes[..8], V1_SIGNATURE);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 2);
        assert_eq!(bytes[10], 1);
        let palette_offset = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        assert_eq!(palette_offset, 24 + 2 * 12 + 4);
        // Green sentinel at index 0 in BGRA order.
        assert_eq!(&bytes[palette_offset..palette_offset + 4], &[0, 255, 0, 0]);

        let contents = read_bam(&bytes).unwrap();
        assert_eq!(contents.cycles[0].frames, vec![1, 0, 1]);
        let px = contents.frames[0].to_rgba();
        assert!(px[..3].iter().all(|p| p.a == 0));
        assert_eq!(px[3], red);
        assert_eq!(
            (contents.frames[0].center_x, contents.frames[0].center_y),
            (3, -4)
        );
    }

    #[test]
    fn identical_frames_share_data() {
        let px = vec![RGBA8::new(1, 2, 3, 255); 16];
        let frames = vec![frame(px.clone(), 4, 4), frame(px, 4, 4)];
        let bytes = encode_v1(&doc(&frames, &[]), &ConvertConfig::default(), &mut NoProgress)
            .unwrap();
        let entry = |i: usize| u32::from_le_bytes(bytes[32 + i * 12..36 + i * 12].try_into().unwrap());
        assert_eq!(entry(0), entry(1));
        // One 16-byte opaque frame, stored raw since it has no transparent run.
        assert_eq!(bytes.len(), 24 + 24 + 1024 + 16);
        assert_ne!(entry(0) & UNCOMPRESSED_FLAG, 0);
    }

    #[test]
    fn rle_needs_flag_and_matching_escape() {
        let clear = RGBA8::new(0, 0, 0, 0);
        let a = frame(vec![clear; 64], 8, 8);
        let mut b = a.clone();
        b.options.compressed = false;
        let frames = vec![a, b];
        let bytes = encode_v1(&doc(&frames, &[]), &ConvertConfig::default(), &mut NoProgress)
            .unwrap();
        let entry = |i: usize| u32::from_le_bytes(bytes[32 + i * 12..36 + i * 12].try_into().unwrap());
        assert_eq!(entry(0) & UNCOMPRESSED_FLAG, 0);
        assert_ne!(entry(1) & UNCOMPRESSED_FLAG, 0);

        let off = ConvertConfig::default().compress_rle(false);
        let bytes = encode_v1(&doc(&frames, &[]), &off, &mut NoProgress).unwrap();
        let entry = |i: usize| u32::from_le_bytes(bytes[32 + i * 12..36 + i * 12].try_into().unwrap());
        assert_ne!(entry(0) & UNCOMPRESSED_FLAG, 0);
    }

    #[test]
    fn too_many_cycles_is_rejected() {
        let cycles = vec![CycleEntry::default(); 256];
        let err = encode_v1(&doc(&[], &cycles), &ConvertConfig::default(), &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, BamError::TooMany { what: "cycle", .. }));
    }

    #[test]
    fn cancellation_between_frames() {
        let frames = vec![frame(vec![RGBA8::new(5, 5, 5, 255)], 1, 1); 3];
        let mut seen = 0usize;
        let mut progress = Callbacks {
            on_progress: |done: usize, _: usize| seen = done,
            cancelled: || true,
        };
        let err = encode_v1(&doc(&frames, &[]), &ConvertConfig::default(), &mut progress)
            .unwrap_err();
        assert!(matches!(err, BamError::Cancelled));
        drop(progress);
        assert_eq!(seen, 0);
    }

    #[test]
    fn bamc_round_trip() {
        let frames = vec![frame(vec![RGBA8::new(9, 8, 7, 255); 4], 2, 2)];
        let cycles = vec![CycleEntry::new(vec![0])];
        let config = ConvertConfig::default().compress_bamc(true);
        let bytes = encode_v1(&doc(&frames, &cycles), &config, &mut NoProgress).unwrap();
        assert_eq!(&bytes[..8], BAMC_SIGNATURE);
        let contents = read_bam(&bytes).unwrap();
        assert_eq!(contents.frames.len(), 1);
        assert_eq!(contents.frames[0].to_rgba()[0], RGBA8::new(9, 8, 7, 255));
    }
}
