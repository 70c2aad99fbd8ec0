//! Modern truecolor BAM V2 encoder with PVRZ texture pages.

use std::collections::HashMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use log::{debug, info};
use rgb::RGBA8;

use crate::config::{CompressionType, ConvertConfig, DxtFormat, MAX_PAGE_INDEX};
use crate::document::FinalDocument;
use crate::dxt::compress_image;
use crate::error::BamError;
use crate::frame::FrameEntry;
use crate::progress::Progress;
use crate::remap::is_transparent_color;

pub(crate) const V2_SIGNATURE: &[u8; 8] = b"BAM V2  ";

const HEADER_SIZE: usize = 32;
const FRAME_ENTRY_SIZE: usize = 12;
const CYCLE_ENTRY_SIZE: usize = 4;
const BLOCK_SIZE: usize = 28;
/// Largest texture page, and largest tile a frame is cut into.
pub(crate) const PAGE_DIM: usize = 1024;
const ALIGN: usize = 4;
const PVR3_VERSION: u32 = 0x0352_5650;

/// One rectangle of a frame placed on a texture page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataBlock {
    pub page: u32,
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub dst_x: u32,
    pub dst_y: u32,
}

/// A V2 conversion result: the BAM file and its texture pages.
#[derive(Debug)]
pub(crate) struct V2Output {
    pub bam: Vec<u8>,
    /// `(page number, PVRZ file contents)`.
    pub pages: Vec<(u32, Vec<u8>)>,
}

/// Choose the V2 texture format for `frames`.
///
/// Any alpha other than 0 or 255 needs DXT5, whatever the transparency
/// threshold; otherwise DXT1 is enough.
pub fn select_compression(frames: &[FrameEntry]) -> DxtFormat {
    let semi_transparent = frames
        .iter()
        .any(|frame| frame.to_rgba().iter().any(|p| p.a != 0 && p.a != 255));
    if semi_transparent {
        DxtFormat::Dxt5
    } else {
        DxtFormat::Dxt1
    }
}

fn resolve_compression(doc: &FinalDocument<'_>, config: &ConvertConfig) -> DxtFormat {
    match config.compression {
        CompressionType::Dxt1 => DxtFormat::Dxt1,
        CompressionType::Dxt5 => DxtFormat::Dxt5,
        CompressionType::Auto => select_compression(doc.frames),
    }
}

/// A rectangle cut from a frame, awaiting placement.
struct Tile {
    frame: usize,
    x: usize,
    y: usize,
    width: usize,
    height: usize,
}

struct Shelf {
    y: usize,
    height: usize,
    next_x: usize,
}

#[derive(Default)]
struct PageLayout {
    shelves: Vec<Shelf>,
    used_height: usize,
    extent: (usize, usize),
}

/// Shelf packer over pages of at most [`PAGE_DIM`] squared, in placement order.
#[derive(Default)]
struct Packer {
    pages: Vec<PageLayout>,
}

impl Packer {
    fn place(&mut self, width: usize, height: usize) -> (usize, usize, usize) {
        let (w, h) = (width.next_multiple_of(ALIGN), height.next_multiple_of(ALIGN));
        if let Some((x, y)) = self.pages.last_mut().and_then(|page| page.fit(w, h)) {
            return (self.pages.len() - 1, x, y);
        }
        let mut page = PageLayout::default();
        let (x, y) = page.fit(w, h).unwrap_or((0, 0));
        self.pages.push(page);
        (self.pages.len() - 1, x, y)
    }
}

impl PageLayout {
    fn fit(&mut self, w: usize, h: usize) -> Option<(usize, usize)> {
        let pos = if let Some(shelf) = self
            .shelves
            .iter_mut()
            .find(|s| h <= s.height && s.next_x + w <= PAGE_DIM)
        {
            let pos = (shelf.next_x, shelf.y);
            shelf.next_x += w;
            pos
        } else if self.used_height + h <= PAGE_DIM {
            let y = self.used_height;
            self.shelves.push(Shelf {
                y,
                height: h,
                next_x: w,
            });
            self.used_height += h;
            (0, y)
        } else {
            return None;
        };
        self.extent = (self.extent.0.max(pos.0 + w), self.extent.1.max(pos.1 + h));
        Some(pos)
    }

    /// Power-of-two page size covering everything placed.
    fn dimensions(&self) -> (usize, usize) {
        (
            self.extent.0.next_power_of_two().max(ALIGN),
            self.extent.1.next_power_of_two().max(ALIGN),
        )
    }
}

/// Cut a frame into tiles of at most [`PAGE_DIM`] on each side.
fn tiles_for(frame_idx: usize, frame: &FrameEntry) -> Vec<Tile> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut tiles = Vec::new();
    for y in (0..h).step_by(PAGE_DIM) {
        for x in (0..w).step_by(PAGE_DIM) {
            tiles.push(Tile {
                frame: frame_idx,
                x,
                y,
                width: (w - x).min(PAGE_DIM),
                height: (h - y).min(PAGE_DIM),
            });
        }
    }
    tiles
}

/// Encode the final document as BAM V2 plus PVRZ pages.
///
/// Only frames referenced by a cycle are written; each cycle becomes a
/// contiguous run of frame entries, and repeated references share blocks.
pub(crate) fn encode_v2(
    doc: &FinalDocument<'_>,
    config: &ConvertConfig,
    progress: &mut dyn Progress,
) -> Result<V2Output, BamError> {
    let format = resolve_compression(doc, config);
    let threshold = config.alpha_threshold();
    debug!("V2 texture format {format:?}");

    let entry_count: usize = doc.cycles.iter().map(|c| c.len()).sum();
    if entry_count > u16::MAX as usize {
        return Err(BamError::TooMany {
            what: "frame entry",
            count: entry_count,
            limit: u16::MAX as usize,
        });
    }

    // Assign block ranges to referenced frames in first-reference order.
    let mut packer = Packer::default();
    let mut blocks: Vec<DataBlock> = Vec::new();
    let mut placed: Vec<(Tile, usize)> = Vec::new();
    let mut ranges: HashMap<usize, (u16, u16)> = HashMap::new();
    let referenced: Vec<usize> = doc
        .cycles
        .iter()
        .flat_map(|c| c.frames.iter().copied())
        .filter(|&idx| idx < doc.frames.len())
        .collect();
    let total_work = referenced.len();
    for (n, &idx) in referenced.iter().enumerate() {
        if progress.is_cancelled() {
            return Err(BamError::Cancelled);
        }
        if ranges.contains_key(&idx) {
            continue;
        }
        let first = blocks.len();
        for tile in tiles_for(idx, &doc.frames[idx]) {
            let (page, x, y) = packer.place(tile.width, tile.height);
            blocks.push(DataBlock {
                page: config.page_offset + page as u32,
                src_x: x as u32,
                src_y: y as u32,
                width: tile.width as u32,
                height: tile.height as u32,
                dst_x: tile.x as u32,
                dst_y: tile.y as u32,
            });
            placed.push((tile, page));
        }
        if blocks.len() > u16::MAX as usize {
            return Err(BamError::TooMany {
                what: "data block",
                count: blocks.len(),
                limit: u16::MAX as usize,
            });
        }
        ranges.insert(idx, (first as u16, (blocks.len() - first) as u16));
        progress.report(n + 1, total_work);
    }

    let page_limit = MAX_PAGE_INDEX.saturating_sub(config.page_offset) as usize;
    if packer.pages.len() > page_limit {
        return Err(BamError::TooMany {
            what: "PVRZ page",
            count: packer.pages.len(),
            limit: page_limit,
        });
    }

    let mut pages = Vec::with_capacity(packer.pages.len());
    for (page_idx, layout) in packer.pages.iter().enumerate() {
        if progress.is_cancelled() {
            return Err(BamError::Cancelled);
        }
        let (pw, ph) = layout.dimensions();
        let mut canvas = vec![RGBA8::new(0, 0, 0, 0); pw * ph];
        for (tile, block) in placed.iter().zip(&blocks).filter(|((_, p), _)| *p == page_idx) {
            let tile = &tile.0;
            blit(
                &mut canvas,
                pw,
                &doc.frames[tile.frame],
                tile,
                (block.src_x as usize, block.src_y as usize),
                threshold,
            );
        }
        let dxt = compress_image(&canvas, pw, ph, format);
        let number = config.page_offset + page_idx as u32;
        pages.push((number, pvrz(&dxt, pw, ph, format)?));
        debug!("page MOS{number:04}: {pw}x{ph}, {} bytes of {format:?}", dxt.len());
    }

    let bam = layout_v2(doc, &ranges, &blocks);
    info!(
        "encoded BAM V2: {} frame entries, {} cycles, {} blocks on {} pages",
        entry_count,
        doc.cycles.len(),
        blocks.len(),
        pages.len()
    );
    Ok(V2Output { bam, pages })
}

/// Copy a tile onto the page canvas. Pixels below the threshold become fully transparent.
fn blit(
    canvas: &mut [RGBA8],
    canvas_width: usize,
    frame: &FrameEntry,
    tile: &Tile,
    (dx, dy): (usize, usize),
    threshold: u8,
) {
    let pixels = frame.to_rgba();
    let fw = frame.width as usize;
    for row in 0..tile.height {
        let src = (tile.y + row) * fw + tile.x;
        let dst = (dy + row) * canvas_width + dx;
        for (out, &p) in canvas[dst..dst + tile.width]
            .iter_mut()
            .zip(&pixels[src..src + tile.width])
        {
            *out = if is_transparent_color(p, threshold) {
                RGBA8::new(0, 0, 0, 0)
            } else {
                p
            };
        }
    }
}

/// PVR3 container around DXT data, zlib-compressed behind a u32 size prefix.
fn pvrz(dxt: &[u8], width: usize, height: usize, format: DxtFormat) -> Result<Vec<u8>, BamError> {
    let mut pvr = Vec::with_capacity(52 + dxt.len());
    pvr.extend_from_slice(&PVR3_VERSION.to_le_bytes());
    pvr.extend_from_slice(&0u32.to_le_bytes()); // flags
    pvr.extend_from_slice(&format.pvr_code().to_le_bytes());
    pvr.extend_from_slice(&0u32.to_le_bytes()); // color space
    pvr.extend_from_slice(&0u32.to_le_bytes()); // channel type
    pvr.extend_from_slice(&(height as u32).to_le_bytes());
    pvr.extend_from_slice(&(width as u32).to_le_bytes());
    for one in [1u32; 4] {
        // depth, surfaces, faces, mip levels
        pvr.extend_from_slice(&one.to_le_bytes());
    }
    pvr.extend_from_slice(&0u32.to_le_bytes()); // metadata size
    pvr.extend_from_slice(dxt);

    let mut out = Vec::with_capacity(pvr.len() / 2 + 4);
    out.extend_from_slice(&(pvr.len() as u32).to_le_bytes());
    let mut encoder = ZlibEncoder::new(out, Compression::default());
    encoder.write_all(&pvr)?;
    Ok(encoder.finish()?)
}

fn layout_v2(
    doc: &FinalDocument<'_>,
    ranges: &HashMap<usize, (u16, u16)>,
    blocks: &[DataBlock],
) -> Vec<u8> {
    let entries: Vec<usize> = doc
        .cycles
        .iter()
        .flat_map(|c| c.frames.iter().copied())
        .collect();
    let frames_offset = HEADER_SIZE;
    let cycles_offset = frames_offset + entries.len() * FRAME_ENTRY_SIZE;
    let blocks_offset = cycles_offset + doc.cycles.len() * CYCLE_ENTRY_SIZE;

    let mut out = Vec::with_capacity(blocks_offset + blocks.len() * BLOCK_SIZE);
    out.extend_from_slice(V2_SIGNATURE);
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&(doc.cycles.len() as u32).to_le_bytes());
    out.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
    out.extend_from_slice(&(frames_offset as u32).to_le_bytes());
    out.extend_from_slice(&(cycles_offset as u32).to_le_bytes());
    out.extend_from_slice(&(blocks_offset as u32).to_le_bytes());

    for &idx in &entries {
        let (w, h, cx, cy) = doc
            .frames
            .get(idx)
            .map(|f| (f.width, f.height, f.center_x, f.center_y))
            .unwrap_or_default();
        let (first, count) = ranges.get(&idx).copied().unwrap_or_default();
        out.extend_from_slice(&w.to_le_bytes());
        out.extend_from_slice(&h.to_le_bytes());
        out.extend_from_slice(&cx.to_le_bytes());
        out.extend_from_slice(&cy.to_le_bytes());
        out.extend_from_slice(&first.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
    }

    let mut start = 0usize;
    for cycle in doc.cycles {
        out.extend_from_slice(&(cycle.len() as u16).to_le_bytes());
        out.extend_from_slice(&(start as u16).to_le_bytes());
        start += cycle.len();
    }

    for b in blocks {
        for v in [b.page, b.src_x, b.src_y, b.width, b.height, b.dst_x, b.dst_y] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}
