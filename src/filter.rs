//! The conversion filter chain.
//!
//! Color and transform filters run in list order over every frame of the
//! working copy. Output filters always run afterwards, whatever their
//! position in the list.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use rgb::RGBA8;

use crate::config::ConvertConfig;
use crate::document::FinalDocument;
use crate::encode::{OutputFiles, commit, encode_bam};
use crate::error::BamError;
use crate::frame::{FrameEntry, FrameImage, rgb_key};
use crate::progress::Progress;

/// Per-pixel (or per-palette-entry) color adjustments. Geometry is untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorFilter {
    Invert,
    /// Add a signed offset to every channel, clamped.
    Brightness(i16),
    Grayscale,
    /// Replace one exact RGB value with another, keeping alpha.
    ReplaceColor { from: RGBA8, to: RGBA8 },
}

impl ColorFilter {
    /// Apply to a frame image. Indexed frames are adjusted through their palette;
    /// fully transparent pixels are left alone.
    pub fn process(&self, image: &mut FrameImage) {
        let colors = match image {
            FrameImage::Indexed { palette, .. } => palette,
            FrameImage::Rgba(pixels) => pixels,
        };
        for c in colors.iter_mut().filter(|c| c.a > 0) {
            *c = self.apply(*c);
        }
    }

    fn apply(&self, c: RGBA8) -> RGBA8 {
        match *self {
            Self::Invert => RGBA8::new(255 - c.r, 255 - c.g, 255 - c.b, c.a),
            Self::Brightness(delta) => {
                let adj = |v: u8| (v as i16 + delta).clamp(0, 255) as u8;
                RGBA8::new(adj(c.r), adj(c.g), adj(c.b), c.a)
            }
            Self::Grayscale => {
                let y = (299 * c.r as u32 + 587 * c.g as u32 + 114 * c.b as u32 + 500) / 1000;
                let y = y.min(255) as u8;
                RGBA8::new(y, y, y, c.a)
            }
            Self::ReplaceColor { from, to } => {
                if rgb_key(c) == rgb_key(from) {
                    RGBA8::new(to.r, to.g, to.b, c.a)
                } else {
                    c
                }
            }
        }
    }
}

/// Clockwise rotation steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    R90,
    R180,
    R270,
}

/// Geometric frame transforms. These may change size and center.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformFilter {
    /// Rotate pixels; with `adjust_center` the center point follows the pixels.
    Rotate { angle: Rotation, adjust_center: bool },
    Mirror {
        horizontal: bool,
        vertical: bool,
        adjust_center: bool,
    },
    /// Shift the center point.
    CenterOffset { dx: i16, dy: i16 },
    /// Crop fully transparent borders, keeping the visible pixels anchored.
    Trim,
}

impl TransformFilter {
    pub fn process(&self, frame: FrameEntry) -> Result<FrameEntry, BamError> {
        match *self {
            Self::Rotate {
                angle,
                adjust_center,
            } => rotate(frame, angle, adjust_center),
            Self::Mirror {
                horizontal,
                vertical,
                adjust_center,
            } => Ok(mirror(frame, horizontal, vertical, adjust_center)),
            Self::CenterOffset { dx, dy } => {
                let (Some(x), Some(y)) = (
                    frame.center_x.checked_add(dx),
                    frame.center_y.checked_add(dy),
                ) else {
                    return Err(filter_error("center offset", "center point out of range"));
                };
                Ok(frame.with_center(x, y))
            }
            Self::Trim => trim(frame),
        }
    }
}

/// Terminal steps that serialize the final document.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFilter {
    /// Encode a BAM file in the configured version.
    Bam { path: PathBuf },
    /// Write each final frame as `<dir>/<prefix><nnnnn>.png`.
    ImageSequence { dir: PathBuf, prefix: String },
}

impl OutputFilter {
    fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Encode `doc` and commit the result. Nothing reaches the target names
    /// unless every file was produced.
    pub fn process(
        &self,
        doc: &FinalDocument<'_>,
        config: &ConvertConfig,
        progress: &mut dyn Progress,
    ) -> Result<(), BamError> {
        let files = self.encode(doc, config, progress)?;
        if progress.is_cancelled() {
            return Err(BamError::Cancelled);
        }
        self.prepare_target()?;
        commit(&files)?;
        log::info!("wrote {} files", files.len());
        Ok(())
    }

    /// Produce every output file in memory.
    pub(crate) fn encode(
        &self,
        doc: &FinalDocument<'_>,
        config: &ConvertConfig,
        progress: &mut dyn Progress,
    ) -> Result<OutputFiles, BamError> {
        match self {
            Self::Bam { path } => encode_bam(path, doc, config, progress),
            Self::ImageSequence { dir, prefix } => {
                encode_image_sequence(dir, prefix, doc.frames, progress)
            }
        }
    }

    /// Create the directories output files are committed into.
    pub(crate) fn prepare_target(&self) -> Result<(), BamError> {
        if let Self::ImageSequence { dir, .. } = self {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// One step of the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Color(ColorFilter),
    Transform(TransformFilter),
    Output(OutputFilter),
}

impl Filter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Color(ColorFilter::Invert) => "invert",
            Self::Color(ColorFilter::Brightness(_)) => "brightness",
            Self::Color(ColorFilter::Grayscale) => "grayscale",
            Self::Color(ColorFilter::ReplaceColor { .. }) => "replace color",
            Self::Transform(TransformFilter::Rotate { .. }) => "rotate",
            Self::Transform(TransformFilter::Mirror { .. }) => "mirror",
            Self::Transform(TransformFilter::CenterOffset { .. }) => "center offset",
            Self::Transform(TransformFilter::Trim) => "trim",
            Self::Output(OutputFilter::Bam { .. }) => "BAM output",
            Self::Output(OutputFilter::ImageSequence { .. }) => "image sequence output",
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Self::Output(_))
    }
}

/// An ordered list of filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Append a filter and return its position.
    ///
    /// An output filter of a kind already present is not added twice; the
    /// existing instance's position is returned instead.
    pub fn add(&mut self, filter: Filter) -> usize {
        self.insert(self.filters.len(), filter)
    }

    /// Insert at `pos` (clamped), with the same output uniqueness rule as [`add`](Self::add).
    pub fn insert(&mut self, pos: usize, filter: Filter) -> usize {
        if let Filter::Output(out) = &filter {
            let existing = self.filters.iter().position(|f| match f {
                Filter::Output(o) => o.same_kind(out),
                _ => false,
            });
            if let Some(idx) = existing {
                return idx;
            }
        }
        let pos = pos.min(self.filters.len());
        self.filters.insert(pos, filter);
        pos
    }

    pub fn remove(&mut self, index: usize) -> Option<Filter> {
        (index < self.filters.len()).then(|| self.filters.remove(index))
    }

    /// Swap a filter with the one `offset` positions away (clamped).
    pub fn move_filter(&mut self, index: usize, offset: isize) -> Option<usize> {
        if index >= self.filters.len() {
            return None;
        }
        let max = self.filters.len() as isize - 1;
        let target = (index as isize).saturating_add(offset).clamp(0, max) as usize;
        self.filters.swap(index, target);
        Some(target)
    }

    pub fn has_color_filters(&self) -> bool {
        self.filters.iter().any(|f| matches!(f, Filter::Color(_)))
    }

    pub fn has_output(&self) -> bool {
        self.filters.iter().any(Filter::is_output)
    }

    /// Output filters in list order.
    pub fn outputs(&self) -> impl Iterator<Item = &OutputFilter> {
        self.filters.iter().filter_map(|f| match f {
            Filter::Output(o) => Some(o),
            _ => None,
        })
    }

    pub(crate) fn outputs_mut(&mut self) -> impl Iterator<Item = &mut OutputFilter> {
        self.filters.iter_mut().filter_map(|f| match f {
            Filter::Output(o) => Some(o),
            _ => None,
        })
    }

    /// Run every color and transform filter over `frames`, in list order.
    ///
    /// The first failing filter aborts the pass.
    pub fn apply(&self, frames: Vec<FrameEntry>) -> Result<Vec<FrameEntry>, BamError> {
        let mut frames = frames;
        for filter in &self.filters {
            match filter {
                Filter::Color(f) => {
                    for frame in &mut frames {
                        f.process(&mut frame.image);
                    }
                }
                Filter::Transform(f) => {
                    frames = frames
                        .into_iter()
                        .map(|frame| f.process(frame))
                        .collect::<Result<_, _>>()?;
                }
                Filter::Output(_) => continue,
            }
            log::debug!("applied filter '{}' to {} frames", filter.name(), frames.len());
        }
        Ok(frames)
    }
}

fn filter_error(filter: &'static str, message: impl Into<String>) -> BamError {
    BamError::Filter {
        filter,
        message: message.into(),
    }
}

fn to_center(v: i32, filter: &'static str) -> Result<i16, BamError> {
    i16::try_from(v).map_err(|_| filter_error(filter, format!("center coordinate {v} out of range")))
}

fn rotate(frame: FrameEntry, angle: Rotation, adjust_center: bool) -> Result<FrameEntry, BamError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let (cx, cy) = (frame.center_x as i32, frame.center_y as i32);
    let (wi, hi) = (w as i32, h as i32);

    // Map each destination pixel back to its source; center follows the same transform.
    let (nw, nh, image, center) = match angle {
        Rotation::R90 => (
            h,
            w,
            frame.image.remap(|i| (h - 1 - i % h) * w + i / h, w * h),
            (hi - 1 - cy, cx),
        ),
        Rotation::R180 => (
            w,
            h,
            frame.image.remap(|i| w * h - 1 - i, w * h),
            (wi - 1 - cx, hi - 1 - cy),
        ),
        Rotation::R270 => (
            h,
            w,
            frame.image.remap(|i| (i % h) * w + (w - 1 - i / h), w * h),
            (cy, wi - 1 - cx),
        ),
    };

    let (center_x, center_y) = if adjust_center {
        (to_center(center.0, "rotate")?, to_center(center.1, "rotate")?)
    } else {
        (frame.center_x, frame.center_y)
    };

    Ok(FrameEntry {
        width: nw as u16,
        height: nh as u16,
        center_x,
        center_y,
        image,
        options: frame.options,
    })
}

fn mirror(frame: FrameEntry, horizontal: bool, vertical: bool, adjust_center: bool) -> FrameEntry {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let image = frame.image.remap(
        |i| {
            let (x, y) = (i % w, i / w);
            let sx = if horizontal { w - 1 - x } else { x };
            let sy = if vertical { h - 1 - y } else { y };
            sy * w + sx
        },
        w * h,
    );
    let mut out = FrameEntry { image, ..frame };
    if adjust_center {
        let flip = |extent: usize, c: i16| {
            (extent as i32 - 1 - c as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16
        };
        if horizontal {
            out.center_x = flip(w, out.center_x);
        }
        if vertical {
            out.center_y = flip(h, out.center_y);
        }
    }
    out
}

fn trim(frame: FrameEntry) -> Result<FrameEntry, BamError> {
    let (w, h) = (frame.width as usize, frame.height as usize);
    let rgba = frame.to_rgba();

    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for y in 0..h {
        for x in 0..w {
            if rgba[y * w + x].a == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x), b.max(y)),
            });
        }
    }

    let (left, top, right, bottom) = match bounds {
        Some(b) => b,
        // Nothing visible: keep a single transparent pixel.
        None if w > 0 && h > 0 => (0, 0, 0, 0),
        None => return Ok(frame),
    };
    let (nw, nh) = (right - left + 1, bottom - top + 1);
    let image = frame
        .image
        .remap(|i| (top + i / nw) * w + left + i % nw, nw * nh);

    Ok(FrameEntry {
        width: nw as u16,
        height: nh as u16,
        center_x: to_center(frame.center_x as i32 - left as i32, "trim")?,
        center_y: to_center(frame.center_y as i32 - top as i32, "trim")?,
        image,
        options: frame.options,
    })
}

fn encode_image_sequence(
    dir: &Path,
    prefix: &str,
    frames: &[FrameEntry],
    progress: &mut dyn Progress,
) -> Result<OutputFiles, BamError> {
    let mut files = Vec::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        if progress.is_cancelled() {
            return Err(BamError::Cancelled);
        }
        let raw: Vec<u8> = frame
            .to_rgba()
            .iter()
            .flat_map(|p| [p.r, p.g, p.b, p.a])
            .collect();
        let img = image::RgbaImage::from_raw(frame.width as u32, frame.height as u32, raw)
            .ok_or(BamError::ZeroDimension)?;
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        files.push((dir.join(format!("{prefix}{i:05}.png")), png));
        progress.report(i + 1, frames.len());
    }
    log::debug!("encoded {} frames for {}", frames.len(), dir.display());
    Ok(files)
}
