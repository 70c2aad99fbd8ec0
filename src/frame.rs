use std::collections::BTreeMap;

use rgb::RGBA8;

use crate::error::BamError;

/// Pack the color channels of a pixel into a 24-bit key.
#[inline]
pub fn rgb_key(p: RGBA8) -> u32 {
    (p.r as u32) << 16 | (p.g as u32) << 8 | p.b as u32
}

/// Unpack a 24-bit key into an opaque pixel.
#[inline]
pub fn key_rgb(key: u32) -> RGBA8 {
    RGBA8::new((key >> 16) as u8, (key >> 8) as u8, key as u8, 255)
}

/// Pixel storage of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameImage {
    /// One byte per pixel indexing into a frame-local palette.
    Indexed { pixels: Vec<u8>, palette: Vec<RGBA8> },
    /// 32-bit truecolor.
    Rgba(Vec<RGBA8>),
}

impl FrameImage {
    pub fn pixel_count(&self) -> usize {
        match self {
            Self::Indexed { pixels, .. } => pixels.len(),
            Self::Rgba(pixels) => pixels.len(),
        }
    }

    /// Expand to truecolor. Indices past the end of the palette read as transparent black.
    pub fn to_rgba(&self) -> Vec<RGBA8> {
        match self {
            Self::Indexed { pixels, palette } => pixels
                .iter()
                .map(|&i| {
                    palette
                        .get(i as usize)
                        .copied()
                        .unwrap_or(RGBA8::new(0, 0, 0, 0))
                })
                .collect(),
            Self::Rgba(pixels) => pixels.clone(),
        }
    }

    /// Reorder pixels by a source-index lookup, used by geometric transforms.
    pub(crate) fn remap(&self, source_of: impl Fn(usize) -> usize, len: usize) -> Self {
        match self {
            Self::Indexed { pixels, palette } => Self::Indexed {
                pixels: (0..len).map(|i| pixels[source_of(i)]).collect(),
                palette: palette.clone(),
            },
            Self::Rgba(pixels) => Self::Rgba((0..len).map(|i| pixels[source_of(i)]).collect()),
        }
    }
}

/// Per-frame encoding options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameOptions {
    /// Store this frame RLE-compressed when the V1 encoder permits it.
    pub compressed: bool,
    /// Palette index used as the RLE escape; `None` defers to the transparent index.
    pub rle_index: Option<u8>,
    pub label: String,
    /// Free-form options carried through conversion untouched.
    pub extra: BTreeMap<String, String>,
}

/// One animation frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEntry {
    pub width: u16,
    pub height: u16,
    pub center_x: i16,
    pub center_y: i16,
    pub image: FrameImage,
    pub options: FrameOptions,
}

impl FrameEntry {
    /// Build a truecolor frame, validating the buffer size.
    pub fn from_rgba(width: u16, height: u16, pixels: Vec<RGBA8>) -> Result<Self, BamError> {
        validate(pixels.len(), width, height)?;
        Ok(Self {
            width,
            height,
            center_x: 0,
            center_y: 0,
            image: FrameImage::Rgba(pixels),
            options: FrameOptions {
                compressed: true,
                ..FrameOptions::default()
            },
        })
    }

    /// Build a palette-indexed frame, validating the buffer size.
    pub fn from_indexed(
        width: u16,
        height: u16,
        pixels: Vec<u8>,
        palette: Vec<RGBA8>,
    ) -> Result<Self, BamError> {
        validate(pixels.len(), width, height)?;
        Ok(Self {
            width,
            height,
            center_x: 0,
            center_y: 0,
            image: FrameImage::Indexed { pixels, palette },
            options: FrameOptions {
                compressed: true,
                ..FrameOptions::default()
            },
        })
    }

    pub fn with_center(mut self, x: i16, y: i16) -> Self {
        self.center_x = x;
        self.center_y = y;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.options.label = label.into();
        self
    }

    pub fn to_rgba(&self) -> Vec<RGBA8> {
        self.image.to_rgba()
    }
}

fn validate(len: usize, width: u16, height: u16) -> Result<(), BamError> {
    if len != width as usize * height as usize {
        return Err(BamError::DimensionMismatch {
            len,
            width: width as usize,
            height: height as usize,
        });
    }
    Ok(())
}

/// A sequence of frame positions. Repeats are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleEntry {
    pub frames: Vec<usize>,
    pub label: String,
}

impl CycleEntry {
    pub fn new(frames: Vec<usize>) -> Self {
        Self {
            frames,
            label: String::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
