use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BamError {
    #[error("image dimensions cannot be zero")]
    ZeroDimension,

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch {
        len: usize,
        width: usize,
        height: usize,
    },

    #[error("transparency threshold must be between 0 and 100 percent, got {0}")]
    InvalidThreshold(u8),

    #[error("max_colors must be between 2 and 256, got {0}")]
    InvalidMaxColors(u16),

    #[error("PVRZ page offset {0} leaves no room below 100000")]
    InvalidPageOffset(u32),

    #[error("{what} count {count} exceeds the format limit of {limit}")]
    TooMany {
        what: &'static str,
        count: usize,
        limit: usize,
    },

    #[error("no output target configured")]
    NoOutputTarget,

    #[error("unsupported image input: {0}")]
    UnsupportedImage(String),

    #[error("malformed BAM data: {0}")]
    Malformed(&'static str),

    #[error("filter '{filter}' failed: {message}")]
    Filter {
        filter: &'static str,
        message: String,
    },

    #[error("conversion cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// A single input file that could not be imported.
#[derive(Debug, Error)]
#[error("failed to import {}: {source}", path.display())]
pub struct ImportError {
    pub path: PathBuf,
    #[source]
    pub source: BamError,
}

/// Outcome of a batch import: how many frames went in, which files were skipped.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: Vec<ImportError>,
    pub cancelled: bool,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }
}
