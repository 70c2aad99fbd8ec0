#![forbid(unsafe_code)]

pub mod config;
pub mod decode;
pub mod document;
pub mod dxt;
pub mod encode;
mod encode_v1;
mod encode_v2;
pub mod error;
pub mod filter;
pub mod frame;
pub mod histogram;
pub mod median_cut;
pub mod oklab;
pub mod palette;
pub mod player;
pub mod progress;
pub mod remap;
pub mod store;

pub use config::{BamVersion, CompressionType, ConvertConfig, DxtFormat, alpha_threshold};
pub use decode::{BamContents, read_bam};
pub use document::{Document, FinalDocument, ImportMode};
pub use encode::{pvrz_file_name, write_bam};
pub use encode_v2::select_compression;
pub use error::{BamError, ImportError, ImportReport};
pub use filter::{ColorFilter, Filter, FilterChain, OutputFilter, Rotation, TransformFilter};
pub use frame::{CycleEntry, FrameEntry, FrameImage, FrameOptions};
pub use histogram::ColorHistogram;
pub use palette::{
    ColorCache, HclPalette, Palette, build_palette, nearest_color_index, reserve_transparent_index,
};
pub use player::{Advance, PlaybackMode, PlaybackState, Player};
pub use progress::{Callbacks, NoProgress, Progress};
pub use remap::{is_transparent_color, remap_frame};
pub use store::FrameStore;
