use serde::{Deserialize, Serialize};

use crate::error::BamError;

/// Largest PVRZ page number the engine resolves (`MOSnnnn` holds four digits plus overflow).
pub const MAX_PAGE_INDEX: u32 = 100_000;

/// Target BAM flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BamVersion {
    /// Palette-indexed frames with optional RLE.
    #[default]
    V1,
    /// Truecolor frames block-compressed into PVRZ pages.
    V2,
}

/// Texture compression used for V2 pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressionType {
    /// Scan the frames and pick DXT1 unless semi-transparent pixels exist.
    #[default]
    Auto,
    /// Binary alpha only.
    Dxt1,
    /// Interpolated alpha.
    Dxt5,
}

/// Resolved V2 compression after auto-selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DxtFormat {
    Dxt1,
    Dxt5,
}

impl DxtFormat {
    /// PVR3 pixel format identifier.
    pub fn pvr_code(self) -> u64 {
        match self {
            Self::Dxt1 => 7,
            Self::Dxt5 => 11,
        }
    }

    /// Bytes per 4x4 block.
    pub fn block_size(self) -> usize {
        match self {
            Self::Dxt1 => 8,
            Self::Dxt5 => 16,
        }
    }
}

/// Conversion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Output format version.
    pub version: BamVersion,
    /// Pixels with alpha below this percentage of 255 become transparent (0..=100).
    pub transparency_threshold: u8,
    /// Allow RLE for frames whose `compressed` option is set (V1).
    pub compress_rle: bool,
    /// Wrap V1 output in a zlib-compressed BAMC container.
    pub compress_bamc: bool,
    /// V2 texture compression.
    pub compression: CompressionType,
    /// First PVRZ page index used for V2 output.
    pub page_offset: u32,
    /// Palette size for V1 output (2..=256).
    pub max_colors: u16,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            version: BamVersion::V1,
            transparency_threshold: 5,
            compress_rle: true,
            compress_bamc: false,
            compression: CompressionType::Auto,
            page_offset: 1000,
            max_colors: 256,
        }
    }
}

impl ConvertConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(mut self, version: BamVersion) -> Self {
        self.version = version;
        self
    }

    pub fn transparency_threshold(mut self, percent: u8) -> Self {
        self.transparency_threshold = percent;
        self
    }

    pub fn compress_rle(mut self, enabled: bool) -> Self {
        self.compress_rle = enabled;
        self
    }

    pub fn compress_bamc(mut self, enabled: bool) -> Self {
        self.compress_bamc = enabled;
        self
    }

    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn page_offset(mut self, offset: u32) -> Self {
        self.page_offset = offset;
        self
    }

    pub fn max_colors(mut self, n: u16) -> Self {
        self.max_colors = n;
        self
    }

    /// The alpha cutoff in `[0, 255]` derived from the threshold percentage.
    pub fn alpha_threshold(&self) -> u8 {
        alpha_threshold(self.transparency_threshold)
    }

    pub fn validate(&self) -> Result<(), BamError> {
        if self.transparency_threshold > 100 {
            return Err(BamError::InvalidThreshold(self.transparency_threshold));
        }
        if self.max_colors < 2 || self.max_colors > 256 {
            return Err(BamError::InvalidMaxColors(self.max_colors));
        }
        if self.page_offset >= MAX_PAGE_INDEX {
            return Err(BamError::InvalidPageOffset(self.page_offset));
        }
        Ok(())
    }
}

/// Map a percentage to an alpha cutoff. Monotonic in `percent`; values above 100 saturate.
pub fn alpha_threshold(percent: u8) -> u8 {
    let percent = u32::from(percent.min(100));
    ((percent * 255 + 50) / 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ConvertConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            ConvertConfig::new().transparency_threshold(101).validate(),
            Err(BamError::InvalidThreshold(101))
        ));
        assert!(matches!(
            ConvertConfig::new().max_colors(1).validate(),
            Err(BamError::InvalidMaxColors(1))
        ));
        assert!(matches!(
            ConvertConfig::new().page_offset(MAX_PAGE_INDEX).validate(),
            Err(BamError::InvalidPageOffset(_))
        ));
    }

    #[test]
    fn threshold_mapping_is_monotonic() {
        let mut prev = 0;
        for p in 0..=100u8 {
            let t = alpha_threshold(p);
            assert!(t >= prev);
            prev = t;
        }
        assert_eq!(alpha_threshold(0), 0);
        assert_eq!(alpha_threshold(100), 255);
        assert_eq!(alpha_threshold(5), 13);
    }
}
