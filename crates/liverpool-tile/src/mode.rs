use crate::error::{Result, TileError};

/// `GB_TILE_MODE` index of the linear-aligned display mode.
pub const TILING_INDEX_LINEAR_ALIGNED: u32 = 8;
/// `GB_TILE_MODE` index of 2D thin display tiling (scan-out buffers).
pub const TILING_INDEX_DISPLAY_2D_THIN: u32 = 10;
/// `GB_TILE_MODE` index of 1D thin tiling (sampled textures).
pub const TILING_INDEX_THIN_1D_THIN: u32 = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TileMode {
    /// Rows padded to 64 elements, no swizzle.
    Linear,
    /// 2D macro tiling with display micro-tile order, 32 bpp only.
    VideoOutTiled,
    /// 1D thin micro tiling (8x8 micro tiles in row-major order).
    TextureTiled,
}

impl TileMode {
    pub fn from_tiling_index(index: u32) -> Result<Self> {
        match index {
            TILING_INDEX_LINEAR_ALIGNED => Ok(Self::Linear),
            TILING_INDEX_DISPLAY_2D_THIN => Ok(Self::VideoOutTiled),
            TILING_INDEX_THIN_1D_THIN => Ok(Self::TextureTiled),
            other => Err(TileError::UnsupportedTilingIndex(other)),
        }
    }

    pub fn supports_element_size(self, element_size: u32) -> bool {
        match self {
            Self::VideoOutTiled => element_size == 4,
            Self::Linear | Self::TextureTiled => matches!(element_size, 1 | 2 | 4 | 8 | 16),
        }
    }
}

/// Surface description shared by [`crate::tiled_size`] and the conversions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileParams {
    pub mode: TileMode,
    pub width: u32,
    pub height: u32,
    /// Bytes per element.
    pub element_size: u32,
    /// Selects the 16-pipe configuration of the enhanced hardware.
    pub neo: bool,
}

impl TileParams {
    /// 32-bit scan-out surface.
    pub fn video_out(width: u32, height: u32, neo: bool) -> Self {
        Self {
            mode: TileMode::VideoOutTiled,
            width,
            height,
            element_size: 4,
            neo,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.mode.supports_element_size(self.element_size) {
            return Err(TileError::UnsupportedElementSize {
                mode: self.mode,
                element_size: self.element_size,
            });
        }
        Ok(())
    }
}
