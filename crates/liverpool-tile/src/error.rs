use thiserror::Error;

use crate::mode::TileMode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TileError {
    #[error("{mode:?} surface needs {needed} bytes but the buffer holds {actual}")]
    BufferTooSmall { mode: TileMode, needed: u64, actual: usize },

    #[error("source is {src} bytes but destination is {dst} bytes")]
    LengthMismatch { src: usize, dst: usize },

    #[error("tiling index {0} is not implemented")]
    UnsupportedTilingIndex(u32),

    #[error("{mode:?} does not support {element_size}-byte elements")]
    UnsupportedElementSize { mode: TileMode, element_size: u32 },
}

pub type Result<T> = std::result::Result<T, TileError>;
