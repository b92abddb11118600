//! Tiled <-> linear conversion for Liverpool surfaces.
//!
//! Guest render targets and textures are stored in the GPU's tiled layouts. Before the host can
//! upload them as plain images they are detiled into row-major order, and GPU-written images are
//! retiled on write-back.

#![forbid(unsafe_code)]

mod addr;
mod convert;
mod error;
mod mode;

pub use crate::convert::{convert_linear_to_tiled, convert_tiled_to_linear, linear_size, tiled_size};
pub use crate::error::{Result, TileError};
pub use crate::mode::{
    TileMode, TileParams, TILING_INDEX_DISPLAY_2D_THIN, TILING_INDEX_LINEAR_ALIGNED, TILING_INDEX_THIN_1D_THIN,
};
