use tracing::trace;

use crate::addr::SurfaceLayout;
use crate::error::{Result, TileError};
use crate::mode::{TileMode, TileParams};

/// Bytes the tiled surface occupies, including padding to whole tiles.
pub fn tiled_size(params: &TileParams) -> Result<u64> {
    Ok(SurfaceLayout::new(params)?.size_bytes())
}

/// Bytes of the unpadded row-major image.
pub fn linear_size(params: &TileParams) -> u64 {
    u64::from(params.width) * u64::from(params.height) * u64::from(params.element_size)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    TiledToLinear,
    LinearToTiled,
}

fn check_buffers(params: &TileParams, dst: &[u8], src: &[u8]) -> Result<SurfaceLayout> {
    let layout = SurfaceLayout::new(params)?;
    if src.len() != dst.len() {
        return Err(TileError::LengthMismatch {
            src: src.len(),
            dst: dst.len(),
        });
    }
    let needed = layout.size_bytes().max(linear_size(params));
    if (src.len() as u64) < needed {
        return Err(TileError::BufferTooSmall {
            mode: params.mode,
            needed,
            actual: src.len(),
        });
    }
    Ok(layout)
}

fn convert(dst: &mut [u8], src: &[u8], params: &TileParams, direction: Direction) -> Result<()> {
    let layout = check_buffers(params, dst, src)?;
    dst.fill(0);

    let es = params.element_size as usize;
    let row_bytes = params.width as usize * es;
    for y in 0..params.height {
        let linear_row = y as usize * row_bytes;
        if params.mode == TileMode::Linear {
            let tiled_row = layout.offset(0, y) as usize;
            let (d, s) = match direction {
                Direction::TiledToLinear => (linear_row, tiled_row),
                Direction::LinearToTiled => (tiled_row, linear_row),
            };
            dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
            continue;
        }
        for x in 0..params.width {
            let linear = linear_row + x as usize * es;
            let tiled = layout.offset(x, y) as usize;
            let (d, s) = match direction {
                Direction::TiledToLinear => (linear, tiled),
                Direction::LinearToTiled => (tiled, linear),
            };
            dst[d..d + es].copy_from_slice(&src[s..s + es]);
        }
    }

    trace!(
        mode = ?params.mode,
        width = params.width,
        height = params.height,
        element_size = params.element_size,
        neo = params.neo,
        bytes = src.len(),
        "tile conversion"
    );
    Ok(())
}

/// Detiles `src` into the row-major image in `dst`. Bytes past the image are zeroed.
pub fn convert_tiled_to_linear(dst: &mut [u8], src: &[u8], params: &TileParams) -> Result<()> {
    convert(dst, src, params, Direction::TiledToLinear)
}

/// Tiles the row-major image in `src` into `dst`. Padding bytes are zeroed.
pub fn convert_linear_to_tiled(dst: &mut [u8], src: &[u8], params: &TileParams) -> Result<()> {
    convert(dst, src, params, Direction::LinearToTiled)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn texture(width: u32, height: u32, element_size: u32) -> TileParams {
        TileParams {
            mode: TileMode::TextureTiled,
            width,
            height,
            element_size,
            neo: false,
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(tiled_size(&texture(13, 9, 4)).unwrap(), 16 * 16 * 4);
        assert_eq!(tiled_size(&TileParams::video_out(1920, 1080, false)).unwrap(), 1920 * 1088 * 4);
        let linear = TileParams {
            mode: TileMode::Linear,
            ..texture(100, 3, 2)
        };
        assert_eq!(tiled_size(&linear).unwrap(), 128 * 3 * 2);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut dst = vec![0u8; 1024];
        let src = vec![0u8; 2048];
        assert_eq!(
            convert_tiled_to_linear(&mut dst, &src, &texture(8, 8, 4)),
            Err(TileError::LengthMismatch { src: 2048, dst: 1024 })
        );
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut dst = vec![0u8; 100];
        let src = vec![0u8; 100];
        assert!(matches!(
            convert_linear_to_tiled(&mut dst, &src, &texture(8, 8, 4)),
            Err(TileError::BufferTooSmall { needed: 256, actual: 100, .. })
        ));
    }

    #[test]
    fn texture_micro_tile_order() {
        // 8x8 R8 surface: one micro tile, element (x, y) holds x + 8y.
        let linear: Vec<u8> = (0..64).collect();
        let mut tiled = vec![0u8; 64];
        convert_linear_to_tiled(&mut tiled, &linear, &texture(8, 8, 1)).unwrap();
        assert_eq!(&tiled[..8], &[0, 1, 8, 9, 2, 3, 10, 11]);
    }

    #[test]
    fn linear_rows_are_repitched() {
        let params = TileParams {
            mode: TileMode::Linear,
            ..texture(2, 2, 1)
        };
        let mut linear = vec![0u8; 128];
        linear[..4].copy_from_slice(&[1, 2, 3, 4]);
        let mut tiled = vec![0xffu8; 128];
        convert_linear_to_tiled(&mut tiled, &linear, &params).unwrap();
        assert_eq!(&tiled[..2], &[1, 2]);
        assert_eq!(&tiled[64..66], &[3, 4]);
        assert!(tiled[2..64].iter().all(|b| *b == 0));
    }
}
