//! Element address math for each [`TileMode`].

use crate::error::Result;
use crate::mode::{TileMode, TileParams};

const MICRO_TILE_WIDTH: u32 = 8;
const MICRO_TILE_HEIGHT: u32 = 8;
const MICRO_TILE_PIXELS: u64 = (MICRO_TILE_WIDTH * MICRO_TILE_HEIGHT) as u64;

const LINEAR_PITCH_ALIGN: u32 = 64;

const PIPE_INTERLEAVE_BITS: u32 = 8;
const NUM_BANK_BITS: u32 = 4;
const NUM_BANKS: u32 = 1 << NUM_BANK_BITS;
const MACRO_TILE_ASPECT: u32 = 2;
/// Bytes of one 32 bpp micro tile; with bank width and height of 1 each (pipe, bank) pair owns
/// exactly one micro tile of every macro tile.
const MICRO_TILE_BYTES_32BPP: u64 = MICRO_TILE_PIXELS * 4;

fn align_up(v: u32, a: u32) -> u64 {
    u64::from(v).div_ceil(u64::from(a)) * u64::from(a)
}

#[inline]
fn bit(v: u32, n: u32) -> u32 {
    (v >> n) & 1
}

/// Element order inside an 8x8 micro tile for 1D/2D thin textures.
#[inline]
fn thin_pixel_index(x: u32, y: u32) -> u32 {
    bit(x, 0) | (bit(y, 0) << 1) | (bit(x, 1) << 2) | (bit(y, 1) << 3) | (bit(x, 2) << 4) | (bit(y, 2) << 5)
}

/// Display micro-tile order for 32 bpp.
#[inline]
fn display_pixel_index_32bpp(x: u32, y: u32) -> u32 {
    bit(x, 0) | (bit(x, 1) << 1) | (bit(y, 0) << 2) | (bit(x, 2) << 3) | (bit(y, 1) << 4) | (bit(y, 2) << 5)
}

/// P8_32x32_16x16.
#[inline]
fn pipe_p8(x: u32, y: u32) -> u32 {
    let p0 = bit(x, 4) ^ bit(y, 3) ^ bit(x, 5);
    let p1 = bit(x, 3) ^ bit(y, 4);
    let p2 = bit(x, 5) ^ bit(y, 5);
    p0 | (p1 << 1) | (p2 << 2)
}

/// P16_32x32_16x16.
#[inline]
fn pipe_p16(x: u32, y: u32) -> u32 {
    let p0 = bit(x, 3) ^ bit(y, 3) ^ bit(x, 4);
    let p1 = bit(x, 4) ^ bit(y, 4);
    let p2 = bit(x, 5) ^ bit(y, 5);
    let p3 = bit(x, 6) ^ bit(y, 6);
    p0 | (p1 << 1) | (p2 << 2) | (p3 << 3)
}

/// 16 banks, bank width and height 1.
#[inline]
fn bank(x: u32, y: u32, num_pipes: u32) -> u32 {
    let tx = x / MICRO_TILE_WIDTH / num_pipes;
    let ty = y / MICRO_TILE_HEIGHT;
    let b0 = bit(tx, 0) ^ bit(ty, 3);
    let b1 = bit(tx, 1) ^ bit(ty, 2) ^ bit(ty, 3);
    let b2 = bit(tx, 2) ^ bit(ty, 1);
    let b3 = bit(tx, 3) ^ bit(ty, 0);
    b0 | (b1 << 1) | (b2 << 2) | (b3 << 3)
}

/// Padded geometry of one surface plus the per-mode constants.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SurfaceLayout {
    mode: TileMode,
    element_size: u64,
    /// Padded row length in elements.
    pitch: u64,
    padded_height: u64,
    pipe_bits: u32,
}

impl SurfaceLayout {
    pub(crate) fn new(params: &TileParams) -> Result<Self> {
        params.validate()?;
        let element_size = u64::from(params.element_size);
        let pipe_bits = if params.neo { 4 } else { 3 };
        let (pitch, padded_height) = match params.mode {
            TileMode::Linear => (align_up(params.width, LINEAR_PITCH_ALIGN), u64::from(params.height)),
            TileMode::TextureTiled => (
                align_up(params.width, MICRO_TILE_WIDTH),
                align_up(params.height, MICRO_TILE_HEIGHT),
            ),
            TileMode::VideoOutTiled => {
                let num_pipes = 1u32 << pipe_bits;
                let macro_width = MICRO_TILE_WIDTH * num_pipes * MACRO_TILE_ASPECT;
                let macro_height = MICRO_TILE_HEIGHT * NUM_BANKS / MACRO_TILE_ASPECT;
                (align_up(params.width, macro_width), align_up(params.height, macro_height))
            }
        };
        Ok(Self {
            mode: params.mode,
            element_size,
            pitch,
            padded_height,
            pipe_bits,
        })
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        self.pitch * self.padded_height * self.element_size
    }

    /// Byte offset of element (x, y) in the tiled surface.
    pub(crate) fn offset(&self, x: u32, y: u32) -> u64 {
        match self.mode {
            TileMode::Linear => (u64::from(y) * self.pitch + u64::from(x)) * self.element_size,
            TileMode::TextureTiled => {
                let tiles_per_row = self.pitch / u64::from(MICRO_TILE_WIDTH);
                let tile = u64::from(y / MICRO_TILE_HEIGHT) * tiles_per_row + u64::from(x / MICRO_TILE_WIDTH);
                let index = u64::from(thin_pixel_index(x % MICRO_TILE_WIDTH, y % MICRO_TILE_HEIGHT));
                (tile * MICRO_TILE_PIXELS + index) * self.element_size
            }
            TileMode::VideoOutTiled => self.macro_tiled_offset(x, y),
        }
    }

    fn macro_tiled_offset(&self, x: u32, y: u32) -> u64 {
        let num_pipes = 1u32 << self.pipe_bits;
        let macro_width = MICRO_TILE_WIDTH * num_pipes * MACRO_TILE_ASPECT;
        let macro_height = MICRO_TILE_HEIGHT * NUM_BANKS / MACRO_TILE_ASPECT;
        let macro_tiles_per_row = self.pitch / u64::from(macro_width);
        let macro_tile = u64::from(y / macro_height) * macro_tiles_per_row + u64::from(x / macro_width);

        let element = u64::from(display_pixel_index_32bpp(x % MICRO_TILE_WIDTH, y % MICRO_TILE_HEIGHT)) * 4;
        let total = macro_tile * MICRO_TILE_BYTES_32BPP + element;

        let pipe = if self.pipe_bits == 4 { pipe_p16(x, y) } else { pipe_p8(x, y) };
        let bank = bank(x, y, num_pipes);

        let interleave_mask = (1u64 << PIPE_INTERLEAVE_BITS) - 1;
        (total & interleave_mask)
            | (u64::from(pipe) << PIPE_INTERLEAVE_BITS)
            | (u64::from(bank) << (PIPE_INTERLEAVE_BITS + self.pipe_bits))
            | ((total >> PIPE_INTERLEAVE_BITS) << (PIPE_INTERLEAVE_BITS + self.pipe_bits + NUM_BANK_BITS))
    }
}
