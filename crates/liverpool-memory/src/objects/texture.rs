use liverpool_shader::guest_memory::read_ranges;
use liverpool_shader::{GuestRange, TextureResource};
use liverpool_tile::{convert_tiled_to_linear, tiled_size, TileError, TileMode, TileParams};
use tracing::trace;

use super::{
    create_image, expect_image, sampled_usage, GpuObject, GpuObjectType, HostResource, ObjectParams, UpdateFn,
};
use crate::backend::{HostFormat, ImageDesc};
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};

const PARAM_DFMT: usize = 0;
const PARAM_NFMT: usize = 1;
const PARAM_WIDTH: usize = 2;
const PARAM_HEIGHT: usize = 3;
const PARAM_LEVELS: usize = 4;
const PARAM_TILING_INDEX: usize = 5;
const PARAM_NEO: usize = 6;
const PARAM_PITCH: usize = 7;

/// Sampled 2D texture described by a `T#`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureObject {
    pub dfmt: u32,
    pub nfmt: u32,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub tiling_index: u32,
    pub neo: bool,
    /// Padded row length in texels of the top level.
    pub pitch: u32,
}

impl TextureObject {
    /// Takes dimensions, mip range, tiling and pitch from the descriptor.
    pub fn from_descriptor(desc: &TextureResource, neo: bool) -> Self {
        let levels = u32::from(desc.last_level()).saturating_sub(u32::from(desc.base_level())) + 1;
        Self {
            dfmt: u32::from(desc.dfmt()),
            nfmt: u32::from(desc.nfmt()),
            width: u32::from(desc.width()) + 1,
            height: u32::from(desc.height()) + 1,
            levels,
            tiling_index: u32::from(desc.tiling_idx()),
            neo,
            pitch: u32::from(desc.pitch()) + 1,
        }
    }

    fn from_params(params: &ObjectParams) -> Self {
        Self {
            dfmt: params[PARAM_DFMT] as u32,
            nfmt: params[PARAM_NFMT] as u32,
            width: params[PARAM_WIDTH] as u32,
            height: params[PARAM_HEIGHT] as u32,
            levels: params[PARAM_LEVELS] as u32,
            tiling_index: params[PARAM_TILING_INDEX] as u32,
            neo: params[PARAM_NEO] != 0,
            pitch: params[PARAM_PITCH] as u32,
        }
    }

    fn host_format(&self) -> Result<HostFormat> {
        match (self.dfmt, self.nfmt) {
            (10, 0) => Ok(HostFormat::R8G8B8A8Unorm),
            (10, 9) => Ok(HostFormat::R8G8B8A8Srgb),
            (4, 7) => Ok(HostFormat::R32Sfloat),
            (14, 7) => Ok(HostFormat::R32G32B32A32Sfloat),
            (dfmt, nfmt) => Err(GpuMemoryError::not_implemented(
                GpuObjectType::Texture,
                "texture format",
                format!("dfmt {dfmt} nfmt {nfmt}"),
            )),
        }
    }

    /// Tile parameters and visible width of one mip level.
    fn level_layout(&self, mode: TileMode, element_size: u32, level: u32) -> (TileParams, u32) {
        let width = (self.width >> level).max(1);
        let height = (self.height >> level).max(1);
        let pitch = (self.pitch >> level).max(width);
        let params = TileParams {
            mode,
            width: pitch,
            height,
            element_size,
            neo: self.neo,
        };
        (params, width)
    }
}

fn update(ctx: &mut GraphicContext<'_>, params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    let texture = TextureObject::from_params(params);
    let image = expect_image(GpuObjectType::Texture, resource)?;
    let mode = TileMode::from_tiling_index(texture.tiling_index)?;
    let es = image.format.bytes_per_texel();
    let data = read_ranges(ctx.guest, ranges)?;

    let mut offset = 0usize;
    for level in 0..texture.levels {
        let (tile, width) = texture.level_layout(mode, es, level);
        let size = tiled_size(&tile)? as usize;
        let src = data.get(offset..offset + size).ok_or(TileError::BufferTooSmall {
            mode,
            needed: (offset + size) as u64,
            actual: data.len(),
        })?;
        let mut linear = vec![0u8; size];
        convert_tiled_to_linear(&mut linear, src, &tile)?;

        let padded_row = tile.width as usize * es as usize;
        let row = width as usize * es as usize;
        let texels: Vec<u8> = linear
            .chunks_exact(padded_row)
            .take(tile.height as usize)
            .flat_map(|r| &r[..row])
            .copied()
            .collect();
        ctx.backend.upload_image(image.image, level, &texels)?;
        offset += size;
    }

    trace!(
        dfmt = texture.dfmt,
        nfmt = texture.nfmt,
        width = texture.width,
        height = texture.height,
        levels = texture.levels,
        ?mode,
        "texture update"
    );
    Ok(())
}

impl GpuObject for TextureObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::Texture
    }

    fn params(&self) -> ObjectParams {
        let mut params = ObjectParams::default();
        params[PARAM_DFMT] = u64::from(self.dfmt);
        params[PARAM_NFMT] = u64::from(self.nfmt);
        params[PARAM_WIDTH] = u64::from(self.width);
        params[PARAM_HEIGHT] = u64::from(self.height);
        params[PARAM_LEVELS] = u64::from(self.levels);
        params[PARAM_TILING_INDEX] = u64::from(self.tiling_index);
        params[PARAM_NEO] = u64::from(self.neo);
        params[PARAM_PITCH] = u64::from(self.pitch);
        params
    }

    fn read_only(&self) -> bool {
        true
    }

    fn check_hash(&self) -> bool {
        true
    }

    fn equal(&self, existing: &ObjectParams) -> bool {
        let other = Self::from_params(existing);
        Self { neo: self.neo, ..other } == *self
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, _ranges: &[GuestRange]) -> Result<HostResource> {
        let object = self.object_type();
        let format = self.host_format()?;
        TileMode::from_tiling_index(self.tiling_index)?;
        if self.width == 0 || self.height == 0 || self.levels == 0 {
            return Err(GpuMemoryError::not_implemented(
                object,
                "empty texture",
                format!("{}x{} with {} levels", self.width, self.height, self.levels),
            ));
        }
        let desc = ImageDesc {
            format,
            width: self.width,
            height: self.height,
            mip_levels: self.levels,
            usage: sampled_usage(),
        };
        Ok(HostResource::Image(create_image(ctx.backend, object, &desc, None)?))
    }

    fn updater(&self) -> Option<UpdateFn> {
        Some(update)
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba8(width: u32, height: u32) -> TextureObject {
        TextureObject {
            dfmt: 10,
            nfmt: 0,
            width,
            height,
            levels: 1,
            tiling_index: liverpool_tile::TILING_INDEX_THIN_1D_THIN,
            neo: false,
            pitch: width,
        }
    }

    #[test]
    fn descriptor_fields_map_to_params() {
        let mut desc = TextureResource::default();
        desc.fields[1] = (10 << 20) | (9 << 26);
        desc.fields[2] = 63 | (31 << 14);
        desc.fields[3] = (2 << 16) | (13 << 20);
        desc.fields[4] = 63 << 13;
        let tex = TextureObject::from_descriptor(&desc, true);
        assert_eq!(
            tex,
            TextureObject {
                dfmt: 10,
                nfmt: 9,
                width: 64,
                height: 32,
                levels: 3,
                tiling_index: 13,
                neo: true,
                pitch: 64,
            }
        );
    }

    #[test]
    fn equality_covers_everything_but_neo() {
        let a = rgba8(16, 16);
        assert!(a.equal(&TextureObject { neo: true, ..a }.params()));
        assert!(!a.equal(&TextureObject { pitch: 32, ..a }.params()));
        assert!(!a.equal(&TextureObject { nfmt: 9, ..a }.params()));
    }

    #[test]
    fn unsupported_format_is_reported() {
        let tex = TextureObject { dfmt: 3, ..rgba8(4, 4) };
        assert!(matches!(
            tex.host_format(),
            Err(GpuMemoryError::NotImplemented {
                object: GpuObjectType::Texture,
                ..
            })
        ));
    }

    #[test]
    fn mip_pitch_never_drops_below_width() {
        let tex = TextureObject { pitch: 20, ..rgba8(17, 8) };
        let (params, width) = tex.level_layout(TileMode::TextureTiled, 4, 1);
        assert_eq!((params.width, params.height, width), (10, 4, 8));
        let (params, width) = tex.level_layout(TileMode::TextureTiled, 4, 5);
        assert_eq!((params.width, params.height, width), (1, 1, 1));
    }
}
