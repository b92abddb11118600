use liverpool_shader::guest_memory::read_ranges;
use liverpool_shader::GuestRange;
use liverpool_tile::{convert_tiled_to_linear, tiled_size, TileParams};
use tracing::trace;

use super::{
    create_image, expect_image, total_size, GpuObject, GpuObjectType, HostResource, ObjectParams, UpdateFn,
};
use crate::backend::{HostFormat, ImageDesc, ImageUsage};
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};

/// `SCE_VIDEO_OUT_PIXEL_FORMAT_B8_G8_R8_A8_SRGB`.
pub const VIDEO_OUT_FORMAT_B8G8R8A8_SRGB: u32 = 0x8000_0000;

const PARAM_FORMAT: usize = 0;
const PARAM_WIDTH: usize = 1;
const PARAM_HEIGHT: usize = 2;
const PARAM_TILED: usize = 3;
const PARAM_NEO: usize = 4;

/// A scan-out surface registered with the video output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoOutBufferObject {
    pub format: u32,
    pub width: u32,
    pub height: u32,
    pub tiled: bool,
    pub neo: bool,
}

impl VideoOutBufferObject {
    pub fn new(format: u32, width: u32, height: u32, tiled: bool, neo: bool) -> Self {
        Self {
            format,
            width,
            height,
            tiled,
            neo,
        }
    }

    fn from_params(params: &ObjectParams) -> Self {
        Self {
            format: params[PARAM_FORMAT] as u32,
            width: params[PARAM_WIDTH] as u32,
            height: params[PARAM_HEIGHT] as u32,
            tiled: params[PARAM_TILED] != 0,
            neo: params[PARAM_NEO] != 0,
        }
    }

    fn linear_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// A cleared surface is the same 64-bit pattern everywhere, so it reads the same tiled or not.
fn buffer_is_tiled(data: &[u8]) -> bool {
    if data.len() % 8 != 0 {
        return true;
    }
    let mut words = data.chunks_exact(8);
    let Some(first) = words.next() else {
        return false;
    };
    words.any(|w| w != first)
}

fn update(ctx: &mut GraphicContext<'_>, params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    let object = VideoOutBufferObject::from_params(params);
    let image = expect_image(GpuObjectType::VideoOutBuffer, resource)?;
    let mut data = read_ranges(ctx.guest, ranges)?;
    let linear_size = object.linear_size();

    let detile = object.tiled && buffer_is_tiled(&data);
    let mut pixels = if detile {
        let tile = TileParams::video_out(object.width, object.height, object.neo);
        let needed = (tiled_size(&tile)? as usize).max(linear_size);
        data.resize(needed, 0);
        let mut linear = vec![0u8; needed];
        convert_tiled_to_linear(&mut linear, &data, &tile)?;
        linear
    } else {
        data
    };
    pixels.resize(linear_size, 0);

    trace!(
        width = object.width,
        height = object.height,
        tiled = object.tiled,
        detile,
        "video out buffer update"
    );
    ctx.backend.upload_image(image.image, 0, &pixels)?;
    Ok(())
}

impl GpuObject for VideoOutBufferObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::VideoOutBuffer
    }

    fn params(&self) -> ObjectParams {
        let mut params = ObjectParams::default();
        params[PARAM_FORMAT] = u64::from(self.format);
        params[PARAM_WIDTH] = u64::from(self.width);
        params[PARAM_HEIGHT] = u64::from(self.height);
        params[PARAM_TILED] = u64::from(self.tiled);
        params[PARAM_NEO] = u64::from(self.neo);
        params
    }

    fn read_only(&self) -> bool {
        false
    }

    fn equal(&self, existing: &ObjectParams) -> bool {
        let other = Self::from_params(existing);
        self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.tiled == other.tiled
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange]) -> Result<HostResource> {
        let object = self.object_type();
        if self.format != VIDEO_OUT_FORMAT_B8G8R8A8_SRGB {
            return Err(GpuMemoryError::not_implemented(
                object,
                "pixel format",
                format!("0x{:08x}", self.format),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(GpuMemoryError::not_implemented(
                object,
                "empty surface",
                format!("{}x{}", self.width, self.height),
            ));
        }
        let desc = ImageDesc {
            format: HostFormat::B8G8R8A8Srgb,
            width: self.width,
            height: self.height,
            mip_levels: 1,
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
        };
        let image = create_image(ctx.backend, object, &desc, Some(total_size(ranges)))?;
        Ok(HostResource::Image(image))
    }

    fn updater(&self) -> Option<UpdateFn> {
        Some(update)
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}
