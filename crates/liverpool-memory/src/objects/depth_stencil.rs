use liverpool_shader::GuestRange;

use super::{create_image, GpuObject, GpuObjectType, HostResource, ObjectParams};
use crate::backend::{HostFormat, ImageDesc, ImageUsage};
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};

const PARAM_FORMAT: usize = 0;
const PARAM_STENCIL: usize = 1;
const PARAM_WIDTH: usize = 2;
const PARAM_HEIGHT: usize = 3;
const PARAM_HTILE: usize = 4;
const PARAM_NEO: usize = 5;

/// `DB_Z_INFO.FORMAT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DepthFormat {
    Z16 = 1,
    Z32Float = 3,
}

impl DepthFormat {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Z16),
            3 => Some(Self::Z32Float),
            _ => None,
        }
    }

    fn host_format(self, stencil: bool) -> HostFormat {
        match (self, stencil) {
            (Self::Z16, false) => HostFormat::D16Unorm,
            (Self::Z16, true) => HostFormat::D16UnormS8Uint,
            (Self::Z32Float, false) => HostFormat::D32Sfloat,
            (Self::Z32Float, true) => HostFormat::D32SfloatS8Uint,
        }
    }
}

/// Depth (and optional stencil) render target. The host keeps the only copy: there is no
/// update from guest memory and no write-back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilBufferObject {
    /// Raw `DB_Z_INFO.FORMAT`; see [`DepthFormat`].
    pub format: u32,
    pub stencil: bool,
    pub width: u32,
    pub height: u32,
    pub htile: bool,
    pub neo: bool,
}

impl DepthStencilBufferObject {
    fn from_params(params: &ObjectParams) -> Self {
        Self {
            format: params[PARAM_FORMAT] as u32,
            stencil: params[PARAM_STENCIL] != 0,
            width: params[PARAM_WIDTH] as u32,
            height: params[PARAM_HEIGHT] as u32,
            htile: params[PARAM_HTILE] != 0,
            neo: params[PARAM_NEO] != 0,
        }
    }
}

impl GpuObject for DepthStencilBufferObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::DepthStencilBuffer
    }

    fn params(&self) -> ObjectParams {
        let mut params = ObjectParams::default();
        params[PARAM_FORMAT] = u64::from(self.format);
        params[PARAM_STENCIL] = u64::from(self.stencil);
        params[PARAM_WIDTH] = u64::from(self.width);
        params[PARAM_HEIGHT] = u64::from(self.height);
        params[PARAM_HTILE] = u64::from(self.htile);
        params[PARAM_NEO] = u64::from(self.neo);
        params
    }

    fn read_only(&self) -> bool {
        false
    }

    fn equal(&self, existing: &ObjectParams) -> bool {
        let other = Self::from_params(existing);
        self.format == other.format
            && self.stencil == other.stencil
            && self.width == other.width
            && self.height == other.height
            && self.htile == other.htile
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, _ranges: &[GuestRange]) -> Result<HostResource> {
        let object = self.object_type();
        let format = DepthFormat::from_raw(self.format)
            .ok_or_else(|| GpuMemoryError::not_implemented(object, "depth format", self.format.to_string()))?;
        if self.width == 0 || self.height == 0 {
            return Err(GpuMemoryError::not_implemented(
                object,
                "empty surface",
                format!("{}x{}", self.width, self.height),
            ));
        }
        let desc = ImageDesc {
            format: format.host_format(self.stencil),
            width: self.width,
            height: self.height,
            mip_levels: 1,
            usage: ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
        };
        Ok(HostResource::Image(create_image(ctx.backend, object, &desc, None)?))
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_selects_combined_formats() {
        assert_eq!(DepthFormat::Z16.host_format(true), HostFormat::D16UnormS8Uint);
        assert_eq!(DepthFormat::Z32Float.host_format(false), HostFormat::D32Sfloat);
        assert_eq!(DepthFormat::from_raw(2), None);
    }

    #[test]
    fn equality_ignores_neo() {
        let a = DepthStencilBufferObject {
            format: 3,
            stencil: true,
            width: 640,
            height: 480,
            htile: true,
            neo: false,
        };
        assert!(a.equal(&DepthStencilBufferObject { neo: true, ..a }.params()));
        assert!(!a.equal(&DepthStencilBufferObject { htile: false, ..a }.params()));
    }
}
