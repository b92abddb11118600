use liverpool_shader::GuestRange;

use super::{
    create_buffer, download_buffer, total_size, upload_buffer, GpuObject, GpuObjectType, HostResource,
    ObjectParams, UpdateFn, WriteBackFn,
};
use crate::backend::BufferUsage;
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};

const LABEL_ALIGN: u64 = 8;

/// Fence/label memory the GPU writes with end-of-pipe events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LabelObject;

fn update(ctx: &mut GraphicContext<'_>, _params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    upload_buffer(ctx, GpuObjectType::Label, ranges, resource)
}

fn write_back(ctx: &mut GraphicContext<'_>, _params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    download_buffer(ctx, GpuObjectType::Label, ranges, resource)
}

impl GpuObject for LabelObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::Label
    }

    fn params(&self) -> ObjectParams {
        ObjectParams::default()
    }

    fn read_only(&self) -> bool {
        false
    }

    fn equal(&self, _existing: &ObjectParams) -> bool {
        true
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange]) -> Result<HostResource> {
        let object = self.object_type();
        if let Some(r) = ranges
            .iter()
            .find(|r| r.vaddr % LABEL_ALIGN != 0 || r.size % LABEL_ALIGN != 0 || r.size == 0)
        {
            return Err(GpuMemoryError::not_implemented(
                object,
                "unaligned label",
                format!("vaddr 0x{:x} size 0x{:x}", r.vaddr, r.size),
            ));
        }
        let size = total_size(ranges);
        let usage = BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST;
        Ok(HostResource::Buffer(create_buffer(ctx.backend, object, size, usage)?))
    }

    fn updater(&self) -> Option<UpdateFn> {
        Some(update)
    }

    fn write_backer(&self) -> Option<WriteBackFn> {
        Some(write_back)
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}
