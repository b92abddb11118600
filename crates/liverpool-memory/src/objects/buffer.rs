//! Index, vertex and storage buffers. All three are host-visible buffers holding the guest
//! ranges back to back.

use liverpool_shader::GuestRange;

use super::{
    create_buffer, download_buffer, total_size, upload_buffer, GpuObject, GpuObjectType, HostResource,
    ObjectParams, UpdateFn, WriteBackFn,
};
use crate::backend::BufferUsage;
use crate::context::GraphicContext;
use crate::error::{GpuMemoryError, Result};

fn create_guest_buffer(
    ctx: &mut GraphicContext<'_>,
    object: GpuObjectType,
    ranges: &[GuestRange],
    usage: BufferUsage,
) -> Result<HostResource> {
    let size = total_size(ranges);
    if size == 0 {
        return Err(GpuMemoryError::not_implemented(
            object,
            "empty buffer",
            format!("{} ranges", ranges.len()),
        ));
    }
    Ok(HostResource::Buffer(create_buffer(
        ctx.backend,
        object,
        size,
        usage | BufferUsage::TRANSFER_DST,
    )?))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn bits(self) -> u64 {
        match self {
            Self::U16 => 16,
            Self::U32 => 32,
        }
    }

    fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            16 => Some(Self::U16),
            32 => Some(Self::U32),
            _ => None,
        }
    }
}

const PARAM_INDEX_TYPE: usize = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBufferObject {
    pub index_type: IndexType,
}

fn update_index(ctx: &mut GraphicContext<'_>, _params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    upload_buffer(ctx, GpuObjectType::IndexBuffer, ranges, resource)
}

impl GpuObject for IndexBufferObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::IndexBuffer
    }

    fn params(&self) -> ObjectParams {
        let mut params = ObjectParams::default();
        params[PARAM_INDEX_TYPE] = self.index_type.bits();
        params
    }

    fn read_only(&self) -> bool {
        true
    }

    fn check_hash(&self) -> bool {
        true
    }

    fn equal(&self, existing: &ObjectParams) -> bool {
        IndexType::from_bits(existing[PARAM_INDEX_TYPE]) == Some(self.index_type)
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange]) -> Result<HostResource> {
        create_guest_buffer(ctx, self.object_type(), ranges, BufferUsage::INDEX)
    }

    fn updater(&self) -> Option<UpdateFn> {
        Some(update_index)
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}

/// Vertex data addressed by one or more `V#`s.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexBufferObject;

fn update_vertex(ctx: &mut GraphicContext<'_>, _params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    upload_buffer(ctx, GpuObjectType::VertexBuffer, ranges, resource)
}

impl GpuObject for VertexBufferObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::VertexBuffer
    }

    fn params(&self) -> ObjectParams {
        ObjectParams::default()
    }

    fn read_only(&self) -> bool {
        true
    }

    fn check_hash(&self) -> bool {
        true
    }

    fn equal(&self, _existing: &ObjectParams) -> bool {
        true
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange]) -> Result<HostResource> {
        create_guest_buffer(ctx, self.object_type(), ranges, BufferUsage::VERTEX)
    }

    fn updater(&self) -> Option<UpdateFn> {
        Some(update_vertex)
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}

const PARAM_READ_ONLY: usize = 0;

/// Shader storage buffer, possibly assembled from several guest allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageBufferObject {
    pub read_only: bool,
}

fn update_storage(ctx: &mut GraphicContext<'_>, _params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    upload_buffer(ctx, GpuObjectType::StorageBuffer, ranges, resource)
}

fn write_back_storage(ctx: &mut GraphicContext<'_>, _params: &ObjectParams, ranges: &[GuestRange], resource: &HostResource) -> Result<()> {
    download_buffer(ctx, GpuObjectType::StorageBuffer, ranges, resource)
}

impl GpuObject for StorageBufferObject {
    fn object_type(&self) -> GpuObjectType {
        GpuObjectType::StorageBuffer
    }

    fn params(&self) -> ObjectParams {
        let mut params = ObjectParams::default();
        params[PARAM_READ_ONLY] = u64::from(self.read_only);
        params
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn equal(&self, existing: &ObjectParams) -> bool {
        (existing[PARAM_READ_ONLY] != 0) == self.read_only
    }

    fn create(&self, ctx: &mut GraphicContext<'_>, ranges: &[GuestRange]) -> Result<HostResource> {
        let usage = BufferUsage::STORAGE | BufferUsage::TRANSFER_SRC;
        create_guest_buffer(ctx, self.object_type(), ranges, usage)
    }

    fn updater(&self) -> Option<UpdateFn> {
        Some(update_storage)
    }

    fn write_backer(&self) -> Option<WriteBackFn> {
        (!self.read_only).then_some(write_back_storage as WriteBackFn)
    }

    fn clone_box(&self) -> Box<dyn GpuObject> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_type_must_match() {
        let a = IndexBufferObject { index_type: IndexType::U16 };
        let b = IndexBufferObject { index_type: IndexType::U32 };
        assert!(a.equal(&a.params()));
        assert!(!a.equal(&b.params()));
    }

    #[test]
    fn read_only_storage_has_no_write_back() {
        assert!(StorageBufferObject { read_only: true }.write_backer().is_none());
        assert!(StorageBufferObject { read_only: false }.write_backer().is_some());
    }
}
