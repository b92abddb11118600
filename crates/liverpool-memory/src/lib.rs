//! GPU object cache for the Liverpool GPU.
//!
//! Maps guest GPU objects (scan-out buffers, depth targets, labels, index/vertex/storage buffers,
//! textures) at guest address ranges onto host resources created through an injected
//! [`HostBackend`], with reuse, invalidation and write-back. A separate [`ResourceRegistry`]
//! tracks named guest allocations for diagnostics.

#![forbid(unsafe_code)]

pub mod backend;
mod cache;
mod context;
mod error;
pub mod objects;
mod registry;
mod stats;

pub use crate::backend::{HostBackend, SoftwareBackend};
pub use crate::cache::{GpuMemory, GpuMemoryConfig, ObjectId, ObjectState};
pub use crate::context::GraphicContext;
pub use crate::error::{GpuMemoryError, RegistryError, Result};
pub use crate::objects::{
    DepthStencilBufferObject, GpuObject, GpuObjectType, HostResource, IndexBufferObject, IndexType, LabelObject,
    StorageBufferObject, TextureObject, VertexBufferObject, VideoOutBufferObject,
};
pub use crate::registry::{OwnerHandle, OwnerInfo, ResourceHandle, ResourceInfo, ResourceRegistry};
pub use crate::stats::{GpuMemoryStats, GpuMemoryStatsSnapshot};
