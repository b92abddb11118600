use liverpool_shader::GuestMemoryError;
use liverpool_tile::TileError;
use thiserror::Error;

use crate::backend::BackendError;
use crate::cache::ObjectId;
use crate::objects::GpuObjectType;
use crate::registry::{OwnerHandle, ResourceHandle};

#[derive(Debug, Error)]
pub enum GpuMemoryError {
    /// A parameter combination the object layer does not support.
    #[error("{object:?}: {what} is not implemented ({detail})")]
    NotImplemented {
        object: GpuObjectType,
        what: &'static str,
        detail: String,
    },

    #[error("{object:?}: host allocation failed: {source}")]
    Allocation {
        object: GpuObjectType,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("GPU object cache consistency violated: {0}")]
    CacheConsistency(String),

    #[error(transparent)]
    GuestMemory(#[from] GuestMemoryError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error("unknown GPU object {0:?}")]
    UnknownObject(ObjectId),
}

impl GpuMemoryError {
    pub(crate) fn not_implemented(object: GpuObjectType, what: &'static str, detail: impl Into<String>) -> Self {
        Self::NotImplemented {
            object,
            what,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GpuMemoryError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown owner {0:?}")]
    UnknownOwner(OwnerHandle),

    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceHandle),
}
