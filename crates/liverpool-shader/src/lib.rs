//! Shader front end for the Liverpool (GCN) GPU.
//!
//! The crate turns fixed-function register state plus a guest shader binary into something the
//! host can run:
//!
//! - bit-exact views over hardware resource descriptors (`V#`, `T#`, `S#`, GDS, extended table),
//! - the resource-binding layout a shader touches (`shader_get_input_info_*`),
//! - a cache fingerprint for the (registers, bindings) combination (`shader_get_id_*`),
//! - a decoder into [`ShaderCode`] with a disassembler for diagnostics,
//! - a recompiler that lowers the IR to WGSL and SPIR-V (`shader_recompile_*`).
//!
//! Anything the front end does not understand is reported as an error rather than
//! approximated.

#![forbid(unsafe_code)]

pub mod binary;
pub mod bindings;
pub mod cache;
pub mod decode;
pub mod descriptors;
mod disasm;
mod error;
pub mod fetch;
pub mod guest_memory;
pub mod input_info;
pub mod ir;
pub mod recompile;
pub mod regs;
pub mod shader_id;

/// GCN instruction encoders and a shader binary builder.
///
/// Only available for this crate's own tests or with the `test-utils` feature.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::binary::{ShaderBinaryInfo, ShaderUsageSlot, UsageType};
pub use crate::bindings::{ShaderResources, ShaderStorageUsage};
pub use crate::cache::{
    ShaderCache, ShaderCacheConfig, ShaderCacheLookupSource, ShaderCacheStats, ShaderDisableList,
};
pub use crate::decode::{shader_parse, shader_parse_guest};
pub use crate::descriptors::{BufferResource, ExtendedResource, GdsResource, SamplerResource, TextureResource};
pub use crate::error::{Result, ShaderError};
pub use crate::guest_memory::{GuestMemory, GuestMemoryError, GuestRange, VecGuestMemory};
pub use crate::input_info::{
    dbg_dump_input_info_cs, dbg_dump_input_info_ps, dbg_dump_input_info_vs, shader_get_input_info_cs,
    shader_get_input_info_ps, shader_get_input_info_vs, ShaderComputeInputInfo, ShaderPixelInputInfo,
    ShaderVertexInputInfo,
};
pub use crate::ir::{ShaderCode, ShaderInstruction, ShaderInstructionType, ShaderOperand, ShaderType};
pub use crate::recompile::{shader_recompile_cs, shader_recompile_ps, shader_recompile_vs, RecompiledShader};
pub use crate::regs::{ComputeShaderInfo, PixelShaderInfo, ShaderUserData, VertexShaderInfo};
pub use crate::shader_id::{shader_get_id_cs, shader_get_id_ps, shader_get_id_vs, ShaderId};

/// Default bound on the forward scan for the binary info record, in dwords.
pub const DEFAULT_BINARY_INFO_SEARCH_LIMIT_DWORDS: usize = 0x4000;

/// Options shared by input-info extraction, identity and recompilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShaderOptions {
    /// How far past the program start to look for the `OrbShdr` record.
    pub binary_info_search_limit_dwords: usize,
    /// Run naga's uniformity analysis on generated WGSL.
    pub validate_control_flow_uniformity: bool,
}

impl Default for ShaderOptions {
    fn default() -> Self {
        Self {
            binary_info_search_limit_dwords: DEFAULT_BINARY_INFO_SEARCH_LIMIT_DWORDS,
            validate_control_flow_uniformity: false,
        }
    }
}
