//! Guest program -> host shader.

mod spirv;
mod wgsl;

use tracing::debug;

use crate::binary::ShaderBinaryInfo;
use crate::decode::shader_parse_guest;
use crate::error::Result;
use crate::guest_memory::GuestMemory;
use crate::input_info::{ShaderComputeInputInfo, ShaderPixelInputInfo, ShaderVertexInputInfo};
use crate::ir::{ShaderCode, ShaderType};
use crate::regs::{ComputeShaderInfo, PixelShaderInfo, VertexShaderInfo};
use crate::ShaderOptions;

use self::wgsl::StageIo;

/// A recompiled guest shader: the generated WGSL and the SPIR-V the host pipeline consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecompiledShader {
    pub stage: ShaderType,
    pub wgsl: String,
    pub entry_point: &'static str,
    pub spirv: Vec<u32>,
}

impl RecompiledShader {
    pub fn spirv_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.spirv)
    }
}

/// Decodes the program at `program_address`. The trailing binary info bounds the decode.
pub fn decode_program(
    mem: &dyn GuestMemory,
    program_address: u64,
    ty: ShaderType,
    options: &ShaderOptions,
) -> Result<ShaderCode> {
    let info = ShaderBinaryInfo::find(mem, program_address, options.binary_info_search_limit_dwords)?;
    let max_dwords = ((info.addr - program_address) / 4) as usize;
    shader_parse_guest(mem, program_address, ty, max_dwords)
}

fn finish(code: &ShaderCode, io: &StageIo<'_>, vgpr_count: u32, options: &ShaderOptions) -> Result<RecompiledShader> {
    let out = wgsl::generate(code, io, vgpr_count)?;
    let spirv = spirv::compile(&out.wgsl, options.validate_control_flow_uniformity)?;
    debug!(
        stage = ?code.ty,
        instructions = code.instructions.len(),
        wgsl_bytes = out.wgsl.len(),
        spirv_words = spirv.len(),
        "recompiled shader"
    );
    Ok(RecompiledShader {
        stage: code.ty,
        wgsl: out.wgsl,
        entry_point: out.entry_point,
        spirv,
    })
}

pub fn shader_recompile_vs(
    regs: &VertexShaderInfo,
    input_info: &ShaderVertexInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<RecompiledShader> {
    let vs = &regs.vs_regs;
    let code = decode_program(mem, vs.program_address, ShaderType::Vertex, options)?;
    finish(&code, &StageIo::Vertex(input_info), vs.rsrc1.vgpr_count(), options)
}

pub fn shader_recompile_ps(
    regs: &PixelShaderInfo,
    input_info: &ShaderPixelInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<RecompiledShader> {
    let ps = &regs.ps_regs;
    let code = decode_program(mem, ps.program_address, ShaderType::Pixel, options)?;
    let io = StageIo::Pixel {
        info: input_info,
        input_ena: ps.input_ena,
    };
    finish(&code, &io, ps.rsrc1.vgpr_count(), options)
}

pub fn shader_recompile_cs(
    regs: &ComputeShaderInfo,
    input_info: &ShaderComputeInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<RecompiledShader> {
    let cs = &regs.cs_regs;
    let code = decode_program(mem, cs.program_address, ShaderType::Compute, options)?;
    let io = StageIo::Compute {
        info: input_info,
        regs: cs,
    };
    finish(&code, &io, cs.rsrc1.vgpr_count(), options)
}
