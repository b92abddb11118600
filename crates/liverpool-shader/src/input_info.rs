//! Per-stage input info: what the host pipeline must provide to run a guest shader.

use std::fmt::Write as _;

use tracing::debug;

use crate::binary::ShaderBinaryInfo;
use crate::bindings::{extract_bindings, ExtractedBindings, ShaderResources, PUSH_CONSTANT_SIZE};
use crate::descriptors::BufferResource;
use crate::error::{Result, ShaderError};
use crate::fetch::{group_vertex_buffers, parse_fetch_shader, ShaderVertexDestination, ShaderVertexInputBuffer};
use crate::guest_memory::GuestMemory;
use crate::ir::ShaderType;
use crate::regs::{
    ComputeShaderInfo, PixelShaderInfo, ShaderUserData, VertexShaderInfo, PS_INPUT_PERSP_CENTER, PS_INPUT_POS_X,
    PS_INPUT_POS_Y,
};
use crate::ShaderOptions;

pub const VS_PUSH_CONSTANT_OFFSET: u32 = 0;
pub const PS_PUSH_CONSTANT_OFFSET: u32 = PUSH_CONSTANT_SIZE;
pub const CS_PUSH_CONSTANT_OFFSET: u32 = 0;
pub const VS_DESCRIPTOR_SET: u32 = 0;
pub const PS_DESCRIPTOR_SET: u32 = 1;
pub const CS_DESCRIPTOR_SET: u32 = 0;

/// Largest workgroup the host is required to support.
pub const MAX_WORKGROUP_INVOCATIONS: u32 = 1024;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderVertexInputInfo {
    pub resources: Vec<BufferResource>,
    pub resources_dst: Vec<ShaderVertexDestination>,
    pub fetch: bool,
    pub buffers: Vec<ShaderVertexInputBuffer>,
    pub export_count: u32,
    pub bind: ShaderResources,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderPixelInputInfo {
    pub interpolator_settings: [u32; 32],
    pub input_num: u32,
    pub target_output_mode: [u8; 8],
    pub ps_pos_xy: bool,
    pub ps_pixel_kill_enable: bool,
    pub bind: ShaderResources,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderComputeInputInfo {
    pub threads_num: [u32; 3],
    pub workgroup_register: u32,
    pub bind: ShaderResources,
}

fn stage_bindings(
    mem: &dyn GuestMemory,
    program_address: u64,
    user_data: &ShaderUserData,
    stage: ShaderType,
    options: &ShaderOptions,
) -> Result<ExtractedBindings> {
    let info = ShaderBinaryInfo::find(mem, program_address, options.binary_info_search_limit_dwords)?;
    let slots = info.usage_slots(mem)?;
    extract_bindings(mem, &slots, user_data, stage)
}

fn user_pointer(user_data: &ShaderUserData, reg: u8) -> u64 {
    let r = usize::from(reg);
    u64::from(user_data.sgpr[r]) | (u64::from(user_data.sgpr[r + 1]) << 32)
}

pub fn shader_get_input_info_vs(
    regs: &VertexShaderInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<ShaderVertexInputInfo> {
    let extracted = stage_bindings(
        mem,
        regs.vs_regs.program_address,
        &regs.vs_user_data,
        ShaderType::Vertex,
        options,
    )?;

    let mut info = ShaderVertexInputInfo {
        export_count: u32::from(regs.vs_regs.export_count),
        bind: extracted.bind,
        ..Default::default()
    };
    info.bind.push_constant_offset = VS_PUSH_CONSTANT_OFFSET;
    info.bind.push_constant_size = PUSH_CONSTANT_SIZE;
    info.bind.descriptor_set_slot = VS_DESCRIPTOR_SET;

    match (extracted.fetch_register, extracted.vertex_buffer_table_register) {
        (Some(fetch_reg), Some(table_reg)) => {
            if usize::from(fetch_reg.max(table_reg)) + 1 >= regs.vs_user_data.sgpr.len() {
                return Err(ShaderError::not_implemented("fetch shader", "pointer outside user SGPRs"));
            }
            let fetch_addr = user_pointer(&regs.vs_user_data, fetch_reg);
            let table_addr = user_pointer(&regs.vs_user_data, table_reg);
            let layout = parse_fetch_shader(mem, fetch_addr, table_reg, table_addr)?;
            info.buffers = group_vertex_buffers(&layout.resources);
            info.resources = layout.resources;
            info.resources_dst = layout.resources_dst;
            info.fetch = true;
        }
        (None, None) => {}
        (fetch, table) => {
            return Err(ShaderError::not_implemented(
                "vertex input",
                format!("fetch shader register {fetch:?} without vertex buffer table {table:?}"),
            ))
        }
    }

    debug!(
        attributes = info.resources.len(),
        buffers = info.buffers.len(),
        export_count = info.export_count,
        bindings = info.bind.binding_count(),
        "vertex shader input info"
    );
    Ok(info)
}

pub fn shader_get_input_info_ps(
    regs: &PixelShaderInfo,
    vs_info: &ShaderVertexInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<ShaderPixelInputInfo> {
    let ps = &regs.ps_regs;
    let supported = PS_INPUT_PERSP_CENTER | PS_INPUT_POS_X | PS_INPUT_POS_Y;
    if ps.input_ena & !supported != 0 {
        return Err(ShaderError::not_implemented(
            "SPI_PS_INPUT_ENA",
            format!("0x{:08x}", ps.input_ena),
        ));
    }
    let pos = ps.input_ena & (PS_INPUT_POS_X | PS_INPUT_POS_Y);
    if pos != 0 && pos != (PS_INPUT_POS_X | PS_INPUT_POS_Y) {
        return Err(ShaderError::not_implemented(
            "SPI_PS_INPUT_ENA",
            "POS_X and POS_Y must be enabled together",
        ));
    }
    if ps.z_export_enable {
        return Err(ShaderError::not_implemented("DB_SHADER_CONTROL", "Z export"));
    }

    let input_num = u32::from(ps.num_interp);
    if input_num > vs_info.export_count {
        return Err(ShaderError::not_implemented(
            "SPI_PS_IN_CONTROL",
            format!("{input_num} interpolants but the vertex shader exports {}", vs_info.export_count),
        ));
    }
    if input_num > 0 && ps.input_ena & PS_INPUT_PERSP_CENTER == 0 {
        return Err(ShaderError::not_implemented(
            "SPI_PS_INPUT_ENA",
            "interpolants without PERSP_CENTER",
        ));
    }

    let mut info = ShaderPixelInputInfo {
        input_num,
        ps_pos_xy: pos != 0,
        ps_pixel_kill_enable: ps.kill_enable,
        ..Default::default()
    };
    for i in 0..input_num as usize {
        let cntl = ps.input_cntl[i];
        if cntl.flat_shade {
            return Err(ShaderError::not_implemented(
                "SPI_PS_INPUT_CNTL",
                format!("flat shading on input {i}"),
            ));
        }
        let offset = u32::from(cntl.offset);
        if offset >= vs_info.export_count {
            return Err(ShaderError::not_implemented(
                "SPI_PS_INPUT_CNTL",
                format!("input {i} reads param {offset} which is not exported"),
            ));
        }
        if info.interpolator_settings[..i].contains(&offset) {
            return Err(ShaderError::not_implemented(
                "SPI_PS_INPUT_CNTL",
                format!("input {i} duplicates param {offset}"),
            ));
        }
        info.interpolator_settings[i] = offset;
    }
    for (i, mode) in info.target_output_mode.iter_mut().enumerate() {
        *mode = ps.target_output_mode(i);
    }

    let extracted = stage_bindings(mem, ps.program_address, &regs.ps_user_data, ShaderType::Pixel, options)?;
    info.bind = extracted.bind;
    info.bind.push_constant_offset = PS_PUSH_CONSTANT_OFFSET;
    info.bind.push_constant_size = PUSH_CONSTANT_SIZE;
    info.bind.descriptor_set_slot = PS_DESCRIPTOR_SET;

    debug!(
        input_num = info.input_num,
        pos_xy = info.ps_pos_xy,
        kill = info.ps_pixel_kill_enable,
        bindings = info.bind.binding_count(),
        "pixel shader input info"
    );
    Ok(info)
}

pub fn shader_get_input_info_cs(
    regs: &ComputeShaderInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<ShaderComputeInputInfo> {
    let cs = &regs.cs_regs;
    let threads_num = [
        u32::from(cs.num_thread_x),
        u32::from(cs.num_thread_y),
        u32::from(cs.num_thread_z),
    ];
    let total: u32 = threads_num.iter().product();
    if total == 0 || total > MAX_WORKGROUP_INVOCATIONS {
        return Err(ShaderError::not_implemented(
            "COMPUTE_NUM_THREAD",
            format!("{threads_num:?}"),
        ));
    }
    if cs.tg_size_en {
        return Err(ShaderError::not_implemented("COMPUTE_PGM_RSRC2", "TG_SIZE_EN"));
    }

    let extracted = stage_bindings(mem, cs.program_address, &regs.cs_user_data, ShaderType::Compute, options)?;
    let mut info = ShaderComputeInputInfo {
        threads_num,
        workgroup_register: u32::from(cs.user_sgpr),
        bind: extracted.bind,
    };
    info.bind.push_constant_offset = CS_PUSH_CONSTANT_OFFSET;
    info.bind.push_constant_size = PUSH_CONSTANT_SIZE;
    info.bind.descriptor_set_slot = CS_DESCRIPTOR_SET;

    debug!(
        threads = ?info.threads_num,
        workgroup_register = info.workgroup_register,
        bindings = info.bind.binding_count(),
        "compute shader input info"
    );
    Ok(info)
}

pub fn dbg_dump_input_info_vs(info: &ShaderVertexInputInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "vertex input: fetch {}, {} attributes, {} buffers, export_count {}",
        info.fetch,
        info.resources.len(),
        info.buffers.len(),
        info.export_count
    );
    for (i, (v, dst)) in info.resources.iter().zip(info.resources_dst.iter()).enumerate() {
        let _ = writeln!(
            out,
            "  attr[{i}]: v[{}..{}] base 0x{:x} stride {} dfmt {} nfmt {}",
            dst.register_start,
            dst.register_start + dst.registers_num,
            v.base(),
            v.stride(),
            v.dfmt(),
            v.nfmt()
        );
    }
    for (i, b) in info.buffers.iter().enumerate() {
        let _ = writeln!(
            out,
            "  vbuf[{i}]: addr 0x{:x} stride {} records {} attrs {:?} offsets {:?}",
            b.addr, b.stride, b.num_records, b.attr_indices, b.attr_offsets
        );
    }
    info.bind.dbg_dump(&mut out);
    out
}

pub fn dbg_dump_input_info_ps(info: &ShaderPixelInputInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "pixel input: {} interpolants {:?}, pos_xy {}, kill {}, targets {:?}",
        info.input_num,
        &info.interpolator_settings[..info.input_num as usize],
        info.ps_pos_xy,
        info.ps_pixel_kill_enable,
        info.target_output_mode
    );
    info.bind.dbg_dump(&mut out);
    out
}

pub fn dbg_dump_input_info_cs(info: &ShaderComputeInputInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "compute input: threads {:?}, workgroup register s{}",
        info.threads_num, info.workgroup_register
    );
    info.bind.dbg_dump(&mut out);
    out
}
