//! Fetch subroutine analysis: which V# feeds which VGPRs, and how the V#s group into vertex
//! buffers.

use hashbrown::HashMap;
use tracing::debug;

use crate::decode::{shader_parse_guest, MAX_PROGRAM_DWORDS};
use crate::descriptors::BufferResource;
use crate::error::{Result, ShaderError};
use crate::guest_memory::{read_u32s, GuestMemory};
use crate::ir::{OperandType, ShaderInstructionType, ShaderType};

/// Vertex attribute formats the host vertex input state can express, as (dfmt, nfmt).
const SUPPORTED_ATTRIBUTE_FORMATS: [(u8, u8); 5] = [(4, 7), (11, 7), (13, 7), (14, 7), (10, 0)];

/// `SQ_SEL_X`; identity selects are X, Y, Z, W = 4, 5, 6, 7.
const SEL_X: u8 = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderVertexDestination {
    pub register_start: u32,
    pub registers_num: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderVertexInputBuffer {
    pub addr: u64,
    pub stride: u32,
    pub num_records: u32,
    pub attr_indices: Vec<usize>,
    pub attr_offsets: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchLayout {
    pub resources: Vec<BufferResource>,
    pub resources_dst: Vec<ShaderVertexDestination>,
}

fn check_attribute(index: usize, v: &BufferResource, registers_num: u32) -> Result<()> {
    if !SUPPORTED_ATTRIBUTE_FORMATS.contains(&(v.dfmt(), v.nfmt())) {
        return Err(ShaderError::not_implemented(
            "vertex attribute format",
            format!("attribute {index}: dfmt={} nfmt={}", v.dfmt(), v.nfmt()),
        ));
    }
    let sels = [v.dst_sel_x(), v.dst_sel_y(), v.dst_sel_z(), v.dst_sel_w()];
    for (channel, sel) in sels.iter().take(registers_num as usize).enumerate() {
        if *sel != SEL_X + channel as u8 {
            return Err(ShaderError::not_implemented(
                "vertex attribute swizzle",
                format!("attribute {index}: channel {channel} selects {sel}"),
            ));
        }
    }
    if v.add_tid() || v.swizzle_enabled() {
        return Err(ShaderError::not_implemented(
            "vertex attribute addressing",
            format!("attribute {index}: add_tid/swizzle enabled"),
        ));
    }
    Ok(())
}

/// Decodes the fetch subroutine at `fetch_addr`. `table_register` is the user SGPR pair holding
/// `table_addr`, the vertex buffer table the subroutine loads V#s from.
pub fn parse_fetch_shader(
    mem: &dyn GuestMemory,
    fetch_addr: u64,
    table_register: u8,
    table_addr: u64,
) -> Result<FetchLayout> {
    let code = shader_parse_guest(mem, fetch_addr, ShaderType::Fetch, MAX_PROGRAM_DWORDS)?;
    let mut loaded: HashMap<u32, BufferResource> = HashMap::new();
    let mut layout = FetchLayout::default();

    for inst in &code.instructions {
        match inst.ty {
            ShaderInstructionType::SLoadDwordx4 => {
                if inst.src[0].register_id != u32::from(table_register)
                    || inst.src[1].ty != OperandType::LiteralConstant
                {
                    return Err(ShaderError::not_implemented(
                        "fetch shader",
                        format!("pc 0x{:x}: {inst} does not read the vertex buffer table", inst.pc),
                    ));
                }
                let words = read_u32s(mem, table_addr + u64::from(inst.src[1].constant), 4)?;
                loaded.insert(inst.dst.register_id, BufferResource::from_words(&words));
            }
            ShaderInstructionType::BufferLoadFormatX
            | ShaderInstructionType::BufferLoadFormatXy
            | ShaderInstructionType::BufferLoadFormatXyz
            | ShaderInstructionType::BufferLoadFormatXyzw => {
                let v = loaded.get(&inst.src[1].register_id).copied().ok_or_else(|| {
                    ShaderError::not_implemented(
                        "fetch shader",
                        format!("pc 0x{:x}: V# at s{} was not loaded", inst.pc, inst.src[1].register_id),
                    )
                })?;
                let soffset_zero =
                    inst.src[2].ty == OperandType::IntegerInlineConstant && inst.src[2].constant == 0;
                if inst.src[0].register_id != 0 || inst.ctrl.offset != 0 || !soffset_zero {
                    return Err(ShaderError::not_implemented(
                        "fetch shader",
                        format!("pc 0x{:x}: {inst} is not a plain vertex-index fetch", inst.pc),
                    ));
                }
                let registers_num = u32::from(inst.dst.size);
                check_attribute(layout.resources.len(), &v, registers_num)?;
                layout.resources.push(v);
                layout.resources_dst.push(ShaderVertexDestination {
                    register_start: inst.dst.register_id,
                    registers_num,
                });
            }
            ShaderInstructionType::SWaitcnt | ShaderInstructionType::SNop | ShaderInstructionType::SSetpcB64 => {}
            _ => {
                return Err(ShaderError::not_implemented(
                    "fetch shader",
                    format!("pc 0x{:x}: unexpected {inst}", inst.pc),
                ))
            }
        }
    }

    debug!(fetch_addr, attributes = layout.resources.len(), "parsed fetch shader");
    Ok(layout)
}

/// Groups attributes whose V#s describe the same interleaved buffer.
pub fn group_vertex_buffers(resources: &[BufferResource]) -> Vec<ShaderVertexInputBuffer> {
    let mut order: Vec<usize> = (0..resources.len()).collect();
    order.sort_by_key(|&i| (resources[i].base(), i));

    let mut buffers: Vec<ShaderVertexInputBuffer> = Vec::new();
    for i in order {
        let v = &resources[i];
        let stride = u32::from(v.stride());
        let existing = buffers.iter_mut().find(|b| {
            b.stride == stride
                && b.num_records == v.num_records()
                && v.base() >= b.addr
                && v.base() - b.addr < u64::from(stride)
        });
        match existing {
            Some(b) => {
                b.attr_indices.push(i);
                b.attr_offsets.push((v.base() - b.addr) as u32);
            }
            None => buffers.push(ShaderVertexInputBuffer {
                addr: v.base(),
                stride,
                num_records: v.num_records(),
                attr_indices: vec![i],
                attr_offsets: vec![0],
            }),
        }
    }
    buffers
}
