//! GCN instruction encoders and a shader binary builder for tests.
//!
//! Source operand codes follow the hardware encoding: 0..=103 SGPRs, [`VCC_LO`], [`M0`],
//! [`EXEC_LO`], [`int`] / [`F1_0`] inline constants, [`LITERAL`], and [`vgpr`] for 9-bit
//! vector sources.

use crate::binary::{ShaderBinaryInfo, ShaderUsageSlot, UsageType, BINARY_INFO_SIZE, SIGNATURE};
use crate::guest_memory::{GuestMemory, GuestMemoryError, VecGuestMemory};

pub const VCC_LO: u32 = 106;
pub const M0: u32 = 124;
pub const EXEC_LO: u32 = 126;
pub const F1_0: u32 = 242;
pub const LITERAL: u32 = 255;

/// Inline integer constant code for `0..=64`.
pub fn int(value: u32) -> u32 {
    128 + value
}

/// 9-bit source code of a VGPR.
pub fn vgpr(n: u32) -> u32 {
    256 + n
}

fn sopp(op: u32, simm16: u16) -> u32 {
    0xbf80_0000 | (op << 16) | u32::from(simm16)
}

pub fn s_nop() -> u32 {
    sopp(0, 0)
}

pub fn s_endpgm() -> u32 {
    sopp(1, 0)
}

/// `delta` is in dwords relative to the next instruction.
pub fn s_branch(delta: i16) -> u32 {
    sopp(2, delta as u16)
}

pub fn s_cbranch_execz(delta: i16) -> u32 {
    sopp(8, delta as u16)
}

pub fn s_waitcnt(simm16: u16) -> u32 {
    sopp(12, simm16)
}

fn sop1(op: u32, sdst: u32, ssrc: u32) -> u32 {
    0xbe80_0000 | (sdst << 16) | (op << 8) | ssrc
}

pub fn s_mov_b32(sdst: u32, ssrc: u32) -> u32 {
    sop1(3, sdst, ssrc)
}

pub fn s_mov_b64(sdst: u32, ssrc: u32) -> u32 {
    sop1(4, sdst, ssrc)
}

pub fn s_wqm_b64(sdst: u32, ssrc: u32) -> u32 {
    sop1(10, sdst, ssrc)
}

pub fn s_setpc_b64(ssrc: u32) -> u32 {
    sop1(32, 0, ssrc)
}

pub fn s_swappc_b64(sdst: u32, ssrc: u32) -> u32 {
    sop1(33, sdst, ssrc)
}

pub fn s_and_saveexec_b64(sdst: u32, ssrc: u32) -> u32 {
    sop1(36, sdst, ssrc)
}

fn sop2(op: u32, sdst: u32, ssrc0: u32, ssrc1: u32) -> u32 {
    0x8000_0000 | (op << 23) | (sdst << 16) | (ssrc1 << 8) | ssrc0
}

pub fn s_andn2_b64(sdst: u32, ssrc0: u32, ssrc1: u32) -> u32 {
    sop2(21, sdst, ssrc0, ssrc1)
}

pub fn s_lshl_b32(sdst: u32, ssrc0: u32, ssrc1: u32) -> u32 {
    sop2(30, sdst, ssrc0, ssrc1)
}

/// SMRD with an immediate offset in dwords.
fn smrd(op: u32, sdst: u32, sbase: u32, offset_dwords: u32) -> u32 {
    0xc000_0000 | (op << 22) | (sdst << 15) | ((sbase / 2) << 9) | (1 << 8) | (offset_dwords & 0xff)
}

pub fn s_load_dwordx4(sdst: u32, sbase: u32, offset_dwords: u32) -> u32 {
    smrd(2, sdst, sbase, offset_dwords)
}

pub fn s_load_dwordx8(sdst: u32, sbase: u32, offset_dwords: u32) -> u32 {
    smrd(3, sdst, sbase, offset_dwords)
}

pub fn s_buffer_load_dword(sdst: u32, sbase: u32, offset_dwords: u32) -> u32 {
    smrd(8, sdst, sbase, offset_dwords)
}

pub fn s_buffer_load_dwordx4(sdst: u32, sbase: u32, offset_dwords: u32) -> u32 {
    smrd(10, sdst, sbase, offset_dwords)
}

fn vop1(op: u32, vdst: u32, src0: u32) -> u32 {
    0x7e00_0000 | (vdst << 17) | (op << 9) | src0
}

pub fn v_mov_b32(vdst: u32, src0: u32) -> u32 {
    vop1(1, vdst, src0)
}

pub fn v_cvt_f32_u32(vdst: u32, src0: u32) -> u32 {
    vop1(6, vdst, src0)
}

pub fn v_rcp_f32(vdst: u32, src0: u32) -> u32 {
    vop1(42, vdst, src0)
}

fn vop2(op: u32, vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    (op << 25) | (vdst << 17) | (vsrc1 << 9) | src0
}

pub fn v_cndmask_b32(vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    vop2(0, vdst, src0, vsrc1)
}

pub fn v_add_f32(vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    vop2(3, vdst, src0, vsrc1)
}

pub fn v_mul_f32(vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    vop2(8, vdst, src0, vsrc1)
}

pub fn v_mac_f32(vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    vop2(31, vdst, src0, vsrc1)
}

pub fn v_add_i32(vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    vop2(37, vdst, src0, vsrc1)
}

pub fn v_cvt_pkrtz_f16_f32(vdst: u32, src0: u32, vsrc1: u32) -> u32 {
    vop2(47, vdst, src0, vsrc1)
}

fn vopc(op: u32, src0: u32, vsrc1: u32) -> u32 {
    0x7c00_0000 | (op << 17) | (vsrc1 << 9) | src0
}

pub fn v_cmp_eq_u32(src0: u32, vsrc1: u32) -> u32 {
    vopc(0xc2, src0, vsrc1)
}

pub fn v_cmpx_gt_u32(src0: u32, vsrc1: u32) -> u32 {
    vopc(0xd4, src0, vsrc1)
}

pub fn v_interp_p1_f32(vdst: u32, vsrc: u32, attr: u32, chan: u32) -> u32 {
    0xc800_0000 | (vdst << 18) | (attr << 10) | (chan << 8) | vsrc
}

pub fn v_interp_p2_f32(vdst: u32, vsrc: u32, attr: u32, chan: u32) -> u32 {
    0xc800_0000 | (vdst << 18) | (1 << 16) | (attr << 10) | (chan << 8) | vsrc
}

/// MUBUF with `idxen`; `srsrc` is the first SGPR of the V#.
fn mubuf(op: u32, vdata: u32, vaddr: u32, srsrc: u32, soffset: u32, offset: u32) -> [u32; 2] {
    [
        0xe000_0000 | (op << 18) | (1 << 13) | (offset & 0xfff),
        (soffset << 24) | ((srsrc / 4) << 16) | (vdata << 8) | vaddr,
    ]
}

pub fn buffer_load_dword(vdata: u32, vaddr: u32, srsrc: u32, soffset: u32, offset: u32) -> [u32; 2] {
    mubuf(12, vdata, vaddr, srsrc, soffset, offset)
}

pub fn buffer_load_format_xyzw(vdata: u32, vaddr: u32, srsrc: u32, soffset: u32, offset: u32) -> [u32; 2] {
    mubuf(3, vdata, vaddr, srsrc, soffset, offset)
}

pub fn buffer_load_format_xyz(vdata: u32, vaddr: u32, srsrc: u32, soffset: u32, offset: u32) -> [u32; 2] {
    mubuf(2, vdata, vaddr, srsrc, soffset, offset)
}

pub fn buffer_store_dword(vdata: u32, vaddr: u32, srsrc: u32, soffset: u32, offset: u32) -> [u32; 2] {
    mubuf(28, vdata, vaddr, srsrc, soffset, offset)
}

/// `image_sample` with the given dmask (0xf or 0x7).
pub fn image_sample(vdata: u32, vaddr: u32, srsrc: u32, ssamp: u32, dmask: u32) -> [u32; 2] {
    [
        0xf000_0000 | (0x20 << 18) | (dmask << 8),
        ((ssamp / 4) << 21) | ((srsrc / 4) << 16) | (vdata << 8) | vaddr,
    ]
}

pub fn ds_append_gds(vdst: u32, offset: u16) -> [u32; 2] {
    [0xd800_0000 | (62 << 18) | (1 << 17) | u32::from(offset), vdst << 24]
}

pub const EXP_MRT0: u32 = 0;
pub const EXP_POS0: u32 = 12;
pub const EXP_PARAM0: u32 = 32;

pub fn exp(target: u32, en: u32, compr: bool, done: bool, vm: bool, vsrc: [u32; 4]) -> [u32; 2] {
    [
        0xf800_0000
            | (u32::from(vm) << 12)
            | (u32::from(done) << 11)
            | (u32::from(compr) << 10)
            | (target << 4)
            | en,
        vsrc[0] | (vsrc[1] << 8) | (vsrc[2] << 16) | (vsrc[3] << 24),
    ]
}

/// Lays out a guest shader binary: code, input usage slots, a one-dword usage mask chunk, then
/// the `OrbShdr` info record.
#[derive(Clone, Debug, Default)]
pub struct ShaderBinaryBuilder {
    code: Vec<u32>,
    slots: Vec<ShaderUsageSlot>,
    shader_hash0: u32,
    crc32: u32,
}

impl ShaderBinaryBuilder {
    pub fn new(code: &[u32]) -> Self {
        Self {
            code: code.to_vec(),
            shader_hash0: 0x1234_5678,
            crc32: 0x9abc_def0,
            ..Default::default()
        }
    }

    pub fn slot(mut self, usage_type: UsageType, slot: u8, start_register: u8, register_count: u8) -> Self {
        self.slots.push(ShaderUsageSlot {
            usage_type,
            slot,
            start_register,
            register_count,
        });
        self
    }

    pub fn hash(mut self, shader_hash0: u32, crc32: u32) -> Self {
        self.shader_hash0 = shader_hash0;
        self.crc32 = crc32;
        self
    }

    pub fn size_bytes(&self) -> u64 {
        (self.code.len() as u64 + self.slots.len() as u64 + 1) * 4 + BINARY_INFO_SIZE
    }

    fn info_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BINARY_INFO_SIZE as usize);
        out.extend_from_slice(SIGNATURE);
        out.push(1);
        out.extend_from_slice(&(((self.code.len() as u32) * 4) << 8).to_le_bytes());
        out.extend_from_slice(&[1, self.slots.len() as u8, 0, 0]);
        out.extend_from_slice(&self.shader_hash0.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out
    }

    /// Writes the binary at `addr` (256-byte aligned for a valid `SPI_SHADER_PGM_LO`).
    pub fn write(&self, mem: &VecGuestMemory, addr: u64) -> Result<ShaderBinaryInfo, GuestMemoryError> {
        mem.write_u32s(addr, &self.code)?;
        let slots_addr = addr + self.code.len() as u64 * 4;
        let raw: Vec<u32> = self.slots.iter().map(ShaderUsageSlot::to_raw).collect();
        mem.write_u32s(slots_addr, &raw)?;
        let mask_addr = slots_addr + raw.len() as u64 * 4;
        mem.write_u32s(mask_addr, &[0])?;
        let info_addr = mask_addr + 4;
        let bytes = self.info_bytes();
        mem.write(info_addr, &bytes)?;

        let mut record = [0u8; BINARY_INFO_SIZE as usize];
        record.copy_from_slice(&bytes);
        ShaderBinaryInfo::parse(info_addr, &record).ok_or(GuestMemoryError {
            addr: info_addr,
            len: bytes.len(),
        })
    }
}

/// Flattens multi-dword encodings.
pub fn program(parts: &[&[u32]]) -> Vec<u32> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::shader_parse;
    use crate::ir::{ShaderInstructionType, ShaderType};

    #[test]
    fn encoders_decode_back() {
        let words = program(&[
            &[s_mov_b32(0, int(3)), v_add_f32(1, vgpr(2), 3)],
            &buffer_load_format_xyzw(4, 0, 8, int(0), 0),
            &exp(EXP_MRT0, 0xf, false, true, true, [4, 5, 6, 7]),
            &[s_endpgm()],
        ]);
        let code = shader_parse(&words, ShaderType::Pixel).unwrap();
        let types: Vec<_> = code.instructions.iter().map(|i| i.ty).collect();
        assert_eq!(
            types,
            vec![
                ShaderInstructionType::SMovB32,
                ShaderInstructionType::VAddF32,
                ShaderInstructionType::BufferLoadFormatXyzw,
                ShaderInstructionType::Exp,
                ShaderInstructionType::SEndpgm,
            ]
        );
    }

    #[test]
    fn builder_places_info_after_slots() {
        let mem = VecGuestMemory::new(0x1000, 0x100);
        let builder = ShaderBinaryBuilder::new(&[s_endpgm()]).slot(UsageType::ImmResource, 0, 4, 0);
        let info = builder.write(&mem, 0x1000).unwrap();
        assert_eq!(info.addr, 0x1000 + 4 + 4 + 4);
        assert_eq!(info.length, 4);
        let found = ShaderBinaryInfo::find(&mem, 0x1000, 64).unwrap();
        assert_eq!(found, info);
        let slots = found.usage_slots(&mem).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_register, 4);
        assert_eq!(builder.size_bytes(), 12 + BINARY_INFO_SIZE);
    }
}
