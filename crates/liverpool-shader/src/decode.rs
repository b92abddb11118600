//! GCN instruction word decoder.
//!
//! Program counters are byte offsets from the start of the program. Decoding stops at
//! `s_endpgm` (or `s_setpc_b64` for fetch subroutines) unless a branch recorded so far targets
//! code after it.

use tracing::debug;

use crate::error::{Result, ShaderError};
use crate::guest_memory::{read_u32s, GuestMemory};
use crate::ir::{
    Format, OperandType, ShaderCode, ShaderInstruction, ShaderInstructionType as T, ShaderOperand,
    ShaderType,
};

/// Upper bound on program length, in dwords, when the binary carries no length.
pub const MAX_PROGRAM_DWORDS: usize = 0x4000;

const INLINE_FLOATS: [f32; 8] = [0.5, -0.5, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0];

fn unsupported(pc: u32, encoding: &'static str, opcode: u32) -> ShaderError {
    ShaderError::UnsupportedInstruction {
        pc,
        encoding,
        opcode,
    }
}

struct Cursor<'r> {
    read: &'r dyn Fn(usize) -> Result<u32>,
    index: usize,
    pc: u32,
    words: usize,
    literal: Option<u32>,
}

impl Cursor<'_> {
    fn word(&mut self, n: usize) -> Result<u32> {
        self.words = self.words.max(n + 1);
        (self.read)(self.index + n)
    }

    /// The literal constant dword that follows the base encoding.
    fn literal(&mut self) -> Result<u32> {
        if let Some(v) = self.literal {
            return Ok(v);
        }
        let v = (self.read)(self.index + self.words)?;
        self.literal = Some(v);
        Ok(v)
    }

    fn len(&self) -> usize {
        self.words + usize::from(self.literal.is_some())
    }

    fn src(&mut self, code: u32, size: u8) -> Result<ShaderOperand> {
        let mut op = ShaderOperand {
            size,
            ..Default::default()
        };
        match code {
            0..=103 => {
                op.ty = OperandType::Sgpr;
                op.register_id = code;
            }
            106 => op.ty = OperandType::VccLo,
            107 => op.ty = OperandType::VccHi,
            124 => op.ty = OperandType::M0,
            126 => op.ty = OperandType::ExecLo,
            127 => op.ty = OperandType::ExecHi,
            128..=192 => {
                op.ty = OperandType::IntegerInlineConstant;
                op.constant = code - 128;
            }
            193..=208 => {
                op.ty = OperandType::IntegerInlineConstant;
                op.constant = (192 - code as i32) as u32;
            }
            240..=247 => {
                op.ty = OperandType::FloatInlineConstant;
                op.constant = INLINE_FLOATS[(code - 240) as usize].to_bits();
            }
            252 => op.ty = OperandType::ExecZ,
            255 => {
                op.ty = OperandType::LiteralConstant;
                op.constant = self.literal()?;
            }
            256..=511 => {
                op.ty = OperandType::Vgpr;
                op.register_id = code - 256;
            }
            _ => return Err(unsupported(self.pc, "operand", code)),
        }
        Ok(op)
    }

    /// Scalar destination field (7 bits).
    fn sdst(&mut self, code: u32, size: u8) -> Result<ShaderOperand> {
        match code {
            0..=103 | 106 | 124 | 126 => self.src(code, size),
            _ => Err(unsupported(self.pc, "sdst", code)),
        }
    }
}

fn sop2_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        21 => (T::SAndn2B64, Format::Sdst2Ssrc02Ssrc12),
        30 => (T::SLshlB32, Format::SVdstSVsrc0SVsrc1),
        _ => return None,
    })
}

fn sop1_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        3 => (T::SMovB32, Format::SVdstSVsrc0),
        4 => (T::SMovB64, Format::Sdst2Ssrc02),
        10 => (T::SWqmB64, Format::Sdst2Ssrc02),
        32 => (T::SSetpcB64, Format::Saddr),
        33 => (T::SSwappcB64, Format::Sdst2Ssrc02),
        36 => (T::SAndSaveexecB64, Format::Sdst2Ssrc02),
        _ => return None,
    })
}

fn sopp_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        0 => (T::SNop, Format::Imm),
        1 => (T::SEndpgm, Format::Empty),
        2 => (T::SBranch, Format::Label),
        8 => (T::SCbranchExecz, Format::Label),
        12 => (T::SWaitcnt, Format::Imm),
        _ => return None,
    })
}

fn smrd_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        2 => (T::SLoadDwordx4, Format::Sdst4SbaseSoffset),
        3 => (T::SLoadDwordx8, Format::Sdst8SbaseSoffset),
        8 => (T::SBufferLoadDword, Format::SdstSvSoffset),
        10 => (T::SBufferLoadDwordx4, Format::Sdst4SvSoffset),
        11 => (T::SBufferLoadDwordx8, Format::Sdst8SvSoffset),
        12 => (T::SBufferLoadDwordx16, Format::Sdst16SvSoffset),
        _ => return None,
    })
}

fn vop2_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        0 => (T::VCndmaskB32, Format::VdstVsrc0Vsrc1Smask2),
        3 => (T::VAddF32, Format::SVdstSVsrc0SVsrc1),
        4 => (T::VSubF32, Format::SVdstSVsrc0SVsrc1),
        5 => (T::VSubrevF32, Format::SVdstSVsrc0SVsrc1),
        8 => (T::VMulF32, Format::SVdstSVsrc0SVsrc1),
        15 => (T::VMinF32, Format::SVdstSVsrc0SVsrc1),
        16 => (T::VMaxF32, Format::SVdstSVsrc0SVsrc1),
        27 => (T::VAndB32, Format::SVdstSVsrc0SVsrc1),
        31 => (T::VMacF32, Format::SVdstSVsrc0SVsrc1),
        33 => (T::VMadakF32, Format::VdstVsrc0Vsrc1Vsrc2),
        35 => (T::VMbcntLoU32B32, Format::SVdstSVsrc0SVsrc1),
        36 => (T::VMbcntHiU32B32, Format::SVdstSVsrc0SVsrc1),
        37 => (T::VAddI32, Format::VdstSdst2Vsrc0Vsrc1),
        38 => (T::VSubI32, Format::VdstSdst2Vsrc0Vsrc1),
        39 => (T::VSubrevI32, Format::VdstSdst2Vsrc0Vsrc1),
        47 => (T::VCvtPkrtzF16F32, Format::SVdstSVsrc0SVsrc1),
        _ => return None,
    })
}

fn vop1_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        1 => (T::VMovB32, Format::SVdstSVsrc0),
        6 => (T::VCvtF32U32, Format::SVdstSVsrc0),
        7 => (T::VCvtU32F32, Format::SVdstSVsrc0),
        42 => (T::VRcpF32, Format::SVdstSVsrc0),
        46 => (T::VRsqF32, Format::SVdstSVsrc0),
        51 => (T::VSqrtF32, Format::SVdstSVsrc0),
        _ => return None,
    })
}

fn vopc_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        0x02 => (T::VCmpEqF32, Format::SmaskVsrc0Vsrc1),
        0x03 => (T::VCmpLeF32, Format::SmaskVsrc0Vsrc1),
        0x0d => (T::VCmpNeqF32, Format::SmaskVsrc0Vsrc1),
        0xc2 => (T::VCmpEqU32, Format::SmaskVsrc0Vsrc1),
        0xc3 => (T::VCmpLeU32, Format::SmaskVsrc0Vsrc1),
        0xc5 => (T::VCmpNeU32, Format::SmaskVsrc0Vsrc1),
        0xd2 => (T::VCmpxEqU32, Format::SmaskVsrc0Vsrc1),
        0xd4 => (T::VCmpxGtU32, Format::SmaskVsrc0Vsrc1),
        _ => return None,
    })
}

fn vop3_only_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        0x141 => (T::VMadF32, Format::VdstVsrc0Vsrc1Vsrc2),
        0x15d => (T::VSadU32, Format::VdstVsrc0Vsrc1Vsrc2),
        _ => return None,
    })
}

fn mubuf_entry(op: u32) -> Option<(T, Format)> {
    Some(match op {
        0 => (T::BufferLoadFormatX, Format::Vdata1VaddrSvSoffsIdxen),
        1 => (T::BufferLoadFormatXy, Format::Vdata2VaddrSvSoffsIdxen),
        2 => (T::BufferLoadFormatXyz, Format::Vdata3VaddrSvSoffsIdxen),
        3 => (T::BufferLoadFormatXyzw, Format::Vdata4VaddrSvSoffsIdxen),
        4 => (T::BufferStoreFormatX, Format::Vdata1VaddrSvSoffsIdxen),
        12 => (T::BufferLoadDword, Format::Vdata1VaddrSvSoffsIdxen),
        28 => (T::BufferStoreDword, Format::Vdata1VaddrSvSoffsIdxen),
        _ => return None,
    })
}

fn vcc() -> ShaderOperand {
    ShaderOperand {
        ty: OperandType::VccLo,
        size: 2,
        ..Default::default()
    }
}

fn decode_sop2(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 23) & 0x7f;
    let (ty, format) = sop2_entry(op).ok_or_else(|| unsupported(cur.pc, "SOP2", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    inst.dst = cur.sdst((w >> 16) & 0x7f, format.dst_size())?;
    inst.src[0] = cur.src(w & 0xff, format.src_size(0))?;
    inst.src[1] = cur.src((w >> 8) & 0xff, format.src_size(1))?;
    Ok(inst)
}

fn decode_sop1(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 8) & 0xff;
    let (ty, format) = sop1_entry(op).ok_or_else(|| unsupported(cur.pc, "SOP1", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    if format.dst_size() > 0 {
        inst.dst = cur.sdst((w >> 16) & 0x7f, format.dst_size())?;
    }
    inst.src[0] = cur.src(w & 0xff, format.src_size(0))?;
    Ok(inst)
}

fn decode_sopp(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 16) & 0x7f;
    let (ty, format) = sopp_entry(op).ok_or_else(|| unsupported(cur.pc, "SOPP", op))?;
    let simm16 = w & 0xffff;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    match format {
        Format::Label => {
            let delta = i32::from(simm16 as u16 as i16) * 4;
            let target = (cur.pc as i32 + 4 + delta) as u32;
            inst.src[0] = ShaderOperand::literal(target);
        }
        Format::Imm => inst.src[0] = ShaderOperand::literal(simm16),
        _ => {}
    }
    inst.ctrl.offset = simm16 as u16;
    Ok(inst)
}

fn decode_smrd(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 22) & 0x1f;
    let (ty, format) = smrd_entry(op).ok_or_else(|| unsupported(cur.pc, "SMRD", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    let sdst = (w >> 15) & 0x7f;
    if sdst > 103 {
        return Err(unsupported(cur.pc, "SMRD sdst", sdst));
    }
    inst.dst = ShaderOperand::sgpr(sdst, format.dst_size());
    inst.src[0] = ShaderOperand::sgpr(((w >> 9) & 0x3f) * 2, format.src_size(0));
    let offset = w & 0xff;
    inst.src[1] = if (w >> 8) & 0x1 != 0 {
        // Immediate offsets are in dwords; keep bytes in the IR.
        ShaderOperand::literal(offset * 4)
    } else {
        cur.src(offset, 1)?
    };
    Ok(inst)
}

fn decode_vop2(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 25) & 0x3f;
    let (ty, format) = vop2_entry(op).ok_or_else(|| unsupported(cur.pc, "VOP2", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    inst.dst = ShaderOperand::vgpr((w >> 17) & 0xff, 1);
    inst.src[0] = cur.src(w & 0x1ff, 1)?;
    inst.src[1] = ShaderOperand::vgpr((w >> 9) & 0xff, 1);
    match ty {
        T::VCndmaskB32 => inst.src[2] = vcc(),
        T::VMadakF32 => inst.src[2] = ShaderOperand::literal(cur.literal()?),
        T::VAddI32 | T::VSubI32 | T::VSubrevI32 => inst.dst2 = vcc(),
        _ => {}
    }
    Ok(inst)
}

fn decode_vop1(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 9) & 0xff;
    let (ty, format) = vop1_entry(op).ok_or_else(|| unsupported(cur.pc, "VOP1", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    inst.dst = ShaderOperand::vgpr((w >> 17) & 0xff, 1);
    inst.src[0] = cur.src(w & 0x1ff, 1)?;
    Ok(inst)
}

fn decode_vopc(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 17) & 0xff;
    let (ty, format) = vopc_entry(op).ok_or_else(|| unsupported(cur.pc, "VOPC", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    inst.dst = vcc();
    inst.src[0] = cur.src(w & 0x1ff, 1)?;
    inst.src[1] = ShaderOperand::vgpr((w >> 9) & 0xff, 1);
    Ok(inst)
}

fn decode_vop3(cur: &mut Cursor<'_>, w0: u32) -> Result<ShaderInstruction> {
    let w1 = cur.word(1)?;
    let op = (w0 >> 17) & 0x1ff;
    let entry = match op {
        0..=255 => vopc_entry(op),
        256..=319 => vop2_entry(op - 256).filter(|(ty, _)| *ty != T::VMadakF32),
        320..=383 => vop3_only_entry(op),
        _ => vop1_entry(op - 384),
    };
    let (ty, format) = entry.ok_or_else(|| unsupported(cur.pc, "VOP3", op))?;
    let vop3b = matches!(ty, T::VAddI32 | T::VSubI32 | T::VSubrevI32);
    if !vop3b && (w0 >> 8) & 0x7 != 0 {
        return Err(unsupported(cur.pc, "VOP3 abs", op));
    }
    let codes = [w1 & 0x1ff, (w1 >> 9) & 0x1ff, (w1 >> 18) & 0x1ff];
    if codes[..format.src_num()].contains(&255) {
        return Err(unsupported(cur.pc, "VOP3 literal", op));
    }

    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    let vdst = w0 & 0xff;
    if format == Format::SmaskVsrc0Vsrc1 {
        inst.dst = cur.sdst(vdst, 2)?;
    } else {
        inst.dst = ShaderOperand::vgpr(vdst, 1);
    }
    if vop3b {
        inst.dst2 = cur.sdst((w0 >> 8) & 0x7f, 2)?;
    } else {
        inst.dst.clamp = (w0 >> 11) & 0x1 != 0;
    }
    inst.dst.multiplier = match (w1 >> 27) & 0x3 {
        0 => 1.0,
        1 => 2.0,
        2 => 4.0,
        _ => 0.5,
    };
    let neg = (w1 >> 29) & 0x7;
    for i in 0..inst.src_num {
        inst.src[i] = cur.src(codes[i], format.src_size(i as u8))?;
        inst.src[i].negate = (neg >> i) & 0x1 != 0;
    }
    Ok(inst)
}

fn decode_vintrp(cur: &mut Cursor<'_>, w: u32) -> Result<ShaderInstruction> {
    let op = (w >> 16) & 0x3;
    let ty = match op {
        0 => T::VInterpP1F32,
        1 => T::VInterpP2F32,
        _ => return Err(unsupported(cur.pc, "VINTRP", op)),
    };
    let mut inst = ShaderInstruction::new(cur.pc, ty, Format::VdstVsrcAttrChan);
    inst.dst = ShaderOperand::vgpr((w >> 18) & 0xff, 1);
    inst.src[0] = ShaderOperand::vgpr(w & 0xff, 1);
    inst.ctrl.chan = ((w >> 8) & 0x3) as u8;
    inst.ctrl.attr = ((w >> 10) & 0x3f) as u8;
    Ok(inst)
}

fn decode_ds(cur: &mut Cursor<'_>, w0: u32) -> Result<ShaderInstruction> {
    let w1 = cur.word(1)?;
    let op = (w0 >> 18) & 0xff;
    let ty = match op {
        61 => T::DsConsume,
        62 => T::DsAppend,
        _ => return Err(unsupported(cur.pc, "DS", op)),
    };
    if (w0 >> 17) & 0x1 == 0 {
        return Err(ShaderError::not_implemented(
            "LDS append/consume",
            format!("pc 0x{:x}: only the GDS form is supported", cur.pc),
        ));
    }
    let mut inst = ShaderInstruction::new(cur.pc, ty, Format::VdstGds);
    inst.dst = ShaderOperand::vgpr((w1 >> 24) & 0xff, 1);
    inst.ctrl.offset = (w0 & 0xffff) as u16;
    Ok(inst)
}

fn buffer_operands(cur: &mut Cursor<'_>, inst: &mut ShaderInstruction, w0: u32, w1: u32) -> Result<()> {
    let offen = (w0 >> 12) & 0x1 != 0;
    let idxen = (w0 >> 13) & 0x1 != 0;
    if offen || !idxen {
        return Err(ShaderError::not_implemented(
            "buffer addressing",
            format!("pc 0x{:x}: offen={offen} idxen={idxen}", cur.pc),
        ));
    }
    inst.dst = ShaderOperand::vgpr((w1 >> 8) & 0xff, inst.format.dst_size());
    inst.src[0] = ShaderOperand::vgpr(w1 & 0xff, 1);
    inst.src[1] = ShaderOperand::sgpr(((w1 >> 16) & 0x1f) * 4, 4);
    inst.src[2] = cur.src((w1 >> 24) & 0xff, 1)?;
    inst.ctrl.offset = (w0 & 0xfff) as u16;
    Ok(())
}

fn decode_mubuf(cur: &mut Cursor<'_>, w0: u32) -> Result<ShaderInstruction> {
    let w1 = cur.word(1)?;
    let op = (w0 >> 18) & 0x7f;
    let (ty, format) = mubuf_entry(op).ok_or_else(|| unsupported(cur.pc, "MUBUF", op))?;
    let mut inst = ShaderInstruction::new(cur.pc, ty, format);
    buffer_operands(cur, &mut inst, w0, w1)?;
    Ok(inst)
}

fn decode_mtbuf(cur: &mut Cursor<'_>, w0: u32) -> Result<ShaderInstruction> {
    let w1 = cur.word(1)?;
    let op = (w0 >> 16) & 0x7;
    let dfmt = (w0 >> 19) & 0xf;
    let nfmt = (w0 >> 23) & 0x7;
    if op != 3 {
        return Err(unsupported(cur.pc, "MTBUF", op));
    }
    if dfmt != 14 || nfmt != 7 {
        return Err(ShaderError::not_implemented(
            "tbuffer format",
            format!("pc 0x{:x}: dfmt={dfmt} nfmt={nfmt}", cur.pc),
        ));
    }
    let mut inst = ShaderInstruction::new(cur.pc, T::TBufferLoadFormatXyzw, Format::Vdata4VaddrSvSoffsIdxenFloat4);
    buffer_operands(cur, &mut inst, w0, w1)?;
    Ok(inst)
}

fn decode_mimg(cur: &mut Cursor<'_>, w0: u32) -> Result<ShaderInstruction> {
    let w1 = cur.word(1)?;
    let op = (w0 >> 18) & 0x7f;
    if op != 0x20 {
        return Err(unsupported(cur.pc, "MIMG", op));
    }
    let dmask = (w0 >> 8) & 0xf;
    let format = match dmask {
        0xf => Format::Vdata4Vaddr3StSsDmaskF,
        0x7 => Format::Vdata3Vaddr3StSsDmask7,
        _ => {
            return Err(ShaderError::not_implemented(
                "image_sample dmask",
                format!("pc 0x{:x}: dmask=0x{dmask:x}", cur.pc),
            ))
        }
    };
    let mut inst = ShaderInstruction::new(cur.pc, T::ImageSample, format);
    inst.dst = ShaderOperand::vgpr((w1 >> 8) & 0xff, format.dst_size());
    inst.src[0] = ShaderOperand::vgpr(w1 & 0xff, 3);
    inst.src[1] = ShaderOperand::sgpr(((w1 >> 16) & 0x1f) * 4, 8);
    inst.src[2] = ShaderOperand::sgpr(((w1 >> 21) & 0x1f) * 4, 4);
    Ok(inst)
}

fn decode_exp(cur: &mut Cursor<'_>, w0: u32) -> Result<ShaderInstruction> {
    let w1 = cur.word(1)?;
    let en = (w0 & 0xf) as u8;
    let tgt = (w0 >> 4) & 0x3f;
    let compr = (w0 >> 10) & 0x1 != 0;
    let done = (w0 >> 11) & 0x1 != 0;
    let vm = (w0 >> 12) & 0x1 != 0;
    let format = match (tgt, compr, done, vm) {
        (0, true, true, true) => Format::Mrt0Vsrc0Vsrc1ComprVmDone,
        (0, false, true, true) => Format::Mrt0Vsrc0Vsrc1Vsrc2Vsrc3VmDone,
        (12, false, true, _) => Format::Pos0Vsrc0Vsrc1Vsrc2Vsrc3Done,
        (32, false, false, _) => Format::Param0Vsrc0Vsrc1Vsrc2Vsrc3,
        (33, false, false, _) => Format::Param1Vsrc0Vsrc1Vsrc2Vsrc3,
        (34, false, false, _) => Format::Param2Vsrc0Vsrc1Vsrc2Vsrc3,
        (35, false, false, _) => Format::Param3Vsrc0Vsrc1Vsrc2Vsrc3,
        _ => return Err(unsupported(cur.pc, "EXP", w0 & 0x1fff)),
    };
    let mut inst = ShaderInstruction::new(cur.pc, T::Exp, format);
    for i in 0..inst.src_num {
        inst.src[i] = ShaderOperand::vgpr((w1 >> (8 * i)) & 0xff, 1);
    }
    inst.ctrl.en = en;
    Ok(inst)
}

fn decode_one(cur: &mut Cursor<'_>) -> Result<ShaderInstruction> {
    let w = cur.word(0)?;
    match w >> 23 {
        0x17d => return decode_sop1(cur, w),
        0x17e => return Err(unsupported(cur.pc, "SOPC", (w >> 16) & 0x7f)),
        0x17f => return decode_sopp(cur, w),
        _ => {}
    }
    match w >> 25 {
        0x3f => return decode_vop1(cur, w),
        0x3e => return decode_vopc(cur, w),
        _ => {}
    }
    if w >> 31 == 0 {
        return decode_vop2(cur, w);
    }
    if w >> 28 == 0xb {
        return Err(unsupported(cur.pc, "SOPK", (w >> 23) & 0x1f));
    }
    if w >> 30 == 0x2 {
        return decode_sop2(cur, w);
    }
    if w >> 27 == 0x18 {
        return decode_smrd(cur, w);
    }
    match w >> 26 {
        0x34 => decode_vop3(cur, w),
        0x32 => decode_vintrp(cur, w),
        0x36 => decode_ds(cur, w),
        0x38 => decode_mubuf(cur, w),
        0x3a => decode_mtbuf(cur, w),
        0x3c => decode_mimg(cur, w),
        0x3e => decode_exp(cur, w),
        other => Err(unsupported(cur.pc, "unknown", other)),
    }
}

fn decode_stream(read: &dyn Fn(usize) -> Result<u32>, ty: ShaderType) -> Result<ShaderCode> {
    let mut code = ShaderCode::new(ty);
    let mut index = 0usize;
    loop {
        let mut cur = Cursor {
            read,
            index,
            pc: (index * 4) as u32,
            words: 0,
            literal: None,
        };
        let inst = decode_one(&mut cur)?;
        index += cur.len();
        if let Some(target) = inst.branch_target() {
            code.labels.insert(target);
        }
        let terminator = match ty {
            ShaderType::Fetch => inst.ty == T::SSetpcB64,
            _ => inst.ty == T::SEndpgm,
        };
        code.instructions.push(inst);
        let next_pc = (index * 4) as u32;
        if terminator && code.labels.range(next_pc..).next().is_none() {
            break;
        }
    }
    debug!(
        ?ty,
        instructions = code.instructions.len(),
        labels = code.labels.len(),
        "decoded shader"
    );
    Ok(code)
}

/// Decodes a program held in `words`, starting at word 0.
pub fn shader_parse(words: &[u32], ty: ShaderType) -> Result<ShaderCode> {
    let read = |i: usize| -> Result<u32> {
        words
            .get(i)
            .copied()
            .ok_or_else(|| ShaderError::malformed((i * 4) as u32, "instruction stream truncated"))
    };
    decode_stream(&read, ty)
}

/// Decodes a program directly from guest memory, reading at most `max_dwords` words.
pub fn shader_parse_guest(mem: &dyn GuestMemory, addr: u64, ty: ShaderType, max_dwords: usize) -> Result<ShaderCode> {
    let read = |i: usize| -> Result<u32> {
        if i >= max_dwords {
            return Err(ShaderError::malformed((i * 4) as u32, "program exceeds its length"));
        }
        let w = read_u32s(mem, addr + (i as u64) * 4, 1)?;
        Ok(w[0])
    };
    decode_stream(&read, ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ShaderInstructionType;

    #[test]
    fn endpgm_followed_by_padding() {
        let code = shader_parse(&[0xbf81_0000, 0xbf80_0000, 0xbf80_0000], ShaderType::Pixel).unwrap();
        assert_eq!(code.instructions.len(), 1);
        assert_eq!(code.instructions[0].ty, ShaderInstructionType::SEndpgm);
        assert!(code.labels.is_empty());
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let err = shader_parse(&[0xbf80_0000], ShaderType::Pixel).unwrap_err();
        assert!(matches!(err, ShaderError::Malformed { pc: 4, .. }));
    }

    #[test]
    fn forward_branch_keeps_decoding_past_endpgm() {
        // s_cbranch_execz +1; s_endpgm; s_endpgm
        let code = shader_parse(&[0xbf88_0001, 0xbf81_0000, 0xbf81_0000], ShaderType::Pixel).unwrap();
        assert_eq!(code.instructions.len(), 3);
        assert_eq!(code.labels.iter().copied().collect::<Vec<_>>(), vec![8]);
        assert!(code.labels_consistent());
    }

    #[test]
    fn literal_extends_instruction() {
        // v_mov_b32 v1, 0x3f800000; s_endpgm
        let code = shader_parse(&[0x7e02_02ff, 0x3f80_0000, 0xbf81_0000], ShaderType::Pixel).unwrap();
        assert_eq!(code.instructions.len(), 2);
        let mov = &code.instructions[0];
        assert_eq!(mov.ty, ShaderInstructionType::VMovB32);
        assert_eq!(mov.src[0], ShaderOperand::literal(0x3f80_0000));
        assert_eq!(mov.dst, ShaderOperand::vgpr(1, 1));
        assert_eq!(code.instructions[1].pc, 8);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        // VOP1 op 0x7f does not exist in the table.
        let err = shader_parse(&[0x7e00_fe00, 0xbf81_0000], ShaderType::Pixel).unwrap_err();
        assert!(matches!(
            err,
            ShaderError::UnsupportedInstruction {
                encoding: "VOP1",
                opcode: 0x7f,
                ..
            }
        ));
    }

    #[test]
    fn inline_constants_decode() {
        let read = |_: usize| -> Result<u32> { Ok(0) };
        let mut cur = Cursor {
            read: &read,
            index: 0,
            pc: 0,
            words: 1,
            literal: None,
        };
        assert_eq!(cur.src(128 + 7, 1).unwrap().constant, 7);
        assert_eq!(cur.src(193, 1).unwrap().constant as i32, -1);
        assert_eq!(cur.src(208, 1).unwrap().constant as i32, -16);
        assert_eq!(f32::from_bits(cur.src(242, 1).unwrap().constant), 1.0);
        assert_eq!(cur.src(300, 1).unwrap(), ShaderOperand::vgpr(44, 1));
        assert!(cur.src(251, 1).is_err());
    }
}
