//! Lowers decoded GCN code to WGSL.
//!
//! Every host invocation runs one guest lane. Scalar registers live in `s`, vector registers in
//! `v`; 64-bit lane masks (EXEC, VCC) only ever hold the invoking lane's bit in bit 0 of the low
//! word, so `exec_lo != 0u` means "this lane is active". Programs with branches are lowered to a
//! block-dispatch loop keyed by `cf_block`.

use std::collections::BTreeSet;
use std::fmt::Display;

use hashbrown::HashMap;

use crate::bindings::{ShaderResources, ShaderStorageUsage, StorageBufferBinding};
use crate::error::{Result, ShaderError};
use crate::input_info::{ShaderComputeInputInfo, ShaderPixelInputInfo, ShaderVertexInputInfo};
use crate::ir::{
    OperandType, ShaderCode, ShaderInstruction, ShaderInstructionType as T, ShaderOperand, ShaderType,
};
use crate::regs::{CsStageRegisters, PS_INPUT_PERSP_CENTER, PS_INPUT_POS_X, USER_SGPR_COUNT};

const SGPR_COUNT: u32 = 104;
const END_BLOCK: &str = "0xffffffffu";
const CHANNELS: [char; 4] = ['x', 'y', 'z', 'w'];

/// `SPI_SHADER_COL_FORMAT` values the pixel exporter understands.
const COL_FORMAT_ZERO: u8 = 0;
const COL_FORMAT_FP16_ABGR: u8 = 4;
const COL_FORMAT_32_ABGR: u8 = 9;

const NFMT_UINT: u8 = 4;
const NFMT_SINT: u8 = 5;
const NFMT_FLOAT: u8 = 7;

/// Texture number formats that sample as `texture_2d<f32>`: unorm, snorm, float, srgb.
const FLOAT_TEXTURE_NFMTS: [u8; 4] = [0, 1, 7, 9];

pub(crate) enum StageIo<'a> {
    Vertex(&'a ShaderVertexInputInfo),
    Pixel {
        info: &'a ShaderPixelInputInfo,
        input_ena: u32,
    },
    Compute {
        info: &'a ShaderComputeInputInfo,
        regs: &'a CsStageRegisters,
    },
}

impl StageIo<'_> {
    fn bind(&self) -> &ShaderResources {
        match self {
            Self::Vertex(info) => &info.bind,
            Self::Pixel { info, .. } => &info.bind,
            Self::Compute { info, .. } => &info.bind,
        }
    }

    fn stage(&self) -> ShaderType {
        match self {
            Self::Vertex(_) => ShaderType::Vertex,
            Self::Pixel { .. } => ShaderType::Pixel,
            Self::Compute { .. } => ShaderType::Compute,
        }
    }
}

pub(crate) struct WgslOutput {
    pub wgsl: String,
    pub entry_point: &'static str,
}

fn not_impl(pc: u32, what: &'static str, detail: impl Display) -> ShaderError {
    ShaderError::not_implemented(what, format!("pc 0x{pc:x}: {detail}"))
}

fn src_u32(pc: u32, op: &ShaderOperand, k: u32) -> Result<String> {
    if op.negate {
        return Err(not_impl(pc, "source modifier", "negate on an integer operand"));
    }
    let reg = |name: &str, hi: &str| if k == 0 { name.to_string() } else { hi.to_string() };
    Ok(match op.ty {
        OperandType::Sgpr => format!("s[{}]", op.register_id + k),
        OperandType::Vgpr => format!("v[{}]", op.register_id + k),
        OperandType::VccLo => reg("vcc_lo", "vcc_hi"),
        OperandType::VccHi => "vcc_hi".to_string(),
        OperandType::ExecLo => reg("exec_lo", "exec_hi"),
        OperandType::ExecHi => "exec_hi".to_string(),
        OperandType::M0 => "m0".to_string(),
        OperandType::ExecZ => "select(0u, 1u, exec_lo == 0u)".to_string(),
        OperandType::LiteralConstant | OperandType::FloatInlineConstant => {
            if k == 0 {
                format!("0x{:x}u", op.constant)
            } else {
                "0u".to_string()
            }
        }
        OperandType::IntegerInlineConstant => {
            if k == 0 {
                format!("0x{:x}u", op.constant)
            } else if (op.constant as i32) < 0 {
                "0xffffffffu".to_string()
            } else {
                "0u".to_string()
            }
        }
        OperandType::Unknown => return Err(ShaderError::malformed(pc, "operand without a type")),
    })
}

fn src_f32(pc: u32, op: &ShaderOperand) -> Result<String> {
    let raw = src_u32(
        pc,
        &ShaderOperand {
            negate: false,
            ..*op
        },
        0,
    )?;
    let value = format!("bitcast<f32>({raw})");
    Ok(if op.negate { format!("(-{value})") } else { value })
}

fn dst_ref(pc: u32, op: &ShaderOperand, k: u32) -> Result<String> {
    Ok(match op.ty {
        OperandType::Sgpr => format!("s[{}]", op.register_id + k),
        OperandType::Vgpr => format!("v[{}]", op.register_id + k),
        OperandType::VccLo if k == 0 => "vcc_lo".to_string(),
        OperandType::VccLo | OperandType::VccHi => "vcc_hi".to_string(),
        OperandType::ExecLo if k == 0 => "exec_lo".to_string(),
        OperandType::ExecLo | OperandType::ExecHi => "exec_hi".to_string(),
        OperandType::M0 => "m0".to_string(),
        other => return Err(not_impl(pc, "destination", format!("{other:?}"))),
    })
}

fn is_lane_mask(op: &ShaderOperand) -> bool {
    matches!(op.ty, OperandType::VccLo | OperandType::ExecLo) && op.size == 2
}

fn float_result(dst: &ShaderOperand, expr: String) -> String {
    let mut e = expr;
    if dst.multiplier != 1.0 {
        e = format!("({e} * {:?})", dst.multiplier);
    }
    if dst.clamp {
        e = format!("clamp({e}, 0.0, 1.0)");
    }
    format!("bitcast<u32>({e})")
}

fn int_result(pc: u32, dst: &ShaderOperand, expr: String) -> Result<String> {
    if dst.clamp || dst.multiplier != 1.0 {
        return Err(not_impl(pc, "output modifier", "clamp/omod on an integer result"));
    }
    Ok(expr)
}

#[derive(Default)]
struct Writer {
    out: String,
    depth: usize,
}

impl Writer {
    fn line(&mut self, s: impl AsRef<str>) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(s.as_ref());
        self.out.push('\n');
    }

    fn open(&mut self, s: impl AsRef<str>) {
        self.line(s);
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("}");
    }
}

struct Emitter<'a> {
    code: &'a ShaderCode,
    io: &'a StageIo<'a>,
    bind: &'a ShaderResources,
    /// SGPR holding a descriptor loaded from the extended table -> its extended start register.
    ext_map: HashMap<u32, u8>,
    /// Block start pcs; empty for straight-line programs.
    blocks: Vec<u32>,
    w: Writer,
}

impl<'a> Emitter<'a> {
    fn new(code: &'a ShaderCode, io: &'a StageIo<'a>) -> Result<Self> {
        let bind = io.bind();
        let mut ext_map = HashMap::new();
        for inst in &code.instructions {
            if !matches!(inst.ty, T::SLoadDwordx4 | T::SLoadDwordx8) {
                continue;
            }
            let from_table = bind.extended_register().map(u32::from) == Some(inst.src[0].register_id)
                && inst.src[1].ty == OperandType::LiteralConstant;
            if !from_table {
                return Err(not_impl(inst.pc, "scalar load", format!("{inst} is not an extended user-data read")));
            }
            let start = USER_SGPR_COUNT as u32 + inst.src[1].constant / 4;
            ext_map.insert(inst.dst.register_id, start as u8);
        }

        let mut blocks = Vec::new();
        if !code.labels.is_empty() {
            let mut starts: BTreeSet<u32> = BTreeSet::new();
            starts.insert(0);
            for label in &code.labels {
                if code.instruction_at(*label).is_none() {
                    return Err(ShaderError::malformed(*label, "branch target is not an instruction"));
                }
                starts.insert(*label);
            }
            for pair in code.instructions.windows(2) {
                if pair[0].ty.is_branch() || pair[0].ty == T::SEndpgm {
                    starts.insert(pair[1].pc);
                }
            }
            blocks = starts.into_iter().collect();
        }

        Ok(Self {
            code,
            io,
            bind,
            ext_map,
            blocks,
            w: Writer::default(),
        })
    }

    fn stage(&self) -> ShaderType {
        self.io.stage()
    }

    fn block_ref(&self, pc: Option<u32>) -> Result<String> {
        match pc {
            None => Ok(END_BLOCK.to_string()),
            Some(pc) => self
                .blocks
                .binary_search(&pc)
                .map(|i| format!("{i}u"))
                .map_err(|_| ShaderError::malformed(pc, "jump into the middle of a block")),
        }
    }

    fn next_pc(&self, inst: &ShaderInstruction) -> Option<u32> {
        self.code
            .instructions
            .iter()
            .find(|i| i.pc > inst.pc)
            .map(|i| i.pc)
    }

    fn resolve(&self, reg: u32) -> (u8, bool) {
        match self.ext_map.get(&reg) {
            Some(start) => (*start, true),
            None => (reg as u8, false),
        }
    }

    fn storage_buffer(&self, pc: u32, reg: u32) -> Result<(usize, &'a StorageBufferBinding)> {
        let (start, extended) = self.resolve(reg);
        let bind: &'a ShaderResources = self.bind;
        bind.storage_buffers
            .iter()
            .enumerate()
            .find(|(_, b)| b.start_register == start && b.extended == extended)
            .ok_or_else(|| not_impl(pc, "resource binding", format!("no buffer bound from s{reg}")))
    }

    fn texture(&self, pc: u32, reg: u32) -> Result<usize> {
        let (start, extended) = self.resolve(reg);
        self.bind
            .textures2d
            .iter()
            .position(|t| t.start_register == start && t.extended == extended)
            .ok_or_else(|| not_impl(pc, "resource binding", format!("no texture bound from s{reg}")))
    }

    fn sampler(&self, pc: u32, reg: u32) -> Result<usize> {
        let (start, extended) = self.resolve(reg);
        self.bind
            .samplers
            .iter()
            .position(|s| s.start_register == start && s.extended == extended)
            .ok_or_else(|| not_impl(pc, "resource binding", format!("no sampler bound from s{reg}")))
    }

    fn guard_open(&mut self) {
        self.w.open("if (exec_lo != 0u) {");
    }

    fn write_b64(&mut self, pc: u32, dst: &ShaderOperand, lo: &str, hi: &str) -> Result<()> {
        if is_lane_mask(dst) {
            self.w.line(format!("{} = ({lo}) & 1u;", dst_ref(pc, dst, 0)?));
            self.w.line(format!("{} = 0u;", dst_ref(pc, dst, 1)?));
        } else {
            self.w.line(format!("{} = {lo};", dst_ref(pc, dst, 0)?));
            self.w.line(format!("{} = {hi};", dst_ref(pc, dst, 1)?));
        }
        Ok(())
    }

    fn emit_salu(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        self.w.open("{");
        match inst.ty {
            T::SMovB32 => {
                self.w.line(format!("let r = {};", src_u32(pc, &inst.src[0], 0)?));
                self.w.line(format!("{} = r;", dst_ref(pc, &inst.dst, 0)?));
            }
            T::SLshlB32 => {
                self.w.line(format!(
                    "let r = {} << ({} & 31u);",
                    src_u32(pc, &inst.src[0], 0)?,
                    src_u32(pc, &inst.src[1], 0)?
                ));
                self.w.line(format!("{} = r;", dst_ref(pc, &inst.dst, 0)?));
                self.w.line("scc = select(0u, 1u, r != 0u);");
            }
            T::SMovB64 => {
                self.w.line(format!("let lo = {};", src_u32(pc, &inst.src[0], 0)?));
                self.w.line(format!("let hi = {};", src_u32(pc, &inst.src[0], 1)?));
                self.write_b64(pc, &inst.dst, "lo", "hi")?;
            }
            T::SWqmB64 => {
                self.w.line(format!(
                    "let lo = select(0u, 1u, ({} & 0xfu) != 0u);",
                    src_u32(pc, &inst.src[0], 0)?
                ));
                self.w.line("let hi = 0u;");
                self.write_b64(pc, &inst.dst, "lo", "hi")?;
                self.w.line("scc = select(0u, 1u, lo != 0u);");
            }
            T::SAndn2B64 => {
                self.w.line(format!(
                    "let lo = {} & ~{};",
                    src_u32(pc, &inst.src[0], 0)?,
                    src_u32(pc, &inst.src[1], 0)?
                ));
                self.w.line(format!(
                    "let hi = {} & ~{};",
                    src_u32(pc, &inst.src[0], 1)?,
                    src_u32(pc, &inst.src[1], 1)?
                ));
                self.write_b64(pc, &inst.dst, "lo", "hi")?;
                self.w.line("scc = select(0u, 1u, (lo | hi) != 0u);");
            }
            T::SAndSaveexecB64 => {
                self.w.line(format!("let lo = {};", src_u32(pc, &inst.src[0], 0)?));
                self.w.line("let old_lo = exec_lo;");
                self.w.line("let old_hi = exec_hi;");
                self.w.line("exec_lo = (lo & old_lo) & 1u;");
                self.w.line("exec_hi = 0u;");
                self.write_b64(pc, &inst.dst, "old_lo", "old_hi")?;
                self.w.line("scc = select(0u, 1u, exec_lo != 0u);");
            }
            _ => return Err(not_impl(pc, "recompile", inst.ty.mnemonic())),
        }
        self.w.close();
        Ok(())
    }

    fn emit_smrd(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        if matches!(inst.ty, T::SLoadDwordx4 | T::SLoadDwordx8) {
            // Resolved statically into `ext_map`.
            return Ok(());
        }
        let (index, _) = self.storage_buffer(pc, inst.src[0].register_id)?;
        let offset = match inst.src[1].ty {
            OperandType::LiteralConstant => format!("{}u", inst.src[1].constant),
            _ => src_u32(pc, &inst.src[1], 0)?,
        };
        self.w.open("{");
        self.w.line(format!("let base = ({offset}) >> 2u;"));
        for k in 0..u32::from(inst.dst.size) {
            self.w
                .line(format!("{} = buffer{index}[base + {k}u];", dst_ref(pc, &inst.dst, k)?));
        }
        self.w.close();
        Ok(())
    }

    fn emit_valu(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        let f = |i: usize| src_f32(pc, &inst.src[i]);
        let u = |i: usize| src_u32(pc, &inst.src[i], 0);
        let fl = |e: String| float_result(&inst.dst, e);
        let value = match inst.ty {
            T::VAddF32 => fl(format!("({} + {})", f(0)?, f(1)?)),
            T::VSubF32 => fl(format!("({} - {})", f(0)?, f(1)?)),
            T::VSubrevF32 => fl(format!("({} - {})", f(1)?, f(0)?)),
            T::VMulF32 => fl(format!("({} * {})", f(0)?, f(1)?)),
            T::VMinF32 => fl(format!("min({}, {})", f(0)?, f(1)?)),
            T::VMaxF32 => fl(format!("max({}, {})", f(0)?, f(1)?)),
            T::VMacF32 => fl(format!(
                "({} * {} + bitcast<f32>({}))",
                f(0)?,
                f(1)?,
                dst_ref(pc, &inst.dst, 0)?
            )),
            T::VMadakF32 | T::VMadF32 => fl(format!("({} * {} + {})", f(0)?, f(1)?, f(2)?)),
            T::VCvtF32U32 => fl(format!("f32({})", u(0)?)),
            T::VRcpF32 => fl(format!("(1.0 / {})", f(0)?)),
            T::VRsqF32 => fl(format!("inverseSqrt({})", f(0)?)),
            T::VSqrtF32 => fl(format!("sqrt({})", f(0)?)),
            T::VMovB32 => int_result(pc, &inst.dst, u(0)?)?,
            T::VAndB32 => int_result(pc, &inst.dst, format!("({} & {})", u(0)?, u(1)?))?,
            T::VCvtU32F32 => int_result(pc, &inst.dst, format!("u32({})", f(0)?))?,
            T::VCvtPkrtzF16F32 => int_result(
                pc,
                &inst.dst,
                format!("pack2x16float(vec2<f32>({}, {}))", f(0)?, f(1)?),
            )?,
            // One lane per invocation: no lower lanes are ever counted.
            T::VMbcntLoU32B32 | T::VMbcntHiU32B32 => int_result(pc, &inst.dst, u(1)?)?,
            T::VSadU32 => {
                let (a, b, c) = (u(0)?, u(1)?, u(2)?);
                int_result(pc, &inst.dst, format!("(select({b} - {a}, {a} - {b}, {a} > {b}) + {c})"))?
            }
            T::VCndmaskB32 => int_result(
                pc,
                &inst.dst,
                format!(
                    "select({}, {}, ({} & 1u) != 0u)",
                    u(0)?,
                    u(1)?,
                    src_u32(pc, &inst.src[2], 0)?
                ),
            )?,
            _ => return Err(not_impl(pc, "recompile", inst.ty.mnemonic())),
        };
        self.guard_open();
        self.w.line(format!("{} = {value};", dst_ref(pc, &inst.dst, 0)?));
        self.w.close();
        Ok(())
    }

    fn emit_carry(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        int_result(pc, &inst.dst, String::new())?;
        let (result, carry) = match inst.ty {
            T::VAddI32 => ("a + b", "r < a"),
            T::VSubI32 => ("a - b", "b > a"),
            _ => ("b - a", "a > b"),
        };
        let carry_lo = dst_ref(pc, &inst.dst2, 0)?;
        let carry_hi = dst_ref(pc, &inst.dst2, 1)?;
        self.guard_open();
        self.w.line(format!("let a = {};", src_u32(pc, &inst.src[0], 0)?));
        self.w.line(format!("let b = {};", src_u32(pc, &inst.src[1], 0)?));
        self.w.line(format!("let r = {result};"));
        self.w.line(format!("{} = r;", dst_ref(pc, &inst.dst, 0)?));
        self.w.line(format!("{carry_lo} = select(0u, 1u, {carry});"));
        self.w.depth -= 1;
        self.w.open("} else {");
        self.w.line(format!("{carry_lo} = 0u;"));
        self.w.close();
        self.w.line(format!("{carry_hi} = 0u;"));
        Ok(())
    }

    fn emit_vopc(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        let f = |i: usize| src_f32(pc, &inst.src[i]);
        let u = |i: usize| src_u32(pc, &inst.src[i], 0);
        let cond = match inst.ty {
            T::VCmpEqF32 => format!("{} == {}", f(0)?, f(1)?),
            T::VCmpLeF32 => format!("{} <= {}", f(0)?, f(1)?),
            T::VCmpNeqF32 => format!("!({} == {})", f(0)?, f(1)?),
            T::VCmpEqU32 | T::VCmpxEqU32 => format!("{} == {}", u(0)?, u(1)?),
            T::VCmpLeU32 => format!("{} <= {}", u(0)?, u(1)?),
            T::VCmpNeU32 => format!("{} != {}", u(0)?, u(1)?),
            T::VCmpxGtU32 => format!("{} > {}", u(0)?, u(1)?),
            _ => return Err(not_impl(pc, "recompile", inst.ty.mnemonic())),
        };
        self.w.open("{");
        self.w.line(format!("let cond = (exec_lo != 0u) && ({cond});"));
        self.w.line(format!("{} = select(0u, 1u, cond);", dst_ref(pc, &inst.dst, 0)?));
        self.w.line(format!("{} = 0u;", dst_ref(pc, &inst.dst, 1)?));
        if matches!(inst.ty, T::VCmpxEqU32 | T::VCmpxGtU32) {
            self.w.line("exec_lo = select(0u, 1u, cond);");
            self.w.line("exec_hi = 0u;");
        }
        self.w.close();
        Ok(())
    }

    fn buffer_address(&self, inst: &ShaderInstruction, stride: u32) -> Result<String> {
        let pc = inst.pc;
        Ok(format!(
            "let addr = ({} * {stride}u + {}u + {}) >> 2u;",
            src_u32(pc, &inst.src[0], 0)?,
            inst.ctrl.offset,
            src_u32(pc, &inst.src[2], 0)?
        ))
    }

    fn emit_buffer(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        let (index, binding) = self.storage_buffer(pc, inst.src[1].register_id)?;
        let v = binding.buffer;
        let stride = u32::from(v.stride());
        let store = matches!(inst.ty, T::BufferStoreDword | T::BufferStoreFormatX);
        if store && binding.usage != ShaderStorageUsage::ReadWrite {
            return Err(not_impl(pc, "buffer store", format!("buffer{index} is bound {:?}", binding.usage)));
        }

        // Number of dwords the descriptor format provides; None for raw dword access.
        let format_components = match inst.ty {
            T::BufferLoadFormatX
            | T::BufferLoadFormatXy
            | T::BufferLoadFormatXyz
            | T::BufferLoadFormatXyzw
            | T::BufferStoreFormatX => {
                let n = match v.dfmt() {
                    4 => 1,
                    11 => 2,
                    13 => 3,
                    14 => 4,
                    other => return Err(not_impl(pc, "buffer format", format!("dfmt {other}"))),
                };
                if ![NFMT_UINT, NFMT_SINT, NFMT_FLOAT].contains(&v.nfmt()) {
                    return Err(not_impl(pc, "buffer format", format!("nfmt {}", v.nfmt())));
                }
                let sels = [v.dst_sel_x(), v.dst_sel_y(), v.dst_sel_z(), v.dst_sel_w()];
                let used = n.min(u32::from(inst.dst.size)) as usize;
                if sels[..used].iter().enumerate().any(|(k, s)| usize::from(*s) != 4 + k) {
                    return Err(not_impl(pc, "buffer format", format!("dst_sel {:?}", sels)));
                }
                if inst.ty == T::BufferStoreFormatX && n != 1 {
                    return Err(not_impl(pc, "buffer format", format!("store to dfmt {}", v.dfmt())));
                }
                Some(n)
            }
            _ => None,
        };

        let address = self.buffer_address(inst, stride)?;
        self.guard_open();
        self.w.line(address);
        if store {
            self.w.line(format!("buffer{index}[addr] = {};", src_u32(pc, &inst.dst, 0)?));
        } else {
            for k in 0..u32::from(inst.dst.size) {
                let value = match format_components {
                    Some(n) if k >= n && k == 3 && v.nfmt() == NFMT_FLOAT => "0x3f800000u".to_string(),
                    Some(n) if k >= n && k == 3 => "1u".to_string(),
                    Some(n) if k >= n => "0u".to_string(),
                    _ => format!("buffer{index}[addr + {k}u]"),
                };
                self.w.line(format!("{} = {value};", dst_ref(pc, &inst.dst, k)?));
            }
        }
        self.w.close();
        Ok(())
    }

    fn emit_image_sample(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        let t = self.texture(pc, inst.src[1].register_id)?;
        let s = self.sampler(pc, inst.src[2].register_id)?;
        let coord = format!(
            "vec2<f32>(bitcast<f32>(v[{}]), bitcast<f32>(v[{}]))",
            inst.src[0].register_id,
            inst.src[0].register_id + 1
        );
        let sample = match self.stage() {
            ShaderType::Pixel => format!("textureSample(texture{t}, sampler{s}, {coord})"),
            _ => format!("textureSampleLevel(texture{t}, sampler{s}, {coord}, 0.0)"),
        };
        self.guard_open();
        self.w.line(format!("let texel = {sample};"));
        for k in 0..u32::from(inst.dst.size) {
            self.w.line(format!(
                "{} = bitcast<u32>(texel.{});",
                dst_ref(pc, &inst.dst, k)?,
                CHANNELS[k as usize]
            ));
        }
        self.w.close();
        Ok(())
    }

    fn emit_gds(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        if self.bind.gds_pointers.is_empty() {
            return Err(not_impl(pc, "GDS", "no GDS pointer bound"));
        }
        let op = if inst.ty == T::DsAppend { "atomicAdd" } else { "atomicSub" };
        let index = u32::from(inst.ctrl.offset) / 4;
        self.guard_open();
        self.w.line(format!("{} = {op}(&gds0[{index}u], 1u);", dst_ref(pc, &inst.dst, 0)?));
        self.w.close();
        Ok(())
    }

    fn emit_interp(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        let input_num = match self.io {
            StageIo::Pixel { info, .. } => info.input_num,
            _ => return Err(not_impl(pc, "interpolation", "v_interp outside a pixel shader")),
        };
        if u32::from(inst.ctrl.attr) >= input_num {
            return Err(not_impl(
                pc,
                "interpolation",
                format!("attr{} but only {input_num} interpolants", inst.ctrl.attr),
            ));
        }
        // The host rasterizer already interpolated; both halves of the p1/p2 pair yield the result.
        self.guard_open();
        self.w.line(format!(
            "{} = bitcast<u32>(input.attr{}.{});",
            dst_ref(pc, &inst.dst, 0)?,
            inst.ctrl.attr,
            CHANNELS[usize::from(inst.ctrl.chan & 0x3)]
        ));
        self.w.close();
        Ok(())
    }

    fn emit_export(&mut self, inst: &ShaderInstruction) -> Result<()> {
        use crate::ir::Format;
        let pc = inst.pc;
        let component = |k: usize| {
            if inst.ctrl.en & (1 << k) != 0 {
                format!("bitcast<f32>(v[{}])", inst.src[k].register_id)
            } else {
                "0.0".to_string()
            }
        };
        let vec4 = || {
            format!(
                "vec4<f32>({}, {}, {}, {})",
                component(0),
                component(1),
                component(2),
                component(3)
            )
        };
        self.guard_open();
        match (inst.format, self.io) {
            (Format::Pos0Vsrc0Vsrc1Vsrc2Vsrc3Done, StageIo::Vertex(_)) => {
                self.w.line(format!("out_position = {};", vec4()));
            }
            (
                Format::Param0Vsrc0Vsrc1Vsrc2Vsrc3
                | Format::Param1Vsrc0Vsrc1Vsrc2Vsrc3
                | Format::Param2Vsrc0Vsrc1Vsrc2Vsrc3
                | Format::Param3Vsrc0Vsrc1Vsrc2Vsrc3,
                StageIo::Vertex(info),
            ) => {
                let n = match inst.format {
                    Format::Param0Vsrc0Vsrc1Vsrc2Vsrc3 => 0,
                    Format::Param1Vsrc0Vsrc1Vsrc2Vsrc3 => 1,
                    Format::Param2Vsrc0Vsrc1Vsrc2Vsrc3 => 2,
                    _ => 3,
                };
                if n >= info.export_count {
                    return Err(not_impl(pc, "export", format!("param{n} beyond export count {}", info.export_count)));
                }
                self.w.line(format!("out_param{n} = {};", vec4()));
            }
            (Format::Mrt0Vsrc0Vsrc1Vsrc2Vsrc3VmDone, StageIo::Pixel { info, .. }) => {
                if info.target_output_mode[0] != COL_FORMAT_32_ABGR {
                    return Err(not_impl(
                        pc,
                        "export",
                        format!("uncompressed mrt0 with color format {}", info.target_output_mode[0]),
                    ));
                }
                self.w.line(format!("out_color0 = {};", vec4()));
            }
            (Format::Mrt0Vsrc0Vsrc1ComprVmDone, StageIo::Pixel { info, .. }) => {
                if info.target_output_mode[0] != COL_FORMAT_FP16_ABGR {
                    return Err(not_impl(
                        pc,
                        "export",
                        format!("compressed mrt0 with color format {}", info.target_output_mode[0]),
                    ));
                }
                self.w.line(format!("let lo = unpack2x16float(v[{}]);", inst.src[0].register_id));
                self.w.line(format!("let hi = unpack2x16float(v[{}]);", inst.src[1].register_id));
                self.w.line("out_color0 = vec4<f32>(lo.x, lo.y, hi.x, hi.y);");
            }
            _ => return Err(not_impl(pc, "export", format!("{inst} in a {:?} shader", self.stage()))),
        }
        self.w.close();
        Ok(())
    }

    fn emit_inst(&mut self, inst: &ShaderInstruction) -> Result<()> {
        let pc = inst.pc;
        self.w.line(format!("// {pc:04x}: {inst}"));
        match inst.ty {
            T::SNop | T::SWaitcnt => Ok(()),
            T::SEndpgm => {
                if !self.blocks.is_empty() {
                    self.w.line(format!("cf_block = {END_BLOCK};"));
                }
                Ok(())
            }
            T::SBranch => {
                let target = self.block_ref(inst.branch_target())?;
                self.w.line(format!("cf_block = {target};"));
                Ok(())
            }
            T::SCbranchExecz => {
                let target = self.block_ref(inst.branch_target())?;
                let next = self.block_ref(self.next_pc(inst))?;
                self.w.line(format!("cf_block = select({next}, {target}, exec_lo == 0u);"));
                Ok(())
            }
            T::SSwappcB64 => match self.io {
                // The fetch subroutine's loads are applied at entry.
                StageIo::Vertex(info) if info.fetch => Ok(()),
                _ => Err(not_impl(pc, "subroutine call", "s_swappc_b64 without a fetch shader")),
            },
            T::SSetpcB64 => Err(not_impl(pc, "subroutine return", "s_setpc_b64 in a main program")),
            T::SMovB32 | T::SMovB64 | T::SWqmB64 | T::SAndn2B64 | T::SAndSaveexecB64 | T::SLshlB32 => {
                self.emit_salu(inst)
            }
            T::SLoadDwordx4
            | T::SLoadDwordx8
            | T::SBufferLoadDword
            | T::SBufferLoadDwordx4
            | T::SBufferLoadDwordx8
            | T::SBufferLoadDwordx16 => self.emit_smrd(inst),
            T::VAddI32 | T::VSubI32 | T::VSubrevI32 => self.emit_carry(inst),
            T::VCmpEqF32
            | T::VCmpLeF32
            | T::VCmpNeqF32
            | T::VCmpEqU32
            | T::VCmpLeU32
            | T::VCmpNeU32
            | T::VCmpxEqU32
            | T::VCmpxGtU32 => self.emit_vopc(inst),
            T::BufferLoadDword
            | T::BufferLoadFormatX
            | T::BufferLoadFormatXy
            | T::BufferLoadFormatXyz
            | T::BufferLoadFormatXyzw
            | T::BufferStoreDword
            | T::BufferStoreFormatX
            | T::TBufferLoadFormatXyzw => self.emit_buffer(inst),
            T::ImageSample => self.emit_image_sample(inst),
            T::DsAppend | T::DsConsume => self.emit_gds(inst),
            T::VInterpP1F32 | T::VInterpP2F32 => self.emit_interp(inst),
            T::Exp => self.emit_export(inst),
            _ => self.emit_valu(inst),
        }
    }

    fn emit_body(&mut self) -> Result<()> {
        let code = self.code;
        if self.blocks.is_empty() {
            for inst in &code.instructions {
                self.emit_inst(inst)?;
            }
            return Ok(());
        }

        let blocks = self.blocks.clone();
        self.w.line("var cf_block: u32 = 0u;");
        self.w.open("loop {");
        self.w.open("switch cf_block {");
        for (i, start) in blocks.iter().enumerate() {
            let end = blocks.get(i + 1).copied();
            self.w.open(format!("case {i}u: {{"));
            let mut last: Option<&ShaderInstruction> = None;
            for inst in code
                .instructions
                .iter()
                .filter(|inst| inst.pc >= *start && end.map_or(true, |e| inst.pc < e))
            {
                self.emit_inst(inst)?;
                last = Some(inst);
            }
            let terminated = last.is_some_and(|l| l.ty.is_branch() || l.ty == T::SEndpgm);
            if !terminated {
                let next = self.block_ref(end)?;
                self.w.line(format!("cf_block = {next};"));
            }
            self.w.close();
        }
        self.w.open("default: {");
        self.w.line(format!("cf_block = {END_BLOCK};"));
        self.w.close();
        self.w.close();
        self.w.line(format!("if (cf_block == {END_BLOCK}) {{ break; }}"));
        self.w.close();
        Ok(())
    }
}

/// Highest VGPR index touched by the program plus one, and an SGPR range check.
fn register_usage(code: &ShaderCode) -> Result<u32> {
    let mut vgprs = 0u32;
    for inst in &code.instructions {
        let ops = [&inst.dst, &inst.dst2]
            .into_iter()
            .chain(inst.src[..inst.src_num].iter());
        for op in ops {
            match op.ty {
                OperandType::Vgpr => vgprs = vgprs.max(op.register_id + u32::from(op.size)),
                OperandType::Sgpr if op.register_id + u32::from(op.size) > SGPR_COUNT => {
                    return Err(ShaderError::malformed(inst.pc, format!("s{} out of range", op.register_id)))
                }
                _ => {}
            }
        }
    }
    Ok(vgprs)
}

fn declare_bindings(w: &mut Writer, bind: &ShaderResources) -> Result<()> {
    let set = bind.descriptor_set_slot;
    for (i, b) in bind.storage_buffers.iter().enumerate() {
        let access = match b.usage {
            ShaderStorageUsage::ReadWrite => "read_write",
            _ => "read",
        };
        w.line(format!(
            "@group({set}) @binding({}) var<storage, {access}> buffer{i}: array<u32>;",
            bind.storage_binding_index() + i as u32
        ));
    }
    for (i, t) in bind.textures2d.iter().enumerate() {
        if !FLOAT_TEXTURE_NFMTS.contains(&t.texture.nfmt()) {
            return Err(ShaderError::not_implemented(
                "texture format",
                format!("texture{i} has nfmt {}", t.texture.nfmt()),
            ));
        }
        w.line(format!(
            "@group({set}) @binding({}) var texture{i}: texture_2d<f32>;",
            bind.textures_binding_index() + i as u32
        ));
    }
    for i in 0..bind.samplers.len() {
        w.line(format!(
            "@group({set}) @binding({}) var sampler{i}: sampler;",
            bind.samplers_binding_index() + i as u32
        ));
    }
    for i in 0..bind.gds_pointers.len() {
        w.line(format!(
            "@group({set}) @binding({}) var<storage, read_write> gds{i}: array<atomic<u32>>;",
            bind.gds_binding_index() + i as u32
        ));
    }
    Ok(())
}

/// Generates a complete WGSL module for one stage.
pub(crate) fn generate(code: &ShaderCode, io: &StageIo<'_>, vgpr_count: u32) -> Result<WgslOutput> {
    let bind = io.bind();
    let mut emitter = Emitter::new(code, io)?;

    let mut vgprs = vgpr_count.max(register_usage(code)?);
    match io {
        StageIo::Vertex(info) => {
            for dst in &info.resources_dst {
                vgprs = vgprs.max(dst.register_start + dst.registers_num);
            }
        }
        StageIo::Pixel { .. } => vgprs = vgprs.max(4),
        StageIo::Compute { .. } => vgprs = vgprs.max(3),
    }
    vgprs = vgprs.max(1);

    if let StageIo::Pixel { info, .. } = io {
        let mode = info.target_output_mode[0];
        if ![COL_FORMAT_ZERO, COL_FORMAT_FP16_ABGR, COL_FORMAT_32_ABGR].contains(&mode) {
            return Err(ShaderError::not_implemented("SPI_SHADER_COL_FORMAT", format!("mrt0 format {mode}")));
        }
        if let Some(i) = info.target_output_mode[1..].iter().position(|m| *m != COL_FORMAT_ZERO) {
            return Err(ShaderError::not_implemented(
                "SPI_SHADER_COL_FORMAT",
                format!("render target {} is enabled", i + 1),
            ));
        }
    }

    let mut w = Writer::default();
    w.open("struct UserData {");
    if bind.push_constant_offset > 0 {
        w.line(format!("reserved: array<vec4<u32>, {}>,", bind.push_constant_offset / 16));
    }
    w.line(format!("sgpr: array<vec4<u32>, {}>,", USER_SGPR_COUNT / 4));
    w.close();
    w.line("var<push_constant> user_data: UserData;");
    w.line("");
    declare_bindings(&mut w, bind)?;
    w.line("");
    w.line(format!("var<private> s: array<u32, {SGPR_COUNT}>;"));
    w.line(format!("var<private> v: array<u32, {vgprs}>;"));
    for name in ["vcc_lo", "vcc_hi", "exec_lo", "exec_hi", "m0", "scc"] {
        w.line(format!("var<private> {name}: u32;"));
    }

    let entry_point = match io {
        StageIo::Vertex(info) => {
            for k in 0..info.export_count {
                w.line(format!("var<private> out_param{k}: vec4<f32>;"));
            }
            w.line("var<private> out_position: vec4<f32>;");
            w.line("");
            w.open("struct VsInput {");
            w.line("@builtin(vertex_index) vertex_index: u32,");
            for i in 0..info.resources.len() {
                w.line(format!("@location({i}) attr{i}: vec4<f32>,"));
            }
            w.close();
            w.open("struct VsOutput {");
            w.line("@builtin(position) position: vec4<f32>,");
            for k in 0..info.export_count {
                w.line(format!("@location({k}) param{k}: vec4<f32>,"));
            }
            w.close();
            w.line("");
            w.line("@vertex");
            w.open("fn vs_main(input: VsInput) -> VsOutput {");
            "vs_main"
        }
        StageIo::Pixel { info, .. } => {
            let color = info.target_output_mode[0] != COL_FORMAT_ZERO;
            w.line("var<private> out_color0: vec4<f32>;");
            w.line("");
            w.open("struct PsInput {");
            w.line("@builtin(position) frag_coord: vec4<f32>,");
            for n in 0..info.input_num as usize {
                w.line(format!("@location({}) attr{n}: vec4<f32>,", info.interpolator_settings[n]));
            }
            w.close();
            if color {
                w.open("struct PsOutput {");
                w.line("@location(0) color0: vec4<f32>,");
                w.close();
            }
            w.line("");
            w.line("@fragment");
            if color {
                w.open("fn ps_main(input: PsInput) -> PsOutput {");
            } else {
                w.open("fn ps_main(input: PsInput) {");
            }
            "ps_main"
        }
        StageIo::Compute { info, .. } => {
            w.line("");
            w.line(format!(
                "@compute @workgroup_size({}, {}, {})",
                info.threads_num[0], info.threads_num[1], info.threads_num[2]
            ));
            w.open("fn cs_main(@builtin(local_invocation_id) local_id: vec3<u32>, @builtin(workgroup_id) group_id: vec3<u32>) {");
            "cs_main"
        }
    };

    // Prologue: user data, lane state, stage inputs.
    for k in 0..USER_SGPR_COUNT {
        w.line(format!("s[{k}] = user_data.sgpr[{}][{}];", k / 4, k % 4));
    }
    w.line("exec_lo = 1u;");
    w.line("exec_hi = 0u;");
    match io {
        StageIo::Vertex(info) => {
            w.line("v[0] = input.vertex_index;");
            for (i, dst) in info.resources_dst.iter().enumerate() {
                for k in 0..dst.registers_num {
                    w.line(format!(
                        "v[{}] = bitcast<u32>(input.attr{i}.{});",
                        dst.register_start + k,
                        CHANNELS[k as usize]
                    ));
                }
            }
        }
        StageIo::Pixel { input_ena, .. } => {
            let mut next = 0;
            if input_ena & PS_INPUT_PERSP_CENTER != 0 {
                w.line("v[0] = 0u;");
                w.line("v[1] = 0u;");
                next = 2;
            }
            if input_ena & PS_INPUT_POS_X != 0 {
                w.line(format!("v[{next}] = bitcast<u32>(input.frag_coord.x);"));
                w.line(format!("v[{}] = bitcast<u32>(input.frag_coord.y);", next + 1));
            }
        }
        StageIo::Compute { info, regs } => {
            w.line("v[0] = local_id.x;");
            if regs.tidig_comp_cnt >= 1 {
                w.line("v[1] = local_id.y;");
            }
            if regs.tidig_comp_cnt >= 2 {
                w.line("v[2] = local_id.z;");
            }
            let mut reg = info.workgroup_register;
            for (enabled, c) in [(regs.tgid_x_en, 'x'), (regs.tgid_y_en, 'y'), (regs.tgid_z_en, 'z')] {
                if enabled {
                    if reg >= SGPR_COUNT {
                        return Err(ShaderError::not_implemented("COMPUTE_PGM_RSRC2", "TGID beyond SGPRs"));
                    }
                    w.line(format!("s[{reg}] = group_id.{c};"));
                    reg += 1;
                }
            }
        }
    }

    emitter.w.depth = w.depth;
    emitter.emit_body()?;
    w.out.push_str(&emitter.w.out);

    // Epilogue: outputs.
    match io {
        StageIo::Vertex(info) => {
            w.line("var out: VsOutput;");
            w.line("out.position = out_position;");
            for k in 0..info.export_count {
                w.line(format!("out.param{k} = out_param{k};"));
            }
            w.line("return out;");
        }
        StageIo::Pixel { info, .. } => {
            if info.ps_pixel_kill_enable {
                w.line("if (exec_lo == 0u) { discard; }");
            }
            if info.target_output_mode[0] != COL_FORMAT_ZERO {
                w.line("var out: PsOutput;");
                w.line("out.color0 = out_color0;");
                w.line("return out;");
            }
        }
        StageIo::Compute { .. } => {}
    }
    w.close();

    Ok(WgslOutput {
        wgsl: w.out,
        entry_point,
    })
}
