//! Human-readable rendering of decoded instructions.

use core::fmt;
use std::fmt::Write as _;

use crate::ir::{FormatByte, OperandType, ShaderCode, ShaderInstruction, ShaderOperand};

fn register_range(f: &mut fmt::Formatter<'_>, prefix: char, first: u32, size: u8) -> fmt::Result {
    if size <= 1 {
        write!(f, "{prefix}{first}")
    } else {
        write!(f, "{prefix}[{first}:{}]", first + u32::from(size) - 1)
    }
}

impl fmt::Display for ShaderOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("-")?;
        }
        match self.ty {
            OperandType::Unknown => f.write_str("<unknown>"),
            OperandType::LiteralConstant => write!(f, "0x{:x}", self.constant),
            OperandType::IntegerInlineConstant => write!(f, "{}", self.constant as i32),
            OperandType::FloatInlineConstant => write!(f, "{:?}", f32::from_bits(self.constant)),
            OperandType::VccLo if self.size == 2 => f.write_str("vcc"),
            OperandType::VccLo => f.write_str("vcc_lo"),
            OperandType::VccHi => f.write_str("vcc_hi"),
            OperandType::ExecLo if self.size == 2 => f.write_str("exec"),
            OperandType::ExecLo => f.write_str("exec_lo"),
            OperandType::ExecHi => f.write_str("exec_hi"),
            OperandType::ExecZ => f.write_str("execz"),
            OperandType::M0 => f.write_str("m0"),
            OperandType::Vgpr => register_range(f, 'v', self.register_id, self.size),
            OperandType::Sgpr => register_range(f, 's', self.register_id, self.size),
        }
    }
}

const CHANNELS: [char; 4] = ['x', 'y', 'z', 'w'];

impl fmt::Display for ShaderInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operands: Vec<String> = Vec::new();
        let mut flags: Vec<String> = Vec::new();
        for byte in self.format.layout() {
            match *byte {
                FormatByte::Dst(_) => operands.push(self.dst.to_string()),
                FormatByte::Dst2(_) => operands.push(self.dst2.to_string()),
                FormatByte::Src(i, _) => operands.push(self.src[usize::from(i)].to_string()),
                FormatByte::Label => operands.push(format!("label_{:04x}", self.src[0].constant)),
                FormatByte::Attr => operands.push(format!(
                    "attr{}.{}",
                    self.ctrl.attr,
                    CHANNELS[usize::from(self.ctrl.chan & 0x3)]
                )),
                FormatByte::Mrt0 => operands.push("mrt0".to_string()),
                FormatByte::Pos0 => operands.push("pos0".to_string()),
                FormatByte::Param(n) => operands.push(format!("param{n}")),
                FormatByte::Idxen => flags.push("idxen".to_string()),
                FormatByte::Float4 => flags.push("format:float4".to_string()),
                FormatByte::Compr => flags.push("compr".to_string()),
                FormatByte::Vm => flags.push("vm".to_string()),
                FormatByte::Done => flags.push("done".to_string()),
                FormatByte::Dmask(mask) => flags.push(format!("dmask:0x{mask:x}")),
                FormatByte::Gds => flags.push("gds".to_string()),
            }
        }
        let has_offset = self
            .format
            .layout()
            .iter()
            .any(|b| matches!(b, FormatByte::Idxen | FormatByte::Gds));
        if has_offset && self.ctrl.offset != 0 {
            flags.push(format!("offset:{}", self.ctrl.offset));
        }
        if self.dst.clamp {
            flags.push("clamp".to_string());
        }
        if self.dst.multiplier == 0.5 {
            flags.push("div:2".to_string());
        } else if self.dst.multiplier != 1.0 {
            flags.push(format!("mul:{}", self.dst.multiplier));
        }

        f.write_str(self.ty.mnemonic())?;
        if !operands.is_empty() {
            write!(f, " {}", operands.join(", "))?;
        }
        for flag in flags {
            write!(f, " {flag}")?;
        }
        Ok(())
    }
}

impl ShaderCode {
    pub fn instruction_to_str(inst: &ShaderInstruction) -> String {
        inst.to_string()
    }

    /// Full listing with labels, for `tracing::debug!` output.
    pub fn dbg_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "; {:?} shader, {} instructions, {} labels",
            self.ty,
            self.instructions.len(),
            self.labels.len()
        );
        for inst in &self.instructions {
            if self.labels.contains(&inst.pc) {
                let _ = writeln!(out, "label_{:04x}:", inst.pc);
            }
            let _ = writeln!(out, "  {:04x}: {inst}", inst.pc);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Format, ShaderInstructionType};

    #[test]
    fn operand_rendering() {
        assert_eq!(ShaderOperand::sgpr(4, 4).to_string(), "s[4:7]");
        assert_eq!(ShaderOperand::vgpr(9, 1).to_string(), "v9");
        let neg = ShaderOperand {
            negate: true,
            ..ShaderOperand::vgpr(2, 1)
        };
        assert_eq!(neg.to_string(), "-v2");
        let exec = ShaderOperand {
            ty: OperandType::ExecLo,
            size: 2,
            ..Default::default()
        };
        assert_eq!(exec.to_string(), "exec");
    }

    #[test]
    fn instruction_flags_follow_operands() {
        let mut inst = ShaderInstruction::new(0x10, ShaderInstructionType::BufferLoadFormatXyzw, Format::Vdata4VaddrSvSoffsIdxen);
        inst.dst = ShaderOperand::vgpr(4, 4);
        inst.src[0] = ShaderOperand::vgpr(0, 1);
        inst.src[1] = ShaderOperand::sgpr(8, 4);
        inst.src[2] = ShaderOperand {
            ty: OperandType::IntegerInlineConstant,
            size: 1,
            ..Default::default()
        };
        inst.ctrl.offset = 16;
        assert_eq!(
            ShaderCode::instruction_to_str(&inst),
            "buffer_load_format_xyzw v[4:7], v0, s[8:11], 0 idxen offset:16"
        );
    }
}
