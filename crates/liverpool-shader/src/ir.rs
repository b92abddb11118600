//! Decoded GCN instruction stream.

use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Vertex,
    Pixel,
    Fetch,
    Compute,
}

impl ShaderType {
    pub fn tag(self) -> u32 {
        match self {
            Self::Vertex => 1,
            Self::Pixel => 2,
            Self::Fetch => 3,
            Self::Compute => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderInstructionType {
    DsAppend,
    DsConsume,
    Exp,
    BufferLoadDword,
    BufferLoadFormatX,
    BufferLoadFormatXy,
    BufferLoadFormatXyz,
    BufferLoadFormatXyzw,
    BufferStoreDword,
    BufferStoreFormatX,
    ImageSample,
    TBufferLoadFormatXyzw,
    SAndn2B64,
    SAndSaveexecB64,
    SBranch,
    SCbranchExecz,
    SEndpgm,
    SLshlB32,
    SLoadDwordx4,
    SLoadDwordx8,
    SBufferLoadDword,
    SBufferLoadDwordx4,
    SBufferLoadDwordx8,
    SBufferLoadDwordx16,
    SMovB32,
    SMovB64,
    SNop,
    SSetpcB64,
    SSwappcB64,
    SWaitcnt,
    SWqmB64,
    VAddF32,
    VAddI32,
    VAndB32,
    VCmpEqF32,
    VCmpEqU32,
    VCmpLeF32,
    VCmpLeU32,
    VCmpNeU32,
    VCmpNeqF32,
    VCmpxEqU32,
    VCmpxGtU32,
    VCndmaskB32,
    VCvtF32U32,
    VCvtPkrtzF16F32,
    VCvtU32F32,
    VInterpP1F32,
    VInterpP2F32,
    VMacF32,
    VMadakF32,
    VMadF32,
    VMaxF32,
    VMbcntHiU32B32,
    VMbcntLoU32B32,
    VMinF32,
    VMovB32,
    VMulF32,
    VRcpF32,
    VRsqF32,
    VSadU32,
    VSqrtF32,
    VSubF32,
    VSubI32,
    VSubrevF32,
    VSubrevI32,
}

impl ShaderInstructionType {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::DsAppend => "ds_append",
            Self::DsConsume => "ds_consume",
            Self::Exp => "exp",
            Self::BufferLoadDword => "buffer_load_dword",
            Self::BufferLoadFormatX => "buffer_load_format_x",
            Self::BufferLoadFormatXy => "buffer_load_format_xy",
            Self::BufferLoadFormatXyz => "buffer_load_format_xyz",
            Self::BufferLoadFormatXyzw => "buffer_load_format_xyzw",
            Self::BufferStoreDword => "buffer_store_dword",
            Self::BufferStoreFormatX => "buffer_store_format_x",
            Self::ImageSample => "image_sample",
            Self::TBufferLoadFormatXyzw => "tbuffer_load_format_xyzw",
            Self::SAndn2B64 => "s_andn2_b64",
            Self::SAndSaveexecB64 => "s_and_saveexec_b64",
            Self::SBranch => "s_branch",
            Self::SCbranchExecz => "s_cbranch_execz",
            Self::SEndpgm => "s_endpgm",
            Self::SLshlB32 => "s_lshl_b32",
            Self::SLoadDwordx4 => "s_load_dwordx4",
            Self::SLoadDwordx8 => "s_load_dwordx8",
            Self::SBufferLoadDword => "s_buffer_load_dword",
            Self::SBufferLoadDwordx4 => "s_buffer_load_dwordx4",
            Self::SBufferLoadDwordx8 => "s_buffer_load_dwordx8",
            Self::SBufferLoadDwordx16 => "s_buffer_load_dwordx16",
            Self::SMovB32 => "s_mov_b32",
            Self::SMovB64 => "s_mov_b64",
            Self::SNop => "s_nop",
            Self::SSetpcB64 => "s_setpc_b64",
            Self::SSwappcB64 => "s_swappc_b64",
            Self::SWaitcnt => "s_waitcnt",
            Self::SWqmB64 => "s_wqm_b64",
            Self::VAddF32 => "v_add_f32",
            Self::VAddI32 => "v_add_i32",
            Self::VAndB32 => "v_and_b32",
            Self::VCmpEqF32 => "v_cmp_eq_f32",
            Self::VCmpEqU32 => "v_cmp_eq_u32",
            Self::VCmpLeF32 => "v_cmp_le_f32",
            Self::VCmpLeU32 => "v_cmp_le_u32",
            Self::VCmpNeU32 => "v_cmp_ne_u32",
            Self::VCmpNeqF32 => "v_cmp_neq_f32",
            Self::VCmpxEqU32 => "v_cmpx_eq_u32",
            Self::VCmpxGtU32 => "v_cmpx_gt_u32",
            Self::VCndmaskB32 => "v_cndmask_b32",
            Self::VCvtF32U32 => "v_cvt_f32_u32",
            Self::VCvtPkrtzF16F32 => "v_cvt_pkrtz_f16_f32",
            Self::VCvtU32F32 => "v_cvt_u32_f32",
            Self::VInterpP1F32 => "v_interp_p1_f32",
            Self::VInterpP2F32 => "v_interp_p2_f32",
            Self::VMacF32 => "v_mac_f32",
            Self::VMadakF32 => "v_madak_f32",
            Self::VMadF32 => "v_mad_f32",
            Self::VMaxF32 => "v_max_f32",
            Self::VMbcntHiU32B32 => "v_mbcnt_hi_u32_b32",
            Self::VMbcntLoU32B32 => "v_mbcnt_lo_u32_b32",
            Self::VMinF32 => "v_min_f32",
            Self::VMovB32 => "v_mov_b32",
            Self::VMulF32 => "v_mul_f32",
            Self::VRcpF32 => "v_rcp_f32",
            Self::VRsqF32 => "v_rsq_f32",
            Self::VSadU32 => "v_sad_u32",
            Self::VSqrtF32 => "v_sqrt_f32",
            Self::VSubF32 => "v_sub_f32",
            Self::VSubI32 => "v_sub_i32",
            Self::VSubrevF32 => "v_subrev_f32",
            Self::VSubrevI32 => "v_subrev_i32",
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Self::SBranch | Self::SCbranchExecz)
    }
}

/// One slot of an operand layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormatByte {
    /// Destination with the given register count.
    Dst(u8),
    /// Second destination (carry/compare mask).
    Dst2(u8),
    /// Source `index` with the given register count.
    Src(u8, u8),
    Attr,
    Idxen,
    Float4,
    Pos0,
    Done,
    Param(u8),
    Mrt0,
    Compr,
    Vm,
    Label,
    Dmask(u8),
    Gds,
}

/// Operand layout of an instruction: which of dst/dst2/src0..3 are meaningful and how wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Empty,
    Imm,
    Label,
    Mrt0Vsrc0Vsrc1ComprVmDone,
    Mrt0Vsrc0Vsrc1Vsrc2Vsrc3VmDone,
    Param0Vsrc0Vsrc1Vsrc2Vsrc3,
    Param1Vsrc0Vsrc1Vsrc2Vsrc3,
    Param2Vsrc0Vsrc1Vsrc2Vsrc3,
    Param3Vsrc0Vsrc1Vsrc2Vsrc3,
    Pos0Vsrc0Vsrc1Vsrc2Vsrc3Done,
    Saddr,
    Sdst4SbaseSoffset,
    Sdst8SbaseSoffset,
    SdstSvSoffset,
    Sdst4SvSoffset,
    Sdst8SvSoffset,
    Sdst16SvSoffset,
    SVdstSVsrc0,
    SVdstSVsrc0SVsrc1,
    Sdst2Ssrc02,
    Sdst2Ssrc02Ssrc12,
    SmaskVsrc0Vsrc1,
    Vdata1VaddrSvSoffsIdxen,
    Vdata2VaddrSvSoffsIdxen,
    Vdata3VaddrSvSoffsIdxen,
    Vdata4VaddrSvSoffsIdxen,
    Vdata4VaddrSvSoffsIdxenFloat4,
    Vdata3Vaddr3StSsDmask7,
    Vdata4Vaddr3StSsDmaskF,
    VdstVsrc0Vsrc1Smask2,
    VdstVsrc0Vsrc1Vsrc2,
    VdstVsrcAttrChan,
    VdstSdst2Vsrc0Vsrc1,
    VdstGds,
}

impl Format {
    pub fn layout(self) -> &'static [FormatByte] {
        use FormatByte::*;
        match self {
            Self::Empty => &[],
            Self::Imm => &[Src(0, 1)],
            Self::Label => &[Label],
            Self::Mrt0Vsrc0Vsrc1ComprVmDone => &[Mrt0, Src(0, 1), Src(1, 1), Compr, Vm, Done],
            Self::Mrt0Vsrc0Vsrc1Vsrc2Vsrc3VmDone => {
                &[Mrt0, Src(0, 1), Src(1, 1), Src(2, 1), Src(3, 1), Vm, Done]
            }
            Self::Param0Vsrc0Vsrc1Vsrc2Vsrc3 => &[Param(0), Src(0, 1), Src(1, 1), Src(2, 1), Src(3, 1)],
            Self::Param1Vsrc0Vsrc1Vsrc2Vsrc3 => &[Param(1), Src(0, 1), Src(1, 1), Src(2, 1), Src(3, 1)],
            Self::Param2Vsrc0Vsrc1Vsrc2Vsrc3 => &[Param(2), Src(0, 1), Src(1, 1), Src(2, 1), Src(3, 1)],
            Self::Param3Vsrc0Vsrc1Vsrc2Vsrc3 => &[Param(3), Src(0, 1), Src(1, 1), Src(2, 1), Src(3, 1)],
            Self::Pos0Vsrc0Vsrc1Vsrc2Vsrc3Done => &[Pos0, Src(0, 1), Src(1, 1), Src(2, 1), Src(3, 1), Done],
            Self::Saddr => &[Src(0, 2)],
            Self::Sdst4SbaseSoffset => &[Dst(4), Src(0, 2), Src(1, 1)],
            Self::Sdst8SbaseSoffset => &[Dst(8), Src(0, 2), Src(1, 1)],
            Self::SdstSvSoffset => &[Dst(1), Src(0, 4), Src(1, 1)],
            Self::Sdst4SvSoffset => &[Dst(4), Src(0, 4), Src(1, 1)],
            Self::Sdst8SvSoffset => &[Dst(8), Src(0, 4), Src(1, 1)],
            Self::Sdst16SvSoffset => &[Dst(16), Src(0, 4), Src(1, 1)],
            Self::SVdstSVsrc0 => &[Dst(1), Src(0, 1)],
            Self::SVdstSVsrc0SVsrc1 => &[Dst(1), Src(0, 1), Src(1, 1)],
            Self::Sdst2Ssrc02 => &[Dst(2), Src(0, 2)],
            Self::Sdst2Ssrc02Ssrc12 => &[Dst(2), Src(0, 2), Src(1, 2)],
            Self::SmaskVsrc0Vsrc1 => &[Dst(2), Src(0, 1), Src(1, 1)],
            Self::Vdata1VaddrSvSoffsIdxen => &[Dst(1), Src(0, 1), Src(1, 4), Src(2, 1), Idxen],
            Self::Vdata2VaddrSvSoffsIdxen => &[Dst(2), Src(0, 1), Src(1, 4), Src(2, 1), Idxen],
            Self::Vdata3VaddrSvSoffsIdxen => &[Dst(3), Src(0, 1), Src(1, 4), Src(2, 1), Idxen],
            Self::Vdata4VaddrSvSoffsIdxen => &[Dst(4), Src(0, 1), Src(1, 4), Src(2, 1), Idxen],
            Self::Vdata4VaddrSvSoffsIdxenFloat4 => {
                &[Dst(4), Src(0, 1), Src(1, 4), Src(2, 1), Idxen, Float4]
            }
            Self::Vdata3Vaddr3StSsDmask7 => &[Dst(3), Src(0, 3), Src(1, 8), Src(2, 4), Dmask(0x7)],
            Self::Vdata4Vaddr3StSsDmaskF => &[Dst(4), Src(0, 3), Src(1, 8), Src(2, 4), Dmask(0xf)],
            Self::VdstVsrc0Vsrc1Smask2 => &[Dst(1), Src(0, 1), Src(1, 1), Src(2, 2)],
            Self::VdstVsrc0Vsrc1Vsrc2 => &[Dst(1), Src(0, 1), Src(1, 1), Src(2, 1)],
            Self::VdstVsrcAttrChan => &[Dst(1), Src(0, 1), Attr],
            Self::VdstSdst2Vsrc0Vsrc1 => &[Dst(1), Dst2(2), Src(0, 1), Src(1, 1)],
            Self::VdstGds => &[Dst(1), Gds],
        }
    }

    pub fn src_num(self) -> usize {
        self.layout()
            .iter()
            .filter(|b| matches!(b, FormatByte::Src(..)))
            .count()
    }

    /// Register count of source `index`, or 0 when the layout has no such source.
    pub fn src_size(self, index: u8) -> u8 {
        self.layout()
            .iter()
            .find_map(|b| match b {
                FormatByte::Src(i, size) if *i == index => Some(*size),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn dst_size(self) -> u8 {
        self.layout()
            .iter()
            .find_map(|b| match b {
                FormatByte::Dst(size) => Some(*size),
                _ => None,
            })
            .unwrap_or(0)
    }

    pub fn dst2_size(self) -> u8 {
        self.layout()
            .iter()
            .find_map(|b| match b {
                FormatByte::Dst2(size) => Some(*size),
                _ => None,
            })
            .unwrap_or(0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OperandType {
    #[default]
    Unknown,
    LiteralConstant,
    IntegerInlineConstant,
    FloatInlineConstant,
    VccLo,
    VccHi,
    ExecLo,
    ExecHi,
    ExecZ,
    Vgpr,
    Sgpr,
    M0,
}

#[derive(Clone, Copy, Debug)]
pub struct ShaderOperand {
    pub ty: OperandType,
    /// Raw constant bits (integer value or f32 bit pattern).
    pub constant: u32,
    pub register_id: u32,
    /// Register count.
    pub size: u8,
    pub multiplier: f32,
    pub negate: bool,
    pub clamp: bool,
}

impl Default for ShaderOperand {
    fn default() -> Self {
        Self {
            ty: OperandType::Unknown,
            constant: 0,
            register_id: 0,
            size: 0,
            multiplier: 1.0,
            negate: false,
            clamp: false,
        }
    }
}

/// Modifiers (`multiplier`, `negate`, `clamp`) are not part of operand identity.
impl PartialEq for ShaderOperand {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.constant == other.constant
            && self.register_id == other.register_id
            && self.size == other.size
    }
}

impl Eq for ShaderOperand {}

impl ShaderOperand {
    pub fn sgpr(register_id: u32, size: u8) -> Self {
        Self {
            ty: OperandType::Sgpr,
            register_id,
            size,
            ..Default::default()
        }
    }

    pub fn vgpr(register_id: u32, size: u8) -> Self {
        Self {
            ty: OperandType::Vgpr,
            register_id,
            size,
            ..Default::default()
        }
    }

    pub fn literal(value: u32) -> Self {
        Self {
            ty: OperandType::LiteralConstant,
            constant: value,
            size: 1,
            ..Default::default()
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(
            self.ty,
            OperandType::LiteralConstant | OperandType::IntegerInlineConstant | OperandType::FloatInlineConstant
        )
    }
}

/// Encoding fields that do not fit the operand slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InstructionControl {
    /// MUBUF/MTBUF/DS byte offset, SOPP immediate.
    pub offset: u16,
    /// VINTRP attribute and channel.
    pub attr: u8,
    pub chan: u8,
    /// EXP component enable mask.
    pub en: u8,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShaderInstruction {
    pub pc: u32,
    pub ty: ShaderInstructionType,
    pub format: Format,
    pub src: [ShaderOperand; 4],
    pub src_num: usize,
    pub dst: ShaderOperand,
    pub dst2: ShaderOperand,
    pub ctrl: InstructionControl,
}

impl ShaderInstruction {
    pub fn new(pc: u32, ty: ShaderInstructionType, format: Format) -> Self {
        Self {
            pc,
            ty,
            format,
            src: [ShaderOperand::default(); 4],
            src_num: format.src_num(),
            dst: ShaderOperand::default(),
            dst2: ShaderOperand::default(),
            ctrl: InstructionControl::default(),
        }
    }

    /// Branch target for `s_branch`/`s_cbranch_*`: the label is stored in `src[0].constant`.
    pub fn branch_target(&self) -> Option<u32> {
        self.ty.is_branch().then_some(self.src[0].constant)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShaderCode {
    pub ty: ShaderType,
    pub instructions: Vec<ShaderInstruction>,
    /// Program counters that some branch jumps to.
    pub labels: BTreeSet<u32>,
}

impl ShaderCode {
    pub fn new(ty: ShaderType) -> Self {
        Self {
            ty,
            instructions: Vec::with_capacity(128),
            labels: BTreeSet::new(),
        }
    }

    pub fn instruction_at(&self, pc: u32) -> Option<&ShaderInstruction> {
        self.instructions
            .binary_search_by_key(&pc, |inst| inst.pc)
            .ok()
            .map(|i| &self.instructions[i])
    }

    /// Every label is a branch target and every branch target is a label.
    pub fn labels_consistent(&self) -> bool {
        let targets: BTreeSet<u32> = self.instructions.iter().filter_map(|i| i.branch_target()).collect();
        targets == self.labels
    }
}
