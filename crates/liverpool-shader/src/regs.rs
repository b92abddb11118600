//! Fixed-function register state consumed by the shader front end.
//!
//! The command processor captures raw register words into the `*RegisterWords` structs; the
//! `from_raw` constructors decode only the fields the extractor and recompiler look at.

/// Number of user SGPRs loaded from `SPI_SHADER_USER_DATA_*` / `COMPUTE_USER_DATA_*`.
pub const USER_SGPR_COUNT: usize = 16;

/// `SPI_SHADER_PGM_LO/HI_*` hold the program address in 256-byte units.
pub fn program_address(pgm_lo: u32, pgm_hi: u32) -> u64 {
    ((u64::from(pgm_hi) << 32) | u64::from(pgm_lo)) << 8
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderUserData {
    pub sgpr: [u32; USER_SGPR_COUNT],
}

impl ShaderUserData {
    pub fn new(values: &[u32]) -> Self {
        let mut sgpr = [0u32; USER_SGPR_COUNT];
        let n = values.len().min(USER_SGPR_COUNT);
        sgpr[..n].copy_from_slice(&values[..n]);
        Self { sgpr }
    }
}

/// `SPI_SHADER_PGM_RSRC1_*` fields shared by every stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rsrc1 {
    pub vgprs: u8,
    pub sgprs: u8,
}

impl Rsrc1 {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            vgprs: (raw & 0x3f) as u8,
            sgprs: ((raw >> 6) & 0xf) as u8,
        }
    }

    /// Allocated VGPRs; the field is in granules of 4 registers minus one.
    pub fn vgpr_count(&self) -> u32 {
        (u32::from(self.vgprs) + 1) * 4
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VsRegisterWords {
    pub pgm_lo: u32,
    pub pgm_hi: u32,
    pub rsrc1: u32,
    pub rsrc2: u32,
    pub out_config: u32,
    pub pos_format: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VsStageRegisters {
    pub program_address: u64,
    pub rsrc1: Rsrc1,
    pub scratch_en: bool,
    pub user_sgpr: u8,
    pub so_en: bool,
    /// Number of parameter exports, already biased by one.
    pub export_count: u8,
    pub pos0_export_format: u8,
}

impl VsStageRegisters {
    pub fn from_raw(words: &VsRegisterWords) -> Self {
        Self {
            program_address: program_address(words.pgm_lo, words.pgm_hi),
            rsrc1: Rsrc1::from_raw(words.rsrc1),
            scratch_en: words.rsrc2 & 0x1 != 0,
            user_sgpr: ((words.rsrc2 >> 1) & 0x1f) as u8,
            so_en: (words.rsrc2 >> 12) & 0x1 != 0,
            export_count: (((words.out_config >> 1) & 0x1f) + 1) as u8,
            pos0_export_format: (words.pos_format & 0xf) as u8,
        }
    }
}

/// `SPI_PS_INPUT_CNTL_n`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PsInputControl {
    pub offset: u8,
    pub flat_shade: bool,
}

impl PsInputControl {
    pub fn from_raw(raw: u32) -> Self {
        Self {
            offset: (raw & 0x3f) as u8,
            flat_shade: (raw >> 10) & 0x1 != 0,
        }
    }
}

pub const PS_INPUT_PERSP_CENTER: u32 = 1 << 1;
pub const PS_INPUT_POS_X: u32 = 1 << 8;
pub const PS_INPUT_POS_Y: u32 = 1 << 9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PsRegisterWords {
    pub pgm_lo: u32,
    pub pgm_hi: u32,
    pub rsrc1: u32,
    pub rsrc2: u32,
    pub z_format: u32,
    pub col_format: u32,
    pub input_ena: u32,
    pub input_addr: u32,
    pub in_control: u32,
    pub input_cntl: [u32; 32],
    pub shader_control: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PsStageRegisters {
    pub program_address: u64,
    pub rsrc1: Rsrc1,
    pub scratch_en: bool,
    pub user_sgpr: u8,
    pub wave_cnt_en: bool,
    pub z_export_format: u8,
    pub col_format: u32,
    pub input_ena: u32,
    pub input_addr: u32,
    pub num_interp: u8,
    pub input_cntl: [PsInputControl; 32],
    pub z_export_enable: bool,
    pub kill_enable: bool,
}

impl PsStageRegisters {
    pub fn from_raw(words: &PsRegisterWords) -> Self {
        let mut input_cntl = [PsInputControl::default(); 32];
        for (dst, raw) in input_cntl.iter_mut().zip(words.input_cntl.iter()) {
            *dst = PsInputControl::from_raw(*raw);
        }
        Self {
            program_address: program_address(words.pgm_lo, words.pgm_hi),
            rsrc1: Rsrc1::from_raw(words.rsrc1),
            scratch_en: words.rsrc2 & 0x1 != 0,
            user_sgpr: ((words.rsrc2 >> 1) & 0x1f) as u8,
            wave_cnt_en: (words.rsrc2 >> 7) & 0x1 != 0,
            z_export_format: (words.z_format & 0xf) as u8,
            col_format: words.col_format,
            input_ena: words.input_ena,
            input_addr: words.input_addr,
            num_interp: (words.in_control & 0x3f) as u8,
            input_cntl,
            z_export_enable: words.shader_control & 0x1 != 0,
            kill_enable: (words.shader_control >> 6) & 0x1 != 0,
        }
    }

    /// `SPI_SHADER_COL_FORMAT` nibble for render target `index`.
    pub fn target_output_mode(&self, index: usize) -> u8 {
        ((self.col_format >> (index * 4)) & 0xf) as u8
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CsRegisterWords {
    pub pgm_lo: u32,
    pub pgm_hi: u32,
    pub rsrc1: u32,
    pub rsrc2: u32,
    pub num_thread_x: u32,
    pub num_thread_y: u32,
    pub num_thread_z: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CsStageRegisters {
    pub program_address: u64,
    pub rsrc1: Rsrc1,
    pub scratch_en: bool,
    pub user_sgpr: u8,
    pub tgid_x_en: bool,
    pub tgid_y_en: bool,
    pub tgid_z_en: bool,
    pub tg_size_en: bool,
    pub tidig_comp_cnt: u8,
    pub lds_size: u16,
    pub num_thread_x: u16,
    pub num_thread_y: u16,
    pub num_thread_z: u16,
}

impl CsStageRegisters {
    pub fn from_raw(words: &CsRegisterWords) -> Self {
        Self {
            program_address: program_address(words.pgm_lo, words.pgm_hi),
            rsrc1: Rsrc1::from_raw(words.rsrc1),
            scratch_en: words.rsrc2 & 0x1 != 0,
            user_sgpr: ((words.rsrc2 >> 1) & 0x1f) as u8,
            tgid_x_en: (words.rsrc2 >> 7) & 0x1 != 0,
            tgid_y_en: (words.rsrc2 >> 8) & 0x1 != 0,
            tgid_z_en: (words.rsrc2 >> 9) & 0x1 != 0,
            tg_size_en: (words.rsrc2 >> 10) & 0x1 != 0,
            tidig_comp_cnt: ((words.rsrc2 >> 11) & 0x3) as u8,
            lds_size: ((words.rsrc2 >> 15) & 0x1ff) as u16,
            num_thread_x: (words.num_thread_x & 0xffff) as u16,
            num_thread_y: (words.num_thread_y & 0xffff) as u16,
            num_thread_z: (words.num_thread_z & 0xffff) as u16,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexShaderInfo {
    pub vs_regs: VsStageRegisters,
    pub vs_user_data: ShaderUserData,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PixelShaderInfo {
    pub ps_regs: PsStageRegisters,
    pub ps_user_data: ShaderUserData,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComputeShaderInfo {
    pub cs_regs: CsStageRegisters,
    pub cs_user_data: ShaderUserData,
}
