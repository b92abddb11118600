use thiserror::Error;

use crate::guest_memory::GuestMemoryError;

pub type Result<T> = std::result::Result<T, ShaderError>;

/// Failure raised while extracting, decoding or recompiling a guest shader.
///
/// Every variant is fatal for the draw/dispatch that triggered it: the shader front end never
/// substitutes an approximation for hardware state or instructions it does not understand.
#[derive(Debug, Error)]
pub enum ShaderError {
    /// A register configuration or usage-slot combination the extractor does not handle.
    #[error("not implemented: {what} ({detail})")]
    NotImplemented { what: &'static str, detail: String },

    /// An instruction word the decoder/recompiler cannot translate.
    #[error("unsupported instruction at pc 0x{pc:x}: {encoding} opcode 0x{opcode:x}")]
    UnsupportedInstruction {
        pc: u32,
        encoding: &'static str,
        opcode: u32,
    },

    /// The guest program is structurally broken (truncated stream, missing binary info, ...).
    #[error("malformed shader at pc 0x{pc:x}: {message}")]
    Malformed { pc: u32, message: String },

    #[error(transparent)]
    GuestMemory(#[from] GuestMemoryError),

    /// The host shader compiler rejected the generated WGSL.
    #[error("generated WGSL failed validation: {0}")]
    Validation(String),

    #[error("SPIR-V emission failed: {0}")]
    SpirV(String),
}

impl ShaderError {
    pub(crate) fn not_implemented(what: &'static str, detail: impl Into<String>) -> Self {
        Self::NotImplemented {
            what,
            detail: detail.into(),
        }
    }

    pub(crate) fn malformed(pc: u32, message: impl Into<String>) -> Self {
        Self::Malformed {
            pc,
            message: message.into(),
        }
    }
}
