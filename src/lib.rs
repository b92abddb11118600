//! Liverpool GPU emulation core.
//!
//! Re-exports the shader front end, the tiling converter and the GPU object cache, and provides
//! the report a launcher shows once a guest program stops.

#![forbid(unsafe_code)]

pub use liverpool_memory as memory;
pub use liverpool_shader as shader;
pub use liverpool_tile as tile;

use tracing::warn;

/// Outcome of running one guest program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchReport {
    pub succeeded: bool,
    /// Why execution stopped; empty on success.
    pub termination_reason: String,
}

impl LaunchReport {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            termination_reason: String::new(),
        }
    }

    /// Turns the result of a run into a report. The reason includes the full error chain, so
    /// an unsupported opcode or format is named along with the operation that hit it.
    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => Self::success(),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(reason = %reason, "guest program terminated");
                Self {
                    succeeded: false,
                    termination_reason: reason,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context as _;

    use super::*;

    #[test]
    fn failure_reason_carries_the_context_chain() {
        let err: anyhow::Result<()> = Err(shader::ShaderError::UnsupportedInstruction {
            pc: 0x10,
            encoding: "SOP1",
            opcode: 63,
        })
        .context("recompiling pixel shader");
        let report = LaunchReport::from_result(err);
        assert!(!report.succeeded);
        assert!(report.termination_reason.starts_with("recompiling pixel shader: "));
        assert!(report.termination_reason.contains("SOP1 opcode 0x3f"));
    }

    #[test]
    fn success_has_no_reason() {
        assert_eq!(LaunchReport::from_result(Ok(())), LaunchReport::success());
    }
}
