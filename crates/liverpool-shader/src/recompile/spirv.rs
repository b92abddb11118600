//! WGSL -> naga IR -> SPIR-V.

use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{Result, ShaderError};

/// Parses and validates `wgsl`, then emits SPIR-V words.
///
/// Guest programs branch on per-lane state around texture sampling, so uniformity analysis is
/// only run when `validate_uniformity` is set.
pub(crate) fn compile(wgsl: &str, validate_uniformity: bool) -> Result<Vec<u32>> {
    let module =
        naga::front::wgsl::parse_str(wgsl).map_err(|e| ShaderError::Validation(e.emit_to_string(wgsl)))?;

    let mut flags = ValidationFlags::all();
    if !validate_uniformity {
        flags.remove(ValidationFlags::CONTROL_FLOW_UNIFORMITY);
    }
    let info = Validator::new(flags, Capabilities::all())
        .validate(&module)
        .map_err(|e| ShaderError::Validation(e.as_inner().to_string()))?;

    let options = naga::back::spv::Options::default();
    naga::back::spv::write_vec(&module, &info, &options, None).map_err(|e| ShaderError::SpirV(e.to_string()))
}
