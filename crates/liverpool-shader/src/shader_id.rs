//! Cache fingerprints for recompiled shaders.
//!
//! The id covers everything the generated code depends on and nothing it does not: base
//! addresses and record counts of bound resources are excluded so the same shader bound to
//! different memory hits the cache.

use crate::binary::ShaderBinaryInfo;
use crate::bindings::ShaderResources;
use crate::error::Result;
use crate::guest_memory::GuestMemory;
use crate::input_info::{ShaderComputeInputInfo, ShaderPixelInputInfo, ShaderVertexInputInfo};
use crate::ir::ShaderType;
use crate::regs::{ComputeShaderInfo, PixelShaderInfo, VertexShaderInfo};
use crate::ShaderOptions;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderId {
    pub ids: Vec<u32>,
}

impl ShaderId {
    fn push(&mut self, v: u32) {
        self.ids.push(v);
    }

    fn push_bool(&mut self, v: bool) {
        self.ids.push(u32::from(v));
    }

    fn push_binary(&mut self, stage: ShaderType, info: &ShaderBinaryInfo) {
        self.push(stage.tag());
        self.push(info.length);
        self.push(info.shader_hash0);
        self.push(info.crc32);
    }

    fn push_bind(&mut self, bind: &ShaderResources) {
        self.push(bind.storage_buffers.len() as u32);
        for b in &bind.storage_buffers {
            self.push(b.usage.tag());
            self.push(u32::from(b.slot));
            self.push(u32::from(b.start_register));
            self.push_bool(b.extended);
            self.push(u32::from(b.buffer.stride()));
            self.push(u32::from(b.buffer.dfmt()));
            self.push(u32::from(b.buffer.nfmt()));
            self.push(b.buffer.dst_sel());
        }
        self.push(bind.textures2d.len() as u32);
        for t in &bind.textures2d {
            self.push(u32::from(t.start_register));
            self.push_bool(t.extended);
            self.push(u32::from(t.texture.dfmt()));
            self.push(u32::from(t.texture.nfmt()));
            self.push(u32::from(t.texture.type_()));
        }
        self.push(bind.samplers.len() as u32);
        for s in &bind.samplers {
            self.push(u32::from(s.start_register));
            self.push_bool(s.extended);
        }
        self.push(bind.gds_pointers.len() as u32);
        for g in &bind.gds_pointers {
            self.push(u32::from(g.start_register));
            self.push_bool(g.extended);
        }
        match &bind.extended {
            Some(ext) => {
                self.push(1);
                self.push(u32::from(ext.start_register));
            }
            None => self.push(0),
        }
        self.push(bind.push_constant_offset);
        self.push(bind.push_constant_size);
        self.push(bind.descriptor_set_slot);
    }
}

pub fn shader_get_id_vs(
    regs: &VertexShaderInfo,
    input_info: &ShaderVertexInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<ShaderId> {
    let vs = &regs.vs_regs;
    let info = ShaderBinaryInfo::find(mem, vs.program_address, options.binary_info_search_limit_dwords)?;
    let mut id = ShaderId::default();
    id.push_binary(ShaderType::Vertex, &info);
    id.push(u32::from(vs.rsrc1.vgprs));
    id.push(u32::from(vs.user_sgpr));
    id.push(input_info.export_count);
    id.push(u32::from(vs.pos0_export_format));
    id.push_bool(input_info.fetch);
    id.push(input_info.resources.len() as u32);
    for (v, dst) in input_info.resources.iter().zip(input_info.resources_dst.iter()) {
        id.push(u32::from(v.stride()));
        id.push(u32::from(v.dfmt()));
        id.push(u32::from(v.nfmt()));
        id.push(dst.register_start);
        id.push(dst.registers_num);
    }
    id.push_bind(&input_info.bind);
    Ok(id)
}

pub fn shader_get_id_ps(
    regs: &PixelShaderInfo,
    input_info: &ShaderPixelInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<ShaderId> {
    let ps = &regs.ps_regs;
    let info = ShaderBinaryInfo::find(mem, ps.program_address, options.binary_info_search_limit_dwords)?;
    let mut id = ShaderId::default();
    id.push_binary(ShaderType::Pixel, &info);
    id.push(u32::from(ps.rsrc1.vgprs));
    id.push(u32::from(ps.user_sgpr));
    // Decides which VGPRs receive the barycentrics and the pixel position.
    id.push(ps.input_ena);
    id.push(input_info.input_num);
    for setting in &input_info.interpolator_settings[..input_info.input_num as usize] {
        id.push(*setting);
    }
    for mode in input_info.target_output_mode {
        id.push(u32::from(mode));
    }
    id.push_bool(input_info.ps_pos_xy);
    id.push_bool(input_info.ps_pixel_kill_enable);
    id.push_bind(&input_info.bind);
    Ok(id)
}

pub fn shader_get_id_cs(
    regs: &ComputeShaderInfo,
    input_info: &ShaderComputeInputInfo,
    mem: &dyn GuestMemory,
    options: &ShaderOptions,
) -> Result<ShaderId> {
    let cs = &regs.cs_regs;
    let info = ShaderBinaryInfo::find(mem, cs.program_address, options.binary_info_search_limit_dwords)?;
    let mut id = ShaderId::default();
    id.push_binary(ShaderType::Compute, &info);
    id.push(u32::from(cs.rsrc1.vgprs));
    for n in input_info.threads_num {
        id.push(n);
    }
    id.push(input_info.workgroup_register);
    id.push_bool(cs.tgid_x_en);
    id.push_bool(cs.tgid_y_en);
    id.push_bool(cs.tgid_z_en);
    id.push(u32::from(cs.tidig_comp_cnt));
    id.push_bind(&input_info.bind);
    Ok(id)
}
