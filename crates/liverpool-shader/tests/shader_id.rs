use liverpool_shader::regs::{
    CsRegisterWords, CsStageRegisters, PsRegisterWords, PsStageRegisters, PS_INPUT_PERSP_CENTER, PS_INPUT_POS_X,
    PS_INPUT_POS_Y,
};
use liverpool_shader::test_utils::*;
use liverpool_shader::{
    shader_get_id_cs, shader_get_id_ps, shader_get_input_info_cs, shader_get_input_info_ps, shader_recompile_cs,
    shader_recompile_ps, BufferResource, ComputeShaderInfo, PixelShaderInfo, ShaderId, ShaderOptions, ShaderUserData,
    ShaderVertexInputInfo, TextureResource, UsageType, VecGuestMemory,
};

const SAMPLER_REG: u32 = 12;

/// A pixel shader that samples one texture bound at `texture_reg` and writes it to MRT0.
fn textured_ps(mem: &VecGuestMemory, program_addr: u64, texture_reg: u32, texture_addr: u64) -> PixelShaderInfo {
    let code = program(&[
        &image_sample(0, 0, texture_reg, SAMPLER_REG, 0xf),
        &[s_waitcnt(0)],
        &exp(EXP_MRT0, 0xf, false, true, true, [0, 1, 2, 3]),
        &[s_endpgm()],
    ]);
    ShaderBinaryBuilder::new(&code)
        .slot(UsageType::ImmResource, 0, texture_reg as u8, 1)
        .slot(UsageType::ImmSampler, 0, SAMPLER_REG as u8, 0)
        .write(mem, program_addr)
        .unwrap();

    let mut texture = TextureResource::from_words(&[0, 0, 0, 9 << 28, 0, 0, 0, 0]);
    texture.update_address(texture_addr);
    let mut user = [0u32; 16];
    let t = texture_reg as usize;
    user[t..t + 8].copy_from_slice(&texture.fields);
    user[SAMPLER_REG as usize] = 0x0000_1000;

    PixelShaderInfo {
        ps_regs: PsStageRegisters::from_raw(&PsRegisterWords {
            pgm_lo: (program_addr >> 8) as u32,
            rsrc2: 16 << 1,
            col_format: 9,
            ..Default::default()
        }),
        ps_user_data: ShaderUserData::new(&user),
    }
}

fn id_of(mem: &VecGuestMemory, ps: &PixelShaderInfo) -> ShaderId {
    let options = ShaderOptions::default();
    let vs = ShaderVertexInputInfo {
        export_count: 1,
        ..Default::default()
    };
    let info = shader_get_input_info_ps(ps, &vs, mem, &options).unwrap();
    shader_get_id_ps(ps, &info, mem, &options).unwrap()
}

#[test]
fn id_ignores_program_and_texture_addresses() {
    let mem = VecGuestMemory::new(0x10000, 0x10000);
    let a = textured_ps(&mem, 0x10000, 0, 0x40_0000);
    let b = textured_ps(&mem, 0x12000, 0, 0x80_0000);
    assert_ne!(a, b);
    assert_eq!(id_of(&mem, &a), id_of(&mem, &b));
}

#[test]
fn id_tracks_texture_register() {
    let mem = VecGuestMemory::new(0x10000, 0x10000);
    let a = textured_ps(&mem, 0x10000, 0, 0x40_0000);
    let b = textured_ps(&mem, 0x12000, 4, 0x40_0000);
    assert_ne!(id_of(&mem, &a), id_of(&mem, &b));
}

#[test]
fn id_tracks_binary_hash() {
    let mem = VecGuestMemory::new(0x10000, 0x10000);
    let a = textured_ps(&mem, 0x10000, 0, 0x40_0000);
    let first = id_of(&mem, &a);

    // Same layout, different shader contents.
    let code = program(&[
        &image_sample(0, 0, 0, SAMPLER_REG, 0xf),
        &[s_waitcnt(0)],
        &exp(EXP_MRT0, 0xf, false, true, true, [0, 1, 2, 3]),
        &[s_endpgm()],
    ]);
    ShaderBinaryBuilder::new(&code)
        .slot(UsageType::ImmResource, 0, 0, 1)
        .slot(UsageType::ImmSampler, 0, SAMPLER_REG as u8, 0)
        .hash(0xdead_beef, 0x0bad_f00d)
        .write(&mem, 0x10000)
        .unwrap();
    assert_ne!(first, id_of(&mem, &a));
}

/// Exports v0..v3 to MRT0 without touching them, so the result depends only on which input VGPRs
/// the hardware initialised.
fn passthrough_ps(mem: &VecGuestMemory, input_ena: u32) -> PixelShaderInfo {
    let code = program(&[&exp(EXP_MRT0, 0xf, false, true, true, [0, 1, 2, 3]), &[s_endpgm()]]);
    ShaderBinaryBuilder::new(&code).write(mem, 0x10000).unwrap();
    PixelShaderInfo {
        ps_regs: PsStageRegisters::from_raw(&PsRegisterWords {
            pgm_lo: 0x100,
            col_format: 9,
            input_ena,
            ..Default::default()
        }),
        ps_user_data: ShaderUserData::default(),
    }
}

#[test]
fn id_tracks_pixel_input_enables() {
    let mem = VecGuestMemory::new(0x10000, 0x10000);
    let options = ShaderOptions::default();
    let vs = ShaderVertexInputInfo {
        export_count: 1,
        ..Default::default()
    };
    let with_barycentrics = passthrough_ps(&mem, PS_INPUT_PERSP_CENTER | PS_INPUT_POS_X | PS_INPUT_POS_Y);
    let position_only = passthrough_ps(&mem, PS_INPUT_POS_X | PS_INPUT_POS_Y);

    let info_a = shader_get_input_info_ps(&with_barycentrics, &vs, &mem, &options).unwrap();
    let info_b = shader_get_input_info_ps(&position_only, &vs, &mem, &options).unwrap();
    assert_eq!(info_a, info_b);

    let wgsl_a = shader_recompile_ps(&with_barycentrics, &info_a, &mem, &options).unwrap().wgsl;
    let wgsl_b = shader_recompile_ps(&position_only, &info_b, &mem, &options).unwrap().wgsl;
    assert!(wgsl_a.contains("v[2] = bitcast<u32>(input.frag_coord.x);"));
    assert!(wgsl_b.contains("v[0] = bitcast<u32>(input.frag_coord.x);"));

    assert_ne!(
        shader_get_id_ps(&with_barycentrics, &info_a, &mem, &options).unwrap(),
        shader_get_id_ps(&position_only, &info_b, &mem, &options).unwrap()
    );
}

fn store_cs(mem: &VecGuestMemory, rsrc2: u32) -> ComputeShaderInfo {
    let code = program(&[&buffer_store_dword(0, 0, 0, int(0), 0), &[s_endpgm()]]);
    ShaderBinaryBuilder::new(&code)
        .slot(UsageType::ImmRwResource, 0, 0, 0)
        .write(mem, 0x10000)
        .unwrap();
    let mut v = BufferResource {
        fields: [0, 4 << 16, 64, 4 | (5 << 3) | (6 << 6) | (7 << 9) | (4 << 12) | (4 << 15)],
    };
    v.update_address(0x30000);
    ComputeShaderInfo {
        cs_regs: CsStageRegisters::from_raw(&CsRegisterWords {
            pgm_lo: 0x100,
            rsrc2: (4 << 1) | rsrc2,
            num_thread_x: 8,
            num_thread_y: 8,
            num_thread_z: 1,
            ..Default::default()
        }),
        cs_user_data: ShaderUserData::new(&v.fields),
    }
}

#[test]
fn id_tracks_compute_thread_and_group_inputs() {
    let mem = VecGuestMemory::new(0x10000, 0x10000);
    let options = ShaderOptions::default();
    let tgid_x = 1 << 7;
    let tgid_y = 1 << 8;
    let tidig_xy = 1 << 11;

    let variants = [tgid_x, tgid_x | tgid_y, tgid_x | tidig_xy];
    let mut seen: Vec<(ShaderId, String)> = Vec::new();
    for rsrc2 in variants {
        let cs = store_cs(&mem, rsrc2);
        let info = shader_get_input_info_cs(&cs, &mem, &options).unwrap();
        let wgsl = shader_recompile_cs(&cs, &info, &mem, &options).unwrap().wgsl;
        let id = shader_get_id_cs(&cs, &info, &mem, &options).unwrap();
        for (other_id, other_wgsl) in &seen {
            assert_ne!(&wgsl, other_wgsl);
            assert_ne!(&id, other_id);
        }
        seen.push((id, wgsl));
    }

    // Same configuration again: same id.
    let cs = store_cs(&mem, tgid_x);
    let info = shader_get_input_info_cs(&cs, &mem, &options).unwrap();
    assert_eq!(shader_get_id_cs(&cs, &info, &mem, &options).unwrap(), seen[0].0);
}
