//! Shader front end, tiling and the object cache working together on one guest memory.

use anyhow::Context as _;
use liverpool::memory::objects::VIDEO_OUT_FORMAT_B8G8R8A8_SRGB;
use liverpool::memory::{
    GpuMemory, GpuMemoryConfig, GraphicContext, HostResource, SoftwareBackend, StorageBufferObject, TextureObject,
    VideoOutBufferObject,
};
use liverpool::shader::regs::{CsRegisterWords, CsStageRegisters, PsRegisterWords, PsStageRegisters};
use liverpool::shader::test_utils::*;
use liverpool::shader::{
    shader_get_id_ps, shader_get_input_info_cs, shader_get_input_info_ps, shader_recompile_cs, shader_recompile_ps,
    BufferResource, ComputeShaderInfo, GuestMemory, GuestRange, PixelShaderInfo, ShaderCache, ShaderCacheConfig,
    ShaderCacheLookupSource, ShaderOptions, ShaderStorageUsage, ShaderUserData, ShaderVertexInputInfo,
    TextureResource, UsageType, VecGuestMemory,
};
use liverpool::tile::{convert_linear_to_tiled, tiled_size, TileMode, TileParams};
use liverpool::LaunchReport;
use pretty_assertions::assert_eq;

const SAMPLER_REG: u32 = 12;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn guest() -> VecGuestMemory {
    VecGuestMemory::new(0x10000, 0x40000)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed)).collect()
}

/// 8x8 RGBA8 T# in 1D thin tiling.
fn rgba8_texture(addr: u64) -> TextureResource {
    let mut t = TextureResource::from_words(&[
        0,
        10 << 20,
        7 | (7 << 14),
        4 | (5 << 3) | (6 << 6) | (7 << 9) | (13 << 20) | (9 << 28),
        7 << 13,
        0,
        0,
        0,
    ]);
    t.update_address(addr);
    t
}

fn textured_ps(mem: &VecGuestMemory, program_addr: u64, texture: &TextureResource) -> PixelShaderInfo {
    let code = program(&[
        &image_sample(0, 0, 0, SAMPLER_REG, 0xf),
        &[s_waitcnt(0)],
        &exp(EXP_MRT0, 0xf, false, true, true, [0, 1, 2, 3]),
        &[s_endpgm()],
    ]);
    ShaderBinaryBuilder::new(&code)
        .slot(UsageType::ImmResource, 0, 0, 1)
        .slot(UsageType::ImmSampler, 0, SAMPLER_REG as u8, 0)
        .write(mem, program_addr)
        .unwrap();

    let mut user = [0u32; 16];
    user[..8].copy_from_slice(&texture.fields);
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

#[test]
fn textured_draw_binds_a_detiled_texture() {
    init_tracing();
    let mem = guest();
    let options = ShaderOptions::default();
    let texture_addr = 0x20000;

    let texels = pattern(8 * 8 * 4, 5);
    let tile = TileParams {
        mode: TileMode::TextureTiled,
        width: 8,
        height: 8,
        element_size: 4,
        neo: false,
    };
    let mut tiled = vec![0u8; tiled_size(&tile).unwrap() as usize];
    convert_linear_to_tiled(&mut tiled, &texels, &tile).unwrap();
    mem.write(texture_addr, &tiled).unwrap();

    let ps = textured_ps(&mem, 0x10000, &rgba8_texture(texture_addr));
    let vs = ShaderVertexInputInfo {
        export_count: 1,
        ..Default::default()
    };
    let info = shader_get_input_info_ps(&ps, &vs, &mem, &options).unwrap();
    assert_eq!(info.bind.textures2d.len(), 1);
    assert_eq!(info.bind.samplers.len(), 1);

    let mut cache = ShaderCache::new(ShaderCacheConfig::default()).unwrap();
    let id = shader_get_id_ps(&ps, &info, &mem, &options).unwrap();
    let (shader, source) = cache
        .get_or_recompile(&id, || shader_recompile_ps(&ps, &info, &mem, &options))
        .unwrap();
    assert_eq!(source, ShaderCacheLookupSource::Recompiled);
    assert!(shader.wgsl.contains("texture_2d<f32>"));

    let mut backend = SoftwareBackend::new();
    let mut gpu = GpuMemory::new(GpuMemoryConfig::default());
    let descriptor = info.bind.textures2d[0].texture;
    let object = TextureObject::from_descriptor(&descriptor, false);
    let range = GuestRange::new(descriptor.base(), tiled.len() as u64);
    let texture_id = {
        let mut ctx = GraphicContext::new(&mut backend, &mem);
        gpu.get_object(&mut ctx, &[range], &object).unwrap()
    };
    let HostResource::Image(image) = gpu.resource(texture_id).unwrap() else {
        panic!("texture is not an image");
    };
    assert_eq!((image.width, image.height), (8, 8));
    assert_eq!(backend.image_level(image.image, 0).unwrap(), texels.as_slice());

    // The next draw with the same state hits both caches.
    let (_, source) = cache
        .get_or_recompile(&id, || shader_recompile_ps(&ps, &info, &mem, &options))
        .unwrap();
    assert_eq!(source, ShaderCacheLookupSource::Memory);
    let mut ctx = GraphicContext::new(&mut backend, &mem);
    assert_eq!(gpu.get_object(&mut ctx, &[range], &object).unwrap(), texture_id);
    assert_eq!(gpu.stats().creates, 1);
}

#[test]
fn compute_dispatch_results_reach_guest_memory_on_flush() {
    init_tracing();
    let mem = guest();
    let options = ShaderOptions::default();

    let code = program(&[&buffer_store_dword(0, 0, 0, int(0), 0), &[s_endpgm()]]);
    ShaderBinaryBuilder::new(&code)
        .slot(UsageType::ImmRwResource, 0, 0, 0)
        .write(&mem, 0x10000)
        .unwrap();
    let mut v = BufferResource {
        fields: [0, 4 << 16, 64, 4 | (5 << 3) | (6 << 6) | (7 << 9) | (4 << 12) | (4 << 15)],
    };
    v.update_address(0x30000);
    let cs = ComputeShaderInfo {
        cs_regs: CsStageRegisters::from_raw(&CsRegisterWords {
            pgm_lo: 0x100,
            rsrc2: (4 << 1) | (1 << 7),
            num_thread_x: 64,
            num_thread_y: 1,
            num_thread_z: 1,
            ..Default::default()
        }),
        cs_user_data: ShaderUserData::new(&v.fields),
    };

    let info = shader_get_input_info_cs(&cs, &mem, &options).unwrap();
    assert_eq!(info.threads_num, [64, 1, 1]);
    let shader = shader_recompile_cs(&cs, &info, &mem, &options).unwrap();
    assert_eq!(shader.entry_point, "cs_main");

    let binding = &info.bind.storage_buffers[0];
    assert_eq!(binding.usage, ShaderStorageUsage::ReadWrite);
    let size = u64::from(binding.buffer.stride()) * u64::from(binding.buffer.num_records());
    let range = GuestRange::new(binding.buffer.base(), size);

    let mut backend = SoftwareBackend::new();
    let mut gpu = GpuMemory::default();
    let id = {
        let mut ctx = GraphicContext::new(&mut backend, &mem);
        gpu.get_object(&mut ctx, &[range], &StorageBufferObject { read_only: false })
            .unwrap()
    };

    // Stand in for the dispatch: each invocation stores its index.
    let buffer = *gpu.resource(id).unwrap().as_buffer().unwrap();
    let results: Vec<u8> = (0u32..64).flat_map(u32::to_le_bytes).collect();
    backend
        .buffer_contents_mut(buffer.buffer)
        .unwrap()
        .copy_from_slice(&results);

    let mut ctx = GraphicContext::new(&mut backend, &mem);
    assert_eq!(gpu.flush(&mut ctx).unwrap(), 1);
    gpu.frame_done();

    let mut bytes = vec![0u8; size as usize];
    mem.read(0x30000, &mut bytes).unwrap();
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);
    assert_eq!(words, (0u32..64).collect::<Vec<_>>());
}

#[test]
fn scan_out_buffer_round_trips_through_neo_tiling() {
    init_tracing();
    let mem = guest();
    let (width, height) = (256, 128);
    let frame = pattern(width * height * 4, 11);

    let params = TileParams::video_out(width as u32, height as u32, true);
    let size = tiled_size(&params).unwrap() as usize;
    let mut tiled = vec![0u8; size];
    convert_linear_to_tiled(&mut tiled, &frame, &params).unwrap();
    mem.write(0x20000, &tiled).unwrap();

    let mut backend = SoftwareBackend::new();
    let mut gpu = GpuMemory::default();
    let object = VideoOutBufferObject::new(VIDEO_OUT_FORMAT_B8G8R8A8_SRGB, width as u32, height as u32, true, true);
    let mut ctx = GraphicContext::new(&mut backend, &mem);
    let id = gpu
        .get_object(&mut ctx, &[GuestRange::new(0x20000, size as u64)], &object)
        .unwrap();
    drop(ctx);

    let image = *gpu.resource(id).unwrap().as_image().unwrap();
    assert_eq!(backend.image_level(image.image, 0).unwrap(), frame.as_slice());
}

#[test]
fn unsupported_instruction_terminates_the_launch() {
    let mem = guest();
    let options = ShaderOptions::default();
    // SOP1 opcode 63 is not in the decoder's table.
    let code = program(&[&[0xbe80_3f00u32], &exp(EXP_MRT0, 0xf, false, true, true, [0, 1, 2, 3]), &[s_endpgm()]]);
    ShaderBinaryBuilder::new(&code).write(&mem, 0x10000).unwrap();
    let ps = PixelShaderInfo {
        ps_regs: PsStageRegisters::from_raw(&PsRegisterWords {
            pgm_lo: 0x100,
            col_format: 9,
            ..Default::default()
        }),
        ps_user_data: ShaderUserData::default(),
    };

    let run = || -> anyhow::Result<()> {
        let vs = ShaderVertexInputInfo {
            export_count: 1,
            ..Default::default()
        };
        let info = shader_get_input_info_ps(&ps, &vs, &mem, &options)?;
        shader_recompile_ps(&ps, &info, &mem, &options).context("recompiling pixel shader")?;
        Ok(())
    };
    let report = LaunchReport::from_result(run());
    assert!(!report.succeeded);
    assert_eq!(
        report.termination_reason,
        "recompiling pixel shader: unsupported instruction at pc 0x0: SOP1 opcode 0x3f"
    );
}
