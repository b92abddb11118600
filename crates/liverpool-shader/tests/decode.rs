use liverpool_shader::test_utils::*;
use liverpool_shader::{shader_parse, shader_parse_guest, ShaderError, ShaderInstructionType, ShaderType, VecGuestMemory};
use pretty_assertions::assert_eq;

fn branchy_pixel_program() -> Vec<u32> {
    program(&[
        &[
            s_mov_b32(0, int(3)),
            v_cmp_eq_u32(int(0), vgpr(0)),
            s_cbranch_execz(2),
            v_add_f32(1, vgpr(2), 3),
            v_mov_b32(1, F1_0),
            s_endpgm(),
        ],
    ])
}

#[test]
fn dbg_dump_lists_labels_before_their_instruction() {
    let code = shader_parse(&branchy_pixel_program(), ShaderType::Pixel).unwrap();
    insta::assert_snapshot!(code.dbg_dump().trim_end(), @r"
    ; Pixel shader, 6 instructions, 1 labels
      0000: s_mov_b32 s0, 3
      0004: v_cmp_eq_u32 vcc, 0, v0
      0008: s_cbranch_execz label_0014
      000c: v_add_f32 v1, v2, v3
      0010: v_mov_b32 v1, 1.0
    label_0014:
      0014: s_endpgm
    ");
}

#[test]
fn guest_decode_matches_slice_decode() {
    let words = branchy_pixel_program();
    let mem = VecGuestMemory::new(0x1000, 0x1000);
    mem.write_u32s(0x1100, &words).unwrap();

    let from_slice = shader_parse(&words, ShaderType::Pixel).unwrap();
    let from_guest = shader_parse_guest(&mem, 0x1100, ShaderType::Pixel, words.len()).unwrap();
    assert_eq!(from_slice, from_guest);
    assert!(from_guest.labels_consistent());
}

#[test]
fn guest_decode_stops_at_length_limit() {
    let words = branchy_pixel_program();
    let mem = VecGuestMemory::new(0x1000, 0x1000);
    mem.write_u32s(0x1100, &words).unwrap();

    let err = shader_parse_guest(&mem, 0x1100, ShaderType::Pixel, 3).unwrap_err();
    assert!(matches!(err, ShaderError::Malformed { pc: 0xc, .. }), "{err}");
}

#[test]
fn fetch_subroutine_ends_at_setpc() {
    let words = program(&[
        &[s_load_dwordx4(8, 2, 0), s_waitcnt(0)],
        &buffer_load_format_xyzw(4, 0, 8, int(0), 0),
        &[s_waitcnt(0), s_setpc_b64(0)],
        // Never reached: the decoder must not read past the return.
        &[0xffff_ffff],
    ]);
    let code = shader_parse(&words, ShaderType::Fetch).unwrap();
    let types: Vec<_> = code.instructions.iter().map(|i| i.ty).collect();
    assert_eq!(
        types,
        vec![
            ShaderInstructionType::SLoadDwordx4,
            ShaderInstructionType::SWaitcnt,
            ShaderInstructionType::BufferLoadFormatXyzw,
            ShaderInstructionType::SWaitcnt,
            ShaderInstructionType::SSetpcB64,
        ]
    );
}

#[test]
fn unknown_encoding_reports_pc() {
    let words = [v_mov_b32(0, F1_0), 0xbe80_3f00, s_endpgm()];
    let err = shader_parse(&words, ShaderType::Compute).unwrap_err();
    match err {
        ShaderError::UnsupportedInstruction { pc, .. } => assert_eq!(pc, 4),
        other => panic!("unexpected error: {other}"),
    }
}
