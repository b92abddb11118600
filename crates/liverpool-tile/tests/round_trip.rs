#![cfg(not(target_arch = "wasm32"))]

use liverpool_tile::{
    convert_linear_to_tiled, convert_tiled_to_linear, linear_size, tiled_size, TileMode, TileParams,
};
use proptest::prelude::*;

fn params_strategy() -> impl Strategy<Value = TileParams> {
    let mode = prop_oneof![
        Just(TileMode::Linear),
        Just(TileMode::VideoOutTiled),
        Just(TileMode::TextureTiled),
    ];
    let element_size = prop_oneof![Just(1u32), Just(2u32), Just(4u32), Just(8u32), Just(16u32)];
    (mode, 1u32..=300, 1u32..=150, element_size, any::<bool>()).prop_map(
        |(mode, width, height, element_size, neo)| TileParams {
            mode,
            width,
            height,
            element_size: if mode == TileMode::VideoOutTiled { 4 } else { element_size },
            neo,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn linear_tiled_linear_is_identity(params in params_strategy(), seed in any::<u64>()) {
        let len = tiled_size(&params).unwrap().max(linear_size(&params)) as usize;
        let image_len = linear_size(&params) as usize;

        // Bytes past the image carry no pixel and come back as zero.
        let mut linear = vec![0u8; len];
        let mut state = seed | 1;
        for b in &mut linear[..image_len] {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *b = state as u8;
        }

        let mut tiled = vec![0u8; len];
        convert_linear_to_tiled(&mut tiled, &linear, &params).unwrap();
        let mut back = vec![0xaau8; len];
        convert_tiled_to_linear(&mut back, &tiled, &params).unwrap();
        prop_assert_eq!(back, linear);
    }
}

#[test]
fn video_out_uniform_fill_survives_detiling() {
    let params = TileParams::video_out(256, 128, false);
    let len = tiled_size(&params).unwrap() as usize;
    let tiled: Vec<u8> = std::iter::repeat([0x11, 0x22, 0x33, 0x44]).take(len / 4).flatten().collect();
    let mut linear = vec![0u8; len];
    convert_tiled_to_linear(&mut linear, &tiled, &params).unwrap();
    assert_eq!(linear, tiled);
}
