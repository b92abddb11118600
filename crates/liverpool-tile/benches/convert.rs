#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
#[cfg(not(target_arch = "wasm32"))]
use liverpool_tile::{convert_linear_to_tiled, convert_tiled_to_linear, tiled_size, TileMode, TileParams};

#[cfg(not(target_arch = "wasm32"))]
fn criterion_config() -> Criterion {
    match std::env::var("LIVERPOOL_BENCH_PROFILE").as_deref() {
        Ok("ci") => Criterion::default()
            .warm_up_time(Duration::from_millis(150))
            .measurement_time(Duration::from_millis(400))
            .sample_size(10)
            .noise_threshold(0.05),
        _ => Criterion::default()
            .warm_up_time(Duration::from_secs(1))
            .measurement_time(Duration::from_secs(2))
            .sample_size(50)
            .noise_threshold(0.03),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_video_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("video_out_detile");
    for (width, height) in [(1280u32, 720u32), (1920, 1080)] {
        for neo in [false, true] {
            let params = TileParams::video_out(width, height, neo);
            let len = tiled_size(&params).expect("supported surface") as usize;
            let src: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let mut dst = vec![0u8; len];
            group.throughput(Throughput::Bytes(len as u64));
            group.bench_function(
                BenchmarkId::new(if neo { "p16" } else { "p8" }, format!("{width}x{height}")),
                |b| {
                    b.iter(|| {
                        convert_tiled_to_linear(&mut dst, black_box(&src), &params).expect("convert");
                        black_box(dst[0]);
                    })
                },
            );
        }
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
fn bench_texture(c: &mut Criterion) {
    let mut group = c.benchmark_group("texture_tile");
    for element_size in [1u32, 4, 16] {
        let params = TileParams {
            mode: TileMode::TextureTiled,
            width: 512,
            height: 512,
            element_size,
            neo: false,
        };
        let len = tiled_size(&params).expect("supported surface") as usize;
        let src: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
        let mut dst = vec![0u8; len];
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_function(BenchmarkId::new("linear_to_tiled", format!("{element_size}B")), |b| {
            b.iter(|| {
                convert_linear_to_tiled(&mut dst, black_box(&src), &params).expect("convert");
                black_box(dst[0]);
            })
        });
    }
    group.finish();
}

#[cfg(not(target_arch = "wasm32"))]
criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_video_out, bench_texture
}
#[cfg(not(target_arch = "wasm32"))]
criterion_main!(benches);
