//! Signal Chain Benchmarks
//!
//! Per-block cost of the audio path at 48 kHz / 128 frames.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use doomloader::state::FsPresetStore;
use doomloader::{AudioBuffer, ConfigurationController, EngineConfig};

fn sine_block(frames: usize) -> AudioBuffer {
    let ch: Vec<f32> = (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * 110.0 * i as f32 / 48000.0).sin() * 0.5)
        .collect();
    AudioBuffer::from_channels(vec![ch.clone(), ch], 48000)
}

fn controller() -> ConfigurationController {
    let store = FsPresetStore::new(std::env::temp_dir().join("doomloader-bench-presets"));
    ConfigurationController::new(EngineConfig::default(), Box::new(store))
        .unwrap_or_else(|e| panic!("controller: {}", e))
}

fn benchmark_empty_chain(c: &mut Criterion) {
    let ctl = controller();
    let mut chain = ctl.create_signal_chain();
    let mut buffer = sine_block(128);

    c.bench_function("chain_passthrough_128", |b| {
        b.iter(|| chain.process_block(black_box(&mut buffer), 128))
    });
}

fn benchmark_full_chain(c: &mut Criterion) {
    let ctl = controller();
    let ir: Vec<f32> = (0..8192).map(|i| 0.999f32.powi(i) * if i % 2 == 0 { 1.0 } else { -0.5 }).collect();
    ctl.load_model("builtin:metal")
        .and_then(|_| ctl.load_impulse_response_samples(&ir, 48000, 8192))
        .unwrap_or_else(|e| panic!("setup: {}", e));
    ctl.set_reverb_level(0.3);
    ctl.set_delay_level(0.2);
    ctl.set_chorus_level(0.2);

    let mut chain = ctl.create_signal_chain();
    let mut buffer = sine_block(128);

    c.bench_function("chain_full_8192_tap_ir_128", |b| {
        b.iter(|| chain.process_block(black_box(&mut buffer), 128))
    });
}

criterion_group!(benches, benchmark_empty_chain, benchmark_full_chain);
criterion_main!(benches);
