//! Integration Tests
//!
//! End-to-end scenarios across the controller, snapshots and signal chain.

use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::{tempdir, TempDir};
use test_case::test_case;

use doomloader::{
    AmpModeler, AmpParameters, AudioBuffer, ConfigurationController, ConvolutionEngine, DoomError,
    EngineConfig, ErrorKind, FsPresetStore, Preset, RequestState,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn controller(dir: &TempDir) -> ConfigurationController {
    init_logging();
    let store = FsPresetStore::new(dir.path().join("presets"));
    ConfigurationController::new(EngineConfig::default(), Box::new(store)).unwrap()
}

/// Deterministic white noise in [-0.5, 0.5)
fn noise(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        })
        .collect()
}

fn sine(frames: usize, offset: usize, freq: f32) -> Vec<f32> {
    (0..frames)
        .map(|i| (2.0 * std::f32::consts::PI * freq * (i + offset) as f32 / 48000.0).sin() * 0.5)
        .collect()
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

fn ir_file(dir: &TempDir, name: &str, samples: &[f32]) -> PathBuf {
    let path = dir.path().join(name);
    write_wav(&path, samples, 48000);
    path
}

// === Convolution scenarios ===

#[test]
fn test_long_ir_capped_to_max_length() {
    let config = EngineConfig::default();
    assert_eq!((config.sample_rate, config.block_size), (48000, 128));

    let mut engine = ConvolutionEngine::new(&config);
    engine.load_ir(&noise(96000, 7), 48000, 8192).unwrap();
    assert!(engine.is_ready());
    assert_eq!(engine.effective_length(), 8192);

    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    ctl.load_impulse_response_samples(&noise(96000, 7), 48000, 8192)
        .unwrap();
    assert_eq!(ctl.current().ir.as_ref().map(|ir| ir.len()), Some(8192));
}

#[test]
fn test_no_model_no_ir_is_dry_passthrough() {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    let mut chain = ctl.create_signal_chain();

    for block in 0..8 {
        let ch = noise(128, block);
        let mut buffer = AudioBuffer::from_channels(vec![ch.clone(), ch], 48000);
        let input = buffer.clone();
        chain.process_block(&mut buffer, 128);
        assert_eq!(buffer.samples, input.samples);
    }
}

#[test]
fn test_ir_swap_has_bounded_discontinuity() {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    let mut chain = ctl.create_signal_chain();
    let frames = 128;

    ctl.load_impulse_response_samples(&[1.0], 48000, 8192).unwrap();
    let mut output = Vec::new();
    for block in 0..40 {
        if block == 20 {
            // Same tap one sample later: a hard switch would jump
            ctl.load_impulse_response_samples(&[0.0, 1.0], 48000, 8192)
                .unwrap();
        }
        let ch = sine(frames, block * frames, 220.0);
        let mut buffer = AudioBuffer::from_channels(vec![ch.clone(), ch], 48000);
        chain.process_block(&mut buffer, frames);
        if block >= 4 {
            output.extend_from_slice(buffer.channel(0));
        }
    }

    // A 220 Hz sine at 0.5 moves at most ~0.015 per sample
    let max_step = output
        .windows(2)
        .map(|w| (w[1] - w[0]).abs())
        .fold(0.0_f32, f32::max);
    assert!(max_step < 0.05, "max step {}", max_step);
    assert_eq!(chain.active_snapshot().id(), ctl.current().id());
    assert!(!chain.is_transitioning());
}

// === Parameter clamping ===

#[test_case(2.0, 1.0 ; "above range")]
#[test_case(-0.5, 0.0 ; "below range")]
#[test_case(0.25, 0.25 ; "in range")]
fn test_set_amp_gain_clamps(input: f32, stored: f32) {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    ctl.set_amp_gain(input);
    assert_eq!(ctl.amp_parameters().gain, stored);
    assert_eq!(ctl.current().amp.gain, stored);
}

#[test]
fn test_all_parameters_clamped() {
    let wild = AmpParameters {
        gain: 3.0,
        bass: -1.0,
        mid: 1.5,
        treble: f32::INFINITY,
        presence: -0.1,
        volume: 0.5,
        saturation: 9.0,
        asymmetry: -9.0,
        sag: 1.0,
    };
    let mut modeler = AmpModeler::new(&EngineConfig::default());
    modeler.set_parameters(&wild);
    let got = modeler.parameters();
    for v in [
        got.gain, got.bass, got.mid, got.treble, got.presence, got.volume, got.saturation,
        got.asymmetry, got.sag,
    ] {
        assert!((0.0..=1.0).contains(&v), "{} out of range", v);
    }
    assert_eq!(got.gain, 1.0);
    assert_eq!(got.bass, 0.0);
    assert_eq!(got.volume, 0.5);
}

// === Model loading ===

#[test]
fn test_invalid_model_leaves_state_unchanged() {
    let dir = tempdir().unwrap();
    let broken = dir.path().join("broken.nam");
    std::fs::write(&broken, b"\x00\x01 definitely not a model").unwrap();
    let broken = broken.to_string_lossy().to_string();

    let mut modeler = AmpModeler::new(&EngineConfig::default());
    assert!(!modeler.is_ready());
    assert!(modeler.load_model(&broken).is_err());
    assert!(!modeler.is_ready());

    modeler.load_model("builtin:clean").unwrap();
    assert!(modeler.load_model(&broken).is_err());
    assert!(modeler.is_ready());
    assert_eq!(modeler.model_info().map(|i| i.name.as_str()), Some("clean"));

    let ctl = controller(&dir);
    ctl.load_model("builtin:lead").unwrap();
    let before = ctl.current();
    let err = ctl.load_model(&broken).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert_eq!(ctl.state(), RequestState::Failed);
    assert_eq!(ctl.current().id(), before.id());
}

#[test]
fn test_neural_model_through_controller() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("unity.nam");
    std::fs::write(
        &path,
        r#"{
            "version": "0.5.2",
            "architecture": "Linear",
            "config": { "receptive_field": 2, "bias": false },
            "weights": [0.0, 1.0],
            "sample_rate": 48000,
            "metadata": { "name": "Unity" }
        }"#,
    )
    .unwrap();

    let ctl = controller(&dir);
    ctl.load_model(path.to_str().unwrap()).unwrap();
    let snap = ctl.current();
    let model = snap.model.as_ref().unwrap();
    assert_eq!(model.info().name, "Unity");
    assert!(model.info().checksum.is_some());

    let mut chain = ctl.create_signal_chain();
    let ch = sine(128, 0, 220.0);
    let mut buffer = AudioBuffer::from_channels(vec![ch.clone(), ch], 48000);
    chain.process_block(&mut buffer, 128);
    assert!(buffer.is_finite());
    assert_eq!(buffer.channel(0), buffer.channel(1));
}

#[test]
fn test_model_sample_rate_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("slow.nam");
    std::fs::write(
        &path,
        r#"{"architecture": "Linear", "config": {"receptive_field": 1}, "weights": [1.0], "sample_rate": 44100}"#,
    )
    .unwrap();
    let ctl = controller(&dir);
    let err = ctl.load_model(path.to_str().unwrap()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SampleRateMismatch);
    assert!(ctl.current().model.is_none());
}

// === Presets ===

#[test]
fn test_preset_round_trip() {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    let cab = ir_file(&dir, "cab.wav", &noise(2048, 3));

    ctl.load_model("builtin:crunch").unwrap();
    ctl.load_impulse_response(&cab).unwrap();
    ctl.set_amp_tone(0.2, 0.7, 0.9);
    ctl.set_amp_gain(0.65);
    ctl.set_ir_mix(0.4);
    ctl.set_reverb_level(0.3);
    ctl.set_chorus_level(0.1);
    let saved_state = ctl.current();
    ctl.save_preset("round-trip").unwrap();

    ctl.set_amp_gain(0.0);
    ctl.clear_model();
    ctl.clear_impulse_response();
    ctl.load_preset("round-trip").unwrap();

    let loaded = ctl.current();
    assert_eq!(loaded.model_source(), Some("builtin:crunch"));
    assert_eq!(loaded.ir_path.as_deref(), Some(cab.as_path()));
    assert!(loaded.ir.is_some());
    assert!(loaded.amp.max_difference(&saved_state.amp) < 1e-6);
    assert_abs_diff_eq!(loaded.ir_wet_level, 0.4, epsilon = 1e-6);
    assert_eq!(loaded.effects, saved_state.effects);
}

#[test]
fn test_failed_preset_is_not_partially_applied() {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    let cab = ir_file(&dir, "gone.wav", &noise(512, 9));

    let mut template = Preset::default_named("Doomed", "Metal");
    template.model_path = Some("builtin:metal".to_string());
    template.ir_path = Some(cab.clone());
    template.amp.set_gain(0.95);
    let store = FsPresetStore::new(dir.path().join("presets"));
    doomloader::PresetStore::write(&store, Path::new("doomed"), &template).unwrap();
    std::fs::remove_file(&cab).unwrap();

    ctl.load_model("builtin:clean").unwrap();
    let before = ctl.current();
    let err = ctl.load_preset("doomed").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);

    let after = ctl.current();
    assert_eq!(after.id(), before.id());
    assert_eq!(after.model_source(), Some("builtin:clean"));
    assert_eq!(after.amp, before.amp);
}

#[test]
fn test_sequential_presets_replace_whole_state() {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    let cab_a = ir_file(&dir, "a.wav", &noise(1024, 1));

    let mut a = Preset::default_named("A", "Clean");
    a.model_path = Some("builtin:clean".to_string());
    a.ir_path = Some(cab_a.clone());
    a.effects.delay_level = 0.5;
    let store = FsPresetStore::new(dir.path().join("presets"));
    doomloader::PresetStore::write(&store, Path::new("a"), &a).unwrap();
    let b = Preset::default_named("B", "Metal");
    doomloader::PresetStore::write(&store, Path::new("b"), &b).unwrap();

    ctl.load_preset("a").unwrap();
    ctl.load_preset("b").unwrap();
    let snap = ctl.current();
    assert!(snap.model.is_none());
    assert!(snap.ir.is_none());
    assert_eq!(snap.effects.delay_level, 0.0);
}

#[test]
fn test_cancelled_then_new_request_publishes() {
    let dir = tempdir().unwrap();
    let ctl = controller(&dir);
    ctl.cancel_pending();
    assert!(ctl.load_model("builtin:lead").is_ok());
    assert_eq!(ctl.state(), RequestState::Published);
    assert!(!matches!(ctl.load_model("builtin:clean"), Err(DoomError::Superseded)));
}
