//! Rack-mode engine behavior against the outer-host surface.

use plugrack::{Engine, EngineConfig, HostMidiEvent};
use plugrack_core::{EngineOptionId, EngineOptions};
use plugrack_plugin::builtin::{gain_params, PassthroughInstance};
use plugrack_plugin::{PluginInstance, PluginType};
use std::sync::Arc;

fn rack_engine(buffer_size: u32, sample_rate: f64) -> Arc<Engine> {
    let engine = Engine::new(
        EngineConfig::default(),
        EngineOptions::default(),
        buffer_size,
        sample_rate,
    );
    engine.activate();
    engine
}

fn process_stereo(
    engine: &Engine,
    input: [&[f32]; 2],
    midi_in: &[HostMidiEvent],
) -> (Vec<f32>, Vec<f32>, Vec<HostMidiEvent>) {
    let frames = input[0].len();
    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];
    let mut midi_out = Vec::new();
    {
        let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
        engine.process(&input, &mut outs, frames as u32, midi_in, &mut midi_out);
    }
    (left, right, midi_out)
}

#[test]
fn empty_rack_is_bit_exact_passthrough() {
    let engine = rack_engine(256, 48000.0);
    let sine: Vec<f32> = (0..256)
        .map(|k| (2.0 * std::f32::consts::PI * 440.0 * k as f32 / 48000.0).sin())
        .collect();
    let cosine: Vec<f32> = (0..256)
        .map(|k| (2.0 * std::f32::consts::PI * 440.0 * k as f32 / 48000.0).cos())
        .collect();
    let (left, right, _) = process_stereo(&engine, [&sine, &cosine], &[]);
    assert_eq!(left, sine);
    assert_eq!(right, cosine);
}

#[test]
fn empty_rack_forwards_midi_verbatim() {
    let engine = rack_engine(64, 48000.0);
    let events = [
        HostMidiEvent {
            time: 0,
            port: 0,
            size: 3,
            data: [0x90, 60, 100, 0],
        },
        HostMidiEvent {
            time: 32,
            port: 0,
            size: 3,
            data: [0x80, 60, 0, 0],
        },
    ];
    let input = [0.0f32; 64];
    let (_, _, midi_out) = process_stereo(&engine, [&input, &input], &events);
    assert_eq!(midi_out, events.to_vec());
}

#[test]
fn inactive_engine_outputs_silence() {
    let engine = rack_engine(64, 48000.0);
    engine.deactivate();
    let input = [0.5f32; 64];
    let (left, right, _) = process_stereo(&engine, [&input, &input], &[]);
    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
}

#[test]
fn oversized_cycle_forces_a_one_off_resize() {
    let engine = rack_engine(64, 48000.0);
    let input: Vec<f32> = (0..256).map(|k| k as f32 * 0.001).collect();
    let (left, _, _) = process_stereo(&engine, [&input, &input], &[]);
    assert_eq!(engine.buffer_size(), 256);
    assert_eq!(left, input);
}

#[test]
fn rack_accepts_mono_to_stereo_with_force_stereo() {
    // Loader with asymmetric test shapes alongside the built-ins.
    let loader = Box::new(
        |ptype: PluginType, _filename: &str, label: &str| -> Option<Box<dyn PluginInstance>> {
            if ptype != PluginType::Internal {
                return None;
            }
            match label {
                "mono2stereo" => Some(Box::new(PassthroughInstance::with_ports(1, 2))),
                "threeport" => Some(Box::new(PassthroughInstance::with_ports(3, 3))),
                other => plugrack_plugin::create_builtin(other),
            }
        },
    );
    let mut options = EngineOptions::default();
    options
        .apply(EngineOptionId::ForceStereo, "true", false)
        .unwrap();
    let engine = Engine::with_loader(EngineConfig::default(), options, 64, 48000.0, loader);
    engine.activate();

    engine
        .add_plugin(PluginType::Internal, "", "mono2stereo")
        .expect("1-in/2-out must be admitted under forceStereo");

    let err = engine
        .add_plugin(PluginType::Internal, "", "threeport")
        .unwrap_err();
    assert!(err.to_string().contains("Rack"));
    assert!(engine.last_error().contains("Rack"));
    assert_eq!(engine.plugin_count(), 1);
}

#[test]
fn boolean_parameter_snaps_through_the_engine() {
    let engine = rack_engine(64, 48000.0);
    engine
        .add_plugin(PluginType::Internal, "", "gain")
        .unwrap();
    let mute = gain_params::MUTE as i32;
    assert_eq!(engine.set_parameter_value(0, mute, 0.49).unwrap(), 0.0);
    assert_eq!(engine.plugin(0).unwrap().parameter_value(mute), Some(0.0));
    assert_eq!(engine.set_parameter_value(0, mute, 0.5).unwrap(), 1.0);
    assert_eq!(engine.plugin(0).unwrap().parameter_value(mute), Some(1.0));
}

#[test]
fn add_plugin_requires_a_name_or_filename() {
    let engine = rack_engine(64, 48000.0);
    let err = engine
        .add_plugin(PluginType::Internal, "", "")
        .unwrap_err();
    assert!(err.to_string().contains("filename or label"));
}

#[test]
fn gain_plugin_processes_in_the_rack() {
    let engine = rack_engine(64, 48000.0);
    engine
        .add_plugin(PluginType::Internal, "", "gain")
        .unwrap();
    engine
        .set_parameter_value(0, gain_params::GAIN as i32, 0.5)
        .unwrap();
    let input = [1.0f32; 64];
    let (left, right, _) = process_stereo(&engine, [&input, &input], &[]);
    assert_eq!(left, vec![0.5; 64]);
    assert_eq!(right, vec![0.5; 64]);
}

#[test]
fn remove_plugin_compacts_ids() {
    let engine = rack_engine(64, 48000.0);
    engine.add_plugin(PluginType::Internal, "", "gain").unwrap();
    engine
        .add_plugin(PluginType::Internal, "", "passthrough")
        .unwrap();
    engine.remove_plugin(0).unwrap();
    assert_eq!(engine.plugin_count(), 1);
    let survivor = engine.plugin(0).unwrap();
    assert_eq!(survivor.id(), 0);
    assert_eq!(survivor.label(), "passthrough");
}

#[test]
fn clone_copies_settings() {
    let engine = rack_engine(64, 48000.0);
    engine.add_plugin(PluginType::Internal, "", "gain").unwrap();
    engine
        .set_parameter_value(0, gain_params::GAIN as i32, 1.5)
        .unwrap();
    engine.plugin(0).unwrap().set_dry_wet(0.25);
    let clone_id = engine.clone_plugin(0).unwrap();
    let clone = engine.plugin(clone_id).unwrap();
    assert_eq!(clone.parameter_value(gain_params::GAIN as i32), Some(1.5));
    assert_eq!(clone.dry_wet(), 0.25);
}
