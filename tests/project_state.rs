//! Project save/load round trips.

use plugrack::{Engine, EngineConfig};
use plugrack_core::EngineOptions;
use plugrack_plugin::builtin::gain_params;
use plugrack_plugin::plugin::CUSTOM_DATA_TYPE_PROPERTY;
use plugrack_plugin::PluginType;
use std::sync::Arc;

fn engine() -> Arc<Engine> {
    let engine = Engine::new(
        EngineConfig::default(),
        EngineOptions::default(),
        128,
        48000.0,
    );
    engine.activate();
    engine
}

#[test]
fn state_roundtrip_restores_plugins_parameters_and_custom_data() {
    let source = engine();
    source.add_plugin(PluginType::Internal, "", "gain").unwrap();
    source
        .add_plugin(PluginType::Internal, "", "gain")
        .unwrap();

    source
        .set_parameter_value(0, gain_params::GAIN as i32, 1.5)
        .unwrap();
    source
        .set_parameter_value(0, gain_params::MUTE as i32, 1.0)
        .unwrap();
    source
        .set_parameter_value(0, gain_params::CHANNEL_MODE as i32, 2.0)
        .unwrap();
    source
        .set_parameter_value(1, gain_params::GAIN as i32, 0.25)
        .unwrap();
    source
        .set_parameter_value(1, gain_params::MUTE as i32, 0.0)
        .unwrap();
    source
        .set_parameter_value(1, gain_params::CHANNEL_MODE as i32, 1.0)
        .unwrap();
    source
        .plugin(0)
        .unwrap()
        .put_custom_data(CUSTOM_DATA_TYPE_PROPERTY, "color", "teal", true);
    source
        .plugin(1)
        .unwrap()
        .put_custom_data(CUSTOM_DATA_TYPE_PROPERTY, "slot", "aux", true);
    source.plugin(0).unwrap().set_dry_wet(0.5);
    source.plugin(1).unwrap().set_volume(0.8);

    let text = source.get_state();

    let restored = engine();
    restored.set_state(&text).unwrap();

    assert_eq!(restored.plugin_count(), 2);
    let first = restored.plugin(0).unwrap();
    let second = restored.plugin(1).unwrap();
    assert_eq!(first.parameter_value(gain_params::GAIN as i32), Some(1.5));
    assert_eq!(first.parameter_value(gain_params::MUTE as i32), Some(1.0));
    assert_eq!(
        first.parameter_value(gain_params::CHANNEL_MODE as i32),
        Some(2.0)
    );
    assert_eq!(second.parameter_value(gain_params::GAIN as i32), Some(0.25));
    assert_eq!(second.parameter_value(gain_params::MUTE as i32), Some(0.0));
    assert_eq!(
        second.parameter_value(gain_params::CHANNEL_MODE as i32),
        Some(1.0)
    );
    assert_eq!(first.dry_wet(), 0.5);
    assert!((second.volume() - 0.8).abs() < 1e-6);

    let first_custom = first.master().lock().custom_data.clone();
    assert_eq!(first_custom.len(), 1);
    assert_eq!(first_custom[0].key, "color");
    assert_eq!(first_custom[0].value, "teal");
    let second_custom = second.master().lock().custom_data.clone();
    assert_eq!(second_custom.len(), 1);
    assert_eq!(second_custom[0].key, "slot");
    assert_eq!(second_custom[0].value, "aux");
}

#[test]
fn double_roundtrip_is_stable() {
    let source = engine();
    source.add_plugin(PluginType::Internal, "", "gain").unwrap();
    source
        .set_parameter_value(0, gain_params::GAIN as i32, 0.75)
        .unwrap();
    let once = source.get_state();

    let copy = engine();
    copy.set_state(&once).unwrap();
    let twice = copy.get_state();
    // Observably equal: re-parsing both documents yields the same plugins.
    let doc_a = plugrack::ProjectDocument::from_text(&once).unwrap();
    let doc_b = plugrack::ProjectDocument::from_text(&twice).unwrap();
    assert_eq!(doc_a.plugins.len(), doc_b.plugins.len());
    assert_eq!(
        doc_a.plugins[0].parameters.len(),
        doc_b.plugins[0].parameters.len()
    );
    for (a, b) in doc_a.plugins[0]
        .parameters
        .iter()
        .zip(&doc_b.plugins[0].parameters)
    {
        assert_eq!(a.index, b.index);
        assert_eq!(a.value, b.value);
    }
}

#[test]
fn set_state_forces_options() {
    let target = engine();
    let text = engine().get_state();
    target.set_state(&text).unwrap();
    // Options are now locked against UI overrides.
    assert!(target
        .set_option(plugrack::EngineOptionId::MaxParameters, "64")
        .is_err());
}

#[test]
fn set_state_rejects_garbage() {
    let target = engine();
    let err = target.set_state("definitely not a project").unwrap_err();
    assert!(matches!(err, plugrack::EngineError::StateRejected(_)));
}

#[test]
fn set_state_replaces_existing_plugins() {
    let target = engine();
    target.add_plugin(PluginType::Internal, "", "gain").unwrap();
    target.add_plugin(PluginType::Internal, "", "gain").unwrap();
    target.add_plugin(PluginType::Internal, "", "gain").unwrap();

    let source = engine();
    source.add_plugin(PluginType::Internal, "", "gain").unwrap();
    target.set_state(&source.get_state()).unwrap();
    assert_eq!(target.plugin_count(), 1);
}
