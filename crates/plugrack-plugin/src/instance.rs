//! The plugin adapter trait.
//!
//! Format wrappers (LADSPA, DSSI, LV2, VST2/3, AU, sampler banks) implement
//! [`PluginInstance`] and stay outside this crate; the engine only ever sees
//! this interface, either directly (in-process) or replayed over the bridge
//! protocol (the worker hosts the instance).

use crate::plugin::PluginCategory;
use plugrack_core::{EngineEvent, ParameterData, ParameterRanges};

#[derive(Debug, Clone, Default)]
pub struct InstanceInfo {
    pub name: String,
    pub label: String,
    pub maker: String,
    pub copyright: String,
    pub unique_id: i64,
    pub category: PluginCategory,
}

#[derive(Debug, Clone, Default)]
pub struct MidiProgramData {
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

/// Borrowed buffers for one processing call. Outputs must be fully written
/// or fully zeroed by the callee.
pub struct ProcessArgs<'a, 'b> {
    pub audio_in: &'a [&'a [f32]],
    pub audio_out: &'a mut [&'b mut [f32]],
    pub cv_in: &'a [&'a [f32]],
    pub cv_out: &'a mut [&'b mut [f32]],
    pub events_in: &'a [EngineEvent],
    /// Capacity-bounded by the caller; pushes beyond it are dropped there.
    pub events_out: &'a mut Vec<EngineEvent>,
    pub frames: usize,
}

pub trait PluginInstance: Send {
    fn info(&self) -> &InstanceInfo;

    fn audio_in_count(&self) -> u32;
    fn audio_out_count(&self) -> u32;
    fn cv_in_count(&self) -> u32 {
        0
    }
    fn cv_out_count(&self) -> u32 {
        0
    }
    fn wants_midi_in(&self) -> bool {
        false
    }
    fn produces_midi_out(&self) -> bool {
        false
    }
    fn is_synth(&self) -> bool {
        false
    }

    fn parameter_count(&self) -> u32;
    fn parameter_data(&self, index: u32) -> ParameterData;
    fn parameter_name(&self, index: u32) -> String;
    fn parameter_unit(&self, _index: u32) -> String {
        String::new()
    }
    fn parameter_ranges(&self, index: u32) -> ParameterRanges;
    fn parameter_value(&self, index: u32) -> f32;
    fn set_parameter_value(&mut self, index: u32, value: f32);

    fn program_count(&self) -> u32 {
        0
    }
    fn program_name(&self, _index: u32) -> String {
        String::new()
    }
    fn set_program(&mut self, _index: i32) {}

    fn midi_program_count(&self) -> u32 {
        0
    }
    fn midi_program_data(&self, _index: u32) -> MidiProgramData {
        MidiProgramData::default()
    }
    fn set_midi_program(&mut self, _bank: u32, _program: u32) {}

    fn set_custom_data(&mut self, _dtype: &str, _key: &str, _value: &str) {}

    /// Opaque state blob for plugins that use chunked state.
    fn chunk(&mut self) -> Vec<u8> {
        Vec::new()
    }
    fn set_chunk(&mut self, _data: &[u8]) {}
    fn uses_chunks(&self) -> bool {
        false
    }

    fn latency(&self) -> u32 {
        0
    }

    fn has_custom_ui(&self) -> bool {
        false
    }
    fn needs_ui_main_thread(&self) -> bool {
        false
    }
    fn show_ui(&mut self, _show: bool) {}
    fn ui_idle(&mut self) {}

    fn activate(&mut self) {}
    fn deactivate(&mut self) {}
    fn set_sample_rate(&mut self, _rate: f64) {}
    fn set_buffer_size(&mut self, _frames: u32) {}

    fn process(&mut self, args: &mut ProcessArgs);
}
