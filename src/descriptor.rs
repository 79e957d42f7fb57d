//! The outer-host surface.
//!
//! The embedding host sees a table of function pointers over an opaque
//! handle, plus eight shipped descriptor variants differing only in name,
//! label and I/O shape. The parameter surface is a fixed 100 inputs + 10
//! outputs regardless of the loaded plugin set; indices beyond the first
//! plugin's parameters read the engine's float cache.
//!
//! Nothing error-shaped crosses this boundary: every entry point is
//! wrapped in a panic guard and reports through flags and silence.

use crate::engine::{Engine, EngineConfig, HostMidiEvent};
use plugrack_core::{
    AtomicFloat, EngineOptions, ParameterRanges, ProcessMode,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub const PARAMETER_SURFACE_INPUTS: usize = 100;
pub const PARAMETER_SURFACE_OUTPUTS: usize = 10;
pub const PARAMETER_SURFACE_TOTAL: usize =
    PARAMETER_SURFACE_INPUTS + PARAMETER_SURFACE_OUTPUTS;

/// One shipped variant of the embedded engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub process_mode: ProcessMode,
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
}

pub static DESCRIPTORS: [EngineDescriptor; 8] = [
    EngineDescriptor {
        name: "PlugRack Rack",
        label: "plugrack-rack",
        process_mode: ProcessMode::Rack,
        audio_ins: 2,
        audio_outs: 2,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 1,
    },
    EngineDescriptor {
        name: "PlugRack Rack (no MIDI out)",
        label: "plugrack-rack-nomidiout",
        process_mode: ProcessMode::Rack,
        audio_ins: 2,
        audio_outs: 2,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 0,
    },
    EngineDescriptor {
        name: "PlugRack Patchbay",
        label: "plugrack-patchbay",
        process_mode: ProcessMode::Patchbay,
        audio_ins: 2,
        audio_outs: 2,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 1,
    },
    EngineDescriptor {
        name: "PlugRack Patchbay (sidechain)",
        label: "plugrack-patchbay-sidechain",
        process_mode: ProcessMode::Patchbay,
        audio_ins: 3,
        audio_outs: 2,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 1,
    },
    EngineDescriptor {
        name: "PlugRack Patchbay (16ch)",
        label: "plugrack-patchbay16",
        process_mode: ProcessMode::Patchbay,
        audio_ins: 16,
        audio_outs: 16,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 1,
    },
    EngineDescriptor {
        name: "PlugRack Patchbay (32ch)",
        label: "plugrack-patchbay32",
        process_mode: ProcessMode::Patchbay,
        audio_ins: 32,
        audio_outs: 32,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 1,
    },
    EngineDescriptor {
        name: "PlugRack Patchbay (64ch)",
        label: "plugrack-patchbay64",
        process_mode: ProcessMode::Patchbay,
        audio_ins: 64,
        audio_outs: 64,
        cv_ins: 0,
        cv_outs: 0,
        midi_ins: 1,
        midi_outs: 1,
    },
    EngineDescriptor {
        name: "PlugRack Patchbay (CV)",
        label: "plugrack-patchbay-cv",
        process_mode: ProcessMode::Patchbay,
        audio_ins: 2,
        audio_outs: 2,
        cv_ins: 5,
        cv_outs: 5,
        midi_ins: 1,
        midi_outs: 1,
    },
];

pub fn descriptor_by_label(label: &str) -> Option<&'static EngineDescriptor> {
    DESCRIPTORS.iter().find(|d| d.label == label)
}

/// Snapshot of one surface parameter's description.
#[derive(Debug, Clone, Default)]
pub struct HostParameterInfo {
    pub name: String,
    pub unit: String,
    pub hints: u32,
    pub ranges: ParameterRanges,
    pub is_output: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HostMidiProgramInfo {
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

/// Host-side dispatcher opcodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatcherOp {
    BufferSizeChanged(u32),
    SampleRateChanged(f64),
    OfflineChanged(bool),
    GetInternalHandle,
}

/// The opaque per-instance handle the host holds.
pub struct HostedEngine {
    descriptor: &'static EngineDescriptor,
    engine: Arc<Engine>,
    param_cache: Vec<AtomicFloat>,
}

impl HostedEngine {
    pub fn new(
        descriptor: &'static EngineDescriptor,
        buffer_size: u32,
        sample_rate: f64,
    ) -> Self {
        let options = EngineOptions {
            process_mode: descriptor.process_mode,
            ..Default::default()
        };
        let engine = Engine::new(
            EngineConfig {
                audio_ins: descriptor.audio_ins,
                audio_outs: descriptor.audio_outs,
                cv_ins: descriptor.cv_ins,
                cv_outs: descriptor.cv_outs,
                midi_out: descriptor.midi_outs > 0,
            },
            options,
            buffer_size,
            sample_rate,
        );
        Self {
            descriptor,
            engine,
            param_cache: (0..PARAMETER_SURFACE_TOTAL)
                .map(|_| AtomicFloat::new(0.0))
                .collect(),
        }
    }

    pub fn descriptor(&self) -> &'static EngineDescriptor {
        self.descriptor
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn first_plugin_param_count(&self) -> u32 {
        self.engine
            .plugin(0)
            .map(|p| p.parameter_count().min(PARAMETER_SURFACE_INPUTS as u32))
            .unwrap_or(0)
    }

    pub fn parameter_count(&self) -> u32 {
        PARAMETER_SURFACE_TOTAL as u32
    }

    pub fn parameter_info(&self, index: u32) -> HostParameterInfo {
        let is_output = index as usize >= PARAMETER_SURFACE_INPUTS;
        if index < self.first_plugin_param_count() {
            if let Ok(plugin) = self.engine.plugin(0) {
                let shared = plugin.master().lock();
                if let Some(param) = shared.params.get(index as usize) {
                    return HostParameterInfo {
                        name: param.name.clone(),
                        unit: param.unit.clone(),
                        hints: param.data.hints,
                        ranges: param.ranges,
                        is_output: param.data.kind
                            == plugrack_core::ParameterKind::Output,
                    };
                }
            }
        }
        HostParameterInfo {
            name: format!(
                "{}{}",
                if is_output { "Out " } else { "" },
                index
            ),
            is_output,
            ..Default::default()
        }
    }

    pub fn parameter_value(&self, index: u32) -> f32 {
        if index < self.first_plugin_param_count() {
            if let Ok(plugin) = self.engine.plugin(0) {
                if let Some(value) = plugin.parameter_value(index as i32) {
                    return value;
                }
            }
        }
        self.param_cache
            .get(index as usize)
            .map(|slot| slot.get())
            .unwrap_or(0.0)
    }

    pub fn set_parameter_value(&self, index: u32, value: f32) {
        if let Some(slot) = self.param_cache.get(index as usize) {
            slot.set(value);
        }
        if (index as usize) < PARAMETER_SURFACE_INPUTS
            && index < self.first_plugin_param_count()
        {
            let _ = self.engine.set_parameter_value(0, index as i32, value);
        }
    }

    pub fn midi_program_count(&self) -> u32 {
        self.engine
            .plugin(0)
            .map(|p| p.master().lock().midi_programs.len() as u32)
            .unwrap_or(0)
    }

    pub fn midi_program_info(&self, index: u32) -> HostMidiProgramInfo {
        self.engine
            .plugin(0)
            .ok()
            .and_then(|p| {
                p.master()
                    .lock()
                    .midi_programs
                    .get(index as usize)
                    .map(|mp| HostMidiProgramInfo {
                        bank: mp.bank,
                        program: mp.program,
                        name: mp.name.clone(),
                    })
            })
            .unwrap_or_default()
    }

    pub fn set_midi_program(&self, bank: u32, program: u32) {
        if let Ok(plugin) = self.engine.plugin(0) {
            let index = plugin
                .master()
                .lock()
                .midi_programs
                .iter()
                .position(|mp| mp.bank == bank && mp.program == program);
            if let Some(index) = index {
                plugin.set_midi_program(index as i32);
            }
        }
    }

    pub fn dispatcher(&self, op: DispatcherOp) -> i64 {
        match op {
            DispatcherOp::BufferSizeChanged(frames) => {
                self.engine.buffer_size_changed(frames);
                0
            }
            DispatcherOp::SampleRateChanged(rate) => {
                self.engine.sample_rate_changed(rate);
                0
            }
            DispatcherOp::OfflineChanged(offline) => {
                self.engine.set_offline(offline);
                0
            }
            DispatcherOp::GetInternalHandle => Arc::as_ptr(&self.engine) as i64,
        }
    }
}

/// The function-pointer table the outer host drives the engine through.
/// Every entry contains a panic guard; a panicking cycle produces silence,
/// never an unwind across the boundary.
pub struct EngineVtable {
    pub instantiate: fn(&'static EngineDescriptor, u32, f64) -> Box<HostedEngine>,
    pub cleanup: fn(Box<HostedEngine>),
    pub get_parameter_count: fn(&HostedEngine) -> u32,
    pub get_parameter_info: fn(&HostedEngine, u32) -> HostParameterInfo,
    pub get_parameter_value: fn(&HostedEngine, u32) -> f32,
    pub set_parameter_value: fn(&HostedEngine, u32, f32),
    pub get_midi_program_count: fn(&HostedEngine) -> u32,
    pub get_midi_program_info: fn(&HostedEngine, u32) -> HostMidiProgramInfo,
    pub set_midi_program: fn(&HostedEngine, u32, u32),
    pub ui_show: fn(&HostedEngine, bool),
    pub ui_idle: fn(&HostedEngine),
    pub ui_set_parameter_value: fn(&HostedEngine, u32, f32),
    pub activate: fn(&HostedEngine),
    pub deactivate: fn(&HostedEngine),
    #[allow(clippy::type_complexity)]
    pub process: fn(
        &HostedEngine,
        &[&[f32]],
        &mut [&mut [f32]],
        u32,
        &[HostMidiEvent],
        &mut Vec<HostMidiEvent>,
    ),
    pub get_state: fn(&HostedEngine) -> String,
    pub set_state: fn(&HostedEngine, &str) -> bool,
    pub dispatcher: fn(&HostedEngine, DispatcherOp) -> i64,
}

fn guarded<T: Default>(f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_default()
}

fn vt_instantiate(
    descriptor: &'static EngineDescriptor,
    buffer_size: u32,
    sample_rate: f64,
) -> Box<HostedEngine> {
    Box::new(HostedEngine::new(descriptor, buffer_size, sample_rate))
}

fn vt_cleanup(hosted: Box<HostedEngine>) {
    let _ = catch_unwind(AssertUnwindSafe(|| hosted.engine.close()));
    drop(hosted);
}

fn vt_get_parameter_count(hosted: &HostedEngine) -> u32 {
    guarded(|| hosted.parameter_count())
}

fn vt_get_parameter_info(hosted: &HostedEngine, index: u32) -> HostParameterInfo {
    guarded(|| hosted.parameter_info(index))
}

fn vt_get_parameter_value(hosted: &HostedEngine, index: u32) -> f32 {
    guarded(|| hosted.parameter_value(index))
}

fn vt_set_parameter_value(hosted: &HostedEngine, index: u32, value: f32) {
    guarded(|| hosted.set_parameter_value(index, value))
}

fn vt_get_midi_program_count(hosted: &HostedEngine) -> u32 {
    guarded(|| hosted.midi_program_count())
}

fn vt_get_midi_program_info(hosted: &HostedEngine, index: u32) -> HostMidiProgramInfo {
    guarded(|| hosted.midi_program_info(index))
}

fn vt_set_midi_program(hosted: &HostedEngine, bank: u32, program: u32) {
    guarded(|| hosted.set_midi_program(bank, program))
}

fn vt_ui_show(hosted: &HostedEngine, show: bool) {
    guarded(|| hosted.engine.ui_show(show))
}

fn vt_ui_idle(hosted: &HostedEngine) {
    guarded(|| hosted.engine.ui_idle())
}

fn vt_activate(hosted: &HostedEngine) {
    guarded(|| hosted.engine.activate())
}

fn vt_deactivate(hosted: &HostedEngine) {
    guarded(|| hosted.engine.deactivate())
}

fn vt_process(
    hosted: &HostedEngine,
    ins: &[&[f32]],
    outs: &mut [&mut [f32]],
    frames: u32,
    midi_in: &[HostMidiEvent],
    midi_out: &mut Vec<HostMidiEvent>,
) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        hosted.engine.process(ins, outs, frames, midi_in, midi_out);
    }));
    if result.is_err() {
        for out in outs.iter_mut() {
            out.fill(0.0);
        }
    }
}

fn vt_get_state(hosted: &HostedEngine) -> String {
    guarded(|| hosted.engine.get_state())
}

fn vt_set_state(hosted: &HostedEngine, text: &str) -> bool {
    catch_unwind(AssertUnwindSafe(|| hosted.engine.set_state(text).is_ok())).unwrap_or(false)
}

fn vt_dispatcher(hosted: &HostedEngine, op: DispatcherOp) -> i64 {
    catch_unwind(AssertUnwindSafe(|| hosted.dispatcher(op))).unwrap_or(0)
}

pub static ENGINE_VTABLE: EngineVtable = EngineVtable {
    instantiate: vt_instantiate,
    cleanup: vt_cleanup,
    get_parameter_count: vt_get_parameter_count,
    get_parameter_info: vt_get_parameter_info,
    get_parameter_value: vt_get_parameter_value,
    set_parameter_value: vt_set_parameter_value,
    get_midi_program_count: vt_get_midi_program_count,
    get_midi_program_info: vt_get_midi_program_info,
    set_midi_program: vt_set_midi_program,
    ui_show: vt_ui_show,
    ui_idle: vt_ui_idle,
    ui_set_parameter_value: vt_set_parameter_value,
    activate: vt_activate,
    deactivate: vt_deactivate,
    process: vt_process,
    get_state: vt_get_state,
    set_state: vt_set_state,
    dispatcher: vt_dispatcher,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_variants_with_distinct_labels() {
        let mut labels = std::collections::HashSet::new();
        for descriptor in &DESCRIPTORS {
            assert!(labels.insert(descriptor.label));
        }
        assert_eq!(DESCRIPTORS.len(), 8);
        assert!(descriptor_by_label("plugrack-rack").is_some());
        assert!(descriptor_by_label("nope").is_none());
    }

    #[test]
    fn cv_variant_carries_five_cv_ports() {
        let cv = descriptor_by_label("plugrack-patchbay-cv").unwrap();
        assert_eq!(cv.cv_ins, 5);
        assert_eq!(cv.cv_outs, 5);
        assert_eq!(cv.process_mode, ProcessMode::Patchbay);
    }

    #[test]
    fn parameter_surface_is_fixed() {
        let hosted = (ENGINE_VTABLE.instantiate)(&DESCRIPTORS[0], 128, 48000.0);
        assert_eq!(
            (ENGINE_VTABLE.get_parameter_count)(&hosted),
            PARAMETER_SURFACE_TOTAL as u32
        );
        // No plugins: reads come from the cache.
        (ENGINE_VTABLE.set_parameter_value)(&hosted, 42, 0.75);
        assert_eq!((ENGINE_VTABLE.get_parameter_value)(&hosted, 42), 0.75);
        (ENGINE_VTABLE.cleanup)(hosted);
    }

    #[test]
    fn surface_reads_through_the_first_plugin() {
        let hosted = (ENGINE_VTABLE.instantiate)(&DESCRIPTORS[0], 128, 48000.0);
        hosted
            .engine()
            .add_plugin(
                plugrack_plugin::PluginType::Internal,
                "",
                plugrack_plugin::BUILTIN_GAIN_LABEL,
            )
            .unwrap();
        // Gain parameter 0 default is 1.0.
        assert_eq!((ENGINE_VTABLE.get_parameter_value)(&hosted, 0), 1.0);
        (ENGINE_VTABLE.set_parameter_value)(&hosted, 0, 0.25);
        assert_eq!((ENGINE_VTABLE.get_parameter_value)(&hosted, 0), 0.25);
        (ENGINE_VTABLE.cleanup)(hosted);
    }

    #[test]
    fn dispatcher_covers_host_notifications() {
        let hosted = (ENGINE_VTABLE.instantiate)(&DESCRIPTORS[0], 128, 48000.0);
        (ENGINE_VTABLE.dispatcher)(&hosted, DispatcherOp::BufferSizeChanged(256));
        assert_eq!(hosted.engine().buffer_size(), 256);
        (ENGINE_VTABLE.dispatcher)(&hosted, DispatcherOp::SampleRateChanged(44100.0));
        assert_eq!(hosted.engine().sample_rate(), 44100.0);
        let handle = (ENGINE_VTABLE.dispatcher)(&hosted, DispatcherOp::GetInternalHandle);
        assert_ne!(handle, 0);
        (ENGINE_VTABLE.cleanup)(hosted);
    }
}
