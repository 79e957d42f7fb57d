//! Built-in instances.
//!
//! Two minimal internal plugins keep the host exercisable without any
//! external format wrapper: a passthrough with configurable port counts and
//! a gain utility with a mixed parameter surface. The bridge worker's
//! internal registry resolves labels through [`create_builtin`].

use crate::instance::{InstanceInfo, PluginInstance, ProcessArgs};
use crate::plugin::PluginCategory;
use plugrack_core::params::hints;
use plugrack_core::{ParameterData, ParameterKind, ParameterRanges};

pub const BUILTIN_PASSTHROUGH_LABEL: &str = "passthrough";
pub const BUILTIN_GAIN_LABEL: &str = "gain";

/// Resolve a built-in by label with its default port layout.
pub fn create_builtin(label: &str) -> Option<Box<dyn PluginInstance>> {
    match label {
        BUILTIN_PASSTHROUGH_LABEL => Some(Box::new(PassthroughInstance::stereo())),
        BUILTIN_GAIN_LABEL => Some(Box::new(GainInstance::new())),
        _ => None,
    }
}

/// Copies inputs to outputs channel by channel; surplus outputs are zeroed.
pub struct PassthroughInstance {
    info: InstanceInfo,
    audio_in: u32,
    audio_out: u32,
}

impl PassthroughInstance {
    pub fn stereo() -> Self {
        Self::with_ports(2, 2)
    }

    pub fn with_ports(audio_in: u32, audio_out: u32) -> Self {
        Self {
            info: InstanceInfo {
                name: "Passthrough".into(),
                label: BUILTIN_PASSTHROUGH_LABEL.into(),
                maker: "plugrack".into(),
                copyright: "MIT OR Apache-2.0".into(),
                unique_id: 0x70617373,
                category: PluginCategory::Utility,
            },
            audio_in,
            audio_out,
        }
    }
}

impl PluginInstance for PassthroughInstance {
    fn info(&self) -> &InstanceInfo {
        &self.info
    }

    fn audio_in_count(&self) -> u32 {
        self.audio_in
    }

    fn audio_out_count(&self) -> u32 {
        self.audio_out
    }

    fn parameter_count(&self) -> u32 {
        0
    }

    fn parameter_data(&self, _index: u32) -> ParameterData {
        ParameterData::default()
    }

    fn parameter_name(&self, _index: u32) -> String {
        String::new()
    }

    fn parameter_ranges(&self, _index: u32) -> ParameterRanges {
        ParameterRanges::default()
    }

    fn parameter_value(&self, _index: u32) -> f32 {
        0.0
    }

    fn set_parameter_value(&mut self, _index: u32, _value: f32) {}

    fn process(&mut self, args: &mut ProcessArgs) {
        let frames = args.frames;
        for (i, out) in args.audio_out.iter_mut().enumerate() {
            match args.audio_in.get(i.min(args.audio_in.len().saturating_sub(1))) {
                Some(input) if !args.audio_in.is_empty() => {
                    out[..frames].copy_from_slice(&input[..frames]);
                }
                _ => out[..frames].fill(0.0),
            }
        }
    }
}

/// Parameter indices of [`GainInstance`].
pub mod gain_params {
    pub const GAIN: u32 = 0;
    pub const MUTE: u32 = 1;
    pub const CHANNEL_MODE: u32 = 2;
    pub const LEVEL: u32 = 3;
    pub const COUNT: u32 = 4;
}

/// Stereo gain utility: a float gain, a boolean mute, an integer channel
/// mode (0 = both, 1 = left only, 2 = right only) and an output level.
pub struct GainInstance {
    info: InstanceInfo,
    gain: f32,
    mute: f32,
    channel_mode: f32,
    level: f32,
    programs: Vec<(&'static str, f32)>,
    current_program: i32,
    custom: Vec<(String, String, String)>,
}

impl GainInstance {
    pub fn new() -> Self {
        Self {
            info: InstanceInfo {
                name: "Gain".into(),
                label: BUILTIN_GAIN_LABEL.into(),
                maker: "plugrack".into(),
                copyright: "MIT OR Apache-2.0".into(),
                unique_id: 0x6761696E,
                category: PluginCategory::Utility,
            },
            gain: 1.0,
            mute: 0.0,
            channel_mode: 0.0,
            level: 0.0,
            programs: vec![("Unity", 1.0), ("Half", 0.5), ("Silent", 0.0)],
            current_program: -1,
            custom: Vec::new(),
        }
    }
}

impl Default for GainInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginInstance for GainInstance {
    fn info(&self) -> &InstanceInfo {
        &self.info
    }

    fn audio_in_count(&self) -> u32 {
        2
    }

    fn audio_out_count(&self) -> u32 {
        2
    }

    fn parameter_count(&self) -> u32 {
        gain_params::COUNT
    }

    fn parameter_data(&self, index: u32) -> ParameterData {
        let mut data = ParameterData {
            index: index as i32,
            rindex: index as i32,
            midi_channel: 0,
            midi_cc: -1,
            ..Default::default()
        };
        match index {
            gain_params::GAIN => {
                data.hints = hints::ENABLED | hints::AUTOMABLE;
            }
            gain_params::MUTE => {
                data.hints = hints::ENABLED | hints::AUTOMABLE | hints::BOOLEAN;
            }
            gain_params::CHANNEL_MODE => {
                data.hints = hints::ENABLED | hints::INTEGER;
            }
            gain_params::LEVEL => {
                data.kind = ParameterKind::Output;
                data.hints = hints::ENABLED;
            }
            _ => {}
        }
        data
    }

    fn parameter_name(&self, index: u32) -> String {
        match index {
            gain_params::GAIN => "Gain",
            gain_params::MUTE => "Mute",
            gain_params::CHANNEL_MODE => "Channel Mode",
            gain_params::LEVEL => "Level",
            _ => "",
        }
        .into()
    }

    fn parameter_ranges(&self, index: u32) -> ParameterRanges {
        match index {
            gain_params::GAIN => ParameterRanges {
                def: 1.0,
                min: 0.0,
                max: 2.0,
                ..Default::default()
            },
            gain_params::MUTE => ParameterRanges {
                def: 0.0,
                min: 0.0,
                max: 1.0,
                step: 1.0,
                step_small: 1.0,
                step_large: 1.0,
            },
            gain_params::CHANNEL_MODE => ParameterRanges {
                def: 0.0,
                min: 0.0,
                max: 2.0,
                step: 1.0,
                step_small: 1.0,
                step_large: 1.0,
            },
            gain_params::LEVEL => ParameterRanges {
                def: 0.0,
                min: 0.0,
                max: 2.0,
                ..Default::default()
            },
            _ => ParameterRanges::default(),
        }
    }

    fn parameter_value(&self, index: u32) -> f32 {
        match index {
            gain_params::GAIN => self.gain,
            gain_params::MUTE => self.mute,
            gain_params::CHANNEL_MODE => self.channel_mode,
            gain_params::LEVEL => self.level,
            _ => 0.0,
        }
    }

    fn set_parameter_value(&mut self, index: u32, value: f32) {
        match index {
            gain_params::GAIN => self.gain = value,
            gain_params::MUTE => self.mute = value,
            gain_params::CHANNEL_MODE => self.channel_mode = value,
            _ => {}
        }
    }

    fn program_count(&self) -> u32 {
        self.programs.len() as u32
    }

    fn program_name(&self, index: u32) -> String {
        self.programs
            .get(index as usize)
            .map(|(name, _)| (*name).into())
            .unwrap_or_default()
    }

    fn set_program(&mut self, index: i32) {
        if let Some(&(_, gain)) = usize::try_from(index)
            .ok()
            .and_then(|i| self.programs.get(i))
        {
            self.gain = gain;
            self.current_program = index;
        }
    }

    fn set_custom_data(&mut self, dtype: &str, key: &str, value: &str) {
        if let Some(slot) = self
            .custom
            .iter_mut()
            .find(|(t, k, _)| t == dtype && k == key)
        {
            slot.2 = value.into();
        } else {
            self.custom
                .push((dtype.into(), key.into(), value.into()));
        }
    }

    fn chunk(&mut self) -> Vec<u8> {
        format!("{};{};{}", self.gain, self.mute, self.channel_mode).into_bytes()
    }

    fn set_chunk(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let mut parts = text.split(';');
        if let Some(v) = parts.next().and_then(|s| s.parse().ok()) {
            self.gain = v;
        }
        if let Some(v) = parts.next().and_then(|s| s.parse().ok()) {
            self.mute = v;
        }
        if let Some(v) = parts.next().and_then(|s| s.parse().ok()) {
            self.channel_mode = v;
        }
    }

    fn uses_chunks(&self) -> bool {
        true
    }

    fn process(&mut self, args: &mut ProcessArgs) {
        let frames = args.frames;
        let muted = self.mute >= 0.5;
        let mode = self.channel_mode as i32;
        let mut peak = 0.0f32;
        for (ch, out) in args.audio_out.iter_mut().enumerate() {
            let silent = muted || (mode == 1 && ch == 1) || (mode == 2 && ch == 0);
            match args.audio_in.get(ch) {
                Some(input) if !silent => {
                    for k in 0..frames {
                        let s = input[k] * self.gain;
                        out[k] = s;
                        let abs = s.abs();
                        if abs > peak {
                            peak = abs;
                        }
                    }
                }
                _ => out[..frames].fill(0.0),
            }
        }
        self.level = peak;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_stereo(instance: &mut dyn PluginInstance, input: [&[f32]; 2], frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            let mut events_out = Vec::new();
            let mut args = ProcessArgs {
                audio_in: &input,
                audio_out: &mut outs,
                cv_in: &[],
                cv_out: &mut [],
                events_in: &[],
                events_out: &mut events_out,
                frames,
            };
            instance.process(&mut args);
        }
        (left, right)
    }

    #[test]
    fn passthrough_is_identity() {
        let mut p = PassthroughInstance::stereo();
        let a = [0.1f32, -0.2, 0.3, 0.4];
        let b = [1.0f32, -1.0, 0.5, -0.5];
        let (l, r) = run_stereo(&mut p, [&a, &b], 4);
        assert_eq!(l, a);
        assert_eq!(r, b);
    }

    #[test]
    fn gain_scales_and_reports_level() {
        let mut g = GainInstance::new();
        g.set_parameter_value(gain_params::GAIN, 0.5);
        let a = [1.0f32, -0.8];
        let b = [0.2f32, 0.0];
        let (l, r) = run_stereo(&mut g, [&a, &b], 2);
        assert_eq!(l, vec![0.5, -0.4]);
        assert_eq!(r, vec![0.1, 0.0]);
        assert_eq!(g.parameter_value(gain_params::LEVEL), 0.5);
    }

    #[test]
    fn mute_silences_every_sample() {
        let mut g = GainInstance::new();
        g.set_parameter_value(gain_params::MUTE, 1.0);
        let a = [1.0f32; 8];
        let (l, r) = run_stereo(&mut g, [&a, &a], 8);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn chunk_roundtrip() {
        let mut g = GainInstance::new();
        g.set_parameter_value(gain_params::GAIN, 1.25);
        g.set_parameter_value(gain_params::CHANNEL_MODE, 2.0);
        let chunk = g.chunk();
        let mut restored = GainInstance::new();
        restored.set_chunk(&chunk);
        assert_eq!(restored.parameter_value(gain_params::GAIN), 1.25);
        assert_eq!(restored.parameter_value(gain_params::CHANNEL_MODE), 2.0);
    }

    #[test]
    fn registry_resolves_labels() {
        assert!(create_builtin(BUILTIN_PASSTHROUGH_LABEL).is_some());
        assert!(create_builtin(BUILTIN_GAIN_LABEL).is_some());
        assert!(create_builtin("does-not-exist").is_none());
    }
}
