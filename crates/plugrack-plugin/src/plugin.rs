//! The plugin handle.
//!
//! One [`Plugin`] per loaded plugin, whatever its format or process. The
//! handle owns the parameter/program tables, the mix controls, and the RT
//! processing path; the backend is either an in-process
//! [`PluginInstance`](crate::instance::PluginInstance) or a
//! [`BridgeTransport`] proxy to a worker process.
//!
//! Locking: `master` guards structural tables and is only taken on the
//! main/background threads; `single` guards the RT inner state and is
//! try-locked by the audio thread, which silences the cycle on contention.

use crate::instance::{MidiProgramData, PluginInstance, ProcessArgs};
use crate::transport::{BridgeTransport, ServerMessage};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use plugrack_core::events::{
    CtrlEventKind, EngineEvent, EngineEventKind, MidiData, MAX_INTERNAL_EVENT_COUNT,
    MIDI_STATUS_NOTE_OFF, MIDI_STATUS_NOTE_ON,
};
use plugrack_core::params::{
    self as params, hints as param_hints, ParameterData, ParameterKind, ParameterRanges,
};
use plugrack_core::{
    AtomicFlag, AtomicFloat, EngineTimeInfo, PeakMeter, PostRtEvent, PostRtEventKind, PostRtQueue,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MAX_MIDI_NOTE: usize = 128;
pub const MAX_MIDI_CHANNELS: usize = 16;

/// Plugin hint bits.
pub mod hints {
    pub const IS_BRIDGE: u32 = 1 << 0;
    pub const HAS_CUSTOM_UI: u32 = 1 << 1;
    pub const NEEDS_UI_MAIN_THREAD: u32 = 1 << 2;
    pub const CAN_DRYWET: u32 = 1 << 3;
    pub const CAN_VOLUME: u32 = 1 << 4;
    pub const CAN_BALANCE: u32 = 1 << 5;
    pub const NEEDS_FIXED_BUFFERS: u32 = 1 << 6;
    pub const USES_CHUNKS: u32 = 1 << 7;
    pub const IS_SYNTH: u32 = 1 << 8;
}

/// Extra hint bits.
pub mod extra_hints {
    pub const HAS_MIDI_IN: u32 = 1 << 0;
    pub const HAS_MIDI_OUT: u32 = 1 << 1;
    pub const CAN_RUN_RACK: u32 = 1 << 2;
}

/// Per-plugin option bits.
pub mod plugin_options {
    pub const FIXED_BUFFERS: u32 = 1 << 0;
    pub const FORCE_STEREO: u32 = 1 << 1;
    pub const MAP_PROGRAM_CHANGES: u32 = 1 << 2;
    pub const USE_CHUNKS: u32 = 1 << 3;
    pub const SEND_CONTROL_CHANGES: u32 = 1 << 4;
    pub const SEND_ALL_SOUND_OFF: u32 = 1 << 5;

    pub const DEFAULTS: u32 = MAP_PROGRAM_CHANGES | SEND_CONTROL_CHANGES | SEND_ALL_SOUND_OFF;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginType {
    Internal,
    Ladspa,
    Dssi,
    Lv2,
    Vst2,
    Vst3,
    Au,
    Sf2,
    Sfz,
    Gig,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Internal => "internal",
            PluginType::Ladspa => "ladspa",
            PluginType::Dssi => "dssi",
            PluginType::Lv2 => "lv2",
            PluginType::Vst2 => "vst2",
            PluginType::Vst3 => "vst3",
            PluginType::Au => "au",
            PluginType::Sf2 => "sf2",
            PluginType::Sfz => "sfz",
            PluginType::Gig => "gig",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "internal" => PluginType::Internal,
            "ladspa" => PluginType::Ladspa,
            "dssi" => PluginType::Dssi,
            "lv2" => PluginType::Lv2,
            "vst2" => PluginType::Vst2,
            "vst3" => PluginType::Vst3,
            "au" => PluginType::Au,
            "sf2" => PluginType::Sf2,
            "sfz" => PluginType::Sfz,
            "gig" => PluginType::Gig,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PluginCategory {
    #[default]
    None,
    Synth,
    Delay,
    Eq,
    Filter,
    Dynamics,
    Modulator,
    Utility,
    Other,
}

impl PluginCategory {
    pub fn to_u32(self) -> u32 {
        match self {
            PluginCategory::None => 0,
            PluginCategory::Synth => 1,
            PluginCategory::Delay => 2,
            PluginCategory::Eq => 3,
            PluginCategory::Filter => 4,
            PluginCategory::Dynamics => 5,
            PluginCategory::Modulator => 6,
            PluginCategory::Utility => 7,
            PluginCategory::Other => 8,
        }
    }

    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => PluginCategory::Synth,
            2 => PluginCategory::Delay,
            3 => PluginCategory::Eq,
            4 => PluginCategory::Filter,
            5 => PluginCategory::Dynamics,
            6 => PluginCategory::Modulator,
            7 => PluginCategory::Utility,
            8 => PluginCategory::Other,
            _ => PluginCategory::None,
        }
    }
}

/// `CAN_RUN_RACK` characterization: at most two channels per side, and the
/// sides agree unless one of them is absent.
pub fn can_run_rack(audio_in: u32, audio_out: u32) -> bool {
    audio_in <= 2 && audio_out <= 2 && (audio_in == audio_out || audio_in == 0 || audio_out == 0)
}

#[derive(Debug, Clone, Default)]
pub struct PluginPort {
    pub rindex: u32,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct PluginPorts {
    pub audio_in: Vec<PluginPort>,
    pub audio_out: Vec<PluginPort>,
    pub cv_in: Vec<PluginPort>,
    pub cv_out: Vec<PluginPort>,
    pub event_in: Option<PluginPort>,
    pub event_out: Option<PluginPort>,
}

impl PluginPorts {
    pub fn has_event_in(&self) -> bool {
        self.event_in.is_some()
    }

    pub fn has_event_out(&self) -> bool {
        self.event_out.is_some()
    }
}

fn port_list(kind: &str, count: u32, prefix: Option<&str>, rindex_base: u32) -> Vec<PluginPort> {
    (0..count)
        .map(|i| {
            let base = if count == 1 {
                kind.to_string()
            } else {
                format!("{kind}_{}", i + 1)
            };
            let name = match prefix {
                Some(prefix) => format!("{prefix}:{base}"),
                None => base,
            };
            PluginPort {
                rindex: rindex_base + i,
                name,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub data: ParameterData,
    pub ranges: ParameterRanges,
    pub name: String,
    pub unit: String,
    pub value: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomData {
    pub dtype: String,
    pub key: String,
    pub value: String,
}

/// Custom-data type surfaced to the UI.
pub const CUSTOM_DATA_TYPE_PROPERTY: &str = "Property";

/// Structural tables. Master-locked.
#[derive(Default)]
pub struct PluginShared {
    pub name: String,
    pub maker: String,
    pub copyright: String,
    pub real_name: String,
    pub category: PluginCategory,
    pub unique_id: i64,
    pub ports: PluginPorts,
    pub params: Vec<Parameter>,
    pub programs: Vec<String>,
    pub current_program: i32,
    pub midi_programs: Vec<MidiProgramData>,
    pub current_midi_program: i32,
    pub custom_data: Vec<CustomData>,
}

enum Backend {
    Local(Box<dyn PluginInstance>),
    Bridged(Arc<BridgeTransport>),
}

/// RT inner state. Single-locked; the audio thread only try-locks.
struct RtInner {
    backend: Backend,
    staged_events: Vec<EngineEvent>,
    /// Per input channel, `latency` samples of signal history for the
    /// delayed dry path of the dry/wet mix.
    latency_buffers: Vec<Vec<f32>>,
    dry_scratch: Vec<Vec<f32>>,
    balance_scratch: Vec<f32>,
    held_notes: [u128; MAX_MIDI_CHANNELS],
    last_bank: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtNote {
    pub channel: u8,
    pub note: u8,
    /// Zero means note-off.
    pub velocity: u8,
}

/// Snapshot of everything user-settable, for the project document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    pub ptype: PluginType,
    pub filename: String,
    pub label: String,
    pub name: String,
    pub active: bool,
    pub dry_wet: f32,
    pub volume: f32,
    pub balance_left: f32,
    pub balance_right: f32,
    pub panning: f32,
    pub ctrl_channel: i8,
    pub options: u32,
    pub parameters: Vec<ParameterSnapshot>,
    pub current_program: i32,
    pub current_midi_program: i32,
    pub custom_data: Vec<CustomData>,
    #[serde(default)]
    pub chunk: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub index: i32,
    pub value: f32,
    pub midi_channel: u8,
    pub midi_cc: i16,
}

pub struct Plugin {
    id: AtomicU32,
    ptype: PluginType,
    filename: String,
    label: String,
    icon_name: String,

    hints: AtomicU32,
    extra_hints: AtomicU32,
    options: AtomicU32,

    // Port counts mirrored out of `master` so the RT graph never locks it.
    audio_in: AtomicU32,
    audio_out: AtomicU32,
    cv_in: AtomicU32,
    cv_out: AtomicU32,

    enabled: AtomicFlag,
    active: AtomicFlag,

    dry_wet: AtomicFloat,
    volume: AtomicFloat,
    balance_left: AtomicFloat,
    balance_right: AtomicFloat,
    panning: AtomicFloat,
    ctrl_channel: AtomicI32,
    latency: AtomicU32,

    master: Mutex<PluginShared>,
    single: Mutex<RtInner>,
    /// Set for bridged plugins; non-RT operations go through it directly.
    transport: Option<Arc<BridgeTransport>>,

    ext_notes: ArrayQueue<ExtNote>,
    post_rt: Arc<PostRtQueue>,
    pub peaks: PeakMeter,
}

impl Plugin {
    pub fn new_local(
        id: u32,
        ptype: PluginType,
        filename: &str,
        instance: Box<dyn PluginInstance>,
        post_rt: Arc<PostRtQueue>,
        buffer_size: u32,
        max_parameters: u32,
        client_prefix: bool,
    ) -> Self {
        let label = instance.info().label.clone();
        let plugin = Self {
            id: AtomicU32::new(id),
            ptype,
            filename: filename.to_string(),
            label,
            icon_name: "plugin".into(),
            hints: AtomicU32::new(0),
            extra_hints: AtomicU32::new(0),
            options: AtomicU32::new(plugin_options::DEFAULTS),
            audio_in: AtomicU32::new(0),
            audio_out: AtomicU32::new(0),
            cv_in: AtomicU32::new(0),
            cv_out: AtomicU32::new(0),
            enabled: AtomicFlag::new(false),
            active: AtomicFlag::new(false),
            dry_wet: AtomicFloat::new(1.0),
            volume: AtomicFloat::new(1.0),
            balance_left: AtomicFloat::new(-1.0),
            balance_right: AtomicFloat::new(1.0),
            panning: AtomicFloat::new(0.0),
            ctrl_channel: AtomicI32::new(0),
            latency: AtomicU32::new(0),
            master: Mutex::new(PluginShared::default()),
            single: Mutex::new(RtInner {
                backend: Backend::Local(instance),
                staged_events: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
                latency_buffers: Vec::new(),
                dry_scratch: Vec::new(),
                balance_scratch: vec![0.0; buffer_size as usize],
                held_notes: [0; MAX_MIDI_CHANNELS],
                last_bank: 0,
            }),
            transport: None,
            ext_notes: ArrayQueue::new(128),
            post_rt,
            peaks: PeakMeter::default(),
        };
        plugin.reload(max_parameters, client_prefix, buffer_size);
        plugin
    }

    pub fn new_bridged(
        id: u32,
        ptype: PluginType,
        filename: &str,
        label: &str,
        transport: Arc<BridgeTransport>,
        post_rt: Arc<PostRtQueue>,
        buffer_size: u32,
    ) -> Self {
        Self {
            id: AtomicU32::new(id),
            ptype,
            filename: filename.to_string(),
            label: label.to_string(),
            icon_name: "plugin".into(),
            hints: AtomicU32::new(hints::IS_BRIDGE),
            extra_hints: AtomicU32::new(0),
            options: AtomicU32::new(plugin_options::DEFAULTS),
            audio_in: AtomicU32::new(0),
            audio_out: AtomicU32::new(0),
            cv_in: AtomicU32::new(0),
            cv_out: AtomicU32::new(0),
            enabled: AtomicFlag::new(false),
            active: AtomicFlag::new(false),
            dry_wet: AtomicFloat::new(1.0),
            volume: AtomicFloat::new(1.0),
            balance_left: AtomicFloat::new(-1.0),
            balance_right: AtomicFloat::new(1.0),
            panning: AtomicFloat::new(0.0),
            ctrl_channel: AtomicI32::new(0),
            latency: AtomicU32::new(0),
            master: Mutex::new(PluginShared::default()),
            single: Mutex::new(RtInner {
                backend: Backend::Bridged(Arc::clone(&transport)),
                staged_events: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
                latency_buffers: Vec::new(),
                dry_scratch: Vec::new(),
                balance_scratch: vec![0.0; buffer_size as usize],
                held_notes: [0; MAX_MIDI_CHANNELS],
                last_bank: 0,
            }),
            transport: Some(transport),
            ext_notes: ArrayQueue::new(128),
            post_rt,
            peaks: PeakMeter::default(),
        }
    }

    // -- identity ------------------------------------------------------

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::Relaxed);
    }

    pub fn ptype(&self) -> PluginType {
        self.ptype
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn icon_name(&self) -> &str {
        &self.icon_name
    }

    pub fn name(&self) -> String {
        self.master.lock().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        self.master.lock().name = name.to_string();
    }

    pub fn hints(&self) -> u32 {
        self.hints.load(Ordering::Relaxed)
    }

    pub fn extra_hints(&self) -> u32 {
        self.extra_hints.load(Ordering::Relaxed)
    }

    pub fn options(&self) -> u32 {
        self.options.load(Ordering::Relaxed)
    }

    pub fn set_option(&self, option: u32, yes: bool) {
        let mut bits = self.options.load(Ordering::Relaxed);
        if yes {
            bits |= option;
        } else {
            bits &= !option;
        }
        self.options.store(bits, Ordering::Relaxed);
        if let Some(transport) = &self.transport {
            let _ = transport.send_set_option(option, yes);
        }
    }

    pub fn is_bridged(&self) -> bool {
        self.transport.is_some()
    }

    pub fn transport(&self) -> Option<&Arc<BridgeTransport>> {
        self.transport.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn master(&self) -> &Mutex<PluginShared> {
        &self.master
    }

    // -- mix controls ----------------------------------------------------

    pub fn dry_wet(&self) -> f32 {
        self.dry_wet.get()
    }

    pub fn set_dry_wet(&self, value: f32) -> f32 {
        let fixed = value.clamp(0.0, 1.0);
        self.dry_wet.set(fixed);
        fixed
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn set_volume(&self, value: f32) -> f32 {
        let fixed = value.clamp(0.0, 1.27);
        self.volume.set(fixed);
        fixed
    }

    pub fn balance_left(&self) -> f32 {
        self.balance_left.get()
    }

    pub fn set_balance_left(&self, value: f32) -> f32 {
        let fixed = value.clamp(-1.0, 1.0);
        self.balance_left.set(fixed);
        fixed
    }

    pub fn balance_right(&self) -> f32 {
        self.balance_right.get()
    }

    pub fn set_balance_right(&self, value: f32) -> f32 {
        let fixed = value.clamp(-1.0, 1.0);
        self.balance_right.set(fixed);
        fixed
    }

    pub fn panning(&self) -> f32 {
        self.panning.get()
    }

    pub fn set_panning(&self, value: f32) -> f32 {
        let fixed = value.clamp(-1.0, 1.0);
        self.panning.set(fixed);
        fixed
    }

    pub fn ctrl_channel(&self) -> i8 {
        self.ctrl_channel.load(Ordering::Relaxed) as i8
    }

    pub fn set_ctrl_channel(&self, channel: i8) {
        let fixed = channel.clamp(-1, 15);
        self.ctrl_channel.store(i32::from(fixed), Ordering::Relaxed);
        if let Some(transport) = &self.transport {
            let _ = transport.send_set_ctrl_channel(i16::from(fixed));
        }
    }

    pub fn latency(&self) -> u32 {
        self.latency.load(Ordering::Relaxed)
    }

    pub fn audio_in_count(&self) -> u32 {
        self.audio_in.load(Ordering::Relaxed)
    }

    pub fn audio_out_count(&self) -> u32 {
        self.audio_out.load(Ordering::Relaxed)
    }

    pub fn cv_in_count(&self) -> u32 {
        self.cv_in.load(Ordering::Relaxed)
    }

    pub fn cv_out_count(&self) -> u32 {
        self.cv_out.load(Ordering::Relaxed)
    }

    pub fn has_cv_ports(&self) -> bool {
        self.cv_in_count() > 0 || self.cv_out_count() > 0
    }

    // -- reload ----------------------------------------------------------

    /// Recompute port layout, parameters, programs and hints from the
    /// backing instance. In-process variant; bridged plugins are populated
    /// by [`apply_server_message`](Self::apply_server_message).
    pub fn reload(&self, max_parameters: u32, client_prefix: bool, buffer_size: u32) {
        let mut shared = self.master.lock();
        let mut rt = self.single.lock();
        let Backend::Local(instance) = &mut rt.backend else {
            return;
        };

        let info = instance.info().clone();
        shared.name = info.name.clone();
        shared.real_name = info.name;
        shared.maker = info.maker;
        shared.copyright = info.copyright;
        shared.unique_id = info.unique_id;
        shared.category = info.category;

        let audio_in = instance.audio_in_count();
        let audio_out = instance.audio_out_count();
        let cv_in = instance.cv_in_count();
        let cv_out = instance.cv_out_count();
        self.audio_in.store(audio_in, Ordering::Relaxed);
        self.audio_out.store(audio_out, Ordering::Relaxed);
        self.cv_in.store(cv_in, Ordering::Relaxed);
        self.cv_out.store(cv_out, Ordering::Relaxed);
        let prefix = client_prefix.then_some(shared.name.clone());
        let prefix = prefix.as_deref();
        let has_event_in = instance.wants_midi_in() || instance.is_synth();
        let has_event_out = instance.produces_midi_out();
        shared.ports = PluginPorts {
            audio_in: port_list("input", audio_in, prefix, 0),
            audio_out: port_list("output", audio_out, prefix, audio_in),
            cv_in: port_list("cv_input", cv_in, prefix, audio_in + audio_out),
            cv_out: port_list("cv_output", cv_out, prefix, audio_in + audio_out + cv_in),
            event_in: has_event_in.then(|| PluginPort {
                rindex: audio_in + audio_out + cv_in + cv_out,
                name: match prefix {
                    Some(p) => format!("{p}:events-in"),
                    None => "events-in".into(),
                },
            }),
            event_out: has_event_out.then(|| PluginPort {
                rindex: audio_in + audio_out + cv_in + cv_out + u32::from(has_event_in),
                name: match prefix {
                    Some(p) => format!("{p}:events-out"),
                    None => "events-out".into(),
                },
            }),
        };

        let count = instance.parameter_count().min(max_parameters);
        shared.params = (0..count)
            .map(|i| Parameter {
                data: instance.parameter_data(i),
                ranges: instance.parameter_ranges(i),
                name: instance.parameter_name(i),
                unit: instance.parameter_unit(i),
                value: instance.parameter_value(i),
            })
            .collect();

        shared.programs = (0..instance.program_count())
            .map(|i| instance.program_name(i))
            .collect();
        shared.current_program = -1;
        shared.midi_programs = (0..instance.midi_program_count())
            .map(|i| instance.midi_program_data(i))
            .collect();
        shared.current_midi_program = -1;

        let mut hint_bits = 0;
        if audio_in > 0 && audio_out > 0 {
            hint_bits |= hints::CAN_DRYWET;
        }
        if audio_out > 0 {
            hint_bits |= hints::CAN_VOLUME;
        }
        if audio_out >= 2 {
            hint_bits |= hints::CAN_BALANCE;
        }
        if instance.uses_chunks() {
            hint_bits |= hints::USES_CHUNKS;
        }
        if instance.is_synth() {
            hint_bits |= hints::IS_SYNTH;
        }
        if instance.has_custom_ui() {
            hint_bits |= hints::HAS_CUSTOM_UI;
        }
        if instance.needs_ui_main_thread() {
            hint_bits |= hints::NEEDS_UI_MAIN_THREAD;
        }
        self.hints.store(hint_bits, Ordering::Relaxed);

        let mut extra = 0;
        if shared.ports.has_event_in() {
            extra |= extra_hints::HAS_MIDI_IN;
        }
        if shared.ports.has_event_out() {
            extra |= extra_hints::HAS_MIDI_OUT;
        }
        if can_run_rack(audio_in, audio_out) {
            extra |= extra_hints::CAN_RUN_RACK;
        }
        self.extra_hints.store(extra, Ordering::Relaxed);

        let latency = instance.latency();
        self.latency.store(latency, Ordering::Relaxed);
        rt.latency_buffers = (0..audio_in)
            .map(|_| vec![0.0; latency as usize])
            .collect();
        rt.dry_scratch = (0..audio_out.max(audio_in))
            .map(|_| vec![0.0; buffer_size as usize])
            .collect();
        rt.balance_scratch = vec![0.0; buffer_size as usize];
    }

    /// Resize per-cycle scratch storage. Deactivated plugins only.
    pub fn buffer_size_changed(&self, buffer_size: u32) {
        let mut rt = self.single.lock();
        for buf in &mut rt.dry_scratch {
            buf.resize(buffer_size as usize, 0.0);
        }
        rt.balance_scratch.resize(buffer_size as usize, 0.0);
        if let Backend::Bridged(transport) = &rt.backend {
            let _ = transport.resize_audio_pool(buffer_size);
        }
    }

    pub fn sample_rate_changed(&self, sample_rate: f64) {
        let rt = self.single.lock();
        if let Backend::Bridged(transport) = &rt.backend {
            let _ = transport.send_set_sample_rate(sample_rate);
        }
    }

    /// Fold one worker notification into the local tables.
    pub fn apply_server_message(&self, msg: &ServerMessage, buffer_size: u32) {
        let mut shared = self.master.lock();
        match msg {
            ServerMessage::PluginInfo1 {
                category,
                hints: hint_bits,
                unique_id,
            } => {
                shared.category = PluginCategory::from_u32(*category);
                shared.unique_id = *unique_id;
                self.hints
                    .store(hint_bits | hints::IS_BRIDGE, Ordering::Relaxed);
            }
            ServerMessage::PluginInfo2 {
                real_name,
                label: _,
                maker,
                copyright,
            } => {
                if shared.name.is_empty() {
                    shared.name = real_name.clone();
                }
                shared.real_name = real_name.clone();
                shared.maker = maker.clone();
                shared.copyright = copyright.clone();
            }
            ServerMessage::AudioCount {
                audio_ins,
                audio_outs,
                cv_ins,
                cv_outs,
            } => {
                self.audio_in.store(*audio_ins, Ordering::Relaxed);
                self.audio_out.store(*audio_outs, Ordering::Relaxed);
                self.cv_in.store(*cv_ins, Ordering::Relaxed);
                self.cv_out.store(*cv_outs, Ordering::Relaxed);
                shared.ports.audio_in = port_list("input", *audio_ins, None, 0);
                shared.ports.audio_out = port_list("output", *audio_outs, None, *audio_ins);
                shared.ports.cv_in = port_list("cv_input", *cv_ins, None, audio_ins + audio_outs);
                shared.ports.cv_out =
                    port_list("cv_output", *cv_outs, None, audio_ins + audio_outs + cv_ins);
                let mut extra = self.extra_hints.load(Ordering::Relaxed);
                if can_run_rack(*audio_ins, *audio_outs) {
                    extra |= extra_hints::CAN_RUN_RACK;
                } else {
                    extra &= !extra_hints::CAN_RUN_RACK;
                }
                self.extra_hints.store(extra, Ordering::Relaxed);
            }
            ServerMessage::MidiCount { ins, outs } => {
                shared.ports.event_in = (*ins > 0).then(|| PluginPort {
                    rindex: 0,
                    name: "events-in".into(),
                });
                shared.ports.event_out = (*outs > 0).then(|| PluginPort {
                    rindex: 0,
                    name: "events-out".into(),
                });
                let mut extra = self.extra_hints.load(Ordering::Relaxed);
                extra &= !(extra_hints::HAS_MIDI_IN | extra_hints::HAS_MIDI_OUT);
                if *ins > 0 {
                    extra |= extra_hints::HAS_MIDI_IN;
                }
                if *outs > 0 {
                    extra |= extra_hints::HAS_MIDI_OUT;
                }
                self.extra_hints.store(extra, Ordering::Relaxed);
            }
            ServerMessage::ParameterCount { count } => {
                shared.params = (0..*count)
                    .map(|i| Parameter {
                        data: ParameterData {
                            index: i as i32,
                            rindex: i as i32,
                            midi_cc: -1,
                            ..Default::default()
                        },
                        ranges: ParameterRanges::default(),
                        name: String::new(),
                        unit: String::new(),
                        value: 0.0,
                    })
                    .collect();
            }
            ServerMessage::ProgramCount { count } => {
                shared.programs = vec![String::new(); *count as usize];
                shared.current_program = -1;
            }
            ServerMessage::MidiProgramCount { count } => {
                shared.midi_programs = vec![MidiProgramData::default(); *count as usize];
                shared.current_midi_program = -1;
            }
            ServerMessage::ParameterData1 {
                index,
                rindex,
                kind,
                hints: hint_bits,
                midi_channel,
                midi_cc,
            } => {
                if let Some(param) = shared.params.get_mut(*index as usize) {
                    param.data.kind = match kind {
                        1 => ParameterKind::Output,
                        2 => ParameterKind::Special,
                        _ => ParameterKind::Input,
                    };
                    param.data.index = *index as i32;
                    param.data.rindex = *rindex;
                    param.data.hints = *hint_bits;
                    param.data.midi_channel = *midi_channel;
                    param.data.midi_cc = *midi_cc;
                }
            }
            ServerMessage::ParameterData2 { index, name, unit } => {
                if let Some(param) = shared.params.get_mut(*index as usize) {
                    param.name = name.clone();
                    param.unit = unit.clone();
                }
            }
            ServerMessage::ParameterRanges1 {
                index,
                def,
                min,
                max,
            } => {
                if let Some(param) = shared.params.get_mut(*index as usize) {
                    param.ranges.def = *def;
                    param.ranges.min = *min;
                    param.ranges.max = *max;
                }
            }
            ServerMessage::ParameterRanges2 {
                index,
                step,
                step_small,
                step_large,
            } => {
                if let Some(param) = shared.params.get_mut(*index as usize) {
                    param.ranges.step = *step;
                    param.ranges.step_small = *step_small;
                    param.ranges.step_large = *step_large;
                }
            }
            ServerMessage::ParameterValue { index, value }
            | ServerMessage::DefaultValue { index, value } => {
                if let Some(param) = shared.params.get_mut(*index as usize) {
                    if matches!(msg, ServerMessage::DefaultValue { .. }) {
                        param.ranges.def = *value;
                    } else {
                        param.value = *value;
                    }
                }
            }
            ServerMessage::CurrentProgram { index } => shared.current_program = *index,
            ServerMessage::CurrentMidiProgram { index } => shared.current_midi_program = *index,
            ServerMessage::ProgramName { index, name } => {
                if let Some(slot) = shared.programs.get_mut(*index as usize) {
                    *slot = name.clone();
                }
            }
            ServerMessage::MidiProgramData {
                index,
                bank,
                program,
                name,
            } => {
                if let Some(slot) = shared.midi_programs.get_mut(*index as usize) {
                    *slot = MidiProgramData {
                        bank: *bank,
                        program: *program,
                        name: name.clone(),
                    };
                }
            }
            ServerMessage::SetCustomData { dtype, key, value } => {
                drop(shared);
                self.put_custom_data(dtype, key, value, false);
            }
            ServerMessage::SetLatency { frames } => {
                self.latency.store(*frames, Ordering::Relaxed);
                self.post_rt.push_rt(PostRtEvent {
                    kind: PostRtEventKind::LatencyChanged,
                    plugin_id: self.id(),
                    value1: *frames as i32,
                    value2: 0,
                    value3: 0,
                    valuef: 0.0,
                    send_callback: true,
                });
            }
            _ => {}
        }
        let _ = buffer_size;
    }

    // -- parameters ------------------------------------------------------

    pub fn parameter_count(&self) -> u32 {
        self.master.lock().params.len() as u32
    }

    /// Set a parameter through its coercion rules; returns the value that
    /// was actually applied. Internal pseudo-parameters are addressed with
    /// their negative indices.
    pub fn set_parameter_value(&self, index: i32, value: f32) -> Option<f32> {
        if index < 0 {
            return self.set_internal_parameter(index, value);
        }
        let fixed = {
            let mut shared = self.master.lock();
            let param = shared.params.get_mut(index as usize)?;
            let fixed = param.ranges.fixed_value(param.data.hints, value);
            param.value = fixed;
            fixed
        };
        match &self.transport {
            Some(transport) => {
                let _ = transport.send_set_parameter_value(index, fixed);
            }
            None => {
                let mut rt = self.single.lock();
                if let Backend::Local(instance) = &mut rt.backend {
                    instance.set_parameter_value(index as u32, fixed);
                }
            }
        }
        Some(fixed)
    }

    fn set_internal_parameter(&self, index: i32, value: f32) -> Option<f32> {
        match index {
            params::PARAMETER_ACTIVE => {
                self.set_active_flag(value >= 0.5);
                Some(f32::from(u8::from(value >= 0.5)))
            }
            params::PARAMETER_DRYWET => Some(self.set_dry_wet(value)),
            params::PARAMETER_VOLUME => Some(self.set_volume(value)),
            params::PARAMETER_BALANCE_LEFT => Some(self.set_balance_left(value)),
            params::PARAMETER_BALANCE_RIGHT => Some(self.set_balance_right(value)),
            params::PARAMETER_PANNING => Some(self.set_panning(value)),
            params::PARAMETER_CTRL_CHANNEL => {
                self.set_ctrl_channel(value as i8);
                Some(f32::from(self.ctrl_channel()))
            }
            _ => None,
        }
    }

    pub fn parameter_value(&self, index: i32) -> Option<f32> {
        if index < 0 {
            return match index {
                params::PARAMETER_ACTIVE => Some(f32::from(u8::from(self.is_active()))),
                params::PARAMETER_DRYWET => Some(self.dry_wet()),
                params::PARAMETER_VOLUME => Some(self.volume()),
                params::PARAMETER_BALANCE_LEFT => Some(self.balance_left()),
                params::PARAMETER_BALANCE_RIGHT => Some(self.balance_right()),
                params::PARAMETER_PANNING => Some(self.panning()),
                params::PARAMETER_CTRL_CHANNEL => Some(f32::from(self.ctrl_channel())),
                _ => None,
            };
        }
        self.master
            .lock()
            .params
            .get(index as usize)
            .map(|p| p.value)
    }

    pub fn set_parameter_midi_channel(&self, index: u32, channel: u8) {
        if let Some(param) = self.master.lock().params.get_mut(index as usize) {
            param.data.midi_channel = channel.min(15);
        }
        if let Some(transport) = &self.transport {
            let _ = transport.send_set_parameter_midi_channel(index, channel);
        }
    }

    pub fn set_parameter_midi_cc(&self, index: u32, cc: i16) {
        if let Some(param) = self.master.lock().params.get_mut(index as usize) {
            param.data.midi_cc = cc.clamp(-1, 119);
        }
        if let Some(transport) = &self.transport {
            let _ = transport.send_set_parameter_midi_cc(index, cc);
        }
    }

    /// Refresh the cached values of output parameters from a local
    /// instance. Idle path; skipped when the RT lock is contended.
    pub fn refresh_output_parameters(&self) {
        let Some(mut rt) = self.single.try_lock() else {
            return;
        };
        let Backend::Local(instance) = &mut rt.backend else {
            return;
        };
        let mut shared = self.master.lock();
        for param in &mut shared.params {
            if param.data.kind == ParameterKind::Output {
                param.value = instance.parameter_value(param.data.index as u32);
            }
        }
    }

    // -- programs --------------------------------------------------------

    pub fn set_program(&self, index: i32) {
        {
            let mut shared = self.master.lock();
            if index >= shared.programs.len() as i32 {
                return;
            }
            shared.current_program = index.max(-1);
        }
        match &self.transport {
            Some(transport) => {
                let _ = transport.send_set_program(index);
            }
            None => {
                let mut rt = self.single.lock();
                if let Backend::Local(instance) = &mut rt.backend {
                    instance.set_program(index);
                }
                drop(rt);
                // Program loads move parameter values; refresh the cache.
                self.refresh_parameter_values();
            }
        }
    }

    pub fn set_midi_program(&self, index: i32) {
        let bank_program = {
            let mut shared = self.master.lock();
            if index >= shared.midi_programs.len() as i32 {
                return;
            }
            shared.current_midi_program = index.max(-1);
            usize::try_from(index)
                .ok()
                .and_then(|i| shared.midi_programs.get(i))
                .map(|mp| (mp.bank, mp.program))
        };
        match &self.transport {
            Some(transport) => {
                let _ = transport.send_set_midi_program(index);
            }
            None => {
                if let Some((bank, program)) = bank_program {
                    let mut rt = self.single.lock();
                    if let Backend::Local(instance) = &mut rt.backend {
                        instance.set_midi_program(bank, program);
                    }
                }
            }
        }
    }

    fn refresh_parameter_values(&self) {
        let mut rt = self.single.lock();
        let Backend::Local(instance) = &mut rt.backend else {
            return;
        };
        let mut shared = self.master.lock();
        for param in &mut shared.params {
            param.value = instance.parameter_value(param.data.index as u32);
        }
    }

    // -- custom data -----------------------------------------------------

    /// Insert or replace one custom-data entry. `forward` also pushes it to
    /// the backend.
    pub fn put_custom_data(&self, dtype: &str, key: &str, value: &str, forward: bool) {
        {
            let mut shared = self.master.lock();
            if let Some(slot) = shared
                .custom_data
                .iter_mut()
                .find(|cd| cd.dtype == dtype && cd.key == key)
            {
                slot.value = value.to_string();
            } else {
                shared.custom_data.push(CustomData {
                    dtype: dtype.to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if forward {
            match &self.transport {
                Some(transport) => {
                    let _ = transport.send_set_custom_data(dtype, key, value);
                }
                None => {
                    let mut rt = self.single.lock();
                    if let Backend::Local(instance) = &mut rt.backend {
                        instance.set_custom_data(dtype, key, value);
                    }
                }
            }
        }
    }

    pub fn set_chunk(&self, data: &[u8]) {
        match &self.transport {
            Some(transport) => {
                // Bridged chunk exchange goes through a temp file.
                let path = std::env::temp_dir().join(format!("plugrack-chunk-{}", self.id()));
                if std::fs::write(&path, data).is_ok() {
                    let _ = transport.send_set_chunk_data_file(&path.display().to_string());
                }
            }
            None => {
                let mut rt = self.single.lock();
                if let Backend::Local(instance) = &mut rt.backend {
                    instance.set_chunk(data);
                }
                drop(rt);
                self.refresh_parameter_values();
            }
        }
    }

    pub fn chunk(&self) -> Option<Vec<u8>> {
        if self.hints() & hints::USES_CHUNKS == 0 {
            return None;
        }
        let mut rt = self.single.lock();
        match &mut rt.backend {
            Backend::Local(instance) => Some(instance.chunk()),
            // The bridged chunk is fetched during prepare_for_save.
            Backend::Bridged(_) => None,
        }
    }

    // -- lifecycle -------------------------------------------------------

    pub fn set_active(&self, active: bool) {
        self.set_active_flag(active);
    }

    fn set_active_flag(&self, active: bool) {
        if self.active.get() == active {
            return;
        }
        match &self.transport {
            Some(transport) => {
                use crate::protocol::NonRtClientOpcode;
                let _ = transport.send_simple(if active {
                    NonRtClientOpcode::Activate
                } else {
                    NonRtClientOpcode::Deactivate
                });
            }
            None => {
                let mut rt = self.single.lock();
                if let Backend::Local(instance) = &mut rt.backend {
                    if active {
                        instance.activate();
                    } else {
                        instance.deactivate();
                    }
                }
            }
        }
        self.active.set(active);
    }

    pub fn show_ui(&self, show: bool) {
        match &self.transport {
            Some(transport) => {
                use crate::protocol::NonRtClientOpcode;
                let _ = transport.send_simple(if show {
                    NonRtClientOpcode::ShowUI
                } else {
                    NonRtClientOpcode::HideUI
                });
            }
            None => {
                let mut rt = self.single.lock();
                if let Backend::Local(instance) = &mut rt.backend {
                    instance.show_ui(show);
                }
            }
        }
    }

    pub fn ui_idle(&self) {
        if self.transport.is_some() {
            return;
        }
        let Some(mut rt) = self.single.try_lock() else {
            return;
        };
        if let Backend::Local(instance) = &mut rt.backend {
            instance.ui_idle();
        }
    }

    /// Inject a note from the UI; delivered on the next cycle (in-process)
    /// or through the worker's non-RT ring (bridged).
    pub fn send_midi_note(&self, channel: u8, note: u8, velocity: u8) {
        match &self.transport {
            Some(transport) => {
                if velocity > 0 {
                    let _ = transport.send_ui_note_on(channel, note, velocity);
                } else {
                    let _ = transport.send_ui_note_off(channel, note);
                }
            }
            None => {
                let _ = self.ext_notes.push(ExtNote {
                    channel,
                    note,
                    velocity,
                });
            }
        }
    }

    /// Bridged save handshake: request, then poll `Saved` while keeping the
    /// caller's idle loop running. Soft timeout.
    pub fn prepare_for_save(&self, mut idle: impl FnMut()) -> bool {
        let Some(transport) = &self.transport else {
            return true;
        };
        use crate::protocol::NonRtClientOpcode;
        if transport.send_simple(NonRtClientOpcode::PrepareForSave).is_err() {
            return false;
        }
        for _ in 0..200 {
            idle();
            if transport.take_saved() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(30));
        }
        tracing::warn!(plugin = self.id(), "prepare-for-save timed out, using last known state");
        false
    }

    pub fn save_settings(&self) -> PluginSettings {
        let shared = self.master.lock();
        PluginSettings {
            ptype: self.ptype,
            filename: self.filename.clone(),
            label: self.label.clone(),
            name: shared.name.clone(),
            active: self.is_active(),
            dry_wet: self.dry_wet(),
            volume: self.volume(),
            balance_left: self.balance_left(),
            balance_right: self.balance_right(),
            panning: self.panning(),
            ctrl_channel: self.ctrl_channel(),
            options: self.options(),
            parameters: shared
                .params
                .iter()
                .filter(|p| p.data.kind == ParameterKind::Input)
                .map(|p| ParameterSnapshot {
                    index: p.data.index,
                    value: p.value,
                    midi_channel: p.data.midi_channel,
                    midi_cc: p.data.midi_cc,
                })
                .collect(),
            current_program: shared.current_program,
            current_midi_program: shared.current_midi_program,
            custom_data: shared.custom_data.clone(),
            chunk: {
                drop(shared);
                self.chunk()
            },
        }
    }

    pub fn load_settings(&self, settings: &PluginSettings) {
        self.set_name(&settings.name);
        self.set_dry_wet(settings.dry_wet);
        self.set_volume(settings.volume);
        self.set_balance_left(settings.balance_left);
        self.set_balance_right(settings.balance_right);
        self.set_panning(settings.panning);
        self.set_ctrl_channel(settings.ctrl_channel);
        self.options.store(settings.options, Ordering::Relaxed);
        if settings.current_program >= 0 {
            self.set_program(settings.current_program);
        }
        if settings.current_midi_program >= 0 {
            self.set_midi_program(settings.current_midi_program);
        }
        for param in &settings.parameters {
            self.set_parameter_value(param.index, param.value);
            if param.index >= 0 {
                self.set_parameter_midi_channel(param.index as u32, param.midi_channel);
                self.set_parameter_midi_cc(param.index as u32, param.midi_cc);
            }
        }
        for cd in &settings.custom_data {
            self.put_custom_data(&cd.dtype, &cd.key, &cd.value, true);
        }
        if let Some(chunk) = &settings.chunk {
            self.set_chunk(chunk);
        }
        self.set_active(settings.active);
    }

    // -- RT processing ---------------------------------------------------

    fn zero_outputs(audio_out: &mut [&mut [f32]], cv_out: &mut [&mut [f32]], frames: usize) {
        for out in audio_out.iter_mut() {
            let n = frames.min(out.len());
            out[..n].fill(0.0);
        }
        for out in cv_out.iter_mut() {
            let n = frames.min(out.len());
            out[..n].fill(0.0);
        }
    }

    /// Process one cycle. Every exit path leaves the outputs either fully
    /// computed or fully zeroed.
    #[allow(clippy::too_many_arguments)]
    pub fn process<'b>(
        &self,
        audio_in: &[&[f32]],
        audio_out: &mut [&'b mut [f32]],
        cv_in: &[&[f32]],
        cv_out: &mut [&'b mut [f32]],
        events_in: &[EngineEvent],
        events_out: &mut Vec<EngineEvent>,
        frames: u32,
        time_info: &EngineTimeInfo,
        offline: bool,
    ) {
        let frames = frames as usize;
        if !self.enabled.get() || !self.active.get() {
            Self::zero_outputs(audio_out, cv_out, frames);
            return;
        }
        let Some(mut rt) = self.single.try_lock() else {
            Self::zero_outputs(audio_out, cv_out, frames);
            return;
        };

        if let Backend::Bridged(transport) = &rt.backend {
            if transport.is_timed_out() {
                // Attempt to consume a late post so a recovered worker
                // clears the sticky flag for the next cycle.
                let _ = transport.wait_for_client(Some(Duration::from_millis(1)));
                Self::zero_outputs(audio_out, cv_out, frames);
                return;
            }
        }

        self.peaks.update_inputs(audio_in);

        let inner = &mut *rt;
        self.stage_events(inner, events_in);

        let computed = match &mut inner.backend {
            Backend::Local(instance) => {
                let mut args = ProcessArgs {
                    audio_in,
                    audio_out: &mut *audio_out,
                    cv_in,
                    cv_out: &mut *cv_out,
                    events_in: &inner.staged_events,
                    events_out: &mut *events_out,
                    frames,
                };
                instance.process(&mut args);
                events_out.truncate(MAX_INTERNAL_EVENT_COUNT);
                true
            }
            Backend::Bridged(transport) => {
                let Some(pool) = transport.pool().try_lock() else {
                    Self::zero_outputs(audio_out, cv_out, frames);
                    return;
                };
                for (slot, data) in audio_in.iter().enumerate() {
                    pool.write_input(slot as u32, data);
                }
                for (slot, data) in cv_in.iter().enumerate() {
                    pool.write_input((audio_in.len() + slot) as u32, data);
                }
                if transport.process_cycle(time_info, frames as u32, offline) {
                    for (slot, out) in audio_out.iter_mut().enumerate() {
                        pool.read_output_into(slot as u32, out);
                    }
                    let audio_outs = audio_out.len();
                    for (slot, out) in cv_out.iter_mut().enumerate() {
                        pool.read_output_into((audio_outs + slot) as u32, out);
                    }
                    transport.read_rt_midi_out(|time, port, bytes| {
                        if let Some(ev) = EngineEvent::from_raw_midi(time, port, bytes) {
                            if events_out.len() < MAX_INTERNAL_EVENT_COUNT {
                                events_out.push(ev);
                            }
                        }
                    });
                    true
                } else {
                    false
                }
            }
        };

        if !computed {
            Self::zero_outputs(audio_out, cv_out, frames);
            return;
        }

        self.post_process(inner, audio_in, audio_out, frames);

        let right = audio_out.get(1).map(|c| &c[..frames]);
        if let Some(first) = audio_out.first() {
            self.peaks.update_outputs(&first[..frames], right);
        }
    }

    /// Event input phase: drain the external note mailbox, then walk the
    /// per-cycle queue applying built-in mappings and staging the rest for
    /// the backend.
    fn stage_events(&self, inner: &mut RtInner, events_in: &[EngineEvent]) {
        inner.staged_events.clear();
        let ctrl_channel = self.ctrl_channel.load(Ordering::Relaxed);
        let options = self.options();
        let hint_bits = self.hints();
        let mut all_notes_off_done = false;

        while let Some(note) = self.ext_notes.pop() {
            if inner.staged_events.len() >= MAX_INTERNAL_EVENT_COUNT {
                break;
            }
            let status = if note.velocity > 0 {
                MIDI_STATUS_NOTE_ON
            } else {
                MIDI_STATUS_NOTE_OFF
            } | (note.channel & 0x0F);
            inner.staged_events.push(EngineEvent {
                time: 0,
                channel: note.channel & 0x0F,
                kind: EngineEventKind::Midi(MidiData {
                    port: 0,
                    size: 3,
                    data: [status, note.note, note.velocity, 0],
                }),
            });
            self.track_note(inner, note.channel, note.note, note.velocity > 0);
            self.post_rt.push_rt(PostRtEvent {
                kind: if note.velocity > 0 {
                    PostRtEventKind::NoteOn
                } else {
                    PostRtEventKind::NoteOff
                },
                plugin_id: self.id(),
                value1: i32::from(note.channel),
                value2: i32::from(note.note),
                value3: i32::from(note.velocity),
                valuef: 0.0,
                send_callback: true,
            });
            if let Backend::Bridged(transport) = &inner.backend {
                let data = [
                    (if note.velocity > 0 {
                        MIDI_STATUS_NOTE_ON
                    } else {
                        MIDI_STATUS_NOTE_OFF
                    }) | (note.channel & 0x0F),
                    note.note,
                    note.velocity,
                ];
                transport.write_rt_midi_event(0, 0, &data);
            }
        }

        for event in events_in {
            match &event.kind {
                EngineEventKind::Null => {}
                EngineEventKind::Midi(midi) => {
                    if midi.size >= 3 {
                        let status = midi.data[0] & 0xF0;
                        if status == MIDI_STATUS_NOTE_ON {
                            self.track_note(inner, event.channel, midi.data[1], true);
                        } else if status == MIDI_STATUS_NOTE_OFF {
                            self.track_note(inner, event.channel, midi.data[1], false);
                        }
                    }
                    if inner.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                        inner.staged_events.push(*event);
                    }
                    if let Backend::Bridged(transport) = &inner.backend {
                        transport.write_rt_midi_event(
                            event.time,
                            midi.port,
                            &midi.data[..midi.size as usize],
                        );
                    }
                }
                EngineEventKind::Control(ctrl) => match ctrl.kind {
                    CtrlEventKind::Null => {}
                    CtrlEventKind::Parameter => {
                        let mut handled = false;
                        if i32::from(event.channel) == ctrl_channel {
                            handled = self.map_builtin_control(hint_bits, ctrl.param, ctrl.value);
                        }
                        if !handled {
                            self.map_parameter_midi_cc(inner, event.channel, ctrl.param, ctrl.value);
                            if inner.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                                inner.staged_events.push(*event);
                            }
                            if let Backend::Bridged(transport) = &inner.backend {
                                transport.write_rt_control_parameter(
                                    event.time,
                                    event.channel,
                                    ctrl.param,
                                    ctrl.value,
                                );
                            }
                        }
                    }
                    CtrlEventKind::MidiBank => {
                        if options & plugin_options::MAP_PROGRAM_CHANGES != 0 {
                            inner.last_bank = ctrl.value as u16;
                            if inner.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                                inner.staged_events.push(*event);
                            }
                            if let Backend::Bridged(transport) = &inner.backend {
                                transport.write_rt_control_midi_bank(
                                    event.time,
                                    event.channel,
                                    ctrl.value as u16,
                                );
                            }
                        }
                    }
                    CtrlEventKind::MidiProgram => {
                        if options & plugin_options::MAP_PROGRAM_CHANGES != 0 {
                            self.map_midi_program(inner, event.channel, ctrl.value as u16);
                            if inner.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                                inner.staged_events.push(*event);
                            }
                            if let Backend::Bridged(transport) = &inner.backend {
                                transport.write_rt_control_midi_program(
                                    event.time,
                                    event.channel,
                                    ctrl.value as u16,
                                );
                            }
                        }
                    }
                    CtrlEventKind::AllSoundOff => {
                        if options & plugin_options::SEND_ALL_SOUND_OFF != 0 {
                            if inner.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                                inner.staged_events.push(*event);
                            }
                            if let Backend::Bridged(transport) = &inner.backend {
                                transport.write_rt_all_sound_off(event.time, event.channel);
                            }
                        }
                    }
                    CtrlEventKind::AllNotesOff => {
                        if i32::from(event.channel) == ctrl_channel && !all_notes_off_done {
                            all_notes_off_done = true;
                            self.synthesize_note_offs(inner);
                        }
                        if options & plugin_options::SEND_ALL_SOUND_OFF != 0 {
                            if inner.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                                inner.staged_events.push(*event);
                            }
                            if let Backend::Bridged(transport) = &inner.backend {
                                transport.write_rt_all_notes_off(event.time, event.channel);
                            }
                        }
                    }
                },
            }
        }
    }

    fn track_note(&self, inner: &mut RtInner, channel: u8, note: u8, on: bool) {
        let channel = (channel & 0x0F) as usize;
        let bit = 1u128 << (note as usize & 0x7F);
        if on {
            inner.held_notes[channel] |= bit;
        } else {
            inner.held_notes[channel] &= !bit;
        }
    }

    /// Note-off callbacks for every held note. Fired by an `AllNotesOff` on
    /// the ctrl channel, at most once per cycle.
    fn synthesize_note_offs(&self, inner: &mut RtInner) {
        for channel in 0..MAX_MIDI_CHANNELS {
            let mut held = inner.held_notes[channel];
            while held != 0 {
                let note = held.trailing_zeros();
                held &= held - 1;
                self.post_rt.push_rt(PostRtEvent {
                    kind: PostRtEventKind::NoteOff,
                    plugin_id: self.id(),
                    value1: channel as i32,
                    value2: note as i32,
                    value3: 0,
                    valuef: 0.0,
                    send_callback: true,
                });
            }
            inner.held_notes[channel] = 0;
        }
    }

    /// CC mapping for the built-in mix controls. Returns true when the
    /// event was consumed.
    fn map_builtin_control(&self, hint_bits: u32, cc: u16, value: f32) -> bool {
        match cc as u8 {
            params::MIDI_CC_DRYWET if hint_bits & hints::CAN_DRYWET != 0 => {
                let fixed = self.set_dry_wet(value);
                self.post_parameter_change(params::PARAMETER_DRYWET, fixed);
                true
            }
            params::MIDI_CC_VOLUME if hint_bits & hints::CAN_VOLUME != 0 => {
                let fixed = self.set_volume(value * 127.0 / 100.0);
                self.post_parameter_change(params::PARAMETER_VOLUME, fixed);
                true
            }
            params::MIDI_CC_BALANCE | params::MIDI_CC_PAN
                if hint_bits & hints::CAN_BALANCE != 0 =>
            {
                // The control value is normalized [0,1]; recenter to ±1.
                let centered = value * 2.0 - 1.0;
                let (left, right) = params::balance_pair(centered);
                self.balance_left.set(left);
                self.balance_right.set(right);
                self.post_parameter_change(params::PARAMETER_BALANCE_LEFT, left);
                self.post_parameter_change(params::PARAMETER_BALANCE_RIGHT, right);
                true
            }
            _ => false,
        }
    }

    fn post_parameter_change(&self, index: i32, value: f32) {
        self.post_rt.push_rt(PostRtEvent {
            kind: PostRtEventKind::ParameterChanged,
            plugin_id: self.id(),
            value1: index,
            value2: 0,
            value3: 0,
            valuef: value,
            send_callback: true,
        });
    }

    /// Apply a CC to plugin parameters bound to it. RT path: the master
    /// lock cannot be taken, so this is a try-lock and skips on contention.
    fn map_parameter_midi_cc(&self, inner: &mut RtInner, channel: u8, cc: u16, value: f32) {
        let Some(mut shared) = self.master.try_lock() else {
            return;
        };
        for param in shared.params.iter_mut() {
            if param.data.midi_cc == cc as i16
                && param.data.midi_channel == channel
                && param.data.hints & param_hints::AUTOMABLE != 0
                && param.data.kind == ParameterKind::Input
            {
                let mapped = param.ranges.unnormalized(value);
                let fixed = param.ranges.fixed_value(param.data.hints, mapped);
                param.value = fixed;
                let index = param.data.index;
                if let Backend::Local(instance) = &mut inner.backend {
                    instance.set_parameter_value(index as u32, fixed);
                }
                self.post_parameter_change(index, fixed);
            }
        }
    }

    fn map_midi_program(&self, inner: &mut RtInner, _channel: u8, program: u16) {
        let Some(mut shared) = self.master.try_lock() else {
            return;
        };
        let bank = inner.last_bank as u32;
        if let Some(index) = shared
            .midi_programs
            .iter()
            .position(|mp| mp.bank == bank && mp.program == u32::from(program))
        {
            shared.current_midi_program = index as i32;
            self.post_rt.push_rt(PostRtEvent {
                kind: PostRtEventKind::MidiProgramChanged,
                plugin_id: self.id(),
                value1: index as i32,
                value2: 0,
                value3: 0,
                valuef: 0.0,
                send_callback: true,
            });
        }
    }

    /// Fixed-order post-processing on audio outputs: dry/wet, balance,
    /// volume. Every stage is skipped at identity.
    fn post_process(
        &self,
        inner: &mut RtInner,
        audio_in: &[&[f32]],
        audio_out: &mut [&mut [f32]],
        frames: usize,
    ) {
        let hint_bits = self.hints();
        let dry_wet = self.dry_wet.get_relaxed();
        let volume = self.volume.get_relaxed();
        let balance_left = self.balance_left.get_relaxed();
        let balance_right = self.balance_right.get_relaxed();

        let do_dry_wet = hint_bits & hints::CAN_DRYWET != 0 && dry_wet != 1.0;
        let do_balance =
            hint_bits & hints::CAN_BALANCE != 0 && !(balance_left == -1.0 && balance_right == 1.0);
        let do_volume = hint_bits & hints::CAN_VOLUME != 0 && volume != 1.0;

        if do_dry_wet && !audio_in.is_empty() {
            let latency = self.latency.load(Ordering::Relaxed) as usize;
            for (ch, out) in audio_out.iter_mut().enumerate() {
                let in_ch = ch.min(audio_in.len() - 1);
                let dry_src = audio_in[in_ch];
                if latency > 0 && ch < inner.latency_buffers.len() {
                    // Delayed dry: history first, then the head of this block.
                    let scratch = &mut inner.dry_scratch[ch];
                    let history = &mut inner.latency_buffers[ch];
                    for k in 0..frames {
                        scratch[k] = if k < latency {
                            history[k]
                        } else {
                            dry_src[k - latency]
                        };
                    }
                    // Roll the history forward for the next cycle.
                    if frames >= latency {
                        history.copy_from_slice(&dry_src[frames - latency..frames]);
                    } else {
                        history.rotate_left(frames);
                        let keep = latency - frames;
                        history[keep..].copy_from_slice(&dry_src[..frames]);
                    }
                    for k in 0..frames {
                        out[k] = out[k] * dry_wet + scratch[k] * (1.0 - dry_wet);
                    }
                } else {
                    for k in 0..frames {
                        out[k] = out[k] * dry_wet + dry_src[k] * (1.0 - dry_wet);
                    }
                }
            }
        }

        if do_balance {
            let range_left = (balance_left + 1.0) / 2.0;
            let range_right = (balance_right + 1.0) / 2.0;
            let mut ch = 0;
            while ch + 1 < audio_out.len() {
                // Split borrows of the pair.
                let (head, tail) = audio_out.split_at_mut(ch + 1);
                let left = &mut *head[ch];
                let right = &mut *tail[0];
                let old_left = &mut inner.balance_scratch;
                old_left[..frames].copy_from_slice(&left[..frames]);
                for k in 0..frames {
                    left[k] = old_left[k] * (1.0 - range_left) + right[k] * (1.0 - range_right);
                    right[k] = right[k] * range_right + old_left[k] * range_left;
                }
                ch += 2;
            }
            // Odd tail output stays mono passthrough.
        }

        if do_volume {
            for out in audio_out.iter_mut() {
                for sample in &mut out[..frames] {
                    *sample *= volume;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{gain_params, GainInstance, PassthroughInstance};
    use plugrack_core::events::CtrlEvent;

    fn local_gain() -> (Plugin, Arc<PostRtQueue>) {
        let post_rt = Arc::new(PostRtQueue::new());
        let plugin = Plugin::new_local(
            0,
            PluginType::Internal,
            "",
            Box::new(GainInstance::new()),
            Arc::clone(&post_rt),
            64,
            200,
            false,
        );
        plugin.set_enabled(true);
        plugin.set_active(true);
        (plugin, post_rt)
    }

    fn run(plugin: &Plugin, input: [&[f32]; 2], frames: u32) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames as usize];
        let mut right = vec![0.0f32; frames as usize];
        let mut events_out = Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT);
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            plugin.process(
                &input,
                &mut outs,
                &[],
                &mut [],
                &[],
                &mut events_out,
                frames,
                &EngineTimeInfo::default(),
                false,
            );
        }
        (left, right)
    }

    #[test]
    fn reload_computes_hints_and_ports() {
        let (plugin, _) = local_gain();
        assert!(plugin.hints() & hints::CAN_DRYWET != 0);
        assert!(plugin.hints() & hints::CAN_VOLUME != 0);
        assert!(plugin.hints() & hints::CAN_BALANCE != 0);
        assert!(plugin.extra_hints() & extra_hints::CAN_RUN_RACK != 0);
        let shared = plugin.master().lock();
        assert_eq!(shared.ports.audio_in.len(), 2);
        assert_eq!(shared.ports.audio_in[0].name, "input_1");
        assert_eq!(shared.ports.audio_out[1].name, "output_2");
    }

    #[test]
    fn can_run_rack_characterization() {
        for audio_in in 0..5u32 {
            for audio_out in 0..5u32 {
                let expected = audio_in <= 2
                    && audio_out <= 2
                    && (audio_in == audio_out || audio_in == 0 || audio_out == 0);
                assert_eq!(can_run_rack(audio_in, audio_out), expected);
            }
        }
    }

    #[test]
    fn disabled_plugin_outputs_silence() {
        let (plugin, _) = local_gain();
        plugin.set_enabled(false);
        let input = [0.5f32; 16];
        let (l, r) = run(&plugin, [&input, &input], 16);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn inactive_plugin_outputs_silence() {
        let (plugin, _) = local_gain();
        plugin.set_active(false);
        let input = [0.5f32; 16];
        let (l, r) = run(&plugin, [&input, &input], 16);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn single_lock_contention_silences_the_cycle() {
        let (plugin, _) = local_gain();
        let guard = plugin.single.lock();
        let input = [0.5f32; 8];
        let (l, r) = run(&plugin, [&input, &input], 8);
        drop(guard);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0));
        // And the cycle after the lock is released computes again.
        let (l, _) = run(&plugin, [&input, &input], 8);
        assert_eq!(l, vec![0.5; 8]);
    }

    #[test]
    fn boolean_parameter_snaps_through_the_handle() {
        let (plugin, _) = local_gain();
        assert_eq!(
            plugin.set_parameter_value(gain_params::MUTE as i32, 0.49),
            Some(0.0)
        );
        assert_eq!(plugin.parameter_value(gain_params::MUTE as i32), Some(0.0));
        assert_eq!(
            plugin.set_parameter_value(gain_params::MUTE as i32, 0.5),
            Some(1.0)
        );
        assert_eq!(plugin.parameter_value(gain_params::MUTE as i32), Some(1.0));
    }

    #[test]
    fn internal_parameters_clamp() {
        let (plugin, _) = local_gain();
        assert_eq!(
            plugin.set_parameter_value(params::PARAMETER_VOLUME, 9.0),
            Some(1.27)
        );
        assert_eq!(
            plugin.set_parameter_value(params::PARAMETER_DRYWET, -0.5),
            Some(0.0)
        );
        assert_eq!(
            plugin.set_parameter_value(params::PARAMETER_BALANCE_LEFT, -7.0),
            Some(-1.0)
        );
    }

    #[test]
    fn volume_post_processing_scales_output() {
        let (plugin, _) = local_gain();
        plugin.set_volume(0.5);
        let input = [1.0f32; 8];
        let (l, _) = run(&plugin, [&input, &input], 8);
        assert_eq!(l, vec![0.5; 8]);
    }

    #[test]
    fn dry_wet_blends_input_and_output() {
        let (plugin, _) = local_gain();
        // Gain 0 makes the wet path silent; dry/wet 0.25 keeps 75% dry.
        plugin.set_parameter_value(gain_params::GAIN as i32, 0.0);
        plugin.set_dry_wet(0.25);
        let input = [1.0f32; 4];
        let (l, _) = run(&plugin, [&input, &input], 4);
        for s in l {
            approx::assert_relative_eq!(s, 0.75, max_relative = 1e-6);
        }
    }

    #[test]
    fn balance_full_left_sums_into_left() {
        let (plugin, _) = local_gain();
        // balance_left=-1, balance_right=-1 puts the right channel fully
        // into the left one.
        plugin.set_balance_right(-1.0);
        let a = [0.25f32; 4];
        let b = [0.5f32; 4];
        let (l, r) = run(&plugin, [&a, &b], 4);
        for k in 0..4 {
            assert!((l[k] - 0.75).abs() < 1e-6);
            assert!(r[k].abs() < 1e-6);
        }
    }

    #[test]
    fn ctrl_channel_cc_maps_builtin_controls() {
        let (plugin, post_rt) = local_gain();
        plugin.set_ctrl_channel(0);
        let events = [EngineEvent {
            time: 0,
            channel: 0,
            kind: EngineEventKind::Control(CtrlEvent {
                kind: CtrlEventKind::Parameter,
                param: u16::from(params::MIDI_CC_VOLUME),
                value: 100.0 / 127.0,
            }),
        }];
        let input = [0.5f32; 4];
        let mut left = vec![0.0f32; 4];
        let mut right = vec![0.0f32; 4];
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            let mut events_out = Vec::new();
            plugin.process(
                &[&input, &input],
                &mut outs,
                &[],
                &mut [],
                &events,
                &mut events_out,
                4,
                &EngineTimeInfo::default(),
                false,
            );
        }
        // CC7 at 100/127 scales by 127/100 to exactly 1.0.
        assert!((plugin.volume() - 1.0).abs() < 1e-6);
        post_rt.splice();
        let mut out = Vec::new();
        post_rt.take_ready(&mut out);
        assert!(out
            .iter()
            .any(|ev| ev.kind == PostRtEventKind::ParameterChanged
                && ev.value1 == params::PARAMETER_VOLUME));
    }

    #[test]
    fn all_notes_off_synthesizes_note_offs_once() {
        let (plugin, post_rt) = local_gain();
        plugin.set_ctrl_channel(0);
        plugin.send_midi_note(0, 60, 100);
        plugin.send_midi_note(0, 64, 100);
        let events = [
            EngineEvent {
                time: 0,
                channel: 0,
                kind: EngineEventKind::Control(CtrlEvent {
                    kind: CtrlEventKind::AllNotesOff,
                    param: 0,
                    value: 0.0,
                }),
            },
            EngineEvent {
                time: 1,
                channel: 0,
                kind: EngineEventKind::Control(CtrlEvent {
                    kind: CtrlEventKind::AllNotesOff,
                    param: 0,
                    value: 0.0,
                }),
            },
        ];
        let input = [0.0f32; 4];
        let mut left = vec![0.0f32; 4];
        let mut right = vec![0.0f32; 4];
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            let mut events_out = Vec::new();
            plugin.process(
                &[&input, &input],
                &mut outs,
                &[],
                &mut [],
                &events,
                &mut events_out,
                4,
                &EngineTimeInfo::default(),
                false,
            );
        }
        post_rt.splice();
        let mut out = Vec::new();
        post_rt.take_ready(&mut out);
        let note_offs: Vec<_> = out
            .iter()
            .filter(|ev| ev.kind == PostRtEventKind::NoteOff)
            .collect();
        // Two note-ons from the mailbox, then exactly one synthesis pass
        // for the two held notes despite two AllNotesOff events.
        assert_eq!(note_offs.len(), 2);
    }

    #[test]
    fn settings_snapshot_roundtrip() {
        let (plugin, post_rt) = local_gain();
        plugin.set_parameter_value(gain_params::GAIN as i32, 1.5);
        plugin.set_dry_wet(0.5);
        plugin.set_volume(0.9);
        plugin.put_custom_data(CUSTOM_DATA_TYPE_PROPERTY, "color", "blue", true);
        let settings = plugin.save_settings();

        let restored = Plugin::new_local(
            1,
            PluginType::Internal,
            "",
            Box::new(GainInstance::new()),
            post_rt,
            64,
            200,
            false,
        );
        restored.set_enabled(true);
        restored.load_settings(&settings);
        assert_eq!(
            restored.parameter_value(gain_params::GAIN as i32),
            Some(1.5)
        );
        assert_eq!(restored.dry_wet(), 0.5);
        assert!((restored.volume() - 0.9).abs() < 1e-6);
        assert_eq!(
            restored.master().lock().custom_data,
            vec![CustomData {
                dtype: CUSTOM_DATA_TYPE_PROPERTY.into(),
                key: "color".into(),
                value: "blue".into(),
            }]
        );
    }

    #[test]
    fn asymmetric_io_is_not_rack_compatible() {
        let post_rt = Arc::new(PostRtQueue::new());
        let plugin = Plugin::new_local(
            0,
            PluginType::Internal,
            "",
            Box::new(PassthroughInstance::with_ports(1, 2)),
            post_rt,
            64,
            200,
            false,
        );
        assert!(plugin.extra_hints() & extra_hints::CAN_RUN_RACK == 0);
        // 1-in/2-out is not rack-compatible on its own; forceStereo wraps
        // it at the graph layer.
        let plugin_three = Plugin::new_local(
            1,
            PluginType::Internal,
            "",
            Box::new(PassthroughInstance::with_ports(3, 3)),
            Arc::new(PostRtQueue::new()),
            64,
            200,
            false,
        );
        assert!(plugin_three.extra_hints() & extra_hints::CAN_RUN_RACK == 0);
    }
}
