//! The engine: plugin table, graph, transport, UI pipe, idle pump.
//!
//! One `Engine` per embedded instance. The outer host owns the audio and
//! main threads and calls `process` / `ui_idle`; the engine owns a
//! background thread for blocking project work and, per bridged plugin, the
//! worker's supervision.

use crate::callback::EngineCallback;
use crate::graph::{Graph, PatchbayGraph, RackGraph};
use crate::project::{ProjectDocument, PROJECT_FORMAT_VERSION};
use crate::uipipe::{UiCommand, UiPipe, UiState};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use plugrack_core::events::MAX_INTERNAL_EVENT_COUNT;
use plugrack_core::params::{self as params, ParameterKind};
use plugrack_core::{
    AtomicFlag, EngineError, EngineEvent, EngineOptionId, EngineOptions, EngineTimeInfo,
    EngineTimeInfoBbt, EventBus, PostRtEvent, PostRtEventKind, PostRtQueue, ProcessMode, Result,
};
use plugrack_plugin::plugin::hints;
use plugrack_plugin::{
    create_builtin, BridgeTransport, Plugin, PluginInstance, PluginSettings, PluginType,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

pub const MAX_PLUGINS: usize = 255;

/// A raw MIDI event at the outer-host boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostMidiEvent {
    pub time: u32,
    pub port: u8,
    pub size: u8,
    pub data: [u8; 4],
}

/// Fixed I/O shape of one descriptor variant.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub cv_ins: u32,
    pub cv_outs: u32,
    pub midi_out: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio_ins: 2,
            audio_outs: 2,
            cv_ins: 0,
            cv_outs: 0,
            midi_out: true,
        }
    }
}

type CallbackSink = Box<dyn Fn(&EngineCallback) + Send + Sync>;
type InstanceLoader =
    Box<dyn Fn(PluginType, &str, &str) -> Option<Box<dyn PluginInstance>> + Send + Sync>;

enum BackgroundJob {
    LoadProjectFile(PathBuf),
    SaveProjectFile(PathBuf),
    Quit,
}

struct BackgroundHandle {
    tx: Sender<BackgroundJob>,
    join: Option<JoinHandle<()>>,
}

struct EngineRt {
    bus: EventBus,
    graph: Graph,
    cached_time: EngineTimeInfo,
}

struct UiRuntime {
    pipe: Option<Arc<UiPipe>>,
    state: UiState,
    project_filename: Option<PathBuf>,
}

pub struct Engine {
    config: EngineConfig,
    options: Mutex<EngineOptions>,
    options_forced: AtomicFlag,
    buffer_size: AtomicU32,
    sample_rate_bits: AtomicU64,

    plugins: RwLock<Vec<Arc<Plugin>>>,
    rt: Mutex<EngineRt>,
    time: Mutex<EngineTimeInfo>,
    post_rt: Arc<PostRtQueue>,
    post_rt_scratch: Mutex<Vec<PostRtEvent>>,

    callback: Mutex<Option<CallbackSink>>,
    loader: InstanceLoader,
    last_error: Mutex<String>,
    xruns: AtomicU32,
    offline: AtomicFlag,
    active: AtomicFlag,
    closed: AtomicFlag,

    ui: Mutex<UiRuntime>,
    background: Mutex<Option<BackgroundHandle>>,
    /// Bridged plugins whose crash has already been reported.
    crash_reported: Mutex<HashSet<u32>>,
    self_weak: Mutex<Weak<Engine>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        options: EngineOptions,
        buffer_size: u32,
        sample_rate: f64,
    ) -> Arc<Self> {
        Self::with_loader(
            config,
            options,
            buffer_size,
            sample_rate,
            Box::new(|ptype, _filename, label| match ptype {
                PluginType::Internal => create_builtin(label),
                _ => None,
            }),
        )
    }

    /// Construct with a custom format loader (the seam where format
    /// wrappers plug in).
    pub fn with_loader(
        config: EngineConfig,
        options: EngineOptions,
        buffer_size: u32,
        sample_rate: f64,
        loader: InstanceLoader,
    ) -> Arc<Self> {
        let graph = match options.process_mode {
            ProcessMode::Rack => Graph::Rack(RackGraph::new(buffer_size, options.force_stereo)),
            ProcessMode::Patchbay => Graph::Patchbay(PatchbayGraph::new(
                buffer_size,
                config.audio_ins,
                config.audio_outs,
                config.cv_ins,
                config.cv_outs,
            )),
        };
        let engine = Arc::new(Self {
            config,
            options: Mutex::new(options),
            options_forced: AtomicFlag::default(),
            buffer_size: AtomicU32::new(buffer_size),
            sample_rate_bits: AtomicU64::new(sample_rate.to_bits()),
            plugins: RwLock::new(Vec::new()),
            rt: Mutex::new(EngineRt {
                bus: EventBus::new(),
                graph,
                cached_time: EngineTimeInfo::default(),
            }),
            time: Mutex::new(EngineTimeInfo {
                bbt: Some(EngineTimeInfoBbt::default()),
                ..Default::default()
            }),
            post_rt: Arc::new(PostRtQueue::new()),
            post_rt_scratch: Mutex::new(Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT)),
            callback: Mutex::new(None),
            loader,
            last_error: Mutex::new(String::new()),
            xruns: AtomicU32::new(0),
            offline: AtomicFlag::default(),
            active: AtomicFlag::default(),
            closed: AtomicFlag::default(),
            ui: Mutex::new(UiRuntime {
                pipe: None,
                state: UiState::None,
                project_filename: None,
            }),
            background: Mutex::new(None),
            crash_reported: Mutex::new(HashSet::new()),
            self_weak: Mutex::new(Weak::new()),
        });
        *engine.self_weak.lock() = Arc::downgrade(&engine);
        engine.start_background();
        engine
    }

    // -- accessors -----------------------------------------------------

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    pub fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate_bits.load(Ordering::Relaxed))
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn plugin_count(&self) -> u32 {
        self.plugins.read().len() as u32
    }

    pub fn plugin(&self, id: u32) -> Result<Arc<Plugin>> {
        self.plugins
            .read()
            .get(id as usize)
            .cloned()
            .ok_or(EngineError::UnknownPlugin(id))
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    fn set_last_error(&self, text: &str) {
        *self.last_error.lock() = text.to_string();
    }

    pub fn xruns(&self) -> u32 {
        self.xruns.load(Ordering::Relaxed)
    }

    pub fn clear_xruns(&self) {
        self.xruns.store(0, Ordering::Relaxed);
    }

    pub fn set_callback(&self, sink: CallbackSink) {
        *self.callback.lock() = Some(sink);
    }

    pub fn options(&self) -> EngineOptions {
        self.options.lock().clone()
    }

    /// Path of the current project, set by `save_project` and cleared by
    /// `clear_project_filename`.
    pub fn project_filename(&self) -> Option<PathBuf> {
        self.ui.lock().project_filename.clone()
    }

    pub fn set_option(&self, id: EngineOptionId, value: &str) -> Result<()> {
        if self.options_forced.get() {
            return Err(EngineError::BadOption {
                key: format!("{id:?}"),
                reason: "options are forced by the loaded project".into(),
            });
        }
        if self.active.get() {
            return Err(EngineError::BadOption {
                key: format!("{id:?}"),
                reason: "options are immutable while the engine is active".into(),
            });
        }
        self.options.lock().apply(id, value, true)
    }

    fn callback(&self, cb: EngineCallback) {
        if let Some(sink) = &*self.callback.lock() {
            sink(&cb);
        }
        if let Some(pipe) = self.ui_pipe() {
            pipe.send_callback(&cb.flatten());
        }
    }

    fn ui_pipe(&self) -> Option<Arc<UiPipe>> {
        self.ui.lock().pipe.clone()
    }

    // -- lifecycle -----------------------------------------------------

    pub fn activate(&self) {
        self.active.set(true);
    }

    pub fn deactivate(&self) {
        self.active.set(false);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    pub fn close(&self) {
        if self.closed.get() {
            return;
        }
        self.closed.raise();
        self.deactivate();
        self.remove_all_plugins();
        self.stop_background();
        let pipe = self.ui.lock().pipe.take();
        if let Some(pipe) = pipe {
            pipe.kill_helper();
        }
    }

    pub fn buffer_size_changed(&self, frames: u32) {
        self.buffer_size.store(frames, Ordering::Relaxed);
        self.rt.lock().graph.buffer_size_changed(frames);
        for plugin in self.plugins.read().iter() {
            plugin.buffer_size_changed(frames);
        }
        self.callback(EngineCallback::BufferSizeChanged { frames });
    }

    pub fn sample_rate_changed(&self, rate: f64) {
        self.sample_rate_bits
            .store(rate.to_bits(), Ordering::Relaxed);
        for plugin in self.plugins.read().iter() {
            plugin.sample_rate_changed(rate);
        }
        self.callback(EngineCallback::SampleRateChanged { rate });
    }

    // -- transport -----------------------------------------------------

    pub fn transport_play(&self) {
        let frame = {
            let mut time = self.time.lock();
            time.playing = true;
            time.frame
        };
        self.callback(EngineCallback::TransportChanged {
            playing: true,
            frame,
        });
    }

    pub fn transport_pause(&self) {
        let frame = {
            let mut time = self.time.lock();
            time.playing = false;
            time.frame
        };
        self.callback(EngineCallback::TransportChanged {
            playing: false,
            frame,
        });
    }

    pub fn transport_bpm(&self, bpm: f64) {
        let mut time = self.time.lock();
        if let Some(bbt) = &mut time.bbt {
            bbt.beats_per_minute = bpm.clamp(20.0, 999.0);
        }
    }

    pub fn transport_relocate(&self, frame: u64) {
        let sample_rate = self.sample_rate();
        self.time.lock().relocate(frame, sample_rate);
    }

    pub fn time_info(&self) -> EngineTimeInfo {
        *self.time.lock()
    }

    // -- processing ----------------------------------------------------

    fn zero_host_outputs(outs: &mut [&mut [f32]], frames: usize) {
        for out in outs.iter_mut() {
            let len = frames.min(out.len());
            out[..len].fill(0.0);
        }
    }

    /// One audio cycle from the outer host. Input slices carry audio
    /// channels first, then CV; same for outputs.
    pub fn process(
        &self,
        ins: &[&[f32]],
        outs: &mut [&mut [f32]],
        frames: u32,
        midi_in: &[HostMidiEvent],
        midi_out: &mut Vec<HostMidiEvent>,
    ) {
        let n = frames as usize;
        if !self.active.get() || frames == 0 {
            Self::zero_host_outputs(outs, n);
            return;
        }

        // A host handing us more frames than negotiated forces a one-off
        // resize before this cycle runs.
        if frames > self.buffer_size() {
            self.deactivate();
            self.buffer_size_changed(frames);
            self.activate();
        }

        let Some(plugins) = self.plugins.try_read() else {
            self.xruns.fetch_add(1, Ordering::Relaxed);
            Self::zero_host_outputs(outs, n);
            return;
        };
        let Some(mut rt_guard) = self.rt.try_lock() else {
            self.xruns.fetch_add(1, Ordering::Relaxed);
            Self::zero_host_outputs(outs, n);
            return;
        };
        let rt = &mut *rt_guard;

        rt.bus.clear();
        for ev in midi_in {
            if let Some(event) =
                EngineEvent::from_raw_midi(ev.time, ev.port, &ev.data[..ev.size as usize])
            {
                rt.bus.push_input(event);
            }
        }
        rt.bus.sort_input();

        if let Some(time) = self.time.try_lock() {
            rt.cached_time = *time;
        }
        let time = rt.cached_time;
        let offline = self.offline.get();

        let audio_ins = (self.config.audio_ins as usize).min(ins.len());
        let (audio_in, cv_in) = ins.split_at(audio_ins);
        let audio_outs = (self.config.audio_outs as usize).min(outs.len());

        match &mut rt.graph {
            Graph::Rack(rack) => {
                if plugins.is_empty() {
                    // Passthrough identity: outputs mirror inputs bit for
                    // bit, MIDI goes through verbatim.
                    for (ch, out) in outs.iter_mut().enumerate() {
                        match audio_in.get(ch) {
                            Some(input) => out[..n].copy_from_slice(&input[..n]),
                            None => out[..n].fill(0.0),
                        }
                    }
                    if self.config.midi_out {
                        midi_out.extend_from_slice(midi_in);
                    }
                } else {
                    rack.process(&plugins, &mut rt.bus, audio_in, outs, frames, &time, offline);
                }
            }
            Graph::Patchbay(patchbay) => {
                let (audio_out, cv_out) = outs.split_at_mut(audio_outs);
                patchbay.process(
                    &plugins,
                    &mut rt.bus,
                    audio_in,
                    audio_out,
                    cv_in,
                    cv_out,
                    frames,
                    &time,
                    offline,
                );
            }
        }

        if self.config.midi_out && !plugins.is_empty() {
            for event in rt.bus.output() {
                let Some(raw) = event.to_raw_midi() else {
                    continue;
                };
                for (msg, size) in raw.msgs.iter().take(raw.len) {
                    let mut data = [0u8; 4];
                    data[..3].copy_from_slice(msg);
                    midi_out.push(HostMidiEvent {
                        time: event.time,
                        port: 0,
                        size: *size as u8,
                        data,
                    });
                }
            }
        }

        let sample_rate = self.sample_rate();
        if let Some(mut time) = self.time.try_lock() {
            time.advance(frames, sample_rate);
            rt.cached_time = *time;
        }
    }

    // -- plugin management ---------------------------------------------

    fn rack_admission_check(&self, plugin: &Plugin) -> Result<()> {
        let (process_mode, force_stereo) = {
            let options = self.options.lock();
            (options.process_mode, options.force_stereo)
        };
        if process_mode != ProcessMode::Rack {
            return Ok(());
        }
        if plugin.has_cv_ports() {
            return Err(EngineError::CapabilityMismatch(format!(
                "Plugin '{}' has CV ports, which Rack mode does not support",
                plugin.name()
            )));
        }
        let audio_in = plugin.audio_in_count();
        let audio_out = plugin.audio_out_count();
        let rack_ok = plugrack_plugin::plugin::can_run_rack(audio_in, audio_out)
            || (force_stereo && audio_in <= 2 && audio_out <= 2);
        if !rack_ok {
            return Err(EngineError::CapabilityMismatch(format!(
                "Plugin '{}' is not compatible with Rack mode (at most stereo, balanced I/O)",
                plugin.name()
            )));
        }
        Ok(())
    }

    pub fn add_plugin(&self, ptype: PluginType, filename: &str, label: &str) -> Result<u32> {
        if filename.is_empty() && label.is_empty() {
            let err = EngineError::User("Either filename or label must be provided".into());
            self.set_last_error(&err.to_string());
            return Err(err);
        }
        if self.plugins.read().len() >= MAX_PLUGINS {
            let err = EngineError::PluginTableFull;
            self.set_last_error(&err.to_string());
            return Err(err);
        }

        let options = self.options();
        let id = self.plugins.read().len() as u32;
        let buffer_size = self.buffer_size();

        let use_bridge = options.prefer_plugin_bridges && options.binary_dir.is_some();
        let plugin = if use_bridge {
            self.load_bridged(id, ptype, filename, label, &options)?
        } else {
            let instance = (self.loader)(ptype, filename, label).ok_or_else(|| {
                let err = EngineError::User(format!(
                    "Failed to load plugin '{label}' (type {})",
                    ptype.as_str()
                ));
                self.set_last_error(&err.to_string());
                err
            })?;
            Arc::new(Plugin::new_local(
                id,
                ptype,
                filename,
                instance,
                Arc::clone(&self.post_rt),
                buffer_size,
                options.max_parameters,
                false,
            ))
        };

        if let Err(err) = self.rack_admission_check(&plugin) {
            if let Some(transport) = plugin.transport() {
                transport.shutdown();
            }
            self.set_last_error(&err.to_string());
            return Err(err);
        }

        if let Graph::Patchbay(patchbay) = &mut self.rt.lock().graph {
            patchbay.add_node(&plugin);
        }
        plugin.set_enabled(true);
        plugin.set_active(true);
        let name = plugin.name();
        self.plugins.write().push(plugin);
        self.callback(EngineCallback::PluginAdded { id, name });
        Ok(id)
    }

    fn load_bridged(
        &self,
        id: u32,
        ptype: PluginType,
        filename: &str,
        label: &str,
        options: &EngineOptions,
    ) -> Result<Arc<Plugin>> {
        let binary = options
            .binary_dir
            .as_ref()
            .map(|dir| dir.join("plugrack-bridge"))
            .ok_or_else(|| EngineError::User("binaryDir is not set".into()))?;
        let buffer_size = self.buffer_size();
        let transport = Arc::new(
            BridgeTransport::new(0, 0, 0, 0, buffer_size, self.sample_rate())
                .map_err(|e| EngineError::Bridge(e.to_string()))?,
        );
        transport
            .spawn_worker(
                &binary,
                ptype.as_str(),
                filename,
                label,
                0,
                &options.env_for_bridge(),
                false,
            )
            .map_err(|e| {
                self.set_last_error(&e.to_string());
                EngineError::Bridge(e.to_string())
            })?;
        let mut messages = Vec::new();
        if let Err(e) = transport.wait_for_ready(&mut messages) {
            self.set_last_error(&e.to_string());
            transport.shutdown();
            return Err(EngineError::Bridge(e.to_string()));
        }

        let plugin = Arc::new(Plugin::new_bridged(
            id,
            ptype,
            filename,
            label,
            Arc::clone(&transport),
            Arc::clone(&self.post_rt),
            buffer_size,
        ));
        for msg in &messages {
            plugin.apply_server_message(msg, buffer_size);
        }
        transport
            .configure_pool(
                plugin.audio_in_count(),
                plugin.audio_out_count(),
                plugin.cv_in_count(),
                plugin.cv_out_count(),
                buffer_size,
            )
            .map_err(|e| EngineError::Bridge(e.to_string()))?;
        Ok(plugin)
    }

    pub fn remove_plugin(&self, id: u32) -> Result<()> {
        let plugin = {
            let mut plugins = self.plugins.write();
            if id as usize >= plugins.len() {
                return Err(EngineError::UnknownPlugin(id));
            }
            let plugin = plugins.remove(id as usize);
            let mapping: Vec<(u32, u32)> = plugins
                .iter()
                .enumerate()
                .skip(id as usize)
                .map(|(at, p)| {
                    let old = p.id();
                    p.set_id(at as u32);
                    (old, at as u32)
                })
                .collect();
            if let Graph::Patchbay(patchbay) = &mut self.rt.lock().graph {
                patchbay.remove_node(id);
                patchbay.renumber_nodes(&mapping);
            }
            plugin
        };
        plugin.set_enabled(false);
        plugin.set_active(false);
        if let Some(transport) = plugin.transport() {
            transport.shutdown();
        }
        self.crash_reported.lock().remove(&id);
        self.callback(EngineCallback::PluginRemoved { id });
        Ok(())
    }

    pub fn remove_all_plugins(&self) {
        let removed: Vec<Arc<Plugin>> = {
            let mut plugins = self.plugins.write();
            if let Graph::Patchbay(patchbay) = &mut self.rt.lock().graph {
                for plugin in plugins.iter() {
                    patchbay.remove_node(plugin.id());
                }
            }
            plugins.drain(..).collect()
        };
        for plugin in removed {
            plugin.set_enabled(false);
            plugin.set_active(false);
            if let Some(transport) = plugin.transport() {
                transport.shutdown();
            }
            self.callback(EngineCallback::PluginRemoved { id: plugin.id() });
        }
        self.crash_reported.lock().clear();
    }

    pub fn rename_plugin(&self, id: u32, name: &str) -> Result<()> {
        let plugin = self.plugin(id)?;
        plugin.set_name(name);
        self.callback(EngineCallback::PluginRenamed {
            id,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn clone_plugin(&self, id: u32) -> Result<u32> {
        let source = self.plugin(id)?;
        let settings = source.save_settings();
        let new_id = self.add_plugin(source.ptype(), source.filename(), source.label())?;
        self.plugin(new_id)?.load_settings(&settings);
        Ok(new_id)
    }

    /// Replace a plugin with a freshly loaded copy of itself, carrying the
    /// settings over. Keeps the id and table position.
    pub fn replace_plugin(&self, id: u32) -> Result<()> {
        let old = self.plugin(id)?;
        let settings = old.save_settings();
        let options = self.options();
        let instance =
            (self.loader)(old.ptype(), old.filename(), old.label()).ok_or_else(|| {
                EngineError::User(format!("Cannot reload plugin '{}'", old.label()))
            })?;
        let fresh = Arc::new(Plugin::new_local(
            id,
            old.ptype(),
            old.filename(),
            instance,
            Arc::clone(&self.post_rt),
            self.buffer_size(),
            options.max_parameters,
            false,
        ));
        fresh.load_settings(&settings);
        fresh.set_enabled(true);
        {
            let mut plugins = self.plugins.write();
            if let Graph::Patchbay(patchbay) = &mut self.rt.lock().graph {
                patchbay.remove_node(id);
                patchbay.add_node(&fresh);
            }
            plugins[id as usize] = Arc::clone(&fresh);
        }
        old.set_enabled(false);
        old.set_active(false);
        if let Some(transport) = old.transport() {
            transport.shutdown();
        }
        Ok(())
    }

    pub fn switch_plugins(&self, id_a: u32, id_b: u32) -> Result<()> {
        if id_a == id_b {
            return Ok(());
        }
        let mut plugins = self.plugins.write();
        if id_a as usize >= plugins.len() || id_b as usize >= plugins.len() {
            return Err(EngineError::UnknownPlugin(id_a.max(id_b)));
        }
        plugins.swap(id_a as usize, id_b as usize);
        plugins[id_a as usize].set_id(id_a);
        plugins[id_b as usize].set_id(id_b);
        if let Graph::Patchbay(patchbay) = &mut self.rt.lock().graph {
            patchbay.renumber_nodes(&[(id_a, id_b), (id_b, id_a)]);
        }
        Ok(())
    }

    pub fn reset_parameters(&self, id: u32) -> Result<()> {
        let plugin = self.plugin(id)?;
        plugin.set_dry_wet(1.0);
        plugin.set_volume(1.0);
        plugin.set_balance_left(-1.0);
        plugin.set_balance_right(1.0);
        plugin.set_panning(0.0);
        let defaults: Vec<(i32, f32)> = {
            let shared = plugin.master().lock();
            shared
                .params
                .iter()
                .filter(|p| p.data.kind == ParameterKind::Input)
                .map(|p| (p.data.index, p.ranges.fixed_default(p.data.hints)))
                .collect()
        };
        for (index, value) in defaults {
            plugin.set_parameter_value(index, value);
            self.callback(EngineCallback::ParameterValueChanged { id, index, value });
        }
        Ok(())
    }

    /// Deterministic shuffle of the automatable inputs. No wall clock is
    /// read on any engine path, so the generator seeds from the plugin.
    pub fn randomize_parameters(&self, id: u32) -> Result<()> {
        let plugin = self.plugin(id)?;
        let mut seed = 0x9E37_79B9u32 ^ (id.wrapping_add(1) << 7);
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };
        let targets: Vec<(i32, f32, f32)> = {
            let shared = plugin.master().lock();
            shared
                .params
                .iter()
                .filter(|p| {
                    p.data.kind == ParameterKind::Input
                        && p.data.hints & plugrack_core::params::hints::AUTOMABLE != 0
                })
                .map(|p| (p.data.index, p.ranges.min, p.ranges.max))
                .collect()
        };
        for (index, min, max) in targets {
            let unit = next() as f32 / u32::MAX as f32;
            let value = min + unit * (max - min);
            if let Some(fixed) = plugin.set_parameter_value(index, value) {
                self.callback(EngineCallback::ParameterValueChanged {
                    id,
                    index,
                    value: fixed,
                });
            }
        }
        Ok(())
    }

    pub fn set_parameter_value(&self, id: u32, index: i32, value: f32) -> Result<f32> {
        let plugin = self.plugin(id)?;
        let fixed = plugin.set_parameter_value(index, value).ok_or_else(|| {
            EngineError::User(format!("plugin {id} has no parameter {index}"))
        })?;
        self.callback(EngineCallback::ParameterValueChanged {
            id,
            index,
            value: fixed,
        });
        Ok(fixed)
    }

    pub fn send_midi_note(&self, id: u32, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.plugin(id)?.send_midi_note(channel, note, velocity);
        Ok(())
    }

    // -- patchbay ------------------------------------------------------

    pub fn patchbay_connect(
        &self,
        src_group: u32,
        src_port: u32,
        dst_group: u32,
        dst_port: u32,
    ) -> Result<u32> {
        let id = {
            let mut rt = self.rt.lock();
            let Graph::Patchbay(patchbay) = &mut rt.graph else {
                return Err(EngineError::CapabilityMismatch(
                    "patchbay operations require Patchbay mode".into(),
                ));
            };
            patchbay
                .connect(src_group, src_port, dst_group, dst_port)
                .map_err(EngineError::User)?
        };
        self.callback(EngineCallback::PatchbayConnectionAdded {
            id,
            src_group,
            src_port,
            dst_group,
            dst_port,
        });
        Ok(id)
    }

    pub fn patchbay_disconnect(&self, id: u32) -> Result<()> {
        {
            let mut rt = self.rt.lock();
            let Graph::Patchbay(patchbay) = &mut rt.graph else {
                return Err(EngineError::CapabilityMismatch(
                    "patchbay operations require Patchbay mode".into(),
                ));
            };
            patchbay.disconnect(id).map_err(EngineError::User)?;
        }
        self.callback(EngineCallback::PatchbayConnectionRemoved { id });
        Ok(())
    }

    pub fn patchbay_refresh(&self) -> Result<()> {
        let snapshot = {
            let plugins = self.plugins.read();
            let mut rt = self.rt.lock();
            let Graph::Patchbay(patchbay) = &mut rt.graph else {
                return Err(EngineError::CapabilityMismatch(
                    "patchbay operations require Patchbay mode".into(),
                ));
            };
            patchbay.refresh(&plugins)
        };
        if let Some(pipe) = self.ui_pipe() {
            for (group, name) in &snapshot.groups {
                pipe.send_patchbay_group(*group, name);
            }
            for port in &snapshot.ports {
                pipe.send_patchbay_port(
                    port.group,
                    port.port,
                    &port.name,
                    port.is_input,
                    port.is_cv,
                    port.is_event,
                );
            }
            for conn in &snapshot.connections {
                pipe.send_patchbay_connection(
                    conn.id,
                    conn.src_group,
                    conn.src_port,
                    conn.dst_group,
                    conn.dst_port,
                );
            }
        }
        Ok(())
    }

    // -- project state -------------------------------------------------

    fn snapshot_project(&self) -> ProjectDocument {
        ProjectDocument {
            version: PROJECT_FORMAT_VERSION,
            options: self.options(),
            transport: self.time_info(),
            plugins: self
                .plugins
                .read()
                .iter()
                .map(|plugin| plugin.save_settings())
                .collect(),
        }
    }

    /// Serialize the full engine configuration and every plugin's state.
    pub fn get_state(&self) -> String {
        // Bridged plugins flush their state first; the idle pump keeps the
        // UI pipe alive while they do.
        let plugins: Vec<Arc<Plugin>> = self.plugins.read().clone();
        for plugin in &plugins {
            if plugin.is_bridged() {
                plugin.prepare_for_save(|| self.ui_idle());
            }
        }
        self.snapshot_project().to_text()
    }

    /// Replace the whole engine state with a saved document.
    pub fn set_state(&self, text: &str) -> Result<()> {
        let doc = ProjectDocument::from_text(text).map_err(EngineError::StateRejected)?;
        self.remove_all_plugins();
        self.stop_background();
        self.start_background();
        self.options_forced.raise();
        {
            let mut options = self.options.lock();
            let process_mode = options.process_mode;
            *options = doc.options.clone();
            // The graph implementation cannot change after init.
            options.process_mode = process_mode;
        }
        *self.time.lock() = doc.transport;
        self.load_plugin_list(&doc.plugins)
    }

    fn load_plugin_list(&self, list: &[PluginSettings]) -> Result<()> {
        for settings in list {
            let id = self.add_plugin(settings.ptype, &settings.filename, &settings.label)?;
            self.plugin(id)?.load_settings(settings);
        }
        Ok(())
    }

    pub fn load_project_file(&self, path: &PathBuf) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.set_state(&text)
    }

    pub fn save_project_file(&self, path: &PathBuf) -> Result<()> {
        std::fs::write(path, self.get_state())?;
        Ok(())
    }

    // -- background thread ---------------------------------------------

    fn start_background(&self) {
        let weak = self.self_weak.lock().clone();
        let (tx, rx) = crossbeam_channel::unbounded();
        let join = std::thread::Builder::new()
            .name("plugrack-background".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let Some(engine) = weak.upgrade() else {
                        return;
                    };
                    match job {
                        BackgroundJob::LoadProjectFile(path) => {
                            if let Err(err) = engine.load_project_file(&path) {
                                engine.set_last_error(&err.to_string());
                                engine.callback(EngineCallback::Error {
                                    message: err.to_string(),
                                });
                            }
                        }
                        BackgroundJob::SaveProjectFile(path) => {
                            if let Err(err) = engine.save_project_file(&path) {
                                engine.set_last_error(&err.to_string());
                                engine.callback(EngineCallback::Error {
                                    message: err.to_string(),
                                });
                            }
                        }
                        BackgroundJob::Quit => return,
                    }
                }
            })
            .expect("failed to spawn background thread");
        *self.background.lock() = Some(BackgroundHandle {
            tx,
            join: Some(join),
        });
    }

    fn stop_background(&self) {
        if let Some(mut handle) = self.background.lock().take() {
            let _ = handle.tx.send(BackgroundJob::Quit);
            if let Some(join) = handle.join.take() {
                // A project load running ON the background thread restarts
                // it; joining ourselves would deadlock, and dropping the
                // sender already ends the old loop.
                if join.thread().id() != std::thread::current().id() {
                    let _ = join.join();
                }
            }
        }
    }

    // -- UI ------------------------------------------------------------

    /// Attach an already-connected pipe (tests, embedded UIs). Transitions
    /// straight to Show and sends the full snapshot.
    pub fn attach_ui_pipe(&self, pipe: UiPipe) {
        {
            let mut ui = self.ui.lock();
            ui.pipe = Some(Arc::new(pipe));
            ui.state = UiState::Show;
        }
        self.send_ui_snapshot();
    }

    pub fn ui_show(&self, show: bool) {
        if show {
            let spawned = {
                let mut ui = self.ui.lock();
                if ui.pipe.is_some() {
                    ui.state = UiState::Show;
                    true
                } else {
                    let binary = {
                        let options = self.options.lock();
                        options.binary_dir.as_ref().map(|dir| dir.join("plugrack-ui"))
                    };
                    match binary.and_then(|b| UiPipe::spawn_helper(&b, &[]).ok()) {
                        Some(pipe) => {
                            ui.pipe = Some(Arc::new(pipe));
                            ui.state = UiState::Show;
                            true
                        }
                        None => {
                            ui.state = UiState::Crashed;
                            false
                        }
                    }
                }
            };
            if spawned {
                self.send_ui_snapshot();
            } else {
                self.callback(EngineCallback::UiUnavailable);
            }
        } else {
            {
                let mut ui = self.ui.lock();
                if let Some(pipe) = ui.pipe.take() {
                    pipe.kill_helper();
                }
                ui.state = UiState::Hide;
            }
            self.callback(EngineCallback::UiClosed);
        }
    }

    fn send_ui_snapshot(&self) {
        let Some(pipe) = self.ui_pipe() else {
            return;
        };
        pipe.send_engine_info(MAX_PLUGINS as u32, self.buffer_size(), self.sample_rate());
        {
            let options = self.options.lock();
            let forced = self.options_forced.get();
            for id in EngineOptionId::ALL {
                pipe.send_engine_option(id as u32, forced, &options.value_string(id));
            }
        }
        for plugin in self.plugins.read().iter() {
            self.send_plugin_snapshot(&pipe, plugin);
        }
    }

    fn send_plugin_snapshot(&self, pipe: &UiPipe, plugin: &Plugin) {
        use crate::uipipe::fmt_f32;
        let id = plugin.id();
        let shared = plugin.master().lock();
        {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("PLUGIN_INFO_{id}"));
            w.write_msg(plugin.ptype().as_str());
            w.write_msg(&shared.category.to_u32().to_string());
            w.write_msg(&plugin.hints().to_string());
            w.write_msg(&shared.unique_id.to_string());
            w.write_and_fix_msg(plugin.filename());
            w.write_and_fix_msg(&shared.name);
            w.write_and_fix_msg(plugin.label());
            w.write_and_fix_msg(&shared.maker);
            w.write_and_fix_msg(&shared.copyright);
            w.write_and_fix_msg(plugin.icon_name());

            w.write_msg(&format!("PARAMETER_COUNT_{id}"));
            w.write_msg(&shared.params.len().to_string());
            w.flush_msgs();
        }
        for param in &shared.params {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("PARAMETER_DATA_{id}:{}", param.data.index));
            w.write_msg(&match param.data.kind {
                ParameterKind::Input => 0u32,
                ParameterKind::Output => 1,
                ParameterKind::Special => 2,
            }
            .to_string());
            w.write_msg(&param.data.hints.to_string());
            w.write_msg(&param.data.rindex.to_string());
            w.write_msg(&param.data.midi_channel.to_string());
            w.write_msg(&param.data.midi_cc.to_string());
            w.write_and_fix_msg(&param.name);
            w.write_and_fix_msg(&param.unit);
            w.write_msg(&fmt_f32(param.value));

            w.write_msg(&format!("PARAMETER_RANGES_{id}:{}", param.data.index));
            w.write_msg(&fmt_f32(param.ranges.def));
            w.write_msg(&fmt_f32(param.ranges.min));
            w.write_msg(&fmt_f32(param.ranges.max));
            w.write_msg(&fmt_f32(param.ranges.step));
            w.write_msg(&fmt_f32(param.ranges.step_small));
            w.write_msg(&fmt_f32(param.ranges.step_large));
            w.flush_msgs();
        }
        {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("PROGRAM_COUNT_{id}"));
            w.write_msg(&shared.programs.len().to_string());
            w.write_msg(&shared.current_program.to_string());
            w.flush_msgs();
        }
        for (at, name) in shared.programs.iter().enumerate() {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("PROGRAM_NAME_{id}:{at}"));
            w.write_and_fix_msg(name);
            w.flush_msgs();
        }
        {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("MIDI_PROGRAM_COUNT_{id}"));
            w.write_msg(&shared.midi_programs.len().to_string());
            w.write_msg(&shared.current_midi_program.to_string());
            w.flush_msgs();
        }
        for (at, mp) in shared.midi_programs.iter().enumerate() {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("MIDI_PROGRAM_DATA_{id}:{at}"));
            w.write_msg(&mp.bank.to_string());
            w.write_msg(&mp.program.to_string());
            w.write_and_fix_msg(&mp.name);
            w.flush_msgs();
        }
        // Only `Property` entries are meant for the UI.
        for (at, cd) in shared
            .custom_data
            .iter()
            .filter(|cd| cd.dtype == plugrack_plugin::plugin::CUSTOM_DATA_TYPE_PROPERTY)
            .enumerate()
        {
            let mut w = pipe.write_lock();
            w.write_msg(&format!("CUSTOM_DATA_{id}:{at}"));
            w.write_and_fix_msg(&cd.dtype);
            w.write_and_fix_msg(&cd.key);
            w.write_and_fix_msg(&cd.value);
            w.flush_msgs();
        }
    }

    // -- idle ----------------------------------------------------------

    /// Main-thread idle pump, called by the outer host.
    pub fn ui_idle(&self) {
        // 1. Plugin UI idling, panics contained per plugin.
        let plugins: Vec<Arc<Plugin>> = self.plugins.read().clone();
        for plugin in &plugins {
            let wanted = hints::HAS_CUSTOM_UI | hints::NEEDS_UI_MAIN_THREAD;
            if plugin.hints() & wanted == wanted {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    plugin.ui_idle();
                }));
                if result.is_err() {
                    tracing::warn!(plugin = plugin.id(), "plugin ui_idle panicked");
                }
            }
        }

        // 2. UI pipe pump: inbound batch first, then the periodic frames.
        self.pump_ui_commands();
        if let Some(pipe) = self.ui_pipe() {
            if pipe.helper_exited() {
                let crashed = {
                    let mut ui = self.ui.lock();
                    if ui.state != UiState::Crashed {
                        ui.state = UiState::Crashed;
                        ui.pipe = None;
                        true
                    } else {
                        false
                    }
                };
                if crashed {
                    self.callback(EngineCallback::UiUnavailable);
                }
            } else {
                let time = self.time_info();
                let bbt = time.bbt.unwrap_or_default();
                pipe.send_runtime_info(0.0, self.xruns());
                pipe.send_transport(
                    time.playing,
                    time.frame,
                    bbt.bar,
                    bbt.beat,
                    bbt.tick,
                    bbt.beats_per_minute,
                );
                for plugin in &plugins {
                    pipe.send_peaks(plugin.id(), plugin.peaks.snapshot());
                    plugin.refresh_output_parameters();
                    let outputs: Vec<(i32, f32)> = {
                        let shared = plugin.master().lock();
                        shared
                            .params
                            .iter()
                            .filter(|p| p.data.kind == ParameterKind::Output)
                            .map(|p| (p.data.index, p.value))
                            .collect()
                    };
                    for (index, value) in outputs {
                        pipe.send_param_val(plugin.id(), index, value);
                    }
                }
            }
        }

        // 3. Post-RT events.
        self.drain_post_rt();

        // 4. Bridged plugin supervision.
        self.idle_bridges(&plugins);
    }

    fn drain_post_rt(&self) {
        self.post_rt.splice();
        let mut scratch = self.post_rt_scratch.lock();
        scratch.clear();
        self.post_rt.take_ready(&mut scratch);
        for event in scratch.iter() {
            if !event.send_callback {
                continue;
            }
            let cb = match event.kind {
                PostRtEventKind::ParameterChanged => EngineCallback::ParameterValueChanged {
                    id: event.plugin_id,
                    index: event.value1,
                    value: event.valuef,
                },
                PostRtEventKind::ProgramChanged => EngineCallback::ProgramChanged {
                    id: event.plugin_id,
                    index: event.value1,
                },
                PostRtEventKind::MidiProgramChanged => EngineCallback::MidiProgramChanged {
                    id: event.plugin_id,
                    index: event.value1,
                },
                PostRtEventKind::NoteOn => EngineCallback::NoteOn {
                    id: event.plugin_id,
                    channel: event.value1 as u8,
                    note: event.value2 as u8,
                    velocity: event.value3 as u8,
                },
                PostRtEventKind::NoteOff => EngineCallback::NoteOff {
                    id: event.plugin_id,
                    channel: event.value1 as u8,
                    note: event.value2 as u8,
                },
                PostRtEventKind::LatencyChanged => EngineCallback::LatencyChanged {
                    id: event.plugin_id,
                    frames: event.value1 as u32,
                },
            };
            if let EngineCallback::ParameterValueChanged { id, index, value } = &cb {
                if let Some(pipe) = self.ui_pipe() {
                    pipe.send_param_val(*id, *index, *value);
                }
            }
            self.callback(cb);
        }
    }

    fn idle_bridges(&self, plugins: &[Arc<Plugin>]) {
        let timeout_ms = self.options.lock().ui_bridges_timeout;
        let buffer_size = self.buffer_size();
        let mut messages = Vec::new();
        for plugin in plugins {
            let Some(transport) = plugin.transport() else {
                continue;
            };
            messages.clear();
            if transport.fetch_server_messages(&mut messages).is_err() {
                self.report_bridge_crash(plugin);
                continue;
            }
            for msg in &messages {
                if matches!(msg, plugrack_plugin::ServerMessage::UiClosed) {
                    self.callback(EngineCallback::UiStateChanged {
                        id: plugin.id(),
                        state: 0,
                    });
                }
                plugin.apply_server_message(msg, buffer_size);
            }
            if !transport.ping_and_check(timeout_ms) {
                self.report_bridge_crash(plugin);
            }
        }
    }

    /// Exactly one crash report per plugin; the plugin stays visible but
    /// disabled.
    fn report_bridge_crash(&self, plugin: &Arc<Plugin>) {
        if !self.crash_reported.lock().insert(plugin.id()) {
            return;
        }
        plugin.set_active(false);
        plugin.set_enabled(false);
        let message = format!(
            "Plugin '{}' has crashed! Saving now will lose its current settings.",
            plugin.name()
        );
        self.set_last_error(&message);
        self.callback(EngineCallback::Error { message });
    }

    fn pump_ui_commands(&self) {
        let Some(pipe) = self.ui_pipe() else {
            return;
        };
        // One bounded batch per tick.
        for _ in 0..MAX_INTERNAL_EVENT_COUNT {
            let Some(parsed) = pipe.read_command() else {
                break;
            };
            let result = match parsed {
                Ok(command) => self.execute_ui_command(&pipe, command),
                Err(text) => Err(EngineError::User(text)),
            };
            if let Err(err) = result {
                self.set_last_error(&err.to_string());
                pipe.send_error(&err.to_string());
            }
        }
    }

    fn execute_ui_command(&self, pipe: &UiPipe, command: UiCommand) -> Result<()> {
        match command {
            UiCommand::SetEngineOption { option, value } => {
                let id = EngineOptionId::from_u32(option)
                    .ok_or_else(|| EngineError::User(format!("unknown engine option {option}")))?;
                self.set_option(id, &value)?;
            }
            UiCommand::ClearEngineXruns => self.clear_xruns(),
            UiCommand::CancelEngineAction => {
                // Project loads run to completion on the background thread;
                // there is no partial state to abandon.
            }
            UiCommand::LoadFile { path } | UiCommand::LoadProject { path } => {
                if let Some(handle) = &*self.background.lock() {
                    let _ = handle
                        .tx
                        .send(BackgroundJob::LoadProjectFile(PathBuf::from(path)));
                }
            }
            UiCommand::SaveProject { path } => {
                let path = PathBuf::from(path);
                self.ui.lock().project_filename = Some(path.clone());
                if let Some(handle) = &*self.background.lock() {
                    let _ = handle.tx.send(BackgroundJob::SaveProjectFile(path));
                }
            }
            UiCommand::ClearProjectFilename => {
                self.ui.lock().project_filename = None;
            }
            UiCommand::PatchbayConnect {
                src_group,
                src_port,
                dst_group,
                dst_port,
            } => {
                self.patchbay_connect(src_group, src_port, dst_group, dst_port)?;
            }
            UiCommand::PatchbayDisconnect { id } => self.patchbay_disconnect(id)?,
            UiCommand::PatchbayRefresh => self.patchbay_refresh()?,
            UiCommand::TransportPlay => self.transport_play(),
            UiCommand::TransportPause => self.transport_pause(),
            UiCommand::TransportBpm { bpm } => self.transport_bpm(bpm),
            UiCommand::TransportRelocate { frame } => self.transport_relocate(frame),
            UiCommand::AddPlugin {
                ptype,
                filename,
                label,
            } => {
                let ptype = PluginType::from_str_opt(&ptype)
                    .ok_or_else(|| EngineError::User(format!("unknown plugin type '{ptype}'")))?;
                self.add_plugin(ptype, &filename, &label)?;
            }
            UiCommand::RemovePlugin { id } => self.remove_plugin(id)?,
            UiCommand::RemoveAllPlugins => self.remove_all_plugins(),
            UiCommand::RenamePlugin { id, name } => self.rename_plugin(id, &name)?,
            UiCommand::ClonePlugin { id } => {
                self.clone_plugin(id)?;
            }
            UiCommand::ReplacePlugin { id } => self.replace_plugin(id)?,
            UiCommand::SwitchPlugins { id_a, id_b } => self.switch_plugins(id_a, id_b)?,
            UiCommand::LoadPluginState { id, path } => {
                let text = std::fs::read_to_string(path)?;
                let settings: PluginSettings = serde_json::from_str(&text)
                    .map_err(|e| EngineError::StateRejected(e.to_string()))?;
                self.plugin(id)?.load_settings(&settings);
            }
            UiCommand::SavePluginState { id, path } => {
                let plugin = self.plugin(id)?;
                if plugin.is_bridged() {
                    plugin.prepare_for_save(|| {});
                }
                let text = serde_json::to_string_pretty(&plugin.save_settings())
                    .map_err(|e| EngineError::StateRejected(e.to_string()))?;
                std::fs::write(path, text)?;
            }
            UiCommand::SetOption { id, option, yes } => {
                self.plugin(id)?.set_option(option, yes);
            }
            UiCommand::SetActive { id, active } => self.plugin(id)?.set_active(active),
            UiCommand::SetDryWet { id, value } => {
                let fixed = self.plugin(id)?.set_dry_wet(value);
                pipe.send_param_val(id, params::PARAMETER_DRYWET, fixed);
            }
            UiCommand::SetVolume { id, value } => {
                let fixed = self.plugin(id)?.set_volume(value);
                pipe.send_param_val(id, params::PARAMETER_VOLUME, fixed);
            }
            UiCommand::SetBalanceLeft { id, value } => {
                let fixed = self.plugin(id)?.set_balance_left(value);
                pipe.send_param_val(id, params::PARAMETER_BALANCE_LEFT, fixed);
            }
            UiCommand::SetBalanceRight { id, value } => {
                let fixed = self.plugin(id)?.set_balance_right(value);
                pipe.send_param_val(id, params::PARAMETER_BALANCE_RIGHT, fixed);
            }
            UiCommand::SetPanning { id, value } => {
                let fixed = self.plugin(id)?.set_panning(value);
                pipe.send_param_val(id, params::PARAMETER_PANNING, fixed);
            }
            UiCommand::SetCtrlChannel { id, channel } => {
                self.plugin(id)?.set_ctrl_channel(channel);
            }
            UiCommand::SetParameterValue { id, index, value } => {
                let fixed = self.set_parameter_value(id, index, value)?;
                pipe.send_param_val(id, index, fixed);
            }
            UiCommand::SetParameterMidiChannel { id, index, channel } => {
                self.plugin(id)?.set_parameter_midi_channel(index, channel);
                self.callback(EngineCallback::ParameterMidiChannelChanged {
                    id,
                    index: index as i32,
                    channel,
                });
            }
            UiCommand::SetParameterMidiCc { id, index, cc } => {
                self.plugin(id)?.set_parameter_midi_cc(index, cc);
                self.callback(EngineCallback::ParameterMidiCcChanged {
                    id,
                    index: index as i32,
                    cc,
                });
            }
            UiCommand::SetParameterTouch { .. } => {
                // Touch tracking only matters to automation recorders; the
                // embedded host has none.
            }
            UiCommand::SetProgram { id, index } => {
                self.plugin(id)?.set_program(index);
                self.callback(EngineCallback::ProgramChanged { id, index });
            }
            UiCommand::SetMidiProgram { id, index } => {
                self.plugin(id)?.set_midi_program(index);
                self.callback(EngineCallback::MidiProgramChanged { id, index });
            }
            UiCommand::SetCustomData {
                id,
                dtype,
                key,
                value,
            } => {
                self.plugin(id)?.put_custom_data(&dtype, &key, &value, true);
            }
            UiCommand::SetChunkData { id, data } => {
                self.plugin(id)?.set_chunk(data.as_bytes());
            }
            UiCommand::PrepareForSave { id } => {
                self.plugin(id)?.prepare_for_save(|| {});
            }
            UiCommand::ResetParameters { id } => self.reset_parameters(id)?,
            UiCommand::RandomizeParameters { id } => self.randomize_parameters(id)?,
            UiCommand::SendMidiNote {
                id,
                channel,
                note,
                velocity,
            } => self.send_midi_note(id, channel, note, velocity)?,
            UiCommand::ShowCustomUi { id, show } => {
                self.plugin(id)?.show_ui(show);
            }
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_background();
    }
}
