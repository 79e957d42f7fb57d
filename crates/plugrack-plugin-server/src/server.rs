//! The serve loop.

use plugrack_core::events::{EngineEvent, EngineEventKind, MidiData, MAX_INTERNAL_EVENT_COUNT};
use plugrack_core::events::{MIDI_STATUS_NOTE_OFF, MIDI_STATUS_NOTE_ON};
use plugrack_core::{CtrlEvent, CtrlEventKind, ParameterKind};
use plugrack_plugin::instance::{PluginInstance, ProcessArgs};
use plugrack_plugin::protocol::{
    BridgeNonRtClientData, BridgeNonRtServerData, BridgeRtClientData, NonRtClientOpcode,
    NonRtServerOpcode, RtClientOpcode, RT_MIDI_OUT_SIZE,
};
use plugrack_plugin::ring::{BIG_RING_SIZE, HUGE_RING_SIZE, SMALL_RING_SIZE};
use plugrack_plugin::shm::{
    region_file_name, SharedAudioPool, SharedMemory, REGION_AUDIO_POOL, REGION_NON_RT_CLIENT,
    REGION_NON_RT_SERVER, REGION_RT_CLIENT,
};
use smallvec::SmallVec;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Bad ENGINE_BRIDGE_SHM_IDS value '{0}'")]
    BadShmIds(String),

    #[error("Shared memory: {0}")]
    Shm(#[from] plugrack_plugin::error::BridgeError),

    #[error("Ring size mismatch: client compiled with {client}, server with {server}")]
    RingSizeMismatch { client: u32, server: u32 },
}

/// Queued UI-injected note.
type PendingNotes = SmallVec<[(u8, u8, u8); 16]>;

pub struct BridgeServer {
    pool: SharedAudioPool,
    rt_region: SharedMemory,
    nonrt_client_region: SharedMemory,
    nonrt_server_region: SharedMemory,

    instance: Box<dyn PluginInstance>,
    buffer_size: u32,
    active: bool,
    quit: bool,

    staged_events: Vec<EngineEvent>,
    events_out: Vec<EngineEvent>,
    pending_notes: PendingNotes,
    audio_in_bufs: Vec<Vec<f32>>,
    audio_out_bufs: Vec<Vec<f32>>,
    cv_in_bufs: Vec<Vec<f32>>,
    cv_out_bufs: Vec<Vec<f32>>,
}

impl BridgeServer {
    /// Attach to the client's regions and consume the seed frame.
    pub fn attach(shm_ids: &str, instance: Box<dyn PluginInstance>) -> Result<Self, ServerError> {
        if shm_ids.len() != 24 {
            return Err(ServerError::BadShmIds(shm_ids.into()));
        }
        let suffix = |i: usize| &shm_ids[i * 6..(i + 1) * 6];

        let pool = SharedAudioPool::attach(
            &region_file_name(REGION_AUDIO_POOL, suffix(0)),
            instance.audio_in_count(),
            instance.audio_out_count(),
            instance.cv_in_count(),
            instance.cv_out_count(),
            0,
        )?;
        let rt_region = SharedMemory::attach(&region_file_name(REGION_RT_CLIENT, suffix(1)))?;
        let nonrt_client_region =
            SharedMemory::attach(&region_file_name(REGION_NON_RT_CLIENT, suffix(2)))?;
        let nonrt_server_region =
            SharedMemory::attach(&region_file_name(REGION_NON_RT_SERVER, suffix(3)))?;

        let mut server = Self {
            pool,
            rt_region,
            nonrt_client_region,
            nonrt_server_region,
            instance,
            buffer_size: 0,
            active: false,
            quit: false,
            staged_events: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
            events_out: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
            pending_notes: SmallVec::new(),
            audio_in_bufs: Vec::new(),
            audio_out_bufs: Vec::new(),
            cv_in_bufs: Vec::new(),
            cv_out_bufs: Vec::new(),
        };
        // The first frames on the non-RT ring are Null + the ring sizes,
        // then the initial buffer size and sample rate.
        server.drain_non_rt()?;
        Ok(server)
    }

    // The returned references carry a caller-chosen lifetime: they point
    // into the mappings, which outlive every use inside the serve loop, and
    // must not be tied to `&self` or the loop could never mutate the
    // instance while holding a ring.
    fn rt<'a>(&self) -> &'a BridgeRtClientData {
        unsafe { &*self.rt_region.view::<BridgeRtClientData>() }
    }

    fn client_ring<'a>(&self) -> &'a plugrack_plugin::ring::RingBufferData<BIG_RING_SIZE> {
        unsafe { &(*self.nonrt_client_region.view::<BridgeNonRtClientData>()).ring }
    }

    fn server_ring<'a>(&self) -> &'a plugrack_plugin::ring::RingBufferData<HUGE_RING_SIZE> {
        unsafe { &(*self.nonrt_server_region.view::<BridgeNonRtServerData>()).ring }
    }

    fn resize_buffers(&mut self, frames: u32) {
        self.buffer_size = frames;
        let frames = frames as usize;
        self.audio_in_bufs =
            vec![vec![0.0; frames]; self.instance.audio_in_count() as usize];
        self.audio_out_bufs =
            vec![vec![0.0; frames]; self.instance.audio_out_count() as usize];
        self.cv_in_bufs = vec![vec![0.0; frames]; self.instance.cv_in_count() as usize];
        self.cv_out_bufs = vec![vec![0.0; frames]; self.instance.cv_out_count() as usize];
        self.instance.set_buffer_size(self.buffer_size);
    }

    /// Describe the hosted plugin to the client, finishing with `Ready`.
    pub fn describe(&mut self) -> Result<(), ServerError> {
        let ring = self.server_ring();
        let info = self.instance.info().clone();

        ring.write_opcode(NonRtServerOpcode::PluginInfo1.into());
        ring.write_u32(info.category.to_u32());
        ring.write_u32(self.instance_hints());
        ring.write_i64(info.unique_id);

        ring.write_opcode(NonRtServerOpcode::PluginInfo2.into());
        ring.write_str(&info.name);
        ring.write_str(&info.label);
        ring.write_str(&info.maker);
        ring.write_str(&info.copyright);

        ring.write_opcode(NonRtServerOpcode::AudioCount.into());
        ring.write_u32(self.instance.audio_in_count());
        ring.write_u32(self.instance.audio_out_count());
        ring.write_u32(self.instance.cv_in_count());
        ring.write_u32(self.instance.cv_out_count());

        ring.write_opcode(NonRtServerOpcode::MidiCount.into());
        ring.write_u32(u32::from(self.instance.wants_midi_in() || self.instance.is_synth()));
        ring.write_u32(u32::from(self.instance.produces_midi_out()));

        let count = self.instance.parameter_count();
        ring.write_opcode(NonRtServerOpcode::ParameterCount.into());
        ring.write_u32(count);
        for index in 0..count {
            let data = self.instance.parameter_data(index);
            let ranges = self.instance.parameter_ranges(index);
            ring.write_opcode(NonRtServerOpcode::ParameterData1.into());
            ring.write_u32(index);
            ring.write_i32(data.rindex);
            ring.write_u32(match data.kind {
                ParameterKind::Input => 0,
                ParameterKind::Output => 1,
                ParameterKind::Special => 2,
            });
            ring.write_u32(data.hints);
            ring.write_u8(data.midi_channel);
            ring.write_i16(data.midi_cc);
            ring.write_opcode(NonRtServerOpcode::ParameterData2.into());
            ring.write_u32(index);
            ring.write_str(&self.instance.parameter_name(index));
            ring.write_str(&self.instance.parameter_unit(index));
            ring.write_opcode(NonRtServerOpcode::ParameterRanges1.into());
            ring.write_u32(index);
            ring.write_f32(ranges.def);
            ring.write_f32(ranges.min);
            ring.write_f32(ranges.max);
            ring.write_opcode(NonRtServerOpcode::ParameterRanges2.into());
            ring.write_u32(index);
            ring.write_f32(ranges.step);
            ring.write_f32(ranges.step_small);
            ring.write_f32(ranges.step_large);
            ring.write_opcode(NonRtServerOpcode::ParameterValue.into());
            ring.write_u32(index);
            ring.write_f32(self.instance.parameter_value(index));
        }

        let programs = self.instance.program_count();
        ring.write_opcode(NonRtServerOpcode::ProgramCount.into());
        ring.write_u32(programs);
        for index in 0..programs {
            ring.write_opcode(NonRtServerOpcode::ProgramName.into());
            ring.write_u32(index);
            ring.write_str(&self.instance.program_name(index));
        }

        let midi_programs = self.instance.midi_program_count();
        ring.write_opcode(NonRtServerOpcode::MidiProgramCount.into());
        ring.write_u32(midi_programs);
        for index in 0..midi_programs {
            let mp = self.instance.midi_program_data(index);
            ring.write_opcode(NonRtServerOpcode::MidiProgramData.into());
            ring.write_u32(index);
            ring.write_u32(mp.bank);
            ring.write_u32(mp.program);
            ring.write_str(&mp.name);
        }

        let latency = self.instance.latency();
        if latency > 0 {
            ring.write_opcode(NonRtServerOpcode::SetLatency.into());
            ring.write_u32(latency);
        }

        ring.write_opcode(NonRtServerOpcode::Ready.into());
        ring.commit_write();
        Ok(())
    }

    fn instance_hints(&self) -> u32 {
        use plugrack_plugin::plugin::hints;
        let mut bits = hints::IS_BRIDGE;
        let audio_in = self.instance.audio_in_count();
        let audio_out = self.instance.audio_out_count();
        if audio_in > 0 && audio_out > 0 {
            bits |= hints::CAN_DRYWET;
        }
        if audio_out > 0 {
            bits |= hints::CAN_VOLUME;
        }
        if audio_out >= 2 {
            bits |= hints::CAN_BALANCE;
        }
        if self.instance.uses_chunks() {
            bits |= hints::USES_CHUNKS;
        }
        if self.instance.is_synth() {
            bits |= hints::IS_SYNTH;
        }
        if self.instance.has_custom_ui() {
            bits |= hints::HAS_CUSTOM_UI;
        }
        bits
    }

    fn send_pong(&self) {
        let ring = self.server_ring();
        ring.write_opcode(NonRtServerOpcode::Pong.into());
        ring.commit_write();
    }

    fn send_saved(&self) {
        let ring = self.server_ring();
        ring.write_opcode(NonRtServerOpcode::Saved.into());
        ring.commit_write();
    }

    pub fn send_error(&self, message: &str) {
        let ring = self.server_ring();
        ring.write_opcode(NonRtServerOpcode::Error.into());
        ring.write_str(message);
        ring.commit_write();
    }

    /// Handle everything currently queued on the non-RT client ring.
    pub fn drain_non_rt(&mut self) -> Result<(), ServerError> {
        loop {
            let ring = self.client_ring();
            if !ring.is_data_available_for_reading() {
                return Ok(());
            }
            let raw = ring.read_opcode();
            let Ok(opcode) = NonRtClientOpcode::try_from(raw) else {
                tracing::error!(raw, "unknown non-rt opcode, quitting");
                self.quit = true;
                return Ok(());
            };
            match opcode {
                NonRtClientOpcode::Null => {
                    // The seed frame: the three ring sizes follow.
                    if ring.readable_len() >= 12 {
                        let small = ring.read_u32().unwrap_or(0);
                        let _big = ring.read_u32().unwrap_or(0);
                        let _huge = ring.read_u32().unwrap_or(0);
                        if small != SMALL_RING_SIZE as u32 {
                            return Err(ServerError::RingSizeMismatch {
                                client: small,
                                server: SMALL_RING_SIZE as u32,
                            });
                        }
                    }
                }
                NonRtClientOpcode::SetAudioPoolSize => {
                    let _bytes = ring.read_u64().unwrap_or(0);
                    let buffer_size = self.buffer_size;
                    self.pool.reattach(buffer_size)?;
                }
                NonRtClientOpcode::SetBufferSize => {
                    let frames = ring.read_u32().unwrap_or(0);
                    self.resize_buffers(frames);
                    let buffer_size = self.buffer_size;
                    let _ = self.pool.reattach(buffer_size);
                }
                NonRtClientOpcode::SetSampleRate => {
                    let rate = ring.read_f64().unwrap_or(0.0);
                    self.instance.set_sample_rate(rate);
                }
                NonRtClientOpcode::SetOffline | NonRtClientOpcode::SetOnline => {}
                NonRtClientOpcode::SetOption => {
                    let _option = ring.read_u32();
                    let _yes = ring.read_bool();
                }
                NonRtClientOpcode::SetCtrlChannel => {
                    let _channel = ring.read_i16();
                }
                NonRtClientOpcode::SetParameterValue => {
                    let index = ring.read_i32().unwrap_or(-1);
                    let value = ring.read_f32().unwrap_or(0.0);
                    if index >= 0 {
                        self.instance.set_parameter_value(index as u32, value);
                    }
                }
                NonRtClientOpcode::SetParameterMidiChannel
                | NonRtClientOpcode::SetParameterMidiCC => {
                    let _index = ring.read_u32();
                    if opcode == NonRtClientOpcode::SetParameterMidiChannel {
                        let _channel = ring.read_u8();
                    } else {
                        let _cc = ring.read_i16();
                    }
                }
                NonRtClientOpcode::SetProgram => {
                    let index = ring.read_i32().unwrap_or(-1);
                    self.instance.set_program(index);
                    self.report_parameter_values();
                }
                NonRtClientOpcode::SetMidiProgram => {
                    let index = ring.read_i32().unwrap_or(-1);
                    if index >= 0 {
                        let mp = self.instance.midi_program_data(index as u32);
                        self.instance.set_midi_program(mp.bank, mp.program);
                    }
                }
                NonRtClientOpcode::SetCustomData => {
                    let dtype = ring.read_str().unwrap_or_default();
                    let key = ring.read_str().unwrap_or_default();
                    let value = ring.read_str().unwrap_or_default();
                    self.instance.set_custom_data(&dtype, &key, &value);
                }
                NonRtClientOpcode::SetChunkDataFile => {
                    let path = ring.read_str().unwrap_or_default();
                    if let Ok(data) = std::fs::read(&path) {
                        self.instance.set_chunk(&data);
                        let _ = std::fs::remove_file(&path);
                    }
                }
                NonRtClientOpcode::PrepareForSave => {
                    let chunk = self.instance.chunk();
                    if !chunk.is_empty() {
                        let path = std::env::temp_dir()
                            .join(format!("plugrack-bridge-save-{}", std::process::id()));
                        if std::fs::write(&path, &chunk).is_ok() {
                            let ring = self.server_ring();
                            ring.write_opcode(NonRtServerOpcode::SetChunkDataFile.into());
                            ring.write_str(&path.display().to_string());
                            ring.commit_write();
                        }
                    }
                    self.send_saved();
                }
                NonRtClientOpcode::Activate => {
                    self.instance.activate();
                    self.active = true;
                }
                NonRtClientOpcode::Deactivate => {
                    self.instance.deactivate();
                    self.active = false;
                }
                NonRtClientOpcode::ShowUI => self.instance.show_ui(true),
                NonRtClientOpcode::HideUI => self.instance.show_ui(false),
                NonRtClientOpcode::Ping => self.send_pong(),
                NonRtClientOpcode::UiParameterChange => {
                    let index = ring.read_u32().unwrap_or(0);
                    let value = ring.read_f32().unwrap_or(0.0);
                    self.instance.set_parameter_value(index, value);
                }
                NonRtClientOpcode::UiProgramChange => {
                    let index = ring.read_u32().unwrap_or(0);
                    self.instance.set_program(index as i32);
                }
                NonRtClientOpcode::UiMidiProgramChange => {
                    let index = ring.read_u32().unwrap_or(0);
                    let mp = self.instance.midi_program_data(index);
                    self.instance.set_midi_program(mp.bank, mp.program);
                }
                NonRtClientOpcode::UiNoteOn => {
                    let channel = ring.read_u8().unwrap_or(0);
                    let note = ring.read_u8().unwrap_or(0);
                    let velocity = ring.read_u8().unwrap_or(0);
                    self.pending_notes.push((channel, note, velocity));
                }
                NonRtClientOpcode::UiNoteOff => {
                    let channel = ring.read_u8().unwrap_or(0);
                    let note = ring.read_u8().unwrap_or(0);
                    self.pending_notes.push((channel, note, 0));
                }
                NonRtClientOpcode::Quit => {
                    self.quit = true;
                    return Ok(());
                }
            }
        }
    }

    fn report_parameter_values(&self) {
        let ring = self.server_ring();
        for index in 0..self.instance.parameter_count() {
            ring.write_opcode(NonRtServerOpcode::ParameterValue.into());
            ring.write_u32(index);
            ring.write_f32(self.instance.parameter_value(index));
        }
        ring.commit_write();
    }

    /// Handle everything currently queued on the RT ring. Returns true if a
    /// `Process` rendezvous was completed.
    pub fn drain_rt(&mut self) -> bool {
        let mut processed = false;
        loop {
            let rt = self.rt();
            if !rt.ring.is_data_available_for_reading() {
                return processed;
            }
            let raw = rt.ring.read_opcode();
            let Ok(opcode) = RtClientOpcode::try_from(raw) else {
                tracing::error!(raw, "unknown rt opcode, quitting");
                self.quit = true;
                return processed;
            };
            match opcode {
                RtClientOpcode::Null => {}
                RtClientOpcode::SetAudioPool => {
                    let _bytes = rt.ring.read_u64().unwrap_or(0);
                }
                RtClientOpcode::MidiEvent => {
                    let time = rt.ring.read_u32().unwrap_or(0);
                    let port = rt.ring.read_u8().unwrap_or(0);
                    let size = rt.ring.read_u8().unwrap_or(0) as usize;
                    let mut data = [0u8; 4];
                    if size <= 4 {
                        let _ = rt.ring.read_bytes(&mut data[..size]);
                        if let Some(ev) =
                            EngineEvent::from_raw_midi(time, port, &data[..size])
                        {
                            if self.staged_events.len() < MAX_INTERNAL_EVENT_COUNT {
                                self.staged_events.push(ev);
                            }
                        }
                    } else {
                        // Oversize payloads are skipped byte by byte.
                        let mut sink = [0u8; 1];
                        for _ in 0..size {
                            let _ = rt.ring.read_bytes(&mut sink);
                        }
                    }
                }
                RtClientOpcode::ControlEventParameter => {
                    let time = rt.ring.read_u32().unwrap_or(0);
                    let channel = rt.ring.read_u8().unwrap_or(0);
                    let param = rt.ring.read_u16().unwrap_or(0);
                    let value = rt.ring.read_f32().unwrap_or(0.0);
                    self.stage_control(
                        time,
                        channel,
                        CtrlEventKind::Parameter,
                        param,
                        value,
                    );
                }
                RtClientOpcode::ControlEventMidiBank => {
                    let time = rt.ring.read_u32().unwrap_or(0);
                    let channel = rt.ring.read_u8().unwrap_or(0);
                    let bank = rt.ring.read_u16().unwrap_or(0);
                    self.stage_control(time, channel, CtrlEventKind::MidiBank, 0, f32::from(bank));
                }
                RtClientOpcode::ControlEventMidiProgram => {
                    let time = rt.ring.read_u32().unwrap_or(0);
                    let channel = rt.ring.read_u8().unwrap_or(0);
                    let program = rt.ring.read_u16().unwrap_or(0);
                    self.stage_control(
                        time,
                        channel,
                        CtrlEventKind::MidiProgram,
                        0,
                        f32::from(program),
                    );
                }
                RtClientOpcode::ControlEventAllSoundOff => {
                    let time = rt.ring.read_u32().unwrap_or(0);
                    let channel = rt.ring.read_u8().unwrap_or(0);
                    self.stage_control(time, channel, CtrlEventKind::AllSoundOff, 0, 0.0);
                }
                RtClientOpcode::ControlEventAllNotesOff => {
                    let time = rt.ring.read_u32().unwrap_or(0);
                    let channel = rt.ring.read_u8().unwrap_or(0);
                    self.stage_control(time, channel, CtrlEventKind::AllNotesOff, 0, 0.0);
                }
                RtClientOpcode::Process => {
                    let frames = rt.ring.read_u32().unwrap_or(0);
                    self.process_cycle(frames);
                    self.rt().sem_client.post();
                    processed = true;
                }
                RtClientOpcode::Quit => {
                    self.quit = true;
                    // Unblock a client waiting on this cycle.
                    self.rt().sem_client.post();
                    return processed;
                }
            }
        }
    }

    fn stage_control(&mut self, time: u32, channel: u8, kind: CtrlEventKind, param: u16, value: f32) {
        if self.staged_events.len() >= MAX_INTERNAL_EVENT_COUNT {
            return;
        }
        self.staged_events.push(EngineEvent {
            time,
            channel,
            kind: EngineEventKind::Control(CtrlEvent { kind, param, value }),
        });
    }

    fn process_cycle(&mut self, frames: u32) {
        let frames = (frames as usize).min(self.buffer_size as usize);

        // UI notes queued since the last cycle go first.
        for (channel, note, velocity) in std::mem::take(&mut self.pending_notes) {
            if self.staged_events.len() >= MAX_INTERNAL_EVENT_COUNT {
                break;
            }
            let status = if velocity > 0 {
                MIDI_STATUS_NOTE_ON
            } else {
                MIDI_STATUS_NOTE_OFF
            } | (channel & 0x0F);
            self.staged_events.push(EngineEvent {
                time: 0,
                channel: channel & 0x0F,
                kind: EngineEventKind::Midi(MidiData {
                    port: 0,
                    size: 3,
                    data: [status, note, velocity, 0],
                }),
            });
        }

        for (slot, buf) in self.audio_in_bufs.iter_mut().enumerate() {
            self.pool.read_input_into(slot as u32, buf);
        }
        let audio_ins = self.audio_in_bufs.len();
        for (slot, buf) in self.cv_in_bufs.iter_mut().enumerate() {
            self.pool.read_input_into((audio_ins + slot) as u32, buf);
        }

        if self.active {
            self.events_out.clear();
            let in_refs: Vec<&[f32]> = self.audio_in_bufs.iter().map(|b| b.as_slice()).collect();
            let cv_in_refs: Vec<&[f32]> = self.cv_in_bufs.iter().map(|b| b.as_slice()).collect();
            let mut out_refs: Vec<&mut [f32]> = self
                .audio_out_bufs
                .iter_mut()
                .map(|b| b.as_mut_slice())
                .collect();
            let mut cv_out_refs: Vec<&mut [f32]> = self
                .cv_out_bufs
                .iter_mut()
                .map(|b| b.as_mut_slice())
                .collect();
            let mut args = ProcessArgs {
                audio_in: &in_refs,
                audio_out: &mut out_refs,
                cv_in: &cv_in_refs,
                cv_out: &mut cv_out_refs,
                events_in: &self.staged_events,
                events_out: &mut self.events_out,
                frames,
            };
            self.instance.process(&mut args);
        } else {
            for buf in &mut self.audio_out_bufs {
                buf[..frames].fill(0.0);
            }
            for buf in &mut self.cv_out_bufs {
                buf[..frames].fill(0.0);
            }
        }
        self.staged_events.clear();

        for (slot, buf) in self.audio_out_bufs.iter().enumerate() {
            self.pool.write_output(slot as u32, buf);
        }
        let audio_outs = self.audio_out_bufs.len();
        for (slot, buf) in self.cv_out_bufs.iter().enumerate() {
            self.pool.write_output((audio_outs + slot) as u32, buf);
        }

        self.write_midi_out();
    }

    /// Frame produced MIDI into the RT region back channel.
    fn write_midi_out(&mut self) {
        let rt = self.rt();
        let buf = unsafe { &mut *rt.midi_out.get() };
        buf.fill(0);
        let mut at = 0usize;
        for event in &self.events_out {
            let EngineEventKind::Midi(midi) = &event.kind else {
                continue;
            };
            let size = midi.size as usize;
            if at + 6 + size > RT_MIDI_OUT_SIZE {
                break;
            }
            buf[at..at + 4].copy_from_slice(&event.time.to_ne_bytes());
            buf[at + 4] = midi.port;
            buf[at + 5] = midi.size;
            buf[at + 6..at + 6 + size].copy_from_slice(&midi.data[..size]);
            at += 6 + size;
        }
        self.events_out.clear();
    }

    /// Serve until `Quit`. Alternates between non-RT housekeeping and
    /// waiting on the server semaphore for RT work.
    pub fn run(&mut self) -> Result<(), ServerError> {
        while !self.quit {
            self.drain_non_rt()?;
            if self.quit {
                break;
            }
            if self.rt().sem_server.wait_timeout(Duration::from_millis(50)) {
                self.drain_rt();
            }
        }
        tracing::debug!("bridge worker quitting");
        Ok(())
    }

    /// Single cooperative step for in-thread test harnesses.
    pub fn tick(&mut self, rt_wait: Duration) -> Result<bool, ServerError> {
        self.drain_non_rt()?;
        if self.quit {
            return Ok(false);
        }
        if self.rt().sem_server.wait_timeout(rt_wait) {
            self.drain_rt();
        }
        Ok(!self.quit)
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }
}
