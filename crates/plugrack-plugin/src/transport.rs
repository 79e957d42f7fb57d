//! Client side of the plugin bridge.
//!
//! Owns the four shared-memory regions, the rendezvous semaphores, and the
//! worker child process. The RT ring and the audio pool are only touched
//! from the audio thread; the non-RT client ring is written under a mutex;
//! the server ring is drained during idle.

use crate::error::{BridgeError, Result};
use crate::protocol::{
    BridgeNonRtClientData, BridgeNonRtServerData, BridgeRtClientData, NonRtClientOpcode,
    NonRtServerOpcode, RtClientOpcode, RT_MIDI_OUT_SIZE,
};
use crate::shm::{
    random_suffix, region_file_name, SharedAudioPool, SharedMemory, REGION_AUDIO_POOL,
    REGION_NON_RT_CLIENT, REGION_NON_RT_SERVER, REGION_RT_CLIENT,
};
use parking_lot::Mutex;
use plugrack_core::{AtomicFlag, EngineTimeInfo};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Environment variable carrying the four concatenated 6-char region
/// suffixes to the worker.
pub const BRIDGE_SHM_IDS_ENV: &str = "ENGINE_BRIDGE_SHM_IDS";

/// Default RT rendezvous timeout.
pub const CLIENT_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
/// Worker startup budget.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);
/// Budget for a clean worker exit after `Quit`.
pub const QUIT_TIMEOUT: Duration = Duration::from_secs(3);
/// Grace between `Quit` and a hard kill.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Parsed worker→client notification.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Pong,
    PluginInfo1 {
        category: u32,
        hints: u32,
        unique_id: i64,
    },
    PluginInfo2 {
        real_name: String,
        label: String,
        maker: String,
        copyright: String,
    },
    AudioCount {
        audio_ins: u32,
        audio_outs: u32,
        cv_ins: u32,
        cv_outs: u32,
    },
    MidiCount {
        ins: u32,
        outs: u32,
    },
    ParameterCount {
        count: u32,
    },
    ProgramCount {
        count: u32,
    },
    MidiProgramCount {
        count: u32,
    },
    ParameterData1 {
        index: u32,
        rindex: i32,
        kind: u32,
        hints: u32,
        midi_channel: u8,
        midi_cc: i16,
    },
    ParameterData2 {
        index: u32,
        name: String,
        unit: String,
    },
    ParameterRanges1 {
        index: u32,
        def: f32,
        min: f32,
        max: f32,
    },
    ParameterRanges2 {
        index: u32,
        step: f32,
        step_small: f32,
        step_large: f32,
    },
    ParameterValue {
        index: u32,
        value: f32,
    },
    DefaultValue {
        index: u32,
        value: f32,
    },
    CurrentProgram {
        index: i32,
    },
    CurrentMidiProgram {
        index: i32,
    },
    ProgramName {
        index: u32,
        name: String,
    },
    MidiProgramData {
        index: u32,
        bank: u32,
        program: u32,
        name: String,
    },
    SetCustomData {
        dtype: String,
        key: String,
        value: String,
    },
    SetChunkDataFile {
        path: String,
    },
    SetLatency {
        frames: u32,
    },
    UiClosed,
    Ready,
    Saved,
    Error {
        message: String,
    },
}

pub struct BridgeTransport {
    pool: Mutex<SharedAudioPool>,
    rt_region: SharedMemory,
    nonrt_client_region: SharedMemory,
    nonrt_server_region: SharedMemory,
    suffixes: [String; 4],

    child: Mutex<Option<Child>>,
    /// Serializes writers of the non-RT client ring.
    nonrt_lock: Mutex<()>,

    timed_out: AtomicFlag,
    ready: AtomicFlag,
    saved: AtomicFlag,
    ui_closed: AtomicFlag,
    quit_sent: AtomicFlag,
    crashed: AtomicFlag,
    last_pong: Mutex<Instant>,
    last_error: Mutex<String>,
}

// The RT-region pointer is only dereferenced through methods whose thread
// affinity is part of the call contract (RT methods from the audio thread,
// everything else from main/idle).
unsafe impl Send for BridgeTransport {}
unsafe impl Sync for BridgeTransport {}

impl BridgeTransport {
    /// Create the four regions, initialize semaphores and rings, and seed
    /// the non-RT client ring with the region sizes and initial audio
    /// configuration. The worker is not spawned yet.
    pub fn new(
        audio_in: u32,
        audio_out: u32,
        cv_in: u32,
        cv_out: u32,
        buffer_size: u32,
        sample_rate: f64,
    ) -> Result<Self> {
        let suffixes = [
            random_suffix(),
            random_suffix(),
            random_suffix(),
            random_suffix(),
        ];
        let pool = SharedAudioPool::create(
            &region_file_name(REGION_AUDIO_POOL, &suffixes[0]),
            audio_in,
            audio_out,
            cv_in,
            cv_out,
            buffer_size,
        )?;
        let rt_region = SharedMemory::create(
            &region_file_name(REGION_RT_CLIENT, &suffixes[1]),
            std::mem::size_of::<BridgeRtClientData>(),
        )?;
        let nonrt_client_region = SharedMemory::create(
            &region_file_name(REGION_NON_RT_CLIENT, &suffixes[2]),
            std::mem::size_of::<BridgeNonRtClientData>(),
        )?;
        let nonrt_server_region = SharedMemory::create(
            &region_file_name(REGION_NON_RT_SERVER, &suffixes[3]),
            std::mem::size_of::<BridgeNonRtServerData>(),
        )?;

        let transport = Self {
            pool: Mutex::new(pool),
            rt_region,
            nonrt_client_region,
            nonrt_server_region,
            suffixes,
            child: Mutex::new(None),
            nonrt_lock: Mutex::new(()),
            timed_out: AtomicFlag::default(),
            ready: AtomicFlag::default(),
            saved: AtomicFlag::default(),
            ui_closed: AtomicFlag::default(),
            quit_sent: AtomicFlag::default(),
            crashed: AtomicFlag::default(),
            last_pong: Mutex::new(Instant::now()),
            last_error: Mutex::new(String::new()),
        };

        {
            let rt = transport.rt_data();
            if !rt.sem_server.init() || !rt.sem_client.init() {
                return Err(BridgeError::SharedMemory(
                    "semaphore initialization failed".into(),
                ));
            }
            rt.ring.init();
            transport.nonrt_client_ring().init();
            transport.nonrt_server_ring().init();
        }

        // Seed: a Null frame carrying the three ring sizes, then the
        // initial audio configuration.
        {
            let ring = transport.nonrt_client_ring();
            ring.write_opcode(NonRtClientOpcode::Null.into());
            ring.write_u32(crate::ring::SMALL_RING_SIZE as u32);
            ring.write_u32(crate::ring::BIG_RING_SIZE as u32);
            ring.write_u32(crate::ring::HUGE_RING_SIZE as u32);
            ring.write_opcode(NonRtClientOpcode::SetBufferSize.into());
            ring.write_u32(buffer_size);
            ring.write_opcode(NonRtClientOpcode::SetSampleRate.into());
            ring.write_f64(sample_rate);
            if !ring.commit_write() {
                return Err(BridgeError::RingFull("non-rt seed frame"));
            }
        }
        {
            let rt = transport.rt_data();
            rt.ring.write_opcode(RtClientOpcode::SetAudioPool.into());
            rt.ring.write_u64(transport.pool.lock().byte_len() as u64);
            if !rt.ring.commit_write() {
                return Err(BridgeError::RingFull("rt pool frame"));
            }
        }

        Ok(transport)
    }

    pub fn shm_ids(&self) -> String {
        self.suffixes.concat()
    }

    fn rt_data(&self) -> &BridgeRtClientData {
        unsafe { &*self.rt_region.view::<BridgeRtClientData>() }
    }

    fn nonrt_client_ring(&self) -> &crate::ring::RingBufferData<{ crate::ring::BIG_RING_SIZE }> {
        unsafe { &(*self.nonrt_client_region.view::<BridgeNonRtClientData>()).ring }
    }

    fn nonrt_server_ring(&self) -> &crate::ring::RingBufferData<{ crate::ring::HUGE_RING_SIZE }> {
        unsafe { &(*self.nonrt_server_region.view::<BridgeNonRtServerData>()).ring }
    }

    // -- worker lifecycle ---------------------------------------------

    /// Spawn `<binary> <plugin-type> <filename> <label> <unique-id>` with
    /// the region ids and engine options in its environment.
    pub fn spawn_worker(
        &self,
        binary: &Path,
        plugin_type: &str,
        filename: &str,
        label: &str,
        unique_id: i64,
        env: &[(String, String)],
        windows_compat_layer: bool,
    ) -> Result<()> {
        let mut cmd = Command::new(binary);
        cmd.arg(plugin_type)
            .arg(filename)
            .arg(label)
            .arg(unique_id.to_string())
            .env(BRIDGE_SHM_IDS_ENV, self.shm_ids())
            .stdin(Stdio::null());
        for (key, value) in env {
            cmd.env(key, value);
        }
        if windows_compat_layer {
            cmd.env("WINEDEBUG", "-all");
        }
        let child = cmd.spawn().map_err(|e| BridgeError::SpawnFailed {
            binary: PathBuf::from(binary),
            reason: e.to_string(),
        })?;
        tracing::debug!(pid = child.id(), ?binary, label, "bridge worker spawned");
        *self.child.lock() = Some(child);
        *self.last_pong.lock() = Instant::now();
        Ok(())
    }

    /// Poll for the worker's `Ready`, collecting any description messages
    /// it sends first.
    pub fn wait_for_ready(&self, out: &mut Vec<ServerMessage>) -> Result<()> {
        let deadline = Instant::now() + READY_TIMEOUT;
        loop {
            self.fetch_server_messages(out)?;
            if self.ready.get() {
                return Ok(());
            }
            {
                let err = self.last_error.lock();
                if !err.is_empty() {
                    return Err(BridgeError::Worker(err.clone()));
                }
            }
            let has_child = self.child.lock().is_some();
            if has_child && !self.child_alive() {
                return Err(BridgeError::ProcessCrashed);
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::Timeout {
                    operation: "bridge startup",
                    duration_ms: READY_TIMEOUT.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// True while the child has not exited.
    pub fn child_alive(&self) -> bool {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) | Err(_) => false,
            },
            None => false,
        }
    }

    /// Detect an unrequested worker death. Sticky.
    pub fn check_crashed(&self) -> bool {
        if self.crashed.get() {
            return true;
        }
        if self.quit_sent.get() {
            return false;
        }
        if self.child.lock().is_some() && !self.child_alive() {
            self.crashed.raise();
            return true;
        }
        false
    }

    /// `Quit` on both rings, bounded wait, then a hard kill.
    pub fn shutdown(&self) {
        self.quit_sent.raise();
        {
            let _guard = self.nonrt_lock.lock();
            let ring = self.nonrt_client_ring();
            ring.write_opcode(NonRtClientOpcode::Quit.into());
            ring.commit_write();
        }
        {
            let rt = self.rt_data();
            rt.ring.write_opcode(RtClientOpcode::Quit.into());
            rt.ring.commit_write();
            rt.sem_server.post();
        }

        let deadline = Instant::now() + QUIT_TIMEOUT;
        while self.child_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(25));
        }
        let grace = Instant::now() + KILL_GRACE;
        while self.child_alive() && Instant::now() < grace {
            std::thread::sleep(Duration::from_millis(25));
        }
        let mut guard = self.child.lock();
        if let Some(mut child) = guard.take() {
            if matches!(child.try_wait(), Ok(None)) {
                tracing::warn!(pid = child.id(), "bridge worker did not quit, killing");
                let _ = child.kill();
            }
            let _ = child.wait();
        }
        let rt = self.rt_data();
        rt.sem_server.destroy();
        rt.sem_client.destroy();
    }

    // -- RT path -------------------------------------------------------

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.get()
    }

    pub fn pool(&self) -> &Mutex<SharedAudioPool> {
        &self.pool
    }

    pub fn write_rt_midi_event(&self, time: u32, port: u8, data: &[u8]) {
        let ring = &self.rt_data().ring;
        ring.write_opcode(RtClientOpcode::MidiEvent.into());
        ring.write_u32(time);
        ring.write_u8(port);
        ring.write_u8(data.len() as u8);
        ring.write_bytes(data);
    }

    pub fn write_rt_control_parameter(&self, time: u32, channel: u8, param: u16, value: f32) {
        let ring = &self.rt_data().ring;
        ring.write_opcode(RtClientOpcode::ControlEventParameter.into());
        ring.write_u32(time);
        ring.write_u8(channel);
        ring.write_u16(param);
        ring.write_f32(value);
    }

    pub fn write_rt_control_midi_bank(&self, time: u32, channel: u8, bank: u16) {
        let ring = &self.rt_data().ring;
        ring.write_opcode(RtClientOpcode::ControlEventMidiBank.into());
        ring.write_u32(time);
        ring.write_u8(channel);
        ring.write_u16(bank);
    }

    pub fn write_rt_control_midi_program(&self, time: u32, channel: u8, program: u16) {
        let ring = &self.rt_data().ring;
        ring.write_opcode(RtClientOpcode::ControlEventMidiProgram.into());
        ring.write_u32(time);
        ring.write_u8(channel);
        ring.write_u16(program);
    }

    pub fn write_rt_all_sound_off(&self, time: u32, channel: u8) {
        let ring = &self.rt_data().ring;
        ring.write_opcode(RtClientOpcode::ControlEventAllSoundOff.into());
        ring.write_u32(time);
        ring.write_u8(channel);
    }

    pub fn write_rt_all_notes_off(&self, time: u32, channel: u8) {
        let ring = &self.rt_data().ring;
        ring.write_opcode(RtClientOpcode::ControlEventAllNotesOff.into());
        ring.write_u32(time);
        ring.write_u8(channel);
    }

    /// Commit the cycle frame, wake the worker and wait for completion.
    ///
    /// On timeout the sticky `timed_out` flag is set; it is cleared only by
    /// a later successful wait.
    pub fn process_cycle(&self, time_info: &EngineTimeInfo, frames: u32, offline: bool) -> bool {
        let rt = self.rt_data();

        // The worker only reads this between semaphore posts.
        let bridge_time = unsafe { &mut *rt.time_info.get() };
        bridge_time.playing = u32::from(time_info.playing);
        bridge_time.frame = time_info.frame;
        bridge_time.usecs = time_info.usecs;
        match &time_info.bbt {
            Some(bbt) => {
                bridge_time.bbt_valid = 1;
                bridge_time.bar = bbt.bar;
                bridge_time.beat = bbt.beat;
                bridge_time.tick = bbt.tick;
                bridge_time.bar_start_tick = bbt.bar_start_tick;
                bridge_time.beats_per_bar = bbt.beats_per_bar;
                bridge_time.beat_type = bbt.beat_type;
                bridge_time.ticks_per_beat = bbt.ticks_per_beat;
                bridge_time.beats_per_minute = bbt.beats_per_minute;
            }
            None => bridge_time.bbt_valid = 0,
        }

        rt.ring.write_opcode(RtClientOpcode::Process.into());
        rt.ring.write_u32(frames);
        if !rt.ring.commit_write() {
            return false;
        }
        rt.sem_server.post();
        self.wait_for_client(if offline { None } else { Some(CLIENT_WAIT_TIMEOUT) })
    }

    /// Wait on the client semaphore. `None` blocks indefinitely (offline
    /// mode only).
    pub fn wait_for_client(&self, timeout: Option<Duration>) -> bool {
        let rt = self.rt_data();
        let ok = match timeout {
            Some(timeout) => rt.sem_client.wait_timeout(timeout),
            None => rt.sem_client.wait(),
        };
        self.timed_out.set(!ok);
        ok
    }

    /// Drain the worker's raw-MIDI back channel, calling `f(time, port,
    /// bytes)` per event, then reset it.
    pub fn read_rt_midi_out(&self, mut f: impl FnMut(u32, u8, &[u8])) {
        let rt = self.rt_data();
        let buf = unsafe { &mut *rt.midi_out.get() };
        let mut at = 0usize;
        while at + 6 <= RT_MIDI_OUT_SIZE {
            let size = buf[at + 5] as usize;
            if size == 0 || at + 6 + size > RT_MIDI_OUT_SIZE {
                break;
            }
            let time = u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            let port = buf[at + 4];
            f(time, port, &buf[at + 6..at + 6 + size]);
            at += 6 + size;
        }
        buf[..at.max(6).min(RT_MIDI_OUT_SIZE)].fill(0);
    }

    // -- non-RT path ---------------------------------------------------

    /// Write one non-RT frame under the commit mutex.
    pub fn with_nonrt_ring<R>(
        &self,
        f: impl FnOnce(&crate::ring::RingBufferData<{ crate::ring::BIG_RING_SIZE }>) -> R,
    ) -> Result<R> {
        let _guard = self.nonrt_lock.lock();
        let ring = self.nonrt_client_ring();
        let result = f(ring);
        if ring.commit_write() {
            Ok(result)
        } else {
            tracing::warn!("non-rt client ring overflow, frame dropped");
            Err(BridgeError::RingFull("non-rt client frame"))
        }
    }

    pub fn send_simple(&self, opcode: NonRtClientOpcode) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(opcode.into());
        })
    }

    pub fn send_set_parameter_value(&self, index: i32, value: f32) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetParameterValue.into());
            ring.write_i32(index);
            ring.write_f32(value);
        })
    }

    pub fn send_set_parameter_midi_channel(&self, index: u32, channel: u8) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetParameterMidiChannel.into());
            ring.write_u32(index);
            ring.write_u8(channel);
        })
    }

    pub fn send_set_parameter_midi_cc(&self, index: u32, cc: i16) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetParameterMidiCC.into());
            ring.write_u32(index);
            ring.write_i16(cc);
        })
    }

    pub fn send_set_program(&self, index: i32) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetProgram.into());
            ring.write_i32(index);
        })
    }

    pub fn send_set_midi_program(&self, index: i32) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetMidiProgram.into());
            ring.write_i32(index);
        })
    }

    pub fn send_set_ctrl_channel(&self, channel: i16) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetCtrlChannel.into());
            ring.write_i16(channel);
        })
    }

    pub fn send_set_custom_data(&self, dtype: &str, key: &str, value: &str) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetCustomData.into());
            ring.write_str(dtype);
            ring.write_str(key);
            ring.write_str(value);
        })
    }

    pub fn send_set_chunk_data_file(&self, path: &str) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetChunkDataFile.into());
            ring.write_str(path);
        })
    }

    pub fn send_set_option(&self, option: u32, yes: bool) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetOption.into());
            ring.write_u32(option);
            ring.write_bool(yes);
        })
    }

    pub fn send_set_buffer_size(&self, frames: u32) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetBufferSize.into());
            ring.write_u32(frames);
        })
    }

    pub fn send_set_sample_rate(&self, rate: f64) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetSampleRate.into());
            ring.write_f64(rate);
        })
    }

    pub fn send_set_audio_pool_size(&self, bytes: u64) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::SetAudioPoolSize.into());
            ring.write_u64(bytes);
        })
    }

    pub fn send_ui_note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::UiNoteOn.into());
            ring.write_u8(channel);
            ring.write_u8(note);
            ring.write_u8(velocity);
        })
    }

    pub fn send_ui_note_off(&self, channel: u8, note: u8) -> Result<()> {
        self.with_nonrt_ring(|ring| {
            ring.write_opcode(NonRtClientOpcode::UiNoteOff.into());
            ring.write_u8(channel);
            ring.write_u8(note);
        })
    }

    /// Grow the audio pool for a new buffer size and tell the worker to
    /// re-attach. Must not race a cycle; callers deactivate first.
    pub fn resize_audio_pool(&self, buffer_size: u32) -> Result<()> {
        let bytes = {
            let mut pool = self.pool.lock();
            pool.resize(buffer_size)?;
            pool.byte_len() as u64
        };
        self.send_set_audio_pool_size(bytes)?;
        self.send_set_buffer_size(buffer_size)
    }

    /// Set the pool's port layout once the worker has described itself.
    pub fn configure_pool(
        &self,
        audio_in: u32,
        audio_out: u32,
        cv_in: u32,
        cv_out: u32,
        buffer_size: u32,
    ) -> Result<()> {
        let bytes = {
            let mut pool = self.pool.lock();
            pool.reconfigure(audio_in, audio_out, cv_in, cv_out, buffer_size)?;
            pool.byte_len() as u64
        };
        self.send_set_audio_pool_size(bytes)
    }

    // -- idle ----------------------------------------------------------

    /// Drain the server ring. `Ready`/`Saved`/`Pong`/`Error` update the
    /// transport's own flags; every message is also handed to the caller.
    pub fn fetch_server_messages(&self, out: &mut Vec<ServerMessage>) -> Result<()> {
        let ring = self.nonrt_server_ring();
        while ring.is_data_available_for_reading() {
            let raw = ring.read_opcode();
            let opcode = NonRtServerOpcode::try_from(raw).map_err(|bad| {
                self.crashed.raise();
                BridgeError::Protocol(format!("unknown server opcode {bad}"))
            })?;
            let msg = self.parse_server_message(opcode, ring)?;
            match &msg {
                Some(ServerMessage::Pong) => {
                    *self.last_pong.lock() = Instant::now();
                }
                Some(ServerMessage::Ready) => self.ready.raise(),
                Some(ServerMessage::Saved) => self.saved.raise(),
                Some(ServerMessage::UiClosed) => self.ui_closed.raise(),
                Some(ServerMessage::Error { message }) => {
                    *self.last_error.lock() = message.clone();
                }
                _ => {}
            }
            if let Some(msg) = msg {
                out.push(msg);
            }
        }
        Ok(())
    }

    fn parse_server_message(
        &self,
        opcode: NonRtServerOpcode,
        ring: &crate::ring::RingBufferData<{ crate::ring::HUGE_RING_SIZE }>,
    ) -> Result<Option<ServerMessage>> {
        let violation = || {
            self.crashed.raise();
            BridgeError::Protocol("truncated server message".into())
        };
        macro_rules! read {
            ($method:ident) => {
                ring.$method().ok_or_else(violation)?
            };
        }
        let msg = match opcode {
            NonRtServerOpcode::Null => None,
            NonRtServerOpcode::Pong => Some(ServerMessage::Pong),
            NonRtServerOpcode::PluginInfo1 => Some(ServerMessage::PluginInfo1 {
                category: read!(read_u32),
                hints: read!(read_u32),
                unique_id: read!(read_i64),
            }),
            NonRtServerOpcode::PluginInfo2 => Some(ServerMessage::PluginInfo2 {
                real_name: read!(read_str),
                label: read!(read_str),
                maker: read!(read_str),
                copyright: read!(read_str),
            }),
            NonRtServerOpcode::AudioCount => Some(ServerMessage::AudioCount {
                audio_ins: read!(read_u32),
                audio_outs: read!(read_u32),
                cv_ins: read!(read_u32),
                cv_outs: read!(read_u32),
            }),
            NonRtServerOpcode::MidiCount => Some(ServerMessage::MidiCount {
                ins: read!(read_u32),
                outs: read!(read_u32),
            }),
            NonRtServerOpcode::ParameterCount => Some(ServerMessage::ParameterCount {
                count: read!(read_u32),
            }),
            NonRtServerOpcode::ProgramCount => Some(ServerMessage::ProgramCount {
                count: read!(read_u32),
            }),
            NonRtServerOpcode::MidiProgramCount => Some(ServerMessage::MidiProgramCount {
                count: read!(read_u32),
            }),
            NonRtServerOpcode::ParameterData1 => Some(ServerMessage::ParameterData1 {
                index: read!(read_u32),
                rindex: read!(read_i32),
                kind: read!(read_u32),
                hints: read!(read_u32),
                midi_channel: read!(read_u8),
                midi_cc: read!(read_i16),
            }),
            NonRtServerOpcode::ParameterData2 => Some(ServerMessage::ParameterData2 {
                index: read!(read_u32),
                name: read!(read_str),
                unit: read!(read_str),
            }),
            NonRtServerOpcode::ParameterRanges1 => Some(ServerMessage::ParameterRanges1 {
                index: read!(read_u32),
                def: read!(read_f32),
                min: read!(read_f32),
                max: read!(read_f32),
            }),
            NonRtServerOpcode::ParameterRanges2 => Some(ServerMessage::ParameterRanges2 {
                index: read!(read_u32),
                step: read!(read_f32),
                step_small: read!(read_f32),
                step_large: read!(read_f32),
            }),
            NonRtServerOpcode::ParameterValue => Some(ServerMessage::ParameterValue {
                index: read!(read_u32),
                value: read!(read_f32),
            }),
            NonRtServerOpcode::DefaultValue => Some(ServerMessage::DefaultValue {
                index: read!(read_u32),
                value: read!(read_f32),
            }),
            NonRtServerOpcode::CurrentProgram => Some(ServerMessage::CurrentProgram {
                index: read!(read_i32),
            }),
            NonRtServerOpcode::CurrentMidiProgram => Some(ServerMessage::CurrentMidiProgram {
                index: read!(read_i32),
            }),
            NonRtServerOpcode::ProgramName => Some(ServerMessage::ProgramName {
                index: read!(read_u32),
                name: read!(read_str),
            }),
            NonRtServerOpcode::MidiProgramData => Some(ServerMessage::MidiProgramData {
                index: read!(read_u32),
                bank: read!(read_u32),
                program: read!(read_u32),
                name: read!(read_str),
            }),
            NonRtServerOpcode::SetCustomData => Some(ServerMessage::SetCustomData {
                dtype: read!(read_str),
                key: read!(read_str),
                value: read!(read_str),
            }),
            NonRtServerOpcode::SetChunkDataFile => Some(ServerMessage::SetChunkDataFile {
                path: read!(read_str),
            }),
            NonRtServerOpcode::SetLatency => Some(ServerMessage::SetLatency {
                frames: read!(read_u32),
            }),
            NonRtServerOpcode::UiClosed => Some(ServerMessage::UiClosed),
            NonRtServerOpcode::Ready => Some(ServerMessage::Ready),
            NonRtServerOpcode::Saved => Some(ServerMessage::Saved),
            NonRtServerOpcode::Error => Some(ServerMessage::Error {
                message: read!(read_str),
            }),
        };
        Ok(msg)
    }

    pub fn take_saved(&self) -> bool {
        self.saved.check_and_clear()
    }

    pub fn take_ui_closed(&self) -> bool {
        self.ui_closed.check_and_clear()
    }

    pub fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }

    pub fn millis_since_pong(&self) -> u64 {
        self.last_pong.lock().elapsed().as_millis() as u64
    }

    /// One idle tick of liveness supervision: send a ping and report
    /// whether the worker is considered alive under `timeout_ms`.
    pub fn ping_and_check(&self, timeout_ms: u32) -> bool {
        let _ = self.send_simple(NonRtClientOpcode::Ping);
        if self.check_crashed() {
            return false;
        }
        timeout_ms == 0 || self.millis_since_pong() <= u64::from(timeout_ms)
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        if self.child.lock().is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_created_and_seeded() {
        let transport = BridgeTransport::new(2, 2, 0, 0, 128, 48000.0).unwrap();
        assert_eq!(transport.shm_ids().len(), 24);

        // The seed frame is committed and starts with the Null opcode and
        // the three ring sizes.
        let ring = transport.nonrt_client_ring();
        assert_eq!(ring.read_opcode(), u32::from(NonRtClientOpcode::Null));
        assert_eq!(ring.read_u32(), Some(crate::ring::SMALL_RING_SIZE as u32));
        assert_eq!(ring.read_u32(), Some(crate::ring::BIG_RING_SIZE as u32));
        assert_eq!(ring.read_u32(), Some(crate::ring::HUGE_RING_SIZE as u32));
        assert_eq!(
            ring.read_opcode(),
            u32::from(NonRtClientOpcode::SetBufferSize)
        );
        assert_eq!(ring.read_u32(), Some(128));
        assert_eq!(
            ring.read_opcode(),
            u32::from(NonRtClientOpcode::SetSampleRate)
        );
        assert_eq!(ring.read_f64(), Some(48000.0));
    }

    #[test]
    fn timeout_is_sticky_until_a_successful_wait() {
        let transport = BridgeTransport::new(0, 0, 0, 0, 64, 48000.0).unwrap();
        assert!(!transport.is_timed_out());
        assert!(!transport.wait_for_client(Some(Duration::from_millis(20))));
        assert!(transport.is_timed_out());
        // A post from "the worker" clears it on the next wait.
        transport.rt_data().sem_client.post();
        assert!(transport.wait_for_client(Some(Duration::from_millis(20))));
        assert!(!transport.is_timed_out());
    }

    #[test]
    fn midi_back_channel_parses_and_resets() {
        let transport = BridgeTransport::new(0, 0, 0, 0, 64, 48000.0).unwrap();
        {
            let rt = transport.rt_data();
            let buf = unsafe { &mut *rt.midi_out.get() };
            // time=5, port=0, size=3, note-on
            buf[0..4].copy_from_slice(&5u32.to_ne_bytes());
            buf[4] = 0;
            buf[5] = 3;
            buf[6..9].copy_from_slice(&[0x90, 60, 100]);
        }
        let mut seen = Vec::new();
        transport.read_rt_midi_out(|time, port, bytes| {
            seen.push((time, port, bytes.to_vec()));
        });
        assert_eq!(seen, vec![(5, 0, vec![0x90, 60, 100])]);
        // Cleared: a second drain sees nothing.
        seen.clear();
        transport.read_rt_midi_out(|time, port, bytes| {
            seen.push((time, port, bytes.to_vec()));
        });
        assert!(seen.is_empty());
    }

    #[test]
    fn nonrt_frames_roundtrip_through_the_ring() {
        let transport = BridgeTransport::new(0, 0, 0, 0, 64, 48000.0).unwrap();
        // Consume the seed frame first.
        let ring = transport.nonrt_client_ring();
        while ring.is_data_available_for_reading() {
            let _ = ring.read_u8();
        }
        transport.send_set_parameter_value(3, 0.25).unwrap();
        transport.send_set_custom_data("Property", "k", "v").unwrap();
        assert_eq!(
            ring.read_opcode(),
            u32::from(NonRtClientOpcode::SetParameterValue)
        );
        assert_eq!(ring.read_i32(), Some(3));
        assert_eq!(ring.read_f32(), Some(0.25));
        assert_eq!(
            ring.read_opcode(),
            u32::from(NonRtClientOpcode::SetCustomData)
        );
        assert_eq!(ring.read_str().as_deref(), Some("Property"));
        assert_eq!(ring.read_str().as_deref(), Some("k"));
        assert_eq!(ring.read_str().as_deref(), Some("v"));
    }
}
