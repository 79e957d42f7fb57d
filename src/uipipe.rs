//! The UI pipe: a newline-delimited text channel to the external UI
//! process.
//!
//! Engine→UI traffic is push-based and serialized under the pipe mutex;
//! UI→engine commands arrive on a reader thread and are drained in batches
//! by the idle pump. Floats are always formatted with a `.` decimal point
//! (Rust's formatter is locale-independent); booleans are the literal
//! strings `true`/`false`; the sentinel `(null)` stands for "no value".

use crate::callback::FlatCallback;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub const NULL_SENTINEL: &str = "(null)";

/// How long the command parser waits for a command's parameter lines.
const ARG_TIMEOUT: Duration = Duration::from_millis(100);

pub fn fmt_f32(value: f32) -> String {
    format!("{value:.6}")
}

pub fn fmt_f64(value: f64) -> String {
    format!("{value:.6}")
}

pub fn fmt_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// UI helper state as observed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiState {
    #[default]
    None,
    Show,
    Hide,
    Crashed,
}

pub struct UiPipe {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    rx: Receiver<String>,
    child: Mutex<Option<Child>>,
}

impl UiPipe {
    /// Wrap raw streams. The reader thread lives until its stream closes.
    pub fn from_streams(
        reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        std::thread::Builder::new()
            .name("ui-pipe-reader".into())
            .spawn(move || Self::reader_loop(reader, tx))
            .expect("failed to spawn ui pipe reader");
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            rx,
            child: Mutex::new(None),
        }
    }

    /// Spawn the UI helper and speak over its stdio.
    pub fn spawn_helper(binary: &Path, args: &[String]) -> std::io::Result<Self> {
        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let pipe = Self::from_streams(Box::new(stdout), Box::new(stdin));
        *pipe.child.lock() = Some(child);
        Ok(pipe)
    }

    fn reader_loop(reader: Box<dyn Read + Send>, tx: Sender<String>) {
        let mut lines = BufReader::new(reader).lines();
        while let Some(Ok(line)) = lines.next() {
            if tx.send(line).is_err() {
                return;
            }
        }
    }

    /// True when the helper process has exited.
    pub fn helper_exited(&self) -> bool {
        let mut guard = self.child.lock();
        match guard.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn kill_helper(&self) {
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Take the pipe mutex for one message sequence.
    pub fn write_lock(&self) -> UiPipeWriter<'_> {
        UiPipeWriter {
            guard: self.writer.lock(),
        }
    }

    pub fn try_recv_line(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    pub fn recv_line_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// One locked message sequence: stage lines, then flush.
pub struct UiPipeWriter<'a> {
    guard: MutexGuard<'a, BufWriter<Box<dyn Write + Send>>>,
}

impl UiPipeWriter<'_> {
    pub fn write_msg(&mut self, msg: &str) {
        debug_assert!(!msg.contains('\n'));
        let _ = writeln!(self.guard, "{msg}");
    }

    /// Like `write_msg`, but escapes the empty string to the null sentinel
    /// and strips embedded newlines.
    pub fn write_and_fix_msg(&mut self, msg: &str) {
        if msg.is_empty() {
            let _ = writeln!(self.guard, "{NULL_SENTINEL}");
        } else if msg.contains('\n') {
            let fixed = msg.replace('\n', " ");
            let _ = writeln!(self.guard, "{fixed}");
        } else {
            let _ = writeln!(self.guard, "{msg}");
        }
    }

    pub fn write_empty_msg(&mut self) {
        let _ = writeln!(self.guard);
    }

    pub fn flush_msgs(&mut self) {
        let _ = self.guard.flush();
    }
}

// -- engine→UI frames ----------------------------------------------------

impl UiPipe {
    pub fn send_error(&self, text: &str) {
        let mut w = self.write_lock();
        w.write_msg("error");
        w.write_and_fix_msg(text);
        w.flush_msgs();
    }

    pub fn send_engine_info(&self, max_plugins: u32, buffer_size: u32, sample_rate: f64) {
        let mut w = self.write_lock();
        w.write_msg("osc-urls");
        w.write_msg(NULL_SENTINEL);
        w.write_msg(NULL_SENTINEL);
        w.write_msg("max-plugin-number");
        w.write_msg(&max_plugins.to_string());
        w.write_msg("buffer-size");
        w.write_msg(&buffer_size.to_string());
        w.write_msg("sample-rate");
        w.write_msg(&fmt_f64(sample_rate));
        w.flush_msgs();
    }

    pub fn send_engine_option(&self, option: u32, forced: bool, value: &str) {
        let mut w = self.write_lock();
        w.write_msg(&format!("ENGINE_OPTION_{option}"));
        w.write_msg(fmt_bool(forced));
        w.write_and_fix_msg(value);
        w.flush_msgs();
    }

    pub fn send_runtime_info(&self, load: f32, xruns: u32) {
        let mut w = self.write_lock();
        w.write_msg("runtime-info");
        w.write_msg(&fmt_f32(load));
        w.write_msg(&xruns.to_string());
        w.flush_msgs();
    }

    pub fn send_transport(
        &self,
        playing: bool,
        frame: u64,
        bar: i32,
        beat: i32,
        tick: i32,
        bpm: f64,
    ) {
        let mut w = self.write_lock();
        w.write_msg("transport");
        w.write_msg(fmt_bool(playing));
        w.write_msg(&frame.to_string());
        w.write_msg(&format!("{bar}:{beat}:{tick}"));
        w.write_msg(&fmt_f64(bpm));
        w.flush_msgs();
    }

    pub fn send_peaks(&self, id: u32, peaks: (f32, f32, f32, f32)) {
        let mut w = self.write_lock();
        w.write_msg(&format!("PEAKS_{id}"));
        w.write_msg(&format!(
            "{}:{}:{}:{}",
            fmt_f32(peaks.0),
            fmt_f32(peaks.1),
            fmt_f32(peaks.2),
            fmt_f32(peaks.3)
        ));
        w.flush_msgs();
    }

    pub fn send_param_val(&self, id: u32, index: i32, value: f32) {
        let mut w = self.write_lock();
        w.write_msg(&format!("PARAMVAL_{id}:{index}"));
        w.write_msg(&fmt_f32(value));
        w.flush_msgs();
    }

    pub fn send_patchbay_group(&self, group: u32, name: &str) {
        let mut w = self.write_lock();
        w.write_msg(&format!("PATCHBAY_GROUP_{group}"));
        w.write_and_fix_msg(name);
        w.flush_msgs();
    }

    pub fn send_patchbay_port(
        &self,
        group: u32,
        port: u32,
        name: &str,
        is_input: bool,
        is_cv: bool,
        is_event: bool,
    ) {
        let mut w = self.write_lock();
        w.write_msg(&format!("PATCHBAY_PORT_{group}:{port}"));
        w.write_and_fix_msg(name);
        w.write_msg(fmt_bool(is_input));
        w.write_msg(fmt_bool(is_cv));
        w.write_msg(fmt_bool(is_event));
        w.flush_msgs();
    }

    pub fn send_patchbay_connection(
        &self,
        id: u32,
        src_group: u32,
        src_port: u32,
        dst_group: u32,
        dst_port: u32,
    ) {
        let mut w = self.write_lock();
        w.write_msg(&format!("PATCHBAY_CONN_{id}"));
        w.write_msg(&format!("{src_group}:{src_port}"));
        w.write_msg(&format!("{dst_group}:{dst_port}"));
        w.flush_msgs();
    }

    pub fn send_callback(&self, flat: &FlatCallback) {
        let mut w = self.write_lock();
        w.write_msg(&format!("ENGINE_CALLBACK_{}", flat.opcode));
        w.write_msg(&flat.plugin_id.to_string());
        w.write_msg(&flat.value1.to_string());
        w.write_msg(&flat.value2.to_string());
        w.write_msg(&flat.value3.to_string());
        w.write_msg(&fmt_f32(flat.valuef));
        w.write_and_fix_msg(&flat.value_str);
        w.flush_msgs();
    }
}

// -- UI→engine commands --------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    SetEngineOption { option: u32, value: String },
    ClearEngineXruns,
    CancelEngineAction,
    LoadFile { path: String },
    LoadProject { path: String },
    SaveProject { path: String },
    ClearProjectFilename,
    PatchbayConnect { src_group: u32, src_port: u32, dst_group: u32, dst_port: u32 },
    PatchbayDisconnect { id: u32 },
    PatchbayRefresh,
    TransportPlay,
    TransportPause,
    TransportBpm { bpm: f64 },
    TransportRelocate { frame: u64 },
    AddPlugin { ptype: String, filename: String, label: String },
    RemovePlugin { id: u32 },
    RemoveAllPlugins,
    RenamePlugin { id: u32, name: String },
    ClonePlugin { id: u32 },
    ReplacePlugin { id: u32 },
    SwitchPlugins { id_a: u32, id_b: u32 },
    LoadPluginState { id: u32, path: String },
    SavePluginState { id: u32, path: String },
    SetOption { id: u32, option: u32, yes: bool },
    SetActive { id: u32, active: bool },
    SetDryWet { id: u32, value: f32 },
    SetVolume { id: u32, value: f32 },
    SetBalanceLeft { id: u32, value: f32 },
    SetBalanceRight { id: u32, value: f32 },
    SetPanning { id: u32, value: f32 },
    SetCtrlChannel { id: u32, channel: i8 },
    SetParameterValue { id: u32, index: i32, value: f32 },
    SetParameterMidiChannel { id: u32, index: u32, channel: u8 },
    SetParameterMidiCc { id: u32, index: u32, cc: i16 },
    SetParameterTouch { id: u32, index: i32, touch: bool },
    SetProgram { id: u32, index: i32 },
    SetMidiProgram { id: u32, index: i32 },
    SetCustomData { id: u32, dtype: String, key: String, value: String },
    SetChunkData { id: u32, data: String },
    PrepareForSave { id: u32 },
    ResetParameters { id: u32 },
    RandomizeParameters { id: u32 },
    SendMidiNote { id: u32, channel: u8, note: u8, velocity: u8 },
    ShowCustomUi { id: u32, show: bool },
}

struct ArgReader<'a> {
    pipe: &'a UiPipe,
    command: &'a str,
}

impl ArgReader<'_> {
    fn next_str(&self) -> Result<String, String> {
        match self.pipe.recv_line_timeout(ARG_TIMEOUT) {
            Some(line) if line == NULL_SENTINEL => Ok(String::new()),
            Some(line) => Ok(line),
            None => Err(format!("missing argument for '{}'", self.command)),
        }
    }

    fn next_u32(&self) -> Result<u32, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad integer '{raw}' for '{}'", self.command))
    }

    fn next_i32(&self) -> Result<i32, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad integer '{raw}' for '{}'", self.command))
    }

    fn next_u8(&self) -> Result<u8, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad integer '{raw}' for '{}'", self.command))
    }

    fn next_i16(&self) -> Result<i16, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad integer '{raw}' for '{}'", self.command))
    }

    fn next_i8(&self) -> Result<i8, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad integer '{raw}' for '{}'", self.command))
    }

    fn next_u64(&self) -> Result<u64, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad integer '{raw}' for '{}'", self.command))
    }

    fn next_f32(&self) -> Result<f32, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad float '{raw}' for '{}'", self.command))
    }

    fn next_f64(&self) -> Result<f64, String> {
        let raw = self.next_str()?;
        raw.parse()
            .map_err(|_| format!("bad float '{raw}' for '{}'", self.command))
    }

    fn next_bool(&self) -> Result<bool, String> {
        Ok(self.next_str()? == "true")
    }
}

impl UiPipe {
    /// Parse the next queued command, if any. `Some(Err(text))` is a
    /// malformed command whose failure should go back as an `error` frame.
    pub fn read_command(&self) -> Option<Result<UiCommand, String>> {
        let name = self.try_recv_line()?;
        let args = ArgReader {
            pipe: self,
            command: &name,
        };
        let parsed = (|| -> Result<UiCommand, String> {
            Ok(match name.as_str() {
                "set_engine_option" => UiCommand::SetEngineOption {
                    option: args.next_u32()?,
                    value: args.next_str()?,
                },
                "clear_engine_xruns" => UiCommand::ClearEngineXruns,
                "cancel_engine_action" => UiCommand::CancelEngineAction,
                "load_file" => UiCommand::LoadFile {
                    path: args.next_str()?,
                },
                "load_project" => UiCommand::LoadProject {
                    path: args.next_str()?,
                },
                "save_project" => UiCommand::SaveProject {
                    path: args.next_str()?,
                },
                "clear_project_filename" => UiCommand::ClearProjectFilename,
                "patchbay_connect" => UiCommand::PatchbayConnect {
                    src_group: args.next_u32()?,
                    src_port: args.next_u32()?,
                    dst_group: args.next_u32()?,
                    dst_port: args.next_u32()?,
                },
                "patchbay_disconnect" => UiCommand::PatchbayDisconnect {
                    id: args.next_u32()?,
                },
                "patchbay_refresh" => UiCommand::PatchbayRefresh,
                "transport_play" => UiCommand::TransportPlay,
                "transport_pause" => UiCommand::TransportPause,
                "transport_bpm" => UiCommand::TransportBpm {
                    bpm: args.next_f64()?,
                },
                "transport_relocate" => UiCommand::TransportRelocate {
                    frame: args.next_u64()?,
                },
                "add_plugin" => UiCommand::AddPlugin {
                    ptype: args.next_str()?,
                    filename: args.next_str()?,
                    label: args.next_str()?,
                },
                "remove_plugin" => UiCommand::RemovePlugin {
                    id: args.next_u32()?,
                },
                "remove_all_plugins" => UiCommand::RemoveAllPlugins,
                "rename_plugin" => UiCommand::RenamePlugin {
                    id: args.next_u32()?,
                    name: args.next_str()?,
                },
                "clone_plugin" => UiCommand::ClonePlugin {
                    id: args.next_u32()?,
                },
                "replace_plugin" => UiCommand::ReplacePlugin {
                    id: args.next_u32()?,
                },
                "switch_plugins" => UiCommand::SwitchPlugins {
                    id_a: args.next_u32()?,
                    id_b: args.next_u32()?,
                },
                "load_plugin_state" => UiCommand::LoadPluginState {
                    id: args.next_u32()?,
                    path: args.next_str()?,
                },
                "save_plugin_state" => UiCommand::SavePluginState {
                    id: args.next_u32()?,
                    path: args.next_str()?,
                },
                "set_option" => UiCommand::SetOption {
                    id: args.next_u32()?,
                    option: args.next_u32()?,
                    yes: args.next_bool()?,
                },
                "set_active" => UiCommand::SetActive {
                    id: args.next_u32()?,
                    active: args.next_bool()?,
                },
                "set_drywet" => UiCommand::SetDryWet {
                    id: args.next_u32()?,
                    value: args.next_f32()?,
                },
                "set_volume" => UiCommand::SetVolume {
                    id: args.next_u32()?,
                    value: args.next_f32()?,
                },
                "set_balance_left" => UiCommand::SetBalanceLeft {
                    id: args.next_u32()?,
                    value: args.next_f32()?,
                },
                "set_balance_right" => UiCommand::SetBalanceRight {
                    id: args.next_u32()?,
                    value: args.next_f32()?,
                },
                "set_panning" => UiCommand::SetPanning {
                    id: args.next_u32()?,
                    value: args.next_f32()?,
                },
                "set_ctrl_channel" => UiCommand::SetCtrlChannel {
                    id: args.next_u32()?,
                    channel: args.next_i8()?,
                },
                "set_parameter_value" => UiCommand::SetParameterValue {
                    id: args.next_u32()?,
                    index: args.next_i32()?,
                    value: args.next_f32()?,
                },
                "set_parameter_midi_channel" => UiCommand::SetParameterMidiChannel {
                    id: args.next_u32()?,
                    index: args.next_u32()?,
                    channel: args.next_u8()?,
                },
                "set_parameter_midi_cc" => UiCommand::SetParameterMidiCc {
                    id: args.next_u32()?,
                    index: args.next_u32()?,
                    cc: args.next_i16()?,
                },
                "set_parameter_touch" => UiCommand::SetParameterTouch {
                    id: args.next_u32()?,
                    index: args.next_i32()?,
                    touch: args.next_bool()?,
                },
                "set_program" => UiCommand::SetProgram {
                    id: args.next_u32()?,
                    index: args.next_i32()?,
                },
                "set_midi_program" => UiCommand::SetMidiProgram {
                    id: args.next_u32()?,
                    index: args.next_i32()?,
                },
                "set_custom_data" => UiCommand::SetCustomData {
                    id: args.next_u32()?,
                    dtype: args.next_str()?,
                    key: args.next_str()?,
                    value: args.next_str()?,
                },
                "set_chunk_data" => UiCommand::SetChunkData {
                    id: args.next_u32()?,
                    data: args.next_str()?,
                },
                "prepare_for_save" => UiCommand::PrepareForSave {
                    id: args.next_u32()?,
                },
                "reset_parameters" => UiCommand::ResetParameters {
                    id: args.next_u32()?,
                },
                "randomize_parameters" => UiCommand::RandomizeParameters {
                    id: args.next_u32()?,
                },
                "send_midi_note" => UiCommand::SendMidiNote {
                    id: args.next_u32()?,
                    channel: args.next_u8()?,
                    note: args.next_u8()?,
                    velocity: args.next_u8()?,
                },
                "show_custom_ui" => UiCommand::ShowCustomUi {
                    id: args.next_u32()?,
                    show: args.next_bool()?,
                },
                other => return Err(format!("unknown command '{other}'")),
            })
        })();
        Some(parsed)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    fn pipe_pair() -> (UiPipe, UnixStream, UnixStream) {
        // ui_to_engine carries commands, engine_to_ui carries frames.
        let (ui_cmd_write, ui_cmd_read) = UnixStream::pair().unwrap();
        let (engine_write, engine_read) = UnixStream::pair().unwrap();
        let pipe = UiPipe::from_streams(
            Box::new(ui_cmd_read),
            Box::new(engine_write),
        );
        (pipe, ui_cmd_write, engine_read)
    }

    fn read_lines(stream: &UnixStream, count: usize) -> Vec<String> {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        (0..count)
            .map(|_| {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                line.trim_end_matches('\n').to_string()
            })
            .collect()
    }

    #[test]
    fn float_formatting_is_locale_independent() {
        assert_eq!(fmt_f32(0.5), "0.500000");
        assert_eq!(fmt_f64(48000.0), "48000.000000");
        assert_eq!(fmt_bool(true), "true");
    }

    #[test]
    fn param_val_frame_shape() {
        let (pipe, _cmd, engine_read) = pipe_pair();
        pipe.send_param_val(0, -3, 0.5);
        let lines = read_lines(&engine_read, 2);
        assert_eq!(lines, vec!["PARAMVAL_0:-3", "0.500000"]);
    }

    #[test]
    fn error_frame_escapes_empty_text() {
        let (pipe, _cmd, engine_read) = pipe_pair();
        pipe.send_error("");
        let lines = read_lines(&engine_read, 2);
        assert_eq!(lines, vec!["error", NULL_SENTINEL]);
    }

    #[test]
    fn set_volume_command_parses() {
        let (pipe, mut cmd, _engine_read) = pipe_pair();
        cmd.write_all(b"set_volume\n0\n0.5\n").unwrap();
        cmd.flush().unwrap();
        // Wait for the reader thread to deliver.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let parsed = loop {
            if let Some(parsed) = pipe.read_command() {
                break parsed;
            }
            assert!(std::time::Instant::now() < deadline, "command never arrived");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(
            parsed.unwrap(),
            UiCommand::SetVolume { id: 0, value: 0.5 }
        );
    }

    #[test]
    fn null_sentinel_means_empty() {
        let (pipe, mut cmd, _engine_read) = pipe_pair();
        cmd.write_all(b"add_plugin\ninternal\n(null)\ngain\n").unwrap();
        cmd.flush().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let parsed = loop {
            if let Some(parsed) = pipe.read_command() {
                break parsed;
            }
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(
            parsed.unwrap(),
            UiCommand::AddPlugin {
                ptype: "internal".into(),
                filename: String::new(),
                label: "gain".into(),
            }
        );
    }

    #[test]
    fn unknown_command_reports_an_error() {
        let (pipe, mut cmd, _engine_read) = pipe_pair();
        cmd.write_all(b"frobnicate\n").unwrap();
        cmd.flush().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let parsed = loop {
            if let Some(parsed) = pipe.read_command() {
                break parsed;
            }
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        };
        assert!(parsed.unwrap_err().contains("frobnicate"));
    }
}
