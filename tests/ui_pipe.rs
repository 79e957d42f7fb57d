//! UI pipe protocol against a live engine.

#![cfg(unix)]

use plugrack::{Engine, EngineConfig, UiPipe};
use plugrack_core::EngineOptions;
use plugrack_plugin::PluginType;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct UiHarness {
    engine: Arc<Engine>,
    commands: UnixStream,
    frames: BufReader<UnixStream>,
}

fn harness() -> UiHarness {
    let engine = Engine::new(
        EngineConfig::default(),
        EngineOptions::default(),
        128,
        48000.0,
    );
    engine.activate();
    engine
        .add_plugin(PluginType::Internal, "", "gain")
        .unwrap();

    let (cmd_write, cmd_read) = UnixStream::pair().unwrap();
    let (frame_write, frame_read) = UnixStream::pair().unwrap();
    // A stuck expectation should fail the test, not hang it.
    frame_read
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let pipe = UiPipe::from_streams(Box::new(cmd_read), Box::new(frame_write));
    engine.attach_ui_pipe(pipe);
    UiHarness {
        engine,
        commands: cmd_write,
        frames: BufReader::new(frame_read),
    }
}

impl UiHarness {
    fn send(&mut self, text: &str) {
        self.commands.write_all(text.as_bytes()).unwrap();
        self.commands.flush().unwrap();
        // Give the reader thread a moment to queue the lines.
        std::thread::sleep(Duration::from_millis(100));
    }

    /// Idle repeatedly until the expected frame (a line plus follow-up
    /// lines) appears.
    fn expect_frame(&mut self, head: &str, body: &[&str]) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            assert!(
                Instant::now() < deadline,
                "frame '{head}' never arrived"
            );
            self.engine.ui_idle();
            let mut line = String::new();
            while self.frames.read_line(&mut line).unwrap() > 0 {
                if line.trim_end_matches('\n') == head {
                    for expected in body {
                        let mut next = String::new();
                        self.frames.read_line(&mut next).unwrap();
                        assert_eq!(next.trim_end_matches('\n'), *expected);
                    }
                    return;
                }
                line.clear();
            }
        }
    }
}

#[test]
fn set_volume_echoes_the_internal_parameter_frame() {
    let mut ui = harness();
    ui.send("set_volume\n0\n0.5\n");
    ui.engine.ui_idle();
    // PARAMETER_VOLUME lives at internal index -3.
    ui.expect_frame("PARAMVAL_0:-3", &["0.500000"]);
    assert_eq!(ui.engine.plugin(0).unwrap().volume(), 0.5);
}

#[test]
fn snapshot_carries_engine_info_and_plugin_block() {
    let mut ui = harness();
    // attach_ui_pipe already sent the snapshot; just look for its pieces.
    ui.expect_frame("buffer-size", &["128"]);
    ui.expect_frame("PLUGIN_INFO_0", &["internal"]);
    ui.expect_frame("PARAMETER_COUNT_0", &["4"]);
}

#[test]
fn bad_command_gets_an_error_reply() {
    let mut ui = harness();
    ui.send("set_volume\n99\n0.5\n");
    ui.engine.ui_idle();
    ui.expect_frame("error", &["No plugin with id 99"]);
}

#[test]
fn set_parameter_value_command_updates_and_echoes() {
    let mut ui = harness();
    ui.send("set_parameter_value\n0\n0\n0.25\n");
    ui.engine.ui_idle();
    ui.expect_frame("PARAMVAL_0:0", &["0.250000"]);
    assert_eq!(
        ui.engine.plugin(0).unwrap().parameter_value(0),
        Some(0.25)
    );
}

#[test]
fn transport_commands_drive_the_clock() {
    let mut ui = harness();
    ui.send("transport_play\n");
    ui.engine.ui_idle();
    assert!(ui.engine.time_info().playing);
    ui.send("transport_relocate\n48000\n");
    ui.engine.ui_idle();
    assert_eq!(ui.engine.time_info().frame, 48000);
    ui.send("transport_pause\n");
    ui.engine.ui_idle();
    assert!(!ui.engine.time_info().playing);
}

#[test]
fn remove_all_plugins_via_pipe() {
    let mut ui = harness();
    ui.send("remove_all_plugins\n");
    ui.engine.ui_idle();
    assert_eq!(ui.engine.plugin_count(), 0);
}
