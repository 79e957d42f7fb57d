//! Bridge transport against an in-thread worker over real shared memory.

#![cfg(unix)]

use plugrack_core::{EngineTimeInfo, PostRtQueue, MAX_INTERNAL_EVENT_COUNT};
use plugrack_plugin::builtin::{gain_params, GainInstance};
use plugrack_plugin::protocol::NonRtClientOpcode;
use plugrack_plugin::{BridgeTransport, Plugin, PluginType, ServerMessage};
use plugrack_plugin_server::BridgeServer;
use std::sync::Arc;
use std::time::Duration;

const BUFFER: u32 = 64;

struct BridgeHarness {
    transport: Arc<BridgeTransport>,
    plugin: Arc<Plugin>,
    server_thread: Option<std::thread::JoinHandle<()>>,
}

/// Full client/worker handshake with the worker living on a thread.
fn connect() -> BridgeHarness {
    let transport =
        Arc::new(BridgeTransport::new(0, 0, 0, 0, BUFFER, 48000.0).unwrap());
    let mut server =
        BridgeServer::attach(&transport.shm_ids(), Box::new(GainInstance::new())).unwrap();
    server.describe().unwrap();

    let mut messages = Vec::new();
    transport.wait_for_ready(&mut messages).unwrap();
    assert!(messages
        .iter()
        .any(|msg| matches!(msg, ServerMessage::Ready)));

    let plugin = Arc::new(Plugin::new_bridged(
        0,
        PluginType::Internal,
        "",
        "gain",
        Arc::clone(&transport),
        Arc::new(PostRtQueue::new()),
        BUFFER,
    ));
    for msg in &messages {
        plugin.apply_server_message(msg, BUFFER);
    }
    assert_eq!(plugin.audio_in_count(), 2);
    assert_eq!(plugin.audio_out_count(), 2);
    assert_eq!(plugin.parameter_count(), gain_params::COUNT);

    transport
        .configure_pool(2, 2, 0, 0, BUFFER)
        .unwrap();
    plugin.set_enabled(true);
    plugin.set_active(true);
    // Let the worker apply the pool resize and activation before cycles.
    server.drain_non_rt().unwrap();

    let server_thread = std::thread::spawn(move || {
        while server.tick(Duration::from_millis(20)).unwrap_or(false) {}
    });
    BridgeHarness {
        transport,
        plugin,
        server_thread: Some(server_thread),
    }
}

impl BridgeHarness {
    fn process(&self, input: f32) -> (Vec<f32>, Vec<f32>) {
        let frames = BUFFER as usize;
        let in_l = vec![input; frames];
        let in_r = vec![input; frames];
        let mut out_l = vec![-9.0f32; frames];
        let mut out_r = vec![-9.0f32; frames];
        let mut events_out = Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT);
        {
            let ins: [&[f32]; 2] = [&in_l, &in_r];
            let mut outs: [&mut [f32]; 2] = [&mut out_l, &mut out_r];
            self.plugin.process(
                &ins,
                &mut outs,
                &[],
                &mut [],
                &[],
                &mut events_out,
                BUFFER,
                &EngineTimeInfo::default(),
                false,
            );
        }
        (out_l, out_r)
    }

    fn shutdown(&mut self) {
        let _ = self.transport.send_simple(NonRtClientOpcode::Quit);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BridgeHarness {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[test]
fn handshake_describes_the_remote_plugin() {
    let mut harness = connect();
    let shared = harness.plugin.master().lock();
    assert_eq!(shared.real_name, "Gain");
    assert_eq!(shared.params[gain_params::GAIN as usize].ranges.max, 2.0);
    assert_eq!(
        shared.params[gain_params::GAIN as usize].value,
        1.0
    );
    drop(shared);
    harness.shutdown();
}

#[test]
fn process_round_trips_audio_through_the_worker() {
    let mut harness = connect();
    let (left, right) = harness.process(0.5);
    assert_eq!(left, vec![0.5; BUFFER as usize]);
    assert_eq!(right, vec![0.5; BUFFER as usize]);
    assert!(!harness.transport.is_timed_out());
    harness.shutdown();
}

#[test]
fn parameter_changes_reach_the_worker_before_the_next_cycle() {
    let mut harness = connect();
    harness.plugin.set_parameter_value(gain_params::GAIN as i32, 0.5);
    // The non-RT ring drains on the worker's loop; give it a tick.
    std::thread::sleep(Duration::from_millis(120));
    let (left, _) = harness.process(1.0);
    assert_eq!(left, vec![0.5; BUFFER as usize]);
    harness.shutdown();
}

#[test]
fn dead_worker_times_out_sticky_and_silences() {
    let mut harness = connect();
    // First cycle works.
    let (left, _) = harness.process(1.0);
    assert_eq!(left, vec![1.0; BUFFER as usize]);

    // Kill the worker loop; the next cycle expires the rendezvous and the
    // flag sticks.
    harness.shutdown();
    let (left, right) = harness.process(1.0);
    assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
    assert!(harness.transport.is_timed_out());

    // While sticky, cycles silence without the full wait.
    let started = std::time::Instant::now();
    let (left, _) = harness.process(1.0);
    assert!(left.iter().all(|&s| s == 0.0));
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(harness.transport.is_timed_out());
}

#[test]
fn crashed_child_process_is_detected_once() {
    let transport =
        Arc::new(BridgeTransport::new(0, 0, 0, 0, BUFFER, 48000.0).unwrap());
    // A worker that exits immediately without speaking the protocol.
    transport
        .spawn_worker(
            std::path::Path::new("/bin/true"),
            "internal",
            "",
            "gain",
            0,
            &[],
            false,
        )
        .unwrap();
    let mut messages = Vec::new();
    let err = transport.wait_for_ready(&mut messages).unwrap_err();
    assert!(matches!(
        err,
        plugrack_plugin::BridgeError::ProcessCrashed
    ));
    assert!(transport.check_crashed());
    // Sticky: still reported as crashed afterwards.
    assert!(transport.check_crashed());
    assert!(!transport.ping_and_check(1000));
}

#[test]
fn ui_injected_notes_reach_the_worker_mailbox() {
    let mut harness = connect();
    harness.plugin.send_midi_note(0, 64, 101);
    std::thread::sleep(Duration::from_millis(120));
    // The note rides the non-RT ring; the next cycle consumes it without
    // disturbing audio.
    let (left, _) = harness.process(0.25);
    assert_eq!(left, vec![0.25; BUFFER as usize]);
    harness.shutdown();
}
