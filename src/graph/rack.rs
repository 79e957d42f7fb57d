//! Rack: fixed 2-in/2-out serial chain in plugin-table order.

use plugrack_core::{EngineTimeInfo, EventBus};
use plugrack_plugin::Plugin;
use std::sync::Arc;

pub struct RackGraph {
    /// Running buffer pair and the per-plugin scratch pair. The running
    /// buffer never aliases a plugin's input: each hop reads `run` and
    /// writes `next`, then the pair swaps.
    run: [Vec<f32>; 2],
    next: [Vec<f32>; 2],
    force_stereo: bool,
}

impl RackGraph {
    pub fn new(buffer_size: u32, force_stereo: bool) -> Self {
        let frames = buffer_size as usize;
        Self {
            run: [vec![0.0; frames], vec![0.0; frames]],
            next: [vec![0.0; frames], vec![0.0; frames]],
            force_stereo,
        }
    }

    pub fn buffer_size_changed(&mut self, buffer_size: u32) {
        let frames = buffer_size as usize;
        for buf in self.run.iter_mut().chain(self.next.iter_mut()) {
            buf.resize(frames, 0.0);
            buf.fill(0.0);
        }
    }

    /// Process the chain. Disabled or inactive plugins are bypassed;
    /// anything a plugin refuses to compute (lock contention, bridge
    /// timeout) comes out as silence from that hop onward.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        plugins: &[Arc<Plugin>],
        bus: &mut EventBus,
        ins: &[&[f32]],
        outs: &mut [&mut [f32]],
        frames: u32,
        time: &EngineTimeInfo,
        offline: bool,
    ) {
        let n = frames as usize;
        for ch in 0..2 {
            match ins.get(ch) {
                Some(input) => self.run[ch][..n].copy_from_slice(&input[..n]),
                None => self.run[ch][..n].fill(0.0),
            }
        }

        for plugin in plugins {
            if !plugin.is_enabled() || !plugin.is_active() {
                continue;
            }
            let audio_in = plugin.audio_in_count();
            let audio_out = plugin.audio_out_count();

            let (events_in, events_out) = bus.split();
            {
                let (run_l, run_r) = self.run.split_at(1);
                let (next_l, next_r) = self.next.split_at_mut(1);
                let in_refs: [&[f32]; 2] = [&run_l[0][..n], &run_r[0][..n]];
                let mut out_refs: [&mut [f32]; 2] =
                    [&mut next_l[0][..n], &mut next_r[0][..n]];
                match (audio_in, audio_out) {
                    (_, 0) => {
                        // Sink or event-only plugin: feed it, keep the
                        // running signal.
                        plugin.process(
                            &in_refs[..audio_in.min(2) as usize],
                            &mut [],
                            &[],
                            &mut [],
                            events_in,
                            events_out,
                            frames,
                            time,
                            offline,
                        );
                        continue;
                    }
                    (1, 1) => {
                        plugin.process(
                            &in_refs[..1],
                            &mut out_refs[..1],
                            &[],
                            &mut [],
                            events_in,
                            events_out,
                            frames,
                            time,
                            offline,
                        );
                    }
                    _ => {
                        plugin.process(
                            &in_refs[..audio_in.min(2) as usize],
                            &mut out_refs[..audio_out.min(2) as usize],
                            &[],
                            &mut [],
                            events_in,
                            events_out,
                            frames,
                            time,
                            offline,
                        );
                    }
                }
            }
            // Fill the second channel for mono hops.
            if audio_out == 1 {
                if self.force_stereo {
                    let (left, right) = self.next.split_at_mut(1);
                    right[0][..n].copy_from_slice(&left[0][..n]);
                } else {
                    let (run, next) = (&self.run, &mut self.next);
                    next[1][..n].copy_from_slice(&run[1][..n]);
                }
            }
            std::mem::swap(&mut self.run, &mut self.next);
        }

        for (ch, out) in outs.iter_mut().enumerate().take(2) {
            match ch {
                0 | 1 => out[..n].copy_from_slice(&self.run[ch][..n]),
                _ => out[..n].fill(0.0),
            }
        }
        for out in outs.iter_mut().skip(2) {
            out[..n].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugrack_core::PostRtQueue;
    use plugrack_plugin::builtin::{gain_params, GainInstance, PassthroughInstance};
    use plugrack_plugin::PluginType;

    fn arc_plugin(instance: Box<dyn plugrack_plugin::PluginInstance>, id: u32) -> Arc<Plugin> {
        let plugin = Plugin::new_local(
            id,
            PluginType::Internal,
            "",
            instance,
            Arc::new(PostRtQueue::new()),
            64,
            200,
            false,
        );
        plugin.set_enabled(true);
        plugin.set_active(true);
        Arc::new(plugin)
    }

    fn run_chain(graph: &mut RackGraph, plugins: &[Arc<Plugin>], input: [&[f32]; 2]) -> (Vec<f32>, Vec<f32>) {
        let frames = input[0].len();
        let mut bus = EventBus::new();
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        {
            let mut outs: [&mut [f32]; 2] = [&mut left, &mut right];
            graph.process(
                plugins,
                &mut bus,
                &input,
                &mut outs,
                frames as u32,
                &EngineTimeInfo::default(),
                false,
            );
        }
        (left, right)
    }

    #[test]
    fn empty_chain_is_identity() {
        let mut graph = RackGraph::new(64, false);
        let a: Vec<f32> = (0..64).map(|k| (k as f32 * 0.01).sin()).collect();
        let b: Vec<f32> = (0..64).map(|k| (k as f32 * 0.02).cos()).collect();
        let (l, r) = run_chain(&mut graph, &[], [&a, &b]);
        assert_eq!(l, a);
        assert_eq!(r, b);
    }

    #[test]
    fn chained_gains_multiply() {
        let mut graph = RackGraph::new(16, false);
        let first = arc_plugin(Box::new(GainInstance::new()), 0);
        let second = arc_plugin(Box::new(GainInstance::new()), 1);
        first.set_parameter_value(gain_params::GAIN as i32, 0.5);
        second.set_parameter_value(gain_params::GAIN as i32, 0.5);
        let input = [1.0f32; 16];
        let (l, _) = run_chain(&mut graph, &[first, second], [&input, &input]);
        assert_eq!(l, vec![0.25; 16]);
    }

    #[test]
    fn bypassed_plugin_passes_signal_through() {
        let mut graph = RackGraph::new(8, false);
        let plugin = arc_plugin(Box::new(GainInstance::new()), 0);
        plugin.set_parameter_value(gain_params::GAIN as i32, 0.0);
        plugin.set_active(false);
        let input = [0.7f32; 8];
        let (l, _) = run_chain(&mut graph, &[plugin], [&input, &input]);
        assert_eq!(l, vec![0.7; 8]);
    }

    #[test]
    fn mono_plugin_duplicates_under_force_stereo() {
        let mut graph = RackGraph::new(8, true);
        let plugin = arc_plugin(Box::new(PassthroughInstance::with_ports(1, 1)), 0);
        let a = [0.3f32; 8];
        let b = [0.9f32; 8];
        let (l, r) = run_chain(&mut graph, &[plugin], [&a, &b]);
        assert_eq!(l, vec![0.3; 8]);
        assert_eq!(r, vec![0.3; 8]);
    }

    #[test]
    fn mono_plugin_without_force_stereo_keeps_right_channel() {
        let mut graph = RackGraph::new(8, false);
        let plugin = arc_plugin(Box::new(PassthroughInstance::with_ports(1, 1)), 0);
        let a = [0.3f32; 8];
        let b = [0.9f32; 8];
        let (l, r) = run_chain(&mut graph, &[plugin], [&a, &b]);
        assert_eq!(l, vec![0.3; 8]);
        assert_eq!(r, vec![0.9; 8]);
    }
}
