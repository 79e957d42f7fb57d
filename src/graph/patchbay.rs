//! Patchbay: explicit node graph with arbitrary port counts and CV.
//!
//! Groups are dense integers. The reserved groups expose the engine's own
//! audio/CV/MIDI boundary; each plugin gets `GROUP_PLUGIN_BASE + id`. Port
//! numbers within a group count audio ports first, then CV, then the event
//! port at [`EVENT_PORT`]; input and output port spaces are independent
//! (the connection's direction disambiguates).
//!
//! Connection ids are stable until `refresh`, which renumbers.

use plugrack_core::{EngineEvent, EngineTimeInfo, EventBus, MAX_INTERNAL_EVENT_COUNT};
use plugrack_plugin::Plugin;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

pub const GROUP_AUDIO_IN: u32 = 1;
pub const GROUP_AUDIO_OUT: u32 = 2;
pub const GROUP_MIDI_IN: u32 = 3;
pub const GROUP_MIDI_OUT: u32 = 4;
pub const GROUP_CV_IN: u32 = 5;
pub const GROUP_CV_OUT: u32 = 6;
pub const GROUP_PLUGIN_BASE: u32 = 10;

/// Port number of a group's event stream.
pub const EVENT_PORT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: u32,
    pub src_group: u32,
    pub src_port: u32,
    pub dst_group: u32,
    pub dst_port: u32,
}

#[derive(Debug, Clone)]
pub struct PortDescription {
    pub group: u32,
    pub port: u32,
    pub name: String,
    pub is_input: bool,
    pub is_cv: bool,
    pub is_event: bool,
}

/// Complete topology emitted to the UI on refresh.
#[derive(Debug, Clone, Default)]
pub struct PatchbaySnapshot {
    pub groups: Vec<(u32, String)>,
    pub ports: Vec<PortDescription>,
    pub connections: Vec<Connection>,
}

/// Per-plugin-node cycle storage, allocated off the RT path.
struct NodeIo {
    audio_in: Vec<Vec<f32>>,
    audio_out: Vec<Vec<f32>>,
    cv_in: Vec<Vec<f32>>,
    cv_out: Vec<Vec<f32>>,
    events_in: Vec<EngineEvent>,
    events_out: Vec<EngineEvent>,
}

pub struct PatchbayGraph {
    buffer_size: u32,
    ext_audio_in: u32,
    ext_audio_out: u32,
    ext_cv_in: u32,
    ext_cv_out: u32,
    connections: Vec<Connection>,
    next_id: u32,
    nodes: HashMap<u32, NodeIo>,
    /// Plugin ids in dependency order; rebuilt on every topology change.
    order: Vec<u32>,
}

impl PatchbayGraph {
    pub fn new(
        buffer_size: u32,
        ext_audio_in: u32,
        ext_audio_out: u32,
        ext_cv_in: u32,
        ext_cv_out: u32,
    ) -> Self {
        Self {
            buffer_size,
            ext_audio_in,
            ext_audio_out,
            ext_cv_in,
            ext_cv_out,
            connections: Vec::new(),
            next_id: 1,
            nodes: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn buffer_size_changed(&mut self, buffer_size: u32) {
        self.buffer_size = buffer_size;
        let frames = buffer_size as usize;
        for node in self.nodes.values_mut() {
            for buf in node
                .audio_in
                .iter_mut()
                .chain(node.audio_out.iter_mut())
                .chain(node.cv_in.iter_mut())
                .chain(node.cv_out.iter_mut())
            {
                buf.resize(frames, 0.0);
            }
        }
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Register a plugin node and allocate its cycle storage.
    pub fn add_node(&mut self, plugin: &Plugin) {
        let frames = self.buffer_size as usize;
        let make = |count: u32| (0..count).map(|_| vec![0.0f32; frames]).collect();
        self.nodes.insert(
            plugin.id(),
            NodeIo {
                audio_in: make(plugin.audio_in_count()),
                audio_out: make(plugin.audio_out_count()),
                cv_in: make(plugin.cv_in_count()),
                cv_out: make(plugin.cv_out_count()),
                events_in: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
                events_out: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
            },
        );
        self.rebuild_order();
    }

    pub fn remove_node(&mut self, plugin_id: u32) {
        self.nodes.remove(&plugin_id);
        let group = GROUP_PLUGIN_BASE + plugin_id;
        self.connections
            .retain(|c| c.src_group != group && c.dst_group != group);
        self.rebuild_order();
    }

    /// Re-key nodes and rewrite connection groups after plugin ids moved
    /// (removal compacts the table; switch swaps two slots).
    pub fn renumber_nodes(&mut self, mapping: &[(u32, u32)]) {
        let lookup: HashMap<u32, u32> = mapping.iter().copied().collect();
        let mut renamed = HashMap::with_capacity(self.nodes.len());
        for (old, node) in self.nodes.drain() {
            renamed.insert(lookup.get(&old).copied().unwrap_or(old), node);
        }
        self.nodes = renamed;
        for conn in &mut self.connections {
            for slot in [&mut conn.src_group, &mut conn.dst_group] {
                if let Some(id) = slot.checked_sub(GROUP_PLUGIN_BASE) {
                    if let Some(&new) = lookup.get(&id) {
                        *slot = GROUP_PLUGIN_BASE + new;
                    }
                }
            }
        }
        self.rebuild_order();
    }

    fn plugin_of_group(group: u32) -> Option<u32> {
        group.checked_sub(GROUP_PLUGIN_BASE)
    }

    fn source_port_exists(&self, group: u32, port: u32) -> bool {
        match group {
            GROUP_AUDIO_IN => port < self.ext_audio_in,
            GROUP_CV_IN => port < self.ext_cv_in,
            GROUP_MIDI_IN => port == EVENT_PORT,
            _ => match Self::plugin_of_group(group).and_then(|id| self.nodes.get(&id)) {
                Some(node) => {
                    if port == EVENT_PORT {
                        true
                    } else {
                        (port as usize) < node.audio_out.len() + node.cv_out.len()
                    }
                }
                None => false,
            },
        }
    }

    fn dest_port_exists(&self, group: u32, port: u32) -> bool {
        match group {
            GROUP_AUDIO_OUT => port < self.ext_audio_out,
            GROUP_CV_OUT => port < self.ext_cv_out,
            GROUP_MIDI_OUT => port == EVENT_PORT,
            _ => match Self::plugin_of_group(group).and_then(|id| self.nodes.get(&id)) {
                Some(node) => {
                    if port == EVENT_PORT {
                        true
                    } else {
                        (port as usize) < node.audio_in.len() + node.cv_in.len()
                    }
                }
                None => false,
            },
        }
    }

    /// Add a connection, returning its id. Rejects unknown ports,
    /// duplicates, and cycles.
    pub fn connect(
        &mut self,
        src_group: u32,
        src_port: u32,
        dst_group: u32,
        dst_port: u32,
    ) -> Result<u32, String> {
        if !self.source_port_exists(src_group, src_port) {
            return Err(format!("no such source port {src_group}:{src_port}"));
        }
        if !self.dest_port_exists(dst_group, dst_port) {
            return Err(format!("no such destination port {dst_group}:{dst_port}"));
        }
        if self.connections.iter().any(|c| {
            c.src_group == src_group
                && c.src_port == src_port
                && c.dst_group == dst_group
                && c.dst_port == dst_port
        }) {
            return Err("connection already exists".into());
        }
        if self.would_cycle(src_group, dst_group) {
            return Err("connection would create a cycle".into());
        }
        let id = self.next_id;
        self.next_id += 1;
        self.connections.push(Connection {
            id,
            src_group,
            src_port,
            dst_group,
            dst_port,
        });
        self.rebuild_order();
        Ok(id)
    }

    pub fn disconnect(&mut self, id: u32) -> Result<(), String> {
        let before = self.connections.len();
        self.connections.retain(|c| c.id != id);
        if self.connections.len() == before {
            return Err(format!("no connection with id {id}"));
        }
        self.rebuild_order();
        Ok(())
    }

    /// Would an edge `src → dst` close a plugin-to-plugin loop?
    fn would_cycle(&self, src_group: u32, dst_group: u32) -> bool {
        let (Some(src), Some(dst)) = (
            Self::plugin_of_group(src_group),
            Self::plugin_of_group(dst_group),
        ) else {
            return false;
        };
        if src == dst {
            return true;
        }
        // DFS from dst through existing plugin edges looking for src.
        let mut stack = vec![dst];
        let mut seen = vec![dst];
        while let Some(at) = stack.pop() {
            for conn in &self.connections {
                let (Some(from), Some(to)) = (
                    Self::plugin_of_group(conn.src_group),
                    Self::plugin_of_group(conn.dst_group),
                ) else {
                    continue;
                };
                if from == at && !seen.contains(&to) {
                    if to == src {
                        return true;
                    }
                    seen.push(to);
                    stack.push(to);
                }
            }
        }
        false
    }

    /// Kahn's topological order over plugin nodes.
    fn rebuild_order(&mut self) {
        let mut in_degree: HashMap<u32, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        for conn in &self.connections {
            let (Some(from), Some(to)) = (
                Self::plugin_of_group(conn.src_group),
                Self::plugin_of_group(conn.dst_group),
            ) else {
                continue;
            };
            if self.nodes.contains_key(&from) && self.nodes.contains_key(&to) {
                *in_degree.entry(to).or_insert(0) += 1;
            }
        }
        let mut ready: Vec<u32> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_unstable();
        self.order.clear();
        while let Some(id) = ready.pop() {
            self.order.push(id);
            for conn in &self.connections {
                let (Some(from), Some(to)) = (
                    Self::plugin_of_group(conn.src_group),
                    Self::plugin_of_group(conn.dst_group),
                ) else {
                    continue;
                };
                if from == id {
                    if let Some(deg) = in_degree.get_mut(&to) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push(to);
                        }
                    }
                }
            }
        }
    }

    /// Renumber connection ids and describe the whole topology.
    pub fn refresh(&mut self, plugins: &[Arc<Plugin>]) -> PatchbaySnapshot {
        for (at, conn) in self.connections.iter_mut().enumerate() {
            conn.id = at as u32 + 1;
        }
        self.next_id = self.connections.len() as u32 + 1;

        let mut snapshot = PatchbaySnapshot::default();
        snapshot.groups.push((GROUP_AUDIO_IN, "Audio In".into()));
        snapshot.groups.push((GROUP_AUDIO_OUT, "Audio Out".into()));
        snapshot.groups.push((GROUP_MIDI_IN, "MIDI In".into()));
        snapshot.groups.push((GROUP_MIDI_OUT, "MIDI Out".into()));
        if self.ext_cv_in > 0 {
            snapshot.groups.push((GROUP_CV_IN, "CV In".into()));
        }
        if self.ext_cv_out > 0 {
            snapshot.groups.push((GROUP_CV_OUT, "CV Out".into()));
        }
        for port in 0..self.ext_audio_in {
            snapshot.ports.push(PortDescription {
                group: GROUP_AUDIO_IN,
                port,
                name: format!("capture_{}", port + 1),
                is_input: false,
                is_cv: false,
                is_event: false,
            });
        }
        for port in 0..self.ext_audio_out {
            snapshot.ports.push(PortDescription {
                group: GROUP_AUDIO_OUT,
                port,
                name: format!("playback_{}", port + 1),
                is_input: true,
                is_cv: false,
                is_event: false,
            });
        }
        snapshot.ports.push(PortDescription {
            group: GROUP_MIDI_IN,
            port: EVENT_PORT,
            name: "midi-in".into(),
            is_input: false,
            is_cv: false,
            is_event: true,
        });
        snapshot.ports.push(PortDescription {
            group: GROUP_MIDI_OUT,
            port: EVENT_PORT,
            name: "midi-out".into(),
            is_input: true,
            is_cv: false,
            is_event: true,
        });

        for plugin in plugins {
            let group = GROUP_PLUGIN_BASE + plugin.id();
            snapshot.groups.push((group, plugin.name()));
            let shared = plugin.master().lock();
            let audio_ins = shared.ports.audio_in.len() as u32;
            let audio_outs = shared.ports.audio_out.len() as u32;
            for (at, port) in shared.ports.audio_in.iter().enumerate() {
                snapshot.ports.push(PortDescription {
                    group,
                    port: at as u32,
                    name: port.name.clone(),
                    is_input: true,
                    is_cv: false,
                    is_event: false,
                });
            }
            for (at, port) in shared.ports.audio_out.iter().enumerate() {
                snapshot.ports.push(PortDescription {
                    group,
                    port: at as u32,
                    name: port.name.clone(),
                    is_input: false,
                    is_cv: false,
                    is_event: false,
                });
            }
            for (at, port) in shared.ports.cv_in.iter().enumerate() {
                snapshot.ports.push(PortDescription {
                    group,
                    port: audio_ins + at as u32,
                    name: port.name.clone(),
                    is_input: true,
                    is_cv: true,
                    is_event: false,
                });
            }
            for (at, port) in shared.ports.cv_out.iter().enumerate() {
                snapshot.ports.push(PortDescription {
                    group,
                    port: audio_outs + at as u32,
                    name: port.name.clone(),
                    is_input: false,
                    is_cv: true,
                    is_event: false,
                });
            }
            if let Some(port) = &shared.ports.event_in {
                snapshot.ports.push(PortDescription {
                    group,
                    port: EVENT_PORT,
                    name: port.name.clone(),
                    is_input: true,
                    is_cv: false,
                    is_event: true,
                });
            }
            if let Some(port) = &shared.ports.event_out {
                snapshot.ports.push(PortDescription {
                    group,
                    port: EVENT_PORT,
                    name: port.name.clone(),
                    is_input: false,
                    is_cv: false,
                    is_event: true,
                });
            }
        }
        snapshot.connections = self.connections.clone();
        snapshot
    }

    /// One audio cycle: route, process nodes in dependency order, sum into
    /// the external outputs.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        plugins: &[Arc<Plugin>],
        bus: &mut EventBus,
        ins: &[&[f32]],
        outs: &mut [&mut [f32]],
        cv_ins: &[&[f32]],
        cv_outs: &mut [&mut [f32]],
        frames: u32,
        time: &EngineTimeInfo,
        offline: bool,
    ) {
        let n = frames as usize;
        for out in outs.iter_mut() {
            out[..n].fill(0.0);
        }
        for out in cv_outs.iter_mut() {
            out[..n].fill(0.0);
        }

        for at in 0..self.order.len() {
            let node_id = self.order[at];
            // Take the node out so its sources can be read from the map
            // without aliasing. Re-inserting reuses the map's capacity, so
            // no allocation happens on this path.
            let Some(mut node) = self.nodes.remove(&node_id) else {
                continue;
            };
            let group = GROUP_PLUGIN_BASE + node_id;
            for buf in node.audio_in.iter_mut().chain(node.cv_in.iter_mut()) {
                buf[..n].fill(0.0);
            }
            node.events_in.clear();
            for c in 0..self.connections.len() {
                let conn = self.connections[c];
                if conn.dst_group == group {
                    self.route_into_node(&mut node, conn, ins, cv_ins, bus, n);
                }
            }
            if let Some(plugin) = plugins.iter().find(|p| p.id() == node_id) {
                node.events_out.clear();
                let in_refs: SmallVec<[&[f32]; 8]> =
                    node.audio_in.iter().map(|b| &b[..n]).collect();
                let cv_in_refs: SmallVec<[&[f32]; 8]> =
                    node.cv_in.iter().map(|b| &b[..n]).collect();
                let mut out_refs: SmallVec<[&mut [f32]; 8]> =
                    node.audio_out.iter_mut().map(|b| &mut b[..n]).collect();
                let mut cv_out_refs: SmallVec<[&mut [f32]; 8]> =
                    node.cv_out.iter_mut().map(|b| &mut b[..n]).collect();
                plugin.process(
                    &in_refs,
                    &mut out_refs,
                    &cv_in_refs,
                    &mut cv_out_refs,
                    &node.events_in,
                    &mut node.events_out,
                    frames,
                    time,
                    offline,
                );
            }
            self.nodes.insert(node_id, node);
        }

        // External sinks.
        for conn in &self.connections {
            match conn.dst_group {
                GROUP_AUDIO_OUT => {
                    if let Some(src) = self.source_buffer(conn, ins, cv_ins) {
                        if let Some(out) = outs.get_mut(conn.dst_port as usize) {
                            for k in 0..n {
                                out[k] += src[k];
                            }
                        }
                    }
                }
                GROUP_CV_OUT => {
                    if let Some(src) = self.source_buffer(conn, ins, cv_ins) {
                        if let Some(out) = cv_outs.get_mut(conn.dst_port as usize) {
                            for k in 0..n {
                                out[k] += src[k];
                            }
                        }
                    }
                }
                GROUP_MIDI_OUT => {
                    if let Some(src) = Self::plugin_of_group(conn.src_group) {
                        if let Some(node) = self.nodes.get(&src) {
                            for ev in &node.events_out {
                                bus.push_output(*ev);
                            }
                        }
                    } else if conn.src_group == GROUP_MIDI_IN {
                        for at in 0..bus.input().len() {
                            let ev = bus.input()[at];
                            bus.push_output(ev);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Resolve a connection's source into a borrowed block, for external
    /// sinks. Plugin sources read the node's already-computed outputs.
    fn source_buffer<'a>(
        &'a self,
        conn: &Connection,
        ins: &'a [&'a [f32]],
        cv_ins: &'a [&'a [f32]],
    ) -> Option<&'a [f32]> {
        match conn.src_group {
            GROUP_AUDIO_IN => ins.get(conn.src_port as usize).copied(),
            GROUP_CV_IN => cv_ins.get(conn.src_port as usize).copied(),
            _ => {
                let id = Self::plugin_of_group(conn.src_group)?;
                let node = self.nodes.get(&id)?;
                let port = conn.src_port as usize;
                if port < node.audio_out.len() {
                    Some(&node.audio_out[port])
                } else {
                    node.cv_out.get(port - node.audio_out.len()).map(|b| b.as_slice())
                }
            }
        }
    }

    /// Sum one connection into a taken-out node's input storage. The node
    /// is absent from the map, so its sources can be borrowed from it.
    fn route_into_node(
        &self,
        node: &mut NodeIo,
        conn: Connection,
        ins: &[&[f32]],
        cv_ins: &[&[f32]],
        bus: &EventBus,
        n: usize,
    ) {
        // Event routing.
        if conn.dst_port == EVENT_PORT {
            let events: &[EngineEvent] = match conn.src_group {
                GROUP_MIDI_IN => bus.input(),
                _ => match Self::plugin_of_group(conn.src_group)
                    .and_then(|id| self.nodes.get(&id))
                {
                    Some(src_node) => &src_node.events_out,
                    None => return,
                },
            };
            for ev in events {
                if node.events_in.len() >= MAX_INTERNAL_EVENT_COUNT {
                    break;
                }
                node.events_in.push(*ev);
            }
            return;
        }

        // Audio/CV routing.
        let src: Option<&[f32]> = match conn.src_group {
            GROUP_AUDIO_IN => ins.get(conn.src_port as usize).copied(),
            GROUP_CV_IN => cv_ins.get(conn.src_port as usize).copied(),
            _ => Self::plugin_of_group(conn.src_group)
                .and_then(|id| self.nodes.get(&id))
                .and_then(|src_node| {
                    let port = conn.src_port as usize;
                    if port < src_node.audio_out.len() {
                        Some(src_node.audio_out[port].as_slice())
                    } else {
                        src_node
                            .cv_out
                            .get(port - src_node.audio_out.len())
                            .map(|b| b.as_slice())
                    }
                }),
        };
        let Some(src) = src else {
            return;
        };
        let audio_ins = node.audio_in.len();
        let port = conn.dst_port as usize;
        let dst = if port < audio_ins {
            node.audio_in.get_mut(port)
        } else {
            node.cv_in.get_mut(port - audio_ins)
        };
        if let Some(dst) = dst {
            for k in 0..n {
                dst[k] += src[k];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugrack_core::PostRtQueue;
    use plugrack_plugin::builtin::{gain_params, GainInstance};
    use plugrack_plugin::PluginType;

    fn gain_plugin(id: u32) -> Arc<Plugin> {
        let plugin = Plugin::new_local(
            id,
            PluginType::Internal,
            "",
            Box::new(GainInstance::new()),
            Arc::new(PostRtQueue::new()),
            16,
            200,
            false,
        );
        plugin.set_enabled(true);
        plugin.set_active(true);
        Arc::new(plugin)
    }

    fn wire_stereo_through(graph: &mut PatchbayGraph, plugin_id: u32) {
        let group = GROUP_PLUGIN_BASE + plugin_id;
        graph.connect(GROUP_AUDIO_IN, 0, group, 0).unwrap();
        graph.connect(GROUP_AUDIO_IN, 1, group, 1).unwrap();
        graph.connect(group, 0, GROUP_AUDIO_OUT, 0).unwrap();
        graph.connect(group, 1, GROUP_AUDIO_OUT, 1).unwrap();
    }

    fn run(
        graph: &mut PatchbayGraph,
        plugins: &[Arc<Plugin>],
        input: [&[f32]; 2],
    ) -> (Vec<f32>, Vec<f32>) {
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
                &[],
                &mut [],
                frames as u32,
                &EngineTimeInfo::default(),
                false,
            );
        }
        (left, right)
    }

    #[test]
    fn unconnected_graph_outputs_silence() {
        let mut graph = PatchbayGraph::new(8, 2, 2, 0, 0);
        let input = [0.5f32; 8];
        let (l, r) = run(&mut graph, &[], [&input, &input]);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn stereo_chain_processes_and_sums() {
        let mut graph = PatchbayGraph::new(8, 2, 2, 0, 0);
        let plugin = gain_plugin(0);
        plugin.set_parameter_value(gain_params::GAIN as i32, 0.5);
        graph.add_node(&plugin);
        wire_stereo_through(&mut graph, 0);
        let input = [1.0f32; 8];
        let (l, r) = run(&mut graph, &[plugin], [&input, &input]);
        assert_eq!(l, vec![0.5; 8]);
        assert_eq!(r, vec![0.5; 8]);
    }

    #[test]
    fn two_sources_sum_at_the_output() {
        let mut graph = PatchbayGraph::new(4, 2, 2, 0, 0);
        let a = gain_plugin(0);
        let b = gain_plugin(1);
        graph.add_node(&a);
        graph.add_node(&b);
        for id in [0, 1] {
            let group = GROUP_PLUGIN_BASE + id;
            graph.connect(GROUP_AUDIO_IN, 0, group, 0).unwrap();
            graph.connect(group, 0, GROUP_AUDIO_OUT, 0).unwrap();
        }
        let input = [0.25f32; 4];
        let (l, _) = run(&mut graph, &[a, b], [&input, &input]);
        assert_eq!(l, vec![0.5; 4]);
    }

    #[test]
    fn connection_ids_and_disconnect() {
        let mut graph = PatchbayGraph::new(8, 2, 2, 0, 0);
        let plugin = gain_plugin(0);
        graph.add_node(&plugin);
        let id = graph
            .connect(GROUP_AUDIO_IN, 0, GROUP_PLUGIN_BASE, 0)
            .unwrap();
        assert!(graph.connect(GROUP_AUDIO_IN, 0, GROUP_PLUGIN_BASE, 0).is_err());
        graph.disconnect(id).unwrap();
        assert!(graph.disconnect(id).is_err());
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn rejects_unknown_ports_and_cycles() {
        let mut graph = PatchbayGraph::new(8, 2, 2, 0, 0);
        let a = gain_plugin(0);
        let b = gain_plugin(1);
        graph.add_node(&a);
        graph.add_node(&b);
        assert!(graph.connect(GROUP_AUDIO_IN, 7, GROUP_PLUGIN_BASE, 0).is_err());
        graph
            .connect(GROUP_PLUGIN_BASE, 0, GROUP_PLUGIN_BASE + 1, 0)
            .unwrap();
        let err = graph
            .connect(GROUP_PLUGIN_BASE + 1, 0, GROUP_PLUGIN_BASE, 0)
            .unwrap_err();
        assert!(err.contains("cycle"));
    }

    #[test]
    fn refresh_renumbers_connection_ids() {
        let mut graph = PatchbayGraph::new(8, 2, 2, 0, 0);
        let plugin = gain_plugin(0);
        graph.add_node(&plugin);
        let first = graph
            .connect(GROUP_AUDIO_IN, 0, GROUP_PLUGIN_BASE, 0)
            .unwrap();
        let second = graph
            .connect(GROUP_AUDIO_IN, 1, GROUP_PLUGIN_BASE, 1)
            .unwrap();
        graph.disconnect(first).unwrap();
        assert_eq!(second, 2);
        let snapshot = graph.refresh(&[plugin]);
        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(snapshot.connections[0].id, 1);
        assert!(snapshot
            .groups
            .iter()
            .any(|(id, _)| *id == GROUP_PLUGIN_BASE));
    }
}
