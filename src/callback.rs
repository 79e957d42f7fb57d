//! Engine callbacks.
//!
//! Internally the engine speaks this sum type; the flat
//! `(opcode, plugin_id, v1, v2, v3, valuef, string)` shape only appears at
//! the outer-host boundary and on the UI pipe's `ENGINE_CALLBACK_<n>`
//! frames.

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCallback {
    PluginAdded { id: u32, name: String },
    PluginRemoved { id: u32 },
    PluginRenamed { id: u32, name: String },
    ParameterValueChanged { id: u32, index: i32, value: f32 },
    ParameterMidiChannelChanged { id: u32, index: i32, channel: u8 },
    ParameterMidiCcChanged { id: u32, index: i32, cc: i16 },
    ProgramChanged { id: u32, index: i32 },
    MidiProgramChanged { id: u32, index: i32 },
    UiStateChanged { id: u32, state: i32 },
    NoteOn { id: u32, channel: u8, note: u8, velocity: u8 },
    NoteOff { id: u32, channel: u8, note: u8 },
    LatencyChanged { id: u32, frames: u32 },
    BufferSizeChanged { frames: u32 },
    SampleRateChanged { rate: f64 },
    PatchbayConnectionAdded { id: u32, src_group: u32, src_port: u32, dst_group: u32, dst_port: u32 },
    PatchbayConnectionRemoved { id: u32 },
    TransportChanged { playing: bool, frame: u64 },
    Error { message: String },
    Quit,
    /// The external UI helper was closed on purpose.
    UiClosed,
    /// The external UI helper died or could not be started.
    UiUnavailable,
}

/// Flat rendition for the host boundary and the UI pipe.
#[derive(Debug, Clone, Default)]
pub struct FlatCallback {
    pub opcode: u32,
    pub plugin_id: u32,
    pub value1: i32,
    pub value2: i32,
    pub value3: i32,
    pub valuef: f32,
    pub value_str: String,
}

impl EngineCallback {
    pub fn opcode(&self) -> u32 {
        match self {
            EngineCallback::PluginAdded { .. } => 1,
            EngineCallback::PluginRemoved { .. } => 2,
            EngineCallback::PluginRenamed { .. } => 3,
            EngineCallback::ParameterValueChanged { .. } => 4,
            EngineCallback::ParameterMidiChannelChanged { .. } => 5,
            EngineCallback::ParameterMidiCcChanged { .. } => 6,
            EngineCallback::ProgramChanged { .. } => 7,
            EngineCallback::MidiProgramChanged { .. } => 8,
            EngineCallback::UiStateChanged { .. } => 9,
            EngineCallback::NoteOn { .. } => 10,
            EngineCallback::NoteOff { .. } => 11,
            EngineCallback::LatencyChanged { .. } => 12,
            EngineCallback::BufferSizeChanged { .. } => 13,
            EngineCallback::SampleRateChanged { .. } => 14,
            EngineCallback::PatchbayConnectionAdded { .. } => 15,
            EngineCallback::PatchbayConnectionRemoved { .. } => 16,
            EngineCallback::TransportChanged { .. } => 17,
            EngineCallback::Error { .. } => 18,
            EngineCallback::Quit => 19,
            EngineCallback::UiClosed => 20,
            EngineCallback::UiUnavailable => 21,
        }
    }

    pub fn flatten(&self) -> FlatCallback {
        let mut flat = FlatCallback {
            opcode: self.opcode(),
            ..Default::default()
        };
        match self {
            EngineCallback::PluginAdded { id, name }
            | EngineCallback::PluginRenamed { id, name } => {
                flat.plugin_id = *id;
                flat.value_str = name.clone();
            }
            EngineCallback::PluginRemoved { id } => flat.plugin_id = *id,
            EngineCallback::ParameterValueChanged { id, index, value } => {
                flat.plugin_id = *id;
                flat.value1 = *index;
                flat.valuef = *value;
            }
            EngineCallback::ParameterMidiChannelChanged { id, index, channel } => {
                flat.plugin_id = *id;
                flat.value1 = *index;
                flat.value2 = i32::from(*channel);
            }
            EngineCallback::ParameterMidiCcChanged { id, index, cc } => {
                flat.plugin_id = *id;
                flat.value1 = *index;
                flat.value2 = i32::from(*cc);
            }
            EngineCallback::ProgramChanged { id, index }
            | EngineCallback::MidiProgramChanged { id, index } => {
                flat.plugin_id = *id;
                flat.value1 = *index;
            }
            EngineCallback::UiStateChanged { id, state } => {
                flat.plugin_id = *id;
                flat.value1 = *state;
            }
            EngineCallback::NoteOn {
                id,
                channel,
                note,
                velocity,
            } => {
                flat.plugin_id = *id;
                flat.value1 = i32::from(*channel);
                flat.value2 = i32::from(*note);
                flat.value3 = i32::from(*velocity);
            }
            EngineCallback::NoteOff { id, channel, note } => {
                flat.plugin_id = *id;
                flat.value1 = i32::from(*channel);
                flat.value2 = i32::from(*note);
            }
            EngineCallback::LatencyChanged { id, frames } => {
                flat.plugin_id = *id;
                flat.value1 = *frames as i32;
            }
            EngineCallback::BufferSizeChanged { frames } => flat.value1 = *frames as i32,
            EngineCallback::SampleRateChanged { rate } => flat.valuef = *rate as f32,
            EngineCallback::PatchbayConnectionAdded {
                id,
                src_group,
                src_port,
                dst_group,
                dst_port,
            } => {
                flat.plugin_id = *id;
                flat.value1 = *src_group as i32;
                flat.value2 = *src_port as i32;
                flat.value_str = format!("{dst_group}:{dst_port}");
            }
            EngineCallback::PatchbayConnectionRemoved { id } => flat.plugin_id = *id,
            EngineCallback::TransportChanged { playing, frame } => {
                flat.value1 = i32::from(*playing);
                flat.value_str = frame.to_string();
            }
            EngineCallback::Error { message } => flat.value_str = message.clone(),
            EngineCallback::Quit | EngineCallback::UiClosed | EngineCallback::UiUnavailable => {}
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_are_distinct() {
        let callbacks = [
            EngineCallback::PluginAdded {
                id: 0,
                name: String::new(),
            },
            EngineCallback::PluginRemoved { id: 0 },
            EngineCallback::Error {
                message: String::new(),
            },
            EngineCallback::Quit,
        ];
        let mut seen = std::collections::HashSet::new();
        for cb in &callbacks {
            assert!(seen.insert(cb.opcode()));
        }
    }

    #[test]
    fn flatten_carries_the_payload() {
        let flat = EngineCallback::ParameterValueChanged {
            id: 3,
            index: -3,
            value: 0.5,
        }
        .flatten();
        assert_eq!(flat.plugin_id, 3);
        assert_eq!(flat.value1, -3);
        assert_eq!(flat.valuef, 0.5);
    }
}
