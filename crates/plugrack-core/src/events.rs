//! Per-cycle engine events and the fixed-size event bus.

/// Maximum events held per direction per cycle. Overflow drops tail entries.
pub const MAX_INTERNAL_EVENT_COUNT: usize = 512;

/// Maximum raw MIDI payload carried inline. Larger events are dropped at the
/// output boundary.
pub const MAX_MIDI_DATA_SIZE: usize = 4;

pub const MIDI_STATUS_NOTE_OFF: u8 = 0x80;
pub const MIDI_STATUS_NOTE_ON: u8 = 0x90;
pub const MIDI_STATUS_CONTROL_CHANGE: u8 = 0xB0;
pub const MIDI_STATUS_PROGRAM_CHANGE: u8 = 0xC0;

pub const MIDI_CC_BANK_SELECT_MSB: u8 = 0x00;
pub const MIDI_CC_BANK_SELECT_LSB: u8 = 0x20;
pub const MIDI_CC_ALL_SOUND_OFF: u8 = 0x78;
pub const MIDI_CC_ALL_NOTES_OFF: u8 = 0x7B;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CtrlEventKind {
    #[default]
    Null,
    Parameter,
    MidiBank,
    MidiProgram,
    AllSoundOff,
    AllNotesOff,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlEvent {
    pub kind: CtrlEventKind,
    pub param: u16,
    /// Normalized in `[0, 1]` for `Parameter`; integral payload otherwise.
    pub value: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MidiData {
    pub port: u8,
    pub size: u8,
    pub data: [u8; MAX_MIDI_DATA_SIZE],
}

#[derive(Debug, Clone, Copy, Default)]
pub enum EngineEventKind {
    #[default]
    Null,
    Control(CtrlEvent),
    Midi(MidiData),
}

/// One event inside a cycle. `time` is the frame offset from cycle start.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineEvent {
    pub time: u32,
    pub channel: u8,
    pub kind: EngineEventKind,
}

/// Raw MIDI rendition of a control event. Bank changes expand to two
/// messages, everything else to one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMidiPair {
    pub len: usize,
    pub msgs: [([u8; 3], usize); 2],
}

impl EngineEvent {
    /// Ingest a raw host MIDI message. NoteOn with velocity zero is
    /// normalized to NoteOff at this boundary.
    pub fn from_raw_midi(time: u32, port: u8, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_MIDI_DATA_SIZE {
            return None;
        }
        let mut data = [0u8; MAX_MIDI_DATA_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        let channel = data[0] & 0x0F;
        if data[0] & 0xF0 == MIDI_STATUS_NOTE_ON && bytes.len() >= 3 && data[2] == 0 {
            data[0] = MIDI_STATUS_NOTE_OFF | channel;
        }
        Some(Self {
            time,
            channel,
            kind: EngineEventKind::Midi(MidiData {
                port,
                size: bytes.len() as u8,
                data,
            }),
        })
    }

    /// Render this event as raw MIDI for the outer host.
    ///
    /// Returns `None` for events that do not cross the boundary: null
    /// events, non-mappable control kinds, and MIDI payloads larger than
    /// [`MAX_MIDI_DATA_SIZE`].
    pub fn to_raw_midi(&self) -> Option<RawMidiPair> {
        match &self.kind {
            EngineEventKind::Null => None,
            EngineEventKind::Midi(midi) => {
                if midi.size as usize > MAX_MIDI_DATA_SIZE {
                    return None;
                }
                let mut msg = [0u8; 3];
                let size = (midi.size as usize).min(3);
                msg[..size].copy_from_slice(&midi.data[..size]);
                Some(RawMidiPair {
                    len: 1,
                    msgs: [(msg, size), ([0; 3], 0)],
                })
            }
            EngineEventKind::Control(ctrl) => {
                let status_cc = MIDI_STATUS_CONTROL_CHANGE | (self.channel & 0x0F);
                match ctrl.kind {
                    CtrlEventKind::Null => None,
                    CtrlEventKind::Parameter => {
                        let value = (ctrl.value.clamp(0.0, 1.0) * 127.0).round() as u8;
                        Some(RawMidiPair {
                            len: 1,
                            msgs: [([status_cc, ctrl.param as u8, value], 3), ([0; 3], 0)],
                        })
                    }
                    CtrlEventKind::MidiBank => Some(RawMidiPair {
                        len: 2,
                        msgs: [
                            ([status_cc, MIDI_CC_BANK_SELECT_MSB, 0], 3),
                            ([status_cc, MIDI_CC_BANK_SELECT_LSB, ctrl.value as u8], 3),
                        ],
                    }),
                    CtrlEventKind::MidiProgram => {
                        let status = MIDI_STATUS_PROGRAM_CHANGE | (self.channel & 0x0F);
                        Some(RawMidiPair {
                            len: 1,
                            msgs: [([status, ctrl.value as u8, 0], 2), ([0; 3], 0)],
                        })
                    }
                    CtrlEventKind::AllSoundOff => Some(RawMidiPair {
                        len: 1,
                        msgs: [([status_cc, MIDI_CC_ALL_SOUND_OFF, 0], 3), ([0; 3], 0)],
                    }),
                    CtrlEventKind::AllNotesOff => Some(RawMidiPair {
                        len: 1,
                        msgs: [([status_cc, MIDI_CC_ALL_NOTES_OFF, 0], 3), ([0; 3], 0)],
                    }),
                }
            }
        }
    }
}

/// Fixed-capacity input/output event storage for one cycle.
///
/// Capacity is allocated once at construction; the RT path only ever
/// pushes, iterates, and clears.
pub struct EventBus {
    input: Vec<EngineEvent>,
    output: Vec<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            input: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
            output: Vec::with_capacity(MAX_INTERNAL_EVENT_COUNT),
        }
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    /// Push an input event; tail overflow drops silently.
    pub fn push_input(&mut self, event: EngineEvent) -> bool {
        if self.input.len() >= MAX_INTERNAL_EVENT_COUNT {
            return false;
        }
        self.input.push(event);
        true
    }

    pub fn push_output(&mut self, event: EngineEvent) -> bool {
        if self.output.len() >= MAX_INTERNAL_EVENT_COUNT {
            return false;
        }
        self.output.push(event);
        true
    }

    pub fn input(&self) -> &[EngineEvent] {
        &self.input
    }

    pub fn output(&self) -> &[EngineEvent] {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut Vec<EngineEvent> {
        &mut self.output
    }

    /// Sort staged input by frame offset. Stable, so same-frame events keep
    /// their arrival order.
    pub fn sort_input(&mut self) {
        self.input.sort_by_key(|ev| ev.time);
    }

    /// Borrow the input and output sides at once.
    pub fn split(&mut self) -> (&[EngineEvent], &mut Vec<EngineEvent>) {
        (&self.input, &mut self.output)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_zero_velocity_becomes_note_off() {
        let ev = EngineEvent::from_raw_midi(0, 0, &[0x93, 60, 0]).unwrap();
        match ev.kind {
            EngineEventKind::Midi(midi) => {
                assert_eq!(midi.data[0], 0x83);
                assert_eq!(midi.data[1], 60);
            }
            _ => panic!("expected midi event"),
        }
        assert_eq!(ev.channel, 3);
    }

    #[test]
    fn parameter_event_maps_to_cc() {
        let ev = EngineEvent {
            time: 10,
            channel: 2,
            kind: EngineEventKind::Control(CtrlEvent {
                kind: CtrlEventKind::Parameter,
                param: 74,
                value: 0.5,
            }),
        };
        let raw = ev.to_raw_midi().unwrap();
        assert_eq!(raw.len, 1);
        assert_eq!(raw.msgs[0].0, [0xB2, 74, 64]);
    }

    #[test]
    fn midi_bank_expands_to_msb_lsb_pair() {
        let ev = EngineEvent {
            time: 0,
            channel: 0,
            kind: EngineEventKind::Control(CtrlEvent {
                kind: CtrlEventKind::MidiBank,
                param: 0,
                value: 5.0,
            }),
        };
        let raw = ev.to_raw_midi().unwrap();
        assert_eq!(raw.len, 2);
        assert_eq!(raw.msgs[0].0, [0xB0, 0x00, 0]);
        assert_eq!(raw.msgs[1].0, [0xB0, 0x20, 5]);
    }

    #[test]
    fn midi_program_maps_to_program_change() {
        let ev = EngineEvent {
            time: 0,
            channel: 9,
            kind: EngineEventKind::Control(CtrlEvent {
                kind: CtrlEventKind::MidiProgram,
                param: 0,
                value: 40.0,
            }),
        };
        let raw = ev.to_raw_midi().unwrap();
        assert_eq!(raw.msgs[0].0[..2], [0xC9, 40]);
        assert_eq!(raw.msgs[0].1, 2);
    }

    #[test]
    fn oversize_midi_is_rejected_at_ingest() {
        assert!(EngineEvent::from_raw_midi(0, 0, &[0xF0, 1, 2, 3, 4, 0xF7]).is_none());
    }

    #[test]
    fn bus_drops_tail_on_overflow() {
        let mut bus = EventBus::new();
        for i in 0..MAX_INTERNAL_EVENT_COUNT {
            assert!(bus.push_input(EngineEvent {
                time: i as u32,
                ..Default::default()
            }));
        }
        assert!(!bus.push_input(EngineEvent::default()));
        assert_eq!(bus.input().len(), MAX_INTERNAL_EVENT_COUNT);
    }

    #[test]
    fn input_sort_is_stable_by_time() {
        let mut bus = EventBus::new();
        for (time, param) in [(5u32, 1u16), (0, 2), (5, 3), (2, 4)] {
            bus.push_input(EngineEvent {
                time,
                channel: 0,
                kind: EngineEventKind::Control(CtrlEvent {
                    kind: CtrlEventKind::Parameter,
                    param,
                    value: 0.0,
                }),
            });
        }
        bus.sort_input();
        let params: Vec<u16> = bus
            .input()
            .iter()
            .map(|ev| match ev.kind {
                EngineEventKind::Control(c) => c.param,
                _ => 0,
            })
            .collect();
        assert_eq!(params, vec![2, 4, 1, 3]);
    }
}
