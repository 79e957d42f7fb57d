//! Bridge opcode protocol and shared-memory region layouts.
//!
//! Three opcode families travel over three rings:
//!
//! - non-RT client→worker (big ring): configuration and UI-originated
//!   changes, committed under a mutex, consumed at the worker's leisure;
//! - RT client→worker (small ring): per-cycle events and the `Process`
//!   rendezvous;
//! - non-RT worker→client (huge ring): descriptions, acknowledgements and
//!   notifications, drained during idle.
//!
//! Payloads are fixed sequences of the ring's typed fields; strings are
//! length-prefixed. The payload layout for each opcode is documented on its
//! variant.

use crate::ring::{RingBufferData, BIG_RING_SIZE, HUGE_RING_SIZE, SMALL_RING_SIZE};
use crate::sem::SemData;

/// Size of the worker→client raw MIDI byte area in the RT region.
pub const RT_MIDI_OUT_SIZE: usize = 4096;

macro_rules! opcode_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl TryFrom<u32> for $name {
            type Error = u32;

            fn try_from(value: u32) -> Result<Self, u32> {
                match value {
                    $($value => Ok($name::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(op: $name) -> u32 {
                op as u32
            }
        }
    };
}

opcode_enum! {
    /// Client→worker, non-RT ring.
    NonRtClientOpcode {
        Null = 0,
        /// `u64 bytes`; pool was resized, re-attach.
        SetAudioPoolSize = 1,
        /// `u32 frames`
        SetBufferSize = 2,
        /// `f64 rate`
        SetSampleRate = 3,
        SetOffline = 4,
        SetOnline = 5,
        /// `u32 option`, `u8 yes`
        SetOption = 6,
        /// `i16 channel`
        SetCtrlChannel = 7,
        /// `i32 index`, `f32 value`
        SetParameterValue = 8,
        /// `u32 index`, `u8 channel`
        SetParameterMidiChannel = 9,
        /// `u32 index`, `i16 cc`
        SetParameterMidiCC = 10,
        /// `i32 index`
        SetProgram = 11,
        /// `i32 index`
        SetMidiProgram = 12,
        /// `str type`, `str key`, `str value`
        SetCustomData = 13,
        /// `str path`
        SetChunkDataFile = 14,
        PrepareForSave = 15,
        Activate = 16,
        Deactivate = 17,
        ShowUI = 18,
        HideUI = 19,
        Ping = 20,
        /// `u32 index`, `f32 value`
        UiParameterChange = 21,
        /// `u32 index`
        UiProgramChange = 22,
        /// `u32 index`
        UiMidiProgramChange = 23,
        /// `u8 channel`, `u8 note`, `u8 velocity`
        UiNoteOn = 24,
        /// `u8 channel`, `u8 note`
        UiNoteOff = 25,
        Quit = 26,
    }
}

opcode_enum! {
    /// Client→worker, RT ring. Posted inside the audio cycle.
    RtClientOpcode {
        Null = 0,
        /// `u64 bytes`; current pool size, sent before the first cycle.
        SetAudioPool = 1,
        /// `u32 time`, `u8 port`, `u8 size`, `size bytes`
        MidiEvent = 2,
        /// `u32 time`, `u8 channel`, `u16 param`, `f32 value`
        ControlEventParameter = 3,
        /// `u32 time`, `u8 channel`, `u16 bank`
        ControlEventMidiBank = 4,
        /// `u32 time`, `u8 channel`, `u16 program`
        ControlEventMidiProgram = 5,
        /// `u32 time`, `u8 channel`
        ControlEventAllSoundOff = 6,
        /// `u32 time`, `u8 channel`
        ControlEventAllNotesOff = 7,
        /// `u32 frames`
        Process = 8,
        Quit = 9,
    }
}

opcode_enum! {
    /// Worker→client, non-RT ring.
    NonRtServerOpcode {
        Null = 0,
        Pong = 1,
        /// `u32 category`, `u32 hints`, `i64 unique_id`
        PluginInfo1 = 2,
        /// `str real_name`, `str label`, `str maker`, `str copyright`
        PluginInfo2 = 3,
        /// `u32 audio_ins`, `u32 audio_outs`, `u32 cv_ins`, `u32 cv_outs`
        AudioCount = 4,
        /// `u32 ins`, `u32 outs`
        MidiCount = 5,
        /// `u32 count`
        ParameterCount = 6,
        /// `u32 count`
        ProgramCount = 7,
        /// `u32 count`
        MidiProgramCount = 8,
        /// `u32 index`, `i32 rindex`, `u32 kind`, `u32 hints`, `u8 midi_channel`, `i16 midi_cc`
        ParameterData1 = 9,
        /// `u32 index`, `str name`, `str unit`
        ParameterData2 = 10,
        /// `u32 index`, `f32 def`, `f32 min`, `f32 max`
        ParameterRanges1 = 11,
        /// `u32 index`, `f32 step`, `f32 step_small`, `f32 step_large`
        ParameterRanges2 = 12,
        /// `u32 index`, `f32 value`
        ParameterValue = 13,
        /// `u32 index`, `f32 value`
        DefaultValue = 14,
        /// `i32 index`
        CurrentProgram = 15,
        /// `i32 index`
        CurrentMidiProgram = 16,
        /// `u32 index`, `str name`
        ProgramName = 17,
        /// `u32 index`, `u32 bank`, `u32 program`, `str name`
        MidiProgramData = 18,
        /// `str type`, `str key`, `str value`
        SetCustomData = 19,
        /// `str path`
        SetChunkDataFile = 20,
        /// `u32 frames`
        SetLatency = 21,
        UiClosed = 22,
        Ready = 23,
        Saved = 24,
        /// `str message`
        Error = 25,
    }
}

/// Transport snapshot written by the client into the RT region before each
/// `Process`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct BridgeTimeInfo {
    pub playing: u32,
    pub frame: u64,
    pub usecs: u64,
    /// Non-zero when the BBT fields below are meaningful.
    pub bbt_valid: u32,
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
    pub bar_start_tick: f64,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
}

/// RT-client region layout: rendezvous semaphores, transport snapshot, the
/// worker's raw-MIDI back channel, and the RT ring.
#[repr(C)]
pub struct BridgeRtClientData {
    pub sem_server: SemData,
    pub sem_client: SemData,
    pub time_info: std::cell::UnsafeCell<BridgeTimeInfo>,
    /// Worker-written, client-read once per cycle. Framed as
    /// `u32 time, u8 port, u8 size, size bytes`, a zero size terminates.
    pub midi_out: std::cell::UnsafeCell<[u8; RT_MIDI_OUT_SIZE]>,
    pub ring: RingBufferData<SMALL_RING_SIZE>,
}

unsafe impl Send for BridgeRtClientData {}
unsafe impl Sync for BridgeRtClientData {}

/// Non-RT client region: a single big ring.
#[repr(C)]
pub struct BridgeNonRtClientData {
    pub ring: RingBufferData<BIG_RING_SIZE>,
}

/// Non-RT server region: a single huge ring.
#[repr(C)]
pub struct BridgeNonRtServerData {
    pub ring: RingBufferData<HUGE_RING_SIZE>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_values_roundtrip() {
        for value in 0..=26u32 {
            let op = NonRtClientOpcode::try_from(value).unwrap();
            assert_eq!(u32::from(op), value);
        }
        assert_eq!(NonRtClientOpcode::try_from(27), Err(27));
        assert_eq!(
            RtClientOpcode::try_from(8),
            Ok(RtClientOpcode::Process)
        );
        assert_eq!(
            NonRtServerOpcode::try_from(25),
            Ok(NonRtServerOpcode::Error)
        );
    }

    #[test]
    fn null_is_zero_in_every_family() {
        // An empty ring reads opcode 0, which must always decode to Null.
        assert_eq!(NonRtClientOpcode::try_from(0), Ok(NonRtClientOpcode::Null));
        assert_eq!(RtClientOpcode::try_from(0), Ok(RtClientOpcode::Null));
        assert_eq!(NonRtServerOpcode::try_from(0), Ok(NonRtServerOpcode::Null));
    }

    #[test]
    fn rt_region_fits_its_pieces() {
        // The region must at least hold both semaphores, the transport
        // snapshot, the MIDI back channel and the ring.
        let size = std::mem::size_of::<BridgeRtClientData>();
        assert!(size >= RT_MIDI_OUT_SIZE + SMALL_RING_SIZE);
    }
}
