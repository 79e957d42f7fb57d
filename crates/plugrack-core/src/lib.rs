//! Engine kernel for plugrack.
//!
//! Everything here is IPC-free: the per-cycle event model, the parameter
//! model with its coercion rules, engine options, transport state, and the
//! lock-free primitives shared by the audio and main threads.

pub mod error;
pub use error::{EngineError, Result};

pub mod lockfree;
pub use lockfree::{AtomicFlag, AtomicFloat};

pub mod options;
pub use options::{EngineOptionId, EngineOptions, ProcessMode, TransportMode};

pub mod params;
pub use params::{ParameterData, ParameterKind, ParameterRanges};

pub mod events;
pub use events::{
    CtrlEvent, CtrlEventKind, EngineEvent, EngineEventKind, EventBus, MidiData, RawMidiPair,
    MAX_INTERNAL_EVENT_COUNT,
};

pub mod post_rt;
pub use post_rt::{PostRtEvent, PostRtEventKind, PostRtQueue};

pub mod time;
pub use time::{EngineTimeInfo, EngineTimeInfoBbt};

pub mod meter;
pub use meter::PeakMeter;
