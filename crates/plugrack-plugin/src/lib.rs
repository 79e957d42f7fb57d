//! Plugin handles for plugrack.
//!
//! A loaded plugin is either *in-process* (a [`PluginInstance`] adapter
//! called directly) or *bridged* (proxied to a worker process through
//! [`BridgeTransport`]'s shared-memory rings and semaphores). Both sit
//! behind the same [`Plugin`] handle, which owns the parameter and program
//! tables, the mix controls, and the RT processing path.

pub mod error;
pub use error::{BridgeError, Result};

pub mod ring;
pub use ring::{RingBufferData, BIG_RING_SIZE, HUGE_RING_SIZE, SMALL_RING_SIZE};

pub mod shm;
pub use shm::{SharedAudioPool, SharedMemory};

pub mod sem;
pub use sem::SemData;

pub mod protocol;
pub use protocol::{
    BridgeNonRtClientData, BridgeNonRtServerData, BridgeRtClientData, BridgeTimeInfo,
    NonRtClientOpcode, NonRtServerOpcode, RtClientOpcode,
};

pub mod transport;
pub use transport::{BridgeTransport, ServerMessage};

pub mod instance;
pub use instance::{InstanceInfo, MidiProgramData, PluginInstance, ProcessArgs};

pub mod builtin;
pub use builtin::{create_builtin, BUILTIN_GAIN_LABEL, BUILTIN_PASSTHROUGH_LABEL};

pub mod plugin;
pub use plugin::{
    CustomData, Plugin, PluginCategory, PluginSettings, PluginType, MAX_MIDI_NOTE,
};
