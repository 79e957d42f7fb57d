//! plugrack: an audio plugin host embedded as a plugin.
//!
//! Audio, CV and MIDI from an outer host flow through a user-configured
//! graph of loaded plugins and back out. Plugins run in-process or, when
//! the format or architecture differs, inside a bridge worker driven over
//! shared memory. A separate UI process talks to the engine over a framed
//! text pipe.
//!
//! The crate layout mirrors the moving parts: [`plugrack_core`] holds the
//! event/parameter kernel, [`plugrack_plugin`] the plugin handles and the
//! bridge transport, and this crate the engine, graphs, UI pipe and the
//! outer-host descriptor surface.
//!
//! # Example
//!
//! ```ignore
//! use plugrack::{Engine, EngineConfig};
//! use plugrack_core::EngineOptions;
//!
//! let engine = Engine::new(EngineConfig::default(), EngineOptions::default(), 512, 48000.0);
//! engine.add_plugin(plugrack::PluginType::Internal, "", "gain")?;
//! engine.activate();
//! // the outer host now drives engine.process(...) per cycle
//! ```

pub mod callback;
pub use callback::{EngineCallback, FlatCallback};

pub mod engine;
pub use engine::{Engine, EngineConfig, HostMidiEvent, MAX_PLUGINS};

pub mod graph;
pub use graph::{PatchbayGraph, RackGraph};

pub mod project;
pub use project::ProjectDocument;

pub mod uipipe;
pub use uipipe::{UiCommand, UiPipe, UiState};

pub mod descriptor;
pub use descriptor::{
    DispatcherOp, EngineDescriptor, EngineVtable, HostedEngine, DESCRIPTORS, ENGINE_VTABLE,
};

pub use plugrack_core::{
    EngineError, EngineOptionId, EngineOptions, EngineTimeInfo, ProcessMode, Result,
    TransportMode,
};
pub use plugrack_plugin::{Plugin, PluginInstance, PluginType};
