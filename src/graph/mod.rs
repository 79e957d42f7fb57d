//! The two processing graphs.
//!
//! Rack is a fixed-stereo serial chain; Patchbay is an explicit node graph
//! with arbitrary port counts including CV. The engine picks one at
//! construction from `processMode` and never changes it.

mod rack;
pub use rack::RackGraph;

mod patchbay;
pub use patchbay::{
    Connection, PatchbayGraph, PatchbaySnapshot, PortDescription, GROUP_AUDIO_IN, GROUP_AUDIO_OUT,
    GROUP_CV_IN, GROUP_CV_OUT, GROUP_MIDI_IN, GROUP_MIDI_OUT, GROUP_PLUGIN_BASE,
};

pub enum Graph {
    Rack(RackGraph),
    Patchbay(PatchbayGraph),
}

impl Graph {
    pub fn buffer_size_changed(&mut self, buffer_size: u32) {
        match self {
            Graph::Rack(rack) => rack.buffer_size_changed(buffer_size),
            Graph::Patchbay(patchbay) => patchbay.buffer_size_changed(buffer_size),
        }
    }
}
