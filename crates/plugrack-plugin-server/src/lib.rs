//! Bridge worker for plugrack.
//!
//! Attaches to the four shared-memory regions named by
//! `ENGINE_BRIDGE_SHM_IDS`, hosts one plugin instance, and answers the
//! bridge opcode protocol: non-RT configuration at its leisure, RT cycles
//! under the server semaphore. The serve loop is a library so tests can
//! drive it in-thread against a client transport.

mod server;
pub use server::{BridgeServer, ServerError};
