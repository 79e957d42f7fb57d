//! Error types for plugin loading and bridge IPC.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    #[error("Ring buffer full, message dropped: {0}")]
    RingFull(&'static str),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout {
        operation: &'static str,
        duration_ms: u64,
    },

    #[error("Bridge process crashed")]
    ProcessCrashed,

    #[error("Failed to start bridge worker {binary}: {reason}")]
    SpawnFailed { binary: PathBuf, reason: String },

    #[error("Bridge worker reported: {0}")]
    Worker(String),

    #[error("Plugin '{0}' is not a known built-in")]
    UnknownBuiltin(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
