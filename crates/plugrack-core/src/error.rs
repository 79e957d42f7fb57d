//! Error types for the engine kernel.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Engine is already active")]
    AlreadyActive,

    #[error("Engine is not active")]
    NotActive,

    #[error("No plugin with id {0}")]
    UnknownPlugin(u32),

    #[error("Maximum plugin count reached")]
    PluginTableFull,

    #[error("{0}")]
    CapabilityMismatch(String),

    #[error("Failed to load project state: {0}")]
    StateRejected(String),

    #[error("Invalid engine option '{key}': {reason}")]
    BadOption { key: String, reason: String },

    #[error("{0}")]
    User(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            EngineError::UnknownPlugin(7).to_string(),
            "No plugin with id 7"
        );
        let err =
            EngineError::CapabilityMismatch("Rack mode can only host stereo plugins".into());
        assert!(err.to_string().contains("Rack"));
        let err = EngineError::BadOption {
            key: "processMode".into(),
            reason: "immutable after init".into(),
        };
        assert!(err.to_string().contains("processMode"));
    }
}
