//! Project state: the text document exchanged through `get_state` and
//! `set_state`.
//!
//! The document captures the full engine configuration and every plugin's
//! user-visible settings; restoring it reproduces the same observable
//! state (same plugins, parameters, custom data).

use plugrack_core::{EngineOptions, EngineTimeInfo};
use plugrack_plugin::PluginSettings;
use serde::{Deserialize, Serialize};

pub const PROJECT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDocument {
    pub version: u32,
    pub options: EngineOptions,
    pub transport: EngineTimeInfo,
    pub plugins: Vec<PluginSettings>,
}

impl ProjectDocument {
    pub fn to_text(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn from_text(text: &str) -> Result<Self, String> {
        let doc: ProjectDocument =
            serde_json::from_str(text).map_err(|e| e.to_string())?;
        if doc.version > PROJECT_FORMAT_VERSION {
            return Err(format!(
                "project format {} is newer than this build understands",
                doc.version
            ));
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_roundtrips_through_text() {
        let doc = ProjectDocument {
            version: PROJECT_FORMAT_VERSION,
            options: EngineOptions::default(),
            transport: EngineTimeInfo::default(),
            plugins: Vec::new(),
        };
        let text = doc.to_text();
        let restored = ProjectDocument::from_text(&text).unwrap();
        assert_eq!(restored.version, PROJECT_FORMAT_VERSION);
        assert!(restored.plugins.is_empty());
    }

    #[test]
    fn newer_format_is_rejected() {
        let text = format!(
            "{{\"version\":{},\"options\":{},\"transport\":{},\"plugins\":[]}}",
            PROJECT_FORMAT_VERSION + 1,
            serde_json::to_string(&EngineOptions::default()).unwrap(),
            serde_json::to_string(&EngineTimeInfo::default()).unwrap(),
        );
        assert!(ProjectDocument::from_text(&text).is_err());
    }

    #[test]
    fn garbage_is_rejected_with_a_message() {
        let err = ProjectDocument::from_text("not a project").unwrap_err();
        assert!(!err.is_empty());
    }
}
