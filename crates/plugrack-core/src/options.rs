//! Engine options.
//!
//! Options are mutable between init and activation; a project load marks
//! them forced, which locks them against later UI overrides.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Graph implementation selected at construction. Immutable after init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessMode {
    #[default]
    Rack,
    Patchbay,
}

/// Transport clock ownership. Immutable after init in the embedded build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportMode {
    /// The outer host drives frame position and the playing flag.
    #[default]
    Host,
    /// The engine advances its own frame counter.
    Internal,
}

/// Stable numeric ids used by the UI pipe option dump and the
/// `set_engine_option` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EngineOptionId {
    ProcessMode = 0,
    TransportMode = 1,
    ForceStereo = 2,
    PreferPluginBridges = 3,
    PreferUiBridges = 4,
    UisAlwaysOnTop = 5,
    MaxParameters = 6,
    UiBridgesTimeout = 7,
    PathLadspa = 8,
    PathDssi = 9,
    PathLv2 = 10,
    PathVst2 = 11,
    PathVst3 = 12,
    PathAu = 13,
    PathGig = 14,
    PathSf2 = 15,
    PathSfz = 16,
    BinaryDir = 17,
    ResourceDir = 18,
    PreventBadBehaviour = 19,
    FrontendWinId = 20,
}

impl EngineOptionId {
    pub const ALL: [EngineOptionId; 21] = [
        EngineOptionId::ProcessMode,
        EngineOptionId::TransportMode,
        EngineOptionId::ForceStereo,
        EngineOptionId::PreferPluginBridges,
        EngineOptionId::PreferUiBridges,
        EngineOptionId::UisAlwaysOnTop,
        EngineOptionId::MaxParameters,
        EngineOptionId::UiBridgesTimeout,
        EngineOptionId::PathLadspa,
        EngineOptionId::PathDssi,
        EngineOptionId::PathLv2,
        EngineOptionId::PathVst2,
        EngineOptionId::PathVst3,
        EngineOptionId::PathAu,
        EngineOptionId::PathGig,
        EngineOptionId::PathSf2,
        EngineOptionId::PathSfz,
        EngineOptionId::BinaryDir,
        EngineOptionId::ResourceDir,
        EngineOptionId::PreventBadBehaviour,
        EngineOptionId::FrontendWinId,
    ];

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Environment variable name mirrored to bridge workers.
    pub fn env_name(&self) -> &'static str {
        match self {
            EngineOptionId::ProcessMode => "ENGINE_OPTION_PROCESS_MODE",
            EngineOptionId::TransportMode => "ENGINE_OPTION_TRANSPORT_MODE",
            EngineOptionId::ForceStereo => "ENGINE_OPTION_FORCE_STEREO",
            EngineOptionId::PreferPluginBridges => "ENGINE_OPTION_PREFER_PLUGIN_BRIDGES",
            EngineOptionId::PreferUiBridges => "ENGINE_OPTION_PREFER_UI_BRIDGES",
            EngineOptionId::UisAlwaysOnTop => "ENGINE_OPTION_UIS_ALWAYS_ON_TOP",
            EngineOptionId::MaxParameters => "ENGINE_OPTION_MAX_PARAMETERS",
            EngineOptionId::UiBridgesTimeout => "ENGINE_OPTION_UI_BRIDGES_TIMEOUT",
            EngineOptionId::PathLadspa => "ENGINE_OPTION_PLUGIN_PATH_LADSPA",
            EngineOptionId::PathDssi => "ENGINE_OPTION_PLUGIN_PATH_DSSI",
            EngineOptionId::PathLv2 => "ENGINE_OPTION_PLUGIN_PATH_LV2",
            EngineOptionId::PathVst2 => "ENGINE_OPTION_PLUGIN_PATH_VST2",
            EngineOptionId::PathVst3 => "ENGINE_OPTION_PLUGIN_PATH_VST3",
            EngineOptionId::PathAu => "ENGINE_OPTION_PLUGIN_PATH_AU",
            EngineOptionId::PathGig => "ENGINE_OPTION_PLUGIN_PATH_GIG",
            EngineOptionId::PathSf2 => "ENGINE_OPTION_PLUGIN_PATH_SF2",
            EngineOptionId::PathSfz => "ENGINE_OPTION_PLUGIN_PATH_SFZ",
            EngineOptionId::BinaryDir => "ENGINE_OPTION_BINARY_DIR",
            EngineOptionId::ResourceDir => "ENGINE_OPTION_RESOURCE_DIR",
            EngineOptionId::PreventBadBehaviour => "ENGINE_OPTION_PREVENT_BAD_BEHAVIOUR",
            EngineOptionId::FrontendWinId => "ENGINE_OPTION_FRONTEND_WIN_ID",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOptions {
    pub process_mode: ProcessMode,
    pub transport_mode: TransportMode,
    /// Rack only; coerces mono plugins into a stereo pair.
    pub force_stereo: bool,
    /// Prefer spawning a bridge even when ABI-compatible.
    pub prefer_plugin_bridges: bool,
    pub prefer_ui_bridges: bool,
    pub uis_always_on_top: bool,
    /// Upper bound on parameters exposed per plugin.
    pub max_parameters: u32,
    /// Milliseconds before a UI helper or bridge worker is considered dead.
    pub ui_bridges_timeout: u32,
    pub path_ladspa: Option<PathBuf>,
    pub path_dssi: Option<PathBuf>,
    pub path_lv2: Option<PathBuf>,
    pub path_vst2: Option<PathBuf>,
    pub path_vst3: Option<PathBuf>,
    pub path_au: Option<PathBuf>,
    pub path_gig: Option<PathBuf>,
    pub path_sf2: Option<PathBuf>,
    pub path_sfz: Option<PathBuf>,
    pub binary_dir: Option<PathBuf>,
    pub resource_dir: Option<PathBuf>,
    /// Switches some operations to conservative variants.
    pub prevent_bad_behaviour: bool,
    /// Opaque window id to parent plugin UIs to.
    pub frontend_win_id: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            process_mode: ProcessMode::Rack,
            transport_mode: TransportMode::Host,
            force_stereo: false,
            prefer_plugin_bridges: false,
            prefer_ui_bridges: true,
            uis_always_on_top: true,
            max_parameters: 200,
            ui_bridges_timeout: 4000,
            path_ladspa: None,
            path_dssi: None,
            path_lv2: None,
            path_vst2: None,
            path_vst3: None,
            path_au: None,
            path_gig: None,
            path_sf2: None,
            path_sfz: None,
            binary_dir: None,
            resource_dir: None,
            prevent_bad_behaviour: false,
            frontend_win_id: 0,
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "1" | "yes")
}

fn parse_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

impl EngineOptions {
    /// String form used by the UI pipe option dump and the bridge env mirror.
    pub fn value_string(&self, id: EngineOptionId) -> String {
        fn path(p: &Option<PathBuf>) -> String {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }
        match id {
            EngineOptionId::ProcessMode => match self.process_mode {
                ProcessMode::Rack => "rack".into(),
                ProcessMode::Patchbay => "patchbay".into(),
            },
            EngineOptionId::TransportMode => match self.transport_mode {
                TransportMode::Host => "host".into(),
                TransportMode::Internal => "internal".into(),
            },
            EngineOptionId::ForceStereo => self.force_stereo.to_string(),
            EngineOptionId::PreferPluginBridges => self.prefer_plugin_bridges.to_string(),
            EngineOptionId::PreferUiBridges => self.prefer_ui_bridges.to_string(),
            EngineOptionId::UisAlwaysOnTop => self.uis_always_on_top.to_string(),
            EngineOptionId::MaxParameters => self.max_parameters.to_string(),
            EngineOptionId::UiBridgesTimeout => self.ui_bridges_timeout.to_string(),
            EngineOptionId::PathLadspa => path(&self.path_ladspa),
            EngineOptionId::PathDssi => path(&self.path_dssi),
            EngineOptionId::PathLv2 => path(&self.path_lv2),
            EngineOptionId::PathVst2 => path(&self.path_vst2),
            EngineOptionId::PathVst3 => path(&self.path_vst3),
            EngineOptionId::PathAu => path(&self.path_au),
            EngineOptionId::PathGig => path(&self.path_gig),
            EngineOptionId::PathSf2 => path(&self.path_sf2),
            EngineOptionId::PathSfz => path(&self.path_sfz),
            EngineOptionId::BinaryDir => path(&self.binary_dir),
            EngineOptionId::ResourceDir => path(&self.resource_dir),
            EngineOptionId::PreventBadBehaviour => self.prevent_bad_behaviour.to_string(),
            EngineOptionId::FrontendWinId => self.frontend_win_id.to_string(),
        }
    }

    /// Apply an option from its string form.
    ///
    /// `initialized` guards the options that are immutable after init.
    pub fn apply(&mut self, id: EngineOptionId, value: &str, initialized: bool) -> Result<()> {
        let immutable = |key: &str| {
            Err(EngineError::BadOption {
                key: key.into(),
                reason: "immutable after engine init".into(),
            })
        };
        match id {
            EngineOptionId::ProcessMode => {
                if initialized {
                    return immutable("processMode");
                }
                self.process_mode = match value {
                    "rack" => ProcessMode::Rack,
                    "patchbay" => ProcessMode::Patchbay,
                    other => {
                        return Err(EngineError::BadOption {
                            key: "processMode".into(),
                            reason: format!("unknown mode '{other}'"),
                        })
                    }
                };
            }
            EngineOptionId::TransportMode => {
                if initialized {
                    return immutable("transportMode");
                }
                self.transport_mode = match value {
                    "host" => TransportMode::Host,
                    "internal" => TransportMode::Internal,
                    other => {
                        return Err(EngineError::BadOption {
                            key: "transportMode".into(),
                            reason: format!("unknown mode '{other}'"),
                        })
                    }
                };
            }
            EngineOptionId::ForceStereo => self.force_stereo = parse_bool(value),
            EngineOptionId::PreferPluginBridges => self.prefer_plugin_bridges = parse_bool(value),
            EngineOptionId::PreferUiBridges => self.prefer_ui_bridges = parse_bool(value),
            EngineOptionId::UisAlwaysOnTop => self.uis_always_on_top = parse_bool(value),
            EngineOptionId::MaxParameters => {
                self.max_parameters = value.parse().map_err(|_| EngineError::BadOption {
                    key: "maxParameters".into(),
                    reason: format!("not an integer: '{value}'"),
                })?
            }
            EngineOptionId::UiBridgesTimeout => {
                self.ui_bridges_timeout = value.parse().map_err(|_| EngineError::BadOption {
                    key: "uiBridgesTimeout".into(),
                    reason: format!("not an integer: '{value}'"),
                })?
            }
            EngineOptionId::PathLadspa => self.path_ladspa = parse_path(value),
            EngineOptionId::PathDssi => self.path_dssi = parse_path(value),
            EngineOptionId::PathLv2 => self.path_lv2 = parse_path(value),
            EngineOptionId::PathVst2 => self.path_vst2 = parse_path(value),
            EngineOptionId::PathVst3 => self.path_vst3 = parse_path(value),
            EngineOptionId::PathAu => self.path_au = parse_path(value),
            EngineOptionId::PathGig => self.path_gig = parse_path(value),
            EngineOptionId::PathSf2 => self.path_sf2 = parse_path(value),
            EngineOptionId::PathSfz => self.path_sfz = parse_path(value),
            EngineOptionId::BinaryDir => self.binary_dir = parse_path(value),
            EngineOptionId::ResourceDir => self.resource_dir = parse_path(value),
            EngineOptionId::PreventBadBehaviour => self.prevent_bad_behaviour = parse_bool(value),
            EngineOptionId::FrontendWinId => {
                self.frontend_win_id = value.parse().unwrap_or(0);
            }
        }
        Ok(())
    }

    /// Every option as `ENGINE_OPTION_*` environment pairs for a bridge worker.
    pub fn env_for_bridge(&self) -> Vec<(String, String)> {
        EngineOptionId::ALL
            .iter()
            .map(|id| (id.env_name().to_string(), self.value_string(*id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = EngineOptions::default();
        assert_eq!(opts.process_mode, ProcessMode::Rack);
        assert_eq!(opts.transport_mode, TransportMode::Host);
        assert!(!opts.force_stereo);
        assert!(opts.max_parameters >= 100);
    }

    #[test]
    fn process_mode_immutable_after_init() {
        let mut opts = EngineOptions::default();
        opts.apply(EngineOptionId::ProcessMode, "patchbay", false)
            .unwrap();
        assert_eq!(opts.process_mode, ProcessMode::Patchbay);
        assert!(opts
            .apply(EngineOptionId::ProcessMode, "rack", true)
            .is_err());
        assert_eq!(opts.process_mode, ProcessMode::Patchbay);
    }

    #[test]
    fn env_mirror_covers_every_option() {
        let opts = EngineOptions::default();
        let env = opts.env_for_bridge();
        assert_eq!(env.len(), EngineOptionId::ALL.len());
        assert!(env
            .iter()
            .any(|(k, v)| k == "ENGINE_OPTION_PROCESS_MODE" && v == "rack"));
        assert!(env
            .iter()
            .all(|(k, _)| k.starts_with("ENGINE_OPTION_")));
    }

    #[test]
    fn apply_roundtrips_through_value_string() {
        let mut opts = EngineOptions::default();
        opts.apply(EngineOptionId::PathVst3, "/usr/lib/vst3", false)
            .unwrap();
        opts.apply(EngineOptionId::MaxParameters, "64", false)
            .unwrap();
        opts.apply(EngineOptionId::ForceStereo, "true", false)
            .unwrap();
        let mut copy = EngineOptions::default();
        for id in EngineOptionId::ALL {
            copy.apply(id, &opts.value_string(id), false).unwrap();
        }
        assert_eq!(copy.path_vst3, Some(PathBuf::from("/usr/lib/vst3")));
        assert_eq!(copy.max_parameters, 64);
        assert!(copy.force_stereo);
    }
}
