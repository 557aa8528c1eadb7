use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::studio::types::EventId;

/// Parameter exposed by an event, with the value new instances start from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterManifest {
    pub name: String,
    #[serde(default)]
    pub default: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventManifest {
    pub path: String,
    pub id: EventId,
    #[serde(default)]
    pub parameters: Vec<ParameterManifest>,
    /// Bus the event is routed to.
    #[serde(default = "master_bus")]
    pub bus: String,
}

fn master_bus() -> String {
    "bus:/".to_string()
}

/// Contents of one bank file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankManifest {
    pub name: String,
    /// Whether a `<name>.strings.bank` companion exists.
    #[serde(default)]
    pub strings: bool,
    #[serde(default)]
    pub events: Vec<EventManifest>,
    #[serde(default)]
    pub buses: Vec<String>,
    #[serde(default)]
    pub vcas: Vec<String>,
}

/// Bank files visible to the in-memory engine, keyed by bank name.
///
/// Bank files are matched by file name (`<name>.bank` /
/// `<name>.strings.bank`); the directory part of a load path is ignored,
/// so the same library serves content-dir and mod-override locations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankLibrary {
    pub banks: Vec<BankManifest>,
}

impl BankLibrary {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidParam {
            reason: format!("bank library: {}", e),
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|_| EngineError::FileNotFound {
            path: path.as_ref().display().to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn bank(&self, name: &str) -> Option<&BankManifest> {
        self.banks.iter().find(|bank| bank.name == name)
    }

    pub fn event(&self, path: &str) -> Option<&EventManifest> {
        self.banks
            .iter()
            .flat_map(|bank| bank.events.iter())
            .find(|event| event.path == path)
    }

    /// Small game-shaped library: a master bank carrying the mixer, a music
    /// bank with three events and a sound effects bank.
    pub fn demo() -> Self {
        let event = |path: &str, id: u128, parameters: &[(&str, f32)], bus: &str| EventManifest {
            path: path.to_string(),
            id: Uuid::from_u128(id),
            parameters: parameters
                .iter()
                .map(|(name, default)| ParameterManifest {
                    name: name.to_string(),
                    default: *default,
                })
                .collect(),
            bus: bus.to_string(),
        };

        Self {
            banks: vec![
                BankManifest {
                    name: "master".to_string(),
                    strings: true,
                    events: Vec::new(),
                    buses: vec![
                        "bus:/music".to_string(),
                        "bus:/sfx".to_string(),
                        "bus:/sfx/ui".to_string(),
                    ],
                    vcas: vec!["vca:/music".to_string(), "vca:/sfx".to_string()],
                },
                BankManifest {
                    name: "music".to_string(),
                    strings: false,
                    events: vec![
                        event(
                            "event:/music/lvl1",
                            0x6d75_7369_635f_6c76_6c31_0000_0000_0001,
                            &[("layer1", 1.0), ("layer2", 0.0), ("fade", 0.0)],
                            "bus:/music",
                        ),
                        event(
                            "event:/music/lvl2",
                            0x6d75_7369_635f_6c76_6c32_0000_0000_0002,
                            &[("layer1", 1.0), ("chase", 0.0)],
                            "bus:/music",
                        ),
                        event(
                            "event:/music/menu",
                            0x6d75_7369_635f_6d65_6e75_0000_0000_0003,
                            &[],
                            "bus:/music",
                        ),
                    ],
                    buses: Vec::new(),
                    vcas: Vec::new(),
                },
                BankManifest {
                    name: "sfx".to_string(),
                    strings: false,
                    events: vec![
                        event(
                            "event:/sfx/jump",
                            0x7366_785f_6a75_6d70_0000_0000_0000_0004,
                            &[("surface", 0.0)],
                            "bus:/sfx",
                        ),
                        event(
                            "event:/sfx/dash",
                            0x7366_785f_6461_7368_0000_0000_0000_0005,
                            &[],
                            "bus:/sfx",
                        ),
                        event(
                            "event:/ui/confirm",
                            0x7569_5f63_6f6e_6669_726d_0000_0000_0006,
                            &[],
                            "bus:/sfx/ui",
                        ),
                    ],
                    buses: Vec::new(),
                    vcas: Vec::new(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_library_shape() {
        let library = BankLibrary::demo();
        assert_eq!(library.banks.len(), 3);
        assert_eq!(library.bank("music").map(|b| b.events.len()), Some(3));
        assert_eq!(library.bank("music").map(|b| b.strings), Some(false));
        assert!(library.bank("master").map(|b| b.strings).unwrap_or(false));
        assert!(library.event("event:/music/lvl1").is_some());
        assert!(library.bank("missing").is_none());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{
            "banks": [{
                "name": "music",
                "events": [{
                    "path": "event:/music/lvl1",
                    "id": "6d757369-635f-6c76-6c31-000000000001",
                    "parameters": [{"name": "fade"}]
                }]
            }]
        }"#;
        let library = BankLibrary::from_json(json).unwrap();
        let bank = library.bank("music").unwrap();
        assert!(!bank.strings);
        assert!(bank.buses.is_empty());
        let event = &bank.events[0];
        assert_eq!(event.bus, "bus:/");
        assert_eq!(event.parameters[0].default, 0.0);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = BankLibrary::from_json("{not json").unwrap_err();
        assert!(matches!(err, EngineError::InvalidParam { .. }));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = BankLibrary::load_from_file("/nonexistent/library.json").unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound { .. }));
    }
}
