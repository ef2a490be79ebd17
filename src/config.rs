//! Configuration types for the deck router
//!
//! The in-memory shapes the template expander and reflector consume. A YAML
//! document with the same layout can be loaded from disk; when none exists
//! the embedded default (an APC40 + joystick setup) is used.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Default configuration document compiled into the binary.
pub const DEFAULT_CONFIG: &str = include_str!("../config-default.yaml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Show group name → deck name (exact match).
    #[serde(rename = "group_to_deck_mapping", default)]
    pub group_to_deck: HashMap<String, String>,

    /// Device catalog keyed by device key ("apc40", "joystick", ...).
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,

    /// Binding templates expanded at startup.
    #[serde(default)]
    pub templates: Templates,

    /// Static override bindings, appended verbatim after expansion.
    #[serde(default)]
    pub bindings: Vec<serde_json::Value>,

    #[serde(default)]
    pub reflector: ReflectorConfig,

    #[serde(default)]
    pub fills: FillConfig,
}

/// One entry of the device catalog.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: Option<String>,
    /// Human (1-based) controller channel → deck name. Ordered so template
    /// expansion is deterministic.
    #[serde(default)]
    pub channel_to_deck: BTreeMap<u8, String>,
}

/// Template blocks: per-deck skeletons with `{channel}`/`{deck}` placeholders
/// plus global rules used as-is.
///
/// Rule skeletons stay untyped (`serde_json::Value`) until after placeholder
/// rendering; malformed rules are then skipped with a warning instead of
/// failing the whole config.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Templates {
    #[serde(default)]
    pub per_deck: Vec<PerDeckTemplate>,
    #[serde(default)]
    pub global: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PerDeckTemplate {
    pub device: String,
    #[serde(default)]
    pub rules: Vec<serde_json::Value>,
}

/// State reflector tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReflectorConfig {
    /// Device key whose `channel_to_deck` provides the indicator channels.
    #[serde(default = "default_reflector_device")]
    pub device: String,
    #[serde(default = "default_reflect_hz")]
    pub hz: f64,
    #[serde(default = "default_blink_hz")]
    pub blink_hz: f64,
    /// Per-channel blink phase offset, seconds. Slightly negative so adjacent
    /// decks ripple instead of flashing in lockstep.
    #[serde(default = "default_blink_phase")]
    pub blink_phase_per_channel_sec: f64,
    /// Fraction of the blink period the lamp is on.
    #[serde(default = "default_blink_duty")]
    pub blink_duty: f64,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            device: default_reflector_device(),
            hz: default_reflect_hz(),
            blink_hz: default_blink_hz(),
            blink_phase_per_channel_sec: default_blink_phase(),
            blink_duty: default_blink_duty(),
        }
    }
}

/// Clip-column policy when the topology carries no clip list for a layer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FillConfig {
    /// Inclusive [lo, hi] column range to pick a random clip from.
    #[serde(default = "default_fallback_clip_columns")]
    pub fallback_clip_columns: [u32; 2],
    /// Column used to stop a layer whose stop clip is unknown.
    #[serde(default = "default_fallback_stop_column")]
    pub fallback_stop_column: u32,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            fallback_clip_columns: default_fallback_clip_columns(),
            fallback_stop_column: default_fallback_stop_column(),
        }
    }
}

fn default_reflector_device() -> String {
    "apc40".to_string()
}

fn default_reflect_hz() -> f64 {
    30.0
}

fn default_blink_hz() -> f64 {
    2.0
}

fn default_blink_phase() -> f64 {
    -0.06
}

fn default_blink_duty() -> f64 {
    0.5
}

fn default_fallback_clip_columns() -> [u32; 2] {
    [2, 10]
}

fn default_fallback_stop_column() -> u32 {
    1
}

impl AppConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// The compiled-in default configuration.
    pub fn builtin() -> Self {
        Self::from_yaml(DEFAULT_CONFIG).expect("embedded default config must parse")
    }

    /// Load from a path, falling back to the embedded default when the file
    /// does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using built-in defaults", path.display());
            return Ok(Self::builtin());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Deck name → 0-based wire channel for the reflector's feedback device.
    pub fn deck_to_channel(&self) -> HashMap<String, u8> {
        let mut out = HashMap::new();
        if let Some(device) = self.devices.get(&self.reflector.device) {
            for (&human_ch, deck) in &device.channel_to_deck {
                out.insert(
                    deck.clone(),
                    crate::bindings::human_to_wire_channel(human_ch),
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_config_parses() {
        let cfg = AppConfig::builtin();
        assert_eq!(cfg.group_to_deck.get("Stage"), Some(&"stage".to_string()));
        assert_eq!(cfg.devices["apc40"].channel_to_deck[&2], "stage");
        assert_eq!(cfg.templates.per_deck.len(), 1);
        assert_eq!(cfg.templates.global.len(), 9);
        assert_eq!(cfg.bindings.len(), 1);
        assert_eq!(cfg.reflector.hz, 30.0);
        assert_eq!(cfg.fills.fallback_clip_columns, [2, 10]);
    }

    #[test]
    fn test_missing_sections_default() {
        let cfg = AppConfig::from_yaml("group_to_deck_mapping:\n  \"A\": a\n").unwrap();
        assert!(cfg.devices.is_empty());
        assert!(cfg.templates.per_deck.is_empty());
        assert!(cfg.bindings.is_empty());
        assert_eq!(cfg.reflector.blink_hz, 2.0);
        assert_eq!(cfg.fills.fallback_stop_column, 1);
    }

    #[test]
    fn test_deck_to_channel_uses_wire_channels() {
        let cfg = AppConfig::builtin();
        let map = cfg.deck_to_channel();
        // Human channel 2 -> wire channel 1
        assert_eq!(map["stage"], 1);
        assert_eq!(map["top"], 6);
    }

    #[test]
    fn test_load_missing_path_falls_back() {
        let cfg = AppConfig::load("/definitely/not/here.yaml").unwrap();
        assert!(!cfg.group_to_deck.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "group_to_deck_mapping:\n  \"Solo\": solo\nreflector:\n  hz: 15.0\n"
        )
        .unwrap();
        let cfg = AppConfig::load(file.path()).unwrap();
        assert_eq!(cfg.group_to_deck["Solo"], "solo");
        assert_eq!(cfg.reflector.hz, 15.0);
        // Untouched knobs keep their defaults
        assert_eq!(cfg.reflector.blink_duty, 0.5);
    }
}
