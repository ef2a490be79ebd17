//! Declarative bindings and template expansion
//!
//! A binding maps a device+control pattern to an action, optionally scoped
//! to a deck. Writing one binding per pad per deck by hand gets old fast, so
//! the config carries per-deck rule templates with `{channel}`/`{deck}`
//! placeholders that are expanded across each device's `channel_to_deck`
//! table at startup.

use crate::config::AppConfig;
use crate::event::ControlRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Edge requirement for button-like controls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    Press,
    Release,
    #[default]
    Both,
}

/// One concrete dispatch rule. Immutable once expanded; the binding list is
/// rebuilt only at startup or config reload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Binding {
    pub device: String,
    pub control: ControlRef,
    pub action: String,
    /// Target deck; absent for global/transport actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deck: Option<String>,
    #[serde(default)]
    pub edge: Edge,
    /// Use this exact value instead of the scaled event value
    /// (e.g. a dedicated "fill 25%" pad).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<f64>,
    /// Clamp-and-rescale window `[lo, hi]` applied in the normalized domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_scale: Option<[f64; 2]>,
    /// Pass the normalized value even for actions that don't imply one.
    #[serde(default)]
    pub pass_value: bool,
}

/// Convert a human 1-based controller channel to the 0-based wire channel,
/// clamped to 0..=15.
pub fn human_to_wire_channel(human_ch: u8) -> u8 {
    human_ch.saturating_sub(1).min(15)
}

/// Recursively substitute `{channel}` and `{deck}` placeholders.
///
/// A string that IS a placeholder becomes the typed value (the channel stays
/// a number so `["note", 48, "{channel}"]` renders to a proper MIDI tuple);
/// mixed strings get substring replacement. Arrays and maps (keys included)
/// are walked recursively.
fn render_placeholders(value: &Value, channel: u8, deck: &str) -> Value {
    match value {
        Value::String(s) => {
            if s == "{channel}" {
                Value::from(channel)
            } else if s == "{deck}" {
                Value::from(deck)
            } else {
                Value::from(
                    s.replace("{deck}", deck)
                        .replace("{channel}", &channel.to_string()),
                )
            }
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_placeholders(item, channel, deck))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                let rendered_key = key
                    .replace("{deck}", deck)
                    .replace("{channel}", &channel.to_string());
                out.insert(rendered_key, render_placeholders(val, channel, deck));
            }
            Value::Object(out)
        },
        other => other.clone(),
    }
}

/// Parse a rendered rule into a [`Binding`], logging and dropping rules that
/// don't fit the shape (configuration error, not fatal).
fn parse_rule(rule: Value, origin: &str) -> Option<Binding> {
    match serde_json::from_value::<Binding>(rule.clone()) {
        Ok(binding) => Some(binding),
        Err(e) => {
            warn!("Skipping malformed {} binding {}: {}", origin, rule, e);
            None
        },
    }
}

/// Expand the config's templates into the flat, ordered binding list.
///
/// Order is: per-deck blocks (in config order, channels in ascending order),
/// then global rules, then static overrides. Expansion is deterministic:
/// the same config always yields the same list.
pub fn expand_templates(cfg: &AppConfig) -> Vec<Binding> {
    let mut out = Vec::new();

    // 1) Per-deck templates expanded across channel_to_deck
    for block in &cfg.templates.per_deck {
        let Some(device_cfg) = cfg.devices.get(&block.device) else {
            warn!(
                "Template block references unknown device '{}', skipping",
                block.device
            );
            continue;
        };
        for (&human_ch, deck) in &device_cfg.channel_to_deck {
            let wire_ch = human_to_wire_channel(human_ch);
            for rule in &block.rules {
                let mut rendered = render_placeholders(rule, wire_ch, deck);
                if let Value::Object(map) = &mut rendered {
                    map.entry("device".to_string())
                        .or_insert_with(|| Value::from(block.device.clone()));
                }
                out.extend(parse_rule(rendered, "per-deck"));
            }
        }
    }

    // 2) Global rules as-is (device must already be present)
    for rule in &cfg.templates.global {
        out.extend(parse_rule(rule.clone(), "global"));
    }

    // 3) Static overrides last, verbatim
    for rule in &cfg.bindings {
        out.extend(parse_rule(rule.clone(), "static"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MidiKind;
    use serde_json::json;

    #[test]
    fn test_human_to_wire_channel_clamps() {
        assert_eq!(human_to_wire_channel(1), 0);
        assert_eq!(human_to_wire_channel(2), 1);
        assert_eq!(human_to_wire_channel(16), 15);
        assert_eq!(human_to_wire_channel(0), 0);
        assert_eq!(human_to_wire_channel(40), 15);
    }

    #[test]
    fn test_render_typed_placeholders() {
        let rule = json!({
            "control": ["note", 48, "{channel}"],
            "deck": "{deck}",
            "label": "pad-{deck}-{channel}",
        });
        let rendered = render_placeholders(&rule, 3, "stage");
        assert_eq!(rendered["control"], json!(["note", 48, 3]));
        assert_eq!(rendered["deck"], json!("stage"));
        assert_eq!(rendered["label"], json!("pad-stage-3"));
    }

    #[test]
    fn test_expand_builtin_is_deterministic() {
        let cfg = AppConfig::builtin();
        let a = expand_templates(&cfg);
        let b = expand_templates(&cfg);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_expand_counts_and_order() {
        let cfg = AppConfig::builtin();
        let bindings = expand_templates(&cfg);

        // 12 per-deck rules x 6 decks + 9 global + 1 static override
        assert_eq!(bindings.len(), 12 * 6 + 9 + 1);

        // First block: deck on the lowest channel (human 2 -> wire 1)
        let first = &bindings[0];
        assert_eq!(first.device, "apc40");
        assert_eq!(first.deck.as_deref(), Some("stage"));
        assert_eq!(first.control, ControlRef::midi(MidiKind::Note, 48, 1));
        assert_eq!(first.edge, Edge::Press);

        // Static override is last
        let last = bindings.last().unwrap();
        assert_eq!(last.device, "joystick");
        assert_eq!(last.control, ControlRef::Named("axis_2".into()));
        assert_eq!(last.value_scale, Some([0.0, 1.0]));
    }

    #[test]
    fn test_device_injected_only_when_absent() {
        let mut cfg = AppConfig::builtin();
        cfg.templates.per_deck[0].rules = vec![json!({
            "device": "other",
            "control": ["note", 1, "{channel}"],
            "action": "toggle_effects",
            "deck": "{deck}",
        })];
        let bindings = expand_templates(&cfg);
        assert!(bindings.iter().take(6).all(|b| b.device == "other"));
    }

    #[test]
    fn test_malformed_rule_is_skipped() {
        let mut cfg = AppConfig::builtin();
        cfg.templates.global.push(json!({"control": 42}));
        cfg.bindings.push(json!("not even a map"));
        let good = expand_templates(&AppConfig::builtin()).len();
        assert_eq!(expand_templates(&cfg).len(), good);
    }

    #[test]
    fn test_unknown_template_device_skipped() {
        let mut cfg = AppConfig::builtin();
        cfg.templates.per_deck[0].device = "nope".to_string();
        let bindings = expand_templates(&cfg);
        // Only globals + static override survive
        assert_eq!(bindings.len(), 9 + 1);
    }

    #[test]
    fn test_fixed_value_edge_defaults() {
        let binding: Binding = serde_json::from_value(json!({
            "device": "apc40",
            "control": ["cc", 7, 0],
            "action": "set_opacity",
            "deck": "stage",
        }))
        .unwrap();
        assert_eq!(binding.edge, Edge::Both);
        assert_eq!(binding.fixed_value, None);
        assert!(!binding.pass_value);
    }
}
