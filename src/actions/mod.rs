//! Action registry - the closed set of handlers bindings can name
//!
//! Handlers are the only code allowed to mutate deck state. Each one resolves
//! its deck through the [`DeckManager`], applies the mutation, then emits the
//! resulting state (never a delta) to the show transport. Failures here are
//! logged and swallowed; they must never abort dispatch of the remaining
//! bindings for an event.

mod fills;

use crate::config::FillConfig;
use crate::deck::{DeckManager, DeckState, LayerType};
use crate::transport::ShowTransport;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The five canonical fill fractions that trigger discrete layer selection.
pub const FILL_STEPS: [f64; 5] = [0.0, 0.25, 0.5, 0.75, 1.0];

/// Tolerance for matching a fill value against a canonical step.
pub const FILL_STEP_EPSILON: f64 = 1e-4;

/// How long a momentary pulse stays on before the off command is sent.
const PULSE_INTERVAL: Duration = Duration::from_millis(120);

/// Every action name the registry resolves. Bindings naming anything else
/// are configuration errors (warned at load and at dispatch, never fatal).
pub const ACTION_NAMES: &[&str] = &[
    // Deck-scoped
    "toggle_effects",
    "toggle_colors",
    "toggle_transform",
    "set_fill",
    "set_opacity",
    "stop_deck",
    "random_fills",
    "next_clip",
    // Global transport
    "stop_all_decks",
    "start_autopilot",
    "stop_autopilot",
    "toggle_record",
    "tempo_tap",
    "nudge_minus",
    "nudge_plus",
    "bpm_resync",
    "toggle_metronome",
];

/// Closed name→handler registry over the deck model and show transport.
pub struct ActionRegistry {
    decks: Arc<RwLock<DeckManager>>,
    transport: Arc<dyn ShowTransport>,
    fills: FillConfig,
}

impl ActionRegistry {
    pub fn new(
        decks: Arc<RwLock<DeckManager>>,
        transport: Arc<dyn ShowTransport>,
        fills: FillConfig,
    ) -> Self {
        Self {
            decks,
            transport,
            fills,
        }
    }

    /// Whether `name` resolves to a handler.
    pub fn is_known(name: &str) -> bool {
        ACTION_NAMES.contains(&name)
    }

    /// Actions whose name marks them as value-taking (`set_*`).
    pub fn wants_value(name: &str) -> bool {
        name.starts_with("set_")
    }

    /// Dispatch an action by name.
    ///
    /// `deck` comes from the binding (absent for global actions), `value`
    /// is the fixed or normalized value when the binding produced one.
    /// Unknown actions and missing decks/values are warn-and-return.
    pub async fn invoke(&self, action: &str, deck: Option<&str>, value: Option<f64>) -> Result<()> {
        match action {
            "toggle_effects" => {
                if let Some(deck) = self.require_deck(action, deck) {
                    self.toggle_flag(&deck, "Effects", |d| {
                        let next = !d.effects;
                        d.set_effects(next);
                        next
                    })
                    .await;
                }
            },
            "toggle_colors" => {
                if let Some(deck) = self.require_deck(action, deck) {
                    self.toggle_flag(&deck, "Colors", |d| {
                        let next = !d.colors;
                        d.set_colors(next);
                        next
                    })
                    .await;
                }
            },
            "toggle_transform" => {
                if let Some(deck) = self.require_deck(action, deck) {
                    self.toggle_flag(&deck, "Transform", |d| {
                        let next = !d.transform;
                        d.set_transform(next);
                        next
                    })
                    .await;
                }
            },
            "set_fill" => {
                if let (Some(deck), Some(value)) =
                    (self.require_deck(action, deck), self.require_value(action, value))
                {
                    self.set_fill(&deck, value).await;
                }
            },
            "set_opacity" => {
                if let (Some(deck), Some(value)) =
                    (self.require_deck(action, deck), self.require_value(action, value))
                {
                    self.set_opacity(&deck, value).await;
                }
            },
            "stop_deck" => {
                if let Some(deck) = self.require_deck(action, deck) {
                    self.stop_deck(&deck).await;
                }
            },
            "random_fills" => {
                if let Some(deck) = self.require_deck(action, deck) {
                    self.random_fills(&deck).await;
                }
            },
            "next_clip" => {
                if let Some(deck) = self.require_deck(action, deck) {
                    self.next_clip(&deck).await;
                }
            },
            "stop_all_decks" => self.stop_all_decks().await,
            "start_autopilot" => {
                info!("Autopilot START");
                self.send("/czechb/control/autopilot/start", 1.0).await;
            },
            "stop_autopilot" => {
                info!("Autopilot STOP");
                self.send("/czechb/control/autopilot/stop", 1.0).await;
            },
            "toggle_record" => {
                info!("Record TOGGLE");
                self.send("/czechb/control/record/toggle", 1.0).await;
            },
            "tempo_tap" => {
                info!("Tempo TAP");
                self.pulse("/czechb/control/tempo/tap").await;
            },
            "nudge_minus" => {
                info!("Tempo NUDGE-");
                self.send("/czechb/control/tempo/nudge_minus", 1.0).await;
            },
            "nudge_plus" => {
                info!("Tempo NUDGE+");
                self.send("/czechb/control/tempo/nudge_plus", 1.0).await;
            },
            "bpm_resync" => {
                info!("BPM RESYNC");
                self.pulse("/czechb/control/tempo/resync").await;
            },
            "toggle_metronome" => {
                info!("Metronome TOGGLE");
                self.pulse("/czechb/control/metronome/toggle").await;
            },
            other => {
                warn!("Unknown action '{}' (configuration error)", other);
            },
        }
        Ok(())
    }

    // ---- deck-scoped handlers ----

    async fn toggle_flag(
        &self,
        deck_name: &str,
        label: &str,
        apply: impl FnOnce(&mut DeckState) -> bool,
    ) {
        let snapshot = {
            let mut mgr = self.decks.write();
            let Some(deck) = mgr.deck_mut(deck_name) else {
                warn!("Deck '{}' not found for toggle", deck_name);
                return;
            };
            let next = apply(deck);
            info!("[{}] {} -> {}", deck_name, label, next);
            deck.clone()
        };
        self.emit_deck_state(&snapshot).await;
    }

    /// Set the deck fill level.
    ///
    /// Values above 1.0 in magnitude are raw controller units (0-127) and are
    /// scaled down first. Any fill change wakes the deck up (`playing`), and
    /// landing on one of the canonical steps triggers discrete fill-layer
    /// selection.
    async fn set_fill(&self, deck_name: &str, value: f64) {
        let mut v = value;
        if v.abs() > 1.0 {
            v /= 127.0;
        }
        v = v.clamp(0.0, 1.0);

        let snapshot = {
            let mut mgr = self.decks.write();
            let Some(deck) = mgr.deck_mut(deck_name) else {
                warn!("Deck '{}' not found for set_fill", deck_name);
                return;
            };
            deck.set_fill(v);
            deck.set_playing(true);
            info!("[{}] Fill -> {:.2}", deck_name, deck.fill);
            deck.clone()
        };
        self.emit_deck_state(&snapshot).await;

        if let Some(step) = canonical_fill_step(v) {
            self.apply_fill_step(deck_name, step).await;
        }
    }

    async fn set_opacity(&self, deck_name: &str, value: f64) {
        let mut v = value;
        if v.abs() > 1.0 {
            v /= 127.0;
        }
        let snapshot = {
            let mut mgr = self.decks.write();
            let Some(deck) = mgr.deck_mut(deck_name) else {
                warn!("Deck '{}' not found for set_opacity", deck_name);
                return;
            };
            deck.set_opacity(v);
            deck.clone()
        };
        self.emit_deck_state(&snapshot).await;
    }

    /// Stop a deck: clear playing and fill, then stop every layer belonging
    /// to any group mapped to it (all types, not just fills).
    async fn stop_deck(&self, deck_name: &str) {
        let (snapshot, layers) = {
            let mut mgr = self.decks.write();
            let Some(deck) = mgr.deck_mut(deck_name) else {
                warn!("Deck '{}' not found for stop_deck", deck_name);
                return;
            };
            deck.set_playing(false);
            deck.set_fill(0.0);
            let snapshot = deck.clone();
            let layers: Vec<_> = mgr.layers_for_deck(deck_name).into_iter().cloned().collect();
            (snapshot, layers)
        };
        info!("[{}] STOPPED ({} layers)", deck_name, layers.len());
        self.emit_deck_state(&snapshot).await;
        for layer in &layers {
            self.stop_layer(layer).await;
        }
    }

    /// Jump to a random canonical fill step.
    async fn random_fills(&self, deck_name: &str) {
        use rand::seq::SliceRandom;
        let step = *FILL_STEPS
            .choose(&mut rand::thread_rng())
            .expect("FILL_STEPS is non-empty");

        let snapshot = {
            let mut mgr = self.decks.write();
            let Some(deck) = mgr.deck_mut(deck_name) else {
                warn!("Deck '{}' not found for random_fills", deck_name);
                return;
            };
            deck.set_fill(step);
            deck.set_playing(true);
            info!("[{}] Random Fill -> {:.2}", deck_name, step);
            deck.clone()
        };
        self.emit_deck_state(&snapshot).await;
        self.apply_fill_step(deck_name, step).await;
    }

    /// Advance clips: fills layers always, the other typed layers only while
    /// the matching deck flag is on.
    async fn next_clip(&self, deck_name: &str) {
        let layers = {
            let mgr = self.decks.read();
            let Some(deck) = mgr.deck(deck_name) else {
                warn!("Deck '{}' not found for next_clip", deck_name);
                return;
            };
            let (effects, colors, transform) = (deck.effects, deck.colors, deck.transform);
            mgr.layers_for_deck(deck_name)
                .into_iter()
                .filter(|layer| {
                    layer.has_type(LayerType::Fills)
                        || (effects && layer.has_type(LayerType::Effects))
                        || (colors && layer.has_type(LayerType::Colors))
                        || (transform && layer.has_type(LayerType::Transforms))
                })
                .cloned()
                .collect::<Vec<_>>()
        };
        info!("[{}] Next clip on {} layers", deck_name, layers.len());
        for layer in &layers {
            self.send(
                &format!("/composition/layers/{}/connectnextcolumn", layer.index),
                1.0,
            )
            .await;
        }
    }

    // ---- global handlers ----

    async fn stop_all_decks(&self) {
        info!("Stopping all decks");
        let snapshots: Vec<DeckState> = {
            let mut mgr = self.decks.write();
            mgr.all_decks_mut()
                .map(|deck| {
                    deck.set_playing(false);
                    deck.clone()
                })
                .collect()
        };
        for snapshot in &snapshots {
            self.emit_deck_state(snapshot).await;
        }
        self.send("/czechb/control/stop_all_decks", 1.0).await;
    }

    // ---- emission helpers ----

    /// Push the full current state of a deck to the show.
    async fn emit_deck_state(&self, deck: &DeckState) {
        let name = &deck.name;
        self.send(&format!("/deck/{}/play", name), bool_val(deck.playing))
            .await;
        self.send(&format!("/deck/{}/effects", name), bool_val(deck.effects))
            .await;
        self.send(&format!("/deck/{}/colors", name), bool_val(deck.colors))
            .await;
        self.send(&format!("/deck/{}/transform", name), bool_val(deck.transform))
            .await;
        self.send(&format!("/deck/{}/fill", name), deck.fill).await;
        self.send(&format!("/deck/{}/opacity", name), deck.opacity)
            .await;
    }

    /// Fire-and-forget send; emission failures never propagate.
    async fn send(&self, address: &str, value: f64) {
        if let Err(e) = self.transport.send(address, value).await {
            warn!("send to {} failed: {}", address, e);
        }
    }

    /// Momentary pulse: on now, off after a short detached delay. The off
    /// command must not block the dispatch task.
    async fn pulse(&self, address: &str) {
        self.send(address, 1.0).await;
        let transport = self.transport.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(PULSE_INTERVAL).await;
            if let Err(e) = transport.send(&address, 0.0).await {
                warn!("pulse off for {} failed: {}", address, e);
            }
        });
    }

    // ---- argument plumbing ----

    fn require_deck(&self, action: &str, deck: Option<&str>) -> Option<String> {
        match deck {
            Some(d) => Some(d.to_string()),
            None => {
                warn!("Action '{}' requires a deck but the binding has none", action);
                None
            },
        }
    }

    fn require_value(&self, action: &str, value: Option<f64>) -> Option<f64> {
        match value {
            Some(v) if v.is_finite() => Some(v),
            Some(v) => {
                warn!("Action '{}' got a non-finite value {}", action, v);
                None
            },
            None => {
                warn!("Action '{}' requires a value but none was produced", action);
                None
            },
        }
    }
}

fn bool_val(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Match a fill value against the canonical steps within tolerance.
pub fn canonical_fill_step(value: f64) -> Option<f64> {
    FILL_STEPS
        .iter()
        .copied()
        .find(|step| (value - step).abs() < FILL_STEP_EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::collections::HashMap;

    fn setup() -> (Arc<RwLock<DeckManager>>, Arc<MemoryTransport>, ActionRegistry) {
        let mapping = HashMap::from([
            ("Stage".to_string(), "stage".to_string()),
            ("Top".to_string(), "top".to_string()),
        ]);
        let decks = Arc::new(RwLock::new(DeckManager::new(mapping)));
        let transport = Arc::new(MemoryTransport::new());
        let registry = ActionRegistry::new(
            decks.clone(),
            transport.clone() as Arc<dyn ShowTransport>,
            FillConfig::default(),
        );
        (decks, transport, registry)
    }

    #[test]
    fn test_canonical_fill_step() {
        assert_eq!(canonical_fill_step(0.25), Some(0.25));
        assert_eq!(canonical_fill_step(0.25004), None);
        assert_eq!(canonical_fill_step(0.2500001), Some(0.25));
        assert_eq!(canonical_fill_step(0.3), None);
        assert_eq!(canonical_fill_step(1.0), Some(1.0));
    }

    #[test]
    fn test_known_actions() {
        assert!(ActionRegistry::is_known("toggle_effects"));
        assert!(ActionRegistry::is_known("tempo_tap"));
        assert!(!ActionRegistry::is_known("launch_nukes"));
        assert!(ActionRegistry::wants_value("set_fill"));
        assert!(!ActionRegistry::wants_value("stop_deck"));
    }

    #[tokio::test]
    async fn test_toggle_effects_flips_and_emits() {
        let (decks, transport, registry) = setup();
        registry
            .invoke("toggle_effects", Some("stage"), None)
            .await
            .unwrap();

        assert!(decks.read().deck("stage").unwrap().effects);
        let sent = transport.sent();
        assert!(sent.contains(&("/deck/stage/effects".to_string(), 1.0)));

        registry
            .invoke("toggle_effects", Some("stage"), None)
            .await
            .unwrap();
        assert!(!decks.read().deck("stage").unwrap().effects);
    }

    #[tokio::test]
    async fn test_unknown_deck_is_noop() {
        let (decks, transport, registry) = setup();
        for action in ["toggle_effects", "set_fill", "stop_deck", "random_fills", "next_clip"] {
            registry
                .invoke(action, Some("ghost"), Some(0.5))
                .await
                .unwrap();
        }
        assert!(transport.sent().is_empty());
        // Existing decks untouched
        assert!(!decks.read().deck("stage").unwrap().playing);
    }

    #[tokio::test]
    async fn test_unknown_action_is_noop() {
        let (_, transport, registry) = setup();
        registry
            .invoke("definitely_not_an_action", Some("stage"), None)
            .await
            .unwrap();
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_set_fill_raw_units_and_autoplay() {
        let (decks, _, registry) = setup();
        // 95 raw velocity units -> 95/127
        registry
            .invoke("set_fill", Some("stage"), Some(95.0))
            .await
            .unwrap();
        let deck = decks.read().deck("stage").unwrap().clone();
        assert!((deck.fill - 95.0 / 127.0).abs() < 1e-9);
        assert!(deck.playing);

        // Anything over 1.0 counts as raw units, even just barely
        registry
            .invoke("set_fill", Some("stage"), Some(1.5))
            .await
            .unwrap();
        let deck = decks.read().deck("stage").unwrap().clone();
        assert!((deck.fill - 1.5 / 127.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_set_fill_missing_value_is_noop() {
        let (decks, transport, registry) = setup();
        registry.invoke("set_fill", Some("stage"), None).await.unwrap();
        assert_eq!(decks.read().deck("stage").unwrap().fill, 0.0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stop_deck_clears_state_and_stops_layers() {
        let (decks, transport, registry) = setup();
        {
            let mut mgr = decks.write();
            mgr.upsert_group(1, "Stage");
            mgr.upsert_layer(1, 1, "Stage Fills", vec![2, 3], Some(1));
            mgr.upsert_layer(1, 2, "Stage Effects", vec![4], Some(1));
            let deck = mgr.deck_mut("stage").unwrap();
            deck.set_playing(true);
            deck.set_fill(0.75);
        }

        registry.invoke("stop_deck", Some("stage"), None).await.unwrap();

        let deck = decks.read().deck("stage").unwrap().clone();
        assert!(!deck.playing);
        assert_eq!(deck.fill, 0.0);

        // Every layer got a stop, not just the fills one
        let addresses = transport.addresses();
        assert!(addresses.contains(&"/composition/layers/1/clips/1/connect".to_string()));
        assert!(addresses.contains(&"/composition/layers/2/clips/1/connect".to_string()));
    }

    #[tokio::test]
    async fn test_random_fills_lands_on_canonical_step() {
        let (decks, _, registry) = setup();
        for _ in 0..10 {
            registry.invoke("random_fills", Some("stage"), None).await.unwrap();
            let deck = decks.read().deck("stage").unwrap().clone();
            assert!(deck.playing);
            assert!(canonical_fill_step(deck.fill).is_some());
        }
    }

    #[tokio::test]
    async fn test_next_clip_gates_on_flags() {
        let (decks, transport, registry) = setup();
        {
            let mut mgr = decks.write();
            mgr.upsert_group(1, "Stage");
            mgr.upsert_layer(1, 1, "Stage Fills", vec![2], Some(1));
            mgr.upsert_layer(1, 2, "Stage Colors", vec![3], Some(1));
            mgr.upsert_layer(1, 3, "Stage Effects", vec![4], Some(1));
        }

        // No flags on: only the fills layer advances
        registry.invoke("next_clip", Some("stage"), None).await.unwrap();
        let addresses = transport.addresses();
        assert!(addresses.contains(&"/composition/layers/1/connectnextcolumn".to_string()));
        assert!(!addresses.contains(&"/composition/layers/2/connectnextcolumn".to_string()));
        assert!(!addresses.contains(&"/composition/layers/3/connectnextcolumn".to_string()));

        // Colors on: the colors layer joins in
        transport.clear();
        decks.write().deck_mut("stage").unwrap().set_colors(true);
        registry.invoke("next_clip", Some("stage"), None).await.unwrap();
        let addresses = transport.addresses();
        assert!(addresses.contains(&"/composition/layers/1/connectnextcolumn".to_string()));
        assert!(addresses.contains(&"/composition/layers/2/connectnextcolumn".to_string()));
        assert!(!addresses.contains(&"/composition/layers/3/connectnextcolumn".to_string()));
    }

    #[tokio::test]
    async fn test_stop_all_decks_emits_each_deck_and_control() {
        let (decks, transport, registry) = setup();
        {
            let mut mgr = decks.write();
            mgr.deck_mut("stage").unwrap().set_playing(true);
            mgr.deck_mut("top").unwrap().set_playing(true);
        }

        registry.invoke("stop_all_decks", None, None).await.unwrap();

        let mgr = decks.read();
        assert!(!mgr.deck("stage").unwrap().playing);
        assert!(!mgr.deck("top").unwrap().playing);
        drop(mgr);

        let addresses = transport.addresses();
        assert!(addresses.contains(&"/deck/stage/play".to_string()));
        assert!(addresses.contains(&"/deck/top/play".to_string()));
        assert_eq!(addresses.last().unwrap(), "/czechb/control/stop_all_decks");
    }

    #[tokio::test]
    async fn test_pulse_sends_on_then_off() {
        let (_, transport, registry) = setup();
        registry.invoke("tempo_tap", None, None).await.unwrap();

        // On command lands immediately
        assert_eq!(
            transport.sent(),
            vec![("/czechb/control/tempo/tap".to_string(), 1.0)]
        );

        // Off command lands after the pulse interval, without blocking invoke
        tokio::time::sleep(PULSE_INTERVAL + Duration::from_millis(50)).await;
        assert_eq!(
            transport.sent(),
            vec![
                ("/czechb/control/tempo/tap".to_string(), 1.0),
                ("/czechb/control/tempo/tap".to_string(), 0.0),
            ]
        );
    }
}
