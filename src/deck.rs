//! Deck state model and show topology
//!
//! A deck is a named logical performance channel the operator controls; it
//! maps to one or more show-topology groups. Groups and their layers are
//! discovered externally (composition fetcher) and upserted here; the core
//! only ever reads them.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Milliseconds since the Unix epoch, used for `last_changed` stamps.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Layer classification derived from the layer name.
///
/// Classification is a case-insensitive substring match against a fixed
/// vocabulary; a layer may carry several tags ("Stage Fills + Colors").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    Fills,
    Effects,
    Colors,
    Transforms,
    Opacity,
}

impl LayerType {
    const KEYWORDS: [(LayerType, &'static str); 5] = [
        (LayerType::Fills, "fills"),
        (LayerType::Effects, "effects"),
        (LayerType::Colors, "colors"),
        (LayerType::Transforms, "transforms"),
        (LayerType::Opacity, "opacity"),
    ];

    /// Classify a layer name into zero or more types.
    pub fn classify(layer_name: &str) -> Vec<LayerType> {
        let lower = layer_name.to_lowercase();
        Self::KEYWORDS
            .iter()
            .filter(|(_, kw)| lower.contains(kw))
            .map(|(ty, _)| *ty)
            .collect()
    }
}

/// One layer of a show group, as reported by the topology fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    /// 1-based layer index in the composition.
    pub index: u32,
    pub name: String,
    pub types: Vec<LayerType>,
    /// 1-based clip columns that are NOT stop clips.
    pub clips: Vec<u32>,
    /// 1-based first stop-clip column, if the layer has one.
    pub stop_clip: Option<u32>,
}

impl LayerInfo {
    pub fn has_type(&self, ty: LayerType) -> bool {
        self.types.contains(&ty)
    }
}

/// A named visual channel in the show, containing ordered layers.
#[derive(Debug, Clone)]
pub struct GroupInfo {
    /// 1-based group index in the composition.
    pub index: u32,
    pub name: String,
    /// Layers keyed by their 1-based index (ordered).
    pub layers: BTreeMap<u32, LayerInfo>,
}

/// Mutable per-deck state, owned by [`DeckManager`].
///
/// `fill` and `opacity` are always clamped to [0,1]; `last_changed` moves on
/// every effective mutation.
#[derive(Debug, Clone)]
pub struct DeckState {
    pub name: String,
    pub playing: bool,
    pub effects: bool,
    pub colors: bool,
    pub transform: bool,
    /// 0..1
    pub fill: f64,
    /// 0..1
    pub opacity: f64,
    /// ms since epoch of the last field mutation.
    pub last_changed: u64,
}

impl DeckState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            playing: false,
            effects: false,
            colors: false,
            transform: false,
            fill: 0.0,
            opacity: 1.0,
            last_changed: now_ms(),
        }
    }

    fn touch(&mut self) {
        self.last_changed = now_ms();
    }

    pub fn set_playing(&mut self, value: bool) {
        if self.playing != value {
            self.playing = value;
            self.touch();
        }
    }

    pub fn set_effects(&mut self, value: bool) {
        if self.effects != value {
            self.effects = value;
            self.touch();
        }
    }

    pub fn set_colors(&mut self, value: bool) {
        if self.colors != value {
            self.colors = value;
            self.touch();
        }
    }

    pub fn set_transform(&mut self, value: bool) {
        if self.transform != value {
            self.transform = value;
            self.touch();
        }
    }

    pub fn set_fill(&mut self, value: f64) {
        let v = value.clamp(0.0, 1.0);
        if (self.fill - v).abs() > 1e-6 {
            self.fill = v;
            self.touch();
        }
    }

    pub fn set_opacity(&mut self, value: f64) {
        let v = value.clamp(0.0, 1.0);
        if (self.opacity - v).abs() > 1e-6 {
            self.opacity = v;
            self.touch();
        }
    }
}

/// Aggregate root owning deck states and the live group/layer topology.
///
/// The deck set is fixed at construction from the group→deck mapping; groups
/// and layers are upserted wholesale whenever fresh topology data arrives.
#[derive(Debug)]
pub struct DeckManager {
    group_to_deck: HashMap<String, String>,
    decks: HashMap<String, DeckState>,
    groups_by_index: BTreeMap<u32, GroupInfo>,
    group_name_to_index: HashMap<String, u32>,
}

impl DeckManager {
    pub fn new(group_to_deck: HashMap<String, String>) -> Self {
        let decks = group_to_deck
            .values()
            .map(|deck| (deck.clone(), DeckState::new(deck.clone())))
            .collect();
        Self {
            group_to_deck,
            decks,
            groups_by_index: BTreeMap::new(),
            group_name_to_index: HashMap::new(),
        }
    }

    // ---- decks ----

    pub fn deck(&self, name: &str) -> Option<&DeckState> {
        self.decks.get(name)
    }

    pub fn deck_mut(&mut self, name: &str) -> Option<&mut DeckState> {
        self.decks.get_mut(name)
    }

    pub fn all_decks(&self) -> impl Iterator<Item = &DeckState> {
        self.decks.values()
    }

    pub fn all_decks_mut(&mut self) -> impl Iterator<Item = &mut DeckState> {
        self.decks.values_mut()
    }

    /// Deck names in a stable (sorted) order.
    pub fn deck_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.decks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn resolve_group_to_deck(&self, group_name: &str) -> Option<&str> {
        self.group_to_deck.get(group_name).map(|s| s.as_str())
    }

    // ---- topology upserts (called by the external fetcher) ----

    /// Insert or rename a group by its 1-based index.
    pub fn upsert_group(&mut self, group_index: u32, group_name: &str) {
        match self.groups_by_index.get_mut(&group_index) {
            Some(group) => {
                if group.name != group_name {
                    self.group_name_to_index.remove(&group.name);
                    group.name = group_name.to_string();
                }
            },
            None => {
                self.groups_by_index.insert(
                    group_index,
                    GroupInfo {
                        index: group_index,
                        name: group_name.to_string(),
                        layers: BTreeMap::new(),
                    },
                );
            },
        }
        self.group_name_to_index
            .insert(group_name.to_string(), group_index);
        debug!("topology: group {} -> '{}'", group_index, group_name);
    }

    /// Insert or replace a layer under a group. Creates a placeholder group
    /// when topology arrives layers-first.
    pub fn upsert_layer(
        &mut self,
        group_index: u32,
        layer_index: u32,
        layer_name: &str,
        clips: Vec<u32>,
        stop_clip: Option<u32>,
    ) {
        if !self.groups_by_index.contains_key(&group_index) {
            self.upsert_group(group_index, &format!("Group {}", group_index));
        }
        let group = self
            .groups_by_index
            .get_mut(&group_index)
            .expect("group upserted above");
        group.layers.insert(
            layer_index,
            LayerInfo {
                index: layer_index,
                name: layer_name.to_string(),
                types: LayerType::classify(layer_name),
                clips,
                stop_clip,
            },
        );
    }

    // ---- topology queries ----

    pub fn group_by_name(&self, group_name: &str) -> Option<&GroupInfo> {
        self.group_name_to_index
            .get(group_name)
            .and_then(|idx| self.groups_by_index.get(idx))
    }

    /// Groups whose names map to the given deck, in index order.
    pub fn groups_for_deck(&self, deck_name: &str) -> Vec<&GroupInfo> {
        self.groups_by_index
            .values()
            .filter(|g| self.resolve_group_to_deck(&g.name) == Some(deck_name))
            .collect()
    }

    /// All layers of all groups mapped to a deck, in (group, layer) order.
    pub fn layers_for_deck(&self, deck_name: &str) -> Vec<&LayerInfo> {
        self.groups_for_deck(deck_name)
            .into_iter()
            .flat_map(|g| g.layers.values())
            .collect()
    }

    /// Layers of a given type belonging to a deck, in (group, layer) order.
    pub fn layers_for_deck_by_type(&self, deck_name: &str, ty: LayerType) -> Vec<&LayerInfo> {
        self.layers_for_deck(deck_name)
            .into_iter()
            .filter(|l| l.has_type(ty))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> DeckManager {
        let mapping = HashMap::from([
            ("Stage".to_string(), "stage".to_string()),
            ("Back Panel".to_string(), "back".to_string()),
            ("Wire Trace".to_string(), "stage".to_string()),
        ]);
        DeckManager::new(mapping)
    }

    #[test]
    fn test_decks_created_from_mapping_values() {
        let mgr = manager();
        assert!(mgr.deck("stage").is_some());
        assert!(mgr.deck("back").is_some());
        assert!(mgr.deck("Stage").is_none()); // group names are not decks
        assert_eq!(mgr.deck_names(), vec!["back".to_string(), "stage".to_string()]);
    }

    #[test]
    fn test_classify_layer_types() {
        assert_eq!(LayerType::classify("Stage Fills 1"), vec![LayerType::Fills]);
        assert_eq!(
            LayerType::classify("FILLS and colors"),
            vec![LayerType::Fills, LayerType::Colors]
        );
        assert!(LayerType::classify("Ambient wash").is_empty());
    }

    #[test]
    fn test_fill_and_opacity_clamped() {
        let mut deck = DeckState::new("stage");
        deck.set_fill(1.7);
        assert_eq!(deck.fill, 1.0);
        deck.set_fill(-0.3);
        assert_eq!(deck.fill, 0.0);
        deck.set_opacity(2.0);
        assert_eq!(deck.opacity, 1.0);
    }

    #[test]
    fn test_last_changed_moves_only_on_change() {
        let mut deck = DeckState::new("stage");
        deck.last_changed = 0;
        deck.set_playing(false); // no-op: already false
        assert_eq!(deck.last_changed, 0);
        deck.set_playing(true);
        assert!(deck.last_changed > 0);
    }

    #[test]
    fn test_upsert_layer_replaces_in_place() {
        let mut mgr = manager();
        mgr.upsert_group(1, "Stage");
        mgr.upsert_layer(1, 3, "Stage Fills A", vec![2, 3, 4], Some(1));
        mgr.upsert_layer(1, 3, "Stage Colors", vec![], None);

        let group = mgr.group_by_name("Stage").unwrap();
        let layer = &group.layers[&3];
        assert_eq!(layer.name, "Stage Colors");
        assert_eq!(layer.types, vec![LayerType::Colors]);
        assert!(layer.clips.is_empty());
        assert_eq!(layer.stop_clip, None);
    }

    #[test]
    fn test_layers_first_upsert_creates_placeholder_group() {
        let mut mgr = manager();
        mgr.upsert_layer(2, 1, "Back Fills", vec![2], None);
        assert!(mgr.group_by_name("Group 2").is_some());

        // Renaming keeps the layers
        mgr.upsert_group(2, "Back Panel");
        let group = mgr.group_by_name("Back Panel").unwrap();
        assert_eq!(group.layers.len(), 1);
        assert!(mgr.group_by_name("Group 2").is_none());
    }

    #[test]
    fn test_layers_for_deck_spans_groups() {
        let mut mgr = manager();
        mgr.upsert_group(1, "Stage");
        mgr.upsert_group(2, "Wire Trace");
        mgr.upsert_group(3, "Back Panel");
        mgr.upsert_layer(1, 1, "Stage Fills", vec![2, 3], Some(1));
        mgr.upsert_layer(2, 5, "Wire Fills", vec![4], Some(1));
        mgr.upsert_layer(2, 6, "Wire Effects", vec![], None);
        mgr.upsert_layer(3, 9, "Back Fills", vec![2], None);

        let stage_layers = mgr.layers_for_deck("stage");
        assert_eq!(stage_layers.len(), 3); // Stage + Wire Trace groups

        let stage_fills = mgr.layers_for_deck_by_type("stage", LayerType::Fills);
        assert_eq!(stage_fills.len(), 2);
        assert_eq!(stage_fills[0].index, 1);
        assert_eq!(stage_fills[1].index, 5);
    }
}
