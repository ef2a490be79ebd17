//! Discrete fill-layer selection
//!
//! When a deck's fill lands on one of the canonical steps (0/25/50/75/100%),
//! a matching share of its "fills"-typed layers is activated at random and
//! the rest are stopped. Activation connects a random clip column from the
//! layer's known clip list, falling back to a configured column range when
//! the topology carries no clips for the layer.

use super::{ActionRegistry, FILL_STEP_EPSILON};
use crate::deck::{LayerInfo, LayerType};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl ActionRegistry {
    /// Apply the layer-selection side effect for a canonical fill step.
    ///
    /// At 0% every fills layer is stopped; at 100% every one is activated;
    /// in between `round(ratio × count)` layers (at least one) are chosen at
    /// random without replacement.
    pub(super) async fn apply_fill_step(&self, deck_name: &str, ratio: f64) {
        let layers: Vec<LayerInfo> = {
            let mgr = self.decks.read();
            mgr.layers_for_deck_by_type(deck_name, LayerType::Fills)
                .into_iter()
                .cloned()
                .collect()
        };
        if layers.is_empty() {
            debug!("[{}] no fills layers known, skipping selection", deck_name);
            return;
        }

        let total = layers.len();
        let active_count = if ratio < FILL_STEP_EPSILON {
            0
        } else if (ratio - 1.0).abs() < FILL_STEP_EPSILON {
            total
        } else {
            (((ratio * total as f64).round() as usize).max(1)).min(total)
        };

        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(&mut rand::thread_rng());
        let selected: HashSet<usize> = order.into_iter().take(active_count).collect();

        info!(
            "[{}] fill {:.0}% -> {}/{} fills layers active",
            deck_name,
            ratio * 100.0,
            active_count,
            total
        );

        for (i, layer) in layers.iter().enumerate() {
            if selected.contains(&i) {
                self.activate_layer(layer).await;
            } else {
                self.stop_layer(layer).await;
            }
        }
    }

    /// Connect a random eligible clip on a layer.
    async fn activate_layer(&self, layer: &LayerInfo) {
        let clip = match layer.clips.choose(&mut rand::thread_rng()) {
            Some(&clip) => clip,
            None => {
                let [lo, hi] = self.fills.fallback_clip_columns;
                rand::thread_rng().gen_range(lo..=hi.max(lo))
            },
        };
        self.send(
            &format!("/composition/layers/{}/clips/{}/connect", layer.index, clip),
            1.0,
        )
        .await;
    }

    /// Connect a layer's stop clip (or the configured fallback column).
    pub(super) async fn stop_layer(&self, layer: &LayerInfo) {
        let column = match layer.stop_clip {
            Some(column) => column,
            None => {
                warn!(
                    "Layer {} '{}' has no known stop clip, using column {}",
                    layer.index, layer.name, self.fills.fallback_stop_column
                );
                self.fills.fallback_stop_column
            },
        };
        self.send(
            &format!(
                "/composition/layers/{}/clips/{}/connect",
                layer.index, column
            ),
            1.0,
        )
        .await;
    }
}
