//! Dispatch engine: normalized events in, action invocations out
//!
//! Holds the flat binding list and the per-(device, control) last-value
//! cache. Every matching binding fires for every event (no first-match
//! short-circuit); button-like controls go through edge detection and
//! continuous controls are normalized to [0,1] before the handler runs.

use crate::actions::ActionRegistry;
use crate::bindings::{Binding, Edge};
use crate::event::{ControlRef, DeviceEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalize a raw control value into [0,1].
///
/// Joystick axes map [-1,1] → [0,1]; CC values map [0,127] → [0,1]. An
/// optional `[lo, hi]` window then clamps and linearly remaps the normalized
/// value over that window (a zero-width window is treated as width 1).
pub fn normalize_value(control: &ControlRef, raw: f64, value_scale: Option<[f64; 2]>) -> f64 {
    let mut v = raw;

    if let ControlRef::Named(name) = control {
        if name.starts_with("axis_") {
            v = (v + 1.0) * 0.5;
        }
    }
    if let ControlRef::Midi {
        kind: crate::event::MidiKind::Cc,
        ..
    } = control
    {
        v /= 127.0;
    }

    if let Some([lo, hi]) = value_scale {
        v = v.clamp(lo.min(hi), hi.max(lo));
        let range = if (hi - lo).abs() > f64::EPSILON {
            hi - lo
        } else {
            1.0
        };
        v = (v - lo) / range;
    }

    v.clamp(0.0, 1.0)
}

/// Maps [`DeviceEvent`]s onto action invocations through the binding list.
///
/// Owns the last-value cache used for edge detection; the cache is updated
/// on every event, matched or not, so edge state is tracked per control
/// rather than per binding.
pub struct InputMapper {
    registry: Arc<ActionRegistry>,
    bindings: Vec<Binding>,
    last_values: HashMap<(String, ControlRef), f64>,
}

impl InputMapper {
    /// Build a mapper over an expanded binding list.
    ///
    /// Bindings naming unknown actions are kept (they warn again and no-op at
    /// dispatch time) but flagged once here so config mistakes surface early.
    pub fn new(registry: Arc<ActionRegistry>, bindings: Vec<Binding>) -> Self {
        for binding in &bindings {
            if !ActionRegistry::is_known(&binding.action) {
                warn!(
                    "Binding for {}/{} names unknown action '{}'",
                    binding.device, binding.control, binding.action
                );
            }
        }
        Self {
            registry,
            bindings,
            last_values: HashMap::new(),
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Consume one event and fire every matching, edge-satisfying binding in
    /// list order.
    pub async fn handle(&mut self, event: &DeviceEvent) {
        let key = (event.device.clone(), event.control.clone());
        let last = self.last_values.get(&key).copied().unwrap_or(0.0);
        // Unconditional: edge state must track even unbound controls.
        self.last_values.insert(key, event.value);

        for binding in &self.bindings {
            if binding.device != event.device {
                continue;
            }
            if !binding.control.matches(&event.control) {
                continue;
            }

            // Edge gating applies to every button-like control, fixed-value
            // bindings included. Continuous controls fire on each change.
            let fired = if event.control.is_buttonish() {
                let rising = last == 0.0 && event.value != 0.0;
                let falling = last != 0.0 && event.value == 0.0;
                match binding.edge {
                    Edge::Press => rising,
                    Edge::Release => falling,
                    Edge::Both => rising || falling,
                }
            } else {
                true
            };
            if !fired {
                continue;
            }

            let value_bearing = event.control.is_continuous()
                || ActionRegistry::wants_value(&binding.action)
                || binding.pass_value;

            let value = if let Some(fixed) = binding.fixed_value {
                Some(fixed)
            } else if value_bearing {
                Some(normalize_value(
                    &event.control,
                    event.value,
                    binding.value_scale,
                ))
            } else {
                None
            };

            debug!(
                "fire {} deck={:?} value={:?} ({}:{})",
                binding.action, binding.deck, value, event.device, event.control
            );

            if let Err(e) = self
                .registry
                .invoke(&binding.action, binding.deck.as_deref(), value)
                .await
            {
                warn!(
                    "Handler '{}' failed for {}/{}: {}",
                    binding.action, event.device, event.control, e
                );
            }
        }
    }
}
