//! Deck Router - binding/dispatch core for performance controllers
//!
//! Turns mixed physical inputs (MIDI pads/knobs, joystick axes/buttons)
//! into uniform actions on a small set of named decks, and keeps the
//! controllers' LEDs in sync with the resulting show state.
//!
//! Pipeline: physical driver → [`event::DeviceEvent`] → [`mapper::InputMapper`]
//! → [`actions::ActionRegistry`] → [`deck::DeckManager`] →
//! [`reflector::StateReflector`] → lamp output. The binding table is built
//! once at startup by [`bindings::expand_templates`].

pub mod actions;
pub mod bindings;
pub mod config;
pub mod deck;
pub mod event;
pub mod mapper;
pub mod reflector;
pub mod transport;

pub use actions::ActionRegistry;
pub use bindings::{expand_templates, Binding, Edge};
pub use config::AppConfig;
pub use deck::{DeckManager, DeckState, GroupInfo, LayerInfo, LayerType};
pub use event::{ControlRef, DeviceEvent, MidiKind};
pub use mapper::InputMapper;
pub use reflector::{ReflectorHandle, StateReflector};
pub use transport::{LampOutput, ShowTransport};
