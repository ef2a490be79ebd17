//! Normalized input event model
//!
//! Every physical driver (MIDI pad grid, joystick poller, ...) reduces its
//! native messages to [`DeviceEvent`]s before they enter the dispatch queue.
//! The mapper never sees raw wire bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// MIDI message family carried by a tuple-style control reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MidiKind {
    Note,
    Cc,
}

/// Identifier of a physical control, usable both as an event address and as a
/// binding pattern.
///
/// Two shapes exist:
/// - `Named("axis_2")` — plain names from non-MIDI devices (`axis_N`,
///   `button_N`, `hat_N_x`, `hat_N_y`)
/// - `Midi { kind, number, channel }` — note/cc tuples; a pattern may omit
///   the channel to match any channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlRef {
    Named(String),
    Midi {
        kind: MidiKind,
        number: u8,
        channel: Option<u8>,
    },
}

impl ControlRef {
    /// Convenience constructor for a fully-addressed MIDI control.
    pub fn midi(kind: MidiKind, number: u8, channel: u8) -> Self {
        ControlRef::Midi {
            kind,
            number,
            channel: Some(channel),
        }
    }

    /// Pattern match: `self` is the binding pattern, `control` the event side.
    ///
    /// Strings compare exactly. MIDI tuples must share kind and number; when
    /// the pattern carries a channel the event must carry the same one, when
    /// the pattern omits it any (or no) event channel matches.
    pub fn matches(&self, control: &ControlRef) -> bool {
        match (self, control) {
            (ControlRef::Named(pat), ControlRef::Named(name)) => pat == name,
            (
                ControlRef::Midi {
                    kind: pk,
                    number: pn,
                    channel: pc,
                },
                ControlRef::Midi {
                    kind: ck,
                    number: cn,
                    channel: cc,
                },
            ) => {
                if pk != ck || pn != cn {
                    return false;
                }
                match pc {
                    Some(want) => *cc == Some(*want),
                    None => true,
                }
            },
            _ => false,
        }
    }

    /// Digital controls that go through edge detection: note tuples, joystick
    /// buttons and hat axes.
    pub fn is_buttonish(&self) -> bool {
        match self {
            ControlRef::Named(name) => name.starts_with("button_") || name.starts_with("hat_"),
            ControlRef::Midi { kind, .. } => *kind == MidiKind::Note,
        }
    }

    /// Continuous sources that fire on every change and carry a value:
    /// joystick axes and CC tuples.
    pub fn is_continuous(&self) -> bool {
        match self {
            ControlRef::Named(name) => name.starts_with("axis_"),
            ControlRef::Midi { kind, .. } => *kind == MidiKind::Cc,
        }
    }
}

impl fmt::Display for ControlRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlRef::Named(name) => write!(f, "{}", name),
            ControlRef::Midi {
                kind,
                number,
                channel: Some(ch),
            } => write!(f, "({:?},{},ch{})", kind, number, ch),
            ControlRef::Midi {
                kind,
                number,
                channel: None,
            } => write!(f, "({:?},{})", kind, number),
        }
    }
}

/// Wire representation: either a bare string or a `[kind, number, channel?]`
/// sequence, mirroring how bindings are written in config.
#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum ControlRefRepr {
    Full((MidiKind, u8, u8)),
    Short((MidiKind, u8)),
    Named(String),
}

impl<'de> Deserialize<'de> for ControlRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match ControlRefRepr::deserialize(deserializer)? {
            ControlRefRepr::Named(name) => ControlRef::Named(name),
            ControlRefRepr::Full((kind, number, channel)) => ControlRef::Midi {
                kind,
                number,
                channel: Some(channel),
            },
            ControlRefRepr::Short((kind, number)) => ControlRef::Midi {
                kind,
                number,
                channel: None,
            },
        })
    }
}

impl Serialize for ControlRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let repr = match self {
            ControlRef::Named(name) => ControlRefRepr::Named(name.clone()),
            ControlRef::Midi {
                kind,
                number,
                channel: Some(ch),
            } => ControlRefRepr::Full((*kind, *number, *ch)),
            ControlRef::Midi {
                kind,
                number,
                channel: None,
            } => ControlRefRepr::Short((*kind, *number)),
        };
        repr.serialize(serializer)
    }
}

/// One normalized input transition.
///
/// Produced once per physical state change and consumed by the dispatch
/// engine; never mutated or persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    /// Origin device key (e.g. "apc40", "joystick").
    pub device: String,
    /// Which control moved.
    pub control: ControlRef,
    /// Raw value: velocity, cc value, axis position, button state.
    /// Drivers report a note-off as value 0, so a zero-velocity note-on and
    /// a note-off are the same release signal here.
    pub value: f64,
}

impl DeviceEvent {
    pub fn new(device: impl Into<String>, control: ControlRef, value: f64) -> Self {
        Self {
            device: device.into(),
            control,
            value,
        }
    }
}
