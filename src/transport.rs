//! Collaborator seams: show-control transport and lamp output
//!
//! The core never opens a network socket or a MIDI port itself. Action
//! handlers talk to the show through [`ShowTransport`] and the reflector
//! paints indicators through [`LampOutput`]; real OSC/MIDI backends live
//! outside this crate and implement these traits.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Fire-and-forget command channel to the show-control application.
///
/// One primitive only: send a numeric value to an address. No acknowledgment
/// contract is assumed; failures are caught and logged at the call site.
#[async_trait]
pub trait ShowTransport: Send + Sync {
    async fn send(&self, address: &str, value: f64) -> Result<()>;
}

/// Per-button indicator sink on a physical controller.
///
/// `channel` is the 0-based wire channel, `note` the indicator identifier,
/// `velocity` the color/intensity code the device understands. There is no
/// read path; the reflector owns all writes.
#[async_trait]
pub trait LampOutput: Send + Sync {
    async fn set_indicator(&self, channel: u8, note: u8, velocity: u8) -> Result<()>;

    /// Clear every indicator (used once at startup).
    async fn all_off(&self) -> Result<()>;
}

/// Logs every outgoing command instead of sending it.
///
/// Useful for running the router without a show application attached and for
/// validating binding/action wiring.
pub struct ConsoleTransport;

#[async_trait]
impl ShowTransport for ConsoleTransport {
    async fn send(&self, address: &str, value: f64) -> Result<()> {
        info!("→ {} {}", address, value);
        Ok(())
    }
}

/// Logs indicator writes instead of driving hardware.
pub struct ConsoleLamp;

#[async_trait]
impl LampOutput for ConsoleLamp {
    async fn set_indicator(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        debug!("💡 ch{} note {} vel {}", channel, note, velocity);
        Ok(())
    }

    async fn all_off(&self) -> Result<()> {
        debug!("💡 all indicators off");
        Ok(())
    }
}

/// Records everything sent, for assertions in tests and dry runs.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(String, f64)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, f64)> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Addresses sent so far, in order.
    pub fn addresses(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(a, _)| a.clone()).collect()
    }
}

#[async_trait]
impl ShowTransport for MemoryTransport {
    async fn send(&self, address: &str, value: f64) -> Result<()> {
        self.sent.lock().push((address.to_string(), value));
        Ok(())
    }
}

/// Records indicator writes, for reflector tests.
#[derive(Default)]
pub struct MemoryLamp {
    writes: Mutex<Vec<(u8, u8, u8)>>,
}

impl MemoryLamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(u8, u8, u8)> {
        self.writes.lock().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }
}

#[async_trait]
impl LampOutput for MemoryLamp {
    async fn set_indicator(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.writes.lock().push((channel, note, velocity));
        Ok(())
    }

    async fn all_off(&self) -> Result<()> {
        self.writes.lock().clear();
        Ok(())
    }
}
