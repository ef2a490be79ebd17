//! State reflector: paints deck state back onto controller indicators
//!
//! Runs as its own task on a fixed period, reading deck state and emitting
//! the minimal set of indicator writes. Per-deck signatures debounce the
//! traffic so an unchanged deck costs nothing; a forced refresh (requested
//! through the [`ReflectorHandle`], e.g. after a pad release repaint) skips
//! the signature check once.

use crate::config::ReflectorConfig;
use crate::deck::{DeckManager, DeckState};
use crate::transport::LampOutput;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// Indicator velocity palette (APC-style: velocity selects the LED color).
pub const VEL_OFF: u8 = 0;
pub const VEL_GREEN: u8 = 1;
pub const VEL_RED: u8 = 3;
pub const VEL_YELLOW: u8 = 5;

/// Solid play indicator: one color playing, another stopped.
pub const PLAY_NOTE: u8 = 57;
/// Blink indicator: square wave while playing, dark otherwise.
pub const STOP_NOTE: u8 = 52;
/// Fill gauge segments, bottom to top. `round(fill × 4)` of them are lit.
pub const FILL_SEGMENT_NOTES: [u8; 4] = [56, 55, 54, 53];

/// Notes whose release should trigger a forced repaint of the channel
/// (the fill stack, stop and play pads overlap the indicator notes).
pub const REFRESH_NOTES: [u8; 6] = [57, 56, 55, 54, 53, 52];

enum RefreshRequest {
    Deck(String),
    Channel(u8),
}

/// Cheap cloneable handle for requesting forced refreshes from other tasks.
#[derive(Clone)]
pub struct ReflectorHandle {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl ReflectorHandle {
    pub fn refresh_deck(&self, deck_name: &str) {
        let _ = self.tx.send(RefreshRequest::Deck(deck_name.to_string()));
    }

    pub fn refresh_channel(&self, channel: u8) {
        let _ = self.tx.send(RefreshRequest::Channel(channel));
    }
}

/// Periodic deck → indicator reflection with signature debouncing.
pub struct StateReflector {
    decks: Arc<RwLock<DeckManager>>,
    lamp: Option<Arc<dyn LampOutput>>,
    deck_to_channel: HashMap<String, u8>,
    channel_to_deck: HashMap<u8, String>,
    hz: f64,
    blink_hz: f64,
    blink_phase_per_channel: f64,
    blink_duty: f64,
    last_sigs: HashMap<String, String>,
    warned_no_lamp: bool,
    epoch: Instant,
    refresh_rx: mpsc::UnboundedReceiver<RefreshRequest>,
}

impl StateReflector {
    pub fn new(
        decks: Arc<RwLock<DeckManager>>,
        lamp: Option<Arc<dyn LampOutput>>,
        cfg: &ReflectorConfig,
        deck_to_channel: HashMap<String, u8>,
    ) -> (Self, ReflectorHandle) {
        let (tx, refresh_rx) = mpsc::unbounded_channel();
        let channel_to_deck = deck_to_channel
            .iter()
            .map(|(name, &ch)| (ch, name.clone()))
            .collect();
        let reflector = Self {
            decks,
            lamp,
            deck_to_channel,
            channel_to_deck,
            hz: cfg.hz.max(1.0),
            blink_hz: cfg.blink_hz.max(0.1),
            blink_phase_per_channel: cfg.blink_phase_per_channel_sec,
            blink_duty: cfg.blink_duty.clamp(0.0, 1.0),
            last_sigs: HashMap::new(),
            warned_no_lamp: false,
            epoch: Instant::now(),
            refresh_rx,
        };
        (reflector, ReflectorHandle { tx })
    }

    /// Run forever on the configured period. Consumes the reflector; spawn it
    /// as its own task.
    pub async fn run(mut self) {
        let period = Duration::from_secs_f64(1.0 / self.hz);
        info!(
            "StateReflector running at {:.1} Hz (blink {:.2} Hz, phase {:+.3}s/ch)",
            self.hz, self.blink_hz, self.blink_phase_per_channel
        );
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.drain_refresh_requests().await;
            self.tick().await;
        }
    }

    /// One reflection pass over every deck (debounced).
    pub async fn tick(&mut self) {
        let snapshots = self.deck_snapshots();
        for deck in &snapshots {
            self.reflect(deck, false).await;
        }
    }

    /// Forced repaint of one deck, bypassing the signature once.
    pub async fn refresh_deck(&mut self, deck_name: &str) {
        self.last_sigs.remove(deck_name);
        let snapshot = self.decks.read().deck(deck_name).cloned();
        if let Some(deck) = snapshot {
            self.reflect(&deck, true).await;
        }
    }

    async fn drain_refresh_requests(&mut self) {
        let mut names = Vec::new();
        while let Ok(request) = self.refresh_rx.try_recv() {
            match request {
                RefreshRequest::Deck(name) => names.push(name),
                RefreshRequest::Channel(ch) => {
                    if let Some(name) = self.channel_to_deck.get(&ch) {
                        names.push(name.clone());
                    }
                },
            }
        }
        for name in names {
            self.refresh_deck(&name).await;
        }
    }

    /// Stable-order snapshots so a tick's output doesn't depend on map order.
    fn deck_snapshots(&self) -> Vec<DeckState> {
        let mgr = self.decks.read();
        let mut snapshots: Vec<DeckState> = mgr.all_decks().cloned().collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Square-wave blink with a per-channel phase offset so neighboring
    /// decks ripple instead of flashing in sync.
    fn blink_on(&self, channel: u8) -> bool {
        let period = 1.0 / self.blink_hz;
        let t = (self.epoch.elapsed().as_secs_f64()
            + channel as f64 * self.blink_phase_per_channel)
            .rem_euclid(period);
        t < period * self.blink_duty
    }

    async fn reflect(&mut self, deck: &DeckState, force: bool) {
        let Some(lamp) = self.lamp.clone() else {
            if !self.warned_no_lamp {
                debug!("No lamp output configured; indicator reflection disabled");
                self.warned_no_lamp = true;
            }
            return;
        };

        // Decks without a physical channel are skipped entirely
        let Some(&channel) = self.deck_to_channel.get(&deck.name) else {
            return;
        };

        let segments = ((deck.fill.clamp(0.0, 1.0) * FILL_SEGMENT_NOTES.len() as f64).round()
            as usize)
            .min(FILL_SEGMENT_NOTES.len());

        let play_vel = if deck.playing { VEL_YELLOW } else { VEL_RED };
        let (blink_vel, blink_flag) = if deck.playing {
            let on = self.blink_on(channel);
            (if on { VEL_GREEN } else { VEL_OFF }, on)
        } else {
            (VEL_OFF, false)
        };

        let sig = format!(
            "ch{}|play:{}|stop:{}|segments:{}|blink:{}",
            channel, play_vel, blink_vel, segments, blink_flag as u8
        );
        if !force && self.last_sigs.get(&deck.name) == Some(&sig) {
            return; // unchanged
        }

        if let Err(e) = lamp.set_indicator(channel, PLAY_NOTE, play_vel).await {
            warn!("indicator write failed (deck={} note={}): {}", deck.name, PLAY_NOTE, e);
        }
        if let Err(e) = lamp.set_indicator(channel, STOP_NOTE, blink_vel).await {
            warn!("indicator write failed (deck={} note={}): {}", deck.name, STOP_NOTE, e);
        }
        for (i, &note) in FILL_SEGMENT_NOTES.iter().enumerate() {
            let vel = if i < segments { VEL_GREEN } else { VEL_OFF };
            if let Err(e) = lamp.set_indicator(channel, note, vel).await {
                warn!("indicator write failed (deck={} note={}): {}", deck.name, note, e);
            }
        }

        self.last_sigs.insert(deck.name.clone(), sig);
    }
}
