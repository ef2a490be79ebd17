//! Deck Router - Rust implementation
//!
//! Routes APC40-style pads and joystick axes onto Resolume-style deck
//! control, with LED feedback painted back by the state reflector.

use anyhow::Result;
use clap::Parser;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deck_router::actions::ActionRegistry;
use deck_router::bindings::expand_templates;
use deck_router::config::AppConfig;
use deck_router::deck::DeckManager;
use deck_router::event::{ControlRef, DeviceEvent, MidiKind};
use deck_router::mapper::InputMapper;
use deck_router::reflector::{ReflectorHandle, StateReflector, REFRESH_NOTES};
use deck_router::transport::{ConsoleLamp, ConsoleTransport, LampOutput, ShowTransport};

/// Deck Router - control show decks from MIDI pads and joysticks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Print the expanded binding table and exit
    #[arg(long)]
    expand_bindings: bool,

    /// Read simulated events from stdin ("<device> <control> <value>",
    /// e.g. "apc40 note:48:1 127" or "joystick axis_2 0.5")
    #[arg(long)]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("Starting Deck Router...");
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config)?;

    if args.expand_bindings {
        for binding in expand_templates(&config) {
            println!("{}", serde_json::to_string(&binding)?);
        }
        return Ok(());
    }

    run_app(config, args.simulate).await?;

    info!("Deck Router shutdown complete");
    Ok(())
}

async fn run_app(config: AppConfig, simulate: bool) -> Result<()> {
    // Deck state shared between the dispatch task and the reflector
    let decks = Arc::new(RwLock::new(DeckManager::new(config.group_to_deck.clone())));
    info!("Deck manager initialized ({} decks)", decks.read().deck_names().len());

    // Console collaborators; real OSC/MIDI backends plug in here
    let transport: Arc<dyn ShowTransport> = Arc::new(ConsoleTransport);
    let lamp: Arc<dyn LampOutput> = Arc::new(ConsoleLamp);

    let registry = Arc::new(ActionRegistry::new(
        decks.clone(),
        transport,
        config.fills.clone(),
    ));

    let bindings = expand_templates(&config);
    info!("Expanded {} bindings", bindings.len());
    let mapper = InputMapper::new(registry, bindings);

    // Clear stale indicators before the reflector takes over
    if let Err(e) = lamp.all_off().await {
        warn!("Indicator reset at startup failed: {}", e);
    }

    let (reflector, reflector_handle) = StateReflector::new(
        decks.clone(),
        Some(lamp),
        &config.reflector,
        config.deck_to_channel(),
    );
    tokio::spawn(reflector.run());

    // Event queue: physical drivers (out of scope here) push onto `event_tx`
    let (event_tx, event_rx) = mpsc::unbounded_channel::<DeviceEvent>();
    tokio::spawn(pump_events(mapper, event_rx, reflector_handle));

    info!("✅ Deck Router running");

    if simulate {
        read_stdin_events(event_tx).await;
    } else {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Shutdown signal received");
    }

    Ok(())
}

/// The single event-consumer task: drains the queue one event at a time.
///
/// After a release on one of the pads that share notes with the indicator
/// family, the reflector repaints that channel so the pad press didn't leave
/// a stale LED behind.
async fn pump_events(
    mut mapper: InputMapper,
    mut event_rx: mpsc::UnboundedReceiver<DeviceEvent>,
    reflector: ReflectorHandle,
) {
    while let Some(event) = event_rx.recv().await {
        mapper.handle(&event).await;

        if let ControlRef::Midi {
            kind: MidiKind::Note,
            number,
            channel: Some(ch),
        } = event.control
        {
            if event.value == 0.0 && REFRESH_NOTES.contains(&number) {
                reflector.refresh_channel(ch);
            }
        }
    }
}

/// Feed events typed on stdin into the queue (testing without hardware).
async fn read_stdin_events(event_tx: mpsc::UnboundedSender<DeviceEvent>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_event_line(line) {
            Some(event) => {
                if event_tx.send(event).is_err() {
                    break;
                }
            },
            None => warn!("Unparseable event line: {}", line),
        }
    }
    info!("stdin closed, stopping");
}

/// Parse "<device> <control> <value>"; control is "note:N:CH", "cc:N:CH" or
/// a plain name like "axis_2".
fn parse_event_line(line: &str) -> Option<DeviceEvent> {
    let mut parts = line.split_whitespace();
    let device = parts.next()?;
    let control_spec = parts.next()?;
    let value: f64 = parts.next()?.parse().ok()?;

    let control = if let Some(rest) = control_spec.strip_prefix("note:") {
        parse_midi_control(MidiKind::Note, rest)?
    } else if let Some(rest) = control_spec.strip_prefix("cc:") {
        parse_midi_control(MidiKind::Cc, rest)?
    } else {
        ControlRef::Named(control_spec.to_string())
    };

    Some(DeviceEvent::new(device, control, value))
}

fn parse_midi_control(kind: MidiKind, spec: &str) -> Option<ControlRef> {
    let mut parts = spec.split(':');
    let number: u8 = parts.next()?.parse().ok()?;
    let channel = match parts.next() {
        Some(ch) => Some(ch.parse().ok()?),
        None => None,
    };
    Some(ControlRef::Midi {
        kind,
        number,
        channel,
    })
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_line_midi() {
        let ev = parse_event_line("apc40 note:48:1 127").unwrap();
        assert_eq!(ev.device, "apc40");
        assert_eq!(ev.control, ControlRef::midi(MidiKind::Note, 48, 1));
        assert_eq!(ev.value, 127.0);

        let ev = parse_event_line("apc40 cc:14:3 64").unwrap();
        assert_eq!(ev.control, ControlRef::midi(MidiKind::Cc, 14, 3));
    }

    #[test]
    fn test_parse_event_line_named_and_channel_free() {
        let ev = parse_event_line("joystick axis_2 -0.5").unwrap();
        assert_eq!(ev.control, ControlRef::Named("axis_2".to_string()));
        assert_eq!(ev.value, -0.5);

        let ev = parse_event_line("apc40 note:81 1").unwrap();
        assert_eq!(
            ev.control,
            ControlRef::Midi {
                kind: MidiKind::Note,
                number: 81,
                channel: None
            }
        );
    }

    #[test]
    fn test_parse_event_line_rejects_garbage() {
        assert!(parse_event_line("").is_none());
        assert!(parse_event_line("apc40").is_none());
        assert!(parse_event_line("apc40 note:xx:1 127").is_none());
        assert!(parse_event_line("apc40 note:48:1 notanumber").is_none());
    }
}
