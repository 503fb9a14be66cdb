//! Beamcount — Main Entry Point
//!
//! Wires the adapters around the pure counting core and runs the broker
//! supervisor on the main thread until Ctrl-C / SIGTERM.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  MqttSession     LogEventSink   Diagnostics   MonotonicClock   │
//! │  (BrokerPort)    (EventSink)    (EventSink)   (Clock)          │
//! │  JournalCountStore / MemoryCountStore  [QueuedCountSink]       │
//! │  (CountSink)                                                   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            CounterService (pure logic)                 │    │
//! │  │  admit · retained guard · debounce · edge detection    │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  ConnectionSupervisor (session, backoff, heartbeat, status)    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use beamcount::adapters::count_store::{JournalCountStore, MemoryCountStore};
use beamcount::adapters::log_sink::LogEventSink;
use beamcount::adapters::mqtt::MqttSession;
use beamcount::adapters::queued_sink::QueuedCountSink;
use beamcount::adapters::time::MonotonicClock;
use beamcount::app::ports::CountSink;
use beamcount::config::ListenerConfig;
use beamcount::diagnostics::{self, Diagnostics};
use beamcount::supervisor::{ConnectionSupervisor, ShutdownHandle};

/// Counts passes through an MQTT-reporting light barrier.
#[derive(Parser, Debug)]
#[command(name = "beamcount", version, about)]
struct Cli {
    /// JSON configuration file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `beamcount=debug`
    #[arg(long)]
    log_level: Option<String>,

    /// Append counts to this JSON-lines journal
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Persist counts from a background writer thread
    #[arg(long)]
    queued: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── 1. Configuration ──────────────────────────────────────
    let mut config = ListenerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(path) = cli.journal {
        config.journal_path = Some(path);
    }
    if cli.queued {
        config.queued_persistence = true;
    }

    // ── 2. Logging ────────────────────────────────────────────
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    diagnostics::install_panic_handler();

    info!("beamcount v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Listening on {} at {} (debounce {}ms)",
        config.state_topic,
        config.broker_address(),
        config.debounce_ms
    );

    // ── 3. Ports ──────────────────────────────────────────────
    let diag = Diagnostics::new();
    let events = (diag.clone(), LogEventSink::new());

    let store: Box<dyn CountSink + Send> = match &config.journal_path {
        Some(path) => Box::new(
            JournalCountStore::open(path).with_context(|| format!("failed to open journal {}", path.display()))?,
        ),
        None => {
            warn!("No journal configured, counts are kept in memory only");
            Box::new(MemoryCountStore::new())
        }
    };
    let sink: Box<dyn CountSink> = if config.queued_persistence {
        Box::new(QueuedCountSink::spawn(store, events.clone()).context("failed to start count writer")?)
    } else {
        store
    };

    let clock = MonotonicClock::new();
    let broker = MqttSession::new(&config, clock).context("failed to start MQTT session")?;
    let shutdown = ShutdownHandle::new();

    let stopper = shutdown.clone();
    ctrlc::set_handler(move || stopper.trigger()).context("failed to install signal handler")?;

    // ── 4. Run ────────────────────────────────────────────────
    let mut supervisor = ConnectionSupervisor::new(&config, broker, sink, events, clock, shutdown);
    let status = supervisor.status_handle();

    supervisor.connect().context("initial broker connection failed")?;
    supervisor.run();

    // ── 5. Summary ────────────────────────────────────────────
    let metrics = diag.metrics();
    info!("Final status: {}", serde_json::to_string(&status.snapshot())?);
    info!("Diagnostics: {}", serde_json::to_string(&metrics)?);
    if metrics.counts_lost > 0 {
        warn!("{} count(s) were detected but not persisted", metrics.counts_lost);
        for lost in diag.lost_counts() {
            warn!("  lost: sensor={} at {}ms ({})", lost.sensor_id, lost.detected_at_ms, lost.reason);
        }
    }
    info!("Uptime: {}s", clock.uptime_secs());
    Ok(())
}
