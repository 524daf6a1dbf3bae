//! Borealis - Supervisory control engine for data-center cooling
//!
//! Ingests rack telemetry from the MQTT bus, runs the forecast/anomaly/
//! control pipeline, and emits bounded setpoint commands gated by the
//! engine mode.
//!
//! # Usage
//!
//! ```bash
//! # Run against a local broker with defaults
//! cargo run --release
//!
//! # Override the bind address and start in full-auto mode
//! cargo run --release -- --addr 0.0.0.0:8088 --mode auto_full
//! ```
//!
//! # Environment Variables
//!
//! - `MQTT_URL`, `MQTT_USER`, `MQTT_PASS`: broker connection
//! - `DB_PATH`: ledger directory
//! - `POLICY_PATH`, `DEVICES_PATH`: YAML configuration
//! - `MODE`: initial engine mode (propose | auto_low | auto_full)
//! - `DISCOVERY_SUBNET`, `DISCOVERY_TIMEOUT_S`, `DISCOVERY_INTERVAL_HOURS`
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use borealis::api::{create_app, ApiContext};
use borealis::bus::{BusMessage, MqttBus};
use borealis::config::{DeviceRegistry, Policy, Settings};
use borealis::engine::{DecisionEngine, EngineConfig};
use borealis::metrics::Metrics;
use borealis::storage::Ledger;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "borealis")]
#[command(about = "Borealis data-center cooling supervisory controller")]
#[command(version)]
struct CliArgs {
    /// Override the HTTP server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the initial engine mode (propose | auto_low | auto_full)
    #[arg(long)]
    mode: Option<String>,

    /// Wipe the ledger directory on startup.
    /// WARNING: destructive; cannot be undone.
    #[arg(long)]
    reset_db: bool,
}

/// Task identification for supervisor logging
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    BusDispatcher,
    DiscoveryScheduler,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::BusDispatcher => write!(f, "BusDispatcher"),
            TaskName::DiscoveryScheduler => write!(f, "DiscoveryScheduler"),
        }
    }
}

/// Remove the ledger directory before any storage initialization.
fn reset_ledger_directory(path: &str) -> Result<()> {
    let data_path = std::path::Path::new(path);
    if !data_path.exists() {
        info!("Ledger directory does not exist, nothing to reset");
        return Ok(());
    }
    warn!("RESET_DB requested — removing {}", data_path.display());
    std::fs::remove_dir_all(data_path).context("Failed to remove ledger directory")?;
    warn!("Ledger removed; a fresh store will be created on startup");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut settings = Settings::from_env();
    if let Some(addr) = args.addr {
        settings.bind_addr = addr;
    }
    if let Some(mode) = args.mode {
        settings.mode = mode;
    }
    let settings = Arc::new(settings);

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Borealis — Cooling Supervisory Controller");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    if args.reset_db || std::env::var("RESET_DB").is_ok_and(|v| v.eq_ignore_ascii_case("true")) {
        reset_ledger_directory(&settings.db_path)?;
    }

    // Policy & storage
    let policy = Policy::load(&settings.policy_path)
        .with_context(|| format!("loading policy from {}", settings.policy_path))?;
    info!(site = %policy.site, "✓ Policy loaded");

    let ledger = Ledger::open(&settings.db_path)
        .with_context(|| format!("opening ledger at {}", settings.db_path))?;
    info!("✓ Ledger opened");

    let registry = DeviceRegistry::open(&settings.devices_path);
    info!(
        devices = registry.current().devices.len(),
        "✓ Device registry loaded"
    );

    let metrics = Arc::new(Metrics::new());

    // Bus connection
    info!(url = %settings.mqtt_url, "Connecting to bus...");
    let (bus, mut event_loop) = MqttBus::connect(&settings)
        .await
        .context("connecting to MQTT broker")?;
    info!("✓ Bus client ready");

    // Decision engine
    let config = EngineConfig::from_settings(&settings, policy);
    let engine = DecisionEngine::new(
        config,
        ledger.clone(),
        Arc::new(bus),
        registry.clone(),
        metrics.clone(),
    );
    let engine = Arc::new(RwLock::new(engine));
    info!("✓ Decision engine initialized");

    // HTTP server
    let context = ApiContext::new(
        engine.clone(),
        ledger,
        registry,
        metrics,
        settings.clone(),
    );
    let app = create_app(context);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind_addr))?;
    info!("✓ HTTP server listening on {}", settings.bind_addr);
    info!("");

    // Graceful shutdown
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    // JoinSet Supervisor Pattern
    info!("Supervisor: initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: HTTP Server
    let http_cancel = cancel_token.clone();
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;
        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });

    // Task 2: Bus Dispatcher
    let dispatcher_cancel = cancel_token.clone();
    let dispatcher_engine = engine.clone();
    task_set.spawn(async move {
        info!("[BusDispatcher] Task starting");
        let mut messages_handled = 0u64;
        loop {
            tokio::select! {
                _ = dispatcher_cancel.cancelled() => {
                    info!("[BusDispatcher] Received shutdown signal after {} messages", messages_handled);
                    return Ok(TaskName::BusDispatcher);
                }
                event = event_loop.poll() => {
                    match event {
                        Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                            match BusMessage::parse(&publish.topic, &publish.payload) {
                                Ok(Some(msg)) => {
                                    messages_handled += 1;
                                    let mut engine = dispatcher_engine.write().await;
                                    engine.handle_message(msg).await;
                                }
                                Ok(None) => {
                                    // Not a topic the engine consumes.
                                }
                                Err(e) => {
                                    warn!(topic = %publish.topic, error = %e, "[BusDispatcher] Dropping malformed payload");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("[BusDispatcher] Bus connection error: {}. Retrying...", e);
                            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    });

    // Task 3: Periodic Discovery Scheduler
    let scheduler_cancel = cancel_token.clone();
    let scheduler_engine = engine.clone();
    let scheduler_settings = settings.clone();
    task_set.spawn(async move {
        let hours = scheduler_settings.discovery_interval_hours.max(1);
        let period = tokio::time::Duration::from_secs(hours * 3600);
        info!("[DiscoveryScheduler] Task starting with interval {:?}", period);

        let mut interval = tokio::time::interval(period);
        // The immediate first tick would scan at boot; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = scheduler_cancel.cancelled() => {
                    info!("[DiscoveryScheduler] Received shutdown signal");
                    return Ok(TaskName::DiscoveryScheduler);
                }
                _ = interval.tick() => {
                    let subnet = scheduler_settings.discovery_subnet.clone();
                    info!(subnet = %subnet, "[DiscoveryScheduler] Starting periodic scan");
                    let mut engine = scheduler_engine.write().await;
                    engine.start_discovery(&subnet, "scheduler").await;
                }
            }
        }
    });

    // Supervisor loop
    info!("Supervisor: all tasks spawned, monitoring...");
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    info!("");
    info!("✓ Borealis shutdown complete");
    Ok(())
}
