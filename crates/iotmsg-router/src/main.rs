//! iotmsg router entry point.
//!
//! Loads the configuration, wires connections, routes and bridges, then runs
//! the poll engine until Ctrl-C.  Admin commands are read from stdin, one per
//! line, e.g. `loop STATUS` or `ab ACTIVATE`.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ AppState::from_config()     -- registry, routes, bridges, manager
//!  └─ start tasks
//!       ├─ run_engine             (blocking thread: admin commands + poll ticks)
//!       ├─ forward_admin_lines    (Tokio task: stdin ──► engine channel)
//!       └─ ctrl_c handler         (clears the running flag)
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use iotmsg_router::infrastructure::admin_input::forward_admin_lines;
use iotmsg_router::infrastructure::app_state::AppState;
use iotmsg_router::infrastructure::engine::run_engine;
use iotmsg_router::infrastructure::storage::config::{load_config, load_config_from, AppConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Poll-driven message router for line-oriented device connections.
#[derive(Debug, Parser)]
#[command(name = "iotmsg-router", version)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `iotmsg/config.toml` in the platform config directory.
    #[arg(long, env = "IOTMSG_CONFIG")]
    config: Option<PathBuf>,

    /// Pause between poll ticks in milliseconds; overrides the config file.
    #[arg(long, env = "IOTMSG_TICK_MS")]
    tick_ms: Option<u64>,

    /// Log level used when `RUST_LOG` is not set; overrides the config file.
    #[arg(long, env = "IOTMSG_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => load_config().context("loading config")?,
        };
        if let Some(tick_ms) = self.tick_ms {
            config.router.tick_ms = tick_ms;
        }
        if let Some(level) = &self.log_level {
            config.router.log_level = level.clone();
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building Tokio runtime")?;
    let result = runtime.block_on(run(config));

    // The stdin reader sits on a blocking thread that never returns; don't
    // wait for it.
    runtime.shutdown_timeout(STDIN_SHUTDOWN_GRACE);
    result
}

/// How long shutdown waits for blocking tasks such as the stdin reader.
const STDIN_SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

async fn run(config: AppConfig) -> anyhow::Result<()> {
    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.router.log_level)),
        )
        .init();

    info!("iotmsg router starting");

    let tick = config.router.tick();
    let state = AppState::from_config(config).context("wiring router from config")?;

    // Shutdown flag shared by the engine and the signal handler.
    let running = Arc::new(AtomicBool::new(true));

    // ── Engine ────────────────────────────────────────────────────────────────
    let (admin_tx, admin_rx) = mpsc::channel::<String>();
    let engine = {
        let manager = Arc::clone(&state.manager);
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || run_engine(manager, admin_rx, tick, running))
    };

    // ── Admin input ───────────────────────────────────────────────────────────
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        if let Err(e) = forward_admin_lines(stdin, admin_tx).await {
            error!("admin input failed: {e}");
        }
    });

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    });

    info!("iotmsg router ready.  Press Ctrl-C to exit.");

    let summary = engine.await.context("engine thread panicked")?;
    info!("iotmsg router stopped after {} tick(s)", summary.ticks);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
