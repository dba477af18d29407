//! Access Point Control Daemon (apctld)
//!
//! Brings up the access point described in the configuration file and keeps
//! it running until it is stopped by a signal, shut down for inactivity, or
//! fails.
//!
//! # Usage
//!
//! ```bash
//! # Start the AP (requires root/sudo)
//! sudo apctld --config /etc/crrouter/apctl.toml
//!
//! # Validate a configuration without touching the hardware
//! apctld --config apctl.toml --check-config
//!
//! # Dump controller status as JSON
//! sudo kill -HUP $(pidof apctld)
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use libapctl::{
    ApController, ApCounters, ApEvent, ApHandle, ApState, ApctlConfig, ChannelListener,
    LinkMonitor, SystemDriver,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Access Point Control Daemon
#[derive(Parser, Debug)]
#[command(name = "apctld")]
#[command(author = "CRRouter Team")]
#[command(version)]
#[command(
    about = "Access Point Control Daemon - runs a hostapd access point with idle shutdown",
    long_about = None
)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/crrouter/apctl.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,

    /// Keep the AP up even without clients
    #[arg(long)]
    no_timeout: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let mut config = ApctlConfig::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if args.no_timeout {
        config.controller.timeout.enabled = false;
    }

    if args.check_config {
        println!("Configuration OK: {}", args.config.display());
        println!("{}", serde_json::to_string_pretty(&config.ap)?);
        return Ok(());
    }

    info!("Starting Access Point Control Daemon (apctld)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let uid = unsafe { libc::getuid() };
    if uid != 0 {
        warn!("Not running as root - interface creation will likely fail");
    }

    let driver = Arc::new(SystemDriver::new(config.driver.clone()));

    let monitor = LinkMonitor::new();
    let link_watch = driver.watch_links(monitor.subscribe());
    if let Err(e) = monitor.start().await {
        warn!("Failed to start link monitor: {}", e);
        warn!("Continuing without link event monitoring");
    }

    let counters = Arc::new(ApCounters::new());
    let (listener, events) = ChannelListener::new();
    let (controller, handle) = ApController::new(
        driver.clone(),
        Arc::new(listener),
        counters.clone(),
        &config.controller,
    );
    let task = controller.spawn();

    handle.start(config.ap.clone())?;
    info!("AP '{}' requested on band {}", config.ap.ssid, config.ap.band);

    let outcome = run(&handle, events).await;

    if let Err(e) = handle.shutdown() {
        warn!("Controller already gone: {}", e);
    }
    if let Err(e) = task.await {
        error!("Controller task failed: {}", e);
    }

    monitor.stop().await;
    link_watch.abort();

    let stats = counters.snapshot();
    info!("Counters: {}", serde_json::to_string(&stats)?);
    info!("Access Point Control Daemon stopped");

    outcome
}

/// Follow controller events and signals until the AP is gone
async fn run(handle: &ApHandle, mut events: mpsc::UnboundedReceiver<ApEvent>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

    let mut stopping = false;
    let mut failed = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("Controller exited unexpectedly");
                };
                match event {
                    ApEvent::StateChanged { new_state, previous_state, reason } => {
                        info!("AP state {} -> {}", previous_state, new_state);
                        match new_state {
                            ApState::Failed => {
                                let reason = reason
                                    .map(|r| r.to_string())
                                    .unwrap_or_else(|| "generic".to_string());
                                error!("AP failed: {}", reason);
                                failed = true;
                            }
                            ApState::Disabled => break,
                            _ => {}
                        }
                    }
                    ApEvent::ClientsChanged { clients } => {
                        info!("{} client(s) connected", clients.len());
                    }
                    ApEvent::InfoChanged { info } => {
                        info!("Operating at {} MHz, {:?}", info.frequency, info.bandwidth);
                    }
                    // The controller stays idle after a failed start
                    ApEvent::StartFailure => {
                        failed = true;
                        break;
                    }
                    _ => {}
                }
            }
            _ = sigterm.recv(), if !stopping => {
                info!("Received SIGTERM, stopping AP");
                stopping = true;
                handle.stop()?;
            }
            _ = sigint.recv(), if !stopping => {
                info!("Received SIGINT (Ctrl+C), stopping AP");
                stopping = true;
                handle.stop()?;
            }
            _ = sighup.recv() => {
                match handle.status().await {
                    Ok(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                    Err(e) => warn!("Status unavailable: {}", e),
                }
            }
        }
    }

    if failed && !stopping {
        bail!("Access point failed");
    }
    Ok(())
}

/// Initialize logging based on command-line arguments
fn init_logging(args: &Args) {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!("apctld={},libapctl={}", log_level, log_level))
        });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}
