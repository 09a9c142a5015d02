//! SIMON bus exchange runner.
//!
//! Loads an exchange description, attaches one node per entry to a simulated
//! two-wire bus and delivers the scripted messages under a wall-clock
//! watchdog.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- TOML file, defaults when absent
//!  └─ run_with_watchdog()      -- Tokio blocking pool + timeout
//!       └─ run_exchange()      -- one thread per node and message
//!  └─ print report             -- text, or JSON with --report-json
//! ```
//!
//! # Usage
//!
//! ```bash
//! simon-node --config simon.toml --init      # write a sample exchange
//! simon-node --config simon.toml             # run it
//! RUST_LOG=simon_core=debug simon-node --report-json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use simon_core::line::sim::{SimBus, SimConfig};
use simon_node::application::run_exchange::{run_exchange, ExchangeReport};
use simon_node::infrastructure::storage::config::{load_config, save_config, AppConfig};
use simon_node::infrastructure::watchdog::run_with_watchdog;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "simon-node",
    about = "Deliver scripted messages between SIMON nodes on a simulated bus",
    version
)]
struct Cli {
    /// Exchange description (TOML).
    #[arg(long, default_value = "simon.toml", env = "SIMON_CONFIG")]
    config: PathBuf,

    /// Log level when `RUST_LOG` is unset; overrides `bus.log_level`.
    #[arg(long, env = "SIMON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    report_json: bool,

    /// Write a sample exchange to `--config` and exit.
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.bus.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    if cli.init {
        save_config(&cli.config, &AppConfig::sample())
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
        info!(path = %cli.config.display(), "sample exchange written");
        return Ok(());
    }

    if config.messages.is_empty() {
        warn!(path = %cli.config.display(), "no messages configured, nothing to do");
    }

    let bus = SimBus::new(SimConfig {
        poll_cost_us: config.bus.poll_cost_us,
        ..SimConfig::default()
    });
    let budget = Duration::from_millis(config.bus.watchdog_ms);
    info!(
        nodes = config.nodes.len(),
        messages = config.messages.len(),
        half_period_us = config.bus.half_period_us,
        "starting exchange"
    );

    let job_bus = bus.clone();
    let report = run_with_watchdog(bus, budget, move || run_exchange(&config, &job_bus))
        .await
        .context("exchange did not finish")?
        .context("exchange failed")?;

    if cli.report_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode report")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ExchangeReport) {
    for delivery in &report.deliveries {
        let note = if delivery.truncated { " (truncated)" } else { "" };
        println!(
            "{} -> {}: {:?}{}",
            delivery.from, delivery.to, delivery.received, note
        );
    }
    for node in &report.nodes {
        let s = &node.stats;
        println!(
            "{} [{}]: tx {} (retx {}), acks {}/{} rejected, rx {} accepted / {} rejected / {} ignored",
            node.name,
            node.address,
            s.frames_transmitted,
            s.retransmissions,
            s.acks_rejected,
            s.acks_accepted + s.acks_rejected,
            s.frames_accepted,
            s.frames_rejected,
            s.frames_ignored,
        );
    }
    println!("virtual bus time: {} µs", report.virtual_time_us);
}
