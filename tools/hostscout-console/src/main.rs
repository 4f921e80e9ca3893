// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hostscout console
//!
//! Discovers management agents on the local network and at configured
//! wide-area addresses, and maintains the persistent host registry.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default discovery port (7430)
//! hostscout-console
//!
//! # Custom port and settings database
//! hostscout-console --port 7440 --db /var/lib/hostscout/hosts.db
//!
//! # Passive mode: no scheduled broadcasts, answers still processed
//! hostscout-console --no-broadcast
//!
//! # One-shot scan of an address block before settling into the schedule
//! hostscout-console --scan 10.0.0.1 --scan-count 64
//! ```

use anyhow::Context;
use clap::Parser;
use hostscout::{Console, ConsoleConfig, RegistryEvent, SqliteStore};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// hostscout console - discover and supervise management-agent hosts
#[derive(Parser, Debug)]
#[command(name = "hostscout-console")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Well-known discovery port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long)]
    bind: Option<String>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Settings database path
    #[arg(long)]
    db: Option<String>,

    /// Disable the scheduled broadcast query (answers are still processed)
    #[arg(long, default_value = "false")]
    no_broadcast: bool,

    /// Shade a host stale after this many seconds without an answer
    #[arg(long)]
    stale_after: Option<u64>,

    /// Scan a block of addresses starting here, once, at startup
    #[arg(long)]
    scan: Option<Ipv4Addr>,

    /// Number of consecutive addresses to scan (max 256)
    #[arg(long, default_value = "1")]
    scan_count: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or assemble config; explicit flags win over the file.
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading config from {:?}", config_path);
        ConsoleConfig::from_file(config_path)?
    } else {
        ConsoleConfig::default()
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = &args.bind {
        config.bind_address = bind.parse().context("invalid bind address")?;
    }
    if let Some(db) = args.db {
        config.store_path = db;
    }
    if let Some(stale_after) = args.stale_after {
        config.stale_after_secs = stale_after;
    }
    if args.no_broadcast {
        config.auto_broadcast = false;
    }
    config.validate()?;

    info!("+----------------------------------------------------+");
    info!(
        "|       hostscout console v{}                      |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Port:        {:35} |", config.port);
    info!(
        "|  Auto-search: {:35} |",
        if config.auto_broadcast { "enabled" } else { "disabled" }
    );
    info!("|  Stale after: {:35} |", format!("{}s", config.stale_after_secs));
    info!("|  Database:    {:35} |", config.store_path);
    info!("+----------------------------------------------------+");

    let store = SqliteStore::new(&config.store_path)?;
    let (console, handle, mut events) = Console::bind(config, store).await?;
    let console_task = tokio::spawn(console.run());

    // UI-layer stand-in: log the row-level notifications.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RegistryEvent::RowInserted { row } => info!("host discovered (row {})", row),
                RegistryEvent::RowChanged { row, first, last } => {
                    debug!("row {} changed ({:?}..{:?})", row, first, last);
                }
                RegistryEvent::RowRemoved { row } => info!("host erased (row {})", row),
                RegistryEvent::Reset => info!("registry reset"),
            }
        }
    });

    // Bring back the saved registry before the schedules fill it in live.
    handle.load().await;

    if let Some(start) = args.scan {
        info!("scanning {} addresses from {}", args.scan_count.clamp(1, 256), start);
        handle.query_range(start, args.scan_count).await;
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received, saving registry...");
    if !handle.save().await {
        tracing::warn!("registry save failed");
    }
    handle.shutdown();
    console_task.await.ok();

    info!("Console stopped");
    Ok(())
}
