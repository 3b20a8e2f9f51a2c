// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use anyhow::Context;
use std::env;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use the_workcell::config::{load_and_validate_config, RuntimeBuilder};

const USAGE: &str = "Usage: the-workcell <config.yaml|config.toml> [--bridge]

Starts every configured device, polls the primary device and logs workcell
status events until Ctrl-C.

  --bridge   also answer bridge messages, one JSON object per line on stdin,
             e.g. {\"id\":1,\"type\":\"GET\",\"endpoint\":\"/devices/robot1/status\"}
             Replies are written as they complete, so they may come back
             out of order; each echoes its message's id.";

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }
    let config_path = &args[1];
    let bridge_mode = args[2..].iter().any(|a| a == "--bridge");

    setup_tracing();

    let config = load_and_validate_config(config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;
    tracing::info!(
        config = %config_path,
        devices = config.devices.len(),
        "configuration loaded"
    );

    let mut runtime = RuntimeBuilder::from_config(config)
        .start()
        .await
        .context("starting workcell runtime")?;

    let mut events = runtime
        .take_events()
        .context("status event stream already taken")?;
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(
                workcell_id = %event.workcell_id,
                status = %event.computed_status,
                contributing = ?event.contributing_device_ids,
                "workcell status changed"
            );
        }
    });

    let bridge = bridge_mode.then(|| {
        tokio::spawn(
            runtime
                .bridge()
                .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout()),
        )
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");

    if let Some(bridge) = bridge {
        bridge.abort();
    }
    if let Some(counts) = runtime.poll_counts() {
        tracing::info!(
            ticks = counts.ticks,
            completed = counts.completed,
            skipped = counts.skipped,
            failed = counts.failed,
            "polling summary"
        );
    }

    let overruns = runtime.shutdown().await;
    event_log.abort();
    for error in &overruns {
        tracing::warn!(error = %error, "teardown overran its deadline");
    }
    tracing::info!("workcell runtime stopped");
    Ok(())
}
