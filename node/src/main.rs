// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Lifecycle Gateway
//!
//! Entry point for the `nova-gateway` binary. Parses CLI arguments,
//! initializes logging and metrics, and either serves the lifecycle API or
//! runs a single lifecycle from the command line.
//!
//! The binary supports three subcommands:
//!
//! - `serve`    — serve `POST /lifecycle` against a simulated devnet
//! - `simulate` — run one lifecycle and print its events as NDJSON
//! - `version`  — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::signal;

use nova_lifecycle::sim::{Devnet, StepScript};
use nova_lifecycle::{LifecycleConfig, Operation, VerificationRequest};

use cli::{Commands, NovaGatewayCli};
use logging::LogFormat;
use metrics::GatewayMetrics;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = NovaGatewayCli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await.map(|()| ExitCode::SUCCESS),
        Commands::Simulate(args) => simulate(args).await,
        Commands::Version => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn lifecycle_config(args: &cli::LifecycleArgs) -> Result<LifecycleConfig> {
    let config = args.to_config();
    config
        .validate()
        .context("invalid lifecycle configuration")?;
    Ok(config)
}

/// Serves the lifecycle API and the metrics endpoint until shutdown.
async fn serve(args: cli::ServeArgs) -> Result<()> {
    logging::init_logging(logging::SERVE_DIRECTIVES, args.log_format);

    let config = lifecycle_config(&args.lifecycle)?;
    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        indexing_timeout_ms = config.indexing_timeout_ms,
        poll_interval_ms = config.poll_interval_ms,
        "starting nova-gateway"
    );

    // --- Collaborators ---
    let devnet = Devnet::new(args.devnet.to_config());
    tracing::info!(
        require_challenge = !args.devnet.no_challenge,
        index_lag_ms = args.devnet.index_lag_ms,
        "simulated devnet ready"
    );

    // --- Metrics ---
    let gateway_metrics = Arc::new(GatewayMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: format!("{} (nova-lifecycle)", env!("CARGO_PKG_VERSION")),
        coordinator: devnet.coordinator(config),
        metrics: Arc::clone(&gateway_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("lifecycle API listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, dropping open lifecycles");
        }
    }

    tracing::info!("nova-gateway stopped");
    Ok(())
}

/// Runs one lifecycle against a fresh devnet and writes its events to
/// stdout. Exits 0 when the write is confirmed (indexed or not).
async fn simulate(args: cli::SimulateArgs) -> Result<ExitCode> {
    logging::init_logging(logging::SIMULATE_DIRECTIVES, LogFormat::Pretty);

    let config = lifecycle_config(&args.lifecycle)?;
    let devnet = Devnet::new(args.devnet.to_config());
    if let Some(label) = &args.revert {
        devnet
            .ledger
            .set_script(label.clone(), StepScript::revert("reverted by simulation"));
    }
    if let Some(label) = &args.reject {
        devnet.ledger.set_script(
            label.clone(),
            StepScript::reject_with_revert("rejected by simulation", "simulated pre-flight revert"),
        );
    }

    let operation = args
        .steps
        .iter()
        .fold(Operation::new(args.kind.clone()), |op, label| {
            op.step(label.clone(), serde_json::json!({}))
        });
    let verification = args
        .secret
        .as_deref()
        .map(|secret| VerificationRequest::new(secret, args.secret_kind.into()));

    let mut events = devnet.coordinator(config).run(operation, verification);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut confirmed = false;
    while let Some(event) = events.next().await {
        out.write_all(&api::encode_line(&event)?)
            .context("failed to write event")?;
        out.flush().context("failed to flush stdout")?;
        if event.is_terminal() {
            confirmed = event.is_confirmed();
            if let Some(err) = event.terminal_error() {
                tracing::warn!(code = err.code(), "lifecycle did not confirm: {}", err);
            }
        }
    }

    Ok(if confirmed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Prints version information to stdout.
fn print_version() {
    println!("nova-gateway   {}", env!("CARGO_PKG_VERSION"));
    println!("rustc          {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
