//! # chorewheel-listen
//!
//! Mounts the realtime channel against a Chorewheel server and logs every
//! cache invalidation and status change until Ctrl+C.
//!
//! ## Environment
//! - `CHOREWHEEL_API_URL` - server base URL (required)
//! - `CHOREWHEEL_TOKEN` - bearer token (required)
//! - `CHOREWHEEL_TENANT_ID` - household / tenant id
//! - `CHOREWHEEL_TOKEN_EXPIRES_AT` - RFC 3339 token expiry
//! - `CHOREWHEEL_CONFIG` - path to `realtime.toml` (defaults to the platform config dir)
//! - `RUST_LOG` - log filter, default `info,chorewheel=debug`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chorewheel_realtime::{
    transport_for, LifecycleController, LoggingInvalidator, ManualSignals, RealtimeConfig,
    StaticCredentials,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var("CHOREWHEEL_CONFIG").ok().map(PathBuf::from);
    let config = RealtimeConfig::load(config_path).context("loading realtime config")?;
    info!(transport = %config.realtime.transport, enabled = config.realtime.enabled, "Config loaded");

    let credentials = StaticCredentials::from_env().context("reading credentials")?;
    if let Some(secs) = credentials.remaining_secs() {
        info!(expires_in_secs = secs, "Token loaded");
    }

    let adapter = transport_for(&config).context("building transport")?;
    let controller = LifecycleController::mount(
        config,
        adapter,
        Arc::new(credentials),
        Arc::new(LoggingInvalidator),
        Arc::new(ManualSignals::default()),
    )
    .await;

    let mut status = controller.subscribe_status();
    let reporter = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let snapshot = status.borrow_and_update().clone();
            match &snapshot.last_error {
                Some(error) => warn!(
                    state = %snapshot.state,
                    circuit_open = snapshot.circuit_open,
                    error_kind = %error.kind,
                    error = %error.message,
                    "Channel status"
                ),
                None => info!(state = %snapshot.state, "Channel status"),
            }
        }
    });

    shutdown_signal().await;

    let diagnostics = controller.diagnostics();
    info!(
        messages = diagnostics.messages_received,
        parse_errors = diagnostics.parse_errors,
        unknown_events = diagnostics.unknown_events,
        attempts = diagnostics.attempts,
        circuit = %diagnostics.circuit,
        "Session summary"
    );

    controller.unmount().await;
    reporter.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Log filter from `RUST_LOG`, falling back to `info,chorewheel=debug`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chorewheel=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
