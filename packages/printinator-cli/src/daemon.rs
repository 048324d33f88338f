//! Background daemon mode
//!
//! Runs the fleet engine until SIGTERM/SIGINT and logs every change to the
//! fleet view. Intended to be supervised by systemd.

use anyhow::{Context, Result};
use printinator_core::config::AgentConfig;
use printinator_core::store::{self, CredentialStore};
use printinator_core::{FleetEngine, FleetView, StaticBrowser};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run the engine until a shutdown signal arrives
pub async fn run_daemon(config: AgentConfig) -> Result<()> {
    let backend = store::default_backend().context("Failed to open credential storage")?;
    let store = CredentialStore::open(backend);

    let creds = store.credentials();
    if creds.has_login() {
        tracing::info!("Cloud account: {}", creds.username);
    } else {
        tracing::warn!("No cloud login stored; only LAN printers will be polled");
    }

    tracing::info!(
        "Starting daemon: polling every {}s, {} known LAN printers, {} static hosts",
        config.cloud.poll_interval.as_secs(),
        store.devices().len(),
        config.lan.hosts.len()
    );

    let browser = Arc::new(StaticBrowser::new(config.lan.hosts.clone()));
    let engine = FleetEngine::new(config, store, browser).start();

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let mut views = engine.subscribe();
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    tracing::warn!("Fleet view closed, stopping daemon");
                    break;
                }
                let view = views.borrow_and_update().clone();
                log_view(&view);
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Shutdown requested, stopping daemon");
                break;
            }
        }
    }

    engine.shutdown().await;
    tracing::info!("Daemon stopped");
    Ok(())
}

fn log_view(view: &FleetView) {
    let printing = view
        .cloud
        .iter()
        .filter(|p| p.current_run().is_some())
        .count();
    let paired = view.lan.iter().filter(|p| p.is_authenticated()).count();

    tracing::info!(
        "Fleet: {} cloud ({} printing), {} LAN ({} paired)",
        view.cloud.len(),
        printing,
        view.lan.len(),
        paired
    );
    for printer in view.cloud.iter() {
        if let Some(progress) = printer.progress() {
            tracing::debug!("  {} {} {:.0}%", printer.serial, printer.status(), progress * 100.0);
        }
    }
}

/// Cancel `shutdown` on Ctrl+C, or on SIGTERM/SIGINT on Unix
fn setup_signal_handlers(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::interrupt(), "SIGINT"),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        tracing::info!("Received {}", name);
                        shutdown.cancel();
                    });
                }
                Err(e) => tracing::error!("Failed to register {} handler: {}", name, e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C");
                shutdown.cancel();
            }
        });
    }
}
