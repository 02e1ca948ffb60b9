//! Process entry point: loads configuration, initializes tracing, mints or
//! loads the CA, and serves the proxy listener and the control API
//! concurrently until interrupted.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use mitmkit_api::{router, AppState};
use mitmkit_ca::CertificateAuthority;
use mitmkit_core::InMemoryStore;
use mitmkit_proxy::ProxyServer;
use mitmkit_replay::{InjectionScanner, ReplayEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Optional overrides for the CA key material; everything else is
/// configured purely through environment variables (see `config::Config`).
#[derive(Parser, Debug)]
#[command(name = "mitmkit", about = "Intercepting HTTP(S) replay and scan proxy")]
struct Cli {
    /// Overrides MITMKIT_CA_CERT.
    #[arg(long)]
    ca_cert: Option<PathBuf>,
    /// Overrides MITMKIT_CA_KEY.
    #[arg(long)]
    ca_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(path) = cli.ca_cert {
        config.ca_cert_path = path;
    }
    if let Some(path) = cli.ca_key {
        config.ca_key_path = path;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    info!(?config, "starting mitmkit");

    let ca = Arc::new(
        CertificateAuthority::load_or_create(&config.ca_cert_path, &config.ca_key_path)
            .await
            .context("loading or creating certificate authority")?,
    );

    let store = InMemoryStore::new();
    let engine = ReplayEngine::new().context("building replay engine")?;
    let scanner = InjectionScanner::new(engine.clone(), config.scan_concurrency);

    let proxy = ProxyServer::new(ca, store.clone(), engine.clone());
    let api_state = Arc::new(AppState {
        store,
        engine,
        scanner,
    });
    let api_app = router(api_state);

    let proxy_addr = config.proxy_addr;
    let api_addr = config.api_addr;

    let proxy_task = tokio::spawn(async move {
        if let Err(e) = proxy.run(proxy_addr).await {
            tracing::error!(error = %e, "proxy listener exited");
        }
    });

    let api_task = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(api_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, %api_addr, "failed to bind API listener");
                return;
            }
        };
        info!(%api_addr, "control API listening");
        if let Err(e) = axum::serve(listener, api_app).await {
            tracing::error!(error = %e, "control API exited");
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = proxy_task => {
            tracing::error!("proxy listener task ended unexpectedly");
        }
        _ = api_task => {
            tracing::error!("control API task ended unexpectedly");
        }
    }

    Ok(())
}
