//! tpsync webhook receiver.
//!
//! Listens for CRM change notifications, checks each record's phone number
//! against the compliance API and writes the verdict straight back.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tokio::signal;
use tracing::info;

use tpsync_compliance::{CheckerOptions, TpsClient};
use tpsync_core::ReactorConfig;
use tpsync_crm::{CrmOptions, HubSpotClient};
use tpsync_shared::{Credentials, load_config};

/// tpsync webhook receiver.
#[derive(Parser)]
#[command(name = "tpsync-webhook", version, long_about = None)]
struct Args {
    /// Config file (defaults to ./tpsync.toml, then ~/.tpsync/tpsync.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port (overrides config and PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON logs.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing(args.json);

    for path in ["env/.env", ".env"] {
        if dotenvy::from_path(path).is_ok() {
            tracing::debug!(path, "loaded environment file");
        }
    }

    let mut config = load_config(args.config.as_deref())?;
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.validate()?;

    let creds = Credentials::resolve(&config, |name| std::env::var(name).ok());
    let api_key = creds.require_compliance_key(&config)?;
    let token = creds.require_crm_token(&config)?;

    let crm = HubSpotClient::new(&config.crm.endpoint, token, &CrmOptions::from(&config.crm))?;
    let checker = TpsClient::new(
        &config.compliance.endpoint,
        api_key,
        &CheckerOptions::for_single_checks(&config.compliance),
    )?;
    let crm_endpoint = crm.endpoint().clone();
    let state = routes::AppState::new(crm, checker, ReactorConfig::from_app(&config));

    let port = args.port.unwrap_or(config.webhook.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    info!(%addr, crm = %crm_endpoint, "webhook receiver listening");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .wrap_err("server error")?;

    info!("webhook receiver stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,tpsync=info"));

    if json {
        fmt().json().with_env_filter(env_filter).init();
    } else {
        fmt().with_env_filter(env_filter).with_target(false).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
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
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
