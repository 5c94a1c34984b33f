//! tunnelguard: Network Privacy Guard daemon
//!
//! Loads the configuration, wires up the guard, starts the scheduler
//! loops and the local control API, and shuts everything down on
//! Ctrl-C or SIGTERM.

mod api;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tunnelguard_vpn::{Guard, GuardConfig, LogNotifier, Scheduler};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How long running loops get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const DEFAULT_FILTER: &str = "tunnelguard=info,tunnelguard_vpn=info,tunnelguard_net=info";

#[derive(Debug, Parser)]
#[command(name = "tunnelguard", version, about = "Network privacy guard for a VPN-tunneled torrent client")]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "TUNNELGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json);

    let config = load_config(&args)?;
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!("tunnelguard starting...");

    let metrics = api::install_metrics().context("Failed to install metrics recorder")?;

    let guard = Arc::new(Guard::from_config(&config).context("Failed to build privacy guard")?);
    guard.set_notifier(Arc::new(LogNotifier)).await;

    let shutdown = CancellationToken::new();
    let mut tasks = Scheduler::from_config(&config)?.spawn(guard.clone(), shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind control API on {}", config.api.listen))?;
    info!("Control API listening on http://{}", config.api.listen);

    let api_shutdown = shutdown.clone();
    tasks.spawn(async move {
        let server = axum::serve(listener, api::router(guard, metrics))
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await });
        if let Err(e) = server.await {
            error!(error = %e, "Control API failed");
        }
    });

    shutdown_signal().await;
    info!("Shutdown requested");
    shutdown.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Tasks still running after {:?}, aborting", SHUTDOWN_GRACE);
    }

    info!("tunnelguard stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

fn load_config(args: &Args) -> Result<GuardConfig> {
    let mut config = match &args.config {
        Some(path) => GuardConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GuardConfig::default(),
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;

    if config.real_ip.is_empty() {
        warn!("REAL_IP not set, leak detection disabled");
    }
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["tunnelguard", "-c", "guard.toml", "--json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("guard.toml")));
        assert!(args.json);
        assert!(!args.print_config);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "[rotation]\ndaily_at = \"05:15\"\n").unwrap();

        let args = Args {
            config: Some(path),
            json: false,
            print_config: false,
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.rotation.daily_at, "05:15");
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guard.toml");
        std::fs::write(&path, "[health]\ninterval_secs = 0\n").unwrap();

        let args = Args {
            config: Some(path),
            json: false,
            print_config: false,
        };
        assert!(load_config(&args).is_err());
    }
}
