//! reqseal daemon - verifies signed requests received over a Unix socket.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reqseal::auth::{KeyResolver, KeyRing, NonceLedger, RequestVerifier, SystemClock};
use reqseal::config::Settings;
use reqseal::socket::SocketListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return ExitCode::SUCCESS;
    }

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", NAME, VERSION);
        return ExitCode::SUCCESS;
    }

    let config_path = get_config_path(&args);

    let settings = match Settings::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&settings);

    info!("Starting {} v{}", NAME, VERSION);
    info!("Configuration loaded from: {}", config_path);
    info!("Socket path: {}", settings.socket.path.display());
    info!(
        nonce_ttl_seconds = settings.security.nonce_ttl_seconds,
        freshness_window_seconds = settings.security.freshness_window_seconds,
        "Replay protection configured"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(async_main(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let keys_path = settings.security.keys_path.clone();
    let key_ring = Arc::new(KeyRing::load(&keys_path)?);
    if key_ring.is_empty() {
        warn!(path = %keys_path.display(), "No principals configured, every request will be rejected");
    }

    let ledger = Arc::new(NonceLedger::new(
        settings.security.nonce_ttl(),
        Arc::new(SystemClock),
    ));
    let sweeper = ledger.start_sweep_task(settings.security.sweep_interval());

    let resolver: Arc<dyn KeyResolver> = key_ring.clone();
    let verifier = Arc::new(RequestVerifier::new(
        resolver,
        Arc::clone(&ledger),
        settings.security.freshness_window(),
    ));

    let listener = SocketListener::bind(Arc::new(settings), verifier).await?;

    let shutdown = Arc::new(Notify::new());
    let shutdown_for_run = Arc::clone(&shutdown);

    loop {
        tokio::select! {
            result = listener.run(Arc::clone(&shutdown_for_run)) => {
                if let Err(e) = result {
                    error!(error = %e, "Socket listener failed");
                    return Err(e.into());
                }
                break;
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, initiating graceful shutdown...");
                shutdown.notify_waiters();

                let drain_timeout = Duration::from_secs(30);
                match tokio::time::timeout(drain_timeout, listener.wait_for_drain()).await {
                    Ok(()) => info!("Graceful shutdown complete"),
                    Err(_) => warn!(
                        "Shutdown timeout after {}s, some connections may be terminated",
                        drain_timeout.as_secs()
                    ),
                }
                break;
            }
            _ = reload_signal() => {
                info!("Reload signal received, reloading keys...");
                if let Err(e) = key_ring.reload(&keys_path) {
                    error!(error = %e, "Failed to reload keys, keeping existing keys");
                }
            }
        }
    }

    sweeper.abort();
    let metrics = listener.metrics();
    info!(
        requests = metrics.total_requests(),
        rejected = metrics.rejected_requests(),
        live_nonces = ledger.len(),
        "Daemon stopped"
    );
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Wait for a reload signal (SIGHUP).
#[cfg(unix)]
async fn reload_signal() {
    signal::unix::signal(signal::unix::SignalKind::hangup())
        .expect("Failed to install SIGHUP handler")
        .recv()
        .await;
}

#[cfg(not(unix))]
async fn reload_signal() {
    std::future::pending::<()>().await;
}

fn print_help() {
    println!(
        r#"{} {}
Signed request verification daemon.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: /etc/reqseal/reqseal.toml]
    -h, --help             Print help information
    -V, --version          Print version information

SIGNALS:
    SIGHUP                 Reload the principal keys file
"#,
        NAME, VERSION, NAME
    );
}

/// Get configuration file path from command line arguments.
fn get_config_path(args: &[String]) -> String {
    for (i, arg) in args.iter().enumerate() {
        if (arg == "--config" || arg == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    "/etc/reqseal/reqseal.toml".to_string()
}

/// Initialize logging based on settings. RUST_LOG overrides the configured level.
fn init_logging(settings: &Settings) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    match settings.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}
