//! Main binary for the Scadenze notifier
//!
//! Runs the admin HTTP API and the daily sweep scheduler, or a single sweep
//! with `--once`.

use scadenze_notifier::{
    config::NotifierConfig, manager::NotifierManager, routes::create_router, store::InMemoryStore,
    DeadlineStore, SweepOptions,
};

use anyhow::{bail, Context};
use axum::serve;
use chrono::NaiveDate;
use clap::{Arg, ArgAction, Command};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let matches = create_cli().get_matches();
    let config = load_config(&matches)?;

    init_tracing(&config, matches.get_flag("json-logs"))?;

    let once = matches.get_flag("once");
    let options = SweepOptions {
        dry_run: matches.get_flag("dry-run"),
    };
    let date = parse_date(matches.get_one::<String>("date"))?;

    info!("Starting Scadenze notifier");
    info!(
        "Enabled channels: Push={}, Email={}",
        config.is_channel_enabled("push"),
        config.is_channel_enabled("email")
    );

    let manager = Arc::new(build_manager(config.clone(), matches.get_one::<String>("seed")).await?);

    if once {
        let report = manager.run_sweep(date, options).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let cancellation_token = CancellationToken::new();

    let scheduler = manager.scheduler()?.with_options(options);
    if let Err(e) = scheduler.start().await {
        warn!("Failed to start scheduler: {}, continuing with on-demand sweeps", e);
    }

    let app = create_router(manager.clone());

    let addr = SocketAddr::new(
        config
            .server
            .host
            .parse()
            .with_context(|| format!("Invalid host address: {}", config.server.host))?,
        config.server.port,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;

    info!("Notifier started on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("Metrics: http://{}/metrics", addr);

    let server_task = tokio::spawn({
        let token = cancellation_token.clone();
        async move {
            let server = serve(listener, app).with_graceful_shutdown(token.cancelled_owned());
            if let Err(e) = server.await {
                error!("Server error: {}", e);
            }
        }
    });

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    cancellation_token.cancel();

    if let Err(e) = scheduler.stop().await {
        warn!("Failed to stop scheduler gracefully: {}", e);
    }

    if let Err(e) = server_task.await {
        error!("Server task error during shutdown: {}", e);
    }

    info!("Scadenze notifier stopped");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &NotifierConfig, force_json: bool) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("Invalid log filter")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    if force_json || config.logging.json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }

    Ok(())
}

/// Create CLI argument parser
fn create_cli() -> Command {
    Command::new("scadenze-notifier")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scadenze notifier - daily deadline reminders by push and email")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Server host address"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Server port"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Run a single sweep, print the report and exit"),
        )
        .arg(
            Arg::new("date")
                .long("date")
                .value_name("YYYY-MM-DD")
                .help("Sweep date instead of today (with --once)"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Evaluate deadlines without sending or recording anything"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("FILE")
                .help("Use an in-memory store loaded from a JSON export instead of Firestore"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
}

/// Load configuration from file and environment
fn load_config(matches: &clap::ArgMatches) -> anyhow::Result<NotifierConfig> {
    if let Some(config_file) = matches.get_one::<String>("config") {
        std::env::set_var("SCADENZE_CONFIG_FILE", config_file);
    }
    let mut config = NotifierConfig::from_env().context("Failed to load configuration")?;

    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }

    if let Some(port_str) = matches.get_one::<String>("port") {
        config.server.port = port_str
            .parse()
            .with_context(|| format!("Invalid port number '{}'", port_str))?;
    }

    Ok(config)
}

fn parse_date(value: Option<&String>) -> anyhow::Result<Option<NaiveDate>> {
    value
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", raw))
        })
        .transpose()
}

async fn build_manager(
    config: NotifierConfig,
    seed: Option<&String>,
) -> anyhow::Result<NotifierManager> {
    let Some(seed) = seed else {
        return NotifierManager::new(config)
            .await
            .context("Failed to initialize notifier manager");
    };

    let path = Path::new(seed);
    if !path.exists() {
        bail!("Seed file not found: {}", seed);
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read seed file {}", seed))?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let store: Arc<dyn DeadlineStore> = Arc::new(InMemoryStore::from_seed(&value).await?);
    info!(seed = %seed, "Using in-memory store");

    Ok(NotifierManager::with_store(config, store)?)
}

/// Wait for shutdown signals
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
