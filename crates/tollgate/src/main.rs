//! Tollgate API gateway.
//!
//! Loads a gateway config and a rule snapshot, then runs the data plane.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tollgate_cache::{ConfigSnapshot, ConfigStore, MemoryStore};
use tollgate_lib::{start, GatewayConfig};
use tollgate_telemetry::{LogFormat, Telemetry};

#[derive(Parser, Debug)]
#[command(name = "tollgate", about = "Tollgate API gateway", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway server.
    Serve {
        /// Gateway config file (YAML). Defaults apply when omitted.
        #[arg(short, long, env = "TOLLGATE_CONFIG")]
        config: Option<PathBuf>,

        /// Listen address, overriding the config file.
        #[arg(long)]
        listen: Option<String>,

        /// Log level, overriding the config file.
        #[arg(long)]
        log_level: Option<String>,

        /// Log format (json or pretty), overriding the config file.
        #[arg(long)]
        log_format: Option<String>,

        /// Enable development mode (error details in gateway responses).
        #[arg(long)]
        dev: bool,
    },

    /// Check a gateway config and its rule snapshot without serving.
    Validate {
        /// Gateway config file (YAML).
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            log_level,
            log_format,
            dev,
        } => {
            let config = match load_config(config.as_deref(), listen, log_level, log_format, dev) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {e:#}");
                    return ExitCode::from(1);
                }
            };
            match run_serve(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %format!("{e:#}"), "gateway failed");
                    eprintln!("error: {e:#}");
                    ExitCode::from(1)
                }
            }
        }
        Commands::Validate { config } => run_validate(&config).await,
    }
}

fn load_config(
    path: Option<&Path>,
    listen: Option<String>,
    log_level: Option<String>,
    log_format: Option<String>,
    dev: bool,
) -> anyhow::Result<GatewayConfig> {
    let mut config = match path {
        Some(path) => GatewayConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => GatewayConfig::default(),
    };
    if let Some(listen) = listen {
        config.listen = listen;
    }
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    if let Some(format) = log_format {
        if LogFormat::parse(&format).is_none() {
            anyhow::bail!("unknown log format '{format}', expected json or pretty");
        }
        config.logging.format = format;
    }
    config.dev |= dev;
    config.validate()?;
    Ok(config)
}

/// Run the serve command.
async fn run_serve(config: GatewayConfig) -> anyhow::Result<()> {
    let telemetry = Telemetry::init(config.telemetry())?;
    tollgate_telemetry::log_startup!(
        version = env!("CARGO_PKG_VERSION"),
        dev = config.dev,
        "tollgate starting"
    );

    let store: Arc<dyn ConfigStore> = Arc::new(MemoryStore::new());
    if let Some(path) = &config.config_source.snapshot {
        let snapshot = ConfigSnapshot::load(path)
            .await
            .with_context(|| format!("failed to load snapshot {}", path.display()))?;
        let summary = snapshot.publish(store.as_ref()).await?;
        tollgate_telemetry::log_snapshot_published!(
            path = %path.display(),
            plugins = snapshot.plugins.len(),
            selectors = snapshot.selectors.len(),
            rules = snapshot.rules.len(),
            written = summary.written,
            "snapshot published"
        );
    } else {
        tracing::warn!("no snapshot configured, every request will be unhandled");
    }

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    let running = start(
        &config,
        Arc::clone(&store),
        Arc::clone(telemetry.metrics()),
        listener,
    )
    .await?;
    tollgate_telemetry::log_listening!(address = %running.local_addr(), "tollgate listening");

    let watcher = match (&config.config_source.snapshot, config.config_source.watch) {
        (Some(path), true) => Some(tollgate_cache::snapshot::watch_file(
            path.clone(),
            Arc::clone(&store),
            running.shutdown_receiver(),
        )?),
        _ => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tollgate_telemetry::log_shutdown!(reason = "signal", "tollgate shutting down");

    running.shutdown().await;
    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }
    Ok(())
}

/// Run the validate command.
async fn run_validate(path: &Path) -> ExitCode {
    let config = match GatewayConfig::load(path) {
        Ok(config) => {
            eprintln!("✓ {} is valid", path.display());
            config
        }
        Err(e) => {
            eprintln!("✗ {}: {}", path.display(), e);
            return ExitCode::from(1);
        }
    };

    let Some(snapshot_path) = &config.config_source.snapshot else {
        eprintln!("  no snapshot configured");
        return ExitCode::SUCCESS;
    };
    match ConfigSnapshot::load(snapshot_path).await {
        Ok(snapshot) => {
            eprintln!(
                "✓ {} is valid ({} plugin(s), {} selector(s), {} rule(s))",
                snapshot_path.display(),
                snapshot.plugins.len(),
                snapshot.selectors.len(),
                snapshot.rules.len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ {}: {}", snapshot_path.display(), e);
            ExitCode::from(1)
        }
    }
}
