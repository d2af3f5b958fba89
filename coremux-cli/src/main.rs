//! Coremux CLI
//!
//! Composition root for the multi-core supervision layer: builds the
//! [`CoreManager`], registers both engine adapters and config builders,
//! and exposes run/check/config commands.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use coremux_core::{CoreKind, CoreManager, InboundConfig};
use coremux_singbox::{SingBoxConfigBuilder, SingBoxCore};
use coremux_xray::{XrayConfigBuilder, XrayCore};

use settings::Settings;

const XRAY_TEMPLATE: &[u8] = include_bytes!("../templates/xray.json");
const SINGBOX_TEMPLATE: &[u8] = include_bytes!("../templates/singbox.json");

const TRAFFIC_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Coremux - supervision layer for interchangeable proxy cores
#[derive(Parser)]
#[command(name = "coremux")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the settings file
    #[arg(short, long, default_value = "coremux.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the config for a core, start it and supervise until shutdown
    Run {
        /// Which core to run
        #[arg(value_enum, default_value = "xray")]
        core: CoreArg,
    },

    /// Build the config for a core and validate it with the engine binary
    Check {
        #[arg(value_enum, default_value = "xray")]
        core: CoreArg,
    },

    /// Render the engine-native config for a core and print or write it
    GenConfig {
        #[arg(value_enum, default_value = "xray")]
        core: CoreArg,

        /// Output path; prints to stdout when unset
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a sample settings file
    GenSettings {
        /// Output path for the settings file
        #[arg(short, long, default_value = "coremux.toml")]
        output: PathBuf,
    },

    /// Show every registered core with its probed version
    Cores,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CoreArg {
    Xray,
    #[value(name = "sing-box", alias = "singbox")]
    SingBox,
}

impl From<CoreArg> for CoreKind {
    fn from(arg: CoreArg) -> Self {
        match arg {
            CoreArg::Xray => CoreKind::Xray,
            CoreArg::SingBox => CoreKind::SingBox,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Run { core } => run(cli.config, core.into()).await,
        Commands::Check { core } => check(cli.config, core.into()).await,
        Commands::GenConfig { core, output } => gen_config(cli.config, core.into(), output),
        Commands::GenSettings { output } => gen_settings(output),
        Commands::Cores => cores(cli.config).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the manager and register both cores from the settings
fn build_manager(settings: &Settings) -> Result<CoreManager> {
    let manager = CoreManager::new();

    let mut xray = XrayCore::new();
    if let Some(path) = &settings.xray.binary {
        xray = xray.with_binary_path(path);
    }
    if let Some(port) = settings.xray.api_port {
        xray = xray.with_api_port(port);
    }
    manager.register_core(Arc::new(xray));
    manager.register_builder(
        CoreKind::Xray,
        Arc::new(XrayConfigBuilder::new(load_template(
            &settings.xray.template,
            XRAY_TEMPLATE,
        )?)),
    );

    let mut singbox = SingBoxCore::new().with_api_secret(settings.singbox.api_secret.clone());
    if let Some(path) = &settings.singbox.binary {
        singbox = singbox.with_binary_path(path);
    }
    if let Some(port) = settings.singbox.api_port {
        singbox = singbox.with_api_port(port);
    }
    manager.register_core(Arc::new(singbox));
    manager.register_builder(
        CoreKind::SingBox,
        Arc::new(SingBoxConfigBuilder::new(load_template(
            &settings.singbox.template,
            SINGBOX_TEMPLATE,
        )?)),
    );

    Ok(manager)
}

fn load_template(path: &Option<PathBuf>, builtin: &[u8]) -> Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read template from {:?}", path)),
        None => Ok(builtin.to_vec()),
    }
}

fn load_inbounds(settings: &Settings) -> Result<Vec<InboundConfig>> {
    let content = std::fs::read(&settings.inbounds)
        .with_context(|| format!("failed to read inbounds from {:?}", settings.inbounds))?;
    serde_json::from_slice(&content)
        .with_context(|| format!("invalid inbound list in {:?}", settings.inbounds))
}

async fn run(config_path: PathBuf, kind: CoreKind) -> Result<()> {
    let settings = Settings::load(&config_path)?;
    let manager = Arc::new(build_manager(&settings)?);
    manager.set_active(kind)?;

    let inbounds = load_inbounds(&settings)?;
    let config = manager.build_config(kind, &inbounds)?;
    info!("built {} config with {} inbounds", kind, inbounds.len());

    let (shutdown_tx, _) = broadcast::channel(1);
    manager
        .start(kind, shutdown_tx.clone(), &config)
        .await
        .with_context(|| format!("failed to start {}", kind))?;
    info!("{} running", kind);

    let traffic_manager = manager.clone();
    let traffic_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TRAFFIC_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match traffic_manager.active_traffic().await {
                Ok(records) => {
                    for record in records {
                        info!(
                            "traffic {}: up={} down={}",
                            record.tag, record.traffic.up, record.traffic.down
                        );
                    }
                }
                Err(e) if e.is_stats_error() => {
                    warn!("traffic unavailable: {}", e);
                }
                Err(e) => {
                    error!("traffic query failed: {}", e);
                }
            }
        }
    });

    wait_for_shutdown().await;

    info!("shutting down...");
    traffic_task.abort();
    let _ = shutdown_tx.send(());
    manager.stop_all().await;

    Ok(())
}

async fn check(config_path: PathBuf, kind: CoreKind) -> Result<()> {
    let settings = Settings::load(&config_path)?;
    let manager = build_manager(&settings)?;

    let inbounds = load_inbounds(&settings)?;
    let config = manager.build_config(kind, &inbounds)?;

    let core = manager
        .core(kind)
        .with_context(|| format!("{} is not registered", kind))?;
    core.validate_config(&config)
        .await
        .with_context(|| format!("{} rejected the built config", kind))?;

    println!("{} config ok ({} inbounds)", kind, inbounds.len());
    Ok(())
}

fn gen_config(config_path: PathBuf, kind: CoreKind, output: Option<PathBuf>) -> Result<()> {
    let settings = Settings::load(&config_path)?;
    let manager = build_manager(&settings)?;

    let inbounds = load_inbounds(&settings)?;
    let config = manager.build_config(kind, &inbounds)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &config)
                .with_context(|| format!("failed to write config to {:?}", path))?;
            println!("{} config written to {:?}", kind, path);
        }
        None => {
            println!("{}", String::from_utf8_lossy(&config));
        }
    }
    Ok(())
}

fn gen_settings(output: PathBuf) -> Result<()> {
    let sample = Settings::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("failed to write settings to {:?}", output))?;

    println!("Sample settings written to {:?}", output);
    println!("\nEdit the engine binary paths and API ports before running.");
    Ok(())
}

async fn cores(config_path: PathBuf) -> Result<()> {
    let settings = Settings::load(&config_path)?;
    let manager = build_manager(&settings)?;

    for info in manager.list_cores().await {
        let marker = if info.is_active { "*" } else { " " };
        println!(
            "{} {:<9} version={:<10} state={}",
            marker, info.name, info.version, info.status.state
        );
    }
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }
}
