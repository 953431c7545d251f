//! groupscaled — the groupscale daemon.
//!
//! Validates the boot configuration, loads provider state, and keeps a
//! `Catalog` of scalable node groups fresh until interrupted.
//!
//! # Usage
//!
//! ```text
//! GROUPSCALE_KUBE_VERSION=1.17.4 \
//! GROUPSCALE_KUBE_JOIN_COMMAND="kubeadm join ..." \
//! groupscaled run --cluster-name k8s.local --fixture cluster.json
//!
//! groupscaled validate --config groupscaled.toml --fixture cluster.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use groupscale_autoscale::{BootConfig, Catalog, CatalogConfig};
use groupscale_provider::MemoryProvider;

const DEFAULT_LOG_FILTER: &str = "info,groupscaled=debug,groupscale=debug";

#[derive(Parser)]
#[command(name = "groupscaled", about = "groupscale daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover node groups and refresh them periodically until Ctrl-C.
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Refresh interval in seconds.
        #[arg(long, env = "GROUPSCALE_REFRESH_INTERVAL", default_value = "60")]
        refresh_interval: u64,
    },
    /// Run the startup checks and one discovery cycle, then print the groups.
    Validate {
        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Cluster domain name; overrides `cluster_name` from the config file.
    #[arg(long, env = "GROUPSCALE_CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// TOML catalog configuration.
    #[arg(long, env = "GROUPSCALE_CONFIG")]
    config: Option<PathBuf>,

    /// JSON provider fixture (groups and instances).
    #[arg(long, env = "GROUPSCALE_FIXTURE")]
    fixture: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            source,
            refresh_interval,
        } => run(source, Duration::from_secs(refresh_interval)).await,
        Command::Validate { source } => validate(source).await,
    }
}

async fn run(source: SourceArgs, refresh_interval: Duration) -> anyhow::Result<()> {
    info!("groupscale daemon starting");

    let mut catalog = build_catalog(&source)?;
    catalog.refresh().await.context("initial discovery failed")?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_handle = tokio::spawn(async move {
        catalog.run(refresh_interval, shutdown_rx).await;
        catalog
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let catalog = refresh_handle.await?;
    catalog.cleanup()?;

    info!("groupscale daemon stopped");
    Ok(())
}

async fn validate(source: SourceArgs) -> anyhow::Result<()> {
    let mut catalog = build_catalog(&source)?;
    let summary = catalog.refresh().await.context("discovery failed")?;

    let groups: Vec<serde_json::Value> = catalog
        .node_groups()
        .iter()
        .map(|g| {
            serde_json::json!({
                "id": g.id(),
                "min_size": g.min_size(),
                "max_size": g.max_size(),
                "template": g.template(),
            })
        })
        .collect();
    let report = serde_json::json!({
        "provider": catalog.name(),
        "cluster": catalog.config().cluster_name,
        "instances": summary.instances,
        "skipped": summary.skipped,
        "groups": groups,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── Startup ─────────────────────────────────────────────────────────

/// Validate everything a catalog needs; any failure here stops the daemon.
fn build_catalog(source: &SourceArgs) -> anyhow::Result<Catalog> {
    let boot = BootConfig::from_env().context("invalid boot configuration")?;
    info!(kube_version = %boot.kube_version(), "boot configuration validated");

    let file = match &source.config {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?,
        ),
        None => None,
    };
    let config = catalog_config(file.as_deref(), source.cluster_name.as_deref())?;
    config.validate()?;

    let provider = load_fixture(&source.fixture)?;
    info!(cluster = %config.cluster_name, fixture = ?source.fixture, "provider fixture loaded");

    Ok(Catalog::new(config, boot, Arc::new(provider)))
}

/// Merge the optional TOML file with the optional cluster name override.
fn catalog_config(file: Option<&str>, cluster_name: Option<&str>) -> anyhow::Result<CatalogConfig> {
    let mut table = match file {
        Some(text) => text.parse::<toml::Table>().context("parsing config")?,
        None => toml::Table::new(),
    };
    if let Some(name) = cluster_name {
        table.insert("cluster_name".to_string(), toml::Value::String(name.to_string()));
    }
    if !table.contains_key("cluster_name") {
        table.insert("cluster_name".to_string(), toml::Value::String(String::new()));
    }
    let config = toml::Value::Table(table)
        .try_into::<CatalogConfig>()
        .context("invalid catalog config")?;
    Ok(config)
}

fn load_fixture(path: &Path) -> anyhow::Result<MemoryProvider> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    MemoryProvider::from_json(&json).with_context(|| format!("parsing fixture {}", path.display()))
}
