//! graphex server - tag-based graph explorer over a metric tag index
//!
//! Usage:
//!   graphex [OPTIONS] [COMMAND]
//!
//! Commands:
//!   serve              Run the HTTP API (default)
//!   classify <FILE>    Classify raw metric names and write them to the search service

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{IndexBackend, ServerConfig};
use graphex_api::{create_router, AppState, GraphExplorer};
use graphex_core::{Diagnostics, Target};
use graphex_index::{HttpTagStore, IndexHit, MemoryTagStore, TagStore};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "graphex")]
#[command(author, version, about = "Tag-based graph explorer for metric indexes")]
struct Cli {
    /// Path to graphex.yml config file
    #[arg(short, long, global = true, default_value = "graphex.yml")]
    config: PathBuf,

    /// Bind address (overrides config)
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Search service URL; selects the http index backend (overrides config)
    #[arg(long, global = true)]
    index_url: Option<String>,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    generate_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve,

    /// Classify raw metric names (one per line) and write them to the search service
    Classify {
        /// File with raw metric names
        file: PathBuf,

        /// Print the classified targets without indexing them
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_config(cli: &Cli) -> ServerConfig {
    let mut config = if cli.config.exists() {
        match ServerConfig::from_file(&cli.config) {
            Ok(c) => {
                println!("Loaded configuration from: {}", cli.config.display());
                c
            }
            Err(e) => {
                eprintln!("Warning: Failed to load {}: {}", cli.config.display(), e);
                eprintln!("Using default configuration");
                ServerConfig::default()
            }
        }
    } else {
        ServerConfig::default()
    };

    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = &cli.index_url {
        config.index.backend = "http".to_string();
        config.index.url = url.clone();
    }
    config
}

fn init_logging(config: &ServerConfig) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .with_target(config.logging.show_target)
        .with_thread_ids(config.logging.show_thread_ids)
        .with_file(config.logging.show_location)
        .with_line_number(config.logging.show_location)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn log_diagnostics(what: &str, diagnostics: &Diagnostics) {
    for d in diagnostics.iter() {
        warn!(source = %d.source, severity = ?d.severity, "{}: {}", what, d.message);
    }
}

/// Read raw metric names from a file and classify them
fn classify_file(config: &ServerConfig, path: &Path) -> anyhow::Result<BTreeMap<String, Target>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read metrics file {}", path.display()))?;

    let registry = config.classifier_registry();
    log_diagnostics("classifier", registry.diagnostics());
    info!("Classifiers: {}", registry.names().join(", "));

    let (targets, diagnostics) = registry.classify_all(content.lines().map(str::trim).filter(|l| !l.is_empty()));
    log_diagnostics("metric", &diagnostics);
    info!("Classified {} metrics from {}", targets.len(), path.display());
    Ok(targets)
}

/// Build the configured tag store. The memory store is seeded from `metrics_file`.
fn open_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn TagStore>> {
    match config.index_backend() {
        IndexBackend::Http => {
            let store = HttpTagStore::new(&config.index.url, config.index.index_name.clone(), config.index_timeout())?;
            info!("Tag index: {} ({})", config.index.url, config.index.index_name);
            Ok(Arc::new(store))
        }
        IndexBackend::Memory => {
            let store = match &config.index.metrics_file {
                Some(path) => MemoryTagStore::from_targets(classify_file(config, path)?.values()),
                None => {
                    warn!("No metrics_file configured, the in-memory tag index starts empty");
                    MemoryTagStore::new()
                }
            };
            info!("Tag index: in-memory, {} metrics, {} distinct tags", store.len(), store.tag_count());
            Ok(Arc::new(store))
        }
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let store = open_store(&config)?;

    let (rules, rule_diagnostics) = config.rule_table();
    log_diagnostics("rule", &rule_diagnostics);
    info!("Loaded {} rules and {} graph definitions", rules.len(), config.graphs.len());

    let explorer = GraphExplorer::new(store)
        .with_definitions(config.graphs.iter().cloned())
        .with_rules(rules)
        .with_search_size(config.index.search_size);

    info!("Max concurrent queries: {}", config.server.max_concurrent_queries);
    let app_state = Arc::new(AppState::new(
        Arc::new(explorer),
        config.server.max_concurrent_queries,
    ));
    let app = create_router(app_state, config.request_timeout());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Graphs endpoint: GET http://{}/graphs/<query>", addr);
    info!("Health check: GET http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn classify(config: ServerConfig, file: &Path, dry_run: bool) -> anyhow::Result<()> {
    let targets = classify_file(&config, file)?;

    if dry_run {
        for target in targets.values() {
            println!("{} {}", target.id, target.tag_strings().join(" "));
        }
        return Ok(());
    }

    let store = HttpTagStore::new(&config.index.url, config.index.index_name.clone(), config.index_timeout())?;
    let docs: Vec<IndexHit> = targets.values().map(IndexHit::from).collect();
    let written = store.index(&docs).await?;
    info!("Indexed {} of {} metrics into {}", written, docs.len(), config.index.index_name);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install SIGINT handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("SIGINT received, shutting down gracefully...");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down gracefully...");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        ServerConfig::write_default(&cli.config)?;
        println!("Generated default configuration: {}", cli.config.display());
        return Ok(());
    }

    let config = load_config(&cli);
    init_logging(&config)?;
    info!("Starting graphex v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Classify { file, dry_run }) => classify(config, &file, dry_run).await,
    }
}
