//! Artifact Cache Server Binary
//!
//! Starts the TCP server for the artifact cache.

use std::net::IpAddr;
use std::sync::Arc;

use artifactcache::network::Server;
use artifactcache::{Config, Engine};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// Artifact Cache Server
#[derive(Parser, Debug)]
#[command(name = "artifactcache-server")]
#[command(about = "Shared cache server for build artifacts")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./artifactcache_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "0.0.0.0:8126")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Close client connections idle for this many seconds (0 = never)
    #[arg(long, default_value = "0")]
    idle_timeout_secs: u64,

    /// Page size in MB
    #[arg(long, default_value = "100")]
    page_size_mb: u64,

    /// Maximum number of pages
    #[arg(long, default_value = "10")]
    max_pages: usize,

    /// Minimum free block size in bytes
    #[arg(long, default_value = "1024")]
    min_free_block: u64,

    /// Keep everything in memory only (no snapshots)
    #[arg(long)]
    no_persistence: bool,

    /// Seconds between snapshots
    #[arg(long, default_value = "10")]
    save_interval_secs: u64,

    /// Require this many agreeing uploads before a version is stored
    #[arg(long)]
    reliability_threshold: Option<u32>,

    /// Ignore repeated uploads of a pending version from the same client
    #[arg(long)]
    multi_client: bool,

    /// Keep rejected uploads in the quarantine directory
    #[arg(long)]
    save_unreliable: bool,

    /// Client address allowed to upload (repeatable; default: everyone)
    #[arg(short = 'w', long = "whitelist")]
    whitelist: Vec<IpAddr>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,artifactcache=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Artifact Cache Server v{}", artifactcache::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    // Build config from args
    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .read_timeout_ms(args.idle_timeout_secs * 1000)
        .page_size(args.page_size_mb * 1024 * 1024)
        .max_page_count(args.max_pages)
        .min_free_block_size(args.min_free_block)
        .persistence(!args.no_persistence)
        .save_interval_ms(args.save_interval_secs * 1000)
        .multi_client(args.multi_client)
        .save_unreliable(args.save_unreliable)
        .put_whitelist(args.whitelist);

    if let Some(threshold) = args.reliability_threshold {
        builder = builder.reliability_threshold(threshold);
    }
    let config = builder.build();

    // Open engine
    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Engine initialized successfully");

    let server = Server::new(config, Arc::clone(&engine));

    // Set up Ctrl+C / SIGTERM handler
    let shutdown = server.shutdown_signal();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal, stopping...");
        shutdown.trigger();
    }) {
        tracing::error!("Failed to install signal handler: {}", e);
        std::process::exit(1);
    }

    // Start server
    let result = server.run();

    if let Err(e) = engine.shutdown() {
        tracing::error!("Failed to save on shutdown: {}", e);
    }

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}
