//! toxiproxy binary entry point.
//!
//! Usage:
//! ```bash
//! toxiproxy --config toxiproxy.toml
//! toxiproxy --help
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use toxiproxy::config::Config;
use toxiproxy::http;
use toxiproxy::proxy::ProxyManager;
use toxiproxy::toxics::ToxicRegistry;

/// A TCP proxy for simulating network conditions during testing.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Admin API bind host (overrides the config file).
    #[arg(long)]
    host: Option<String>,

    /// Admin API bind port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the TOML configuration file.
    #[arg(long, default_value = "toxiproxy.toml")]
    config: PathBuf,

    /// Seed the toxic jitter RNG for reproducible runs (otherwise
    /// seeded from OS entropy).
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("toxiproxy=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        tracing::info!("loading config from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        tracing::info!("using default config (no config file found)");
        Config::default()
    };

    if let Some(host) = cli.host {
        config.admin.host = host;
    }
    if let Some(port) = cli.port {
        config.admin.port = port;
    }

    tracing::info!("toxiproxy v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("admin bind: {}:{}", config.admin.host, config.admin.port);

    let registry = Arc::new(ToxicRegistry::with_defaults());
    let manager = Arc::new(ProxyManager::new(registry, cli.seed));

    for proxy in &config.proxies {
        manager
            .create(
                proxy.name.clone(),
                proxy.listen.clone(),
                proxy.upstream.clone(),
                proxy.enabled,
            )
            .await?;
        tracing::info!(proxy = %proxy.name, listen = %proxy.listen, upstream = %proxy.upstream, "proxy configured");
    }

    let admin_addr: SocketAddr = format!("{}:{}", config.admin.host, config.admin.port).parse()?;
    let admin_router = http::build_router(manager.clone());
    let admin_listener = tokio::net::TcpListener::bind(admin_addr).await?;
    tracing::info!("admin API listening on {}", admin_addr);

    let admin_handle = tokio::spawn(async move { axum::serve(admin_listener, admin_router).await });

    println!();
    println!("=== toxiproxy running ===");
    println!("Admin: http://{admin_addr}/proxies");
    println!();
    println!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
        result = admin_handle => {
            if let Err(e) = result {
                tracing::error!("admin API server error: {}", e);
            }
        }
    }

    tracing::info!("goodbye!");
    Ok(())
}
