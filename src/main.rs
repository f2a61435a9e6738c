use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use harbor::config::{self, Config};
use harbor::server::{Server, ServerContext, TlsAcceptor};
use harbor::session::MemorySessionManager;

#[derive(Debug, Parser)]
#[command(name = "harbor-server", version, about = "Dual-protocol database server")]
struct Args {
    /// Configuration file. Without it, harbor.toml and config/harbor.toml are tried.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured listen address.
    #[arg(long)]
    host: Option<String>,

    /// Overrides the configured listen port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => load_or_default_config(),
    };
    if let Some(host) = args.host {
        config.server.listen_addr = host;
    }
    if let Some(port) = args.port {
        config.server.listen_port = port;
    }

    let manager = Arc::new(MemorySessionManager::from_config(&config));
    let ctx = Arc::new(ServerContext::from_config(&config, manager));

    let addr = format!("{}:{}", config.server.listen_addr, config.server.listen_port);
    let listener = TcpListener::bind(&addr).await?;
    let mut server = Server::new(listener, ctx).with_nodelay(config.server.tcp_nodelay);
    if config.server.tls.enabled {
        server = server.with_tls(TlsAcceptor::new(&config.server.tls)?);
    }
    info!(
        addr = %server.local_addr()?,
        tls = config.server.tls.enabled,
        "Harbor listening"
    );

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

fn load_or_default_config() -> Config {
    let config_paths = ["harbor.toml", "config/harbor.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
