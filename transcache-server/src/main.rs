use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use transcache::{LayerServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "transcache-server")]
#[command(about = "Serve a chain of cache layers over TCP", long_about = None)]
#[command(version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "pretty" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);
    info!("Starting transcache server v{}", env!("CARGO_PKG_VERSION"));

    let chain = config.build_chain().await?;
    let server = Arc::new(LayerServer::new(Arc::clone(chain.top())));

    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    server
        .serve_with_shutdown(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    // Drains every write-back buffer down to the terminal layer
    if let Err(e) = chain.sync().await {
        warn!("Final sync failed: {}", e);
    }
    chain.shutdown().await?;

    info!("Server stopped");
    Ok(())
}
