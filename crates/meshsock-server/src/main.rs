//! CLI entry point: load configuration, build the configured adapter,
//! start the server, and wait for a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meshsock_adapter::{Adapter, MemoryAdapter, MongoAdapter, MongoAdapterConfig, RedisAdapter, RedisAdapterConfig};
use meshsock_server::config::AdapterSetting;
use meshsock_server::{Server, ServerConfig};
use tracing_subscriber::EnvFilter;

/// A real-time bidirectional messaging server.
#[derive(Debug, Parser)]
#[command(name = "meshsock-server", version, about)]
struct Cli {
    /// Path to a TOML configuration file. If omitted, built-in defaults are used.
    #[arg(long, env = "MESHSOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind host from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port from the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    meshsock_crypto::init()?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_toml_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let adapter = build_adapter(&config.adapter).await?;
    let server = Server::new(config, adapter)?;

    let bound = server.listen().await?;
    tracing::info!(addr = %bound, "meshsock-server: listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("meshsock-server: shutting down");
    server.close().await;

    Ok(())
}

async fn build_adapter(setting: &AdapterSetting) -> anyhow::Result<Arc<dyn Adapter>> {
    match setting {
        AdapterSetting::Memory => Ok(Arc::new(MemoryAdapter::new())),
        AdapterSetting::Redis { url, prefix } => {
            let adapter = Arc::new(
                RedisAdapter::connect(RedisAdapterConfig {
                    url: url.clone(),
                    prefix: prefix.clone(),
                    heartbeat_interval: Duration::from_secs(30),
                })
                .await?,
            );
            meshsock_adapter::redis::spawn_ttl_renewal(adapter.clone());
            Ok(adapter)
        }
        AdapterSetting::Mongo { uri, database, prefix } => {
            let adapter = Arc::new(
                MongoAdapter::connect(MongoAdapterConfig {
                    uri: uri.clone(),
                    database: database.clone(),
                    prefix: prefix.clone(),
                    heartbeat_interval: Duration::from_secs(30),
                })
                .await?,
            );
            meshsock_adapter::mongo::spawn_liveness_renewal(adapter.clone());
            Ok(adapter)
        }
    }
}
