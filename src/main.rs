//! junction - service registry daemon.
//!
//! Hosts the provider/discoverer registry that junction RPC servers advertise
//! to and clients resolve methods through.

use junction_server::{Config, RegistryServer, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load() {
        Ok(config) => {
            if let Ok(path) = std::env::var("JUNCTION_CONFIG") {
                tracing::info!("loaded config from {}", path);
            }
            config
        }
        Err(e) => {
            // An explicitly requested config file must parse.
            if std::env::var("JUNCTION_CONFIG").is_ok() {
                tracing::error!("failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("using default configuration");
            Config::default()
        }
    };

    tracing::info!("starting junction registry");
    tracing::info!("  bind address: {}", config.network.bind_addr);
    tracing::info!("  max connections: {}", config.network.max_connections);

    let server_config = ServerConfig::new(config.network.bind_addr)
        .with_max_connections(config.network.max_connections);
    let server = RegistryServer::bind(server_config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
            server.shutdown();
        }
    }

    Ok(())
}
