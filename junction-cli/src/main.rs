//! junction-cli - command-line client and demo services for junction.

mod commands;

use clap::{Parser, Subcommand};
use junction_protocol::Host;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "junction-cli")]
#[command(about = "Command-line client for the junction RPC framework")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke a method
    Call {
        /// Method name
        method: String,
        /// Parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
        /// Server address for a direct call
        #[arg(short, long)]
        server: Option<SocketAddr>,
        /// Registry address for a discovered call
        #[arg(short, long, env = "JUNCTION_REGISTRY")]
        registry: Option<SocketAddr>,
    },
    /// Topic operations
    Topic {
        /// Server address hosting the topics
        #[arg(short, long)]
        server: SocketAddr,
        #[command(subcommand)]
        command: TopicCommands,
    },
    /// Run the demo arithmetic service (methods: Add, Echo)
    ServeDemo {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:9090")]
        bind: SocketAddr,
        /// Registry address to advertise methods to
        #[arg(short, long, env = "JUNCTION_REGISTRY")]
        registry: Option<SocketAddr>,
        /// Advertised address (ip:port) if it differs from --bind
        #[arg(short, long)]
        advertise: Option<String>,
    },
}

#[derive(Subcommand)]
enum TopicCommands {
    /// Create a topic
    Create { key: String },
    /// Remove a topic
    Remove { key: String },
    /// Publish a message
    Pub { key: String, msg: String },
    /// Subscribe and print publications
    Sub { key: String },
}

#[tokio::main]
async fn main() -> Result<(), commands::CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Call {
            method,
            params,
            server,
            registry,
        } => commands::call(server, registry, &method, &params).await,
        Commands::Topic { server, command } => match command {
            TopicCommands::Create { key } => commands::topic_create(server, &key).await,
            TopicCommands::Remove { key } => commands::topic_remove(server, &key).await,
            TopicCommands::Pub { key, msg } => commands::topic_publish(server, &key, &msg).await,
            TopicCommands::Sub { key } => commands::topic_listen(server, &key).await,
        },
        Commands::ServeDemo {
            bind,
            registry,
            advertise,
        } => {
            let advertise = match advertise {
                Some(spec) => Some(parse_host(&spec)?),
                None => None,
            };
            commands::serve_demo(bind, registry, advertise).await
        }
    }
}

fn parse_host(spec: &str) -> Result<Host, commands::CliError> {
    let (ip, port) = spec
        .rsplit_once(':')
        .ok_or("expected ip:port for --advertise")?;
    Ok(Host::new(ip, port.parse()?))
}
