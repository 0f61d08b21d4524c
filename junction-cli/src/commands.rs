//! Command implementations.

use colored::Colorize;
use junction_client::{RpcClient, TopicClient};
use junction_protocol::Host;
use junction_server::{RpcServer, ServerConfig, ServiceDescribe, VType};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

pub type CliError = Box<dyn std::error::Error + Send + Sync>;

/// Invokes a method, either directly or through the registry.
pub async fn call(
    server: Option<SocketAddr>,
    registry: Option<SocketAddr>,
    method: &str,
    params: &str,
) -> Result<(), CliError> {
    let params: Value = serde_json::from_str(params)?;
    let client = match (server, registry) {
        (Some(addr), _) => RpcClient::connect(addr).await?,
        (None, Some(addr)) => RpcClient::with_registry(addr).await?,
        (None, None) => return Err("either --server or --registry is required".into()),
    };

    match client.call(method, params).await {
        Ok(result) => {
            println!("{} {}", "ok".green().bold(), serde_json::to_string_pretty(&result)?);
        }
        Err(e) => {
            println!("{} {}", "error".red().bold(), e);
        }
    }
    client.shutdown();
    Ok(())
}

/// Topic management subcommands.
pub async fn topic_create(server: SocketAddr, key: &str) -> Result<(), CliError> {
    let client = TopicClient::connect(server).await?;
    client.create(key).await?;
    println!("{} topic {} created", "ok".green().bold(), key.bold());
    Ok(())
}

pub async fn topic_remove(server: SocketAddr, key: &str) -> Result<(), CliError> {
    let client = TopicClient::connect(server).await?;
    client.remove(key).await?;
    println!("{} topic {} removed", "ok".green().bold(), key.bold());
    Ok(())
}

pub async fn topic_publish(server: SocketAddr, key: &str, msg: &str) -> Result<(), CliError> {
    let client = TopicClient::connect(server).await?;
    client.create(key).await?;
    client.publish(key, msg).await?;
    println!("{} published to {}", "ok".green().bold(), key.bold());
    Ok(())
}

/// Subscribes and prints publications until interrupted.
pub async fn topic_listen(server: SocketAddr, key: &str) -> Result<(), CliError> {
    let client = TopicClient::connect(server).await?;
    client.create(key).await?;
    client
        .subscribe(
            key,
            Arc::new(|topic, msg| {
                println!("{} {} {}", "<<".cyan().bold(), topic.bold(), msg);
            }),
        )
        .await?;
    println!("listening on {}, ctrl-c to stop", key.bold());
    tokio::signal::ctrl_c().await?;
    client.cancel(key).await?;
    client.shutdown();
    Ok(())
}

/// Runs the demo arithmetic service until interrupted.
pub async fn serve_demo(
    bind: SocketAddr,
    registry: Option<SocketAddr>,
    advertise: Option<Host>,
) -> Result<(), CliError> {
    let config = ServerConfig::new(bind);
    let server = match registry {
        Some(registry_addr) => RpcServer::with_registry(config, registry_addr, advertise).await?,
        None => RpcServer::bind(config).await?,
    };

    server
        .register_method(
            ServiceDescribe::builder("Add")
                .param("num1", VType::Integral)
                .param("num2", VType::Integral)
                .returns(VType::Integral)
                .handler(|params| {
                    let num1 = params["num1"].as_i64().unwrap_or(0);
                    let num2 = params["num2"].as_i64().unwrap_or(0);
                    Ok(json!(num1 + num2))
                })
                .build(),
        )
        .await?;

    server
        .register_method(
            ServiceDescribe::builder("Echo")
                .param("text", VType::String)
                .returns(VType::String)
                .handler(|params| Ok(params["text"].clone()))
                .build(),
        )
        .await?;

    println!(
        "{} demo service on {} (methods: Add, Echo)",
        "ok".green().bold(),
        server.local_addr()
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            server.shutdown();
        }
    }
    Ok(())
}
