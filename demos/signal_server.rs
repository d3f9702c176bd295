//! Signaling server demo backed by the loopback media engine
//!
//! Run with: cargo run --example signal_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example signal_server                  # binds to 0.0.0.0:3000
//!   cargo run --example signal_server 127.0.0.1:5000   # binds to 127.0.0.1:5000
//!
//! Then start one or more clients:
//!   cargo run --example signal_client 127.0.0.1:3000
//!
//! Every client joins, publishes an audio track and a three-layer simulcast
//! video track, and consumes what the others publish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sfu_rs::engine::LoopbackEngine;
use sfu_rs::protocol::DEFAULT_PORT;
use sfu_rs::{Error, RegistryConfig, ResourceRegistry, ServerConfig, SignalServer};

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = arg.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if arg == "localhost" {
        return Ok(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)));
    }
    Err(format!("invalid bind address: {}", arg))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = ServerConfig::default().idle_timeout(Duration::from_secs(300));
    if let Some(arg) = args.get(1) {
        match parse_bind_addr(arg) {
            Ok(addr) => config = config.bind(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Usage: signal_server [BIND_ADDR]");
                std::process::exit(1);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sfu_rs=debug".parse()?)
                .add_directive("signal_server=debug".parse()?),
        )
        .init();

    let (engine, events) = LoopbackEngine::new();
    let registry = Arc::new(ResourceRegistry::with_config(
        Arc::new(engine),
        RegistryConfig::default().stats_interval(Duration::from_secs(10)),
    ));

    println!("Starting signaling server on {}", config.bind_addr);

    let server = SignalServer::new(config, registry, events);
    let result = server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(Error::EngineDied(reason)) => {
            eprintln!("Media engine died: {}", reason);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
