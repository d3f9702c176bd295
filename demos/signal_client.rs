//! Signaling client demo
//!
//! Run with: cargo run --example signal_client [SERVER_ADDR]
//!
//! Joins the relay, publishes an audio track and a three-layer simulcast
//! video track, then follows notifications: every producer another client
//! publishes is consumed, and every closed one is dropped. Ctrl+C leaves.

use std::net::SocketAddr;

use sfu_rs::client::StaticDevice;
use sfu_rs::media::MediaKind;
use sfu_rs::protocol::DEFAULT_PORT;
use sfu_rs::{ClientConfig, MirrorEvent, NegotiationMirror, SignalClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_addr = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<SocketAddr>()?,
        None => SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sfu_rs=info".parse()?)
                .add_directive("signal_client=debug".parse()?),
        )
        .init();

    let (client, mut notifications) = SignalClient::connect(ClientConfig::new(server_addr)).await?;
    let (mut mirror, mut events) = NegotiationMirror::new(client, StaticDevice::new());

    mirror.join().await?;
    mirror.produce(MediaKind::Audio, 1, None).await?;
    mirror.produce(MediaKind::Video, 3, None).await?;
    let chat = mirror.produce_data(Some("chat")).await.ok();

    println!("Joined {}", server_addr);

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                match notification {
                    Some(notification) => mirror.handle_notification(notification).await,
                    None => {
                        println!("Server closed the connection");
                        mirror.reset();
                        break;
                    }
                }
            }
            Some(event) = events.recv() => match event {
                MirrorEvent::ConsumerReady { producer_id, kind, .. } => {
                    println!("Receiving {} from producer {}", kind, producer_id);
                }
                MirrorEvent::ConsumerClosed { producer_id, .. } => {
                    println!("Producer {} is gone", producer_id);
                }
                MirrorEvent::DataMessage { message, .. } => {
                    println!("Message: {}", message);
                }
                MirrorEvent::Error { operation, message } => {
                    eprintln!("{} failed: {}", operation, message);
                }
                other => tracing::debug!(event = ?other, "Mirror event"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nLeaving...");
                if let Some(chat) = chat {
                    let _ = mirror.close_data_producer(chat).await;
                }
                mirror.signaler().disconnect().await;
                break;
            }
        }
    }

    Ok(())
}
