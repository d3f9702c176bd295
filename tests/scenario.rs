//! End-to-end join/publish/subscribe scenario
//!
//! Two participants negotiate against one relay, once in-process and once
//! over TCP. A publishes simulcast video, B discovers and consumes it, then A
//! stops and B's consumer goes away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_test::assert_ok;

use sfu_rs::client::{LocalDevice, StaticDevice};
use sfu_rs::engine::LoopbackEngine;
use sfu_rs::media::MediaKind;
use sfu_rs::protocol::message::{Consume, ConsumerRef, CreateTransport, Notification, ProducerRef, Produce};
use sfu_rs::protocol::{Request, ResponseBody};
use sfu_rs::registry::SessionId;
use sfu_rs::transport::{Direction, TransportOptions};
use sfu_rs::{
    ClientConfig, LocalSignaler, MirrorEvent, NegotiationMirror, RegistryConfig, ResourceRegistry,
    ServerConfig, SignalClient, SignalServer, Signaler,
};

fn relay() -> (Arc<ResourceRegistry>, mpsc::UnboundedReceiver<sfu_rs::engine::EngineEvent>) {
    let (engine, events) = LoopbackEngine::new();
    let registry = Arc::new(ResourceRegistry::with_config(
        Arc::new(engine),
        RegistryConfig::default().engine_timeout(Duration::from_secs(1)),
    ));
    (registry, events)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting")
        .expect("channel closed")
}

#[tokio::test]
async fn in_process_publish_and_subscribe() {
    let (registry, events) = relay();
    registry.spawn_event_pump(events);

    let (a_signaler, _a_notifications) = assert_ok!(LocalSignaler::connect(Arc::clone(&registry), SessionId(1)).await);
    let (b_signaler, mut b_notifications) =
        assert_ok!(LocalSignaler::connect(Arc::clone(&registry), SessionId(2)).await);

    let (mut alice, _alice_events) = NegotiationMirror::new(a_signaler, StaticDevice::new());
    let (mut bob, mut bob_events) = NegotiationMirror::new(b_signaler, StaticDevice::new());
    assert_ok!(alice.join().await);

    let video = assert_ok!(alice.produce(MediaKind::Video, 3, None).await);
    let parameters = assert_ok!(registry.producer_parameters(video).await);
    let ceilings: Vec<Option<u32>> = parameters.encodings.iter().map(|e| e.max_bitrate).collect();
    assert_eq!(ceilings, vec![Some(200_000), Some(500_000), Some(1_500_000)]);

    // bob had no receive transport when the producer was announced, so the
    // join query is what finds it
    assert_ok!(bob.join().await);
    while let Ok(notification) = b_notifications.try_recv() {
        bob.handle_notification(notification).await;
    }
    assert_eq!(bob.consumers().len(), 1);
    let consumer = bob.consumer_for(video).cloned().expect("consumer for video");
    assert_eq!(consumer.kind, MediaKind::Video);
    assert!(!consumer.paused);
    assert_eq!(registry.snapshot().await.paused_consumers, 0);

    while let Ok(event) = bob_events.try_recv() {
        if let MirrorEvent::Joined { producers, .. } = event {
            assert_eq!(producers, 1);
        }
    }

    assert_ok!(alice.close_producer(video).await);
    let notification = next(&mut b_notifications).await;
    assert!(matches!(
        &notification,
        Notification::ConsumerClosed(closed) if closed.consumer_id == consumer.id
    ));
    bob.handle_notification(notification).await;

    assert!(bob.consumers().is_empty());
    assert_eq!(
        next(&mut bob_events).await,
        MirrorEvent::ConsumerClosed {
            consumer_id: consumer.id,
            producer_id: video
        }
    );
    assert_eq!(registry.snapshot().await.consumers, 0);
}

#[tokio::test]
async fn consumer_starts_paused_until_resumed() {
    let (registry, _events) = relay();
    let device = StaticDevice::new();

    let (alice, _a) = assert_ok!(LocalSignaler::connect(Arc::clone(&registry), SessionId(1)).await);
    let (bob, _b) = assert_ok!(LocalSignaler::connect(Arc::clone(&registry), SessionId(2)).await);

    let send = match assert_ok!(
        alice
            .request(Request::CreateTransport(CreateTransport {
                direction: Direction::Send,
                options: TransportOptions::media_only(),
            }))
            .await
    ) {
        ResponseBody::TransportCreated(parameters) => parameters.id,
        other => panic!("unexpected response {:?}", other),
    };
    let recv = match assert_ok!(
        bob.request(Request::CreateTransport(CreateTransport {
            direction: Direction::Recv,
            options: TransportOptions::media_only(),
        }))
        .await
    ) {
        ResponseBody::TransportCreated(parameters) => parameters.id,
        other => panic!("unexpected response {:?}", other),
    };

    let caps = registry.router_capabilities().clone();
    let rtp_parameters = device
        .send_parameters(MediaKind::Audio, &caps, 1)
        .expect("audio parameters");
    let producer_id = match assert_ok!(
        alice
            .request(Request::Produce(Produce {
                transport_id: send,
                kind: MediaKind::Audio,
                rtp_parameters,
                scalability_mode: None,
            }))
            .await
    ) {
        ResponseBody::ProducerCreated(ProducerRef { producer_id }) => producer_id,
        other => panic!("unexpected response {:?}", other),
    };

    let info = match assert_ok!(
        bob.request(Request::Consume(Consume {
            transport_id: recv,
            producer_id,
            rtp_capabilities: device.rtp_capabilities(),
        }))
        .await
    ) {
        ResponseBody::ConsumerCreated(info) => info,
        other => panic!("unexpected response {:?}", other),
    };
    assert!(info.paused);
    assert_eq!(registry.snapshot().await.paused_consumers, 1);

    assert_ok!(
        bob.request(Request::ResumeConsumer(ConsumerRef {
            consumer_id: info.consumer_id
        }))
        .await
    );
    assert_eq!(registry.snapshot().await.paused_consumers, 0);

    // a second consume of the same producer is refused
    let err = bob
        .request(Request::Consume(Consume {
            transport_id: recv,
            producer_id,
            rtp_capabilities: device.rtp_capabilities(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.server_code(), Some("already-consuming"));
}

#[tokio::test]
async fn tcp_publish_and_subscribe() {
    let (registry, events) = relay();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let server = Arc::new(SignalServer::new(
        ServerConfig::with_addr(addr).disable_stats(),
        Arc::clone(&registry),
        events,
    ));
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
        })
    };

    let config = ClientConfig::new(addr).request_timeout(Duration::from_secs(2));
    let (a_client, _a_notifications) = assert_ok!(SignalClient::connect(config.clone()).await);
    let (b_client, mut b_notifications) = assert_ok!(SignalClient::connect(config).await);

    let (mut alice, _alice_events) = NegotiationMirror::new(a_client, StaticDevice::new());
    let (mut bob, _bob_events) = NegotiationMirror::new(b_client, StaticDevice::new());
    assert_ok!(alice.join().await);
    assert_ok!(bob.join().await);

    // bob is already in the room, so the producer reaches him as a notification
    let video = assert_ok!(alice.produce(MediaKind::Video, 3, None).await);
    let notification = tokio::time::timeout(Duration::from_secs(2), b_notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        &notification,
        Notification::NewProducer(info) if info.producer_id == video
    ));
    bob.handle_notification(notification).await;
    let consumer_id = bob.consumer_for(video).map(|c| c.id).expect("consumer");

    assert_ok!(alice.close_producer(video).await);
    let notification = tokio::time::timeout(Duration::from_secs(2), b_notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        &notification,
        Notification::ConsumerClosed(closed) if closed.consumer_id == consumer_id
    ));
    bob.handle_notification(notification).await;
    assert!(bob.consumer_for(video).is_none());

    // leaving tears the session down server-side
    alice.signaler().disconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.snapshot().await.sessions, 1);

    let _ = shutdown_tx.send(());
    assert_ok!(serving.await.unwrap());
    assert_eq!(registry.snapshot().await.sessions, 0);
}

#[tokio::test]
async fn undrained_notifications_do_not_stall_responses() {
    let (registry, events) = relay();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let server = SignalServer::new(
        ServerConfig::with_addr(addr).disable_stats(),
        Arc::clone(&registry),
        events,
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let serving = tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let config = ClientConfig::new(addr).request_timeout(Duration::from_secs(2));
    let (a_client, _a_notifications) = assert_ok!(SignalClient::connect(config.clone()).await);
    let (bob, mut b_notifications) = assert_ok!(SignalClient::connect(config).await);

    let (mut alice, _alice_events) = NegotiationMirror::new(a_client, StaticDevice::new());
    assert_ok!(alice.join().await);

    // bob never reads his notifications while alice publishes
    let mut published = Vec::new();
    for _ in 0..3 {
        published.push(assert_ok!(alice.produce(MediaKind::Audio, 1, None).await));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let body = assert_ok!(bob.request(Request::GetCapabilities).await);
    assert!(matches!(body, ResponseBody::Capabilities(_)));

    let mut announced = Vec::new();
    while let Ok(notification) = b_notifications.try_recv() {
        if let Notification::NewProducer(info) = notification {
            announced.push(info.producer_id);
        }
    }
    assert_eq!(announced, published);

    let _ = shutdown_tx.send(());
    assert_ok!(serving.await.unwrap());
}
