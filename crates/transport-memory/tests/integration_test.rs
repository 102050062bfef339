//! Integration tests for memory transport

use std::time::Duration;

use bytes::Bytes;
use relay_transport::{
    PublishChannel, ReplyChannel, RequestChannel, Responder, SubscribeChannel, Transport,
};
use relay_transport_memory::{MemoryOptions, MemoryTransport};
use tokio::time::timeout;
use tracing::info;

#[tokio::test]
async fn test_memory_echo_server() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::new(MemoryOptions::default());
    let mut server = transport
        .bind_reply("127.0.0.1:5555")
        .await
        .expect("Failed to bind reply channel");

    let server_task = tokio::spawn(async move {
        for _ in 0..3 {
            let (payload, responder) = server.recv().await.expect("Failed to receive");
            info!("Server echoing {} bytes", payload.len());
            responder.reply(payload).await.expect("Failed to reply");
        }
    });

    let mut client = transport.request_channel();
    client.connect("127.0.0.1:5555").await.unwrap();

    for i in 0..3 {
        let message = Bytes::from(format!("message {i}"));
        let reply = timeout(Duration::from_secs(1), client.request(message.clone()))
            .await
            .expect("Timed out")
            .expect("Request failed");
        assert_eq!(reply, message);
    }

    server_task.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_to_new_server() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::default();
    let mut first = transport.bind_reply("127.0.0.1:5555").await.unwrap();
    let mut second = transport.bind_reply("127.0.0.1:5556").await.unwrap();

    tokio::spawn(async move {
        let (_, responder) = first.recv().await.unwrap();
        responder.reply(Bytes::from_static(b"first")).await.unwrap();
    });
    tokio::spawn(async move {
        let (_, responder) = second.recv().await.unwrap();
        responder.reply(Bytes::from_static(b"second")).await.unwrap();
    });

    let mut client = transport.request_channel();
    client.connect("127.0.0.1:5555").await.unwrap();
    assert_eq!(
        client.request(Bytes::from_static(b"?")).await.unwrap(),
        Bytes::from_static(b"first")
    );

    client.disconnect("127.0.0.1:5555").await.unwrap();
    client.connect("127.0.0.1:5556").await.unwrap();
    assert_eq!(client.endpoints(), vec!["127.0.0.1:5556".to_string()]);
    assert_eq!(
        client.request(Bytes::from_static(b"?")).await.unwrap(),
        Bytes::from_static(b"second")
    );
}

#[tokio::test]
async fn test_publish_subscribe_with_prefix_filters() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::default();
    let publisher = transport.bind_publish("127.0.0.1:5570").await.unwrap();

    let mut weather = transport.subscribe_channel();
    weather.connect("127.0.0.1:5570").await.unwrap();
    weather.subscribe(Bytes::from_static(b"temperature:"));
    weather.subscribe(Bytes::from_static(b"humidity:"));

    let mut everything = transport.subscribe_channel();
    everything.connect("127.0.0.1:5570").await.unwrap();
    everything.subscribe(Bytes::new());

    for message in [
        &b"light:pub1:300:1"[..],
        b"temperature:pub1:21:2",
        b"humidity:pub1:40:3",
    ] {
        publisher
            .publish(Bytes::copy_from_slice(message))
            .await
            .unwrap();
    }

    let first = timeout(Duration::from_secs(1), weather.recv())
        .await
        .unwrap()
        .unwrap();
    let second = timeout(Duration::from_secs(1), weather.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, Bytes::from_static(b"temperature:pub1:21:2"));
    assert_eq!(second, Bytes::from_static(b"humidity:pub1:40:3"));

    for _ in 0..3 {
        assert!(
            timeout(Duration::from_secs(1), everything.recv())
                .await
                .unwrap()
                .is_ok()
        );
    }
}

#[tokio::test]
async fn test_subscriber_connects_before_publisher_binds() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::default();

    let mut subscriber = transport.subscribe_channel();
    subscriber.connect("127.0.0.1:5571").await.unwrap();
    subscriber.subscribe(Bytes::new());

    let publisher = transport.bind_publish("127.0.0.1:5571").await.unwrap();
    publisher
        .publish(Bytes::from_static(b"light:pub9:1:1"))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(1), subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, Bytes::from_static(b"light:pub9:1:1"));
    assert_eq!(subscriber.connections(), vec!["127.0.0.1:5571".to_string()]);
}

#[tokio::test]
async fn test_disconnect_stops_delivery() {
    let _ = tracing_subscriber::fmt::try_init();

    let transport = MemoryTransport::default();
    let old = transport.bind_publish("127.0.0.1:5590").await.unwrap();
    let new = transport.bind_publish("127.0.0.1:5591").await.unwrap();

    let mut subscriber = transport.subscribe_channel();
    subscriber.connect("127.0.0.1:5590").await.unwrap();
    subscriber.connect("127.0.0.1:5591").await.unwrap();
    subscriber.subscribe(Bytes::new());

    subscriber.disconnect("127.0.0.1:5590").await.unwrap();
    subscriber.disconnect("127.0.0.1:5599").await.unwrap();
    assert_eq!(subscriber.connections(), vec!["127.0.0.1:5591".to_string()]);

    old.publish(Bytes::from_static(b"t:B1:stale:1")).await.unwrap();
    new.publish(Bytes::from_static(b"t:B2:fresh:2")).await.unwrap();

    let received = timeout(Duration::from_secs(1), subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, Bytes::from_static(b"t:B2:fresh:2"));
    assert!(
        timeout(Duration::from_millis(50), subscriber.recv())
            .await
            .is_err()
    );
}
