//! End-to-end websocket protocol scenarios against a live server.

use cds::config::CdsConfig;
use cds::server::CdsServer;
use daq_test_utils::WsTestClient;
use serde_json::json;
use tokio_util::sync::CancellationToken;

async fn start_server() -> (String, CancellationToken) {
    let config = CdsConfig {
        port: 0,
        interval: 0.01,
        ..CdsConfig::default()
    };
    let cancel = CancellationToken::new();
    let server = CdsServer::bind(config, cancel.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (format!("ws://127.0.0.1:{}", addr.port()), cancel)
}

#[tokio::test]
async fn publish_subscribe_most_recent_then_incremental() {
    let (url, cancel) = start_server().await;
    let mut publisher = WsTestClient::connect(&url).await;
    let mut subscriber = WsTestClient::connect(&url).await;

    let reply = publisher
        .request(&json!({
            "type": "publish",
            "data": {"timestamp": 100.0, "fields": {"x": 1, "y": 2}}
        }))
        .await;
    assert_eq!(reply, json!({"type": "publish", "status": 200}));

    let reply = publisher
        .request(&json!({
            "type": "publish",
            "data": {"timestamp": 101.0, "fields": {"x": 3}}
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = subscriber
        .request(&json!({
            "type": "subscribe",
            "fields": {"x": {"seconds": -1}}
        }))
        .await;
    assert_eq!(reply, json!({"type": "subscribe", "status": 200}));

    // First ready: exactly the current most-recent value.
    let reply = subscriber.request(&json!({"type": "ready"})).await;
    assert_eq!(reply["type"], json!("data"));
    assert_eq!(reply["status"], json!(200));
    assert_eq!(reply["data"], json!({"x": [[101.0, 3]]}));

    // Second ready with no intervening publish: empty.
    let reply = subscriber.request(&json!({"type": "ready"})).await;
    assert_eq!(reply["data"], json!({}));

    publisher.close().await;
    subscriber.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn back_seconds_subscription_returns_window_then_increments() {
    let (url, cancel) = start_server().await;
    let mut client = WsTestClient::connect(&url).await;

    // x = [(10,a),(12,b),(15,c),(20,d)]
    let reply = client
        .request(&json!({
            "type": "publish",
            "data": {"fields": {"x": [[10.0, "a"], [12.0, "b"], [15.0, "c"], [20.0, "d"]]}}
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = client
        .request(&json!({
            "type": "subscribe",
            "fields": {"x": {"seconds": 5}},
            "interval": 0.01
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = client.request(&json!({"type": "ready"})).await;
    assert_eq!(reply["data"], json!({"x": [[15.0, "c"], [20.0, "d"]]}));

    let reply = client
        .request(&json!({
            "type": "publish",
            "data": {"timestamp": 25.0, "fields": {"x": "e"}}
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = client.request(&json!({"type": "ready"})).await;
    assert_eq!(reply["data"], json!({"x": [[25.0, "e"]]}));

    client.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn fields_describe_and_errors_over_the_wire() {
    let (url, cancel) = start_server().await;
    let mut client = WsTestClient::connect(&url).await;

    let reply = client
        .request(&json!({
            "type": "publish",
            "data": {
                "timestamp": 1.0,
                "fields": {"depth": 12.5},
                "metadata": {"fields": {"depth": {"units": "m", "device": "sounder"}}}
            }
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = client.request(&json!({"type": "fields"})).await;
    assert_eq!(reply, json!({"type": "fields", "status": 200, "data": ["depth"]}));

    let reply = client
        .request(&json!({"type": "describe", "fields": ["depth"]}))
        .await;
    assert_eq!(reply["data"]["depth"]["units"], json!("m"));

    let reply = client.request(&json!({"type": "sail_away"})).await;
    assert_eq!(reply["status"], json!(400));

    let reply = client.request(&json!({"type": "publish"})).await;
    assert_eq!(reply["status"], json!(400));

    client.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn record_list_format_delivers_per_timestamp_records() {
    let (url, cancel) = start_server().await;
    let mut client = WsTestClient::connect(&url).await;

    let reply = client
        .request(&json!({
            "type": "publish",
            "data": {"timestamp": 10.0, "fields": {"lat": 47.6, "lon": -122.3}}
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = client
        .request(&json!({
            "type": "subscribe",
            "fields": {"lat": {"seconds": 60}, "lon": {"seconds": 60}},
            "format": "record_list",
            "interval": 0.01
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = client.request(&json!({"type": "ready"})).await;
    assert_eq!(
        reply["data"],
        json!([{"timestamp": 10.0, "fields": {"lat": 47.6, "lon": -122.3}}])
    );

    client.close().await;
    cancel.cancel();
}

#[tokio::test]
async fn second_client_publishes_while_first_is_subscribed() {
    let (url, cancel) = start_server().await;
    let mut subscriber = WsTestClient::connect(&url).await;
    let mut publisher = WsTestClient::connect(&url).await;

    let reply = subscriber
        .request(&json!({
            "type": "subscribe",
            "fields": {"tide": {"seconds": 0}}
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = publisher
        .request(&json!({
            "type": "publish",
            "data": {"timestamp": 7.0, "fields": {"tide": 0.8}}
        }))
        .await;
    assert_eq!(reply["status"], json!(200));

    let reply = subscriber.request(&json!({"type": "ready"})).await;
    assert_eq!(reply["data"], json!({"tide": [[7.0, 0.8]]}));

    subscriber.close().await;
    publisher.close().await;
    cancel.cancel();
}
