//! Integration tests for the dashboard endpoints
//!
//! These tests verify that:
//! - Snapshot endpoints serve the cached state with flat field names
//! - WebSocket clients get init snapshots followed by live refreshes

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use miner_monitor::{
    Event, EventBus, TargetDescriptor, TargetState, WalletState,
    api::{DashboardState, spawn_api_server},
    config::ApiConfig,
    state::MinerMetrics,
};
use serde_json::Value;
use std::net::SocketAddr;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::helpers::*;

async fn spawn_test_api(bus: &EventBus) -> SocketAddr {
    let state = DashboardState::spawn(bus.clone(), Duration::from_secs(30));
    let config = ApiConfig {
        enabled: true,
        bind: "127.0.0.1:0".parse().unwrap(), // Random port
        ping: 30,
    };

    spawn_api_server(&config, state).await.unwrap()
}

fn miner_state(port: u16) -> Arc<TargetState> {
    let mut state = TargetState::new(TargetDescriptor::new(localhost(), fast_settings(port)), 1);
    state.apply_success(
        MinerMetrics {
            hash_rate: 900.0,
            accepted: 3,
            ..MinerMetrics::default()
        },
        2,
    );
    Arc::new(state)
}

async fn get_json(url: String) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}

/// Poll an endpoint until the cache has caught up with the bus
async fn wait_for(url: String, ready: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..100 {
        let body = get_json(url.clone()).await;
        if ready(&body) {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{url} never became ready");
}

#[tokio::test]
async fn test_snapshot_endpoints() {
    let bus = EventBus::new();
    let addr = spawn_test_api(&bus).await;

    let body = get_json(format!("http://{addr}/")).await;
    assert_eq!(body["wallet"], Value::Null);
    assert_eq!(body["servers"], serde_json::json!([]));

    bus.publish(Event::ServerRefresh(miner_state(7111)));
    bus.publish(Event::WalletRefresh(Arc::new(WalletState::new(
        "http://127.0.0.1:4003".to_string(),
        None,
        5,
    ))));

    let servers = wait_for(format!("http://{addr}/servers"), |body| {
        body.as_array().is_some_and(|servers| !servers.is_empty())
    })
    .await;
    assert_eq!(servers[0]["ip"], "127.0.0.1");
    assert_eq!(servers[0]["port"], 7111);
    assert_eq!(servers[0]["status"], "success");
    assert_eq!(servers[0]["hash_rate"], 900.0);

    let wallet = wait_for(format!("http://{addr}/wallet"), |body| !body.is_null()).await;
    assert_eq!(wallet["status"], "init");
    assert_eq!(wallet["rpc_address"], "http://127.0.0.1:4003");

    let body = get_json(format!("http://{addr}/")).await;
    assert_eq!(body["servers"].as_array().unwrap().len(), 1);
    assert_eq!(body["wallet"]["last_refresh"], 5);
}

async fn next_frame<S>(socket: &mut S) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if message.is_text() {
            return serde_json::from_str(&message.into_text().unwrap()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_init_and_refresh() {
    let bus = EventBus::new();
    let addr = spawn_test_api(&bus).await;

    bus.publish(Event::ServerRefresh(miner_state(7111)));
    wait_for(format!("http://{addr}/servers"), |body| {
        body.as_array().is_some_and(|servers| servers.len() == 1)
    })
    .await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let wallet_init = next_frame(&mut socket).await;
    assert_eq!(wallet_init["event"], "wallet.init");
    assert_eq!(wallet_init["data"], Value::Null);

    let servers_init = next_frame(&mut socket).await;
    assert_eq!(servers_init["event"], "servers.init");
    assert_eq!(servers_init["data"][0]["port"], 7111);

    bus.publish(Event::ServerRefresh(miner_state(7222)));

    let refresh = next_frame(&mut socket).await;
    assert_eq!(refresh["event"], "servers.refresh");
    assert_eq!(refresh["data"]["port"], 7222);
    assert_eq!(refresh["data"]["accepted"], 3);
}
