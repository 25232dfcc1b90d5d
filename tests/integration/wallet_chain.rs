//! Wallet monitor against a mocked JSON-RPC wallet
//!
//! These tests verify that:
//! - The first chain issues all four calls and publishes the wallet state
//! - An unchanged block count stops the chain after getblockcount
//! - RPC failures are published with the failing call in the message

use std::sync::Arc;
use std::time::Duration;

use miner_monitor::{
    Event, EventBus, WalletState,
    actors::{messages::ChainOutcome, wallet_monitor::WalletMonitorHandle},
    state::WalletStatus,
    wallet::WalletClient,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_result(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": rpc_method })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result,
        })))
        .mount(server)
        .await;
}

fn spawn_monitor(server: &MockServer, bus: &EventBus) -> WalletMonitorHandle {
    let client =
        WalletClient::new(server.uri(), Some("3GhhbojvNx".to_string()), Duration::from_secs(2))
            .unwrap();
    let state = WalletState::new(server.uri(), Some("3GhhbojvNx".to_string()), 0);

    WalletMonitorHandle::spawn(Arc::new(client), state, Duration::from_secs(3600), bus.clone())
}

async fn next_wallet_refresh(
    bus_events: &mut miner_monitor::events::Subscription,
) -> Arc<WalletState> {
    match tokio::time::timeout(Duration::from_secs(10), bus_events.recv()).await {
        Ok(Some(Event::WalletRefresh(state))) => state,
        other => panic!("unexpected event: {other:?}"),
    }
}

async fn methods_called(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            body["method"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_full_chain_then_short_circuit() {
    let server = MockServer::start().await;
    mount_result(&server, "getblockcount", json!(120)).await;
    mount_result(&server, "getwalletaccountscount", json!(4)).await;
    mount_result(&server, "getwalletcoins", json!(1500.25)).await;
    mount_result(&server, "getblocks", json!([{"block": 119, "reward": 50}])).await;

    let bus = EventBus::new();
    let mut events = bus.subscribe("wallet.refresh");
    let monitor = spawn_monitor(&server, &bus);

    let state = next_wallet_refresh(&mut events).await;
    assert_eq!(state.status, WalletStatus::Success);
    assert_eq!(state.active_block, Some(120));
    assert_eq!(state.number_of_accounts, 4);
    assert_eq!(state.balance, 1500.25);
    assert_eq!(state.block, Some(json!({"block": 119, "reward": 50})));

    assert_eq!(monitor.refresh_now().await.unwrap(), ChainOutcome::Unchanged);

    assert_eq!(
        methods_called(&server).await,
        vec![
            "getblockcount",
            "getwalletaccountscount",
            "getwalletcoins",
            "getblocks",
            "getblockcount",
        ]
    );

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rpc_error_is_published() {
    let server = MockServer::start().await;
    mount_result(&server, "getblockcount", json!(120)).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "method": "getwalletaccountscount" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": 1003, "message": "Invalid public key"},
        })))
        .mount(&server)
        .await;

    let bus = EventBus::new();
    let mut events = bus.subscribe("wallet.refresh");
    let monitor = spawn_monitor(&server, &bus);

    let state = next_wallet_refresh(&mut events).await;
    assert_eq!(state.status, WalletStatus::Error);
    assert_eq!(
        state.error_message.as_deref(),
        Some("getwalletaccountscount: Invalid public key")
    );
    assert_eq!(state.active_block, None);

    // the failed chain does not count as known block
    assert_eq!(monitor.refresh_now().await.unwrap(), ChainOutcome::Failed);

    monitor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_wallet() {
    let server = MockServer::start().await;
    let uri = server.uri();
    drop(server);

    let bus = EventBus::new();
    let mut events = bus.subscribe("wallet.refresh");
    let client = WalletClient::new(uri.clone(), None, Duration::from_secs(1)).unwrap();
    let monitor = WalletMonitorHandle::spawn(
        Arc::new(client),
        WalletState::new(uri, None, 0),
        Duration::from_secs(3600),
        bus.clone(),
    );

    let state = next_wallet_refresh(&mut events).await;
    assert_eq!(state.status, WalletStatus::Error);
    assert!(
        state
            .error_message
            .as_deref()
            .is_some_and(|message| message.starts_with("getblockcount: ")),
        "unexpected message: {:?}",
        state.error_message
    );

    monitor.shutdown().await.unwrap();
}
