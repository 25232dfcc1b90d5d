//! Proxy connections turning into monitored targets
//!
//! These tests verify that:
//! - A miner connecting through the proxy is registered and polled at once
//! - Closing the connection clears the wallet flag but keeps the target

use std::sync::Arc;

use miner_monitor::{
    EventBus,
    actors::{registration::RegistrationBridge, scheduler::SchedulerHandle},
    config::ResolvedProxy,
    probe::TcpProbe,
    proxy::ProxyMonitor,
    state::TargetStatus,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::helpers::*;

/// Wallet mining port that echoes everything back
async fn spawn_echo_wallet() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    address
}

#[tokio::test]
async fn test_proxy_connection_registers_target() {
    let miner = spawn_fake_miner(MINER_REPORT).await;
    let wallet = spawn_echo_wallet().await;

    let bus = EventBus::new();
    let mut refreshes = bus.subscribe("server.refresh");

    let scheduler = SchedulerHandle::spawn(vec![], Arc::new(TcpProbe::default()), bus.clone());
    let bridge = RegistrationBridge::spawn(&bus, scheduler.clone());

    let mut defaults = fast_settings(miner.port());
    defaults.interval = 3600;
    let proxy = ProxyMonitor::bind(
        &ResolvedProxy {
            listen: "127.0.0.1:0".parse().unwrap(),
            upstream: wallet,
            defaults,
        },
        bus.clone(),
    )
    .await
    .unwrap();
    let proxy_address = proxy.local_addr().unwrap();
    let proxy_task = proxy.spawn();

    assert!(scheduler.snapshot().await.unwrap().is_empty());

    let mut connection = TcpStream::connect(proxy_address).await.unwrap();
    connection.write_all(b"hello").await.unwrap();
    let mut echoed = [0u8; 5];
    connection.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello");

    let state = next_server_refresh(&mut refreshes).await;
    assert_eq!(state.ip(), localhost());
    assert_eq!(state.status, TargetStatus::Success);
    assert!(state.wallet_connected);
    assert!(state.wallet_connected_time > 0);
    assert_eq!(state.descriptor.settings, defaults);

    drop(connection);

    let state = next_server_refresh(&mut refreshes).await;
    assert!(!state.wallet_connected);
    assert_eq!(state.wallet_connected_time, 0);
    assert_eq!(scheduler.snapshot().await.unwrap().len(), 1);

    proxy_task.abort();
    bridge.abort();
    scheduler.shutdown().await.unwrap();
}
