//! Scheduler and TCP probe against loopback miners
//!
//! These tests verify that:
//! - A reachable miner reports its metrics through server.refresh
//! - A booting miner is reported as booting
//! - An unreachable miner is marked down after the threshold and keeps its entry

use std::sync::Arc;

use miner_monitor::{
    EventBus, TargetDescriptor,
    actors::scheduler::SchedulerHandle,
    probe::TcpProbe,
    state::{MinerMetrics, TargetStatus},
};

use crate::helpers::*;

#[tokio::test]
async fn test_reachable_miner_reports_metrics() {
    let miner = spawn_fake_miner(MINER_REPORT).await;
    let bus = EventBus::new();
    let mut events = bus.subscribe("server.refresh");

    let target = TargetDescriptor::new(localhost(), fast_settings(miner.port()));
    let scheduler = SchedulerHandle::spawn(vec![target], Arc::new(TcpProbe::default()), bus);

    let state = next_server_refresh(&mut events).await;
    assert_eq!(state.status, TargetStatus::Success);
    assert_eq!(state.metrics.hash_rate, 1250.5);
    assert_eq!(state.metrics.accepted, 42);
    assert_eq!(state.metrics.stratum_user, "worker.7");
    assert_eq!(state.error_message, None);

    // keeps polling on the interval
    let state = next_server_refresh(&mut events).await;
    assert_eq!(state.status, TargetStatus::Success);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_booting_miner() {
    let miner = spawn_fake_miner("{}").await;
    let bus = EventBus::new();
    let mut events = bus.subscribe("server.*");

    let target = TargetDescriptor::new(localhost(), fast_settings(miner.port()));
    let scheduler = SchedulerHandle::spawn(vec![target], Arc::new(TcpProbe::default()), bus);

    let state = next_server_refresh(&mut events).await;
    assert_eq!(state.status, TargetStatus::Booting);
    assert_eq!(
        state.error_message.as_deref(),
        Some("Empty response, miner is probably booting, stay tuned...")
    );

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_miner_is_marked_down() {
    let port = closed_port().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe("server.refresh");

    let target = TargetDescriptor::new(localhost(), fast_settings(port));
    let probe = Arc::new(TcpProbe::default());
    let scheduler = SchedulerHandle::spawn(vec![target], probe.clone(), bus);

    let first = next_server_refresh(&mut events).await;
    assert_eq!(first.status, TargetStatus::Error);
    assert_eq!(scheduler.consecutive_errors(target.ip).await.unwrap(), Some(1));

    let second = next_server_refresh(&mut events).await;
    assert_eq!(second.status, TargetStatus::Error);
    assert_eq!(second.metrics, MinerMetrics::default());
    assert_eq!(scheduler.consecutive_errors(target.ip).await.unwrap(), Some(2));

    // down targets stay visible
    let snapshot = scheduler.snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(probe.open_connections(), 0);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poll_now_reaches_recovered_miner() {
    let port = closed_port().await;
    let bus = EventBus::new();
    let mut events = bus.subscribe("server.refresh");

    let mut settings = fast_settings(port);
    settings.interval = 3600;
    let target = TargetDescriptor::new(localhost(), settings);
    let scheduler = SchedulerHandle::spawn(vec![target], Arc::new(TcpProbe::default()), bus);

    assert_eq!(next_server_refresh(&mut events).await.status, TargetStatus::Error);

    // the miner comes up on the same port
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut trigger = [0u8; 1];
        socket.read_exact(&mut trigger).await.unwrap();
        socket.write_all(MINER_REPORT.as_bytes()).await.unwrap();
    });

    assert!(scheduler.poll_now(target.ip).await.unwrap());
    let state = next_server_refresh(&mut events).await;
    assert_eq!(state.status, TargetStatus::Success);
    assert_eq!(scheduler.consecutive_errors(target.ip).await.unwrap(), Some(0));

    scheduler.shutdown().await.unwrap();
}
