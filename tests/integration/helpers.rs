//! Helper functions for integration tests

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use miner_monitor::{Event, TargetSettings, TargetState, events::Subscription};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const MINER_REPORT: &str = r#"{"speed": 1250.5, "accepted": 42, "rejected": 1, "failed": 0,
    "uptime": 3600, "extrapayload": "rig-7", "stratum.server": "pool:3333",
    "stratum.user": "worker.7", "diff": 2.5}"#;

pub fn localhost() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

/// Settings that make a test target fail and recover quickly
pub fn fast_settings(port: u16) -> TargetSettings {
    TargetSettings {
        port,
        timeout: 1,
        interval: 1,
        mark_down_after: 2,
        retry_after_down: 60,
    }
}

/// Loopback miner answering every connection with `response`
pub async fn spawn_fake_miner(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut trigger = [0u8; 1];
                if socket.read_exact(&mut trigger).await.is_ok() {
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    address
}

/// A port nothing listens on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn next_server_refresh(events: &mut Subscription) -> Arc<TargetState> {
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("no server.refresh within 10s");

    match event {
        Some(Event::ServerRefresh(state)) => state,
        other => panic!("unexpected event: {other:?}"),
    }
}
