//! Last-value cache shared by all API handlers

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::events::{Event, EventBus, Subscription};
use crate::state::{TargetState, WalletState};

#[derive(Debug, Default)]
struct Cache {
    wallet: Option<Arc<WalletState>>,
    servers: BTreeMap<IpAddr, Arc<TargetState>>,
}

/// Shared state passed to all API handlers
///
/// The cache is fed from the event bus, so handlers never talk to the actors.
#[derive(Clone)]
pub struct DashboardState {
    cache: Arc<RwLock<Cache>>,

    /// Bus for WebSocket streaming
    pub bus: EventBus,

    /// Interval between two WebSocket pings
    pub ping: Duration,
}

impl DashboardState {
    /// Subscribe to refresh events and keep the cache up to date in the background
    pub fn spawn(bus: EventBus, ping: Duration) -> Self {
        let state = Self {
            cache: Arc::default(),
            bus: bus.clone(),
            ping,
        };

        let events = bus.subscribe("*.refresh");
        tokio::spawn(state.clone().follow(events));

        state
    }

    async fn follow(self, mut events: Subscription) {
        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        debug!("event bus closed, dashboard cache frozen");
    }

    pub async fn apply(&self, event: Event) {
        let mut cache = self.cache.write().await;
        match event {
            Event::ServerRefresh(state) => {
                trace!("caching state of {}", state.ip());
                cache.servers.insert(state.ip(), state);
            }
            Event::WalletRefresh(state) => {
                cache.wallet = Some(state);
            }
            _ => {}
        }
    }

    pub async fn wallet(&self) -> Option<Arc<WalletState>> {
        self.cache.read().await.wallet.clone()
    }

    /// All known targets, ordered by address
    pub async fn servers(&self) -> Vec<Arc<TargetState>> {
        self.cache.read().await.servers.values().cloned().collect()
    }
}
