//! RegistrationBridge - Turns proxy connections into scheduler targets
//!
//! A miner opening a connection through the proxy is treated as a discovery
//! signal. The bridge forwards `proxy.connected` / `proxy.disconnected` to the
//! scheduler, which performs the create-or-update and the immediate poll as
//! one step inside its own loop.

use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use crate::events::{Event, EventBus, Subscription};

use super::scheduler::SchedulerHandle;

pub struct RegistrationBridge {
    events: Subscription,
    scheduler: SchedulerHandle,
}

impl RegistrationBridge {
    pub fn new(bus: &EventBus, scheduler: SchedulerHandle) -> Self {
        Self {
            events: bus.subscribe("proxy.*"),
            scheduler,
        }
    }

    /// Subscribe right away and forward in a background task
    ///
    /// Subscribing happens before this returns, so no notification published
    /// afterwards is missed.
    pub fn spawn(bus: &EventBus, scheduler: SchedulerHandle) -> JoinHandle<()> {
        tokio::spawn(Self::new(bus, scheduler).run())
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting registration bridge");

        while let Some(event) = self.events.recv().await {
            let result = match event {
                Event::ProxyConnected { address, defaults } => {
                    debug!("{address} connected through proxy");
                    self.scheduler.connected(address, defaults).await
                }
                Event::ProxyDisconnected { address } => {
                    debug!("{address} disconnected from proxy");
                    self.scheduler.disconnected(address).await
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                error!("scheduler unavailable: {e:#}");
                break;
            }
        }

        debug!("registration bridge stopped");
    }
}
