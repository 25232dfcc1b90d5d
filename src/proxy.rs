//! Pass-through TCP proxy in front of the wallet's mining port
//!
//! Miners connect here instead of directly to the wallet. Every accepted
//! connection is relayed unchanged to the wallet and reported on the event
//! bus, once when it opens and once when it closes.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ResolvedProxy;
use crate::events::{Event, EventBus};
use crate::state::TargetSettings;

pub struct ProxyMonitor {
    listener: TcpListener,
    upstream: SocketAddr,
    defaults: TargetSettings,
    bus: EventBus,
}

impl ProxyMonitor {
    pub async fn bind(config: &ResolvedProxy, bus: EventBus) -> Result<Self> {
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind proxy to {}", config.listen))?;

        Ok(Self {
            listener,
            upstream: config.upstream,
            defaults: config.defaults,
            bus,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(skip(self), fields(upstream = %self.upstream))]
    pub async fn run(self) {
        if let Ok(address) = self.listener.local_addr() {
            info!("proxy listening on {address}");
        }

        loop {
            match self.listener.accept().await {
                Ok((inbound, peer)) => {
                    let address = peer.ip().to_canonical();
                    tokio::spawn(relay(
                        inbound,
                        address,
                        self.upstream,
                        self.defaults,
                        self.bus.clone(),
                    ));
                }
                Err(e) => warn!("failed to accept proxy connection: {e}"),
            }
        }
    }
}

/// Relay one connection and report its lifecycle
async fn relay(
    mut inbound: TcpStream,
    address: IpAddr,
    upstream: SocketAddr,
    defaults: TargetSettings,
    bus: EventBus,
) {
    debug!("{address} connected");
    bus.publish(Event::ProxyConnected { address, defaults });

    match TcpStream::connect(upstream).await {
        Ok(mut outbound) => match copy_bidirectional(&mut inbound, &mut outbound).await {
            Ok((sent, received)) => {
                trace!("{address}: closed after {sent} bytes up, {received} bytes down")
            }
            Err(e) => debug!("{address}: relay ended: {e}"),
        },
        Err(e) => warn!("{address}: wallet at {upstream} unreachable: {e}"),
    }

    debug!("{address} disconnected");
    bus.publish(Event::ProxyDisconnected { address });
}
