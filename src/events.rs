//! Process-wide publish/subscribe bus
//!
//! The bus is created once at startup and handed to every actor that
//! publishes or consumes events. Topics are dot-separated; subscriptions use
//! patterns where `*` matches one segment and `**` matches the rest.
//!
//! ```text
//! TargetScheduler ──server.refresh──┐
//! WalletMonitor   ──wallet.refresh──┼──► EventBus ──► dashboard, registration bridge
//! ProxyMonitor    ──proxy.*─────────┘
//! ```

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::state::{TargetSettings, TargetState, WalletState};

pub const SERVER_REFRESH: &str = "server.refresh";
pub const WALLET_REFRESH: &str = "wallet.refresh";
pub const PROXY_CONNECTED: &str = "proxy.connected";
pub const PROXY_DISCONNECTED: &str = "proxy.disconnected";

/// An event on the bus
///
/// State payloads are shared; consumers only get read access.
#[derive(Debug, Clone)]
pub enum Event {
    ServerRefresh(Arc<TargetState>),
    WalletRefresh(Arc<WalletState>),
    ProxyConnected {
        address: IpAddr,
        defaults: TargetSettings,
    },
    ProxyDisconnected {
        address: IpAddr,
    },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::ServerRefresh(_) => SERVER_REFRESH,
            Event::WalletRefresh(_) => WALLET_REFRESH,
            Event::ProxyConnected { .. } => PROXY_CONNECTED,
            Event::ProxyDisconnected { .. } => PROXY_DISCONNECTED,
        }
    }
}

/// Topic pattern with `*` and `**` wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<String>,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            segments: pattern.split('.').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        let topic: Vec<&str> = topic.split('.').collect();
        matches_segments(&self.segments, &topic)
    }
}

fn matches_segments(pattern: &[String], topic: &[&str]) -> bool {
    match (pattern.split_first(), topic.split_first()) {
        (None, None) => true,
        (Some((head, _)), _) if head == "**" => true,
        (Some((head, rest)), Some((segment, topic_rest))) => {
            (head == "*" || head == segment) && matches_segments(rest, topic_rest)
        }
        _ => false,
    }
}

/// Handle to the bus, cheap to clone
///
/// Every subscriber owns an unbounded queue and the topic filter runs at
/// publish time, so a slow subscriber only grows its own backlog and never
/// loses events.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

#[derive(Debug)]
struct Subscriber {
    pattern: TopicPattern,
    sender: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to every current subscriber whose pattern matches
    ///
    /// Publishing without subscribers is not an error.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let mut subscribers = self.subscribers();
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());

        let mut receivers = 0;
        for subscriber in subscribers.iter() {
            if subscriber.pattern.matches(topic)
                && subscriber.sender.send(event.clone()).is_ok()
            {
                receivers += 1;
            }
        }

        match receivers {
            0 => trace!("no receivers for {topic}"),
            n => trace!("published {topic} to {n} receivers"),
        }
    }

    pub fn subscribe(&self, pattern: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers().push(Subscriber {
            pattern: TopicPattern::new(pattern),
            sender,
        });
        Subscription { receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers()
            .iter()
            .filter(|subscriber| !subscriber.sender.is_closed())
            .count()
    }
}

/// A filtered view of the bus
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    /// Wait for the next matching event
    ///
    /// Returns `None` once every handle to the bus is gone and the backlog
    /// is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}
