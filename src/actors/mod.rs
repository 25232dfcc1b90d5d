//! Actor-based monitoring engine
//!
//! Each actor runs as an independent tokio task and is controlled through a
//! cloneable handle. State changes are published on the shared event bus.
//!
//! ## Architecture Overview
//!
//! ```text
//!        ┌────────────────┐   proxy.connected / proxy.disconnected
//!        │  ProxyMonitor  │──────────────────────┐
//!        └────────────────┘                      │
//!                                                ▼
//!   ┌──────────────────────┐  commands   ┌──────────────────────┐
//!   │ RegistrationBridge   │────────────►│   TargetScheduler    │──► TcpProbe (one task per armed poll)
//!   └──────────────────────┘             └──────────┬───────────┘
//!                                                   │ server.refresh
//!   ┌──────────────────────┐                        ▼
//!   │ WalletMonitorActor   │── wallet.refresh ──► EventBus ──► dashboard / WebSocket
//!   └──────────────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **TargetScheduler**: Owns every target, arms one poll per target, applies the backoff policy
//! - **WalletMonitorActor**: Runs the four-step wallet RPC chain on a fixed interval
//! - **RegistrationBridge**: Turns proxy connection notifications into scheduler commands
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Actors publish to the event bus for fan-out
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod registration;
pub mod scheduler;
pub mod wallet_monitor;
