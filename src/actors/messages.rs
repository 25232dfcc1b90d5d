//! Message types for actor communication
//!
//! ## Design Principles
//!
//! 1. **Commands**: Request/response messages sent to specific actors via mpsc
//! 2. **Events**: State changes leave the actors only through the [`EventBus`](crate::events::EventBus)
//! 3. **Snapshots**: Query responses carry owned copies, never references into actor state

use std::net::IpAddr;

use tokio::sync::oneshot;

use crate::probe::ProbeError;
use crate::state::{MinerMetrics, TargetSettings, TargetState, WalletState};

/// Commands that can be sent to the TargetScheduler
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Poll a target right away, cancelling its pending timer
    ///
    /// Answers `false` if the address is unknown.
    PollNow {
        ip: IpAddr,
        respond_to: oneshot::Sender<bool>,
    },

    /// A connection from `ip` was seen by the proxy
    ///
    /// Creates the target with `defaults` if it does not exist yet, marks it
    /// as wallet-connected and polls it immediately.
    Connected {
        ip: IpAddr,
        defaults: TargetSettings,
    },

    /// A connection from `ip` was closed
    Disconnected { ip: IpAddr },

    /// Get the current state of one target
    GetState {
        ip: IpAddr,
        respond_to: oneshot::Sender<Option<TargetState>>,
    },

    /// Get the state of every target, ordered by address
    Snapshot {
        respond_to: oneshot::Sender<Vec<TargetState>>,
    },

    /// Get the consecutive failure count of one target
    GetErrorCount {
        ip: IpAddr,
        respond_to: oneshot::Sender<Option<u32>>,
    },

    /// Gracefully shut down the scheduler
    ///
    /// Pending timers and in-flight probes are cancelled.
    Shutdown,
}

/// Result of one armed poll, sent back to the scheduler by the poll task
#[derive(Debug)]
pub struct ProbeOutcome {
    pub ip: IpAddr,

    /// Generation of the poll that produced this result
    ///
    /// Results of superseded polls are dropped.
    pub generation: u64,

    pub result: Result<MinerMetrics, ProbeError>,
}

/// How a wallet refresh ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
    /// The block count did not change, nothing else was fetched
    Unchanged,

    /// All four calls succeeded and the state was updated
    Updated,

    /// A call failed and the state was set to error
    Failed,
}

/// Commands that can be sent to the WalletMonitorActor
#[derive(Debug)]
pub enum WalletCommand {
    /// Run the refresh chain immediately
    RefreshNow {
        respond_to: oneshot::Sender<ChainOutcome>,
    },

    /// Get the current wallet state
    GetState {
        respond_to: oneshot::Sender<WalletState>,
    },

    /// Gracefully shut down the wallet monitor
    Shutdown,
}
