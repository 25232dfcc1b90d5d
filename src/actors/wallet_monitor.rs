//! WalletMonitorActor - Chains the wallet RPC calls on a fixed interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → getblockcount ─┬─ unchanged ──► done (no event)
//!                             └─ new block ──► getwalletaccountscount → getwalletcoins → getblocks
//!                                                                                          │
//!                                          wallet.refresh ◄── WalletState ◄────────────────┘
//!     ↑
//!     └─── Commands (RefreshNow, GetState, Shutdown)
//! ```
//!
//! A failing stage aborts the rest of the chain; the error is still published.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::events::{Event, EventBus};
use crate::state::{WalletSnapshot, WalletState};
use crate::util::unix_now;
use crate::wallet::{RpcError, WalletRpc};

use super::messages::{ChainOutcome, WalletCommand};

/// The four calls of one wallet refresh, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStage {
    BlockCount,
    AccountsCount,
    Balance,
    LatestBlock,
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainStage::BlockCount => "getblockcount",
            ChainStage::AccountsCount => "getwalletaccountscount",
            ChainStage::Balance => "getwalletcoins",
            ChainStage::LatestBlock => "getblocks",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage}: {source}")]
pub struct WalletChainError {
    pub stage: ChainStage,
    #[source]
    pub source: RpcError,
}

trait AtStage<T> {
    fn at(self, stage: ChainStage) -> Result<T, WalletChainError>;
}

impl<T> AtStage<T> for Result<T, RpcError> {
    fn at(self, stage: ChainStage) -> Result<T, WalletChainError> {
        self.map_err(|source| WalletChainError { stage, source })
    }
}

/// Run one refresh chain against `rpc`
///
/// Returns `Ok(None)` when the block count equals `state`'s active block; in
/// that case only `getblockcount` was issued.
pub async fn run_chain(
    rpc: &dyn WalletRpc,
    state: &WalletState,
) -> Result<Option<WalletSnapshot>, WalletChainError> {
    let block_count = rpc.block_count().await.at(ChainStage::BlockCount)?;

    if state.is_current(block_count) {
        trace!("block {block_count} already known");
        return Ok(None);
    }

    let number_of_accounts = rpc.accounts_count().await.at(ChainStage::AccountsCount)?;
    let balance = rpc.balance().await.at(ChainStage::Balance)?;
    let block = rpc.latest_block().await.at(ChainStage::LatestBlock)?;

    Ok(Some(WalletSnapshot {
        block_count,
        number_of_accounts,
        balance,
        block,
    }))
}

/// Actor owning the wallet state
pub struct WalletMonitorActor {
    rpc: Arc<dyn WalletRpc>,

    state: WalletState,

    /// Time between two chains
    interval_duration: Duration,

    /// Bus for `wallet.refresh` events
    bus: EventBus,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<WalletCommand>,
}

impl WalletMonitorActor {
    pub fn new(
        rpc: Arc<dyn WalletRpc>,
        state: WalletState,
        interval_duration: Duration,
        bus: EventBus,
        command_rx: mpsc::Receiver<WalletCommand>,
    ) -> Self {
        Self {
            rpc,
            state,
            interval_duration,
            bus,
            command_rx,
        }
    }

    /// Run the actor's main loop
    ///
    /// The first chain runs right away, then once per interval until a
    /// Shutdown command is received or the command channel is closed.
    #[instrument(skip(self), fields(wallet = %self.state.rpc_address))]
    pub async fn run(mut self) {
        debug!("starting wallet monitor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(WalletCommand::RefreshNow { respond_to }) => {
                            debug!("received RefreshNow command");
                            let outcome = self.refresh().await;
                            let _ = respond_to.send(outcome);
                        }

                        Some(WalletCommand::GetState { respond_to }) => {
                            let _ = respond_to.send(self.state.clone());
                        }

                        Some(WalletCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("wallet monitor stopped");
    }

    async fn refresh(&mut self) -> ChainOutcome {
        let result = run_chain(self.rpc.as_ref(), &self.state).await;
        let now = unix_now();

        let outcome = match result {
            Ok(None) => return ChainOutcome::Unchanged,
            Ok(Some(snapshot)) => {
                debug!("wallet at block {}", snapshot.block_count);
                self.state.apply_success(snapshot, now);
                ChainOutcome::Updated
            }
            Err(error) => {
                warn!("wallet refresh failed: {error}");
                self.state.apply_error(error.to_string(), now);
                ChainOutcome::Failed
            }
        };

        self.bus.publish(Event::WalletRefresh(Arc::new(self.state.clone())));

        outcome
    }
}

/// Handle for controlling the WalletMonitorActor
#[derive(Clone)]
pub struct WalletMonitorHandle {
    sender: mpsc::Sender<WalletCommand>,
}

impl WalletMonitorHandle {
    /// Spawn the wallet monitor; the first chain starts immediately
    pub fn spawn(
        rpc: Arc<dyn WalletRpc>,
        state: WalletState,
        interval: Duration,
        bus: EventBus,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = WalletMonitorActor::new(rpc, state, interval, bus, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a chain right away and report how it ended
    pub async fn refresh_now(&self) -> Result<ChainOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WalletCommand::RefreshNow { respond_to: tx })
            .await
            .context("failed to send RefreshNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn state(&self) -> Result<WalletState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WalletCommand::GetState { respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the wallet monitor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WalletCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
