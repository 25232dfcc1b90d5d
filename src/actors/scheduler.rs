//! TargetScheduler - Polls every miner on its own timer
//!
//! The scheduler owns the full target map. Each target has at most one armed
//! poll at a time: a task that waits for the poll delay, probes the miner and
//! reports the result back to the scheduler. Only after that result has been
//! applied is the next poll armed, so polls are sequential per target and
//! parallel across targets.
//!
//! ## Backoff State Machine
//!
//! ```text
//! probe ok                          → errors = 0, status success, next poll after `interval`
//! probe failed, errors <  threshold → status from probe, metrics kept,    next poll after `interval`
//! probe failed, errors >= threshold → status from probe, metrics cleared, next poll after `retry_after_down`
//! ```
//!
//! Every applied result publishes one `server.refresh` event.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::ResolvedDiscovery;
use crate::events::{Event, EventBus};
use crate::probe::Probe;
use crate::state::{TargetDescriptor, TargetSettings, TargetState};
use crate::util::unix_now;

use super::messages::{ProbeOutcome, SchedulerCommand};

/// What a failed probe does to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Below the mark-down threshold, keep polling at the normal interval
    Flaky,
    /// Threshold reached, clear the metrics and back off to `retry_after_down`
    Down,
}

impl Backoff {
    pub fn after_failures(settings: &TargetSettings, consecutive_errors: u32) -> Self {
        if consecutive_errors >= settings.mark_down_after {
            Backoff::Down
        } else {
            Backoff::Flaky
        }
    }

    pub fn delay(self, descriptor: &TargetDescriptor) -> Duration {
        match self {
            Backoff::Flaky => descriptor.interval(),
            Backoff::Down => descriptor.retry_after_down(),
        }
    }

    pub fn clears_metrics(self) -> bool {
        matches!(self, Backoff::Down)
    }
}

/// Build the initial target set
///
/// Discovery patterns are expanded first; explicit server entries are laid
/// over them and win on address collisions.
pub fn seed_targets(
    discoveries: &[ResolvedDiscovery],
    servers: &[TargetDescriptor],
) -> BTreeMap<IpAddr, TargetDescriptor> {
    let mut targets = BTreeMap::new();

    for discovery in discoveries {
        for ip in discovery.pattern.addresses() {
            let ip = IpAddr::V4(ip);
            targets.insert(ip, TargetDescriptor::new(ip, discovery.settings));
        }
    }

    for server in servers {
        targets.insert(server.ip, *server);
    }

    targets
}

/// Scheduling bookkeeping and state of a single target
struct TargetEntry {
    state: TargetState,
    consecutive_errors: u32,
    /// Bumped every time a poll is armed or cancelled
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl TargetEntry {
    fn new(descriptor: TargetDescriptor) -> Self {
        Self {
            state: TargetState::new(descriptor, unix_now()),
            consecutive_errors: 0,
            generation: 0,
            pending: None,
        }
    }
}

/// Actor owning all targets and their poll timers
pub struct TargetScheduler {
    targets: BTreeMap<IpAddr, TargetEntry>,

    /// Transport used by every poll
    probe: Arc<dyn Probe>,

    /// Bus for `server.refresh` events
    bus: EventBus,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Poll tasks report their results here
    outcome_tx: mpsc::UnboundedSender<ProbeOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<ProbeOutcome>,
}

impl TargetScheduler {
    pub fn new(
        targets: impl IntoIterator<Item = TargetDescriptor>,
        probe: Arc<dyn Probe>,
        bus: EventBus,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        Self {
            targets: targets
                .into_iter()
                .map(|descriptor| (descriptor.ip, TargetEntry::new(descriptor)))
                .collect(),
            probe,
            bus,
            command_rx,
            outcome_tx,
            outcome_rx,
        }
    }

    /// Run the actor's main loop
    ///
    /// Every known target is polled once right away. The loop runs until a
    /// Shutdown command is received or the command channel is closed.
    #[instrument(skip(self), fields(targets = self.targets.len()))]
    pub async fn run(mut self) {
        debug!("starting target scheduler");

        let initial: Vec<IpAddr> = self.targets.keys().copied().collect();
        for ip in initial {
            self.schedule(ip, Duration::ZERO);
        }

        loop {
            tokio::select! {
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome);
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(SchedulerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        let all: Vec<IpAddr> = self.targets.keys().copied().collect();
        for ip in all {
            self.cancel_pending(ip);
        }

        debug!("target scheduler stopped");
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::PollNow { ip, respond_to } => {
                let known = self.targets.contains_key(&ip);
                if known {
                    debug!("{ip}: poll requested");
                    self.schedule(ip, Duration::ZERO);
                }
                let _ = respond_to.send(known);
            }

            SchedulerCommand::Connected { ip, defaults } => self.connected(ip, defaults),

            SchedulerCommand::Disconnected { ip } => self.disconnected(ip),

            SchedulerCommand::GetState { ip, respond_to } => {
                let _ = respond_to.send(self.targets.get(&ip).map(|entry| entry.state.clone()));
            }

            SchedulerCommand::Snapshot { respond_to } => {
                let states = self
                    .targets
                    .values()
                    .map(|entry| entry.state.clone())
                    .collect();
                let _ = respond_to.send(states);
            }

            SchedulerCommand::GetErrorCount { ip, respond_to } => {
                let errors = self.targets.get(&ip).map(|entry| entry.consecutive_errors);
                let _ = respond_to.send(errors);
            }

            SchedulerCommand::Shutdown => {}
        }
    }

    /// Create the target if needed, flag it as wallet-connected and poll it
    fn connected(&mut self, ip: IpAddr, defaults: TargetSettings) {
        let now = unix_now();
        let entry = self.targets.entry(ip).or_insert_with(|| {
            info!("{ip}: registering target seen by proxy");
            TargetEntry::new(TargetDescriptor::new(ip, defaults))
        });
        entry.state.mark_wallet_connected(now);

        self.schedule(ip, Duration::ZERO);
    }

    fn disconnected(&mut self, ip: IpAddr) {
        let Some(entry) = self.targets.get_mut(&ip) else {
            trace!("{ip}: disconnect for unknown target ignored");
            return;
        };
        entry.state.mark_wallet_disconnected();

        self.schedule(ip, Duration::ZERO);
    }

    /// Cancel whatever is armed for `ip`, in flight or waiting
    fn cancel_pending(&mut self, ip: IpAddr) {
        if let Some(entry) = self.targets.get_mut(&ip) {
            entry.generation += 1;
            if let Some(task) = entry.pending.take() {
                task.abort();
            }
        }
    }

    /// Arm the next poll of `ip` after `delay`
    ///
    /// Any poll already armed for the target is cancelled first.
    fn schedule(&mut self, ip: IpAddr, delay: Duration) {
        self.cancel_pending(ip);

        let Some(entry) = self.targets.get_mut(&ip) else {
            return;
        };

        let generation = entry.generation;
        let descriptor = entry.state.descriptor;
        let probe = self.probe.clone();
        let outcome_tx = self.outcome_tx.clone();

        trace!("{ip}: next poll in {delay:?}");

        entry.pending = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let result = probe.probe(&descriptor).await;

            // the scheduler may be gone during shutdown
            let _ = outcome_tx.send(ProbeOutcome {
                ip,
                generation,
                result,
            });
        }));
    }

    fn handle_outcome(&mut self, outcome: ProbeOutcome) {
        let ProbeOutcome {
            ip,
            generation,
            result,
        } = outcome;

        let Some(entry) = self.targets.get_mut(&ip) else {
            return;
        };

        if entry.generation != generation {
            trace!("{ip}: dropping result of a cancelled poll");
            return;
        }

        entry.pending = None;
        let now = unix_now();
        let descriptor = entry.state.descriptor;

        let delay = match result {
            Ok(metrics) => {
                entry.consecutive_errors = 0;
                entry.state.apply_success(metrics, now);
                debug!("{ip}: probe succeeded");
                descriptor.interval()
            }
            Err(error) => {
                entry.consecutive_errors = entry.consecutive_errors.saturating_add(1);
                let backoff =
                    Backoff::after_failures(&descriptor.settings, entry.consecutive_errors);

                warn!(
                    "{ip}: probe failed ({}/{}): {error}",
                    entry.consecutive_errors, descriptor.settings.mark_down_after
                );

                entry.state.apply_failure(
                    error.status(),
                    error.to_string(),
                    backoff.clears_metrics(),
                    now,
                );
                backoff.delay(&descriptor)
            }
        };

        self.bus.publish(Event::ServerRefresh(Arc::new(entry.state.clone())));

        self.schedule(ip, delay);
    }
}

/// Handle for controlling the TargetScheduler
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Spawn the scheduler and start polling every target
    pub fn spawn(
        targets: impl IntoIterator<Item = TargetDescriptor>,
        probe: Arc<dyn Probe>,
        bus: EventBus,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = TargetScheduler::new(targets, probe, bus, cmd_rx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Poll a target immediately, bypassing its timer
    ///
    /// Returns `false` if the target is unknown.
    pub async fn poll_now(&self, ip: IpAddr) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::PollNow { ip, respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn connected(&self, ip: IpAddr, defaults: TargetSettings) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Connected { ip, defaults })
            .await
            .context("failed to send Connected command")
    }

    pub async fn disconnected(&self, ip: IpAddr) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Disconnected { ip })
            .await
            .context("failed to send Disconnected command")
    }

    pub async fn state(&self, ip: IpAddr) -> Result<Option<TargetState>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetState { ip, respond_to: tx })
            .await
            .context("failed to send GetState command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn snapshot(&self) -> Result<Vec<TargetState>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Snapshot { respond_to: tx })
            .await
            .context("failed to send Snapshot command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn consecutive_errors(&self, ip: IpAddr) -> Result<Option<u32>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetErrorCount { ip, respond_to: tx })
            .await
            .context("failed to send GetErrorCount command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the scheduler
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
