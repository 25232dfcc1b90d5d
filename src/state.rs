//! Observable state of monitored miners and the wallet
//!
//! Both records are plain data. They change only through the transition
//! functions below, which keep the metrics snapshot consistent with the
//! status: a snapshot is only meaningful while the status is `success`, and
//! it is zeroed whenever a target is marked down.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-target polling parameters
///
/// These are the values a discovery entry, a static server entry, or the
/// proxy hands to every target it creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSettings {
    pub port: u16,
    /// Idle timeout of a single probe, in seconds
    pub timeout: u64,
    /// Poll interval while the target is healthy or flaky, in seconds
    pub interval: u64,
    /// Consecutive failures after which the target counts as down
    pub mark_down_after: u32,
    /// Poll interval once the target is down, in seconds
    pub retry_after_down: u64,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            port: crate::util::DEFAULT_MINER_PORT,
            timeout: crate::util::DEFAULT_TIMEOUT,
            interval: crate::util::DEFAULT_INTERVAL,
            mark_down_after: crate::util::DEFAULT_MARK_DOWN_AFTER,
            retry_after_down: crate::util::DEFAULT_RETRY_AFTER_DOWN,
        }
    }
}

/// Immutable description of one monitored miner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetDescriptor {
    pub ip: IpAddr,
    #[serde(flatten)]
    pub settings: TargetSettings,
}

impl TargetDescriptor {
    pub fn new(ip: IpAddr, settings: TargetSettings) -> Self {
        Self { ip, settings }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.interval)
    }

    pub fn retry_after_down(&self) -> Duration {
        Duration::from_secs(self.settings.retry_after_down)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Init,
    Success,
    Error,
    /// Reserved for dashboards; the scheduler reports the probe's own classification
    MaybeDown,
    Booting,
}

/// Last metrics reported by a miner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerMetrics {
    pub hash_rate: f64,
    pub accepted: u64,
    pub rejected: u64,
    pub failed: u64,
    pub uptime: u64,
    pub extra_payload: String,
    pub stratum_server: String,
    pub stratum_user: String,
    pub diff: f64,
}

/// Observable state of one target, keyed by its address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetState {
    #[serde(flatten)]
    pub descriptor: TargetDescriptor,
    pub status: TargetStatus,
    #[serde(flatten)]
    pub metrics: MinerMetrics,
    pub error_message: Option<String>,
    pub last_refresh: i64,
    pub wallet_connected: bool,
    pub wallet_connected_time: i64,
}

impl TargetState {
    pub fn new(descriptor: TargetDescriptor, now: i64) -> Self {
        Self {
            descriptor,
            status: TargetStatus::Init,
            metrics: MinerMetrics::default(),
            error_message: None,
            last_refresh: now,
            wallet_connected: false,
            wallet_connected_time: 0,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.descriptor.ip
    }

    pub fn apply_success(&mut self, metrics: MinerMetrics, now: i64) {
        self.status = TargetStatus::Success;
        self.error_message = None;
        self.metrics = metrics;
        self.last_refresh = now;
    }

    /// Record a failed probe
    ///
    /// With `clear` the target is considered down and the snapshot is zeroed;
    /// without it the last known-good metrics stay visible.
    pub fn apply_failure(&mut self, status: TargetStatus, message: String, clear: bool, now: i64) {
        self.status = status;
        self.error_message = Some(message);
        self.last_refresh = now;
        if clear {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.metrics = MinerMetrics::default();
    }

    pub fn mark_wallet_connected(&mut self, now: i64) {
        self.wallet_connected = true;
        self.wallet_connected_time = now;
    }

    pub fn mark_wallet_disconnected(&mut self) {
        self.wallet_connected = false;
        self.wallet_connected_time = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Init,
    Success,
    Error,
}

/// Observable state of the wallet node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletState {
    pub rpc_address: String,
    pub b58_pubkey: Option<String>,
    pub status: WalletStatus,
    pub active_block: Option<u64>,
    pub number_of_accounts: u64,
    pub balance: f64,
    pub block: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub last_refresh: i64,
}

/// Everything one complete wallet chain fetched
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSnapshot {
    pub block_count: u64,
    pub number_of_accounts: u64,
    pub balance: f64,
    pub block: Option<serde_json::Value>,
}

impl WalletState {
    pub fn new(rpc_address: String, b58_pubkey: Option<String>, now: i64) -> Self {
        Self {
            rpc_address,
            b58_pubkey,
            status: WalletStatus::Init,
            active_block: None,
            number_of_accounts: 0,
            balance: 0.0,
            block: None,
            error_message: None,
            last_refresh: now,
        }
    }

    /// Whether a freshly fetched block count matches the block already shown
    pub fn is_current(&self, block_count: u64) -> bool {
        self.active_block == Some(block_count)
    }

    pub fn apply_success(&mut self, snapshot: WalletSnapshot, now: i64) {
        self.status = WalletStatus::Success;
        self.error_message = None;
        self.active_block = Some(snapshot.block_count);
        self.number_of_accounts = snapshot.number_of_accounts;
        self.balance = snapshot.balance;
        self.block = snapshot.block;
        self.last_refresh = now;
    }

    /// Record a failed chain
    ///
    /// The active block is forgotten so the next tick runs the full chain.
    pub fn apply_error(&mut self, message: String, now: i64) {
        self.status = WalletStatus::Error;
        self.error_message = Some(message);
        self.active_block = None;
        self.number_of_accounts = 0;
        self.balance = 0.0;
        self.block = None;
        self.last_refresh = now;
    }
}
