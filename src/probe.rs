//! Miner probe over the raw TCP line protocol
//!
//! One probe is one short-lived connection: connect, write a single trigger
//! byte, read one JSON document, close. A miner that answers `{}` is alive
//! but still booting.
//!
//! ```text
//! connect ──► write " " ──► read until a full JSON document / EOF ──► close
//!    │             │                 │
//!    └── idle timeout applies to every step; the watchdog bounds the whole exchange
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, instrument, trace};

use crate::state::{MinerMetrics, TargetDescriptor, TargetStatus};

const TRIGGER: &[u8] = b" ";

const BOOTING_RESPONSE: &str = "{}";

/// Upper bound for a single miner response
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Empty response, miner is probably booting, stay tuned...")]
    Booting,

    #[error("Server not reachable, timeout after {0}s")]
    Timeout(u64),

    #[error("Socket problem, no result after {0}s")]
    Watchdog(u64),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed without a response")]
    NoResponse,

    #[error("Response exceeds {MAX_RESPONSE_BYTES} bytes")]
    ResponseTooLarge,

    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Probe superseded by a newer probe")]
    Superseded,
}

impl ProbeError {
    /// Status a target takes when a probe fails this way
    pub fn status(&self) -> TargetStatus {
        match self {
            ProbeError::Booting => TargetStatus::Booting,
            _ => TargetStatus::Error,
        }
    }
}

type ProbeResult = Result<MinerMetrics, ProbeError>;

/// Anything that can fetch the current metrics of a target
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &TargetDescriptor) -> Result<MinerMetrics, ProbeError>;
}

/// Wire format of a miner report
///
/// Some miner builds misspell the stratum keys, both spellings are accepted.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MinerReport {
    speed: f64,
    accepted: u64,
    rejected: u64,
    failed: u64,
    uptime: u64,
    extrapayload: String,
    #[serde(rename = "stratum.server", alias = "statum.server")]
    stratum_server: String,
    #[serde(rename = "stratum.user", alias = "statum.user")]
    stratum_user: String,
    diff: f64,
}

impl From<MinerReport> for MinerMetrics {
    fn from(report: MinerReport) -> Self {
        MinerMetrics {
            hash_rate: report.speed,
            accepted: report.accepted,
            rejected: report.rejected,
            failed: report.failed,
            uptime: report.uptime,
            extra_payload: report.extrapayload,
            stratum_server: report.stratum_server,
            stratum_user: report.stratum_user,
            diff: report.diff,
        }
    }
}

/// Turn a raw response into metrics or a classified failure
pub fn parse_response(raw: &[u8]) -> Result<MinerMetrics, ProbeError> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();

    if text.is_empty() {
        return Err(ProbeError::NoResponse);
    }

    if text == BOOTING_RESPONSE {
        return Err(ProbeError::Booting);
    }

    let report: MinerReport = serde_json::from_str(text)?;
    Ok(report.into())
}

type Sockets = Arc<Mutex<HashMap<IpAddr, (u64, AbortHandle)>>>;

fn lock(sockets: &Sockets) -> MutexGuard<'_, HashMap<IpAddr, (u64, AbortHandle)>> {
    sockets.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered connection
///
/// Dropping the lease closes the socket and forgets it, whether the probe
/// finished or the probing future was dropped half way.
struct SocketLease {
    sockets: Sockets,
    ip: IpAddr,
    ticket: u64,
    task: AbortHandle,
}

impl Drop for SocketLease {
    fn drop(&mut self) {
        self.task.abort();
        let mut sockets = lock(&self.sockets);
        if sockets.get(&self.ip).is_some_and(|(owner, _)| *owner == self.ticket) {
            sockets.remove(&self.ip);
        }
    }
}

/// TCP probe that keeps at most one open connection per address
///
/// Starting a probe for an address that still has a connection open closes
/// the old connection first; the older probe resolves with
/// [`ProbeError::Superseded`].
#[derive(Clone)]
pub struct TcpProbe {
    watchdog_multiplier: u32,
    sockets: Sockets,
    next_ticket: Arc<AtomicU64>,
}

impl TcpProbe {
    pub fn new(watchdog_multiplier: u32) -> Self {
        Self {
            watchdog_multiplier: watchdog_multiplier.max(1),
            sockets: Sockets::default(),
            next_ticket: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of connections currently held open
    pub fn open_connections(&self) -> usize {
        lock(&self.sockets).len()
    }

    /// Hard deadline of a whole exchange, in seconds
    fn watchdog_secs(&self, timeout: u64) -> u64 {
        timeout.saturating_mul(u64::from(self.watchdog_multiplier))
    }

    /// Close any connection still open to `address.ip()`, then start a new one
    fn open(&self, address: SocketAddr, idle: Duration) -> (JoinHandle<ProbeResult>, SocketLease) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut sockets = lock(&self.sockets);

        if let Some((_, previous)) = sockets.remove(&address.ip()) {
            debug!("closing previous connection to {}", address.ip());
            previous.abort();
        }

        let task = tokio::spawn(exchange(address, idle));
        sockets.insert(address.ip(), (ticket, task.abort_handle()));

        let lease = SocketLease {
            sockets: self.sockets.clone(),
            ip: address.ip(),
            ticket,
            task: task.abort_handle(),
        };
        (task, lease)
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(crate::util::DEFAULT_WATCHDOG_MULTIPLIER)
    }
}

#[async_trait]
impl Probe for TcpProbe {
    #[instrument(skip(self, target), fields(target = %target.ip))]
    async fn probe(&self, target: &TargetDescriptor) -> ProbeResult {
        let address = SocketAddr::new(target.ip, target.settings.port);
        let watchdog_secs = self.watchdog_secs(target.settings.timeout);

        let (task, lease) = self.open(address, target.timeout());

        let result = match timeout(Duration::from_secs(watchdog_secs), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_cancelled() => Err(ProbeError::Superseded),
            Ok(Err(join_error)) => Err(ProbeError::Io(std::io::Error::other(join_error))),
            Err(_) => Err(ProbeError::Watchdog(watchdog_secs)),
        };

        drop(lease);
        result
    }
}

/// Full socket lifecycle of one probe
async fn exchange(address: SocketAddr, idle: Duration) -> ProbeResult {
    let secs = idle.as_secs();

    trace!("connecting to {address}");
    let mut stream = timeout(idle, TcpStream::connect(address))
        .await
        .map_err(|_| ProbeError::Timeout(secs))??;

    timeout(idle, stream.write_all(TRIGGER))
        .await
        .map_err(|_| ProbeError::Timeout(secs))??;

    let mut response = Vec::new();
    let mut buffer = [0u8; 4096];

    loop {
        let read = timeout(idle, stream.read(&mut buffer))
            .await
            .map_err(|_| ProbeError::Timeout(secs))??;

        if read == 0 {
            break;
        }

        response.extend_from_slice(&buffer[..read]);

        if response.len() > MAX_RESPONSE_BYTES {
            return Err(ProbeError::ResponseTooLarge);
        }

        if is_complete(&response) {
            break;
        }
    }

    // the peer may already be gone, closing is best effort
    let _ = stream.shutdown().await;
    trace!("received {} bytes from {address}", response.len());

    parse_response(&response)
}

fn is_complete(response: &[u8]) -> bool {
    serde_json::from_slice::<serde_json::Value>(response).is_ok()
}
