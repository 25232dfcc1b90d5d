use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;

use crate::pattern::{Pattern, PatternError};
use crate::state::{TargetDescriptor, TargetSettings};
use crate::util::{
    DEFAULT_INTERVAL, DEFAULT_MARK_DOWN_AFTER, DEFAULT_MINER_PORT, DEFAULT_PROXY_PORT,
    DEFAULT_RETRY_AFTER_DOWN, DEFAULT_TIMEOUT, DEFAULT_WALLET_PORT, DEFAULT_WATCHDOG_MULTIPLIER,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid discovery pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: PatternError,
    },

    #[error("{field} of {owner} must be greater than zero")]
    Zero { owner: String, field: &'static str },
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub discovery: Vec<DiscoveryConfig>,

    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    pub wallet: Option<WalletConfig>,

    pub proxy: Option<ProxyConfig>,

    /// Dashboard and WebSocket server
    pub api: Option<ApiConfig>,
}

/// Fallback values for every per-target field
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Defaults {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_mark_down_after")]
    pub mark_down_after: u32,
    #[serde(default = "default_retry_after_down")]
    pub retry_after_down: u64,

    /// Factor applied to a probe's timeout to get its hard watchdog
    #[serde(default = "default_watchdog_multiplier")]
    pub watchdog_multiplier: u32,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            port: default_port(),
            timeout: default_timeout(),
            interval: default_interval(),
            mark_down_after: default_mark_down_after(),
            retry_after_down: default_retry_after_down(),
            watchdog_multiplier: default_watchdog_multiplier(),
        }
    }
}

/// Per-target fields that may be set on a discovery, server or proxy entry
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct TargetOverrides {
    pub port: Option<u16>,
    pub timeout: Option<u64>,
    pub interval: Option<u64>,
    pub mark_down_after: Option<u32>,
    pub retry_after_down: Option<u64>,
}

impl TargetOverrides {
    fn apply(&self, defaults: &Defaults) -> TargetSettings {
        TargetSettings {
            port: self.port.unwrap_or(defaults.port),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            interval: self.interval.unwrap_or(defaults.interval),
            mark_down_after: self.mark_down_after.unwrap_or(defaults.mark_down_after),
            retry_after_down: self.retry_after_down.unwrap_or(defaults.retry_after_down),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiscoveryConfig {
    pub pattern: String,
    #[serde(flatten)]
    pub overrides: TargetOverrides,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServerConfig {
    pub ip: IpAddr,
    #[serde(flatten)]
    pub overrides: TargetOverrides,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_local_ip")]
    pub ip: IpAddr,
    #[serde(default = "default_wallet_port")]
    pub port: u16,
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Request timeout, falls back to the default target timeout
    pub timeout: Option<u64>,
    #[serde(alias = "b58PubKey")]
    pub b58_pubkey: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_any_ip")]
    pub proxy_ip: IpAddr,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default = "default_local_ip")]
    pub wallet_ip: IpAddr,
    /// Mining port of the wallet node
    #[serde(default = "default_proxy_port")]
    pub wallet_port: u16,
    /// Settings for targets registered through the proxy
    #[serde(flatten)]
    pub overrides: TargetOverrides,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_bind")]
    pub bind: SocketAddr,
    /// Seconds between two WebSocket pings
    #[serde(default = "default_ping")]
    pub ping: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
            ping: default_ping(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_MINER_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL
}

fn default_mark_down_after() -> u32 {
    DEFAULT_MARK_DOWN_AFTER
}

fn default_retry_after_down() -> u64 {
    DEFAULT_RETRY_AFTER_DOWN
}

fn default_watchdog_multiplier() -> u32 {
    DEFAULT_WATCHDOG_MULTIPLIER
}

fn default_wallet_port() -> u16 {
    DEFAULT_WALLET_PORT
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_local_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_any_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_api_bind() -> SocketAddr {
    SocketAddr::new(default_local_ip(), 8080)
}

fn default_ping() -> u64 {
    30
}

pub fn read_config_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let config: Config = serde_json::from_str(&file_content)?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

/// A discovery entry with its pattern parsed
#[derive(Debug, Clone)]
pub struct ResolvedDiscovery {
    pub pattern: Pattern,
    pub settings: TargetSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWallet {
    pub url: String,
    pub b58_pubkey: Option<String>,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProxy {
    pub listen: SocketAddr,
    pub upstream: SocketAddr,
    pub defaults: TargetSettings,
}

/// Validated configuration, ready to start the monitor from
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub discoveries: Vec<ResolvedDiscovery>,
    pub servers: Vec<TargetDescriptor>,
    pub watchdog_multiplier: u32,
    pub wallet: Option<ResolvedWallet>,
    pub proxy: Option<ResolvedProxy>,
    pub api: Option<ApiConfig>,
}

impl Config {
    /// Fill in defaults, parse patterns and reject zero intervals
    ///
    /// Sections with `enabled: false` resolve to `None`.
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let defaults = &self.defaults;
        non_zero("defaults", "watchdog_multiplier", defaults.watchdog_multiplier.into())?;

        let discoveries = self
            .discovery
            .iter()
            .map(|entry| {
                let pattern =
                    Pattern::parse(&entry.pattern).map_err(|source| ConfigError::Pattern {
                        pattern: entry.pattern.clone(),
                        source,
                    })?;
                let settings = entry.overrides.apply(defaults);
                validate_settings(&entry.pattern, &settings)?;
                Ok(ResolvedDiscovery { pattern, settings })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let servers = self
            .servers
            .iter()
            .map(|entry| {
                let settings = entry.overrides.apply(defaults);
                validate_settings(&entry.ip.to_string(), &settings)?;
                Ok(TargetDescriptor::new(entry.ip, settings))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let wallet = match &self.wallet {
            Some(wallet) if wallet.enabled => {
                let timeout = wallet.timeout.unwrap_or(defaults.timeout);
                non_zero("wallet", "interval", wallet.interval)?;
                non_zero("wallet", "timeout", timeout)?;
                Some(ResolvedWallet {
                    url: format!("http://{}", SocketAddr::new(wallet.ip, wallet.port)),
                    b58_pubkey: wallet.b58_pubkey.clone().filter(|key| !key.trim().is_empty()),
                    interval: Duration::from_secs(wallet.interval),
                    timeout: Duration::from_secs(timeout),
                })
            }
            _ => None,
        };

        let proxy = match &self.proxy {
            Some(proxy) if proxy.enabled => {
                let defaults = proxy.overrides.apply(defaults);
                validate_settings("proxy", &defaults)?;
                Some(ResolvedProxy {
                    listen: SocketAddr::new(proxy.proxy_ip, proxy.proxy_port),
                    upstream: SocketAddr::new(proxy.wallet_ip, proxy.wallet_port),
                    defaults,
                })
            }
            _ => None,
        };

        let api = match &self.api {
            Some(api) if api.enabled => {
                non_zero("api", "ping", api.ping)?;
                Some(api.clone())
            }
            _ => None,
        };

        Ok(ResolvedConfig {
            discoveries,
            servers,
            watchdog_multiplier: defaults.watchdog_multiplier,
            wallet,
            proxy,
            api,
        })
    }
}

fn non_zero(owner: &str, field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero {
            owner: owner.to_string(),
            field,
        });
    }
    Ok(())
}

fn validate_settings(owner: &str, settings: &TargetSettings) -> Result<(), ConfigError> {
    non_zero(owner, "timeout", settings.timeout)?;
    non_zero(owner, "interval", settings.interval)?;
    non_zero(owner, "mark_down_after", settings.mark_down_after.into())?;
    non_zero(owner, "retry_after_down", settings.retry_after_down)
}
