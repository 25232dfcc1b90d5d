use chrono::Utc;

pub const DEFAULT_MINER_PORT: u16 = 7111;

pub const DEFAULT_TIMEOUT: u64 = 3;

pub const DEFAULT_INTERVAL: u64 = 10;

pub const DEFAULT_MARK_DOWN_AFTER: u32 = 20;

pub const DEFAULT_RETRY_AFTER_DOWN: u64 = 600;

/// The probe watchdog fires after `timeout * DEFAULT_WATCHDOG_MULTIPLIER` seconds.
pub const DEFAULT_WATCHDOG_MULTIPLIER: u32 = 200;

pub const DEFAULT_WALLET_PORT: u16 = 4003;

pub const DEFAULT_PROXY_PORT: u16 = 4009;

/// Current unix time in seconds, the resolution every state timestamp uses.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
