pub mod actors;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod events;
pub mod pattern;
pub mod probe;
pub mod proxy;
pub mod state;
pub mod util;
pub mod wallet;

pub use events::{Event, EventBus};
pub use state::{MinerMetrics, TargetDescriptor, TargetSettings, TargetState, WalletState};
