pub mod config;
pub mod error;
pub mod ledger;
pub mod monitor_core;

pub use config::{ConfigError, MonitorConfig};
pub use error::MonitorError;
pub use ledger::{JsonRpcLedgerClient, LedgerRpc, RpcError};
pub use monitor_core::{BurnEvent, MetricsSnapshot};
