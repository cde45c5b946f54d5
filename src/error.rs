use crate::config::ConfigError;
use crate::ledger::RpcError;

/// Exit code for failures before the first snapshot exists
pub const EXIT_STARTUP_FAILURE: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("startup failed: {0}")]
    Startup(#[from] RpcError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::Config(_) | MonitorError::Startup(_) => EXIT_STARTUP_FAILURE,
            MonitorError::Io(_) => 1,
        }
    }
}
