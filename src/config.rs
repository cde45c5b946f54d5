use std::env;
use std::time::Duration;

/// Refresh cadence floor; anything lower is raised to this
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 5;
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 86_400;
pub const MAX_FALLBACK_INTERVAL_SECS: u64 = 2 * MAX_REFRESH_INTERVAL_SECS;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_FALLBACK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;
pub const DEFAULT_CHANNEL_BUFFER: usize = 1000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub token_type: String,
    pub treasury_object_id: String,
    /// Address whose coin listing is summed into circulating supply
    pub coin_owner: String,
    /// Fixed decimals; `None` means resolve once from token metadata at startup
    pub token_decimals: Option<u8>,
    pub topics: Vec<String>,
    pub refresh_interval: Duration,
    pub fallback_interval: Duration,
    pub history_capacity: usize,
    pub channel_buffer: usize,
    pub retry_initial_secs: u64,
    pub retry_max_secs: u64,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `LEDGER_RPC_URL` (required, http/https)
    /// - `LEDGER_WS_URL` (default: RPC URL with ws/wss scheme)
    /// - `TOKEN_TYPE` (required)
    /// - `TREASURY_OBJECT_ID` (required)
    /// - `COIN_OWNER` (default: TREASURY_OBJECT_ID)
    /// - `TOKEN_DECIMALS` (default: from token metadata)
    /// - `BURN_EVENT_TOPICS` (comma-separated, default: `<package>::<module>::BurnEvent`)
    /// - `REFRESH_INTERVAL_SECS` (default: 15, floor 5)
    /// - `FALLBACK_INTERVAL_SECS` (default: 60, always above the refresh interval)
    /// - `HISTORY_CAPACITY` (default: 50)
    /// - `CHANNEL_BUFFER` (default: 1000)
    /// - `RETRY_INITIAL_SECS` / `RETRY_MAX_SECS` (default: 5 / 60)
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = required("LEDGER_RPC_URL")?;
        if !rpc_url.starts_with("http://") && !rpc_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "LEDGER_RPC_URL must start with http:// or https://".to_string(),
            ));
        }

        let ws_url = env::var("LEDGER_WS_URL").unwrap_or_else(|_| derive_ws_url(&rpc_url));

        let token_type = required("TOKEN_TYPE")?;
        let treasury_object_id = required("TREASURY_OBJECT_ID")?;
        let coin_owner = env::var("COIN_OWNER").unwrap_or_else(|_| treasury_object_id.clone());

        let token_decimals = match env::var("TOKEN_DECIMALS") {
            Ok(raw) => Some(raw.trim().parse::<u8>().map_err(|_| {
                ConfigError::InvalidValue(format!("TOKEN_DECIMALS must be 0-255, got '{}'", raw))
            })?),
            Err(_) => None,
        };

        let topics = env::var("BURN_EVENT_TOPICS")
            .map(|s| parse_topics(&s))
            .unwrap_or_else(|_| default_topics(&token_type));

        let refresh_secs = parse_or_default("REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS);
        let fallback_secs =
            parse_or_default("FALLBACK_INTERVAL_SECS", DEFAULT_FALLBACK_INTERVAL_SECS);

        let mut config = Self {
            rpc_url,
            ws_url,
            token_type,
            treasury_object_id,
            coin_owner,
            token_decimals,
            topics,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            fallback_interval: Duration::from_secs(fallback_secs),
            history_capacity: parse_or_default("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY).max(1),
            channel_buffer: parse_or_default("CHANNEL_BUFFER", DEFAULT_CHANNEL_BUFFER).max(1),
            retry_initial_secs: parse_or_default("RETRY_INITIAL_SECS", 5u64).max(1),
            retry_max_secs: parse_or_default("RETRY_MAX_SECS", 60u64).max(1),
        };
        config.set_refresh_interval(refresh_secs);

        Ok(config)
    }

    /// Apply a refresh interval, enforcing the floor and keeping the
    /// fallback cadence slower than the refresh cadence
    pub fn set_refresh_interval(&mut self, secs: u64) {
        self.refresh_interval = Duration::from_secs(clamp_refresh_interval(secs));
        self.fallback_interval =
            fallback_interval_above(self.fallback_interval, self.refresh_interval);
    }

    /// `--refresh-interval <secs>` from the command line, if given
    pub fn refresh_override_from_args() -> Option<u64> {
        let args: Vec<String> = env::args().collect();
        parse_refresh_override(&args)
    }
}

pub fn clamp_refresh_interval(secs: u64) -> u64 {
    if secs < MIN_REFRESH_INTERVAL_SECS {
        log::warn!(
            "Refresh interval {}s is below the {}s floor, using {}s",
            secs,
            MIN_REFRESH_INTERVAL_SECS,
            MIN_REFRESH_INTERVAL_SECS
        );
        MIN_REFRESH_INTERVAL_SECS
    } else if secs > MAX_REFRESH_INTERVAL_SECS {
        log::warn!(
            "Refresh interval {}s is above the {}s ceiling, using {}s",
            secs,
            MAX_REFRESH_INTERVAL_SECS,
            MAX_REFRESH_INTERVAL_SECS
        );
        MAX_REFRESH_INTERVAL_SECS
    } else {
        secs
    }
}

/// Fallback cadence strictly slower than `refresh`, capped at
/// `MAX_FALLBACK_INTERVAL_SECS`
pub fn fallback_interval_above(fallback: Duration, refresh: Duration) -> Duration {
    let refresh_secs = refresh.as_secs();
    let secs = fallback.as_secs().min(MAX_FALLBACK_INTERVAL_SECS);
    if secs > refresh_secs {
        return Duration::from_secs(secs);
    }

    let raised = refresh_secs.saturating_add(1);
    log::warn!(
        "Fallback interval {}s must exceed refresh interval {}s, using {}s",
        fallback.as_secs(),
        refresh_secs,
        raised
    );
    Duration::from_secs(raised)
}

fn parse_refresh_override(args: &[String]) -> Option<u64> {
    let idx = args.iter().position(|x| x == "--refresh-interval")?;
    match args.get(idx + 1).map(|s| s.parse::<u64>()) {
        Some(Ok(secs)) => Some(secs),
        _ => {
            log::warn!("Ignoring --refresh-interval without a numeric value");
            None
        }
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))
}

fn parse_or_default<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', defaulting to {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// `0xpkg::module::TOKEN` -> `0xpkg::module::BurnEvent`
fn default_topics(token_type: &str) -> Vec<String> {
    let mut parts: Vec<&str> = token_type.split("::").collect();
    if parts.len() < 3 {
        return Vec::new();
    }
    parts.truncate(2);
    vec![format!("{}::BurnEvent", parts.join("::"))]
}

fn derive_ws_url(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        rpc_url.to_string()
    }
}
