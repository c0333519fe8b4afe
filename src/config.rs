use crate::error::{AppError, Result};

pub const UPSTREAM_API_URL: &str = "https://api.warframe.market/v1";

/// Sent on every upstream request.
pub const USER_AGENT: &str = "Market-Relay/1.0";

/// Rolling window the rate limiter counts dispatches over.
pub const RATE_WINDOW_MS: u64 = 1_000;

/// Sleep between rate limiter admission checks while the window is full.
pub const RATE_POLL_INTERVAL_MS: u64 = 50;

/// In-flight upstream requests allowed per unit of `requests_per_second`.
pub const IN_FLIGHT_FACTOR: usize = 2;

/// Upper bound on a caller-supplied batch size.
pub const MAX_BATCH_SIZE: usize = 50;

/// How often the job sweeper looks for expired jobs (seconds).
pub const JOB_SWEEP_INTERVAL_SECS: u64 = 60;

/// Submission defaults, applied when the request omits a constraint.
pub mod defaults {
    pub const MIN_PROFIT: i64 = 10;
    pub const MAX_INVESTMENT: i64 = 0;
    pub const MAX_ORDER_AGE_DAYS: u32 = 30;
    pub const BATCH_SIZE: usize = 3;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstream_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Global upstream request cap per rolling second (REQUESTS_PER_SECOND)
    pub requests_per_second: usize,
    /// Case-insensitive substring an item's display name must contain to be analysed
    /// (TRADEABLE_MARKER). Empty means every submitted item is analysed.
    pub tradeable_marker: String,
    /// Seconds a finished job stays pollable (JOB_RETENTION_SECS). 0 keeps jobs forever.
    pub job_retention_secs: u64,
    /// Per-request upstream timeout (UPSTREAM_TIMEOUT_SECS)
    pub upstream_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            upstream_api_url: std::env::var("UPSTREAM_API_URL")
                .unwrap_or_else(|_| UPSTREAM_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "order_metadata.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            requests_per_second: std::env::var("REQUESTS_PER_SECOND")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .unwrap_or(5),
            tradeable_marker: std::env::var("TRADEABLE_MARKER")
                .unwrap_or_else(|_| "prime".to_string())
                .trim()
                .to_lowercase(),
            job_retention_secs: std::env::var("JOB_RETENTION_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse::<u64>()
                .unwrap_or(3600),
            upstream_timeout_secs: std::env::var("UPSTREAM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
        })
    }
}
