use std::collections::HashMap;
use std::time::Duration;

use planbridge_erp::executor::DEFAULT_MAX_TRANSACTIONS_PER_CALL;
use planbridge_worker::bulk::DEFAULT_CHUNK_SIZE;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Operation requests per progress step of a bulk correction (default: `50`).
    pub job_chunk_size: usize,
    pub erp: ErpConfig,
    pub stream: StreamConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                       |
    /// | `JOB_CHUNK_SIZE`       | `50`                       |
    ///
    /// See [`ErpConfig::from_env`] and [`StreamConfig::from_env`] for the
    /// rest.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let job_chunk_size: usize = std::env::var("JOB_CHUNK_SIZE")
            .unwrap_or_else(|_| DEFAULT_CHUNK_SIZE.to_string())
            .parse()
            .expect("JOB_CHUNK_SIZE must be a valid usize");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            job_chunk_size,
            erp: ErpConfig::from_env(),
            stream: StreamConfig::from_env(),
        }
    }
}

/// Remote ERP connection settings.
#[derive(Debug, Clone)]
pub struct ErpConfig {
    /// Base URL per environment id.
    pub endpoints: HashMap<String, String>,
    pub bearer_token: String,
    pub request_timeout_secs: u64,
    pub max_transactions_per_call: usize,
}

impl ErpConfig {
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `ERP_ENDPOINTS`                 | (none)  |
    /// | `ERP_BEARER_TOKEN`              | (empty) |
    /// | `ERP_REQUEST_TIMEOUT_SECS`      | `120`   |
    /// | `ERP_MAX_TRANSACTIONS_PER_CALL` | `100`   |
    ///
    /// `ERP_ENDPOINTS` is a comma-separated list of `env=url` pairs, e.g.
    /// `prod=https://erp.example.com/m3api,test=https://erp-test.example.com`.
    /// Rate budgets (`ERP_RATE_<ENV>`) are read lazily by the admission
    /// controller.
    pub fn from_env() -> Self {
        let endpoints = parse_endpoints(&std::env::var("ERP_ENDPOINTS").unwrap_or_default())
            .unwrap_or_else(|e| panic!("Invalid ERP_ENDPOINTS: {e}"));

        let bearer_token = std::env::var("ERP_BEARER_TOKEN").unwrap_or_default();

        let request_timeout_secs: u64 = std::env::var("ERP_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "120".into())
            .parse()
            .expect("ERP_REQUEST_TIMEOUT_SECS must be a valid u64");

        let max_transactions_per_call: usize = std::env::var("ERP_MAX_TRANSACTIONS_PER_CALL")
            .unwrap_or_else(|_| DEFAULT_MAX_TRANSACTIONS_PER_CALL.to_string())
            .parse()
            .expect("ERP_MAX_TRANSACTIONS_PER_CALL must be a valid usize");

        Self {
            endpoints,
            bearer_token,
            request_timeout_secs,
            max_transactions_per_call,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Parse `env=url,env=url`. Blank input yields no endpoints.
pub fn parse_endpoints(raw: &str) -> Result<HashMap<String, String>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (env, url) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected env=url, got '{entry}'"))?;
            let (env, url) = (env.trim(), url.trim());
            if env.is_empty() || url.is_empty() {
                return Err(format!("expected env=url, got '{entry}'"));
            }
            Ok((env.to_string(), url.to_string()))
        })
        .collect()
}

/// Live stream gateway timing.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Interval between heartbeat frames. Keep below proxy idle timeouts.
    pub heartbeat_interval: Duration,
    /// Deadline for a single frame write.
    pub write_timeout: Duration,
    /// Delay between the terminal frame and closing the stream.
    pub close_grace: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(15),
            write_timeout: Duration::from_secs(10),
            close_grace: Duration::from_millis(500),
        }
    }
}

impl StreamConfig {
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `STREAM_HEARTBEAT_SECS`     | `15`    |
    /// | `STREAM_WRITE_TIMEOUT_SECS` | `10`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let heartbeat_secs: u64 = std::env::var("STREAM_HEARTBEAT_SECS")
            .map(|v| v.parse().expect("STREAM_HEARTBEAT_SECS must be a valid u64"))
            .unwrap_or(defaults.heartbeat_interval.as_secs());

        let write_timeout_secs: u64 = std::env::var("STREAM_WRITE_TIMEOUT_SECS")
            .map(|v| v.parse().expect("STREAM_WRITE_TIMEOUT_SECS must be a valid u64"))
            .unwrap_or(defaults.write_timeout.as_secs());

        Self {
            heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
            write_timeout: Duration::from_secs(write_timeout_secs.max(1)),
            ..defaults
        }
    }
}
