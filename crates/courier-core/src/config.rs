//! Explicit configuration, loaded once at startup and passed to constructors.
//!
//! Every value can come from the environment. `from_lookup` takes the lookup
//! function as a parameter so tests never touch the process environment.

use std::time::Duration;

use thiserror::Error;

use crate::app::BackoffPolicy;
use crate::ports::{DurableSpec, StreamSpec};

pub const DEFAULT_NATS_URL: &str = "nats://127.0.0.1:4222";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid broker url '{0}'")]
    InvalidUrl(String),

    #[error("failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("invalid value for '{key}': {details}")]
    InvalidValue { key: String, details: String },
}

/// Which broker adapter the binaries talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Nats,
    Memory,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub url: String,
    pub stream: String,
    pub subjects: Vec<String>,
    pub consumer: String,
    /// How long a single pull waits for messages before the cycle ends empty.
    pub fetch_expiry: Duration,
    /// Broker-side redelivery timeout for unacknowledged messages.
    pub ack_wait: Duration,
}

impl BrokerConfig {
    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec::new(&self.stream, self.subjects.clone())
    }

    pub fn durable_spec(&self) -> DurableSpec {
        DurableSpec::new(&self.stream, &self.consumer)
            .with_ack_wait(self.ack_wait)
            .with_fetch_expiry(self.fetch_expiry)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_string(),
            stream: "ORDERS".to_string(),
            subjects: vec!["orders.>".to_string()],
            consumer: "durable_processor".to_string(),
            fetch_expiry: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
        }
    }
}

/// Knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Admission gate capacity.
    pub max_in_flight: usize,
    /// Upper bound on messages requested per pull.
    pub pull_batch: usize,
    /// Sleep after a poll cycle that produced nothing.
    pub idle_interval: Duration,
    pub error_backoff: BackoffPolicy,
    /// `None` waits for in-flight work forever on shutdown.
    pub drain_timeout: Option<Duration>,
}

impl DispatchConfig {
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    pub fn with_pull_batch(mut self, n: usize) -> Self {
        self.pull_batch = n;
        self
    }

    pub fn with_idle_interval(mut self, d: Duration) -> Self {
        self.idle_interval = d;
        self
    }

    pub fn with_error_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.error_backoff = policy;
        self
    }

    pub fn with_drain_timeout(mut self, d: Duration) -> Self {
        self.drain_timeout = Some(d);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_in_flight".to_string(),
                details: "must be at least 1".to_string(),
            });
        }
        if self.pull_batch == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pull_batch".to_string(),
                details: "must be at least 1".to_string(),
            });
        }
        self.error_backoff.validate()
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            pull_batch: 10,
            idle_interval: Duration::from_secs(1),
            error_backoff: BackoffPolicy::fixed(Duration::from_secs(1)),
            drain_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BrokerBackend,
    pub broker: BrokerConfig,
    pub dispatch: DispatchConfig,
    /// Bounded consumption session; `None` runs until Ctrl-C.
    pub session: Option<Duration>,
    /// Simulated per-message work in the demo processor.
    pub processing_delay: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend = match lookup("COURIER_BROKER").as_deref() {
            None | Some("nats") => BrokerBackend::Nats,
            Some("memory") => BrokerBackend::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "COURIER_BROKER".to_string(),
                    details: format!("expected 'nats' or 'memory', got '{other}'"),
                });
            }
        };

        let url = env_or_default(&lookup, "NATS_URL", DEFAULT_NATS_URL);
        validate_url(&url)?;

        let subjects: Vec<String> = env_or_default(&lookup, "COURIER_SUBJECTS", "orders.>")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if subjects.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "COURIER_SUBJECTS".to_string(),
                details: "at least one subject is required".to_string(),
            });
        }

        let broker = BrokerConfig {
            url,
            stream: env_or_default(&lookup, "COURIER_STREAM", "ORDERS"),
            subjects,
            consumer: env_or_default(&lookup, "COURIER_CONSUMER", "durable_processor"),
            fetch_expiry: Duration::from_millis(parse_var(&lookup, "COURIER_FETCH_EXPIRY_MS")?.unwrap_or(5_000)),
            ack_wait: Duration::from_secs(parse_var(&lookup, "COURIER_ACK_WAIT_SECS")?.unwrap_or(30)),
        };

        let mut error_backoff =
            BackoffPolicy::fixed(Duration::from_millis(parse_var(&lookup, "COURIER_ERROR_BACKOFF_MS")?.unwrap_or(1_000)));
        if let Some(max) = parse_var::<u32, _>(&lookup, "COURIER_MAX_PULL_FAILURES")? {
            error_backoff = error_backoff.with_max_consecutive_failures(max);
        }

        let dispatch = DispatchConfig {
            max_in_flight: parse_var(&lookup, "COURIER_MAX_IN_FLIGHT")?.unwrap_or(3),
            pull_batch: parse_var(&lookup, "COURIER_PULL_BATCH")?.unwrap_or(10),
            idle_interval: Duration::from_millis(parse_var(&lookup, "COURIER_IDLE_MS")?.unwrap_or(1_000)),
            error_backoff,
            drain_timeout: parse_var(&lookup, "COURIER_DRAIN_TIMEOUT_SECS")?.map(Duration::from_secs),
        };
        dispatch.validate()?;

        Ok(Self {
            backend,
            broker,
            dispatch,
            session: parse_var(&lookup, "COURIER_SESSION_SECS")?.map(Duration::from_secs),
            processing_delay: Duration::from_millis(
                parse_var(&lookup, "COURIER_PROCESSING_DELAY_MS")?.unwrap_or(3_000),
            ),
        })
    }
}

/// Load a variable or fall back to `default`.
pub fn env_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

/// Parse an optional variable; present-but-malformed is an error.
pub fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            }),
    }
}

/// Accepts a comma separated server list such as `nats://a:4222,nats://b:4222`.
pub fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl(url.to_string());

    let mut seen = false;
    for server in url.split(',').map(str::trim) {
        seen = true;
        let (scheme, rest) = server.split_once("://").ok_or_else(invalid)?;
        if !matches!(scheme, "nats" | "tls" | "ws" | "wss") {
            return Err(invalid());
        }
        let authority = rest.split('/').next().unwrap_or_default();
        let host_port = authority.rsplit('@').next().unwrap_or_default();
        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) if !host.ends_with(':') => (host, Some(port)),
            _ => (host_port, None),
        };
        if host.is_empty() {
            return Err(invalid());
        }
        if let Some(port) = port
            && port.parse::<u16>().is_err()
        {
            return Err(invalid());
        }
    }

    if seen { Ok(()) } else { Err(invalid()) }
}
