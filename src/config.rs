//! Configuration types for campaign-dispatch

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

/// Main configuration for the dispatch engine
///
/// Every section has defaults, so an empty JSON document (`{}`) yields a
/// working configuration:
/// - [`persistence`](PersistenceConfig) - SQLite database location
/// - [`dispatch`](DispatchConfig) - batch sizing, chunking, quota policy
/// - [`jobs`](JobsConfig) - worker pool, retry/backoff, timeouts
/// - [`scheduler`](SchedulerConfig) - due-campaign polling
/// - [`provider`](ProviderConfig) - mail transmission endpoint
/// - [`secrets`](SecretsConfig) - credential decryption key
/// - [`api`](ApiConfig) - operator REST API
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Batch dispatcher settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Job runner settings
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Scheduled-campaign poller
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Mail transmission provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Credential decryption
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./campaign-dispatch.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// What to do when the estimated recipient count exceeds the provider's
/// remaining 24-hour allowance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaOverrunPolicy {
    /// Log a warning, emit a `QuotaWarning` event and send anyway; the
    /// provider rejects or queues whatever exceeds its allowance
    #[default]
    Proceed,
    /// Fail the job permanently before any send, leaving the checkpoint
    /// intact so an operator can resume in the next quota window
    Abort,
}

/// Batch dispatcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Contacts read from storage per query (default: 1000)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Smallest batch size regardless of provider rate (default: 10)
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Largest batch size regardless of provider rate (default: 100)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Provider rate multiplier used to size batches (default: 2)
    #[serde(default = "default_rate_multiplier")]
    pub rate_multiplier: u32,

    /// Quota overrun handling (default: proceed)
    #[serde(default)]
    pub quota_overrun: QuotaOverrunPolicy,

    /// In-place retry policy for checkpoint and statistics commits
    ///
    /// A commit that keeps failing surfaces to the job runner; sends never
    /// start without a durable checkpoint.
    #[serde(default = "default_commit_retry")]
    pub commit_retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            rate_multiplier: default_rate_multiplier(),
            quota_overrun: QuotaOverrunPolicy::default(),
            commit_retry: default_commit_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Job runner configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Name of this process's workers, used as the lease owner prefix
    /// (default: "local")
    ///
    /// Must be unique per process sharing a database: at startup, jobs still
    /// leased to this name are treated as orphaned and re-queued.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Number of concurrent job workers in this process (default: 2)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts and backoff applied to every enqueued job
    /// (default: 3 attempts, 5s initial, 5 min cap, x2, jitter)
    #[serde(default = "default_job_retry")]
    pub retry: RetryConfig,

    /// Wall-clock bound for one job execution (default: 1 hour)
    #[serde(default = "default_job_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// How often an idle worker polls for claimable jobs (default: 1000ms)
    #[serde(default = "default_poll_interval", with = "duration_millis_serde")]
    pub poll_interval: Duration,

    /// Extra lease time beyond `timeout` before an active job counts as
    /// stalled (default: 30 seconds)
    #[serde(default = "default_lease_grace", with = "duration_serde")]
    pub lease_grace: Duration,

    /// How often stalled jobs are swept (default: 60 seconds)
    #[serde(default = "default_stalled_check_interval", with = "duration_serde")]
    pub stalled_check_interval: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            workers: default_workers(),
            retry: default_job_retry(),
            timeout: default_job_timeout(),
            poll_interval: default_poll_interval(),
            lease_grace: default_lease_grace(),
            stalled_check_interval: default_stalled_check_interval(),
        }
    }
}

/// Scheduled-campaign poller configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll for due campaigns (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Poll interval (default: 30 seconds)
    #[serde(default = "default_scheduler_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_scheduler_poll_interval(),
        }
    }
}

/// Mail transmission provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider's HTTP API (default: "http://127.0.0.1:8025/v1")
    #[serde(default = "default_provider_endpoint")]
    pub endpoint: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_provider_endpoint(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Credential decryption configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Key used to decrypt stored provider credentials
    ///
    /// Only needed when credentials are stored encrypted; plaintext values
    /// pass through regardless.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./campaign-dispatch.db")
}

fn default_chunk_size() -> usize {
    1000
}

fn default_min_batch_size() -> usize {
    10
}

fn default_max_batch_size() -> usize {
    100
}

fn default_rate_multiplier() -> u32 {
    2
}

fn default_commit_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_node_name() -> String {
    "local".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_job_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(300),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lease_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_stalled_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_scheduler_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_provider_endpoint() -> String {
    "http://127.0.0.1:8025/v1".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
