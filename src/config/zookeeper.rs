/// Bounded backoff tuning for retryable coordination-service errors.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial backoff, in milliseconds, before the first retry.
    #[serde(default = "RetryConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the backoff between retries, in milliseconds.
    #[serde(default = "RetryConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Maximum number of retries before a retryable error is surfaced anyway.
    #[serde(default = "RetryConfig::default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> RetryConfig {
        RetryConfig {
            initial_backoff_ms: RetryConfig::default_initial_backoff_ms(),
            max_backoff_ms: RetryConfig::default_max_backoff_ms(),
            max_retries: RetryConfig::default_max_retries(),
        }
    }
}

impl RetryConfig {
    fn default_initial_backoff_ms() -> u64 { 50 }
    fn default_max_backoff_ms() -> u64 { 2000 }
    fn default_max_retries() -> u32 { 8 }
}


/// Zookeeper distributed coordination configuration options.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct ZookeeperConfig {
    /// Zookeeper ensemble connection string.
    #[serde(default = "ZookeeperConfig::default_ensemble")]
    pub ensemble: String,

    /// Backoff tuning applied to retryable coordination-service errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Zookeeper session timeout (in seconds).
    #[serde(default = "ZookeeperConfig::default_timeout")]
    pub timeout: u64,
}

impl Default for ZookeeperConfig {
    fn default() -> ZookeeperConfig {
        ZookeeperConfig {
            ensemble: ZookeeperConfig::default_ensemble(),
            retry: RetryConfig::default(),
            timeout: ZookeeperConfig::default_timeout(),
        }
    }
}

impl ZookeeperConfig {
    fn default_ensemble() -> String { "localhost:2181/zooky".into() }
    fn default_timeout() -> u64 { 10 }
}
