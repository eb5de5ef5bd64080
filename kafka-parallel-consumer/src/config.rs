use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::backoff::BackoffPolicy;
use crate::client_proxy::commit_queue::{DEFAULT_COMMIT_THRESHOLD, DEFAULT_COMMIT_TIMEOUT};
use crate::error::ConsumerError;

pub const DEFAULT_MAX_DEGREE_OF_PARALLELISM: usize = 10;
pub const DEFAULT_CONSUMER_NAME: &str = "parallel-consumer";

/// How records are grouped into lanes that must be handled sequentially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelismStrategy {
    /// Every record is independent, nothing is serialized.
    Unconstrained,
    /// Records of the same topic partition are handled one at a time, in order.
    PerPartition,
    /// Records of the same topic and key are handled one at a time, in order.
    #[default]
    PerKey,
}

impl ParallelismStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParallelismStrategy::Unconstrained => "unconstrained",
            ParallelismStrategy::PerPartition => "per-partition",
            ParallelismStrategy::PerKey => "per-key",
        }
    }
}

impl fmt::Display for ParallelismStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParallelismStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "unconstrained" => Ok(ParallelismStrategy::Unconstrained),
            "per-partition" | "partition" => Ok(ParallelismStrategy::PerPartition),
            "per-key" | "key" => Ok(ParallelismStrategy::PerKey),
            other => Err(format!("unknown parallelism strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl AutoOffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
        }
    }
}

impl FromStr for AutoOffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" | "smallest" | "beginning" => Ok(AutoOffsetReset::Earliest),
            "latest" | "largest" | "end" => Ok(AutoOffsetReset::Latest),
            other => Err(format!("unknown offset reset policy: {other}")),
        }
    }
}

/// User facing options of a [`crate::ParallelConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Informational name, used in logs. Defaults to the first topic.
    pub name: Option<String>,
    pub max_degree_of_parallelism: usize,
    pub parallelism_strategy: ParallelismStrategy,
    pub topics: Vec<String>,
    pub group_id: String,
    pub bootstrap_servers: String,
    pub auto_offset_reset: AutoOffsetReset,
}

impl ConsumerOptions {
    pub fn new(
        topics: impl IntoIterator<Item = impl Into<String>>,
        group_id: impl Into<String>,
        bootstrap_servers: impl Into<String>,
    ) -> Self {
        Self {
            name: None,
            max_degree_of_parallelism: DEFAULT_MAX_DEGREE_OF_PARALLELISM,
            parallelism_strategy: ParallelismStrategy::default(),
            topics: topics.into_iter().map(Into::into).collect(),
            group_id: group_id.into(),
            bootstrap_servers: bootstrap_servers.into(),
            auto_offset_reset: AutoOffsetReset::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_degree_of_parallelism(mut self, max: usize) -> Self {
        self.max_degree_of_parallelism = max;
        self
    }

    pub fn with_parallelism_strategy(mut self, strategy: ParallelismStrategy) -> Self {
        self.parallelism_strategy = strategy;
        self
    }

    pub fn with_auto_offset_reset(mut self, reset: AutoOffsetReset) -> Self {
        self.auto_offset_reset = reset;
        self
    }

    /// Checks every option and reports all violations in a single error.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        let mut errors = Vec::new();

        if self.max_degree_of_parallelism == 0 {
            errors.push("max_degree_of_parallelism must be greater than 0".to_string());
        }
        if self.group_id.trim().is_empty() {
            errors.push("group_id must be provided".to_string());
        }
        if self.bootstrap_servers.trim().is_empty() {
            errors.push("bootstrap_servers must be provided".to_string());
        }
        if self.topics.is_empty() {
            errors.push("topics is empty, at least one topic must be provided".to_string());
        } else if self.topics.iter().any(|t| t.trim().is_empty()) {
            errors.push("topics must not contain blank entries".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConsumerError::InvalidOptions(errors))
        }
    }

    /// The consumer name with anything but ASCII letters, digits and dashes
    /// replaced by dashes, and no leading or trailing dashes.
    pub fn consumer_name(&self) -> String {
        let raw = self
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.topics.first().map(String::as_str))
            .unwrap_or(DEFAULT_CONSUMER_NAME);

        let sanitized: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        match sanitized.trim_matches('-') {
            "" => DEFAULT_CONSUMER_NAME.to_string(),
            trimmed => trimmed.to_string(),
        }
    }
}

/// Internal knobs. The defaults are what production runs with.
#[derive(Debug, Clone)]
pub struct TuningOptions {
    pub poll_timeout: Duration,
    pub commit_interval: Duration,
    pub commit_threshold: usize,
    pub commit_timeout: Duration,
    pub restart_backoff: BackoffPolicy,
    /// Consecutive restarts before giving up. `None` retries forever.
    pub max_restarts: Option<u32>,
    /// How long a stopping pipeline may take before its tasks are aborted.
    pub shutdown_timeout: Duration,
}

impl Default for TuningOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            commit_interval: Duration::from_secs(5),
            commit_threshold: DEFAULT_COMMIT_THRESHOLD,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            restart_backoff: BackoffPolicy::default(),
            max_restarts: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka configuration
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-parallel-consumer")]
    pub kafka_consumer_group: String,

    // Comma separated
    #[envconfig(default = "events")]
    pub kafka_consumer_topics: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: AutoOffsetReset,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    pub consumer_name: Option<String>,

    // Parallelism configuration
    #[envconfig(default = "10")]
    pub max_degree_of_parallelism: usize,

    #[envconfig(default = "per-key")]
    pub parallelism_strategy: ParallelismStrategy,

    // Commit and poll configuration
    #[envconfig(default = "1000")]
    pub poll_timeout_ms: u64,

    #[envconfig(default = "5")]
    pub commit_interval_secs: u64,

    #[envconfig(default = "50")]
    pub commit_threshold: usize,

    // Restart configuration
    #[envconfig(default = "5")]
    pub restart_min_backoff_secs: u64,

    #[envconfig(default = "300")] // 5 minutes
    pub restart_max_backoff_secs: u64,

    pub max_restarts: Option<u32>,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // Metrics server configuration
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "9102")]
    pub port: u16,
}

impl Config {
    /// Helper to create config with defaults for testing
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    pub fn topics(&self) -> Vec<String> {
        self.kafka_consumer_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        let mut options = ConsumerOptions::new(
            self.topics(),
            self.kafka_consumer_group.clone(),
            self.kafka_hosts.clone(),
        )
        .with_max_degree_of_parallelism(self.max_degree_of_parallelism)
        .with_parallelism_strategy(self.parallelism_strategy)
        .with_auto_offset_reset(self.kafka_consumer_offset_reset);
        options.name = self.consumer_name.clone();
        options
    }

    pub fn tuning_options(&self) -> TuningOptions {
        TuningOptions {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            commit_interval: Duration::from_secs(self.commit_interval_secs),
            commit_threshold: self.commit_threshold,
            commit_timeout: Duration::from_secs(self.commit_interval_secs),
            restart_backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(self.restart_min_backoff_secs),
                max_delay: Duration::from_secs(self.restart_max_backoff_secs),
                ..BackoffPolicy::default()
            },
            max_restarts: self.max_restarts,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
