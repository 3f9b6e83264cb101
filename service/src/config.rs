use clap::builder::TypedValueParser as _;
use crate::logging::TargetLevel;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Consumer group shared by every push service instance.
pub const DEFAULT_CONSUMER_GROUP: &str = "sports-push-consumer-group";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Per-target level overrides, comma-delimited `<target>=<level>` (e.g. `stream=debug,auth=warn`)
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub log_targets: Vec<TargetLevel>,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// Shared secret used to sign and verify handshake tokens (HMAC-SHA256).
    #[arg(long, env)]
    token_secret: Option<String>,

    /// Seconds a handshake token stays valid after its issuance timestamp.
    #[arg(long, env, default_value_t = 300)]
    pub token_validity_secs: u64,

    /// Seconds a token's issuance timestamp may lie in the future before it is rejected.
    #[arg(long, env, default_value_t = 30)]
    pub token_max_future_skew_secs: u64,

    /// IP patterns allowed to connect (exact, trailing wildcard like 192.168.1.*, or CIDR).
    /// Empty means every address not blacklisted is allowed.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub ip_whitelist: Vec<String>,

    /// IP patterns refused before any other check, same forms as the whitelist.
    #[arg(long, env, value_delimiter = ',', use_value_delimiter = true)]
    pub ip_blacklist: Vec<String>,

    /// Seconds between heartbeat sweeps over all live connections.
    #[arg(long, env, default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Capacity of each connection's outbound send queue.
    #[arg(long, env, default_value_t = 256)]
    pub outbound_queue_capacity: usize,

    /// Consumer group this instance joins on every stream.
    #[arg(long, env, default_value = DEFAULT_CONSUMER_GROUP)]
    pub consumer_group: String,

    /// Name of this instance within the consumer group. Derived from the host name when unset.
    #[arg(long, env)]
    consumer_name: Option<String>,

    /// Physical key of the score stream.
    #[arg(long, env, default_value = "match_stream")]
    pub match_stream_key: String,

    /// Physical key of the odds stream.
    #[arg(long, env, default_value = "odds_stream")]
    pub odds_stream_key: String,

    /// Maximum records read from a stream per poll.
    #[arg(long, env, default_value_t = 10)]
    pub read_batch_size: usize,

    /// Milliseconds a poll blocks waiting for new records.
    #[arg(long, env, default_value_t = 2000)]
    pub read_block_ms: u64,

    /// Seconds a record may stay unacknowledged before another group member claims it.
    #[arg(long, env, default_value_t = 60)]
    pub claim_min_idle_secs: u64,

    /// Retries after a failed fan-out before the record is parked in the DLQ.
    #[arg(long, env, default_value_t = 3)]
    pub delivery_max_retries: u32,

    /// Milliseconds per retry step; retry n waits (n + 1) steps.
    #[arg(long, env, default_value_t = 1000)]
    pub delivery_retry_unit_ms: u64,

    /// Seconds between DLQ redelivery sweeps.
    #[arg(long, env, default_value_t = 300)]
    pub dlq_sweep_interval_secs: u64,

    /// Failed redeliveries after which a DLQ entry moves to the poison bucket. Unbounded when unset.
    #[arg(long, env)]
    pub dlq_max_redrives: Option<u32>,

    /// Seconds between delayed-delivery sweeps.
    #[arg(long, env, default_value_t = 60)]
    pub delayed_sweep_interval_secs: u64,

    /// Seconds between purges of expired token blacklist entries.
    #[arg(long, env, default_value_t = 60)]
    pub blacklist_purge_interval_secs: u64,

    /// Seconds between consumer group health checks.
    #[arg(long, env, default_value_t = 600)]
    pub health_check_interval_secs: u64,

    /// Seconds of consumer inactivity that the health check reports as a warning.
    #[arg(long, env, default_value_t = 300)]
    pub consumer_idle_warn_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn token_secret(&self) -> Option<String> {
        self.token_secret.clone()
    }

    pub fn set_token_secret(mut self, token_secret: String) -> Self {
        self.token_secret = Some(token_secret);
        self
    }

    /// Returns the configured consumer name, or `push-service-instance-<host>-<n>`
    /// where `<n>` spreads instances started on the same host.
    pub fn consumer_name(&self) -> String {
        if let Some(name) = &self.consumer_name {
            return name.clone();
        }
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "default".to_string());
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() % 1000)
            .unwrap_or_default();
        format!("push-service-instance-{host}-{suffix}")
    }

    pub fn token_validity(&self) -> Duration {
        Duration::from_secs(self.token_validity_secs)
    }

    pub fn token_max_future_skew(&self) -> Duration {
        Duration::from_secs(self.token_max_future_skew_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }

    pub fn claim_min_idle(&self) -> Duration {
        Duration::from_secs(self.claim_min_idle_secs)
    }

    pub fn delivery_retry_unit(&self) -> Duration {
        Duration::from_millis(self.delivery_retry_unit_ms)
    }

    pub fn dlq_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dlq_sweep_interval_secs)
    }

    pub fn delayed_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.delayed_sweep_interval_secs)
    }

    pub fn blacklist_purge_interval(&self) -> Duration {
        Duration::from_secs(self.blacklist_purge_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn consumer_idle_warn(&self) -> Duration {
        Duration::from_secs(self.consumer_idle_warn_secs)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
