use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for optionsd.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "optionsd".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Sizing and freshness of the request pipeline.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of requests in flight, queued or being processed.
    ///
    /// Requests arriving while this many are in flight are rejected as overloaded.
    pub queue_capacity: usize,

    /// Entries younger than this are served without contacting the upstream.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Entries younger than this, but older than `ttl`, are served stale while a background
    /// refresh runs. Older entries are treated like a cache miss.
    #[serde(with = "humantime_serde")]
    pub swr_window: Duration,

    /// Upper bound for a single upstream fetch.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,

    /// Maximum number of cached entries.
    ///
    /// `None` keeps every entry for the lifetime of the process.
    pub max_entries: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            ttl: Duration::from_secs(60),
            swr_window: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
            max_entries: None,
        }
    }
}

impl PipelineConfig {
    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("pipeline.queue_capacity must be at least 1");
        }
        if self.ttl >= self.swr_window {
            anyhow::bail!(
                "pipeline.ttl ({:?}) must be shorter than pipeline.swr_window ({:?})",
                self.ttl,
                self.swr_window
            );
        }
        if self.max_entries == Some(0) {
            anyhow::bail!("pipeline.max_entries must be at least 1 when set");
        }
        Ok(())
    }
}

/// Connection to the upstream market data provider.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the Yahoo Finance compatible API.
    pub base_url: Url,

    /// Risk-free rate reported alongside every option.
    pub risk_free_rate: f64,

    /// Timeout for establishing a connection to the upstream.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single HTTP request, including reading the body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How often a failed request is retried before giving up.
    pub max_retries: u32,

    /// The `User-Agent` header sent upstream.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            risk_free_rate: 0.045,
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
            max_retries: 3,
            user_agent: concat!("optionsd/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse("https://query2.finance.yahoo.com/").expect("static URL is valid")
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_owned()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Request pipeline and cache settings.
    pub pipeline: PipelineConfig,

    /// Upstream market data settings.
    pub upstream: UpstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            pipeline: PipelineConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the given YAML file, or the defaults if no path is given.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            )?,
            None => Config::default(),
        };
        config.pipeline.validate()?;
        Ok(config)
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
