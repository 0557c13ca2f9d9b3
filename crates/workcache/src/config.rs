use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::strategy::CacheStrategy;

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
    /// The default log level, overridden by `RUST_LOG`.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
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
            prefix: "workcache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configures the logging system.
    pub logging: Logging,

    /// Configures statsd reporting.
    pub metrics: Metrics,

    /// The strategy applied by [`WorkCache::handle`](crate::WorkCache::handle).
    pub default_strategy: CacheStrategy,

    /// How long to wait for a spawned task to report that it started.
    #[serde(with = "humantime_serde")]
    pub scheduling_timeout: Duration,

    /// The interval at which [`wait_until`](crate::wait_until) re-checks its predicate.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: Logging::default(),
            metrics: Metrics::default(),
            default_strategy: CacheStrategy::CacheUntilCompletionOrCancellation,
            scheduling_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
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

#[derive(Debug)]
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::get(None).unwrap();
        assert_eq!(
            cfg.default_strategy,
            CacheStrategy::CacheUntilCompletionOrCancellation
        );
        assert_eq!(cfg.scheduling_timeout, Duration::from_secs(10));
        assert_eq!(cfg.poll_interval, Duration::from_millis(10));
        assert_eq!(cfg.logging.level, LevelFilter::INFO);
        assert_eq!(cfg.metrics.prefix, "workcache");
    }

    #[test]
    fn test_partial_config() {
        // Setting individual values should not affect the defaults of the others.
        let yaml = r#"
            default_strategy: cancel_and_retry
            scheduling_timeout: 1m 30s
            logging:
              level: debug
              format: json
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.default_strategy, CacheStrategy::CancelAndRetry);
        assert_eq!(cfg.scheduling_timeout, Duration::from_secs(90));
        assert_eq!(cfg.poll_interval, Duration::from_millis(10));
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_config() {
        let err = Config::from_reader("  \n".as_bytes()).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"config file empty");
    }

    #[test]
    fn test_invalid_strategy() {
        let yaml = "default_strategy: first_come_first_served";
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }

    #[test]
    fn test_invalid_level() {
        let yaml = r#"
            logging:
              level: verbose
        "#;
        assert!(Config::from_reader(yaml.as_bytes()).is_err());
    }
}
