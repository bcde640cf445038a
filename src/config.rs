//! Runtime configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,

    /// The number of workers to run per pipeline stage.
    #[serde(default = "Config::default_workers_count")]
    pub workers_count: usize,
    /// The maximum number of aggregation fan-out batches allowed in flight
    /// system-wide, regardless of how many combine workers are running.
    #[serde(default = "Config::default_max_parallel_agg_requests")]
    pub max_parallel_agg_requests: usize,
    /// The capacity of the channels linking the pipeline stages.
    #[serde(default = "Config::default_channel_capacity")]
    pub channel_capacity: usize,

    /// An optional brand-equality predicate applied by the filter stage.
    #[serde(default)]
    pub filter_brand: Option<String>,
    /// An optional price ceiling applied by the filter stage.
    #[serde(default)]
    pub filter_max_price: Option<u64>,

    /// The offer sources each seeded item will aggregate.
    #[serde(default = "Config::default_sources")]
    pub sources: Vec<String>,
    /// The number of items the demo producer seeds into the pipeline.
    #[serde(default = "Config::default_seed_items")]
    pub seed_items: u64,
    /// An optional number of seconds after which the app triggers shutdown on its own.
    #[serde(default)]
    pub run_for_seconds: Option<u64>,

    /// The base latency of a simulated offer source call, in milliseconds.
    #[serde(default = "Config::default_source_latency_ms")]
    pub source_latency_ms: u64,
    /// The latency of a simulated booking call, in milliseconds.
    #[serde(default = "Config::default_booking_latency_ms")]
    pub booking_latency_ms: u64,
    /// The latency of a simulated booking cancellation call, in milliseconds.
    #[serde(default = "Config::default_cancel_latency_ms")]
    pub cancel_latency_ms: u64,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds
    /// the application config from that. In the future, this may take into
    /// account an optional config file as well.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::from_env().context("error building config from env")?;
        Ok(config)
    }

    /// Create a config instance for use in tests.
    #[cfg(test)]
    pub fn new_test() -> Result<Self> {
        let config: Config = envy::from_iter(vec![
            ("RUST_LOG".into(), "error".into()),
            ("WORKERS_COUNT".into(), "2".into()),
            ("MAX_PARALLEL_AGG_REQUESTS".into(), "2".into()),
            ("CHANNEL_CAPACITY".into(), "64".into()),
            ("SEED_ITEMS".into(), "3".into()),
            ("SOURCE_LATENCY_MS".into(), "5".into()),
            ("BOOKING_LATENCY_MS".into(), "5".into()),
            ("CANCEL_LATENCY_MS".into(), "1".into()),
        ])
        .context("error building test config")?;
        Ok(config)
    }

    fn default_workers_count() -> usize {
        4
    }

    fn default_max_parallel_agg_requests() -> usize {
        3
    }

    fn default_channel_capacity() -> usize {
        1000
    }

    fn default_sources() -> Vec<String> {
        vec!["yandex".into(), "belka".into(), "delimobil".into()]
    }

    fn default_seed_items() -> u64 {
        10
    }

    fn default_source_latency_ms() -> u64 {
        1000
    }

    fn default_booking_latency_ms() -> u64 {
        1000
    }

    fn default_cancel_latency_ms() -> u64 {
        1000
    }
}
