//! Run settings: command-line flags layered over an optional TOML file.
//!
//! Precedence is flag (or its environment variable), then config file, then
//! the built-in defaults below.

use super::duration::parse_duration;
use anyhow::Context;
use clap::{Args, ValueEnum};
use loyalty_store::PostgresOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_NODE: &str = "127.0.0.1";
pub const DEFAULT_KAFKA_BROKERS: &str = "127.0.0.1:9092";
pub const DEFAULT_TOPIC: &str = "test";
pub const DEFAULT_ITERATIONS: u64 = 100_000;
pub const DEFAULT_BATCH_SIZE: u64 = 100;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(10);

/// Which store backs the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process partitioned store (CQL subset)
    #[default]
    #[value(name = "memory")]
    Memory,
    /// PostgreSQL via tokio-postgres
    #[value(name = "postgres")]
    Postgres,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct RunOpts {
    /// TOML file providing defaults for the flags below
    #[arg(long, value_name = "PATH", env = "LOYALTY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Store backend
    #[arg(long, value_enum, env = "LOYALTY_STORE")]
    pub store: Option<StoreKind>,

    /// Store nodes, tried in order (comma separated)
    #[arg(long, value_delimiter = ',', env = "LOYALTY_NODES")]
    pub nodes: Option<Vec<String>>,

    /// PostgreSQL user
    #[arg(long, env = "LOYALTY_PG_USER")]
    pub pg_user: Option<String>,

    /// PostgreSQL password
    #[arg(long, env = "LOYALTY_PG_PASSWORD")]
    pub pg_password: Option<String>,

    /// PostgreSQL database
    #[arg(long, env = "LOYALTY_PG_DATABASE")]
    pub pg_database: Option<String>,

    /// PostgreSQL port
    #[arg(long, env = "LOYALTY_PG_PORT")]
    pub pg_port: Option<u16>,

    /// Kafka bootstrap servers
    #[arg(long, env = "LOYALTY_KAFKA_BROKERS")]
    pub kafka_brokers: Option<String>,

    /// Topic clip messages are published to
    #[arg(long, env = "LOYALTY_TOPIC")]
    pub topic: Option<String>,

    /// Number of clip batches
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Clip events per batch
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Sleep between batches (e.g. "1s", "250ms"; "0" disables pacing)
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Delay between schema creation and preparing statements
    #[arg(long, value_parser = parse_duration)]
    pub settle: Option<Duration>,

    /// Seed for the clip event generator
    #[arg(long)]
    pub seed: Option<u64>,

    /// Publish to an in-process bus instead of Kafka
    #[arg(long)]
    pub dry_run: bool,

    /// Write run metrics as JSON to this file
    #[arg(long, value_name = "PATH")]
    pub metrics_output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    store: Option<StoreKind>,
    nodes: Option<Vec<String>>,
    postgres: PostgresSection,
    kafka: KafkaSection,
    run: RunSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PostgresSection {
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct KafkaSection {
    brokers: Option<String>,
    topic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RunSection {
    iterations: Option<u64>,
    batch_size: Option<u64>,
    interval: Option<String>,
    settle: Option<String>,
    seed: Option<u64>,
    dry_run: Option<bool>,
}

impl FileConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreKind,
    pub nodes: Vec<String>,
    pub postgres: PostgresOptions,
    pub kafka_brokers: String,
    pub topic: String,
    pub iterations: u64,
    pub batch_size: u64,
    pub interval: Duration,
    pub settle: Duration,
    pub seed: u64,
    pub dry_run: bool,
    pub metrics_output: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            nodes: vec![DEFAULT_NODE.to_string()],
            postgres: PostgresOptions::default(),
            kafka_brokers: DEFAULT_KAFKA_BROKERS.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            iterations: DEFAULT_ITERATIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
            settle: DEFAULT_SETTLE,
            seed: 0,
            dry_run: false,
            metrics_output: None,
        }
    }
}

impl Settings {
    /// Resolve flags against the config file (if any) and the defaults.
    pub fn resolve(opts: &RunOpts) -> anyhow::Result<Self> {
        let file = match &opts.config {
            Some(path) => {
                info!("Loading config from {}", path.display());
                FileConfig::load(path)?
            }
            None => FileConfig::default(),
        };
        Self::merge(opts, file)
    }

    fn merge(opts: &RunOpts, file: FileConfig) -> anyhow::Result<Self> {
        let defaults = Settings::default();

        let file_interval = file
            .run
            .interval
            .as_deref()
            .map(parse_duration)
            .transpose()
            .context("Invalid run.interval in config file")?;
        let file_settle = file
            .run
            .settle
            .as_deref()
            .map(parse_duration)
            .transpose()
            .context("Invalid run.settle in config file")?;

        let nodes = opts
            .nodes
            .clone()
            .or(file.nodes)
            .unwrap_or(defaults.nodes);
        let nodes: Vec<String> = nodes
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if nodes.is_empty() {
            anyhow::bail!("At least one store node is required");
        }

        let batch_size = opts
            .batch_size
            .or(file.run.batch_size)
            .unwrap_or(defaults.batch_size);
        if batch_size == 0 {
            anyhow::bail!("Batch size must be at least 1");
        }

        let pg_defaults = defaults.postgres;
        let postgres = PostgresOptions {
            port: opts.pg_port.or(file.postgres.port).unwrap_or(pg_defaults.port),
            user: opts
                .pg_user
                .clone()
                .or(file.postgres.user)
                .unwrap_or(pg_defaults.user),
            password: opts.pg_password.clone().or(file.postgres.password),
            database: opts
                .pg_database
                .clone()
                .or(file.postgres.database)
                .unwrap_or(pg_defaults.database),
            connect_timeout: pg_defaults.connect_timeout,
        };

        let seed = match opts.seed.or(file.run.seed) {
            Some(seed) => seed,
            None => {
                let seed = chrono::Utc::now()
                    .timestamp_nanos_opt()
                    .unwrap_or_default()
                    .unsigned_abs();
                info!("No seed given, using {}", seed);
                seed
            }
        };

        Ok(Self {
            store: opts.store.or(file.store).unwrap_or(defaults.store),
            nodes,
            postgres,
            kafka_brokers: opts
                .kafka_brokers
                .clone()
                .or(file.kafka.brokers)
                .unwrap_or(defaults.kafka_brokers),
            topic: opts
                .topic
                .clone()
                .or(file.kafka.topic)
                .unwrap_or(defaults.topic),
            iterations: opts
                .iterations
                .or(file.run.iterations)
                .unwrap_or(defaults.iterations),
            batch_size,
            interval: opts.interval.or(file_interval).unwrap_or(defaults.interval),
            settle: opts.settle.or(file_settle).unwrap_or(defaults.settle),
            seed,
            dry_run: opts.dry_run || file.run.dry_run.unwrap_or(false),
            metrics_output: opts.metrics_output.clone(),
        })
    }

    /// Total clip events the run will issue.
    pub fn total_clips(&self) -> u64 {
        self.iterations.saturating_mul(self.batch_size)
    }
}
