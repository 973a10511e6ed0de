//! Command-line interface for loyalty-clips
//!
//! # Usage Examples
//!
//! ```bash
//! # Seed both record families and run 1000 batches of 100 clips, publishing
//! # each clip to the "test" topic
//! loyalty-clips simulate --iterations 1000
//!
//! # Same against PostgreSQL, messages kept in process
//! loyalty-clips simulate --store postgres --nodes 10.0.0.5,10.0.0.6 \
//!   --pg-user loyalty --pg-database loyalty --dry-run
//!
//! # Seed coupons, then read every zip partition back one at a time
//! loyalty-clips load-read --settle 0
//!
//! # Create the clip topic (3 partitions, replication 1)
//! loyalty-clips create-topic --kafka-brokers 127.0.0.1:9092 --topic test
//! ```
//!
//! Every flag can also come from a TOML file passed with `--config`; flags
//! on the command line win.

use anyhow::Context;
use clap::{Parser, Subcommand};
use loyalty_bus::{KafkaBus, MemoryBus, MessageBus, DEFAULT_PARTITIONS};
use loyalty_clips::{lifecycle, run_load_read, run_simulation, RunMetrics, RunOpts, Settings, StoreKind};
use loyalty_store::{MemoryStore, StoreSession};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "loyalty-clips")]
#[command(about = "Seed a partitioned store and simulate a paced stream of coupon clips")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recreate the schema, seed records, run the clip loop
    Simulate {
        #[command(flatten)]
        opts: RunOpts,
    },

    /// Recreate the schema, seed coupons, read every zip back sequentially
    LoadRead {
        #[command(flatten)]
        opts: RunOpts,
    },

    /// Create the clip topic if it does not exist
    CreateTopic {
        #[command(flatten)]
        opts: RunOpts,
    },
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Simulate,
    LoadRead,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { opts } => {
            let settings = Settings::resolve(&opts)?;
            run_with_store(Mode::Simulate, &settings).await
        }
        Commands::LoadRead { opts } => {
            let settings = Settings::resolve(&opts)?;
            run_with_store(Mode::LoadRead, &settings).await
        }
        Commands::CreateTopic { opts } => {
            let settings = Settings::resolve(&opts)?;
            if settings.dry_run {
                create_topic(&MemoryBus::new(), &settings).await
            } else {
                let bus = KafkaBus::new(&settings.kafka_brokers)?;
                create_topic(&bus, &settings).await
            }
        }
    }
}

async fn create_topic<B: MessageBus>(bus: &B, settings: &Settings) -> anyhow::Result<()> {
    bus.create_topic(&settings.topic, DEFAULT_PARTITIONS)
        .await
        .with_context(|| format!("Failed to create topic '{}'", settings.topic))
}

async fn run_with_store(mode: Mode, settings: &Settings) -> anyhow::Result<()> {
    info!(
        "Starting {:?} run: store={:?}, nodes={}",
        mode,
        settings.store,
        settings.nodes.join(",")
    );

    let metrics = match settings.store {
        StoreKind::Memory => {
            let store = MemoryStore::with_nodes(settings.nodes.clone());
            let session = lifecycle::connect_memory(&store, &settings.nodes).await?;
            run_with_bus(mode, session, settings).await?
        }
        StoreKind::Postgres => {
            let session = lifecycle::connect_postgres(&settings.nodes, &settings.postgres).await?;
            run_with_bus(mode, session, settings).await?
        }
    };

    metrics.log_summary();
    if let Some(path) = &settings.metrics_output {
        metrics.write_json(path)?;
    }
    Ok(())
}

async fn run_with_bus<S: StoreSession>(
    mode: Mode,
    session: Arc<S>,
    settings: &Settings,
) -> anyhow::Result<RunMetrics> {
    match mode {
        Mode::LoadRead => run_load_read(session, settings).await,
        Mode::Simulate if settings.dry_run => {
            info!("Dry run: clip messages stay in process");
            run_simulation(session, Arc::new(MemoryBus::with_retention(0)), settings).await
        }
        Mode::Simulate => {
            let bus = KafkaBus::new(&settings.kafka_brokers)
                .context("Failed to set up Kafka producer")?;
            run_simulation(session, Arc::new(bus), settings).await
        }
    }
}
