//! The ingestion pipeline.
//!
//! A [`Pipeline`] owns the write dispatcher and prepared templates for one
//! session. Its stages:
//!
//! - [`seed`](Pipeline::seed): fire-and-forget inserts of generated records
//! - [`run_clips`](Pipeline::run_clips): the paced clip loop, one store write
//!   and one published message per event
//! - [`read_back`](Pipeline::read_back): sequential point reads, each awaited
//!   before the next is issued
//!
//! [`run_simulation`] and [`run_load_read`] wire the stages into complete
//! runs.

mod clips;
mod read;
mod seed;

pub use read::ReadSummary;

use crate::config::Settings;
use crate::lifecycle;
use crate::metrics::RunMetrics;
use crate::pacing::PacingController;
use anyhow::Context;
use loyalty_bus::{EventPublisher, MessageBus};
use loyalty_core::{Keyspace, RecordFamily};
use loyalty_generator::{ClipGenerator, RowGenerator};
use loyalty_store::{StatementCache, StoreSession, Templates, WriteDispatcher};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub struct Pipeline<S: StoreSession> {
    dispatcher: WriteDispatcher<S>,
    templates: Templates<S::Statement>,
}

impl<S: StoreSession> Pipeline<S> {
    /// Prepare every template in `keyspace` on `session`.
    pub async fn prepare(session: Arc<S>, keyspace: &str) -> anyhow::Result<Self> {
        let templates = StatementCache::new(Arc::clone(&session))
            .prepare_templates(keyspace)
            .await
            .context("Failed to prepare statements")?;
        Ok(Self {
            dispatcher: WriteDispatcher::new(session),
            templates,
        })
    }

    pub fn dispatcher(&self) -> &WriteDispatcher<S> {
        &self.dispatcher
    }

    pub fn templates(&self) -> &Templates<S::Statement> {
        &self.templates
    }

    /// Drain in-flight writes, close the session and record the final
    /// dispatcher counters.
    pub async fn close(&self, metrics: &mut RunMetrics) -> anyhow::Result<()> {
        lifecycle::close(&self.dispatcher).await?;
        metrics.absorb_dispatch(self.dispatcher.snapshot());
        Ok(())
    }
}

/// Full run: recreate the schema, seed both families, run the paced clip
/// loop with publishing, close.
pub async fn run_simulation<S: StoreSession, B: MessageBus>(
    session: Arc<S>,
    bus: Arc<B>,
    settings: &Settings,
) -> anyhow::Result<RunMetrics> {
    let started = Instant::now();
    let mut metrics = RunMetrics::default();
    let keyspace = Keyspace::loyalty();

    lifecycle::create_schema(session.as_ref(), &keyspace).await?;
    lifecycle::settle(settings.settle).await;
    let pipeline = Pipeline::prepare(session, &keyspace.name).await?;

    let seed_started = Instant::now();
    for family in RecordFamily::ALL {
        metrics.seed_rows += pipeline.seed(family, &RowGenerator::for_family(family));
    }
    metrics.seed_duration = seed_started.elapsed();

    let publisher = EventPublisher::new(bus, settings.topic.clone());
    info!(
        "Publishing clips to '{}' via {} bus",
        publisher.topic(),
        publisher.bus().name()
    );
    let mut generator = ClipGenerator::new(settings.seed);
    let mut pacing = PacingController::new(settings.batch_size, settings.interval)?;

    let clips_started = Instant::now();
    metrics.clip_writes = pipeline
        .run_clips(&mut generator, &publisher, settings.total_clips(), &mut pacing)
        .await?;
    metrics.pace_sleeps = pacing.sleeps();

    publisher.flush().await;
    pipeline.close(&mut metrics).await?;
    metrics.clip_duration = clips_started.elapsed();
    metrics.absorb_publish(publisher.snapshot());
    metrics.total_duration = started.elapsed();
    Ok(metrics)
}

/// Recreate the schema, seed `coupons`, then read every zip partition back
/// one at a time.
pub async fn run_load_read<S: StoreSession>(
    session: Arc<S>,
    settings: &Settings,
) -> anyhow::Result<RunMetrics> {
    let started = Instant::now();
    let mut metrics = RunMetrics::default();
    let keyspace = Keyspace::loyalty();

    lifecycle::create_schema(session.as_ref(), &keyspace).await?;
    lifecycle::settle(settings.settle).await;
    let pipeline = Pipeline::prepare(session, &keyspace.name).await?;

    let rows = RowGenerator::for_family(RecordFamily::ByZip);
    let seed_started = Instant::now();
    metrics.seed_rows = pipeline.seed(RecordFamily::ByZip, &rows);
    pipeline.dispatcher().drain().await;
    metrics.seed_duration = seed_started.elapsed();

    let read_started = Instant::now();
    let summary = pipeline.read_back(rows.partition_keys()).await;
    metrics.read_duration = read_started.elapsed();
    metrics.reads_completed = summary.reads;
    metrics.rows_read = summary.rows;

    pipeline.close(&mut metrics).await?;
    metrics.total_duration = started.elapsed();
    Ok(metrics)
}
