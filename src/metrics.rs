//! Metrics collected over one run.

use loyalty_bus::PublishSnapshot;
use loyalty_store::DispatchSnapshot;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    /// Seed records submitted across both families.
    pub seed_rows: u64,
    /// Clip writes submitted.
    pub clip_writes: u64,
    pub writes_succeeded: u64,
    pub writes_failed: u64,
    pub bind_errors: u64,
    pub messages_published: u64,
    pub messages_failed: u64,
    pub pace_sleeps: u64,
    /// Partitions read back on the sequential read path.
    pub reads_completed: u64,
    pub rows_read: u64,
    #[serde(rename = "seed_duration_ms", serialize_with = "as_millis")]
    pub seed_duration: Duration,
    #[serde(rename = "clip_duration_ms", serialize_with = "as_millis")]
    pub clip_duration: Duration,
    #[serde(rename = "read_duration_ms", serialize_with = "as_millis")]
    pub read_duration: Duration,
    #[serde(rename = "total_duration_ms", serialize_with = "as_millis")]
    pub total_duration: Duration,
}

impl RunMetrics {
    /// Copy the final dispatcher counters.
    pub fn absorb_dispatch(&mut self, snapshot: DispatchSnapshot) {
        self.writes_succeeded = snapshot.succeeded;
        self.writes_failed = snapshot.failed;
        self.bind_errors = snapshot.bind_errors;
    }

    /// Copy the final publisher counters.
    pub fn absorb_publish(&mut self, snapshot: PublishSnapshot) {
        self.messages_published = snapshot.published;
        self.messages_failed = snapshot.failed;
    }

    /// Completed store operations per second over the whole run.
    pub fn writes_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            (self.writes_succeeded + self.writes_failed) as f64 / secs
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        info!(
            "Run complete in {:?}: {} seed rows, {} clip writes, {} reads",
            self.total_duration, self.seed_rows, self.clip_writes, self.reads_completed
        );
        info!(
            "Store: {} succeeded, {} failed, {} bind errors ({:.2} writes/sec)",
            self.writes_succeeded,
            self.writes_failed,
            self.bind_errors,
            self.writes_per_second()
        );
        info!(
            "Bus: {} published, {} failed; {} pace sleeps",
            self.messages_published, self.messages_failed, self.pace_sleeps
        );
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write metrics to {}: {e}", path.display()))?;
        info!("Metrics written to {}", path.display());
        Ok(())
    }
}
