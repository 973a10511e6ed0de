use super::Pipeline;
use loyalty_core::{Record, RecordFamily};
use loyalty_store::StoreSession;
use tracing::{debug, info, warn};

/// Outcome of a sequential read pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Partitions read successfully.
    pub reads: u64,
    /// Rows returned across those partitions.
    pub rows: u64,
    pub failed: u64,
    /// Rows with `clipped = true`.
    pub clipped: u64,
}

impl<S: StoreSession> Pipeline<S> {
    /// Read each zip partition of `coupons`, awaiting every read before
    /// issuing the next.
    pub async fn read_back(&self, zips: impl IntoIterator<Item = String>) -> ReadSummary {
        let started = chrono::Utc::now();
        let mut summary = ReadSummary::default();

        for zip in zips {
            let handle = match self
                .dispatcher
                .submit(&self.templates.read_coupons, vec![zip.as_str().into()])
            {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Read for key {} not submitted: {}", zip, e);
                    summary.failed += 1;
                    continue;
                }
            };

            let key = zip.clone();
            handle.on_complete(
                move |result| debug!("Key {}: {} rows", key, result.rows.len()),
                |e| warn!("Read failed: {}", e),
            );

            match handle.resolve().await {
                Ok(result) => {
                    summary.reads += 1;
                    summary.rows += result.rows.len() as u64;
                    summary.clipped += result
                        .rows
                        .iter()
                        .filter_map(|row| Record::from_row(RecordFamily::ByZip, row).ok())
                        .filter(|record| record.clipped)
                        .count() as u64;
                    debug!("Read for key: {}", zip);
                }
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            "Started reading at {} and stopped reading at {} ({} partitions, {} rows, {} failed)",
            started,
            chrono::Utc::now(),
            summary.reads,
            summary.rows,
            summary.failed
        );
        summary
    }
}
