use super::Pipeline;
use loyalty_core::RecordFamily;
use loyalty_generator::RowGenerator;
use loyalty_store::{is_per_write, StoreSession};
use tracing::{info, warn};

impl<S: StoreSession> Pipeline<S> {
    /// Submit one full-record insert per generated row without waiting.
    ///
    /// Returns the number of writes handed to the store. Rows that fail to
    /// bind are logged and skipped.
    pub fn seed(&self, family: RecordFamily, rows: &RowGenerator) -> u64 {
        let template = self.templates.insert_record(family);
        let mut submitted = 0u64;

        info!(
            "Loading {} seed rows into {} ({:?} x {:?})",
            rows.len(),
            family.container(),
            rows.outer(),
            rows.inner()
        );
        for record in rows.rows() {
            match self.dispatcher.submit(template, record.to_params()) {
                Ok(handle) => {
                    let key = (record.partition_key, record.clustering_key);
                    handle.on_complete(
                        |_| {},
                        move |e| warn!("Seed write {}/{} failed: {}", key.0, key.1, e),
                    );
                    submitted += 1;
                }
                Err(e) if is_per_write(&e) => {
                    warn!(
                        "Seed row {}/{} not submitted: {}",
                        record.partition_key, record.clustering_key, e
                    );
                }
                Err(e) => {
                    warn!("Seed load for {} stopped: {}", family.container(), e);
                    break;
                }
            }
        }
        info!("Submitted {} seed rows to {}", submitted, family.container());
        submitted
    }
}
