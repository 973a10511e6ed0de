use super::Pipeline;
use crate::pacing::PacingController;
use loyalty_bus::{ClipMessage, EventPublisher, MessageBus};
use loyalty_core::ClipEvent;
use loyalty_generator::ClipGenerator;
use loyalty_store::{StoreError, StoreSession, WriteHandle};
use tracing::{debug, info, warn};

const PROGRESS_EVERY: u64 = 10_000;

impl<S: StoreSession> Pipeline<S> {
    /// Submit the partial clip update for `event` and, once the store has
    /// accepted it, publish the matching message.
    ///
    /// The message is published whatever the eventual write outcome; a
    /// failed delivery is counted by the publisher and does not touch the
    /// write.
    pub fn clip<B: MessageBus>(
        &self,
        event: &ClipEvent,
        publisher: &EventPublisher<B>,
    ) -> Result<WriteHandle, StoreError> {
        let handle = self
            .dispatcher
            .submit(&self.templates.insert_clip, event.clip_params())?;

        let (zip, offer) = (event.zip.clone(), event.entity_id.clone());
        handle.on_complete(
            |_| {},
            move |e| warn!("Clip write {}/{} failed: {}", zip, offer, e),
        );
        publisher.publish(&ClipMessage::from_event(event));
        Ok(handle)
    }

    /// Issue `total` clip events, pacing between batches.
    ///
    /// Returns the number of clip writes accepted by the store. Per-write
    /// failures are logged and the loop continues.
    pub async fn run_clips<B: MessageBus>(
        &self,
        generator: &mut ClipGenerator,
        publisher: &EventPublisher<B>,
        total: u64,
        pacing: &mut PacingController,
    ) -> anyhow::Result<u64> {
        info!("Running {} clip events", total);
        let mut accepted = 0u64;

        for n in 1..=total {
            let event = generator.next_event_now();
            match self.clip(&event, publisher) {
                Ok(_) => accepted += 1,
                Err(e) => warn!(
                    "Clip {}/{} not submitted: {}",
                    event.zip, event.entity_id, e
                ),
            }
            pacing.record().await?;

            if n % PROGRESS_EVERY == 0 {
                let dispatch = self.dispatcher.snapshot();
                info!(
                    "{} clips issued ({} in flight, {} failed, {} published)",
                    n,
                    dispatch.in_flight,
                    dispatch.failed,
                    publisher.snapshot().published
                );
            } else if n % 1000 == 0 {
                debug!("{} clips issued", n);
            }
        }
        pacing.finish();
        Ok(accepted)
    }
}
