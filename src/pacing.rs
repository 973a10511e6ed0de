//! Fixed-rate pacing of the clip loop.
//!
//! After every `batch_size` dispatched operations the controller suspends the
//! issuing task for `interval`. It does not look at dispatcher depth, store
//! latency or bus lag.

use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceState {
    Running,
    Sleeping,
    Done,
}

#[derive(Debug)]
pub struct PacingController {
    batch_size: u64,
    interval: Duration,
    in_batch: u64,
    dispatched: u64,
    sleeps: u64,
    state: PaceState,
}

impl PacingController {
    /// A zero `interval` never sleeps. A zero `batch_size` is rejected.
    pub fn new(batch_size: u64, interval: Duration) -> anyhow::Result<Self> {
        if batch_size == 0 {
            anyhow::bail!("Pacing batch size must be at least 1");
        }
        Ok(Self {
            batch_size,
            interval,
            in_batch: 0,
            dispatched: 0,
            sleeps: 0,
            state: PaceState::Running,
        })
    }

    /// Count one dispatched operation, sleeping if it completed a batch.
    pub async fn record(&mut self) -> anyhow::Result<()> {
        if self.state == PaceState::Done {
            anyhow::bail!("Pacing controller is done");
        }
        self.dispatched += 1;
        self.in_batch += 1;
        if self.in_batch < self.batch_size {
            return Ok(());
        }

        self.in_batch = 0;
        if self.interval.is_zero() {
            return Ok(());
        }
        self.state = PaceState::Sleeping;
        trace!("Batch complete after {} operations, sleeping {:?}", self.dispatched, self.interval);
        tokio::time::sleep(self.interval).await;
        self.sleeps += 1;
        self.state = PaceState::Running;
        Ok(())
    }

    /// Mark the bounded loop as finished.
    pub fn finish(&mut self) {
        if self.state != PaceState::Done {
            debug!(
                "Pacing done: {} operations, {} sleeps",
                self.dispatched, self.sleeps
            );
            self.state = PaceState::Done;
        }
    }

    pub fn state(&self) -> PaceState {
        self.state
    }

    pub fn sleeps(&self) -> u64 {
        self.sleeps
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Time spent sleeping so far.
    pub fn slept(&self) -> Duration {
        self.interval.saturating_mul(u32::try_from(self.sleeps).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_once_per_full_batch() {
        let mut pacing = PacingController::new(100, Duration::from_secs(1)).unwrap();
        let start = Instant::now();
        for _ in 0..250 {
            pacing.record().await.unwrap();
        }
        assert_eq!(pacing.sleeps(), 2);
        assert_eq!(pacing.dispatched(), 250);
        assert_eq!(pacing.state(), PaceState::Running);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(pacing.slept(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_least_floor_n_over_batch_sleeps() {
        for n in [0u64, 99, 100, 101, 1000] {
            let mut pacing = PacingController::new(100, Duration::from_secs(1)).unwrap();
            for _ in 0..n {
                pacing.record().await.unwrap();
            }
            assert!(pacing.sleeps() >= n / 100, "n = {n}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_sleeps() {
        let mut pacing = PacingController::new(10, Duration::ZERO).unwrap();
        let start = Instant::now();
        for _ in 0..100 {
            pacing.record().await.unwrap();
        }
        assert_eq!(pacing.sleeps(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_done_is_terminal() {
        let mut pacing = PacingController::new(1, Duration::ZERO).unwrap();
        pacing.record().await.unwrap();
        pacing.finish();
        assert_eq!(pacing.state(), PaceState::Done);
        assert!(pacing.record().await.is_err());
        assert_eq!(pacing.dispatched(), 1);
    }

    #[test]
    fn test_zero_batch_rejected() {
        assert!(PacingController::new(0, Duration::from_secs(1)).is_err());
    }
}
