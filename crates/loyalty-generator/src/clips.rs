//! Clip event generation.

use chrono::{DateTime, Utc};
use loyalty_core::ClipEvent;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::RangeInclusive;

/// Zips clipped during a simulation. Matches the seeded coupon partitions.
pub const DEFAULT_ZIP_RANGE: RangeInclusive<i64> = 90000..=90099;

/// Offers clipped during a simulation.
pub const DEFAULT_OFFER_RANGE: RangeInclusive<i64> = 1000..=1099;

/// Draws clip events from a seeded RNG.
///
/// The same seed and start index always yield the same (zip, offer) sequence.
/// Timestamps come from the caller so the stream reflects wall-clock time.
pub struct ClipGenerator {
    seed: u64,
    rng: StdRng,
    zips: RangeInclusive<i64>,
    offers: RangeInclusive<i64>,
    index: u64,
}

impl ClipGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
            zips: DEFAULT_ZIP_RANGE,
            offers: DEFAULT_OFFER_RANGE,
            index: 0,
        }
    }

    /// Restrict the zip and offer ranges events are drawn from.
    ///
    /// Empty ranges fall back to the defaults.
    pub fn with_ranges(mut self, zips: RangeInclusive<i64>, offers: RangeInclusive<i64>) -> Self {
        if !zips.is_empty() {
            self.zips = zips;
        }
        if !offers.is_empty() {
            self.offers = offers;
        }
        self
    }

    /// Jump to `index`, re-seeding so the stream from here is deterministic.
    pub fn with_start_index(mut self, index: u64) -> Self {
        self.index = index;
        self.rng = StdRng::seed_from_u64(
            self.seed
                .wrapping_add(index.wrapping_mul(0x9E3779B97F4A7C15)),
        );
        self
    }

    /// Number of events produced so far (plus the start index).
    pub fn current_index(&self) -> u64 {
        self.index
    }

    /// Draw the next clip target and stamp it with `occurred_at`.
    pub fn next_event(&mut self, occurred_at: DateTime<Utc>) -> ClipEvent {
        let zip = self.rng.gen_range(self.zips.clone());
        let offer = self.rng.gen_range(self.offers.clone());
        self.index += 1;
        ClipEvent::new(zip.to_string(), offer.to_string(), occurred_at)
    }

    /// Draw the next event stamped with the current time.
    pub fn next_event_now(&mut self) -> ClipEvent {
        self.next_event(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_events_within_ranges() {
        let mut generator = ClipGenerator::new(42);
        for _ in 0..1000 {
            let event = generator.next_event(at());
            let zip: i64 = event.zip.parse().unwrap();
            let offer: i64 = event.entity_id.parse().unwrap();
            assert!(DEFAULT_ZIP_RANGE.contains(&zip));
            assert!(DEFAULT_OFFER_RANGE.contains(&offer));
        }
        assert_eq!(generator.current_index(), 1000);
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = ClipGenerator::new(7);
        let mut b = ClipGenerator::new(7);
        for _ in 0..50 {
            assert_eq!(a.next_event(at()), b.next_event(at()));
        }
    }

    #[test]
    fn test_start_index_is_deterministic() {
        let mut a = ClipGenerator::new(7).with_start_index(100);
        let mut b = ClipGenerator::new(7).with_start_index(100);
        assert_eq!(a.next_event(at()), b.next_event(at()));
        assert_eq!(a.current_index(), 101);
    }

    #[test]
    fn test_custom_ranges() {
        let mut generator = ClipGenerator::new(1).with_ranges(90050..=90050, 1005..=1005);
        let event = generator.next_event(at());
        assert_eq!(event.zip, "90050");
        assert_eq!(event.entity_id, "1005");
    }
}
