//! Seed row generation.

use chrono::Utc;
use loyalty_core::{Record, RecordFamily};
use std::ops::Range;

/// Error type for generator construction.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("Invalid {axis} range {start}..{end}: start is after end")]
    InvalidRange {
        axis: &'static str,
        start: i64,
        end: i64,
    },
    #[error("Grid {outer:?} x {inner:?} has more records than can be counted")]
    TooLarge { outer: Range<i64>, inner: Range<i64> },
}

/// Produces one seed record per (outer, inner) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGenerator {
    outer: Range<i64>,
    inner: Range<i64>,
}

impl RowGenerator {
    /// Create a generator over `outer` x `inner`. Empty ranges are allowed and
    /// produce no rows; reversed ranges and grids whose size overflows
    /// `usize` are rejected.
    pub fn new(outer: Range<i64>, inner: Range<i64>) -> Result<Self, GeneratorError> {
        check_range("outer", &outer)?;
        check_range("inner", &inner)?;
        if grid_len(&outer, &inner).is_none() {
            return Err(GeneratorError::TooLarge { outer, inner });
        }
        Ok(Self { outer, inner })
    }

    /// Default grid for a family: zips 90000..90100 for coupons, households
    /// 1000..1100 for personalized deals, offers 1..20 for both.
    pub fn for_family(family: RecordFamily) -> Self {
        let outer = match family {
            RecordFamily::ByZip => 90000..90100,
            RecordFamily::ByHousehold => 1000..1100,
        };
        Self { outer, inner: 1..20 }
    }

    pub fn outer(&self) -> &Range<i64> {
        &self.outer
    }

    pub fn inner(&self) -> &Range<i64> {
        &self.inner
    }

    /// Number of records one pass yields.
    pub fn len(&self) -> usize {
        grid_len(&self.outer, &self.inner).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Partition keys of the grid, in order.
    pub fn partition_keys(&self) -> impl Iterator<Item = String> {
        self.outer.clone().map(|i| i.to_string())
    }

    /// Start a fresh pass over the grid.
    pub fn rows(&self) -> SeedRows {
        SeedRows {
            outer: self.outer.clone(),
            inner: self.inner.clone(),
            current_outer: self.outer.start,
            next_inner: self.inner.start,
            remaining: self.len(),
        }
    }
}

fn check_range(axis: &'static str, range: &Range<i64>) -> Result<(), GeneratorError> {
    if range.start > range.end {
        return Err(GeneratorError::InvalidRange {
            axis,
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}

fn span(range: &Range<i64>) -> Option<usize> {
    let width = (i128::from(range.end) - i128::from(range.start)).max(0);
    usize::try_from(width).ok()
}

fn grid_len(outer: &Range<i64>, inner: &Range<i64>) -> Option<usize> {
    span(outer)?.checked_mul(span(inner)?)
}

/// One pass over a [`RowGenerator`] grid. `updated_at` is taken when each
/// record is produced.
#[derive(Debug, Clone)]
pub struct SeedRows {
    outer: Range<i64>,
    inner: Range<i64>,
    current_outer: i64,
    next_inner: i64,
    remaining: usize,
}

impl Iterator for SeedRows {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.remaining == 0 {
            return None;
        }
        if self.next_inner >= self.inner.end {
            self.current_outer += 1;
            self.next_inner = self.inner.start;
        }
        if self.current_outer >= self.outer.end {
            self.remaining = 0;
            return None;
        }

        let record = Record::seed(
            self.current_outer.to_string(),
            self.next_inner.to_string(),
            Utc::now(),
        );
        self.next_inner += 1;
        self.remaining -= 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for SeedRows {}
