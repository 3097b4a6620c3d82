//! Trailing spend windows
//!
//! Two windows per agent: a sliding 60-second window implemented as a
//! circular buffer of one-second buckets, and a current-calendar-day
//! accumulator. Both are queried on every settlement, so reads are O(1)
//! in the number of recorded settlements.

use chrono::{DateTime, NaiveDate, Utc};
use payguard_core::Cents;

/// Number of buckets (1 per second for the 60-second window)
const BUCKET_COUNT: usize = 60;

/// Trailing spend state for a single agent.
#[derive(Debug)]
pub struct SpendWindow {
    /// Circular buffer: each bucket = 1 second of settled cents
    buckets: [i64; BUCKET_COUNT],
    /// Last update timestamp (for bucket rotation)
    last_update: DateTime<Utc>,
    /// UTC day the `day_total` belongs to
    day: NaiveDate,
    day_total: i64,
}

impl SpendWindow {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            buckets: [0; BUCKET_COUNT],
            last_update: now,
            day: now.date_naive(),
            day_total: 0,
        }
    }

    /// Get the bucket index for a given timestamp
    fn bucket_index(timestamp: DateTime<Utc>) -> usize {
        (timestamp.timestamp() as usize) % BUCKET_COUNT
    }

    /// Rotate buckets to the given time, clearing expired ones, and roll
    /// the day accumulator over a date change.
    fn rotate_to(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_update).num_seconds();

        if elapsed >= BUCKET_COUNT as i64 {
            // Everything in the ring has expired
            self.buckets = [0; BUCKET_COUNT];
        } else if elapsed > 0 {
            let last_idx = Self::bucket_index(self.last_update);
            let mut idx = (last_idx + 1) % BUCKET_COUNT;
            for _ in 0..elapsed {
                self.buckets[idx] = 0;
                idx = (idx + 1) % BUCKET_COUNT;
            }
        }

        if elapsed > 0 {
            self.last_update = now;
        }

        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.day_total = 0;
        }
    }

    /// Record a settled amount at the given time.
    pub fn record(&mut self, amount: Cents, at: DateTime<Utc>) {
        self.rotate_to(at);
        self.buckets[Self::bucket_index(at)] += amount.value();
        self.day_total += amount.value();
    }

    /// Total settled cents over the trailing 60 seconds.
    pub fn minute_total(&mut self, now: DateTime<Utc>) -> Cents {
        self.rotate_to(now);
        Cents::new_unchecked(self.buckets.iter().sum())
    }

    /// Total settled cents over the current UTC calendar day.
    pub fn day_total(&mut self, now: DateTime<Utc>) -> Cents {
        self.rotate_to(now);
        Cents::new_unchecked(self.day_total)
    }
}
