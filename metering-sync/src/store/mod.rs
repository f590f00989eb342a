pub mod memory;
pub mod postgres;

use std::collections::{BTreeMap, BTreeSet};

use metering_client::domain::{MeasurementRecord, Series};
use time::{Date, Duration, PrimitiveDateTime, Time};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Minutes in a calendar day.
pub const DAY_MINUTES: u32 = 1440;

/// Minutes a load-curve day may lack and still count as stored.
pub const DETAIL_GAP_TOLERANCE_MINUTES: u32 = 300;

/// One stored reading as seen by the missing-data rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredRow {
    pub ts: PrimitiveDateTime,
    pub value: f64,
    /// `None` for daily readings, which cover their whole day.
    pub interval_minutes: Option<u32>,
    /// Reset rows count as absent.
    pub stale: bool,
}

/// What the store holds for one series over a day range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSnapshot {
    /// At least one day of the range has no usable reading.
    pub missing_data: bool,
    /// Readings of the range, blacklisted days left out.
    pub records: BTreeMap<PrimitiveDateTime, f64>,
    /// Days excluded from fetching and from the records.
    pub blacklisted: BTreeSet<Date>,
}

impl RangeSnapshot {
    /// Build a snapshot of `[begin, end)`.
    ///
    /// A day is stored once its readings cover all of it but at most
    /// [`DETAIL_GAP_TOLERANCE_MINUTES`]. A blacklisted day never counts as
    /// missing.
    pub fn from_rows<I, B>(begin: Date, end: Date, rows: I, blacklisted: B) -> Self
    where
        I: IntoIterator<Item = StoredRow>,
        B: IntoIterator<Item = Date>,
    {
        let blacklisted: BTreeSet<Date> = blacklisted
            .into_iter()
            .filter(|d| *d >= begin && *d < end)
            .collect();

        let mut records = BTreeMap::new();
        let mut covered: BTreeMap<Date, u32> = BTreeMap::new();
        for row in rows {
            let day = row.ts.date();
            if row.stale || day < begin || day >= end || blacklisted.contains(&day) {
                continue;
            }
            *covered.entry(day).or_default() += row.interval_minutes.unwrap_or(DAY_MINUTES);
            records.insert(row.ts, row.value);
        }

        let needed = DAY_MINUTES - DETAIL_GAP_TOLERANCE_MINUTES;
        let missing_data = days(begin, end).any(|d| {
            !blacklisted.contains(&d) && covered.get(&d).copied().unwrap_or(0) < needed
        });
        Self {
            missing_data,
            records,
            blacklisted,
        }
    }
}

/// Calendar days of `[begin, end)`.
pub fn days(begin: Date, end: Date) -> impl Iterator<Item = Date> {
    std::iter::successors(Some(begin), |d| d.next_day()).take_while(move |d| *d < end)
}

pub fn midnight(day: Date) -> PrimitiveDateTime {
    PrimitiveDateTime::new(day, Time::MIDNIGHT)
}

/// `[day 00:00, next day 00:00)`.
pub fn day_bounds(day: Date) -> (PrimitiveDateTime, PrimitiveDateTime) {
    let start = midnight(day);
    (start, start.saturating_add(Duration::days(1)))
}

/// Persistence of readings and per-day miss counters.
///
/// Ranges given as dates are half-open `[begin, end)` on calendar days;
/// ranges given as timestamps are half-open on instants.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn get_range(&self, series: &Series, begin: Date, end: Date) -> Result<RangeSnapshot, StoreError>;

    /// Insert or overwrite the record sharing its unique key.
    async fn upsert(&self, record: &MeasurementRecord) -> Result<(), StoreError>;

    /// Bump the miss counter of `day` and return its new value.
    async fn increment_fail(&self, series: &Series, day: Date) -> Result<u32, StoreError>;

    async fn get_fail_count(&self, series: &Series, day: Date) -> Result<u32, StoreError>;

    async fn reset_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError>;

    async fn delete_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError>;

    async fn reset_single(&self, series: &Series, day: Date) -> Result<(), StoreError>;

    async fn delete_single(&self, series: &Series, day: Date) -> Result<(), StoreError>;

    async fn reset_series(&self, series: &Series) -> Result<(), StoreError>;

    async fn delete_series(&self, series: &Series) -> Result<(), StoreError>;

    /// Exclude `day` from fetching and rollups, or lift the exclusion.
    async fn set_blacklisted(&self, series: &Series, day: Date, blacklisted: bool) -> Result<(), StoreError>;

    async fn blacklisted_days(&self, series: &Series, begin: Date, end: Date) -> Result<BTreeSet<Date>, StoreError>;
}

#[async_trait::async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn get_range(&self, series: &Series, begin: Date, end: Date) -> Result<RangeSnapshot, StoreError> {
        (**self).get_range(series, begin, end).await
    }

    async fn upsert(&self, record: &MeasurementRecord) -> Result<(), StoreError> {
        (**self).upsert(record).await
    }

    async fn increment_fail(&self, series: &Series, day: Date) -> Result<u32, StoreError> {
        (**self).increment_fail(series, day).await
    }

    async fn get_fail_count(&self, series: &Series, day: Date) -> Result<u32, StoreError> {
        (**self).get_fail_count(series, day).await
    }

    async fn reset_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError> {
        (**self).reset_range(series, begin, end).await
    }

    async fn delete_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError> {
        (**self).delete_range(series, begin, end).await
    }

    async fn reset_single(&self, series: &Series, day: Date) -> Result<(), StoreError> {
        (**self).reset_single(series, day).await
    }

    async fn delete_single(&self, series: &Series, day: Date) -> Result<(), StoreError> {
        (**self).delete_single(series, day).await
    }

    async fn reset_series(&self, series: &Series) -> Result<(), StoreError> {
        (**self).reset_series(series).await
    }

    async fn delete_series(&self, series: &Series) -> Result<(), StoreError> {
        (**self).delete_series(series).await
    }

    async fn set_blacklisted(&self, series: &Series, day: Date, blacklisted: bool) -> Result<(), StoreError> {
        (**self).set_blacklisted(series, day, blacklisted).await
    }

    async fn blacklisted_days(&self, series: &Series, begin: Date, end: Date) -> Result<BTreeSet<Date>, StoreError> {
        (**self).blacklisted_days(series, begin, end).await
    }
}
