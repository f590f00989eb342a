use metering_client::domain::Series;
use time::Date;

use crate::store::{Store, StoreError};

/// Per-day miss counters of one series.
pub struct FailTracker<'a, S: ?Sized> {
    store: &'a S,
    series: &'a Series,
}

impl<'a, S: Store + ?Sized> FailTracker<'a, S> {
    pub fn new(store: &'a S, series: &'a Series) -> Self {
        Self { store, series }
    }

    /// Note that a successful fetch covering `day` carried no reading for it.
    pub async fn record_miss(&self, day: Date) -> Result<u32, StoreError> {
        let count = self.store.increment_fail(self.series, day).await?;
        metrics::counter!("power_fail_increments_total").increment(1);
        tracing::debug!(series = %self.series, %day, count, "no reading for day");
        Ok(count)
    }

    pub async fn count(&self, day: Date) -> Result<u32, StoreError> {
        self.store.get_fail_count(self.series, day).await
    }
}
