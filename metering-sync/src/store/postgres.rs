use std::{collections::BTreeSet, time::Duration};

use metering_client::{
    db::measurement_queries as q,
    domain::{MeasurementRecord, Series},
};
use sqlx::postgres::PgPool;
use time::{Date, PrimitiveDateTime, Time};

use super::{day_bounds, midnight, RangeSnapshot, Store, StoreError, StoredRow};

/// `Store` backed by a PostgreSQL-compatible server over pgwire.
pub struct PgStore {
    pool: PgPool,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            max_retries,
            retry_backoff,
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        q::ensure_schema(&self.pool).await?;
        Ok(())
    }

    async fn mark_stale(
        &self,
        series: &Series,
        begin: Option<PrimitiveDateTime>,
        end: Option<PrimitiveDateTime>,
    ) -> Result<(), StoreError> {
        let rows = q::mark_stale(&self.pool, series, begin, end).await?;
        // Counters are day-keyed: clear every day whose midnight is in range.
        let first = begin.map(|b| match b.time() {
            t if t == Time::MIDNIGHT => b.date(),
            _ => b.date().next_day().unwrap_or(b.date()),
        });
        let last = end.map(|e| match e.time() {
            t if t == Time::MIDNIGHT => e.date().previous_day().unwrap_or(e.date()),
            _ => e.date(),
        });
        let counters = q::clear_failures(&self.pool, series, first, last).await?;
        tracing::info!(%series, rows, counters, "reset stored readings");
        Ok(())
    }

    async fn delete(
        &self,
        series: &Series,
        begin: Option<PrimitiveDateTime>,
        end: Option<PrimitiveDateTime>,
    ) -> Result<(), StoreError> {
        let rows = q::delete_measurements(&self.pool, series, begin, end).await?;
        tracing::info!(%series, rows, "deleted stored readings");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn get_range(&self, series: &Series, begin: Date, end: Date) -> Result<RangeSnapshot, StoreError> {
        let rows = q::load_range(&self.pool, series, midnight(begin), midnight(end)).await?;
        let blacklisted = q::load_blacklist(&self.pool, series, begin, end).await?;
        Ok(RangeSnapshot::from_rows(
            begin,
            end,
            rows.into_iter().map(|r| StoredRow {
                ts: r.ts,
                value: r.value,
                interval_minutes: r.interval_minutes(),
                stale: r.stale,
            }),
            blacklisted,
        ))
    }

    async fn upsert(&self, record: &MeasurementRecord) -> Result<(), StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match q::upsert_measurement(&self.pool, record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "measurement upsert failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "measurement upsert failed, giving up");
                    metrics::counter!("store_write_errors_total").increment(1);
                    return Err(e.into());
                }
            }
        }
    }

    async fn increment_fail(&self, series: &Series, day: Date) -> Result<u32, StoreError> {
        let count = q::increment_failure(&self.pool, series, day).await?;
        u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative fail count {count}")))
    }

    async fn get_fail_count(&self, series: &Series, day: Date) -> Result<u32, StoreError> {
        let count = q::failure_count(&self.pool, series, day).await?;
        u32::try_from(count).map_err(|_| StoreError::Corrupt(format!("negative fail count {count}")))
    }

    async fn reset_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError> {
        self.mark_stale(series, Some(begin), Some(end)).await
    }

    async fn delete_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError> {
        self.delete(series, Some(begin), Some(end)).await
    }

    async fn reset_single(&self, series: &Series, day: Date) -> Result<(), StoreError> {
        let (begin, end) = day_bounds(day);
        self.mark_stale(series, Some(begin), Some(end)).await
    }

    async fn delete_single(&self, series: &Series, day: Date) -> Result<(), StoreError> {
        let (begin, end) = day_bounds(day);
        self.delete(series, Some(begin), Some(end)).await
    }

    async fn reset_series(&self, series: &Series) -> Result<(), StoreError> {
        self.mark_stale(series, None, None).await
    }

    async fn delete_series(&self, series: &Series) -> Result<(), StoreError> {
        self.delete(series, None, None).await
    }

    async fn set_blacklisted(&self, series: &Series, day: Date, blacklisted: bool) -> Result<(), StoreError> {
        let rows = q::set_blacklisted(&self.pool, series, day, blacklisted).await?;
        tracing::info!(%series, %day, blacklisted, rows, "updated day blacklist");
        Ok(())
    }

    async fn blacklisted_days(&self, series: &Series, begin: Date, end: Date) -> Result<BTreeSet<Date>, StoreError> {
        Ok(q::load_blacklist(&self.pool, series, begin, end).await?.into_iter().collect())
    }
}
