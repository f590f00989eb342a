use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use metering_client::domain::{MeasurementRecord, Series};
use time::{Date, PrimitiveDateTime};

use super::{day_bounds, RangeSnapshot, Store, StoreError, StoredRow};

#[derive(Debug, Clone)]
struct Row {
    record: MeasurementRecord,
    stale: bool,
}

#[derive(Default)]
struct Tables {
    rows: BTreeMap<(Series, PrimitiveDateTime), Row>,
    failures: BTreeMap<(Series, Date), u32>,
    blacklist: BTreeSet<(Series, Date)>,
}

/// Process-local store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every non-stale record of a series, in time order.
    pub fn records(&self, series: &Series) -> Vec<MeasurementRecord> {
        self.lock()
            .rows
            .iter()
            .filter(|((s, _), row)| s == series && !row.stale)
            .map(|(_, row)| row.record.clone())
            .collect()
    }

    fn update_range<F>(&self, series: &Series, begin: Option<PrimitiveDateTime>, end: Option<PrimitiveDateTime>, mut f: F)
    where
        F: FnMut(&mut BTreeMap<(Series, PrimitiveDateTime), Row>, (Series, PrimitiveDateTime)),
    {
        let mut tables = self.lock();
        let keys: Vec<_> = tables
            .rows
            .keys()
            .filter(|(s, ts)| {
                s == series && begin.map_or(true, |b| *ts >= b) && end.map_or(true, |e| *ts < e)
            })
            .cloned()
            .collect();
        for key in keys {
            f(&mut tables.rows, key);
        }
    }

    fn mark_stale(&self, series: &Series, begin: Option<PrimitiveDateTime>, end: Option<PrimitiveDateTime>) {
        self.update_range(series, begin, end, |rows, key| {
            if let Some(row) = rows.get_mut(&key) {
                row.record.value = 0.0;
                row.stale = true;
            }
        });

        let mut tables = self.lock();
        tables.failures.retain(|(s, day), _| {
            let start = super::midnight(*day);
            !(s == series && begin.map_or(true, |b| start >= b) && end.map_or(true, |e| start < e))
        });
    }

    fn remove(&self, series: &Series, begin: Option<PrimitiveDateTime>, end: Option<PrimitiveDateTime>) {
        self.update_range(series, begin, end, |rows, key| {
            rows.remove(&key);
        });
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_range(&self, series: &Series, begin: Date, end: Date) -> Result<RangeSnapshot, StoreError> {
        let tables = self.lock();
        let rows = tables
            .rows
            .iter()
            .filter(|((s, _), _)| s == series)
            .map(|((_, ts), row)| StoredRow {
                ts: *ts,
                value: row.record.value,
                interval_minutes: row.record.interval_minutes,
                stale: row.stale,
            });
        let blacklisted = tables
            .blacklist
            .iter()
            .filter(|(s, _)| s == series)
            .map(|(_, day)| *day);
        Ok(RangeSnapshot::from_rows(begin, end, rows, blacklisted))
    }

    async fn upsert(&self, record: &MeasurementRecord) -> Result<(), StoreError> {
        self.lock().rows.insert(
            (record.series(), record.ts),
            Row {
                record: record.clone(),
                stale: false,
            },
        );
        Ok(())
    }

    async fn increment_fail(&self, series: &Series, day: Date) -> Result<u32, StoreError> {
        let mut tables = self.lock();
        let count = tables.failures.entry((series.clone(), day)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn get_fail_count(&self, series: &Series, day: Date) -> Result<u32, StoreError> {
        Ok(self
            .lock()
            .failures
            .get(&(series.clone(), day))
            .copied()
            .unwrap_or(0))
    }

    async fn reset_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError> {
        self.mark_stale(series, Some(begin), Some(end));
        Ok(())
    }

    async fn delete_range(&self, series: &Series, begin: PrimitiveDateTime, end: PrimitiveDateTime) -> Result<(), StoreError> {
        self.remove(series, Some(begin), Some(end));
        Ok(())
    }

    async fn reset_single(&self, series: &Series, day: Date) -> Result<(), StoreError> {
        let (begin, end) = day_bounds(day);
        self.mark_stale(series, Some(begin), Some(end));
        Ok(())
    }

    async fn delete_single(&self, series: &Series, day: Date) -> Result<(), StoreError> {
        let (begin, end) = day_bounds(day);
        self.remove(series, Some(begin), Some(end));
        Ok(())
    }

    async fn reset_series(&self, series: &Series) -> Result<(), StoreError> {
        self.mark_stale(series, None, None);
        Ok(())
    }

    async fn delete_series(&self, series: &Series) -> Result<(), StoreError> {
        self.remove(series, None, None);
        Ok(())
    }

    async fn set_blacklisted(&self, series: &Series, day: Date, blacklisted: bool) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if blacklisted {
            tables.blacklist.insert((series.clone(), day));
        } else {
            tables.blacklist.remove(&(series.clone(), day));
        }
        Ok(())
    }

    async fn blacklisted_days(&self, series: &Series, begin: Date, end: Date) -> Result<BTreeSet<Date>, StoreError> {
        Ok(self
            .lock()
            .blacklist
            .iter()
            .filter(|(s, day)| s == series && *day >= begin && *day < end)
            .map(|(_, day)| *day)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metering_client::domain::{MeasurementKind, RecordKind};
    use time::macros::{date, datetime};

    fn power(day: PrimitiveDateTime, value: f64) -> MeasurementRecord {
        MeasurementRecord {
            usage_point_id: "pdl-1".to_string(),
            ts: day,
            value,
            measurement: MeasurementKind::Consumption,
            record: RecordKind::Power,
            interval_minutes: None,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_on_same_key() {
        let store = MemoryStore::new();
        store.upsert(&power(datetime!(2024-01-01 00:00:00), 5.0)).await.unwrap();
        store.upsert(&power(datetime!(2024-01-01 00:00:00), 7.5)).await.unwrap();

        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        let records = store.records(&series);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, 7.5);
    }

    #[tokio::test]
    async fn reset_marks_day_missing_and_clears_its_counter() {
        let store = MemoryStore::new();
        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        store.upsert(&power(datetime!(2024-01-01 00:00:00), 5.0)).await.unwrap();
        store.increment_fail(&series, date!(2024 - 01 - 01)).await.unwrap();

        store.reset_single(&series, date!(2024 - 01 - 01)).await.unwrap();

        let snap = store
            .get_range(&series, date!(2024 - 01 - 01), date!(2024 - 01 - 02))
            .await
            .unwrap();
        assert!(snap.missing_data);
        assert_eq!(store.get_fail_count(&series, date!(2024 - 01 - 01)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_keeps_fail_counters() {
        let store = MemoryStore::new();
        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        store.upsert(&power(datetime!(2024-01-01 00:00:00), 5.0)).await.unwrap();
        store.increment_fail(&series, date!(2024 - 01 - 01)).await.unwrap();

        store.delete_series(&series).await.unwrap();

        assert!(store.records(&series).is_empty());
        assert_eq!(store.get_fail_count(&series, date!(2024 - 01 - 01)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blacklist_is_per_series_and_can_be_lifted() {
        let store = MemoryStore::new();
        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        let other = Series::power("pdl-2", MeasurementKind::Consumption);
        let day = date!(2024 - 01 - 01);

        store.set_blacklisted(&series, day, true).await.unwrap();
        let listed = store.blacklisted_days(&series, day, date!(2024 - 01 - 02)).await.unwrap();
        assert!(listed.contains(&day));
        assert!(store.blacklisted_days(&other, day, date!(2024 - 01 - 02)).await.unwrap().is_empty());
        assert!(!store.get_range(&series, day, date!(2024 - 01 - 02)).await.unwrap().missing_data);

        store.set_blacklisted(&series, day, false).await.unwrap();
        assert!(store.blacklisted_days(&series, day, date!(2024 - 01 - 02)).await.unwrap().is_empty());
        assert!(store.get_range(&series, day, date!(2024 - 01 - 02)).await.unwrap().missing_data);
    }
}
