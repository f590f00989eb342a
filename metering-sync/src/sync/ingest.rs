use std::collections::{BTreeMap, BTreeSet};

use metering_client::domain::{MeasurementRecord, RecordKind, Series};
use time::{macros::datetime, Date, Duration, PrimitiveDateTime};

use super::{error::SyncError, fail::FailTracker, planner::Window};
use crate::{
    store::{days, midnight, Store},
    upstream::{IntervalReading, MeterReading, PayloadError},
};

/// Sanity checks shared by every reading before it is stored.
///
/// Rules:
/// - value must be non-negative.
/// - ts must be within a broad sanity window [2000-01-01, 2100-01-01].
pub fn validate(record: &MeasurementRecord) -> Result<(), PayloadError> {
    if record.value < 0.0 || !record.value.is_finite() {
        return Err(PayloadError::Rejected(format!(
            "value must be a non-negative number, got {}",
            record.value
        )));
    }

    let min_ts = datetime!(2000-01-01 00:00:00);
    let max_ts = datetime!(2100-01-01 00:00:00);

    if record.ts < min_ts || record.ts > max_ts {
        return Err(PayloadError::Rejected(format!("timestamp {} out of allowed range", record.ts)));
    }

    Ok(())
}

/// Turn one load-curve reading into a stored record.
///
/// The API stamps a reading with the end of its interval; records are keyed
/// by the interval start.
pub fn normalize_detail(series: &Series, reading: &IntervalReading) -> Result<MeasurementRecord, PayloadError> {
    let interval = reading.interval_minutes()?;
    let reported_at = reading.reported_at()?;
    let record = MeasurementRecord {
        usage_point_id: series.usage_point_id.clone(),
        ts: reported_at - Duration::minutes(i64::from(interval)),
        value: reading.value()?,
        measurement: series.measurement,
        record: RecordKind::Detail,
        interval_minutes: Some(interval),
    };
    validate(&record)?;
    Ok(record)
}

/// Daily peak readings keyed by the day they describe.
pub fn power_by_day(readings: &[IntervalReading]) -> Result<BTreeMap<Date, f64>, PayloadError> {
    readings
        .iter()
        .map(|r| Ok((r.reported_at()?.date(), r.value()?)))
        .collect()
}

/// Writes the outcome of a window through to the store.
pub struct RecordIngester<'a, S: ?Sized> {
    store: &'a S,
    series: &'a Series,
    today: Date,
}

impl<'a, S: Store + ?Sized> RecordIngester<'a, S> {
    pub fn new(store: &'a S, series: &'a Series, today: Date) -> Self {
        Self { store, series, today }
    }

    /// Cached readings are returned as records without touching the store.
    pub fn from_cache(&self, cached: BTreeMap<PrimitiveDateTime, f64>) -> Vec<MeasurementRecord> {
        cached
            .into_iter()
            .map(|(ts, value)| MeasurementRecord {
                usage_point_id: self.series.usage_point_id.clone(),
                ts,
                value,
                measurement: self.series.measurement,
                record: self.series.record,
                interval_minutes: None,
            })
            .collect()
    }

    /// Store the readings of a successful fetch. The whole payload is
    /// normalized first so a bad reading leaves the window untouched.
    /// Blacklisted days are neither stored nor counted as missed.
    pub async fn apply(&self, window: &Window, reading: &MeterReading) -> Result<Vec<MeasurementRecord>, SyncError> {
        // Load-curve readings may start on the day before the window.
        let first = window.begin.saturating_sub(Duration::days(1));
        let blacklisted = self.store.blacklisted_days(self.series, first, window.end).await?;
        let records = match self.series.record {
            RecordKind::Detail => self.apply_detail(reading, &blacklisted).await?,
            RecordKind::Power => self.apply_power(window, reading, &blacklisted).await?,
        };
        metrics::counter!("ingested_records_total").increment(records.len() as u64);
        Ok(records)
    }

    async fn apply_detail(
        &self,
        reading: &MeterReading,
        blacklisted: &BTreeSet<Date>,
    ) -> Result<Vec<MeasurementRecord>, SyncError> {
        let mut records = reading
            .interval_reading
            .iter()
            .map(|r| normalize_detail(self.series, r))
            .collect::<Result<Vec<_>, _>>()?;
        records.retain(|r| !blacklisted.contains(&r.day()));

        for record in &records {
            self.store.upsert(record).await?;
        }
        Ok(records)
    }

    /// Only days before today are settled: a day with a reading is stored,
    /// a day without one has its miss counter bumped.
    async fn apply_power(
        &self,
        window: &Window,
        reading: &MeterReading,
        blacklisted: &BTreeSet<Date>,
    ) -> Result<Vec<MeasurementRecord>, SyncError> {
        let by_day = power_by_day(&reading.interval_reading)?;
        let tracker = FailTracker::new(self.store, self.series);

        let mut records = Vec::new();
        let settled = days(window.begin, window.end).take_while(|d| *d < self.today);
        for day in settled.filter(|d| !blacklisted.contains(d)) {
            match by_day.get(&day) {
                Some(value) => {
                    let record = MeasurementRecord {
                        usage_point_id: self.series.usage_point_id.clone(),
                        ts: midnight(day),
                        value: *value,
                        measurement: self.series.measurement,
                        record: RecordKind::Power,
                        interval_minutes: None,
                    };
                    validate(&record)?;
                    self.store.upsert(&record).await?;
                    records.push(record);
                }
                None => {
                    tracker.record_miss(day).await?;
                }
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::payload::ReadingValue;
    use crate::store::MemoryStore;
    use metering_client::domain::MeasurementKind;
    use time::macros::date;

    fn reading(date: &str, value: &str, interval: Option<&str>) -> IntervalReading {
        IntervalReading {
            value: ReadingValue::Text(value.to_string()),
            date: date.to_string(),
            interval_length: interval.map(str::to_string),
        }
    }

    #[test]
    fn detail_reading_is_stored_at_interval_start() {
        let series = Series::detail("pdl-1", MeasurementKind::Consumption);
        let record = normalize_detail(&series, &reading("2024-01-10 00:30:00", "412", Some("PT30M"))).unwrap();

        assert_eq!(record.ts, datetime!(2024-01-10 00:00:00));
        assert_eq!(record.value, 412.0);
        assert_eq!(record.interval_minutes, Some(30));
        assert_eq!(record.record, RecordKind::Detail);
    }

    #[test]
    fn detail_reading_at_midnight_belongs_to_previous_day() {
        let series = Series::detail("pdl-1", MeasurementKind::Production);
        let record = normalize_detail(&series, &reading("2024-03-01 00:00:00", "10", Some("PT10M"))).unwrap();
        assert_eq!(record.ts, datetime!(2024-02-29 23:50:00));
    }

    #[test]
    fn detail_reading_without_interval_is_malformed() {
        let series = Series::detail("pdl-1", MeasurementKind::Consumption);
        assert!(normalize_detail(&series, &reading("2024-01-10 00:30:00", "1", None)).is_err());
    }

    #[test]
    fn negative_and_out_of_range_values_are_rejected() {
        let series = Series::detail("pdl-1", MeasurementKind::Consumption);
        assert!(matches!(
            normalize_detail(&series, &reading("2024-01-10 00:30:00", "-4", Some("PT30M"))),
            Err(PayloadError::Rejected(_))
        ));
        assert!(matches!(
            normalize_detail(&series, &reading("1999-12-31 23:30:00", "4", Some("PT30M"))),
            Err(PayloadError::Rejected(_))
        ));
    }

    #[test]
    fn power_readings_are_keyed_by_day_of_the_peak() {
        let by_day = power_by_day(&[
            reading("2024-01-01 18:42:00", "6120", None),
            reading("2024-01-02 07:10:00", "5400", None),
        ])
        .unwrap();

        assert_eq!(by_day.get(&date!(2024 - 01 - 01)), Some(&6120.0));
        assert_eq!(by_day.get(&date!(2024 - 01 - 02)), Some(&5400.0));
    }

    fn meter_reading(readings: Vec<IntervalReading>) -> MeterReading {
        MeterReading {
            interval_reading: readings,
        }
    }

    #[tokio::test]
    async fn blacklisted_power_day_is_skipped_without_a_miss() {
        let store = MemoryStore::new();
        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        store.set_blacklisted(&series, date!(2024 - 01 - 02), true).await.unwrap();

        let ingester = RecordIngester::new(&store, &series, date!(2024 - 01 - 10));
        let window = Window {
            begin: date!(2024 - 01 - 01),
            end: date!(2024 - 01 - 04),
            is_final: true,
        };
        let records = ingester
            .apply(
                &window,
                &meter_reading(vec![
                    reading("2024-01-01 18:42:00", "6120", None),
                    reading("2024-01-02 07:10:00", "5400", None),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].day(), date!(2024 - 01 - 01));
        assert_eq!(store.get_fail_count(&series, date!(2024 - 01 - 02)).await.unwrap(), 0);
        assert_eq!(store.get_fail_count(&series, date!(2024 - 01 - 03)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blacklisted_load_curve_day_is_not_stored() {
        let store = MemoryStore::new();
        let series = Series::detail("pdl-1", MeasurementKind::Consumption);
        store.set_blacklisted(&series, date!(2024 - 01 - 02), true).await.unwrap();

        let ingester = RecordIngester::new(&store, &series, date!(2024 - 01 - 10));
        let window = Window {
            begin: date!(2024 - 01 - 01),
            end: date!(2024 - 01 - 03),
            is_final: true,
        };
        ingester
            .apply(
                &window,
                &meter_reading(vec![
                    reading("2024-01-01 00:30:00", "412", Some("PT30M")),
                    reading("2024-01-02 00:30:00", "388", Some("PT30M")),
                ]),
            )
            .await
            .unwrap();

        let stored = store.records(&series);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].ts, datetime!(2024-01-01 00:00:00));
    }
}
