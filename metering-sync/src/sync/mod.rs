//! Backward backfill of metering series.
//!
//! A run walks windows from the most recent one back to the oldest allowed
//! day. Each window is served from the store when complete, otherwise fetched
//! upstream, classified and written through. Windows are processed one after
//! another; a forbidden or rejected request ends the run, any other failure
//! only skips its window.

pub mod error;
pub mod fail;
pub mod gate;
pub mod ingest;
pub mod planner;

use std::sync::Arc;

use metering_client::domain::{MeasurementRecord, RecordKind, Series};
use time::{Date, Duration};

use crate::{
    clock::Clock,
    store::{day_bounds, Store, StoreError},
    upstream::{parse_meter_reading, UpstreamClient},
};

pub use error::SyncError;
pub use fail::FailTracker;
pub use gate::{CacheGate, WindowSource};
pub use ingest::RecordIngester;
pub use planner::{SyncBounds, TimeWindowPlanner, Window};

/// Per-series parameters of a run, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesPlan {
    pub chunk_days: i64,
    pub max_history_days: i64,
    pub activation_date: Option<Date>,
    /// Ask the upstream to answer from its own cache.
    pub upstream_cache: bool,
}

impl SeriesPlan {
    pub fn bounds(&self, today: Date) -> SyncBounds {
        SyncBounds::new(today, self.max_history_days, self.activation_date)
    }
}

/// A window that failed without ending the run.
#[derive(Debug)]
pub struct SkippedWindow {
    pub window: Window,
    pub error: SyncError,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// Records of every successful window, fetched or cached, in window order.
    pub records: Vec<MeasurementRecord>,
    pub windows: usize,
    pub cached_windows: usize,
    pub skipped: Vec<SkippedWindow>,
    /// The error that ended the run early, if any.
    pub fatal: Option<SyncError>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.fatal.is_none()
    }
}

/// A single-day refetch that produced no record.
#[derive(thiserror::Error, Debug)]
#[error("{notification}")]
pub struct DayFetchFailure {
    pub error: SyncError,
    pub notification: String,
    /// Accumulated miss counter of the requested day; `None` when the store
    /// could not be asked.
    pub fail_count: Option<u32>,
}

struct WindowOutcome {
    records: Vec<MeasurementRecord>,
    cached: bool,
}

pub struct SyncRunner<S: ?Sized, U: ?Sized, C> {
    store: Arc<S>,
    upstream: Arc<U>,
    clock: C,
}

impl<S, U, C> SyncRunner<S, U, C>
where
    S: Store + ?Sized,
    U: UpstreamClient + ?Sized,
    C: Clock,
{
    pub fn new(store: Arc<S>, upstream: Arc<U>, clock: C) -> Self {
        Self { store, upstream, clock }
    }

    /// Backfill one series down to its lower bound.
    pub async fn sync(&self, series: &Series, plan: &SeriesPlan) -> SyncReport {
        let today = self.clock.today();
        let bounds = plan.bounds(today);
        let mut report = SyncReport::default();

        tracing::info!(
            %series,
            lower_bound = %bounds.lower_bound(),
            chunk_days = plan.chunk_days,
            "starting sync"
        );

        for window in TimeWindowPlanner::new(today, plan.chunk_days, bounds) {
            report.windows += 1;
            metrics::counter!("sync_windows_total").increment(1);

            match self.process_window(series, plan, &window, today).await {
                Ok(outcome) => {
                    if outcome.cached {
                        report.cached_windows += 1;
                    }
                    report.records.extend(outcome.records);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(
                        %series,
                        error = %e,
                        status = ?e.status_code(),
                        begin = %window.begin,
                        end = %window.end,
                        "stopping sync"
                    );
                    metrics::counter!("sync_fatal_errors_total").increment(1);
                    report.fatal = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        %series,
                        error = %e,
                        begin = %window.begin,
                        end = %window.end,
                        "window failed, moving on"
                    );
                    metrics::counter!("sync_upstream_errors_total").increment(1);
                    report.skipped.push(SkippedWindow { window, error: e });
                }
            }
        }

        tracing::info!(
            %series,
            windows = report.windows,
            cached = report.cached_windows,
            skipped = report.skipped.len(),
            records = report.records.len(),
            complete = report.is_complete(),
            "sync finished"
        );
        report
    }

    /// Refetch the window around one day and return that day's reading.
    ///
    /// The window ignores the sync bounds.
    pub async fn fetch_single_day(
        &self,
        series: &Series,
        plan: &SeriesPlan,
        day: Date,
    ) -> Result<MeasurementRecord, DayFetchFailure> {
        let margin = match series.record {
            RecordKind::Detail => Duration::days(2),
            RecordKind::Power => Duration::days(1),
        };
        let window = Window {
            begin: day.saturating_sub(margin),
            end: day.saturating_add(margin),
            is_final: true,
        };

        let today = self.clock.today();
        let error = match self.process_window(series, plan, &window, today).await {
            Ok(outcome) => match outcome.records.into_iter().find(|r| r.day() == day) {
                Some(record) => return Ok(record),
                None => SyncError::NoDataForDate(day),
            },
            Err(e) => e,
        };

        let fail_count = match FailTracker::new(self.store.as_ref(), series).count(day).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(%series, %day, error = %e, "could not read miss counter");
                None
            }
        };
        tracing::warn!(%series, %day, error = %error, ?fail_count, "single day fetch failed");

        Err(DayFetchFailure {
            notification: error.to_string(),
            error,
            fail_count,
        })
    }

    /// Mark stored readings for refetch: one day, or the whole series.
    pub async fn reset(&self, series: &Series, day: Option<Date>) -> Result<(), StoreError> {
        match (day, series.record) {
            (None, _) => self.store.reset_series(series).await,
            (Some(day), RecordKind::Detail) => {
                let (begin, end) = day_bounds(day);
                self.store.reset_range(series, begin, end).await
            }
            (Some(day), RecordKind::Power) => self.store.reset_single(series, day).await,
        }
    }

    /// Remove stored readings: one day, or the whole series.
    pub async fn delete(&self, series: &Series, day: Option<Date>) -> Result<(), StoreError> {
        match (day, series.record) {
            (None, _) => self.store.delete_series(series).await,
            (Some(day), RecordKind::Detail) => {
                let (begin, end) = day_bounds(day);
                self.store.delete_range(series, begin, end).await
            }
            (Some(day), RecordKind::Power) => self.store.delete_single(series, day).await,
        }
    }

    /// Exclude one day from fetching and rollups, or lift the exclusion.
    pub async fn blacklist(&self, series: &Series, day: Date, blacklisted: bool) -> Result<(), StoreError> {
        self.store.set_blacklisted(series, day, blacklisted).await?;
        tracing::info!(%series, %day, blacklisted, "day blacklist updated");
        Ok(())
    }

    async fn process_window(
        &self,
        series: &Series,
        plan: &SeriesPlan,
        window: &Window,
        today: Date,
    ) -> Result<WindowOutcome, SyncError> {
        let gate = CacheGate::new(self.store.as_ref(), self.upstream.as_ref());
        let ingester = RecordIngester::new(self.store.as_ref(), series, today);

        match gate.resolve(series, window, today, plan.upstream_cache).await? {
            WindowSource::Cache(cached) => Ok(WindowOutcome {
                records: ingester.from_cache(cached),
                cached: true,
            }),
            WindowSource::Upstream(response) => {
                let response = response?;
                if response.status_code != 200 {
                    return Err(SyncError::from_status(&response));
                }
                let reading = parse_meter_reading(&response.body)?;
                Ok(WindowOutcome {
                    records: ingester.apply(window, &reading).await?,
                    cached: false,
                })
            }
        }
    }
}
