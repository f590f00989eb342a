//! Calendar rollups over stored load-curve readings.
//!
//! Everything here is read-only and tolerates a range that a concurrent sync
//! is still filling in: missing days simply contribute nothing.

pub mod offpeak;
pub mod period;

use std::sync::Arc;

use metering_client::domain::{MeasurementKind, Series};
use time::{Date, Duration};

use crate::{
    clock::Clock,
    store::{Store, StoreError},
};

pub use offpeak::OffpeakSchedule;
pub use period::{period_span, DateSpan, PeriodKind, PeriodOffset};

/// Days covered by [`Stat::peak_offpeak_percent`], ending yesterday.
pub const PEAK_OFFPEAK_DAYS: i64 = 30;

#[derive(thiserror::Error, Debug)]
pub enum StatError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("calendar arithmetic out of range: {0}")]
    Calendar(#[from] time::error::ComponentRange),
}

/// Total over an inclusive day range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationWindow {
    pub begin: Date,
    pub end: Date,
    pub total: f64,
    /// Number of readings summed; 0 means nothing was stored.
    pub samples: usize,
}

/// `(current − previous) / previous × 100`, with 0 standing in for an
/// undefined rate when there is nothing to compare against.
pub fn evolution_percent(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    (current - previous) / previous * 100.0
}

/// Share of peak-hour energy, `hp / (hp + hc) × 100`, 0 when both are 0.
pub fn peak_share_percent(hp: f64, hc: f64) -> f64 {
    let total = hp + hc;
    if total == 0.0 {
        return 0.0;
    }
    hp / total * 100.0
}

pub struct Stat<S: ?Sized, C> {
    store: Arc<S>,
    clock: C,
    series: Series,
    offpeak: OffpeakSchedule,
}

impl<S, C> Stat<S, C>
where
    S: Store + ?Sized,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        clock: C,
        usage_point_id: impl Into<String>,
        measurement: MeasurementKind,
        offpeak: OffpeakSchedule,
    ) -> Self {
        Self {
            store,
            clock,
            series: Series::detail(usage_point_id, measurement),
            offpeak,
        }
    }

    /// The day `offset` days before today (0 is today).
    pub async fn day(&self, offset: i64) -> Result<AggregationWindow, StatError> {
        let day = self.clock.today().saturating_sub(Duration::days(offset));
        self.total(DateSpan { first: day, last: day }).await
    }

    pub async fn period(&self, kind: PeriodKind, offset: PeriodOffset) -> Result<AggregationWindow, StatError> {
        let span = period_span(kind, offset, self.clock.today())?;
        self.total(span).await
    }

    /// Year-over-year change of the current period, to date.
    pub async fn evolution(&self, kind: PeriodKind) -> Result<f64, StatError> {
        let current = self.period(kind, PeriodOffset::Current).await?;
        let previous = self.period(kind, PeriodOffset::CurrentLastYear).await?;
        Ok(evolution_percent(current.total, previous.total))
    }

    pub async fn week_evolution(&self) -> Result<f64, StatError> {
        self.evolution(PeriodKind::Week).await
    }

    pub async fn month_evolution(&self) -> Result<f64, StatError> {
        self.evolution(PeriodKind::Month).await
    }

    pub async fn year_evolution(&self) -> Result<f64, StatError> {
        self.evolution(PeriodKind::Year).await
    }

    pub async fn peak_offpeak_percent(&self) -> Result<f64, StatError> {
        let today = self.clock.today();
        let begin = today.saturating_sub(Duration::days(PEAK_OFFPEAK_DAYS));
        let snapshot = self.store.get_range(&self.series, begin, today).await?;

        let (hc, hp) = snapshot
            .records
            .iter()
            .fold((0.0_f64, 0.0_f64), |(hc, hp), (ts, value)| {
                if self.offpeak.is_offpeak(*ts) {
                    (hc + value, hp)
                } else {
                    (hc, hp + value)
                }
            });
        Ok(peak_share_percent(hp, hc))
    }

    async fn total(&self, span: DateSpan) -> Result<AggregationWindow, StatError> {
        let end = span.last.next_day().unwrap_or(span.last);
        let snapshot = self.store.get_range(&self.series, span.first, end).await?;
        Ok(AggregationWindow {
            begin: span.first,
            end: span.last,
            total: snapshot.records.values().sum(),
            samples: snapshot.records.len(),
        })
    }
}
