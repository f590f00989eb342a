use std::{sync::Arc, time::Duration};

use anyhow::Result;
use metering_client::domain::MeasurementKind;
use metering_sync::{
    clock::SystemClock,
    config::{AppConfig, UsagePointSettings},
    metrics_server, observability,
    stat::{OffpeakSchedule, Stat},
    store::{PgStore, Store},
    sync::{SyncError, SyncRunner},
    upstream::{HttpUpstream, UpstreamClient},
};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;
    let store = Arc::new(PgStore::new(
        pool,
        cfg.database.max_retries,
        Duration::from_millis(cfg.database.retry_backoff_ms),
    ));
    store.ensure_schema().await?;

    let upstream = Arc::new(
        HttpUpstream::new(
            &cfg.upstream.base_url,
            cfg.upstream.token.clone(),
            Duration::from_secs(cfg.upstream.timeout_secs),
        )?,
    );
    let runner = SyncRunner::new(store.clone(), upstream, SystemClock);

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.sync.cycle_secs.max(1)));
    loop {
        ticker.tick().await;
        tracing::info!(usage_points = cfg.usage_points.len(), "starting sync cycle");

        for settings in cfg.all_usage_points() {
            sync_usage_point(&cfg, &runner, &settings).await;
            log_stats(store.clone(), &settings).await;
        }
    }
}

async fn sync_usage_point<S, U>(cfg: &AppConfig, runner: &SyncRunner<S, U, SystemClock>, settings: &UsagePointSettings)
where
    S: Store + ?Sized,
    U: UpstreamClient + ?Sized,
{
    for series in settings.enabled_series() {
        let plan = cfg.series_plan(settings, &series);
        let report = runner.sync(&series, &plan).await;

        // Access is per usage point; the other series would be refused too.
        if let Some(e @ SyncError::UpstreamForbidden { .. }) = &report.fatal {
            tracing::error!(usage_point = %settings.id, error = %e, "skipping usage point");
            return;
        }
    }
}

async fn log_stats<S>(store: Arc<S>, settings: &UsagePointSettings)
where
    S: Store + ?Sized,
{
    if !(settings.consumption && settings.consumption_detail) {
        return;
    }
    let offpeak = match OffpeakSchedule::parse(&settings.offpeak_hours) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::warn!(usage_point = %settings.id, error = %e, "ignoring off-peak hours");
            OffpeakSchedule::default()
        }
    };
    let stat = Stat::new(store, SystemClock, settings.id.clone(), MeasurementKind::Consumption, offpeak);

    let summary = async {
        let yesterday = stat.day(1).await?;
        let week = stat.week_evolution().await?;
        let month = stat.month_evolution().await?;
        let year = stat.year_evolution().await?;
        let peak = stat.peak_offpeak_percent().await?;
        Ok::<_, metering_sync::stat::StatError>((yesterday, week, month, year, peak))
    };

    match summary.await {
        Ok((yesterday, week, month, year, peak)) => tracing::info!(
            usage_point = %settings.id,
            yesterday_wh = yesterday.total,
            week_evolution_pct = week,
            month_evolution_pct = month,
            year_evolution_pct = year,
            peak_share_pct = peak,
            "consumption summary"
        ),
        Err(e) => tracing::warn!(usage_point = %settings.id, error = %e, "failed to compute consumption summary"),
    }
}
