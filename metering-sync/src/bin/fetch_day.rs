use std::{env, sync::Arc, time::Duration};

use anyhow::{bail, Result};
use metering_client::domain::{MeasurementKind, RecordKind, Series};
use metering_sync::{
    clock::SystemClock,
    config::AppConfig,
    observability,
    store::PgStore,
    sync::SyncRunner,
    upstream::HttpUpstream,
};
use sqlx::postgres::PgPoolOptions;
use time::{macros::format_description, Date};

/// Refetch one day of a series and print the stored reading.
///
/// Usage: fetch_day <usage_point_id> <consumption|production> <detail|power> <YYYY-MM-DD>
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 5 {
        bail!("usage: {} <usage_point_id> <consumption|production> <detail|power> <YYYY-MM-DD>", args[0]);
    }
    let measurement: MeasurementKind = args[2].parse()?;
    let record: RecordKind = args[3].parse()?;
    let day = Date::parse(&args[4], format_description!("[year]-[month]-[day]"))
        .map_err(|e| anyhow::anyhow!("invalid date {}: {e}", args[4]))?;

    let cfg = AppConfig::load()?;
    let Some(settings) = cfg.usage_point(&args[1]) else {
        bail!("usage point {} is not configured", args[1]);
    };
    let series = Series::new(settings.id.clone(), measurement, record);
    let plan = cfg.series_plan(&settings, &series);

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
    let upstream = Arc::new(HttpUpstream::new(
        &cfg.upstream.base_url,
        cfg.upstream.token.clone(),
        Duration::from_secs(cfg.upstream.timeout_secs),
    )?);

    let runner = SyncRunner::new(store, upstream, SystemClock);
    match runner.fetch_single_day(&series, &plan, day).await {
        Ok(record) => {
            println!("{}\t{}\t{}", series, record.ts, record.value);
            Ok(())
        }
        Err(failure) => match failure.fail_count {
            Some(count) => bail!("{failure} (missed {count} time(s))"),
            None => bail!("{failure}"),
        },
    }
}
