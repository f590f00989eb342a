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

/// Reset (mark for refetch) or delete stored readings of a series, either
/// for a single day or entirely, or add/lift the blacklist of one day.
///
/// Usage: purge <reset|delete|blacklist|unblacklist> <usage_point_id> <consumption|production> <detail|power> [YYYY-MM-DD]
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() != 5 && args.len() != 6 {
        bail!(
            "usage: {} <reset|delete|blacklist|unblacklist> <usage_point_id> <consumption|production> <detail|power> [YYYY-MM-DD]",
            args[0]
        );
    }
    let action = args[1].as_str();
    if !matches!(action, "reset" | "delete" | "blacklist" | "unblacklist") {
        bail!("unknown action {action}, expected reset, delete, blacklist or unblacklist");
    }
    let measurement: MeasurementKind = args[3].parse()?;
    let record: RecordKind = args[4].parse()?;
    let day = match args.get(5) {
        Some(raw) => Some(
            Date::parse(raw, format_description!("[year]-[month]-[day]"))
                .map_err(|e| anyhow::anyhow!("invalid date {raw}: {e}"))?,
        ),
        None => None,
    };
    let series = Series::new(args[2].clone(), measurement, record);

    let cfg = AppConfig::load()?;
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
    match (action, day) {
        ("reset", _) => runner.reset(&series, day).await?,
        ("delete", _) => runner.delete(&series, day).await?,
        (_, Some(day)) => runner.blacklist(&series, day, action == "blacklist").await?,
        (_, None) => bail!("{action} needs a date"),
    }

    match day {
        Some(day) => tracing::info!(%series, %day, action, "done"),
        None => tracing::info!(%series, action, "done for the whole series"),
    }
    Ok(())
}
