use sqlx::PgPool;
use time::{Date, PrimitiveDateTime};

use crate::domain::{MeasurementRecord, Series};

/// Tables backing the metering store. Both are keyed so that re-inserting a
/// reading (or re-counting a failure) overwrites instead of duplicating.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS measurements (
    usage_point_id   TEXT             NOT NULL,
    ts               TIMESTAMP        NOT NULL,
    measurement      TEXT             NOT NULL,
    record           TEXT             NOT NULL,
    value            DOUBLE PRECISION NOT NULL,
    interval_minutes INTEGER,
    stale            BOOLEAN          NOT NULL DEFAULT FALSE,
    PRIMARY KEY (usage_point_id, ts, measurement, record)
);

CREATE TABLE IF NOT EXISTS measurement_failures (
    usage_point_id TEXT    NOT NULL,
    day            DATE    NOT NULL,
    measurement    TEXT    NOT NULL,
    record         TEXT    NOT NULL,
    fail_count     INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (usage_point_id, day, measurement, record)
);

CREATE TABLE IF NOT EXISTS measurement_blacklist (
    usage_point_id TEXT NOT NULL,
    day            DATE NOT NULL,
    measurement    TEXT NOT NULL,
    record         TEXT NOT NULL,
    PRIMARY KEY (usage_point_id, day, measurement, record)
);
"#;

/// What the store needs of a row to decide whether a day is covered.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RangeRow {
    pub ts: PrimitiveDateTime,
    pub value: f64,
    pub interval_minutes: Option<i32>,
    pub stale: bool,
}

impl RangeRow {
    /// Length of the interval the row stands for; `None` for daily rows or
    /// a negative length.
    pub fn interval_minutes(&self) -> Option<u32> {
        self.interval_minutes.and_then(|m| u32::try_from(m).ok())
    }
}

pub async fn ensure_schema(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await.map(|_| ())
}

/// Fetch the time-ordered rows of one series with `start <= ts < end`,
/// stale rows included.
pub async fn load_range(
    pool: &PgPool,
    series: &Series,
    start: PrimitiveDateTime,
    end: PrimitiveDateTime,
) -> sqlx::Result<Vec<RangeRow>> {
    sqlx::query_as::<_, RangeRow>(
        r#"
        SELECT
            ts,
            value,
            interval_minutes,
            stale
        FROM measurements
        WHERE usage_point_id = $1
          AND measurement = $2
          AND record = $3
          AND ts >= $4
          AND ts <  $5
        ORDER BY ts
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

pub async fn upsert_measurement(pool: &PgPool, m: &MeasurementRecord) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO measurements (usage_point_id, ts, measurement, record, value, interval_minutes, stale)
        VALUES ($1, $2, $3, $4, $5, $6, FALSE)
        ON CONFLICT (usage_point_id, ts, measurement, record)
        DO UPDATE SET value = EXCLUDED.value,
                      interval_minutes = EXCLUDED.interval_minutes,
                      stale = FALSE
        "#,
    )
    .bind(&m.usage_point_id)
    .bind(m.ts)
    .bind(m.measurement.as_str())
    .bind(m.record.as_str())
    .bind(m.value)
    .bind(m.interval_minutes.and_then(|v| i32::try_from(v).ok()))
    .execute(pool)
    .await
    .map(|_| ())
}

/// Bump the miss counter of one day and return its new value.
pub async fn increment_failure(pool: &PgPool, series: &Series, day: Date) -> sqlx::Result<i32> {
    sqlx::query_scalar::<_, i32>(
        r#"
        INSERT INTO measurement_failures (usage_point_id, day, measurement, record, fail_count)
        VALUES ($1, $2, $3, $4, 1)
        ON CONFLICT (usage_point_id, day, measurement, record)
        DO UPDATE SET fail_count = measurement_failures.fail_count + 1
        RETURNING fail_count
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(day)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .fetch_one(pool)
    .await
}

pub async fn failure_count(pool: &PgPool, series: &Series, day: Date) -> sqlx::Result<i32> {
    let count = sqlx::query_scalar::<_, i32>(
        r#"
        SELECT fail_count
        FROM measurement_failures
        WHERE usage_point_id = $1
          AND day = $2
          AND measurement = $3
          AND record = $4
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(day)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(count.unwrap_or(0))
}

/// Zero the value of every row in `[start, end)` (or the whole series when no
/// bound is given) and flag it for refetch.
pub async fn mark_stale(
    pool: &PgPool,
    series: &Series,
    start: Option<PrimitiveDateTime>,
    end: Option<PrimitiveDateTime>,
) -> sqlx::Result<u64> {
    let res = sqlx::query(
        r#"
        UPDATE measurements
        SET value = 0, stale = TRUE
        WHERE usage_point_id = $1
          AND measurement = $2
          AND record = $3
          AND ($4::timestamp IS NULL OR ts >= $4)
          AND ($5::timestamp IS NULL OR ts <  $5)
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}

pub async fn delete_measurements(
    pool: &PgPool,
    series: &Series,
    start: Option<PrimitiveDateTime>,
    end: Option<PrimitiveDateTime>,
) -> sqlx::Result<u64> {
    let res = sqlx::query(
        r#"
        DELETE FROM measurements
        WHERE usage_point_id = $1
          AND measurement = $2
          AND record = $3
          AND ($4::timestamp IS NULL OR ts >= $4)
          AND ($5::timestamp IS NULL OR ts <  $5)
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}

/// Drop the miss counters of the days in `[first, last]`, or of the whole
/// series when no bound is given.
pub async fn clear_failures(
    pool: &PgPool,
    series: &Series,
    first: Option<Date>,
    last: Option<Date>,
) -> sqlx::Result<u64> {
    let res = sqlx::query(
        r#"
        DELETE FROM measurement_failures
        WHERE usage_point_id = $1
          AND measurement = $2
          AND record = $3
          AND ($4::date IS NULL OR day >= $4)
          AND ($5::date IS NULL OR day <= $5)
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .bind(first)
    .bind(last)
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}

/// Add or lift the exclusion of one day.
pub async fn set_blacklisted(pool: &PgPool, series: &Series, day: Date, blacklisted: bool) -> sqlx::Result<u64> {
    let sql = if blacklisted {
        r#"
        INSERT INTO measurement_blacklist (usage_point_id, day, measurement, record)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (usage_point_id, day, measurement, record) DO NOTHING
        "#
    } else {
        r#"
        DELETE FROM measurement_blacklist
        WHERE usage_point_id = $1
          AND day = $2
          AND measurement = $3
          AND record = $4
        "#
    };
    let res = sqlx::query(sql)
        .bind(&series.usage_point_id)
        .bind(day)
        .bind(series.measurement.as_str())
        .bind(series.record.as_str())
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}

/// Excluded days of a series with `start <= day < end`.
pub async fn load_blacklist(pool: &PgPool, series: &Series, start: Date, end: Date) -> sqlx::Result<Vec<Date>> {
    sqlx::query_scalar::<_, Date>(
        r#"
        SELECT day
        FROM measurement_blacklist
        WHERE usage_point_id = $1
          AND measurement = $2
          AND record = $3
          AND day >= $4
          AND day <  $5
        ORDER BY day
        "#,
    )
    .bind(&series.usage_point_id)
    .bind(series.measurement.as_str())
    .bind(series.record.as_str())
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}
