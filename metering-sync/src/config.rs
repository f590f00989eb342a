use serde::{Deserialize, Deserializer};
use std::fs;
use time::{macros::format_description, Date};

use metering_client::domain::{MeasurementKind, RecordKind, Series};

use crate::sync::SeriesPlan;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub detail_max_days: i64,
    pub power_max_days: i64,
    pub detail_chunk_days: i64,
    pub power_chunk_days: i64,
    /// Pause between two scheduled runs.
    pub cycle_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            detail_max_days: 1095,
            power_max_days: 1095,
            detail_chunk_days: 7,
            power_chunk_days: 1095,
            cycle_secs: 14_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// One layer of usage point settings. Unset fields leave the value of the
/// previous layer alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UsagePointOverride {
    pub cache: Option<bool>,
    pub consumption: Option<bool>,
    pub consumption_detail: Option<bool>,
    pub consumption_max_power: Option<bool>,
    pub production: Option<bool>,
    pub production_detail: Option<bool>,
    #[serde(deserialize_with = "iso_date")]
    pub consumption_max_date: Option<Date>,
    #[serde(deserialize_with = "iso_date")]
    pub consumption_detail_max_date: Option<Date>,
    #[serde(deserialize_with = "iso_date")]
    pub production_detail_max_date: Option<Date>,
    #[serde(deserialize_with = "iso_date")]
    pub last_activation_date: Option<Date>,
    pub offpeak_hours_0: Option<String>,
    pub offpeak_hours_1: Option<String>,
    pub offpeak_hours_2: Option<String>,
    pub offpeak_hours_3: Option<String>,
    pub offpeak_hours_4: Option<String>,
    pub offpeak_hours_5: Option<String>,
    pub offpeak_hours_6: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsagePointEntry {
    pub id: String,
    #[serde(flatten)]
    pub settings: UsagePointOverride,
    /// Values from the supply contract; they win over everything else.
    #[serde(default)]
    pub contract: UsagePointOverride,
}

/// Fully resolved settings of one usage point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsagePointSettings {
    pub id: String,
    pub cache: bool,
    pub consumption: bool,
    pub consumption_detail: bool,
    pub consumption_max_power: bool,
    pub production: bool,
    pub production_detail: bool,
    pub consumption_max_date: Option<Date>,
    pub consumption_detail_max_date: Option<Date>,
    pub production_detail_max_date: Option<Date>,
    pub last_activation_date: Option<Date>,
    /// Monday first.
    pub offpeak_hours: [Option<String>; 7],
}

impl UsagePointSettings {
    fn defaults(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cache: true,
            consumption: true,
            consumption_detail: true,
            consumption_max_power: true,
            production: false,
            production_detail: false,
            consumption_max_date: None,
            consumption_detail_max_date: None,
            production_detail_max_date: None,
            last_activation_date: None,
            offpeak_hours: Default::default(),
        }
    }

    /// Merge layers in order, later layers winning.
    pub fn resolve(id: &str, layers: &[&UsagePointOverride]) -> Self {
        let mut settings = Self::defaults(id);
        for layer in layers {
            settings.apply(layer);
        }
        settings
    }

    fn apply(&mut self, o: &UsagePointOverride) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        fn set_opt<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if value.is_some() {
                *slot = value.clone();
            }
        }

        set(&mut self.cache, &o.cache);
        set(&mut self.consumption, &o.consumption);
        set(&mut self.consumption_detail, &o.consumption_detail);
        set(&mut self.consumption_max_power, &o.consumption_max_power);
        set(&mut self.production, &o.production);
        set(&mut self.production_detail, &o.production_detail);
        set_opt(&mut self.consumption_max_date, &o.consumption_max_date);
        set_opt(&mut self.consumption_detail_max_date, &o.consumption_detail_max_date);
        set_opt(&mut self.production_detail_max_date, &o.production_detail_max_date);
        set_opt(&mut self.last_activation_date, &o.last_activation_date);
        let offpeak = [
            &o.offpeak_hours_0,
            &o.offpeak_hours_1,
            &o.offpeak_hours_2,
            &o.offpeak_hours_3,
            &o.offpeak_hours_4,
            &o.offpeak_hours_5,
            &o.offpeak_hours_6,
        ];
        for (slot, value) in self.offpeak_hours.iter_mut().zip(offpeak) {
            set_opt(slot, value);
        }
    }

    /// Series a scheduled run should keep in sync.
    pub fn enabled_series(&self) -> Vec<Series> {
        let mut series = Vec::new();
        if self.consumption && self.consumption_detail {
            series.push(Series::detail(&self.id, MeasurementKind::Consumption));
        }
        if self.consumption && self.consumption_max_power {
            series.push(Series::power(&self.id, MeasurementKind::Consumption));
        }
        if self.production && self.production_detail {
            series.push(Series::detail(&self.id, MeasurementKind::Production));
        }
        series
    }

    /// Oldest day the upstream is expected to hold for a series.
    pub fn activation_date(&self, series: &Series) -> Option<Date> {
        let specific = match (series.record, series.measurement) {
            (RecordKind::Detail, MeasurementKind::Consumption) => self.consumption_detail_max_date,
            (RecordKind::Detail, MeasurementKind::Production) => self.production_detail_max_date,
            (RecordKind::Power, _) => self.consumption_max_date,
        };
        specific.or(self.last_activation_date)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub defaults: UsagePointOverride,
    /// Site-wide overrides applied on top of each usage point's own settings.
    #[serde(default)]
    pub global: UsagePointOverride,
    #[serde(default)]
    pub usage_points: Vec<UsagePointEntry>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("METERING_CONFIG").unwrap_or_else(|_| "metering-config.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config {path}: {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Settings of a usage point: defaults, then its own entry, then the
    /// global overrides, then its contract.
    pub fn usage_point(&self, id: &str) -> Option<UsagePointSettings> {
        let entry = self.usage_points.iter().find(|p| p.id == id)?;
        Some(UsagePointSettings::resolve(
            id,
            &[&self.defaults, &entry.settings, &self.global, &entry.contract],
        ))
    }

    pub fn all_usage_points(&self) -> Vec<UsagePointSettings> {
        self.usage_points
            .iter()
            .filter_map(|p| self.usage_point(&p.id))
            .collect()
    }

    pub fn series_plan(&self, settings: &UsagePointSettings, series: &Series) -> SeriesPlan {
        let (chunk_days, max_history_days) = match series.record {
            RecordKind::Detail => (self.sync.detail_chunk_days, self.sync.detail_max_days),
            RecordKind::Power => (self.sync.power_chunk_days, self.sync.power_max_days),
        };
        SeriesPlan {
            chunk_days,
            max_history_days,
            activation_date: settings.activation_date(series),
            upstream_cache: settings.cache,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_timeout_secs() -> u64 {
    30
}

fn iso_date<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    raw.map(|s| {
        Date::parse(s.trim(), format_description!("[year]-[month]-[day]"))
            .map_err(|e| serde::de::Error::custom(format!("invalid date {s:?}: {e}")))
    })
    .transpose()
}
