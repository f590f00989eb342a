pub mod http;
pub mod payload;

use metering_client::domain::{RecordKind, Series};
use time::Date;

pub use http::HttpUpstream;
pub use payload::{error_detail, parse_meter_reading, IntervalReading, MeterReading, PayloadError};

/// Raw answer of the metering API, before any classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status_code: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn new(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
        }
    }
}

/// The request never produced a response (connect failure, timeout, ...).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get(&self, endpoint: &str) -> Result<UpstreamResponse, TransportError>;
}

#[async_trait::async_trait]
impl<U: UpstreamClient + ?Sized> UpstreamClient for std::sync::Arc<U> {
    async fn get(&self, endpoint: &str) -> Result<UpstreamResponse, TransportError> {
        (**self).get(endpoint).await
    }
}

/// Build the API path for one series over `[begin, end)`.
///
/// `cache` asks the upstream to serve the range from its own cache.
pub fn endpoint(series: &Series, begin: Date, end: Date, cache: bool) -> String {
    let resource = match series.record {
        RecordKind::Detail => format!("{}_load_curve", series.measurement),
        RecordKind::Power => format!("daily_{}_max_power", series.measurement),
    };

    let mut path = format!(
        "{resource}/{}/start/{begin}/end/{end}",
        series.usage_point_id
    );
    if cache {
        path.push_str("/cache");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use metering_client::domain::MeasurementKind;
    use time::macros::date;

    #[test]
    fn detail_endpoint_encodes_kind_point_and_dates() {
        let series = Series::detail("14295224261882", MeasurementKind::Production);
        let path = endpoint(&series, date!(2024 - 01 - 03), date!(2024 - 01 - 10), false);
        assert_eq!(
            path,
            "production_load_curve/14295224261882/start/2024-01-03/end/2024-01-10"
        );
    }

    #[test]
    fn power_endpoint_carries_cache_suffix_when_enabled() {
        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        let path = endpoint(&series, date!(2023 - 12 - 01), date!(2024 - 01 - 01), true);
        assert_eq!(
            path,
            "daily_consumption_max_power/pdl-1/start/2023-12-01/end/2024-01-01/cache"
        );
    }
}
