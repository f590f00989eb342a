//! Body shapes returned by the metering API.
//!
//! A successful answer looks like
//! `{"meter_reading": {"interval_reading": [{"value": "412", "date": "2024-01-10 00:30:00", "interval_length": "PT30M"}]}}`.
//! Error answers usually carry a `{"detail": "..."}` object.

use serde::Deserialize;
use time::{macros::format_description, PrimitiveDateTime};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeterReading {
    #[serde(default)]
    pub interval_reading: Vec<IntervalReading>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntervalReading {
    pub value: ReadingValue,
    pub date: String,
    #[serde(default)]
    pub interval_length: Option<String>,
}

/// The API sends values as strings, but numbers are accepted too.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
struct Envelope {
    meter_reading: Option<MeterReading>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("empty response body")]
    Empty,
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response has no meter_reading object")]
    MissingMeterReading,
    #[error("invalid reading value {0:?}")]
    InvalidValue(String),
    #[error("invalid reading date {0:?}")]
    InvalidDate(String),
    #[error("invalid interval length {0:?}")]
    InvalidInterval(String),
    #[error("reading rejected: {0}")]
    Rejected(String),
}

pub fn parse_meter_reading(body: &str) -> Result<MeterReading, PayloadError> {
    if body.trim().is_empty() {
        return Err(PayloadError::Empty);
    }
    let envelope: Envelope = serde_json::from_str(body)?;
    envelope.meter_reading.ok_or(PayloadError::MissingMeterReading)
}

/// The `detail` message of an error body, if the body has one.
pub fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl IntervalReading {
    pub fn value(&self) -> Result<f64, PayloadError> {
        match &self.value {
            ReadingValue::Number(v) => Ok(*v),
            ReadingValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| PayloadError::InvalidValue(s.clone())),
        }
    }

    /// Reported instant of the reading; for load curves this is the end of
    /// the interval.
    pub fn reported_at(&self) -> Result<PrimitiveDateTime, PayloadError> {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        PrimitiveDateTime::parse(self.date.trim(), format)
            .map_err(|_| PayloadError::InvalidDate(self.date.clone()))
    }

    /// Interval length in minutes, from an ISO-8601-ish `PT30M`.
    pub fn interval_minutes(&self) -> Result<u32, PayloadError> {
        let raw = self
            .interval_length
            .as_deref()
            .ok_or_else(|| PayloadError::InvalidInterval(String::new()))?;
        let digits: String = raw
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        match digits.parse::<u32>() {
            Ok(minutes) if minutes > 0 => Ok(minutes),
            _ => Err(PayloadError::InvalidInterval(raw.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_meter_reading_with_string_and_number_values() {
        let body = r#"{"meter_reading": {"interval_reading": [
            {"value": "412", "date": "2024-01-10 00:30:00", "interval_length": "PT30M"},
            {"value": 388.5, "date": "2024-01-10 01:00:00", "interval_length": "PT30M"}
        ]}}"#;

        let reading = parse_meter_reading(body).unwrap();
        assert_eq!(reading.interval_reading.len(), 2);
        assert_eq!(reading.interval_reading[0].value().unwrap(), 412.0);
        assert_eq!(reading.interval_reading[1].value().unwrap(), 388.5);
        assert_eq!(
            reading.interval_reading[0].reported_at().unwrap(),
            datetime!(2024-01-10 00:30:00)
        );
        assert_eq!(reading.interval_reading[0].interval_minutes().unwrap(), 30);
    }

    #[test]
    fn missing_meter_reading_is_a_distinct_error() {
        let err = parse_meter_reading(r#"{"usage_point_id": "x"}"#).unwrap_err();
        assert!(matches!(err, PayloadError::MissingMeterReading));
    }

    #[test]
    fn empty_and_garbage_bodies_are_rejected() {
        assert!(matches!(parse_meter_reading("  "), Err(PayloadError::Empty)));
        assert!(matches!(
            parse_meter_reading("<html>bad gateway</html>"),
            Err(PayloadError::InvalidJson(_))
        ));
    }

    #[test]
    fn meter_reading_without_readings_is_empty_not_malformed() {
        let reading = parse_meter_reading(r#"{"meter_reading": {}}"#).unwrap();
        assert!(reading.interval_reading.is_empty());
    }

    #[test]
    fn interval_length_requires_a_positive_number() {
        let mut reading = IntervalReading {
            value: ReadingValue::Number(1.0),
            date: "2024-01-10 00:30:00".to_string(),
            interval_length: Some("PT10M".to_string()),
        };
        assert_eq!(reading.interval_minutes().unwrap(), 10);

        reading.interval_length = Some("PTM".to_string());
        assert!(reading.interval_minutes().is_err());
        reading.interval_length = None;
        assert!(reading.interval_minutes().is_err());
    }

    #[test]
    fn error_detail_reads_string_detail_only_when_present() {
        assert_eq!(
            error_detail(r#"{"detail": "consent expired"}"#).as_deref(),
            Some("consent expired")
        );
        assert_eq!(error_detail(r#"{"message": "nope"}"#), None);
        assert_eq!(error_detail("not json"), None);
    }
}
