use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Date, PrimitiveDateTime};

/// Direction of the energy flow measured at a usage point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    Consumption,
    Production,
}

impl MeasurementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consumption => "consumption",
            Self::Production => "production",
        }
    }
}

/// Shape of the stored readings: sub-daily load curve or daily peak power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Detail,
    Power,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detail => "detail",
            Self::Power => "power",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {what}: {value:?}")]
pub struct UnknownKind {
    pub what: &'static str,
    pub value: String,
}

impl FromStr for MeasurementKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumption" => Ok(Self::Consumption),
            "production" => Ok(Self::Production),
            other => Err(UnknownKind {
                what: "measurement kind",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for RecordKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detail" => Ok(Self::Detail),
            "power" => Ok(Self::Power),
            other => Err(UnknownKind {
                what: "record kind",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored time series: a usage point, a flow direction and a record shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Series {
    pub usage_point_id: String,
    pub measurement: MeasurementKind,
    pub record: RecordKind,
}

impl Series {
    pub fn new(usage_point_id: impl Into<String>, measurement: MeasurementKind, record: RecordKind) -> Self {
        Self {
            usage_point_id: usage_point_id.into(),
            measurement,
            record,
        }
    }

    pub fn detail(usage_point_id: impl Into<String>, measurement: MeasurementKind) -> Self {
        Self::new(usage_point_id, measurement, RecordKind::Detail)
    }

    pub fn power(usage_point_id: impl Into<String>, measurement: MeasurementKind) -> Self {
        Self::new(usage_point_id, measurement, RecordKind::Power)
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.usage_point_id, self.measurement, self.record)
    }
}

/// A single metering reading as stored.
///
/// `ts` is the start of the measured interval. Power readings are stored at
/// midnight of the day they describe and carry no interval length.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub usage_point_id: String,
    pub ts: PrimitiveDateTime,
    pub value: f64,
    pub measurement: MeasurementKind,
    pub record: RecordKind,
    pub interval_minutes: Option<u32>,
}

impl MeasurementRecord {
    pub fn day(&self) -> Date {
        self.ts.date()
    }

    pub fn series(&self) -> Series {
        Series::new(self.usage_point_id.clone(), self.measurement, self.record)
    }

    pub fn belongs_to(&self, series: &Series) -> bool {
        self.usage_point_id == series.usage_point_id
            && self.measurement == series.measurement
            && self.record == series.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_names() {
        for kind in [MeasurementKind::Consumption, MeasurementKind::Production] {
            assert_eq!(kind.as_str().parse::<MeasurementKind>(), Ok(kind));
        }
        for kind in [RecordKind::Detail, RecordKind::Power] {
            assert_eq!(kind.as_str().parse::<RecordKind>(), Ok(kind));
        }
    }

    #[test]
    fn unknown_kind_is_reported_with_its_value() {
        let err = "gas".parse::<MeasurementKind>().unwrap_err();
        assert_eq!(err.value, "gas");
        assert_eq!(err.to_string(), "unknown measurement kind: \"gas\"");
    }

    #[test]
    fn series_display_joins_its_key() {
        let series = Series::power("pdl-1", MeasurementKind::Consumption);
        assert_eq!(series.to_string(), "pdl-1/consumption/power");
    }
}
