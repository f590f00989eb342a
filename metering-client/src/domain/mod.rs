mod measurement;

pub use measurement::{MeasurementKind, MeasurementRecord, RecordKind, Series, UnknownKind};
