use thiserror::Error;

/// Structural misconfiguration. Raised once at setup, never per row.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("period {name} has invalid month range {start}-{end} (expected 1-12, start <= end)")]
    InvalidMonthRange { name: String, start: u32, end: u32 },
    #[error("periods {first} and {second} overlap")]
    OverlappingPeriods { first: String, second: String },
    #[error("period name {0} is defined more than once")]
    DuplicatePeriod(String),
    #[error("period name {0:?} is reserved")]
    ReservedPeriodName(String),
    #[error("invalid period window {0:?} (expected YEAR:START-END, e.g. 2025:1-5)")]
    InvalidWindow(String),
    #[error("metric {metric} references unknown record type {record_type}")]
    UnknownRecordType { metric: String, record_type: String },
    #[error("{owner} references field {field} which is not a {expected} field of {record_type}")]
    MissingField {
        owner: String,
        record_type: String,
        field: String,
        expected: String,
    },
    #[error("metric {0} is defined more than once")]
    DuplicateMetric(String),
    #[error("unknown metric {0}")]
    UnknownMetric(String),
}
