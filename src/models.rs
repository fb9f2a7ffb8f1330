use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single typed cell of a transactional row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Flag(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// Grouping key used for distinct counts and segment breakdowns.
    pub fn as_key(&self) -> String {
        match self {
            Value::Number(value) => value.to_string(),
            Value::Text(value) => value.clone(),
            Value::Flag(value) => value.to_string(),
            Value::Timestamp(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Number,
    Text,
    Flag,
    Timestamp,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FieldKind::Number => "numeric",
            FieldKind::Text => "text",
            FieldKind::Flag => "flag",
            FieldKind::Timestamp => "timestamp",
        };
        f.write_str(label)
    }
}

/// A transactional row: field name to typed value. Missing cells are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_number)
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_flag)
    }

    pub fn timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        self.get(name).and_then(Value::as_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    /// Filled by a join after loading rather than read from the source file.
    pub derived: bool,
}

/// Schema of one record collection (orders, deliveries, ratings, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub file_name: String,
    pub timestamp_field: String,
    pub fields: Vec<FieldSpec>,
}

impl RecordType {
    pub fn new(name: &str, file_name: &str, timestamp_field: &str) -> Self {
        Self {
            name: name.to_string(),
            file_name: file_name.to_string(),
            timestamp_field: timestamp_field.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            derived: false,
        });
        self
    }

    pub fn derived(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            derived: true,
        });
        self
    }

    pub fn kind_of(&self, name: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.kind)
    }
}

/// A named calendar window: one year, inclusive month bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub name: String,
    pub year: i32,
    pub month_start: u32,
    pub month_end: u32,
}

impl Period {
    pub fn new(name: &str, year: i32, month_start: u32, month_end: u32) -> Self {
        Self {
            name: name.to_string(),
            year,
            month_start,
            month_end,
        }
    }

    pub fn contains(&self, year: i32, month: u32) -> bool {
        self.year == year && (self.month_start..=self.month_end).contains(&month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}-{:02} to {}-{:02})",
            self.name, self.year, self.month_start, self.year, self.month_end
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Polarity {
    HigherBetter,
    LowerBetter,
}

/// Row-level boolean test used by rate metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// The flag field is set.
    FlagSet { field: String },
    /// `field <= limit`, both numeric fields of the same row.
    AtMost { field: String, limit: String },
    /// `field < value` against a fixed threshold.
    Below { field: String, value: f64 },
    /// `field >= value` against a fixed threshold.
    AtLeast { field: String, value: f64 },
}

impl Predicate {
    /// `None` when the row lacks a field the predicate needs.
    pub fn evaluate(&self, record: &Record) -> Option<bool> {
        match self {
            Predicate::FlagSet { field } => record.flag(field),
            Predicate::AtMost { field, limit } => {
                Some(record.number(field)? <= record.number(limit)?)
            }
            Predicate::Below { field, value } => Some(record.number(field)? < *value),
            Predicate::AtLeast { field, value } => Some(record.number(field)? >= *value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Aggregation {
    Count,
    Sum { field: String },
    Mean { field: String },
    RateOf { predicate: Predicate },
    DistinctCount { field: String },
    /// Mean of `field - minus` over rows carrying both values.
    MeanDifference { field: String, minus: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    pub name: String,
    pub label: String,
    pub source: String,
    pub aggregation: Aggregation,
    pub polarity: Polarity,
    pub is_rate_metric: bool,
    /// Rows with this flag set are dropped before every aggregation but rates.
    pub exclude_flag: Option<String>,
    pub target: Option<f64>,
}

impl MetricDefinition {
    pub fn new(
        name: &str,
        label: &str,
        source: &str,
        aggregation: Aggregation,
        polarity: Polarity,
    ) -> Self {
        let is_rate_metric = matches!(aggregation, Aggregation::RateOf { .. });
        Self {
            name: name.to_string(),
            label: label.to_string(),
            source: source.to_string(),
            aggregation,
            polarity,
            is_rate_metric,
            exclude_flag: None,
            target: None,
        }
    }

    pub fn excluding(mut self, flag: &str) -> Self {
        self.exclude_flag = Some(flag.to_string());
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }
}

/// Aggregate of one metric over one period. `None` means no qualifying rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub metric: String,
    pub period: String,
    pub value: Option<f64>,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaResult {
    pub metric: String,
    pub pre_value: Option<f64>,
    pub crisis_value: Option<f64>,
    pub absolute_delta: Option<f64>,
    pub percent_delta: Option<f64>,
    pub point_delta: Option<f64>,
    pub favorable: Option<bool>,
    pub target_gap: Option<f64>,
}

/// Full output of one pass over the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub pre_period: Period,
    pub crisis_period: Period,
    pub metrics: BTreeMap<String, DeltaResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentDelta {
    pub segment: String,
    pub delta: DeltaResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub year: i32,
    pub month: u32,
    pub period: String,
    pub value: Option<f64>,
    pub rows: usize,
}

/// A customer with enough completed orders in the baseline period and none
/// in the crisis period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChurnedCustomer {
    pub customer_id: String,
    pub order_count: usize,
    pub total_spending: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChurnSummary {
    pub min_orders: usize,
    pub customers: Vec<ChurnedCustomer>,
    pub average_orders: Option<f64>,
    pub lost_revenue: f64,
}

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub pre_period: String,
    pub crisis_period: String,
    pub pre_value: Option<f64>,
    pub crisis_value: Option<f64>,
    pub percent_delta: Option<f64>,
    pub point_delta: Option<f64>,
    pub favorable: Option<bool>,
}
