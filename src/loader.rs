use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::models::{FieldKind, Record, RecordType, Value};
use crate::registry::{Registry, DELIVERIES, ORDERS, RATINGS};

/// Record collections keyed by record type name.
pub type Datasets = HashMap<String, Vec<Record>>;

/// Dimension table rows keyed by their id column.
pub type Dimension = HashMap<String, HashMap<String, String>>;

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d-%m-%Y %H:%M",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d-%m-%Y"];

pub const RESTAURANT_FILE: &str = "dim_restaurant.csv";
pub const CUSTOMER_FILE: &str = "dim_customer.csv";

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Some(true),
        "n" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_cell(raw: &str, kind: FieldKind) -> Option<Value> {
    match kind {
        FieldKind::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Value::Number),
        FieldKind::Text => Some(Value::Text(raw.trim().to_string())),
        FieldKind::Flag => parse_flag(raw).map(Value::Flag),
        FieldKind::Timestamp => parse_timestamp(raw).map(Value::Timestamp),
    }
}

/// Reads CSV rows typed by `record_type`. Empty cells are missing; cells
/// that fail to parse are missing too and reported once per column.
pub fn read_records<R: Read>(reader: R, record_type: &RecordType) -> anyhow::Result<Vec<Record>> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut columns = Vec::new();
    for field in &record_type.fields {
        match headers.iter().position(|header| header.trim() == field.name) {
            Some(index) => columns.push((index, field)),
            None if field.derived => {}
            None => warn!(
                record_type = %record_type.name,
                column = %field.name,
                "column missing from source, values will be undefined"
            ),
        }
    }

    let mut records = Vec::new();
    let mut unparsed: BTreeMap<&str, usize> = BTreeMap::new();

    for row in reader.records() {
        let row = row.with_context(|| format!("failed to read {} row", record_type.name))?;
        let mut record = Record::new();

        for (index, field) in &columns {
            let raw = row.get(*index).unwrap_or("");
            if raw.trim().is_empty() {
                continue;
            }
            match parse_cell(raw, field.kind) {
                Some(value) => record.insert(&field.name, value),
                None => *unparsed.entry(field.name.as_str()).or_insert(0) += 1,
            }
        }

        records.push(record);
    }

    for (column, count) in unparsed {
        warn!(
            record_type = %record_type.name,
            column,
            count,
            "unparseable cells treated as missing"
        );
    }

    Ok(records)
}

pub fn load_csv(path: &Path, record_type: &RecordType) -> anyhow::Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let records = read_records(file, record_type)
        .with_context(|| format!("failed to load {}", path.display()))?;
    info!(record_type = %record_type.name, rows = records.len(), "loaded records");
    Ok(records)
}

pub fn read_dimension<R: Read>(reader: R, key: &str) -> anyhow::Result<Dimension> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader.headers()?.clone();
    let key_index = headers
        .iter()
        .position(|header| header.trim() == key)
        .with_context(|| format!("dimension table has no {key} column"))?;

    let mut rows = HashMap::new();
    for row in reader.records() {
        let row = row?;
        let Some(id) = row.get(key_index).map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };
        let values = headers
            .iter()
            .zip(row.iter())
            .map(|(header, value)| (header.trim().to_string(), value.trim().to_string()))
            .collect();
        rows.insert(id.to_string(), values);
    }

    Ok(rows)
}

/// Copies text columns from a dimension table onto records by id.
pub fn join_dimension(
    records: &mut [Record],
    key_field: &str,
    dimension: &Dimension,
    columns: &[&str],
) {
    for record in records.iter_mut() {
        let Some(Value::Text(id)) = record.get(key_field) else {
            continue;
        };
        let Some(row) = dimension.get(id) else {
            continue;
        };
        let values: Vec<(&str, String)> = columns
            .iter()
            .filter_map(|column| {
                row.get(*column)
                    .filter(|value| !value.is_empty())
                    .map(|value| (*column, value.clone()))
            })
            .collect();
        for (column, value) in values {
            record.insert(column, Value::Text(value));
        }
    }
}

/// Copies `fields` from `source` rows onto `records` where `key_field` matches.
pub fn join_records(records: &mut [Record], source: &[Record], key_field: &str, fields: &[&str]) {
    let index: HashMap<String, &Record> = source
        .iter()
        .filter_map(|record| record.get(key_field).map(|key| (key.as_key(), record)))
        .collect();

    for record in records.iter_mut() {
        let Some(matched) = record.get(key_field).and_then(|key| index.get(&key.as_key())) else {
            continue;
        };
        let values: Vec<(&str, Value)> = fields
            .iter()
            .filter_map(|field| matched.get(field).map(|value| (*field, value.clone())))
            .collect();
        for (field, value) in values {
            record.insert(field, value);
        }
    }
}

/// Loads every record type the registry knows from `data_dir`, then fills
/// derived fields from dimension tables and the orders fact table.
/// Only the orders file is required.
pub fn load_datasets(data_dir: &Path, registry: &Registry) -> anyhow::Result<Datasets> {
    let mut datasets = Datasets::new();

    for record_type in registry.record_types() {
        let path = data_dir.join(&record_type.file_name);
        if !path.exists() {
            if record_type.name == ORDERS {
                anyhow::bail!("orders file {} not found", path.display());
            }
            warn!(
                path = %path.display(),
                "data file not found, metrics on {} will be undefined",
                record_type.name
            );
            continue;
        }
        datasets.insert(record_type.name.clone(), load_csv(&path, record_type)?);
    }

    let restaurants = load_optional_dimension(&data_dir.join(RESTAURANT_FILE), "restaurant_id")?;
    let customers = load_optional_dimension(&data_dir.join(CUSTOMER_FILE), "customer_id")?;

    if let Some(orders) = datasets.get_mut(ORDERS) {
        if let Some(restaurants) = &restaurants {
            join_dimension(orders, "restaurant_id", restaurants, &["city", "cuisine_type"]);
        }
        if let Some(customers) = &customers {
            join_dimension(orders, "customer_id", customers, &["acquisition_channel"]);
        }
    }

    if let Some(ratings) = datasets.get_mut(RATINGS) {
        if let Some(restaurants) = &restaurants {
            join_dimension(ratings, "restaurant_id", restaurants, &["city", "cuisine_type"]);
        }
    }

    if let Some(mut deliveries) = datasets.remove(DELIVERIES) {
        if let Some(orders) = datasets.get(ORDERS) {
            join_records(&mut deliveries, orders, "order_id", &["order_timestamp", "city"]);
        }
        datasets.insert(DELIVERIES.to_string(), deliveries);
    }

    Ok(datasets)
}

fn load_optional_dimension(path: &Path, key: &str) -> anyhow::Result<Option<Dimension>> {
    if !path.exists() {
        warn!(path = %path.display(), "dimension file not found, segment fields will be missing");
        return Ok(None);
    }
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let dimension = read_dimension(file, key)
        .with_context(|| format!("failed to load {}", path.display()))?;
    info!(path = %path.display(), rows = dimension.len(), "loaded dimension");
    Ok(Some(dimension))
}
