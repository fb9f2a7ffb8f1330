use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::aggregate::{aggregate, evaluate, tag, TaggedRecord};
use crate::delta::delta;
use crate::error::ConfigError;
use crate::loader::Datasets;
use crate::models::{
    ChurnSummary, ChurnedCustomer, Comparison, DeltaResult, MetricDefinition, Polarity, Record,
    SegmentDelta, TrendPoint,
};
use crate::period::{classify, PeriodPair};
use crate::registry::{Registry, CUSTOMER_ID, ORDER_AMOUNT};

/// Completed baseline orders a customer needs to count as loyal.
pub const DEFAULT_LOYAL_ORDERS: usize = 3;

/// Runs every registry metric over both periods and derives its deltas.
/// Each record collection is classified once and shared by its metrics.
pub fn compare(datasets: &Datasets, registry: &Registry, periods: &PeriodPair) -> Comparison {
    let mut tagged: HashMap<&str, Vec<TaggedRecord<'_>>> = HashMap::new();
    for record_type in registry.record_types() {
        let records = datasets
            .get(&record_type.name)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        tagged.insert(
            record_type.name.as_str(),
            tag(records, &record_type.timestamp_field, periods.all()),
        );
    }

    let mut metrics = BTreeMap::new();
    for metric in registry.metrics() {
        let records = tagged
            .get(metric.source.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let pre = aggregate(records, &periods.pre().name, metric);
        let crisis = aggregate(records, &periods.crisis().name, metric);
        let result = delta(&pre, &crisis, metric);

        debug!(
            metric = %metric.name,
            pre = ?result.pre_value,
            crisis = ?result.crisis_value,
            percent_delta = ?result.percent_delta,
            favorable = ?result.favorable,
            "metric compared"
        );
        metrics.insert(metric.name.clone(), result);
    }

    Comparison {
        pre_period: periods.pre().clone(),
        crisis_period: periods.crisis().clone(),
        metrics,
    }
}

/// Aggregates a metric per calendar month present in the data, oldest first.
pub fn monthly_trend(
    datasets: &Datasets,
    registry: &Registry,
    metric: &MetricDefinition,
    periods: &PeriodPair,
) -> Result<Vec<TrendPoint>, ConfigError> {
    let timestamp_field = timestamp_field(registry, metric)?;
    let records = records_for(datasets, metric);

    let mut months: BTreeMap<(i32, u32), Vec<&Record>> = BTreeMap::new();
    for record in records {
        if let Some(timestamp) = record.timestamp(timestamp_field) {
            months
                .entry((timestamp.year(), timestamp.month()))
                .or_default()
                .push(record);
        }
    }

    Ok(months
        .into_iter()
        .map(|((year, month), rows)| {
            let (value, count) = evaluate(metric, rows.into_iter());
            let month_start =
                NaiveDate::from_ymd_opt(year, month, 1).and_then(|date| date.and_hms_opt(0, 0, 0));
            let label = classify(month_start, periods.all()).as_str().to_string();
            TrendPoint {
                year,
                month,
                period: label,
                value,
                rows: count,
            }
        })
        .collect())
}

/// Per-segment comparison of one metric, most adversely affected segment
/// first. Segments with fewer than `min_baseline` qualifying rows in the
/// baseline period, or an undefined baseline value, are dropped.
pub fn breakdown(
    datasets: &Datasets,
    registry: &Registry,
    metric: &MetricDefinition,
    segment_field: &str,
    periods: &PeriodPair,
    min_baseline: usize,
) -> Result<Vec<SegmentDelta>, ConfigError> {
    registry.segment_field(metric, segment_field)?;
    let timestamp_field = timestamp_field(registry, metric)?;
    let records = records_for(datasets, metric);

    let mut segments: BTreeMap<String, Vec<TaggedRecord<'_>>> = BTreeMap::new();
    for tagged in tag(records, timestamp_field, periods.all()) {
        if let Some(segment) = tagged.record.get(segment_field) {
            segments.entry(segment.as_key()).or_default().push(tagged);
        }
    }

    let mut results: Vec<SegmentDelta> = segments
        .into_iter()
        .filter_map(|(segment, rows)| {
            let pre = aggregate(&rows, &periods.pre().name, metric);
            if pre.rows < min_baseline || pre.value.is_none() {
                return None;
            }
            let crisis = aggregate(&rows, &periods.crisis().name, metric);
            Some(SegmentDelta {
                segment,
                delta: delta(&pre, &crisis, metric),
            })
        })
        .collect();

    results.sort_by(|a, b| {
        match (adverse_change(&a.delta, metric), adverse_change(&b.delta, metric)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });

    Ok(results)
}

/// Change signed so that lower is worse: points for rate metrics, percent
/// otherwise, negated for lower-is-better metrics.
fn adverse_change(delta: &DeltaResult, metric: &MetricDefinition) -> Option<f64> {
    let change = if metric.is_rate_metric {
        delta.point_delta
    } else {
        delta.percent_delta
    }?;
    Some(match metric.polarity {
        Polarity::HigherBetter => change,
        Polarity::LowerBetter => -change,
    })
}

/// Customers with at least `min_orders` completed baseline orders and no
/// completed order in the crisis period, highest baseline spend first.
pub fn churned_customers(
    datasets: &Datasets,
    registry: &Registry,
    periods: &PeriodPair,
    min_orders: usize,
) -> Result<ChurnSummary, ConfigError> {
    let orders = registry.metric("completed_orders")?;
    let timestamp_field = timestamp_field(registry, orders)?;

    let mut baseline: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    let mut retained = HashSet::new();
    for tagged in tag(records_for(datasets, orders), timestamp_field, periods.all()) {
        let cancelled = orders
            .exclude_flag
            .as_deref()
            .and_then(|flag| tagged.record.flag(flag))
            .unwrap_or(false);
        if cancelled {
            continue;
        }
        let Some(customer) = tagged.record.get(CUSTOMER_ID) else {
            continue;
        };
        if tagged.period.is(&periods.pre().name) {
            let entry = baseline.entry(customer.as_key()).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += tagged.record.number(ORDER_AMOUNT).unwrap_or(0.0);
        } else if tagged.period.is(&periods.crisis().name) {
            retained.insert(customer.as_key());
        }
    }

    let mut customers: Vec<ChurnedCustomer> = baseline
        .into_iter()
        .filter(|(customer_id, (count, _))| {
            *count >= min_orders && !retained.contains(customer_id)
        })
        .map(|(customer_id, (order_count, total_spending))| ChurnedCustomer {
            customer_id,
            order_count,
            total_spending,
        })
        .collect();
    customers.sort_by(|a, b| {
        b.total_spending
            .partial_cmp(&a.total_spending)
            .unwrap_or(Ordering::Equal)
    });

    let average_orders = (!customers.is_empty()).then(|| {
        customers.iter().map(|customer| customer.order_count).sum::<usize>() as f64
            / customers.len() as f64
    });
    let lost_revenue = customers.iter().map(|customer| customer.total_spending).sum();
    debug!(churned = customers.len(), min_orders, "churned customers found");

    Ok(ChurnSummary {
        min_orders,
        customers,
        average_orders,
        lost_revenue,
    })
}

fn records_for<'a>(datasets: &'a Datasets, metric: &MetricDefinition) -> &'a [Record] {
    datasets
        .get(&metric.source)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn timestamp_field<'r>(
    registry: &'r Registry,
    metric: &MetricDefinition,
) -> Result<&'r str, ConfigError> {
    registry
        .record_type(&metric.source)
        .map(|record_type| record_type.timestamp_field.as_str())
        .ok_or_else(|| ConfigError::UnknownRecordType {
            metric: metric.name.clone(),
            record_type: metric.source.clone(),
        })
}
