use std::collections::HashSet;

use crate::models::{AggregateResult, Aggregation, MetricDefinition, Period, Record};
use crate::period::{classify, PeriodLabel};

#[derive(Debug, Clone, Copy)]
pub struct TaggedRecord<'a> {
    pub period: PeriodLabel<'a>,
    pub record: &'a Record,
}

/// Classifies every record once so each metric can filter by label.
pub fn tag<'a>(
    records: &'a [Record],
    timestamp_field: &str,
    periods: &'a [Period],
) -> Vec<TaggedRecord<'a>> {
    records
        .iter()
        .map(|record| TaggedRecord {
            period: classify(record.timestamp(timestamp_field), periods),
            record,
        })
        .collect()
}

pub fn aggregate(
    records: &[TaggedRecord<'_>],
    period_name: &str,
    metric: &MetricDefinition,
) -> AggregateResult {
    let in_period = records
        .iter()
        .filter(|tagged| tagged.period.is(period_name))
        .map(|tagged| tagged.record);
    let (value, rows) = evaluate(metric, in_period);

    AggregateResult {
        metric: metric.name.clone(),
        period: period_name.to_string(),
        value,
        rows,
    }
}

/// Applies a metric's aggregation to already period-filtered rows.
/// Returns the value (`None` without qualifying rows) and the qualifying row count.
pub fn evaluate<'r>(
    metric: &MetricDefinition,
    rows: impl Iterator<Item = &'r Record>,
) -> (Option<f64>, usize) {
    match &metric.aggregation {
        // Rates are computed before cancellation exclusion.
        Aggregation::RateOf { predicate } => {
            let mut total = 0usize;
            let mut hits = 0usize;
            for outcome in rows.filter_map(|record| predicate.evaluate(record)) {
                total += 1;
                if outcome {
                    hits += 1;
                }
            }
            ((total > 0).then(|| hits as f64 / total as f64 * 100.0), total)
        }
        Aggregation::Count => {
            let count = rows.filter(|record| !is_excluded(metric, record)).count();
            ((count > 0).then_some(count as f64), count)
        }
        Aggregation::Sum { field } => {
            let (total, count) = numbers(metric, rows, field);
            ((count > 0).then_some(total), count)
        }
        Aggregation::Mean { field } => {
            let (total, count) = numbers(metric, rows, field);
            ((count > 0).then(|| total / count as f64), count)
        }
        Aggregation::MeanDifference { field, minus } => {
            let (total, count) = rows
                .filter(|record| !is_excluded(metric, record))
                .filter_map(|record| Some(record.number(field)? - record.number(minus)?))
                .fold((0.0, 0usize), |(sum, n), value| (sum + value, n + 1));
            ((count > 0).then(|| total / count as f64), count)
        }
        Aggregation::DistinctCount { field } => {
            let mut count = 0usize;
            let mut seen = HashSet::new();
            for value in rows
                .filter(|record| !is_excluded(metric, record))
                .filter_map(|record| record.get(field))
            {
                count += 1;
                seen.insert(value.as_key());
            }
            ((count > 0).then_some(seen.len() as f64), count)
        }
    }
}

/// Sum and count of the non-missing values of `field` on kept rows.
fn numbers<'r>(
    metric: &MetricDefinition,
    rows: impl Iterator<Item = &'r Record>,
    field: &str,
) -> (f64, usize) {
    rows.filter(|record| !is_excluded(metric, record))
        .filter_map(|record| record.number(field))
        .fold((0.0, 0usize), |(sum, n), value| (sum + value, n + 1))
}

fn is_excluded(metric: &MetricDefinition, record: &Record) -> bool {
    metric
        .exclude_flag
        .as_deref()
        .and_then(|flag| record.flag(flag))
        .unwrap_or(false)
}
