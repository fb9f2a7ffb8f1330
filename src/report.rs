use std::fmt::Write;

use serde::Serialize;

use crate::models::{
    ChurnSummary, Comparison, DeltaResult, MetricDefinition, SegmentDelta, TrendPoint,
};
use crate::registry::Registry;

/// Segment rows for one metric split by one field.
pub type Breakdown<'a> = (String, &'a MetricDefinition, Vec<SegmentDelta>);

const NO_DATA: &str = "no data";

pub fn format_value(value: Option<f64>, metric: &MetricDefinition) -> String {
    match value {
        None => NO_DATA.to_string(),
        Some(value) if metric.is_rate_metric => format!("{value:.1}%"),
        Some(value) if value.fract() == 0.0 => format!("{value:.0}"),
        Some(value) => format!("{value:.2}"),
    }
}

pub fn format_plain(value: Option<f64>) -> String {
    value
        .map(|value| format!("{value:.2}"))
        .unwrap_or_else(|| NO_DATA.to_string())
}

/// Points for rate metrics, percent for everything else.
pub fn format_change(delta: &DeltaResult, metric: &MetricDefinition) -> String {
    if metric.is_rate_metric {
        match delta.point_delta {
            Some(points) => format!("{points:+.1}pp"),
            None => NO_DATA.to_string(),
        }
    } else {
        match delta.percent_delta {
            Some(percent) => format!("{percent:+.1}%"),
            None => NO_DATA.to_string(),
        }
    }
}

pub fn favorable_marker(favorable: Option<bool>) -> &'static str {
    match favorable {
        Some(true) => "improved",
        Some(false) => "worsened",
        None => NO_DATA,
    }
}

pub fn build_report(
    comparison: &Comparison,
    registry: &Registry,
    breakdowns: &[Breakdown<'_>],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Crisis Impact Report");
    let _ = writeln!(
        output,
        "Comparing {} against {}",
        comparison.crisis_period, comparison.pre_period
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Key Metrics");
    let _ = writeln!(output, "| Metric | Pre-crisis | Crisis | Change | Direction |");
    let _ = writeln!(output, "|---|---|---|---|---|");

    for metric in registry.metrics() {
        let Some(delta) = comparison.metrics.get(&metric.name) else {
            continue;
        };
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            metric.label,
            format_value(delta.pre_value, metric),
            format_value(delta.crisis_value, metric),
            format_change(delta, metric),
            favorable_marker(delta.favorable)
        );
    }

    let targets: Vec<(&MetricDefinition, &DeltaResult)> = registry
        .metrics()
        .iter()
        .filter(|metric| metric.target.is_some())
        .filter_map(|metric| comparison.metrics.get(&metric.name).map(|delta| (metric, delta)))
        .collect();

    if !targets.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Targets");
        for (metric, delta) in targets {
            let target = metric.target.unwrap_or_default();
            match delta.target_gap {
                Some(gap) => {
                    let _ = writeln!(
                        output,
                        "- {}: {} vs target {}, gap {:+.1}",
                        metric.label,
                        format_value(delta.crisis_value, metric),
                        format_value(Some(target), metric),
                        gap
                    );
                }
                None => {
                    let _ = writeln!(output, "- {}: {NO_DATA}", metric.label);
                }
            }
        }
    }

    for (field, metric, segments) in breakdowns {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {} by {}", metric.label, field);

        if segments.is_empty() {
            let _ = writeln!(output, "No segments with enough pre-crisis volume.");
            continue;
        }
        for segment in segments {
            let _ = writeln!(
                output,
                "- {}: {} -> {} ({})",
                segment.segment,
                format_value(segment.delta.pre_value, metric),
                format_value(segment.delta.crisis_value, metric),
                format_change(&segment.delta, metric)
            );
        }
    }

    output
}

pub fn build_trend(metric: &MetricDefinition, points: &[TrendPoint]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "## {} by month", metric.label);

    if points.is_empty() {
        let _ = writeln!(output, "No dated records for this metric.");
        return output;
    }
    for point in points {
        let _ = writeln!(
            output,
            "- {}-{:02} [{}]: {} ({} rows)",
            point.year,
            point.month,
            point.period,
            format_value(point.value, metric),
            point.rows
        );
    }
    output
}

pub fn build_churn(summary: &ChurnSummary, limit: usize) -> String {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "## Churned loyal customers ({}+ completed pre-crisis orders)",
        summary.min_orders
    );

    if summary.customers.is_empty() {
        let _ = writeln!(output, "No loyal customers churned.");
        return output;
    }
    let _ = writeln!(output, "- Churned customers: {}", summary.customers.len());
    let _ = writeln!(
        output,
        "- Average orders before churn: {}",
        format_plain(summary.average_orders)
    );
    let _ = writeln!(output, "- Lost pre-crisis revenue: {:.2}", summary.lost_revenue);
    let _ = writeln!(output);
    for customer in summary.customers.iter().take(limit) {
        let _ = writeln!(
            output,
            "- {}: {} orders, {:.2} spent",
            customer.customer_id, customer.order_count, customer.total_spending
        );
    }
    output
}

#[derive(Serialize)]
struct JsonBreakdown<'a> {
    metric: &'a str,
    segment_field: &'a str,
    segments: &'a [SegmentDelta],
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    comparison: &'a Comparison,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    breakdowns: Vec<JsonBreakdown<'a>>,
}

/// The comparison as JSON; undefined values are `null`.
pub fn to_json(
    comparison: &Comparison,
    breakdowns: &[Breakdown<'_>],
) -> serde_json::Result<String> {
    let report = JsonReport {
        comparison,
        breakdowns: breakdowns
            .iter()
            .map(|(field, metric, segments)| JsonBreakdown {
                metric: &metric.name,
                segment_field: field,
                segments,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChurnedCustomer, Period};
    use crate::period::{CRISIS, PRE_CRISIS};
    use std::collections::BTreeMap;

    fn delta(metric: &str, pre: Option<f64>, crisis: Option<f64>) -> DeltaResult {
        DeltaResult {
            metric: metric.to_string(),
            pre_value: pre,
            crisis_value: crisis,
            absolute_delta: None,
            percent_delta: None,
            point_delta: None,
            favorable: None,
            target_gap: None,
        }
    }

    fn comparison() -> Comparison {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "completed_orders".to_string(),
            DeltaResult {
                absolute_delta: Some(-3000.0),
                percent_delta: Some(-30.0),
                favorable: Some(false),
                ..delta("completed_orders", Some(10_000.0), Some(7_000.0))
            },
        );
        metrics.insert(
            "cancellation_rate".to_string(),
            DeltaResult {
                absolute_delta: Some(7.0),
                percent_delta: Some(140.0),
                point_delta: Some(7.0),
                favorable: Some(false),
                ..delta("cancellation_rate", Some(5.0), Some(12.0))
            },
        );
        metrics.insert(
            "sla_compliance".to_string(),
            DeltaResult {
                target_gap: Some(-12.5),
                ..delta("sla_compliance", Some(85.0), Some(77.5))
            },
        );
        metrics.insert("average_rating".to_string(), delta("average_rating", None, Some(3.9)));
        Comparison {
            pre_period: Period::new(PRE_CRISIS, 2025, 1, 5),
            crisis_period: Period::new(CRISIS, 2025, 6, 9),
            metrics,
        }
    }

    #[test]
    fn renders_percent_and_point_changes() {
        let registry = Registry::builtin().unwrap();
        let report = build_report(&comparison(), &registry, &[]);

        assert!(report.contains("| Completed orders | 10000 | 7000 | -30.0% | worsened |"));
        assert!(report.contains("| Cancellation rate | 5.0% | 12.0% | +7.0pp | worsened |"));
        assert!(report.contains("| Average rating | no data | 3.90 | no data | no data |"));
        assert!(report.contains("- SLA compliance: 77.5% vs target 90.0%, gap -12.5"));
    }

    #[test]
    fn skips_metrics_missing_from_comparison() {
        let registry = Registry::builtin().unwrap();
        let report = build_report(&comparison(), &registry, &[]);
        assert!(!report.contains("Revenue"));
    }

    #[test]
    fn renders_breakdown_sections() {
        let registry = Registry::builtin().unwrap();
        let metric = registry.metric("completed_orders").unwrap();
        let segments = vec![SegmentDelta {
            segment: "Bengaluru".to_string(),
            delta: DeltaResult {
                percent_delta: Some(-42.0),
                ..delta("completed_orders", Some(100.0), Some(58.0))
            },
        }];
        let report = build_report(
            &comparison(),
            &registry,
            &[
                ("city".to_string(), metric, segments),
                ("cuisine_type".to_string(), metric, Vec::new()),
            ],
        );

        assert!(report.contains("## Completed orders by city"));
        assert!(report.contains("- Bengaluru: 100 -> 58 (-42.0%)"));
        assert!(report.contains("No segments with enough pre-crisis volume."));
    }

    #[test]
    fn json_keeps_undefined_as_null() {
        let json = to_json(&comparison(), &[]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["metrics"]["average_rating"]["pre_value"].is_null());
        assert_eq!(value["metrics"]["completed_orders"]["percent_delta"], -30.0);
        assert_eq!(value["crisis_period"]["month_start"], 6);
        assert!(value.get("breakdowns").is_none());
    }

    #[test]
    fn json_carries_requested_breakdowns() {
        let registry = Registry::builtin().unwrap();
        let metric = registry.metric("completed_orders").unwrap();
        let segments = vec![SegmentDelta {
            segment: "Pune".to_string(),
            delta: delta("completed_orders", Some(40.0), Some(30.0)),
        }];
        let json = to_json(&comparison(), &[("city".to_string(), metric, segments)]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let breakdown = &value["breakdowns"][0];
        assert_eq!(breakdown["metric"], "completed_orders");
        assert_eq!(breakdown["segment_field"], "city");
        assert_eq!(breakdown["segments"][0]["segment"], "Pune");
        assert_eq!(breakdown["segments"][0]["delta"]["crisis_value"], 30.0);
    }

    #[test]
    fn churn_summary_lists_top_customers() {
        let summary = ChurnSummary {
            min_orders: 3,
            customers: vec![
                ChurnedCustomer {
                    customer_id: "CUST9".to_string(),
                    order_count: 5,
                    total_spending: 1250.0,
                },
                ChurnedCustomer {
                    customer_id: "CUST4".to_string(),
                    order_count: 3,
                    total_spending: 600.0,
                },
            ],
            average_orders: Some(4.0),
            lost_revenue: 1850.0,
        };
        let text = build_churn(&summary, 1);
        assert!(text.contains("- Churned customers: 2"));
        assert!(text.contains("- Average orders before churn: 4.00"));
        assert!(text.contains("- CUST9: 5 orders, 1250.00 spent"));
        assert!(!text.contains("CUST4"));

        let empty = ChurnSummary {
            customers: Vec::new(),
            average_orders: None,
            lost_revenue: 0.0,
            ..summary
        };
        assert!(build_churn(&empty, 10).contains("No loyal customers churned."));
    }

    #[test]
    fn trend_lists_months_with_labels() {
        let registry = Registry::builtin().unwrap();
        let metric = registry.metric("completed_orders").unwrap();
        let text = build_trend(
            metric,
            &[TrendPoint {
                year: 2025,
                month: 6,
                period: CRISIS.to_string(),
                value: None,
                rows: 0,
            }],
        );
        assert!(text.contains("- 2025-06 [crisis]: no data (0 rows)"));
    }
}
