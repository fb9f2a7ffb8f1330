use crate::models::{AggregateResult, DeltaResult, MetricDefinition, Polarity};

/// Percentage change from `pre` to `crisis`. `None` when either side is
/// undefined or the baseline is zero.
pub fn percent_change(pre: Option<f64>, crisis: Option<f64>) -> Option<f64> {
    let pre = pre?;
    let crisis = crisis?;
    if pre == 0.0 {
        return None;
    }
    Some((crisis - pre) / pre * 100.0)
}

pub fn delta(
    pre: &AggregateResult,
    crisis: &AggregateResult,
    metric: &MetricDefinition,
) -> DeltaResult {
    let absolute_delta = match (pre.value, crisis.value) {
        (Some(pre), Some(crisis)) => Some(crisis - pre),
        _ => None,
    };
    let point_delta = if metric.is_rate_metric {
        absolute_delta
    } else {
        None
    };

    let mut result = DeltaResult {
        metric: metric.name.clone(),
        pre_value: pre.value,
        crisis_value: crisis.value,
        absolute_delta,
        percent_delta: percent_change(pre.value, crisis.value),
        point_delta,
        favorable: None,
        target_gap: metric
            .target
            .and_then(|target| crisis.value.map(|value| value - target)),
    };
    result.favorable = classify_direction(&result, metric.polarity);
    result
}

/// Zero change is unfavorable under either polarity.
pub fn classify_direction(delta: &DeltaResult, polarity: Polarity) -> Option<bool> {
    let change = delta.absolute_delta?;
    Some(match polarity {
        Polarity::HigherBetter => change > 0.0,
        Polarity::LowerBetter => change < 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Aggregation, Predicate};
    use crate::period::{CRISIS, PRE_CRISIS};

    fn result(metric: &str, period: &str, value: Option<f64>) -> AggregateResult {
        AggregateResult {
            metric: metric.to_string(),
            period: period.to_string(),
            value,
            rows: value.map(|_| 1).unwrap_or(0),
        }
    }

    fn completed_orders() -> MetricDefinition {
        MetricDefinition::new(
            "completed_orders",
            "Completed orders",
            "orders",
            Aggregation::Count,
            Polarity::HigherBetter,
        )
    }

    fn cancellation_rate() -> MetricDefinition {
        MetricDefinition::new(
            "cancellation_rate",
            "Cancellation rate",
            "orders",
            Aggregation::RateOf {
                predicate: Predicate::FlagSet {
                    field: "is_cancelled".to_string(),
                },
            },
            Polarity::LowerBetter,
        )
    }

    #[test]
    fn order_decline_is_unfavorable() {
        let metric = completed_orders();
        let delta = delta(
            &result(&metric.name, PRE_CRISIS, Some(10_000.0)),
            &result(&metric.name, CRISIS, Some(7_000.0)),
            &metric,
        );

        assert_eq!(delta.absolute_delta, Some(-3000.0));
        assert!((delta.percent_delta.unwrap() + 30.0).abs() < 1e-9);
        assert_eq!(delta.point_delta, None);
        assert_eq!(delta.favorable, Some(false));
    }

    #[test]
    fn rising_cancellation_rate_reports_points() {
        let metric = cancellation_rate();
        let delta = delta(
            &result(&metric.name, PRE_CRISIS, Some(5.0)),
            &result(&metric.name, CRISIS, Some(12.0)),
            &metric,
        );

        assert!((delta.point_delta.unwrap() - 7.0).abs() < 1e-9);
        assert!((delta.percent_delta.unwrap() - 140.0).abs() < 1e-9);
        assert_eq!(delta.favorable, Some(false));
    }

    #[test]
    fn falling_cancellation_rate_is_favorable() {
        let metric = cancellation_rate();
        let delta = delta(
            &result(&metric.name, PRE_CRISIS, Some(12.0)),
            &result(&metric.name, CRISIS, Some(5.0)),
            &metric,
        );
        assert_eq!(delta.favorable, Some(true));
    }

    #[test]
    fn zero_baseline_has_no_percent_delta() {
        let metric = completed_orders();
        let delta = delta(
            &result(&metric.name, PRE_CRISIS, Some(0.0)),
            &result(&metric.name, CRISIS, Some(25.0)),
            &metric,
        );

        assert_eq!(delta.absolute_delta, Some(25.0));
        assert_eq!(delta.percent_delta, None);
        assert_eq!(delta.favorable, Some(true));
    }

    #[test]
    fn undefined_baseline_propagates() {
        let metric = completed_orders();
        let delta = delta(
            &result(&metric.name, PRE_CRISIS, None),
            &result(&metric.name, CRISIS, Some(25.0)),
            &metric,
        );

        assert_eq!(delta.pre_value, None);
        assert_eq!(delta.absolute_delta, None);
        assert_eq!(delta.percent_delta, None);
        assert_eq!(delta.favorable, None);
    }

    #[test]
    fn ties_are_unfavorable_for_both_polarities() {
        for metric in [completed_orders(), cancellation_rate()] {
            let delta = delta(
                &result(&metric.name, PRE_CRISIS, Some(4.0)),
                &result(&metric.name, CRISIS, Some(4.0)),
                &metric,
            );
            assert_eq!(delta.absolute_delta, Some(0.0));
            assert_eq!(classify_direction(&delta, Polarity::HigherBetter), Some(false));
            assert_eq!(classify_direction(&delta, Polarity::LowerBetter), Some(false));
        }
    }

    #[test]
    fn target_gap_uses_crisis_value() {
        let metric = MetricDefinition::new(
            "sla_compliance",
            "SLA compliance",
            "deliveries",
            Aggregation::RateOf {
                predicate: Predicate::FlagSet {
                    field: "sla_met".to_string(),
                },
            },
            Polarity::HigherBetter,
        )
        .with_target(90.0);
        let delta = delta(
            &result(&metric.name, PRE_CRISIS, Some(88.0)),
            &result(&metric.name, CRISIS, Some(72.5)),
            &metric,
        );

        assert_eq!(delta.target_gap, Some(-17.5));
        assert_eq!(delta.point_delta, Some(-15.5));
    }
}
