use std::collections::{BTreeMap, HashSet};

use crate::error::ConfigError;
use crate::models::{Aggregation, FieldKind, MetricDefinition, Polarity, Predicate, RecordType};

pub const ORDERS: &str = "orders";
pub const DELIVERIES: &str = "deliveries";
pub const RATINGS: &str = "ratings";

pub const CUSTOMER_ID: &str = "customer_id";
pub const ORDER_AMOUNT: &str = "total_amount";

pub const SLA_TARGET: f64 = 90.0;

/// Ratings at or above this are positive reviews.
pub const POSITIVE_RATING: f64 = 4.0;
/// Ratings below this are negative reviews; the band in between is neutral.
pub const NEGATIVE_RATING: f64 = 3.0;

pub fn builtin_record_types() -> Vec<RecordType> {
    vec![
        RecordType::new(ORDERS, "fact_orders.csv", "order_timestamp")
            .field("order_id", FieldKind::Text)
            .field(CUSTOMER_ID, FieldKind::Text)
            .field("restaurant_id", FieldKind::Text)
            .field("order_timestamp", FieldKind::Timestamp)
            .field("subtotal_amount", FieldKind::Number)
            .field("discount_amount", FieldKind::Number)
            .field("delivery_fee", FieldKind::Number)
            .field(ORDER_AMOUNT, FieldKind::Number)
            .field("is_cancelled", FieldKind::Flag)
            .derived("city", FieldKind::Text)
            .derived("cuisine_type", FieldKind::Text)
            .derived("acquisition_channel", FieldKind::Text),
        RecordType::new(DELIVERIES, "fact_delivery_performance.csv", "order_timestamp")
            .field("order_id", FieldKind::Text)
            .field("actual_delivery_time_mins", FieldKind::Number)
            .field("expected_delivery_time_mins", FieldKind::Number)
            .field("distance_km", FieldKind::Number)
            .derived("order_timestamp", FieldKind::Timestamp)
            .derived("city", FieldKind::Text),
        RecordType::new(RATINGS, "fact_ratings.csv", "review_timestamp")
            .field("order_id", FieldKind::Text)
            .field("customer_id", FieldKind::Text)
            .field("restaurant_id", FieldKind::Text)
            .field("rating", FieldKind::Number)
            .field("review_timestamp", FieldKind::Timestamp)
            .derived("city", FieldKind::Text)
            .derived("cuisine_type", FieldKind::Text),
    ]
}

/// The metric catalog, in display order.
pub fn builtin_metrics() -> Vec<MetricDefinition> {
    vec![
        MetricDefinition::new(
            "completed_orders",
            "Completed orders",
            ORDERS,
            Aggregation::Count,
            Polarity::HigherBetter,
        )
        .excluding("is_cancelled"),
        MetricDefinition::new(
            "revenue",
            "Revenue",
            ORDERS,
            Aggregation::Sum {
                field: "total_amount".to_string(),
            },
            Polarity::HigherBetter,
        )
        .excluding("is_cancelled"),
        MetricDefinition::new(
            "active_customers",
            "Active customers",
            ORDERS,
            Aggregation::DistinctCount {
                field: "customer_id".to_string(),
            },
            Polarity::HigherBetter,
        )
        .excluding("is_cancelled"),
        MetricDefinition::new(
            "average_order_value",
            "Average order value",
            ORDERS,
            Aggregation::Mean {
                field: "total_amount".to_string(),
            },
            Polarity::HigherBetter,
        )
        .excluding("is_cancelled"),
        MetricDefinition::new(
            "cancellation_rate",
            "Cancellation rate",
            ORDERS,
            Aggregation::RateOf {
                predicate: Predicate::FlagSet {
                    field: "is_cancelled".to_string(),
                },
            },
            Polarity::LowerBetter,
        ),
        MetricDefinition::new(
            "sla_compliance",
            "SLA compliance",
            DELIVERIES,
            Aggregation::RateOf {
                predicate: Predicate::AtMost {
                    field: "actual_delivery_time_mins".to_string(),
                    limit: "expected_delivery_time_mins".to_string(),
                },
            },
            Polarity::HigherBetter,
        )
        .with_target(SLA_TARGET),
        MetricDefinition::new(
            "average_delivery_time",
            "Average delivery time (min)",
            DELIVERIES,
            Aggregation::Mean {
                field: "actual_delivery_time_mins".to_string(),
            },
            Polarity::LowerBetter,
        ),
        MetricDefinition::new(
            "average_delivery_delay",
            "Average delivery delay (min)",
            DELIVERIES,
            Aggregation::MeanDifference {
                field: "actual_delivery_time_mins".to_string(),
                minus: "expected_delivery_time_mins".to_string(),
            },
            Polarity::LowerBetter,
        ),
        MetricDefinition::new(
            "average_rating",
            "Average rating",
            RATINGS,
            Aggregation::Mean {
                field: "rating".to_string(),
            },
            Polarity::HigherBetter,
        ),
        MetricDefinition::new(
            "positive_review_share",
            "Positive reviews",
            RATINGS,
            Aggregation::RateOf {
                predicate: Predicate::AtLeast {
                    field: "rating".to_string(),
                    value: POSITIVE_RATING,
                },
            },
            Polarity::HigherBetter,
        ),
        MetricDefinition::new(
            "negative_review_share",
            "Negative reviews",
            RATINGS,
            Aggregation::RateOf {
                predicate: Predicate::Below {
                    field: "rating".to_string(),
                    value: NEGATIVE_RATING,
                },
            },
            Polarity::LowerBetter,
        ),
    ]
}

/// Metric catalog bound to the record types it reads. Every field reference
/// is checked once here so aggregation never validates per row.
#[derive(Debug, Clone)]
pub struct Registry {
    record_types: Vec<RecordType>,
    metrics: Vec<MetricDefinition>,
}

impl Registry {
    pub fn bind(
        record_types: Vec<RecordType>,
        metrics: Vec<MetricDefinition>,
    ) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        for metric in &metrics {
            if !names.insert(metric.name.as_str()) {
                return Err(ConfigError::DuplicateMetric(metric.name.clone()));
            }

            let record_type = record_types
                .iter()
                .find(|record_type| record_type.name == metric.source)
                .ok_or_else(|| ConfigError::UnknownRecordType {
                    metric: metric.name.clone(),
                    record_type: metric.source.clone(),
                })?;

            require(
                &metric.name,
                record_type,
                &record_type.timestamp_field,
                Some(FieldKind::Timestamp),
            )?;
            if let Some(flag) = &metric.exclude_flag {
                require(&metric.name, record_type, flag, Some(FieldKind::Flag))?;
            }

            match &metric.aggregation {
                Aggregation::Count => {}
                Aggregation::Sum { field } | Aggregation::Mean { field } => {
                    require(&metric.name, record_type, field, Some(FieldKind::Number))?;
                }
                Aggregation::MeanDifference { field, minus } => {
                    require(&metric.name, record_type, field, Some(FieldKind::Number))?;
                    require(&metric.name, record_type, minus, Some(FieldKind::Number))?;
                }
                Aggregation::DistinctCount { field } => {
                    require(&metric.name, record_type, field, None)?;
                }
                Aggregation::RateOf {
                    predicate: Predicate::FlagSet { field },
                } => {
                    require(&metric.name, record_type, field, Some(FieldKind::Flag))?;
                }
                Aggregation::RateOf {
                    predicate: Predicate::AtMost { field, limit },
                } => {
                    require(&metric.name, record_type, field, Some(FieldKind::Number))?;
                    require(&metric.name, record_type, limit, Some(FieldKind::Number))?;
                }
                Aggregation::RateOf {
                    predicate:
                        Predicate::Below { field, .. } | Predicate::AtLeast { field, .. },
                } => {
                    require(&metric.name, record_type, field, Some(FieldKind::Number))?;
                }
            }
        }

        Ok(Self {
            record_types,
            metrics,
        })
    }

    pub fn builtin() -> Result<Self, ConfigError> {
        Self::bind(builtin_record_types(), builtin_metrics())
    }

    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Result<&MetricDefinition, ConfigError> {
        self.metrics
            .iter()
            .find(|metric| metric.name == name)
            .ok_or_else(|| ConfigError::UnknownMetric(name.to_string()))
    }

    pub fn record_types(&self) -> &[RecordType] {
        &self.record_types
    }

    pub fn record_type(&self, name: &str) -> Option<&RecordType> {
        self.record_types
            .iter()
            .find(|record_type| record_type.name == name)
    }

    /// Checks that `field` can be used to split `metric` into segments.
    pub fn segment_field(
        &self,
        metric: &MetricDefinition,
        field: &str,
    ) -> Result<(), ConfigError> {
        let record_type = self
            .record_type(&metric.source)
            .ok_or_else(|| ConfigError::UnknownRecordType {
                metric: metric.name.clone(),
                record_type: metric.source.clone(),
            })?;
        require(&metric.name, record_type, field, Some(FieldKind::Text))
    }

    /// Overrides per-metric targets, e.g. from a config file.
    pub fn apply_targets(&mut self, targets: &BTreeMap<String, f64>) -> Result<(), ConfigError> {
        for (name, target) in targets {
            let metric = self
                .metrics
                .iter_mut()
                .find(|metric| &metric.name == name)
                .ok_or_else(|| ConfigError::UnknownMetric(name.clone()))?;
            metric.target = Some(*target);
        }
        Ok(())
    }
}

fn require(
    owner: &str,
    record_type: &RecordType,
    field: &str,
    kind: Option<FieldKind>,
) -> Result<(), ConfigError> {
    match (record_type.kind_of(field), kind) {
        (Some(found), Some(expected)) if found == expected => Ok(()),
        (Some(_), None) => Ok(()),
        _ => Err(ConfigError::MissingField {
            owner: owner.to_string(),
            record_type: record_type.name.clone(),
            field: field.to_string(),
            expected: kind
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "known".to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_binds() {
        let registry = Registry::builtin().expect("builtin registry is valid");
        let names: Vec<&str> = registry
            .metrics()
            .iter()
            .map(|metric| metric.name.as_str())
            .collect();
        for required in [
            "completed_orders",
            "revenue",
            "active_customers",
            "cancellation_rate",
            "sla_compliance",
            "average_delivery_delay",
            "average_rating",
            "negative_review_share",
        ] {
            assert!(names.contains(&required), "missing {required}");
        }
    }

    #[test]
    fn polarity_and_rate_flags_match_catalog() {
        let registry = Registry::builtin().unwrap();
        let cancel = registry.metric("cancellation_rate").unwrap();
        assert_eq!(cancel.polarity, Polarity::LowerBetter);
        assert!(cancel.is_rate_metric);
        assert_eq!(cancel.exclude_flag, None);

        let sla = registry.metric("sla_compliance").unwrap();
        assert!(sla.is_rate_metric);
        assert_eq!(sla.target, Some(SLA_TARGET));

        let orders = registry.metric("completed_orders").unwrap();
        assert_eq!(orders.polarity, Polarity::HigherBetter);
        assert!(!orders.is_rate_metric);
        assert_eq!(orders.exclude_flag.as_deref(), Some("is_cancelled"));
    }

    #[test]
    fn rejects_metric_on_missing_field() {
        let metric = MetricDefinition::new(
            "tips",
            "Tips",
            ORDERS,
            Aggregation::Sum {
                field: "tip_amount".to_string(),
            },
            Polarity::HigherBetter,
        );
        let result = Registry::bind(builtin_record_types(), vec![metric]);
        assert!(matches!(
            result,
            Err(ConfigError::MissingField { ref field, .. }) if field == "tip_amount"
        ));
    }

    #[test]
    fn review_shares_and_delay_are_bound_to_their_sources() {
        let registry = Registry::builtin().unwrap();
        let negative = registry.metric("negative_review_share").unwrap();
        assert_eq!(negative.source, RATINGS);
        assert_eq!(negative.polarity, Polarity::LowerBetter);
        assert!(negative.is_rate_metric);

        let delay = registry.metric("average_delivery_delay").unwrap();
        assert_eq!(delay.source, DELIVERIES);
        assert!(!delay.is_rate_metric);

        let threshold_on_text = MetricDefinition::new(
            "odd",
            "Odd",
            RATINGS,
            Aggregation::RateOf {
                predicate: Predicate::Below {
                    field: "customer_id".to_string(),
                    value: 3.0,
                },
            },
            Polarity::LowerBetter,
        );
        assert!(Registry::bind(builtin_record_types(), vec![threshold_on_text]).is_err());
    }

    #[test]
    fn rejects_wrong_field_kind() {
        let metric = MetricDefinition::new(
            "customer_total",
            "Customer total",
            ORDERS,
            Aggregation::Sum {
                field: "customer_id".to_string(),
            },
            Polarity::HigherBetter,
        );
        assert!(Registry::bind(builtin_record_types(), vec![metric]).is_err());
    }

    #[test]
    fn rejects_unknown_record_type_and_duplicates() {
        let stray = MetricDefinition::new(
            "refunds",
            "Refunds",
            "refunds",
            Aggregation::Count,
            Polarity::LowerBetter,
        );
        assert!(matches!(
            Registry::bind(builtin_record_types(), vec![stray]),
            Err(ConfigError::UnknownRecordType { .. })
        ));

        let mut metrics = builtin_metrics();
        metrics.push(builtin_metrics()[0].clone());
        assert!(matches!(
            Registry::bind(builtin_record_types(), metrics),
            Err(ConfigError::DuplicateMetric(_))
        ));
    }

    #[test]
    fn segment_fields_must_be_text() {
        let registry = Registry::builtin().unwrap();
        let orders = registry.metric("completed_orders").unwrap();
        assert!(registry.segment_field(orders, "city").is_ok());
        assert!(registry.segment_field(orders, "total_amount").is_err());
        assert!(registry.segment_field(orders, "region").is_err());
    }

    #[test]
    fn targets_override_by_name() {
        let mut registry = Registry::builtin().unwrap();
        let mut targets = BTreeMap::new();
        targets.insert("sla_compliance".to_string(), 95.0);
        registry.apply_targets(&targets).unwrap();
        assert_eq!(registry.metric("sla_compliance").unwrap().target, Some(95.0));

        targets.insert("uptime".to_string(), 99.0);
        assert_eq!(
            registry.apply_targets(&targets),
            Err(ConfigError::UnknownMetric("uptime".to_string()))
        );
    }
}
