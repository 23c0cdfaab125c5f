//! Metric aggregation metadata for operators.
//!
//! Physical partitions of an operator report metric snapshots; an
//! aggregator folds them into one logical view. Operators may set an
//! explicit aggregator attribute; otherwise validation infers a default
//! sum aggregator from the descriptor's auto-metric declarations.

use std::fmt;
use std::sync::Arc;

use fxhash::FxHashSet;

use crate::plan::operator::MetricSpec;

/// Numeric kind of a declared auto-metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Signed or unsigned integer metrics; aggregated as a long sum.
    Integral,
    /// Floating-point metrics; aggregated as a double sum.
    Floating,
    /// Any other type; claimed by name but never auto-aggregated.
    Other,
}

/// A single reported metric value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Integral value.
    Long(i64),
    /// Floating-point value.
    Double(f64),
}

/// Capability that folds per-partition metric snapshots into logical
/// metrics. Each snapshot is a `(name, value)` list from one partition.
pub trait MetricsAggregator: fmt::Debug + Send + Sync {
    /// Aggregates the physical snapshots into logical `(name, value)` pairs.
    fn aggregate(&self, physical: &[Vec<(String, MetricValue)>]) -> Vec<(String, MetricValue)>;
}

/// Capability describing dimensional aggregations for logical metrics,
/// consumed by downstream stats stores.
pub trait DimensionsScheme: fmt::Debug + Send + Sync {
    /// Dimensional aggregations (e.g. `SUM`, `MAX`) for a logical metric.
    fn dimension_aggregations_for(&self, metric_name: &str) -> Vec<String>;

    /// Time buckets (e.g. `1m`, `1h`) the metric is rolled up into.
    fn time_buckets(&self) -> Vec<String>;
}

/// Per-metric sum flavor used by the default aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumAggregator {
    /// Sum as `i64`.
    LongSum,
    /// Sum as `f64`; integral inputs are widened.
    DoubleSum,
}

/// Default aggregator: one sum per registered metric name.
#[derive(Debug, Default, Clone)]
pub struct DefaultMetricsAggregator {
    aggregators: Vec<(String, SumAggregator)>,
}

impl DefaultMetricsAggregator {
    /// Creates an aggregator with no registered metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sum aggregator for `name`.
    pub fn add_aggregator(&mut self, name: impl Into<String>, kind: SumAggregator) {
        self.aggregators.push((name.into(), kind));
    }

    /// Registered `(name, sum flavor)` pairs in registration order.
    #[must_use]
    pub fn registered(&self) -> &[(String, SumAggregator)] {
        &self.aggregators
    }

    /// Whether any metrics are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregators.is_empty()
    }
}

impl MetricsAggregator for DefaultMetricsAggregator {
    fn aggregate(&self, physical: &[Vec<(String, MetricValue)>]) -> Vec<(String, MetricValue)> {
        let mut logical = Vec::with_capacity(self.aggregators.len());
        for (name, kind) in &self.aggregators {
            let values = physical.iter().flat_map(|snapshot| {
                snapshot
                    .iter()
                    .filter(|(n, _)| n == name)
                    .map(|(_, v)| *v)
            });
            let value = match kind {
                SumAggregator::LongSum => {
                    let sum = values
                        .filter_map(|v| match v {
                            MetricValue::Long(n) => Some(n),
                            MetricValue::Double(_) => None,
                        })
                        .sum::<i64>();
                    MetricValue::Long(sum)
                }
                SumAggregator::DoubleSum => {
                    #[allow(clippy::cast_precision_loss)]
                    let sum = values
                        .map(|v| match v {
                            MetricValue::Long(n) => n as f64,
                            MetricValue::Double(d) => d,
                        })
                        .sum::<f64>();
                    MetricValue::Double(sum)
                }
            };
            logical.push((name.clone(), value));
        }
        logical
    }
}

/// Builds the default aggregator for an operator's declared metrics.
///
/// Fields are scanned first and claim their names whether or not the kind
/// is aggregatable; accessors are scanned second and skip claimed names.
/// Returns `None` when nothing aggregatable is declared.
pub(crate) fn infer_default_aggregator(
    fields: &[MetricSpec],
    accessors: &[MetricSpec],
) -> Option<DefaultMetricsAggregator> {
    let mut aggregator: Option<DefaultMetricsAggregator> = None;
    let mut claimed: FxHashSet<&str> = FxHashSet::default();

    for field in fields {
        claimed.insert(field.name());
        if let Some(kind) = sum_for(field.kind()) {
            aggregator
                .get_or_insert_with(DefaultMetricsAggregator::new)
                .add_aggregator(field.name(), kind);
        }
    }

    for accessor in accessors {
        if claimed.contains(accessor.name()) {
            continue;
        }
        if let Some(kind) = sum_for(accessor.kind()) {
            aggregator
                .get_or_insert_with(DefaultMetricsAggregator::new)
                .add_aggregator(accessor.name(), kind);
        }
    }

    aggregator
}

fn sum_for(kind: MetricKind) -> Option<SumAggregator> {
    match kind {
        MetricKind::Integral => Some(SumAggregator::LongSum),
        MetricKind::Floating => Some(SumAggregator::DoubleSum),
        MetricKind::Other => None,
    }
}

/// Effective metric-aggregation metadata for one operator, attached during
/// validation.
#[derive(Debug, Clone)]
pub struct MetricAggregatorMeta {
    aggregator: Option<Arc<dyn MetricsAggregator>>,
    dimensions_scheme: Option<Arc<dyn DimensionsScheme>>,
}

impl MetricAggregatorMeta {
    pub(crate) fn new(
        aggregator: Option<Arc<dyn MetricsAggregator>>,
        dimensions_scheme: Option<Arc<dyn DimensionsScheme>>,
    ) -> Self {
        Self {
            aggregator,
            dimensions_scheme,
        }
    }

    /// The effective aggregator, explicit or inferred.
    #[must_use]
    pub fn aggregator(&self) -> Option<&Arc<dyn MetricsAggregator>> {
        self.aggregator.as_ref()
    }

    /// Dimensional aggregations for `metric_name`, if a scheme is bundled.
    #[must_use]
    pub fn dimension_aggregations_for(&self, metric_name: &str) -> Option<Vec<String>> {
        self.dimensions_scheme
            .as_ref()
            .map(|s| s.dimension_aggregations_for(metric_name))
    }

    /// Time buckets, if a scheme is bundled.
    #[must_use]
    pub fn time_buckets(&self) -> Option<Vec<String>> {
        self.dimensions_scheme.as_ref().map(|s| s.time_buckets())
    }
}
