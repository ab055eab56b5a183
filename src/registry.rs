// 📇 Metric Definitions Registry - Metrics as data
//
// Each derived metric is a declarative definition: name, dimension,
// formula, valid range, baseline source. Adding a metric means
// registering a definition here; the evaluator and aggregation
// mechanics stay untouched when policy changes.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, Result};

// ============================================================================
// METRIC DEFINITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricDimension {
    Geographic,
    Gender,
    Sector,
    Quality,
    Transparency,
}

/// Where a metric's expected baseline comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselineSource {
    /// Population and GDP weighted blend over country profiles.
    PopulationGdpBlend,
    /// Configurable parity percentage.
    ParityBaseline,
    /// Priority-level weights over active sectors.
    PriorityWeights,
    /// Field-presence checklist weights.
    FieldChecklist,
    /// Fixed adjustment deltas.
    AdjustmentTable,
}

/// Inputs a metric formula may draw on. Share metrics use the counts;
/// score metrics pass their precomputed value through `raw`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricInputs {
    pub count: u64,
    pub total_count: u64,
    pub funding_sum: f64,
    pub raw: f64,
}

impl MetricInputs {
    pub fn share(count: u64, total_count: u64) -> Self {
        MetricInputs {
            count,
            total_count,
            ..Default::default()
        }
    }

    pub fn raw(value: f64) -> Self {
        MetricInputs {
            raw: value,
            ..Default::default()
        }
    }
}

type Formula = Box<dyn Fn(&MetricInputs) -> f64 + Send + Sync>;

pub struct MetricDefinition {
    pub name: String,
    pub dimension: MetricDimension,
    pub valid_range: (f64, f64),
    pub baseline_source: BaselineSource,
    formula: Formula,
}

impl MetricDefinition {
    pub fn new(
        name: impl Into<String>,
        dimension: MetricDimension,
        valid_range: (f64, f64),
        baseline_source: BaselineSource,
        formula: impl Fn(&MetricInputs) -> f64 + Send + Sync + 'static,
    ) -> Self {
        MetricDefinition {
            name: name.into(),
            dimension,
            valid_range,
            baseline_source,
            formula: Box::new(formula),
        }
    }

    pub fn compute(&self, inputs: &MetricInputs) -> f64 {
        (self.formula)(inputs)
    }
}

impl fmt::Debug for MetricDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricDefinition")
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .field("valid_range", &self.valid_range)
            .field("baseline_source", &self.baseline_source)
            .finish()
    }
}

// ============================================================================
// METRIC REGISTRY
// ============================================================================

fn share_formula(inputs: &MetricInputs) -> f64 {
    if inputs.total_count == 0 {
        0.0
    } else {
        inputs.count as f64 / inputs.total_count as f64
    }
}

pub struct MetricRegistry {
    definitions: BTreeMap<String, MetricDefinition>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        MetricRegistry {
            definitions: BTreeMap::new(),
        }
    }

    /// The five core metrics.
    pub fn builtin() -> Self {
        let mut registry = MetricRegistry::new();

        registry.register(MetricDefinition::new(
            "geographic_share",
            MetricDimension::Geographic,
            (0.0, 1.0),
            BaselineSource::PopulationGdpBlend,
            share_formula,
        ));
        registry.register(MetricDefinition::new(
            "gender_share",
            MetricDimension::Gender,
            (0.0, 1.0),
            BaselineSource::ParityBaseline,
            share_formula,
        ));
        registry.register(MetricDefinition::new(
            "sector_share",
            MetricDimension::Sector,
            (0.0, 1.0),
            BaselineSource::PriorityWeights,
            share_formula,
        ));
        registry.register(MetricDefinition::new(
            "data_quality_score",
            MetricDimension::Quality,
            (0.0, 100.0),
            BaselineSource::FieldChecklist,
            |i| i.raw,
        ));
        registry.register(MetricDefinition::new(
            "transparency_score",
            MetricDimension::Transparency,
            (0.0, 100.0),
            BaselineSource::AdjustmentTable,
            |i| i.raw,
        ));

        registry
    }

    pub fn register(&mut self, definition: MetricDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Result<&MetricDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| EngineError::UnknownMetric(name.to_string()))
    }

    /// Compute a metric, clamping out-of-range results with a logged
    /// warning rather than dropping them.
    pub fn evaluate(&self, name: &str, inputs: &MetricInputs) -> Result<f64> {
        let definition = self.get(name)?;
        let value = definition.compute(inputs);
        let (lo, hi) = definition.valid_range;

        if !value.is_finite() {
            warn!("metric '{}' produced non-finite value, clamped to {}", name, lo);
            return Ok(lo);
        }
        if value < lo || value > hi {
            let clamped = value.clamp(lo, hi);
            warn!(
                "metric '{}' value {} outside [{}, {}], clamped to {}",
                name, value, lo, hi, clamped
            );
            return Ok(clamped);
        }
        Ok(value)
    }

    /// Compute several metrics; a failure in one never aborts the
    /// siblings.
    pub fn evaluate_all(
        &self,
        requests: &[(&str, MetricInputs)],
    ) -> Vec<(String, Result<f64>)> {
        requests
            .iter()
            .map(|(name, inputs)| (name.to_string(), self.evaluate(name, inputs)))
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// TESTS
// ============================================================================
