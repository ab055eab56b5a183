// ⚙️ Engine Configuration - Policy constants as data
//
// Thresholds and weighting constants are the primary tunable surface
// of the engine. They load from JSON, validate once at startup, and
// are passed explicitly into every component that needs them. A bad
// file fails before any snapshot run proceeds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{EngineError, Result};

// ============================================================================
// TRANSPARENCY ADJUSTMENT TABLE
// ============================================================================

/// Fixed deltas applied on top of the base transparency score. Each
/// adjustment is independently configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyTable {
    #[serde(default = "default_base_score")]
    pub base_score: i64,

    /// Delta when selection criteria are publicly disclosed.
    #[serde(default = "default_criteria_delta")]
    pub public_selection_criteria: i64,

    /// Delta when historical success rates are published.
    #[serde(default = "default_success_delta")]
    pub published_success_rates: i64,

    /// Delta when applicants receive decision feedback.
    #[serde(default = "default_feedback_delta")]
    pub provides_feedback: i64,

    /// Deltas per decision-time tier.
    #[serde(default = "default_fast_delta")]
    pub decision_fast: i64,
    #[serde(default)]
    pub decision_medium: i64,
    #[serde(default = "default_slow_delta")]
    pub decision_slow: i64,

    /// Tier boundaries in days: fast is <= fast_max_days, medium is
    /// <= medium_max_days, slow is everything beyond.
    #[serde(default = "default_fast_max_days")]
    pub fast_max_days: u32,
    #[serde(default = "default_medium_max_days")]
    pub medium_max_days: u32,
}

fn default_base_score() -> i64 {
    50
}
fn default_criteria_delta() -> i64 {
    15
}
fn default_success_delta() -> i64 {
    15
}
fn default_feedback_delta() -> i64 {
    10
}
fn default_fast_delta() -> i64 {
    10
}
fn default_slow_delta() -> i64 {
    -10
}
fn default_fast_max_days() -> u32 {
    30
}
fn default_medium_max_days() -> u32 {
    90
}

impl Default for TransparencyTable {
    fn default() -> Self {
        TransparencyTable {
            base_score: default_base_score(),
            public_selection_criteria: default_criteria_delta(),
            published_success_rates: default_success_delta(),
            provides_feedback: default_feedback_delta(),
            decision_fast: default_fast_delta(),
            decision_medium: 0,
            decision_slow: default_slow_delta(),
            fast_max_days: default_fast_max_days(),
            medium_max_days: default_medium_max_days(),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Population weight in the geographic expected-share blend.
    #[serde(default = "default_geo_weight")]
    pub geographic_weight_population: f64,

    /// GDP weight in the geographic expected-share blend.
    #[serde(default = "default_geo_weight")]
    pub geographic_weight_gdp: f64,

    /// Expected share of women-focused opportunities, in percent.
    #[serde(default = "default_gender_baseline")]
    pub gender_baseline_pct: f64,

    /// Deviation score (percentage points at full confidence) above
    /// which a bias event is emitted.
    #[serde(default = "default_bias_threshold")]
    pub bias_threshold_pct: f64,

    /// Sample size at which the confidence factor reaches 1.0. Sparse
    /// groups below it have their deviation scores shrunk.
    #[serde(default = "default_min_sample")]
    pub min_sample_threshold: u64,

    /// Field-presence checklist weights. Must sum to exactly 100.
    #[serde(default = "default_quality_weights")]
    pub quality_field_weights: BTreeMap<String, u32>,

    #[serde(default)]
    pub transparency_adjustment_table: TransparencyTable,
}

fn default_geo_weight() -> f64 {
    0.5
}
fn default_gender_baseline() -> f64 {
    50.0
}
fn default_bias_threshold() -> f64 {
    15.0
}
fn default_min_sample() -> u64 {
    30
}

fn default_quality_weights() -> BTreeMap<String, u32> {
    let mut weights = BTreeMap::new();
    weights.insert("has_amount".to_string(), 20);
    weights.insert("has_deadline".to_string(), 15);
    weights.insert("has_eligibility_text".to_string(), 15);
    weights.insert("has_application_url".to_string(), 15);
    weights.insert("has_country".to_string(), 15);
    weights.insert("has_sector".to_string(), 10);
    weights.insert("has_contact_email".to_string(), 10);
    weights
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            geographic_weight_population: default_geo_weight(),
            geographic_weight_gdp: default_geo_weight(),
            gender_baseline_pct: default_gender_baseline(),
            bias_threshold_pct: default_bias_threshold(),
            min_sample_threshold: default_min_sample(),
            quality_field_weights: default_quality_weights(),
            transparency_adjustment_table: TransparencyTable::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing keys take defaults; an invalid
    /// combination fails here, not mid-run.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::config(format!(
                "failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| EngineError::config(format!("failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let wp = self.geographic_weight_population;
        let wg = self.geographic_weight_gdp;
        if !wp.is_finite() || !wg.is_finite() || wp < 0.0 || wg < 0.0 {
            return Err(EngineError::config(format!(
                "geographic weights must be finite and non-negative, got population={} gdp={}",
                wp, wg
            )));
        }
        if wp + wg <= 0.0 {
            return Err(EngineError::config(
                "geographic weights must not both be zero",
            ));
        }

        if !(0.0..=100.0).contains(&self.gender_baseline_pct) {
            return Err(EngineError::config(format!(
                "gender_baseline_pct must be within [0,100], got {}",
                self.gender_baseline_pct
            )));
        }

        if !self.bias_threshold_pct.is_finite() || self.bias_threshold_pct <= 0.0 {
            return Err(EngineError::config(format!(
                "bias_threshold_pct must be positive, got {}",
                self.bias_threshold_pct
            )));
        }

        if self.min_sample_threshold == 0 {
            return Err(EngineError::config("min_sample_threshold must be >= 1"));
        }

        let weight_sum: u32 = self.quality_field_weights.values().sum();
        if weight_sum != 100 {
            return Err(EngineError::config(format!(
                "quality_field_weights must sum to 100, got {}",
                weight_sum
            )));
        }

        let table = &self.transparency_adjustment_table;
        if table.fast_max_days >= table.medium_max_days {
            return Err(EngineError::config(format!(
                "decision tiers must satisfy fast_max_days < medium_max_days, got {} >= {}",
                table.fast_max_days, table.medium_max_days
            )));
        }
        if !(0..=100).contains(&table.base_score) {
            return Err(EngineError::config(format!(
                "transparency base_score must be within [0,100], got {}",
                table.base_score
            )));
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_default_quality_weights_sum_to_100() {
        let sum: u32 = default_quality_weights().values().sum();
        assert_eq!(sum, 100);
    }

    #[test]
    fn test_rejects_weights_not_summing_to_100() {
        let mut config = EngineConfig::default();
        config.quality_field_weights.insert("has_amount".to_string(), 25);

        match config.validate() {
            Err(EngineError::Config(msg)) => assert!(msg.contains("sum to 100")),
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_geographic_weights() {
        let mut config = EngineConfig::default();
        config.geographic_weight_population = 0.0;
        config.geographic_weight_gdp = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let mut config = EngineConfig::default();
        config.bias_threshold_pct = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_decision_tiers() {
        let mut config = EngineConfig::default();
        config.transparency_adjustment_table.fast_max_days = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"bias_threshold_pct": 10.0}"#).unwrap();
        assert_eq!(config.bias_threshold_pct, 10.0);
        assert_eq!(config.gender_baseline_pct, 50.0);
        assert_eq!(config.min_sample_threshold, 30);
        config.validate().unwrap();
    }
}
