// ⚖️ Equity & Bias Evaluator - Expected vs actual shares
//
// Compares actual aggregates against baselines: population/GDP blend
// for geography, a configurable parity baseline for gender, priority
// weights for sectors. Gaps are signed; negative means underserved.
// Deviation scores shrink with small samples so sparse data cannot
// trigger high-confidence bias claims.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::aggregation::{DimensionAggregate, UNCLASSIFIED, WOMEN_FOCUSED};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{BiasDimension, CountryIndex, ReportingPeriod, SectorCatalog};
use crate::registry::{MetricInputs, MetricRegistry};

// ============================================================================
// SNAPSHOT ROWS
// ============================================================================

/// Derived wholesale per period, never incrementally patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicGapSnapshot {
    pub region: String,
    pub period: ReportingPeriod,
    /// Population/GDP-blended baseline share, 0-1.
    pub expected_share: f64,
    pub actual_share: f64,
    /// actual - expected, share units. Negative means underserved.
    pub gap_percentage: f64,
    pub opportunity_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorMetricSnapshot {
    pub sector: String,
    pub period: ReportingPeriod,
    pub opportunity_count: u64,
    pub funding_total: f64,
    pub funding_average: Option<f64>,
    pub expected_share: f64,
    pub actual_share: f64,
    pub gap_percentage: f64,
    /// Average funding relative to the commercial reference baseline.
    pub commercial_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenderMetricSnapshot {
    pub period: ReportingPeriod,
    pub total_opportunities: u64,
    pub women_focused_count: u64,
    pub women_focused_funding: f64,
    /// Women-focused share of total, in percent.
    pub pct_of_total: f64,
    pub expected_pct: f64,
    /// actual - expected, percentage points.
    pub gap_percentage_points: f64,
}

// ============================================================================
// BIAS DETECTION EVENT
// ============================================================================

/// Append-only audit record. Emitted, never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasDetectionEvent {
    pub event_id: String,
    pub period: ReportingPeriod,
    pub dimension: BiasDimension,
    pub entity: String,
    /// Confidence-weighted absolute gap, percentage points.
    pub deviation_score: f64,
    /// Signed gap in percentage points.
    pub gap_percentage: f64,
    pub sample_size: u64,
    pub detected_at: DateTime<Utc>,
}

impl BiasDetectionEvent {
    fn new(
        period: ReportingPeriod,
        dimension: BiasDimension,
        entity: &str,
        deviation_score: f64,
        gap_pp: f64,
        sample_size: u64,
    ) -> Self {
        BiasDetectionEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            period,
            dimension,
            entity: entity.to_string(),
            deviation_score,
            gap_percentage: gap_pp,
            sample_size,
            detected_at: Utc::now(),
        }
    }
}

// ============================================================================
// EVALUATOR
// ============================================================================

pub struct EquityEvaluator<'a> {
    config: &'a EngineConfig,
    registry: &'a MetricRegistry,
}

impl<'a> EquityEvaluator<'a> {
    pub fn new(config: &'a EngineConfig, registry: &'a MetricRegistry) -> Self {
        EquityEvaluator { config, registry }
    }

    /// Confidence factor shrinking with sample size: a bucket below
    /// the minimum sample cannot reach full deviation score.
    fn confidence(&self, sample_size: u64) -> f64 {
        let threshold = self.config.min_sample_threshold as f64;
        (sample_size as f64 / threshold).min(1.0)
    }

    /// Confidence-weighted absolute gap, in percentage points.
    pub fn deviation_score(&self, gap_pp: f64, sample_size: u64) -> f64 {
        gap_pp.abs() * self.confidence(sample_size)
    }

    fn maybe_event(
        &self,
        period: ReportingPeriod,
        dimension: BiasDimension,
        entity: &str,
        gap_pp: f64,
        sample_size: u64,
    ) -> Option<BiasDetectionEvent> {
        let score = self.deviation_score(gap_pp, sample_size);
        if score > self.config.bias_threshold_pct {
            Some(BiasDetectionEvent::new(
                period, dimension, entity, score, gap_pp, sample_size,
            ))
        } else {
            None
        }
    }

    // ========================================================================
    // GEOGRAPHY
    // ========================================================================

    /// Baseline share per region: population and GDP shares blended by
    /// the configured weights, normalized so the blend sums to 1.0.
    pub fn expected_region_shares(&self, countries: &CountryIndex) -> BTreeMap<String, f64> {
        let mut pop_by_region: BTreeMap<String, f64> = BTreeMap::new();
        let mut gdp_by_region: BTreeMap<String, f64> = BTreeMap::new();
        let mut total_pop = 0.0;
        let mut total_gdp = 0.0;

        for profile in countries.values() {
            let pop = profile.population as f64;
            let gdp = profile.gdp_total();
            *pop_by_region.entry(profile.region.clone()).or_default() += pop;
            *gdp_by_region.entry(profile.region.clone()).or_default() += gdp;
            total_pop += pop;
            total_gdp += gdp;
        }

        let wp = self.config.geographic_weight_population;
        let wg = self.config.geographic_weight_gdp;

        let mut blended: BTreeMap<String, f64> = BTreeMap::new();
        for (region, pop) in &pop_by_region {
            let pop_share = if total_pop > 0.0 { pop / total_pop } else { 0.0 };
            let gdp_share = if total_gdp > 0.0 {
                gdp_by_region.get(region).copied().unwrap_or(0.0) / total_gdp
            } else {
                0.0
            };
            blended.insert(region.clone(), wp * pop_share + wg * gdp_share);
        }

        let blend_total: f64 = blended.values().sum();
        if blend_total > 0.0 {
            for share in blended.values_mut() {
                *share /= blend_total;
            }
        }
        blended
    }

    pub fn evaluate_geography(
        &self,
        agg: &DimensionAggregate,
        countries: &CountryIndex,
    ) -> Result<(Vec<GeographicGapSnapshot>, Vec<BiasDetectionEvent>)> {
        let expected = self.expected_region_shares(countries);
        let total = agg.total_opportunities();

        // Union of baseline regions and observed buckets, so a region
        // with zero records still shows up as underserved.
        let regions: BTreeSet<&String> = expected.keys().chain(agg.buckets.keys()).collect();

        let mut rows = Vec::new();
        let mut events = Vec::new();

        for region in regions {
            let count = agg.get(region).map(|a| a.opportunity_count).unwrap_or(0);
            let actual = self
                .registry
                .evaluate("geographic_share", &MetricInputs::share(count, total))?;
            // The unclassified bucket has no baseline; its expected
            // share is zero by definition.
            let expected_share = expected.get(region).copied().unwrap_or(0.0);
            let gap = actual - expected_share;

            // The unclassified bucket signals missing reference data,
            // not regional bias; it gets a row but never an event.
            if region != UNCLASSIFIED {
                if let Some(event) = self.maybe_event(
                    agg.period,
                    BiasDimension::Geographic,
                    region,
                    gap * 100.0,
                    count,
                ) {
                    events.push(event);
                }
            }

            rows.push(GeographicGapSnapshot {
                region: region.clone(),
                period: agg.period,
                expected_share,
                actual_share: actual,
                gap_percentage: gap,
                opportunity_count: count,
            });
        }

        Ok((rows, events))
    }

    // ========================================================================
    // SECTOR
    // ========================================================================

    pub fn evaluate_sector(
        &self,
        agg: &DimensionAggregate,
        catalog: &SectorCatalog,
    ) -> Result<(Vec<SectorMetricSnapshot>, Vec<BiasDetectionEvent>)> {
        let total = agg.total_opportunities();
        let priority_sum = catalog.priority_sum();

        // Linear priority weighting over active sectors
        let mut expected: BTreeMap<String, f64> = BTreeMap::new();
        for sector in catalog.active() {
            let share = if priority_sum == 0 {
                0.0
            } else {
                sector.priority_level as f64 / priority_sum as f64
            };
            expected.insert(sector.name.clone(), share);
        }

        // Commercial reference baseline: average funding across
        // reference-category buckets
        let mut reference_sum = 0.0;
        let mut reference_funded = 0u64;
        for (key, acc) in &agg.buckets {
            if catalog.is_reference(key) {
                reference_sum += acc.funding_sum;
                reference_funded += acc.funded_count;
            }
        }
        let reference_avg = if reference_funded > 0 {
            Some(reference_sum / reference_funded as f64)
        } else {
            None
        };

        let sectors: BTreeSet<&String> = expected.keys().chain(agg.buckets.keys()).collect();

        let mut rows = Vec::new();
        let mut events = Vec::new();

        for sector in sectors {
            let acc = agg.get(sector);
            let count = acc.map(|a| a.opportunity_count).unwrap_or(0);
            let actual = self
                .registry
                .evaluate("sector_share", &MetricInputs::share(count, total))?;
            let expected_share = expected.get(sector).copied().unwrap_or(0.0);
            let gap = actual - expected_share;

            let funding_average = acc.and_then(|a| a.funding_mean());
            let commercial_ratio = match (funding_average, reference_avg) {
                (Some(avg), Some(reference)) if reference > 0.0 => Some(avg / reference),
                _ => None,
            };

            if sector != UNCLASSIFIED {
                if let Some(event) = self.maybe_event(
                    agg.period,
                    BiasDimension::Sector,
                    sector,
                    gap * 100.0,
                    count,
                ) {
                    events.push(event);
                }
            }

            rows.push(SectorMetricSnapshot {
                sector: sector.clone(),
                period: agg.period,
                opportunity_count: count,
                funding_total: acc.map(|a| a.funding_sum).unwrap_or(0.0),
                funding_average,
                expected_share,
                actual_share: actual,
                gap_percentage: gap,
                commercial_ratio,
            });
        }

        Ok((rows, events))
    }

    // ========================================================================
    // GENDER
    // ========================================================================

    pub fn evaluate_gender(
        &self,
        agg: &DimensionAggregate,
    ) -> Result<(GenderMetricSnapshot, Vec<BiasDetectionEvent>)> {
        let total = agg.total_opportunities();
        let women = agg.get(WOMEN_FOCUSED);
        let women_count = women.map(|a| a.opportunity_count).unwrap_or(0);
        let women_funding = women.map(|a| a.funding_sum).unwrap_or(0.0);

        let actual_share = self
            .registry
            .evaluate("gender_share", &MetricInputs::share(women_count, total))?;
        let pct = actual_share * 100.0;
        let expected_pct = self.config.gender_baseline_pct;
        let gap_pp = pct - expected_pct;

        let mut events = Vec::new();
        // Gender parity is judged over the whole observed set, so the
        // confidence sample is the period's total opportunity count.
        if total > 0 {
            if let Some(event) = self.maybe_event(
                agg.period,
                BiasDimension::Gender,
                WOMEN_FOCUSED,
                gap_pp,
                total,
            ) {
                events.push(event);
            }
        }

        Ok((
            GenderMetricSnapshot {
                period: agg.period,
                total_opportunities: total,
                women_focused_count: women_count,
                women_focused_funding: women_funding,
                pct_of_total: pct,
                expected_pct,
                gap_percentage_points: gap_pp,
            },
            events,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
