// 📊 Aggregation Engine - Group and reduce the frozen record set
//
// Each dimension groups in-window records and reduces to counts,
// funding sums, means, and population variance. Variance uses
// Welford's online algorithm so large sums do not lose precision.
// Records with a null amount count toward opportunity counts but are
// excluded from funding statistics; treating missing as zero would
// bias averages downward.

use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeMap;

use crate::model::{CountryIndex, FundingRecord, ReportingPeriod, SectorCatalog};

/// Grouping fallback for records whose geographic or sector reference
/// cannot be resolved. Routed here and logged, never dropped.
pub const UNCLASSIFIED: &str = "unclassified";

/// Gender dimension bucket keys.
pub const WOMEN_FOCUSED: &str = "women_focused";
pub const OTHER: &str = "other";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Country,
    Region,
    Sector,
    Gender,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Country => "country",
            Dimension::Region => "region",
            Dimension::Sector => "sector",
            Dimension::Gender => "gender",
        }
    }
}

// ============================================================================
// ACCUMULATOR (Welford)
// ============================================================================

/// Online reducer for one group bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    /// All records in the bucket, funded or not.
    pub opportunity_count: u64,
    /// Records carrying a declared amount.
    pub funded_count: u64,
    pub funding_sum: f64,
    mean: f64,
    m2: f64,
    pub last_activity: Option<NaiveDate>,
}

impl Accumulator {
    pub fn new() -> Self {
        Accumulator::default()
    }

    pub fn observe(&mut self, amount: Option<f64>, activity: NaiveDate) {
        self.opportunity_count += 1;

        self.last_activity = Some(match self.last_activity {
            Some(prev) if prev >= activity => prev,
            _ => activity,
        });

        // Welford update; null amounts are excluded, not zeroed
        if let Some(amount) = amount {
            self.funded_count += 1;
            self.funding_sum += amount;
            let delta = amount - self.mean;
            self.mean += delta / self.funded_count as f64;
            self.m2 += delta * (amount - self.mean);
        }
    }

    /// Mean over funded records only. None when no record in the
    /// bucket declared an amount.
    pub fn funding_mean(&self) -> Option<f64> {
        if self.funded_count == 0 {
            None
        } else {
            Some(self.mean)
        }
    }

    /// Population variance over funded records only.
    pub fn funding_variance(&self) -> Option<f64> {
        if self.funded_count == 0 {
            None
        } else {
            Some(self.m2 / self.funded_count as f64)
        }
    }
}

// ============================================================================
// DIMENSION AGGREGATE
// ============================================================================

/// All buckets for one (dimension, period). Buckets are ordered by
/// key so downstream output is deterministic.
#[derive(Debug, Clone)]
pub struct DimensionAggregate {
    pub dimension: Dimension,
    pub period: ReportingPeriod,
    pub buckets: BTreeMap<String, Accumulator>,
}

impl DimensionAggregate {
    fn new(dimension: Dimension, period: ReportingPeriod) -> Self {
        DimensionAggregate {
            dimension,
            period,
            buckets: BTreeMap::new(),
        }
    }

    fn bucket(&mut self, key: String) -> &mut Accumulator {
        self.buckets.entry(key).or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Accumulator> {
        self.buckets.get(key)
    }

    pub fn total_opportunities(&self) -> u64 {
        self.buckets.values().map(|a| a.opportunity_count).sum()
    }

    pub fn total_funding(&self) -> f64 {
        self.buckets.values().map(|a| a.funding_sum).sum()
    }

    /// Per-bucket share of total opportunities, 0-1. Shares across all
    /// buckets sum to 1 (within rounding) whenever any record exists.
    pub fn shares(&self) -> BTreeMap<String, f64> {
        let total = self.total_opportunities();
        self.buckets
            .iter()
            .map(|(key, acc)| {
                let share = if total == 0 {
                    0.0
                } else {
                    acc.opportunity_count as f64 / total as f64
                };
                (key.clone(), share)
            })
            .collect()
    }
}

// ============================================================================
// GROUPING
// ============================================================================

/// Group by the region of each record's primary country. Records whose
/// country has no profile go to the unclassified bucket.
pub fn aggregate_by_region(
    period: ReportingPeriod,
    records: &[FundingRecord],
    countries: &CountryIndex,
) -> DimensionAggregate {
    let mut agg = DimensionAggregate::new(Dimension::Region, period);

    for record in records {
        let key = match record.primary_country() {
            Some(code) => match countries.get(code) {
                Some(profile) => profile.region.clone(),
                None => {
                    warn!(
                        "record {} targets country '{}' with no profile, routed to {}",
                        record.id, code, UNCLASSIFIED
                    );
                    UNCLASSIFIED.to_string()
                }
            },
            None => {
                warn!("record {} declares no country, routed to {}", record.id, UNCLASSIFIED);
                UNCLASSIFIED.to_string()
            }
        };
        agg.bucket(key).observe(record.amount_usd, record.last_activity());
    }

    agg
}

/// Group by primary country code.
pub fn aggregate_by_country(
    period: ReportingPeriod,
    records: &[FundingRecord],
) -> DimensionAggregate {
    let mut agg = DimensionAggregate::new(Dimension::Country, period);

    for record in records {
        let key = match record.primary_country() {
            Some(code) => code.to_string(),
            None => UNCLASSIFIED.to_string(),
        };
        agg.bucket(key).observe(record.amount_usd, record.last_activity());
    }

    agg
}

/// Group by primary sector, validated against the catalog.
pub fn aggregate_by_sector(
    period: ReportingPeriod,
    records: &[FundingRecord],
    catalog: &SectorCatalog,
) -> DimensionAggregate {
    let mut agg = DimensionAggregate::new(Dimension::Sector, period);

    for record in records {
        let key = if catalog.contains(&record.primary_sector) {
            record.primary_sector.clone()
        } else {
            warn!(
                "record {} names sector '{}' not in catalog, routed to {}",
                record.id, record.primary_sector, UNCLASSIFIED
            );
            UNCLASSIFIED.to_string()
        };
        agg.bucket(key).observe(record.amount_usd, record.last_activity());
    }

    agg
}

/// Two buckets: women-focused opportunities and the rest.
pub fn aggregate_by_gender(
    period: ReportingPeriod,
    records: &[FundingRecord],
) -> DimensionAggregate {
    let mut agg = DimensionAggregate::new(Dimension::Gender, period);

    for record in records {
        let key = if record.women_led { WOMEN_FOCUSED } else { OTHER };
        agg.bucket(key.to_string())
            .observe(record.amount_usd, record.last_activity());
    }

    agg
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CountryProfile, SectorDefinition, VerificationStatus};

    fn record(country: &str, amount: Option<f64>) -> FundingRecord {
        FundingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            organization: "Fund".to_string(),
            title: "Grant".to_string(),
            amount_usd: amount,
            country_codes: if country.is_empty() {
                Vec::new()
            } else {
                vec![country.to_string()]
            },
            primary_sector: "AI Research".to_string(),
            secondary_sector: None,
            women_led: false,
            youth_focused: false,
            rural_focused: false,
            deadline: None,
            created_at: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            verification: VerificationStatus::Pending,
            eligibility_text: String::new(),
            application_url: String::new(),
            contact_email: String::new(),
            version: 1,
        }
    }

    fn countries() -> CountryIndex {
        let mut index = CountryIndex::new();
        for (code, region, pop, gdp) in [
            ("KE", "East Africa", 55_000_000u64, 2_100.0),
            ("NG", "West Africa", 220_000_000, 2_400.0),
            ("ZA", "Southern Africa", 60_000_000, 6_700.0),
        ] {
            index.insert(
                code.to_string(),
                CountryProfile {
                    code: code.to_string(),
                    name: code.to_string(),
                    region: region.to_string(),
                    subregion: region.to_string(),
                    population: pop,
                    gdp_per_capita_usd: gdp,
                    ai_readiness_index: None,
                },
            );
        }
        index
    }

    fn period() -> ReportingPeriod {
        "2025-Q1".parse().unwrap()
    }

    #[test]
    fn test_welford_matches_two_pass() {
        let amounts = [12_000.0, 48_500.0, 7_250.0, 150_000.0, 98_000.0];
        let mut acc = Accumulator::new();
        for a in amounts {
            acc.observe(Some(a), NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        }

        let mean: f64 = amounts.iter().sum::<f64>() / amounts.len() as f64;
        let variance: f64 =
            amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / amounts.len() as f64;

        assert!((acc.funding_mean().unwrap() - mean).abs() < 1e-6);
        assert!((acc.funding_variance().unwrap() - variance).abs() < 1e-3);
    }

    #[test]
    fn test_null_amount_counted_but_excluded_from_funding() {
        let mut acc = Accumulator::new();
        acc.observe(Some(100.0), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        acc.observe(None, NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        acc.observe(Some(300.0), NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());

        assert_eq!(acc.opportunity_count, 3);
        assert_eq!(acc.funded_count, 2);
        assert_eq!(acc.funding_sum, 400.0);
        // Mean over funded records only; missing is not zero
        assert_eq!(acc.funding_mean(), Some(200.0));
    }

    #[test]
    fn test_all_null_amounts_give_no_mean() {
        let mut acc = Accumulator::new();
        acc.observe(None, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(acc.opportunity_count, 1);
        assert_eq!(acc.funding_mean(), None);
        assert_eq!(acc.funding_variance(), None);
    }

    #[test]
    fn test_last_activity_is_max() {
        let mut acc = Accumulator::new();
        acc.observe(None, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        acc.observe(None, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(acc.last_activity, NaiveDate::from_ymd_opt(2025, 3, 1));
    }

    #[test]
    fn test_region_grouping_routes_unknown_to_unclassified() {
        let records = vec![record("KE", Some(10.0)), record("XX", None), record("", None)];
        let agg = aggregate_by_region(period(), &records, &countries());

        assert_eq!(agg.get("East Africa").unwrap().opportunity_count, 1);
        assert_eq!(agg.get(UNCLASSIFIED).unwrap().opportunity_count, 2);
        // Nothing dropped
        assert_eq!(agg.total_opportunities(), 3);
    }

    #[test]
    fn test_shares_sum_to_one() {
        let mut records = Vec::new();
        for _ in 0..60 {
            records.push(record("KE", Some(5.0)));
        }
        for _ in 0..40 {
            records.push(record("NG", None));
        }
        for _ in 0..7 {
            records.push(record("ZA", Some(1.0)));
        }

        let agg = aggregate_by_region(period(), &records, &countries());
        let total: f64 = agg.shares().values().sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_sector_grouping_validates_against_catalog() {
        let catalog = SectorCatalog::new(vec![SectorDefinition {
            name: "AI Research".to_string(),
            category: "development".to_string(),
            priority_level: 4,
            parent: None,
            active: true,
        }])
        .unwrap();

        let mut unknown = record("KE", None);
        unknown.primary_sector = "Quantum".to_string();
        let records = vec![record("KE", Some(10.0)), unknown];

        let agg = aggregate_by_sector(period(), &records, &catalog);
        assert_eq!(agg.get("AI Research").unwrap().opportunity_count, 1);
        assert_eq!(agg.get(UNCLASSIFIED).unwrap().opportunity_count, 1);
    }

    #[test]
    fn test_country_grouping_keeps_codes() {
        let records = vec![record("KE", Some(10.0)), record("KE", None), record("", None)];
        let agg = aggregate_by_country(period(), &records);

        assert_eq!(agg.get("KE").unwrap().opportunity_count, 2);
        assert_eq!(agg.get(UNCLASSIFIED).unwrap().opportunity_count, 1);
    }

    #[test]
    fn test_gender_grouping() {
        let mut women = record("KE", Some(20_000.0));
        women.women_led = true;
        let records = vec![women, record("KE", None), record("NG", Some(5_000.0))];

        let agg = aggregate_by_gender(period(), &records);
        assert_eq!(agg.get(WOMEN_FOCUSED).unwrap().opportunity_count, 1);
        assert_eq!(agg.get(WOMEN_FOCUSED).unwrap().funding_sum, 20_000.0);
        assert_eq!(agg.get(OTHER).unwrap().opportunity_count, 2);
    }
}
