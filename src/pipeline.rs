// 🔁 Pipeline - One deterministic run per reporting period
//
// The period is passed explicitly into every stage; there is no
// ambient "current period". Input is fetched once and frozen, the
// independent dimensions reduce concurrently over the same immutable
// slice, and the Snapshot Writer publishes everything or nothing.
// Re-running an unchanged period reproduces identical content hashes.

use log::info;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::thread;

use crate::aggregation::{aggregate_by_gender, aggregate_by_region, aggregate_by_sector};
use crate::config::EngineConfig;
use crate::corrections::{self, CorrectionOutcome};
use crate::equity::EquityEvaluator;
use crate::error::Result;
use crate::model::ReportingPeriod;
use crate::registry::MetricRegistry;
use crate::scoring::{score_organizations, QualityChecklist};
use crate::snapshot::{setup_snapshot_tables, SnapshotWriter};
use crate::store::{self, RecordStore, SqliteStore};

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct RunReport {
    pub period: ReportingPeriod,
    pub run_id: String,
    pub record_count: usize,
    pub region_rows: usize,
    pub sector_rows: usize,
    pub bias_events: usize,
    pub content_hashes: BTreeMap<String, String>,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct EquityPipeline {
    conn: Connection,
    config: EngineConfig,
    registry: MetricRegistry,
    checklist: QualityChecklist,
}

impl EquityPipeline {
    /// Validates configuration and prepares the schema. A bad config
    /// fails here, before any run is scheduled.
    pub fn new(conn: Connection, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let checklist = QualityChecklist::from_weights(&config.quality_field_weights)?;

        store::setup_database(&conn)?;
        setup_snapshot_tables(&conn)?;

        Ok(EquityPipeline {
            conn,
            config,
            registry: MetricRegistry::builtin(),
            checklist,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Compute and publish every snapshot set for one period.
    pub fn run(&self, period: ReportingPeriod) -> Result<RunReport> {
        let store = SqliteStore::new(&self.conn);

        // Freeze the input once; every worker observes the same set
        let countries = store.fetch_country_profiles()?;
        let catalog = store.fetch_sectors()?;
        let organizations = store.fetch_organizations()?;
        let records = store.fetch_records(&period.window())?;

        info!(
            "run {} starting: {} records, {} countries, {} sectors",
            period,
            records.len(),
            countries.len(),
            catalog.len()
        );

        // Independent grouping dimensions reduce concurrently
        let (region_agg, sector_agg, gender_agg) = thread::scope(|s| {
            let region = s.spawn(|| aggregate_by_region(period, &records, &countries));
            let sector = s.spawn(|| aggregate_by_sector(period, &records, &catalog));
            let gender = s.spawn(|| aggregate_by_gender(period, &records));
            (
                region.join().expect("region aggregation worker panicked"),
                sector.join().expect("sector aggregation worker panicked"),
                gender.join().expect("gender aggregation worker panicked"),
            )
        });

        let evaluator = EquityEvaluator::new(&self.config, &self.registry);
        let (geo_rows, mut events) = evaluator.evaluate_geography(&region_agg, &countries)?;
        let (sector_rows, sector_events) = evaluator.evaluate_sector(&sector_agg, &catalog)?;
        let (gender_row, gender_events) = evaluator.evaluate_gender(&gender_agg)?;
        events.extend(sector_events);
        events.extend(gender_events);

        let quality = self.checklist.score_batch(&records);
        let transparency = score_organizations(
            &organizations,
            &self.config.transparency_adjustment_table,
        );

        let run_id = uuid::Uuid::new_v4().to_string();
        let writer = SnapshotWriter::new(&self.conn);
        let summary = writer.publish_period(
            period,
            &run_id,
            &geo_rows,
            &sector_rows,
            &gender_row,
            &events,
            &quality,
            &transparency,
        )?;

        Ok(RunReport {
            period,
            run_id,
            record_count: records.len(),
            region_rows: geo_rows.len(),
            sector_rows: sector_rows.len(),
            bias_events: summary.events_appended,
            content_hashes: summary.content_hashes,
        })
    }

    /// Recompute a specific set of periods, in order.
    pub fn run_periods(&self, periods: &[ReportingPeriod]) -> Result<Vec<RunReport>> {
        let mut reports = Vec::with_capacity(periods.len());
        for &period in periods {
            reports.push(self.run(period)?);
        }
        Ok(reports)
    }

    /// Apply a correction and recompute only the periods it touched.
    pub fn apply_correction(
        &self,
        record_id: &str,
        field: &str,
        new_value: &str,
        reason: &str,
        submitted_by: &str,
    ) -> Result<(CorrectionOutcome, Vec<RunReport>)> {
        let outcome = corrections::submit_correction(
            &self.conn,
            record_id,
            field,
            new_value,
            reason,
            submitted_by,
        )?;

        info!(
            "correction {} on record {} field '{}': recomputing {} period(s)",
            outcome.correction_id,
            record_id,
            field,
            outcome.affected_periods.len()
        );

        let reports = self.run_periods(&outcome.affected_periods)?;
        Ok((outcome, reports))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CountryProfile, FundingRecord, OrganizationProfile, SectorDefinition, VerificationStatus,
    };
    use crate::store::{
        insert_country_profile, insert_organization, insert_record, insert_sector,
    };
    use chrono::NaiveDate;

    fn record(id: &str, country: &str, amount: Option<f64>, women: bool) -> FundingRecord {
        FundingRecord {
            id: id.to_string(),
            organization: "AfriFund".to_string(),
            title: format!("Grant {}", id),
            amount_usd: amount,
            country_codes: vec![country.to_string()],
            primary_sector: "AI Research".to_string(),
            secondary_sector: None,
            women_led: women,
            youth_focused: false,
            rural_focused: false,
            deadline: None,
            created_at: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            verification: VerificationStatus::Verified,
            eligibility_text: "Registered startups".to_string(),
            application_url: "https://example.org/apply".to_string(),
            contact_email: "grants@example.org".to_string(),
            version: 1,
        }
    }

    fn seeded_pipeline() -> EquityPipeline {
        let conn = Connection::open_in_memory().unwrap();
        let pipeline = EquityPipeline::new(conn, EngineConfig::default()).unwrap();

        for (code, region, pop) in [
            ("KE", "East Africa", 55_000_000u64),
            ("NG", "West Africa", 220_000_000),
        ] {
            insert_country_profile(
                pipeline.conn(),
                &CountryProfile {
                    code: code.to_string(),
                    name: code.to_string(),
                    region: region.to_string(),
                    subregion: region.to_string(),
                    population: pop,
                    gdp_per_capita_usd: 2_500.0,
                    ai_readiness_index: None,
                },
            )
            .unwrap();
        }

        insert_sector(
            pipeline.conn(),
            &SectorDefinition {
                name: "AI Research".to_string(),
                category: "development".to_string(),
                priority_level: 4,
                parent: None,
                active: true,
            },
        )
        .unwrap();

        insert_organization(
            pipeline.conn(),
            &OrganizationProfile {
                name: "AfriFund".to_string(),
                public_selection_criteria: true,
                published_success_rates: false,
                provides_feedback: true,
                avg_decision_days: Some(45),
            },
        )
        .unwrap();

        pipeline
    }

    fn q1() -> ReportingPeriod {
        "2025-Q1".parse().unwrap()
    }

    #[test]
    fn test_run_publishes_all_dimensions() {
        let pipeline = seeded_pipeline();
        for i in 0..10 {
            insert_record(
                pipeline.conn(),
                &record(&format!("r{}", i), if i < 7 { "KE" } else { "NG" }, Some(10_000.0), i % 2 == 0),
            )
            .unwrap();
        }

        let report = pipeline.run(q1()).unwrap();
        assert_eq!(report.record_count, 10);
        assert!(report.region_rows >= 2);
        assert_eq!(report.content_hashes.len(), 3);

        let writer = SnapshotWriter::new(pipeline.conn());
        let geo = writer.published_geographic(q1()).unwrap();
        let total_share: f64 = geo.iter().map(|r| r.actual_share).sum();
        assert!((total_share - 1.0).abs() < 1e-4);

        let gender = writer.published_gender(q1()).unwrap().unwrap();
        assert_eq!(gender.total_opportunities, 10);
    }

    #[test]
    fn test_rerun_is_deterministic() {
        let pipeline = seeded_pipeline();
        for i in 0..25 {
            insert_record(
                pipeline.conn(),
                &record(&format!("r{}", i), if i % 3 == 0 { "KE" } else { "NG" }, Some(1_000.0 * i as f64), i % 4 == 0),
            )
            .unwrap();
        }

        let first = pipeline.run(q1()).unwrap();
        let second = pipeline.run(q1()).unwrap();

        // Unchanged inputs reproduce byte-identical snapshot content
        assert_eq!(first.content_hashes, second.content_hashes);
        assert_ne!(first.run_id, second.run_id);
    }

    #[test]
    fn test_bad_config_fails_at_startup() {
        let conn = Connection::open_in_memory().unwrap();
        let mut config = EngineConfig::default();
        config.quality_field_weights.insert("has_amount".to_string(), 99);

        assert!(EquityPipeline::new(conn, config).is_err());
    }

    #[test]
    fn test_sector_cycle_aborts_run() {
        let pipeline = seeded_pipeline();
        insert_sector(
            pipeline.conn(),
            &SectorDefinition {
                name: "A".to_string(),
                category: "development".to_string(),
                priority_level: 3,
                parent: Some("B".to_string()),
                active: true,
            },
        )
        .unwrap();
        insert_sector(
            pipeline.conn(),
            &SectorDefinition {
                name: "B".to_string(),
                category: "development".to_string(),
                priority_level: 3,
                parent: Some("A".to_string()),
                active: true,
            },
        )
        .unwrap();
        insert_record(pipeline.conn(), &record("r1", "KE", None, false)).unwrap();

        let result = pipeline.run(q1());
        assert!(result.is_err());

        // Nothing was published for the period
        let writer = SnapshotWriter::new(pipeline.conn());
        assert!(writer.published_geographic(q1()).unwrap().is_empty());
    }

    #[test]
    fn test_correction_recomputes_only_affected_periods() {
        let pipeline = seeded_pipeline();

        // One record per quarter; r1 has an unknown country
        let mut q1_record = record("r1", "XX", Some(5_000.0), false);
        q1_record.created_at = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        insert_record(pipeline.conn(), &q1_record).unwrap();

        let mut q2_record = record("r2", "NG", Some(5_000.0), false);
        q2_record.created_at = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        insert_record(pipeline.conn(), &q2_record).unwrap();

        let q2: ReportingPeriod = "2025-Q2".parse().unwrap();
        pipeline.run(q1()).unwrap();
        pipeline.run(q2).unwrap();

        let q2_hash_before: String = pipeline
            .conn()
            .query_row(
                "SELECT content_hash FROM snapshot_runs
                 WHERE period = '2025-Q2' AND dimension = 'geographic'
                 ORDER BY id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap();

        // Reclassify r1 from unclassified to Kenya
        let (outcome, reports) = pipeline
            .apply_correction("r1", "country_codes", "KE", "resolved country", "curator")
            .unwrap();

        assert_eq!(outcome.affected_periods, vec![q1()]);
        assert_eq!(reports.len(), 1);

        // Q1 now attributes the record to East Africa
        let writer = SnapshotWriter::new(pipeline.conn());
        let geo = writer.published_geographic(q1()).unwrap();
        let east = geo.iter().find(|r| r.region == "East Africa").unwrap();
        assert_eq!(east.opportunity_count, 1);
        let unclassified = geo.iter().find(|r| r.region == "unclassified");
        assert!(unclassified.map(|r| r.opportunity_count).unwrap_or(0) == 0);

        // Q2 was not recomputed: still exactly one geographic run row
        let q2_runs: i64 = pipeline
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM snapshot_runs
                 WHERE period = '2025-Q2' AND dimension = 'geographic'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(q2_runs, 1);

        let q2_hash_after: String = pipeline
            .conn()
            .query_row(
                "SELECT content_hash FROM snapshot_runs
                 WHERE period = '2025-Q2' AND dimension = 'geographic'
                 ORDER BY id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(q2_hash_before, q2_hash_after);
    }

    #[test]
    fn test_null_amount_visible_in_sector_totals() {
        let pipeline = seeded_pipeline();
        insert_record(pipeline.conn(), &record("r1", "KE", Some(30_000.0), false)).unwrap();
        insert_record(pipeline.conn(), &record("r2", "KE", None, false)).unwrap();

        pipeline.run(q1()).unwrap();

        let writer = SnapshotWriter::new(pipeline.conn());
        let sectors = writer.published_sectors(q1()).unwrap();
        let ai = sectors.iter().find(|s| s.sector == "AI Research").unwrap();

        assert_eq!(ai.opportunity_count, 2);
        assert_eq!(ai.funding_total, 30_000.0);
        // Mean over the single funded record, not dragged down by the null
        assert_eq!(ai.funding_average, Some(30_000.0));
    }

    #[test]
    fn test_transparency_scores_published() {
        let pipeline = seeded_pipeline();
        insert_record(pipeline.conn(), &record("r1", "KE", Some(10_000.0), false)).unwrap();

        pipeline.run(q1()).unwrap();

        // 50 base + 15 criteria + 10 feedback + 0 medium tier
        let score: i64 = pipeline
            .conn()
            .query_row(
                "SELECT score FROM transparency_scores WHERE organization = 'AfriFund'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(score, 75);
    }
}
