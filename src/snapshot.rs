// 📸 Snapshot Writer - Staged, atomic, versioned publication
//
// One snapshot set per (dimension, period) is published as a unit:
// rows land in a staging table first, then a single transaction swaps
// them into the published table. Downstream readers never observe a
// half-written period. Recomputing a period replaces its set
// wholesale; bias events only ever append.

use chrono::Utc;
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::equity::{
    BiasDetectionEvent, GenderMetricSnapshot, GeographicGapSnapshot, SectorMetricSnapshot,
};
use crate::error::{EngineError, Result};
use crate::model::ReportingPeriod;
use crate::scoring::{DataQualityScore, TransparencyScore};

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_snapshot_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS geographic_gap_snapshots (
            period TEXT NOT NULL,
            region TEXT NOT NULL,
            expected_share REAL NOT NULL,
            actual_share REAL NOT NULL,
            gap_percentage REAL NOT NULL,
            opportunity_count INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (period, region)
        );
        CREATE TABLE IF NOT EXISTS geographic_gap_staging (
            period TEXT NOT NULL,
            region TEXT NOT NULL,
            expected_share REAL NOT NULL,
            actual_share REAL NOT NULL,
            gap_percentage REAL NOT NULL,
            opportunity_count INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (period, region)
        );

        CREATE TABLE IF NOT EXISTS sector_metric_snapshots (
            period TEXT NOT NULL,
            sector TEXT NOT NULL,
            opportunity_count INTEGER NOT NULL,
            funding_total REAL NOT NULL,
            funding_average REAL,
            expected_share REAL NOT NULL,
            actual_share REAL NOT NULL,
            gap_percentage REAL NOT NULL,
            commercial_ratio REAL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (period, sector)
        );
        CREATE TABLE IF NOT EXISTS sector_metric_staging (
            period TEXT NOT NULL,
            sector TEXT NOT NULL,
            opportunity_count INTEGER NOT NULL,
            funding_total REAL NOT NULL,
            funding_average REAL,
            expected_share REAL NOT NULL,
            actual_share REAL NOT NULL,
            gap_percentage REAL NOT NULL,
            commercial_ratio REAL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (period, sector)
        );

        CREATE TABLE IF NOT EXISTS gender_metric_snapshots (
            period TEXT PRIMARY KEY,
            total_opportunities INTEGER NOT NULL,
            women_focused_count INTEGER NOT NULL,
            women_focused_funding REAL NOT NULL,
            pct_of_total REAL NOT NULL,
            expected_pct REAL NOT NULL,
            gap_percentage_points REAL NOT NULL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS gender_metric_staging (
            period TEXT PRIMARY KEY,
            total_opportunities INTEGER NOT NULL,
            women_focused_count INTEGER NOT NULL,
            women_focused_funding REAL NOT NULL,
            pct_of_total REAL NOT NULL,
            expected_pct REAL NOT NULL,
            gap_percentage_points REAL NOT NULL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS data_quality_scores (
            record_uuid TEXT PRIMARY KEY,
            score INTEGER NOT NULL,
            missing_fields TEXT NOT NULL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transparency_scores (
            organization TEXT PRIMARY KEY,
            score INTEGER NOT NULL,
            run_id TEXT NOT NULL,
            computed_at TEXT NOT NULL
        );

        -- Append-only audit trail
        CREATE TABLE IF NOT EXISTS bias_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            period TEXT NOT NULL,
            dimension TEXT NOT NULL,
            entity TEXT NOT NULL,
            deviation_score REAL NOT NULL,
            gap_percentage REAL NOT NULL,
            sample_size INTEGER NOT NULL,
            detected_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS snapshot_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            period TEXT NOT NULL,
            dimension TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            computed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_bias_events_period ON bias_events(period);
        CREATE INDEX IF NOT EXISTS idx_snapshot_runs_period ON snapshot_runs(period, dimension);",
    )
    .map_err(|e| EngineError::data_source(format!("create snapshot tables: {}", e)))?;

    Ok(())
}

// ============================================================================
// CONTENT HASHING
// ============================================================================

/// Hash of the canonical serialization of a snapshot set. Identical
/// inputs must produce an identical hash across re-runs; run metadata
/// (run id, wall clock) stays out of the hashed content.
pub fn content_hash<T: Serialize>(rows: &[T]) -> Result<String> {
    let canonical = serde_json::to_string(rows)
        .map_err(|e| EngineError::data_source(format!("serialize snapshot rows: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// PUBLISH SUMMARY
// ============================================================================

#[derive(Debug, Clone)]
pub struct PublishSummary {
    pub run_id: String,
    pub period: ReportingPeriod,
    /// Content hash per dimension name.
    pub content_hashes: BTreeMap<String, String>,
    pub events_appended: usize,
}

// ============================================================================
// SNAPSHOT WRITER
// ============================================================================

pub struct SnapshotWriter<'a> {
    conn: &'a Connection,
}

impl<'a> SnapshotWriter<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SnapshotWriter { conn }
    }

    /// Publish all snapshot sets for one period. Rows are staged per
    /// dimension, then one transaction performs every swap, appends
    /// bias events, and records run metadata. Either the whole period
    /// publishes or nothing does.
    pub fn publish_period(
        &self,
        period: ReportingPeriod,
        run_id: &str,
        geographic: &[GeographicGapSnapshot],
        sectors: &[SectorMetricSnapshot],
        gender: &GenderMetricSnapshot,
        events: &[BiasDetectionEvent],
        quality: &[DataQualityScore],
        transparency: &[TransparencyScore],
    ) -> Result<PublishSummary> {
        let period_key = period.to_string();
        let computed_at = Utc::now().to_rfc3339();

        let mut content_hashes = BTreeMap::new();
        content_hashes.insert("geographic".to_string(), content_hash(geographic)?);
        content_hashes.insert("sector".to_string(), content_hash(sectors)?);
        content_hashes.insert(
            "gender".to_string(),
            content_hash(std::slice::from_ref(gender))?,
        );

        self.stage_geographic(&period_key, run_id, &computed_at, geographic)?;
        self.stage_sectors(&period_key, run_id, &computed_at, sectors)?;
        self.stage_gender(&period_key, run_id, &computed_at, gender)?;

        let publish_err =
            |e: rusqlite::Error| EngineError::publish("all", &period_key, e.to_string());

        let tx = self.conn.unchecked_transaction().map_err(publish_err)?;

        for (table, staging) in [
            ("geographic_gap_snapshots", "geographic_gap_staging"),
            ("sector_metric_snapshots", "sector_metric_staging"),
            ("gender_metric_snapshots", "gender_metric_staging"),
        ] {
            tx.execute(
                &format!("DELETE FROM {} WHERE period = ?1", table),
                params![period_key],
            )
            .map_err(publish_err)?;
            tx.execute(
                &format!(
                    "INSERT INTO {} SELECT * FROM {} WHERE period = ?1",
                    table, staging
                ),
                params![period_key],
            )
            .map_err(publish_err)?;
            tx.execute(
                &format!("DELETE FROM {} WHERE period = ?1", staging),
                params![period_key],
            )
            .map_err(publish_err)?;
        }

        for event in events {
            tx.execute(
                "INSERT INTO bias_events
                    (event_id, period, dimension, entity, deviation_score,
                     gap_percentage, sample_size, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.event_id,
                    event.period.to_string(),
                    event.dimension.as_str(),
                    event.entity,
                    event.deviation_score,
                    event.gap_percentage,
                    event.sample_size as i64,
                    event.detected_at.to_rfc3339(),
                ],
            )
            .map_err(publish_err)?;
        }

        for score in quality {
            tx.execute(
                "INSERT OR REPLACE INTO data_quality_scores
                    (record_uuid, score, missing_fields, run_id, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    score.record_id,
                    score.score as i64,
                    score.missing_fields.join(";"),
                    run_id,
                    computed_at,
                ],
            )
            .map_err(publish_err)?;
        }

        for score in transparency {
            tx.execute(
                "INSERT OR REPLACE INTO transparency_scores
                    (organization, score, run_id, computed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![score.organization, score.score as i64, run_id, computed_at],
            )
            .map_err(publish_err)?;
        }

        for (dimension, hash) in &content_hashes {
            let row_count = match dimension.as_str() {
                "geographic" => geographic.len(),
                "sector" => sectors.len(),
                _ => 1,
            };
            tx.execute(
                "INSERT INTO snapshot_runs
                    (run_id, period, dimension, row_count, content_hash, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![run_id, period_key, dimension, row_count as i64, hash, computed_at],
            )
            .map_err(publish_err)?;
        }

        tx.commit().map_err(publish_err)?;

        info!(
            "published snapshots for {}: {} regions, {} sectors, {} bias events",
            period_key,
            geographic.len(),
            sectors.len(),
            events.len()
        );

        Ok(PublishSummary {
            run_id: run_id.to_string(),
            period,
            content_hashes,
            events_appended: events.len(),
        })
    }

    // ========================================================================
    // STAGING
    // ========================================================================

    fn stage_geographic(
        &self,
        period: &str,
        run_id: &str,
        computed_at: &str,
        rows: &[GeographicGapSnapshot],
    ) -> Result<()> {
        let err = |e: rusqlite::Error| EngineError::publish("geographic", period, e.to_string());

        self.conn
            .execute("DELETE FROM geographic_gap_staging WHERE period = ?1", params![period])
            .map_err(err)?;
        for row in rows {
            self.conn
                .execute(
                    "INSERT INTO geographic_gap_staging
                        (period, region, expected_share, actual_share, gap_percentage,
                         opportunity_count, run_id, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        period,
                        row.region,
                        row.expected_share,
                        row.actual_share,
                        row.gap_percentage,
                        row.opportunity_count as i64,
                        run_id,
                        computed_at,
                    ],
                )
                .map_err(err)?;
        }
        Ok(())
    }

    fn stage_sectors(
        &self,
        period: &str,
        run_id: &str,
        computed_at: &str,
        rows: &[SectorMetricSnapshot],
    ) -> Result<()> {
        let err = |e: rusqlite::Error| EngineError::publish("sector", period, e.to_string());

        self.conn
            .execute("DELETE FROM sector_metric_staging WHERE period = ?1", params![period])
            .map_err(err)?;
        for row in rows {
            self.conn
                .execute(
                    "INSERT INTO sector_metric_staging
                        (period, sector, opportunity_count, funding_total, funding_average,
                         expected_share, actual_share, gap_percentage, commercial_ratio,
                         run_id, computed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        period,
                        row.sector,
                        row.opportunity_count as i64,
                        row.funding_total,
                        row.funding_average,
                        row.expected_share,
                        row.actual_share,
                        row.gap_percentage,
                        row.commercial_ratio,
                        run_id,
                        computed_at,
                    ],
                )
                .map_err(err)?;
        }
        Ok(())
    }

    fn stage_gender(
        &self,
        period: &str,
        run_id: &str,
        computed_at: &str,
        row: &GenderMetricSnapshot,
    ) -> Result<()> {
        let err = |e: rusqlite::Error| EngineError::publish("gender", period, e.to_string());

        self.conn
            .execute("DELETE FROM gender_metric_staging WHERE period = ?1", params![period])
            .map_err(err)?;
        self.conn
            .execute(
                "INSERT INTO gender_metric_staging
                    (period, total_opportunities, women_focused_count, women_focused_funding,
                     pct_of_total, expected_pct, gap_percentage_points, run_id, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    period,
                    row.total_opportunities as i64,
                    row.women_focused_count as i64,
                    row.women_focused_funding,
                    row.pct_of_total,
                    row.expected_pct,
                    row.gap_percentage_points,
                    run_id,
                    computed_at,
                ],
            )
            .map_err(err)?;
        Ok(())
    }

    // ========================================================================
    // READ-BACK (dashboard/reporting contract)
    // ========================================================================

    pub fn published_geographic(&self, period: ReportingPeriod) -> Result<Vec<GeographicGapSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT region, expected_share, actual_share, gap_percentage, opportunity_count
                 FROM geographic_gap_snapshots WHERE period = ?1 ORDER BY region",
            )
            .map_err(|e| EngineError::data_source(e.to_string()))?;

        let rows = stmt
            .query_map(params![period.to_string()], |row| {
                Ok(GeographicGapSnapshot {
                    region: row.get(0)?,
                    period,
                    expected_share: row.get(1)?,
                    actual_share: row.get(2)?,
                    gap_percentage: row.get(3)?,
                    opportunity_count: row.get::<_, i64>(4)? as u64,
                })
            })
            .map_err(|e| EngineError::data_source(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::data_source(e.to_string()))
    }

    pub fn published_sectors(&self, period: ReportingPeriod) -> Result<Vec<SectorMetricSnapshot>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT sector, opportunity_count, funding_total, funding_average,
                        expected_share, actual_share, gap_percentage, commercial_ratio
                 FROM sector_metric_snapshots WHERE period = ?1 ORDER BY sector",
            )
            .map_err(|e| EngineError::data_source(e.to_string()))?;

        let rows = stmt
            .query_map(params![period.to_string()], |row| {
                Ok(SectorMetricSnapshot {
                    sector: row.get(0)?,
                    period,
                    opportunity_count: row.get::<_, i64>(1)? as u64,
                    funding_total: row.get(2)?,
                    funding_average: row.get(3)?,
                    expected_share: row.get(4)?,
                    actual_share: row.get(5)?,
                    gap_percentage: row.get(6)?,
                    commercial_ratio: row.get(7)?,
                })
            })
            .map_err(|e| EngineError::data_source(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| EngineError::data_source(e.to_string()))
    }

    pub fn published_gender(&self, period: ReportingPeriod) -> Result<Option<GenderMetricSnapshot>> {
        self.conn
            .query_row(
                "SELECT total_opportunities, women_focused_count, women_focused_funding,
                        pct_of_total, expected_pct, gap_percentage_points
                 FROM gender_metric_snapshots WHERE period = ?1",
                params![period.to_string()],
                |row| {
                    Ok(GenderMetricSnapshot {
                        period,
                        total_opportunities: row.get::<_, i64>(0)? as u64,
                        women_focused_count: row.get::<_, i64>(1)? as u64,
                        women_focused_funding: row.get(2)?,
                        pct_of_total: row.get(3)?,
                        expected_pct: row.get(4)?,
                        gap_percentage_points: row.get(5)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(EngineError::data_source(other.to_string())),
            })
    }

    pub fn bias_event_count(&self, period: ReportingPeriod) -> Result<usize> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM bias_events WHERE period = ?1",
                params![period.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|c| c as usize)
            .map_err(|e| EngineError::data_source(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BiasDimension;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_snapshot_tables(&conn).unwrap();
        conn
    }

    fn period() -> ReportingPeriod {
        "2025-Q1".parse().unwrap()
    }

    fn geo_rows() -> Vec<GeographicGapSnapshot> {
        vec![
            GeographicGapSnapshot {
                region: "East Africa".to_string(),
                period: period(),
                expected_share: 0.4,
                actual_share: 0.6,
                gap_percentage: 0.2,
                opportunity_count: 60,
            },
            GeographicGapSnapshot {
                region: "West Africa".to_string(),
                period: period(),
                expected_share: 0.6,
                actual_share: 0.4,
                gap_percentage: -0.2,
                opportunity_count: 40,
            },
        ]
    }

    fn gender_row() -> GenderMetricSnapshot {
        GenderMetricSnapshot {
            period: period(),
            total_opportunities: 100,
            women_focused_count: 30,
            women_focused_funding: 1_200_000.0,
            pct_of_total: 30.0,
            expected_pct: 50.0,
            gap_percentage_points: -20.0,
        }
    }

    #[test]
    fn test_publish_and_read_back() {
        let conn = test_conn();
        let writer = SnapshotWriter::new(&conn);

        let summary = writer
            .publish_period(period(), "run-1", &geo_rows(), &[], &gender_row(), &[], &[], &[])
            .unwrap();

        assert_eq!(summary.content_hashes.len(), 3);

        let published = writer.published_geographic(period()).unwrap();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].region, "East Africa");

        let gender = writer.published_gender(period()).unwrap().unwrap();
        assert_eq!(gender.women_focused_count, 30);
    }

    #[test]
    fn test_republish_replaces_wholesale() {
        let conn = test_conn();
        let writer = SnapshotWriter::new(&conn);

        writer
            .publish_period(period(), "run-1", &geo_rows(), &[], &gender_row(), &[], &[], &[])
            .unwrap();

        // Second run computes only one region; stale rows must vanish
        let fewer = vec![geo_rows().remove(0)];
        writer
            .publish_period(period(), "run-2", &fewer, &[], &gender_row(), &[], &[], &[])
            .unwrap();

        let published = writer.published_geographic(period()).unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].region, "East Africa");
    }

    #[test]
    fn test_identical_rows_hash_identically() {
        let first = content_hash(&geo_rows()).unwrap();
        let second = content_hash(&geo_rows()).unwrap();
        assert_eq!(first, second);

        let mut changed = geo_rows();
        changed[0].opportunity_count += 1;
        assert_ne!(first, content_hash(&changed).unwrap());
    }

    #[test]
    fn test_other_periods_untouched_by_publish() {
        let conn = test_conn();
        let writer = SnapshotWriter::new(&conn);
        let q1 = period();
        let q2: ReportingPeriod = "2025-Q2".parse().unwrap();

        writer
            .publish_period(q1, "run-1", &geo_rows(), &[], &gender_row(), &[], &[], &[])
            .unwrap();

        let mut q2_rows = geo_rows();
        for row in &mut q2_rows {
            row.period = q2;
        }
        let mut q2_gender = gender_row();
        q2_gender.period = q2;
        writer
            .publish_period(q2, "run-2", &q2_rows, &[], &q2_gender, &[], &[], &[])
            .unwrap();

        assert_eq!(writer.published_geographic(q1).unwrap().len(), 2);
        assert_eq!(writer.published_geographic(q2).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_publish_leaves_published_intact() {
        let conn = test_conn();
        let writer = SnapshotWriter::new(&conn);

        writer
            .publish_period(period(), "run-1", &geo_rows(), &[], &gender_row(), &[], &[], &[])
            .unwrap();

        // Break the staging area; the next publish must fail without
        // touching what is already published
        conn.execute_batch("DROP TABLE geographic_gap_staging").unwrap();

        let result = writer.publish_period(
            period(),
            "run-2",
            &geo_rows(),
            &[],
            &gender_row(),
            &[],
            &[],
            &[],
        );
        assert!(matches!(result, Err(EngineError::SnapshotPublish { .. })));

        let published = writer.published_geographic(period()).unwrap();
        assert_eq!(published.len(), 2);
        let runs: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM snapshot_runs WHERE run_id = 'run-2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(runs, 0);
    }

    #[test]
    fn test_bias_events_append_only_across_runs() {
        let conn = test_conn();
        let writer = SnapshotWriter::new(&conn);

        let event = BiasDetectionEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            period: period(),
            dimension: BiasDimension::Geographic,
            entity: "East Africa".to_string(),
            deviation_score: 20.0,
            gap_percentage: 20.0,
            sample_size: 60,
            detected_at: Utc::now(),
        };

        writer
            .publish_period(period(), "run-1", &geo_rows(), &[], &gender_row(), &[event], &[], &[])
            .unwrap();
        writer
            .publish_period(period(), "run-2", &geo_rows(), &[], &gender_row(), &[], &[], &[])
            .unwrap();

        // Snapshots were replaced; the event trail was not
        assert_eq!(writer.bias_event_count(period()).unwrap(), 1);
    }
}
