// 📝 Correction Log - Append-only record amendments
//
// A correction never rewrites a record in place. It appends to the
// correction log, supersedes the current version, and inserts the
// next version. The outcome names exactly the reporting periods whose
// snapshots must be recomputed; untouched periods stay as published.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::model::{FundingRecord, ReportingPeriod, VerificationStatus};
use crate::store;

// ============================================================================
// CORRECTION EVENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionEvent {
    pub correction_id: String,
    pub record_id: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub reason: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

/// What a submitted correction did and which periods it dirtied.
#[derive(Debug, Clone)]
pub struct CorrectionOutcome {
    pub correction_id: String,
    pub record_id: String,
    pub new_version: i64,
    pub affected_periods: Vec<ReportingPeriod>,
}

// ============================================================================
// FIELD APPLICATION
// ============================================================================

fn parse_optional_date(value: &str) -> Result<Option<NaiveDate>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| EngineError::config(format!("correction date '{}' is not YYYY-MM-DD", value)))
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(EngineError::config(format!(
            "correction value '{}' is not a boolean",
            other
        ))),
    }
}

/// Apply one field change, returning the displaced old value.
fn apply_field(record: &mut FundingRecord, field: &str, new_value: &str) -> Result<String> {
    let old = match field {
        "amount_usd" => {
            let old = record
                .amount_usd
                .map(|a| a.to_string())
                .unwrap_or_default();
            record.amount_usd = if new_value.trim().is_empty() {
                None
            } else {
                let parsed: f64 = new_value.trim().parse().map_err(|_| {
                    EngineError::config(format!("correction amount '{}' is not numeric", new_value))
                })?;
                if !parsed.is_finite() || parsed < 0.0 {
                    return Err(EngineError::config(format!(
                        "correction amount {} must be non-negative",
                        parsed
                    )));
                }
                Some(parsed)
            };
            old
        }
        "country_codes" => {
            let old = store::join_codes(&record.country_codes);
            record.country_codes = new_value
                .split(';')
                .map(|c| c.trim().to_uppercase())
                .filter(|c| !c.is_empty())
                .collect();
            old
        }
        "primary_sector" => {
            std::mem::replace(&mut record.primary_sector, new_value.trim().to_string())
        }
        "secondary_sector" => {
            let old = record.secondary_sector.take().unwrap_or_default();
            let trimmed = new_value.trim();
            if !trimmed.is_empty() {
                record.secondary_sector = Some(trimmed.to_string());
            }
            old
        }
        "deadline" => {
            let old = record
                .deadline
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            record.deadline = parse_optional_date(new_value)?;
            old
        }
        "verification" => {
            let old = record.verification.as_str().to_string();
            record.verification = VerificationStatus::parse(new_value);
            old
        }
        "women_led" => {
            let old = record.women_led.to_string();
            record.women_led = parse_bool(new_value)?;
            old
        }
        "youth_focused" => {
            let old = record.youth_focused.to_string();
            record.youth_focused = parse_bool(new_value)?;
            old
        }
        "rural_focused" => {
            let old = record.rural_focused.to_string();
            record.rural_focused = parse_bool(new_value)?;
            old
        }
        "title" => std::mem::replace(&mut record.title, new_value.trim().to_string()),
        "eligibility_text" => {
            std::mem::replace(&mut record.eligibility_text, new_value.to_string())
        }
        "application_url" => {
            std::mem::replace(&mut record.application_url, new_value.trim().to_string())
        }
        "contact_email" => {
            std::mem::replace(&mut record.contact_email, new_value.trim().to_string())
        }
        other => {
            return Err(EngineError::config(format!(
                "correction field '{}' is not supported",
                other
            )))
        }
    };
    Ok(old)
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// Union of periods touched by the record before and after the change.
pub fn affected_periods(old: &FundingRecord, new: &FundingRecord) -> Vec<ReportingPeriod> {
    let mut periods: BTreeSet<ReportingPeriod> = old.periods().into_iter().collect();
    periods.extend(new.periods());
    periods.into_iter().collect()
}

pub fn submit_correction(
    conn: &Connection,
    record_id: &str,
    field: &str,
    new_value: &str,
    reason: &str,
    submitted_by: &str,
) -> Result<CorrectionOutcome> {
    let old_record = store::fetch_current_record(conn, record_id)?.ok_or_else(|| {
        EngineError::config(format!("correction references unknown record '{}'", record_id))
    })?;

    let mut new_record = old_record.clone();
    let old_value = apply_field(&mut new_record, field, new_value)?;
    new_record.version = old_record.version + 1;

    let event = CorrectionEvent {
        correction_id: uuid::Uuid::new_v4().to_string(),
        record_id: record_id.to_string(),
        field: field.to_string(),
        old_value,
        new_value: new_value.to_string(),
        reason: reason.to_string(),
        submitted_by: submitted_by.to_string(),
        submitted_at: Utc::now(),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| EngineError::data_source(format!("begin correction: {}", e)))?;

    tx.execute(
        "INSERT INTO corrections
            (correction_id, record_uuid, field, old_value, new_value,
             reason, submitted_by, submitted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.correction_id,
            event.record_id,
            event.field,
            event.old_value,
            event.new_value,
            event.reason,
            event.submitted_by,
            event.submitted_at.to_rfc3339(),
        ],
    )
    .map_err(|e| EngineError::data_source(format!("append correction: {}", e)))?;

    tx.execute(
        "UPDATE funding_records SET superseded = 1 WHERE record_uuid = ?1 AND superseded = 0",
        params![record_id],
    )
    .map_err(|e| EngineError::data_source(format!("supersede record: {}", e)))?;

    store::insert_record_version(&tx, &new_record, &store::idempotency_hash(&new_record))?;

    tx.commit()
        .map_err(|e| EngineError::data_source(format!("commit correction: {}", e)))?;

    Ok(CorrectionOutcome {
        correction_id: event.correction_id,
        record_id: record_id.to_string(),
        new_version: new_record.version,
        affected_periods: affected_periods(&old_record, &new_record),
    })
}

/// Full correction history for one record, oldest first.
pub fn corrections_for_record(conn: &Connection, record_id: &str) -> Result<Vec<CorrectionEvent>> {
    let mut stmt = conn
        .prepare(
            "SELECT correction_id, record_uuid, field, old_value, new_value,
                    reason, submitted_by, submitted_at
             FROM corrections WHERE record_uuid = ?1 ORDER BY id",
        )
        .map_err(|e| EngineError::data_source(e.to_string()))?;

    let rows = stmt
        .query_map(params![record_id], |row| {
            let submitted_at: String = row.get(7)?;
            Ok(CorrectionEvent {
                correction_id: row.get(0)?,
                record_id: row.get(1)?,
                field: row.get(2)?,
                old_value: row.get(3)?,
                new_value: row.get(4)?,
                reason: row.get(5)?,
                submitted_by: row.get(6)?,
                submitted_at: submitted_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
        })
        .map_err(|e| EngineError::data_source(e.to_string()))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| EngineError::data_source(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeriodWindow;
    use crate::store::{insert_record, setup_database, RecordStore, SqliteStore};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn record() -> FundingRecord {
        FundingRecord {
            id: "rec-1".to_string(),
            organization: "AfriFund".to_string(),
            title: "AI Seed Grant".to_string(),
            amount_usd: Some(50_000.0),
            country_codes: vec!["XX".to_string()],
            primary_sector: "AI Research".to_string(),
            secondary_sector: None,
            women_led: false,
            youth_focused: false,
            rural_focused: false,
            deadline: NaiveDate::from_ymd_opt(2025, 3, 15),
            created_at: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            verification: VerificationStatus::Pending,
            eligibility_text: String::new(),
            application_url: String::new(),
            contact_email: String::new(),
            version: 1,
        }
    }

    fn q1_window() -> PeriodWindow {
        "2025-Q1".parse::<ReportingPeriod>().unwrap().window()
    }

    #[test]
    fn test_country_correction_appends_version() {
        let conn = test_conn();
        insert_record(&conn, &record()).unwrap();

        let outcome =
            submit_correction(&conn, "rec-1", "country_codes", "KE", "typo fix", "curator")
                .unwrap();

        assert_eq!(outcome.new_version, 2);
        // Activity window is entirely inside Q1 2025
        assert_eq!(outcome.affected_periods, vec!["2025-Q1".parse().unwrap()]);

        let store = SqliteStore::new(&conn);
        let fetched = store.fetch_records(&q1_window()).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].version, 2);
        assert_eq!(fetched[0].country_codes, vec!["KE".to_string()]);
    }

    #[test]
    fn test_correction_log_is_append_only_history() {
        let conn = test_conn();
        insert_record(&conn, &record()).unwrap();

        submit_correction(&conn, "rec-1", "country_codes", "KE", "typo", "curator").unwrap();
        submit_correction(&conn, "rec-1", "amount_usd", "80000", "updated award", "curator")
            .unwrap();

        let history = corrections_for_record(&conn, "rec-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].field, "country_codes");
        assert_eq!(history[0].old_value, "XX");
        assert_eq!(history[1].field, "amount_usd");
        assert_eq!(history[1].old_value, "50000");

        let store = SqliteStore::new(&conn);
        let fetched = store.fetch_records(&q1_window()).unwrap();
        assert_eq!(fetched[0].version, 3);
        assert_eq!(fetched[0].amount_usd, Some(80_000.0));
    }

    #[test]
    fn test_deadline_correction_extends_affected_periods() {
        let conn = test_conn();
        insert_record(&conn, &record()).unwrap();

        let outcome = submit_correction(
            &conn,
            "rec-1",
            "deadline",
            "2025-05-20",
            "deadline extended",
            "curator",
        )
        .unwrap();

        let labels: Vec<String> = outcome.affected_periods.iter().map(|p| p.to_string()).collect();
        assert_eq!(labels, vec!["2025-Q1", "2025-Q2"]);
    }

    #[test]
    fn test_unsupported_field_rejected() {
        let conn = test_conn();
        insert_record(&conn, &record()).unwrap();

        let result = submit_correction(&conn, "rec-1", "organization_id", "7", "", "curator");
        assert!(matches!(result, Err(EngineError::Config(_))));

        // Nothing was appended or superseded
        assert!(corrections_for_record(&conn, "rec-1").unwrap().is_empty());
        let store = SqliteStore::new(&conn);
        assert_eq!(store.fetch_records(&q1_window()).unwrap()[0].version, 1);
    }

    #[test]
    fn test_unknown_record_rejected() {
        let conn = test_conn();
        let result = submit_correction(&conn, "ghost", "amount_usd", "10", "", "curator");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_amount_cleared_to_null() {
        let conn = test_conn();
        insert_record(&conn, &record()).unwrap();

        submit_correction(&conn, "rec-1", "amount_usd", "", "amount retracted", "curator")
            .unwrap();

        let store = SqliteStore::new(&conn);
        let fetched = store.fetch_records(&q1_window()).unwrap();
        assert_eq!(fetched[0].amount_usd, None);
    }
}
