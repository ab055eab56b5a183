// 🗄️ Record Store Adapter - Read-only typed view over source data
//
// The engine's only dependency on persistent storage. Engine
// components read through the RecordStore trait and never write back;
// ingestion helpers (schema setup, CSV import) live on the other side
// of that line and are used by the importer binary and tests.

use chrono::NaiveDate;
use log::warn;
use rusqlite::{params, Connection};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{EngineError, Result};
use crate::model::{
    CountryIndex, CountryProfile, FundingRecord, OrganizationProfile, PeriodWindow,
    SectorCatalog, SectorDefinition, VerificationStatus,
};

const DATE_FMT: &str = "%Y-%m-%d";

// ============================================================================
// RECORD STORE TRAIT
// ============================================================================

/// Read-only fetches the pipeline is built on. One fetch at the start
/// of a run freezes the input; every worker observes the same set.
pub trait RecordStore {
    /// Current (non-superseded) records whose activity window overlaps
    /// the given window, in stable order.
    fn fetch_records(&self, window: &PeriodWindow) -> Result<Vec<FundingRecord>>;

    fn fetch_country_profiles(&self) -> Result<CountryIndex>;

    /// Sector reference data, validated acyclic on load.
    fn fetch_sectors(&self) -> Result<SectorCatalog>;

    fn fetch_organizations(&self) -> Result<Vec<OrganizationProfile>>;
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteStore { conn }
    }
}

impl RecordStore for SqliteStore<'_> {
    fn fetch_records(&self, window: &PeriodWindow) -> Result<Vec<FundingRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT record_uuid, organization, title, amount_usd, country_codes,
                        primary_sector, secondary_sector, women_led, youth_focused,
                        rural_focused, deadline, created_at, verification,
                        eligibility_text, application_url, contact_email, version
                 FROM funding_records
                 WHERE superseded = 0
                   AND created_at <= ?1
                   AND COALESCE(deadline, created_at) >= ?2
                 ORDER BY record_uuid",
            )
            .map_err(|e| EngineError::data_source(format!("prepare record fetch: {}", e)))?;

        let rows = stmt
            .query_map(
                params![
                    window.end.format(DATE_FMT).to_string(),
                    window.start.format(DATE_FMT).to_string()
                ],
                record_from_row,
            )
            .map_err(|e| EngineError::data_source(format!("query funding records: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(
                row.map_err(|e| EngineError::data_source(format!("read funding record: {}", e)))?,
            );
        }
        Ok(records)
    }

    fn fetch_country_profiles(&self) -> Result<CountryIndex> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT code, name, region, subregion, population,
                        gdp_per_capita_usd, ai_readiness_index
                 FROM country_profiles",
            )
            .map_err(|e| EngineError::data_source(format!("prepare country fetch: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(CountryProfile {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    region: row.get(2)?,
                    subregion: row.get(3)?,
                    population: row.get::<_, i64>(4)? as u64,
                    gdp_per_capita_usd: row.get(5)?,
                    ai_readiness_index: row.get(6)?,
                })
            })
            .map_err(|e| EngineError::data_source(format!("query country profiles: {}", e)))?;

        let mut index = CountryIndex::new();
        for row in rows {
            let profile =
                row.map_err(|e| EngineError::data_source(format!("read country profile: {}", e)))?;
            index.insert(profile.code.clone(), profile);
        }
        Ok(index)
    }

    fn fetch_sectors(&self) -> Result<SectorCatalog> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, category, priority_level, parent, active FROM sectors")
            .map_err(|e| EngineError::data_source(format!("prepare sector fetch: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SectorDefinition {
                    name: row.get(0)?,
                    category: row.get(1)?,
                    priority_level: row.get::<_, i64>(2)? as u8,
                    parent: row.get(3)?,
                    active: row.get::<_, i64>(4)? != 0,
                })
            })
            .map_err(|e| EngineError::data_source(format!("query sectors: {}", e)))?;

        let mut sectors = Vec::new();
        for row in rows {
            sectors.push(row.map_err(|e| EngineError::data_source(format!("read sector: {}", e)))?);
        }

        // Catalog construction runs acyclicity validation; a cycle is a
        // Config error and no snapshot run proceeds.
        SectorCatalog::new(sectors)
    }

    fn fetch_organizations(&self) -> Result<Vec<OrganizationProfile>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, public_selection_criteria, published_success_rates,
                        provides_feedback, avg_decision_days
                 FROM organizations
                 ORDER BY name",
            )
            .map_err(|e| EngineError::data_source(format!("prepare organization fetch: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(OrganizationProfile {
                    name: row.get(0)?,
                    public_selection_criteria: row.get::<_, i64>(1)? != 0,
                    published_success_rates: row.get::<_, i64>(2)? != 0,
                    provides_feedback: row.get::<_, i64>(3)? != 0,
                    avg_decision_days: row.get::<_, Option<i64>>(4)?.map(|d| d as u32),
                })
            })
            .map_err(|e| EngineError::data_source(format!("query organizations: {}", e)))?;

        let mut organizations = Vec::new();
        for row in rows {
            organizations
                .push(row.map_err(|e| EngineError::data_source(format!("read organization: {}", e)))?);
        }
        Ok(organizations)
    }
}

/// Current (non-superseded) version of one record, by stable UUID.
/// Used by the correction path; the engine itself fetches by window.
pub fn fetch_current_record(conn: &Connection, record_id: &str) -> Result<Option<FundingRecord>> {
    conn.query_row(
        "SELECT record_uuid, organization, title, amount_usd, country_codes,
                primary_sector, secondary_sector, women_led, youth_focused,
                rural_focused, deadline, created_at, verification,
                eligibility_text, application_url, contact_email, version
         FROM funding_records
         WHERE record_uuid = ?1 AND superseded = 0",
        params![record_id],
        record_from_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(EngineError::data_source(format!(
            "fetch record '{}': {}",
            record_id, other
        ))),
    })
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FundingRecord> {
    let countries: String = row.get(4)?;
    let deadline: Option<String> = row.get(10)?;
    let created_at: String = row.get(11)?;
    let verification: String = row.get(12)?;

    Ok(FundingRecord {
        id: row.get(0)?,
        organization: row.get(1)?,
        title: row.get(2)?,
        amount_usd: row.get(3)?,
        country_codes: split_codes(&countries),
        primary_sector: row.get(5)?,
        secondary_sector: row.get(6)?,
        women_led: row.get::<_, i64>(7)? != 0,
        youth_focused: row.get::<_, i64>(8)? != 0,
        rural_focused: row.get::<_, i64>(9)? != 0,
        deadline: deadline.and_then(|d| NaiveDate::parse_from_str(&d, DATE_FMT).ok()),
        created_at: NaiveDate::parse_from_str(&created_at, DATE_FMT)
            .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch")),
        verification: VerificationStatus::parse(&verification),
        eligibility_text: row.get(13)?,
        application_url: row.get(14)?,
        contact_email: row.get(15)?,
        version: row.get(16)?,
    })
}

fn split_codes(joined: &str) -> Vec<String> {
    joined
        .split(';')
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

pub fn join_codes(codes: &[String]) -> String {
    codes.join(";")
}

// ============================================================================
// SCHEMA SETUP (ingestion side)
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| EngineError::data_source(format!("enable WAL: {}", e)))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS funding_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_uuid TEXT NOT NULL,
            idempotency_hash TEXT NOT NULL,
            organization TEXT NOT NULL,
            title TEXT NOT NULL,
            amount_usd REAL,
            country_codes TEXT NOT NULL,
            primary_sector TEXT NOT NULL,
            secondary_sector TEXT,
            women_led INTEGER NOT NULL DEFAULT 0,
            youth_focused INTEGER NOT NULL DEFAULT 0,
            rural_focused INTEGER NOT NULL DEFAULT 0,
            deadline TEXT,
            created_at TEXT NOT NULL,
            verification TEXT NOT NULL,
            eligibility_text TEXT NOT NULL DEFAULT '',
            application_url TEXT NOT NULL DEFAULT '',
            contact_email TEXT NOT NULL DEFAULT '',
            version INTEGER NOT NULL DEFAULT 1,
            superseded INTEGER NOT NULL DEFAULT 0,
            ingested_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(record_uuid, version)
        );

        CREATE TABLE IF NOT EXISTS country_profiles (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            region TEXT NOT NULL,
            subregion TEXT NOT NULL,
            population INTEGER NOT NULL,
            gdp_per_capita_usd REAL NOT NULL,
            ai_readiness_index REAL
        );

        CREATE TABLE IF NOT EXISTS sectors (
            name TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            priority_level INTEGER NOT NULL,
            parent TEXT,
            active INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS organizations (
            name TEXT PRIMARY KEY,
            public_selection_criteria INTEGER NOT NULL DEFAULT 0,
            published_success_rates INTEGER NOT NULL DEFAULT 0,
            provides_feedback INTEGER NOT NULL DEFAULT 0,
            avg_decision_days INTEGER
        );

        CREATE TABLE IF NOT EXISTS corrections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            correction_id TEXT UNIQUE NOT NULL,
            record_uuid TEXT NOT NULL,
            field TEXT NOT NULL,
            old_value TEXT NOT NULL,
            new_value TEXT NOT NULL,
            reason TEXT NOT NULL,
            submitted_by TEXT NOT NULL,
            submitted_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_window
            ON funding_records(created_at, deadline);
        CREATE INDEX IF NOT EXISTS idx_records_hash
            ON funding_records(idempotency_hash);
        CREATE INDEX IF NOT EXISTS idx_records_uuid
            ON funding_records(record_uuid);
        CREATE INDEX IF NOT EXISTS idx_corrections_record
            ON corrections(record_uuid);",
    )
    .map_err(|e| EngineError::data_source(format!("create source tables: {}", e)))?;

    Ok(())
}

// ============================================================================
// INGESTION
// ============================================================================

/// Hash for duplicate detection on import. Identity lives in the
/// record UUID; this only guards against re-ingesting the same source
/// row.
pub fn idempotency_hash(record: &FundingRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}",
        record.organization,
        record.title,
        record.created_at.format(DATE_FMT),
        join_codes(&record.country_codes),
    ));
    format!("{:x}", hasher.finalize())
}

/// Insert one record, skipping it when an identical source row is
/// already present. Returns true when inserted.
pub fn insert_record(conn: &Connection, record: &FundingRecord) -> Result<bool> {
    let hash = idempotency_hash(record);

    let existing: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM funding_records WHERE idempotency_hash = ?1 AND superseded = 0",
            params![hash],
            |row| row.get(0),
        )
        .map_err(|e| EngineError::data_source(format!("duplicate check: {}", e)))?;
    if existing > 0 {
        return Ok(false);
    }

    insert_record_version(conn, record, &hash)?;
    Ok(true)
}

/// Insert a specific record version without duplicate checking. Used
/// by the correction path, which appends versions on purpose.
pub fn insert_record_version(conn: &Connection, record: &FundingRecord, hash: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO funding_records (
            record_uuid, idempotency_hash, organization, title, amount_usd,
            country_codes, primary_sector, secondary_sector, women_led,
            youth_focused, rural_focused, deadline, created_at, verification,
            eligibility_text, application_url, contact_email, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            record.id,
            hash,
            record.organization,
            record.title,
            record.amount_usd,
            join_codes(&record.country_codes),
            record.primary_sector,
            record.secondary_sector,
            record.women_led as i64,
            record.youth_focused as i64,
            record.rural_focused as i64,
            record.deadline.map(|d| d.format(DATE_FMT).to_string()),
            record.created_at.format(DATE_FMT).to_string(),
            record.verification.as_str(),
            record.eligibility_text,
            record.application_url,
            record.contact_email,
            record.version,
        ],
    )
    .map_err(|e| EngineError::data_source(format!("insert funding record: {}", e)))?;
    Ok(())
}

pub fn insert_country_profile(conn: &Connection, profile: &CountryProfile) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO country_profiles
            (code, name, region, subregion, population, gdp_per_capita_usd, ai_readiness_index)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            profile.code,
            profile.name,
            profile.region,
            profile.subregion,
            profile.population as i64,
            profile.gdp_per_capita_usd,
            profile.ai_readiness_index,
        ],
    )
    .map_err(|e| EngineError::data_source(format!("insert country profile: {}", e)))?;
    Ok(())
}

pub fn insert_sector(conn: &Connection, sector: &SectorDefinition) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO sectors (name, category, priority_level, parent, active)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            sector.name,
            sector.category,
            sector.priority_level as i64,
            sector.parent,
            sector.active as i64,
        ],
    )
    .map_err(|e| EngineError::data_source(format!("insert sector: {}", e)))?;
    Ok(())
}

pub fn insert_organization(conn: &Connection, org: &OrganizationProfile) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO organizations
            (name, public_selection_criteria, published_success_rates,
             provides_feedback, avg_decision_days)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            org.name,
            org.public_selection_criteria as i64,
            org.published_success_rates as i64,
            org.provides_feedback as i64,
            org.avg_decision_days.map(|d| d as i64),
        ],
    )
    .map_err(|e| EngineError::data_source(format!("insert organization: {}", e)))?;
    Ok(())
}

// ============================================================================
// CSV IMPORT
// ============================================================================

/// Raw CSV row shape. Countries are semicolon-joined in the source
/// export; flags accept yes/no, true/false, 1/0.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    organization: String,
    title: String,
    amount_usd: Option<f64>,
    country_codes: String,
    primary_sector: String,
    secondary_sector: Option<String>,
    women_led: Option<String>,
    youth_focused: Option<String>,
    rural_focused: Option<String>,
    deadline: Option<String>,
    created_at: String,
    verification: Option<String>,
    eligibility_text: Option<String>,
    application_url: Option<String>,
    contact_email: Option<String>,
}

fn parse_flag(value: &Option<String>) -> bool {
    match value {
        Some(v) => matches!(v.trim().to_lowercase().as_str(), "true" | "yes" | "1" | "y"),
        None => false,
    }
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<FundingRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .map_err(|e| EngineError::data_source(format!("open CSV {:?}: {}", csv_path, e)))?;

    let mut records = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let raw: CsvRecord = result
            .map_err(|e| EngineError::data_source(format!("CSV row {}: {}", line + 2, e)))?;

        let created_at = NaiveDate::parse_from_str(raw.created_at.trim(), DATE_FMT)
            .map_err(|e| {
                EngineError::data_source(format!(
                    "CSV row {}: bad created_at '{}': {}",
                    line + 2,
                    raw.created_at,
                    e
                ))
            })?;

        let deadline = match raw.deadline.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(d) => match NaiveDate::parse_from_str(d, DATE_FMT) {
                Ok(date) => Some(date),
                Err(_) => {
                    warn!("CSV row {}: unparseable deadline '{}', treating as absent", line + 2, d);
                    None
                }
            },
        };

        records.push(FundingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            organization: raw.organization.trim().to_string(),
            title: raw.title.trim().to_string(),
            amount_usd: raw.amount_usd.filter(|a| a.is_finite() && *a >= 0.0),
            country_codes: split_codes(&raw.country_codes),
            primary_sector: raw.primary_sector.trim().to_string(),
            secondary_sector: raw
                .secondary_sector
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            women_led: parse_flag(&raw.women_led),
            youth_focused: parse_flag(&raw.youth_focused),
            rural_focused: parse_flag(&raw.rural_focused),
            deadline,
            created_at,
            verification: VerificationStatus::parse(raw.verification.as_deref().unwrap_or("")),
            eligibility_text: raw.eligibility_text.unwrap_or_default(),
            application_url: raw.application_url.unwrap_or_default(),
            contact_email: raw.contact_email.unwrap_or_default(),
            version: 1,
        });
    }

    Ok(records)
}

/// Import a CSV file, returning (inserted, duplicates_skipped).
pub fn import_csv(conn: &Connection, csv_path: &Path) -> Result<(usize, usize)> {
    let records = load_csv(csv_path)?;

    let mut inserted = 0;
    let mut duplicates = 0;
    for record in &records {
        if insert_record(conn, record)? {
            inserted += 1;
        } else {
            duplicates += 1;
        }
    }

    Ok((inserted, duplicates))
}

// ============================================================================
// TESTS
// ============================================================================
