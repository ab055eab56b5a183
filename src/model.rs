// 🌍 Domain Model - Funding records, reference data, reporting periods
//
// FundingRecord is immutable once ingested; corrections append a new
// version and supersede the old one (see corrections.rs). Reference
// data (countries, sectors) updates independently of records.

use chrono::{Datelike, NaiveDate};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{EngineError, Result};

// ============================================================================
// REPORTING PERIOD
// ============================================================================

/// A quarter identifier ("YYYY-Qn"). Every snapshot entity is keyed by
/// one; the period is always passed explicitly through the pipeline,
/// never read from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ReportingPeriod {
    pub year: i32,
    pub quarter: u8,
}

impl ReportingPeriod {
    pub fn new(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(EngineError::config(format!(
                "quarter must be 1-4, got {}",
                quarter
            )));
        }
        Ok(ReportingPeriod { year, quarter })
    }

    /// First day of the quarter.
    pub fn start_date(&self) -> NaiveDate {
        let month = (self.quarter as u32 - 1) * 3 + 1;
        NaiveDate::from_ymd_opt(self.year, month, 1).expect("valid quarter start")
    }

    /// Last day of the quarter.
    pub fn end_date(&self) -> NaiveDate {
        let (y, m) = if self.quarter == 4 {
            (self.year + 1, 1)
        } else {
            (self.year, self.quarter as u32 * 3 + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .expect("valid next quarter start")
            .pred_opt()
            .expect("valid quarter end")
    }

    pub fn window(&self) -> PeriodWindow {
        PeriodWindow {
            start: self.start_date(),
            end: self.end_date(),
        }
    }

    /// Period containing a calendar date.
    pub fn containing(date: NaiveDate) -> Self {
        ReportingPeriod {
            year: date.year(),
            quarter: ((date.month0() / 3) + 1) as u8,
        }
    }

    /// All periods whose window overlaps [start, end].
    pub fn overlapping(start: NaiveDate, end: NaiveDate) -> Vec<ReportingPeriod> {
        let mut periods = Vec::new();
        if end < start {
            return periods;
        }
        let mut current = ReportingPeriod::containing(start);
        let last = ReportingPeriod::containing(end);
        while current <= last {
            periods.push(current);
            current = current.next();
        }
        periods
    }

    pub fn next(&self) -> ReportingPeriod {
        if self.quarter == 4 {
            ReportingPeriod {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            ReportingPeriod {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

impl FromStr for ReportingPeriod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        let (year_part, quarter_part) = s
            .split_once("-Q")
            .ok_or_else(|| EngineError::config(format!("invalid period '{}', expected YYYY-Qn", s)))?;

        let year: i32 = year_part
            .parse()
            .map_err(|_| EngineError::config(format!("invalid year in period '{}'", s)))?;
        let quarter: u8 = quarter_part
            .parse()
            .map_err(|_| EngineError::config(format!("invalid quarter in period '{}'", s)))?;

        ReportingPeriod::new(year, quarter)
    }
}

impl From<ReportingPeriod> for String {
    fn from(p: ReportingPeriod) -> String {
        p.to_string()
    }
}

impl TryFrom<String> for ReportingPeriod {
    type Error = EngineError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Inclusive date window a fetch is bounded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodWindow {
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        start <= self.end && end >= self.start
    }
}

// ============================================================================
// FUNDING RECORD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Verified,
    Pending,
    Unverified,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Pending => "pending",
            VerificationStatus::Unverified => "unverified",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "verified" => VerificationStatus::Verified,
            "pending" => VerificationStatus::Pending,
            _ => VerificationStatus::Unverified,
        }
    }
}

/// One funding opportunity as ingested. Core fields never change in
/// place; a correction produces the next version of the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRecord {
    /// Stable identity (UUID). Survives corrections.
    pub id: String,

    pub organization: String,
    pub title: String,

    /// Currency-normalized USD-equivalent. None means the source did
    /// not declare an amount; it is NOT zero.
    pub amount_usd: Option<f64>,

    /// ISO-3166 alpha-2 codes targeted, first entry is the primary
    /// attribution for geographic grouping.
    pub country_codes: Vec<String>,

    pub primary_sector: String,
    pub secondary_sector: Option<String>,

    // Inclusion-criteria flags
    pub women_led: bool,
    pub youth_focused: bool,
    pub rural_focused: bool,

    pub deadline: Option<NaiveDate>,
    pub created_at: NaiveDate,
    pub verification: VerificationStatus,

    pub eligibility_text: String,
    pub application_url: String,
    pub contact_email: String,

    /// Version number, bumped by corrections.
    pub version: i64,
}

impl FundingRecord {
    /// Primary country attribution for grouping. Empty when the source
    /// declared no target country.
    pub fn primary_country(&self) -> Option<&str> {
        self.country_codes.first().map(|c| c.as_str())
    }

    /// The date span this record is active over: creation through
    /// deadline (or creation alone when no deadline is declared).
    pub fn activity_window(&self) -> (NaiveDate, NaiveDate) {
        let end = match self.deadline {
            Some(d) if d > self.created_at => d,
            _ => self.created_at,
        };
        (self.created_at, end)
    }

    /// Latest observed activity date (max of deadline and creation).
    pub fn last_activity(&self) -> NaiveDate {
        self.activity_window().1
    }

    /// Periods this record contributes to.
    pub fn periods(&self) -> Vec<ReportingPeriod> {
        let (start, end) = self.activity_window();
        ReportingPeriod::overlapping(start, end)
    }
}

// ============================================================================
// COUNTRY REFERENCE DATA
// ============================================================================

/// Reference row for one country. Updated independently of funding
/// records; the engine only ever reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountryProfile {
    /// ISO-3166 alpha-2, unique.
    pub code: String,
    pub name: String,
    pub region: String,
    pub subregion: String,
    pub population: u64,
    pub gdp_per_capita_usd: f64,
    pub ai_readiness_index: Option<f64>,
}

impl CountryProfile {
    /// Absolute GDP proxy used for expected-share weighting.
    pub fn gdp_total(&self) -> f64 {
        self.population as f64 * self.gdp_per_capita_usd
    }
}

pub type CountryIndex = HashMap<String, CountryProfile>;

// ============================================================================
// SECTOR TAXONOMY
// ============================================================================

pub const PRIORITY_MIN: u8 = 1;
pub const PRIORITY_MAX: u8 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorDefinition {
    pub name: String,
    pub category: String,
    /// 1-5, higher means more policy weight.
    pub priority_level: u8,
    /// At most one parent; the catalog rejects cycles on load.
    pub parent: Option<String>,
    pub active: bool,
}

/// Validated sector tree. Construction walks parent pointers over an
/// index-based adjacency table with a visited set; a cycle or a
/// dangling parent reference fails with a configuration error before
/// any snapshot run proceeds.
#[derive(Debug, Clone)]
pub struct SectorCatalog {
    sectors: Vec<SectorDefinition>,
    by_name: HashMap<String, usize>,
}

impl SectorCatalog {
    pub fn new(mut sectors: Vec<SectorDefinition>) -> Result<Self> {
        // Deterministic order regardless of source order
        sectors.sort_by(|a, b| a.name.cmp(&b.name));

        let mut by_name = HashMap::new();
        for (idx, sector) in sectors.iter().enumerate() {
            if by_name.insert(sector.name.clone(), idx).is_some() {
                return Err(EngineError::config(format!(
                    "duplicate sector definition '{}'",
                    sector.name
                )));
            }
        }

        // Resolve parents to indices up front
        let mut parent_idx: Vec<Option<usize>> = Vec::with_capacity(sectors.len());
        for sector in &sectors {
            match &sector.parent {
                None => parent_idx.push(None),
                Some(parent) => match by_name.get(parent) {
                    Some(&idx) => parent_idx.push(Some(idx)),
                    None => {
                        return Err(EngineError::config(format!(
                            "sector '{}' references unknown parent '{}'",
                            sector.name, parent
                        )))
                    }
                },
            }
        }

        // Cycle detection: walk each chain with a visited set
        for start in 0..sectors.len() {
            let mut visited = vec![false; sectors.len()];
            let mut current = start;
            visited[current] = true;
            while let Some(next) = parent_idx[current] {
                if visited[next] {
                    return Err(EngineError::config(format!(
                        "sector hierarchy cycle through '{}'",
                        sectors[next].name
                    )));
                }
                visited[next] = true;
                current = next;
            }
        }

        // Clamp out-of-range priorities rather than dropping the sector
        for sector in &mut sectors {
            if sector.priority_level < PRIORITY_MIN || sector.priority_level > PRIORITY_MAX {
                let clamped = sector.priority_level.clamp(PRIORITY_MIN, PRIORITY_MAX);
                warn!(
                    "sector '{}' priority {} out of range, clamped to {}",
                    sector.name, sector.priority_level, clamped
                );
                sector.priority_level = clamped;
            }
        }

        Ok(SectorCatalog { sectors, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&SectorDefinition> {
        self.by_name.get(name).map(|&idx| &self.sectors[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Sectors participating in expected-share weighting.
    pub fn active(&self) -> impl Iterator<Item = &SectorDefinition> {
        self.sectors.iter().filter(|s| s.active)
    }

    pub fn priority_sum(&self) -> u32 {
        self.active().map(|s| s.priority_level as u32).sum()
    }

    /// The reference baseline category for sector funding ratios.
    pub fn is_reference(&self, name: &str) -> bool {
        self.get(name)
            .map(|s| s.category.eq_ignore_ascii_case("commercial"))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}

// ============================================================================
// ORGANIZATION PRACTICE FACTS
// ============================================================================

/// Disclosed-practice facts for one funder, the inputs to its
/// transparency score. Per-metric transparency rows from collaborators
/// feed these fields; the registry-driven score is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationProfile {
    pub name: String,
    pub public_selection_criteria: bool,
    pub published_success_rates: bool,
    pub provides_feedback: bool,
    /// Average days from application close to decision, when known.
    pub avg_decision_days: Option<u32>,
}

// ============================================================================
// BIAS DIMENSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiasDimension {
    Geographic,
    Gender,
    Sector,
    Language,
}

impl BiasDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiasDimension::Geographic => "geographic",
            BiasDimension::Gender => "gender",
            BiasDimension::Sector => "sector",
            BiasDimension::Language => "language",
        }
    }
}

impl fmt::Display for BiasDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
