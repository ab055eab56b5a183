// ✅ Scoring & Quality Rules - Declarative field checklists
//
// DataQualityScore is a weighted sum over a field-presence checklist;
// weights come from configuration and must sum to 100 before any
// scoring happens. TransparencyScore starts from a base and applies
// fixed, independently configurable deltas, clamped to [0,100] with a
// logged warning rather than silently discarded.

use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::TransparencyTable;
use crate::error::{EngineError, Result};
use crate::model::{FundingRecord, OrganizationProfile};

/// Values that read as "filled in" but carry no information.
const PLACEHOLDERS: &[&str] = &["", "n/a", "na", "tbd", "unknown", "-", "null", "none"];

/// Trimmed, non-placeholder check used by every presence rule.
pub fn is_meaningful(value: &str) -> bool {
    let normalized = value.trim().to_lowercase();
    !PLACEHOLDERS.contains(&normalized.as_str())
}

// ============================================================================
// QUALITY CHECKLIST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QualityField {
    HasAmount,
    HasDeadline,
    HasEligibilityText,
    HasApplicationUrl,
    HasContactEmail,
    HasSector,
    HasCountry,
}

impl QualityField {
    pub fn key(&self) -> &'static str {
        match self {
            QualityField::HasAmount => "has_amount",
            QualityField::HasDeadline => "has_deadline",
            QualityField::HasEligibilityText => "has_eligibility_text",
            QualityField::HasApplicationUrl => "has_application_url",
            QualityField::HasContactEmail => "has_contact_email",
            QualityField::HasSector => "has_sector",
            QualityField::HasCountry => "has_country",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "has_amount" => Some(QualityField::HasAmount),
            "has_deadline" => Some(QualityField::HasDeadline),
            "has_eligibility_text" => Some(QualityField::HasEligibilityText),
            "has_application_url" => Some(QualityField::HasApplicationUrl),
            "has_contact_email" => Some(QualityField::HasContactEmail),
            "has_sector" => Some(QualityField::HasSector),
            "has_country" => Some(QualityField::HasCountry),
            _ => None,
        }
    }

    /// Present and non-empty after normalization.
    pub fn is_present(&self, record: &FundingRecord) -> bool {
        match self {
            QualityField::HasAmount => record.amount_usd.is_some(),
            QualityField::HasDeadline => record.deadline.is_some(),
            QualityField::HasEligibilityText => is_meaningful(&record.eligibility_text),
            QualityField::HasApplicationUrl => is_meaningful(&record.application_url),
            QualityField::HasContactEmail => {
                is_meaningful(&record.contact_email) && record.contact_email.contains('@')
            }
            QualityField::HasSector => is_meaningful(&record.primary_sector),
            QualityField::HasCountry => !record.country_codes.is_empty(),
        }
    }
}

/// Per-record data quality result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityScore {
    pub record_id: String,
    /// 0-100.
    pub score: u8,
    pub missing_fields: Vec<String>,
}

#[derive(Debug)]
pub struct QualityChecklist {
    weights: Vec<(QualityField, u32)>,
}

impl QualityChecklist {
    /// Build from configured weights. An unknown field name or weights
    /// not summing to 100 fail here, at load time, not at scoring time.
    pub fn from_weights(weights: &BTreeMap<String, u32>) -> Result<Self> {
        let mut resolved = Vec::with_capacity(weights.len());
        for (key, &weight) in weights {
            let field = QualityField::from_key(key).ok_or_else(|| {
                EngineError::config(format!("unknown quality checklist field '{}'", key))
            })?;
            resolved.push((field, weight));
        }

        let total: u32 = resolved.iter().map(|(_, w)| w).sum();
        if total != 100 {
            return Err(EngineError::config(format!(
                "quality checklist weights must sum to 100, got {}",
                total
            )));
        }

        Ok(QualityChecklist { weights: resolved })
    }

    pub fn score_record(&self, record: &FundingRecord) -> DataQualityScore {
        let mut total: u32 = 0;
        let mut missing = Vec::new();

        for (field, weight) in &self.weights {
            if field.is_present(record) {
                total += weight;
            } else {
                missing.push(field.key().to_string());
            }
        }

        DataQualityScore {
            record_id: record.id.clone(),
            score: clamp_score(total as i64, &format!("data quality for {}", record.id)),
            missing_fields: missing,
        }
    }

    pub fn score_batch(&self, records: &[FundingRecord]) -> Vec<DataQualityScore> {
        records.iter().map(|r| self.score_record(r)).collect()
    }
}

// ============================================================================
// TRANSPARENCY SCORE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyScore {
    pub organization: String,
    /// 0-100.
    pub score: u8,
}

/// Base score adjusted by disclosed-practice deltas and the decision
/// time tier, then clamped.
pub fn score_organization(org: &OrganizationProfile, table: &TransparencyTable) -> TransparencyScore {
    let mut raw = table.base_score;

    if org.public_selection_criteria {
        raw += table.public_selection_criteria;
    }
    if org.published_success_rates {
        raw += table.published_success_rates;
    }
    if org.provides_feedback {
        raw += table.provides_feedback;
    }

    if let Some(days) = org.avg_decision_days {
        raw += if days <= table.fast_max_days {
            table.decision_fast
        } else if days <= table.medium_max_days {
            table.decision_medium
        } else {
            table.decision_slow
        };
    }

    TransparencyScore {
        organization: org.name.clone(),
        score: clamp_score(raw, &format!("transparency for {}", org.name)),
    }
}

pub fn score_organizations(
    orgs: &[OrganizationProfile],
    table: &TransparencyTable,
) -> Vec<TransparencyScore> {
    orgs.iter().map(|o| score_organization(o, table)).collect()
}

/// Clamp into [0,100] with a logged warning; inputs outside range are
/// never silently dropped.
fn clamp_score(raw: i64, context: &str) -> u8 {
    if (0..=100).contains(&raw) {
        raw as u8
    } else {
        let clamped = raw.clamp(0, 100) as u8;
        warn!("{} score {} outside [0,100], clamped to {}", context, raw, clamped);
        clamped
    }
}

// ============================================================================
// TESTS
// ============================================================================
