// Equity & Integrity Analytics Engine - Core Library
// Batch pipeline deriving equity metrics, transparency and data
// quality scores, and statistical bias-deviation flags from funding
// opportunity records.

pub mod error;
pub mod model;
pub mod config;
pub mod store;        // Record Store Adapter (read-only view + ingestion)
pub mod registry;     // Metric Definitions Registry
pub mod aggregation;  // Grouping and Welford reduction
pub mod equity;       // Expected-vs-actual evaluation, bias events
pub mod scoring;      // Data quality and transparency scores
pub mod snapshot;     // Staged atomic snapshot publication
pub mod corrections;  // Append-only correction log
pub mod pipeline;     // Per-period orchestration

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use model::{
    BiasDimension, CountryIndex, CountryProfile, FundingRecord, OrganizationProfile,
    PeriodWindow, ReportingPeriod, SectorCatalog, SectorDefinition, VerificationStatus,
};
pub use config::{EngineConfig, TransparencyTable};
pub use store::{RecordStore, SqliteStore};
pub use registry::{BaselineSource, MetricDefinition, MetricDimension, MetricInputs, MetricRegistry};
pub use aggregation::{
    aggregate_by_country, aggregate_by_gender, aggregate_by_region, aggregate_by_sector,
    Accumulator, Dimension, DimensionAggregate, UNCLASSIFIED,
};
pub use equity::{
    BiasDetectionEvent, EquityEvaluator, GenderMetricSnapshot, GeographicGapSnapshot,
    SectorMetricSnapshot,
};
pub use scoring::{
    score_organization, score_organizations, DataQualityScore, QualityChecklist, QualityField,
    TransparencyScore,
};
pub use snapshot::{content_hash, setup_snapshot_tables, PublishSummary, SnapshotWriter};
pub use corrections::{submit_correction, CorrectionEvent, CorrectionOutcome};
pub use pipeline::{EquityPipeline, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
