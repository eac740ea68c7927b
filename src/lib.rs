//! Biomarker Flux - Statistics and range-classification engine for continuous
//! biomarker sensor data
//!
//! Flux turns raw sensor records into the numbers behind an AGP-style
//! dashboard through a deterministic pipeline: reading normalization →
//! reference-range resolution → statistics → payload encoding.
//!
//! ## Modules
//!
//! - **Individual pipeline**: One user's statistics and hourly percentile profile
//! - **Population**: Time-in-range averages across a cohort, grouped by condition

pub mod attributes;
pub mod config;
pub mod encoder;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod population;
pub mod profile;
pub mod ranges;
pub mod schema;
pub mod statistics;
pub mod store;
pub mod types;

pub use config::{EngineConfig, PercentileFallback};
pub use error::ComputeError;
pub use pipeline::{records_to_agp, BiomarkerProcessor};
pub use population::{CohortFilter, PopulationAggregator, PopulationReport};
pub use ranges::{RangeConfigLookup, RangeResolver, ResolvedRanges};
pub use statistics::StatisticsEngine;
pub use store::{AccessPolicy, Identity, MemoryStore, RecordStore, Role};
pub use types::{Biomarker, BiomarkerReport, BiomarkerStatistics, Condition, RangeThresholds};

// Schema exports
pub use schema::{RawSensorRecord, UserRecord};

/// Flux version embedded in all payloads
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for payloads
pub const PRODUCER_NAME: &str = "biomarker-flux";
