//! collabflow-core - Core library for collabflow.
//!
//! This crate provides the data model, error types, configuration and
//! collaborator traits shared by the collabflow orchestration layer.
//!
//! # Example
//!
//! ```ignore
//! use collabflow_core::{CollabConfig, ConfidenceScores, ExtractedEntities};
//!
//! let config = CollabConfig::from_file("collabflow.toml")?;
//!
//! let entities = ExtractedEntities::new(ConfidenceScores::uniform(0.9)?)
//!     .with_startup("Acme Robotics")
//!     .with_partner("Globex");
//! assert!(entities.validate().is_empty());
//! ```

pub mod config;
pub mod error;
pub mod storage;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::{
    CollabConfig, HealthConfig, OrchestrationConfig, QualityConfig, SelectionMode, StrategyKind,
};
pub use error::{CollabError, CollabResult, ErrorCode, ProviderError};
pub use storage::JsonDocument;
pub use traits::{CostTracker, ExtractionProvider, ProviderMap};
pub use types::{CompanyContext, ConfidenceScores, ExtractedEntities, FieldWeights};
