//! Face identity resolution for a photo library.
//!
//! Detects faces in a stored photo, correlates them against the owner's
//! gallery held by an external recognition provider, and links, suggests, or
//! leaves each face unresolved. The local SQLite record is kept consistent
//! with the provider across re-detections, tagging, and person deletion.

pub mod config;
pub mod db;
pub mod faces;
pub mod logging;
pub mod provider;
pub mod tasks;

pub use config::Config;
pub use db::{BoundingBox, Database, DbError, Face, FaceCollection, Person, Photo};
pub use faces::{
    BatchSummary, CollectionManager, DetectionOutcome, FaceError, FaceProcessor, FaceReport,
    FaceSettings, MatchSuggestion, PersonManager, Resolution, ResolutionPolicy, TagOutcome,
    TagTarget,
};
pub use provider::{FaceProvider, HttpFaceProvider, ProviderError};
