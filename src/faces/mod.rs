//! Face identity resolution: detect, crop, match, decide, and keep the local
//! record in step with the provider's galleries.

pub mod batch;
pub mod collection;
pub mod crop;
pub mod error;
pub mod matcher;
pub mod people;
pub mod policy;
pub mod processor;

pub use batch::{redetect_photos, BatchSummary};
pub use collection::CollectionManager;
pub use crop::{crop_region, CropRegion, UnknownDimensions};
pub use error::{FaceError, FaceResult, Stage};
pub use matcher::FaceMatcher;
pub use people::{PersonDeletion, PersonManager, TagOutcome, TagTarget};
pub use policy::{Resolution, ResolutionPolicy};
pub use processor::{
    CleanupReport, DetectionOutcome, FaceProcessor, FaceReport, MatchSuggestion, ResolvedPerson,
};

/// Runtime knobs shared by the face services.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceSettings {
    /// Minimum detector confidence (0-100) for a face to be kept
    pub min_detection_confidence: f64,
    /// Maximum faces kept per photo
    pub max_faces: usize,
    /// Padding added around a face before cropping, as a fraction of its size
    pub crop_padding: f64,
    /// JPEG quality for crops
    pub crop_quality: u8,
    pub suggest_threshold: f64,
    pub autotag_threshold: f64,
    /// Candidates requested per similarity search
    pub max_candidates: usize,
    /// Prefix for external collection ids
    pub collection_prefix: String,
}

impl FaceSettings {
    pub fn policy(&self) -> ResolutionPolicy {
        ResolutionPolicy::new(self.suggest_threshold, self.autotag_threshold)
    }
}

impl Default for FaceSettings {
    fn default() -> Self {
        Self {
            min_detection_confidence: 90.0,
            max_faces: 10,
            crop_padding: crop::DEFAULT_PADDING,
            crop_quality: 90,
            suggest_threshold: 80.0,
            autotag_threshold: 90.0,
            max_candidates: 5,
            collection_prefix: "picface-user-".to_string(),
        }
    }
}
