//! Contract for the external face recognition provider.
//!
//! The provider owns the face galleries ("collections"): it detects faces,
//! stores indexed face templates under opaque ids, and answers similarity
//! searches. Everything here is network I/O and may fail or time out.

pub mod http;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::BoundingBox;

pub use http::HttpFaceProvider;

/// A face found by the provider's detector. The box is raw provider output
/// and may sit slightly outside `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bounding_box: BoundingBox,
    /// Detection confidence, 0-100
    pub confidence: f64,
}

/// A face template stored in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFace {
    pub external_face_id: String,
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub external_face_id: String,
    /// Similarity, 0-100
    pub similarity: f64,
    /// The reference the face was indexed under, if the provider echoes it.
    #[serde(default)]
    pub external_ref: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("resource not found")]
    NotFound,

    #[error("resource already exists")]
    AlreadyExists,

    #[error("provider request timed out")]
    Timeout,

    #[error("provider returned HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound)
    }
}

/// Face recognition provider.
///
/// One instance is shared by every request, so implementations must be safe
/// for concurrent use.
pub trait FaceProvider: Send + Sync {
    /// Detect faces in encoded image bytes.
    fn detect_faces(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError>;

    /// Create a collection. Fails with `AlreadyExists` if it is already there.
    fn create_collection(&self, collection_id: &str) -> Result<(), ProviderError>;

    /// Delete a collection. Fails with `NotFound` if it does not exist.
    fn delete_collection(&self, collection_id: &str) -> Result<(), ProviderError>;

    /// Index the (single) face in `image` under `external_ref`.
    ///
    /// `Ok(None)` means the provider found nothing it could index.
    fn index_face(
        &self,
        collection_id: &str,
        image: &[u8],
        external_ref: &str,
    ) -> Result<Option<IndexedFace>, ProviderError>;

    /// Search a collection for faces similar to the one in `image`.
    fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: &[u8],
        max_results: usize,
        min_similarity: f64,
    ) -> Result<Vec<FaceMatch>, ProviderError>;

    /// Remove an indexed face. Fails with `NotFound` if it is already gone.
    fn remove_face(&self, collection_id: &str, external_face_id: &str) -> Result<(), ProviderError>;

    /// Provider name for logs
    fn provider_name(&self) -> &'static str;
}
