use std::sync::Arc;

use crate::provider::{FaceMatch, FaceProvider, ProviderError};

/// Similarity search against an owner's gallery.
pub struct FaceMatcher {
    provider: Arc<dyn FaceProvider>,
    max_candidates: usize,
    min_similarity: f64,
}

impl FaceMatcher {
    pub fn new(provider: Arc<dyn FaceProvider>, max_candidates: usize, min_similarity: f64) -> Self {
        Self {
            provider,
            max_candidates,
            min_similarity,
        }
    }

    /// Candidates at or above the minimum similarity, best first.
    ///
    /// A missing collection is an empty gallery, not an error.
    pub fn search(&self, collection_id: &str, face_image: &[u8]) -> Result<Vec<FaceMatch>, ProviderError> {
        let mut matches = match self.provider.search_faces_by_image(
            collection_id,
            face_image,
            self.max_candidates,
            self.min_similarity,
        ) {
            Ok(matches) => matches,
            Err(ProviderError::NotFound) => {
                tracing::debug!(collection = collection_id, "collection missing at provider, no matches");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        matches.retain(|m| m.similarity >= self.min_similarity);
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(self.max_candidates);
        Ok(matches)
    }

    /// The single best candidate, if any.
    pub fn best_match(&self, collection_id: &str, face_image: &[u8]) -> Result<Option<FaceMatch>, ProviderError> {
        Ok(self.search(collection_id, face_image)?.into_iter().next())
    }
}
