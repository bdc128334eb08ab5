use std::fmt;
use thiserror::Error;

use crate::db::{DbError, DbResult};
use crate::provider::ProviderError;

/// Where in the pipeline a store error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadPhoto,
    Cleanup,
    Persist,
    Matching,
    Collection,
    People,
    Tagging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LoadPhoto => "load photo",
            Stage::Cleanup => "cleanup",
            Stage::Persist => "persist faces",
            Stage::Matching => "matching",
            Stage::Collection => "collection",
            Stage::People => "people",
            Stage::Tagging => "tagging",
        };
        f.write_str(name)
    }
}

/// Errors that abort a face operation.
///
/// Per-face provider failures during cleanup, matching and indexing are not
/// represented here; they degrade the face to unresolved and are logged.
#[derive(Debug, Error)]
pub enum FaceError {
    #[error("photo {0} not found")]
    PhotoNotFound(i64),

    #[error("image for photo {photo_id} is unreadable: {reason}")]
    ImageUnreadable { photo_id: i64, reason: String },

    #[error("image dimensions of photo {photo_id} are zero or unknown")]
    MissingDimensions { photo_id: i64 },

    #[error("face detection failed for photo {photo_id}: {source}")]
    Detection {
        photo_id: i64,
        source: ProviderError,
    },

    #[error("face collection for owner {owner_id} was created concurrently, retry")]
    CollectionConflict { owner_id: String },

    #[error("failed to create face collection for owner {owner_id}: {source}")]
    CollectionCreate {
        owner_id: String,
        source: ProviderError,
    },

    #[error("failed to delete face collection for owner {owner_id}: {source}")]
    CollectionDelete {
        owner_id: String,
        source: ProviderError,
    },

    #[error("person {0} not found")]
    PersonNotFound(i64),

    #[error("face {0} not found")]
    FaceNotFound(i64),

    #[error("person {person_id} is not in the gallery of face {face_id}")]
    PersonMismatch { face_id: i64, person_id: i64 },

    #[error("face {face_id} could not be indexed: {reason}")]
    IndexFailed { face_id: i64, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store error during {stage}: {source}")]
    Store { stage: Stage, source: DbError },

    #[error("store error during {stage} for photo {photo_id}: {source}")]
    PhotoStore {
        photo_id: i64,
        stage: Stage,
        source: DbError,
    },
}

impl FaceError {
    /// True when repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FaceError::CollectionConflict { .. }
                | FaceError::IndexFailed { .. }
                | FaceError::Detection {
                    source: ProviderError::Timeout,
                    ..
                }
        )
    }
}

impl FaceError {
    /// Attach the photo being processed to a store error.
    pub(crate) fn for_photo(self, photo_id: i64) -> Self {
        match self {
            FaceError::Store { stage, source } => FaceError::PhotoStore {
                photo_id,
                stage,
                source,
            },
            other => other,
        }
    }
}

pub type FaceResult<T> = std::result::Result<T, FaceError>;

/// Attach the pipeline stage to a store error.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> FaceResult<T>;

    fn photo_stage(self, photo_id: i64, stage: Stage) -> FaceResult<T>;
}

impl<T> StageContext<T> for DbResult<T> {
    fn stage(self, stage: Stage) -> FaceResult<T> {
        self.map_err(|source| FaceError::Store { stage, source })
    }

    fn photo_stage(self, photo_id: i64, stage: Stage) -> FaceResult<T> {
        self.map_err(|source| FaceError::PhotoStore {
            photo_id,
            stage,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FaceError::CollectionConflict { owner_id: "o".into() }.is_retryable());
        assert!(FaceError::Detection { photo_id: 1, source: ProviderError::Timeout }.is_retryable());
        assert!(!FaceError::Detection { photo_id: 1, source: ProviderError::NotFound }.is_retryable());
        assert!(!FaceError::PhotoNotFound(1).is_retryable());
    }

    #[test]
    fn test_store_error_names_stage() {
        let err: FaceResult<()> = Err(DbError::Invalid("bad box".into())).stage(Stage::Persist);
        let message = err.unwrap_err().to_string();
        assert!(message.contains("persist faces"), "{}", message);
        assert!(message.contains("bad box"), "{}", message);
    }

    #[test]
    fn test_for_photo_names_photo_and_stage() {
        let err = FaceError::Store {
            stage: Stage::Cleanup,
            source: DbError::Invalid("locked".into()),
        }
        .for_photo(12);
        assert!(matches!(
            err,
            FaceError::PhotoStore { photo_id: 12, stage: Stage::Cleanup, .. }
        ));
        assert_eq!(
            err.to_string(),
            "store error during cleanup for photo 12: invalid value: locked"
        );
        assert!(matches!(
            FaceError::PersonNotFound(3).for_photo(12),
            FaceError::PersonNotFound(3)
        ));
    }
}
