use std::sync::Arc;

use super::error::{FaceError, FaceResult, Stage, StageContext};
use crate::db::{Database, DbError, FaceCollection};
use crate::provider::{FaceProvider, ProviderError};

/// Owns the one-gallery-per-owner mapping between the store and the provider.
pub struct CollectionManager {
    db: Arc<Database>,
    provider: Arc<dyn FaceProvider>,
    prefix: String,
}

impl CollectionManager {
    pub fn new(db: Arc<Database>, provider: Arc<dyn FaceProvider>, prefix: &str) -> Self {
        Self {
            db,
            provider,
            prefix: prefix.to_string(),
        }
    }

    /// Deterministic external id for an owner.
    ///
    /// The owner id is escaped so the result only uses `[A-Za-z0-9_.-]`:
    /// `_` becomes `__` and every byte of any other character becomes `_XX`
    /// (uppercase hex). The escaping is reversible, so distinct owners never
    /// share a gallery.
    pub fn external_collection_id(&self, owner_id: &str) -> String {
        format!("{}{}", self.prefix, escape_owner(owner_id))
    }

    pub fn find_user_collection(&self, owner_id: &str) -> FaceResult<Option<FaceCollection>> {
        self.db.get_collection_for_owner(owner_id).stage(Stage::Collection)
    }

    /// Get the owner's collection, creating it at the provider and locally on
    /// first use.
    ///
    /// An existing provider collection is adopted, since an earlier attempt
    /// may have stopped between the provider call and the insert. A concurrent
    /// local creation surfaces as [`FaceError::CollectionConflict`].
    pub fn ensure_user_collection(&self, owner_id: &str) -> FaceResult<FaceCollection> {
        if let Some(collection) = self.find_user_collection(owner_id)? {
            return Ok(collection);
        }

        let external_id = self.external_collection_id(owner_id);
        match self.provider.create_collection(&external_id) {
            Ok(()) => {
                tracing::info!(owner_id, collection = %external_id, "created face collection");
            }
            Err(ProviderError::AlreadyExists) => {
                tracing::info!(owner_id, collection = %external_id, "adopting existing face collection");
            }
            Err(source) => {
                return Err(FaceError::CollectionCreate {
                    owner_id: owner_id.to_string(),
                    source,
                });
            }
        }

        match self.db.insert_collection(owner_id, &external_id) {
            Ok(collection) => Ok(collection),
            Err(DbError::Conflict(_)) => {
                tracing::warn!(owner_id, "face collection created concurrently");
                Err(FaceError::CollectionConflict {
                    owner_id: owner_id.to_string(),
                })
            }
            Err(source) => Err(FaceError::Store {
                stage: Stage::Collection,
                source,
            }),
        }
    }

    /// Drop the owner's gallery at the provider and forget it locally.
    ///
    /// People in the collection are deleted; their faces stay, unlinked and
    /// unindexed. Returns false when the owner had no collection.
    pub fn reset_user_collection(&self, owner_id: &str) -> FaceResult<bool> {
        let Some(collection) = self.find_user_collection(owner_id)? else {
            return Ok(false);
        };

        match self.provider.delete_collection(&collection.external_collection_id) {
            Ok(()) | Err(ProviderError::NotFound) => {}
            Err(source) => {
                return Err(FaceError::CollectionDelete {
                    owner_id: owner_id.to_string(),
                    source,
                });
            }
        }

        let released = self.db.delete_collection(collection.id).stage(Stage::Collection)?;
        tracing::info!(
            owner_id,
            collection = %collection.external_collection_id,
            released,
            "face collection reset"
        );
        Ok(true)
    }
}

fn escape_owner(owner_id: &str) -> String {
    let mut escaped = String::with_capacity(owner_id.len());
    for byte in owner_id.bytes() {
        match byte {
            b'_' => escaped.push_str("__"),
            b if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' => escaped.push(b as char),
            b => escaped.push_str(&format!("_{:02X}", b)),
        }
    }
    escaped
}
