//! People in an owner's gallery and the manual side of tagging.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{FaceError, FaceResult, Stage, StageContext};
use super::processor::FaceProcessor;
use crate::db::{Face, FaceCollection, Person};

/// Who a face should be tagged as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagTarget {
    /// An existing person
    Person(i64),
    /// A person by name, created in the owner's gallery when missing
    Name(String),
}

/// Outcome of deleting a person
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonDeletion {
    pub person_id: i64,
    pub faces_released: usize,
    pub provider_removed: usize,
    pub provider_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagOutcome {
    pub face: Face,
    pub person: Person,
    pub created_person: bool,
}

pub struct PersonManager {
    processor: Arc<FaceProcessor>,
}

impl PersonManager {
    pub fn new(processor: Arc<FaceProcessor>) -> Self {
        Self { processor }
    }

    pub fn create_person(&self, owner_id: &str, name: Option<&str>) -> FaceResult<Person> {
        let name = name.map(normalize_name).transpose()?;
        let collection = self.processor.collections().ensure_user_collection(owner_id)?;
        let db = self.processor.database();
        let person_id = db
            .create_person(collection.id, name.as_deref())
            .stage(Stage::People)?;
        tracing::info!(owner_id, person_id, "person created");
        db.get_person(person_id)
            .stage(Stage::People)?
            .ok_or(FaceError::PersonNotFound(person_id))
    }

    pub fn rename_person(&self, person_id: i64, name: &str) -> FaceResult<Person> {
        let name = normalize_name(name)?;
        let db = self.processor.database();
        if !db.rename_person(person_id, &name).stage(Stage::People)? {
            return Err(FaceError::PersonNotFound(person_id));
        }
        db.get_person(person_id)
            .stage(Stage::People)?
            .ok_or(FaceError::PersonNotFound(person_id))
    }

    /// People in the owner's gallery, empty when the owner has none yet.
    pub fn list_people(&self, owner_id: &str) -> FaceResult<Vec<Person>> {
        match self.processor.collections().find_user_collection(owner_id)? {
            Some(collection) => self
                .processor
                .database()
                .get_people_for_collection(collection.id)
                .stage(Stage::People),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a person, keeping their faces.
    ///
    /// Every indexed face is pulled from the gallery on a best-effort basis;
    /// locally the faces lose their person, index flag and external id.
    pub fn delete_person(&self, person_id: i64) -> FaceResult<PersonDeletion> {
        let db = self.processor.database();
        let person = db
            .get_person(person_id)
            .stage(Stage::People)?
            .ok_or(FaceError::PersonNotFound(person_id))?;
        let faces = db.get_faces_for_person(person_id).stage(Stage::People)?;
        let collection = db.get_collection(person.collection_id).stage(Stage::People)?;

        let mut provider_removed = 0;
        let mut provider_failures = 0;
        for face in &faces {
            let Some(external_face_id) = face.external_face_id.as_deref() else {
                continue;
            };
            let Some(collection) = &collection else {
                provider_failures += 1;
                continue;
            };
            match self
                .processor
                .remove_from_gallery(&collection.external_collection_id, external_face_id)
            {
                Ok(()) => provider_removed += 1,
                Err(e) => {
                    provider_failures += 1;
                    tracing::warn!(
                        person_id,
                        face_id = face.id,
                        error = %e,
                        "failed to remove face from gallery"
                    );
                }
            }
        }

        let faces_released = db
            .delete_person_and_release_faces(person_id)
            .stage(Stage::People)?;
        tracing::info!(person_id, faces_released, provider_removed, provider_failures, "person deleted");

        Ok(PersonDeletion {
            person_id,
            faces_released,
            provider_removed,
            provider_failures,
        })
    }

    /// Tag a face as a person and add it to the gallery.
    ///
    /// The face keeps its new person even when indexing fails; the error is
    /// returned so the caller can retry.
    pub fn tag_face(&self, face_id: i64, target: TagTarget) -> FaceResult<TagOutcome> {
        let db = self.processor.database();
        let face = db
            .get_face(face_id)
            .stage(Stage::Tagging)?
            .ok_or(FaceError::FaceNotFound(face_id))?;
        let (photo, loaded) = self.processor.load_image(face.photo_id)?;
        let collection = self
            .processor
            .collections()
            .ensure_user_collection(&photo.owner_id)?;

        let (person, created_person) = self.resolve_target(&collection, face_id, target)?;

        if face.indexed {
            self.release_from_gallery(&collection, &face);
            db.clear_face_identity(face_id).stage(Stage::Tagging)?;
        }
        db.assign_face_to_person(face_id, person.id)
            .stage(Stage::Tagging)?;

        let settings = self.processor.settings();
        let crop = loaded.crop(&face.bounding_box, settings.crop_padding, settings.crop_quality)?;
        if let Err(e) = self
            .processor
            .index_and_link(&collection, face_id, &crop, person.id)
        {
            tracing::warn!(face_id, person_id = person.id, error = %e, "tagged face could not be indexed");
            return Err(FaceError::IndexFailed {
                face_id,
                reason: e.to_string(),
            });
        }
        tracing::info!(face_id, person_id = person.id, "face tagged");

        let face = db
            .get_face(face_id)
            .stage(Stage::Tagging)?
            .ok_or(FaceError::FaceNotFound(face_id))?;
        let person = db
            .get_person(person.id)
            .stage(Stage::Tagging)?
            .ok_or(FaceError::PersonNotFound(person.id))?;
        Ok(TagOutcome {
            face,
            person,
            created_person,
        })
    }

    /// Remove a face's tag and pull it out of the gallery.
    pub fn untag_face(&self, face_id: i64) -> FaceResult<Face> {
        let db = self.processor.database();
        let face = db
            .get_face(face_id)
            .stage(Stage::Tagging)?
            .ok_or(FaceError::FaceNotFound(face_id))?;

        if face.indexed {
            let photo = db
                .get_photo(face.photo_id)
                .stage(Stage::Tagging)?
                .ok_or(FaceError::PhotoNotFound(face.photo_id))?;
            match self
                .processor
                .collections()
                .find_user_collection(&photo.owner_id)?
            {
                Some(collection) => self.release_from_gallery(&collection, &face),
                None => tracing::warn!(face_id, "indexed face without a collection"),
            }
        }

        db.clear_face_identity(face_id).stage(Stage::Tagging)?;
        tracing::info!(face_id, "face untagged");
        db.get_face(face_id)
            .stage(Stage::Tagging)?
            .ok_or(FaceError::FaceNotFound(face_id))
    }

    fn resolve_target(
        &self,
        collection: &FaceCollection,
        face_id: i64,
        target: TagTarget,
    ) -> FaceResult<(Person, bool)> {
        let db = self.processor.database();
        match target {
            TagTarget::Person(person_id) => {
                let person = db
                    .get_person(person_id)
                    .stage(Stage::Tagging)?
                    .ok_or(FaceError::PersonNotFound(person_id))?;
                if person.collection_id != collection.id {
                    return Err(FaceError::PersonMismatch { face_id, person_id });
                }
                Ok((person, false))
            }
            TagTarget::Name(name) => {
                let name = normalize_name(&name)?;
                if let Some(person) = db
                    .find_person_by_name(collection.id, &name)
                    .stage(Stage::Tagging)?
                {
                    return Ok((person, false));
                }
                let person_id = db
                    .create_person(collection.id, Some(&name))
                    .stage(Stage::Tagging)?;
                let person = db
                    .get_person(person_id)
                    .stage(Stage::Tagging)?
                    .ok_or(FaceError::PersonNotFound(person_id))?;
                Ok((person, true))
            }
        }
    }

    fn release_from_gallery(&self, collection: &FaceCollection, face: &Face) {
        let Some(external_face_id) = face.external_face_id.as_deref() else {
            return;
        };
        if let Err(e) = self
            .processor
            .remove_from_gallery(&collection.external_collection_id, external_face_id)
        {
            tracing::warn!(face_id = face.id, error = %e, "failed to remove face from gallery");
        }
    }
}

fn normalize_name(name: &str) -> FaceResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FaceError::InvalidInput("person name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Alice ").unwrap(), "Alice");
        assert!(matches!(normalize_name("   "), Err(FaceError::InvalidInput(_))));
    }

    #[test]
    fn test_tag_target_serde() {
        let target: TagTarget = serde_json::from_str(r#"{"name":"Alice"}"#).unwrap();
        assert_eq!(target, TagTarget::Name("Alice".to_string()));
        let target: TagTarget = serde_json::from_str(r#"{"person":3}"#).unwrap();
        assert_eq!(target, TagTarget::Person(3));
    }
}
