//! Per-photo face detection: detect, replace the photo's face rows, and try
//! to put a name to every new face.

use image::DynamicImage;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use super::collection::CollectionManager;
use super::crop::{crop_region, encode_crop};
use super::error::{FaceError, FaceResult, Stage, StageContext};
use super::matcher::FaceMatcher;
use super::policy::{Resolution, ResolutionPolicy};
use super::FaceSettings;
use crate::db::{BoundingBox, Database, DbError, Face, FaceCollection, FaceWithPerson, Photo};
use crate::provider::{DetectedFace, FaceProvider, ProviderError};

/// Person a face was linked to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPerson {
    pub id: i64,
    pub name: Option<String>,
}

/// Candidate identity for a face that was not confidently matched.
/// Only ever returned to the caller, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSuggestion {
    pub person_id: i64,
    pub person_name: Option<String>,
    pub similarity: f64,
}

/// Result for one face produced by a detection run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceReport {
    pub id: i64,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    pub indexed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<ResolvedPerson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<MatchSuggestion>,
}

impl FaceReport {
    fn unresolved(face: &Face) -> Self {
        Self {
            id: face.id,
            bounding_box: face.bounding_box,
            confidence: face.confidence,
            indexed: false,
            person: None,
            suggestion: None,
        }
    }
}

/// What happened to the photo's previous face rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub faces_removed: usize,
    pub provider_removed: usize,
    pub provider_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionOutcome {
    pub photo_id: i64,
    pub faces: Vec<FaceReport>,
    pub cleanup: CleanupReport,
}

/// A photo's bytes, read once, plus the decoded image used for every crop.
pub(crate) struct LoadedImage {
    pub photo_id: i64,
    pub bytes: Vec<u8>,
    pub image: DynamicImage,
}

impl LoadedImage {
    /// Padded JPEG crop of one face
    pub fn crop(&self, bbox: &BoundingBox, padding: f64, quality: u8) -> FaceResult<Vec<u8>> {
        let region = crop_region(self.image.width(), self.image.height(), bbox, padding)
            .map_err(|_| FaceError::MissingDimensions {
                photo_id: self.photo_id,
            })?;
        encode_crop(&self.image, region, quality).map_err(|e| FaceError::ImageUnreadable {
            photo_id: self.photo_id,
            reason: format!("failed to encode face crop: {}", e),
        })
    }
}

/// Why a face could not be added to the gallery
#[derive(Debug, Error)]
pub(crate) enum IndexFailure {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("provider found no face to index")]
    NothingIndexed,

    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Runs detection for single photos.
///
/// Built once per process and shared; every method takes `&self`.
pub struct FaceProcessor {
    db: Arc<Database>,
    provider: Arc<dyn FaceProvider>,
    collections: CollectionManager,
    matcher: FaceMatcher,
    policy: ResolutionPolicy,
    settings: FaceSettings,
}

impl FaceProcessor {
    pub fn new(db: Arc<Database>, provider: Arc<dyn FaceProvider>, settings: FaceSettings) -> Self {
        let collections = CollectionManager::new(db.clone(), provider.clone(), &settings.collection_prefix);
        let matcher = FaceMatcher::new(
            provider.clone(),
            settings.max_candidates,
            settings.suggest_threshold,
        );
        Self {
            db,
            provider,
            collections,
            matcher,
            policy: settings.policy(),
            settings,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn provider(&self) -> &Arc<dyn FaceProvider> {
        &self.provider
    }

    pub fn collections(&self) -> &CollectionManager {
        &self.collections
    }

    pub fn settings(&self) -> &FaceSettings {
        &self.settings
    }

    /// Detect faces in a photo, replacing whatever faces it had before.
    ///
    /// Only a missing photo, an unreadable image, a failed detector call or a
    /// store error abort the run. Provider trouble while cleaning up old faces
    /// or matching new ones leaves the affected face unresolved.
    pub fn detect_faces_for_photo(&self, photo_id: i64) -> FaceResult<DetectionOutcome> {
        self.run_detection(photo_id)
            .map_err(|e| e.for_photo(photo_id))
    }

    /// Stored faces of a photo with their person names
    pub fn faces_for_photo(&self, photo_id: i64) -> FaceResult<Vec<FaceWithPerson>> {
        if self
            .db
            .get_photo(photo_id)
            .photo_stage(photo_id, Stage::LoadPhoto)?
            .is_none()
        {
            return Err(FaceError::PhotoNotFound(photo_id));
        }
        self.db
            .get_faces_with_people_for_photo(photo_id)
            .photo_stage(photo_id, Stage::LoadPhoto)
    }

    fn run_detection(&self, photo_id: i64) -> FaceResult<DetectionOutcome> {
        let (photo, loaded) = self.load_image(photo_id)?;

        let detections = self
            .provider
            .detect_faces(&loaded.bytes)
            .map_err(|source| FaceError::Detection { photo_id, source })?;
        let found = detections.len();
        let detections = self.filter_detections(detections);
        tracing::debug!(
            photo_id,
            found,
            kept = detections.len(),
            provider = self.provider.provider_name(),
            "faces detected"
        );

        let previous = self.db.get_faces_for_photo(photo_id).stage(Stage::Cleanup)?;
        let previously_tagged = previous.iter().filter(|f| f.person_id.is_some()).count();
        let cleanup = self.remove_previous_faces(&photo, &previous)?;

        if detections.is_empty() {
            log_tag_loss(photo_id, previously_tagged, 0);
            return Ok(DetectionOutcome {
                photo_id,
                faces: Vec::new(),
                cleanup,
            });
        }

        let faces = self.persist_detections(photo_id, &detections)?;

        let gallery = self
            .collections
            .find_user_collection(&photo.owner_id)?
            .map(|collection| {
                self.db
                    .collection_has_indexed_faces(collection.id)
                    .map(|has_faces| has_faces.then_some(collection))
            })
            .transpose()
            .stage(Stage::Matching)?
            .flatten();

        let reports: Vec<FaceReport> = match &gallery {
            Some(collection) => faces
                .par_iter()
                .map(|face| self.resolve_face(&loaded, collection, face))
                .collect(),
            None => {
                tracing::debug!(photo_id, owner_id = %photo.owner_id, "no gallery to match against");
                faces.iter().map(FaceReport::unresolved).collect()
            }
        };

        let tagged = reports.iter().filter(|r| r.person.is_some()).count();
        log_tag_loss(photo_id, previously_tagged, tagged);
        tracing::info!(
            photo_id,
            faces = reports.len(),
            tagged,
            suggested = reports.iter().filter(|r| r.suggestion.is_some()).count(),
            "face detection complete"
        );

        Ok(DetectionOutcome {
            photo_id,
            faces: reports,
            cleanup,
        })
    }

    /// Load a photo row and its image. Records the decoded dimensions on the
    /// photo when they were missing or stale.
    pub(crate) fn load_image(&self, photo_id: i64) -> FaceResult<(Photo, LoadedImage)> {
        let photo = self
            .db
            .get_photo(photo_id)
            .photo_stage(photo_id, Stage::LoadPhoto)?
            .ok_or(FaceError::PhotoNotFound(photo_id))?;

        let bytes = std::fs::read(&photo.path).map_err(|e| FaceError::ImageUnreadable {
            photo_id,
            reason: format!("{}: {}", photo.path, e),
        })?;
        let image = image::load_from_memory(&bytes).map_err(|e| FaceError::ImageUnreadable {
            photo_id,
            reason: e.to_string(),
        })?;

        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(FaceError::MissingDimensions { photo_id });
        }
        if photo.width != Some(width) || photo.height != Some(height) {
            self.db
                .update_photo_dimensions(photo_id, width, height)
                .photo_stage(photo_id, Stage::LoadPhoto)?;
        }

        Ok((
            photo,
            LoadedImage {
                photo_id,
                bytes,
                image,
            },
        ))
    }

    /// Add a face crop to the gallery and link the face to `person_id`.
    ///
    /// The face id is the external reference. If the provider accepts the face
    /// but the store update fails, the provider copy is removed again.
    pub(crate) fn index_and_link(
        &self,
        collection: &FaceCollection,
        face_id: i64,
        crop: &[u8],
        person_id: i64,
    ) -> Result<String, IndexFailure> {
        let gallery = &collection.external_collection_id;
        let indexed = self
            .provider
            .index_face(gallery, crop, &face_id.to_string())?
            .ok_or(IndexFailure::NothingIndexed)?;

        match self.db.mark_face_indexed(face_id, &indexed.external_face_id, person_id) {
            Ok(true) => Ok(indexed.external_face_id),
            Ok(false) => {
                self.discard_indexed(gallery, &indexed.external_face_id);
                Err(IndexFailure::Store(DbError::Invalid(format!(
                    "face {} no longer exists",
                    face_id
                ))))
            }
            Err(e) => {
                self.discard_indexed(gallery, &indexed.external_face_id);
                Err(e.into())
            }
        }
    }

    /// Remove a face from a gallery, treating "already gone" as success.
    pub(crate) fn remove_from_gallery(&self, gallery: &str, external_face_id: &str) -> Result<(), ProviderError> {
        match self.provider.remove_face(gallery, external_face_id) {
            Ok(()) => Ok(()),
            Err(ProviderError::NotFound) => {
                tracing::debug!(gallery, external_face_id, "face already absent from gallery");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn discard_indexed(&self, gallery: &str, external_face_id: &str) {
        if let Err(e) = self.remove_from_gallery(gallery, external_face_id) {
            tracing::warn!(gallery, external_face_id, error = %e, "failed to remove unrecorded face from gallery");
        }
    }

    /// Keep confident detections, most confident first, up to the cap.
    fn filter_detections(&self, mut detections: Vec<DetectedFace>) -> Vec<DetectedFace> {
        let min = self.settings.min_detection_confidence;
        detections.retain(|d| d.confidence.is_finite() && d.confidence >= min);
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        detections.truncate(self.settings.max_faces);
        detections
    }

    /// Pull the photo's old faces out of the gallery, then delete them locally
    /// no matter how the provider calls went.
    fn remove_previous_faces(&self, photo: &Photo, previous: &[Face]) -> FaceResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let indexed: Vec<&str> = previous
            .iter()
            .filter_map(|f| f.external_face_id.as_deref())
            .collect();

        if !indexed.is_empty() {
            match self.collections.find_user_collection(&photo.owner_id)? {
                Some(collection) => {
                    let gallery = &collection.external_collection_id;
                    for external_face_id in indexed {
                        match self.remove_from_gallery(gallery, external_face_id) {
                            Ok(()) => report.provider_removed += 1,
                            Err(e) => {
                                report.provider_failures += 1;
                                tracing::warn!(
                                    photo_id = photo.id,
                                    external_face_id,
                                    error = %e,
                                    "failed to remove old face from gallery"
                                );
                            }
                        }
                    }
                }
                None => {
                    report.provider_failures += indexed.len();
                    tracing::warn!(
                        photo_id = photo.id,
                        owner_id = %photo.owner_id,
                        count = indexed.len(),
                        "indexed faces without a collection, skipping gallery cleanup"
                    );
                }
            }
        }

        report.faces_removed = self
            .db
            .delete_faces_for_photo(photo.id)
            .stage(Stage::Cleanup)?;
        Ok(report)
    }

    /// Write every surviving detection in one transaction.
    fn persist_detections(&self, photo_id: i64, detections: &[DetectedFace]) -> FaceResult<Vec<Face>> {
        let rows: Vec<(BoundingBox, f64)> = detections
            .iter()
            .map(|detection| {
                let raw = detection.bounding_box;
                (
                    BoundingBox::clamped(raw.left, raw.top, raw.width, raw.height),
                    detection.confidence,
                )
            })
            .collect();
        let ids = self
            .db
            .store_faces(photo_id, &rows)
            .stage(Stage::Persist)?;

        Ok(ids
            .into_iter()
            .zip(rows)
            .map(|(id, (bounding_box, confidence))| Face {
                id,
                photo_id,
                person_id: None,
                bounding_box,
                confidence,
                external_face_id: None,
                indexed: false,
            })
            .collect())
    }

    /// Crop, search and decide for one new face. Never fails; every problem
    /// leaves the face unresolved.
    fn resolve_face(&self, loaded: &LoadedImage, collection: &FaceCollection, face: &Face) -> FaceReport {
        let mut report = FaceReport::unresolved(face);

        let crop = match loaded.crop(&face.bounding_box, self.settings.crop_padding, self.settings.crop_quality) {
            Ok(crop) => crop,
            Err(e) => {
                tracing::warn!(face_id = face.id, error = %e, "failed to crop face");
                return report;
            }
        };

        let best = match self.matcher.best_match(&collection.external_collection_id, &crop) {
            Ok(Some(best)) => best,
            Ok(None) => return report,
            Err(e) => {
                tracing::warn!(face_id = face.id, error = %e, "face search failed");
                return report;
            }
        };

        let person = match self
            .db
            .find_person_by_external_face(collection.id, &best.external_face_id)
        {
            Ok(Some(person)) => person,
            Ok(None) => {
                tracing::debug!(
                    face_id = face.id,
                    external_face_id = %best.external_face_id,
                    "best match has no local owner"
                );
                return report;
            }
            Err(e) => {
                tracing::warn!(face_id = face.id, error = %e, "failed to resolve matched face");
                return report;
            }
        };

        match self.policy.resolve(best.similarity) {
            Resolution::Ignore => {}
            Resolution::Suggest => {
                report.suggestion = Some(MatchSuggestion {
                    person_id: person.id,
                    person_name: person.name,
                    similarity: best.similarity,
                });
            }
            Resolution::AutoTag => match self.index_and_link(collection, face.id, &crop, person.id) {
                Ok(_) => {
                    tracing::debug!(face_id = face.id, person_id = person.id, similarity = best.similarity, "face auto-tagged");
                    report.indexed = true;
                    report.person = Some(ResolvedPerson {
                        id: person.id,
                        name: person.name,
                    });
                }
                Err(e) => {
                    tracing::warn!(face_id = face.id, person_id = person.id, error = %e, "auto-tag indexing failed");
                }
            },
        }

        report
    }
}

fn log_tag_loss(photo_id: i64, before: usize, after: usize) {
    if after < before {
        tracing::info!(photo_id, before, after, "re-detection left fewer tagged faces");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::provider::{FaceMatch, IndexedFace};
    use std::sync::Mutex;

    /// Detector that reports a fixed list and refuses everything else.
    struct DetectOnly {
        faces: Vec<DetectedFace>,
        removed: Mutex<Vec<String>>,
    }

    impl FaceProvider for DetectOnly {
        fn detect_faces(&self, _image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
            Ok(self.faces.clone())
        }
        fn create_collection(&self, _c: &str) -> Result<(), ProviderError> {
            Ok(())
        }
        fn delete_collection(&self, _c: &str) -> Result<(), ProviderError> {
            Ok(())
        }
        fn index_face(&self, _c: &str, _i: &[u8], _r: &str) -> Result<Option<IndexedFace>, ProviderError> {
            Err(ProviderError::Timeout)
        }
        fn search_faces_by_image(&self, _c: &str, _i: &[u8], _m: usize, _s: f64) -> Result<Vec<FaceMatch>, ProviderError> {
            Err(ProviderError::Timeout)
        }
        fn remove_face(&self, _c: &str, face: &str) -> Result<(), ProviderError> {
            self.removed.lock().unwrap().push(face.to_string());
            Err(ProviderError::NotFound)
        }
        fn provider_name(&self) -> &'static str {
            "detect-only"
        }
    }

    fn detection(confidence: f64) -> DetectedFace {
        DetectedFace {
            bounding_box: BoundingBox {
                left: 0.1,
                top: 0.1,
                width: 0.3,
                height: 0.3,
            },
            confidence,
        }
    }

    fn processor(faces: Vec<DetectedFace>) -> FaceProcessor {
        let provider = DetectOnly {
            faces,
            removed: Mutex::new(Vec::new()),
        };
        FaceProcessor::new(Arc::new(test_db()), Arc::new(provider), FaceSettings::default())
    }

    #[test]
    fn test_filter_keeps_confident_faces_best_first() {
        let p = processor(Vec::new());
        let kept = p.filter_detections(vec![detection(91.0), detection(89.9), detection(99.0), detection(90.0)]);
        let confidences: Vec<f64> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![99.0, 91.0, 90.0]);
    }

    #[test]
    fn test_filter_caps_face_count() {
        let p = processor(Vec::new());
        let kept = p.filter_detections((0..15).map(|i| detection(90.0 + i as f64 * 0.5)).collect());
        assert_eq!(kept.len(), 10);
        assert_eq!(kept[0].confidence, 97.0);
    }

    #[test]
    fn test_filter_drops_nan_confidence() {
        let p = processor(Vec::new());
        assert!(p.filter_detections(vec![detection(f64::NAN)]).is_empty());
    }

    #[test]
    fn test_missing_photo_is_fatal() {
        let p = processor(vec![detection(95.0)]);
        assert!(matches!(
            p.detect_faces_for_photo(42),
            Err(FaceError::PhotoNotFound(42))
        ));
        assert!(matches!(p.faces_for_photo(42), Err(FaceError::PhotoNotFound(42))));
    }

    #[test]
    fn test_unreadable_image_is_fatal() {
        let p = processor(vec![detection(95.0)]);
        let photo_id = p
            .database()
            .insert_photo("owner", "/nonexistent/picface/photo.jpg", None, None)
            .unwrap();
        assert!(matches!(
            p.detect_faces_for_photo(photo_id),
            Err(FaceError::ImageUnreadable { .. })
        ));
    }

    #[test]
    fn test_report_omits_empty_person_and_suggestion() {
        let face = Face {
            id: 7,
            photo_id: 1,
            person_id: None,
            bounding_box: detection(95.0).bounding_box,
            confidence: 95.0,
            external_face_id: None,
            indexed: false,
        };
        let json = serde_json::to_value(FaceReport::unresolved(&face)).unwrap();
        assert!(json.get("person").is_none());
        assert!(json.get("suggestion").is_none());
        assert_eq!(json["id"], 7);
    }
}
