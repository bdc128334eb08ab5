//! Shared fixtures: an in-process scripted provider, an in-memory store and
//! generated images on disk.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use picface::provider::{DetectedFace, FaceMatch, FaceProvider, IndexedFace, ProviderError};
use picface::{BoundingBox, Database, FaceProcessor, FaceSettings, PersonManager};
use tempfile::TempDir;

/// Scripted provider state. Tests set the `*_error` fields and `similarity`
/// to steer the next calls; the counters record what happened.
#[derive(Default)]
pub struct FakeState {
    pub detections: Vec<DetectedFace>,
    pub detect_error: Option<ProviderError>,
    pub create_error: Option<ProviderError>,
    pub search_error: Option<ProviderError>,
    pub index_error: Option<ProviderError>,
    pub index_returns_none: bool,
    /// External refs whose `index_face` call fails with a 500
    pub index_fail_refs: HashSet<String>,
    pub remove_error: Option<ProviderError>,
    /// Similarity reported for every face in the searched gallery
    pub similarity: f64,
    /// Hits appended to every search, whatever the gallery holds
    pub extra_hits: Vec<FaceMatch>,

    pub collections: HashSet<String>,
    /// collection id -> (external face id, external ref)
    pub gallery: HashMap<String, Vec<(String, String)>>,
    next_face: u64,

    pub detect_calls: usize,
    pub search_calls: usize,
    pub create_calls: usize,
    pub indexed_refs: Vec<String>,
    pub removed: Vec<String>,

    /// Set this flag once `detect_calls` reaches the count
    pub cancel_after: Option<(usize, Arc<AtomicBool>)>,
    /// Insert a local collection row for the owner while the provider call is
    /// in flight, as a concurrent request would
    pub race_collection_insert: Option<(Arc<Database>, String)>,
}

#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn gallery_size(&self, collection_id: &str) -> usize {
        self.state()
            .gallery
            .get(collection_id)
            .map(|faces| faces.len())
            .unwrap_or(0)
    }
}

impl FaceProvider for FakeProvider {
    fn detect_faces(&self, _image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
        let mut state = self.state();
        state.detect_calls += 1;
        if let Some((after, flag)) = &state.cancel_after {
            if state.detect_calls >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if let Some(e) = &state.detect_error {
            return Err(e.clone());
        }
        Ok(state.detections.clone())
    }

    fn create_collection(&self, collection_id: &str) -> Result<(), ProviderError> {
        let race = {
            let mut state = self.state();
            state.create_calls += 1;
            if let Some(e) = &state.create_error {
                return Err(e.clone());
            }
            if !state.collections.insert(collection_id.to_string()) {
                return Err(ProviderError::AlreadyExists);
            }
            state.race_collection_insert.take()
        };
        if let Some((db, owner)) = race {
            db.insert_collection(&owner, collection_id).unwrap();
        }
        Ok(())
    }

    fn delete_collection(&self, collection_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.gallery.remove(collection_id);
        if state.collections.remove(collection_id) {
            Ok(())
        } else {
            Err(ProviderError::NotFound)
        }
    }

    fn index_face(
        &self,
        collection_id: &str,
        _image: &[u8],
        external_ref: &str,
    ) -> Result<Option<IndexedFace>, ProviderError> {
        let mut state = self.state();
        if let Some(e) = &state.index_error {
            return Err(e.clone());
        }
        if state.index_fail_refs.contains(external_ref) {
            return Err(ProviderError::Status {
                code: 500,
                message: format!("cannot index {}", external_ref),
            });
        }
        if state.index_returns_none {
            return Ok(None);
        }
        if !state.collections.contains(collection_id) {
            return Err(ProviderError::NotFound);
        }
        state.next_face += 1;
        let external_face_id = format!("ext-{}", state.next_face);
        state
            .gallery
            .entry(collection_id.to_string())
            .or_default()
            .push((external_face_id.clone(), external_ref.to_string()));
        state.indexed_refs.push(external_ref.to_string());
        Ok(Some(IndexedFace {
            external_face_id,
            confidence: 99.0,
            bounding_box: BoundingBox {
                left: 0.0,
                top: 0.0,
                width: 1.0,
                height: 1.0,
            },
        }))
    }

    fn search_faces_by_image(
        &self,
        collection_id: &str,
        _image: &[u8],
        max_results: usize,
        min_similarity: f64,
    ) -> Result<Vec<FaceMatch>, ProviderError> {
        let mut state = self.state();
        state.search_calls += 1;
        if let Some(e) = &state.search_error {
            return Err(e.clone());
        }
        if !state.collections.contains(collection_id) {
            return Err(ProviderError::NotFound);
        }
        let similarity = state.similarity;
        let mut hits: Vec<FaceMatch> = state
            .gallery
            .get(collection_id)
            .into_iter()
            .flatten()
            .map(|(external_face_id, external_ref)| FaceMatch {
                external_face_id: external_face_id.clone(),
                similarity,
                external_ref: Some(external_ref.clone()),
            })
            .chain(state.extra_hits.iter().cloned())
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();
        hits.truncate(max_results);
        Ok(hits)
    }

    fn remove_face(&self, collection_id: &str, external_face_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.removed.push(external_face_id.to_string());
        if let Some(e) = &state.remove_error {
            return Err(e.clone());
        }
        let faces = state.gallery.entry(collection_id.to_string()).or_default();
        let before = faces.len();
        faces.retain(|(id, _)| id != external_face_id);
        if faces.len() == before {
            Err(ProviderError::NotFound)
        } else {
            Ok(())
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

pub fn detection(confidence: f64) -> DetectedFace {
    DetectedFace {
        bounding_box: BoundingBox {
            left: 0.25,
            top: 0.2,
            width: 0.3,
            height: 0.5,
        },
        confidence,
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db: Arc<Database>,
    pub provider: Arc<FakeProvider>,
    pub processor: Arc<FaceProcessor>,
    pub people: PersonManager,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let processor = Arc::new(FaceProcessor::new(
            db.clone(),
            provider.clone(),
            FaceSettings::default(),
        ));
        let people = PersonManager::new(processor.clone());
        Self {
            dir,
            db,
            provider,
            processor,
            people,
        }
    }

    /// Write a small PNG and register it for `owner`.
    pub fn add_photo(&self, owner: &str) -> i64 {
        let count = self.db.get_photo_ids_for_owner(owner).unwrap().len();
        let path: PathBuf = self.dir.path().join(format!("{}-{}.png", owner, count));
        image::RgbImage::from_pixel(160, 120, image::Rgb([180, 140, 110]))
            .save(&path)
            .unwrap();
        self.db
            .insert_photo(owner, &path.to_string_lossy(), None, None)
            .unwrap()
    }

    pub fn set_detections(&self, detections: Vec<DetectedFace>) {
        self.provider.state().detections = detections;
    }

    pub fn set_similarity(&self, similarity: f64) {
        self.provider.state().similarity = similarity;
    }

    pub fn collection_id(&self, owner: &str) -> String {
        self.processor.collections().external_collection_id(owner)
    }

    /// Give `owner` a gallery holding one indexed face tagged "Alice".
    /// Returns Alice's person id and the tagged face id.
    pub fn seed_alice(&self, owner: &str) -> (i64, i64) {
        let photo_id = self.add_photo(owner);
        self.set_detections(vec![detection(95.0)]);
        let outcome = self.processor.detect_faces_for_photo(photo_id).unwrap();
        let face_id = outcome.faces[0].id;
        let tagged = self
            .people
            .tag_face(face_id, picface::TagTarget::Name("Alice".to_string()))
            .unwrap();
        assert!(tagged.face.indexed);
        (tagged.person.id, face_id)
    }
}
