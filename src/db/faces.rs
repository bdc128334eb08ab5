//! Faces and people: the local half of the identity record.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Database, DbError, DbResult};

/// Face location as fractions of the image width and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Build a box, rejecting any value outside `[0, 1]`.
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> DbResult<Self> {
        let bbox = Self {
            left,
            top,
            width,
            height,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Build a box from raw detector output, pulling every edge into the image.
    pub fn clamped(left: f64, top: f64, width: f64, height: f64) -> Self {
        let left = unit(left);
        let top = unit(top);
        Self {
            left,
            top,
            width: unit(width).min(1.0 - left),
            height: unit(height).min(1.0 - top),
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        for (name, value) in [
            ("left", self.left),
            ("top", self.top),
            ("width", self.width),
            ("height", self.height),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DbError::Invalid(format!(
                    "bounding box {} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

fn validate_confidence(confidence: f64) -> DbResult<()> {
    if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
        return Err(DbError::Invalid(format!(
            "confidence must be within [0, 100], got {}",
            confidence
        )));
    }
    Ok(())
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A detected face in a photo.
///
/// `indexed` is true exactly when `external_face_id` is set; the schema
/// enforces this with a CHECK constraint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Face {
    pub id: i64,
    pub photo_id: i64,
    pub person_id: Option<i64>,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    pub external_face_id: Option<String>,
    pub indexed: bool,
}

/// Face with the linked person's name for display
#[derive(Debug, Clone, Serialize)]
pub struct FaceWithPerson {
    #[serde(flatten)]
    pub face: Face,
    pub person_name: Option<String>,
}

/// A named identity inside an owner's collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: i64,
    pub collection_id: i64,
    pub name: Option<String>,
    pub face_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

const FACE_COLUMNS: &str = "f.id, f.photo_id, f.person_id, f.bbox_left, f.bbox_top, \
     f.bbox_width, f.bbox_height, f.confidence, f.external_face_id, f.indexed";

const PERSON_SELECT: &str = r#"
    SELECT p.id, p.collection_id, p.name, COUNT(f.id) AS face_count, p.created_at, p.updated_at
    FROM people p
    LEFT JOIN faces f ON f.person_id = p.id
"#;

fn row_to_face(row: &rusqlite::Row) -> rusqlite::Result<Face> {
    Ok(Face {
        id: row.get(0)?,
        photo_id: row.get(1)?,
        person_id: row.get(2)?,
        bounding_box: BoundingBox {
            left: row.get(3)?,
            top: row.get(4)?,
            width: row.get(5)?,
            height: row.get(6)?,
        },
        confidence: row.get(7)?,
        external_face_id: row.get(8)?,
        indexed: row.get(9)?,
    })
}

fn row_to_person(row: &rusqlite::Row) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get(0)?,
        collection_id: row.get(1)?,
        name: row.get(2)?,
        face_count: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl Database {
    // ========================================================================
    // People management
    // ========================================================================

    pub fn create_person(&self, collection_id: i64, name: Option<&str>) -> DbResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO people (collection_id, name) VALUES (?, ?)",
            params![collection_id, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_person(&self, person_id: i64) -> DbResult<Option<Person>> {
        let sql = format!("{} WHERE p.id = ? GROUP BY p.id", PERSON_SELECT);
        let person = self
            .conn()
            .query_row(&sql, [person_id], row_to_person)
            .optional()?;
        Ok(person)
    }

    /// Find a person in a collection by name (case-insensitive)
    pub fn find_person_by_name(&self, collection_id: i64, name: &str) -> DbResult<Option<Person>> {
        let sql = format!(
            "{} WHERE p.collection_id = ? AND LOWER(p.name) = LOWER(?) GROUP BY p.id ORDER BY p.id LIMIT 1",
            PERSON_SELECT
        );
        let person = self
            .conn()
            .query_row(&sql, params![collection_id, name], row_to_person)
            .optional()?;
        Ok(person)
    }

    /// Resolve a provider face id to the person whose face row carries it.
    pub fn find_person_by_external_face(
        &self,
        collection_id: i64,
        external_face_id: &str,
    ) -> DbResult<Option<Person>> {
        let sql = format!(
            "{} WHERE p.id = (
                 SELECT fx.person_id FROM faces fx
                 JOIN people px ON px.id = fx.person_id
                 WHERE fx.external_face_id = ? AND px.collection_id = ?
                 LIMIT 1
             )
             GROUP BY p.id",
            PERSON_SELECT
        );
        let person = self
            .conn()
            .query_row(&sql, params![external_face_id, collection_id], row_to_person)
            .optional()?;
        Ok(person)
    }

    pub fn rename_person(&self, person_id: i64, name: &str) -> DbResult<bool> {
        let updated = self.conn().execute(
            "UPDATE people SET name = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![name, person_id],
        )?;
        Ok(updated > 0)
    }

    /// People in a collection with face counts, named people first.
    pub fn get_people_for_collection(&self, collection_id: i64) -> DbResult<Vec<Person>> {
        let sql = format!(
            "{} WHERE p.collection_id = ? GROUP BY p.id
             ORDER BY p.name IS NULL, p.name COLLATE NOCASE, p.id",
            PERSON_SELECT
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let people = stmt
            .query_map([collection_id], row_to_person)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(people)
    }

    /// Delete a person. Their faces stay, with person and index state cleared.
    ///
    /// Returns the number of faces released.
    pub fn delete_person_and_release_faces(&self, person_id: i64) -> DbResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let released = tx.execute(
            "UPDATE faces SET person_id = NULL, indexed = 0, external_face_id = NULL WHERE person_id = ?",
            [person_id],
        )?;
        tx.execute("DELETE FROM people WHERE id = ?", [person_id])?;
        tx.commit()?;
        Ok(released)
    }

    // ========================================================================
    // Face management
    // ========================================================================

    /// Store a freshly detected face (unlinked, not indexed)
    pub fn store_face(&self, photo_id: i64, bbox: &BoundingBox, confidence: f64) -> DbResult<i64> {
        self.store_faces(photo_id, &[(*bbox, confidence)])?
            .pop()
            .ok_or_else(|| DbError::Invalid("no face stored".to_string()))
    }

    /// Store a photo's detections in one transaction; either every face is
    /// written or none is. Returns the new ids in input order.
    pub fn store_faces(&self, photo_id: i64, faces: &[(BoundingBox, f64)]) -> DbResult<Vec<i64>> {
        for (bbox, confidence) in faces {
            bbox.validate()?;
            validate_confidence(*confidence)?;
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(faces.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO faces (photo_id, bbox_left, bbox_top, bbox_width, bbox_height, confidence)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for (bbox, confidence) in faces {
                stmt.execute(params![
                    photo_id,
                    bbox.left,
                    bbox.top,
                    bbox.width,
                    bbox.height,
                    confidence
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn get_face(&self, face_id: i64) -> DbResult<Option<Face>> {
        let sql = format!("SELECT {} FROM faces f WHERE f.id = ?", FACE_COLUMNS);
        let face = self
            .conn()
            .query_row(&sql, [face_id], row_to_face)
            .optional()?;
        Ok(face)
    }

    pub fn get_faces_for_photo(&self, photo_id: i64) -> DbResult<Vec<Face>> {
        let sql = format!(
            "SELECT {} FROM faces f WHERE f.photo_id = ? ORDER BY f.id",
            FACE_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let faces = stmt
            .query_map([photo_id], row_to_face)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(faces)
    }

    pub fn get_faces_with_people_for_photo(&self, photo_id: i64) -> DbResult<Vec<FaceWithPerson>> {
        let sql = format!(
            "SELECT {}, p.name FROM faces f
             LEFT JOIN people p ON p.id = f.person_id
             WHERE f.photo_id = ? ORDER BY f.id",
            FACE_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let faces = stmt
            .query_map([photo_id], |row| {
                Ok(FaceWithPerson {
                    face: row_to_face(row)?,
                    person_name: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(faces)
    }

    pub fn get_faces_for_person(&self, person_id: i64) -> DbResult<Vec<Face>> {
        let sql = format!(
            "SELECT {} FROM faces f WHERE f.person_id = ? ORDER BY f.id",
            FACE_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let faces = stmt
            .query_map([person_id], row_to_face)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(faces)
    }

    pub fn delete_faces_for_photo(&self, photo_id: i64) -> DbResult<usize> {
        let deleted = self
            .conn()
            .execute("DELETE FROM faces WHERE photo_id = ?", [photo_id])?;
        Ok(deleted)
    }

    /// Link a face to a person without touching its index state
    pub fn assign_face_to_person(&self, face_id: i64, person_id: i64) -> DbResult<bool> {
        let updated = self.conn().execute(
            "UPDATE faces SET person_id = ? WHERE id = ?",
            params![person_id, face_id],
        )?;
        Ok(updated > 0)
    }

    /// Record a successful provider indexing and link the face to its person
    pub fn mark_face_indexed(
        &self,
        face_id: i64,
        external_face_id: &str,
        person_id: i64,
    ) -> DbResult<bool> {
        let updated = self.conn().execute(
            "UPDATE faces SET external_face_id = ?, indexed = 1, person_id = ? WHERE id = ?",
            params![external_face_id, person_id, face_id],
        )?;
        Ok(updated > 0)
    }

    /// Unlink a face and forget its provider id
    pub fn clear_face_identity(&self, face_id: i64) -> DbResult<bool> {
        let updated = self.conn().execute(
            "UPDATE faces SET person_id = NULL, indexed = 0, external_face_id = NULL WHERE id = ?",
            [face_id],
        )?;
        Ok(updated > 0)
    }
}
