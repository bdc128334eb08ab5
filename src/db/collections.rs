use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};

/// The local record of an owner's external face gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceCollection {
    pub id: i64,
    pub owner_id: String,
    pub external_collection_id: String,
    pub created_at: String,
}

fn row_to_collection(row: &rusqlite::Row) -> rusqlite::Result<FaceCollection> {
    Ok(FaceCollection {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        external_collection_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl Database {
    pub fn get_collection_for_owner(&self, owner_id: &str) -> DbResult<Option<FaceCollection>> {
        let collection = self
            .conn()
            .query_row(
                "SELECT id, owner_id, external_collection_id, created_at
                 FROM face_collections WHERE owner_id = ?",
                [owner_id],
                row_to_collection,
            )
            .optional()?;
        Ok(collection)
    }

    pub fn get_collection(&self, collection_id: i64) -> DbResult<Option<FaceCollection>> {
        let collection = self
            .conn()
            .query_row(
                "SELECT id, owner_id, external_collection_id, created_at
                 FROM face_collections WHERE id = ?",
                [collection_id],
                row_to_collection,
            )
            .optional()?;
        Ok(collection)
    }

    /// Insert the collection row for an owner.
    ///
    /// Fails with [`DbError::Conflict`](super::DbError::Conflict) when a row for
    /// the owner already exists.
    pub fn insert_collection(
        &self,
        owner_id: &str,
        external_collection_id: &str,
    ) -> DbResult<FaceCollection> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO face_collections (owner_id, external_collection_id) VALUES (?, ?)",
            params![owner_id, external_collection_id],
        )?;
        let id = conn.last_insert_rowid();
        let collection = conn.query_row(
            "SELECT id, owner_id, external_collection_id, created_at
             FROM face_collections WHERE id = ?",
            [id],
            row_to_collection,
        )?;
        Ok(collection)
    }

    /// Whether any face linked to a person of this collection is indexed.
    pub fn collection_has_indexed_faces(&self, collection_id: i64) -> DbResult<bool> {
        let exists: bool = self.conn().query_row(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM faces f
                JOIN people p ON p.id = f.person_id
                WHERE p.collection_id = ? AND f.indexed = 1
            )
            "#,
            [collection_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Drop a collection row, clearing index state on every face that
    /// belonged to one of its people. People are removed by cascade.
    ///
    /// Returns the number of faces that were released.
    pub fn delete_collection(&self, collection_id: i64) -> DbResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let released = tx.execute(
            r#"
            UPDATE faces
            SET person_id = NULL, indexed = 0, external_face_id = NULL
            WHERE person_id IN (SELECT id FROM people WHERE collection_id = ?)
            "#,
            [collection_id],
        )?;
        tx.execute("DELETE FROM face_collections WHERE id = ?", [collection_id])?;
        tx.commit()?;
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{test_db, BoundingBox, DbError};

    #[test]
    fn test_insert_and_find_collection() {
        let db = test_db();
        assert!(db.get_collection_for_owner("owner").unwrap().is_none());

        let created = db.insert_collection("owner", "picface-user-owner").unwrap();
        let found = db.get_collection_for_owner("owner").unwrap().unwrap();
        assert_eq!(created, found);
        assert_eq!(db.get_collection(created.id).unwrap().unwrap(), created);
    }

    #[test]
    fn test_duplicate_owner_is_conflict() {
        let db = test_db();
        db.insert_collection("owner", "ext-1").unwrap();
        let err = db.insert_collection("owner", "ext-2").unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn test_has_indexed_faces() {
        let db = test_db();
        let collection = db.insert_collection("owner", "ext").unwrap();
        assert!(!db.collection_has_indexed_faces(collection.id).unwrap());

        let photo_id = db.insert_photo("owner", "/a.jpg", None, None).unwrap();
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.2).unwrap();
        let face_id = db.store_face(photo_id, &bbox, 99.0).unwrap();
        let person_id = db.create_person(collection.id, Some("Alice")).unwrap();
        db.assign_face_to_person(face_id, person_id).unwrap();
        assert!(!db.collection_has_indexed_faces(collection.id).unwrap());

        db.mark_face_indexed(face_id, "ext-face-1", person_id).unwrap();
        assert!(db.collection_has_indexed_faces(collection.id).unwrap());
    }

    #[test]
    fn test_delete_collection_releases_faces() {
        let db = test_db();
        let collection = db.insert_collection("owner", "ext").unwrap();
        let photo_id = db.insert_photo("owner", "/a.jpg", None, None).unwrap();
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.2).unwrap();
        let face_id = db.store_face(photo_id, &bbox, 99.0).unwrap();
        let person_id = db.create_person(collection.id, Some("Alice")).unwrap();
        db.mark_face_indexed(face_id, "ext-face-1", person_id).unwrap();

        assert_eq!(db.delete_collection(collection.id).unwrap(), 1);
        assert!(db.get_collection_for_owner("owner").unwrap().is_none());
        assert!(db.get_person(person_id).unwrap().is_none());

        let face = db.get_face(face_id).unwrap().unwrap();
        assert_eq!(face.person_id, None);
        assert!(!face.indexed);
        assert_eq!(face.external_face_id, None);
    }
}
