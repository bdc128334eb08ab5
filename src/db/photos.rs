use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};

/// A stored photo, as far as face processing cares about it.
#[derive(Debug, Clone)]
pub struct Photo {
    pub id: i64,
    pub owner_id: String,
    pub path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub created_at: String,
}

impl Database {
    pub fn insert_photo(
        &self,
        owner_id: &str,
        path: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> DbResult<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO photos (owner_id, path, width, height) VALUES (?, ?, ?, ?)",
            params![owner_id, path, width, height],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_photo(&self, photo_id: i64) -> DbResult<Option<Photo>> {
        let photo = self
            .conn()
            .query_row(
                "SELECT id, owner_id, path, width, height, created_at FROM photos WHERE id = ?",
                [photo_id],
                |row| {
                    Ok(Photo {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        path: row.get(2)?,
                        width: row.get(3)?,
                        height: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(photo)
    }

    /// Photo ids for an owner, oldest first.
    pub fn get_photo_ids_for_owner(&self, owner_id: &str) -> DbResult<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM photos WHERE owner_id = ? ORDER BY id")?;
        let ids = stmt
            .query_map([owner_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn update_photo_dimensions(&self, photo_id: i64, width: u32, height: u32) -> DbResult<()> {
        self.conn().execute(
            "UPDATE photos SET width = ?, height = ? WHERE id = ?",
            params![width, height, photo_id],
        )?;
        Ok(())
    }

    /// Delete a photo; its faces go with it.
    pub fn delete_photo(&self, photo_id: i64) -> DbResult<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM photos WHERE id = ?", [photo_id])?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{test_db, BoundingBox};

    #[test]
    fn test_insert_and_get_photo() {
        let db = test_db();
        let id = db.insert_photo("owner-1", "/photos/a.jpg", Some(640), None).unwrap();
        let photo = db.get_photo(id).unwrap().unwrap();
        assert_eq!(photo.owner_id, "owner-1");
        assert_eq!(photo.path, "/photos/a.jpg");
        assert_eq!(photo.width, Some(640));
        assert_eq!(photo.height, None);

        db.update_photo_dimensions(id, 800, 600).unwrap();
        let photo = db.get_photo(id).unwrap().unwrap();
        assert_eq!((photo.width, photo.height), (Some(800), Some(600)));
    }

    #[test]
    fn test_missing_photo_is_none() {
        let db = test_db();
        assert!(db.get_photo(42).unwrap().is_none());
    }

    #[test]
    fn test_photo_ids_scoped_to_owner() {
        let db = test_db();
        let a = db.insert_photo("alice", "/a.jpg", None, None).unwrap();
        db.insert_photo("bob", "/b.jpg", None, None).unwrap();
        let c = db.insert_photo("alice", "/c.jpg", None, None).unwrap();
        assert_eq!(db.get_photo_ids_for_owner("alice").unwrap(), vec![a, c]);
    }

    #[test]
    fn test_deleting_photo_deletes_faces() {
        let db = test_db();
        let photo_id = db.insert_photo("owner", "/a.jpg", None, None).unwrap();
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.2).unwrap();
        db.store_face(photo_id, &bbox, 99.0).unwrap();

        assert!(db.delete_photo(photo_id).unwrap());
        assert!(db.get_faces_for_photo(photo_id).unwrap().is_empty());
    }
}
