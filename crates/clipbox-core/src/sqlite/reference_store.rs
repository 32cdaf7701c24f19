use std::path::Path;

use clipbox_domain::{ReferenceTag, TagId};
use rusqlite::{params, Connection};

use super::{parse_id, unique, Database};
use crate::error::StorageError;
use crate::store::{ReferenceStore, Transactional};

/// SQLite-backed implementation of [`ReferenceStore`].
pub struct SqliteReferenceStore {
    db: Database,
}

impl SqliteReferenceStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::with_database(Database::open(path, "references")?)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_database(Database::open_in_memory("references")?)
    }

    fn with_database(db: Database) -> Result<Self, StorageError> {
        Self::init_schema(&*db.lock()?)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reference_tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_hidden INTEGER NOT NULL DEFAULT 0,
                is_dirty INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_reference_tags_dirty ON reference_tags(is_dirty);
            ",
        )
        .map_err(|e| StorageError::Storage(format!("init_schema: {}", e)))
    }

    fn query(&self, sql: &str) -> Result<Vec<ReferenceTag>, StorageError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, is_hidden, is_dirty)| {
                Ok(ReferenceTag {
                    id: parse_id(&id)?,
                    name,
                    is_hidden,
                    is_dirty,
                })
            })
            .collect()
    }

    fn expect_changed(changed: usize, id: TagId) -> Result<(), StorageError> {
        if changed == 0 {
            return Err(StorageError::NotFound(format!("reference tag {}", id)));
        }
        Ok(())
    }
}

impl Transactional for SqliteReferenceStore {
    fn begin_transaction(&self) -> Result<(), StorageError> {
        self.db.begin()
    }

    fn commit_transaction(&self) -> Result<(), StorageError> {
        self.db.commit()
    }

    fn cancel_transaction_if_needed(&self) {
        self.db.cancel()
    }
}

impl ReferenceStore for SqliteReferenceStore {
    fn read_all_tags(&self) -> Result<Vec<ReferenceTag>, StorageError> {
        self.query("SELECT id, name, is_hidden, is_dirty FROM reference_tags ORDER BY name")
    }

    fn read_all_dirty_tags(&self) -> Result<Vec<ReferenceTag>, StorageError> {
        self.query(
            "SELECT id, name, is_hidden, is_dirty FROM reference_tags WHERE is_dirty = 1 ORDER BY name",
        )
    }

    fn create_tag(&self, tag: &ReferenceTag) -> Result<(), StorageError> {
        let conn = self.db.writer()?;
        conn.execute(
            "INSERT INTO reference_tags (id, name, is_hidden, is_dirty) VALUES (?1, ?2, ?3, ?4)",
            params![tag.id.to_string(), tag.name, tag.is_hidden, tag.is_dirty],
        )
        .map_err(|e| unique(e, || format!("reference tag {}", tag.id)))?;
        Ok(())
    }

    fn update_tag_name(&self, id: TagId, name: &str) -> Result<(), StorageError> {
        let conn = self.db.writer()?;
        let changed = conn.execute(
            "UPDATE reference_tags SET name = ?1 WHERE id = ?2",
            params![name, id.to_string()],
        )?;
        Self::expect_changed(changed, id)
    }

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<(), StorageError> {
        let conn = self.db.writer()?;
        let changed = conn.execute(
            "UPDATE reference_tags SET is_hidden = ?1 WHERE id = ?2",
            params![is_hidden, id.to_string()],
        )?;
        Self::expect_changed(changed, id)
    }

    fn update_tags(&self, ids: &[TagId], to_dirty: bool) -> Result<(), StorageError> {
        let conn = self.db.writer()?;
        for id in ids {
            let changed = conn.execute(
                "UPDATE reference_tags SET is_dirty = ?1 WHERE id = ?2",
                params![to_dirty, id.to_string()],
            )?;
            Self::expect_changed(changed, *id)?;
        }
        Ok(())
    }

    fn delete_tags(&self, ids: &[TagId]) -> Result<(), StorageError> {
        // Present tags are deleted even when some ids are unknown.
        let conn = self.db.writer()?;
        let mut missing = Vec::new();
        for id in ids {
            let changed = conn.execute(
                "DELETE FROM reference_tags WHERE id = ?1",
                params![id.to_string()],
            )?;
            if changed == 0 {
                missing.push(id.to_string());
            }
        }
        if !missing.is_empty() {
            return Err(StorageError::NotFound(format!(
                "reference tags {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}
