use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use clipbox_domain::{
    Album, AlbumId, Clip, ClipId, ClipItem, ClipItemId, ClipRecipe, ImageSize, Tag, TagId,
};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use url::Url;

use super::{from_millis, parse_id, parse_url, to_millis, unique, Database};
use crate::error::StorageError;
use crate::store::{ClipCreation, ClipCreationOptions, MetadataStore, Transactional};

/// SQLite-backed implementation of [`MetadataStore`].
///
/// Serves as the permanent store and, opened on a second file, as the
/// staging store.
pub struct SqliteMetadataStore {
    db: Database,
}

impl SqliteMetadataStore {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::with_database(Database::open(path, "metadata")?)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_database(Database::open_in_memory("metadata")?)
    }

    fn with_database(db: Database) -> Result<Self, StorageError> {
        Self::init_schema(&*db.lock()?)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS clips (
                id TEXT PRIMARY KEY,
                description TEXT,
                url TEXT,
                is_hidden INTEGER NOT NULL DEFAULT 0,
                registered_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS clip_items (
                id TEXT PRIMARY KEY,
                clip_id TEXT NOT NULL REFERENCES clips(id) ON DELETE CASCADE,
                item_index INTEGER NOT NULL,
                image_id TEXT NOT NULL,
                image_file_name TEXT NOT NULL,
                image_url TEXT,
                image_width REAL NOT NULL,
                image_height REAL NOT NULL,
                image_data_size INTEGER NOT NULL,
                registered_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                is_hidden INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS clip_tags (
                clip_id TEXT NOT NULL REFERENCES clips(id) ON DELETE CASCADE,
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (clip_id, tag_id)
            );

            CREATE TABLE IF NOT EXISTS albums (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL UNIQUE,
                is_hidden INTEGER NOT NULL DEFAULT 0,
                album_index INTEGER NOT NULL,
                registered_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS album_clips (
                album_id TEXT NOT NULL REFERENCES albums(id) ON DELETE CASCADE,
                clip_id TEXT NOT NULL REFERENCES clips(id) ON DELETE CASCADE,
                clip_index INTEGER NOT NULL,
                PRIMARY KEY (album_id, clip_id)
            );

            CREATE INDEX IF NOT EXISTS idx_clip_items_clip ON clip_items(clip_id, item_index);
            CREATE INDEX IF NOT EXISTS idx_clip_tags_tag ON clip_tags(tag_id);
            CREATE INDEX IF NOT EXISTS idx_album_clips_clip ON album_clips(clip_id);
            ",
        )
        .map_err(|e| StorageError::Storage(format!("init_schema: {}", e)))
    }

    // ==================== Loading ====================

    fn load_clip(conn: &Connection, id: ClipId) -> Result<Clip, StorageError> {
        let row = conn
            .query_row(
                "SELECT description, url, is_hidden, registered_at, updated_at FROM clips WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, bool>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((description, url, is_hidden, registered_at, updated_at)) = row else {
            return Err(StorageError::NotFound(format!("clip {}", id)));
        };

        Ok(Clip {
            id,
            description,
            url: parse_url(url)?,
            items: Self::load_items(conn, id)?,
            tags: Self::load_clip_tags(conn, id)?,
            album_ids: Self::load_memberships(conn, id)?,
            is_hidden,
            registered_date: from_millis(registered_at),
            updated_date: from_millis(updated_at),
        })
    }

    fn load_items(conn: &Connection, clip_id: ClipId) -> Result<Vec<ClipItem>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT id, item_index, image_id, image_file_name, image_url, image_width, image_height,
                    image_data_size, registered_at, updated_at
             FROM clip_items WHERE clip_id = ?1 ORDER BY item_index",
        )?;
        let rows = stmt
            .query_map(params![clip_id.to_string()], |row| {
                Ok(ItemRow {
                    id: row.get(0)?,
                    index: row.get(1)?,
                    image_id: row.get(2)?,
                    image_file_name: row.get(3)?,
                    image_url: row.get(4)?,
                    width: row.get(5)?,
                    height: row.get(6)?,
                    data_size: row.get(7)?,
                    registered_at: row.get(8)?,
                    updated_at: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|row| row.into_item(clip_id)).collect()
    }

    fn load_item(conn: &Connection, id: ClipItemId) -> Result<ClipItem, StorageError> {
        let clip_id: Option<String> = conn
            .query_row(
                "SELECT clip_id FROM clip_items WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let clip_id = clip_id.ok_or_else(|| StorageError::NotFound(format!("clip item {}", id)))?;

        Self::load_items(conn, parse_id(&clip_id)?)?
            .into_iter()
            .find(|item| item.id == id)
            .ok_or_else(|| StorageError::NotFound(format!("clip item {}", id)))
    }

    fn load_clip_tags(conn: &Connection, clip_id: ClipId) -> Result<Vec<Tag>, StorageError> {
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.is_hidden FROM clip_tags ct
             JOIN tags t ON t.id = ct.tag_id
             WHERE ct.clip_id = ?1 ORDER BY t.name",
        )?;
        let rows = stmt
            .query_map(params![clip_id.to_string()], tag_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_tag).collect()
    }

    fn load_memberships(conn: &Connection, clip_id: ClipId) -> Result<Vec<AlbumId>, StorageError> {
        let mut stmt =
            conn.prepare("SELECT album_id FROM album_clips WHERE clip_id = ?1 ORDER BY album_id")?;
        let ids = stmt
            .query_map(params![clip_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    fn load_tag(conn: &Connection, id: TagId) -> Result<Tag, StorageError> {
        let row = conn
            .query_row(
                "SELECT id, name, is_hidden FROM tags WHERE id = ?1",
                params![id.to_string()],
                tag_row,
            )
            .optional()?;
        row.map(into_tag)
            .unwrap_or_else(|| Err(StorageError::NotFound(format!("tag {}", id))))
    }

    fn load_album(conn: &Connection, id: AlbumId) -> Result<Album, StorageError> {
        let row = conn
            .query_row(
                "SELECT title, is_hidden, album_index, registered_at, updated_at FROM albums WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((title, is_hidden, index, registered_at, updated_at)) = row else {
            return Err(StorageError::NotFound(format!("album {}", id)));
        };

        Ok(Album {
            id,
            title,
            clip_ids: Self::load_album_clip_ids(conn, id)?,
            is_hidden,
            index: index as u32,
            registered_date: from_millis(registered_at),
            updated_date: from_millis(updated_at),
        })
    }

    fn load_album_clip_ids(conn: &Connection, album_id: AlbumId) -> Result<Vec<ClipId>, StorageError> {
        let mut stmt = conn
            .prepare("SELECT clip_id FROM album_clips WHERE album_id = ?1 ORDER BY clip_index")?;
        let ids = stmt
            .query_map(params![album_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    fn all_ids(conn: &Connection, sql: &str) -> Result<Vec<uuid::Uuid>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    // ==================== Writing ====================

    fn require(conn: &Connection, table: &str, id: uuid::Uuid) -> Result<(), StorageError> {
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", table),
                params![id.to_string()],
                |_| Ok(()),
            )
            .optional()?;
        found.ok_or_else(|| StorageError::NotFound(format!("{} {}", table.trim_end_matches('s'), id)))
    }

    fn touch_clip(conn: &Connection, id: ClipId) -> Result<(), StorageError> {
        let changed = conn.execute(
            "UPDATE clips SET updated_at = ?1 WHERE id = ?2",
            params![to_millis(&Utc::now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("clip {}", id)));
        }
        Ok(())
    }

    fn touch_album(conn: &Connection, id: AlbumId) -> Result<(), StorageError> {
        let changed = conn.execute(
            "UPDATE albums SET updated_at = ?1 WHERE id = ?2",
            params![to_millis(&Utc::now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("album {}", id)));
        }
        Ok(())
    }

    fn insert_item(conn: &Connection, clip_id: ClipId, item: &ClipItem) -> Result<(), StorageError> {
        conn.execute(
            "INSERT INTO clip_items (id, clip_id, item_index, image_id, image_file_name, image_url,
                                     image_width, image_height, image_data_size, registered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                item.id.to_string(),
                clip_id.to_string(),
                item.index,
                item.image_id.to_string(),
                item.image_file_name,
                item.image_url.as_ref().map(Url::as_str),
                item.image_size.width,
                item.image_size.height,
                item.image_data_size as i64,
                to_millis(&item.registered_date),
                to_millis(&item.updated_date),
            ],
        )
        .map_err(|e| unique(e, || format!("clip item {}", item.id)))?;
        Ok(())
    }

    /// Resolve a recipe tag to a stored tag id, creating it when allowed.
    fn resolve_tag(
        conn: &Connection,
        tag: &Tag,
        allow_creation: bool,
    ) -> Result<Option<TagId>, StorageError> {
        if Self::require(conn, "tags", tag.id).is_ok() {
            return Ok(Some(tag.id));
        }
        if !allow_creation {
            debug!(tag_id = %tag.id, name = %tag.name, "dropping unknown tag from clip");
            return Ok(None);
        }

        let same_name: Option<String> = conn
            .query_row(
                "SELECT id FROM tags WHERE name = ?1",
                params![tag.name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = same_name {
            return parse_id(&existing).map(Some);
        }

        Self::insert_tag(conn, tag)?;
        Ok(Some(tag.id))
    }

    fn insert_tag(conn: &Connection, tag: &Tag) -> Result<(), StorageError> {
        conn.execute(
            "INSERT INTO tags (id, name, is_hidden) VALUES (?1, ?2, ?3)",
            params![tag.id.to_string(), tag.name, tag.is_hidden],
        )
        .map_err(|e| unique(e, || format!("tag {} ({})", tag.name, tag.id)))?;
        Ok(())
    }

    fn link_tags(conn: &Connection, clip_id: ClipId, tag_ids: &[TagId]) -> Result<(), StorageError> {
        for tag_id in tag_ids {
            conn.execute(
                "INSERT OR IGNORE INTO clip_tags (clip_id, tag_id) VALUES (?1, ?2)",
                params![clip_id.to_string(), tag_id.to_string()],
            )?;
        }
        Ok(())
    }

    /// Rewrite `clip_index` so members are numbered 0.. in the given order.
    fn write_album_order(conn: &Connection, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<(), StorageError> {
        for (index, clip_id) in clip_ids.iter().enumerate() {
            conn.execute(
                "UPDATE album_clips SET clip_index = ?1 WHERE album_id = ?2 AND clip_id = ?3",
                params![index as i64, album_id.to_string(), clip_id.to_string()],
            )?;
        }
        Ok(())
    }
}

struct ItemRow {
    id: String,
    index: u32,
    image_id: String,
    image_file_name: String,
    image_url: Option<String>,
    width: f64,
    height: f64,
    data_size: i64,
    registered_at: i64,
    updated_at: i64,
}

impl ItemRow {
    fn into_item(self, clip_id: ClipId) -> Result<ClipItem, StorageError> {
        Ok(ClipItem {
            id: parse_id(&self.id)?,
            clip_id,
            index: self.index,
            image_id: parse_id(&self.image_id)?,
            image_file_name: self.image_file_name,
            image_url: parse_url(self.image_url)?,
            image_size: ImageSize::new(self.width, self.height),
            image_data_size: self.data_size.max(0) as u64,
            registered_date: from_millis(self.registered_at),
            updated_date: from_millis(self.updated_at),
        })
    }
}

fn tag_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_tag((id, name, is_hidden): (String, String, bool)) -> Result<Tag, StorageError> {
    Ok(Tag {
        id: parse_id(&id)?,
        name,
        is_hidden,
    })
}

/// `ordered` must be a permutation of `current`.
fn check_permutation<T: std::hash::Hash + Eq + std::fmt::Debug>(
    current: &[T],
    ordered: &[T],
    what: &str,
) -> Result<(), StorageError> {
    let current_set: HashSet<&T> = current.iter().collect();
    let ordered_set: HashSet<&T> = ordered.iter().collect();
    if ordered.len() != current.len() || ordered_set != current_set {
        return Err(StorageError::InvalidParameter(format!(
            "{} order must list every member exactly once",
            what
        )));
    }
    Ok(())
}

impl Transactional for SqliteMetadataStore {
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

impl MetadataStore for SqliteMetadataStore {
    fn read_all_clips(&self) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.lock()?;
        Self::all_ids(&conn, "SELECT id FROM clips ORDER BY registered_at, id")?
            .into_iter()
            .map(|id| Self::load_clip(&conn, id))
            .collect()
    }

    fn read_clip(&self, id: ClipId) -> Result<Clip, StorageError> {
        Self::load_clip(&*self.db.lock()?, id)
    }

    fn read_all_tags(&self) -> Result<Vec<Tag>, StorageError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare("SELECT id, name, is_hidden FROM tags ORDER BY name")?;
        let rows = stmt
            .query_map([], tag_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_tag).collect()
    }

    fn read_album(&self, id: AlbumId) -> Result<Album, StorageError> {
        Self::load_album(&*self.db.lock()?, id)
    }

    fn create_clip(
        &self,
        recipe: &ClipRecipe,
        options: ClipCreationOptions,
    ) -> Result<ClipCreation, StorageError> {
        let conn = self.db.writer()?;
        let id = recipe.id.to_string();

        let replaced = match Self::load_clip(&conn, recipe.id) {
            Ok(existing) => Some(existing),
            Err(StorageError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        match &replaced {
            Some(_) if !options.overwrite => {
                return Err(StorageError::Duplicated(format!("clip {}", recipe.id)));
            }
            // Album memberships survive an overwrite; items and tags do not.
            Some(_) => {
                conn.execute(
                    "UPDATE clips SET description = ?1, url = ?2, is_hidden = ?3,
                                      registered_at = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        recipe.description,
                        recipe.url.as_ref().map(Url::as_str),
                        recipe.is_hidden,
                        to_millis(&recipe.registered_date),
                        to_millis(&recipe.updated_date),
                        id,
                    ],
                )?;
                conn.execute("DELETE FROM clip_items WHERE clip_id = ?1", params![id])?;
                conn.execute("DELETE FROM clip_tags WHERE clip_id = ?1", params![id])?;
            }
            None => {
                conn.execute(
                    "INSERT INTO clips (id, description, url, is_hidden, registered_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        recipe.description,
                        recipe.url.as_ref().map(Url::as_str),
                        recipe.is_hidden,
                        to_millis(&recipe.registered_date),
                        to_millis(&recipe.updated_date),
                    ],
                )
                .map_err(|e| unique(e, || format!("clip {}", recipe.id)))?;
            }
        }

        for item in &recipe.items {
            Self::insert_item(&conn, recipe.id, item)?;
        }

        let mut tag_ids = Vec::with_capacity(recipe.tags.len());
        for tag in &recipe.tags {
            if let Some(tag_id) = Self::resolve_tag(&conn, tag, options.allow_tag_creation)? {
                tag_ids.push(tag_id);
            }
        }
        Self::link_tags(&conn, recipe.id, &tag_ids)?;

        Ok(ClipCreation {
            clip: Self::load_clip(&conn, recipe.id)?,
            replaced,
        })
    }

    fn update_clips_hidden(&self, ids: &[ClipId], is_hidden: bool) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.writer()?;
        let now = to_millis(&Utc::now());
        ids.iter()
            .map(|id| {
                let changed = conn.execute(
                    "UPDATE clips SET is_hidden = ?1, updated_at = ?2 WHERE id = ?3",
                    params![is_hidden, now, id.to_string()],
                )?;
                if changed == 0 {
                    return Err(StorageError::NotFound(format!("clip {}", id)));
                }
                Self::load_clip(&conn, *id)
            })
            .collect()
    }

    fn add_tags_to_clips(&self, tag_ids: &[TagId], clip_ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.writer()?;
        for tag_id in tag_ids {
            Self::require(&conn, "tags", *tag_id)?;
        }
        clip_ids
            .iter()
            .map(|clip_id| {
                Self::touch_clip(&conn, *clip_id)?;
                Self::link_tags(&conn, *clip_id, tag_ids)?;
                Self::load_clip(&conn, *clip_id)
            })
            .collect()
    }

    fn remove_tags_from_clips(&self, tag_ids: &[TagId], clip_ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.writer()?;
        clip_ids
            .iter()
            .map(|clip_id| {
                Self::touch_clip(&conn, *clip_id)?;
                for tag_id in tag_ids {
                    conn.execute(
                        "DELETE FROM clip_tags WHERE clip_id = ?1 AND tag_id = ?2",
                        params![clip_id.to_string(), tag_id.to_string()],
                    )?;
                }
                Self::load_clip(&conn, *clip_id)
            })
            .collect()
    }

    fn replace_tags_of_clips(&self, tag_ids: &[TagId], clip_ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.writer()?;
        for tag_id in tag_ids {
            Self::require(&conn, "tags", *tag_id)?;
        }
        clip_ids
            .iter()
            .map(|clip_id| {
                Self::touch_clip(&conn, *clip_id)?;
                conn.execute(
                    "DELETE FROM clip_tags WHERE clip_id = ?1",
                    params![clip_id.to_string()],
                )?;
                Self::link_tags(&conn, *clip_id, tag_ids)?;
                Self::load_clip(&conn, *clip_id)
            })
            .collect()
    }

    fn update_clip_url(&self, id: ClipId, url: Option<Url>) -> Result<Clip, StorageError> {
        let conn = self.db.writer()?;
        let changed = conn.execute(
            "UPDATE clips SET url = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                url.as_ref().map(Url::as_str),
                to_millis(&Utc::now()),
                id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("clip {}", id)));
        }
        Self::load_clip(&conn, id)
    }

    fn reorder_clip_items(&self, clip_id: ClipId, item_ids: &[ClipItemId]) -> Result<Clip, StorageError> {
        let conn = self.db.writer()?;
        let clip = Self::load_clip(&conn, clip_id)?;
        let current: Vec<ClipItemId> = clip.items.iter().map(|item| item.id).collect();
        check_permutation(&current, item_ids, "item")?;

        let now = to_millis(&Utc::now());
        for (index, item_id) in item_ids.iter().enumerate() {
            conn.execute(
                "UPDATE clip_items SET item_index = ?1, updated_at = ?2 WHERE id = ?3",
                params![index as i64, now, item_id.to_string()],
            )?;
        }
        Self::touch_clip(&conn, clip_id)?;
        Self::load_clip(&conn, clip_id)
    }

    fn delete_clips(&self, ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.writer()?;
        let clips = ids
            .iter()
            .map(|id| Self::load_clip(&conn, *id))
            .collect::<Result<Vec<_>, _>>()?;
        for clip in &clips {
            conn.execute("DELETE FROM clips WHERE id = ?1", params![clip.id.to_string()])?;
        }
        Ok(clips)
    }

    fn delete_clip_item(&self, id: ClipItemId) -> Result<ClipItem, StorageError> {
        let conn = self.db.writer()?;
        let item = Self::load_item(&conn, id)?;
        conn.execute("DELETE FROM clip_items WHERE id = ?1", params![id.to_string()])?;

        // Keep the remaining items numbered 0.. without gaps.
        let remaining = Self::load_items(&conn, item.clip_id)?;
        for (index, rest) in remaining.iter().enumerate() {
            conn.execute(
                "UPDATE clip_items SET item_index = ?1 WHERE id = ?2",
                params![index as i64, rest.id.to_string()],
            )?;
        }
        Self::touch_clip(&conn, item.clip_id)?;
        Ok(item)
    }

    fn delete_all_clips(&self) -> Result<Vec<Clip>, StorageError> {
        let conn = self.db.writer()?;
        let clips = Self::all_ids(&conn, "SELECT id FROM clips ORDER BY registered_at, id")?
            .into_iter()
            .map(|id| Self::load_clip(&conn, id))
            .collect::<Result<Vec<_>, _>>()?;
        conn.execute("DELETE FROM clips", [])?;
        Ok(clips)
    }

    fn create_tag(&self, tag: &Tag) -> Result<Tag, StorageError> {
        let conn = self.db.writer()?;
        Self::insert_tag(&conn, tag)?;
        Self::load_tag(&conn, tag.id)
    }

    fn update_tag_name(&self, id: TagId, name: &str) -> Result<Tag, StorageError> {
        let conn = self.db.writer()?;
        let changed = conn
            .execute(
                "UPDATE tags SET name = ?1 WHERE id = ?2",
                params![name, id.to_string()],
            )
            .map_err(|e| unique(e, || format!("tag name {}", name)))?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("tag {}", id)));
        }
        Self::load_tag(&conn, id)
    }

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<Tag, StorageError> {
        let conn = self.db.writer()?;
        let changed = conn.execute(
            "UPDATE tags SET is_hidden = ?1 WHERE id = ?2",
            params![is_hidden, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("tag {}", id)));
        }
        Self::load_tag(&conn, id)
    }

    fn delete_tags(&self, ids: &[TagId]) -> Result<Vec<Tag>, StorageError> {
        let conn = self.db.writer()?;
        let tags = ids
            .iter()
            .map(|id| Self::load_tag(&conn, *id))
            .collect::<Result<Vec<_>, _>>()?;
        for tag in &tags {
            conn.execute("DELETE FROM tags WHERE id = ?1", params![tag.id.to_string()])?;
        }
        Ok(tags)
    }

    fn create_album(&self, album: &Album) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        let next_index: i64 = conn.query_row(
            "SELECT COALESCE(MAX(album_index) + 1, 0) FROM albums",
            [],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO albums (id, title, is_hidden, album_index, registered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                album.id.to_string(),
                album.title,
                album.is_hidden,
                next_index,
                to_millis(&album.registered_date),
                to_millis(&album.updated_date),
            ],
        )
        .map_err(|e| unique(e, || format!("album {}", album.title)))?;

        for (index, clip_id) in album.clip_ids.iter().enumerate() {
            Self::require(&conn, "clips", *clip_id)?;
            conn.execute(
                "INSERT INTO album_clips (album_id, clip_id, clip_index) VALUES (?1, ?2, ?3)",
                params![album.id.to_string(), clip_id.to_string(), index as i64],
            )?;
        }
        Self::load_album(&conn, album.id)
    }

    fn update_album_title(&self, id: AlbumId, title: &str) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        let changed = conn
            .execute(
                "UPDATE albums SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, to_millis(&Utc::now()), id.to_string()],
            )
            .map_err(|e| unique(e, || format!("album {}", title)))?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("album {}", id)));
        }
        Self::load_album(&conn, id)
    }

    fn update_album_hidden(&self, id: AlbumId, is_hidden: bool) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        let changed = conn.execute(
            "UPDATE albums SET is_hidden = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_hidden, to_millis(&Utc::now()), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("album {}", id)));
        }
        Self::load_album(&conn, id)
    }

    fn add_clips_to_album(&self, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        let mut members = Self::load_album(&conn, album_id)?.clip_ids;
        for clip_id in clip_ids {
            Self::require(&conn, "clips", *clip_id)?;
            if members.contains(clip_id) {
                continue;
            }
            conn.execute(
                "INSERT INTO album_clips (album_id, clip_id, clip_index) VALUES (?1, ?2, ?3)",
                params![album_id.to_string(), clip_id.to_string(), members.len() as i64],
            )?;
            members.push(*clip_id);
        }
        Self::touch_album(&conn, album_id)?;
        Self::load_album(&conn, album_id)
    }

    fn remove_clips_from_album(&self, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        Self::require(&conn, "albums", album_id)?;
        for clip_id in clip_ids {
            conn.execute(
                "DELETE FROM album_clips WHERE album_id = ?1 AND clip_id = ?2",
                params![album_id.to_string(), clip_id.to_string()],
            )?;
        }
        let remaining = Self::load_album_clip_ids(&conn, album_id)?;
        Self::write_album_order(&conn, album_id, &remaining)?;
        Self::touch_album(&conn, album_id)?;
        Self::load_album(&conn, album_id)
    }

    fn reorder_clips_in_album(&self, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        let current = Self::load_album(&conn, album_id)?.clip_ids;
        check_permutation(&current, clip_ids, "album clip")?;
        Self::write_album_order(&conn, album_id, clip_ids)?;
        Self::touch_album(&conn, album_id)?;
        Self::load_album(&conn, album_id)
    }

    fn reorder_albums(&self, album_ids: &[AlbumId]) -> Result<(), StorageError> {
        let conn = self.db.writer()?;
        let current = Self::all_ids(&conn, "SELECT id FROM albums ORDER BY album_index")?;
        check_permutation(&current, album_ids, "album")?;
        for (index, album_id) in album_ids.iter().enumerate() {
            conn.execute(
                "UPDATE albums SET album_index = ?1 WHERE id = ?2",
                params![index as i64, album_id.to_string()],
            )?;
        }
        Ok(())
    }

    fn delete_album(&self, id: AlbumId) -> Result<Album, StorageError> {
        let conn = self.db.writer()?;
        let album = Self::load_album(&conn, id)?;
        conn.execute("DELETE FROM albums WHERE id = ?1", params![id.to_string()])?;
        Ok(album)
    }
}
