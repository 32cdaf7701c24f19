//! Album representation for grouping clips

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clip::ClipId;

/// Globally unique album identifier (UUID v4).
pub type AlbumId = Uuid;

/// An ordered, titled set of clips. Titles are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub title: String,
    /// Member clips in display order.
    pub clip_ids: Vec<ClipId>,
    pub is_hidden: bool,
    /// Position among all albums.
    pub index: u32,
    pub registered_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl Album {
    /// Create an empty, visible album
    pub fn new(title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            clip_ids: Vec::new(),
            is_hidden: false,
            index: 0,
            registered_date: now,
            updated_date: now,
        }
    }

    pub fn contains(&self, clip_id: ClipId) -> bool {
        self.clip_ids.contains(&clip_id)
    }
}
