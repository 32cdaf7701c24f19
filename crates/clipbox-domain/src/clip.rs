use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::album::AlbumId;
use crate::tag::Tag;

/// Globally unique clip identifier (UUID v4).
pub type ClipId = Uuid;

/// Globally unique clip item identifier (UUID v4).
pub type ClipItemId = Uuid;

/// Pixel dimensions of a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

impl ImageSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// One image inside a clip.
///
/// The image bytes live in the blob store under the owning clip's id and
/// `image_file_name`; this record only carries their metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipItem {
    pub id: ClipItemId,
    pub clip_id: ClipId,
    /// Position inside the clip, starting at zero.
    pub index: u32,
    pub image_id: Uuid,
    pub image_file_name: String,
    pub image_url: Option<Url>,
    pub image_size: ImageSize,
    pub image_data_size: u64,
    pub registered_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl ClipItem {
    /// Create an item for `clip_id` at `index` referencing `image_file_name`.
    pub fn new(clip_id: ClipId, index: u32, image_file_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            clip_id,
            index,
            image_id: Uuid::new_v4(),
            image_file_name: image_file_name.into(),
            image_url: None,
            image_size: ImageSize::default(),
            image_data_size: 0,
            registered_date: now,
            updated_date: now,
        }
    }
}

/// A user-created bundle of one or more images with shared metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub description: Option<String>,
    /// Page the images were clipped from.
    pub url: Option<Url>,
    /// Items ordered by `index`.
    pub items: Vec<ClipItem>,
    pub tags: Vec<Tag>,
    pub album_ids: Vec<AlbumId>,
    pub is_hidden: bool,
    pub registered_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl Clip {
    /// Sum of the byte sizes of every item's image.
    pub fn data_size(&self) -> u64 {
        self.items.iter().map(|item| item.image_data_size).sum()
    }

    pub fn tag_ids(&self) -> Vec<Uuid> {
        self.tags.iter().map(|tag| tag.id).collect()
    }

    pub fn item(&self, id: ClipItemId) -> Option<&ClipItem> {
        self.items.iter().find(|item| item.id == id)
    }
}
