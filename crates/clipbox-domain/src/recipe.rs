//! Input shapes for clip creation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::clip::{Clip, ClipId, ClipItem};
use crate::tag::Tag;

/// Raw image bytes supplied alongside a recipe, keyed by file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl ImagePayload {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            data,
        }
    }
}

/// Everything needed to create a clip (or to re-create a staged one in the
/// permanent store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecipe {
    pub id: ClipId,
    pub description: Option<String>,
    pub url: Option<Url>,
    pub items: Vec<ClipItem>,
    pub tags: Vec<Tag>,
    pub is_hidden: bool,
    pub registered_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

/// Structural problems with a recipe and its payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecipeError {
    #[error("Duplicated image file name: {0}")]
    DuplicatedFileName(String),

    #[error("No image data supplied for {0}")]
    MissingImage(String),

    #[error("Item {item} belongs to clip {owner}, not {clip}")]
    ForeignItem { item: Uuid, owner: ClipId, clip: ClipId },
}

impl ClipRecipe {
    /// An empty, visible recipe with a fresh id.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: None,
            url: None,
            items: Vec::new(),
            tags: Vec::new(),
            is_hidden: false,
            registered_date: now,
            updated_date: now,
        }
    }

    /// Append an item for `file_name`, returning the recipe for chaining.
    pub fn with_item(mut self, file_name: &str, data_size: u64) -> Self {
        let mut item = ClipItem::new(self.id, self.items.len() as u32, file_name);
        item.image_data_size = data_size;
        self.items.push(item);
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Check that payload file names are unique and that every item's image
    /// is among them. Touches no store.
    pub fn validate(&self, payloads: &[ImagePayload]) -> Result<(), RecipeError> {
        let mut names = HashSet::with_capacity(payloads.len());
        for payload in payloads {
            if !names.insert(payload.file_name.as_str()) {
                return Err(RecipeError::DuplicatedFileName(payload.file_name.clone()));
            }
        }

        for item in &self.items {
            if item.clip_id != self.id {
                return Err(RecipeError::ForeignItem {
                    item: item.id,
                    owner: item.clip_id,
                    clip: self.id,
                });
            }
            if !names.contains(item.image_file_name.as_str()) {
                return Err(RecipeError::MissingImage(item.image_file_name.clone()));
            }
        }

        Ok(())
    }
}

impl Default for ClipRecipe {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&Clip> for ClipRecipe {
    fn from(clip: &Clip) -> Self {
        Self {
            id: clip.id,
            description: clip.description.clone(),
            url: clip.url.clone(),
            items: clip.items.clone(),
            tags: clip.tags.clone(),
            is_hidden: clip.is_hidden,
            registered_date: clip.registered_date,
            updated_date: clip.updated_date,
        }
    }
}
