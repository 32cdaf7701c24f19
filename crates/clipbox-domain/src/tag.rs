//! Core tag types.

use serde::{Deserialize, Serialize};

/// A unique tag identifier.
pub type TagId = uuid::Uuid;

/// A tag in the permanent store. Names are unique among live tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub is_hidden: bool,
}

impl Tag {
    /// Create a visible tag with a fresh id.
    pub fn new(name: &str) -> Self {
        Self {
            id: TagId::new_v4(),
            name: name.to_string(),
            is_hidden: false,
        }
    }
}

/// Lightweight tag mirror kept in the reference store.
///
/// `is_dirty` marks a tag created locally that has not been mirrored into
/// the permanent store yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceTag {
    pub id: TagId,
    pub name: String,
    pub is_hidden: bool,
    pub is_dirty: bool,
}

impl ReferenceTag {
    /// A locally created tag still waiting for the permanent store.
    pub fn dirty(name: &str) -> Self {
        Self {
            id: TagId::new_v4(),
            name: name.to_string(),
            is_hidden: false,
            is_dirty: true,
        }
    }

    /// The permanent-store shape of this tag, keeping its id.
    pub fn to_tag(&self) -> Tag {
        Tag {
            id: self.id,
            name: self.name.clone(),
            is_hidden: self.is_hidden,
        }
    }
}

impl From<&Tag> for ReferenceTag {
    /// Mirror of a tag that already exists permanently (never dirty).
    fn from(tag: &Tag) -> Self {
        Self {
            id: tag.id,
            name: tag.name.clone(),
            is_hidden: tag.is_hidden,
            is_dirty: false,
        }
    }
}

/// Trim surrounding whitespace; `None` when nothing is left.
pub fn normalize_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
