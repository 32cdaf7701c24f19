use std::sync::Arc;

use clipbox_domain::{
    Album, AlbumId, Clip, ClipId, ClipItem, ClipItemId, ClipRecipe, ReferenceTag, Tag, TagId,
};
use url::Url;

use crate::error::{BlobError, StorageError};

/// Begin/commit/cancel capability shared by every store role.
///
/// `cancel_transaction_if_needed` never fails and is safe to call when no
/// transaction is open. The blob store implements this triple only so that
/// coordinators can treat all participants alike; it cannot roll back writes.
pub trait Transactional: Send + Sync {
    fn begin_transaction(&self) -> Result<(), StorageError>;

    fn commit_transaction(&self) -> Result<(), StorageError>;

    fn cancel_transaction_if_needed(&self);
}

impl<T: Transactional + ?Sized> Transactional for Arc<T> {
    fn begin_transaction(&self) -> Result<(), StorageError> {
        (**self).begin_transaction()
    }

    fn commit_transaction(&self) -> Result<(), StorageError> {
        (**self).commit_transaction()
    }

    fn cancel_transaction_if_needed(&self) {
        (**self).cancel_transaction_if_needed()
    }
}

/// Switches for [`MetadataStore::create_clip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClipCreationOptions {
    /// Create recipe tags the store does not know yet instead of dropping them.
    pub allow_tag_creation: bool,
    /// Replace a clip that already has the recipe's id instead of failing
    /// with `Duplicated`.
    pub overwrite: bool,
}

/// Result of a successful clip creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipCreation {
    pub clip: Clip,
    /// The previous record under the same id, when `overwrite` replaced one.
    pub replaced: Option<Clip>,
}

/// Structured store for clips, clip items, tags and albums.
///
/// The same contract serves the permanent store and the staging store.
/// Every mutation must run inside an open transaction.
pub trait MetadataStore: Transactional {
    // ==================== Reads ====================

    fn read_all_clips(&self) -> Result<Vec<Clip>, StorageError>;

    fn read_clip(&self, id: ClipId) -> Result<Clip, StorageError>;

    fn read_all_tags(&self) -> Result<Vec<Tag>, StorageError>;

    fn read_album(&self, id: AlbumId) -> Result<Album, StorageError>;

    // ==================== Clips ====================

    fn create_clip(
        &self,
        recipe: &ClipRecipe,
        options: ClipCreationOptions,
    ) -> Result<ClipCreation, StorageError>;

    fn update_clips_hidden(&self, ids: &[ClipId], is_hidden: bool)
        -> Result<Vec<Clip>, StorageError>;

    fn add_tags_to_clips(
        &self,
        tag_ids: &[TagId],
        clip_ids: &[ClipId],
    ) -> Result<Vec<Clip>, StorageError>;

    fn remove_tags_from_clips(
        &self,
        tag_ids: &[TagId],
        clip_ids: &[ClipId],
    ) -> Result<Vec<Clip>, StorageError>;

    fn replace_tags_of_clips(
        &self,
        tag_ids: &[TagId],
        clip_ids: &[ClipId],
    ) -> Result<Vec<Clip>, StorageError>;

    fn update_clip_url(&self, id: ClipId, url: Option<Url>) -> Result<Clip, StorageError>;

    /// `item_ids` must be exactly the clip's items, in their new order.
    fn reorder_clip_items(
        &self,
        clip_id: ClipId,
        item_ids: &[ClipItemId],
    ) -> Result<Clip, StorageError>;

    /// Returns the deleted clips so their blobs can be released.
    fn delete_clips(&self, ids: &[ClipId]) -> Result<Vec<Clip>, StorageError>;

    fn delete_clip_item(&self, id: ClipItemId) -> Result<ClipItem, StorageError>;

    fn delete_all_clips(&self) -> Result<Vec<Clip>, StorageError>;

    // ==================== Tags ====================

    /// Fails with `Duplicated` when the id or the name is already taken.
    fn create_tag(&self, tag: &Tag) -> Result<Tag, StorageError>;

    fn update_tag_name(&self, id: TagId, name: &str) -> Result<Tag, StorageError>;

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<Tag, StorageError>;

    fn delete_tags(&self, ids: &[TagId]) -> Result<Vec<Tag>, StorageError>;

    // ==================== Albums ====================

    /// Fails with `Duplicated` when the id or the title is already taken.
    fn create_album(&self, album: &Album) -> Result<Album, StorageError>;

    fn update_album_title(&self, id: AlbumId, title: &str) -> Result<Album, StorageError>;

    fn update_album_hidden(&self, id: AlbumId, is_hidden: bool) -> Result<Album, StorageError>;

    fn add_clips_to_album(
        &self,
        album_id: AlbumId,
        clip_ids: &[ClipId],
    ) -> Result<Album, StorageError>;

    fn remove_clips_from_album(
        &self,
        album_id: AlbumId,
        clip_ids: &[ClipId],
    ) -> Result<Album, StorageError>;

    /// `clip_ids` must be exactly the album's members, in their new order.
    fn reorder_clips_in_album(
        &self,
        album_id: AlbumId,
        clip_ids: &[ClipId],
    ) -> Result<Album, StorageError>;

    /// `album_ids` must be exactly every album, in the new order.
    fn reorder_albums(&self, album_ids: &[AlbumId]) -> Result<(), StorageError>;

    fn delete_album(&self, id: AlbumId) -> Result<Album, StorageError>;
}

/// Lightweight tag store shared with the capture side of the app.
pub trait ReferenceStore: Transactional {
    fn read_all_tags(&self) -> Result<Vec<ReferenceTag>, StorageError>;

    fn read_all_dirty_tags(&self) -> Result<Vec<ReferenceTag>, StorageError>;

    fn create_tag(&self, tag: &ReferenceTag) -> Result<(), StorageError>;

    fn update_tag_name(&self, id: TagId, name: &str) -> Result<(), StorageError>;

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<(), StorageError>;

    fn update_tags(&self, ids: &[TagId], to_dirty: bool) -> Result<(), StorageError>;

    fn delete_tags(&self, ids: &[TagId]) -> Result<(), StorageError>;
}

/// Content storage for image bytes, namespaced by owning clip.
///
/// Individual writes are atomic; nothing is coordinated with other stores.
pub trait BlobStore: Transactional {
    fn save(&self, data: &[u8], file_name: &str, owner: ClipId) -> Result<(), BlobError>;

    fn read(&self, file_name: &str, owner: ClipId) -> Result<Option<Vec<u8>>, BlobError>;

    fn delete(&self, file_name: &str, owner: ClipId) -> Result<(), BlobError>;

    fn delete_all_in(&self, owner: ClipId) -> Result<(), BlobError>;

    fn delete_all(&self) -> Result<(), BlobError>;

    fn image_file_exists(&self, file_name: &str, owner: ClipId) -> bool;
}
