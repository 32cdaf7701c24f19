//! Serialized mutation API
//!
//! Every create/update/delete of a clip, tag or album goes through
//! [`CommandCoordinator`]. Each call runs as one unit of work on the
//! coordinator's serial queue:
//!
//! 1. validate input without touching any store
//! 2. open the metadata transaction (plus the reference or blob participant
//!    when the command needs one)
//! 3. apply the metadata mutation; on failure cancel everything and return it
//! 4. apply blob writes best-effort (logged, never fatal)
//! 5. commit; a failed commit is reported as `Internal`
//!
//! Blob releases caused by deletions, and images left unused when a clip is
//! overwritten, happen only after the metadata commit. Saves are not rolled
//! back: a failed overwrite keeps the old record and the files only it uses,
//! but files sharing a name with the new payloads already hold the new bytes.

use std::collections::HashSet;
use std::sync::Arc;

use clipbox_domain::{
    normalize_name, Album, AlbumId, ClipId, ClipItemId, ClipRecipe, ImagePayload, ReferenceTag,
    Tag, TagId,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::StorageError;
use crate::queue::SerialQueue;
use crate::store::{BlobStore, ClipCreationOptions, MetadataStore, ReferenceStore};
use crate::transaction::{Participant, TransactionScope};

/// Stores the command coordinator writes to.
#[derive(Clone)]
pub struct CommandStores {
    pub metadata: Arc<dyn MetadataStore>,
    pub references: Arc<dyn ReferenceStore>,
    pub images: Arc<dyn BlobStore>,
}

/// Single serialized entry point for every mutating command.
pub struct CommandCoordinator {
    service: Arc<CommandService>,
    queue: SerialQueue,
}

impl CommandCoordinator {
    /// Create a coordinator with its own serial queue.
    pub fn new(stores: CommandStores) -> Result<Self, StorageError> {
        let queue = SerialQueue::spawn("clipbox-commands")?;
        Ok(Self::with_queue(stores, queue))
    }

    /// Create a coordinator that shares `queue` with other coordinators.
    pub fn with_queue(stores: CommandStores, queue: SerialQueue) -> Self {
        Self {
            service: Arc::new(CommandService { stores }),
            queue,
        }
    }

    fn execute<T, F>(&self, command: F) -> Result<T, StorageError>
    where
        F: FnOnce(&CommandService) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        self.queue.run(move || command(&service))?
    }

    // ==================== Clips ====================

    /// Create a clip and store its images.
    ///
    /// `payloads` must hold one entry per distinct file name and cover every
    /// item's image; otherwise `InvalidParameter` is returned before any
    /// store is touched.
    pub fn create_clip(
        &self,
        recipe: ClipRecipe,
        payloads: Vec<ImagePayload>,
        options: ClipCreationOptions,
    ) -> Result<ClipId, StorageError> {
        self.execute(move |service| service.create_clip(&recipe, &payloads, options))
    }

    pub fn update_clips_hidden(&self, ids: &[ClipId], is_hidden: bool) -> Result<(), StorageError> {
        let ids = ids.to_vec();
        self.execute(move |service| {
            service.in_metadata_transaction("update_clips_hidden", |metadata| {
                metadata.update_clips_hidden(&ids, is_hidden).map(drop)
            })
        })
    }

    pub fn add_tags_to_clips(
        &self,
        tag_ids: &[TagId],
        clip_ids: &[ClipId],
    ) -> Result<(), StorageError> {
        let (tag_ids, clip_ids) = (tag_ids.to_vec(), clip_ids.to_vec());
        self.execute(move |service| {
            service.in_metadata_transaction("add_tags_to_clips", |metadata| {
                metadata.add_tags_to_clips(&tag_ids, &clip_ids).map(drop)
            })
        })
    }

    pub fn remove_tags_from_clips(
        &self,
        tag_ids: &[TagId],
        clip_ids: &[ClipId],
    ) -> Result<(), StorageError> {
        let (tag_ids, clip_ids) = (tag_ids.to_vec(), clip_ids.to_vec());
        self.execute(move |service| {
            service.in_metadata_transaction("remove_tags_from_clips", |metadata| {
                metadata.remove_tags_from_clips(&tag_ids, &clip_ids).map(drop)
            })
        })
    }

    pub fn replace_tags_of_clips(
        &self,
        tag_ids: &[TagId],
        clip_ids: &[ClipId],
    ) -> Result<(), StorageError> {
        let (tag_ids, clip_ids) = (tag_ids.to_vec(), clip_ids.to_vec());
        self.execute(move |service| {
            service.in_metadata_transaction("replace_tags_of_clips", |metadata| {
                metadata.replace_tags_of_clips(&tag_ids, &clip_ids).map(drop)
            })
        })
    }

    pub fn update_clip_url(&self, id: ClipId, url: Option<Url>) -> Result<(), StorageError> {
        self.execute(move |service| {
            service.in_metadata_transaction("update_clip_url", |metadata| {
                metadata.update_clip_url(id, url).map(drop)
            })
        })
    }

    pub fn reorder_clip_items(
        &self,
        clip_id: ClipId,
        item_ids: &[ClipItemId],
    ) -> Result<(), StorageError> {
        let item_ids = item_ids.to_vec();
        self.execute(move |service| {
            service.in_metadata_transaction("reorder_clip_items", |metadata| {
                metadata.reorder_clip_items(clip_id, &item_ids).map(drop)
            })
        })
    }

    /// Delete clips, then release their images.
    pub fn delete_clips(&self, ids: &[ClipId]) -> Result<(), StorageError> {
        let ids = ids.to_vec();
        self.execute(move |service| service.delete_clips(&ids))
    }

    /// Delete one item of a clip, then release its image.
    pub fn delete_clip_item(&self, id: ClipItemId) -> Result<(), StorageError> {
        self.execute(move |service| service.delete_clip_item(id))
    }

    // ==================== Tags ====================

    /// Create a tag in the permanent store and mirror it into the reference
    /// store. Returns the new tag's id.
    pub fn create_tag(&self, name: &str) -> Result<TagId, StorageError> {
        let name = name.to_string();
        self.execute(move |service| service.create_tag(&name))
    }

    pub fn rename_tag(&self, id: TagId, name: &str) -> Result<(), StorageError> {
        let name = name.to_string();
        self.execute(move |service| service.rename_tag(id, &name))
    }

    pub fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<(), StorageError> {
        self.execute(move |service| service.update_tag_hidden(id, is_hidden))
    }

    pub fn delete_tags(&self, ids: &[TagId]) -> Result<(), StorageError> {
        let ids = ids.to_vec();
        self.execute(move |service| service.delete_tags(&ids))
    }

    // ==================== Albums ====================

    /// Create an empty album. Returns the new album's id.
    pub fn create_album(&self, title: &str) -> Result<AlbumId, StorageError> {
        let title = title.to_string();
        self.execute(move |service| service.create_album(&title))
    }

    pub fn rename_album(&self, id: AlbumId, title: &str) -> Result<(), StorageError> {
        let title = title.to_string();
        self.execute(move |service| {
            let title = required_name(&title, "album title")?;
            service.in_metadata_transaction("rename_album", |metadata| {
                metadata.update_album_title(id, &title).map(drop)
            })
        })
    }

    pub fn update_album_hidden(&self, id: AlbumId, is_hidden: bool) -> Result<(), StorageError> {
        self.execute(move |service| {
            service.in_metadata_transaction("update_album_hidden", |metadata| {
                metadata.update_album_hidden(id, is_hidden).map(drop)
            })
        })
    }

    pub fn add_clips_to_album(
        &self,
        album_id: AlbumId,
        clip_ids: &[ClipId],
    ) -> Result<(), StorageError> {
        let clip_ids = clip_ids.to_vec();
        self.execute(move |service| {
            service.in_metadata_transaction("add_clips_to_album", |metadata| {
                metadata.add_clips_to_album(album_id, &clip_ids).map(drop)
            })
        })
    }

    pub fn remove_clips_from_album(
        &self,
        album_id: AlbumId,
        clip_ids: &[ClipId],
    ) -> Result<(), StorageError> {
        let clip_ids = clip_ids.to_vec();
        self.execute(move |service| {
            service.in_metadata_transaction("remove_clips_from_album", |metadata| {
                metadata.remove_clips_from_album(album_id, &clip_ids).map(drop)
            })
        })
    }

    pub fn reorder_clips_in_album(
        &self,
        album_id: AlbumId,
        clip_ids: &[ClipId],
    ) -> Result<(), StorageError> {
        let clip_ids = clip_ids.to_vec();
        self.execute(move |service| {
            service.in_metadata_transaction("reorder_clips_in_album", |metadata| {
                metadata.reorder_clips_in_album(album_id, &clip_ids).map(drop)
            })
        })
    }

    pub fn reorder_albums(&self, album_ids: &[AlbumId]) -> Result<(), StorageError> {
        let album_ids = album_ids.to_vec();
        self.execute(move |service| {
            service.in_metadata_transaction("reorder_albums", |metadata| {
                metadata.reorder_albums(&album_ids)
            })
        })
    }

    pub fn delete_album(&self, id: AlbumId) -> Result<(), StorageError> {
        self.execute(move |service| {
            service.in_metadata_transaction("delete_album", |metadata| {
                metadata.delete_album(id).map(drop)
            })
        })
    }
}

/// The work behind each command; always runs on the coordinator's queue.
struct CommandService {
    stores: CommandStores,
}

impl CommandService {
    /// Run `body` inside a scope over `participants`, committing on success
    /// and cancelling everything on failure.
    fn transact<T>(
        &self,
        operation: &'static str,
        participants: Vec<Participant<'_>>,
        body: impl FnOnce() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let scope = TransactionScope::begin(participants)?;
        match body() {
            Ok(value) => {
                scope.commit_all().map_err(|err| {
                    error!(operation, error = %err, "commit failed");
                    StorageError::Internal(format!("{}: commit failed: {}", operation, err))
                })?;
                Ok(value)
            }
            Err(err) => {
                warn!(operation, error = %err, "command failed, rolling back");
                scope.abort_all();
                Err(err)
            }
        }
    }

    fn in_metadata_transaction<T>(
        &self,
        operation: &'static str,
        body: impl FnOnce(&dyn MetadataStore) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let metadata = self.stores.metadata.as_ref();
        self.transact(
            operation,
            vec![Participant::commit("metadata", &self.stores.metadata)],
            || body(metadata),
        )
    }

    fn create_clip(
        &self,
        recipe: &ClipRecipe,
        payloads: &[ImagePayload],
        options: ClipCreationOptions,
    ) -> Result<ClipId, StorageError> {
        recipe.validate(payloads)?;

        let participants = vec![
            Participant::commit("metadata", &self.stores.metadata),
            Participant::discard("images", &self.stores.images),
        ];
        let creation = self.transact("create_clip", participants, || {
            let creation = self.stores.metadata.create_clip(recipe, options)?;
            for payload in payloads {
                if let Err(err) = self
                    .stores
                    .images
                    .save(&payload.data, &payload.file_name, recipe.id)
                {
                    warn!(
                        clip_id = %recipe.id,
                        file_name = %payload.file_name,
                        error = %err,
                        "failed to save image"
                    );
                }
            }
            Ok(creation)
        })?;

        // Images of an overwritten version that the new one no longer uses.
        if let Some(replaced) = &creation.replaced {
            let kept: HashSet<&str> = payloads.iter().map(|p| p.file_name.as_str()).collect();
            for item in &replaced.items {
                if !kept.contains(item.image_file_name.as_str()) {
                    self.release_image(&item.image_file_name, replaced.id);
                }
            }
        }

        let clip_id = creation.clip.id;
        info!(%clip_id, items = recipe.items.len(), replaced = creation.replaced.is_some(), "clip created");
        Ok(clip_id)
    }

    fn delete_clips(&self, ids: &[ClipId]) -> Result<(), StorageError> {
        let deleted =
            self.in_metadata_transaction("delete_clips", |metadata| metadata.delete_clips(ids))?;

        for clip in &deleted {
            for item in &clip.items {
                self.release_image(&item.image_file_name, clip.id);
            }
        }
        debug!(count = deleted.len(), "clips deleted");
        Ok(())
    }

    fn delete_clip_item(&self, id: ClipItemId) -> Result<(), StorageError> {
        let item = self.in_metadata_transaction("delete_clip_item", |metadata| {
            metadata.delete_clip_item(id)
        })?;
        self.release_image(&item.image_file_name, item.clip_id);
        Ok(())
    }

    fn create_tag(&self, name: &str) -> Result<TagId, StorageError> {
        let name = required_name(name, "tag name")?;
        let tag = Tag::new(&name);

        let participants = vec![
            Participant::commit("metadata", &self.stores.metadata),
            Participant::commit("references", &self.stores.references),
        ];
        self.transact("create_tag", participants, || {
            let created = self.stores.metadata.create_tag(&tag)?;
            self.stores
                .references
                .create_tag(&ReferenceTag::from(&created))?;
            Ok(created.id)
        })
    }

    fn rename_tag(&self, id: TagId, name: &str) -> Result<(), StorageError> {
        let name = required_name(name, "tag name")?;

        let participants = vec![
            Participant::commit("metadata", &self.stores.metadata),
            Participant::commit("references", &self.stores.references),
        ];
        self.transact("rename_tag", participants, || {
            self.stores.metadata.update_tag_name(id, &name)?;
            tolerate_unmirrored(id, self.stores.references.update_tag_name(id, &name))
        })
    }

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<(), StorageError> {
        let participants = vec![
            Participant::commit("metadata", &self.stores.metadata),
            Participant::commit("references", &self.stores.references),
        ];
        self.transact("update_tag_hidden", participants, || {
            self.stores.metadata.update_tag_hidden(id, is_hidden)?;
            tolerate_unmirrored(id, self.stores.references.update_tag_hidden(id, is_hidden))
        })
    }

    fn delete_tags(&self, ids: &[TagId]) -> Result<(), StorageError> {
        let participants = vec![
            Participant::commit("metadata", &self.stores.metadata),
            Participant::commit("references", &self.stores.references),
        ];
        self.transact("delete_tags", participants, || {
            self.stores.metadata.delete_tags(ids)?;
            match self.stores.references.delete_tags(ids) {
                Err(StorageError::NotFound(detail)) => {
                    debug!(%detail, "some deleted tags had no reference mirror");
                    Ok(())
                }
                other => other,
            }
        })
    }

    fn create_album(&self, title: &str) -> Result<AlbumId, StorageError> {
        let title = required_name(title, "album title")?;
        let album = Album::new(&title);
        self.in_metadata_transaction("create_album", |metadata| {
            metadata.create_album(&album).map(|created| created.id)
        })
    }

    /// Best-effort removal of one image; the metadata is authoritative.
    fn release_image(&self, file_name: &str, owner: ClipId) {
        if let Err(err) = self.stores.images.delete(file_name, owner) {
            warn!(clip_id = %owner, %file_name, error = %err, "failed to delete image");
        }
    }
}

fn required_name(name: &str, what: &str) -> Result<String, StorageError> {
    normalize_name(name).ok_or_else(|| StorageError::InvalidParameter(format!("{} is empty", what)))
}

/// A tag created before the reference store existed has no mirror to update.
fn tolerate_unmirrored(id: TagId, result: Result<(), StorageError>) -> Result<(), StorageError> {
    match result {
        Err(StorageError::NotFound(_)) => {
            debug!(tag_id = %id, "tag has no reference mirror");
            Ok(())
        }
        other => other,
    }
}
