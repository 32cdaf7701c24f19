//! On-disk wiring of the stores and both coordinators.

use std::fs;
use std::sync::Arc;

use tracing::info;

use crate::blob_store::FileBlobStore;
use crate::command::{CommandCoordinator, CommandStores};
use crate::config::ClipboxConfig;
use crate::error::{BlobError, StorageError};
use crate::migration::{MigrationCoordinator, MigrationStores};
use crate::queue::SerialQueue;
use crate::sqlite::{SqliteMetadataStore, SqliteReferenceStore};
use crate::store::{BlobStore, MetadataStore, ReferenceStore};

/// A clip library opened from configuration.
///
/// Both coordinators share one serial queue, so a migration never
/// interleaves with a command.
pub struct Clipbox {
    pub commands: CommandCoordinator,
    pub migration: MigrationCoordinator,
}

impl Clipbox {
    pub fn open(config: &ClipboxConfig) -> Result<Self, StorageError> {
        config
            .validate()
            .map_err(|e| StorageError::InvalidParameter(e.to_string()))?;
        let storage = &config.storage;
        fs::create_dir_all(&storage.root).map_err(|e| {
            StorageError::Storage(format!("create {}: {}", storage.root.display(), e))
        })?;

        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::open(&storage.metadata_path())?);
        let staging: Arc<dyn MetadataStore> =
            Arc::new(SqliteMetadataStore::open(&storage.staging_path())?);
        let references: Arc<dyn ReferenceStore> =
            Arc::new(SqliteReferenceStore::open(&storage.reference_path())?);
        let images: Arc<dyn BlobStore> =
            Arc::new(FileBlobStore::open(storage.images_path()).map_err(blob_to_storage)?);
        let staging_images: Arc<dyn BlobStore> = Arc::new(
            FileBlobStore::open(storage.staging_images_path()).map_err(blob_to_storage)?,
        );

        let queue = SerialQueue::spawn("clipbox")?;
        let commands = CommandCoordinator::with_queue(
            CommandStores {
                metadata: Arc::clone(&metadata),
                references: Arc::clone(&references),
                images: Arc::clone(&images),
            },
            queue.clone(),
        );
        let migration = MigrationCoordinator::with_queue(
            MigrationStores {
                metadata,
                staging,
                references,
                images,
                staging_images,
            },
            config.migration,
            queue,
        );

        info!(root = %storage.root.display(), "clip library opened");
        Ok(Self {
            commands,
            migration,
        })
    }
}

fn blob_to_storage(err: BlobError) -> StorageError {
    StorageError::Storage(err.to_string())
}
