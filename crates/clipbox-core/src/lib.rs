//! Clipbox Core - transactional persistence for a personal clip library
//!
//! Clips, tags and albums live in three stores that cannot share a real
//! transaction: a metadata store, a lightweight reference tag store and a
//! blob store holding image bytes. This crate keeps them consistent:
//!
//! - **Commands**: [`CommandCoordinator`] serializes every mutation and runs
//!   it as one unit of work across the stores it touches
//! - **Migration**: [`MigrationCoordinator`] moves dirty tags and staged
//!   clips from the staging area into the permanent stores
//! - **Stores**: the [`MetadataStore`], [`ReferenceStore`] and [`BlobStore`]
//!   contracts, with SQLite and filesystem implementations
//! - **Config**: TOML configuration for store locations and migration switches

pub mod blob_store;
pub mod command;
pub mod config;
pub mod error;
pub mod migration;
pub mod queue;
pub mod store;
pub mod transaction;

#[cfg(feature = "sqlite")]
pub mod library;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use blob_store::FileBlobStore;
pub use command::{CommandCoordinator, CommandStores};
pub use config::{ClipboxConfig, StorageConfig};
pub use error::{BlobError, ConfigError, StorageError};
pub use migration::{
    MigrationCoordinator, MigrationObserver, MigrationOptions, MigrationOutcome, MigrationReport,
    MigrationStores,
};
pub use queue::SerialQueue;
pub use store::*;
pub use transaction::{Finish, Participant, TransactionScope};

#[cfg(feature = "sqlite")]
pub use library::Clipbox;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteMetadataStore, SqliteReferenceStore};
