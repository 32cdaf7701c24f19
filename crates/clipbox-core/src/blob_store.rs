//! Filesystem blob store
//!
//! Images live at `<root>/<clip id>/<file name>`. Writes go to a temporary
//! sibling first and are renamed into place, so a reader never observes a
//! partially written image.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clipbox_domain::ClipId;
use tracing::debug;

use crate::error::{BlobError, StorageError};
use crate::store::{BlobStore, Transactional};

const TEMP_SUFFIX: &str = ".partial";

/// Directory-backed implementation of [`BlobStore`].
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open (or create) a blob store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn clip_dir(&self, owner: ClipId) -> PathBuf {
        self.root.join(owner.to_string())
    }

    fn image_path(&self, file_name: &str, owner: ClipId) -> Result<PathBuf, BlobError> {
        validate_file_name(file_name)?;
        Ok(self.clip_dir(owner).join(file_name))
    }
}

/// File names must be a single, plain path component.
fn validate_file_name(file_name: &str) -> Result<(), BlobError> {
    let invalid = file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0'])
        || file_name.ends_with(TEMP_SUFFIX);
    if invalid {
        return Err(BlobError::InvalidFileName(file_name.to_string()));
    }
    Ok(())
}

fn remove_if_present(result: io::Result<()>) -> Result<(), BlobError> {
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other.map_err(BlobError::from),
    }
}

impl Transactional for FileBlobStore {
    // File writes are applied immediately; there is nothing to begin,
    // commit or roll back.
    fn begin_transaction(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn commit_transaction(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn cancel_transaction_if_needed(&self) {}
}

impl BlobStore for FileBlobStore {
    fn save(&self, data: &[u8], file_name: &str, owner: ClipId) -> Result<(), BlobError> {
        let path = self.image_path(file_name, owner)?;
        fs::create_dir_all(self.clip_dir(owner))?;

        let temp = path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));
        let written = fs::File::create(&temp).and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });
        if let Err(err) = written.and_then(|_| fs::rename(&temp, &path)) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }

        debug!(clip_id = %owner, %file_name, bytes = data.len(), "image saved");
        Ok(())
    }

    fn read(&self, file_name: &str, owner: ClipId) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.image_path(file_name, owner)?;
        match fs::read(path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, file_name: &str, owner: ClipId) -> Result<(), BlobError> {
        let path = self.image_path(file_name, owner)?;
        remove_if_present(fs::remove_file(path))?;

        // Drop the clip directory once it is empty; a non-empty one stays.
        let _ = fs::remove_dir(self.clip_dir(owner));
        Ok(())
    }

    fn delete_all_in(&self, owner: ClipId) -> Result<(), BlobError> {
        remove_if_present(fs::remove_dir_all(self.clip_dir(owner)))
    }

    fn delete_all(&self) -> Result<(), BlobError> {
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                remove_if_present(fs::remove_dir_all(&path))?;
            } else {
                remove_if_present(fs::remove_file(&path))?;
            }
        }
        Ok(())
    }

    fn image_file_exists(&self, file_name: &str, owner: ClipId) -> bool {
        self.image_path(file_name, owner)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }
}
