//! In-memory stores with snapshot transactions, fault injection and a
//! shared call journal.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use clipbox_core::{
    BlobError, BlobStore, ClipCreation, ClipCreationOptions, MetadataStore, ReferenceStore,
    StorageError, Transactional,
};
use clipbox_domain::{
    Album, AlbumId, Clip, ClipId, ClipItem, ClipItemId, ClipRecipe, ReferenceTag, Tag, TagId,
};
use url::Url;

/// Ordered record of store calls across every store sharing it.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Errors to return from named operations until cleared.
#[derive(Default)]
struct Faults {
    ops: HashMap<&'static str, StorageError>,
    clips: HashSet<ClipId>,
    panics: HashSet<&'static str>,
}

/// Committed state plus the working copy of an open transaction.
struct Versioned<T: Clone> {
    committed: T,
    working: Option<T>,
}

impl<T: Clone> Versioned<T> {
    fn new(value: T) -> Self {
        Self {
            committed: value,
            working: None,
        }
    }

    fn current(&self) -> &T {
        self.working.as_ref().unwrap_or(&self.committed)
    }

    fn writable(&mut self, label: &str) -> Result<&mut T, StorageError> {
        self.working
            .as_mut()
            .ok_or_else(|| StorageError::Internal(format!("{}: mutation outside a transaction", label)))
    }

    fn begin(&mut self, label: &str) -> Result<(), StorageError> {
        if self.working.is_some() {
            return Err(StorageError::Internal(format!("{}: transaction already open", label)));
        }
        self.working = Some(self.committed.clone());
        Ok(())
    }

    fn commit(&mut self, label: &str) -> Result<(), StorageError> {
        let working = self
            .working
            .take()
            .ok_or_else(|| StorageError::Internal(format!("{}: no open transaction", label)))?;
        self.committed = working;
        Ok(())
    }

    fn cancel(&mut self) {
        self.working = None;
    }
}

// ==================== Metadata ====================

#[derive(Clone, Default)]
struct MetadataData {
    clips: BTreeMap<ClipId, Clip>,
    tags: BTreeMap<TagId, Tag>,
    albums: BTreeMap<AlbumId, Album>,
}

impl MetadataData {
    /// Clip with live tags and album memberships filled in.
    fn resolve(&self, clip: &Clip) -> Clip {
        let mut clip = clip.clone();
        clip.tags = clip
            .tags
            .iter()
            .filter_map(|tag| self.tags.get(&tag.id).cloned())
            .collect();
        clip.album_ids = self
            .albums
            .values()
            .filter(|album| album.contains(clip.id))
            .map(|album| album.id)
            .collect();
        clip
    }

    fn clip(&self, id: ClipId) -> Result<Clip, StorageError> {
        self.clips
            .get(&id)
            .map(|clip| self.resolve(clip))
            .ok_or_else(|| StorageError::NotFound(format!("clip {}", id)))
    }

    fn clip_mut(&mut self, id: ClipId) -> Result<&mut Clip, StorageError> {
        self.clips
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("clip {}", id)))
    }

    fn tag(&self, id: TagId) -> Result<Tag, StorageError> {
        self.tags
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("tag {}", id)))
    }

    fn album_mut(&mut self, id: AlbumId) -> Result<&mut Album, StorageError> {
        self.albums
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("album {}", id)))
    }
}

fn same_members<T: std::hash::Hash + Eq>(current: &[T], ordered: &[T]) -> bool {
    current.len() == ordered.len()
        && current.iter().collect::<HashSet<_>>() == ordered.iter().collect::<HashSet<_>>()
}

/// Fault-injectable [`MetadataStore`].
pub struct MemoryMetadataStore {
    label: &'static str,
    journal: Journal,
    state: Mutex<Versioned<MetadataData>>,
    faults: Mutex<Faults>,
}

#[allow(dead_code)]
impl MemoryMetadataStore {
    pub fn new(label: &'static str, journal: Journal) -> Self {
        Self {
            label,
            journal,
            state: Mutex::new(Versioned::new(MetadataData::default())),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Make `op` (or `"commit"`) fail with `err` until cleared.
    pub fn fail(&self, op: &'static str, err: StorageError) {
        self.faults.lock().unwrap().ops.insert(op, err);
    }

    /// Make `op` panic until cleared.
    pub fn panic_on(&self, op: &'static str) {
        self.faults.lock().unwrap().panics.insert(op);
    }

    /// Make `create_clip` fail for this clip id.
    pub fn fail_clip(&self, id: ClipId) {
        self.faults.lock().unwrap().clips.insert(id);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    pub fn in_transaction(&self) -> bool {
        self.state.lock().unwrap().working.is_some()
    }

    /// Write `tag` directly, outside any coordinator.
    pub fn seed_tag(&self, tag: &Tag) {
        self.begin_transaction().unwrap();
        self.create_tag(tag).unwrap();
        self.commit_transaction().unwrap();
    }

    /// Write `recipe` directly, outside any coordinator.
    pub fn seed_clip(&self, recipe: &ClipRecipe) -> Clip {
        self.begin_transaction().unwrap();
        let creation = self
            .create_clip(
                recipe,
                ClipCreationOptions {
                    allow_tag_creation: true,
                    overwrite: true,
                },
            )
            .unwrap();
        self.commit_transaction().unwrap();
        creation.clip
    }

    fn call(&self, op: &'static str) -> Result<(), StorageError> {
        self.journal.record(format!("{}:{}", self.label, op));
        let faults = self.faults.lock().unwrap();
        if faults.panics.contains(op) {
            drop(faults);
            panic!("{} panicked in {}", self.label, op);
        }
        match faults.ops.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn read<T>(&self, op: &'static str, body: impl FnOnce(&MetadataData) -> Result<T, StorageError>) -> Result<T, StorageError> {
        self.call(op)?;
        let state = self.state.lock().unwrap();
        body(state.current())
    }

    fn write<T>(
        &self,
        op: &'static str,
        body: impl FnOnce(&mut MetadataData) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.call(op)?;
        let mut state = self.state.lock().unwrap();
        let data = state.writable(self.label)?;
        // Apply to a scratch copy so a failed call leaves no partial change.
        let mut scratch = data.clone();
        let value = body(&mut scratch)?;
        *data = scratch;
        Ok(value)
    }
}

impl Transactional for MemoryMetadataStore {
    fn begin_transaction(&self) -> Result<(), StorageError> {
        self.call("begin")?;
        self.state.lock().unwrap().begin(self.label)
    }

    fn commit_transaction(&self) -> Result<(), StorageError> {
        self.call("commit")?;
        self.state.lock().unwrap().commit(self.label)
    }

    fn cancel_transaction_if_needed(&self) {
        self.journal.record(format!("{}:cancel", self.label));
        self.state.lock().unwrap().cancel();
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn read_all_clips(&self) -> Result<Vec<Clip>, StorageError> {
        self.read("read_all_clips", |data| {
            Ok(data.clips.values().map(|clip| data.resolve(clip)).collect())
        })
    }

    fn read_clip(&self, id: ClipId) -> Result<Clip, StorageError> {
        self.read("read_clip", |data| data.clip(id))
    }

    fn read_all_tags(&self) -> Result<Vec<Tag>, StorageError> {
        self.read("read_all_tags", |data| Ok(data.tags.values().cloned().collect()))
    }

    fn read_album(&self, id: AlbumId) -> Result<Album, StorageError> {
        self.read("read_album", |data| {
            data.albums
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("album {}", id)))
        })
    }

    fn create_clip(
        &self,
        recipe: &ClipRecipe,
        options: ClipCreationOptions,
    ) -> Result<ClipCreation, StorageError> {
        if self.faults.lock().unwrap().clips.contains(&recipe.id) {
            self.journal.record(format!("{}:create_clip", self.label));
            return Err(StorageError::Storage(format!("injected failure for clip {}", recipe.id)));
        }
        self.write("create_clip", |data| {
            let replaced = data.clip(recipe.id).ok();
            if replaced.is_some() && !options.overwrite {
                return Err(StorageError::Duplicated(format!("clip {}", recipe.id)));
            }

            let mut tags = Vec::new();
            for tag in &recipe.tags {
                if data.tags.contains_key(&tag.id) {
                    tags.push(tag.clone());
                } else if options.allow_tag_creation {
                    match data.tags.values().find(|known| known.name == tag.name) {
                        Some(known) => tags.push(known.clone()),
                        None => {
                            data.tags.insert(tag.id, tag.clone());
                            tags.push(tag.clone());
                        }
                    }
                }
            }

            let items = recipe
                .items
                .iter()
                .map(|item| ClipItem {
                    clip_id: recipe.id,
                    ..item.clone()
                })
                .collect();
            let clip = Clip {
                id: recipe.id,
                description: recipe.description.clone(),
                url: recipe.url.clone(),
                items,
                tags,
                album_ids: vec![],
                is_hidden: recipe.is_hidden,
                registered_date: recipe.registered_date,
                updated_date: recipe.updated_date,
            };
            data.clips.insert(clip.id, clip);
            Ok(ClipCreation {
                clip: data.clip(recipe.id)?,
                replaced,
            })
        })
    }

    fn update_clips_hidden(&self, ids: &[ClipId], is_hidden: bool) -> Result<Vec<Clip>, StorageError> {
        self.write("update_clips_hidden", |data| {
            ids.iter()
                .map(|id| {
                    data.clip_mut(*id)?.is_hidden = is_hidden;
                    data.clip(*id)
                })
                .collect()
        })
    }

    fn add_tags_to_clips(&self, tag_ids: &[TagId], clip_ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        self.write("add_tags_to_clips", |data| {
            let tags = tag_ids
                .iter()
                .map(|id| data.tag(*id))
                .collect::<Result<Vec<_>, _>>()?;
            clip_ids
                .iter()
                .map(|id| {
                    let clip = data.clip_mut(*id)?;
                    for tag in &tags {
                        if !clip.tags.iter().any(|t| t.id == tag.id) {
                            clip.tags.push(tag.clone());
                        }
                    }
                    data.clip(*id)
                })
                .collect()
        })
    }

    fn remove_tags_from_clips(&self, tag_ids: &[TagId], clip_ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        self.write("remove_tags_from_clips", |data| {
            clip_ids
                .iter()
                .map(|id| {
                    data.clip_mut(*id)?.tags.retain(|t| !tag_ids.contains(&t.id));
                    data.clip(*id)
                })
                .collect()
        })
    }

    fn replace_tags_of_clips(&self, tag_ids: &[TagId], clip_ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        self.write("replace_tags_of_clips", |data| {
            let tags = tag_ids
                .iter()
                .map(|id| data.tag(*id))
                .collect::<Result<Vec<_>, _>>()?;
            clip_ids
                .iter()
                .map(|id| {
                    data.clip_mut(*id)?.tags = tags.clone();
                    data.clip(*id)
                })
                .collect()
        })
    }

    fn update_clip_url(&self, id: ClipId, url: Option<Url>) -> Result<Clip, StorageError> {
        self.write("update_clip_url", |data| {
            data.clip_mut(id)?.url = url;
            data.clip(id)
        })
    }

    fn reorder_clip_items(&self, clip_id: ClipId, item_ids: &[ClipItemId]) -> Result<Clip, StorageError> {
        self.write("reorder_clip_items", |data| {
            let clip = data.clip_mut(clip_id)?;
            let current: Vec<ClipItemId> = clip.items.iter().map(|item| item.id).collect();
            if !same_members(&current, item_ids) {
                return Err(StorageError::InvalidParameter("item order".into()));
            }
            clip.items.sort_by_key(|item| item_ids.iter().position(|id| *id == item.id));
            for (index, item) in clip.items.iter_mut().enumerate() {
                item.index = index as u32;
            }
            data.clip(clip_id)
        })
    }

    fn delete_clips(&self, ids: &[ClipId]) -> Result<Vec<Clip>, StorageError> {
        self.write("delete_clips", |data| {
            let deleted = ids
                .iter()
                .map(|id| data.clip(*id))
                .collect::<Result<Vec<_>, _>>()?;
            for id in ids {
                data.clips.remove(id);
                for album in data.albums.values_mut() {
                    album.clip_ids.retain(|member| member != id);
                }
            }
            Ok(deleted)
        })
    }

    fn delete_clip_item(&self, id: ClipItemId) -> Result<ClipItem, StorageError> {
        self.write("delete_clip_item", |data| {
            let clip = data
                .clips
                .values_mut()
                .find(|clip| clip.item(id).is_some())
                .ok_or_else(|| StorageError::NotFound(format!("clip item {}", id)))?;
            let position = clip
                .items
                .iter()
                .position(|item| item.id == id)
                .ok_or_else(|| StorageError::NotFound(format!("clip item {}", id)))?;
            let removed = clip.items.remove(position);
            for (index, item) in clip.items.iter_mut().enumerate() {
                item.index = index as u32;
            }
            Ok(removed)
        })
    }

    fn delete_all_clips(&self) -> Result<Vec<Clip>, StorageError> {
        self.write("delete_all_clips", |data| {
            let deleted = data.clips.values().map(|clip| data.resolve(clip)).collect();
            data.clips.clear();
            for album in data.albums.values_mut() {
                album.clip_ids.clear();
            }
            Ok(deleted)
        })
    }

    fn create_tag(&self, tag: &Tag) -> Result<Tag, StorageError> {
        self.write("create_tag", |data| {
            if data.tags.contains_key(&tag.id) || data.tags.values().any(|t| t.name == tag.name) {
                return Err(StorageError::Duplicated(format!("tag {}", tag.name)));
            }
            data.tags.insert(tag.id, tag.clone());
            Ok(tag.clone())
        })
    }

    fn update_tag_name(&self, id: TagId, name: &str) -> Result<Tag, StorageError> {
        self.write("update_tag_name", |data| {
            if data.tags.values().any(|t| t.name == name && t.id != id) {
                return Err(StorageError::Duplicated(format!("tag {}", name)));
            }
            let tag = data
                .tags
                .get_mut(&id)
                .ok_or_else(|| StorageError::NotFound(format!("tag {}", id)))?;
            tag.name = name.to_string();
            Ok(tag.clone())
        })
    }

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<Tag, StorageError> {
        self.write("update_tag_hidden", |data| {
            let tag = data
                .tags
                .get_mut(&id)
                .ok_or_else(|| StorageError::NotFound(format!("tag {}", id)))?;
            tag.is_hidden = is_hidden;
            Ok(tag.clone())
        })
    }

    fn delete_tags(&self, ids: &[TagId]) -> Result<Vec<Tag>, StorageError> {
        self.write("delete_tags", |data| {
            let deleted = ids
                .iter()
                .map(|id| data.tag(*id))
                .collect::<Result<Vec<_>, _>>()?;
            for id in ids {
                data.tags.remove(id);
                for clip in data.clips.values_mut() {
                    clip.tags.retain(|t| t.id != *id);
                }
            }
            Ok(deleted)
        })
    }

    fn create_album(&self, album: &Album) -> Result<Album, StorageError> {
        self.write("create_album", |data| {
            if data.albums.contains_key(&album.id)
                || data.albums.values().any(|a| a.title == album.title)
            {
                return Err(StorageError::Duplicated(format!("album {}", album.title)));
            }
            let mut stored = album.clone();
            stored.index = data.albums.len() as u32;
            data.albums.insert(stored.id, stored.clone());
            Ok(stored)
        })
    }

    fn update_album_title(&self, id: AlbumId, title: &str) -> Result<Album, StorageError> {
        self.write("update_album_title", |data| {
            if data.albums.values().any(|a| a.title == title && a.id != id) {
                return Err(StorageError::Duplicated(format!("album {}", title)));
            }
            let album = data.album_mut(id)?;
            album.title = title.to_string();
            Ok(album.clone())
        })
    }

    fn update_album_hidden(&self, id: AlbumId, is_hidden: bool) -> Result<Album, StorageError> {
        self.write("update_album_hidden", |data| {
            let album = data.album_mut(id)?;
            album.is_hidden = is_hidden;
            Ok(album.clone())
        })
    }

    fn add_clips_to_album(&self, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<Album, StorageError> {
        self.write("add_clips_to_album", |data| {
            for id in clip_ids {
                data.clip(*id)?;
            }
            let album = data.album_mut(album_id)?;
            for id in clip_ids {
                if !album.contains(*id) {
                    album.clip_ids.push(*id);
                }
            }
            Ok(album.clone())
        })
    }

    fn remove_clips_from_album(&self, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<Album, StorageError> {
        self.write("remove_clips_from_album", |data| {
            let album = data.album_mut(album_id)?;
            album.clip_ids.retain(|id| !clip_ids.contains(id));
            Ok(album.clone())
        })
    }

    fn reorder_clips_in_album(&self, album_id: AlbumId, clip_ids: &[ClipId]) -> Result<Album, StorageError> {
        self.write("reorder_clips_in_album", |data| {
            let album = data.album_mut(album_id)?;
            if !same_members(&album.clip_ids, clip_ids) {
                return Err(StorageError::InvalidParameter("album clip order".into()));
            }
            album.clip_ids = clip_ids.to_vec();
            Ok(album.clone())
        })
    }

    fn reorder_albums(&self, album_ids: &[AlbumId]) -> Result<(), StorageError> {
        self.write("reorder_albums", |data| {
            let current: Vec<AlbumId> = data.albums.keys().copied().collect();
            if !same_members(&current, album_ids) {
                return Err(StorageError::InvalidParameter("album order".into()));
            }
            for (index, id) in album_ids.iter().enumerate() {
                data.album_mut(*id)?.index = index as u32;
            }
            Ok(())
        })
    }

    fn delete_album(&self, id: AlbumId) -> Result<Album, StorageError> {
        self.write("delete_album", |data| {
            data.albums
                .remove(&id)
                .ok_or_else(|| StorageError::NotFound(format!("album {}", id)))
        })
    }
}

// ==================== References ====================

/// Rendezvous used to hold a store call until the test releases it.
pub struct Gate {
    pub entered: Sender<()>,
    pub release: Receiver<()>,
}

/// Fault-injectable [`ReferenceStore`].
pub struct MemoryReferenceStore {
    journal: Journal,
    state: Mutex<Versioned<BTreeMap<TagId, ReferenceTag>>>,
    faults: Mutex<Faults>,
    gate: Mutex<Option<Gate>>,
}

#[allow(dead_code)]
impl MemoryReferenceStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            state: Mutex::new(Versioned::new(BTreeMap::new())),
            faults: Mutex::new(Faults::default()),
            gate: Mutex::new(None),
        }
    }

    pub fn fail(&self, op: &'static str, err: StorageError) {
        self.faults.lock().unwrap().ops.insert(op, err);
    }

    pub fn clear_faults(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    /// Block the next `read_all_dirty_tags` on `gate`.
    pub fn hold_next_read(&self, gate: Gate) {
        *self.gate.lock().unwrap() = Some(gate);
    }

    pub fn seed(&self, tag: &ReferenceTag) {
        self.begin_transaction().unwrap();
        self.create_tag(tag).unwrap();
        self.commit_transaction().unwrap();
    }

    pub fn get(&self, id: TagId) -> Option<ReferenceTag> {
        self.state.lock().unwrap().current().get(&id).cloned()
    }

    fn call(&self, op: &'static str) -> Result<(), StorageError> {
        self.journal.record(format!("references:{}", op));
        match self.faults.lock().unwrap().ops.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn write(
        &self,
        op: &'static str,
        body: impl FnOnce(&mut BTreeMap<TagId, ReferenceTag>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        self.call(op)?;
        let mut state = self.state.lock().unwrap();
        let data = state.writable("references")?;
        body(data)
    }

    fn existing<'a>(
        data: &'a mut BTreeMap<TagId, ReferenceTag>,
        id: TagId,
    ) -> Result<&'a mut ReferenceTag, StorageError> {
        data.get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("reference tag {}", id)))
    }
}

impl Transactional for MemoryReferenceStore {
    fn begin_transaction(&self) -> Result<(), StorageError> {
        self.call("begin")?;
        self.state.lock().unwrap().begin("references")
    }

    fn commit_transaction(&self) -> Result<(), StorageError> {
        self.call("commit")?;
        self.state.lock().unwrap().commit("references")
    }

    fn cancel_transaction_if_needed(&self) {
        self.journal.record("references:cancel");
        self.state.lock().unwrap().cancel();
    }
}

impl ReferenceStore for MemoryReferenceStore {
    fn read_all_tags(&self) -> Result<Vec<ReferenceTag>, StorageError> {
        self.call("read_all_tags")?;
        Ok(self.state.lock().unwrap().current().values().cloned().collect())
    }

    fn read_all_dirty_tags(&self) -> Result<Vec<ReferenceTag>, StorageError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.send(()).unwrap();
            gate.release.recv().unwrap();
        }
        self.call("read_all_dirty_tags")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .current()
            .values()
            .filter(|tag| tag.is_dirty)
            .cloned()
            .collect())
    }

    fn create_tag(&self, tag: &ReferenceTag) -> Result<(), StorageError> {
        self.write("create_tag", |data| {
            if data.contains_key(&tag.id) {
                return Err(StorageError::Duplicated(format!("reference tag {}", tag.id)));
            }
            data.insert(tag.id, tag.clone());
            Ok(())
        })
    }

    fn update_tag_name(&self, id: TagId, name: &str) -> Result<(), StorageError> {
        self.write("update_tag_name", |data| {
            Self::existing(data, id)?.name = name.to_string();
            Ok(())
        })
    }

    fn update_tag_hidden(&self, id: TagId, is_hidden: bool) -> Result<(), StorageError> {
        self.write("update_tag_hidden", |data| {
            Self::existing(data, id)?.is_hidden = is_hidden;
            Ok(())
        })
    }

    fn update_tags(&self, ids: &[TagId], to_dirty: bool) -> Result<(), StorageError> {
        self.write("update_tags", |data| {
            for id in ids {
                Self::existing(data, *id)?.is_dirty = to_dirty;
            }
            Ok(())
        })
    }

    fn delete_tags(&self, ids: &[TagId]) -> Result<(), StorageError> {
        self.write("delete_tags", |data| {
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| data.remove(*id).is_none())
                .map(|id| id.to_string())
                .collect();
            if missing.is_empty() {
                Ok(())
            } else {
                Err(StorageError::NotFound(format!("reference tags {}", missing.join(", "))))
            }
        })
    }
}

// ==================== Blobs ====================

/// [`BlobStore`] over a map; writes apply immediately.
pub struct MemoryBlobStore {
    label: &'static str,
    journal: Journal,
    blobs: Mutex<BTreeMap<(ClipId, String), Vec<u8>>>,
    failing: Mutex<HashSet<&'static str>>,
}

#[allow(dead_code)]
impl MemoryBlobStore {
    pub fn new(label: &'static str, journal: Journal) -> Self {
        Self {
            label,
            journal,
            blobs: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Make `op` fail with an I/O error until cleared.
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn clear_faults(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn put(&self, data: &[u8], file_name: &str, owner: ClipId) {
        self.blobs
            .lock()
            .unwrap()
            .insert((owner, file_name.to_string()), data.to_vec());
    }

    pub fn get(&self, file_name: &str, owner: ClipId) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(&(owner, file_name.to_string()))
            .cloned()
    }

    /// Drop a blob without going through the store contract.
    pub fn remove(&self, file_name: &str, owner: ClipId) {
        self.blobs
            .lock()
            .unwrap()
            .remove(&(owner, file_name.to_string()));
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn call(&self, op: &'static str, detail: &str) -> Result<(), BlobError> {
        self.journal.record(format!("{}:{} {}", self.label, op, detail).trim_end().to_string());
        if self.failing.lock().unwrap().contains(op) {
            return Err(BlobError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected {} failure", op),
            )));
        }
        Ok(())
    }
}

impl Transactional for MemoryBlobStore {
    fn begin_transaction(&self) -> Result<(), StorageError> {
        self.journal.record(format!("{}:begin", self.label));
        Ok(())
    }

    fn commit_transaction(&self) -> Result<(), StorageError> {
        self.journal.record(format!("{}:commit", self.label));
        Ok(())
    }

    fn cancel_transaction_if_needed(&self) {
        self.journal.record(format!("{}:cancel", self.label));
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(&self, data: &[u8], file_name: &str, owner: ClipId) -> Result<(), BlobError> {
        self.call("save", file_name)?;
        self.put(data, file_name, owner);
        Ok(())
    }

    fn read(&self, file_name: &str, owner: ClipId) -> Result<Option<Vec<u8>>, BlobError> {
        self.call("read", file_name)?;
        Ok(self.get(file_name, owner))
    }

    fn delete(&self, file_name: &str, owner: ClipId) -> Result<(), BlobError> {
        self.call("delete", file_name)?;
        self.blobs
            .lock()
            .unwrap()
            .remove(&(owner, file_name.to_string()));
        Ok(())
    }

    fn delete_all_in(&self, owner: ClipId) -> Result<(), BlobError> {
        self.call("delete_all_in", "")?;
        self.blobs.lock().unwrap().retain(|(clip, _), _| *clip != owner);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), BlobError> {
        self.call("delete_all", "")?;
        self.blobs.lock().unwrap().clear();
        Ok(())
    }

    fn image_file_exists(&self, file_name: &str, owner: ClipId) -> bool {
        self.get(file_name, owner).is_some()
    }
}
