//! Staging → permanent migration
//!
//! [`MigrationCoordinator`] flushes the staging area in two phases:
//!
//! - **Dirty tags**: every reference tag still flagged dirty is created in the
//!   permanent store. A name collision means the tag already exists there; the
//!   redundant reference copy is deleted and staged clips are re-pointed at the
//!   permanent tag. Any other failure aborts the whole run.
//! - **Staged clips**: each staged clip is migrated in its own unit of work.
//!   A failing clip is cancelled, left untouched in staging and reported as
//!   skipped; the run continues with the next clip. Image bytes are copied
//!   best-effort: a missing or unreadable image never blocks the metadata.
//!
//! Only one run executes at a time. A call that arrives while a run is in
//! flight returns immediately with [`MigrationOutcome::AlreadyRunning`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipbox_domain::{Clip, ClipId, ClipRecipe, Tag, TagId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::StorageError;
use crate::queue::SerialQueue;
use crate::store::{BlobStore, ClipCreationOptions, MetadataStore, ReferenceStore};
use crate::transaction::{Participant, TransactionScope};

/// Behaviour switches unifying the overwrite and non-overwrite variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// Replace a permanent clip that already has a staged clip's id (left
    /// behind by an interrupted run) instead of skipping the staged clip.
    pub overwrite_existing: bool,
    /// Let clip creation create tags the permanent store does not know.
    pub allow_tag_creation: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            overwrite_existing: true,
            allow_tag_creation: false,
        }
    }
}

impl From<MigrationOptions> for ClipCreationOptions {
    fn from(options: MigrationOptions) -> Self {
        Self {
            allow_tag_creation: options.allow_tag_creation,
            overwrite: options.overwrite_existing,
        }
    }
}

/// Progress callback for the clip phase.
pub trait MigrationObserver: Send + Sync {
    /// Called before clip `index` (1-based) of `total` is migrated.
    fn did_start_clip(&self, index: usize, total: usize);
}

impl<F> MigrationObserver for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn did_start_clip(&self, index: usize, total: usize) {
        self(index, total)
    }
}

/// Stores the migration coordinator reads from and writes to.
#[derive(Clone)]
pub struct MigrationStores {
    pub metadata: Arc<dyn MetadataStore>,
    pub staging: Arc<dyn MetadataStore>,
    pub references: Arc<dyn ReferenceStore>,
    pub images: Arc<dyn BlobStore>,
    pub staging_images: Arc<dyn BlobStore>,
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Dirty tags now present in the permanent store.
    pub migrated_tags: Vec<TagId>,
    /// Dirty tags dropped because the permanent store already had the name.
    pub deduplicated_tags: Vec<TagId>,
    pub migrated_clips: Vec<ClipId>,
    /// Clips left in staging for a later run.
    pub skipped_clips: Vec<ClipId>,
    /// `(clip, file name)` of images missing from staging.
    pub missing_images: Vec<(ClipId, String)>,
}

/// Result of one call to [`MigrationCoordinator::migrate`].
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOutcome {
    /// Another run was in flight; nothing was done.
    AlreadyRunning,
    /// Both phases ran; see the report for skipped clips.
    Completed(MigrationReport),
    /// The dirty-tag phase failed; staged clips were not touched.
    TagMigrationFailed(StorageError),
    /// The run could not start or read staging.
    Failed(StorageError),
}

impl MigrationOutcome {
    /// True when nothing is left for a later run (or another run owns it).
    pub fn is_success(&self) -> bool {
        match self {
            MigrationOutcome::AlreadyRunning => true,
            MigrationOutcome::Completed(report) => report.skipped_clips.is_empty(),
            MigrationOutcome::TagMigrationFailed(_) | MigrationOutcome::Failed(_) => false,
        }
    }
}

/// Moves dirty tags and staged clips into the permanent stores.
pub struct MigrationCoordinator {
    service: Arc<MigrationService>,
    observer: Option<Arc<dyn MigrationObserver>>,
    queue: SerialQueue,
    running: AtomicBool,
}

impl MigrationCoordinator {
    /// Create a coordinator with its own serial queue.
    pub fn new(stores: MigrationStores, options: MigrationOptions) -> Result<Self, StorageError> {
        let queue = SerialQueue::spawn("clipbox-migration")?;
        Ok(Self::with_queue(stores, options, queue))
    }

    /// Create a coordinator that shares `queue` with other coordinators.
    pub fn with_queue(stores: MigrationStores, options: MigrationOptions, queue: SerialQueue) -> Self {
        Self {
            service: Arc::new(MigrationService { stores, options }),
            observer: None,
            queue,
            running: AtomicBool::new(false),
        }
    }

    /// Attach a progress observer, replacing any earlier one.
    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Migrate everything staged. Returns `true` when nothing is left behind.
    pub fn persist_if_needed(&self) -> bool {
        self.migrate().is_success()
    }

    /// Migrate everything staged and report what happened.
    pub fn migrate(&self) -> MigrationOutcome {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            debug!("migration already running");
            return MigrationOutcome::AlreadyRunning;
        };

        let service = Arc::clone(&self.service);
        let observer = self.observer.clone();
        match self.queue.run(move || service.run(observer.as_deref())) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "migration aborted");
                MigrationOutcome::Failed(err)
            }
        }
    }
}

/// Holds the running flag; releases it on every exit path.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Outcome of the dirty-tag phase.
#[derive(Debug, Default)]
struct TagMigration {
    succeeded: Vec<TagId>,
    duplicates: Vec<TagId>,
    /// Dropped reference id → id of the permanent tag with the same name.
    remap: HashMap<TagId, TagId>,
}

struct MigrationService {
    stores: MigrationStores,
    options: MigrationOptions,
}

impl MigrationService {
    fn run(&self, observer: Option<&dyn MigrationObserver>) -> MigrationOutcome {
        let tags = match self.migrate_dirty_tags() {
            Ok(tags) => tags,
            Err(err) => {
                error!(error = %err, "dirty tag migration failed");
                return MigrationOutcome::TagMigrationFailed(err);
            }
        };

        let mut report = MigrationReport {
            migrated_tags: tags.succeeded,
            deduplicated_tags: tags.duplicates,
            ..MigrationReport::default()
        };

        if let Err(err) = self.migrate_staged_clips(&tags.remap, observer, &mut report) {
            error!(error = %err, "failed to read staged clips");
            return MigrationOutcome::Failed(err);
        }

        if report.skipped_clips.is_empty() {
            info!(
                tags = report.migrated_tags.len(),
                clips = report.migrated_clips.len(),
                "staging migrated"
            );
        } else {
            warn!(
                skipped = ?report.skipped_clips,
                migrated = report.migrated_clips.len(),
                "some staged clips were skipped and remain in staging"
            );
        }
        MigrationOutcome::Completed(report)
    }

    /// All four stores, opened together so every exit path can close them
    /// symmetrically. The blob store only takes part for that symmetry.
    fn participants(&self) -> Vec<Participant<'_>> {
        vec![
            Participant::commit("metadata", &self.stores.metadata),
            Participant::commit("staging", &self.stores.staging),
            Participant::commit("references", &self.stores.references),
            Participant::discard("images", &self.stores.images),
        ]
    }

    // ==================== Dirty tags ====================

    fn migrate_dirty_tags(&self) -> Result<TagMigration, StorageError> {
        let dirty = self.stores.references.read_all_dirty_tags()?;
        if dirty.is_empty() {
            return Ok(TagMigration::default());
        }

        let scope = TransactionScope::begin(self.participants())?;
        let mut migration = TagMigration::default();
        let mut permanent: Option<Vec<Tag>> = None;

        for reference in &dirty {
            match self.stores.metadata.create_tag(&reference.to_tag()) {
                Ok(created) => {
                    // Later dirty tags of this batch may collide with it.
                    if let Some(known) = permanent.as_mut() {
                        known.push(created);
                    }
                    migration.succeeded.push(reference.id);
                }
                Err(StorageError::Duplicated(_)) => {
                    debug!(tag_id = %reference.id, name = %reference.name, "tag already exists permanently");
                    if permanent.is_none() {
                        match self.stores.metadata.read_all_tags() {
                            Ok(tags) => permanent = Some(tags),
                            Err(err) => {
                                scope.abort_all();
                                return Err(err);
                            }
                        }
                    }
                    let known: &[Tag] = permanent.as_deref().unwrap_or_default();
                    let existing = known
                        .iter()
                        .find(|tag| tag.id == reference.id)
                        .or_else(|| known.iter().find(|tag| tag.name == reference.name));
                    match existing {
                        // Same id: an earlier run created it but could not clear the flag.
                        Some(tag) if tag.id == reference.id => {
                            migration.succeeded.push(reference.id)
                        }
                        Some(tag) => {
                            migration.remap.insert(reference.id, tag.id);
                            migration.duplicates.push(reference.id);
                        }
                        None => migration.duplicates.push(reference.id),
                    }
                }
                Err(err) => {
                    warn!(tag_id = %reference.id, error = %err, "failed to migrate dirty tag");
                    scope.abort_all();
                    return Err(err);
                }
            }
        }

        if !migration.succeeded.is_empty() {
            if let Err(err) = self
                .stores
                .references
                .update_tags(&migration.succeeded, false)
            {
                scope.abort_all();
                return Err(err);
            }
        }
        if !migration.duplicates.is_empty() {
            if let Err(err) = self.stores.references.delete_tags(&migration.duplicates) {
                scope.abort_all();
                return Err(err);
            }
        }

        scope.commit_all()?;
        debug!(
            migrated = migration.succeeded.len(),
            deduplicated = migration.duplicates.len(),
            "dirty tags migrated"
        );
        Ok(migration)
    }

    // ==================== Staged clips ====================

    fn migrate_staged_clips(
        &self,
        remap: &HashMap<TagId, TagId>,
        observer: Option<&dyn MigrationObserver>,
        report: &mut MigrationReport,
    ) -> Result<(), StorageError> {
        let staged: HashMap<ClipId, Clip> = self
            .stores
            .staging
            .read_all_clips()?
            .into_iter()
            .map(|clip| (clip.id, clip))
            .collect();

        let total = staged.len();
        for (position, clip) in staged.values().enumerate() {
            if let Some(observer) = observer {
                observer.did_start_clip(position + 1, total);
            }

            match self.migrate_clip(clip, remap) {
                Ok(missing) => {
                    report.migrated_clips.push(clip.id);
                    report
                        .missing_images
                        .extend(missing.into_iter().map(|name| (clip.id, name)));
                }
                Err(err) => {
                    warn!(clip_id = %clip.id, error = %err, "skipping staged clip");
                    report.skipped_clips.push(clip.id);
                }
            }
        }

        if report.skipped_clips.is_empty() {
            if total > 0 {
                self.clear_staging_metadata();
            }
            // Also sweeps images left behind by earlier runs.
            if let Err(err) = self.stores.staging_images.delete_all() {
                warn!(error = %err, "failed to clear staging images");
            }
        }
        Ok(())
    }

    /// Migrate one clip in its own unit of work. Returns the file names of
    /// images that were missing from staging.
    fn migrate_clip(
        &self,
        clip: &Clip,
        remap: &HashMap<TagId, TagId>,
    ) -> Result<Vec<String>, StorageError> {
        let scope = TransactionScope::begin(self.participants())?;
        let recipe = remapped_recipe(clip, remap);

        let creation = match self.stores.metadata.create_clip(&recipe, self.options.into()) {
            Ok(creation) => creation,
            Err(err) => {
                scope.abort_all();
                return Err(err);
            }
        };

        if let Err(err) = self.stores.staging.delete_clips(&[clip.id]) {
            scope.abort_all();
            return Err(err);
        }

        // Copy images before committing; staging copies stay until the
        // commit has succeeded.
        let mut missing = Vec::new();
        for item in &clip.items {
            let file_name = item.image_file_name.as_str();
            match self.stores.staging_images.read(file_name, clip.id) {
                Ok(Some(data)) => match self.stores.images.save(&data, file_name, clip.id) {
                    Ok(()) => debug!(clip_id = %clip.id, %file_name, "image migrated"),
                    Err(err) => {
                        warn!(clip_id = %clip.id, %file_name, error = %err, "failed to save migrated image")
                    }
                },
                Ok(None) => {
                    warn!(clip_id = %clip.id, %file_name, "staged image is missing");
                    missing.push(file_name.to_string());
                }
                Err(err) => {
                    warn!(clip_id = %clip.id, %file_name, error = %err, "failed to read staged image")
                }
            }
        }

        scope.commit_all()?;

        if let Err(err) = self.stores.staging_images.delete_all_in(clip.id) {
            warn!(clip_id = %clip.id, error = %err, "failed to delete staged images");
        }
        if let Some(replaced) = &creation.replaced {
            self.release_orphans(replaced, clip);
        }

        Ok(missing)
    }

    /// Delete images of an overwritten version that the new version no
    /// longer references.
    fn release_orphans(&self, replaced: &Clip, current: &Clip) {
        let kept: HashSet<&str> = current
            .items
            .iter()
            .map(|item| item.image_file_name.as_str())
            .collect();
        for item in &replaced.items {
            let file_name = item.image_file_name.as_str();
            if kept.contains(file_name) {
                continue;
            }
            if let Err(err) = self.stores.images.delete(file_name, replaced.id) {
                warn!(clip_id = %replaced.id, %file_name, error = %err, "failed to delete orphaned image");
            }
        }
    }

    /// Best-effort removal of whatever staging metadata is left.
    fn clear_staging_metadata(&self) {
        let cleared = TransactionScope::begin(vec![Participant::commit(
            "staging",
            &self.stores.staging,
        )])
        .and_then(|scope| match self.stores.staging.delete_all_clips() {
            Ok(_) => scope.commit_all(),
            Err(err) => {
                scope.abort_all();
                Err(err)
            }
        });
        if let Err(err) = cleared {
            warn!(error = %err, "failed to clear staging metadata");
        }
    }
}

/// Recipe for `clip` with tags of deduplicated reference ids re-pointed at
/// their permanent counterparts.
fn remapped_recipe(clip: &Clip, remap: &HashMap<TagId, TagId>) -> ClipRecipe {
    let mut recipe = ClipRecipe::from(clip);
    if remap.is_empty() {
        return recipe;
    }

    let mut seen = HashSet::new();
    recipe.tags = recipe
        .tags
        .into_iter()
        .map(|mut tag| {
            if let Some(permanent) = remap.get(&tag.id) {
                tag.id = *permanent;
            }
            tag
        })
        .filter(|tag| seen.insert(tag.id))
        .collect();
    recipe
}
