//! Registry of live index groups for one database.
//!
//! The server keeps exactly one live [`IndexGroupState`] per signature and
//! hands out pinned references to it. Each group has at most one updater
//! running at a time; readers wait on a condition variable until the group's
//! update sequence reaches what they need.
//!
//! Updates run on a background thread against a copy of the state. The copy
//! is checkpointed to disk and only then published, so readers always see a
//! state that has been persisted.

use crate::config::Config;
use crate::design::{DesignDocument, GroupDefinition, Signature, compile};
use crate::error::{Result, SpatialError};
use crate::header::{PersistedHeader, checkpoint, materialize, reset_definition};
use crate::state::IndexGroupState;
use crate::storage::{HeaderRecord, IndexFile, delete_files, index_file_path};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// The document database an index server belongs to.
pub trait Database: Send + Sync {
    fn name(&self) -> &str;

    /// Sequence number of the latest change in the database.
    fn update_seq(&self) -> u64;

    /// Number of purges applied to the database.
    fn purge_seq(&self) -> u64;
}

/// Indexes database changes into a group.
///
/// Implementations bring `state` up to at least `target_seq` (or as far as
/// the database goes), advancing `update_seq` and `purge_seq` of the group and
/// of each view they touch. They are never run concurrently for one group.
pub trait Updater: Send + Sync {
    fn update(
        &self,
        db: &dyn Database,
        state: &mut IndexGroupState,
        target_seq: u64,
    ) -> Result<()>;
}

struct Progress {
    state: IndexGroupState,
    running: bool,
    /// Number of updater runs started so far; identifies the current run
    runs: u64,
    failure: Option<(u64, String)>,
}

/// One live group plus its update bookkeeping.
pub(crate) struct GroupEntry {
    progress: Mutex<Progress>,
    advanced: Condvar,
    refs: AtomicUsize,
}

impl GroupEntry {
    fn new(state: IndexGroupState) -> Self {
        Self {
            progress: Mutex::new(Progress {
                state,
                running: false,
                runs: 0,
                failure: None,
            }),
            advanced: Condvar::new(),
            refs: AtomicUsize::new(0),
        }
    }

    fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "released an unreferenced group");
    }

    fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    fn is_updating(&self) -> bool {
        self.progress.lock().running
    }

    fn is_idle(&self) -> bool {
        self.ref_count() == 0 && !self.is_updating()
    }

    fn finish(&self, run: u64, outcome: Result<IndexGroupState>) {
        let mut progress = self.progress.lock();
        match outcome {
            Ok(state) => {
                log::debug!(
                    "updater run {} for {} reached seq {}",
                    run,
                    state.signature,
                    state.update_seq
                );
                progress.state = state;
                progress.failure = None;
            }
            Err(e) => {
                log::warn!("updater run {} failed: {}", run, e);
                let msg = match e {
                    SpatialError::IndexBuild(msg) => msg,
                    other => other.to_string(),
                };
                progress.failure = Some((run, msg));
            }
        }
        progress.running = false;
        drop(progress);
        self.advanced.notify_all();
    }
}

/// A counted reference to a live group. Dropping it releases the group.
pub(crate) struct GroupRef {
    entry: Arc<GroupEntry>,
}

impl GroupRef {
    fn new(entry: Arc<GroupEntry>) -> Self {
        entry.retain();
        Self { entry }
    }
}

impl Drop for GroupRef {
    fn drop(&mut self) {
        self.entry.release();
    }
}

/// Point-in-time summary of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub signature: Signature,
    pub update_seq: u64,
    pub purge_seq: u64,
    pub disk_size: u64,
    pub updater_running: bool,
    pub ref_count: usize,
}

/// Owner of every live index group of one database.
pub struct IndexServer {
    root_dir: PathBuf,
    config: Config,
    db: Arc<dyn Database>,
    updater: Arc<dyn Updater>,
    groups: DashMap<Signature, Arc<GroupEntry>>,
    /// Serializes file-level work: opening groups and deleting their files
    opening: Mutex<()>,
}

impl IndexServer {
    pub fn new<P: Into<PathBuf>>(
        root_dir: P,
        config: Config,
        db: Arc<dyn Database>,
        updater: Arc<dyn Updater>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            config,
            db,
            updater,
            groups: DashMap::new(),
            opening: Mutex::new(()),
        }
    }

    pub fn builder() -> crate::builder::IndexServerBuilder {
        crate::builder::IndexServerBuilder::new()
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Number of live groups.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Returns the live group for `definition`, opening it on first use.
    ///
    /// The returned reference is counted while the registry shard is locked,
    /// so an idle sweep can never drop a group that is being handed out. File
    /// work happens outside the registry locks.
    pub(crate) fn resolve(&self, definition: &GroupDefinition) -> Result<GroupRef> {
        if let Some(group) = self.live_group(&definition.signature) {
            return Ok(group);
        }

        let _opening = self.opening.lock();
        // Opened by someone else while we waited
        if let Some(group) = self.live_group(&definition.signature) {
            return Ok(group);
        }

        let entry = Arc::new(GroupEntry::new(self.open_group(definition)?));
        let group = GroupRef::new(Arc::clone(&entry));
        self.groups.insert(definition.signature, entry);
        Ok(group)
    }

    fn live_group(&self, signature: &Signature) -> Option<GroupRef> {
        self.groups
            .get(signature)
            .map(|entry| GroupRef::new(Arc::clone(entry.value())))
    }

    fn open_group(&self, definition: &GroupDefinition) -> Result<IndexGroupState> {
        let path = index_file_path(&self.root_dir, &definition.db_name, &definition.signature);
        let file = Arc::new(IndexFile::open(&path)?);

        match file.read_header() {
            Ok(Some(HeaderRecord { signature, header })) if signature == definition.signature => {
                let header = header.unwrap_or_else(|| {
                    PersistedHeader::empty(definition, self.db.purge_seq(), &self.config.tree)
                });
                match materialize(header, Arc::clone(&file), definition) {
                    Ok(state) => {
                        log::debug!(
                            "opened index {} at seq {}",
                            path.display(),
                            state.update_seq
                        );
                        return Ok(state);
                    }
                    Err(e) => log::warn!("discarding unusable header in {}: {}", path.display(), e),
                }
            }
            Ok(Some(record)) => log::warn!(
                "{} was written for signature {}, resetting",
                path.display(),
                record.signature
            ),
            Ok(None) => {}
            Err(e) => log::warn!("unreadable header in {}: {}, resetting", path.display(), e),
        }

        reset_definition(&*self.db, file, definition, &self.config.tree)
    }

    /// Blocks until the group has indexed at least `seq`, starting an updater
    /// when none is running. Fails if the run being waited on fails.
    pub(crate) fn wait_until(&self, group: &GroupRef, seq: u64) -> Result<IndexGroupState> {
        let entry = &group.entry;
        let mut progress = entry.progress.lock();
        let mut waiting_on: Option<u64> = None;

        loop {
            if progress.state.update_seq >= seq {
                return Ok(progress.state.clone());
            }

            if progress.running {
                waiting_on = Some(progress.runs);
            } else {
                if let (Some(run), Some((failed_run, msg))) = (waiting_on, &progress.failure)
                    && run == *failed_run
                {
                    return Err(SpatialError::IndexBuild(msg.clone()));
                }
                let target = seq.max(self.db.update_seq());
                waiting_on = Some(self.start_update(entry, &mut progress, target)?);
            }

            entry.advanced.wait(&mut progress);
        }
    }

    /// Starts a background update towards `target` unless one is running or
    /// the group is already there. Failures are logged and dropped.
    pub(crate) fn request_update(&self, group: &GroupRef, target: u64) {
        let entry = &group.entry;
        let mut progress = entry.progress.lock();
        if progress.running || progress.state.update_seq >= target {
            return;
        }
        if let Err(e) = self.start_update(entry, &mut progress, target) {
            log::warn!("could not start background refresh: {}", e);
        }
    }

    fn start_update(
        &self,
        entry: &Arc<GroupEntry>,
        progress: &mut Progress,
        target: u64,
    ) -> Result<u64> {
        let run = progress.runs + 1;
        let mut working = progress.state.clone();
        let db = Arc::clone(&self.db);
        let updater = Arc::clone(&self.updater);
        let finished = Arc::clone(entry);

        log::debug!(
            "starting updater run {} for {} towards seq {}",
            run,
            working.signature,
            target
        );
        thread::Builder::new()
            .name(format!("geoview-update-{}", &working.signature.to_hex()[..8]))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_update(&*db, &*updater, &mut working, target)
                }))
                .unwrap_or_else(|payload| {
                    Err(SpatialError::IndexBuild(format!(
                        "updater panicked: {}",
                        panic_message(&*payload)
                    )))
                })
                .map(|()| working);
                finished.finish(run, outcome);
            })?;

        progress.runs = run;
        progress.running = true;
        Ok(run)
    }

    /// Reports on the group defined by `ddoc`, opening it if needed.
    pub fn group_info(&self, ddoc: &DesignDocument) -> Result<GroupInfo> {
        let definition = compile(self.db.name(), ddoc)?;
        let group = self.resolve(&definition)?;
        let progress = group.entry.progress.lock();
        Ok(GroupInfo {
            signature: progress.state.signature,
            update_seq: progress.state.update_seq,
            purge_seq: progress.state.purge_seq,
            disk_size: progress.state.file.size()?,
            updater_running: progress.running,
            // Not counting the reference held for this call
            ref_count: group.entry.ref_count() - 1,
        })
    }

    /// Drops every group that is neither referenced nor updating.
    pub fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        self.groups.retain(|signature, entry| {
            if entry.is_idle() {
                log::debug!("evicting idle group {}", signature);
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Deletes the index files of `signature`.
    ///
    /// Returns `false` and leaves everything in place while the group is in
    /// use.
    pub fn delete_group_files(&self, signature: &Signature) -> Result<bool> {
        // Held across the check and the unlink so no open can slip in between
        let _opening = self.opening.lock();

        match self.groups.entry(*signature) {
            Entry::Occupied(e) => {
                if !e.get().is_idle() {
                    return Ok(false);
                }
                delete_files(&self.root_dir, self.db.name(), signature)?;
                e.remove();
            }
            Entry::Vacant(_) => delete_files(&self.root_dir, self.db.name(), signature)?,
        }
        log::debug!("deleted index files of {}", signature);
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn group_ref_state(group: &GroupRef) -> IndexGroupState {
        group.entry.progress.lock().state.clone()
    }
}

impl std::fmt::Debug for IndexServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexServer")
            .field("root_dir", &self.root_dir)
            .field("database", &self.db.name())
            .field("groups", &self.groups.len())
            .finish()
    }
}

fn run_update(
    db: &dyn Database,
    updater: &dyn Updater,
    state: &mut IndexGroupState,
    target: u64,
) -> Result<()> {
    let (seq_before, purge_before) = (state.update_seq, state.purge_seq);
    let views_before: Vec<(u64, u64)> = state
        .views
        .iter()
        .map(|view| (view.update_seq, view.purge_seq))
        .collect();

    updater.update(db, state, target)?;

    if state.update_seq < seq_before || state.purge_seq < purge_before {
        return Err(SpatialError::IndexBuild(format!(
            "updater moved {} backwards (seq {} -> {}, purge seq {} -> {})",
            state.signature, seq_before, state.update_seq, purge_before, state.purge_seq
        )));
    }

    if state.views.len() != views_before.len() {
        return Err(SpatialError::IndexBuild(format!(
            "updater changed the number of indexes of {} from {} to {}",
            state.signature,
            views_before.len(),
            state.views.len()
        )));
    }
    for (view, (seq, purge)) in state.views.iter().zip(views_before) {
        if view.update_seq < seq || view.purge_seq < purge {
            return Err(SpatialError::IndexBuild(format!(
                "updater moved index {} of {} backwards (seq {} -> {}, purge seq {} -> {})",
                view.descriptor.id_num,
                state.signature,
                seq,
                view.update_seq,
                purge,
                view.purge_seq
            )));
        }
    }

    if state.update_seq == seq_before && seq_before < target {
        return Err(SpatialError::IndexBuild(format!(
            "updater made no progress on {} towards seq {} (stuck at {})",
            state.signature, target, seq_before
        )));
    }

    checkpoint(state)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
