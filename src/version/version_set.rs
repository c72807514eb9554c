//! VersionSet - applies VersionEdits and tracks the current Version of every
//! column family.
//!
//! The VersionSet is responsible for:
//! - Serializing edit submission: encode, append to manifest, install
//! - Managing file number allocation and sequence bookkeeping
//! - Keeping the column family registry in step with the manifest
//! - Counting the versions that reference each file and releasing table
//!   readers of files no version references any more
//! - Managing the CURRENT file and manifest

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::cache::{TableReaderCache, TableReaderHandle};
use crate::options::{Options, DEFAULT_COLUMN_FAMILY_ID, DEFAULT_COLUMN_FAMILY_NAME, MAX_LEVELS};
use crate::types::{OpId, SequenceNumber};
use crate::util::filename::{
    create_dir_if_missing, current_file_path, parse_manifest_filename, read_current_file,
    set_current_file,
};
use crate::{Error, Result};

use super::column_family::{ColumnFamilyData, ColumnFamilySet};
use super::version::LevelFiles;
use super::{BoundaryValuesExtractor, FileMetaData, FileStats, Manifest, Version, VersionEdit};

/// State only touched while holding the apply lock.
struct ApplyState {
    /// Writer of the active manifest.
    manifest: Option<Manifest>,
    /// Authoritative metadata of every referenced file, by (column family, number).
    live_files: HashMap<(u32, u64), FileMetaData>,
}

/// What an edit does once it is durable.
enum Plan {
    AddColumnFamily(u32, String),
    DropColumnFamily(Arc<ColumnFamilyData>),
    Install(Arc<ColumnFamilyData>, Version),
}

/// Manages the set of versions and file metadata.
///
/// Edits may be built on any thread; [`VersionSet::log_and_apply`] takes the
/// apply lock, so at most one edit is being logged and installed at a time.
/// Readers load the current version of a column family without that lock.
pub struct VersionSet {
    /// Database directory path.
    db_path: PathBuf,
    /// Database options.
    options: Arc<Options>,
    /// Decodes user boundary values found in the manifest.
    extractor: Arc<dyn BoundaryValuesExtractor>,
    /// Owner of table readers, told when a file is no longer referenced.
    table_cache: Option<Arc<dyn TableReaderCache>>,
    /// Live column families and their current versions.
    column_families: RwLock<ColumnFamilySet>,
    /// Apply lock.
    state: Mutex<ApplyState>,
    /// Next file number to allocate.
    next_file_number: AtomicU64,
    /// Last used sequence number.
    last_sequence: AtomicU64,
    /// Current log file number.
    log_number: AtomicU64,
    /// Previous log file number.
    prev_log_number: AtomicU64,
    /// Manifest file number.
    manifest_number: AtomicU64,
}

impl VersionSet {
    /// Create a new VersionSet with only the default column family.
    pub fn new(
        db_path: &Path,
        options: Arc<Options>,
        extractor: Arc<dyn BoundaryValuesExtractor>,
    ) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            options,
            extractor,
            table_cache: None,
            column_families: RwLock::new(ColumnFamilySet::new()),
            state: Mutex::new(ApplyState {
                manifest: None,
                live_files: HashMap::new(),
            }),
            next_file_number: AtomicU64::new(2), // 1 is reserved for manifest
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            prev_log_number: AtomicU64::new(0),
            manifest_number: AtomicU64::new(1),
        }
    }

    /// Release readers of unreferenced files through `cache`.
    pub fn with_table_cache(mut self, cache: Arc<dyn TableReaderCache>) -> Self {
        self.table_cache = Some(cache);
        self
    }

    /// Open the version set stored at `db_path`, creating it if allowed.
    pub fn open(
        db_path: &Path,
        options: Arc<Options>,
        extractor: Arc<dyn BoundaryValuesExtractor>,
    ) -> Result<Self> {
        options.validate()?;
        let vs = Self::new(db_path, options, extractor);

        if database_exists(db_path) {
            if vs.options.error_if_exists {
                return Err(Error::DatabaseExists(db_path.display().to_string()));
            }
            vs.recover()?;
        } else if vs.options.create_if_missing {
            create_dir_if_missing(db_path)?;
            vs.create_new_db()?;
        } else {
            return Err(Error::DatabaseNotFound(db_path.display().to_string()));
        }

        Ok(vs)
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Get the comparator name.
    pub fn comparator_name(&self) -> &str {
        &self.options.comparator_name
    }

    /// Get next file number and increment.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current next file number without incrementing.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::SeqCst)
    }

    /// Mark a file number as used.
    pub fn mark_file_number_used(&self, num: u64) {
        self.next_file_number.fetch_max(num + 1, Ordering::SeqCst);
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&self, seq: SequenceNumber) {
        self.last_sequence.store(seq, Ordering::SeqCst);
    }

    /// Get the current log number.
    pub fn log_number(&self) -> u64 {
        self.log_number.load(Ordering::SeqCst)
    }

    /// Get the previous log number.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number.load(Ordering::SeqCst)
    }

    /// Get the manifest number.
    pub fn manifest_number(&self) -> u64 {
        self.manifest_number.load(Ordering::SeqCst)
    }

    /// Get the current version of a column family.
    pub fn current(&self, column_family: u32) -> Result<Arc<Version>> {
        self.column_families
            .read()
            .get(column_family)
            .map(|cfd| cfd.current())
            .ok_or_else(|| Error::ColumnFamilyNotFound(format!("id {}", column_family)))
    }

    /// Get the current version of the default column family.
    pub fn default_version(&self) -> Result<Arc<Version>> {
        self.current(DEFAULT_COLUMN_FAMILY_ID)
    }

    /// Look up a column family id by name.
    pub fn column_family_id(&self, name: &str) -> Option<u32> {
        self.column_families.read().get_by_name(name).map(|cfd| cfd.id())
    }

    /// Live column families as (id, name), in id order.
    pub fn column_families(&self) -> Vec<(u32, String)> {
        self.column_families
            .read()
            .iter()
            .map(|cfd| (cfd.id(), cfd.name().to_string()))
            .collect()
    }

    /// Highest column family id handed out.
    pub fn max_column_family(&self) -> u32 {
        self.column_families.read().max_column_family()
    }

    /// Authoritative metadata of a referenced file.
    pub fn file_metadata(&self, column_family: u32, file_number: u64) -> Option<FileMetaData> {
        self.state
            .lock()
            .live_files
            .get(&(column_family, file_number))
            .cloned()
    }

    /// Attach a table reader to a referenced file, returning the one it replaces.
    pub fn set_table_reader(
        &self,
        column_family: u32,
        file_number: u64,
        handle: TableReaderHandle,
    ) -> Result<Option<TableReaderHandle>> {
        let mut state = self.state.lock();
        let meta = live_file_mut(&mut state, column_family, file_number)?;
        Ok(meta.table_reader_handle.replace(handle))
    }

    /// Recover the VersionSet from disk.
    ///
    /// Reads CURRENT to find the active manifest, then replays every edit
    /// to rebuild the column families and their versions. Returns false
    /// when there is no CURRENT file.
    pub fn recover(&self) -> Result<bool> {
        let Some(manifest_name) = read_current_file(&self.db_path)? else {
            return Ok(false);
        };
        let manifest_number = parse_manifest_filename(&manifest_name).ok_or_else(|| {
            Error::corruption(format!("invalid manifest name in CURRENT: {}", manifest_name))
        })?;

        let edits = Manifest::recover(
            &self.db_path,
            manifest_number,
            self.extractor.as_ref(),
            self.options.paranoid_checks,
        )?;

        let num_levels = self.options.num_levels;
        let mut builders: BTreeMap<u32, (String, VersionBuilder)> = BTreeMap::new();
        builders.insert(
            DEFAULT_COLUMN_FAMILY_ID,
            (
                DEFAULT_COLUMN_FAMILY_NAME.to_string(),
                VersionBuilder::new(DEFAULT_COLUMN_FAMILY_ID, num_levels),
            ),
        );

        let mut log_number = None;
        let mut prev_log_number = 0u64;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut max_column_family = 0u32;

        for edit in &edits {
            if let Some(name) = edit.comparator_name() {
                if name != self.options.comparator_name {
                    return Err(Error::InvalidConfiguration(format!(
                        "comparator {} does not match existing comparator {}",
                        self.options.comparator_name, name
                    )));
                }
            }

            let cf = edit.column_family();
            if let Some(name) = edit.column_family_name() {
                if builders.contains_key(&cf) {
                    return Err(Error::corruption(format!("column family {} added twice", cf)));
                }
                builders.insert(cf, (name.to_string(), VersionBuilder::new(cf, num_levels)));
            } else if edit.is_column_family_drop() {
                if cf == DEFAULT_COLUMN_FAMILY_ID || builders.remove(&cf).is_none() {
                    return Err(Error::corruption(format!("invalid drop of column family {}", cf)));
                }
            } else {
                let (_, builder) = builders.get_mut(&cf).ok_or_else(|| {
                    Error::corruption(format!("edit for unknown column family {}", cf))
                })?;
                builder.apply(edit)?;
            }

            if let Some(num) = edit.log_number() {
                log_number = Some(num);
            }
            if let Some(num) = edit.prev_log_number() {
                prev_log_number = num;
            }
            if let Some(num) = edit.next_file_number() {
                next_file_number = Some(num);
            }
            if let Some(seq) = edit.last_sequence() {
                last_sequence = Some(seq);
            }
            max_column_family = max_column_family
                .max(cf)
                .max(edit.max_column_family().unwrap_or(0));
        }

        let next_file_number =
            next_file_number.ok_or_else(|| Error::corruption("no next_file_number in manifest"))?;
        let log_number =
            log_number.ok_or_else(|| Error::corruption("no log_number in manifest"))?;
        let last_sequence =
            last_sequence.ok_or_else(|| Error::corruption("no last_sequence in manifest"))?;

        let mut column_families = ColumnFamilySet::new();
        let mut state = self.state.lock();
        state.live_files.clear();
        for (id, (name, builder)) in builders {
            let cfd = if id == DEFAULT_COLUMN_FAMILY_ID {
                column_families
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::internal("default column family missing"))?
            } else {
                column_families.create(id, &name)?
            };
            self.install_version(&mut state, &cfd, Arc::new(builder.build()));
        }
        column_families.update_max_column_family(max_column_family);
        let num_column_families = column_families.len();
        *self.column_families.write() = column_families;

        self.next_file_number.store(next_file_number, Ordering::SeqCst);
        self.mark_file_number_used(manifest_number);
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        self.set_last_sequence(last_sequence);
        self.log_number.store(log_number, Ordering::SeqCst);
        self.prev_log_number.store(prev_log_number, Ordering::SeqCst);
        self.manifest_number.store(manifest_number, Ordering::SeqCst);

        state.manifest = Some(Manifest::open(
            &self.db_path,
            manifest_number,
            self.options.sync_mode,
        )?);

        info!(
            manifest = manifest_number,
            edits = edits.len(),
            column_families = num_column_families,
            next_file_number = self.next_file_number(),
            last_sequence,
            "recovered version set"
        );
        Ok(true)
    }

    /// Write the manifest and CURRENT file of a new database.
    pub fn create_new_db(&self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.init_new_db();
        edit.set_comparator_name(self.options.comparator_name.clone());

        let manifest_number = 1;
        let mut manifest = Manifest::create(&self.db_path, manifest_number, self.options.sync_mode)?;
        manifest.log_edit(&edit)?;
        manifest.sync()?;
        set_current_file(&self.db_path, manifest_number)?;

        self.manifest_number.store(manifest_number, Ordering::SeqCst);
        self.next_file_number.store(2, Ordering::SeqCst);
        self.log_number.store(0, Ordering::SeqCst);
        self.set_last_sequence(0);
        self.state.lock().manifest = Some(manifest);

        info!(path = %self.db_path.display(), "created new database");
        Ok(())
    }

    /// Log a VersionEdit and install the Version it produces.
    ///
    /// Unset log, file and sequence numbers are filled in from the current
    /// state. Nothing is installed unless the edit reached the manifest.
    /// After a failed manifest write every later call fails until the
    /// version set is reopened.
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> Result<()> {
        let mut state = self.state.lock();
        self.log_and_apply_locked(&mut state, edit)
    }

    /// Create a column family, returning its id.
    pub fn create_column_family(&self, name: &str) -> Result<u32> {
        let mut state = self.state.lock();
        let id = self.column_families.read().max_column_family() + 1;

        let mut edit = VersionEdit::new();
        edit.set_column_family(id);
        edit.set_max_column_family(id);
        edit.add_column_family(name);
        self.log_and_apply_locked(&mut state, &mut edit)?;
        Ok(id)
    }

    /// Drop a column family. Its files lose the reference held by its
    /// current version.
    pub fn drop_column_family(&self, column_family: u32) -> Result<()> {
        let mut state = self.state.lock();
        let mut edit = VersionEdit::new();
        edit.set_column_family(column_family);
        edit.drop_column_family();
        self.log_and_apply_locked(&mut state, &mut edit)
    }

    /// Load entry stats of a file and compute its compensated size.
    ///
    /// Stats are taken once per file; the compensated size is set once.
    pub fn update_file_stats(
        &self,
        column_family: u32,
        file_number: u64,
        stats: &FileStats,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let cfd = self.column_family(column_family)?;
        let meta = live_file_mut(&mut state, column_family, file_number)?;

        let mut changed = meta.init_stats(stats);
        if meta.compensated_file_size() == 0 {
            let size = meta.compute_compensated_file_size(self.options.deletion_weight);
            meta.set_compensated_file_size(size);
            changed = true;
        }
        if !changed {
            return Ok(());
        }

        trace!(
            column_family,
            file = file_number,
            compensated_size = meta.compensated_file_size(),
            "updated file stats"
        );
        let snapshot = Arc::new(meta.clone());
        if let Some(updated) = cfd.current().with_replaced_file(snapshot) {
            cfd.install(Arc::new(updated));
        }
        Ok(())
    }

    /// Get a per-level summary of every column family.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        for cfd in self.column_families.read().iter() {
            let current = cfd.current();
            summary.push_str(&format!("[{}] flushed {}\n", cfd.name(), current.flushed_op_id()));
            for level in 0..MAX_LEVELS {
                let num_files = current.num_files(level);
                if num_files > 0 {
                    let size = current.level_size(level);
                    summary.push_str(&format!(
                        "L{}: {} files ({:.2} MB)\n",
                        level,
                        num_files,
                        size as f64 / (1024.0 * 1024.0)
                    ));
                }
            }
        }
        summary
    }

    fn column_family(&self, id: u32) -> Result<Arc<ColumnFamilyData>> {
        self.column_families
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ColumnFamilyNotFound(format!("id {}", id)))
    }

    fn fill_edit_defaults(&self, edit: &mut VersionEdit) {
        if edit.log_number().is_none() {
            edit.set_log_number(self.log_number());
        }
        if edit.prev_log_number().is_none() {
            edit.set_prev_log_number(self.prev_log_number());
        }
        if edit.next_file_number().is_none() {
            edit.set_next_file(self.next_file_number());
        }
        if edit.last_sequence().is_none() {
            edit.set_last_sequence(self.last_sequence());
        }
    }

    fn plan(&self, edit: &VersionEdit) -> Result<Plan> {
        let id = edit.column_family();
        let column_families = self.column_families.read();

        if let Some(name) = edit.column_family_name() {
            if column_families.get_by_name(name).is_some() {
                return Err(Error::ColumnFamilyExists(name.to_string()));
            }
            if column_families.get(id).is_some() {
                return Err(Error::ColumnFamilyExists(format!("id {}", id)));
            }
            return Ok(Plan::AddColumnFamily(id, name.to_string()));
        }

        let cfd = column_families
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ColumnFamilyNotFound(format!("id {}", id)))?;

        if edit.is_column_family_drop() {
            if id == DEFAULT_COLUMN_FAMILY_ID {
                return Err(Error::InvalidConfiguration(
                    "the default column family cannot be dropped".into(),
                ));
            }
            return Ok(Plan::DropColumnFamily(cfd));
        }

        let mut builder = VersionBuilder::from_version(&cfd.current(), self.options.num_levels);
        builder.apply(edit)?;
        let version = builder.build();
        Ok(Plan::Install(cfd, version))
    }

    fn log_and_apply_locked(&self, state: &mut ApplyState, edit: &mut VersionEdit) -> Result<()> {
        self.fill_edit_defaults(edit);

        // Build the new version before logging so rejected edits never
        // reach the manifest.
        let plan = self.plan(edit)?;

        let manifest = state
            .manifest
            .as_mut()
            .ok_or_else(|| Error::manifest("no active manifest, reopen the version set"))?;
        if let Err(err) = manifest.log_edit(edit) {
            // Part of the edit may be on disk; appending after it would
            // let a retry log the same files twice.
            state.manifest = None;
            error!(
                manifest = self.manifest_number(),
                error = %err,
                "manifest write failed, refusing further edits"
            );
            return Err(err);
        }

        match plan {
            Plan::AddColumnFamily(id, name) => {
                self.column_families.write().create(id, &name)?;
                info!(column_family = id, name = %name, "created column family");
            }
            Plan::DropColumnFamily(cfd) => {
                self.column_families.write().remove(cfd.id())?;
                self.unref_files(state, &cfd.current());
                info!(column_family = cfd.id(), name = cfd.name(), "dropped column family");
            }
            Plan::Install(cfd, version) => {
                debug!(
                    column_family = cfd.id(),
                    added = edit.new_files().len(),
                    deleted = edit.deleted_files().len(),
                    files = version.total_files(),
                    "installing version"
                );
                self.install_version(state, &cfd, Arc::new(version));
            }
        }

        if let Some(id) = edit.max_column_family() {
            self.column_families.write().update_max_column_family(id);
        }
        if let Some(num) = edit.log_number() {
            self.log_number.store(num, Ordering::SeqCst);
            self.mark_file_number_used(num);
        }
        if let Some(num) = edit.prev_log_number() {
            self.prev_log_number.store(num, Ordering::SeqCst);
        }
        if let Some(num) = edit.next_file_number() {
            self.next_file_number.fetch_max(num, Ordering::SeqCst);
        }
        if let Some(seq) = edit.last_sequence() {
            self.last_sequence.fetch_max(seq, Ordering::SeqCst);
        }

        Ok(())
    }

    fn install_version(&self, state: &mut ApplyState, cfd: &ColumnFamilyData, version: Arc<Version>) {
        // Reference the new files first so files kept across versions never
        // drop to zero in between.
        self.ref_files(state, &version);
        let old = cfd.install(version);
        self.unref_files(state, &old);
    }

    fn ref_files(&self, state: &mut ApplyState, version: &Version) {
        let column_family = version.column_family();
        for (_, file) in version.all_files() {
            state
                .live_files
                .entry((column_family, file.number()))
                .or_insert_with(|| {
                    let mut meta = (**file).clone();
                    meta.refs = 0;
                    meta
                })
                .refs += 1;
        }
    }

    fn unref_files(&self, state: &mut ApplyState, version: &Version) {
        let column_family = version.column_family();
        for (_, file) in version.all_files() {
            let key = (column_family, file.number());
            let Some(meta) = state.live_files.get_mut(&key) else {
                warn!(column_family, file = file.number(), "unreferencing unknown file");
                continue;
            };
            meta.refs = meta.refs.saturating_sub(1);
            if meta.refs > 0 {
                continue;
            }
            if let Some(meta) = state.live_files.remove(&key) {
                self.release_file(column_family, meta);
            }
        }
    }

    fn release_file(&self, column_family: u32, meta: FileMetaData) {
        debug!(column_family, file = meta.number(), "file no longer referenced");
        if let (Some(handle), Some(cache)) = (meta.table_reader_handle, &self.table_cache) {
            cache.release(meta.number(), handle);
        }
    }
}

fn live_file_mut(
    state: &mut ApplyState,
    column_family: u32,
    file_number: u64,
) -> Result<&mut FileMetaData> {
    state
        .live_files
        .get_mut(&(column_family, file_number))
        .ok_or_else(|| {
            Error::internal(format!(
                "file {} of column family {} is not referenced",
                file_number, column_family
            ))
        })
}

/// Builder for creating a new Version from edits.
///
/// Within one edit, deletions are applied before additions, so an edit can
/// move a file between levels by deleting and re-adding it.
pub struct VersionBuilder {
    /// Column family being built.
    column_family: u32,
    /// Levels in use.
    num_levels: usize,
    /// Files at each level.
    files: LevelFiles,
    /// Highest flushed op id seen.
    flushed_op_id: OpId,
}

impl VersionBuilder {
    /// Create a new empty builder.
    pub fn new(column_family: u32, num_levels: usize) -> Self {
        Self {
            column_family,
            num_levels,
            files: Default::default(),
            flushed_op_id: OpId::default(),
        }
    }

    /// Create a builder from an existing version.
    pub fn from_version(version: &Version, num_levels: usize) -> Self {
        let mut files: LevelFiles = Default::default();
        for (level, level_files) in files.iter_mut().enumerate() {
            *level_files = version.files(level).to_vec();
        }
        Self {
            column_family: version.column_family(),
            num_levels,
            files,
            flushed_op_id: version.flushed_op_id(),
        }
    }

    fn check_level(&self, level: usize) -> Result<()> {
        if level >= self.num_levels {
            return Err(Error::corruption(format!(
                "level {} exceeds configured {} levels",
                level, self.num_levels
            )));
        }
        Ok(())
    }

    /// Apply a VersionEdit to this builder.
    pub fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        for &(level, file_number) in edit.deleted_files() {
            self.check_level(level)?;
            let before = self.files[level].len();
            self.files[level].retain(|f| f.number() != file_number);
            if self.files[level].len() == before {
                warn!(
                    column_family = self.column_family,
                    level,
                    file = file_number,
                    "deleted file not present in version"
                );
            }
        }

        for (level, file) in edit.new_files() {
            self.check_level(*level)?;
            if self.files.iter().flatten().any(|f| f.number() == file.number()) {
                return Err(Error::corruption(format!(
                    "file {} added twice to column family {}",
                    file.number(),
                    self.column_family
                )));
            }
            self.files[*level].push(Arc::new(file.clone()));
        }

        self.flushed_op_id = self.flushed_op_id.max(edit.flushed_op_id());
        Ok(())
    }

    /// Build the final Version.
    pub fn build(mut self) -> Version {
        for (level, files) in self.files.iter_mut().enumerate() {
            if level == 0 {
                // L0: newest first
                files.sort_by(|a, b| {
                    b.largest
                        .seqno
                        .cmp(&a.largest.seqno)
                        .then_with(|| b.number().cmp(&a.number()))
                });
            } else {
                files.sort_by(|a, b| a.smallest.key.cmp(&b.smallest.key));
            }
        }

        Version::with_files(self.column_family, self.files, self.flushed_op_id)
    }
}

/// Check if a database exists at the given path.
pub fn database_exists(db_path: &Path) -> bool {
    current_file_path(db_path).exists()
}
