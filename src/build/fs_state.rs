//! Per-module dirty/deleted file state shared by build workers.
//!
//! Each module's [`FilesDelta`] sits behind its own mutex, so a compound
//! read-modify-write on one module (such as [`FsState::mark_all_up_to_date`])
//! is atomic with respect to other workers touching the same module, while
//! different modules proceed independently.
//!
//! Once rounds are active ([`FsState::before_next_round_start`]), marks on
//! context modules are mirrored into a round-scoped delta, and
//! [`FsState::process_files_to_recompile`] only reports what the previous
//! round dirtied.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::build::files_delta::{system_independent, FilesDelta};
use crate::build::storage::{FileStamps, SystemFileStamps, TimestampStorage};
use crate::build::{BuildContext, ModuleName, RootDescriptor};
use crate::config::BuildConfig;

type SharedDelta = Arc<Mutex<FilesDelta>>;

#[derive(Default)]
struct RoundState {
    context_modules: HashSet<ModuleName>,
    current: Option<SharedDelta>,
    last: Option<SharedDelta>,
}

pub struct FsState {
    deltas: Mutex<HashMap<ModuleName, SharedDelta>>,
    initial_production_scan: Mutex<HashSet<ModuleName>>,
    initial_tests_scan: Mutex<HashSet<ModuleName>>,
    rounds: Mutex<RoundState>,
    file_stamps: Box<dyn FileStamps>,
    stamp_tolerance_ms: u64,
}

impl Default for FsState {
    fn default() -> Self {
        Self::new()
    }
}

impl FsState {
    pub fn new() -> Self {
        Self::with_config(&BuildConfig::default())
    }

    pub fn with_config(config: &BuildConfig) -> Self {
        Self::with_file_stamps(config, Box::new(SystemFileStamps))
    }

    /// Use a custom clock for file modification stamps
    pub fn with_file_stamps(config: &BuildConfig, file_stamps: Box<dyn FileStamps>) -> Self {
        Self {
            deltas: Mutex::new(HashMap::new()),
            initial_production_scan: Mutex::new(HashSet::new()),
            initial_tests_scan: Mutex::new(HashSet::new()),
            rounds: Mutex::new(RoundState::default()),
            file_stamps,
            stamp_tolerance_ms: config.stamp_tolerance_ms,
        }
    }

    /// Forget everything; the next build starts from scratch
    pub fn on_rebuild(&self) {
        self.clear_context_round_data();
        self.initial_production_scan.lock().clear();
        self.initial_tests_scan.lock().clear();
        self.deltas.lock().clear();
        tracing::debug!("File state reset for rebuild");
    }

    /// Returns `true` the first time it is called for a module and scope
    pub fn mark_initial_scan_performed(&self, module: &ModuleName, for_tests: bool) -> bool {
        let scanned = if for_tests {
            &self.initial_tests_scan
        } else {
            &self.initial_production_scan
        };
        scanned.lock().insert(module.clone())
    }

    /// Add modules to the set whose marks are mirrored into round deltas
    pub fn set_context_chunk<I>(&self, modules: I)
    where
        I: IntoIterator<Item = ModuleName>,
    {
        self.rounds.lock().context_modules.extend(modules);
    }

    /// The current round becomes the last round and a fresh round starts
    pub fn before_next_round_start(&self) {
        let mut rounds = self.rounds.lock();
        rounds.last = rounds.current.take();
        rounds.current = Some(Arc::new(Mutex::new(FilesDelta::new())));
        tracing::debug!(
            "Starting next build round (previous round active: {})",
            rounds.last.is_some()
        );
    }

    pub fn clear_context_round_data(&self) {
        let mut rounds = self.rounds.lock();
        rounds.current = None;
        rounds.last = None;
        rounds.context_modules.clear();
    }

    pub fn clear_recompile(&self, rd: &RootDescriptor) {
        self.delta(&rd.module)
            .lock()
            .clear_recompile(&rd.root, rd.is_test_root);
    }

    /// Queue `file` for recompilation under `rd`
    pub fn mark_dirty(
        &self,
        file: &Path,
        rd: &RootDescriptor,
        storage: Option<&dyn TimestampStorage>,
    ) -> Result<()> {
        if let Some(round) = self.round_delta_for(&rd.module) {
            round
                .lock()
                .mark_recompile(&rd.root, rd.is_test_root, file);
        }

        let marked = self
            .delta(&rd.module)
            .lock()
            .mark_recompile(&rd.root, rd.is_test_root, file);
        tracing::trace!("Marked {:?} dirty in {} (new: {})", file, rd.module, marked);

        if marked {
            if let Some(storage) = storage {
                storage
                    .mark_dirty(file)
                    .with_context(|| format!("Failed to mark {:?} dirty", file))?;
            }
        }
        Ok(())
    }

    /// Clear the dirty set of `rd` after a successful compile.
    ///
    /// Excluded files lose their stamp. Files outside the scope, or modified
    /// after `build_start` (plus the configured tolerance), stay dirty. The
    /// rest get their stamp saved. Returns whether any file was marked up to
    /// date.
    pub fn mark_all_up_to_date(
        &self,
        context: &BuildContext<'_>,
        rd: &RootDescriptor,
        storage: &dyn TimestampStorage,
        build_start: u64,
    ) -> Result<bool> {
        let delta = self.delta(&rd.module);
        let mut delta = delta.lock();
        let Some(files) = delta.clear_recompile(&rd.root, rd.is_test_root) else {
            return Ok(false);
        };

        let deadline = build_start.saturating_add(self.stamp_tolerance_ms);
        let mut marked = false;
        let mut pending = files.into_iter();

        while let Some(file) = pending.next() {
            let outcome = self.settle_file(context, rd, storage, &file, deadline);
            match outcome {
                Ok(FileOutcome::UpToDate) => marked = true,
                Ok(FileOutcome::StillDirty) => {
                    delta.mark_recompile(&rd.root, rd.is_test_root, &file);
                }
                Ok(FileOutcome::Excluded) => {}
                Err(err) => {
                    // Keep the failed file and everything after it dirty
                    delta.mark_recompile(&rd.root, rd.is_test_root, &file);
                    for rest in pending {
                        delta.mark_recompile(&rd.root, rd.is_test_root, &rest);
                    }
                    return Err(err);
                }
            }
        }

        tracing::debug!(
            "Marked {:?} up to date in {} (anything marked: {})",
            rd.root,
            rd.module,
            marked
        );
        Ok(marked)
    }

    fn settle_file(
        &self,
        context: &BuildContext<'_>,
        rd: &RootDescriptor,
        storage: &dyn TimestampStorage,
        file: &Path,
        deadline: u64,
    ) -> Result<FileOutcome> {
        if context.excludes.is_excluded(file) {
            storage
                .remove(file)
                .with_context(|| format!("Failed to drop stamp of excluded {:?}", file))?;
            return Ok(FileOutcome::Excluded);
        }
        if !context.scope.is_affected(&rd.module, file) {
            return Ok(FileOutcome::StillDirty);
        }

        let stamp = self.file_stamps.last_modified(file);
        if stamp > deadline {
            tracing::debug!(
                "{:?} modified after build start ({} > {}), keeping it dirty",
                file,
                stamp,
                deadline
            );
            return Ok(FileOutcome::StillDirty);
        }

        storage
            .save_stamp(file, stamp)
            .with_context(|| format!("Failed to save stamp of {:?}", file))?;
        Ok(FileOutcome::UpToDate)
    }

    /// Feed every dirty file of `module` that is in scope and not excluded to
    /// `processor` as `(module, file, root)`, stopping when it returns `false`.
    ///
    /// When rounds are active only the last round's files are reported. The
    /// processor runs on a snapshot, so it may call back into this state.
    pub fn process_files_to_recompile<F>(
        &self,
        context: &BuildContext<'_>,
        module: &ModuleName,
        mut processor: F,
    ) -> Result<bool>
    where
        F: FnMut(&ModuleName, &Path, &str) -> Result<bool>,
    {
        let delta = self
            .rounds
            .lock()
            .last
            .clone()
            .unwrap_or_else(|| self.delta(module));

        let snapshot: Vec<(String, Vec<PathBuf>)> = delta
            .lock()
            .sources_to_recompile(context.compiling_tests)
            .iter()
            .map(|(root, files)| (system_independent(root), files.iter().cloned().collect()))
            .collect();

        for (root, files) in &snapshot {
            for file in files {
                if !context.scope.is_affected(module, file) || context.excludes.is_excluded(file)
                {
                    continue;
                }
                if !processor(module, file, root)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Record `file` as deleted and drop its stamp
    pub fn register_deleted(
        &self,
        module: &ModuleName,
        file: &Path,
        is_test: bool,
        storage: Option<&dyn TimestampStorage>,
    ) -> Result<()> {
        self.delta(module).lock().add_deleted(file, is_test);
        {
            let rounds = self.rounds.lock();
            for round in rounds.current.iter().chain(rounds.last.iter()) {
                round.lock().forget_recompile(file, is_test);
            }
        }
        tracing::trace!("Registered deleted {:?} in {}", file, module);

        if let Some(storage) = storage {
            storage
                .remove(file)
                .with_context(|| format!("Failed to drop stamp of deleted {:?}", file))?;
        }
        Ok(())
    }

    /// Canonical paths of deleted files, sorted
    pub fn deleted_paths(&self, module: &ModuleName, is_test: bool) -> Vec<String> {
        self.existing_delta(module)
            .map(|delta| delta.lock().deleted_paths(is_test))
            .unwrap_or_default()
    }

    pub fn clear_deleted_paths(&self, module: &ModuleName, is_test: bool) {
        if let Some(delta) = self.existing_delta(module) {
            delta.lock().clear_deleted_paths(is_test);
        }
    }

    /// Whether `file` is queued under `rd` in the module's main delta
    pub fn is_dirty(&self, rd: &RootDescriptor, file: &Path) -> bool {
        self.existing_delta(&rd.module)
            .is_some_and(|delta| delta.lock().is_marked(&rd.root, rd.is_test_root, file))
    }

    /// Every queued file of `module` in one scope, sorted by root then path
    pub fn dirty_files(&self, module: &ModuleName, for_tests: bool) -> Vec<PathBuf> {
        self.existing_delta(module)
            .map(|delta| {
                delta
                    .lock()
                    .sources_to_recompile(for_tests)
                    .values()
                    .flatten()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn delta(&self, module: &ModuleName) -> SharedDelta {
        Arc::clone(self.deltas.lock().entry(module.clone()).or_default())
    }

    fn existing_delta(&self, module: &ModuleName) -> Option<SharedDelta> {
        self.deltas.lock().get(module).cloned()
    }

    fn round_delta_for(&self, module: &ModuleName) -> Option<SharedDelta> {
        let rounds = self.rounds.lock();
        if rounds.context_modules.contains(module) {
            rounds.current.clone()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for FsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsState")
            .field("modules", &self.deltas.lock().len())
            .field("stamp_tolerance_ms", &self.stamp_tolerance_ms)
            .finish_non_exhaustive()
    }
}

enum FileOutcome {
    UpToDate,
    StillDirty,
    Excluded,
}
