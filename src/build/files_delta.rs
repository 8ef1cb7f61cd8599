use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

/// Source root -> files under it that need recompiling
pub type RecompileSets = BTreeMap<PathBuf, BTreeSet<PathBuf>>;

/// Dirty and deleted files of one module, split into production and test scopes.
///
/// A file is never recorded as both dirty and deleted within one scope:
/// [`FilesDelta::add_deleted`] scrubs it from every recompile set first, and
/// [`FilesDelta::mark_recompile`] drops it from the deleted set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FilesDelta {
    deleted_production: BTreeSet<String>,
    deleted_tests: BTreeSet<String>,
    sources_to_recompile: RecompileSets,
    tests_to_recompile: RecompileSets,
}

impl FilesDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `file` under `root`. Returns `true` if it was not queued already.
    pub fn mark_recompile(&mut self, root: &Path, is_test_root: bool, file: &Path) -> bool {
        self.deleted_mut(is_test_root).remove(&canonical_path(file));
        self.recompile_mut(is_test_root)
            .entry(root.to_path_buf())
            .or_default()
            .insert(file.to_path_buf())
    }

    /// Record `file` as deleted after removing it from every recompile set
    pub fn add_deleted(&mut self, file: &Path, is_test: bool) {
        self.forget_recompile(file, is_test);
        self.deleted_mut(is_test).insert(canonical_path(file));
    }

    /// Drop `file` from every root of the scope without recording a deletion
    pub fn forget_recompile(&mut self, file: &Path, is_test: bool) {
        for files in self.recompile_mut(is_test).values_mut() {
            files.remove(file);
        }
    }

    pub fn clear_deleted_paths(&mut self, is_test: bool) {
        self.deleted_mut(is_test).clear();
    }

    pub fn sources_to_recompile(&self, for_tests: bool) -> &RecompileSets {
        if for_tests {
            &self.tests_to_recompile
        } else {
            &self.sources_to_recompile
        }
    }

    /// Canonical paths of deleted files, sorted
    pub fn deleted_paths(&self, is_test: bool) -> Vec<String> {
        let deleted = if is_test {
            &self.deleted_tests
        } else {
            &self.deleted_production
        };
        deleted.iter().cloned().collect()
    }

    /// Take the whole recompile set of `root` out of the delta
    pub fn clear_recompile(&mut self, root: &Path, is_test_root: bool) -> Option<BTreeSet<PathBuf>> {
        self.recompile_mut(is_test_root).remove(root)
    }

    /// Whether `file` is queued under `root`
    pub fn is_marked(&self, root: &Path, is_test_root: bool, file: &Path) -> bool {
        self.sources_to_recompile(is_test_root)
            .get(root)
            .is_some_and(|files| files.contains(file))
    }

    pub fn is_empty(&self) -> bool {
        self.deleted_production.is_empty()
            && self.deleted_tests.is_empty()
            && self.sources_to_recompile.values().all(BTreeSet::is_empty)
            && self.tests_to_recompile.values().all(BTreeSet::is_empty)
    }

    fn recompile_mut(&mut self, is_test: bool) -> &mut RecompileSets {
        if is_test {
            &mut self.tests_to_recompile
        } else {
            &mut self.sources_to_recompile
        }
    }

    fn deleted_mut(&mut self, is_test: bool) -> &mut BTreeSet<String> {
        if is_test {
            &mut self.deleted_tests
        } else {
            &mut self.deleted_production
        }
    }
}

/// Forward-slash form of a path with `.` and `..` folded away lexically.
/// The file system is never consulted.
pub fn canonical_path(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let mut prefix = String::new();
    let mut absolute = false;
    let mut parts: Vec<String> = Vec::new();

    for component in Path::new(&text).components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().replace('\\', "/"),
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|last| last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }

    let mut canonical = prefix;
    if absolute {
        canonical.push('/');
    }
    canonical.push_str(&parts.join("/"));
    canonical
}

/// Forward-slash form of a path without any folding
pub fn system_independent(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
