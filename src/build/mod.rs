//! Dirty-file tracking for multi-round incremental builds

pub mod files_delta;
pub mod fs_state;
pub mod storage;

pub use files_delta::{canonical_path, FilesDelta};
pub use fs_state::FsState;
pub use storage::{
    FileStamps, InMemoryTimestampStorage, JsonTimestampStorage, StampState, SystemFileStamps,
    TimestampStorage,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of a compilation unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleName(pub String);

impl ModuleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source root of a module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RootDescriptor {
    pub module: ModuleName,
    pub root: PathBuf,
    pub is_test_root: bool,
}

impl RootDescriptor {
    pub fn new(module: ModuleName, root: impl Into<PathBuf>, is_test_root: bool) -> Self {
        Self {
            module,
            root: root.into(),
            is_test_root,
        }
    }
}

/// Files the compiler configuration tells us to skip
pub trait CompilerExcludes: Send + Sync {
    fn is_excluded(&self, file: &Path) -> bool;
}

impl<F> CompilerExcludes for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_excluded(&self, file: &Path) -> bool {
        self(file)
    }
}

/// Which module files the current build covers
pub trait CompileScope: Send + Sync {
    fn is_affected(&self, module: &ModuleName, file: &Path) -> bool;
}

impl<F> CompileScope for F
where
    F: Fn(&ModuleName, &Path) -> bool + Send + Sync,
{
    fn is_affected(&self, module: &ModuleName, file: &Path) -> bool {
        self(module, file)
    }
}

/// Build-driver state consulted while marking and processing files
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    pub scope: &'a dyn CompileScope,
    pub excludes: &'a dyn CompilerExcludes,
    pub compiling_tests: bool,
}

impl fmt::Debug for BuildContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("compiling_tests", &self.compiling_tests)
            .finish_non_exhaustive()
    }
}
