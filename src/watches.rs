use std::collections::HashMap;
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// A registration handed to the event port for one path
///
/// Captures everything `port_associate(3C)` needs to identify the file:
/// the path, the file mode, and the access/modify/status-change timestamps
/// from a metadata snapshot taken at (re-)registration time. The kernel
/// tracks the lifetime of the actual association; this is just the value
/// exchanged with it.
#[derive(Debug, Clone)]
pub struct Registration {
    path: PathBuf,
    mode: u32,
    atime: (i64, i64),
    mtime: (i64, i64),
    ctime: (i64, i64),
}

impl Registration {
    /// Builds a registration for `path` from a metadata snapshot
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Registration {
        Registration {
            path: path.to_path_buf(),
            mode: metadata.mode(),
            atime: (metadata.atime(), metadata.atime_nsec()),
            mtime: (metadata.mtime(), metadata.mtime_nsec()),
            ctime: (metadata.ctime(), metadata.ctime_nsec()),
        }
    }

    /// The path this registration refers to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file mode at registration time
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Last-access time as `(seconds, nanoseconds)`
    pub fn atime(&self) -> (i64, i64) {
        self.atime
    }

    /// Last-modify time as `(seconds, nanoseconds)`
    pub fn mtime(&self) -> (i64, i64) {
        self.mtime
    }

    /// Last-status-change time as `(seconds, nanoseconds)`
    pub fn ctime(&self) -> (i64, i64) {
        self.ctime
    }
}

/// The set of currently watched paths
///
/// Shared between the caller's thread (add/remove) and the event loop
/// (re-arm/unwatch). A path is present here if and only if the event port
/// currently holds an active registration for it. The lock is only held
/// for the duration of a map operation, never across a syscall, so a slow
/// kernel call for one path cannot stall operations on another.
#[derive(Debug, Default)]
pub(crate) struct WatchTable {
    entries: Mutex<HashMap<PathBuf, Registration>>,
}

impl WatchTable {
    pub(crate) fn new() -> WatchTable {
        WatchTable::default()
    }

    /// Records `registration` under its path, replacing any previous entry
    pub(crate) fn insert(&self, registration: Registration) {
        self.entries
            .lock()
            .insert(registration.path().to_path_buf(), registration);
    }

    /// Reports whether `path` is currently watched
    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    /// Drops the entry for `path`, returning its registration if present
    pub(crate) fn remove(&self, path: &Path) -> Option<Registration> {
        self.entries.lock().remove(path)
    }
}
