use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::ffi;

bitflags! {
    /// Mask for a file watch
    ///
    /// Passed to [`EventPort::associate`] to describe what to watch a file
    /// for, and reported back in a [`Notification`] to describe what
    /// happened to it. The constants correspond to the `FILE_*` event bits
    /// of `port_associate(3C)`.
    ///
    /// [`EventPort::associate`]: crate::EventPort::associate
    /// [`Notification`]: crate::Notification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventFlags: i32 {
        /// File was accessed
        ///
        /// See [`ffi::FILE_ACCESS`].
        const ACCESS = ffi::FILE_ACCESS;

        /// File was modified
        ///
        /// For a watched directory, this is also delivered when entries
        /// are added to or removed from the directory.
        ///
        /// See [`ffi::FILE_MODIFIED`].
        const MODIFIED = ffi::FILE_MODIFIED;

        /// Metadata (permissions, timestamps, ...) changed
        ///
        /// See [`ffi::FILE_ATTRIB`].
        const ATTRIB = ffi::FILE_ATTRIB;

        /// File was truncated
        ///
        /// See [`ffi::FILE_TRUNC`].
        const TRUNC = ffi::FILE_TRUNC;

        /// Watched file/directory was deleted
        ///
        /// This is an exception event; the registration is gone once it
        /// has been delivered.
        ///
        /// See [`ffi::FILE_DELETE`].
        const DELETE = ffi::FILE_DELETE;

        /// Another file was renamed over the watched path
        ///
        /// The watched name now refers to a different object; the old one
        /// is, as far as this watch can tell, gone.
        ///
        /// See [`ffi::FILE_RENAME_TO`].
        const RENAME_TO = ffi::FILE_RENAME_TO;

        /// Watched file/directory was renamed away
        ///
        /// See [`ffi::FILE_RENAME_FROM`].
        const RENAME_FROM = ffi::FILE_RENAME_FROM;

        /// File system containing the watched object was unmounted
        ///
        /// See [`ffi::UNMOUNTED`].
        const UNMOUNTED = ffi::UNMOUNTED;

        /// Watched object was mounted over
        ///
        /// See [`ffi::MOUNTEDOVER`].
        const MOUNTED_OVER = ffi::MOUNTEDOVER;

        /// Don't dereference the path if it is a symbolic link
        ///
        /// Only meaningful in the mask passed to
        /// [`EventPort::associate`](crate::EventPort::associate).
        ///
        /// See [`ffi::FILE_NOFOLLOW`].
        const NOFOLLOW = ffi::FILE_NOFOLLOW;
    }
}

/// The kind of change an [`Event`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// A new path appeared in a watched directory
    Create,
    /// A watched file's contents changed
    Write,
    /// A watched path was deleted, or renamed over
    Remove,
    /// A watched path was renamed away to a new name
    Rename,
    /// A watched path's metadata changed
    Chmod,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Op::Create => "CREATE",
            Op::Write => "WRITE",
            Op::Remove => "REMOVE",
            Op::Rename => "RENAME",
            Op::Chmod => "CHMOD",
        };
        f.write_str(name)
    }
}

/// A portable file system event
///
/// Delivered through [`Watcher::events`] for every change the watcher
/// observes on a path previously registered via [`Watcher::add`].
///
/// [`Watcher::events`]: crate::Watcher::events
/// [`Watcher::add`]: crate::Watcher::add
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The path the change happened to
    pub path: PathBuf,
    /// What kind of change it was
    pub op: Op,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.op)
    }
}
