use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::events::EventFlags;

/// The error type for watcher operations
///
/// Errors from [`Watcher::add`] and [`Watcher::remove`] are returned to the
/// caller directly. Errors encountered by the background loop (re-arming a
/// path that has disappeared, unknown event bits, a failing facility call)
/// are delivered through [`Watcher::errors`] instead.
///
/// [`Watcher::add`]: crate::Watcher::add
/// [`Watcher::remove`]: crate::Watcher::remove
/// [`Watcher::errors`]: crate::Watcher::errors
#[derive(Debug, Error)]
pub enum Error {
    /// The event port could not be created
    #[error("failed to create event port")]
    PortCreation(#[source] io::Error),

    /// The watcher has already been closed
    #[error("watcher already closed")]
    AlreadyClosed,

    /// The path does not exist
    #[error("no such path: `{0}`")]
    NotFound(PathBuf),

    /// A metadata lookup on the path failed
    #[error("failed to stat `{path}`")]
    Stat {
        /// The path that could not be stat'ed
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// The path is not currently being watched
    #[error("not watching `{0}`")]
    NotWatched(PathBuf),

    /// The facility delivered an event with no recognized bits set
    #[error("unknown event bits {events:?} for `{path}`")]
    UnknownEvent {
        /// The path the event refers to
        path: PathBuf,
        /// The unrecognized bitmask
        events: EventFlags,
    },

    /// A notification arrived from a source other than the file source
    #[error("notification from unexpected source {0}")]
    UnexpectedSource(u16),

    /// A raw error from the event port facility
    #[error("event port error")]
    Port(#[from] io::Error),
}

impl Error {
    /// Wraps a failed metadata lookup, mapping a missing path to
    /// [`Error::NotFound`]
    pub(crate) fn stat(path: &Path, source: io::Error) -> Error {
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound(path.to_path_buf())
        } else {
            Error::Stat {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}
