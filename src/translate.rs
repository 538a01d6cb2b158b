//! Decision table turning raw FEN notifications into portable events
//!
//! FEN collapses distinct user-level operations into bitmask codes that
//! need contextual state to interpret, and its registrations are one-shot,
//! so every verdict also says whether the engine must drop the watch or
//! arm it again. The cases are evaluated in a fixed priority order;
//! changing the order changes observable behavior.

use std::path::Path;

use crate::errors::Error;
use crate::events::{EventFlags, Op};

/// What the engine must do about one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// A watched directory changed: re-scan its children, arm any new
    /// ones, and re-arm the directory itself. No event for the directory.
    RescanDirectory,
    /// Deliver `op` to the consumer, dropping and/or re-arming the watch
    /// as flagged.
    Deliver {
        op: Op,
        unwatch: bool,
        rearm: bool,
    },
    /// Drop the watch without telling the consumer. Used when a rename
    /// lands on a name that was never watched.
    Discard,
}

fn is_directory(mode: u32) -> bool {
    mode & (libc::S_IFMT as u32) == libc::S_IFDIR as u32
}

/// Translates one raw notification, given whether `path` is currently in
/// the watch table under the name the notification refers to
pub(crate) fn translate(
    path: &Path,
    watched: bool,
    mode: u32,
    events: EventFlags,
) -> Result<Verdict, Error> {
    if events.contains(EventFlags::MODIFIED) {
        if is_directory(mode) {
            return Ok(Verdict::RescanDirectory);
        }
        return Ok(Verdict::Deliver {
            op: Op::Write,
            unwatch: false,
            rearm: true,
        });
    }

    if events.contains(EventFlags::ATTRIB) {
        return Ok(Verdict::Deliver {
            op: Op::Chmod,
            unwatch: false,
            rearm: true,
        });
    }

    if events.contains(EventFlags::DELETE) {
        return Ok(Verdict::Deliver {
            op: Op::Remove,
            unwatch: true,
            rearm: false,
        });
    }

    if events.contains(EventFlags::RENAME_TO) {
        // The notification refers to the *new* occupant of the watched
        // name; the facility never reveals where the old file went. To a
        // watcher of the old name this is indistinguishable from a
        // deletion, so that is what gets reported.
        if watched {
            return Ok(Verdict::Deliver {
                op: Op::Remove,
                unwatch: true,
                rearm: false,
            });
        }
        return Ok(Verdict::Discard);
    }

    if events.contains(EventFlags::RENAME_FROM) {
        return Ok(Verdict::Deliver {
            op: Op::Rename,
            unwatch: true,
            rearm: false,
        });
    }

    Err(Error::UnknownEvent {
        path: path.to_path_buf(),
        events,
    })
}
