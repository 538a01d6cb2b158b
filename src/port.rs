//! The event-port seam between the watcher engine and the kernel
//!
//! [`EventPort`] captures the slice of `port_create(3C)` /
//! `port_associate(3C)` / `port_get(3C)` behavior the watcher relies on.
//! [`FenPort`] is the production implementation; tests drive the engine
//! through an in-memory implementation instead, since FEN registrations
//! are one-shot and the engine's re-arm logic is what needs exercising.

use std::io;
use std::path::PathBuf;

use crate::events::EventFlags;
use crate::watches::Registration;

/// One raw notification retrieved from the facility
///
/// The path and file mode are recovered from the `file_obj` and user
/// payload that were handed to the facility at association time.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The facility source that produced the notification
    ///
    /// File events carry [`PORT_SOURCE_FILE`]; anything else points at a
    /// facility/engine mismatch.
    ///
    /// [`PORT_SOURCE_FILE`]: crate::ffi::PORT_SOURCE_FILE
    pub source: u16,
    /// The path the notification refers to
    pub path: PathBuf,
    /// The raw event bitmask
    pub events: EventFlags,
    /// The file mode cached at association time
    pub mode: u32,
}

/// A facility delivering one-shot per-file change notifications
///
/// An implementation must honor one contract beyond the obvious ones: a
/// blocked [`wait`](EventPort::wait) must return an error promptly once
/// [`close`](EventPort::close) has been called from another thread. The
/// watcher relies on this to cancel its event loop.
pub trait EventPort: Send + Sync {
    /// Registers `registration.path()` for the events in `events`
    ///
    /// The registration is one-shot: after a notification for the path
    /// has been delivered, it must be associated again to keep watching.
    fn associate(&self, registration: &Registration, events: EventFlags) -> io::Result<()>;

    /// Releases the registration for `registration.path()`
    ///
    /// Dissociating a path whose one-shot registration has already fired
    /// is not an error.
    fn dissociate(&self, registration: &Registration) -> io::Result<()>;

    /// Blocks until the next notification is available
    fn wait(&self) -> io::Result<Notification>;

    /// Closes the facility handle, causing any blocked `wait` to fail
    fn close(&self);
}

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
pub use self::fen::FenPort;

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
mod fen {
    use std::collections::HashMap;
    use std::ffi::{CStr, CString};
    use std::io;
    use std::mem;
    use std::os::unix::ffi::OsStrExt;
    use std::path::{Path, PathBuf};
    use std::ptr;
    use std::sync::atomic::{AtomicBool, Ordering};

    use libc::{c_int, c_uint, c_void, timespec};
    use parking_lot::Mutex;

    use super::{EventPort, Notification};
    use crate::events::EventFlags;
    use crate::ffi;
    use crate::watches::Registration;

    /// User payload attached to every association; `port_get` hands it
    /// back so the file mode survives even after the path is gone.
    #[repr(C)]
    struct FileInfo {
        mode: c_uint,
    }

    /// Keeps the memory referenced by an active association alive
    ///
    /// The kernel reports the `file_obj` address back in
    /// `portev_object`, so the box (and the path string `fo_name` points
    /// into) must not move or drop until the path is dissociated or
    /// re-associated.
    struct NativeObject {
        fobj: Box<ffi::file_obj>,
        _name: CString,
        _info: Box<FileInfo>,
    }

    // `file_obj` carries a raw pointer into `_name`, which is owned by
    // the same `NativeObject` and never handed out mutably.
    unsafe impl Send for NativeObject {}
    unsafe impl Sync for NativeObject {}

    /// An event port restricted to the file events notification source
    pub struct FenPort {
        port: c_int,
        closed: AtomicBool,
        objects: Mutex<HashMap<PathBuf, NativeObject>>,
    }

    impl FenPort {
        /// Creates an event port via `port_create(3C)`
        pub fn create() -> io::Result<FenPort> {
            let port = unsafe { ffi::port_create() };
            match port {
                -1 => Err(io::Error::last_os_error()),
                _ => Ok(FenPort {
                    port,
                    closed: AtomicBool::new(false),
                    objects: Mutex::new(HashMap::new()),
                }),
            }
        }

        fn timestamp(pair: (i64, i64)) -> timespec {
            timespec {
                tv_sec: pair.0 as libc::time_t,
                tv_nsec: pair.1 as libc::c_long,
            }
        }
    }

    impl EventPort for FenPort {
        fn associate(
            &self,
            registration: &Registration,
            events: EventFlags,
        ) -> io::Result<()> {
            let name = CString::new(registration.path().as_os_str().as_bytes())?;

            let fobj = Box::new(ffi::file_obj {
                fo_atime: Self::timestamp(registration.atime()),
                fo_mtime: Self::timestamp(registration.mtime()),
                fo_ctime: Self::timestamp(registration.ctime()),
                fo_pad: [0; 3],
                fo_name: name.as_ptr() as *mut _,
            });
            let info = Box::new(FileInfo {
                mode: registration.mode() as c_uint,
            });

            let result = unsafe {
                ffi::port_associate(
                    self.port,
                    ffi::PORT_SOURCE_FILE as c_int,
                    &*fobj as *const ffi::file_obj as usize,
                    events.bits(),
                    &*info as *const FileInfo as *mut c_void,
                )
            };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            // Replacing an entry drops the previous allocation for this
            // path; its one-shot association has already fired by the
            // time the engine re-arms.
            self.objects.lock().insert(
                registration.path().to_path_buf(),
                NativeObject {
                    fobj,
                    _name: name,
                    _info: info,
                },
            );
            Ok(())
        }

        fn dissociate(&self, registration: &Registration) -> io::Result<()> {
            let object = match self.objects.lock().remove(registration.path()) {
                Some(object) => object,
                None => return Ok(()),
            };

            let result = unsafe {
                ffi::port_dissociate(
                    self.port,
                    ffi::PORT_SOURCE_FILE as c_int,
                    &*object.fobj as *const ffi::file_obj as usize,
                )
            };
            match result {
                -1 => {
                    let error = io::Error::last_os_error();
                    // The one-shot registration may have fired already.
                    if error.raw_os_error() == Some(libc::ENOENT) {
                        Ok(())
                    } else {
                        Err(error)
                    }
                }
                _ => Ok(()),
            }
        }

        fn wait(&self) -> io::Result<Notification> {
            let mut pe: ffi::port_event = unsafe { mem::zeroed() };
            let result = unsafe { ffi::port_get(self.port, &mut pe, ptr::null_mut()) };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            if pe.portev_source != ffi::PORT_SOURCE_FILE {
                return Ok(Notification {
                    source: pe.portev_source,
                    path: PathBuf::new(),
                    events: EventFlags::from_bits_retain(pe.portev_events),
                    mode: 0,
                });
            }

            let (path, mode) = unsafe {
                let fobj = pe.portev_object as *const ffi::file_obj;
                let name = CStr::from_ptr((*fobj).fo_name);
                let path = Path::new(std::ffi::OsStr::from_bytes(name.to_bytes()));
                let info = pe.portev_user as *const FileInfo;
                (path.to_path_buf(), (*info).mode as u32)
            };

            Ok(Notification {
                source: pe.portev_source,
                path,
                events: EventFlags::from_bits_retain(pe.portev_events),
                mode,
            })
        }

        fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                unsafe {
                    libc::close(self.port);
                }
            }
        }
    }

    impl Drop for FenPort {
        fn drop(&mut self) {
            self.close();
        }
    }
}
