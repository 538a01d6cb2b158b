//! Raw bindings for event ports and the file events notification source
//!
//! Declares the constants, structs, and functions described in
//! `port_create(3C)`, `port_associate(3C)`, and `port_get(3C)`. The
//! constants and structs are available on every platform so that the rest
//! of the crate can be built and tested anywhere; the functions themselves
//! only exist on Solaris and illumos.

#![allow(non_camel_case_types)]
#![allow(missing_docs)]

use libc::{c_int, c_ushort, c_void, timespec};


// Sources an event port can deliver notifications for, used in the
// `portev_source` field of `port_event`. This crate only ever associates
// objects with `PORT_SOURCE_FILE`.
pub const PORT_SOURCE_AIO  : c_ushort = 1;
pub const PORT_SOURCE_TIMER: c_ushort = 2;
pub const PORT_SOURCE_USER : c_ushort = 3;
pub const PORT_SOURCE_FD   : c_ushort = 4;
pub const PORT_SOURCE_ALERT: c_ushort = 5;
pub const PORT_SOURCE_MQ   : c_ushort = 6;
pub const PORT_SOURCE_FILE : c_ushort = 7;


// Events, used in the mask for port_associate and the port_event struct
pub const FILE_ACCESS  : c_int = 0x00000001;
pub const FILE_MODIFIED: c_int = 0x00000002;
pub const FILE_ATTRIB  : c_int = 0x00000004;
pub const FILE_TRUNC   : c_int = 0x00100000;


// Exception events. After one of these is delivered, the object can no
// longer be watched; re-registering it is an error.
pub const FILE_DELETE     : c_int = 0x00000010;
pub const FILE_RENAME_TO  : c_int = 0x00000020;
pub const FILE_RENAME_FROM: c_int = 0x00000040;
pub const UNMOUNTED       : c_int = 0x20000000;
pub const MOUNTEDOVER     : c_int = 0x40000000;

pub const FILE_EXCEPTION: c_int =
    UNMOUNTED | FILE_DELETE | FILE_RENAME_TO | FILE_RENAME_FROM | MOUNTEDOVER;


// Additional option that can be part of the mask for port_associate
pub const FILE_NOFOLLOW: c_int = 0x10000000;


/// Describes the file to watch, passed to `port_associate` by reference
///
/// The kernel matches the cached timestamps against the file's current
/// ones at association time; `fo_name` must point to a NUL-terminated
/// path that stays valid for the lifetime of the association.
#[repr(C)]
pub struct file_obj {
    pub fo_atime: timespec,
    pub fo_mtime: timespec,
    pub fo_ctime: timespec,
    pub fo_pad  : [usize; 3],
    pub fo_name : *mut libc::c_char,
}

/// A single notification retrieved via `port_get`
///
/// For `PORT_SOURCE_FILE` notifications, `portev_object` is the address
/// of the `file_obj` that was passed to `port_associate`, and
/// `portev_user` is the user pointer supplied at the same time.
#[repr(C)]
pub struct port_event {
    pub portev_events: c_int,
    pub portev_source: c_ushort,
    pub portev_pad   : c_ushort,
    pub portev_object: usize,
    pub portev_user  : *mut c_void,
}


#[cfg(any(target_os = "solaris", target_os = "illumos"))]
extern "C" {
    pub fn port_create() -> c_int;
    pub fn port_associate(
        port: c_int,
        source: c_int,
        object: usize,
        events: c_int,
        user: *mut c_void,
    ) -> c_int;
    pub fn port_dissociate(port: c_int, source: c_int, object: usize) -> c_int;
    pub fn port_get(port: c_int, pe: *mut port_event, timeout: *mut timespec) -> c_int;
}
