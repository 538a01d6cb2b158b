#![warn(missing_docs)]

//! Binding and wrapper for the Solaris/illumos file events notification
//! facility.
//!
//! FEN delivers per-file change notifications through an [event port].
//! Unlike most watch APIs it is strictly one-shot: every delivered
//! notification disarms the registration, there is no recursive directory
//! watching, and renames are reported as codes that need context to
//! interpret. The [`Watcher`] in this crate hides all of that: it re-arms
//! registrations after each delivery, picks up new directory entries on
//! its own, and translates the raw event bits into a small portable
//! vocabulary of create/write/remove/rename/chmod events, delivered
//! through a channel.
//!
//! See the [`port_create(3C)`][port_create] man page for details on the
//! underlying facility, which the [`ffi`] module follows closely.
//!
//! [event port]: https://illumos.org/man/3C/port_create
//! [port_create]: https://illumos.org/man/3C/port_create

pub mod ffi;

mod errors;
mod events;
mod port;
mod translate;
mod watcher;
mod watches;

pub use crate::errors::Error;
pub use crate::events::{Event, EventFlags, Op};
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
pub use crate::port::FenPort;
pub use crate::port::{EventPort, Notification};
pub use crate::watcher::Watcher;
pub use crate::watches::Registration;
