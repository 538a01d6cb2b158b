use std::fs::{self, Metadata};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::Error;
use crate::events::{Event, EventFlags, Op};
use crate::ffi;
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
use crate::port::FenPort;
use crate::port::{EventPort, Notification};
use crate::translate::{translate, Verdict};
use crate::watches::{Registration, WatchTable};

/// The events every registration is armed for
const WATCH_EVENTS: EventFlags = EventFlags::MODIFIED
    .union(EventFlags::ATTRIB)
    .union(EventFlags::NOFOLLOW);

/// Watches a set of files and directories for changes
///
/// Wraps a FEN event port and a background thread that drains it,
/// translating the facility's one-shot notifications into a steady stream
/// of portable [`Event`]s. Registrations are re-armed after every
/// delivery, so a path added once stays watched until it is removed,
/// deleted, or renamed.
///
/// Adding a directory registers the directory and its direct children;
/// subdirectories are not descended into. Paths that appear in a watched
/// directory later are picked up automatically and announced with a
/// synthetic [`Op::Create`] event.
///
/// # Examples
///
/// ```ignore
/// use fen::Watcher;
///
/// let watcher = Watcher::open()?;
/// watcher.add("/export/home/alice/notes.txt")?;
///
/// for event in watcher.events().iter() {
///     println!("{}", event);
/// }
/// # Ok::<(), fen::Error>(())
/// ```
pub struct Watcher {
    inner: Arc<Inner>,
    events: Receiver<Event>,
    errors: Receiver<Error>,
}

impl Watcher {
    /// Creates a watcher backed by a freshly created event port
    ///
    /// Starts the background event loop. Fails with
    /// [`Error::PortCreation`] if the port cannot be created, for example
    /// because the process is out of file descriptors.
    #[cfg(any(target_os = "solaris", target_os = "illumos"))]
    pub fn open() -> Result<Watcher, Error> {
        let port = FenPort::create().map_err(Error::PortCreation)?;
        Ok(Watcher::with_port(Box::new(port)))
    }

    /// Creates a watcher on top of an existing facility implementation
    ///
    /// This is how the engine is exercised against something other than
    /// the real event port, e.g. an in-memory implementation in tests.
    /// The implementation must honor the [`EventPort`] contract, in
    /// particular that a blocked `wait` fails promptly after `close`.
    pub fn with_port(port: Box<dyn EventPort>) -> Watcher {
        let (events_tx, events_rx) = bounded(0);
        let (errors_tx, errors_rx) = bounded(0);
        let (done_tx, done_rx) = bounded(0);

        let inner = Arc::new(Inner {
            port,
            watches: WatchTable::new(),
            closed: AtomicBool::new(false),
            done: Mutex::new(Some(done_tx)),
            thread: Mutex::new(None),
        });

        let event_loop = EventLoop {
            inner: Arc::clone(&inner),
            events_tx,
            errors_tx,
            done_rx,
        };
        let handle = thread::spawn(move || event_loop.run());
        *inner.thread.lock() = Some(handle);

        Watcher {
            inner,
            events: events_rx,
            errors: errors_rx,
        }
    }

    /// Starts watching the file or directory at `path` (non-recursively)
    ///
    /// If `path` is a directory, its direct children are registered first
    /// and then the directory itself; subdirectories are not descended
    /// into. No event is emitted for the registration itself.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyClosed`] after [`close`](Watcher::close);
    /// [`Error::NotFound`]/[`Error::Stat`] if the path cannot be stat'ed;
    /// [`Error::Port`] if the facility rejects a registration. A
    /// directory walk stops at the first failing entry; children already
    /// registered by the same call stay registered.
    pub fn add<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        self.inner.add(path.as_ref())
    }

    /// Stops watching the file or directory at `path` (non-recursively)
    ///
    /// Mirrors [`add`](Watcher::add): for a directory, the direct
    /// children are deregistered first and then the directory itself.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyClosed`] after [`close`](Watcher::close);
    /// [`Error::NotWatched`] if `path` is not currently watched.
    pub fn remove<P>(&self, path: P) -> Result<(), Error>
    where
        P: AsRef<Path>,
    {
        self.inner.remove(path.as_ref())
    }

    /// The stream of portable events
    ///
    /// Delivery is consumer-paced. The channel disconnects once the
    /// watcher has been closed and the event loop has exited; no event is
    /// delivered after [`close`](Watcher::close) returns.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// The stream of background errors
    ///
    /// Carries errors the event loop cannot return to any caller:
    /// re-arming a path that has disappeared, unrecognized event bits,
    /// facility errors. Disconnects together with [`events`](Watcher::events).
    pub fn errors(&self) -> &Receiver<Error> {
        &self.errors
    }

    /// Shuts the watcher down
    ///
    /// Closes the event port, waits for the event loop to exit, and
    /// disconnects both output channels. Idempotent and safe to call from
    /// any thread; every caller after the first observes the teardown as
    /// already settled and returns immediately.
    pub fn close(&self) -> Result<(), Error> {
        self.inner.close();
        Ok(())
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// State shared between the caller's thread and the event loop
struct Inner {
    port: Box<dyn EventPort>,
    watches: WatchTable,
    closed: AtomicBool,
    done: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn add(&self, path: &Path) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }

        let metadata = fs::metadata(path).map_err(|err| Error::stat(path, err))?;
        if metadata.is_dir() {
            self.handle_directory(path, &metadata, Inner::associate_file)
        } else {
            self.associate_file(path, &metadata)
        }
    }

    fn remove(&self, path: &Path) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::AlreadyClosed);
        }
        if !self.watches.contains(path) {
            return Err(Error::NotWatched(path.to_path_buf()));
        }

        let metadata = fs::metadata(path).map_err(|err| Error::stat(path, err))?;
        if metadata.is_dir() {
            self.handle_directory(path, &metadata, Inner::dissociate_file)
        } else {
            self.dissociate_file(path, &metadata)
        }
    }

    /// Applies `handler` to every direct child of `path`, then to `path`
    /// itself, stopping at the first error
    fn handle_directory<F>(&self, path: &Path, metadata: &Metadata, handler: F) -> Result<(), Error>
    where
        F: Fn(&Inner, &Path, &Metadata) -> Result<(), Error>,
    {
        let entries = fs::read_dir(path).map_err(|err| Error::stat(path, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| Error::stat(path, err))?;
            let child = entry.path();
            let child_metadata = entry.metadata().map_err(|err| Error::stat(&child, err))?;
            handler(self, &child, &child_metadata)?;
        }

        handler(self, path, metadata)
    }

    /// Arms `path` with the event port and records the registration
    ///
    /// The table is only updated after the facility has accepted the
    /// registration, keeping table membership in lockstep with what the
    /// kernel actually holds.
    fn associate_file(&self, path: &Path, metadata: &Metadata) -> Result<(), Error> {
        let registration = Registration::from_metadata(path, metadata);
        self.port.associate(&registration, WATCH_EVENTS)?;
        self.watches.insert(registration);
        trace!(path = %path.display(), "armed watch");
        Ok(())
    }

    /// Drops the registration for `path`, if there is one
    ///
    /// Children of a directory passed to [`Watcher::remove`] may never
    /// have been watched individually; those are skipped silently.
    fn dissociate_file(&self, path: &Path, _metadata: &Metadata) -> Result<(), Error> {
        let registration = match self.watches.remove(path) {
            Some(registration) => registration,
            None => return Ok(()),
        };
        self.port.dissociate(&registration)?;
        trace!(path = %path.display(), "removed watch");
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the done sender abandons any event delivery the loop
        // is blocked on; closing the port fails its blocking wait. Only
        // then is joining the loop thread safe.
        self.done.lock().take();
        self.port.close();

        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// The background loop draining the event port
///
/// Owns the sending halves of the output channels; when the loop exits
/// they are dropped, which is what disconnects [`Watcher::events`] and
/// [`Watcher::errors`].
struct EventLoop {
    inner: Arc<Inner>,
    events_tx: Sender<Event>,
    errors_tx: Sender<Error>,
    done_rx: Receiver<()>,
}

impl EventLoop {
    fn run(self) {
        loop {
            let notification = match self.inner.port.wait() {
                Ok(notification) => notification,
                Err(err) => {
                    // The wait fails with an error when the port is
                    // closed out from under it; during teardown that is
                    // not worth reporting.
                    if self.inner.is_closed() {
                        debug!("event port closed, stopping event loop");
                        return;
                    }
                    if !self.send_error(Error::Port(err)) {
                        return;
                    }
                    continue;
                }
            };

            if notification.source != ffi::PORT_SOURCE_FILE {
                if !self.send_error(Error::UnexpectedSource(notification.source)) {
                    return;
                }
                continue;
            }

            if let Err(err) = self.handle_notification(notification) {
                if !self.send_error(err) {
                    return;
                }
            }
        }
    }

    fn handle_notification(&self, notification: Notification) -> Result<(), Error> {
        let Notification {
            path, events, mode, ..
        } = notification;
        let watched = self.inner.watches.contains(&path);

        match translate(&path, watched, mode, events)? {
            Verdict::RescanDirectory => {
                self.update_directory(&path)?;
                self.rearm(&path)
            }
            Verdict::Discard => {
                self.unwatch(&path);
                Ok(())
            }
            Verdict::Deliver { op, unwatch, rearm } => {
                if unwatch {
                    self.unwatch(&path);
                }
                if !self.send_event(Event {
                    path: path.clone(),
                    op,
                }) {
                    return Ok(());
                }
                if rearm {
                    self.rearm(&path)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Arms every entry of a watched directory that is not watched yet,
    /// announcing each with a synthetic `Create` event
    ///
    /// Entries that disappeared from the directory need no work here; the
    /// facility's own delete notification covers them.
    fn update_directory(&self, path: &Path) -> Result<(), Error> {
        let entries = fs::read_dir(path).map_err(|err| Error::stat(path, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| Error::stat(path, err))?;
            let child = entry.path();
            if self.inner.watches.contains(&child) {
                continue;
            }

            let metadata = entry.metadata().map_err(|err| Error::stat(&child, err))?;
            if let Err(err) = self.inner.associate_file(&child, &metadata) {
                if !self.send_error(err) {
                    return Ok(());
                }
            }
            if !self.send_event(Event {
                path: child,
                op: Op::Create,
            }) {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Builds a fresh registration for `path` and arms it again
    ///
    /// The path may have disappeared between the notification and this
    /// call; that race surfaces as a stat error on the error channel.
    fn rearm(&self, path: &Path) -> Result<(), Error> {
        let metadata = fs::metadata(path).map_err(|err| Error::stat(path, err))?;
        self.inner.associate_file(path, &metadata)
    }

    fn unwatch(&self, path: &Path) {
        if let Some(registration) = self.inner.watches.remove(path) {
            // The one-shot association has already fired; this just
            // releases the native registration.
            let _ = self.inner.port.dissociate(&registration);
            trace!(path = %path.display(), "unwatched");
        }
    }

    /// Hands an event to the consumer, returning false if the watcher was
    /// closed before the consumer took it
    fn send_event(&self, event: Event) -> bool {
        select! {
            send(self.events_tx, event) -> result => result.is_ok(),
            recv(self.done_rx) -> _ => false,
        }
    }

    /// Hands an error to the consumer, returning false if the watcher was
    /// closed before the consumer took it
    fn send_error(&self, error: Error) -> bool {
        select! {
            send(self.errors_tx, error) -> result => result.is_ok(),
            recv(self.done_rx) -> _ => false,
        }
    }
}
