use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tempfile::TempDir;

use fen::{Error, Event, EventFlags, EventPort, Notification, Op, Registration, Watcher};

const TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn it_should_register_a_file() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    assert!(port.watched(&path));
}

#[test]
fn it_should_register_a_directory_and_its_children() {
    let testdir = TestDir::new();
    let (a, _) = testdir.new_file("a");
    let (b, _) = testdir.new_file("b");

    let (watcher, port) = test_watcher();
    watcher.add(testdir.path()).unwrap();

    assert!(port.watched(testdir.path()));
    assert!(port.watched(&a));
    assert!(port.watched(&b));

    watcher.remove(testdir.path()).unwrap();

    assert!(!port.watched(testdir.path()));
    assert!(!port.watched(&a));
    assert!(!port.watched(&b));
}

#[test]
fn it_should_fail_to_add_a_missing_path() {
    let testdir = TestDir::new();
    let (watcher, _port) = test_watcher();

    let result = watcher.add(testdir.path().join("missing"));
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn it_should_fail_to_remove_an_unwatched_path() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, _port) = test_watcher();

    let result = watcher.remove(&path);
    assert!(matches!(result, Err(Error::NotWatched(_))));
}

#[test]
fn it_should_deliver_a_write_event_and_rearm() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();
    let armed = port.associations();

    port.notify_file(&path, EventFlags::MODIFIED);

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(
        event,
        Event {
            path: path.clone(),
            op: Op::Write,
        }
    );

    // The registration is one-shot; the loop must arm it again after
    // delivering the event.
    wait_until(|| port.associations() > armed);
    assert!(port.watched(&path));
}

#[test]
fn it_should_deliver_a_chmod_event() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    port.notify_file(&path, EventFlags::ATTRIB);

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.op, Op::Chmod);
    assert_eq!(event.path, path);
}

#[test]
fn it_should_announce_new_directory_entries() {
    let testdir = TestDir::new();
    let (a, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(testdir.path()).unwrap();

    let (c, _) = testdir.new_file("c");
    port.notify_dir(testdir.path());

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(
        event,
        Event {
            path: c.clone(),
            op: Op::Create,
        }
    );
    assert!(port.watched(&c));

    // No event for the directory itself beyond the rescan: the next
    // delivery must be the write on `a` injected below.
    port.notify_file(&a, EventFlags::MODIFIED);
    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.path, a);
    assert_eq!(event.op, Op::Write);
}

#[test]
fn it_should_deliver_a_remove_event_for_a_deleted_file() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    port.notify_file(&path, EventFlags::DELETE);

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.op, Op::Remove);
    assert_eq!(event.path, path);

    // The path is unwatched by the time the event is delivered.
    assert!(!port.watched(&path));
    let result = watcher.remove(&path);
    assert!(matches!(result, Err(Error::NotWatched(_))));
}

#[test]
fn it_should_deliver_a_rename_event_and_unwatch() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    port.notify_file(&path, EventFlags::RENAME_FROM);

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.op, Op::Rename);
    assert_eq!(event.path, path);
    assert!(!port.watched(&path));
}

#[test]
fn it_should_report_rename_over_a_watched_path_as_remove() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    port.notify_file(&path, EventFlags::RENAME_TO);

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.op, Op::Remove);
    assert_eq!(event.path, path);
    assert!(!port.watched(&path));
}

#[test]
fn it_should_stay_silent_for_rename_onto_an_unwatched_path() {
    let testdir = TestDir::new();
    let (watched, _) = testdir.new_file("a");
    let (unwatched, _) = testdir.new_file("b");

    let (watcher, port) = test_watcher();
    watcher.add(&watched).unwrap();

    port.notify_file(&unwatched, EventFlags::RENAME_TO);
    port.notify_file(&watched, EventFlags::MODIFIED);

    // The first delivery must already be the write on the watched file;
    // the rename onto the unwatched name produces nothing.
    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.path, watched);
    assert_eq!(event.op, Op::Write);
}

#[test]
fn it_should_report_unknown_event_bits_on_the_error_channel() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    port.notify_file(&path, EventFlags::ACCESS);

    let error = watcher.errors().recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(error, Error::UnknownEvent { .. }));
}

#[test]
fn it_should_report_notifications_from_unexpected_sources() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    port.notify_raw(Notification {
        source: 3, // PORT_SOURCE_USER
        path: PathBuf::new(),
        events: EventFlags::empty(),
        mode: 0,
    });

    let error = watcher.errors().recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(error, Error::UnexpectedSource(3)));

    // The loop keeps running after the defensive check fires.
    port.notify_file(&path, EventFlags::MODIFIED);
    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.op, Op::Write);
}

#[test]
fn it_should_surface_a_failed_rearm_on_the_error_channel() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    // The file vanishes between the notification and the re-arm; the
    // write event is still delivered, the re-stat failure is reported.
    let mode = fs::metadata(&path).unwrap().mode();
    fs::remove_file(&path).unwrap();
    port.notify_raw(Notification {
        source: 7, // PORT_SOURCE_FILE
        path: path.clone(),
        events: EventFlags::MODIFIED,
        mode,
    });

    let event = watcher.events().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(event.op, Op::Write);

    let error = watcher.errors().recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(error, Error::NotFound(_)));
}

#[test]
fn it_should_close_idempotently() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, _port) = test_watcher();
    watcher.add(&path).unwrap();

    watcher.close().unwrap();
    watcher.close().unwrap();

    assert!(matches!(watcher.add(&path), Err(Error::AlreadyClosed)));
    assert!(matches!(watcher.remove(&path), Err(Error::AlreadyClosed)));

    // Both channels disconnect once the loop has exited.
    assert!(watcher.events().recv().is_err());
    assert!(watcher.errors().recv().is_err());
}

#[test]
fn it_should_close_despite_an_absent_consumer() {
    let testdir = TestDir::new();
    let (path, _) = testdir.new_file("a");

    let (watcher, port) = test_watcher();
    watcher.add(&path).unwrap();

    // Nobody reads the events channel, so the loop blocks delivering
    // this. Close must abandon the pending send instead of waiting.
    port.notify_file(&path, EventFlags::MODIFIED);
    thread::sleep(Duration::from_millis(50));

    watcher.close().unwrap();
    assert!(watcher.events().recv().is_err());
}

fn test_watcher() -> (Watcher, TestPort) {
    let port = TestPort::new();
    let watcher = Watcher::with_port(Box::new(port.clone()));
    (watcher, port)
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not met within {:?}", TIMEOUT);
}

struct TestDir {
    dir: TempDir,
}

impl TestDir {
    fn new() -> TestDir {
        TestDir {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn new_file(&self, name: &str) -> (PathBuf, File) {
        let path = self.dir.path().join(name);
        let mut file = File::create(&path)
            .unwrap_or_else(|error| panic!("Failed to create temporary file: {}", error));
        file.write_all(b"This should exist before the watch is added.")
            .unwrap_or_else(|error| panic!("Failed to write to file: {}", error));

        (path, file)
    }
}

/// In-memory stand-in for the kernel event port
///
/// Records associations and lets tests inject notifications. FEN
/// registrations are one-shot on the real facility, but nothing here
/// enforces that; the engine is expected to re-arm on its own, which the
/// tests observe through the association counter.
#[derive(Clone)]
struct TestPort {
    state: Arc<PortState>,
}

struct PortState {
    pending_tx: Sender<Notification>,
    pending_rx: Receiver<Notification>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    watches: Mutex<HashMap<PathBuf, u32>>,
    associations: AtomicUsize,
}

impl TestPort {
    fn new() -> TestPort {
        let (pending_tx, pending_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = unbounded();
        TestPort {
            state: Arc::new(PortState {
                pending_tx,
                pending_rx,
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_rx,
                watches: Mutex::new(HashMap::new()),
                associations: AtomicUsize::new(0),
            }),
        }
    }

    fn watched(&self, path: &Path) -> bool {
        self.state.watches.lock().contains_key(path)
    }

    fn associations(&self) -> usize {
        self.state.associations.load(Ordering::SeqCst)
    }

    /// Injects a file notification, using the mode recorded at
    /// association time like the real facility does
    fn notify_file(&self, path: &Path, events: EventFlags) {
        let mode = self
            .state
            .watches
            .lock()
            .get(path)
            .copied()
            .unwrap_or(0o100644);
        self.notify_raw(Notification {
            source: 7, // PORT_SOURCE_FILE
            path: path.to_path_buf(),
            events,
            mode,
        });
    }

    fn notify_dir(&self, path: &Path) {
        let mode = fs::metadata(path).unwrap().mode();
        self.notify_raw(Notification {
            source: 7,
            path: path.to_path_buf(),
            events: EventFlags::MODIFIED,
            mode,
        });
    }

    fn notify_raw(&self, notification: Notification) {
        self.state.pending_tx.send(notification).unwrap();
    }
}

impl EventPort for TestPort {
    fn associate(&self, registration: &Registration, _events: EventFlags) -> io::Result<()> {
        self.state
            .watches
            .lock()
            .insert(registration.path().to_path_buf(), registration.mode());
        self.state.associations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dissociate(&self, registration: &Registration) -> io::Result<()> {
        self.state.watches.lock().remove(registration.path());
        Ok(())
    }

    fn wait(&self) -> io::Result<Notification> {
        select! {
            recv(self.state.pending_rx) -> notification => notification
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "port gone")),
            recv(self.state.shutdown_rx) -> _ => {
                Err(io::Error::new(io::ErrorKind::Interrupted, "port closed"))
            }
        }
    }

    fn close(&self) {
        self.state.shutdown_tx.lock().take();
    }
}
