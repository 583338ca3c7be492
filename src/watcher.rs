//! Filesystem watching for new input files.
//!
//! Events arrive on notify's thread and are forwarded over a channel to an
//! event thread that filters and debounces them. Accepted paths go over a
//! second channel to a callback thread, so a slow callback (stability wait,
//! image processing) never delays delivery of other events.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::core::is_supported;
use crate::error::WatchError;
use crate::pipeline::panic_message;

/// Called once per settled candidate file
pub type FileCallback = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// Per-path event debouncing.
///
/// An event is dropped if the previous *forwarded* event for the same path
/// happened less than `window` ago. Dropped events do not extend the window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_seen: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    pub fn should_forward(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.last_seen
            .retain(|_, seen| now.saturating_duration_since(*seen) < window);

        if self.last_seen.contains_key(path) {
            return false;
        }
        self.last_seen.insert(path.to_path_buf(), now);
        true
    }

    /// Paths currently inside their debounce window
    pub fn pending(&self) -> usize {
        self.last_seen.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub recursive: bool,
    pub debounce: Duration,
    pub extensions: Vec<String>,
}

enum WatchMessage {
    Event(notify::Result<Event>),
    Stop,
}

struct ActiveWatch {
    watcher: RecommendedWatcher,
    control: Sender<WatchMessage>,
    stopped: Arc<AtomicBool>,
    event_thread: JoinHandle<()>,
    callback_thread: JoinHandle<()>,
}

/// Watches one root directory for new or moved-in image files
pub struct FolderWatcher {
    root: PathBuf,
    options: WatchOptions,
    state: WatcherState,
    active: Option<ActiveWatch>,
}

impl FolderWatcher {
    pub fn new(root: impl Into<PathBuf>, options: WatchOptions) -> Self {
        Self {
            root: root.into(),
            options,
            state: WatcherState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn is_watching(&self) -> bool {
        self.state == WatcherState::Watching
    }

    /// Subscribe to the root and start delivering files to `callback`
    pub fn start(&mut self, callback: FileCallback) -> Result<(), WatchError> {
        if self.is_watching() {
            return Err(WatchError::AlreadyActive);
        }
        if !self.root.is_dir() {
            return Err(WatchError::NotFound(self.root.clone()));
        }

        let (control, events) = mpsc::channel();
        let notify_tx = control.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = notify_tx.send(WatchMessage::Event(res));
        })?;

        let mode = if self.options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&self.root, mode)?;

        let stopped = Arc::new(AtomicBool::new(false));
        let (file_tx, file_rx) = mpsc::channel();

        let event_thread = {
            let options = self.options.clone();
            std::thread::Builder::new()
                .name("cutout-watch-events".to_string())
                .spawn(move || event_loop(events, file_tx, options))?
        };

        let callback_thread = {
            let stopped = Arc::clone(&stopped);
            std::thread::Builder::new()
                .name("cutout-watch-callback".to_string())
                .spawn(move || callback_loop(file_rx, stopped, callback))?
        };

        info!(
            "Started monitoring: {} (recursive: {})",
            self.root.display(),
            self.options.recursive
        );

        self.active = Some(ActiveWatch {
            watcher,
            control,
            stopped,
            event_thread,
            callback_thread,
        });
        self.state = WatcherState::Watching;
        Ok(())
    }

    /// Unsubscribe and wait for both watch threads to exit.
    ///
    /// Waits for a callback that is already running; queued paths that were
    /// not yet handed to the callback are discarded.
    pub fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.stopped.store(true, Ordering::SeqCst);
        drop(active.watcher);
        let _ = active.control.send(WatchMessage::Stop);
        drop(active.control);

        if active.event_thread.join().is_err() {
            warn!("Watch event thread panicked");
        }
        // Stopping from inside the callback (e.g. the last owner dropped there)
        // must not join the current thread.
        if active.callback_thread.thread().id() != std::thread::current().id()
            && active.callback_thread.join().is_err()
        {
            warn!("Watch callback thread panicked");
        }

        self.state = WatcherState::Stopped;
        info!("Stopped monitoring: {}", self.root.display());
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(events: Receiver<WatchMessage>, files: Sender<PathBuf>, options: WatchOptions) {
    let mut debouncer = Debouncer::new(options.debounce);

    while let Ok(message) = events.recv() {
        let event = match message {
            WatchMessage::Stop => break,
            WatchMessage::Event(Ok(event)) => event,
            WatchMessage::Event(Err(e)) => {
                warn!("Watch error: {}", e);
                continue;
            }
        };

        for path in candidate_paths(&event) {
            if !is_supported(&path, &options.extensions) {
                continue;
            }
            if !debouncer.should_forward(&path, Instant::now()) {
                debug!("Debounced event for {}", path.display());
                continue;
            }
            info!("New file detected: {}", path.display());
            if files.send(path).is_err() {
                return;
            }
        }
    }
}

fn callback_loop(files: Receiver<PathBuf>, stopped: Arc<AtomicBool>, callback: FileCallback) {
    for path in files {
        if stopped.load(Ordering::SeqCst) {
            break;
        }
        let shown = path.display().to_string();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(path))) {
            error!(
                "File callback panicked for {}: {}",
                shown,
                panic_message(payload.as_ref())
            );
        }
    }
}

/// Paths that entered the watched tree: created files and rename targets
fn candidate_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(CreateKind::File) | EventKind::Create(CreateKind::Any) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .cloned()
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        // Some backends report renames without saying which side this is.
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            event.paths.iter().filter(|p| p.is_file()).cloned().collect()
        }
        _ => Vec::new(),
    }
}
