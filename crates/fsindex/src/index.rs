//! The index orchestrator.
//!
//! `FsIndex` owns the per-path coordinators and serializes all update
//! requests through a single long-lived worker thread. Pending requests
//! live in an insertion-ordered set, so duplicate requests for one path
//! coalesce; a request for the path that is currently being synchronized
//! sets that run's abort flag and re-enqueues the path, guaranteeing one
//! more pass that starts after the request was issued.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use parking_lot::{Condvar, Mutex};

use crate::cancel::AbortFlag;
use crate::error::{IndexError, Result};
use crate::root::IndexedRoot;
use crate::tree::persist::StoredRoot;
use crate::tree::IndexedFile;

/// Callback receiving human-readable progress lines.
pub type StatusHandler = Box<dyn Fn(&str) + Send>;

/// Callback invoked when the pending queue drains.
pub type FinishedHandler = Box<dyn Fn() + Send>;

// ---------------------------------------------------------------------------
// Update queue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    /// Coalescing pending set, first-inserted order.
    pending: IndexSet<PathBuf>,
    /// The path the worker is currently synchronizing, with its abort flag.
    running: Option<(PathBuf, AbortFlag)>,
    shutdown: bool,
}

/// Shared request queue between the control thread, the worker, watchers
/// and rescan timers.
pub struct UpdateQueue {
    state: Mutex<QueueState>,
    work_available: Condvar,
    run_finished: Condvar,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            work_available: Condvar::new(),
            run_finished: Condvar::new(),
        }
    }
}

impl UpdateQueue {
    /// Requests an update for a path. If that path is currently running,
    /// the run is cancelled and the path re-queued.
    pub fn request(&self, path: &Path) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.pending.insert(path.to_path_buf());
        if let Some((running, abort)) = &state.running {
            if running == path {
                abort.set();
            }
        }
        self.work_available.notify_one();
    }

    /// Blocks until there is a job, marking it running. Returns `None` on
    /// shutdown.
    fn next_job(&self) -> Option<(PathBuf, AbortFlag)> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            if let Some(path) = state.pending.shift_remove_index(0) {
                let abort = AbortFlag::new();
                state.running = Some((path.clone(), abort.clone()));
                return Some((path, abort));
            }
            self.work_available.wait(&mut state);
        }
    }

    /// Clears the running marker. Returns true if the queue is now idle.
    fn finish_run(&self) -> bool {
        let mut state = self.state.lock();
        state.running = None;
        self.run_finished.notify_all();
        state.pending.is_empty()
    }

    /// Drops any pending request for `path`; if it is currently running,
    /// cancels the run and blocks until the worker has exited the pass.
    fn cancel_and_wait(&self, path: &Path) {
        let mut state = self.state.lock();
        state.pending.shift_remove(path);
        if let Some((running, abort)) = &state.running {
            if running == path {
                abort.set();
            } else {
                return;
            }
        } else {
            return;
        }
        while !state.shutdown
            && state
                .running
                .as_ref()
                .is_some_and(|(running, _)| running == path)
        {
            self.run_finished.wait(&mut state);
        }
    }

    /// Stops the worker: cancels the active run and wakes everyone.
    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        if let Some((_, abort)) = &state.running {
            abort.set();
        }
        self.work_available.notify_all();
        self.run_finished.notify_all();
    }

    /// Waits until the queue is idle (nothing pending, nothing running).
    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !(state.pending.is_empty() && state.running.is_none()) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_finished.wait_for(&mut state, deadline - now);
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct Shared {
    queue: Arc<UpdateQueue>,
    roots: Mutex<BTreeMap<PathBuf, Arc<IndexedRoot>>>,
    cache_file: Option<PathBuf>,
    status: Mutex<Option<StatusHandler>>,
    finished: Mutex<Option<FinishedHandler>>,
}

impl Shared {
    fn emit_status(&self, message: &str) {
        if let Some(handler) = self.status.lock().as_ref() {
            handler(message);
        }
    }

    fn emit_finished(&self) {
        if let Some(handler) = self.finished.lock().as_ref() {
            handler();
        }
    }

    /// Writes the container document: one record per indexed root, keyed by
    /// absolute path, compact, via temp file + atomic rename.
    fn write_cache_snapshot(&self) -> Result<()> {
        let Some(cache_file) = &self.cache_file else {
            return Ok(());
        };

        let container: BTreeMap<String, StoredRoot> = {
            let roots = self.roots.lock();
            roots
                .iter()
                .map(|(path, root)| (path.to_string_lossy().into_owned(), root.serialize()))
                .collect()
        };

        if let Some(parent) = cache_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec(&container)
            .map_err(|error| IndexError::Persist(format!("encoding index cache: {error}")))?;
        let tmp_path = cache_file.with_extension("tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, cache_file)?;

        log::debug!(
            "wrote index cache to {} ({} roots)",
            cache_file.display(),
            container.len()
        );
        Ok(())
    }
}

/// Loads the container document, degrading per root: a record that fails to
/// parse is dropped with a warning so the other paths still load.
fn load_cache_container(cache_file: &Path) -> BTreeMap<PathBuf, StoredRoot> {
    let payload = match fs::read(cache_file) {
        Ok(payload) => payload,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(error) => {
            log::warn!("index cache read failed for {}: {error}", cache_file.display());
            return BTreeMap::new();
        }
    };

    let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_slice(&payload) {
        Ok(raw) => raw,
        Err(error) => {
            log::warn!(
                "index cache decode failed for {}: {error}",
                cache_file.display()
            );
            return BTreeMap::new();
        }
    };

    let mut container = BTreeMap::new();
    for (key, value) in raw {
        match serde_json::from_value::<StoredRoot>(value) {
            Ok(stored) => {
                container.insert(PathBuf::from(key), stored);
            }
            Err(error) => {
                log::warn!("dropping unparsable index record for {key}: {error}");
            }
        }
    }
    container
}

/// The filesystem index: a collection of indexed root paths served by one
/// background worker.
pub struct FsIndex {
    shared: Arc<Shared>,
    restored: Mutex<BTreeMap<PathBuf, StoredRoot>>,
    worker: Option<JoinHandle<()>>,
}

impl Default for FsIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FsIndex {
    /// Creates an index without persistence.
    pub fn new() -> Self {
        Self::build(None, true)
    }

    /// Creates an index that persists its trees to `cache_file` after every
    /// finished pass, and restores them from there as paths are added.
    pub fn with_cache(cache_file: impl Into<PathBuf>) -> Self {
        Self::build(Some(cache_file.into()), true)
    }

    /// An index whose worker never runs; queue mutations can be inspected.
    #[cfg(test)]
    fn new_paused() -> Self {
        Self::build(None, false)
    }

    fn build(cache_file: Option<PathBuf>, spawn_worker: bool) -> Self {
        let restored = cache_file
            .as_deref()
            .map(load_cache_container)
            .unwrap_or_default();

        let shared = Arc::new(Shared {
            queue: Arc::new(UpdateQueue::default()),
            roots: Mutex::new(BTreeMap::new()),
            cache_file,
            status: Mutex::new(None),
            finished: Mutex::new(None),
        });

        let worker = spawn_worker.then(|| {
            let shared = shared.clone();
            thread::spawn(move || worker_loop(shared))
        });

        Self {
            shared,
            restored: Mutex::new(restored),
            worker,
        }
    }

    /// Installs the progress text handler.
    pub fn set_status_handler(&self, handler: impl Fn(&str) + Send + 'static) {
        *self.shared.status.lock() = Some(Box::new(handler));
    }

    /// Installs the all-updates-finished handler.
    pub fn set_finished_handler(&self, handler: impl Fn() + Send + 'static) {
        *self.shared.finished.lock() = Some(Box::new(handler));
    }

    /// Registers a path and enqueues its first scan. The persisted tree is
    /// restored if the cache had one for this path.
    pub fn add_path(&self, path: impl Into<PathBuf>) -> Result<Arc<IndexedRoot>> {
        let path = path.into();
        let mut roots = self.shared.roots.lock();
        if roots.contains_key(&path) {
            return Err(IndexError::PathAlreadyRegistered(path));
        }

        let stored = self.restored.lock().remove(&path);
        let root = IndexedRoot::new(path.clone(), stored.as_ref(), self.queue_handle());
        roots.insert(path.clone(), root.clone());
        drop(roots);

        self.shared.queue.request(&path);
        Ok(root)
    }

    /// Deregisters a path. If it is currently being synchronized, cancels
    /// the run and blocks until the worker has observed the cancellation.
    pub fn remove_path(&self, path: &Path) -> Result<()> {
        if !self.shared.roots.lock().contains_key(path) {
            log::warn!("remove_path for unregistered path {}", path.display());
            return Err(IndexError::PathNotRegistered(path.to_path_buf()));
        }

        self.shared.queue.cancel_and_wait(path);
        self.shared.roots.lock().remove(path);
        Ok(())
    }

    /// Enqueues an update for one path, or for every registered path.
    pub fn update(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                if !self.shared.roots.lock().contains_key(path) {
                    return Err(IndexError::PathNotRegistered(path.to_path_buf()));
                }
                self.shared.queue.request(path);
            }
            None => {
                let paths: Vec<PathBuf> = self.shared.roots.lock().keys().cloned().collect();
                for path in paths {
                    self.shared.queue.request(&path);
                }
            }
        }
        Ok(())
    }

    /// The coordinator for a registered path.
    pub fn path(&self, path: &Path) -> Option<Arc<IndexedRoot>> {
        self.shared.roots.lock().get(path).cloned()
    }

    /// All registered coordinators, ordered by path.
    pub fn paths(&self) -> Vec<Arc<IndexedRoot>> {
        self.shared.roots.lock().values().cloned().collect()
    }

    /// The currently indexed items across all roots, ordered by root path.
    pub fn items(&self) -> Vec<IndexedFile> {
        let roots = self.paths();
        let mut items = Vec::new();
        for root in roots {
            items.extend(root.items());
        }
        items
    }

    /// Waits until every queued request has been processed. Returns false
    /// on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.shared.queue.wait_idle(timeout)
    }

    fn queue_handle(&self) -> Arc<UpdateQueue> {
        self.shared.queue.clone()
    }
}

impl Drop for FsIndex {
    fn drop(&mut self) {
        self.shared.queue.shutdown();
        if let Some(worker) = self.worker.take() {
            if self.shared.queue.state.lock().running.is_some() {
                log::warn!("waiting for the file indexer to observe shutdown");
            }
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while let Some((path, abort)) = shared.queue.next_job() {
        let root = shared.roots.lock().get(&path).cloned();
        if let Some(root) = root {
            log::info!("indexing {}", path.display());
            // A panicking pass is logged and treated as a no-op; the tree
            // keeps whatever state it reached and the worker stays alive.
            let pass = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                root.update(&abort, &mut |message| shared.emit_status(message));
            }));
            if pass.is_err() {
                log::error!("indexer crashed while synchronizing {}", path.display());
            }
            if let Err(error) = shared.write_cache_snapshot() {
                log::warn!("index cache write failed: {error}");
            }
        }
        if shared.queue.finish_run() {
            shared.emit_finished();
        }
    }
}
