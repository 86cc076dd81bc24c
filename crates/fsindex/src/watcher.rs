//! Live filesystem watching and periodic rescans.
//!
//! Neither path mutates a tree directly: both only request a re-index
//! through the orchestrator's queue, so every tree mutation still happens
//! on the single worker thread.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};

use crate::index::UpdateQueue;

/// Starts a recursive watch on `root`. Any non-access event requests a
/// re-index of the root. Returns `None` (with a warning) if the watch
/// cannot be established; indexing still works, just without live updates.
pub(crate) fn start_watcher(root: &Path, queue: Arc<UpdateQueue>) -> Option<RecommendedWatcher> {
    let request_path = root.to_path_buf();
    let result = recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) => {
            if !matches!(event.kind, EventKind::Access(_)) {
                queue.request(&request_path);
            }
        }
        Err(error) => log::warn!("filesystem watch error: {error}"),
    })
    .and_then(|mut watcher| {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map(|()| watcher)
    });

    match result {
        Ok(watcher) => Some(watcher),
        Err(error) => {
            log::warn!(
                "filesystem watcher disabled for {}: {error}",
                root.display()
            );
            None
        }
    }
}

/// Periodic rescan timer: requests a re-index of its path at a fixed
/// interval until dropped.
pub(crate) struct RescanTimer {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl RescanTimer {
    pub(crate) fn start(interval: Duration, queue: Arc<UpdateQueue>, path: PathBuf) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_for_thread = stop.clone();
        let handle = thread::spawn(move || {
            let (stopped, wakeup) = &*stop_for_thread;
            let mut stopped = stopped.lock();
            loop {
                let timed_out = wakeup.wait_for(&mut stopped, interval).timed_out();
                if *stopped {
                    return;
                }
                if timed_out {
                    queue.request(&path);
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for RescanTimer {
    fn drop(&mut self) {
        *self.stop.0.lock() = true;
        self.stop.1.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for RescanTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RescanTimer").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn watcher_starts_on_existing_directory() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(UpdateQueue::default());
        let watcher = start_watcher(temp.path(), queue);
        assert!(watcher.is_some());
    }

    #[test]
    fn watcher_declines_missing_directory() {
        let queue = Arc::new(UpdateQueue::default());
        let watcher = start_watcher(Path::new("/nonexistent/fsindex-test"), queue);
        assert!(watcher.is_none());
    }

    #[test]
    fn timer_requests_updates_until_dropped() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(UpdateQueue::default());
        let timer = RescanTimer::start(
            Duration::from_millis(20),
            queue.clone(),
            temp.path().to_path_buf(),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while queue.pending_len() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(queue.pending_len(), 1); // requests coalesce

        drop(timer); // joins the thread
    }
}
