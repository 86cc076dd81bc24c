//! Per-path root coordinator.
//!
//! `IndexedRoot` owns one tree, the filter/policy configuration for its
//! path, and the optional live-watch and rescan-timer state. It never
//! re-indexes itself: every setter that changes indexing-relevant policy
//! marks the next run as forced and requests an update through the
//! orchestrator's queue.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::AbortFlag;
use crate::config::PathConfig;
use crate::filter::{IndexSettings, MimeFilterSet, NameFilter};
use crate::index::UpdateQueue;
use crate::tree::persist::{self, StoredRoot};
use crate::tree::{IndexedFile, Tree};
use crate::watcher::{start_watcher, RescanTimer};

struct ConfigState {
    config: PathConfig,
    /// Ignore freshness gates on the next run. Set by policy setters,
    /// cleared after a successful forced pass.
    forced: bool,
    scan_mode: bool,
}

#[derive(Default)]
struct WatchState {
    watcher: Option<notify::RecommendedWatcher>,
    timer: Option<RescanTimer>,
}

/// Coordinator for one indexed root path.
pub struct IndexedRoot {
    path: PathBuf,
    config: Mutex<ConfigState>,
    tree: Mutex<Tree>,
    watch: Mutex<WatchState>,
    queue: Arc<UpdateQueue>,
}

impl IndexedRoot {
    /// Creates a coordinator, restoring the tree from persisted data when
    /// available. A missing or non-directory root is tolerated with a
    /// warning; the next scan simply finds nothing.
    pub(crate) fn new(
        path: PathBuf,
        stored: Option<&StoredRoot>,
        queue: Arc<UpdateQueue>,
    ) -> Arc<Self> {
        if !path.exists() {
            log::warn!("root path does not exist: {}", path.display());
        } else if !path.is_dir() {
            log::warn!("root path is not a directory: {}", path.display());
        }

        let tree = match stored {
            Some(stored) if stored.path == path => persist::from_stored(stored),
            Some(stored) => {
                log::warn!(
                    "persisted tree path {} does not match {}, starting empty",
                    stored.path.display(),
                    path.display()
                );
                Tree::new(path.clone())
            }
            None => Tree::new(path.clone()),
        };

        Arc::new(Self {
            path,
            config: Mutex::new(ConfigState {
                config: PathConfig::default(),
                forced: false,
                scan_mode: true,
            }),
            tree: Mutex::new(tree),
            watch: Mutex::new(WatchState::default()),
            queue,
        })
    }

    /// The absolute path this coordinator indexes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs one synchronization pass. Called from the orchestrator's worker.
    pub(crate) fn update(&self, abort: &AbortFlag, status: &mut dyn FnMut(&str)) {
        let settings = {
            let state = self.config.lock();
            IndexSettings {
                name_filters: NameFilter::parse_all(&state.config.name_filters),
                mime_filters: MimeFilterSet::new(&state.config.mime_filters),
                max_depth: state.config.max_depth,
                index_hidden: state.config.index_hidden,
                follow_symlinks: state.config.follow_symlinks,
                forced: state.forced,
                scan_mode: state.scan_mode,
            }
        };

        let mut visited = HashSet::new();
        self.tree
            .lock()
            .synchronize(abort, status, &settings, &mut visited);

        status(&format!(
            "Indexed {} directories in {}",
            visited.len(),
            self.path.display()
        ));

        if settings.forced && !abort.is_set() {
            self.config.lock().forced = false;
        }
    }

    /// All indexed items for this root: the root directory itself first,
    /// then every leaf entry depth-first.
    pub fn items(&self) -> Vec<IndexedFile> {
        let tree = self.tree.lock();
        let mut items = vec![tree.root_item()];
        tree.items(&mut items);
        items
    }

    /// The tree in its persisted form.
    pub fn serialize(&self) -> StoredRoot {
        persist::to_stored(&self.tree.lock())
    }

    /// Replaces the tree from persisted data. Records for another path are
    /// ignored with a warning.
    pub fn deserialize(&self, stored: &StoredRoot) {
        if stored.path != self.path {
            log::warn!(
                "ignoring persisted tree for {} on root {}",
                stored.path.display(),
                self.path.display()
            );
            return;
        }
        *self.tree.lock() = persist::from_stored(stored);
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// A snapshot of the current configuration.
    pub fn config(&self) -> PathConfig {
        self.config.lock().config.clone()
    }

    pub fn name_filters(&self) -> Vec<String> {
        self.config.lock().config.name_filters.clone()
    }

    pub fn mime_filters(&self) -> Vec<String> {
        self.config.lock().config.mime_filters.clone()
    }

    pub fn index_hidden(&self) -> bool {
        self.config.lock().config.index_hidden
    }

    pub fn follow_symlinks(&self) -> bool {
        self.config.lock().config.follow_symlinks
    }

    pub fn max_depth(&self) -> u8 {
        self.config.lock().config.max_depth
    }

    pub fn watch_filesystem(&self) -> bool {
        self.config.lock().config.watch_filesystem
    }

    pub fn scan_interval(&self) -> u32 {
        self.config.lock().config.scan_interval
    }

    pub fn scan_mode(&self) -> bool {
        self.config.lock().scan_mode
    }

    pub fn set_name_filters(&self, patterns: Vec<String>) {
        {
            let mut state = self.config.lock();
            state.config.name_filters = patterns;
            state.forced = true;
        }
        self.queue.request(&self.path);
    }

    pub fn set_mime_filters(&self, patterns: Vec<String>) {
        {
            let mut state = self.config.lock();
            state.config.mime_filters = patterns;
            state.forced = true;
        }
        self.queue.request(&self.path);
    }

    pub fn set_index_hidden(&self, value: bool) {
        {
            let mut state = self.config.lock();
            state.config.index_hidden = value;
            state.forced = true;
        }
        self.queue.request(&self.path);
    }

    pub fn set_follow_symlinks(&self, value: bool) {
        {
            let mut state = self.config.lock();
            state.config.follow_symlinks = value;
            state.forced = true;
        }
        self.queue.request(&self.path);
    }

    pub fn set_max_depth(&self, value: u8) {
        {
            let mut state = self.config.lock();
            state.config.max_depth = value;
            state.forced = true;
        }
        self.queue.request(&self.path);
    }

    /// Policy knob: whether already-known subdirectories are re-descended on
    /// every pass. Does not trigger a re-index by itself.
    pub fn set_scan_mode(&self, value: bool) {
        self.config.lock().scan_mode = value;
    }

    /// Enables or disables the live filesystem watch. Watch events request
    /// a re-index; they do not mutate the tree directly.
    pub fn set_watch_filesystem(&self, value: bool) {
        self.config.lock().config.watch_filesystem = value;
        let mut watch = self.watch.lock();
        watch.watcher = if value {
            start_watcher(&self.path, self.queue.clone())
        } else {
            None
        };
    }

    /// Sets the periodic rescan interval in minutes; 0 disables it.
    pub fn set_scan_interval(&self, minutes: u32) {
        self.config.lock().config.scan_interval = minutes;
        let mut watch = self.watch.lock();
        watch.timer = if minutes > 0 {
            Some(RescanTimer::start(
                std::time::Duration::from_secs(u64::from(minutes) * 60),
                self.queue.clone(),
                self.path.clone(),
            ))
        } else {
            None
        };
    }

    /// Applies a whole configuration at once: one forced re-index instead of
    /// one per field.
    pub fn apply_config(&self, config: &PathConfig) {
        {
            let mut state = self.config.lock();
            state.config = config.clone();
            state.forced = true;
        }
        self.set_watch_filesystem(config.watch_filesystem);
        self.set_scan_interval(config.scan_interval);
        self.queue.request(&self.path);
    }
}

impl std::fmt::Debug for IndexedRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedRoot")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn test_root(path: &Path) -> Arc<IndexedRoot> {
        IndexedRoot::new(path.to_path_buf(), None, Arc::new(UpdateQueue::default()))
    }

    fn run(root: &IndexedRoot) {
        let abort = AbortFlag::new();
        root.update(&abort, &mut |_| {});
    }

    #[test]
    fn items_start_with_the_root_itself() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();

        let root = test_root(temp.path());
        root.set_mime_filters(vec!["inode/directory".into(), "text/plain".into()]);
        run(&root);

        let items = root.items();
        assert_eq!(items[0].path, temp.path());
        assert_eq!(items[0].mime_type, "inode/directory");
        assert!(items.iter().any(|item| item.name == "a.txt"));
    }

    #[test]
    fn forced_flag_clears_after_successful_run() {
        let temp = TempDir::new().unwrap();
        let root = test_root(temp.path());

        root.set_max_depth(3);
        assert!(root.config.lock().forced);
        run(&root);
        assert!(!root.config.lock().forced);
    }

    #[test]
    fn forced_flag_survives_aborted_run() {
        let temp = TempDir::new().unwrap();
        let root = test_root(temp.path());

        root.set_max_depth(3);
        let abort = AbortFlag::new();
        abort.set();
        root.update(&abort, &mut |_| {});
        assert!(root.config.lock().forced);
    }

    #[test]
    fn setters_enqueue_their_path() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(UpdateQueue::default());
        let root = IndexedRoot::new(temp.path().to_path_buf(), None, queue.clone());

        root.set_index_hidden(true);
        assert_eq!(queue.pending_len(), 1);
        root.set_follow_symlinks(true);
        assert_eq!(queue.pending_len(), 1); // coalesced
        assert!(root.index_hidden());
        assert!(root.follow_symlinks());
    }

    #[test]
    fn serialize_roundtrips_through_deserialize() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();

        let root = test_root(temp.path());
        root.set_mime_filters(vec!["text/plain".into()]);
        run(&root);
        let stored = root.serialize();

        let restored = test_root(temp.path());
        restored.deserialize(&stored);
        assert_eq!(root.items(), restored.items());
    }

    #[test]
    fn deserialize_rejects_foreign_paths() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        File::create(other.path().join("a.txt")).unwrap();

        let foreign = test_root(other.path());
        foreign.set_mime_filters(vec!["text/plain".into()]);
        run(&foreign);

        let root = test_root(temp.path());
        root.deserialize(&foreign.serialize());
        assert_eq!(root.items().len(), 1); // only the self item
    }
}
