//! Tree synchronization: reconciling nodes against the live filesystem.
//!
//! The merge walks the sorted live listing and the node's sorted children
//! and items in lockstep. Existing entries that sort before the next live
//! name no longer exist on disk and are pruned; live entries are filtered
//! and either matched to an existing entry, created, or skipped. Anything
//! left over past the end of the listing is stale and pruned.
//!
//! Cancellation is cooperative: the abort flag is checked at the top of
//! every per-node recursion and between live entries. A cancelled pass
//! keeps whatever it already applied; the pass is idempotent and the path
//! is immediately rerun.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::node::{DirNode, FileEntry, Tree};
use crate::cancel::AbortFlag;
use crate::error::canonicalize_existing_path;
use crate::filter::{name_excluded, IndexSettings};
use crate::mime::mime_for_entry;

/// One live directory entry, as consumed by the merge.
#[derive(Debug)]
struct ListedEntry {
    name: String,
    is_dir: bool,
    is_symlink: bool,
    mime_type: &'static str,
}

/// Lists a directory's entries sorted by name (byte order), resolving mime
/// types from names. Hidden entries are omitted unless requested. Entries
/// that fail to stat are skipped; an unreadable directory yields an empty
/// listing.
fn list_directory(path: &Path, index_hidden: bool) -> Vec<ListedEntry> {
    let read_dir = match fs::read_dir(path) {
        Ok(iter) => iter,
        Err(error) => {
            log::debug!("cannot list {}: {error}", path.display());
            return Vec::new();
        }
    };

    let mut entries: Vec<ListedEntry> = read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !index_hidden && name.starts_with('.') {
                return None;
            }
            // File type without following the link; whether a symlink leads
            // to a directory is decided by the target.
            let file_type = entry.file_type().ok()?;
            let is_symlink = file_type.is_symlink();
            let is_dir = if is_symlink {
                entry.path().is_dir()
            } else {
                file_type.is_dir()
            };
            let mime_type = mime_for_entry(&entry.path(), is_dir);
            Some(ListedEntry {
                name,
                is_dir,
                is_symlink,
                mime_type,
            })
        })
        .collect();

    entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Modification time of a directory, epoch seconds.
fn directory_mtime(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs())
}

impl Tree {
    /// Reconciles the whole tree against the live filesystem.
    ///
    /// `visited` is the per-pass set of canonical directory paths, shared
    /// across the recursion to break symlink cycles. `status` receives a
    /// progress line per re-listed directory.
    pub fn synchronize(
        &mut self,
        abort: &AbortFlag,
        status: &mut dyn FnMut(&str),
        settings: &IndexSettings,
        visited: &mut HashSet<PathBuf>,
    ) {
        self.sync_node(self.root, abort, status, settings, visited, 1);
    }

    fn sync_node(
        &mut self,
        node: super::arena::NodeId,
        abort: &AbortFlag,
        status: &mut dyn FnMut(&str),
        settings: &IndexSettings,
        visited: &mut HashSet<PathBuf>,
        depth: u32,
    ) {
        if abort.is_set() {
            return;
        }

        let dir_path = self.node_path(node);

        // Loop guard: each canonical directory is visited at most once per pass.
        if !visited.insert(canonicalize_existing_path(&dir_path)) {
            return;
        }

        let stored_mtime = match self.arena.get(node) {
            Some(dir) => dir.last_modified,
            None => return,
        };

        // Freshness gate: an unchanged directory is not re-listed, but in
        // scan mode its known subtree is still descended, since a child's
        // content can change without touching this directory's mtime.
        let disk_mtime = directory_mtime(&dir_path);
        let fresh = match disk_mtime {
            Some(mtime) => settings.forced || stored_mtime < mtime,
            None => false,
        };
        if !fresh {
            if settings.scan_mode {
                let children: Vec<_> = match self.arena.get(node) {
                    Some(dir) => dir.children.iter().copied().collect(),
                    None => return,
                };
                for child in children {
                    if abort.is_set() {
                        return;
                    }
                    self.sync_node(child, abort, status, settings, visited, depth + 1);
                }
            }
            return;
        }

        if let (Some(mtime), Some(dir)) = (disk_mtime, self.arena.get_mut(node)) {
            dir.last_modified = mtime;
        }

        status(&format!("Indexing {}", dir_path.display()));

        let listing = list_directory(&dir_path, settings.index_hidden);
        let relative_dir = self.relative_path(node);

        let (old_children, old_items) = match self.arena.get_mut(node) {
            Some(dir) => (
                std::mem::take(&mut dir.children),
                std::mem::take(&mut dir.items),
            ),
            None => return,
        };

        let mut children = old_children.into_iter().peekable();
        let mut items = old_items.into_iter().peekable();
        let mut new_children = thin_vec::ThinVec::new();
        let mut new_items = thin_vec::ThinVec::new();
        let max_depth = u32::from(settings.max_depth);

        for entry in listing {
            if abort.is_set() {
                break;
            }

            // Prune existing entries that sort strictly before this live name:
            // they no longer exist on disk.
            while let Some(&child_id) = children.peek() {
                let gone = match self.arena.get(child_id) {
                    Some(child) => child.name() < entry.name.as_str(),
                    None => true,
                };
                if !gone {
                    break;
                }
                children.next();
                self.remove_subtree(child_id);
            }
            while items
                .peek()
                .is_some_and(|item| item.name() < entry.name.as_str())
            {
                items.next();
            }

            let relative_path = format!("{relative_dir}/{}", entry.name);
            let excluded = name_excluded(&settings.name_filters, &relative_path);

            if entry.is_dir {
                let dir_excluded = excluded
                    || depth > max_depth
                    || (entry.is_symlink && !settings.follow_symlinks);
                let known = children
                    .peek()
                    .and_then(|&id| self.arena.get(id))
                    .is_some_and(|child| child.name() == entry.name.as_str());
                if known {
                    let child_id = children.next().expect("peeked child is present");
                    if dir_excluded {
                        self.remove_subtree(child_id);
                    } else {
                        new_children.push(child_id);
                        if settings.scan_mode {
                            self.sync_node(child_id, abort, status, settings, visited, depth + 1);
                        }
                    }
                } else if !dir_excluded {
                    let child_id = self
                        .arena
                        .insert(DirNode::new(entry.name.as_str(), Some(node), 0));
                    new_children.push(child_id);
                    // New directories are always scanned, scan mode or not.
                    self.sync_node(child_id, abort, status, settings, visited, depth + 1);
                }
            }

            // Every entry is a candidate item, directories included (their
            // mime type is inode/directory), gated by the mime allow-list.
            let item_excluded = !settings.mime_filters.matches(entry.mime_type)
                || excluded
                || depth > max_depth;
            let known = items
                .peek()
                .is_some_and(|item| item.name() == entry.name.as_str());
            if known {
                let existing = items.next().expect("peeked item is present");
                if item_excluded {
                    // Dropped; no longer passes filtering.
                } else if existing.mime_type() != entry.mime_type {
                    // Changed entries are replaced wholesale, never mutated.
                    new_items.push(FileEntry::new(entry.name.as_str(), entry.mime_type, node));
                } else {
                    new_items.push(existing);
                }
            } else if !item_excluded {
                new_items.push(FileEntry::new(entry.name.as_str(), entry.mime_type, node));
            }
        }

        if abort.is_set() {
            // Keep the untouched tail; the rerun will finish the job.
            new_children.extend(children);
            new_items.extend(items);
        } else {
            // Entries past the end of the live listing are stale.
            for child_id in children {
                self.remove_subtree(child_id);
            }
            drop(items);
        }

        if let Some(dir) = self.arena.get_mut(node) {
            dir.children = new_children;
            dir.items = new_items;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{MimeFilterSet, NameFilter};
    use std::fs::File;
    use tempfile::TempDir;

    fn settings(mime_patterns: &[&str]) -> IndexSettings {
        IndexSettings {
            mime_filters: MimeFilterSet::new(
                &mime_patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            ),
            ..IndexSettings::default()
        }
    }

    fn run(tree: &mut Tree, settings: &IndexSettings) -> usize {
        let abort = AbortFlag::new();
        let mut visited = HashSet::new();
        tree.synchronize(&abort, &mut |_| {}, settings, &mut visited);
        visited.len()
    }

    fn item_names(tree: &Tree) -> Vec<String> {
        let mut items = Vec::new();
        tree.items(&mut items);
        items.into_iter().map(|item| item.name).collect()
    }

    #[test]
    fn indexes_files_and_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        File::create(temp.path().join("a.txt")).unwrap();
        File::create(temp.path().join("sub/b.txt")).unwrap();

        let mut tree = Tree::new(temp.path());
        let visited = run(&mut tree, &settings(&["inode/directory", "text/plain"]));

        assert_eq!(visited, 2);
        assert_eq!(item_names(&tree), vec!["a.txt", "sub", "b.txt"]);
    }

    #[test]
    fn mime_filter_selects_directories_then_files() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        File::create(temp.path().join("a.txt")).unwrap();
        File::create(temp.path().join("b.txt")).unwrap();

        let mut tree = Tree::new(temp.path());
        run(&mut tree, &settings(&["inode/directory"]));
        assert_eq!(item_names(&tree), vec!["sub"]);

        let mut tree = Tree::new(temp.path());
        run(&mut tree, &settings(&["inode/directory", "text/plain"]));
        assert_eq!(item_names(&tree), vec!["a.txt", "b.txt", "sub"]);
    }

    #[test]
    fn depth_ladder() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("a")).unwrap();
        File::create(temp.path().join("a/foo.txt")).unwrap();

        let base = settings(&["inode/directory", "text/plain"]);

        let mut zero = base.clone();
        zero.max_depth = 0;
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &zero);
        assert!(item_names(&tree).is_empty());

        let mut one = base.clone();
        one.max_depth = 1;
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &one);
        assert_eq!(item_names(&tree), vec!["a"]);

        let mut two = base.clone();
        two.max_depth = 2;
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &two);
        assert_eq!(item_names(&tree), vec!["a", "foo.txt"]);
    }

    #[test]
    fn hidden_files_follow_policy() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join(".hidden.txt")).unwrap();
        File::create(temp.path().join("plain.txt")).unwrap();

        let base = settings(&["text/plain"]);

        let mut tree = Tree::new(temp.path());
        run(&mut tree, &base);
        assert_eq!(item_names(&tree), vec!["plain.txt"]);

        let mut hidden = base.clone();
        hidden.index_hidden = true;
        hidden.forced = true;
        run(&mut tree, &hidden);
        assert_eq!(item_names(&tree), vec![".hidden.txt", "plain.txt"]);

        // Flipping back drops the dotfile again, without duplicates.
        let mut visible = base;
        visible.forced = true;
        run(&mut tree, &visible);
        assert_eq!(item_names(&tree), vec!["plain.txt"]);
    }

    #[test]
    fn name_filters_toggle() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("build")).unwrap();
        File::create(temp.path().join("build/out.txt")).unwrap();
        File::create(temp.path().join("build/keep.txt")).unwrap();
        File::create(temp.path().join("top.txt")).unwrap();

        let mut config = settings(&["text/plain"]);
        config.name_filters = NameFilter::parse_all(&[
            "/build/".to_string(),
            "!/build/keep".to_string(),
        ]);

        let mut tree = Tree::new(temp.path());
        run(&mut tree, &config);
        assert_eq!(item_names(&tree), vec!["top.txt", "keep.txt"]);
    }

    #[test]
    fn deleted_entries_are_pruned() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("doomed")).unwrap();
        File::create(temp.path().join("doomed/file.txt")).unwrap();
        File::create(temp.path().join("stays.txt")).unwrap();

        let config = settings(&["inode/directory", "text/plain"]);
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &config);
        assert_eq!(item_names(&tree), vec!["doomed", "stays.txt", "file.txt"]);
        assert_eq!(tree.node_count(), 2);

        fs::remove_dir_all(temp.path().join("doomed")).unwrap();
        let mut forced = config;
        forced.forced = true;
        run(&mut tree, &forced);
        assert_eq!(item_names(&tree), vec!["stays.txt"]);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn unchanged_directory_is_not_relisted() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();

        let config = settings(&["text/plain"]);
        let mut tree = Tree::new(temp.path());

        let abort = AbortFlag::new();
        let mut listed = Vec::new();
        let mut visited = HashSet::new();
        tree.synchronize(&abort, &mut |s| listed.push(s.to_string()), &config, &mut visited);
        assert_eq!(listed.len(), 1);

        // Second pass: mtime unchanged, gate stays closed.
        let mut listed_again = Vec::new();
        let mut visited = HashSet::new();
        tree.synchronize(
            &abort,
            &mut |s| listed_again.push(s.to_string()),
            &config,
            &mut visited,
        );
        assert!(listed_again.is_empty());
        assert_eq!(item_names(&tree), vec!["a.txt"]);
    }

    #[test]
    fn forced_run_relists_everything() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();

        let mut config = settings(&["text/plain"]);
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &config);

        config.forced = true;
        let abort = AbortFlag::new();
        let mut listed = Vec::new();
        let mut visited = HashSet::new();
        tree.synchronize(&abort, &mut |s| listed.push(s.to_string()), &config, &mut visited);
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn aborted_pass_returns_immediately() {
        let temp = TempDir::new().unwrap();
        File::create(temp.path().join("a.txt")).unwrap();

        let mut tree = Tree::new(temp.path());
        let abort = AbortFlag::new();
        abort.set();
        let mut visited = HashSet::new();
        tree.synchronize(&abort, &mut |_| {}, &settings(&["text/plain"]), &mut visited);
        assert!(item_names(&tree).is_empty());
        assert!(visited.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_terminates() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("inner")).unwrap();
        File::create(temp.path().join("inner/file.txt")).unwrap();
        std::os::unix::fs::symlink(temp.path(), temp.path().join("inner/loop")).unwrap();

        let mut config = settings(&["inode/directory", "text/plain"]);
        config.follow_symlinks = true;

        let mut tree = Tree::new(temp.path());
        let visited = run(&mut tree, &config);

        // The root's canonical path is visited once; the loop symlink's
        // node exists but was not descended into again.
        assert_eq!(visited, 2);
        let names = item_names(&tree);
        assert_eq!(
            names.iter().filter(|name| name.as_str() == "file.txt").count(),
            1
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_directories_need_follow_symlinks() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("real")).unwrap();
        File::create(temp.path().join("real/file.txt")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("link")).unwrap();

        let config = settings(&["inode/directory", "text/plain"]);
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &config);

        // The link is not descended, but still shows up as a directory item.
        let mut items = Vec::new();
        tree.items(&mut items);
        let link_paths: Vec<_> = items
            .iter()
            .filter(|item| item.path.to_string_lossy().contains("link/"))
            .collect();
        assert!(link_paths.is_empty());
        assert!(items.iter().any(|item| item.name == "link"));
    }

    #[test]
    fn idempotent_under_unchanged_filesystem() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        File::create(temp.path().join("sub/x.txt")).unwrap();
        File::create(temp.path().join("y.txt")).unwrap();

        let config = settings(&["inode/directory", "text/plain"]);
        let mut tree = Tree::new(temp.path());
        run(&mut tree, &config);
        let first = crate::tree::persist::to_stored(&tree);

        run(&mut tree, &config);
        let second = crate::tree::persist::to_stored(&tree);

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
