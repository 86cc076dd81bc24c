//! Directory nodes, file entries, and the tree container.

use std::path::{Path, PathBuf};

use thin_vec::ThinVec;

use super::arena::{NodeArena, NodeId, OptionNodeId};
use crate::mime::DIRECTORY_MIME;

/// One directory in the index tree.
///
/// The name is a single path segment; the full path is derived by walking
/// parent indices up to the root. Children and items are kept sorted by name
/// (byte order); the synchronization merge relies on this.
#[derive(Debug)]
pub struct DirNode {
    pub(crate) name: Box<str>,
    /// Modification time of the backing directory, epoch seconds. Acts as
    /// the freshness gate for re-listing.
    pub(crate) last_modified: u64,
    pub(crate) parent: OptionNodeId,
    pub(crate) children: ThinVec<NodeId>,
    pub(crate) items: ThinVec<FileEntry>,
}

impl DirNode {
    pub(crate) fn new(name: impl Into<Box<str>>, parent: Option<NodeId>, last_modified: u64) -> Self {
        Self {
            name: name.into(),
            last_modified,
            parent: OptionNodeId::from_option(parent),
            children: ThinVec::new(),
            items: ThinVec::new(),
        }
    }

    /// The directory's name (single segment).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent node index, if any.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent.to_option()
    }
}

/// A leaf item: one indexed filesystem entry inside a directory.
///
/// Immutable after construction; when the on-disk entry changes it is
/// dropped and recreated rather than mutated. `dir` points back at the
/// owning directory and is used only for path derivation.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub(crate) name: Box<str>,
    pub(crate) mime_type: Box<str>,
    pub(crate) dir: NodeId,
}

impl FileEntry {
    pub(crate) fn new(name: impl Into<Box<str>>, mime_type: impl Into<Box<str>>, dir: NodeId) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            dir,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// A snapshot of one indexed item, exposed to downstream collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    pub name: String,
    pub path: PathBuf,
    pub mime_type: String,
}

/// The index tree for one root path: an arena of directory nodes plus the
/// distinguished root, which carries the absolute filesystem path no parent
/// could provide.
#[derive(Debug)]
pub struct Tree {
    pub(crate) arena: NodeArena<DirNode>,
    pub(crate) root: NodeId,
    root_path: PathBuf,
}

impl Tree {
    /// Creates an empty tree for the given absolute root path.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        let root_path = root_path.into();
        let name = root_name(&root_path);
        let mut arena = NodeArena::new();
        let root = arena.insert(DirNode::new(name, None, 0));
        Self {
            arena,
            root,
            root_path,
        }
    }

    /// The absolute path of the root directory.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Number of directory nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Computes the absolute path of a node by walking parent indices.
    pub fn node_path(&self, id: NodeId) -> PathBuf {
        let mut segments = Vec::new();
        let mut current = id;
        while current != self.root {
            match self.arena.get(current) {
                Some(node) => {
                    segments.push(node.name.clone());
                    match node.parent() {
                        Some(parent) => current = parent,
                        None => break,
                    }
                }
                None => break,
            }
        }
        let mut path = self.root_path.clone();
        for segment in segments.iter().rev() {
            path.push(segment.as_ref());
        }
        path
    }

    /// Computes a node's path relative to the root, `/`-prefixed. The root
    /// itself yields the empty string. This is the input the name filter
    /// chain matches against.
    pub fn relative_path(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = id;
        while current != self.root {
            match self.arena.get(current) {
                Some(node) => {
                    segments.push(node.name.clone());
                    match node.parent() {
                        Some(parent) => current = parent,
                        None => break,
                    }
                }
                None => break,
            }
        }
        let mut relative = String::new();
        for segment in segments.iter().rev() {
            relative.push('/');
            relative.push_str(segment);
        }
        relative
    }

    /// Collects all items depth-first: a directory's own items first, then
    /// its subdirectories' in child order.
    pub fn items(&self, out: &mut Vec<IndexedFile>) {
        self.collect_items(self.root, out);
    }

    fn collect_items(&self, id: NodeId, out: &mut Vec<IndexedFile>) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        for item in &node.items {
            out.push(IndexedFile {
                name: item.name.to_string(),
                path: self.node_path(item.dir).join(item.name.as_ref()),
                mime_type: item.mime_type.to_string(),
            });
        }
        for &child in &node.children {
            self.collect_items(child, out);
        }
    }

    /// Detaches a node from the arena together with its whole subtree.
    /// The caller is responsible for removing the id from its parent's
    /// child list.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) {
        if let Some(node) = self.arena.try_remove(id) {
            for child in node.children {
                self.remove_subtree(child);
            }
        }
    }

    /// An item snapshot for the root directory itself.
    pub fn root_item(&self) -> IndexedFile {
        IndexedFile {
            name: root_name(&self.root_path),
            path: self.root_path.clone(),
            mime_type: DIRECTORY_MIME.to_string(),
        }
    }
}

/// The final segment of a root path, or the path itself for `/`.
fn root_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
