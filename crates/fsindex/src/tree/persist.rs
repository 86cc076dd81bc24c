//! Structured-value conversion of a tree.
//!
//! One record per node: `{name, lastmodified, children, items}`, items as
//! `{name, mimetype}`; the root record additionally carries the absolute
//! `path`. Timestamps are epoch seconds. Deserialization rebuilds parent
//! links during recursive construction: the arena hands out a child's
//! index before the child needs to be referenced, so no partially-built
//! node is ever touched.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::arena::NodeId;
use super::node::{DirNode, FileEntry, Tree};

/// Persisted form of one leaf item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredItem {
    pub name: String,
    #[serde(rename = "mimetype")]
    pub mime_type: String,
}

/// Persisted form of one directory node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    pub name: String,
    #[serde(rename = "lastmodified")]
    pub last_modified: u64,
    #[serde(default)]
    pub children: Vec<StoredNode>,
    #[serde(default)]
    pub items: Vec<StoredItem>,
}

/// Persisted form of a whole root: the node shape plus the absolute path
/// the root cannot derive from a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRoot {
    pub path: PathBuf,
    #[serde(flatten)]
    pub node: StoredNode,
}

/// Converts a tree into its persisted form.
pub fn to_stored(tree: &Tree) -> StoredRoot {
    StoredRoot {
        path: tree.root_path().to_path_buf(),
        node: store_node(tree, tree.root),
    }
}

fn store_node(tree: &Tree, id: NodeId) -> StoredNode {
    let Some(node) = tree.arena.get(id) else {
        return StoredNode {
            name: String::new(),
            last_modified: 0,
            children: Vec::new(),
            items: Vec::new(),
        };
    };
    StoredNode {
        name: node.name().to_string(),
        last_modified: node.last_modified,
        children: node
            .children
            .iter()
            .map(|&child| store_node(tree, child))
            .collect(),
        items: node
            .items
            .iter()
            .map(|item| StoredItem {
                name: item.name().to_string(),
                mime_type: item.mime_type().to_string(),
            })
            .collect(),
    }
}

/// Reconstructs a tree from its persisted form.
pub fn from_stored(stored: &StoredRoot) -> Tree {
    let mut tree = Tree::new(stored.path.clone());
    let root = tree.root;
    if let Some(node) = tree.arena.get_mut(root) {
        node.last_modified = stored.node.last_modified;
    }
    restore_items(&mut tree, root, &stored.node.items);
    for child in &stored.node.children {
        restore_node(&mut tree, root, child);
    }
    tree
}

fn restore_node(tree: &mut Tree, parent: NodeId, stored: &StoredNode) {
    // Two-phase: allocate first to obtain the index, then wire it up.
    let id = tree.arena.insert(DirNode::new(
        stored.name.as_str(),
        Some(parent),
        stored.last_modified,
    ));
    if let Some(parent_node) = tree.arena.get_mut(parent) {
        parent_node.children.push(id);
    }
    restore_items(tree, id, &stored.items);
    for child in &stored.children {
        restore_node(tree, id, child);
    }
}

fn restore_items(tree: &mut Tree, dir: NodeId, items: &[StoredItem]) {
    if let Some(node) = tree.arena.get_mut(dir) {
        node.items.extend(
            items
                .iter()
                .map(|item| FileEntry::new(item.name.as_str(), item.mime_type.as_str(), dir)),
        );
    }
}
