//! The directory node tree.
//!
//! - `arena`: slab storage addressed by integer indices; parent links are
//!   indices, never owning references.
//! - `node`: directory nodes, leaf file entries, path derivation.
//! - `sync`: reconciliation of a tree against the live filesystem.
//! - `persist`: structured-value conversion for persistence.

pub mod arena;
pub mod node;
pub mod persist;
mod sync;

pub use arena::{NodeArena, NodeId, OptionNodeId};
pub use node::{DirNode, FileEntry, IndexedFile, Tree};
pub use persist::{StoredItem, StoredNode, StoredRoot};
