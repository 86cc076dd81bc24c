//! Filesystem indexing library.
//!
//! Indexes directory subtrees into in-memory trees that mirror directory
//! structure, with:
//! - Incremental re-scans that reuse unchanged subtrees (mtime freshness
//!   gates plus a lexicographic merge against the live listing)
//! - Name/mime/depth/symlink filtering with toggle-chain precedence
//! - A single background worker serving a coalescing per-path update queue
//!   with cancel-and-restart semantics
//! - Structured persistence of the trees as one compact document

pub mod cancel;
pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod mime;
pub mod root;
pub mod tree;

mod watcher;

// Re-export main types
pub use cancel::AbortFlag;
pub use config::PathConfig;
pub use error::{IndexError, Result};
pub use filter::{IndexSettings, MimeFilterSet, NameFilter, PatternPolarity};
pub use index::{FsIndex, UpdateQueue};
pub use root::IndexedRoot;
pub use tree::{IndexedFile, StoredRoot, Tree};
