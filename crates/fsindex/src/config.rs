//! Per-path configuration consumed by the root coordinator's setters.
//!
//! The host application persists these alongside its own settings and feeds
//! them back through [`crate::IndexedRoot::apply_config`] on startup.

use serde::{Deserialize, Serialize};

/// Configuration for one indexed path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathConfig {
    /// Name filter patterns; `!`-prefixed patterns re-include.
    pub name_filters: Vec<String>,
    /// Mime allow-list glob patterns.
    pub mime_filters: Vec<String>,
    /// Index hidden (dot-prefixed) entries.
    pub index_hidden: bool,
    /// Descend into symlinked directories.
    pub follow_symlinks: bool,
    /// Maximum indexing depth; 0 indexes the root only.
    pub max_depth: u8,
    /// Minutes between periodic rescans; 0 disables them.
    pub scan_interval: u32,
    /// Watch the filesystem and re-index on change.
    pub watch_filesystem: bool,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            name_filters: Vec::new(),
            mime_filters: vec![crate::mime::DIRECTORY_MIME.to_string()],
            index_hidden: false,
            follow_symlinks: false,
            max_depth: u8::MAX,
            scan_interval: 5,
            watch_filesystem: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PathConfig::default();
        assert_eq!(config.mime_filters, vec!["inode/directory".to_string()]);
        assert_eq!(config.max_depth, 255);
        assert_eq!(config.scan_interval, 5);
        assert!(!config.index_hidden);
        assert!(!config.follow_symlinks);
        assert!(!config.watch_filesystem);
    }

    #[test]
    fn partial_deserialization_fills_defaults() {
        let config: PathConfig =
            serde_json::from_str(r#"{"max_depth": 3, "index_hidden": true}"#).unwrap();
        assert_eq!(config.max_depth, 3);
        assert!(config.index_hidden);
        assert_eq!(config.scan_interval, 5);
        assert_eq!(config.mime_filters, vec!["inode/directory".to_string()]);
    }
}
