//! Mime type resolution for indexed entries.
//!
//! Directories always resolve to `inode/directory`. Files are guessed from
//! their extension; anything without a known extension falls back to
//! `application/octet-stream`. Detection is name-based only, no content
//! sniffing, since the index must not open every file it lists.

use std::path::Path;

/// Mime type assigned to directories.
pub const DIRECTORY_MIME: &str = "inode/directory";

/// Fallback mime type for files with no recognized extension.
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Resolves the mime type for a directory entry.
pub fn mime_for_entry(path: &Path, is_dir: bool) -> &'static str {
    if is_dir {
        DIRECTORY_MIME
    } else {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(FALLBACK_MIME)
    }
}
