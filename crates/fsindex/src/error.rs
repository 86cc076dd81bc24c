use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not registered: {0}")]
    PathNotRegistered(PathBuf),

    #[error("Path already registered: {0}")]
    PathAlreadyRegistered(PathBuf),

    #[error("Invalid filter pattern: {0}")]
    InvalidFilter(String),

    #[error("Persistence error: {0}")]
    Persist(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Canonicalizes a path, returning the lexical path if canonicalization fails
/// (e.g. for a dangling symlink).
pub fn canonicalize_existing_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
