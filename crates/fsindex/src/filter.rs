//! Name/mime filters and the per-run scan policy.
//!
//! Name filters form an ordered chain with toggle semantics: evaluation
//! starts at "not excluded" and each filter flips the running state only
//! when its polarity opposes the current state and its pattern matches the
//! entry's root-relative path. Mime filters are an allow-list of glob
//! patterns; an item passes when its mime type matches any of them.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::error::{IndexError, Result};

/// Polarity of a name filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternPolarity {
    Include,
    Exclude,
}

/// A single name filter: a regex matched against root-relative paths.
#[derive(Debug, Clone)]
pub struct NameFilter {
    pub regex: Regex,
    pub polarity: PatternPolarity,
}

impl NameFilter {
    /// Parses a filter pattern. A leading `!` marks an Include filter,
    /// anything else is an Exclude filter.
    pub fn parse(pattern: &str) -> Result<Self> {
        let (polarity, pattern) = match pattern.strip_prefix('!') {
            Some(rest) => (PatternPolarity::Include, rest),
            None => (PatternPolarity::Exclude, pattern),
        };
        let regex = Regex::new(pattern)
            .map_err(|error| IndexError::InvalidFilter(format!("{pattern}: {error}")))?;
        Ok(Self { regex, polarity })
    }

    /// Parses a list of patterns, skipping invalid ones with a warning.
    pub fn parse_all(patterns: &[String]) -> Vec<NameFilter> {
        patterns
            .iter()
            .filter_map(|pattern| match Self::parse(pattern) {
                Ok(filter) => Some(filter),
                Err(error) => {
                    log::warn!("ignoring name filter: {error}");
                    None
                }
            })
            .collect()
    }
}

/// Evaluates the name filter chain against a root-relative path.
///
/// Returns true if the entry ends up excluded. An Exclude filter only takes
/// effect while the entry is currently included, and vice versa; this models
/// last-applicable-rule precedence, not last-match-wins.
pub fn name_excluded(filters: &[NameFilter], relative_path: &str) -> bool {
    let mut excluded = false;
    for filter in filters {
        let applicable = match filter.polarity {
            PatternPolarity::Exclude => !excluded,
            PatternPolarity::Include => excluded,
        };
        if applicable && filter.regex.is_match(relative_path) {
            excluded = !excluded;
        }
    }
    excluded
}

/// Allow-list of mime type glob patterns.
#[derive(Debug, Clone)]
pub struct MimeFilterSet {
    set: GlobSet,
    is_empty: bool,
}

impl Default for MimeFilterSet {
    fn default() -> Self {
        Self {
            set: GlobSet::empty(),
            is_empty: true,
        }
    }
}

impl MimeFilterSet {
    /// Builds the set from glob patterns, skipping invalid ones with a warning.
    pub fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut count = 0usize;
        for pattern in patterns {
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    count += 1;
                }
                Err(error) => log::warn!("ignoring mime filter {pattern}: {error}"),
            }
        }
        let set = builder.build().unwrap_or_else(|_| GlobSet::empty());
        Self {
            set,
            is_empty: count == 0,
        }
    }

    /// Returns true if the mime type matches any pattern. An empty set
    /// matches nothing.
    pub fn matches(&self, mime_type: &str) -> bool {
        !self.is_empty && self.set.is_match(mime_type)
    }
}

/// Snapshot of the indexing policy for one synchronization run.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub name_filters: Vec<NameFilter>,
    pub mime_filters: MimeFilterSet,
    /// 0 indexes the root only; entries of a directory at depth d are
    /// evaluated at depth d + 1 and depth-excluded when that exceeds this.
    pub max_depth: u8,
    pub index_hidden: bool,
    pub follow_symlinks: bool,
    /// Ignore freshness timestamps and re-list everything.
    pub forced: bool,
    /// Re-descend into already-known subdirectories on every pass.
    pub scan_mode: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            name_filters: Vec::new(),
            mime_filters: MimeFilterSet::default(),
            max_depth: u8::MAX,
            index_hidden: false,
            follow_symlinks: false,
            forced: false,
            scan_mode: true,
        }
    }
}
