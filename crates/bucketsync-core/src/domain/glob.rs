//! Outbound source patterns
//!
//! An outbound `source` such as `/tmp/watch/*.csv` names a directory to watch
//! (everything before the last path component) and a filename glob (the last
//! component). Only the base filename of an event path is matched against the
//! glob, so the pattern never has to cope with path separators.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use super::errors::DomainError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled filename glob.
///
/// `*` matches any run of characters, `?` exactly one, `[...]` a character
/// class. Matching is case-sensitive.
#[derive(Debug, Clone)]
pub struct FileGlob {
    pattern: Pattern,
}

impl FileGlob {
    pub fn new(pattern: &str) -> Result<Self, DomainError> {
        let pattern = Pattern::new(pattern).map_err(|e| DomainError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;
        Ok(Self { pattern })
    }

    /// Returns true when `filename` (a base name, not a path) matches.
    pub fn matches(&self, filename: &str) -> bool {
        self.pattern.matches_with(filename, MATCH_OPTIONS)
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// A parsed outbound source: watch directory plus filename glob.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    pub directory: PathBuf,
    pub glob: FileGlob,
}

impl SourcePattern {
    pub fn parse(source: &str) -> Result<Self, DomainError> {
        if source.is_empty() || source.ends_with('/') {
            return Err(DomainError::InvalidSource(format!(
                "'{source}' has no filename pattern"
            )));
        }

        let path = Path::new(source);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DomainError::InvalidSource(source.to_string()))?;

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self {
            directory,
            glob: FileGlob::new(file_name)?,
        })
    }

    /// Matches the base filename of `path` against the glob.
    pub fn matches_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.glob.matches(name))
    }
}
