//! Source file discovery
//!
//! Walks a directory tree, pruning well-known build/VCS directories at
//! traversal time and selecting files whose leaf names match the configured
//! include globs. Discovery never opens file contents.

mod changes;

pub use changes::*;

use crate::error::{Error, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Directory names never descended into
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".next",
    ".cache",
    "vendor",
];

fn is_excluded_dir(name: &str) -> bool {
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid include pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("Invalid include patterns: {}", e)))
}

/// Walk `root` and return the relative paths of candidate files, sorted.
///
/// Include patterns match leaf filenames only; directory names are handled
/// solely by the fixed exclusion set plus the hidden-name rule. The root is
/// never pruned, so a hidden working directory can still be scanned.
pub fn discover(root: &Path, include_patterns: &[String]) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::Validation(format!(
            "Not a directory: {}",
            root.display()
        )));
    }

    let include = build_globset(include_patterns)?;
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if !entry.file_type().is_dir() {
                return true;
            }
            !is_excluded_dir(&entry.file_name().to_string_lossy())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("Skipping unreadable entry during walk: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if !include.is_match(entry.file_name()) {
            continue;
        }

        let path = entry.path();
        files.push(path.strip_prefix(root).unwrap_or(path).to_path_buf());
    }

    files.sort();
    debug!("Discovered {} candidate files under {:?}", files.len(), root);
    Ok(files)
}
