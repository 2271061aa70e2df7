//! Lists and filters source images in the upload directory.

use crate::models::SUPPORTED_EXTENSIONS;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

pub fn is_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Supported extension and not a dotfile. Says nothing about whether the path exists.
pub fn is_candidate(path: &Path) -> bool {
    !is_hidden(path) && is_supported_extension(path)
}

pub fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
}

/// Regular files directly inside `dir` that qualify for processing, sorted.
pub fn list_candidates(dir: &Path, excludes: &GlobSet) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => return Err(e.into()),
            Err(_) => continue,
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_candidate(path) || is_excluded(path, excludes) {
            continue;
        }
        out.push(path.to_path_buf());
    }
    out.sort();
    Ok(out)
}
