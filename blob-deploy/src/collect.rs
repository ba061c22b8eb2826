//! Collects the files of a source directory into [`FileDescriptor`]s.
//!
//! Basenames starting with `_` are skipped, as are directories and symlinks
//! to directories. The result is sorted by path so runs are deterministic.

use anyhow::{Context, Result};
use blob_deploy_core::config::FileDescriptor;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('_'))
        .unwrap_or(false)
}

pub fn collect_files(dir: &Path) -> Result<Vec<FileDescriptor>> {
    let base = dir
        .canonicalize()
        .with_context(|| format!("source directory {} is not accessible", dir.display()))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&base).follow_links(true) {
        let entry = entry.with_context(|| format!("failed to walk {}", base.display()))?;
        if !entry.file_type().is_file() || is_hidden(&entry) {
            continue;
        }
        files.push(FileDescriptor::new(entry.path()).with_base(&base));
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    tracing::info!(dir = %base.display(), count = files.len(), "Collected source files");
    Ok(files)
}
