//! Output resolution.
//!
//! The external tool leaves the protected package "somewhere under" the
//! output directory — sometimes at the top, sometimes nested. The resolver
//! walks the tree and returns the first file carrying an accepted package
//! extension.
//!
//! When a run produces multiple candidates the pick is the first file
//! encountered in filesystem traversal order. That order is
//! implementation-defined and varies across platforms; callers must not
//! rely on any ranking beyond "first encountered".

use std::fs;
use std::path::{Path, PathBuf};

use crate::upload::has_package_extension;

/// Find the first package file under `output_dir`, or `None` when the scan
/// finds nothing matching. Unreadable entries are skipped, not fatal.
pub fn resolve(output_dir: &Path) -> Option<PathBuf> {
    let mut found = Vec::with_capacity(1);
    scan(output_dir, &mut found, 1);
    found.into_iter().next()
}

/// Collect up to `limit` package files under `dir` in traversal order.
fn scan(dir: &Path, found: &mut Vec<PathBuf>, limit: usize) {
    if found.len() >= limit {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
            return;
        }
    };
    for entry in entries.flatten() {
        if found.len() >= limit {
            return;
        }
        let path = entry.path();
        if path.is_dir() {
            scan(&path, found, limit);
        } else if path
            .file_name()
            .map(|n| n.to_string_lossy())
            .is_some_and(|n| has_package_extension(&n))
        {
            found.push(path);
        }
    }
}
