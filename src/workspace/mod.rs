//! Per-job scratch workspaces.
//!
//! Every protection job owns exactly one uniquely-named directory holding
//! the staged upload and an `output/` subdirectory the external tool writes
//! into. The directory exists from [`Workspace::acquire`] until
//! [`Workspace::release`]; release is idempotent, swallows (and logs) its
//! own errors, and also runs from `Drop` so an early `?` or a panic cannot
//! leak the tree.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use uuid::Uuid;

use crate::error::JobError;

const WORKSPACE_PREFIX: &str = "apk-protect-";

/// An exclusive scratch directory tied to one job's lifetime.
pub struct Workspace {
    job_id: Uuid,
    dir: PathBuf,
    output_dir: PathBuf,
    released: AtomicBool,
}

impl Workspace {
    /// Create a fresh workspace under the fast storage base.
    pub fn acquire() -> Result<Self, JobError> {
        Self::acquire_in(&fast_storage_base())
    }

    /// Create a fresh workspace under an explicit base directory.
    pub fn acquire_in(base: &Path) -> Result<Self, JobError> {
        let job_id = Uuid::new_v4();
        let dir = base.join(format!("{WORKSPACE_PREFIX}{job_id}"));
        let output_dir = dir.join("output");

        fs::create_dir_all(&output_dir).map_err(|e| JobError::Resource {
            reason: format!("failed to create workspace {}: {e}", dir.display()),
        })?;

        tracing::debug!(job_id = %job_id, dir = %dir.display(), "Workspace acquired");

        Ok(Self {
            job_id,
            dir,
            output_dir,
            released: AtomicBool::new(false),
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// The workspace root. Also used as the child process working directory
    /// so incidental file creation by the tool stays inside the job.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The directory the external tool is told to write results into.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the uploaded bytes into the workspace under a (pre-sanitized)
    /// filename and return the staged path.
    pub fn stage_input(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, JobError> {
        let path = self.dir.join(file_name);
        fs::write(&path, bytes).map_err(|e| JobError::Resource {
            reason: format!("failed to stage input {}: {e}", path.display()),
        })?;
        Ok(path)
    }

    /// Remove the workspace tree. Safe to call any number of times; removal
    /// errors are logged and swallowed — cleanup never masks the job outcome.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.dir.exists() {
            return;
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(job_id = %self.job_id, dir = %self.dir.display(), "Workspace released")
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.job_id,
                    dir = %self.dir.display(),
                    error = %e,
                    "Failed to remove workspace"
                );
            }
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pick the base directory for workspaces: `/tmp` when it exists (fast
/// storage on the deploy target), otherwise the system temp dir. A
/// performance and availability choice only; correctness does not depend
/// on which base is used.
fn fast_storage_base() -> PathBuf {
    let tmp = PathBuf::from("/tmp");
    if tmp.is_dir() { tmp } else { std::env::temp_dir() }
}

/// Remove stray artifact directories the external tool may have dropped
/// outside its declared output directory.
///
/// The tool's `--dump-code` mode creates directories named after the
/// package identifier (e.g. `com.example.app/`) full of `.json` dumps, in
/// whatever the current directory happens to be. Invoking with a job-scoped
/// working directory contains this, but the sweep stays as a defensive
/// backstop: any non-hidden directory directly under `root` whose name
/// contains a dot and which holds at least one `.json` file is removed.
///
/// Returns the number of directories removed. Errors are logged, never
/// propagated.
pub fn sweep_stray_artifacts(root: &Path) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(root = %root.display(), error = %e, "Stray artifact sweep skipped");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if !path.is_dir() || name.starts_with('.') || !name.contains('.') {
            continue;
        }
        // Never touch a live workspace, whatever it is named.
        if name.starts_with(WORKSPACE_PREFIX) {
            continue;
        }
        if !contains_json_file(&path) {
            continue;
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                tracing::info!(dir = %path.display(), "Removed stray dump directory");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(dir = %path.display(), error = %e, "Failed to remove stray directory");
            }
        }
    }
    removed
}

/// Recursively look for any `.json` file, tolerating unreadable entries.
fn contains_json_file(dir: &Path) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return false,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if contains_json_file(&path) {
                return true;
            }
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        {
            return true;
        }
    }
    false
}
