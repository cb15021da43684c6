//! Error types for the protection gateway.
//!
//! Errors are grouped by concern: what the client sent (`ValidationError`),
//! what happened while running a job (`JobError`), and what went wrong at
//! startup (`ConfigError`). The HTTP mapping lives in `server`; everything
//! here is transport-agnostic.

use std::path::PathBuf;
use std::time::Duration;

/// Rejections of the uploaded file itself. Always the client's fault (HTTP 400).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("no package file provided")]
    MissingFile,

    #[error("unsupported file type '{file_name}': only .apk and .aab files are accepted")]
    UnsupportedType { file_name: String },

    #[error(
        "file size {:.2} MB exceeds the maximum allowed size ({} MB)",
        *.size_bytes as f64 / (1024.0 * 1024.0),
        .max_bytes / (1024 * 1024)
    )]
    TooLarge { size_bytes: u64, max_bytes: u64 },

    #[error(
        "'{file_name}' appears to be already protected; upload the original package, not the protected version"
    )]
    AlreadyProcessed { file_name: String },
}

/// Failures of a protection job after validation passed (HTTP 500).
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The filesystem could not provide a job workspace.
    #[error("failed to allocate job workspace: {reason}")]
    Resource { reason: String },

    /// The Java runtime (or another required piece of the environment) is
    /// missing or unresponsive. Detected before the tool runs so a broken
    /// environment fails in seconds, not after the full job timeout.
    #[error("required runtime unavailable: {reason}")]
    DependencyMissing { reason: String },

    /// The protection tool exited non-zero. Both streams are preserved
    /// verbatim for diagnostics.
    #[error("protection tool exited with code {exit_code}")]
    ToolFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The tool exceeded its wall-clock deadline and was killed.
    #[error("protection timed out after {} seconds", .timeout.as_secs())]
    Timeout { timeout: Duration },

    /// The tool exited zero but left nothing matching the accepted
    /// extensions under the output directory.
    #[error("no output package produced under {}", .output_dir.display())]
    NoOutputProduced {
        output_dir: PathBuf,
        stdout: String,
        stderr: String,
    },

    /// The resolved output file exists but is zero bytes.
    #[error("protection completed but produced an empty file")]
    EmptyOutput,

    /// Catch-all for unexpected failures. The full context is logged before
    /// this is constructed; the reason is safe to show a caller.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl JobError {
    /// Extra diagnostic text safe to return to the caller, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::ToolFailed { stdout, stderr, .. } => {
                let text = if stderr.trim().is_empty() { stdout } else { stderr };
                Some(text.clone())
            }
            Self::NoOutputProduced { stdout, stderr, .. } => {
                let text = if stdout.trim().is_empty() { stderr } else { stdout };
                if text.trim().is_empty() {
                    Some("no output file found in output directory".to_string())
                } else {
                    Some(text.clone())
                }
            }
            Self::Timeout { .. } => Some(
                "the package may be too large or complex; try a smaller package or retry later"
                    .to_string(),
            ),
            Self::DependencyMissing { .. } => Some(
                "ensure a Java JDK is installed and JAVA_HOME is set correctly".to_string(),
            ),
            _ => None,
        }
    }
}

/// Errors raised while loading configuration at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}
