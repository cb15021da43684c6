//! Java runtime resolution and liveness probing.
//!
//! The protection tool is a jar, so every job needs a working `java`. The
//! resolver walks an ordered list of candidates (`$JAVA_HOME/bin/<tool>` if
//! it exists on disk, then the bare name via `PATH`) and the probe runs a
//! short `-version` check so a broken environment fails in seconds instead
//! of eating the full job timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::error::JobError;

/// How long the `java -version` probe may take before the environment is
/// declared broken.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve a JDK-bundled tool (`java`, `jarsigner`, ...) to an invocable
/// command. Candidates in order: `<java_home>/bin/<tool>` when that file
/// exists, then the bare tool name for `PATH` lookup.
pub fn resolve_jdk_tool(java_home: Option<&Path>, tool: &str) -> PathBuf {
    if let Some(home) = java_home {
        let candidate = home.join("bin").join(tool);
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(tool)
}

/// A resolved `java` command.
#[derive(Debug, Clone)]
pub struct JavaRuntime {
    command: PathBuf,
}

impl JavaRuntime {
    pub fn resolve(java_home: Option<&Path>) -> Self {
        let command = resolve_jdk_tool(java_home, "java");
        tracing::debug!(java = %command.display(), "Resolved Java runtime");
        Self { command }
    }

    /// The command used to launch the runtime.
    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Run `java -version` with a short deadline and return the version
    /// banner (first line of stderr, where the JDK prints it).
    ///
    /// Not-found, non-zero exit, and probe timeout all classify as
    /// `DependencyMissing`: the environment cannot run the tool.
    pub async fn probe(&self) -> Result<String, JobError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| JobError::DependencyMissing {
            reason: format!("java not found ({}): {e}", self.command.display()),
        })?;

        let output = match timeout(PROBE_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(JobError::DependencyMissing {
                    reason: format!("failed to run java -version: {e}"),
                });
            }
            Err(_) => {
                return Err(JobError::DependencyMissing {
                    reason: format!(
                        "java -version did not respond within {} seconds",
                        PROBE_TIMEOUT.as_secs()
                    ),
                });
            }
        };

        if !output.status.success() {
            return Err(JobError::DependencyMissing {
                reason: format!(
                    "java -version exited with code {}",
                    output.status.code().unwrap_or(-1)
                ),
            });
        }

        // The JDK prints the version banner on stderr.
        let banner = String::from_utf8_lossy(&output.stderr);
        let version = banner
            .lines()
            .next()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(version = %version, "Java runtime responded");
        Ok(version)
    }
}
