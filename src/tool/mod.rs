//! External protection tool invocation.
//!
//! Builds the tool's argument vector from the caller-selected options and
//! runs it as a child process with a hard wall-clock deadline. The child's
//! working directory is the job workspace, so anything the tool creates
//! outside its declared output directory still lands in job-scoped scratch
//! space. The gateway process itself never changes directory.
//!
//! ```text
//! java -jar dpt.jar -f <input> -o <output-dir> \
//!     [--debug] [--disable-acf] [--dump-code] [-K] [--noisy-log] [-S] \
//!     [-e <abi-list>] [-c <config-template>]
//! ```
//!
//! Signing is the tool's default behavior; there is no flag for it.

pub mod java;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ToolConfig;
use crate::error::JobError;

pub use java::JavaRuntime;

/// Caller-selected protection options. Each flag maps 1:1 to a tool
/// argument; an unset option omits the argument entirely.
#[derive(Debug, Clone, Default)]
pub struct ProtectOptions {
    pub debug: bool,
    pub disable_acf: bool,
    pub dump_code: bool,
    pub keep_classes: bool,
    pub noisy_log: bool,
    pub smaller: bool,
    /// Comma-separated ABI identifiers to exclude, passed through verbatim.
    pub exclude_abis: Option<String>,
    pub use_protect_config: bool,
}

impl ProtectOptions {
    /// Render the optional arguments in their fixed, documented order.
    ///
    /// `config_template` is only emitted when `use_protect_config` is set
    /// AND the template file exists, matching the tool's packaging where
    /// the template ships next to the jar but may be absent.
    pub fn to_args(&self, config_template: &Path) -> Vec<OsString> {
        let mut args = Vec::new();
        if self.debug {
            args.push("--debug".into());
        }
        if self.disable_acf {
            args.push("--disable-acf".into());
        }
        if self.dump_code {
            args.push("--dump-code".into());
        }
        if self.keep_classes {
            args.push("-K".into());
        }
        if self.noisy_log {
            args.push("--noisy-log".into());
        }
        if self.smaller {
            args.push("-S".into());
        }
        if let Some(abis) = self.exclude_abis.as_deref().map(str::trim)
            && !abis.is_empty()
        {
            args.push("-e".into());
            args.push(abis.into());
        }
        if self.use_protect_config && config_template.is_file() {
            args.push("-c".into());
            args.push(config_template.into());
        }
        args
    }

    /// Names of the selected options, for logging.
    pub fn summary(&self) -> String {
        let mut names: Vec<&str> = Vec::new();
        if self.debug {
            names.push("debug");
        }
        if self.disable_acf {
            names.push("disable-acf");
        }
        if self.dump_code {
            names.push("dump-code");
        }
        if self.keep_classes {
            names.push("keep-classes");
        }
        if self.noisy_log {
            names.push("noisy-log");
        }
        if self.smaller {
            names.push("smaller");
        }
        if self
            .exclude_abis
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty())
        {
            names.push("exclude-abis");
        }
        if self.use_protect_config {
            names.push("protect-config");
        }
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(", ")
        }
    }
}

/// A completed (exit code 0) tool run with its captured streams.
#[derive(Debug)]
pub struct Invocation {
    pub stdout: String,
    pub stderr: String,
}

/// Runs the protection tool. Holds the resolved runtime and tool paths;
/// one instance serves any number of jobs.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    runtime: JavaRuntime,
    jar_path: PathBuf,
    config_template: PathBuf,
    timeout: Duration,
}

impl ToolInvoker {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            runtime: JavaRuntime::resolve(config.java_home.as_deref()),
            jar_path: config.jar_path.clone(),
            config_template: config.config_template.clone(),
            timeout: config.timeout,
        }
    }

    /// Short liveness check of the Java runtime. Fails with
    /// `DependencyMissing` within seconds on a broken environment instead
    /// of spending the full job deadline discovering it.
    pub async fn probe_runtime(&self) -> Result<String, JobError> {
        self.runtime.probe().await
    }

    /// Run the protection tool against a staged input.
    ///
    /// Blocks (asynchronously) until the child exits, the deadline expires,
    /// or the launch fails. On deadline expiry the child is killed
    /// (`kill_on_drop`) and `JobError::Timeout` is returned; a non-zero
    /// exit returns `JobError::ToolFailed` with both streams verbatim.
    pub async fn invoke(
        &self,
        input_path: &Path,
        output_dir: &Path,
        options: &ProtectOptions,
        workspace_dir: &Path,
    ) -> Result<Invocation, JobError> {
        let mut cmd = Command::new(self.runtime.command());
        cmd.arg("-jar")
            .arg(&self.jar_path)
            .arg("-f")
            .arg(input_path)
            .arg("-o")
            .arg(output_dir)
            .args(options.to_args(&self.config_template))
            .current_dir(workspace_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(
            jar = %self.jar_path.display(),
            input = %input_path.display(),
            options = %options.summary(),
            timeout_secs = self.timeout.as_secs(),
            "Invoking protection tool"
        );

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                JobError::DependencyMissing {
                    reason: format!("failed to launch {}: {e}", self.runtime.command().display()),
                }
            } else {
                JobError::Internal {
                    reason: format!("failed to launch protection tool: {e}"),
                }
            }
        })?;

        // On expiry the wait future is dropped, which drops the child
        // handle; kill_on_drop then reaps the process so no orphan
        // survives the job.
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(JobError::Internal {
                    reason: format!("failed waiting for protection tool: {e}"),
                });
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.timeout.as_secs(),
                    "Protection tool exceeded deadline, killing child"
                );
                return Err(JobError::Timeout {
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            tracing::error!(
                exit_code,
                stderr = %truncate(&stderr, 2000),
                "Protection tool failed"
            );
            return Err(JobError::ToolFailed {
                exit_code,
                stdout,
                stderr,
            });
        }

        // Keep a prefix of stderr visible even on success; the tool logs
        // progress there.
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %truncate(&stderr, 500), "Protection tool stderr");
        }

        Ok(Invocation { stdout, stderr })
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        s
    } else {
        let mut end = max_len;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}
