//! The per-request protection job: a small state machine over the
//! collaborators.
//!
//! ```text
//! Created → Validated → Staged → Invoking → Resolving → Verifying
//!                                   │            │          │
//!                                   ▼            ▼          ▼
//!                               TimedOut      Failed      Loaded → TornDown
//! ```
//!
//! One job per request, no cross-request state, no retries. Whatever path a
//! job takes out of `Staged`, teardown always runs: the workspace is
//! released and stray tool artifacts are swept before the outcome is
//! returned. Teardown failures are logged, never escalated, and never mask
//! the job's own result.

use std::path::PathBuf;

use uuid::Uuid;

use crate::config::{Config, LimitsConfig, ToolConfig, VerifyConfig};
use crate::error::JobError;
use crate::output;
use crate::tool::{ProtectOptions, ToolInvoker};
use crate::upload::{PROTECTED_PREFIX, UploadedPackage, sanitize_file_name};
use crate::verify;
use crate::workspace::{Workspace, sweep_stray_artifacts};

/// Lifecycle states, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Validated,
    Staged,
    Invoking,
    Resolving,
    Verifying,
    Loaded,
    Responding,
    TornDown,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validated => "validated",
            Self::Staged => "staged",
            Self::Invoking => "invoking",
            Self::Resolving => "resolving",
            Self::Verifying => "verifying",
            Self::Loaded => "loaded",
            Self::Responding => "responding",
            Self::TornDown => "torn_down",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A finished job's result: the protected bytes and the filename the caller
/// should save them under. Carries the job id so the response path can keep
/// logging under the same identity after the workspace is gone.
#[derive(Debug)]
pub struct ProtectedPackage {
    pub job_id: Uuid,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Runs protection jobs against the configured external tool.
///
/// Cheap to share behind an `Arc`; holds only resolved configuration.
#[derive(Debug, Clone)]
pub struct JobRunner {
    tool: ToolConfig,
    limits: LimitsConfig,
    verify: VerifyConfig,
    /// Base directory for job workspaces. `None` means the fast-storage
    /// default.
    workspace_base: Option<PathBuf>,
    /// Directory swept for stray tool artifacts after each job. Defaults to
    /// the process working directory at construction time.
    sweep_root: Option<PathBuf>,
}

impl JobRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            tool: config.tool.clone(),
            limits: config.limits.clone(),
            verify: config.verify.clone(),
            workspace_base: None,
            sweep_root: std::env::current_dir().ok(),
        }
    }

    /// Override the workspace base directory (used by tests and
    /// non-standard deployments).
    pub fn with_workspace_base(mut self, base: PathBuf) -> Self {
        self.workspace_base = Some(base);
        self
    }

    /// Override the stray-artifact sweep root.
    pub fn with_sweep_root(mut self, root: PathBuf) -> Self {
        self.sweep_root = Some(root);
        self
    }

    /// Run one protection job end to end.
    ///
    /// Validation happens before any filesystem allocation; once a
    /// workspace exists, it is released on every exit path.
    pub async fn run(
        &self,
        upload: UploadedPackage,
        options: ProtectOptions,
    ) -> Result<ProtectedPackage, JobError> {
        tracing::info!(
            file = %upload.file_name,
            size_bytes = upload.bytes.len(),
            options = %options.summary(),
            "Protection request received"
        );

        // Created → Validated. Failures here have allocated nothing.
        upload.validate(self.limits.max_upload_bytes)?;

        let workspace = match &self.workspace_base {
            Some(base) => Workspace::acquire_in(base)?,
            None => Workspace::acquire()?,
        };
        let job_id = workspace.job_id();
        transition(job_id, JobState::Validated);

        let result = self.run_staged(&workspace, &upload, &options).await;

        // Teardown runs regardless of the outcome above, and its own
        // failures are swallowed inside release()/sweep.
        workspace.release();
        if let Some(root) = &self.sweep_root {
            sweep_stray_artifacts(root);
        }

        match &result {
            Ok(package) => {
                transition(job_id, JobState::TornDown);
                tracing::info!(
                    job_id = %job_id,
                    file = %package.file_name,
                    size_bytes = package.bytes.len(),
                    "Protection succeeded"
                );
            }
            Err(JobError::Timeout { .. }) => transition(job_id, JobState::TimedOut),
            Err(_) => transition(job_id, JobState::Failed),
        }

        result
    }

    /// The stages that require a live workspace. Split out so `run` can
    /// wrap every failure path in the same teardown.
    async fn run_staged(
        &self,
        workspace: &Workspace,
        upload: &UploadedPackage,
        options: &ProtectOptions,
    ) -> Result<ProtectedPackage, JobError> {
        let job_id = workspace.job_id();

        let safe_name = sanitize_file_name(&upload.file_name);
        let input_path = workspace.stage_input(&safe_name, &upload.bytes)?;
        transition(job_id, JobState::Staged);

        // Fail fast on a broken environment instead of spending the full
        // job deadline discovering it.
        let invoker = ToolInvoker::new(&self.tool);
        invoker.probe_runtime().await?;

        transition(job_id, JobState::Invoking);
        let invocation = invoker
            .invoke(&input_path, workspace.output_dir(), options, workspace.dir())
            .await?;

        transition(job_id, JobState::Resolving);
        let output_path =
            output::resolve(workspace.output_dir()).ok_or_else(|| JobError::NoOutputProduced {
                output_dir: workspace.output_dir().to_path_buf(),
                stdout: invocation.stdout.clone(),
                stderr: invocation.stderr.clone(),
            })?;
        tracing::info!(job_id = %job_id, output = %output_path.display(), "Resolved output package");

        transition(job_id, JobState::Verifying);
        let signature = verify::verify(&output_path, &self.verify).await;
        tracing::info!(job_id = %job_id, signature = %signature, "Signature check finished");

        // Read fully into memory so the workspace can be torn down before
        // the response starts streaming.
        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|e| JobError::Internal {
                reason: format!("failed to read output {}: {e}", output_path.display()),
            })?;
        if bytes.is_empty() {
            return Err(JobError::EmptyOutput);
        }
        transition(job_id, JobState::Loaded);

        Ok(ProtectedPackage {
            job_id,
            file_name: response_file_name(&upload.file_name),
            bytes,
        })
    }
}

/// Derive the download filename: the protected marker plus the sanitized
/// original name.
pub fn response_file_name(original: &str) -> String {
    format!("{PROTECTED_PREFIX}{}", sanitize_file_name(original))
}

pub(crate) fn transition(job_id: Uuid, state: JobState) {
    tracing::info!(job_id = %job_id, state = %state, "Job transition");
}
