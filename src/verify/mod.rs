//! Best-effort signature verification of the protected package.
//!
//! The protection tool signs its output by default. This module tries to
//! confirm that, first with `apksigner` from the newest installed Android
//! build-tools, then with the JDK's `jarsigner`. Verification is purely
//! advisory: every failure mode — missing tools, timeouts, non-zero exits,
//! unexpected output — logs a warning and degrades to
//! [`SignatureStatus::Unverifiable`]. It never fails the job.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::VerifyConfig;
use crate::tool::java::resolve_jdk_tool;

/// Deadline for each individual verifier attempt.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of the advisory signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// One of the verifiers positively confirmed the signature.
    Verified,
    /// No verifier could confirm it. Says nothing about validity.
    Unverifiable,
}

impl SignatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Unverifiable => "unverifiable",
        }
    }
}

impl std::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check the package signature with whichever verifier is available.
pub async fn verify(package: &Path, config: &VerifyConfig) -> SignatureStatus {
    if let Some(android_home) = config.android_home.as_deref()
        && let Some(apksigner) = locate_apksigner(android_home)
    {
        match run_verifier(&apksigner, &["verify", "--print-certs"], package).await {
            Some(outcome) if outcome.success => {
                tracing::info!(package = %package.display(), "Signature verified with apksigner");
                return SignatureStatus::Verified;
            }
            Some(outcome) => {
                tracing::warn!(
                    package = %package.display(),
                    stderr = %outcome.stderr.trim(),
                    "apksigner could not verify signature"
                );
            }
            None => {}
        }
    }

    let jarsigner = resolve_jdk_tool(config.java_home.as_deref(), "jarsigner");
    match run_verifier(&jarsigner, &["-verify", "-verbose", "-certs"], package).await {
        Some(outcome)
            if outcome.success && outcome.stdout.to_lowercase().contains("jar verified") =>
        {
            tracing::info!(package = %package.display(), "Signature verified with jarsigner");
            SignatureStatus::Verified
        }
        Some(_) => {
            tracing::warn!(
                package = %package.display(),
                "jarsigner could not confirm signature; the package may be unsigned"
            );
            SignatureStatus::Unverifiable
        }
        None => {
            tracing::warn!(
                package = %package.display(),
                "No signature verifier available; continuing unverified"
            );
            SignatureStatus::Unverifiable
        }
    }
}

/// Find `apksigner` under the newest build-tools version directory,
/// selecting by descending lexical sort of the version directory names.
fn locate_apksigner(android_home: &Path) -> Option<PathBuf> {
    let build_tools = android_home.join("build-tools");
    let mut versions: Vec<PathBuf> = fs::read_dir(&build_tools)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    versions.sort();
    versions.reverse();

    versions
        .into_iter()
        .map(|dir| dir.join("apksigner"))
        .find(|candidate| candidate.is_file())
}

struct VerifierOutcome {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Run one verifier with its own short deadline. `None` means the attempt
/// could not even produce an exit status (missing binary, IO error,
/// timeout) — all treated identically by the caller.
async fn run_verifier(command: &Path, args: &[&str], package: &Path) -> Option<VerifierOutcome> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .arg(package)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(verifier = %command.display(), error = %e, "Verifier unavailable");
            return None;
        }
    };

    match timeout(VERIFY_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(output)) => Some(VerifierOutcome {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => {
            tracing::warn!(verifier = %command.display(), error = %e, "Verifier failed to run");
            None
        }
        Err(_) => {
            tracing::warn!(
                verifier = %command.display(),
                timeout_secs = VERIFY_TIMEOUT.as_secs(),
                "Verifier timed out"
            );
            None
        }
    }
}
