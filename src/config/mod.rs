//! Configuration for the protection gateway.
//!
//! All environment reads happen once, in [`Config::from_env`]. Request
//! handling only ever sees the resolved structs, so there is no ambient
//! global state consulted at job time.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default maximum upload size: 150 MiB (sized for the original free-tier
/// deploy target).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 150 * 1024 * 1024;

/// Default hard deadline for a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Main configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub tool: ToolConfig,
    pub limits: LimitsConfig,
    pub verify: VerifyConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen port, from `PORT`.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5000 }
    }
}

/// Settings for the external protection tool and the runtime it needs.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Path to the protection tool jar, from `DPT_JAR_PATH`.
    pub jar_path: PathBuf,
    /// Bundled protection config template, from `DPT_CONFIG_TEMPLATE`.
    /// Only passed to the tool when the file actually exists.
    pub config_template: PathBuf,
    /// Wall-clock deadline for one invocation, from `PROTECT_TIMEOUT_SECS`.
    pub timeout: Duration,
    /// `JAVA_HOME`, if set. Used to resolve `java` and `jarsigner`.
    pub java_home: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            jar_path: PathBuf::from("executable/dpt.jar"),
            config_template: PathBuf::from("executable/dpt-protect-config-template.json"),
            timeout: DEFAULT_TOOL_TIMEOUT,
            java_home: None,
        }
    }
}

/// Upload limits.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Maximum accepted upload size in bytes, from `MAX_UPLOAD_MB`.
    pub max_upload_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Settings for the best-effort signature verifier.
#[derive(Debug, Clone, Default)]
pub struct VerifyConfig {
    /// Android SDK root, from `ANDROID_HOME` falling back to
    /// `ANDROID_SDK_ROOT`. Optional; without it only `jarsigner` is tried.
    pub android_home: Option<PathBuf>,
    /// `JAVA_HOME`, shared with [`ToolConfig`].
    pub java_home: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match optional_env("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                var: "PORT".to_string(),
                reason: e.to_string(),
            })?,
            None => ServerConfig::default().port,
        };

        let timeout = match optional_env("PROTECT_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    var: "PROTECT_TIMEOUT_SECS".to_string(),
                    reason: e.to_string(),
                })?;
                Duration::from_secs(secs)
            }
            None => DEFAULT_TOOL_TIMEOUT,
        };

        let max_upload_bytes = match optional_env("MAX_UPLOAD_MB") {
            Some(raw) => {
                let mb = raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    var: "MAX_UPLOAD_MB".to_string(),
                    reason: e.to_string(),
                })?;
                mb * 1024 * 1024
            }
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let java_home = optional_env("JAVA_HOME").map(PathBuf::from);
        let android_home = optional_env("ANDROID_HOME")
            .or_else(|| optional_env("ANDROID_SDK_ROOT"))
            .map(PathBuf::from);

        let defaults = ToolConfig::default();
        let tool = ToolConfig {
            jar_path: optional_env("DPT_JAR_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.jar_path),
            config_template: optional_env("DPT_CONFIG_TEMPLATE")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_template),
            timeout,
            java_home: java_home.clone(),
        };

        Ok(Self {
            server: ServerConfig { port },
            tool,
            limits: LimitsConfig { max_upload_bytes },
            verify: VerifyConfig {
                android_home,
                java_home,
            },
        })
    }
}

/// Read an env var, treating unset and empty as absent.
fn optional_env(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}
