//! HTTP surface of the protection gateway.
//!
//! Two routes: `POST /protect` takes a multipart upload plus option flags
//! and answers with the protected package as a download; `GET /health`
//! reports whether the tool jar and the Java runtime are in place.
//!
//! Every failure is logged with full context here, then reduced to a
//! minimal JSON body (`error`, optional `details`) — stack traces and
//! internal paths never reach the caller.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{JobError, ValidationError};
use crate::job::{self, JobRunner, JobState, ProtectedPackage};
use crate::tool::{JavaRuntime, ProtectOptions};
use crate::upload::UploadedPackage;

/// MIME type for Android package downloads.
const PACKAGE_MIME: &str = "application/vnd.android.package-archive";

/// Shared state for the gateway routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runner: Arc<JobRunner>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let runner = JobRunner::new(&config);
        Self {
            config: Arc::new(config),
            runner: Arc::new(runner),
        }
    }
}

/// The gateway's HTTP server.
pub struct Gateway;

impl Gateway {
    /// Build the axum router.
    pub fn router(state: AppState) -> Router {
        Router::new()
            // The framework's body cap is disabled so the validator's
            // measured-size check owns the oversize failure mode and the
            // caller gets the taxonomy's TooLarge 400, not a bare 413.
            .route(
                "/protect",
                post(protect).layer(DefaultBodyLimit::disable()),
            )
            .route("/health", get(health))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the process is stopped.
    pub async fn start(
        state: AppState,
        port: u16,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = Self::router(state);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("Protection gateway listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

// -- Handlers --

async fn protect(State(state): State<AppState>, multipart: Multipart) -> Response {
    let (upload, options) = match read_protect_request(multipart).await {
        Ok(parts) => parts,
        Err(response) => return response,
    };

    match state.runner.run(upload, options).await {
        Ok(package) => package_response(package),
        Err(err) => error_response(&err),
    }
}

/// Liveness and dependency probe. No side effects.
async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let dpt_jar_exists = state.config.tool.jar_path.is_file();

    let runtime = JavaRuntime::resolve(state.config.tool.java_home.as_deref());
    let (java_available, java_version) = match runtime.probe().await {
        Ok(version) => (true, version),
        Err(_) => (false, "Not found".to_string()),
    };

    Json(HealthReport {
        status: "ok",
        dpt_jar_exists,
        java_available,
        java_version,
    })
}

// -- Request parsing --

/// Pull the package part and the option flags out of the multipart form.
///
/// Flag fields carry string values; `"true"` enables, anything else leaves
/// the option off (matching the original form contract). Unknown fields
/// are ignored.
async fn read_protect_request(
    mut multipart: Multipart,
) -> Result<(UploadedPackage, ProtectOptions), Response> {
    let mut upload: Option<UploadedPackage> = None;
    let mut options = ProtectOptions::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed multipart request");
                return Err(bad_request("Malformed multipart request", Some(e.to_string())));
            }
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "apk_file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let bytes = match field.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read uploaded file part");
                    return Err(bad_request(
                        "Failed to read uploaded file",
                        Some(e.to_string()),
                    ));
                }
            };
            upload = Some(UploadedPackage::new(file_name, bytes));
            continue;
        }

        let value = match field.text().await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(field = %name, error = %e, "Failed to read form field");
                return Err(bad_request("Malformed form field", Some(e.to_string())));
            }
        };
        let enabled = value == "true";

        match name.as_str() {
            "debug" => options.debug = enabled,
            "disable_acf" => options.disable_acf = enabled,
            "dump_code" => options.dump_code = enabled,
            "keep_classes" => options.keep_classes = enabled,
            "noisy_log" => options.noisy_log = enabled,
            "smaller" => options.smaller = enabled,
            "exclude_abis" => {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    options.exclude_abis = Some(trimmed.to_string());
                }
            }
            "use_protect_config" => options.use_protect_config = enabled,
            _ => tracing::debug!(field = %name, "Ignoring unknown form field"),
        }
    }

    let upload = upload.ok_or_else(|| {
        error_response(&JobError::Validation(ValidationError::MissingFile))
    })?;

    Ok((upload, options))
}

// -- Responses --

/// Error payload sent to callers. Never contains stack traces or paths
/// beyond what the error itself chooses to expose.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Health payload. Field names are part of the external contract.
#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    dpt_jar_exists: bool,
    java_available: bool,
    java_version: String,
}

fn package_response(package: ProtectedPackage) -> Response {
    job::transition(package.job_id, JobState::Responding);
    let len = package.bytes.len();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, PACKAGE_MIME)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", package.file_name),
        )
        .header(header::CONTENT_LENGTH, len)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .body(Body::from(package.bytes))
        .expect("statically valid response parts and a sanitized filename")
}

fn error_response(err: &JobError) -> Response {
    let status = match err {
        JobError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    // Full context to the log; the payload stays minimal.
    if status == StatusCode::BAD_REQUEST {
        tracing::warn!(error = %err, "Rejected protection request");
    } else {
        tracing::error!(error = ?err, "Protection job failed");
    }

    let body = ErrorBody {
        error: err.to_string(),
        details: err.details(),
    };
    (status, Json(body)).into_response()
}

fn bad_request(message: &str, details: Option<String>) -> Response {
    let body = ErrorBody {
        error: message.to_string(),
        details,
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}
