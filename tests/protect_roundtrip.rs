//! End-to-end tests for the protection job lifecycle and the HTTP surface.
//!
//! No real JDK or dpt.jar is needed: a generated shell script stands in for
//! `java`, answering the `-version` probe and then behaving as directed
//! (copy the input into the output dir, fail, stall, produce nothing, ...).

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

use acx_shell::config::{Config, LimitsConfig, ServerConfig, ToolConfig, VerifyConfig};
use acx_shell::error::JobError;
use acx_shell::job::JobRunner;
use acx_shell::server::{AppState, Gateway};
use acx_shell::tool::ProtectOptions;
use acx_shell::upload::UploadedPackage;

/// Harness: a fake JAVA_HOME whose `java` script answers the version probe
/// and then runs `body` for the protection invocation. Inside `body`, `$4`
/// is the staged input path and `$6` the output directory (matching the
/// `-jar <jar> -f <input> -o <dir>` argument layout).
struct FakeTool {
    _home: tempfile::TempDir,
    java_home: PathBuf,
}

impl FakeTool {
    fn new(body: &str) -> Self {
        let home = tempfile::tempdir().unwrap();
        let bin = home.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let java = bin.join("java");
        let script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"-version\" ]; then\n\
               echo 'openjdk version \"21.0.1\"' >&2\n\
               exit 0\n\
             fi\n\
             {body}\n"
        );
        fs::write(&java, script).unwrap();
        fs::set_permissions(&java, fs::Permissions::from_mode(0o755)).unwrap();
        let java_home = home.path().to_path_buf();
        Self {
            _home: home,
            java_home,
        }
    }
}

struct Harness {
    runner: JobRunner,
    config: Config,
    workspace_base: tempfile::TempDir,
    _tool: FakeTool,
}

fn harness(tool_body: &str, timeout: Duration) -> Harness {
    let tool = FakeTool::new(tool_body);
    let workspace_base = tempfile::tempdir().unwrap();

    let config = Config {
        server: ServerConfig::default(),
        tool: ToolConfig {
            jar_path: PathBuf::from("dpt.jar"),
            config_template: PathBuf::from("/nonexistent-template.json"),
            timeout,
            java_home: Some(tool.java_home.clone()),
        },
        limits: LimitsConfig::default(),
        verify: VerifyConfig::default(),
    };

    let runner = JobRunner::new(&config)
        .with_workspace_base(workspace_base.path().to_path_buf())
        .with_sweep_root(workspace_base.path().to_path_buf());

    Harness {
        runner,
        config,
        workspace_base,
        _tool: tool,
    }
}

fn upload(name: &str, data: &[u8]) -> UploadedPackage {
    UploadedPackage::new(name, bytes::Bytes::copy_from_slice(data))
}

fn workspace_count(base: &Path) -> usize {
    fs::read_dir(base)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("apk-protect-"))
        .count()
}

// -- Orchestrator lifecycle --

#[tokio::test]
async fn roundtrip_returns_input_bytes_with_derived_name() {
    let h = harness("cp \"$4\" \"$6/result.apk\"", Duration::from_secs(10));
    let payload = b"not really an apk but faithful bytes".to_vec();

    let package = h
        .runner
        .run(upload("app.apk", &payload), ProtectOptions::default())
        .await
        .unwrap();

    assert_eq!(package.bytes, payload);
    assert_eq!(package.file_name, "protected_app.apk");
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

#[tokio::test]
async fn nonzero_exit_fails_with_diagnostics_and_cleans_up() {
    let h = harness(
        "echo 'dex parse error' >&2; exit 3",
        Duration::from_secs(10),
    );

    let err = h
        .runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap_err();

    match err {
        JobError::ToolFailed {
            exit_code, stderr, ..
        } => {
            assert_eq!(exit_code, 3);
            assert!(stderr.contains("dex parse error"));
        }
        other => panic!("expected ToolFailed, got {other:?}"),
    }
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

#[tokio::test]
async fn deadline_expiry_times_out_and_cleans_up() {
    let h = harness("sleep 30", Duration::from_millis(300));

    let started = std::time::Instant::now();
    let err = h
        .runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Timeout { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

#[tokio::test]
async fn zero_exit_without_output_is_no_output_produced() {
    let h = harness("echo 'done' ; exit 0", Duration::from_secs(10));

    let err = h
        .runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::NoOutputProduced { .. }), "got {err:?}");
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

#[tokio::test]
async fn empty_output_file_is_rejected() {
    let h = harness(": > \"$6/result.apk\"", Duration::from_secs(10));

    let err = h
        .runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::EmptyOutput), "got {err:?}");
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

#[tokio::test]
async fn nested_output_is_found() {
    let h = harness(
        "mkdir -p \"$6/signed/final\" && cp \"$4\" \"$6/signed/final/app-protected.aab\"",
        Duration::from_secs(10),
    );

    let package = h
        .runner
        .run(upload("bundle.aab", b"aab-bytes"), ProtectOptions::default())
        .await
        .unwrap();
    assert_eq!(package.bytes, b"aab-bytes");
    assert_eq!(package.file_name, "protected_bundle.aab");
}

#[tokio::test]
async fn missing_java_is_dependency_missing() {
    let h = harness("exit 0", Duration::from_secs(10));
    // Strip the execute bit from the fake java so spawning it fails, the
    // same way a broken JAVA_HOME would.
    let java = h.config.tool.java_home.as_ref().unwrap().join("bin/java");
    fs::set_permissions(&java, fs::Permissions::from_mode(0o644)).unwrap();

    let err = h
        .runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::DependencyMissing { .. }), "got {err:?}");
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

// -- Argument construction observed through the fake tool --

#[tokio::test]
async fn no_options_invoke_with_exactly_input_and_output_flags() {
    let sink = tempfile::NamedTempFile::new().unwrap();
    let body = format!(
        "echo \"$@\" > {} && cp \"$4\" \"$6/result.apk\"",
        sink.path().display()
    );
    let h = harness(&body, Duration::from_secs(10));

    h.runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap();

    let args = fs::read_to_string(sink.path()).unwrap();
    let tokens: Vec<&str> = args.split_whitespace().collect();
    // -jar <jar> -f <input> -o <dir> and nothing else.
    assert_eq!(tokens.len(), 6, "unexpected args: {args}");
    assert_eq!(tokens[0], "-jar");
    assert_eq!(tokens[2], "-f");
    assert!(tokens[3].ends_with("app.apk"));
    assert_eq!(tokens[4], "-o");
    assert!(tokens[5].ends_with("output"));
}

#[tokio::test]
async fn exclude_abis_are_forwarded() {
    let sink = tempfile::NamedTempFile::new().unwrap();
    let body = format!(
        "echo \"$@\" > {} && cp \"$4\" \"$6/result.apk\"",
        sink.path().display()
    );
    let h = harness(&body, Duration::from_secs(10));

    let options = ProtectOptions {
        smaller: true,
        exclude_abis: Some("x86,x86_64".to_string()),
        ..Default::default()
    };
    h.runner
        .run(upload("app.apk", b"bytes"), options)
        .await
        .unwrap();

    let args = fs::read_to_string(sink.path()).unwrap();
    assert!(args.contains("-S"), "args: {args}");
    assert!(args.contains("-e x86,x86_64"), "args: {args}");
}

// -- Stray artifact handling --

#[tokio::test]
async fn stray_dump_directories_are_swept_after_the_job() {
    let h = harness("cp \"$4\" \"$6/result.apk\"", Duration::from_secs(10));

    // Simulate a previous tool run having dumped code outside its output
    // directory, into what the gateway sweeps (here: the workspace base).
    let stray = h.workspace_base.path().join("com.example.victim");
    fs::create_dir_all(&stray).unwrap();
    fs::write(stray.join("classes.json"), "{}").unwrap();

    h.runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap();

    assert!(!stray.exists(), "stray dump dir should have been swept");
}

#[tokio::test]
async fn tool_side_effects_in_cwd_die_with_the_workspace() {
    // The tool writes a dump dir into its cwd (the workspace), not $6.
    let h = harness(
        "mkdir -p com.example.app && echo '{}' > com.example.app/dump.json && cp \"$4\" \"$6/result.apk\"",
        Duration::from_secs(10),
    );

    h.runner
        .run(upload("app.apk", b"bytes"), ProtectOptions::default())
        .await
        .unwrap();

    // Workspace teardown removed the dump along with everything else.
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

// -- Full HTTP surface --

const BOUNDARY: &str = "roundtrip-test-boundary";

fn multipart_body(file_name: &str, data: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"apk_file\"; \
             filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn protect_endpoint_streams_the_package_with_download_headers() {
    let h = harness("cp \"$4\" \"$6/result.apk\"", Duration::from_secs(10));
    let state = AppState {
        config: std::sync::Arc::new(h.config.clone()),
        runner: std::sync::Arc::new(h.runner.clone()),
    };
    let router = Gateway::router(state);

    let payload = b"binary package payload".to_vec();
    let request = Request::builder()
        .method("POST")
        .uri("/protect")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("my app.apk", &payload, &[])))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "application/vnd.android.package-archive"
    );
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"protected_my_app.apk\""
    );
    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(
        headers[header::CONTENT_LENGTH],
        payload.len().to_string().as_str()
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), payload.as_slice());
    assert_eq!(workspace_count(h.workspace_base.path()), 0);
}

#[tokio::test]
async fn protect_endpoint_maps_tool_failure_to_500_json() {
    let h = harness("echo 'unsupported dex version' >&2; exit 9", Duration::from_secs(10));
    let state = AppState {
        config: std::sync::Arc::new(h.config.clone()),
        runner: std::sync::Arc::new(h.runner.clone()),
    };
    let router = Gateway::router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/protect")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body("app.apk", b"bytes", &[])))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(
        json["error"].as_str().unwrap().contains("exited with code 9"),
        "got: {json}"
    );
    assert!(
        json["details"]
            .as_str()
            .unwrap()
            .contains("unsupported dex version"),
        "got: {json}"
    );
}
