//! acx-shell - gateway entry point.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use acx_shell::config::Config;
use acx_shell::server::{AppState, Gateway};
use acx_shell::tool::JavaRuntime;

#[derive(Parser, Debug)]
#[command(name = "acx-shell")]
#[command(about = "Web gateway for the dpt.jar Android package protection tool")]
#[command(version)]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to the protection tool jar (overrides DPT_JAR_PATH)
    #[arg(long)]
    jar: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("acx_shell=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let _ = dotenvy::dotenv();

    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(jar) = args.jar {
        config.tool.jar_path = jar;
    }

    tracing::info!("Starting acx-shell protection gateway");

    // Startup preflight: report, don't refuse. A missing jar or JDK makes
    // /protect fail per-request with a clear error, and /health exposes the
    // same signal to orchestration.
    if config.tool.jar_path.is_file() {
        tracing::info!(jar = %config.tool.jar_path.display(), "Protection tool jar found");
    } else {
        tracing::warn!(
            jar = %config.tool.jar_path.display(),
            "Protection tool jar not found; /protect will fail until it is in place"
        );
    }
    let runtime = JavaRuntime::resolve(config.tool.java_home.as_deref());
    match runtime.probe().await {
        Ok(version) => tracing::info!(version = %version, "Java runtime available"),
        Err(e) => tracing::warn!(error = %e, "Java runtime unavailable"),
    }

    let port = config.server.port;
    let state = AppState::new(config);

    Gateway::start(state, port)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    Ok(())
}
