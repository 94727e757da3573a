//! npud binary: probe the hardware, prepare the engine, serve until
//! interrupted.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use npud::config::ServerConfig;
use npud::diag;
use npud::engine::InferenceEngine;
use npud::server::NpuServer;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,npud=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

// Failure paths return an exit code instead of calling process::exit so
// that Drop-based model release runs on every exit path.
#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    println!("==================================================");
    println!(" npud - RK3588 NPU inference server");
    println!("==================================================");

    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Usage: npud [model.rknn] [port]");
            eprintln!("Error: {}", e);
            return ExitCode::from(2);
        }
    };

    // Informational hardware probe; never gates startup.
    let caps = diag::probe();
    diag::log_summary(&caps);

    // Model load or runtime init failure falls back to the simulated
    // engine; the server still starts.
    let engine = Arc::new(InferenceEngine::from_config(&config, &caps));
    info!(state = %engine.state(), "Engine ready");

    let server = match NpuServer::bind(config, engine).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to bind listening socket");
            return ExitCode::from(1);
        }
    };

    println!("Press Ctrl+C to stop");

    server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    ExitCode::SUCCESS
}
