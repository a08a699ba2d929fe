//! CLI entry point for the transcoding scheduler daemon.
//!
//! Parses command line arguments, loads the configuration, wires the
//! scheduler to the simulated transcoder, and serves the HTTP API.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Weak};
use transcoding_scheduler::{
    run_server, Config, SessionScheduler, SimulatedTranscoder, TranscoderCallback,
};

/// Transcoding scheduler daemon - priority-scheduled media transcoding sessions
#[derive(Parser, Debug)]
#[command(name = "transcoding-scheduler-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run with built-in defaults instead of reading a config file
    #[arg(long, default_value = "false")]
    default_config: bool,
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();
    let args = Args::parse();

    let config = if args.default_config {
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    } else {
        Config::load(&args.config)
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let addr = match config.server.socket_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid server address: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        "Scheduler daemon starting; simulated session duration {} ms",
        config.transcoder.session_duration_ms
    );

    let transcoder = SimulatedTranscoder::new(config.transcoder.session_duration());
    let scheduler = Arc::new(SessionScheduler::new(transcoder.clone()));
    let callback: Weak<dyn TranscoderCallback> = {
        let strong: Arc<dyn TranscoderCallback> = scheduler.clone();
        Arc::downgrade(&strong)
    };
    transcoder.set_callback(callback);

    tracing::info!("Serving scheduler API on http://{}/sessions", addr);

    if let Err(e) = run_server(scheduler, addr).await {
        tracing::error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
