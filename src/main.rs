use clap::Parser;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod diagnostics;
mod error;
mod handler;
mod launcher;
mod protocol;

use config::{describe_duration, AdapterConfig};
use handler::Adapter;

/// Serverless entry point that forwards each event to a Node.js handler process
#[derive(Parser, Debug)]
#[command(
    name = "runpod-node-bridge",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Args {
    /// `test` runs a single health-check event locally; anything else serves the platform
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Args {
    fn self_test(&self) -> bool {
        self.args.first().map(String::as_str) == Some("test")
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_logging();

    let config = AdapterConfig::from_env();
    log_startup(&config).await;

    let adapter = Arc::new(Adapter::from_config(&config));

    if args.self_test() {
        info!("Running local test");
        let result = adapter.handle(health_check_event()).await;
        println!("Test result: {}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    info!("Starting serverless handler");
    run(service_fn(move |event: LambdaEvent<Value>| {
        let adapter = Arc::clone(&adapter);
        async move { Ok::<Value, Error>(adapter.handle(event.payload).await) }
    }))
    .await
}

fn health_check_event() -> Value {
    json!({
        "input": {
            "action": "health"
        }
    })
}

// RUST_LOG overrides; the platform's collector adds its own timestamps
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .with_ansi(false)
        .with_target(false)
        .init();
}

async fn log_startup(config: &AdapterConfig) {
    info!("Starting Node.js bridge v{}", env!("CARGO_PKG_VERSION"));

    match Command::new(&config.node_binary).arg("--version").output().await {
        Ok(output) if output.status.success() => {
            info!(
                "Node.js version: {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        Ok(output) => warn!(
            "`{} --version` exited with {}",
            config.node_binary, output.status
        ),
        Err(e) => warn!("Node.js runtime unavailable ({}): {}", config.node_binary, e),
    }

    match std::env::current_dir() {
        Ok(dir) => info!("Working directory: {}", dir.display()),
        Err(e) => warn!("Working directory unavailable: {}", e),
    }
    info!("Handler module: {}", config.handler_module);
    info!("Handler timeout: {}", describe_duration(config.timeout));
    info!("Detected CPUs: {}", num_cpus::get());
    info!("GPU available: {}", gpu_devices(std::env::var("NVIDIA_VISIBLE_DEVICES").ok()));
}

fn gpu_devices(visible: Option<String>) -> String {
    visible.unwrap_or_else(|| "Not set".to_string())
}
