//! OAuth gateway - OAuth 2.0 client role for web applications
//!
//! Serves grant flow, refresh and invalidation endpoints and keeps the
//! issued tokens in user agent cookies.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use oauth_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Check) => run_check(config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> oauth_gateway::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Validate the configuration and list the mounted routes
fn run_check(config: Config) -> ExitCode {
    let resource_servers = config.authorization.resource_servers.len();

    match Gateway::new(config) {
        Ok(gateway) => {
            println!("Configuration is valid.\n");
            println!("Routes:");
            for route in gateway.routes() {
                println!("  {:<7} {:<32} {}", route.method.as_str(), route.path, route.purpose);
            }
            println!("  {:<7} {:<32} resource proxy", "ANY", "/resources/{server}/{*path}");
            println!("\nResource servers: {resource_servers}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        endpoints = config.authorization.endpoints.len(),
        resource_servers = config.authorization.resource_servers.len(),
        "Starting OAuth gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
