//! wsgate - WebSocket-to-Kafka proxy

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wsgate::config::{merge_config_with_args, ConfigFile};
use wsgate::{ProxyArgs, ProxyConfig, ProxyServer, Result, WsGateError};

fn main() -> ExitCode {
    if let Err(e) = run() {
        eprintln!("wsgate failed to start: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<()> {
    let mut args = ProxyArgs::parse();

    if args.generate_config {
        println!("{}", ConfigFile::generate_example());
        return Ok(());
    }

    // Load configuration file if specified, else from the default locations
    let config_file = if let Some(ref path) = args.config {
        match ConfigFile::load(path) {
            Ok(config) => {
                eprintln!("Loaded configuration from {}", path.display());
                Some(config)
            }
            Err(e) => {
                eprintln!("Error loading configuration file: {e}");
                return Err(e);
            }
        }
    } else {
        ConfigFile::load_default()
    };

    // CLI arguments take precedence over config file values
    if let Some(ref config) = config_file {
        args = merge_config_with_args(args, config);
    }

    let log_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter)
        .init();

    let config = match ProxyConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| WsGateError::Server(format!("failed to create Tokio runtime: {e}")))?;

    runtime.block_on(async {
        info!(
            server_id = %config.server_id,
            port = config.port,
            "Starting wsgate"
        );
        let server = match ProxyServer::new(config).await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "Failed to start server");
                return Err(e);
            }
        };
        if let Err(e) = server.run().await {
            error!(error = %e, "Server error");
            return Err(e);
        }
        Ok(())
    })
}
