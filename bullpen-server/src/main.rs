//! # Bullpen Server
//!
//! Web dashboards over BullMQ job queues stored in Redis, one board per
//! configured backend and mount path.
//!
//! ## Overview
//!
//! - **Discovery**: each board's Redis database is scanned for queues at
//!   startup
//! - **Isolation**: a misconfigured or unreachable backend only affects its
//!   own board
//! - **Read-only boards**: mutating operations can be disabled per board
//! - **Liveness**: `/health` answers once provisioning has finished

use std::path::PathBuf;

use anyhow::Context;
use bullpen_config::{Config, ConfigLoad, ConfigLoader};
use bullpen_core::QueueDiscovery;
use bullpen_server::{redis_orchestrator, routes};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "bullpen-server")]
#[command(about = "Multi-board web dashboards over BullMQ queues in Redis")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Path to a bullpen.toml configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a .env file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover the queues of every configured board, print them and exit
    Discover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    match cli.command {
        Some(Command::Discover) => run_discover(&config).await,
        None => run_server(config).await,
    }
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &args.env_file {
        loader = loader.with_env_file(path);
    }

    let ConfigLoad {
        mut config,
        warnings,
    } = loader.load().context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "loaded configuration file");
    }
    info!(
        boards = config.boards.len(),
        source = config.metadata.boards_source.as_str(),
        "board configuration resolved"
    );

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    Ok(config)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let report = redis_orchestrator(&config).run(&config.boards).await;
    report.log_summary();

    let app = routes::create_app(report);
    info!(address = %listener.local_addr()?, "Starting Bullpen server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn run_discover(config: &Config) -> anyhow::Result<()> {
    let discovery = QueueDiscovery::redis(
        config.discovery.scan_count,
        config.discovery.timeout,
    );

    let mut invalid = 0usize;
    for board in &config.boards {
        match discovery.discover(&board.connection).await {
            Ok(queues) => {
                println!(
                    "{} ({}): {} queue(s)",
                    board.mount_path,
                    board.connection,
                    queues.len()
                );
                for queue in queues {
                    println!("  {queue}");
                }
            }
            Err(err) => {
                invalid += 1;
                println!("{}: {err}", board.mount_path);
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{invalid} board(s) have invalid connection settings");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "bullpen-server",
            "--port",
            "8080",
            "--host",
            "127.0.0.1",
            "--config",
            "ops.toml",
        ])
        .expect("parse");

        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, Some(8080));
        assert_eq!(cli.serve.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.serve.config, Some(PathBuf::from("ops.toml")));
    }

    #[test]
    fn discover_subcommand_parses() {
        let cli = Cli::try_parse_from(["bullpen-server", "discover"])
            .expect("parse");
        assert!(matches!(cli.command, Some(Command::Discover)));
    }
}
