use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use ragstudio::cli::commands::{
    handle_chat, handle_config, handle_index, handle_query, handle_status, handle_summary,
    handle_visualize,
};
use ragstudio::cli::{Cli, Commands};
use ragstudio::models::{Config, OutputFormat};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "ragstudio=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load().unwrap_or_default();
    let format = cli.format.unwrap_or(config.output.default_format);
    let verbose = cli.verbose;

    tokio::select! {
        result = run_command(cli.command, format, verbose) => {
            result?;
        }
        _ = shutdown_signal() => {
            eprintln!("\nReceived shutdown signal, cleaning up...");
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    }

    Ok(())
}

async fn run_command(command: Commands, format: OutputFormat, verbose: bool) -> Result<()> {
    match command {
        Commands::Index(cmd) => handle_index(cmd, format, verbose).await,
        Commands::Summary(cmd) => handle_summary(cmd, format, verbose).await,
        Commands::Query(args) => handle_query(args, format, verbose).await,
        Commands::Chat(args) => handle_chat(args, format, verbose).await,
        Commands::Visualize(args) => handle_visualize(args, format, verbose).await,
        Commands::Status(args) => handle_status(args, format, verbose).await,
        Commands::Config(cmd) => handle_config(cmd, format, verbose).await,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
