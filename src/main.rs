// Mnemo: memory-augmented seller-analytics agent
// Main entry point for the mnemo binary

use clap::Parser;
use mnemo::cli::{Cli, Command};
use mnemo::config::Config;
use mnemo::handlers::{handle_memory_stats, handle_run, handle_scenario, OutputFormat};
use mnemo::telemetry::{init_telemetry, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env();
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry(log_level, LogFormat::from_env());

    tracing::info!("Mnemo v{}", env!("CARGO_PKG_VERSION"));

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Run { query, mode, user } => {
            handle_run(query, &mode, &user, &config, format).await
        }

        Command::Scenario {
            file,
            configs,
            repeat,
            out,
            user,
        } => handle_scenario(&file, &configs, repeat, out, &user, &config, format).await,

        Command::MemoryStats => handle_memory_stats(&config, format).await,
    }
}
