mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tierline_telemetry::Paths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries JSON output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = Paths::new()?;

    match cli.command {
        Commands::Init { force } => commands::init::run(&paths, force),
        Commands::Route {
            text,
            file,
            resources,
            min_capability,
            out,
        } => {
            let input = match (text, file) {
                (Some(text), _) => commands::route::Input::Text(text),
                (None, Some(file)) => commands::route::Input::Batch(file),
                (None, None) => anyhow::bail!("route needs --text or --file"),
            };
            commands::route::run(&paths, input, resources, min_capability, out.as_deref()).await
        }
        Commands::Classify { text } => commands::classify::run(&paths, &text),
        Commands::Invalidate { resource_id } => commands::invalidate::run(&paths, &resource_id).await,
        Commands::Health => commands::health::run(&paths),
        Commands::Status => commands::status::run(&paths).await,
        Commands::History { limit, stats } => commands::history::run(&paths, limit, stats),
        Commands::Version => commands::version::run(),
    }
}
