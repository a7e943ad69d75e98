use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use linkbench::config::{AppConfig, LogFormat, LoggingConfig};
use linkbench::zperf::report::format_summary;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "linkbench",
    about = "Connectivity-gated UDP upload benchmark for Wi-Fi links",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the final upload results as JSON instead of a one-line summary
    #[arg(long)]
    json: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    let results = linkbench::run(config).await?;

    if let Some(results) = results {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else {
            println!("{}", format_summary(&results));
        }
    }

    Ok(())
}
