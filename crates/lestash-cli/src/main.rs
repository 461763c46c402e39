use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging.level);
    commands::run_command(cli, config).await
}

/// `--verbose` beats `RUST_LOG`, which beats the config file.
fn log_directive(verbose: bool, env: Option<String>, configured: &str) -> String {
    if verbose {
        return "debug".into();
    }
    env.filter(|v| !v.trim().is_empty()).unwrap_or_else(|| configured.to_string())
}

fn init_logging(verbose: bool, configured: &str) {
    let directive = log_directive(verbose, std::env::var(EnvFilter::DEFAULT_ENV).ok(), configured);
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
