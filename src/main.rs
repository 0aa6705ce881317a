//! codeforce - GitLab contribution metrics from the command line
//!
//! Fetches activity from the GitLab API through the persistent response cache
//! and prints the computed metrics as JSON.

use std::error::Error;

use clap::Parser;
use serde_json::Value;
use tracing::debug;

use codeforce::cache::Cache;
use codeforce::cli::{cache_config_from_cli, Cli, Command};
use codeforce::gitlab::{FetchError, GitLabClient};
use codeforce::logging::init_logging;
use codeforce::metrics::MetricsService;

/// Runs the selected subcommand and returns its JSON result
async fn dispatch(cli: &Cli, client: &GitLabClient) -> Result<Value, FetchError> {
    let metrics = MetricsService::new(client.clone());
    let value = match &cli.command {
        Command::User { id } => serde_json::to_value(metrics.user_metrics(id, cli.refresh).await?)?,
        Command::Project { id } => {
            serde_json::to_value(metrics.project_metrics(id, cli.refresh).await?)?
        }
        Command::Projects => serde_json::to_value(client.list_projects(cli.refresh).await?)?,
    };
    Ok(value)
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let cache = Cache::open(cache_config_from_cli(&cli)?);
    debug!(path = %cache.path().display(), entries = cache.len(), "cache opened");

    let client = GitLabClient::new(&cli.base_url, cli.token.as_deref(), cache.clone())?;
    let result = dispatch(&cli, &client).await;

    // Whatever was fetched before a failure is still worth keeping
    cache.flush().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
