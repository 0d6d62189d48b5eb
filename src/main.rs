use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use forgelock::access::{self, global};
use forgelock::config::{self, Config};
use forgelock::forge;
use forgelock::metrics::MetricsRegistry;
use forgelock::RepoAccess;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "forgelock", about = "Repository access checks for lockdown mode")]
struct Cli {
    /// Path to the YAML configuration file.  Built-in defaults apply when
    /// omitted.
    #[arg(short, long, env = "FORGELOCK_CONFIG")]
    config: Option<String>,

    /// Override the access cache idle TTL (e.g. `1m`; `0s` or a negative
    /// value disables expiration).
    #[arg(long, allow_hyphen_values = true, value_parser = config::parse_ttl)]
    ttl: Option<Duration>,

    /// Print Prometheus metrics to stdout before exiting.
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up privacy and push access for one or more users on a repository.
    Check {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        /// Username to check; repeat for several users.
        #[arg(long = "user", required = true)]
        users: Vec<String>,
    },
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    owner: &'a str,
    repo: &'a str,
    user: &'a str,
    #[serde(flatten)]
    access: Option<RepoAccess>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    // ---- Config ----
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    if let Some(ttl) = cli.ttl {
        config.access_cache.ttl = ttl;
    }
    tracing::info!(config_path = ?cli.config, "starting forgelock");

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Forge backend ----
    let backend = forge::build_backend(&config, &metrics.metrics)?;
    tracing::info!(graphql_url = %config.upstream.graphql_url, "forge backend initialised");

    // ---- Access cache ----
    let logger = tracing::dispatcher::get_default(|dispatch| dispatch.clone());
    let cache = global::get_instance(
        Some(backend),
        [
            access::with_ttl(config.access_cache.ttl),
            access::with_logger(logger),
            access::with_metrics(metrics.metrics.clone()),
        ],
    );
    let _sweeper = cache.spawn_sweeper(config.access_cache.sweep_interval);

    // ---- Command ----
    let mut failures = 0usize;
    match &cli.command {
        Command::Check { owner, repo, users } => {
            for user in users {
                let result = cache
                    .get_repo_access_info(user, owner, repo)
                    .await
                    .map_err(anyhow::Error::from);
                let (access, error) = match result {
                    Ok(access) => (Some(access), None),
                    Err(e) => {
                        failures += 1;
                        tracing::error!(%owner, %repo, %user, error = %format!("{e:#}"), "access check failed");
                        (None, Some(format!("{e:#}")))
                    }
                };
                let output = CheckOutput {
                    owner,
                    repo,
                    user,
                    access,
                    error,
                };
                let line = serde_json::to_string(&output).context("failed to encode result")?;
                println!("{line}");
            }
        }
    }

    if cli.metrics {
        print!("{}", metrics.encode()?);
    }

    anyhow::ensure!(failures == 0, "{failures} access check(s) failed");
    Ok(())
}
