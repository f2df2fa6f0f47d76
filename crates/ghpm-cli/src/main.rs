//! ghpm CLI - GitHub project management tools for AI assistants.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use ghpm_core::{Config, IssueFilter, IssueProvider, Provider};
use ghpm_github::GitHubClient;
use ghpm_mcp::McpServer;
use ghpm_storage::{
    mask_token, resolve_token, token_key, CredentialStore, KeychainStore, GITHUB_PROVIDER,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ghpm")]
#[command(author, version, about = "GitHub project management over MCP", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdin/stdout
    Serve,

    /// Read and change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage the GitHub token in the OS keychain
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Show GitHub rate-limit quotas
    Status,

    /// List repository issues as JSON
    Issues {
        /// Filter by state (open, closed, all)
        #[arg(short, long, default_value = "open")]
        state: String,

        /// Filter by label (repeatable)
        #[arg(short, long)]
        label: Vec<String>,

        /// Maximum number of pages to fetch
        #[arg(long, default_value = "1")]
        max_pages: u32,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Set a value, e.g. `ghpm config set github.owner octocat`
    Set { key: String, value: String },

    /// Print a value
    Get { key: String },

    /// Print the whole configuration
    Show,

    /// Print the config file location
    Path,
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Store a token (read from stdin when omitted)
    Set { token: Option<String> },

    /// Remove the stored token
    Delete,

    /// Show where the token comes from
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the MCP protocol, so logs go to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Some(Commands::Serve) => serve(cli.config).await,
        Some(Commands::Config { command }) => config_command(cli.config, command),
        Some(Commands::Token { command }) => token_command(command),
        Some(Commands::Status) => status(cli.config).await,
        Some(Commands::Issues {
            state,
            label,
            max_pages,
        }) => issues(cli.config, state, label, max_pages).await,
        None => {
            println!("ghpm - GitHub project management over MCP");
            println!("Run with --help for usage information");
            Ok(())
        }
    }
}

fn config_file(path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => Config::config_path().context("Could not locate config file"),
    }
}

/// File config with environment overrides applied.
fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = config_file(path)?;
    let mut config = Config::load_from(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env();
    Ok(config)
}

fn build_client(config: &Config) -> anyhow::Result<GitHubClient> {
    let store = KeychainStore::new();
    let (token, source) = resolve_token(&store)
        .context("Failed to read GitHub token")?
        .ok_or_else(|| anyhow!("No GitHub token: set GITHUB_TOKEN or run `ghpm token set`"))?;
    tracing::debug!(source = source.describe(), "Resolved GitHub token");

    GitHubClient::from_config(config, &token).context("Failed to create GitHub client")
}

async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = build_client(&config)?;
    tracing::info!(
        owner = client.owner(),
        repo = client.repo(),
        "Serving GitHub repository"
    );

    let mut server = McpServer::new(Arc::new(client));
    server.run_stdio().await.context("MCP server failed")
}

fn config_command(config_path: Option<PathBuf>, command: ConfigCommands) -> anyhow::Result<()> {
    let path = config_file(config_path)?;

    match command {
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load_from(&path)?;
            config.set(&key, &value)?;
            config
                .save_to(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} = {}", key, value);
        }
        ConfigCommands::Get { key } => match Config::load_from(&path)?.get(&key)? {
            Some(value) => println!("{}", value),
            None => bail!("{} is not set", key),
        },
        ConfigCommands::Show => {
            let config = Config::load_from(&path)?;
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to render config")?
            );
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }

    Ok(())
}

fn token_command(command: TokenCommands) -> anyhow::Result<()> {
    let store = KeychainStore::new();
    let key = token_key(GITHUB_PROVIDER);

    match command {
        TokenCommands::Set { token } => {
            let token = match token {
                Some(token) => token,
                None => {
                    eprintln!("Paste the GitHub token and press Enter:");
                    let mut line = String::new();
                    io::stdin()
                        .lock()
                        .read_line(&mut line)
                        .context("Failed to read token from stdin")?;
                    line
                }
            };
            let token = token.trim();
            if token.is_empty() {
                bail!("Token must not be empty");
            }
            store.store(&key, token)?;
            println!("Token stored in keychain ({})", mask_token(token));
        }
        TokenCommands::Delete => {
            store.delete(&key)?;
            println!("Token removed from keychain");
        }
        TokenCommands::Status => match resolve_token(&store)? {
            Some((token, source)) => {
                println!("Token {} from {}", mask_token(&token), source.describe())
            }
            None => println!("No token configured"),
        },
    }

    Ok(())
}

async fn status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = build_client(&config)?;

    let statuses = client
        .refresh_rate_limits()
        .await
        .context("Failed to fetch rate limits")?;
    for status in statuses {
        let snapshot = status.snapshot;
        println!(
            "{:<8} {:>6}/{:<6} resets at {}",
            status.surface.as_str(),
            snapshot.remaining,
            snapshot.limit,
            snapshot.reset_at.to_rfc3339()
        );
    }

    client.shutdown();
    Ok(())
}

async fn issues(
    config_path: Option<PathBuf>,
    state: String,
    labels: Vec<String>,
    max_pages: u32,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = build_client(&config)?;

    let page = client
        .list_issues(IssueFilter {
            state: Some(state),
            labels,
            max_pages: Some(max_pages),
            ..Default::default()
        })
        .await
        .context("Failed to list issues")?;
    println!("{}", serde_json::to_string_pretty(&page)?);

    client.shutdown();
    Ok(())
}
