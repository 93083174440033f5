//! coderag CLI - Command-line driver for the code retrieval tools.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use coderag_core::{RagConfig, Store};
use coderag_mcp::{
    CodeRagServer, CrossReferenceParams, DependencyParams, QueryParams, ToolResult,
};

/// coderag - Hybrid code retrieval across multiple repositories
#[derive(Parser)]
#[command(name = "coderag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/coderag/config.toml, then ./coderag.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search across repositories
    Query {
        /// Question, identifier or code pattern
        query: String,

        /// Restrict to a repository (repeatable)
        #[arg(short, long = "repo")]
        repos: Vec<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Token budget for the serialized results
        #[arg(short = 't', long)]
        max_tokens: Option<usize>,
    },

    /// Show what an entity depends on
    Deps {
        /// Entity id, name, qualified name or repo:entity_id
        entity: String,

        /// Hops to follow
        #[arg(long)]
        depth: Option<u32>,

        #[arg(short, long = "repo")]
        repos: Vec<String>,
    },

    /// Show relationships linking an entity to other repositories
    Xrefs {
        entity: String,

        /// Minimum edge strength (0.0 to 1.0)
        #[arg(short, long)]
        min_strength: Option<f32>,

        #[arg(short, long = "repo")]
        repos: Vec<String>,
    },

    /// List indexed repositories
    Repos,

    /// Show statistics
    Stats,

    /// List the tools exposed to MCP clients
    Tools,
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<RagConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)?,
        None => RagConfig::load_default()?,
    };
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    Ok(config)
}

fn repo_list(repos: Vec<String>) -> Option<Vec<String>> {
    (!repos.is_empty()).then_some(repos)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(&cli)?;
    debug!("Using database at {:?}", config.database.path);

    let result = match cli.command {
        Commands::Query {
            query,
            repos,
            limit,
            max_tokens,
        } => {
            let server = CodeRagServer::new(config)?;
            server
                .query_repositories(QueryParams {
                    query,
                    repositories: repo_list(repos),
                    max_tokens,
                    limit,
                })
                .await
        }
        Commands::Deps {
            entity,
            depth,
            repos,
        } => {
            let server = CodeRagServer::new(config)?;
            server
                .query_dependency(DependencyParams {
                    entity,
                    depth,
                    repositories: repo_list(repos),
                })
                .await
        }
        Commands::Xrefs {
            entity,
            min_strength,
            repos,
        } => {
            let server = CodeRagServer::new(config)?;
            server
                .get_cross_references(CrossReferenceParams {
                    entity,
                    min_strength,
                    repositories: repo_list(repos),
                })
                .await
        }
        Commands::Repos => CodeRagServer::new(config)?.list_repositories().await,
        Commands::Stats => {
            let server = CodeRagServer::new(config)?;
            match server.store().get_stats().await {
                Ok(stats) => ToolResult::success(serde_json::to_value(stats)?),
                Err(e) => ToolResult::from(e),
            }
        }
        Commands::Tools => ToolResult::success(serde_json::to_value(CodeRagServer::tools())?),
    };

    print_result(&result)
}

fn print_result(result: &ToolResult) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(result)?;
    if result.success {
        println!("{}", json);
    } else {
        eprintln!("{}", json);
        std::process::exit(1);
    }
    Ok(())
}
