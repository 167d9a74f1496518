use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use repograph::config::LoggingConfig;

mod cli;

#[derive(Parser)]
#[command(name = "repograph")]
#[command(author = "Intent Project Team")]
#[command(version)]
#[command(about = "Repository indexer: structural parsing, knowledge graph and resilient indexing jobs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./.repograph.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a local project directory
    Index {
        /// Project directory to index
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Re-index only these files (comma-separated, relative to the project)
        #[arg(short, long, value_delimiter = ',', value_name = "FILES")]
        incremental: Vec<String>,

        /// Drop the stored graph and rebuild it
        #[arg(short, long, conflicts_with = "incremental")]
        force: bool,

        /// Framework preset (see GET /indexing/frameworks)
        #[arg(long)]
        framework: Option<String>,

        /// Keep watching and re-index changed files
        #[arg(short, long)]
        watch: bool,
    },

    /// Start the HTTP server
    Serve {
        /// Port (defaults to the [server] section)
        #[arg(short = 'P', long)]
        port: Option<u16>,

        /// Bind address (defaults to the [server] section)
        #[arg(long)]
        host: Option<String>,
    },

    /// Print the stored graph of a repository
    Graph {
        /// Repository id as shown by `index` or `stats --detailed`
        repo_id: String,

        /// overview or full
        #[arg(long, default_value = "overview")]
        view: String,

        /// Output format: json, text
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show index statistics
    Stats {
        /// List repositories and per-label counts
        #[arg(long)]
        detailed: bool,
    },

    /// List supported languages
    Languages,
}

fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = cli::load_config(cli.config.as_deref())?;
    init_logging(cli.debug, cli.verbose, &config.logging);

    info!("repograph v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Index {
            path,
            incremental,
            force,
            framework,
            watch,
        } => {
            let args = cli::index::IndexArgs {
                path,
                incremental,
                force,
                framework,
                watch,
            };
            cli::index::index_project(&config, args).await?;
        }

        Commands::Serve { port, host } => {
            cli::serve::serve_http(&config, host, port).await?;
        }

        Commands::Graph { repo_id, view, format } => {
            cli::graph::show_graph(&config, &repo_id, &view, &format)?;
        }

        Commands::Stats { detailed } => {
            cli::stats::show_stats(&config, detailed)?;
        }

        Commands::Languages => {
            cli::languages::list_languages();
        }
    }

    Ok(())
}
