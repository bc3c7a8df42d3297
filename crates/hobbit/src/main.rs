//! hobbit: golden-pattern retrieval for coding agents
//!
//! Indexes a reference ("golden") repository into a vector store and serves
//! similarity search over it, from the command line or as an MCP server.

mod config;
mod mcp;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use hobbit_rag::{
    CancellationToken, ExtensionSet, IndexRequest, IndexSummary, IndexingPipeline, RagError,
    SearchService,
};

/// Golden-pattern retrieval for coding agents
#[derive(Parser)]
#[command(name = "hobbit")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .hobbit directory or config file (default: search for .hobbit/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .hobbit directory with config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Index the golden repository into the vector store
    Index {
        /// Directory to index (default: project root from config or RAG_REPO_PATH)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Destination collection
        #[arg(long)]
        collection: Option<String>,

        /// Abort on the first file that fails to index
        #[arg(long)]
        fail_fast: bool,
    },

    /// Search the index for patterns matching a description
    Search {
        /// Natural-language description or code snippet
        query: String,

        /// Maximum number of matches
        #[arg(short = 'n', long, default_value = "5")]
        max_results: usize,

        /// Collection to search
        #[arg(long)]
        collection: Option<String>,
    },

    /// Run the MCP server on stdio
    Serve,
}

fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize logging to stderr.
///
/// stdout is reserved for command output and the MCP transport.
fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose))
        .init();
}

/// Initialize logging for indexing runs.
/// Logs to stderr and to rotating files in .hobbit/logs/ with daily rotation.
fn init_file_logging(hobbit_dir: &Path, verbose: bool) {
    let logs_dir = hobbit_dir.join("logs");

    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "hobbit.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard would stop the writer thread
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose))
        .init();
}

/// Load configuration from an explicit path or by discovery, then apply
/// environment overrides.
///
/// Returns the config and the path to the `.hobbit` directory, if any.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    let (mut config, hobbit_dir) = if let Some(path) = override_path {
        let config_file = if path.is_dir() {
            path.join(config::CONFIG_FILE)
        } else {
            path.clone()
        };
        let hobbit_dir = config_file.parent().unwrap_or(path).to_path_buf();
        (Config::from_file(&config_file)?, Some(hobbit_dir))
    } else {
        match Config::find_and_load()? {
            Some((config, hobbit_dir)) => (config, Some(hobbit_dir)),
            None => (Config::default(), None),
        }
    };

    config.apply_env();
    Ok((config, hobbit_dir))
}

/// Fail with every validation problem at once.
fn ensure_valid(config: &Config) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for e in &errors {
        tracing::error!("Invalid configuration: {}", e);
    }
    let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
    anyhow::bail!("Invalid configuration:\n  {}", joined.join("\n  "))
}

fn search_service(config: &Config) -> Result<SearchService> {
    Ok(SearchService::new(
        config.embedder()?,
        config.vector_store()?,
        config.embedding.dimension,
    ))
}

fn print_summary(summary: &IndexSummary) {
    println!(
        "Indexed {} of {} files ({} empty, {} failed) in {} batches, {}ms",
        summary.files_indexed,
        summary.files_scanned,
        summary.files_skipped,
        summary.files_failed,
        summary.batches_committed,
        summary.elapsed_ms
    );
    for failure in &summary.failures {
        println!(
            "  failed: {} (batch {}): {}",
            failure.path, failure.batch, failure.error
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            init_logging(cli.verbose);
            use config::{CONFIG_FILE, HOBBIT_DIR};

            let hobbit_dir = PathBuf::from(HOBBIT_DIR);
            let config_path = hobbit_dir.join(CONFIG_FILE);

            if config_path.exists() && !force {
                anyhow::bail!(".hobbit/config.toml already exists. Use --force to overwrite.");
            }

            if !hobbit_dir.exists() {
                std::fs::create_dir_all(&hobbit_dir)?;
                info!("Created {}/", hobbit_dir.display());
            }

            std::fs::write(&config_path, config::DEFAULT_CONFIG)?;
            info!("Created {}", config_path.display());
            info!("Next steps:");
            info!("  1. Edit .hobbit/config.toml to point at your golden repository");
            info!("  2. Export OPENAI_API_KEY (and QDRANT_ENDPOINT if not local)");
            info!("  3. Run 'hobbit index' to build the index");
            info!("  4. Run 'hobbit serve' from your agent's MCP configuration");
        }

        Commands::Index {
            path,
            collection,
            fail_fast,
        } => {
            let (mut config, hobbit_dir) = load_config(cli.config.as_ref())?;
            let log_dir = hobbit_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(config::HOBBIT_DIR));
            init_file_logging(&log_dir, cli.verbose);

            if let Some(collection) = collection {
                config.index.collection = collection;
            }
            if fail_fast {
                config.index.fail_fast = true;
            }
            ensure_valid(&config)?;

            let root = path.unwrap_or_else(|| config.resolve_root(hobbit_dir.as_deref()));
            let root = root.canonicalize().unwrap_or(root);

            let pipeline = IndexingPipeline::new(
                config.embedder()?,
                config.vector_store()?,
                config.pipeline_config(),
            );
            let request = IndexRequest::new(
                &root,
                ExtensionSet::new(&config.index.extensions),
                &config.index.collection,
            );

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, finishing current batch");
                    on_signal.cancel();
                }
            });

            info!(
                "Indexing {} into '{}' ({:?})",
                root.display(),
                config.index.collection,
                config.index.extensions
            );

            match pipeline.index(&request, &cancel).await {
                Ok(summary) => print_summary(&summary),
                Err(RagError::Cancelled { committed_batches }) => {
                    anyhow::bail!(
                        "Indexing cancelled; {} batches were committed before the interrupt",
                        committed_batches
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to index {}", root.display()));
                }
            }
        }

        Commands::Search {
            query,
            max_results,
            collection,
        } => {
            init_logging(cli.verbose);
            let (mut config, _) = load_config(cli.config.as_ref())?;
            if let Some(collection) = collection {
                config.index.collection = collection;
            }
            ensure_valid(&config)?;

            let service = search_service(&config)?;
            let matches = service
                .search_all(
                    &config.index.collection,
                    query.as_bytes(),
                    max_results,
                    &CancellationToken::new(),
                )
                .await
                .context("Search failed")?;

            print!("{}", mcp::format_search_patterns(&matches));
            if matches.is_empty() {
                println!();
            }
        }

        Commands::Serve => {
            init_logging(cli.verbose);
            let (config, hobbit_dir) = load_config(cli.config.as_ref())?;
            if let Some(dir) = &hobbit_dir {
                info!("Using config from {}", dir.display());
            }
            ensure_valid(&config)?;

            let service = Arc::new(search_service(&config)?);
            let server_config =
                mcp::McpServerConfig::default().with_collection(&config.index.collection);
            mcp::run_mcp_server(service, server_config).await?;
        }
    }

    Ok(())
}
