//! symgraph - cross-file symbol resolution CLI
//!
//! Builds a confidence-scored knowledge graph of a Java / Go codebase and
//! keeps it up to date incrementally.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use symgraph::core::config::LoggingConfig;
use symgraph::core::incremental::RunReport;
use symgraph::{Config, GraphQuery, LanguageRegistry};

/// symgraph - cross-file symbol resolution and code knowledge graph
#[derive(Parser)]
#[command(name = "symgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults to <root>/symgraph.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a whole project, reusing the stored state of the previous run
    Resolve {
        /// Path to the project root
        root: PathBuf,
    },

    /// Re-resolve only the given files (relative to the root)
    Update {
        /// Path to the project root
        root: PathBuf,

        /// Changed, added or deleted files
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Query the stored graph
    Query {
        /// Path to the project root
        root: PathBuf,

        #[command(subcommand)]
        query_type: QueryCommands,
    },

    /// List supported languages
    Languages,
}

#[derive(Subcommand)]
enum QueryCommands {
    /// Find a definition by FQN or short name
    Definition {
        #[arg(short, long)]
        symbol: String,
    },

    /// Incoming edges of a symbol
    References {
        /// Fully-qualified name
        #[arg(short, long)]
        symbol: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Edges scored below a threshold
    LowConfidence {
        #[arg(short, long, default_value_t = 0.5)]
        threshold: f64,
    },

    /// Cycles in the type hierarchy
    Cycles,

    /// Node and edge counts
    Summary,
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default = if verbose {
        "symgraph=debug".to_string()
    } else {
        format!("symgraph={}", logging.level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

fn load_config(explicit: Option<&Path>, root: Option<&Path>) -> anyhow::Result<Config> {
    match (explicit, root) {
        (Some(path), _) => Config::from_file(path),
        (None, Some(root)) => Config::discover(root),
        (None, None) => Ok(Config::default()),
    }
}

fn project_root(command: &Commands) -> Option<&Path> {
    match command {
        Commands::Resolve { root } | Commands::Update { root, .. } | Commands::Query { root, .. } => {
            Some(root.as_path())
        }
        Commands::Languages => None,
    }
}

/// Print the run summary; failed files go to stderr
fn print_report(report: &RunReport) {
    println!(
        "files: {} collected, {} unchanged, {} removed, {} resolved",
        report.files_collected,
        report.files_skipped,
        report.files_removed,
        report.resolved.len()
    );
    println!(
        "graph: {} symbols, {} edges, {} unresolved",
        report.symbols, report.edges, report.unresolved
    );
    for diagnostic in &report.diagnostics {
        warn!("{:?} in {}: {}", diagnostic.kind, diagnostic.file_path, diagnostic.message);
    }
    if report.sink_failures > 0 {
        eprintln!(
            "{} batch(es) could not be written; their files will be retried next run",
            report.sink_failures
        );
    }
    if report.cancelled {
        eprintln!("run cancelled; unfinished files keep their previous state");
    }
    for failure in &report.failures {
        eprintln!("error: {}: {}", failure.path, failure.error);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), project_root(&cli.command))?;

    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Resolve { root } => {
            info!("Resolving project at {:?}", root);
            let mut controller = symgraph::core::open_project(&root, config)?;
            let cancel = controller.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let report = controller.sync_project().await?;
            print_report(&report);
            if report.has_parse_failures() {
                std::process::exit(1);
            }
        }

        Commands::Update { root, paths } => {
            info!("Updating {} path(s) under {:?}", paths.len(), root);
            let mut controller = symgraph::core::open_project(&root, config)?;
            let cancel = controller.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });

            let report = controller.update_paths(&paths).await?;
            print_report(&report);
            if report.has_parse_failures() {
                std::process::exit(1);
            }
        }

        Commands::Query { root, query_type } => {
            let controller = symgraph::core::open_project(&root, config)?;
            let query = GraphQuery::new(controller.table());

            match query_type {
                QueryCommands::Definition { symbol } => {
                    let result = query.definition(&symbol);
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                QueryCommands::References { symbol, limit } => {
                    let mut result = query
                        .references(&symbol)
                        .ok_or_else(|| anyhow::anyhow!("Symbol '{}' not found", symbol))?;
                    result.references.truncate(limit);
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                QueryCommands::LowConfidence { threshold } => {
                    let result = query.low_confidence(threshold);
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                QueryCommands::Cycles => {
                    let result = query.inheritance_cycles();
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                QueryCommands::Summary => {
                    let result = query.summary();
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
            }
        }

        Commands::Languages => {
            let registry = LanguageRegistry::new();
            println!("Supported languages:");
            for lang in registry.list_languages() {
                println!(
                    "  - {} (extensions: {})",
                    lang.language_id(),
                    lang.file_extensions().join(", ")
                );
            }
        }
    }

    Ok(())
}
