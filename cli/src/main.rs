//! ATT&CK Matrix CLI
//!
//! Command-line interface for generating, serving, and querying ATT&CK
//! matrix graphs.
//!
//! # Usage
//!
//! ```bash
//! attackmatrix generate --matrix Enterprise
//! attackmatrix generate --matrix ALL --force
//! attackmatrix serve --ip 0.0.0.0 --port 8008
//! attackmatrix explore Enterprise/Actors/G0005
//! attackmatrix search dragon capture --matrix ICS
//! attackmatrix actor-overlap G0005 G0006
//! attackmatrix ttp-overlap T1059 S0002
//! ```

use anyhow::{bail, Context};
use attackmatrix::cache::{CacheConfig, MatrixCache};
use attackmatrix::fetch::BundleFetcher;
use attackmatrix::query::{self, MatrixFilter};
use attackmatrix::{catalog, link, transform, FilterPolicy, GraphSet};
use attackmatrix_gateway::AppState;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

mod config;

#[derive(Parser)]
#[command(name = "attackmatrix")]
#[command(version)]
#[command(about = "ATT&CK matrix graph generator and query engine", long_about = None)]
struct Cli {
    /// Directory holding downloaded bundles and generated graph caches
    #[arg(long, env = "ATTACKMATRIX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Profile name from config file
    #[arg(long, short)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download bundles and generate matrix graph caches
    Generate {
        /// Matrix to generate, or ALL
        #[arg(long, default_value = "ALL")]
        matrix: String,
        /// Re-download bundles even when a local copy exists
        #[arg(long)]
        force: bool,
        /// Drop revoked actors, techniques, and mitigations
        #[arg(long)]
        exclude_revoked: bool,
        /// Drop deprecated entities of every kind
        #[arg(long)]
        exclude_deprecated: bool,
    },
    /// Serve the query API over HTTP
    Serve {
        /// Bind address; falls back to the config file, then 0.0.0.0
        #[arg(long)]
        ip: Option<String>,
        /// Bind port; falls back to the config file, then 8008
        #[arg(long)]
        port: Option<u16>,
        /// Require this token as a `token` query parameter
        #[arg(long, env = "ATTACKMATRIX_TOKEN")]
        token: Option<String>,
    },
    /// Print the raw subtree at a slash-separated path
    Explore {
        /// Path such as `Enterprise/Actors/G0005`; empty for the full snapshot
        #[arg(default_value = "")]
        path: String,
    },
    /// Search names and descriptions for any of the given terms
    Search {
        /// Search terms (OR semantics)
        terms: Vec<String>,
        /// Restrict the search to these matrices
        #[arg(long)]
        matrix: Vec<String>,
    },
    /// Show the TTPs two actors have in common
    ActorOverlap {
        actor1: String,
        actor2: String,
    },
    /// Show actors employing every one of the given TTPs
    TtpOverlap {
        /// Technique, subtechnique, malware, or tool ids
        ttps: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = config::Config::load(cli.profile.as_deref()).unwrap_or_default();
    let cache_dir = cli
        .cache_dir
        .or_else(|| config.cache_dir.as_deref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("matrices"));
    let cache = MatrixCache::new(CacheConfig::new(&cache_dir));

    match cli.command {
        Commands::Generate {
            matrix,
            force,
            exclude_revoked,
            exclude_deprecated,
        } => {
            let policy = FilterPolicy {
                include_revoked: !exclude_revoked,
                include_deprecated: !exclude_deprecated,
            };
            generate(&cache, &cache_dir, &matrix, force, &policy).await
        }
        Commands::Serve { ip, port, token } => {
            let token = token.or(config.token);
            let addr = bind_addr(ip, port, &config.ip, config.port)?;
            let graphs = load_graphs(&cache, &cache_dir)?;
            attackmatrix_gateway::serve(addr, AppState::new(graphs, token)).await?;
            Ok(())
        }
        Commands::Explore { path } => {
            let graphs = load_graphs(&cache, &cache_dir)?;
            print_json(&query::explore(&graphs, &path))
        }
        Commands::Search { terms, matrix } => {
            let graphs = load_graphs(&cache, &cache_dir)?;
            let filter = MatrixFilter::from_params(matrix);
            print_json(&query::search(&graphs, &terms, &filter))
        }
        Commands::ActorOverlap { actor1, actor2 } => {
            let graphs = load_graphs(&cache, &cache_dir)?;
            print_json(&query::actor_overlap(&graphs, &actor1, &actor2))
        }
        Commands::TtpOverlap { ttps } => {
            let graphs = load_graphs(&cache, &cache_dir)?;
            print_json(&query::ttp_overlap(&graphs, &ttps))
        }
    }
}

/// Fetch, transform, link, and cache one matrix (or every known matrix).
async fn generate(
    cache: &MatrixCache,
    bundle_dir: &std::path::Path,
    matrix: &str,
    force: bool,
    policy: &FilterPolicy,
) -> anyhow::Result<()> {
    let sources: Vec<_> = if matrix.eq_ignore_ascii_case("ALL") {
        catalog::MATRICES.iter().collect()
    } else {
        let Some(source) = catalog::find(matrix) else {
            bail!(
                "unknown matrix {:?}; known matrices: {}",
                matrix,
                catalog::names().collect::<Vec<_>>().join(", ")
            );
        };
        vec![source]
    };

    let fetcher = BundleFetcher::new();
    for source in sources {
        let bundle = fetcher
            .fetch_cached(source, bundle_dir, force)
            .await
            .with_context(|| format!("fetching bundle for {}", source.name))?;
        let mut graph = transform::transform(&bundle, source.name, policy);
        let report = link::link(&bundle, &mut graph, policy);
        tracing::info!(
            matrix = source.name,
            entities = graph.len(),
            linked = report.linked,
            skipped = report.skipped.len(),
            "matrix generated"
        );
        cache.store(&graph)?;
    }
    Ok(())
}

fn load_graphs(cache: &MatrixCache, cache_dir: &std::path::Path) -> anyhow::Result<GraphSet> {
    let graphs = cache.load_all()?;
    if graphs.is_empty() {
        bail!(
            "no cached matrices under {}; run `attackmatrix generate` first",
            cache_dir.display()
        );
    }
    Ok(graphs)
}

/// Resolve the bind address: explicit flag, then config file, then the
/// defaults 0.0.0.0:8008.
fn bind_addr(
    ip: Option<String>,
    port: Option<u16>,
    config_ip: &Option<String>,
    config_port: Option<u16>,
) -> anyhow::Result<SocketAddr> {
    let ip = ip
        .or_else(|| config_ip.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let port = port.or(config_port).unwrap_or(8008);
    format!("{}:{}", ip, port)
        .parse()
        .context("invalid bind address")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
