use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smartdir::watch;
use smartdir_core::config::{self, AppConfig};
use smartdir_core::{dedup, pipeline, tagging};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => run_init(&cfg).await,
        Commands::Categorize { path, json } => run_categorize(&cfg, &path, json).await,
        Commands::Monitor { path } => watch::monitor_path(&cfg, &resolve_root(&path)?).await,
        Commands::Tag { path, json } => run_tag(&cfg, &path, json).await,
        Commands::Search { query, limit, json } => run_search(&cfg, &query, limit, json).await,
        Commands::Stats { json } => run_stats(&cfg, json).await,
        Commands::Reindex => run_reindex(&cfg).await,
        Commands::Deduplicate {
            path,
            dry_run,
            confirm,
            json,
        } => run_deduplicate(&cfg, &path, dry_run, confirm, json).await,
    }
}

#[derive(Parser)]
#[command(name = "smartdir")]
#[command(about = "AI-assisted file categorization, search and deduplication", long_about = None)]
struct Cli {
    /// Path to a config file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and search index
    Init,
    /// Fingerprint, classify and index every file under a directory
    Categorize {
        path: PathBuf,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Watch a directory and reprocess files once they stop changing
    Monitor { path: PathBuf },
    /// Derive tags for untagged files under a directory
    Tag {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Search the index
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show file counts per category
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Push every stored record to the search index
    Reindex,
    /// Find duplicate files under a directory, and remove them with --confirm
    Deduplicate {
        path: PathBuf,
        /// Only report, even with --confirm
        #[arg(long)]
        dry_run: bool,
        /// Delete every copy but the first of each set
        #[arg(long)]
        confirm: bool,
        #[arg(long)]
        json: bool,
    },
}

/// Stored paths are absolute, so roots are resolved before use.
fn resolve_root(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("cannot access {}", path.display()))
}

fn prefix_of(root: &Path) -> String {
    root.to_string_lossy().into_owned()
}

async fn run_init(cfg: &AppConfig) -> Result<()> {
    let data_dir = config::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let pipeline = pipeline::build_pipeline(cfg).await?;
    pipeline.prepare_index().await?;
    println!("Smartdir initialized at {}", data_dir.display());
    Ok(())
}

async fn run_categorize(cfg: &AppConfig, path: &Path, json: bool) -> Result<()> {
    let root = resolve_root(path)?;
    let pipeline = pipeline::build_pipeline(cfg).await?;
    let summary = pipeline.run(&root).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "status": "ok",
                "root": prefix_of(&root),
                "discovered": summary.discovered,
                "processed": summary.processed,
            }))?
        );
    } else {
        println!(
            "categorize: discovered {}, processed {}",
            summary.discovered, summary.processed
        );
    }
    Ok(())
}

async fn run_tag(cfg: &AppConfig, path: &Path, json: bool) -> Result<()> {
    let root = resolve_root(path)?;
    let sink = pipeline::build_sink(cfg).await?;
    let classifier = pipeline::build_classifier(cfg)?;
    let report = tagging::tag_files(sink.as_ref(), classifier.as_ref(), &prefix_of(&root)).await?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "tagged": report.tagged,
                "skipped": report.skipped,
                "failed": report.failed,
            }))?
        );
    } else {
        println!(
            "Tagged {} files ({} skipped, {} failed)",
            report.tagged, report.skipped, report.failed
        );
    }
    Ok(())
}

async fn run_search(cfg: &AppConfig, query: &str, limit: usize, json: bool) -> Result<()> {
    let sink = pipeline::build_sink(cfg).await?;
    let hits = sink.index().search(query, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results found");
        return Ok(());
    }
    println!("Search results:");
    for hit in hits {
        println!("- {}\n  Category: {}\n  ID: {}", hit.path, hit.category, hit.id);
        if !hit.tags.is_empty() {
            println!("  Tags: {}", hit.tags.join(", "));
        }
    }
    Ok(())
}

async fn run_stats(cfg: &AppConfig, json: bool) -> Result<()> {
    let sink = pipeline::build_sink(cfg).await?;
    let counts = sink.category_counts().await?;
    let total: i64 = counts.iter().map(|(_, n)| n).sum();
    if json {
        let by_category: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(c, n)| (c.to_string(), serde_json::Value::from(*n)))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "categories": by_category,
                "total": total,
            }))?
        );
        return Ok(());
    }
    println!("File Statistics:");
    for (category, count) in &counts {
        println!("{:<12}: {} files", category.as_str(), count);
    }
    println!("\nTotal files: {total}");
    Ok(())
}

async fn run_reindex(cfg: &AppConfig) -> Result<()> {
    let sink = pipeline::build_sink(cfg).await?;
    sink.index()
        .ensure_index()
        .await
        .context("failed to create search index")?;
    let n = tagging::reindex_all(sink.as_ref()).await?;
    println!("Reindexed {n} files");
    Ok(())
}

/// Sets shown when not removing.
const PREVIEW_SETS: usize = 3;

async fn run_deduplicate(
    cfg: &AppConfig,
    path: &Path,
    dry_run: bool,
    confirm: bool,
    json: bool,
) -> Result<()> {
    let root = resolve_root(path)?;
    let sink = pipeline::build_sink(cfg).await?;
    let report = dedup::find_duplicates(sink.as_ref(), &prefix_of(&root)).await?;
    let remove = confirm && !dry_run;

    if json && !remove {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if !json {
        println!(
            "Found {} duplicate files ({:.2} MB)",
            report.duplicate_files(),
            report.reclaimable_bytes as f64 / (1024.0 * 1024.0)
        );
    }
    if report.is_empty() {
        if json {
            println!("{}", serde_json::json!({ "removed": 0, "freed_bytes": 0, "failures": [] }));
        }
        return Ok(());
    }

    if !remove {
        println!("Run with --confirm to remove duplicates");
        for group in report.groups.iter().take(PREVIEW_SETS) {
            println!("\nDuplicate set with hash {}:", short_hash(&group.hash));
            println!("  Keep: {}", group.keep());
            for extra in group.extras() {
                println!("  Remove: {extra}");
            }
        }
        if report.groups.len() > PREVIEW_SETS {
            println!(
                "\n... and {} more duplicate sets",
                report.groups.len() - PREVIEW_SETS
            );
        }
        return Ok(());
    }

    let removal = dedup::remove_duplicates(sink.as_ref(), &report).await;
    if json {
        let failures: Vec<_> = removal
            .failures
            .iter()
            .map(|(p, e)| serde_json::json!({ "path": p.to_string_lossy(), "error": e }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "removed": removal.removed,
                "freed_bytes": removal.freed_bytes,
                "failures": failures,
            }))?
        );
    } else {
        println!("Removed {} duplicate files", removal.removed);
        for (p, e) in &removal.failures {
            println!("  failed: {}: {e}", p.display());
        }
    }
    Ok(())
}

fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
