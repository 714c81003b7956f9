use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use oyster_ingest::{run, write_modifications_csv, IngestConfig};

/// Load an identity-cluster document into the configured database
#[derive(Parser, Debug)]
#[command(name = "oyster-ingest")]
#[command(about = "Loads an identity repository document into a relational store")]
struct Args {
    /// Identity document (XML)
    document: PathBuf,

    /// Ingest configuration (JSON)
    #[arg(long, default_value = "oyster-ingest.json")]
    config: PathBuf,

    /// Also write the modification history to this CSV file
    #[arg(long)]
    modifications_csv: Option<PathBuf>,

    /// Print the run report as JSON instead of the summary
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // RUST_LOG overrides; progress lines are info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let config = IngestConfig::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    if !args.json {
        println!("🗄️  Identity ingest: XML → {}", config.database.display());
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let report = run(&args.document, &config)
        .with_context(|| format!("Failed to ingest {}", args.document.display()))?;

    if let Some(path) = &args.modifications_csv {
        let written = write_modifications_csv(&report.modifications, path)?;
        if !args.json {
            println!("✓ Wrote {} modification entries to {}", written, path.display());
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n✓ Clusters: {}", report.clusters);
    println!("✓ References: {}", report.references);
    println!("✓ Rows inserted: {}", report.rows_inserted);
    if report.malformed_references > 0 {
        println!("⚠️  Malformed references skipped: {}", report.malformed_references);
    }
    if report.skipped_clusters > 0 {
        println!("⚠️  Clusters without Identifier: {}", report.skipped_clusters);
    }

    println!("\n🕓 Modifications ({}):", report.modifications.len());
    for (date, entry) in report.modifications.iter() {
        println!(
            "   {}  {}  {}",
            date,
            entry.oyster_version.as_deref().unwrap_or("-"),
            entry.run_script.as_deref().unwrap_or("-")
        );
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.is_degraded() {
        println!(
            "⚠️  Finished with storage faults: {} failed inserts, {} failed commits",
            report.failed_inserts, report.failed_commits
        );
    } else {
        println!("✅ Ingest complete (run {})", report.run_id);
    }

    Ok(())
}
