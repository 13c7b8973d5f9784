// src/bin/review.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use redlight_enforcer::review::{export, join, load_evidence, DispositionTable};
use redlight_enforcer::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "redlight-review", about = "Review recorded red-light violations")]
struct Args {
    /// YAML configuration file (for the violation directory and file names)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the violation directory
    #[arg(short, long)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List violations, optionally only those with a given status
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one violation with its evidence
    Show { id: u64 },
    /// Change the disposition of a violation
    SetStatus { id: u64, status: String },
    /// Write the joined tables to a CSV file
    Export {
        path: PathBuf,
        #[arg(long)]
        status: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("redlight_enforcer=info")),
        )
        .init();

    let args = Args::parse();
    let config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    let dir = args
        .dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.recorder.output_dir));
    let status_path = dir.join(&config.recorder.status_file);
    let report_path = dir.join(&config.recorder.report_file);

    let mut table = DispositionTable::load(&status_path)
        .with_context(|| format!("No disposition table in {}", dir.display()))?;

    match args.command {
        Command::List { status } => {
            println!("{:>6}  {:<10}  {:<12}  {}", "ID", "DATE", "TYPE", "STATUS");
            for row in table
                .rows()
                .iter()
                .filter(|r| status.as_deref().map_or(true, |s| r.status == s))
            {
                println!(
                    "{:>6}  {:<10}  {:<12}  {}",
                    row.id, row.date, row.violation_type, row.status
                );
            }
        }
        Command::Show { id } => {
            let row = table
                .get(id)
                .with_context(|| format!("No violation with id {}", id))?;
            let evidence = load_evidence(&report_path)?;
            let joined = join(row, evidence.get(&id));
            println!("{}", serde_json::to_string_pretty(&joined)?);
            if let Some(rec) = evidence.get(&id) {
                println!(
                    "bbox: ({}, {}) - ({}, {})  anchor: ({}, {})",
                    rec.x1, rec.y1, rec.x2, rec.y2, rec.cx, rec.bottom_y
                );
            } else {
                println!("(no evidence row for id {})", id);
            }
        }
        Command::SetStatus { id, status } => {
            table.set_status(id, &status)?;
            table.save()?;
            println!("Violation #{} -> {}", id, status);
        }
        Command::Export { path, status } => {
            let evidence = load_evidence(&report_path)?;
            let n = export(&table, &evidence, status.as_deref(), &path)?;
            println!("Exported {} row(s) to {}", n, path.display());
        }
    }

    Ok(())
}
