//! Offline heuristics tool: index session files and report turn selection.

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use handoff::config::HandoffBudgets;
use handoff::heuristics::{analyze_paths, write_reports};
use std::path::PathBuf;

/// Analyze coding-agent session files and emit `turns.jsonl` + `sessions.json`.
#[derive(Debug, Parser)]
#[command(name = "handoff-heuristics", version, about)]
struct Cli {
    /// Session files or directories containing `.jsonl` session files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory the reports are written to.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Budget overrides as a JSON object (camelCase keys).
    #[arg(long)]
    budgets: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let budgets = match &cli.budgets {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).context("--budgets must be a JSON object")?;
            HandoffBudgets::from_settings(&value)
        }
        None => HandoffBudgets::default(),
    };

    let analyses = analyze_paths(&cli.inputs, &budgets);
    if analyses.is_empty() {
        bail!("No analyzable sessions found in the given inputs");
    }

    let (turns_path, sessions_path) =
        write_reports(&cli.out_dir, &analyses).context("writing reports")?;

    let turn_total: usize = analyses.iter().map(|a| a.turns.len()).sum();
    let selected_total: usize = analyses.iter().map(|a| a.session.selected_count).sum();
    println!(
        "Analyzed {} session goal(s): {} turns, {} selected",
        analyses.len(),
        turn_total,
        selected_total
    );
    println!("Wrote {}", turns_path.display());
    println!("Wrote {}", sessions_path.display());
    Ok(())
}
