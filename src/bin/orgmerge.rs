use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use orgmerge::config::{ConfigOverrides, MatcherOverrides, MergeOverrides, OrgmergeConfig};
use orgmerge::orchestrator::{AutoApprove, ConfirmPolicy, Confirmation, PreviewRow};
use orgmerge::Orgmerge;
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn parse_args_multi(flag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            if let Some(value) = args.next() {
                values.push(value);
            }
        }
    }
    values
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

/// Interactive gate reading y/n/a/q from stdin per duplicate group.
struct StdinConfirm;

impl ConfirmPolicy for StdinConfirm {
    fn confirm(&mut self, group_key: &str, preview: &[PreviewRow]) -> Confirmation {
        println!("\nDuplicate group {group_key}:");
        for row in preview {
            let created = row
                .created_at
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("  {}  {}  (created {})", row.id, row.name, created);
        }
        loop {
            print!("Merge this group? [y]es / [n]o / [a]ll / [q]uit: ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line).is_err() {
                return Confirmation::Abort;
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return Confirmation::Approve,
                "n" | "no" => return Confirmation::Skip,
                "a" | "all" => return Confirmation::ApproveRest,
                "q" | "quit" => return Confirmation::Abort,
                _ => println!("please answer y, n, a or q"),
            }
        }
    }
}

fn print_usage() {
    println!("Usage: orgmerge [OPTIONS]");
    println!();
    println!("Modes (default: full pipeline run):");
    println!("  --name <NAME>            merge duplicates of one organization; repeatable");
    println!("  --review-file <PATH>     re-run groups from a review ledger or clusters file");
    println!("  --export <PATH>          export a canonical snapshot CSV and exit");
    println!();
    println!("Options:");
    println!("  --config <PATH>          TOML config file");
    println!("  --output-dir <DIR>       directory for CSV artifacts");
    println!("  --apply                  execute merges (default is a dry run)");
    println!("  --yes                    skip per-group confirmation");
    println!("  --min-score <N>          fuzzy acceptance threshold");
    println!("  --max-pairs <N>          global candidate-pair cap");
    println!("  --include-merged-history keep merged records in --export output");
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if has_flag("--help") || has_flag("-h") {
        print_usage();
        return Ok(());
    }

    let overrides = ConfigOverrides {
        output_dir: parse_arg("--output-dir"),
        merge: Some(MergeOverrides {
            dry_run: if has_flag("--apply") { Some(false) } else { None },
            max_hops: None,
        }),
        matcher: Some(MatcherOverrides {
            min_score: parse_arg("--min-score").and_then(|v| v.parse().ok()),
            max_pairs: parse_arg("--max-pairs").and_then(|v| v.parse().ok()),
            max_bucket_size: None,
        }),
    };
    let config = OrgmergeConfig::load(parse_arg("--config").as_deref(), overrides)?;
    let dry_run = config.merge.dry_run;
    let engine = Orgmerge::new(config)?;

    if let Some(path) = parse_arg("--export") {
        let rows = engine.export_snapshot(
            &PathBuf::from(&path),
            has_flag("--include-merged-history"),
        )?;
        println!("exported {rows} rows to {path}");
        return Ok(());
    }

    let mut auto = AutoApprove;
    let mut stdin = StdinConfirm;
    // Dry runs never touch the store, so there is nothing to confirm.
    let confirm: &mut dyn ConfirmPolicy = if has_flag("--yes") || dry_run {
        &mut auto
    } else {
        &mut stdin
    };

    let names = parse_args_multi("--name");
    if !names.is_empty() {
        for name in &names {
            let summary = engine.merge_by_name(name, confirm)?;
            println!(
                "{name}: {} merged, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            );
        }
        return Ok(());
    }

    if let Some(path) = parse_arg("--review-file") {
        let summary = engine.merge_review_file(&PathBuf::from(path), confirm)?;
        println!(
            "review run: {} merged, {} failed, {} skipped",
            summary.succeeded, summary.failed, summary.skipped
        );
        return Ok(());
    }

    let report = engine.run(confirm)?;
    let stats = &report.stats;
    println!(
        "{} records scanned ({} malformed, {} merge history)",
        stats.records_loaded, stats.malformed_skipped, stats.merged_history_skipped
    );
    println!(
        "{} buckets ({} oversized skipped), {} candidate pairs{}",
        stats.buckets_built,
        stats.buckets_skipped,
        stats.pairs_generated,
        if stats.pairs_truncated { " (truncated)" } else { "" }
    );
    println!(
        "{} duplicate clusters, {} merges{}, {} failed, {} for manual review",
        stats.clusters_found,
        stats.merges_succeeded,
        if dry_run { " planned" } else { "" },
        stats.merges_failed,
        stats.review_entries
    );
    if stats.aborted {
        println!("run aborted at operator request");
    }
    if dry_run {
        println!("dry run only, pass --apply to execute merges");
    }
    Ok(())
}
