mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, ScanArgs};
use dotenv::dotenv;
use dupsnap_core::{
    spawn_scan, AppConfig, GroupCategory, MetadataCache, ResultGroup, ScanEngine, ScanReport,
};
use indicatif::HumanBytes;
use progress::CliReporter;
use serde::Serialize;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match dupsnap_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Scan(scan_args)) => {
            if let Err(err) = run_scan(config, &scan_args) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::CacheStats { cache }) => {
            let path = cache_path(&config, cache);
            let store = MetadataCache::open(&path)?;
            println!(
                "{}: {} cached files (schema v{})",
                path.display(),
                store.count()?.to_string().cyan(),
                store.schema_version()?
            );
        }
        Some(Commands::ClearCache { cache, yes }) => {
            let path = cache_path(&config, cache);
            let confirmed = yes
                || prompt_confirm(
                    &format!("Delete every cached record in {}?", path.display()),
                    Some(false),
                )?;
            if !confirmed {
                process::exit(0);
            }
            let store = MetadataCache::open(&path)?;
            let removed = store.clear()?;
            store.close()?;
            println!("Removed {} cached records", removed);
        }
        Some(Commands::PrintConfig) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn cache_path(config: &AppConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| PathBuf::from(&config.cache_path))
}

fn run_scan(config: AppConfig, args: &ScanArgs) -> anyhow::Result<()> {
    let config = args.apply(config).into_scan_config(&args.dir);
    info!(
        "Scanning {} (similarity {}, cache {})",
        config.root.display(),
        config.similarity.max_distance(),
        config.cache_path.display()
    );

    let handle = spawn_scan(ScanEngine::new(config))?;
    let reporter = CliReporter::new();
    for event in handle.events().iter() {
        event.dispatch(&reporter);
    }
    let report = handle.join()?;

    if let Some(csv_path) = &args.csv {
        write_csv(&report, csv_path)
            .with_context(|| format!("writing {}", csv_path.display()))?;
        info!("Wrote {}", csv_path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ScanReport) {
    for (n, group) in report.groups.iter().enumerate() {
        println!();
        println!(
            "{} {} {} ({} files{})",
            format!("#{}", n + 1).dimmed(),
            category_tag(group.category),
            group.label.bold(),
            group.members.len(),
            group
                .group_score
                .map(|s| format!(", score {:.1}", s))
                .unwrap_or_default()
        );
        print_members(group);
    }

    let stats = &report.stats;
    println!();
    println!(
        "{} exact, {} near-duplicate, {} quality groups; {} reclaimable",
        stats.exact_groups.to_string().red(),
        stats.near_groups.to_string().yellow(),
        stats.quality_groups.to_string().cyan(),
        HumanBytes(report.reclaimable_bytes()).to_string().green(),
    );
    if stats.files_skipped + stats.metric_failures + stats.cache_write_failures > 0 {
        println!(
            "{} unreadable, {} unscored, {} cache write failures (see log)",
            stats.files_skipped, stats.metric_failures, stats.cache_write_failures
        );
    }
}

fn print_members(group: &ResultGroup) {
    let keep = group.keep().map(|k| k.path.as_path());
    for member in &group.members {
        let is_keep = keep == Some(member.path.as_path());
        let marker = if is_keep {
            "keep".green().to_string()
        } else {
            "    ".to_string()
        };
        let score = member
            .similarity_score
            .or(member.quality_score)
            .map(|s| format!("{:>5.1}", s))
            .unwrap_or_else(|| "    -".to_string());
        println!(
            "  {} {} {:>10} {:>11} {}",
            marker,
            score,
            HumanBytes(member.size).to_string(),
            format!("{}x{}", member.width, member.height),
            member.path.display()
        );
    }
}

fn category_tag(category: GroupCategory) -> ColoredString {
    let tag = format!("[{}]", category);
    match category {
        GroupCategory::ExactDuplicate => tag.red(),
        GroupCategory::NearDuplicate => tag.yellow(),
        GroupCategory::Blurry | GroupCategory::Noisy => tag.cyan(),
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    group: usize,
    category: &'a str,
    label: &'a str,
    path: String,
    kind: &'a str,
    size: u64,
    width: u32,
    height: u32,
    keep: bool,
    similarity_score: Option<f64>,
    quality_score: Option<f64>,
    quality_raw: Option<f64>,
}

fn write_csv(report: &ScanReport, path: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for (n, group) in report.groups.iter().enumerate() {
        let keep = group.keep().map(|k| k.path.as_path());
        for member in &group.members {
            writer.serialize(CsvRow {
                group: n + 1,
                category: group.category.as_str(),
                label: &group.label,
                path: member.path.display().to_string(),
                kind: member.kind.as_str(),
                size: member.size,
                width: member.width,
                height: member.height,
                keep: keep == Some(member.path.as_path()),
                similarity_score: member.similarity_score,
                quality_score: member.quality_score,
                quality_raw: member.quality_raw,
            })?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
