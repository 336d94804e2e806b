//! qualify-meta: Replace `with lib;` scoping in Nix meta blocks.
//!
//! This tool rewrites `.nix` files so that `meta` attributes reference
//! `lib.licenses`, `lib.platforms` and friends explicitly, checks every
//! rewritten file with a syntax checker, and reverts the ones it rejects.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Args, Commands, RestoreMode, Selection};
use colored::Colorize;
use qualify_meta::oracle::{
    ExternalCommand, FormatterOracle, GitRestore, ParseOracle, Restore, SnapshotRestore,
    SyntaxOracle, reformat_tree,
};
use qualify_meta::pipeline::{RunReport, default_jobs};
use qualify_meta::{ExclusionSet, FileOutcome, Pipeline, RuleSet, scanner};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Apply {
            path,
            selection,
            dry_run,
            checker,
            builtin_checker,
            restore,
            timeout,
            jobs,
            qualifier,
            format_command,
            no_final_format,
            json,
        } => cmd_apply(ApplyOptions {
            path,
            selection,
            dry_run,
            checker,
            builtin_checker,
            restore,
            timeout: Duration::from_secs(timeout),
            jobs: jobs.unwrap_or_else(default_jobs),
            qualifier,
            format_command,
            final_format: !no_final_format,
            json,
            verbose: args.verbose,
        }),
        Commands::Preview { file, qualifier } => cmd_preview(&file, &qualifier),
        Commands::Scan { path, selection } => cmd_scan(&path, &selection),
        Commands::Rules { qualifier } => cmd_rules(&qualifier),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

struct ApplyOptions {
    path: PathBuf,
    selection: Selection,
    dry_run: bool,
    checker: String,
    builtin_checker: bool,
    restore: RestoreMode,
    timeout: Duration,
    jobs: usize,
    qualifier: String,
    format_command: String,
    final_format: bool,
    json: bool,
    verbose: bool,
}

fn cmd_apply(opts: ApplyOptions) -> Result<()> {
    let files = collect_files(&opts.path, &opts.selection)?;
    let exclusions = build_exclusions(&opts.selection)?;
    let rules = RuleSet::nixpkgs_meta(&opts.qualifier).context("Failed to build rewrite rules")?;

    if opts.verbose {
        eprintln!(
            "{} Found {} .nix files, {} exclusion suffixes, {} rules",
            "info:".blue().bold(),
            files.len(),
            exclusions.len(),
            rules.rules().len()
        );
    }

    let oracle: Box<dyn SyntaxOracle> = if opts.builtin_checker {
        Box::new(ParseOracle)
    } else {
        let command = ExternalCommand::parse(&opts.checker)
            .context("Checker command is empty")?
            .with_timeout(opts.timeout);
        Box::new(FormatterOracle::new(command))
    };
    let restore: Box<dyn Restore> = match opts.restore {
        RestoreMode::Git => Box::new(GitRestore::new(opts.timeout)),
        RestoreMode::Snapshot => Box::new(SnapshotRestore),
    };

    let report = Pipeline::new(&rules, &exclusions, oracle.as_ref(), restore.as_ref())
        .dry_run(opts.dry_run)
        .run(&files, opts.jobs);

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run_report(&report, opts.dry_run, opts.verbose);
    }

    if opts.final_format && !opts.dry_run {
        run_final_format(&opts.format_command, opts.timeout);
    }

    Ok(())
}

fn run_final_format(command_line: &str, timeout: Duration) {
    let Some(command) = ExternalCommand::parse(command_line) else {
        return;
    };
    let command = command.with_timeout(timeout);
    tracing::info!("Running {}", command_line);
    match reformat_tree(&command) {
        Ok(true) => {}
        Ok(false) => eprintln!("{} `{}` exited with an error", "warn:".yellow().bold(), command_line),
        Err(err) => eprintln!("{} {}", "warn:".yellow().bold(), err),
    }
}

fn cmd_preview(file: &Path, qualifier: &str) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let rules = RuleSet::nixpkgs_meta(qualifier).context("Failed to build rewrite rules")?;
    let rewritten = rules.apply(&source);

    if rewritten == source {
        eprintln!("{} No changes for {}", "info:".blue().bold(), file.display());
    }
    print!("{}", rewritten);
    Ok(())
}

fn cmd_scan(path: &Path, selection: &Selection) -> Result<()> {
    let files = collect_files(path, selection)?;
    let exclusions = build_exclusions(selection)?;

    let excluded = files.iter().filter(|f| exclusions.is_excluded(f)).count();
    println!(
        "Would process {} files ({} excluded):",
        files.len() - excluded,
        excluded
    );
    for file in &files {
        match exclusions.matching(file) {
            Some(suffix) => println!(
                "  {} {}",
                file.display().to_string().dimmed(),
                format!("(excluded: {})", suffix.display()).dimmed()
            ),
            None => println!("  {}", file.display()),
        }
    }

    Ok(())
}

fn cmd_rules(qualifier: &str) -> Result<()> {
    let rules = RuleSet::nixpkgs_meta(qualifier).context("Failed to build rewrite rules")?;

    if let Some(marker) = rules.marker() {
        println!("{} files containing `{}`", "Applies to:".bold(), marker);
    }
    for (i, rule) in rules.rules().iter().enumerate() {
        println!("  {:>2}. {}", i + 1, rule);
    }
    Ok(())
}

fn collect_files(path: &Path, selection: &Selection) -> Result<Vec<PathBuf>> {
    let excludes = scanner::compile_excludes(&selection.exclude)
        .with_context(|| format!("Invalid exclude pattern in {:?}", selection.exclude))?;

    scanner::collect_nix_files(&[path.to_path_buf()], &excludes, !selection.no_default_excludes)
        .with_context(|| format!("Failed to scan {}", path.display()))
}

fn build_exclusions(selection: &Selection) -> Result<ExclusionSet> {
    let mut exclusions = if selection.no_builtin_exclusions {
        ExclusionSet::new()
    } else {
        ExclusionSet::builtin()
    };
    if let Some(list) = &selection.exclude_from {
        exclusions.extend(ExclusionSet::load(list)?);
    }
    Ok(exclusions)
}

fn print_run_report(report: &RunReport, dry_run: bool, verbose: bool) {
    let d = &report.diagnostics;

    if verbose {
        println!(
            "\n{} Files: {} ({} excluded, {} unchanged)",
            "Diagnostics:".bold(),
            d.files_discovered,
            d.excluded,
            d.unchanged
        );
    }

    if dry_run {
        for file in report.with_outcome(FileOutcome::WouldChange) {
            println!("  {} {}", "Would update:".yellow().bold(), file.path.display());
        }
        println!(
            "\n{} {} file(s) would change. Run without --dry-run to apply.",
            "hint:".cyan().bold(),
            d.would_change
        );
    } else if d.rolled_back == 0 && d.failed == 0 {
        println!("{} {} file(s) rewritten and verified", "ok:".green().bold(), d.verified);
    } else {
        println!("{} {} file(s) rewritten and verified", "info:".blue().bold(), d.verified);
    }

    if d.rolled_back > 0 {
        println!(
            "\n{} {} file(s) failed the syntax check and were reverted:",
            "warn:".yellow().bold(),
            d.rolled_back
        );
        for file in report.with_outcome(FileOutcome::RolledBack) {
            println!("  {}", file.path.display());
        }
    }

    if d.failed > 0 {
        println!("\n{} {} file(s) could not be processed:", "Failed".red().bold(), d.failed);
        for file in report.failures() {
            println!(
                "  {} {}",
                file.path.display().to_string().dimmed(),
                file.error.as_deref().unwrap_or("unknown error").red()
            );
        }
    }
}
