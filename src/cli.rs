//! Command-line interface definitions.
//!
//! Defines the argument parser and subcommands using clap's derive API.
//! Each subcommand corresponds to a distinct operation: rewriting files,
//! previewing a single rewrite, listing scan targets, or printing the rules.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Replace `with lib;` in Nix meta blocks with explicit `lib.` references.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Print debug logs to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Rewrite files, verify each with a syntax checker and revert failures.
    Apply {
        /// File or directory to process.
        path: PathBuf,

        #[command(flatten)]
        selection: Selection,

        /// Report which files would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Syntax checker invoked with each rewritten file as its only argument.
        #[arg(long, default_value = "nixfmt", conflicts_with = "builtin_checker")]
        checker: String,

        /// Check rewritten files with the built-in Nix parser instead of an external program.
        #[arg(long)]
        builtin_checker: bool,

        /// How to revert files the checker rejects.
        #[arg(long, value_enum, default_value_t = RestoreMode::Git)]
        restore: RestoreMode,

        /// Seconds before an external tool is killed.
        #[arg(long, default_value_t = 60)]
        timeout: u64,

        /// Worker threads. Defaults to the number of CPUs.
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Namespace inserted in front of rewritten references.
        #[arg(long, default_value = "lib")]
        qualifier: String,

        /// Command run once over the whole tree after all files are processed.
        #[arg(long, default_value = "nix fmt")]
        format_command: String,

        /// Skip the final whole-tree format.
        #[arg(long)]
        no_final_format: bool,

        /// Emit the run report as JSON instead of human-readable output.
        #[arg(long)]
        json: bool,
    },

    /// Print the rewritten contents of a single file without modifying it.
    Preview {
        /// File to rewrite.
        file: PathBuf,

        /// Namespace inserted in front of rewritten references.
        #[arg(long, default_value = "lib")]
        qualifier: String,
    },

    /// List files that would be processed, marking excluded ones.
    Scan {
        /// File or directory to scan.
        path: PathBuf,

        #[command(flatten)]
        selection: Selection,
    },

    /// Print the rewrite rules in the order they are applied.
    Rules {
        /// Namespace inserted in front of rewritten references.
        #[arg(long, default_value = "lib")]
        qualifier: String,
    },
}

/// Options controlling which files are considered.
#[derive(Debug, Clone, ClapArgs)]
pub struct Selection {
    /// Glob patterns for directories/files to skip while walking (e.g., "node_modules", "*.generated.nix").
    /// By default, entries starting with `.` are skipped.
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Disable default skipping of `.` prefixed entries.
    #[arg(long)]
    pub no_default_excludes: bool,

    /// File of path suffixes to exclude, one per line.
    #[arg(long)]
    pub exclude_from: Option<PathBuf>,

    /// Do not exclude the built-in list of known problem files.
    #[arg(long)]
    pub no_builtin_exclusions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RestoreMode {
    /// `git checkout -- <path>`.
    Git,
    /// Write back the contents read before rewriting.
    Snapshot,
}
