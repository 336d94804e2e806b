//! Per-file rewrite pipeline.
//!
//! Each file moves through `Pending -> Excluded | Unchanged | Transformed`,
//! and a transformed file ends `Verified` or `RolledBack` depending on the
//! syntax oracle. Files are independent; [`Pipeline::run`] spreads them over
//! a rayon pool and collects one [`FileReport`] per file. Failures stay with
//! their file and never abort the run.

use crate::error::{Error, Result};
use crate::exclusion::ExclusionSet;
use crate::oracle::{Restore, SyntaxOracle};
use crate::rules::RuleSet;
use rayon::prelude::*;
use serde::Serialize;
use std::error::Error as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Terminal state of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    /// Matched the exclusion set; never read.
    Excluded,
    /// Rules produced identical text; nothing written.
    Unchanged,
    /// Dry run: rules would change the file.
    WouldChange,
    /// Rewritten and accepted by the oracle.
    Verified,
    /// Rewritten, rejected by the oracle and restored.
    RolledBack,
}

/// Result of processing one file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    /// `None` when processing failed; see `error`.
    pub outcome: Option<FileOutcome>,
    pub error: Option<String>,
}

/// Summary statistics from a run.
#[derive(Debug, Default, Serialize)]
pub struct Diagnostics {
    pub files_discovered: usize,
    pub excluded: usize,
    pub unchanged: usize,
    pub would_change: usize,
    pub verified: usize,
    pub rolled_back: usize,
    pub failed: usize,
}

/// Complete run results.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub files: Vec<FileReport>,
    pub diagnostics: Diagnostics,
}

impl RunReport {
    fn new(files: Vec<FileReport>) -> Self {
        let mut diagnostics = Diagnostics {
            files_discovered: files.len(),
            ..Diagnostics::default()
        };
        for file in &files {
            match file.outcome {
                Some(FileOutcome::Excluded) => diagnostics.excluded += 1,
                Some(FileOutcome::Unchanged) => diagnostics.unchanged += 1,
                Some(FileOutcome::WouldChange) => diagnostics.would_change += 1,
                Some(FileOutcome::Verified) => diagnostics.verified += 1,
                Some(FileOutcome::RolledBack) => diagnostics.rolled_back += 1,
                None => diagnostics.failed += 1,
            }
        }
        Self { files, diagnostics }
    }

    /// Files with the given outcome, in run order.
    pub fn with_outcome(&self, outcome: FileOutcome) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(move |f| f.outcome == Some(outcome))
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.error.is_some())
    }
}

/// Applies a rule set to files, verifying and reverting as needed.
pub struct Pipeline<'a> {
    rules: &'a RuleSet,
    exclusions: &'a ExclusionSet,
    oracle: &'a dyn SyntaxOracle,
    restore: &'a dyn Restore,
    dry_run: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        rules: &'a RuleSet,
        exclusions: &'a ExclusionSet,
        oracle: &'a dyn SyntaxOracle,
        restore: &'a dyn Restore,
    ) -> Self {
        Self {
            rules,
            exclusions,
            oracle,
            restore,
            dry_run: false,
        }
    }

    /// Compute rewrites without writing files or calling the oracle.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Processes one file end to end.
    pub fn process(&self, path: &Path) -> Result<FileOutcome> {
        if let Some(suffix) = self.exclusions.matching(path) {
            tracing::debug!(path = %path.display(), suffix = %suffix.display(), "excluded");
            return Ok(FileOutcome::Excluded);
        }

        let original = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let rewritten = self.rules.apply(&original);
        if rewritten == original {
            return Ok(FileOutcome::Unchanged);
        }
        if self.dry_run {
            return Ok(FileOutcome::WouldChange);
        }

        std::fs::write(path, &rewritten).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })?;

        match self.oracle.check(path) {
            Ok(true) => Ok(FileOutcome::Verified),
            Ok(false) => {
                tracing::warn!(path = %path.display(), "syntax check failed, reverting changes");
                self.restore.restore(path, &original)?;
                Ok(FileOutcome::RolledBack)
            }
            Err(err) => {
                // The rewrite is unverified; put the file back before reporting.
                if let Err(restore_err) = self.restore.restore(path, &original) {
                    tracing::error!(
                        path = %path.display(),
                        error = %restore_err,
                        "failed to restore unverified file"
                    );
                }
                Err(err)
            }
        }
    }

    /// Processes `files` on `jobs` worker threads.
    ///
    /// The report lists files in input order regardless of completion order.
    pub fn run(&self, files: &[PathBuf], jobs: usize) -> RunReport {
        let total = files.len();
        let claimed = AtomicUsize::new(0);

        let work = || {
            files
                .par_iter()
                .map(|path| {
                    let index = claimed.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::info!("Processing file {}/{}: {}", index, total, path.display());
                    self.report(path)
                })
                .collect::<Vec<_>>()
        };

        let reports = match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(work),
            Err(err) => {
                tracing::warn!(error = %err, "failed to build worker pool, using global pool");
                work()
            }
        };

        RunReport::new(reports)
    }

    fn report(&self, path: &Path) -> FileReport {
        match self.process(path) {
            Ok(outcome) => FileReport {
                path: path.to_path_buf(),
                outcome: Some(outcome),
                error: None,
            },
            Err(err) => {
                let message = error_chain(&err);
                tracing::error!(path = %path.display(), error = %message, "processing failed");
                FileReport {
                    path: path.to_path_buf(),
                    outcome: None,
                    error: Some(message),
                }
            }
        }
    }
}

/// Number of worker threads to use when none is configured.
pub fn default_jobs() -> usize {
    num_cpus::get().max(1)
}

fn error_chain(err: &Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
