//! External collaborators: syntax checking and reverting.
//!
//! The pipeline only sees the [`SyntaxOracle`] and [`Restore`] traits. The
//! production implementations shell out to a formatter (`nixfmt`) and to
//! `git`; every child process runs under a timeout so a hung tool cannot
//! stall a worker forever.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default timeout for external tools.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Decides whether a rewritten file is still valid.
pub trait SyntaxOracle: Send + Sync {
    /// Returns `Ok(false)` when the file is rejected; `Err` only when the
    /// check itself could not be carried out.
    fn check(&self, path: &Path) -> Result<bool>;
}

/// Puts a rejected file back the way it was.
pub trait Restore: Send + Sync {
    /// `original` holds the contents read before rewriting.
    fn restore(&self, path: &Path, original: &str) -> Result<()>;
}

/// Exit status and captured stderr of a finished child.
#[derive(Debug)]
pub struct Finished {
    pub status: ExitStatus,
    pub stderr: String,
}

/// A program plus leading arguments, run with a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Splits a command line on whitespace; returns `None` when it is blank.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace();
        let program = words.next()?;
        Some(Self::new(program).with_args(words))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the command with `extra` appended to its arguments.
    ///
    /// Stdout is discarded. The child is killed once the timeout elapses.
    pub fn run<S: AsRef<OsStr>>(&self, extra: &[S]) -> Result<Finished> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(extra)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr_pipe = child.stderr.take();
        let reader = thread::spawn(move || {
            let mut buf = String::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() > self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Timeout {
                        program: self.program.clone(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    return Err(Error::Spawn {
                        program: self.program.clone(),
                        source,
                    });
                }
            }
        };

        let stderr = reader.join().unwrap_or_default();
        Ok(Finished { status, stderr })
    }
}

/// Oracle that runs a formatter on the file; a zero exit means valid.
#[derive(Debug, Clone)]
pub struct FormatterOracle {
    command: ExternalCommand,
}

impl FormatterOracle {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Default for FormatterOracle {
    fn default() -> Self {
        Self::new(ExternalCommand::new("nixfmt"))
    }
}

impl SyntaxOracle for FormatterOracle {
    fn check(&self, path: &Path) -> Result<bool> {
        let finished = self.command.run(&[path])?;
        if !finished.status.success() {
            tracing::debug!(
                path = %path.display(),
                checker = self.command.program(),
                stderr = %finished.stderr.trim(),
                "checker rejected file"
            );
        }
        Ok(finished.status.success())
    }
}

/// In-process oracle: the file must parse without errors under rnix.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOracle;

impl SyntaxOracle for ParseOracle {
    fn check(&self, path: &Path) -> Result<bool> {
        let source = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse = rnix::Root::parse(&source);
        let errors = parse.errors();
        if !errors.is_empty() {
            tracing::debug!(path = %path.display(), ?errors, "parse errors after rewrite");
        }
        Ok(errors.is_empty())
    }
}

/// Restores files from the last commit with `git checkout -- <path>`.
#[derive(Debug, Clone)]
pub struct GitRestore {
    command: ExternalCommand,
}

impl GitRestore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            command: ExternalCommand::new("git")
                .with_args(["checkout", "--"])
                .with_timeout(timeout),
        }
    }
}

impl Default for GitRestore {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Restore for GitRestore {
    fn restore(&self, path: &Path, _original: &str) -> Result<()> {
        let finished = self.command.run(&[path])?;
        if finished.status.success() {
            Ok(())
        } else {
            Err(Error::ToolFailed {
                program: self.command.program().to_string(),
                status: finished.status,
                stderr: finished.stderr.trim().to_string(),
            })
        }
    }
}

/// Restores files by writing back the contents read before rewriting.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotRestore;

impl Restore for SnapshotRestore {
    fn restore(&self, path: &Path, original: &str) -> Result<()> {
        std::fs::write(path, original).map_err(|source| Error::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Runs a whole-tree formatter such as `nix fmt` once.
pub fn reformat_tree(command: &ExternalCommand) -> Result<bool> {
    let finished = command.run::<&str>(&[])?;
    if !finished.status.success() {
        tracing::warn!(
            formatter = command.program(),
            stderr = %finished.stderr.trim(),
            "tree formatter failed"
        );
    }
    Ok(finished.status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_command_lines() {
        let command = ExternalCommand::parse("nix fmt --quiet").unwrap();
        assert_eq!(command.program(), "nix");
        assert_eq!(
            command,
            ExternalCommand::new("nix").with_args(["fmt", "--quiet"])
        );
        assert!(ExternalCommand::parse("   ").is_none());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let command = ExternalCommand::new("qualify-meta-no-such-program");
        let err = command.run(&["x"]).unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn formatter_oracle_follows_exit_status() {
        let path = Path::new("unused.nix");
        assert!(FormatterOracle::new(ExternalCommand::new("true")).check(path).unwrap());
        assert!(!FormatterOracle::new(ExternalCommand::new("false")).check(path).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn captures_stderr() {
        let command = ExternalCommand::new("sh").with_args(["-c", "echo broken >&2; exit 3"]);
        let finished = command.run::<&str>(&[]).unwrap();
        assert_eq!(finished.status.code(), Some(3));
        assert_eq!(finished.stderr.trim(), "broken");
    }

    #[cfg(unix)]
    #[test]
    fn kills_commands_that_exceed_timeout() {
        let command = ExternalCommand::new("sleep")
            .with_args(["5"])
            .with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = command.run::<&str>(&[]).unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn parse_oracle_accepts_valid_and_rejects_broken_nix() {
        let dir = tempfile::tempdir().unwrap();
        let valid = dir.path().join("valid.nix");
        let broken = dir.path().join("broken.nix");
        fs::write(&valid, "{ meta = { platforms = lib.platforms.linux; }; }").unwrap();
        fs::write(&broken, "{ meta = { platforms = [ lib.linux ; }; }").unwrap();

        assert!(ParseOracle.check(&valid).unwrap());
        assert!(!ParseOracle.check(&broken).unwrap());
    }

    #[test]
    fn snapshot_restore_writes_original_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.nix");
        fs::write(&path, "rewritten").unwrap();

        SnapshotRestore.restore(&path, "original").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "original");
    }
}
