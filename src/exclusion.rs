//! Path exclusion list.
//!
//! Some files match the rewrite rules without the match being a `meta`
//! attribute, or hold values the rules would corrupt. They are listed here by
//! path suffix and skipped before any rule runs.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Paths in nixpkgs known to misbehave under the default rules.
pub const BUILTIN_EXCLUSIONS: &[&str] = &[
    // similar attribute names outside meta
    "pkgs/tools/text/uniscribe/gemset.nix",
    "pkgs/top-level/release-lib.nix",
    "pkgs/top-level/release-cross.nix",
    "pkgs/top-level/perl-packages.nix",
    "pkgs/tools/package-management/nix/modular/packaging/everything.nix",
    "pkgs/tools/typesetting/tex/texlive/default.nix",
    // platforms computed with conditionals spanning several lines
    "pkgs/by-name/lo/losslesscut-bin/build-from-dmg.nix",
    "pkgs/by-name/ol/ollama/package.nix",
    "pkgs/by-name/qu/qutebrowser/package.nix",
    "pkgs/by-name/sp/speechd/package.nix",
    "pkgs/by-name/vi/vifm/package.nix",
    "pkgs/by-name/ze/zenith/package.nix",
    "pkgs/development/tools/documentation/doxygen/default.nix",
    "pkgs/games/nethack/default.nix",
    "pkgs/tools/system/nvtop/build-nvtop.nix",
    // code inside attribute values
    "pkgs/development/python-modules/setuptools/default.nix",
];

/// Set of path suffixes; a path is excluded if it ends with any of them.
///
/// Matching is by whole path components, so `pkgs/a.nix` excludes
/// `/src/nixpkgs/pkgs/a.nix` but not `/src/nixpkgs/xpkgs/a.nix`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    suffixes: Vec<PathBuf>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self {
            suffixes: BUILTIN_EXCLUSIONS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Parses one suffix per line. Blank lines and `#` comments are ignored.
    pub fn parse(contents: &str) -> Self {
        let suffixes = contents
            .lines()
            .map(|line| line.split_once('#').map_or(line, |(entry, _)| entry).trim())
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { suffixes }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    pub fn extend(&mut self, other: ExclusionSet) {
        self.suffixes.extend(other.suffixes);
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }

    /// Returns the first suffix `path` ends with, if any.
    pub fn matching(&self, path: &Path) -> Option<&Path> {
        self.suffixes
            .iter()
            .find(|suffix| path.ends_with(suffix))
            .map(PathBuf::as_path)
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.matching(path).is_some()
    }
}
