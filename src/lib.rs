//! qualify-meta library for removing `with lib;` from Nix `meta` blocks.
//!
//! The scope clause is dropped and every reference it brought into scope is
//! rewritten to an explicit `lib.` path. The work happens in three layers:
//!
//! 1. **Attribute rewriting**: find `key = value;` assignments, classify the
//!    value's shape and insert the qualifier in front of bare references
//! 2. **Rule sets**: fold an ordered list of substitutions and attribute
//!    rewriters over a file's text
//! 3. **Pipeline**: apply a rule set to many files in parallel, check each
//!    result with a syntax oracle and revert the ones it rejects
//!
//! # Example
//!
//! ```no_run
//! use qualify_meta::{ExclusionSet, Pipeline, scanner, rules};
//! use qualify_meta::oracle::{FormatterOracle, GitRestore};
//! use std::path::PathBuf;
//!
//! let files = scanner::collect_nix_files(&[PathBuf::from("./pkgs")], &[], true).unwrap();
//! let rules = rules::default_rules().unwrap();
//! let exclusions = ExclusionSet::builtin();
//! let oracle = FormatterOracle::default();
//! let restore = GitRestore::default();
//!
//! let report = Pipeline::new(&rules, &exclusions, &oracle, &restore).run(&files, 8);
//! println!("{} files rolled back", report.diagnostics.rolled_back);
//! ```
//!
//! The attribute rewriter can also be used on its own:
//!
//! ```
//! let text = "teams = teams.foo ++ teams.bar;";
//! assert_eq!(
//!     qualify_meta::attribute::rewrite(text, "teams", None),
//!     "teams = lib.teams.foo ++ lib.teams.bar;"
//! );
//! ```

pub mod attribute;
pub mod error;
pub mod exclusion;
pub mod oracle;
pub mod pipeline;
pub mod rewriter;
pub mod rules;
pub mod scanner;

// Re-export commonly used types at crate root
pub use attribute::{AttributeRewriter, ValueShape};
pub use error::{Error, Result};
pub use exclusion::ExclusionSet;
pub use pipeline::{FileOutcome, Pipeline, RunReport};
pub use rules::{Rule, RuleSet};
