//! Ordered rewrite rules.
//!
//! A [`RuleSet`] folds its rules over a file's text in order, each rule seeing
//! the output of the previous one. Rules are either static regex
//! substitutions or [`AttributeRewriter`]s. The set is a plain value handed to
//! the pipeline, so alternative sets can be built and tested in isolation.

use crate::attribute::{AttributeRewriter, DEFAULT_QUALIFIER};
use crate::error::{Error, Result};
use regex::Regex;
use std::borrow::Cow;
use std::fmt;

/// A single rewrite step.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Global regex substitution; `replacement` may use `$1`-style groups.
    Substitute { pattern: Regex, replacement: String },
    /// Qualification of one attribute's values.
    Attribute(AttributeRewriter),
}

impl Rule {
    pub fn substitute(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let compiled = Regex::new(pattern).map_err(|source| Error::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self::Substitute {
            pattern: compiled,
            replacement: replacement.into(),
        })
    }

    /// Substitution of fixed text for fixed text.
    pub fn literal(find: &str, replacement: &str) -> Result<Self> {
        Self::substitute(&regex::escape(find), replacement.replace('$', "$$"))
    }

    pub fn attribute(rewriter: AttributeRewriter) -> Self {
        Self::Attribute(rewriter)
    }

    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            Self::Substitute {
                pattern,
                replacement,
            } => pattern.replace_all(text, replacement.as_str()),
            Self::Attribute(rewriter) => rewriter.rewrite(text),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Substitute {
                pattern,
                replacement,
            } => write!(f, "substitute /{}/ -> {:?}", pattern.as_str(), replacement),
            Self::Attribute(rewriter) if rewriter.key() == rewriter.namespace() => {
                write!(f, "qualify `{}` with `{}.`", rewriter.key(), rewriter.qualifier())
            }
            Self::Attribute(rewriter) => write!(
                f,
                "qualify `{}` (members of `{}`) with `{}.`",
                rewriter.key(),
                rewriter.namespace(),
                rewriter.qualifier()
            ),
        }
    }
}

/// Rules applied in sequence, optionally gated on a marker substring.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    marker: Option<String>,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            marker: None,
            rules,
        }
    }

    /// Skip the whole set for text that does not contain `marker`.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether the entry gate lets `text` through.
    pub fn admits(&self, text: &str) -> bool {
        self.marker.as_deref().is_none_or(|m| text.contains(m))
    }

    /// Folds every rule over `text`.
    pub fn apply(&self, text: &str) -> String {
        if !self.admits(text) {
            return text.to_string();
        }

        let mut current = Cow::Borrowed(text);
        for rule in &self.rules {
            let changed = match rule.apply(&current) {
                Cow::Borrowed(_) => None,
                Cow::Owned(next) => Some(next),
            };
            if let Some(next) = changed {
                tracing::trace!(rule = %rule, "rule changed text");
                current = Cow::Owned(next);
            }
        }

        current.into_owned()
    }

    /// Rules that drop `with lib;` from nixpkgs `meta` blocks and qualify the
    /// references it used to bring into scope.
    ///
    /// Order matters: scope-opening clauses are collapsed first, helper calls
    /// are qualified before the attribute rewriters would treat them as
    /// already-qualified scalars, and `teams.<name>.members` references left
    /// over inside other values are handled last.
    pub fn nixpkgs_meta(qualifier: &str) -> Result<Self> {
        let q = qualifier;
        let platforms = |key: &str| {
            Rule::attribute(
                AttributeRewriter::new(key)
                    .with_namespace("platforms")
                    .with_qualifier(q),
            )
        };

        let mut rules = vec![Rule::literal(&format!("meta = with {q}; "), "meta = ")?];
        for (key, set) in [
            ("maintainers", "maintainers"),
            ("platforms", "platforms"),
            ("license", "licenses"),
            ("sourceProvenance", "sourceTypes"),
            ("teams", "teams"),
        ] {
            rules.push(Rule::literal(
                &format!("{key} = with {set}; "),
                &format!("{key} = with {q}.{set}; "),
            )?);
        }

        rules.push(Rule::substitute(
            r"(^|[^.\w])(subtractLists|intersectLists)\s+platforms\.([\w-]+)\s+platforms\.([\w-]+)",
            format!("${{1}}{q}.${{2}} {q}.platforms.${{3}} {q}.platforms.${{4}}"),
        )?);

        rules.push(platforms("platforms"));
        rules.push(platforms("badPlatforms"));
        rules.push(platforms("hydraPlatforms"));
        for key in ["maintainers", "license", "teams"] {
            rules.push(Rule::attribute(AttributeRewriter::new(key).with_qualifier(q)));
        }
        rules.push(Rule::attribute(
            AttributeRewriter::new("sourceProvenance")
                .with_namespace("sourceTypes")
                .with_qualifier(q),
        ));

        rules.push(Rule::substitute(
            r"(^|[^.\w])teams\.([\w-]+)\.members\b",
            format!("${{1}}{q}.teams.${{2}}.members"),
        )?);

        Ok(Self::new(rules).with_marker(format!("with {q};")))
    }
}

/// The nixpkgs rule set with the `lib` qualifier.
pub fn default_rules() -> Result<RuleSet> {
    RuleSet::nixpkgs_meta(DEFAULT_QUALIFIER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn fixture(name: &str) -> String {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name);
        fs::read_to_string(path).unwrap()
    }

    fn meta(body: &str) -> String {
        default_rules().unwrap().apply(body)
    }

    #[test]
    fn collapses_scope_clauses() {
        let text = "meta = with lib; {\n  maintainers = with maintainers; [ alice bob ];\n};";
        assert_eq!(
            meta(text),
            "meta = {\n  maintainers = with lib.maintainers; [ alice bob ];\n};"
        );
    }

    #[test]
    fn qualifies_list_items_after_scope_removal() {
        let text = "meta = with lib; { platforms = [ linux darwin ]; broken = platforms.linux; };";
        assert_eq!(
            meta(text),
            "meta = { platforms = [ lib.linux lib.darwin ]; broken = platforms.linux; };"
        );
    }

    #[test]
    fn keeps_qualified_license() {
        let text = "meta = with lib; { license = stdenv.lib.licenses.mit; };";
        assert_eq!(meta(text), "meta = { license = stdenv.lib.licenses.mit; };");
    }

    #[test]
    fn keeps_conditional_platforms() {
        let text = "meta = with lib; {\n  platforms = if stdenv.isLinux then [ \"x86_64-linux\" ] else [ ];\n};";
        assert_eq!(
            meta(text),
            "meta = {\n  platforms = if stdenv.isLinux then [ \"x86_64-linux\" ] else [ ];\n};"
        );
    }

    #[test]
    fn qualifies_concatenated_teams() {
        let text = "meta = with lib; { teams = teams.foo ++ teams.bar; };";
        assert_eq!(
            meta(text),
            "meta = { teams = lib.teams.foo ++ lib.teams.bar; };"
        );
    }

    #[test]
    fn qualifies_helper_call_arguments() {
        let text = "meta = with lib; { platforms = subtractLists platforms.darwin platforms.unix; };";
        assert_eq!(
            meta(text),
            "meta = { platforms = lib.subtractLists lib.platforms.darwin lib.platforms.unix; };"
        );
    }

    #[test]
    fn qualifies_nested_team_members() {
        let text = "meta = with lib; {\n  maintainers = with lib.maintainers; [ alice ] ++ teams.gnome.members;\n};";
        assert_eq!(
            meta(text),
            "meta = {\n  maintainers = with lib.maintainers; [ alice ] ++ lib.teams.gnome.members;\n};"
        );
    }

    #[test]
    fn qualifies_aliases_and_source_provenance() {
        let text = "meta = with lib; {\n  badPlatforms = [ platforms.darwin ];\n  hydraPlatforms = platforms.linux;\n  sourceProvenance = [ sourceTypes.binaryNativeCode ];\n};";
        assert_eq!(
            meta(text),
            "meta = {\n  badPlatforms = [ lib.platforms.darwin ];\n  hydraPlatforms = lib.platforms.linux;\n  sourceProvenance = [ lib.sourceTypes.binaryNativeCode ];\n};"
        );
    }

    #[test]
    fn skips_text_without_marker() {
        let text = "{ meta.platforms = platforms.linux; }";
        assert_eq!(meta(text), text);
    }

    #[test]
    fn rules_apply_in_order() {
        let rules = RuleSet::new(vec![
            Rule::literal("a", "b").unwrap(),
            Rule::literal("b", "c").unwrap(),
        ]);
        assert_eq!(rules.apply("a"), "c");
    }

    #[test]
    fn literal_rules_do_not_expand_groups() {
        let rule = Rule::literal("x", "$1").unwrap();
        assert_eq!(rule.apply("x"), "$1");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = Rule::substitute("(", "x").unwrap_err();
        assert!(err.to_string().contains("invalid rule pattern"));
    }

    #[test]
    fn describes_rules() {
        let rules = default_rules().unwrap();
        let described: Vec<String> = rules.rules().iter().map(|r| r.to_string()).collect();
        assert!(described.contains(&"qualify `license` with `lib.`".to_string()));
        assert!(
            described.contains(&"qualify `badPlatforms` (members of `platforms`) with `lib.`".to_string())
        );
    }

    #[test]
    fn rewrites_package_fixture() {
        let output = meta(&fixture("hello.nix"));
        insta::assert_snapshot!(output, @r#"
{
  lib,
  stdenv,
  fetchurl,
}:

stdenv.mkDerivation (finalAttrs: {
  pname = "hello";
  version = "2.12.1";

  src = fetchurl {
    url = "mirror://gnu/hello/hello-${finalAttrs.version}.tar.gz";
    hash = "sha256-jZkUKv2SV28wsM18tCqNxoCZmLxdYH2Idh9RLibH2yA=";
  };

  meta = {
    description = "Program that produces a familiar, friendly greeting";
    homepage = "https://www.gnu.org/software/hello/manual/";
    license = lib.licenses.gpl3Plus;
    maintainers = with lib.maintainers; [ stv0g ];
    teams = [ lib.teams.gnu ];
    platforms = lib.platforms.all;
    badPlatforms = lib.platforms.darwin ++ [ "i686-linux" ];
  };
})
"#);
    }

    #[test]
    fn full_rule_set_is_idempotent_on_fixtures() {
        let rules = default_rules().unwrap();
        for name in ["hello.nix", "multi-platform.nix", "conditional.nix"] {
            let once = rules.apply(&fixture(name));
            assert_eq!(rules.apply(&once), once, "{name}");
        }
    }

    #[test]
    fn conditional_fixture_keeps_platforms() {
        let source = fixture("conditional.nix");
        let output = meta(&source);
        assert!(output.contains("platforms = if stdenv.hostPlatform.isLinux then"));
        assert!(!output.contains("with lib;"));
    }

    #[test]
    fn multi_platform_fixture_matches_expected() {
        let output = meta(&fixture("multi-platform.nix"));
        assert_eq!(output, fixture("multi-platform.expected"));
    }
}
