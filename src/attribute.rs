//! Attribute value qualification.
//!
//! An [`AttributeRewriter`] finds assignments to one attribute key, classifies
//! the shape of each value and inserts an explicit qualifier (`lib.`) in front
//! of the bare references it can identify. Everything it cannot classify is
//! left exactly as it was.
//!
//! Edits are insertions at token starts, applied by byte position, so the
//! output differs from the input only by the inserted prefixes.

use crate::rewriter::{Replacement, apply_replacements};
use crate::scanner::{Cursor, Walk, find_assignments, is_ident_byte};
use std::borrow::Cow;
use std::ops::Range;

/// Qualifier used when none is configured.
pub const DEFAULT_QUALIFIER: &str = "lib";

const KEYWORDS: &[&str] = &[
    "assert", "else", "if", "in", "inherit", "let", "or", "rec", "then", "with",
];

/// Syntactic category of an assignment's right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// Contains an `if` expression; never rewritten.
    Conditional,
    /// A single bracketed list, `[ ... ]`.
    List,
    /// Operands joined by top-level `++`.
    Concatenation,
    /// Anything else.
    Scalar,
}

/// Classifies a trimmed assignment value.
pub fn classify(value: &str) -> ValueShape {
    if is_conditional(value) {
        ValueShape::Conditional
    } else if is_list(value) {
        ValueShape::List
    } else if split_concatenation(value).is_some_and(|operands| operands.len() > 1) {
        ValueShape::Concatenation
    } else {
        ValueShape::Scalar
    }
}

/// Qualifies references in assignments to one attribute key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRewriter {
    key: String,
    namespace: String,
    qualifier: String,
}

impl AttributeRewriter {
    /// Rewriter for `key`, using `key` itself as the namespace.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            namespace: key.clone(),
            key,
            qualifier: DEFAULT_QUALIFIER.to_string(),
        }
    }

    /// Uses `namespace` for the guard clause and for recognising member
    /// references, e.g. `badPlatforms` values refer to `platforms.*`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Cheap whole-text check: the text must mention `namespace.` or
    /// `namespaces.` somewhere, otherwise the key probably refers to an
    /// unrelated set and the text is left alone.
    pub fn applies_to(&self, text: &str) -> bool {
        text.contains(&format!("{}.", self.namespace))
            || text.contains(&format!("{}s.", self.namespace))
    }

    /// Returns `text` with every qualifiable reference in `key` assignments
    /// prefixed by the qualifier.
    pub fn rewrite<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.applies_to(text) {
            return Cow::Borrowed(text);
        }
        apply_replacements(text, &self.edits(text))
    }

    /// Computes the insertions [`rewrite`](Self::rewrite) would make, without
    /// consulting the guard clause.
    pub fn edits(&self, text: &str) -> Vec<Replacement> {
        let mut edits = Vec::new();

        for assignment in find_assignments(text, &self.key) {
            let value = &text[assignment.value.clone()];
            let base = assignment.value.start;

            let offsets = match classify(value) {
                ValueShape::Conditional => Vec::new(),
                ValueShape::List => self.list_offsets(value),
                ValueShape::Concatenation => self.concatenation_offsets(value),
                ValueShape::Scalar => self.scalar_offsets(value),
            };

            edits.extend(
                offsets
                    .into_iter()
                    .map(|offset| Replacement::insert(base + offset, self.prefix())),
            );
        }

        edits
    }

    fn prefix(&self) -> String {
        format!("{}.", self.qualifier)
    }

    fn list_offsets(&self, value: &str) -> Vec<usize> {
        list_items(value)
            .unwrap_or_default()
            .into_iter()
            .filter(|item| {
                let token = &value[item.clone()];
                is_reference(token)
                    && token != self.qualifier
                    && !is_qualified(token, &self.qualifier)
            })
            .map(|item| item.start)
            .collect()
    }

    /// Operands starting with `namespace.` are qualified, and so are those
    /// starting with the plural `namespaces.`, so `license` values built from
    /// `licenses.*` are covered too.
    fn concatenation_offsets(&self, value: &str) -> Vec<usize> {
        let member = format!("{}.", self.namespace);
        let plural = format!("{}s.", self.namespace);

        split_concatenation(value)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|operand| {
                let text = &value[operand.clone()];
                let trimmed = text.trim_start();
                let head = head_of(trimmed);
                let qualifiable = (trimmed.starts_with(&member) || trimmed.starts_with(&plural))
                    && !is_qualified(head, &self.qualifier);
                qualifiable.then(|| operand.start + (text.len() - trimmed.len()))
            })
            .collect()
    }

    fn scalar_offsets(&self, value: &str) -> Vec<usize> {
        let head = head_of(value);
        let qualifiable = starts_like_identifier(value)
            && !KEYWORDS.contains(&head)
            && head != self.qualifier
            && !is_qualified(head, &self.qualifier);
        if qualifiable { vec![0] } else { Vec::new() }
    }
}

/// Rewrites `key` assignments in `text` with the default qualifier.
///
/// `namespace` defaults to `key`.
pub fn rewrite(text: &str, key: &str, namespace: Option<&str>) -> String {
    AttributeRewriter::new(key)
        .with_namespace(namespace.unwrap_or(key))
        .rewrite(text)
        .into_owned()
}

/// Whether the qualifier appears as a leading path segment of `token`, as in
/// `lib.licenses.mit` or `stdenv.lib.licenses.mit`.
pub fn is_qualified(token: &str, qualifier: &str) -> bool {
    let prefix = format!("{qualifier}.");
    token.starts_with(&prefix) || token.contains(&format!(".{prefix}"))
}

fn is_conditional(value: &str) -> bool {
    let bytes = value.as_bytes();
    value.match_indices("if").any(|(at, _)| {
        let before = at.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(at + 2).copied();
        !before.is_some_and(|b| is_ident_byte(b) || b == b'.')
            && !after.is_some_and(|b| is_ident_byte(b) || b == b'.')
    })
}

fn is_list(value: &str) -> bool {
    if !value.starts_with('[') {
        return false;
    }
    let mut cursor = Cursor::new(value.as_bytes(), 1);
    cursor.scan_to(b']') == Walk::Found(value.len() - 1)
}

/// Spans of the items between the outer brackets of a list value.
///
/// String literals are skipped; comments are ignored. Returns `None` when the
/// list nests brackets, parentheses or braces, which this scanner does not
/// attempt to qualify.
fn list_items(value: &str) -> Option<Vec<Range<usize>>> {
    let bytes = value.as_bytes();
    let end = value.len().checked_sub(1)?;
    let mut cursor = Cursor::new(&bytes[..end], 1);
    let mut items = Vec::new();

    while let Some(byte) = cursor.peek() {
        if byte.is_ascii_whitespace() {
            cursor.pos += 1;
        } else if cursor.opens_literal() {
            cursor.skip_literal()?;
        } else if is_delimiter(byte) {
            return None;
        } else {
            let start = cursor.pos;
            while cursor
                .peek()
                .is_some_and(|b| !b.is_ascii_whitespace() && !is_delimiter(b))
            {
                cursor.pos += 1;
            }
            items.push(start..cursor.pos);
        }
    }

    Some(items)
}

/// Spans of the operands of a top-level `++` chain, including their
/// surrounding whitespace. Returns `None` for unbalanced input.
fn split_concatenation(value: &str) -> Option<Vec<Range<usize>>> {
    let bytes = value.as_bytes();
    let mut cursor = Cursor::new(bytes, 0);
    let mut operands = Vec::new();
    let mut start = 0;

    loop {
        match cursor.walk_top_level(|at, byte| byte == b'+' && bytes.get(at + 1) == Some(&b'+')) {
            Walk::Found(at) => {
                operands.push(start..at);
                start = at + 2;
                cursor.pos = start;
            }
            Walk::End => {
                operands.push(start..value.len());
                return Some(operands);
            }
            Walk::Unbalanced => return None,
        }
    }
}

fn is_delimiter(byte: u8) -> bool {
    matches!(byte, b'[' | b']' | b'(' | b')' | b'{' | b'}')
}

fn starts_like_identifier(text: &str) -> bool {
    text.as_bytes()
        .first()
        .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
}

/// A bare attribute path such as `linux` or `platforms.linux`.
fn is_reference(token: &str) -> bool {
    starts_like_identifier(token)
        && !KEYWORDS.contains(&token)
        && token.bytes().all(|b| is_ident_byte(b) || b == b'.')
        && !token.ends_with('.')
}

/// Leading attribute path of an expression, up to the first whitespace or
/// delimiter.
fn head_of(text: &str) -> &str {
    let end = text
        .find(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ';'))
        .unwrap_or(text.len());
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platforms(text: &str) -> String {
        rewrite(text, "platforms", None)
    }

    #[test]
    fn qualifies_list_items() {
        let text = "platforms = [ linux darwin ];\nx = platforms.linux;";
        assert_eq!(
            platforms(text),
            "platforms = [ lib.linux lib.darwin ];\nx = platforms.linux;"
        );
    }

    #[test]
    fn qualifies_member_references_in_list() {
        let text = "platforms = [ platforms.linux \"aarch64-darwin\" lib.platforms.darwin ];";
        assert_eq!(
            platforms(text),
            "platforms = [ lib.platforms.linux \"aarch64-darwin\" lib.platforms.darwin ];"
        );
    }

    #[test]
    fn preserves_multiline_list_layout_and_comments() {
        let text = "maintainers = [\n  maintainers.alice # lead\n  maintainers.bob\n];";
        assert_eq!(
            rewrite(text, "maintainers", None),
            "maintainers = [\n  lib.maintainers.alice # lead\n  lib.maintainers.bob\n];"
        );
    }

    #[test]
    fn leaves_nested_lists_unchanged() {
        let text = "platforms = [ (platforms.linux) ];";
        assert_eq!(platforms(text), text);
    }

    #[test]
    fn leaves_with_scoped_list_to_static_rules() {
        let text = "maintainers = with lib.maintainers; [ alice bob ];";
        assert_eq!(rewrite(text, "maintainers", None), text);
    }

    #[test]
    fn leaves_already_qualified_scalar() {
        let text = "license = stdenv.lib.licenses.mit;";
        assert_eq!(rewrite(text, "license", None), text);
        let text = "license = lib.licenses.mit;";
        assert_eq!(rewrite(text, "license", None), text);
    }

    #[test]
    fn qualifies_bare_scalar() {
        let text = "license = licenses.mit;";
        assert_eq!(rewrite(text, "license", None), "license = lib.licenses.mit;");
    }

    #[test]
    fn qualifies_scalar_followed_by_operator() {
        let text = "license = licenses.mit // { free = false; };";
        assert_eq!(
            rewrite(text, "license", None),
            "license = lib.licenses.mit // { free = false; };"
        );
    }

    #[test]
    fn leaves_scalars_that_are_not_references() {
        for text in [
            "license = \"unfree\"; x = licenses.mit;",
            "license = ''unfree''; x = licenses.mit;",
            "license = { fullName = \"x\"; }; x = licenses.mit;",
            "license = (licenses.mit); x = licenses.mit;",
            "license = let l = licenses; in l.mit; x = licenses.mit;",
        ] {
            assert_eq!(rewrite(text, "license", None), text, "{text}");
        }
    }

    #[test]
    fn skips_conditionals() {
        let text = r#"platforms = if stdenv.isLinux then [ "x86_64-linux" ] else [ ];"#;
        assert_eq!(platforms(text), text);
        let text = "platforms = platforms.unix ++ lib.optionals (if a then b else c) platforms.darwin;";
        assert_eq!(platforms(text), text);
    }

    #[test]
    fn qualifies_concatenated_member_references() {
        let text = "teams = teams.foo ++ teams.bar;";
        assert_eq!(
            rewrite(text, "teams", None),
            "teams = lib.teams.foo ++ lib.teams.bar;"
        );
    }

    #[test]
    fn concatenation_only_qualifies_namespace_members() {
        let text = "platforms = platforms.linux ++ [ \"x86_64-darwin\" ] ++ extraPlatforms;";
        assert_eq!(
            platforms(text),
            "platforms = lib.platforms.linux ++ [ \"x86_64-darwin\" ] ++ extraPlatforms;"
        );
    }

    #[test]
    fn concatenation_accepts_plural_namespace() {
        let text = "license = licenses.mit ++ [ licenses.asl20 ];";
        assert_eq!(
            rewrite(text, "license", None),
            "license = lib.licenses.mit ++ [ licenses.asl20 ];"
        );
    }

    #[test]
    fn alias_key_uses_namespace() {
        let text = "badPlatforms = platforms.darwin ++ platforms.windows;";
        assert_eq!(
            rewrite(text, "badPlatforms", Some("platforms")),
            "badPlatforms = lib.platforms.darwin ++ lib.platforms.windows;"
        );
    }

    #[test]
    fn guard_skips_text_without_namespace_references() {
        let text = "platforms = [ linux darwin ];";
        assert_eq!(platforms(text), text);
        assert!(matches!(
            AttributeRewriter::new("platforms").rewrite(text),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn comments_mentioning_the_key_are_left_alone() {
        let text = "# platforms = see upstream\nplatforms = [ linux ];\nx = platforms.unix;";
        assert_eq!(
            platforms(text),
            "# platforms = see upstream\nplatforms = [ lib.linux ];\nx = platforms.unix;"
        );

        let text = "/* platforms = [ old ]; */ platforms = platforms.unix;";
        assert_eq!(
            platforms(text),
            "/* platforms = [ old ]; */ platforms = lib.platforms.unix;"
        );
    }

    #[test]
    fn strings_mentioning_the_key_are_left_alone() {
        let text = "longDescription = ''\n  set platforms = linux; in config\n'';\nplatforms = platforms.unix;";
        assert_eq!(
            platforms(text),
            "longDescription = ''\n  set platforms = linux; in config\n'';\nplatforms = lib.platforms.unix;"
        );

        let text = "description = \"platforms = linux;\"; platforms = platforms.unix;";
        assert_eq!(
            platforms(text),
            "description = \"platforms = linux;\"; platforms = lib.platforms.unix;"
        );
    }

    #[test]
    fn bare_qualifier_in_list_is_not_prefixed() {
        let text = "platforms = [ lib linux ]; x = platforms.unix;";
        assert_eq!(
            platforms(text),
            "platforms = [ lib lib.linux ]; x = platforms.unix;"
        );
    }

    #[test]
    fn replaces_by_position_not_by_content() {
        let text = "a = { license = licenses.mit; };\nb = { license = licenses.mit; };";
        assert_eq!(
            rewrite(text, "license", None),
            "a = { license = lib.licenses.mit; };\nb = { license = lib.licenses.mit; };"
        );
    }

    #[test]
    fn respects_custom_qualifier() {
        let rewriter = AttributeRewriter::new("license").with_qualifier("pkgs.lib");
        let text = "license = licenses.mit;";
        assert_eq!(rewriter.rewrite(text), "license = pkgs.lib.licenses.mit;");
    }

    #[test]
    fn rewriting_is_idempotent_for_every_shape() {
        let text = "\
platforms = [ linux platforms.darwin \"x\" ];
platforms = platforms.linux ++ platforms.darwin;
platforms = platforms.unix;
platforms = if a then platforms.linux else [ ];
";
        let once = platforms(text);
        assert_ne!(once, text);
        assert_eq!(platforms(&once), once);
    }

    #[test]
    fn classifies_value_shapes() {
        assert_eq!(classify("[ a b ]"), ValueShape::List);
        assert_eq!(classify("[ a ] ++ [ b ]"), ValueShape::Concatenation);
        assert_eq!(classify("a ++ b"), ValueShape::Concatenation);
        assert_eq!(classify("if a then b else c"), ValueShape::Conditional);
        assert_eq!(classify("[ (if a then b else c) ]"), ValueShape::Conditional);
        assert_eq!(classify("platforms.linux"), ValueShape::Scalar);
        assert_eq!(classify("\"a ++ b\""), ValueShape::Scalar);
        assert_eq!(classify("lib.optionals diff [ a ]"), ValueShape::Scalar);
    }

    #[test]
    fn identifiers_containing_if_are_not_conditionals() {
        assert!(!is_conditional("platforms.elif ++ iff ++ x.if"));
        assert!(is_conditional("(if a then b else c)"));
    }

    #[test]
    fn qualification_check_looks_at_components() {
        assert!(is_qualified("lib.licenses.mit", "lib"));
        assert!(is_qualified("stdenv.lib.licenses.mit", "lib"));
        assert!(!is_qualified("libfoo.mit", "lib"));
        assert!(!is_qualified("licenses.lib", "lib"));
        assert!(!is_qualified("lib", "lib"));
        assert!(is_qualified("pkgs.lib.licenses.mit", "pkgs.lib"));
    }

    #[test]
    fn dotted_qualifier_is_idempotent() {
        let rewriter = AttributeRewriter::new("license").with_qualifier("pkgs.lib");
        let once = rewriter.rewrite("license = licenses.mit;").into_owned();
        assert_eq!(rewriter.rewrite(&once), once);
    }
}
