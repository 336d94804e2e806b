//! Nix file scanner.
//!
//! Recursively walks directories to collect `.nix` files and locates
//! `key = value;` assignments in their raw text. Assignment extraction does not
//! build a syntax tree: a small cursor understands just enough of the value
//! grammar (balanced brackets, string literals with interpolation, comments)
//! to find where a value ends, and reports byte spans so callers can edit by
//! position.

use crate::error::{Error, Result};
use glob::Pattern;
use std::ops::Range;
use std::path::PathBuf;
use walkdir::WalkDir;

/// An assignment `key = value;` found in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Byte span from the first byte of the key through the terminating `;`.
    pub span: Range<usize>,
    /// Byte span of the value, excluding surrounding whitespace.
    pub value: Range<usize>,
}

/// Compiles `--exclude` style glob patterns.
pub fn compile_excludes<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p.as_ref()).map_err(Error::from))
        .collect()
}

/// Collects all `.nix` files under `paths`.
///
/// A path naming a file yields that file as given. Directories are walked
/// recursively; entries matching any of `excludes` are skipped, and with
/// `default_excludes` so are hidden entries below the walk root.
pub fn collect_nix_files(
    paths: &[PathBuf],
    excludes: &[Pattern],
    default_excludes: bool,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e, excludes, default_excludes))
        {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "nix")
            {
                files.push(entry.into_path());
            }
        }
    }

    Ok(files)
}

fn is_skipped(entry: &walkdir::DirEntry, excludes: &[Pattern], default_excludes: bool) -> bool {
    let name = entry.file_name().to_string_lossy();
    if default_excludes && name.starts_with('.') {
        return true;
    }
    excludes
        .iter()
        .any(|p| p.matches(&name) || p.matches_path(entry.path()))
}

/// Finds every assignment to `key` in `text`, in source order.
///
/// Occurrences of `key` inside string literals and comments are skipped. The
/// key must not be preceded by an identifier character (`meta.key` is fine,
/// `extraKey` is not) and must be followed by `=` that is not part of `==`.
/// The value runs to the first `;` at bracket depth zero outside string
/// literals and comments. Candidates whose value hits an unmatched closing
/// bracket or the end of input are not assignments and are skipped.
pub fn find_assignments(text: &str, key: &str) -> Vec<Assignment> {
    let mut found = Vec::new();
    if key.is_empty() {
        return found;
    }

    let src = text.as_bytes();
    let mut cursor = Cursor::new(src, 0);
    while cursor.peek().is_some() {
        if cursor.opens_literal() {
            if cursor.skip_literal().is_none() {
                break;
            }
            continue;
        }

        let start = cursor.pos;
        if !src[start..].starts_with(key.as_bytes()) {
            cursor.pos += 1;
            continue;
        }

        let after_key = start + key.len();
        match assignment_at(src, start, after_key) {
            Some(assignment) => {
                cursor.pos = assignment.span.end;
                found.push(assignment);
            }
            None => cursor.pos = after_key,
        }
    }

    found
}

fn assignment_at(src: &[u8], start: usize, after_key: usize) -> Option<Assignment> {
    if start > 0 && is_ident_byte(src[start - 1]) {
        return None;
    }

    let mut cursor = Cursor::new(src, after_key);
    cursor.skip_whitespace();
    if cursor.peek() != Some(b'=') || cursor.peek_at(1) == Some(b'=') {
        return None;
    }
    cursor.pos += 1;
    cursor.skip_whitespace();

    let value_start = cursor.pos;
    let Walk::Found(terminator) = cursor.scan_to(b';') else {
        return None;
    };
    let value_end = trim_end(src, value_start, terminator);
    if value_end == value_start {
        return None;
    }

    Some(Assignment {
        span: start..terminator + 1,
        value: value_start..value_end,
    })
}

fn trim_end(src: &[u8], start: usize, mut end: usize) -> usize {
    while end > start && src[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    end
}

/// Bytes that may continue a Nix identifier.
pub(crate) fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'\'' | b'-')
}

/// Outcome of walking code with a [`Cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Walk {
    /// The visitor accepted the byte at this position.
    Found(usize),
    /// Input ended with all brackets balanced.
    End,
    /// An unmatched closing bracket or an unterminated string or comment.
    Unbalanced,
}

/// Byte cursor over Nix source.
///
/// All delimiters it recognises are ASCII, so byte positions it reports are
/// always char boundaries of the underlying UTF-8 text.
pub(crate) struct Cursor<'a> {
    src: &'a [u8],
    pub(crate) pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(src: &'a [u8], pos: usize) -> Self {
        Self { src, pos }
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    pub(crate) fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Scans to `terminator` at bracket depth zero without consuming it.
    pub(crate) fn scan_to(&mut self, terminator: u8) -> Walk {
        self.walk_top_level(|_, byte| byte == terminator)
    }

    /// Walks code from the current position.
    ///
    /// `visit` sees the position and value of every byte at bracket depth zero
    /// that does not open a string or comment; returning `true` stops the walk
    /// at that byte.
    pub(crate) fn walk_top_level(&mut self, mut visit: impl FnMut(usize, u8) -> bool) -> Walk {
        let mut depth = 0usize;

        while let Some(byte) = self.peek() {
            let opens_literal = self.opens_literal();
            if depth == 0 && !opens_literal && visit(self.pos, byte) {
                return Walk::Found(self.pos);
            }

            if opens_literal {
                if self.skip_literal().is_none() {
                    return Walk::Unbalanced;
                }
                continue;
            }

            match byte {
                b'[' | b'(' | b'{' => depth += 1,
                b']' | b')' | b'}' => {
                    if depth == 0 {
                        return Walk::Unbalanced;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.pos += 1;
        }

        Walk::End
    }

    /// Whether the cursor sits on the start of a string literal or comment.
    pub(crate) fn opens_literal(&self) -> bool {
        match self.peek() {
            Some(b'"') | Some(b'#') => true,
            Some(b'\'') => self.peek_at(1) == Some(b'\'') && !self.follows_ident(),
            Some(b'/') => self.peek_at(1) == Some(b'*'),
            _ => false,
        }
    }

    /// Skips the string literal or comment at the cursor.
    ///
    /// Returns `None` if it is unterminated.
    pub(crate) fn skip_literal(&mut self) -> Option<()> {
        match self.peek()? {
            b'"' => {
                self.pos += 1;
                self.skip_string()
            }
            b'\'' => {
                self.pos += 2;
                self.skip_indented_string()
            }
            b'#' => {
                while self.peek().is_some_and(|b| b != b'\n') {
                    self.pos += 1;
                }
                Some(())
            }
            _ => {
                self.pos += 2;
                while !(self.peek()? == b'*' && self.peek_at(1) == Some(b'/')) {
                    self.pos += 1;
                }
                self.pos += 2;
                Some(())
            }
        }
    }

    fn follows_ident(&self) -> bool {
        self.pos > 0 && is_ident_byte(self.src[self.pos - 1])
    }

    fn skip_string(&mut self) -> Option<()> {
        loop {
            match self.peek()? {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return Some(());
                }
                b'$' if self.peek_at(1) == Some(b'$') => self.pos += 2,
                b'$' if self.peek_at(1) == Some(b'{') => {
                    self.pos += 2;
                    self.skip_interpolation()?;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_indented_string(&mut self) -> Option<()> {
        loop {
            match self.peek()? {
                b'\'' if self.peek_at(1) == Some(b'\'') => match self.peek_at(2) {
                    Some(b'\'') | Some(b'$') => self.pos += 3,
                    Some(b'\\') => self.pos += 4,
                    _ => {
                        self.pos += 2;
                        return Some(());
                    }
                },
                b'$' if self.peek_at(1) == Some(b'$') => self.pos += 2,
                b'$' if self.peek_at(1) == Some(b'{') => {
                    self.pos += 2;
                    self.skip_interpolation()?;
                }
                _ => self.pos += 1,
            }
        }
    }

    fn skip_interpolation(&mut self) -> Option<()> {
        match self.scan_to(b'}') {
            Walk::Found(close) => {
                self.pos = close + 1;
                Some(())
            }
            Walk::End | Walk::Unbalanced => None,
        }
    }
}
