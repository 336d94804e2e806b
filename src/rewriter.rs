//! Position-aware text editing.
//!
//! Rewrites are expressed as byte-span replacements against the original
//! text. Edits are sorted by position and applied in reverse order so earlier
//! edits never invalidate later offsets, and text outside the edited spans is
//! carried over untouched.

use std::borrow::Cow;

/// A single text replacement with position information.
///
/// An empty span (`start == end`) is an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub new_text: String,
}

impl Replacement {
    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            new_text: text.into(),
        }
    }
}

/// Applies replacements to `content`, returning the original when there are none.
///
/// Replacements whose span falls outside `content` or splits a character are
/// ignored.
pub fn apply_replacements<'a>(content: &'a str, replacements: &[Replacement]) -> Cow<'a, str> {
    if replacements.is_empty() {
        return Cow::Borrowed(content);
    }

    let mut ordered: Vec<&Replacement> = replacements.iter().collect();
    ordered.sort_by(|a, b| b.start.cmp(&a.start));

    let mut result = content.to_string();
    for rep in ordered {
        if rep.start <= rep.end
            && result.is_char_boundary(rep.start)
            && result.is_char_boundary(rep.end)
        {
            result.replace_range(rep.start..rep.end, &rep.new_text);
        }
    }

    Cow::Owned(result)
}
