//! Structural pattern matching with specificity scoring.
//!
//! A pattern is one of:
//! - a literal identifier or code fragment (`UserService.validateCredentials`),
//! - a wildcard glob (`get*Handler`, `fn ?ead`),
//! - a raw regex delimited by slashes (`/impl\s+\w+\s+for/`).
//!
//! Matches are scored by tier so that an exact identifier hit always outranks
//! a loose content match.

use regex::{Regex, RegexBuilder};

use crate::error::{RagError, Result};

/// Exact (case-sensitive) match on entity name, qualified name or id.
pub const SCORE_EXACT: f32 = 1.0;
/// Case-insensitive exact match.
pub const SCORE_EXACT_CI: f32 = 0.9;
/// Qualified name matches on a separator boundary (`a.b.C` vs `b.C`).
pub const SCORE_QUALIFIED_SUFFIX: f32 = 0.8;
/// Pattern is a substring of the entity name.
pub const SCORE_IDENT_SUBSTRING: f32 = 0.6;
/// Pattern is a substring of the chunk content.
pub const SCORE_CONTENT_SUBSTRING: f32 = 0.5;
/// Wildcard/regex fully matches an entity name.
pub const SCORE_WILDCARD_NAME: f32 = 0.4;
/// Wildcard/regex matches somewhere in name or content.
pub const SCORE_WILDCARD_CONTENT: f32 = 0.3;

const QUALIFIED_SEPARATORS: [&str; 4] = [".", "::", "/", "#"];

/// Upper bound on compiled regex size; patterns come straight from callers.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Fields of a stored chunk a pattern is scored against.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchTarget<'a> {
    pub entity_id: Option<&'a str>,
    pub name: Option<&'a str>,
    pub qualified_name: Option<&'a str>,
    pub content: &'a str,
}

/// A compiled structural pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    /// Set for literal patterns; lowercased copy kept for substring tiers.
    literal: Option<(String, String)>,
    /// Unanchored, case-insensitive.
    search: Regex,
    /// Anchored full match, case-insensitive.
    anchored: Regex,
}

impl Pattern {
    /// Compile a pattern from query text.
    ///
    /// Trailing question marks and whitespace are treated as punctuation, so
    /// `"how does streaming work?"` is a literal, not a wildcard.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_end_matches('?').trim_end();
        if trimmed.is_empty() {
            return Err(RagError::invalid_query("pattern is empty"));
        }

        let (body, literal) = if let Some(re) = Self::delimited_regex(trimmed) {
            (re.to_string(), None)
        } else if trimmed.contains(['*', '?']) {
            (glob_to_regex(trimmed), None)
        } else {
            (
                regex::escape(trimmed),
                Some((trimmed.to_string(), trimmed.to_lowercase())),
            )
        };

        let search = build_regex(&body)?;
        let anchored = build_regex(&format!("^(?:{})$", body))?;

        Ok(Self {
            raw: trimmed.to_string(),
            literal,
            search,
            anchored,
        })
    }

    fn delimited_regex(s: &str) -> Option<&str> {
        if s.len() > 2 && s.starts_with('/') && s.ends_with('/') {
            Some(&s[1..s.len() - 1])
        } else {
            None
        }
    }

    /// The pattern text after normalization.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern uses wildcard or regex syntax.
    pub fn is_wildcard(&self) -> bool {
        self.literal.is_none()
    }

    /// Case-insensitive, unanchored regex source, usable as a SQL `REGEXP` prefilter.
    pub fn prefilter_regex(&self) -> String {
        format!("(?i){}", self.search.as_str())
    }

    /// Score a target, or `None` when it does not match.
    pub fn specificity(&self, target: &MatchTarget<'_>) -> Option<f32> {
        let idents = [target.name, target.qualified_name, target.entity_id];

        match &self.literal {
            Some((lit, lower)) => {
                if idents.iter().flatten().any(|i| i == lit) {
                    return Some(SCORE_EXACT);
                }
                if idents.iter().flatten().any(|i| i.to_lowercase() == *lower) {
                    return Some(SCORE_EXACT_CI);
                }
                if let Some(q) = target.qualified_name {
                    if qualified_suffix_match(&q.to_lowercase(), lower) {
                        return Some(SCORE_QUALIFIED_SUFFIX);
                    }
                }
                if idents
                    .iter()
                    .flatten()
                    .any(|i| i.to_lowercase().contains(lower.as_str()))
                {
                    return Some(SCORE_IDENT_SUBSTRING);
                }
                if target.content.to_lowercase().contains(lower.as_str()) {
                    return Some(SCORE_CONTENT_SUBSTRING);
                }
                None
            }
            None => {
                if idents.iter().flatten().any(|i| self.anchored.is_match(i)) {
                    return Some(SCORE_WILDCARD_NAME);
                }
                if idents.iter().flatten().any(|i| self.search.is_match(i))
                    || self.search.is_match(target.content)
                {
                    return Some(SCORE_WILDCARD_CONTENT);
                }
                None
            }
        }
    }
}

/// `a.b.c` vs `b.c` in either direction, on a separator boundary.
fn qualified_suffix_match(qualified: &str, literal: &str) -> bool {
    QUALIFIED_SEPARATORS.iter().any(|sep| {
        qualified.ends_with(&format!("{}{}", sep, literal))
            || literal.ends_with(&format!("{}{}", sep, qualified))
    })
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out
}

fn build_regex(body: &str) -> Result<Regex> {
    RegexBuilder::new(body)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| RagError::invalid_query(format!("invalid pattern: {}", e)))
}
