//! Record-to-entry compilation and primary token selection.
//!
//! The compiler turns a [`FilterRecord`] into what the index stores:
//! either a [`CompiledEntry`] plus the token it is filed under, or a
//! badfilter suppression. Token selection decides how cheap the filter
//! is at match time; an entry without a token lands in the catch-all
//! lists that every request pays for.

use sieve_core::entry::CompiledEntry;
use sieve_core::types::PatternKind;
use sieve_core::url::{tokenize_pattern, Token};

use crate::parser::FilterRecord;

/// Tokens too common across filter lists to discriminate anything;
/// picking one would pile unrelated filters into one hot bucket.
const TOKEN_STOPLIST: &[&str] = &[
    "com", "http", "https", "icon", "images", "img", "js", "net", "news", "www",
];

/// What one record compiles to.
#[derive(Debug)]
pub enum CompileOutput {
    Entry {
        entry: CompiledEntry,
        /// Primary token hash; None routes the entry to the catch-all.
        token: Option<u32>,
    },
    /// A `$badfilter` record; its signature deactivates the matching
    /// entry at freeze time. The full entry is kept so the record can
    /// still be serialized.
    Suppression(CompiledEntry),
}

impl CompileOutput {
    pub fn entry(&self) -> &CompiledEntry {
        match self {
            Self::Entry { entry, .. } => entry,
            Self::Suppression(entry) => entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("invalid regular expression: {0}")]
    BadRegex(#[from] regex::Error),
}

/// Compile one parsed record for the list identified by `list_id`.
pub fn compile(
    record: &FilterRecord,
    list_id: u16,
    max_token_len: usize,
) -> Result<CompileOutput, CompileError> {
    let entry = CompiledEntry::new(
        record.action,
        record.kind,
        record.flags,
        record.type_mask,
        record.party,
        &record.pattern,
        record.domains_raw.as_deref(),
        record.payload.as_deref(),
        list_id,
    )?;

    if entry.is_badfilter() {
        return Ok(CompileOutput::Suppression(entry));
    }

    let token = select_token(record.kind, &record.pattern, max_token_len);
    Ok(CompileOutput::Entry { entry, token })
}

/// Pick the primary token for a pattern: the longest eligible token,
/// on the bet that longer tokens are rarer in request URLs.
///
/// A token is ineligible when it touches a `*` (the URL-side run may
/// hash differently) or sits on the stoplist. Hostname-anchored
/// patterns must take their token from the hostname portion, since
/// that is the only place the index will probe for them.
pub fn select_token(kind: PatternKind, pattern: &str, max_token_len: usize) -> Option<u32> {
    if kind == PatternKind::Regex {
        return None;
    }

    let limit = match kind {
        PatternKind::Hostname => hostname_part_len(pattern),
        _ => pattern.len(),
    };

    let bytes = pattern.as_bytes();
    let mut best: Option<Token> = None;
    for token in tokenize_pattern(pattern, max_token_len) {
        let end = token.start + token.len;
        if end > limit {
            continue;
        }
        if token.start > 0 && bytes[token.start - 1] == b'*' {
            continue;
        }
        if end < bytes.len() && bytes[end] == b'*' {
            continue;
        }
        if is_stoplisted(&pattern[token.start..end]) {
            continue;
        }
        if best.map_or(true, |b| token.len > b.len) {
            best = Some(token);
        }
    }
    best.map(|t| t.hash)
}

/// Length of the hostname portion of a hostname-anchored pattern.
fn hostname_part_len(pattern: &str) -> usize {
    pattern
        .bytes()
        .position(|b| matches!(b, b'/' | b'^' | b'*' | b'?'))
        .unwrap_or(pattern.len())
}

fn is_stoplisted(token: &str) -> bool {
    TOKEN_STOPLIST.iter().any(|s| token.eq_ignore_ascii_case(s))
}
