//! URL scanning utilities for the hot path.
//!
//! These functions work directly on string slices and avoid per-call
//! allocations beyond the bounded token vector. The same tokenizer is
//! used for filter patterns at compile time and for request URLs at
//! match time, so both sides draw keys from one alphabet: lowercased
//! runs of `[a-z0-9%]`, truncated to the configured maximum token
//! length before hashing.

use crate::hash::hash_token;

/// Tokens shorter than this are too common to discriminate anything.
pub const MIN_TOKEN_LEN: usize = 3;

/// Hard cap on tokens extracted per URL, to bound match-time work.
const MAX_URL_TOKENS: usize = 32;

/// Get the position just past the scheme separator (`://`, or `:` for
/// `data:` URLs). Returns None when the input has no recognizable scheme.
#[inline]
pub fn scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();
    let colon = bytes.iter().position(|&b| b == b':')?;

    if bytes.len() > colon + 2 && bytes[colon + 1] == b'/' && bytes[colon + 2] == b'/' {
        return Some(colon + 3);
    }

    if colon >= 4 && bytes[..colon].eq_ignore_ascii_case(b"data") {
        return Some(colon + 1);
    }

    None
}

/// Byte span of the hostname within a URL, skipping userinfo and port.
#[inline]
pub fn host_span(url: &str) -> Option<(usize, usize)> {
    let start = scheme_end(url)?;
    let bytes = url.as_bytes();

    let mut host_start = start;
    for i in start..bytes.len() {
        if bytes[i] == b'@' {
            host_start = i + 1;
            break;
        }
        if bytes[i] == b'/' {
            break;
        }
    }

    let mut host_end = bytes.len();
    for i in host_start..bytes.len() {
        let b = bytes[i];
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Hostname slice of a URL, or None if the URL has no authority part.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (start, end) = host_span(url)?;
    Some(&url[start..end])
}

/// The `^` separator of the filter syntax: end of string, or any byte
/// that is neither alphanumeric nor one of `_ - . %`.
#[inline]
pub fn is_separator(b: u8) -> bool {
    !(b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' || b == b'%')
}

/// Check whether `pos` in `s` sits at a separator boundary.
#[inline]
pub fn is_at_boundary(s: &str, pos: usize) -> bool {
    pos >= s.len() || is_separator(s.as_bytes()[pos])
}

/// A token extracted from a URL or pattern, with its byte position.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub hash: u32,
    pub start: usize,
    pub len: usize,
}

/// Scan `input` for token runs, invoking `emit` for each. Runs are
/// `[A-Za-z0-9%]` sequences of at least [`MIN_TOKEN_LEN`] bytes,
/// lowercased and truncated to `max_token_len` before hashing.
///
/// `emit` returning false stops the scan early.
fn scan_tokens(input: &str, from: usize, max_token_len: usize, mut emit: impl FnMut(Token) -> bool) {
    let bytes = input.as_bytes();
    let mut token_start = None;

    for i in from..=bytes.len() {
        let in_token = i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'%');

        if in_token {
            if token_start.is_none() {
                token_start = Some(i);
            }
            continue;
        }

        if let Some(ts) = token_start.take() {
            let len = i - ts;
            if len < MIN_TOKEN_LEN {
                continue;
            }
            let hashed_len = len.min(max_token_len);
            let mut buf = [0u8; 64];
            let hashed_len = hashed_len.min(buf.len());
            for (j, &b) in bytes[ts..ts + hashed_len].iter().enumerate() {
                buf[j] = b.to_ascii_lowercase();
            }
            let token = Token {
                hash: hash_token(&buf[..hashed_len]),
                start: ts,
                len,
            };
            if !emit(token) {
                return;
            }
        }
    }
}

/// Tokenize a request URL. Scanning starts after the scheme; output is
/// bounded by [`MAX_URL_TOKENS`]. A URL with no eligible token yields an
/// empty vector, which is a valid (catch-all only) outcome.
pub fn tokenize_url(url: &str, max_token_len: usize) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(MAX_URL_TOKENS);
    let start = scheme_end(url).unwrap_or(0);
    scan_tokens(url, start, max_token_len, |t| {
        tokens.push(t);
        tokens.len() < MAX_URL_TOKENS
    });
    tokens
}

/// Tokenize a filter pattern. Unlike URLs the whole pattern is scanned,
/// and there is no count cap: patterns are short by construction.
pub fn tokenize_pattern(pattern: &str, max_token_len: usize) -> Vec<Token> {
    let mut tokens = Vec::new();
    scan_tokens(pattern, 0, max_token_len, |t| {
        tokens.push(t);
        true
    });
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_end_variants() {
        assert_eq!(scheme_end("https://example.com"), Some(8));
        assert_eq!(scheme_end("http://example.com"), Some(7));
        assert_eq!(scheme_end("data:text/html"), Some(5));
        assert_eq!(scheme_end("no-scheme-here"), None);
    }

    #[test]
    fn host_extraction() {
        assert_eq!(extract_host("https://example.com/path"), Some("example.com"));
        assert_eq!(extract_host("https://example.com:8080/x"), Some("example.com"));
        assert_eq!(
            extract_host("https://user:pw@example.com/x"),
            Some("example.com")
        );
    }

    #[test]
    fn boundary_semantics() {
        assert!(is_at_boundary("abc", 3));
        assert!(is_at_boundary("abc/def", 3));
        assert!(!is_at_boundary("abc", 1));
        // % is URL-encoding, not a separator
        assert!(!is_separator(b'%'));
        assert!(is_separator(b'/'));
        assert!(is_separator(b'^'));
    }

    #[test]
    fn url_tokens_skip_short_runs() {
        let tokens = tokenize_url("https://ad.example.com/x/analytics.js", 16);
        // "ad", "x" and "js" are below MIN_TOKEN_LEN
        let hashes: Vec<u32> = tokens.iter().map(|t| t.hash).collect();
        assert!(hashes.contains(&hash_token(b"example")));
        assert!(hashes.contains(&hash_token(b"analytics")));
        assert!(!hashes.contains(&hash_token(b"ad")));
    }

    #[test]
    fn pattern_and_url_tokens_agree() {
        let url_tokens = tokenize_url("https://cdn.example.com/tracker.js", 16);
        let pat_tokens = tokenize_pattern("/tracker.", 16);
        assert_eq!(pat_tokens.len(), 1);
        assert!(url_tokens.iter().any(|t| t.hash == pat_tokens[0].hash));
    }

    #[test]
    fn truncation_keeps_sides_compatible() {
        // Token longer than the cap hashes the same from either side.
        let url_tokens = tokenize_url("https://x.test/verylongtokenname123", 7);
        let pat_tokens = tokenize_pattern("verylongtokenname123", 7);
        assert!(url_tokens.iter().any(|t| t.hash == pat_tokens[0].hash));
    }

    #[test]
    fn tokenless_url_yields_empty() {
        assert!(tokenize_url("x", 16).is_empty());
    }
}
