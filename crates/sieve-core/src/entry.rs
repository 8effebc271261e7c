//! Compiled filter entries.
//!
//! A `CompiledEntry` is the immutable unit the index stores: the packed
//! option set from one parsed filter plus enough information to
//! reconstruct the filter text for diagnostics. Entries are created by
//! the compiler (or the compiled-list reader) and never mutated once
//! inserted.

use regex::{Regex, RegexBuilder};

use crate::hash::{hash_domain, Hash64};
use crate::types::{EntryFlags, FilterAction, PartyMask, PatternKind, RequestType};
use crate::url::is_separator;

/// Limit on accepted pattern length; anything longer is rejected at
/// compile time, so this is an invariant here.
pub const MAX_PATTERN_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct CompiledEntry {
    pub action: FilterAction,
    pub kind: PatternKind,
    pub flags: EntryFlags,
    pub type_mask: RequestType,
    pub party: PartyMask,
    /// Normalized pattern body: anchors stripped, wildcard runs
    /// collapsed. For `Regex` entries this is the regex source.
    pub pattern: Box<str>,
    /// Raw `domain=` option value, kept verbatim for diagnostics and
    /// serialization; the hashed sets below are derived from it.
    pub domains_raw: Option<Box<str>>,
    /// Payload for Redirect (resource name) and Removeparam (key list).
    pub payload: Option<Box<str>>,
    /// Identity of the source list, by load order.
    pub list_id: u16,

    domains_include: Vec<Hash64>,
    domains_exclude: Vec<Hash64>,
    regex: Option<Regex>,
}

impl CompiledEntry {
    /// Assemble an entry. Fails only for `Regex` entries whose source
    /// does not compile.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        action: FilterAction,
        kind: PatternKind,
        flags: EntryFlags,
        type_mask: RequestType,
        party: PartyMask,
        pattern: &str,
        domains_raw: Option<&str>,
        payload: Option<&str>,
        list_id: u16,
    ) -> Result<Self, regex::Error> {
        let regex = if kind == PatternKind::Regex {
            Some(
                RegexBuilder::new(pattern)
                    .case_insensitive(!flags.contains(EntryFlags::MATCH_CASE))
                    .size_limit(1 << 20)
                    .build()?,
            )
        } else {
            None
        };

        let (domains_include, domains_exclude) = match domains_raw {
            Some(raw) => hash_domain_option(raw),
            None => (Vec::new(), Vec::new()),
        };

        Ok(Self {
            action,
            kind,
            flags,
            type_mask,
            party,
            pattern: pattern.into(),
            domains_raw: domains_raw.map(Into::into),
            payload: payload.map(Into::into),
            list_id,
            domains_include,
            domains_exclude,
            regex,
        })
    }

    /// Identity of the entry for badfilter suppression and merge
    /// purposes: everything except provenance and the badfilter bit.
    pub fn signature(&self) -> EntrySignature {
        EntrySignature {
            action: self.action,
            kind: self.kind,
            flags: self.flags & !EntryFlags::BADFILTER,
            type_mask: self.type_mask,
            party: self.party,
            pattern: self.pattern.clone(),
            domains_raw: self.domains_raw.clone(),
            payload: self.payload.clone(),
        }
    }

    pub fn is_badfilter(&self) -> bool {
        self.flags.contains(EntryFlags::BADFILTER)
    }

    pub fn is_important(&self) -> bool {
        self.flags.contains(EntryFlags::IMPORTANT)
    }

    /// Does the request type pass this entry's mask?
    #[inline]
    pub fn matches_type(&self, request_type: RequestType) -> bool {
        self.type_mask.intersects(request_type)
    }

    /// Does the party relation pass?
    #[inline]
    pub fn matches_party(&self, third_party: bool) -> bool {
        let request_party = if third_party {
            PartyMask::THIRD_PARTY
        } else {
            PartyMask::FIRST_PARTY
        };
        self.party.intersects(request_party)
    }

    /// Check `domain=` constraints against the pre-hashed suffixes of
    /// the initiator host. An exclusion wins over any inclusion.
    pub fn matches_initiator(&self, initiator_suffix_hashes: &[Hash64]) -> bool {
        if self
            .domains_exclude
            .iter()
            .any(|h| initiator_suffix_hashes.contains(h))
        {
            return false;
        }
        if self.domains_include.is_empty() {
            return true;
        }
        self.domains_include
            .iter()
            .any(|h| initiator_suffix_hashes.contains(h))
    }

    /// Verify the pattern occurs in `url` at a position consistent with
    /// the anchor kind. `host_span` is the hostname byte range of the
    /// URL, needed for hostname-anchored entries.
    pub fn matches_url(&self, url: &str, host_span: Option<(usize, usize)>) -> bool {
        if let Some(re) = &self.regex {
            return re.is_match(url);
        }

        let case_sensitive = self.flags.contains(EntryFlags::MATCH_CASE);
        let m = PatternMatcher {
            url: url.as_bytes(),
            pattern: self.pattern.as_bytes(),
            case_sensitive,
        };

        match self.kind {
            PatternKind::Regex => unreachable!("regex entries carry a compiled regex"),
            PatternKind::Plain => m.find_from(0, false).is_some(),
            PatternKind::Left => m.match_at(0, false).is_some(),
            PatternKind::Both => matches!(m.match_at(0, true), Some(end) if end == url.len()),
            PatternKind::Right => m.find_right_anchored(),
            PatternKind::Hostname => {
                let (host_start, host_end) = match host_span {
                    Some(span) => span,
                    None => return false,
                };
                // Anchor at the host start or at any label boundary
                // inside the host.
                let bytes = url.as_bytes();
                let mut pos = host_start;
                while pos <= host_end {
                    if m.match_at(pos, false).is_some() {
                        return true;
                    }
                    match bytes[pos..host_end].iter().position(|&b| b == b'.') {
                        Some(dot) => pos = pos + dot + 1,
                        None => return false,
                    }
                }
                false
            }
        }
    }

    /// Reconstruct a human-readable filter text for diagnostics. This is
    /// a normalized rendition, not the original bytes.
    pub fn to_filter_text(&self) -> String {
        let mut out = String::new();
        if self.action == FilterAction::Allow {
            out.push_str("@@");
        }
        match self.kind {
            PatternKind::Plain => out.push_str(&self.pattern),
            PatternKind::Hostname => {
                out.push_str("||");
                out.push_str(&self.pattern);
            }
            PatternKind::Left => {
                out.push('|');
                out.push_str(&self.pattern);
            }
            PatternKind::Right => {
                out.push_str(&self.pattern);
                out.push('|');
            }
            PatternKind::Both => {
                out.push('|');
                out.push_str(&self.pattern);
                out.push('|');
            }
            PatternKind::Regex => {
                out.push('/');
                out.push_str(&self.pattern);
                out.push('/');
            }
        }

        let mut opts: Vec<String> = Vec::new();
        if self.type_mask != RequestType::ALL {
            for (name, bit) in TYPE_NAMES {
                if self.type_mask.contains(*bit) {
                    opts.push((*name).to_string());
                }
            }
        }
        match self.party {
            PartyMask::FIRST_PARTY => opts.push("~third-party".to_string()),
            PartyMask::THIRD_PARTY => opts.push("third-party".to_string()),
            _ => {}
        }
        if self.flags.contains(EntryFlags::IMPORTANT) {
            opts.push("important".to_string());
        }
        if self.flags.contains(EntryFlags::MATCH_CASE) {
            opts.push("match-case".to_string());
        }
        if self.flags.contains(EntryFlags::BADFILTER) {
            opts.push("badfilter".to_string());
        }
        if let Some(raw) = &self.domains_raw {
            opts.push(format!("domain={raw}"));
        }
        match (self.action, &self.payload) {
            (FilterAction::Redirect, Some(p)) => opts.push(format!("redirect={p}")),
            (FilterAction::Removeparam, Some(p)) => opts.push(format!("removeparam={p}")),
            _ => {}
        }

        if !opts.is_empty() {
            out.push('$');
            out.push_str(&opts.join(","));
        }
        out
    }
}

const TYPE_NAMES: &[(&str, RequestType)] = &[
    ("script", RequestType::SCRIPT),
    ("image", RequestType::IMAGE),
    ("stylesheet", RequestType::STYLESHEET),
    ("document", RequestType::DOCUMENT),
    ("subdocument", RequestType::SUBDOCUMENT),
    ("xmlhttprequest", RequestType::XHR),
    ("font", RequestType::FONT),
    ("media", RequestType::MEDIA),
    ("websocket", RequestType::WEBSOCKET),
    ("ping", RequestType::PING),
    ("other", RequestType::OTHER),
];

/// Exact pattern+option identity, used as the badfilter suppression key
/// and the optimize() merge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntrySignature {
    action: FilterAction,
    kind: PatternKind,
    flags: EntryFlags,
    type_mask: RequestType,
    party: PartyMask,
    pattern: Box<str>,
    domains_raw: Option<Box<str>>,
    payload: Option<Box<str>>,
}

fn hash_domain_option(raw: &str) -> (Vec<Hash64>, Vec<Hash64>) {
    let mut include = Vec::new();
    let mut exclude = Vec::new();
    for part in raw.split('|') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.strip_prefix('~') {
            Some(rest) => exclude.push(hash_domain(rest)),
            None => include.push(hash_domain(part)),
        }
    }
    (include, exclude)
}

// =============================================================================
// Wildcard pattern verification
// =============================================================================

/// Matches a normalized pattern (literal bytes, `*` wildcards, `^`
/// separators) against URL bytes.
struct PatternMatcher<'a> {
    url: &'a [u8],
    pattern: &'a [u8],
    case_sensitive: bool,
}

impl<'a> PatternMatcher<'a> {
    #[inline]
    fn byte_eq(&self, a: u8, b: u8) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(&b)
        }
    }

    /// Match one literal-or-`^` segment at `pos`. Returns the end
    /// position on success. `at_end` requires the segment to consume
    /// the URL exactly (a trailing `^` may stand in for end-of-input).
    fn match_segment_at(&self, seg: &[u8], mut pos: usize, at_end: bool) -> Option<usize> {
        for (i, &p) in seg.iter().enumerate() {
            if p == b'^' {
                if pos == self.url.len() {
                    // ^ can close the URL only as the final pattern byte
                    if i + 1 == seg.len() {
                        return Some(pos);
                    }
                    return None;
                }
                if !is_separator(self.url[pos]) {
                    return None;
                }
                pos += 1;
            } else {
                if pos >= self.url.len() || !self.byte_eq(self.url[pos], p) {
                    return None;
                }
                pos += 1;
            }
        }
        if at_end && pos != self.url.len() {
            return None;
        }
        Some(pos)
    }

    /// Split the pattern on `*` and match segments left to right,
    /// starting exactly at `start`.
    fn match_at(&self, start: usize, at_end: bool) -> Option<usize> {
        let mut segments = self.pattern.split(|&b| b == b'*').peekable();
        let first = segments.next().unwrap_or(&[]);
        let any_wildcard = self.pattern.contains(&b'*');

        let mut pos = self.match_segment_at(first, start, at_end && !any_wildcard)?;

        while let Some(seg) = segments.next() {
            let last = segments.peek().is_none();
            if seg.is_empty() {
                // trailing or doubled *; trailing * matches anything
                if last && at_end {
                    return Some(self.url.len());
                }
                continue;
            }
            pos = self.find_segment_from(seg, pos, last && at_end)?;
        }
        Some(pos)
    }

    /// Find the leftmost position >= `from` where the whole pattern
    /// matches. `at_end` constrains the match to finish at the URL end.
    fn find_from(&self, from: usize, at_end: bool) -> Option<usize> {
        for start in from..=self.url.len() {
            if let Some(end) = self.match_at(start, at_end) {
                return Some(end);
            }
        }
        None
    }

    /// Find the leftmost position >= `from` where one segment matches.
    fn find_segment_from(&self, seg: &[u8], from: usize, at_end: bool) -> Option<usize> {
        for start in from..=self.url.len() {
            if let Some(end) = self.match_segment_at(seg, start, at_end) {
                if !at_end || end == self.url.len() {
                    return Some(end);
                }
            }
        }
        None
    }

    /// Right-anchored match: pattern may float, but must finish at the
    /// URL end.
    fn find_right_anchored(&self) -> bool {
        self.find_from(0, true).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: PatternKind, pattern: &str) -> CompiledEntry {
        CompiledEntry::new(
            FilterAction::Block,
            kind,
            EntryFlags::empty(),
            RequestType::ALL,
            PartyMask::ALL,
            pattern,
            None,
            None,
            0,
        )
        .unwrap()
    }

    fn host(url: &str) -> Option<(usize, usize)> {
        crate::url::host_span(url)
    }

    #[test]
    fn plain_substring() {
        let e = entry(PatternKind::Plain, "/banner/");
        assert!(e.matches_url("https://x.com/banner/ad.png", host("https://x.com/banner/ad.png")));
        assert!(!e.matches_url("https://x.com/header/ad.png", host("https://x.com/header/ad.png")));
    }

    #[test]
    fn hostname_anchor_matches_labels() {
        let e = entry(PatternKind::Hostname, "ads.example.com^");
        let url = "https://ads.example.com/x.js";
        assert!(e.matches_url(url, host(url)));
        let url2 = "https://sub.ads.example.com/x.js";
        assert!(e.matches_url(url2, host(url2)));
        // must not match mid-label
        let url3 = "https://badads.example.com/x.js";
        assert!(!e.matches_url(url3, host(url3)));
        // must not match in the path
        let url4 = "https://ok.com/ads.example.com/x.js";
        assert!(!e.matches_url(url4, host(url4)));
    }

    #[test]
    fn left_and_right_anchors() {
        let left = entry(PatternKind::Left, "https://cdn.");
        assert!(left.matches_url("https://cdn.x.com/a", host("https://cdn.x.com/a")));
        assert!(!left.matches_url("http://y.com/https://cdn.", host("http://y.com/https://cdn.")));

        let right = entry(PatternKind::Right, ".swf");
        assert!(right.matches_url("https://x.com/movie.swf", host("https://x.com/movie.swf")));
        assert!(!right.matches_url("https://x.com/movie.swf?x=1", host("https://x.com/movie.swf?x=1")));
    }

    #[test]
    fn separator_caret() {
        let e = entry(PatternKind::Hostname, "example.com^");
        assert!(e.matches_url("https://example.com/", host("https://example.com/")));
        // ^ matches end of URL too
        assert!(e.matches_url("https://example.com", host("https://example.com")));
        assert!(!e.matches_url("https://example.company/", host("https://example.company/")));
    }

    #[test]
    fn wildcards() {
        let e = entry(PatternKind::Plain, "/ads/*/banner");
        let url = "https://x.com/ads/v2/banner.png";
        assert!(e.matches_url(url, host(url)));
        let miss = "https://x.com/ads/v2/header.png";
        assert!(!e.matches_url(miss, host(miss)));

        let multi = entry(PatternKind::Plain, "track*pixel*gif");
        let url2 = "https://t.co/tracker/pixel.gif";
        assert!(multi.matches_url(url2, host(url2)));
    }

    #[test]
    fn regex_entry() {
        let e = entry(PatternKind::Regex, r"ads?/banner/\d+");
        let url = "https://x.com/ad/banner/123";
        assert!(e.matches_url(url, host(url)));
        let miss = "https://x.com/ad/banner/abc";
        assert!(!e.matches_url(miss, host(miss)));
    }

    #[test]
    fn invalid_regex_rejected() {
        let r = CompiledEntry::new(
            FilterAction::Block,
            PatternKind::Regex,
            EntryFlags::empty(),
            RequestType::ALL,
            PartyMask::ALL,
            "(unclosed",
            None,
            None,
            0,
        );
        assert!(r.is_err());
    }

    #[test]
    fn case_insensitive_by_default() {
        let e = entry(PatternKind::Plain, "/Banner/");
        let url = "https://x.com/bAnNeR/a.png";
        assert!(e.matches_url(url, host(url)));
    }

    #[test]
    fn match_case_flag() {
        let e = CompiledEntry::new(
            FilterAction::Block,
            PatternKind::Plain,
            EntryFlags::MATCH_CASE,
            RequestType::ALL,
            PartyMask::ALL,
            "/Banner/",
            None,
            None,
            0,
        )
        .unwrap();
        assert!(!e.matches_url("https://x.com/banner/a.png", host("https://x.com/banner/a.png")));
        assert!(e.matches_url("https://x.com/Banner/a.png", host("https://x.com/Banner/a.png")));
    }

    #[test]
    fn domain_constraints() {
        use crate::hash::hash_domain;
        use crate::suffix::suffixes;

        let e = CompiledEntry::new(
            FilterAction::Allow,
            PatternKind::Hostname,
            EntryFlags::empty(),
            RequestType::ALL,
            PartyMask::ALL,
            "ads.example.com^",
            Some("trusted.example|~evil.trusted.example"),
            None,
            0,
        )
        .unwrap();

        let hashes = |h: &str| -> Vec<_> { suffixes(h).map(hash_domain).collect() };
        assert!(e.matches_initiator(&hashes("trusted.example")));
        assert!(e.matches_initiator(&hashes("sub.trusted.example")));
        assert!(!e.matches_initiator(&hashes("other.example")));
        // exclusion wins over the matching inclusion
        assert!(!e.matches_initiator(&hashes("evil.trusted.example")));
    }

    #[test]
    fn filter_text_round_trip_shape() {
        let e = CompiledEntry::new(
            FilterAction::Allow,
            PatternKind::Hostname,
            EntryFlags::IMPORTANT,
            RequestType::SCRIPT,
            PartyMask::THIRD_PARTY,
            "ads.example.com^",
            Some("trusted.example"),
            None,
            3,
        )
        .unwrap();
        let text = e.to_filter_text();
        assert!(text.starts_with("@@||ads.example.com^$"));
        assert!(text.contains("script"));
        assert!(text.contains("third-party"));
        assert!(text.contains("important"));
        assert!(text.contains("domain=trusted.example"));
    }

    #[test]
    fn signature_ignores_provenance_and_badfilter_bit() {
        let a = entry(PatternKind::Plain, "/ads/");
        let mut b = a.clone();
        b.list_id = 9;
        b.flags |= EntryFlags::BADFILTER;
        assert_eq!(a.signature(), b.signature());
    }
}
