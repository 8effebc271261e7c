//! Filter list line parser.
//!
//! One line in, one [`ParsedLine`] out. Lines that are not network
//! filters (comments, cosmetic rules, section headers) are skipped with
//! a reason; malformed filters are rejected whole with a [`ParseError`]
//! naming the offending part. A filter with one bad option contributes
//! nothing, rather than a filter with surprising semantics.

use sieve_core::entry::MAX_PATTERN_LEN;
use sieve_core::types::{EntryFlags, FilterAction, PartyMask, PatternKind, RequestType};

/// Structured form of one network filter line, before compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRecord {
    pub action: FilterAction,
    pub kind: PatternKind,
    pub flags: EntryFlags,
    pub type_mask: RequestType,
    pub party: PartyMask,
    /// Normalized pattern: anchors stripped, wildcard runs collapsed,
    /// lowercased unless `match-case`. Regex source for `Regex` kind.
    pub pattern: String,
    /// Raw `domain=` value, pipe-separated, lowercased.
    pub domains_raw: Option<String>,
    /// `redirect=` resource name or `removeparam=` key list.
    pub payload: Option<String>,
}

/// Why a line produced no filter without being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Comment,
    /// Element-hiding and scriptlet rules; out of scope for request
    /// filtering.
    Cosmetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Filter(FilterRecord),
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown or malformed option `{0}`")]
    BadOption(String),
    #[error("type options exclude every request type")]
    EmptyTypeMask,
    #[error("party options exclude both parties")]
    EmptyPartyMask,
    #[error("domain option `{0}` has no usable domain")]
    EmptyDomainOption(String),
    #[error("domain `{0}` is both included and excluded")]
    ContradictoryDomain(String),
    #[error("pattern longer than {MAX_PATTERN_LEN} bytes")]
    PatternTooLong,
    #[error("pattern is empty")]
    EmptyPattern,
}

/// Parse one filter-list line.
pub fn parse_line(line: &str) -> Result<ParsedLine, ParseError> {
    let mut line = line.trim();
    if line.is_empty() {
        return Ok(ParsedLine::Skip(SkipReason::Empty));
    }
    if is_comment_line(line) {
        return Ok(ParsedLine::Skip(SkipReason::Comment));
    }
    if is_cosmetic_line(line) {
        return Ok(ParsedLine::Skip(SkipReason::Cosmetic));
    }

    let mut action = FilterAction::Block;
    if let Some(rest) = line.strip_prefix("@@") {
        action = FilterAction::Allow;
        line = rest.trim_start();
    }

    // Hosts-file lines ("0.0.0.0 ads.example.com") compile to
    // hostname-anchored block filters.
    if action == FilterAction::Block {
        if let Some(domain) = parse_hosts_file_domain(line) {
            return Ok(ParsedLine::Filter(FilterRecord {
                action,
                kind: PatternKind::Hostname,
                flags: EntryFlags::empty(),
                type_mask: RequestType::ALL,
                party: PartyMask::ALL,
                pattern: format!("{}^", domain.to_ascii_lowercase()),
                domains_raw: None,
                payload: None,
            }));
        }
    }

    // A line that is entirely `/regex/` never carries options; `$` is
    // valid regex syntax.
    let (pattern_part, options_text) = if is_bare_regex(line) {
        (line, None)
    } else {
        match line.rfind('$') {
            Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
            None => (line, None),
        }
    };

    let mut options = match options_text {
        Some(text) => parse_options(text)?,
        None => ParsedOptions::default(),
    };

    let (kind, pattern) = normalize_pattern(pattern_part.trim())?;

    if options.redirect.is_some() && action == FilterAction::Block {
        action = FilterAction::Redirect;
    }
    if options.removeparam.is_some() && action == FilterAction::Block {
        action = FilterAction::Removeparam;
    }
    let payload = options.redirect.take().or_else(|| options.removeparam.take());

    let pattern = if kind != PatternKind::Regex && !options.flags.contains(EntryFlags::MATCH_CASE) {
        pattern.to_ascii_lowercase()
    } else {
        pattern
    };

    Ok(ParsedLine::Filter(FilterRecord {
        action,
        kind,
        flags: options.flags,
        type_mask: options.type_mask,
        party: options.party,
        pattern,
        domains_raw: options.domains_raw,
        payload,
    }))
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('!')
        || line.starts_with('[')
        || (line.starts_with('#') && !line.starts_with("##"))
}

fn is_cosmetic_line(line: &str) -> bool {
    line.contains("##") || line.contains("#@#") || line.contains("#?#") || line.contains("#$#")
}

fn is_bare_regex(line: &str) -> bool {
    line.len() > 2 && line.starts_with('/') && line.ends_with('/')
}

/// Recognize `IP whitespace hostname` hosts-file lines.
fn parse_hosts_file_domain(line: &str) -> Option<&str> {
    let mut parts = line.split_whitespace();
    let ip = parts.next()?;
    let host = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if !matches!(ip, "0.0.0.0" | "127.0.0.1" | "::" | "::1") {
        return None;
    }
    if host.is_empty() || !host.contains('.') || !host.bytes().all(is_hostname_byte) {
        return None;
    }
    Some(host)
}

fn is_hostname_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_'
}

/// Classify the anchor syntax and strip it, collapsing wildcard runs.
fn normalize_pattern(raw: &str) -> Result<(PatternKind, String), ParseError> {
    if raw.is_empty() {
        return Err(ParseError::EmptyPattern);
    }
    if raw.len() > MAX_PATTERN_LEN {
        return Err(ParseError::PatternTooLong);
    }

    if is_bare_regex(raw) {
        return Ok((PatternKind::Regex, raw[1..raw.len() - 1].to_string()));
    }

    let mut kind = PatternKind::Plain;
    let mut body = raw;

    if let Some(rest) = body.strip_prefix("||") {
        kind = PatternKind::Hostname;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('|') {
        kind = PatternKind::Left;
        body = rest;
    }

    if let Some(rest) = body.strip_suffix('|') {
        body = rest;
        kind = match kind {
            PatternKind::Left => PatternKind::Both,
            PatternKind::Plain => PatternKind::Right,
            // end-of-URL after a hostname anchor behaves like a final
            // separator
            PatternKind::Hostname => {
                return finish_pattern(
                    PatternKind::Hostname,
                    format!("{}^", collapse_wildcards(body)),
                );
            }
            other => other,
        };
    }

    finish_pattern(kind, collapse_wildcards(body))
}

fn finish_pattern(kind: PatternKind, mut pattern: String) -> Result<(PatternKind, String), ParseError> {
    if kind == PatternKind::Plain {
        // leading and trailing wildcards are no-ops on a floating pattern
        while pattern.starts_with('*') {
            pattern.remove(0);
        }
        while pattern.ends_with('*') {
            pattern.pop();
        }
    }
    if pattern.is_empty() && kind != PatternKind::Plain {
        return Err(ParseError::EmptyPattern);
    }
    Ok((kind, pattern))
}

fn collapse_wildcards(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut prev_star = false;
    for c in body.chars() {
        if c == '*' {
            if prev_star {
                continue;
            }
            prev_star = true;
        } else {
            prev_star = false;
        }
        out.push(c);
    }
    out
}

struct ParsedOptions {
    flags: EntryFlags,
    type_mask: RequestType,
    party: PartyMask,
    domains_raw: Option<String>,
    redirect: Option<String>,
    removeparam: Option<String>,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            flags: EntryFlags::empty(),
            type_mask: RequestType::ALL,
            party: PartyMask::ALL,
            domains_raw: None,
            redirect: None,
            removeparam: None,
        }
    }
}

fn parse_options(text: &str) -> Result<ParsedOptions, ParseError> {
    let mut flags = EntryFlags::empty();
    let mut type_include = 0u16;
    let mut type_exclude = 0u16;
    let mut party_include = 0u8;
    let mut party_exclude = 0u8;
    let mut domains_raw: Option<String> = None;
    let mut redirect: Option<String> = None;
    let mut removeparam: Option<String> = None;

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let lower = raw.to_ascii_lowercase();
        let opt = lower.as_str();

        match opt {
            "important" => {
                flags |= EntryFlags::IMPORTANT;
                continue;
            }
            "badfilter" => {
                flags |= EntryFlags::BADFILTER;
                continue;
            }
            "match-case" | "match_case" => {
                flags |= EntryFlags::MATCH_CASE;
                continue;
            }
            _ => {}
        }

        if let Some(value) = opt.strip_prefix("domain=") {
            validate_domain_option(value)?;
            domains_raw = Some(match domains_raw {
                Some(existing) => format!("{existing}|{value}"),
                None => value.to_string(),
            });
            continue;
        }
        if let Some(value) = opt
            .strip_prefix("redirect=")
            .or_else(|| opt.strip_prefix("redirect-rule="))
        {
            if value.is_empty() {
                return Err(ParseError::BadOption(raw.to_string()));
            }
            redirect = Some(value.to_string());
            continue;
        }
        if let Some(value) = opt.strip_prefix("removeparam=") {
            if value.is_empty() {
                return Err(ParseError::BadOption(raw.to_string()));
            }
            removeparam = Some(value.to_string());
            continue;
        }

        let (negated, name) = match opt.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, opt),
        };
        if name.is_empty() || name.contains('=') {
            return Err(ParseError::BadOption(raw.to_string()));
        }

        if let Some(mask) = request_type_mask(name) {
            if negated {
                type_exclude |= mask.bits();
            } else {
                type_include |= mask.bits();
            }
            continue;
        }
        if let Some(mask) = party_option_mask(name) {
            if negated {
                party_exclude |= mask.bits();
            } else {
                party_include |= mask.bits();
            }
            continue;
        }

        return Err(ParseError::BadOption(raw.to_string()));
    }

    let type_bits = finalize_mask(
        type_include as u32,
        type_exclude as u32,
        RequestType::ALL.bits() as u32,
    )
    .ok_or(ParseError::EmptyTypeMask)? as u16;
    let party_bits = finalize_mask(
        party_include as u32,
        party_exclude as u32,
        PartyMask::ALL.bits() as u32,
    )
    .ok_or(ParseError::EmptyPartyMask)? as u8;

    Ok(ParsedOptions {
        flags,
        type_mask: RequestType::from_bits_truncate(type_bits),
        party: PartyMask::from_bits_truncate(party_bits),
        domains_raw,
        redirect,
        removeparam,
    })
}

/// Resolve include/exclude bit sets against the universe. No includes
/// means "everything not excluded". None when nothing survives.
fn finalize_mask(include: u32, exclude: u32, all: u32) -> Option<u32> {
    let include = include & all;
    let exclude = exclude & all;
    let mask = if include != 0 {
        include & !exclude
    } else {
        all & !exclude
    };
    if mask == 0 {
        return None;
    }
    Some(mask)
}

fn validate_domain_option(value: &str) -> Result<(), ParseError> {
    let mut include: Vec<&str> = Vec::new();
    let mut exclude: Vec<&str> = Vec::new();
    for part in value.split('|') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.strip_prefix('~') {
            Some(rest) if !rest.is_empty() => exclude.push(rest),
            Some(_) => return Err(ParseError::EmptyDomainOption(value.to_string())),
            None => include.push(part),
        }
    }
    if include.is_empty() && exclude.is_empty() {
        return Err(ParseError::EmptyDomainOption(value.to_string()));
    }
    for domain in &include {
        if exclude.contains(domain) {
            return Err(ParseError::ContradictoryDomain((*domain).to_string()));
        }
    }
    Ok(())
}

fn request_type_mask(name: &str) -> Option<RequestType> {
    let mask = match name {
        "script" => RequestType::SCRIPT,
        "image" | "background" => RequestType::IMAGE,
        "stylesheet" | "css" => RequestType::STYLESHEET,
        "document" | "doc" => RequestType::DOCUMENT,
        "subdocument" | "frame" => RequestType::SUBDOCUMENT,
        "xmlhttprequest" | "xhr" => RequestType::XHR,
        "font" => RequestType::FONT,
        "media" => RequestType::MEDIA,
        "websocket" => RequestType::WEBSOCKET,
        "ping" | "beacon" => RequestType::PING,
        "other" => RequestType::OTHER,
        _ => return None,
    };
    Some(mask)
}

fn party_option_mask(name: &str) -> Option<PartyMask> {
    let mask = match name {
        "first-party" | "1p" => PartyMask::FIRST_PARTY,
        "third-party" | "3p" => PartyMask::THIRD_PARTY,
        _ => return None,
    };
    Some(mask)
}
