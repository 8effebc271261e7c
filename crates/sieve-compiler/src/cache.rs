//! Compiled-list cache format.
//!
//! A compiled list is a line-oriented text artifact: a format marker,
//! a small property header, then one tab-delimited record per compiled
//! filter. The format exists so hosts can persist the output of a slow
//! list compilation and reload it quickly; it is a cache, not an
//! interchange format, and any structural problem rejects the whole
//! file so the host falls back to recompiling the source list.
//!
//! ```text
//! sieve1
//! name=EasyList
//! max-token-len=16
//!
//! 0\t1\t0\t2047\t3\tads.example.com^\t\t
//! ```
//!
//! Record fields, in order: action, pattern kind, flags, type mask,
//! party mask, pattern, domain option, payload. Numeric fields are
//! decimal; string fields are backslash-escaped. List identity is
//! assigned at load time, by load order, and is deliberately absent
//! from the file.

use std::fmt::Write as _;

use sieve_core::entry::CompiledEntry;
use sieve_core::types::{EntryFlags, FilterAction, PartyMask, PatternKind, RequestType};

/// Format marker of the only supported version.
pub const FORMAT_MARKER: &str = "sieve1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("unsupported compiled-list format `{0}`")]
    BadVersion(String),
    #[error("malformed header at line {0}")]
    BadHeader(usize),
    #[error("line {line}: {reason}")]
    BadRecord { line: usize, reason: String },
}

impl CacheError {
    fn record(line: usize, reason: impl Into<String>) -> Self {
        Self::BadRecord {
            line,
            reason: reason.into(),
        }
    }
}

/// Accumulates compiled records into the text artifact for one list.
#[derive(Debug)]
pub struct CompiledListWriter {
    out: String,
}

impl CompiledListWriter {
    pub fn new(name: &str, max_token_len: usize) -> Self {
        let mut out = String::new();
        // single-line property values; the header is line-oriented too
        let name = name.replace(['\n', '\r'], " ");
        let _ = writeln!(out, "{FORMAT_MARKER}");
        let _ = writeln!(out, "name={name}");
        let _ = writeln!(out, "max-token-len={max_token_len}");
        let _ = writeln!(out);
        Self { out }
    }

    pub fn write_entry(&mut self, entry: &CompiledEntry) {
        let _ = write!(
            self.out,
            "{}\t{}\t{}\t{}\t{}\t",
            entry.action as u8,
            entry.kind as u8,
            entry.flags.bits(),
            entry.type_mask.bits(),
            entry.party.bits(),
        );
        push_escaped(&mut self.out, &entry.pattern);
        self.out.push('\t');
        push_escaped(&mut self.out, entry.domains_raw.as_deref().unwrap_or(""));
        self.out.push('\t');
        push_escaped(&mut self.out, entry.payload.as_deref().unwrap_or(""));
        self.out.push('\n');
    }

    /// Consume the writer, yielding the complete artifact.
    pub fn finish(self) -> String {
        self.out
    }
}

/// A parsed compiled list, ready to feed the index. `list_id` on the
/// returned entries is `assigned_list_id`.
#[derive(Debug)]
pub struct CompiledList {
    pub name: String,
    pub max_token_len: usize,
    pub entries: Vec<CompiledEntry>,
}

/// Parse a compiled-list artifact. Whole-file semantics: the first
/// structural problem fails the load and nothing is returned.
pub fn read_compiled(text: &str, assigned_list_id: u16) -> Result<CompiledList, CacheError> {
    let mut lines = text.lines().enumerate();

    let (_, marker) = lines.next().ok_or_else(|| CacheError::BadVersion(String::new()))?;
    if marker != FORMAT_MARKER {
        return Err(CacheError::BadVersion(marker.to_string()));
    }

    let mut name = String::new();
    let mut max_token_len: Option<usize> = None;
    for (idx, line) in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        let (key, value) = line.split_once('=').ok_or(CacheError::BadHeader(idx + 1))?;
        match key {
            "name" => name = value.to_string(),
            "max-token-len" => {
                let v: usize = value.parse().map_err(|_| CacheError::BadHeader(idx + 1))?;
                if v == 0 || v > 64 {
                    return Err(CacheError::BadHeader(idx + 1));
                }
                max_token_len = Some(v);
            }
            _ => return Err(CacheError::BadHeader(idx + 1)),
        }
    }
    let max_token_len = max_token_len.ok_or(CacheError::BadHeader(1))?;

    let mut entries = Vec::new();
    for (idx, line) in lines {
        if line.is_empty() {
            continue;
        }
        entries.push(parse_record(line, idx + 1, assigned_list_id)?);
    }

    Ok(CompiledList {
        name,
        max_token_len,
        entries,
    })
}

fn parse_record(line: &str, line_no: usize, list_id: u16) -> Result<CompiledEntry, CacheError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 8 {
        return Err(CacheError::record(
            line_no,
            format!("expected 8 fields, found {}", fields.len()),
        ));
    }

    let action: u8 = parse_num(fields[0], line_no, "action")?;
    let action =
        FilterAction::try_from(action).map_err(|_| CacheError::record(line_no, "bad action"))?;
    let kind: u8 = parse_num(fields[1], line_no, "pattern kind")?;
    let kind =
        PatternKind::try_from(kind).map_err(|_| CacheError::record(line_no, "bad pattern kind"))?;
    let flags = EntryFlags::from_bits(parse_num(fields[2], line_no, "flags")?)
        .ok_or_else(|| CacheError::record(line_no, "unknown flag bits"))?;
    let type_mask = RequestType::from_bits(parse_num(fields[3], line_no, "type mask")?)
        .ok_or_else(|| CacheError::record(line_no, "unknown type bits"))?;
    let party = PartyMask::from_bits(parse_num(fields[4], line_no, "party mask")?)
        .ok_or_else(|| CacheError::record(line_no, "unknown party bits"))?;
    if type_mask.is_empty() || party.is_empty() {
        return Err(CacheError::record(line_no, "empty match mask"));
    }

    let pattern = unescape(fields[5], line_no)?;
    let domains = unescape(fields[6], line_no)?;
    let payload = unescape(fields[7], line_no)?;

    CompiledEntry::new(
        action,
        kind,
        flags,
        type_mask,
        party,
        &pattern,
        if domains.is_empty() { None } else { Some(&domains) },
        if payload.is_empty() { None } else { Some(&payload) },
        list_id,
    )
    .map_err(|e| CacheError::record(line_no, format!("invalid regular expression: {e}")))
}

fn parse_num<T: std::str::FromStr>(field: &str, line_no: usize, what: &str) -> Result<T, CacheError> {
    field
        .parse()
        .map_err(|_| CacheError::record(line_no, format!("bad {what} field")))
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn unescape(field: &str, line_no: usize) -> Result<String, CacheError> {
    if !field.contains('\\') {
        return Ok(field.to_string());
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(CacheError::record(line_no, "bad escape sequence")),
        }
    }
    Ok(out)
}
