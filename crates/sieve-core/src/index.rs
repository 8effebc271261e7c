//! The filter index and matching engine.
//!
//! The index is a value with a strict lifecycle: it starts `Building`
//! (mutable, accepting compiled entries and badfilter suppressions),
//! becomes `Frozen` after [`FilterIndex::freeze`] (immutable, matchable,
//! optionally compacted once by [`FilterIndex::optimize`]) and returns
//! to `Building` via [`FilterIndex::reset`]. Matching against a
//! non-frozen index is a caller bug and fails fast rather than
//! reporting a bogus "no match".
//!
//! Rebuilds are copy-on-write by convention: construct and freeze a new
//! index off to the side, then swap it in; a frozen index is never
//! mutated while matches are in flight. A frozen index is `Send + Sync`
//! and can be shared by any number of concurrent matchers.
//!
//! Buckets are keyed by (token hash, resource-type class, anchor
//! class). Entries without a discriminating token (including all regex
//! entries) live in per-type-class catch-all lists that are probed on
//! every request, so the compiler works to keep them rare.

use std::collections::{HashMap, HashSet};

use crate::entry::{CompiledEntry, EntrySignature};
use crate::hash::{hash_domain, Hash64};
use crate::suffix::{is_third_party, suffixes};
use crate::types::{
    Decision, DecisionAction, FilterAction, MatchedFilter, RequestDescriptor, RequestType,
};
use crate::url::{extract_host, host_span, tokenize_url};

/// Default cap on hashed token length. Must be identical at compile
/// time and at match time; the compiled-list cache records it.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 16;

/// Entries whose type mask sets more bits than this go to the Any
/// class instead of one bucket per bit (negated type lists would
/// otherwise fan out across most classes).
const MAX_TYPED_FANOUT: u32 = 4;

/// Caller-contract violations. These are host integration bugs, never
/// data-dependent conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("index is not frozen; freeze() must complete before matching")]
    NotFrozen,
    #[error("index is frozen; reset() before inserting entries")]
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexState {
    Building,
    Frozen,
}

/// Resource-type partition of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TypeClass {
    Any,
    /// Bit index into [`RequestType`]
    Typed(u8),
}

/// Anchor partition of a bucket. Hostname-anchored entries are only
/// reachable from tokens inside the URL's host span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AnchorClass {
    Generic,
    Hostname,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BucketKey {
    token: u32,
    type_class: TypeClass,
    anchor: AnchorClass,
}

/// Index configuration, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct IndexConfig {
    pub max_token_len: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
        }
    }
}

pub struct FilterIndex {
    state: IndexState,
    config: IndexConfig,
    entries: Vec<CompiledEntry>,
    buckets: HashMap<BucketKey, Vec<u32>>,
    catch_all: HashMap<TypeClass, Vec<u32>>,
    suppressions: HashSet<EntrySignature>,
    optimized: bool,
}

impl FilterIndex {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            state: IndexState::Building,
            config,
            entries: Vec::new(),
            buckets: HashMap::new(),
            catch_all: HashMap::new(),
            suppressions: HashSet::new(),
            optimized: false,
        }
    }

    pub fn config(&self) -> IndexConfig {
        self.config
    }

    pub fn is_frozen(&self) -> bool {
        self.state == IndexState::Frozen
    }

    /// Number of live (referenced) entries.
    pub fn entry_count(&self) -> usize {
        let mut seen: HashSet<u32> = HashSet::new();
        for ids in self.buckets.values().chain(self.catch_all.values()) {
            seen.extend(ids.iter().copied());
        }
        seen.len()
    }

    /// Insert one compiled entry under its primary token. `token` is
    /// None for entries that could not be assigned a discriminating
    /// token; those go to the catch-all for their type classes.
    pub fn insert(&mut self, entry: CompiledEntry, token: Option<u32>) -> Result<(), IndexError> {
        if self.state != IndexState::Building {
            return Err(IndexError::Frozen);
        }
        debug_assert!(!entry.is_badfilter(), "badfilter entries are suppressions");

        let id = self.entries.len() as u32;
        let anchor = match entry.kind {
            crate::types::PatternKind::Hostname => AnchorClass::Hostname,
            _ => AnchorClass::Generic,
        };

        let classes = type_classes(entry.type_mask);
        match token {
            Some(token) => {
                for type_class in classes {
                    let key = BucketKey {
                        token,
                        type_class,
                        anchor,
                    };
                    self.buckets.entry(key).or_default().push(id);
                }
            }
            None => {
                for type_class in classes {
                    self.catch_all.entry(type_class).or_default().push(id);
                }
            }
        }

        self.entries.push(entry);
        Ok(())
    }

    /// Record a badfilter suppression, applied when the index freezes.
    pub fn add_suppression(&mut self, signature: EntrySignature) -> Result<(), IndexError> {
        if self.state != IndexState::Building {
            return Err(IndexError::Frozen);
        }
        self.suppressions.insert(signature);
        Ok(())
    }

    /// Transition to the frozen, matchable state. Applies badfilter
    /// suppressions so targeted entries never surface as candidates.
    pub fn freeze(&mut self) {
        if self.state == IndexState::Frozen {
            return;
        }

        if !self.suppressions.is_empty() {
            let suppressed: HashSet<u32> = self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| self.suppressions.contains(&e.signature()))
                .map(|(id, _)| id as u32)
                .collect();

            if !suppressed.is_empty() {
                log::debug!("freeze: suppressing {} badfiltered entries", suppressed.len());
                for ids in self.buckets.values_mut().chain(self.catch_all.values_mut()) {
                    ids.retain(|id| !suppressed.contains(id));
                }
            }
        }
        self.buckets.retain(|_, ids| !ids.is_empty());
        self.catch_all.retain(|_, ids| !ids.is_empty());

        self.state = IndexState::Frozen;
    }

    /// Merge entries that are option-for-option identical, keeping the
    /// most recently loaded provenance so precedence tie-breaks are
    /// unaffected. Idempotent; valid only on a frozen index.
    pub fn optimize(&mut self) -> Result<(), IndexError> {
        if self.state != IndexState::Frozen {
            return Err(IndexError::NotFrozen);
        }
        if self.optimized {
            return Ok(());
        }

        // Representative per signature: the one from the newest list.
        let mut representative: HashMap<EntrySignature, u32> = HashMap::new();
        for (id, entry) in self.entries.iter().enumerate() {
            let id = id as u32;
            representative
                .entry(entry.signature())
                .and_modify(|best| {
                    if entry.list_id > self.entries[*best as usize].list_id {
                        *best = id;
                    }
                })
                .or_insert(id);
        }

        let remap: Vec<u32> = self
            .entries
            .iter()
            .map(|e| representative[&e.signature()])
            .collect();

        // Rewrite references, dropping duplicates while preserving
        // insertion order within each bucket.
        let mut live: HashSet<u32> = HashSet::new();
        for ids in self.buckets.values_mut().chain(self.catch_all.values_mut()) {
            let mut seen: HashSet<u32> = HashSet::with_capacity(ids.len());
            let mut merged: Vec<u32> = Vec::with_capacity(ids.len());
            for &id in ids.iter() {
                let id = remap[id as usize];
                if seen.insert(id) {
                    merged.push(id);
                }
            }
            merged.shrink_to_fit();
            live.extend(merged.iter().copied());
            *ids = merged;
        }

        // Compact the entry table down to live entries.
        let mut new_ids: HashMap<u32, u32> = HashMap::with_capacity(live.len());
        let mut compact: Vec<CompiledEntry> = Vec::with_capacity(live.len());
        for (id, entry) in self.entries.drain(..).enumerate() {
            let id = id as u32;
            if live.contains(&id) {
                new_ids.insert(id, compact.len() as u32);
                compact.push(entry);
            }
        }
        for ids in self.buckets.values_mut().chain(self.catch_all.values_mut()) {
            for id in ids.iter_mut() {
                *id = new_ids[&*id];
            }
        }
        self.entries = compact;
        self.suppressions = HashSet::new();

        self.optimized = true;
        Ok(())
    }

    /// Discard everything and return to the building state.
    pub fn reset(&mut self) {
        self.state = IndexState::Building;
        self.entries = Vec::new();
        self.buckets = HashMap::new();
        self.catch_all = HashMap::new();
        self.suppressions = HashSet::new();
        self.optimized = false;
    }

    /// Evaluate one request. Only errs when called on a non-frozen
    /// index; every URL, however malformed, resolves to a decision.
    pub fn match_request(&self, request: &RequestDescriptor<'_>) -> Result<Decision, IndexError> {
        if self.state != IndexState::Frozen {
            return Err(IndexError::NotFrozen);
        }

        let url = request.url;
        let span = host_span(url);
        let req_host = extract_host(url).unwrap_or("");
        let third_party = is_third_party(req_host, request.initiator_host);
        let initiator_hashes: Vec<Hash64> =
            suffixes(request.initiator_host).map(hash_domain).collect();

        let tokens = tokenize_url(url, self.config.max_token_len);
        let host_end = span.map(|(_, end)| end).unwrap_or(0);

        let type_class = TypeClass::Typed(type_bit(request.request_type));

        let mut resolver = PrecedenceResolver::default();
        let mut seen: HashSet<u32> = HashSet::new();

        let mut probe = |ids: &Vec<u32>, resolver: &mut PrecedenceResolver| {
            for &id in ids {
                if !seen.insert(id) {
                    continue;
                }
                let entry = &self.entries[id as usize];
                if !entry.matches_type(request.request_type)
                    || !entry.matches_party(third_party)
                    || !entry.matches_initiator(&initiator_hashes)
                    || !entry.matches_url(url, span)
                {
                    continue;
                }
                resolver.consider(id, entry);
            }
        };

        for token in &tokens {
            let in_host = token.start < host_end;
            for tc in [type_class, TypeClass::Any] {
                let generic = BucketKey {
                    token: token.hash,
                    type_class: tc,
                    anchor: AnchorClass::Generic,
                };
                if let Some(ids) = self.buckets.get(&generic) {
                    probe(ids, &mut resolver);
                }
                if in_host {
                    let hostname = BucketKey {
                        token: token.hash,
                        type_class: tc,
                        anchor: AnchorClass::Hostname,
                    };
                    if let Some(ids) = self.buckets.get(&hostname) {
                        probe(ids, &mut resolver);
                    }
                }
            }
        }

        for tc in [type_class, TypeClass::Any] {
            if let Some(ids) = self.catch_all.get(&tc) {
                probe(ids, &mut resolver);
            }
        }

        Ok(resolver.resolve(&self.entries))
    }
}

/// Bit index of a (single-bit) request type.
#[inline]
fn type_bit(request_type: RequestType) -> u8 {
    request_type.bits().trailing_zeros() as u8
}

/// Bucket classes an entry's type mask maps to.
fn type_classes(mask: RequestType) -> Vec<TypeClass> {
    if mask == RequestType::ALL || mask.bits().count_ones() > MAX_TYPED_FANOUT {
        return vec![TypeClass::Any];
    }
    let mut classes = Vec::with_capacity(mask.bits().count_ones() as usize);
    for bit in 0..16u8 {
        if mask.bits() & (1 << bit) != 0 {
            classes.push(TypeClass::Typed(bit));
        }
    }
    classes
}

// =============================================================================
// Precedence
// =============================================================================

/// Tracks the best candidate per action class while candidates stream
/// in, so resolution is independent of bucket iteration order.
#[derive(Default)]
struct PrecedenceResolver {
    important_block: Option<Candidate>,
    allow: Option<Candidate>,
    block: Option<Candidate>,
    modify: Option<Candidate>,
}

#[derive(Clone, Copy)]
struct Candidate {
    id: u32,
    /// (pattern length, list recency): longer patterns are more
    /// specific; ties go to the most recently loaded list.
    rank: (usize, u16),
}

impl PrecedenceResolver {
    fn consider(&mut self, id: u32, entry: &CompiledEntry) {
        let candidate = Candidate {
            id,
            rank: (entry.pattern.len(), entry.list_id),
        };
        let slot = match entry.action {
            FilterAction::Block | FilterAction::Redirect => {
                if entry.is_important() {
                    &mut self.important_block
                } else {
                    &mut self.block
                }
            }
            FilterAction::Allow => &mut self.allow,
            FilterAction::Removeparam => &mut self.modify,
        };
        if slot.map_or(true, |best| candidate.rank > best.rank) {
            *slot = Some(candidate);
        }
    }

    fn resolve(self, entries: &[CompiledEntry]) -> Decision {
        let summarize = |c: Candidate| {
            let entry = &entries[c.id as usize];
            MatchedFilter {
                filter: entry.to_filter_text(),
                list_id: entry.list_id,
                action: entry.action,
            }
        };

        if let Some(c) = self.important_block {
            return Decision {
                action: DecisionAction::Block,
                matched: Some(summarize(c)),
            };
        }
        if let Some(c) = self.allow {
            return Decision {
                action: DecisionAction::Allow,
                matched: Some(summarize(c)),
            };
        }
        if let Some(c) = self.block {
            return Decision {
                action: DecisionAction::Block,
                matched: Some(summarize(c)),
            };
        }
        // A pure modify match does not block or allow; the summary lets
        // the host apply the modification.
        if let Some(c) = self.modify {
            return Decision {
                action: DecisionAction::None,
                matched: Some(summarize(c)),
            };
        }
        Decision::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntryFlags, PartyMask, PatternKind};
    use crate::url::tokenize_pattern;

    fn make_entry(
        action: FilterAction,
        kind: PatternKind,
        flags: EntryFlags,
        pattern: &str,
        list_id: u16,
    ) -> CompiledEntry {
        CompiledEntry::new(
            action,
            kind,
            flags,
            RequestType::ALL,
            PartyMask::ALL,
            pattern,
            None,
            None,
            list_id,
        )
        .unwrap()
    }

    fn primary_token(pattern: &str) -> Option<u32> {
        tokenize_pattern(pattern, DEFAULT_MAX_TOKEN_LEN)
            .iter()
            .max_by_key(|t| t.len)
            .map(|t| t.hash)
    }

    fn insert(index: &mut FilterIndex, entry: CompiledEntry) {
        let token = primary_token(&entry.pattern);
        index.insert(entry, token).unwrap();
    }

    fn req<'a>(url: &'a str, initiator: &'a str) -> RequestDescriptor<'a> {
        RequestDescriptor::new(url, RequestType::SCRIPT, initiator)
    }

    #[test]
    fn match_before_freeze_fails_fast() {
        let index = FilterIndex::new(IndexConfig::default());
        let err = index
            .match_request(&req("https://x.com/a.js", "x.com"))
            .unwrap_err();
        assert_eq!(err, IndexError::NotFrozen);
    }

    #[test]
    fn insert_after_freeze_fails_fast() {
        let mut index = FilterIndex::new(IndexConfig::default());
        index.freeze();
        let e = make_entry(FilterAction::Block, PatternKind::Plain, EntryFlags::empty(), "/ads/", 0);
        assert_eq!(index.insert(e, None), Err(IndexError::Frozen));
    }

    #[test]
    fn optimize_before_freeze_fails_fast() {
        let mut index = FilterIndex::new(IndexConfig::default());
        assert_eq!(index.optimize(), Err(IndexError::NotFrozen));
    }

    #[test]
    fn no_match_is_none_not_error() {
        let mut index = FilterIndex::new(IndexConfig::default());
        index.freeze();
        let d = index.match_request(&req("not even a url", "")).unwrap();
        assert_eq!(d, Decision::none());
    }

    #[test]
    fn block_then_allow_precedence() {
        let mut index = FilterIndex::new(IndexConfig::default());
        insert(
            &mut index,
            make_entry(FilterAction::Block, PatternKind::Hostname, EntryFlags::empty(), "ads.example.com^", 0),
        );
        insert(
            &mut index,
            make_entry(FilterAction::Allow, PatternKind::Hostname, EntryFlags::empty(), "ads.example.com^", 0),
        );
        index.freeze();

        let d = index
            .match_request(&req("https://ads.example.com/x.js", "site.example"))
            .unwrap();
        assert_eq!(d.action, DecisionAction::Allow);
    }

    #[test]
    fn important_block_beats_allow() {
        let mut index = FilterIndex::new(IndexConfig::default());
        insert(
            &mut index,
            make_entry(FilterAction::Block, PatternKind::Hostname, EntryFlags::IMPORTANT, "ads.example.com^", 0),
        );
        insert(
            &mut index,
            make_entry(FilterAction::Allow, PatternKind::Hostname, EntryFlags::empty(), "ads.example.com^", 0),
        );
        index.freeze();

        let d = index
            .match_request(&req("https://ads.example.com/x.js", "site.example"))
            .unwrap();
        assert_eq!(d.action, DecisionAction::Block);
    }

    #[test]
    fn reset_returns_to_building() {
        let mut index = FilterIndex::new(IndexConfig::default());
        insert(
            &mut index,
            make_entry(FilterAction::Block, PatternKind::Plain, EntryFlags::empty(), "/banner/", 0),
        );
        index.freeze();
        index.reset();
        assert!(!index.is_frozen());
        assert_eq!(index.entry_count(), 0);
        // and inserting works again
        insert(
            &mut index,
            make_entry(FilterAction::Block, PatternKind::Plain, EntryFlags::empty(), "/banner/", 0),
        );
    }

    #[test]
    fn regex_goes_to_catch_all_and_matches() {
        let mut index = FilterIndex::new(IndexConfig::default());
        let e = make_entry(FilterAction::Block, PatternKind::Regex, EntryFlags::empty(), r"/banner/\d+", 0);
        index.insert(e, None).unwrap();
        index.freeze();

        let d = index
            .match_request(&req("https://x.com/banner/123", "site.example"))
            .unwrap();
        assert_eq!(d.action, DecisionAction::Block);
    }

    #[test]
    fn optimize_merges_identical_entries() {
        let mut index = FilterIndex::new(IndexConfig::default());
        for list_id in 0..3 {
            insert(
                &mut index,
                make_entry(FilterAction::Block, PatternKind::Plain, EntryFlags::empty(), "/banner/", list_id),
            );
        }
        index.freeze();
        index.optimize().unwrap();
        assert_eq!(index.entry_count(), 1);
        // idempotent
        index.optimize().unwrap();
        assert_eq!(index.entry_count(), 1);

        let d = index
            .match_request(&req("https://x.com/banner/a.js", "site.example"))
            .unwrap();
        assert_eq!(d.action, DecisionAction::Block);
        // merged entry keeps the newest provenance
        assert_eq!(d.matched.unwrap().list_id, 2);
    }

    #[test]
    fn badfilter_suppresses_target() {
        let mut index = FilterIndex::new(IndexConfig::default());
        let target = make_entry(FilterAction::Block, PatternKind::Plain, EntryFlags::empty(), "/banner/", 0);
        let mut bad = target.clone();
        bad.flags |= EntryFlags::BADFILTER;
        let signature = bad.signature();

        insert(&mut index, target);
        index.add_suppression(signature).unwrap();
        index.freeze();

        let d = index
            .match_request(&req("https://x.com/banner/a.js", "site.example"))
            .unwrap();
        assert_eq!(d.action, DecisionAction::None);
    }
}
