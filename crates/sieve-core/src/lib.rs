//! RequestSieve Core Library
//!
//! This crate provides the request-filtering decision engine of
//! RequestSieve: the token-indexed filter index and everything the hot
//! path needs to evaluate one request against hundreds of thousands of
//! compiled filters in a handful of bucket probes.
//!
//! # Architecture
//!
//! Filters are compiled (by `sieve-compiler`) into [`CompiledEntry`]
//! values and inserted into a [`FilterIndex`] under a primary token.
//! The index follows a Building -> Frozen lifecycle: once frozen it is
//! immutable and `Send + Sync`, so matching runs concurrently without
//! locks; updates build a fresh index and swap it in.
//!
//! # Modules
//!
//! - `hash`: Murmur3 hash functions for token and domain keys
//! - `url`: URL scanning and tokenization without allocations
//! - `suffix`: registrable-domain heuristics for party classification
//! - `types`: shared type definitions
//! - `entry`: compiled entries and pattern verification
//! - `index`: the bucketed index and matching engine

pub mod entry;
pub mod hash;
pub mod index;
pub mod suffix;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use entry::{CompiledEntry, EntrySignature, MAX_PATTERN_LEN};
pub use hash::{hash64, hash_domain, hash_token, Hash64};
pub use index::{FilterIndex, IndexConfig, IndexError, DEFAULT_MAX_TOKEN_LEN};
pub use suffix::{is_third_party, registrable_domain};
pub use types::{
    Decision, DecisionAction, EntryFlags, FilterAction, MatchedFilter, PartyMask, PatternKind,
    RequestDescriptor, RequestType,
};
