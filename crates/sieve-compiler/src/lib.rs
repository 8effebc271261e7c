//! RequestSieve Filter Compiler
//!
//! Turns filter-list text into the compiled entries `sieve-core`
//! indexes, and back out into cacheable compiled-list artifacts.
//!
//! # Modules
//!
//! - `parser`: line-level filter syntax parsing
//! - `compiler`: record compilation and primary token selection
//! - `cache`: the `sieve1` compiled-list artifact format
//! - `engine`: the facade hosts drive (load, freeze, match)

pub mod cache;
pub mod compiler;
pub mod engine;
pub mod parser;

pub use cache::{read_compiled, CacheError, CompiledList, CompiledListWriter, FORMAT_MARKER};
pub use compiler::{compile, select_token, CompileError, CompileOutput};
pub use engine::{check_line, CompileReport, Engine, EngineError, LineCheck, LineError};
pub use parser::{parse_line, FilterRecord, ParseError, ParsedLine, SkipReason};
