//! Engine facade tying parser, compiler, cache and index together.
//!
//! Hosts talk to [`Engine`]: feed it filter lists (source text or
//! previously compiled artifacts), freeze it, then evaluate requests.
//! Per-line problems in a source list are diagnostics in the returned
//! report, never load failures; a broken compiled artifact, by
//! contrast, fails the load whole so the host recompiles from source.

use sieve_core::index::{FilterIndex, IndexConfig, IndexError};
use sieve_core::types::{Decision, RequestDescriptor};

use crate::cache::{read_compiled, CacheError, CompiledListWriter};
use crate::compiler::{compile, select_token, CompileOutput};
use crate::parser::{parse_line, ParsedLine, SkipReason};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("compiled list uses max-token-len {found}, engine expects {expected}")]
    TokenLenMismatch { expected: usize, found: usize },
    #[error("list limit reached")]
    TooManyLists,
}

/// One rejected source line.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    pub line_no: usize,
    pub line: String,
    pub error: String,
}

/// Outcome of loading one list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileReport {
    pub list_id: u16,
    /// Entries accepted into the index
    pub compiled: usize,
    /// `$badfilter` records registered
    pub suppressions: usize,
    /// Comment, cosmetic and empty lines
    pub skipped: usize,
    /// Entries that ended up in the catch-all lists
    pub catch_all: usize,
    pub errors: Vec<LineError>,
}

pub struct Engine {
    index: FilterIndex,
    next_list_id: u16,
}

impl Engine {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            index: FilterIndex::new(config),
            next_list_id: 0,
        }
    }

    pub fn index(&self) -> &FilterIndex {
        &self.index
    }

    /// Compile a source filter list into the index, returning the load
    /// report together with the compiled artifact for caching.
    pub fn compile_list(&mut self, name: &str, text: &str) -> Result<(CompileReport, String), EngineError> {
        let list_id = self.claim_list_id()?;
        let max_token_len = self.index.config().max_token_len;
        let mut writer = CompiledListWriter::new(name, max_token_len);
        let mut report = CompileReport {
            list_id,
            ..CompileReport::default()
        };

        for (idx, line) in text.lines().enumerate() {
            let record = match parse_line(line) {
                Ok(ParsedLine::Filter(record)) => record,
                Ok(ParsedLine::Skip(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    report_line(&mut report, idx, line, &e);
                    continue;
                }
            };
            let output = match compile(&record, list_id, max_token_len) {
                Ok(output) => output,
                Err(e) => {
                    report_line(&mut report, idx, line, &e);
                    continue;
                }
            };

            writer.write_entry(output.entry());
            match output {
                CompileOutput::Entry { entry, token } => {
                    if token.is_none() {
                        report.catch_all += 1;
                    }
                    self.index.insert(entry, token)?;
                    report.compiled += 1;
                }
                CompileOutput::Suppression(entry) => {
                    self.index.add_suppression(entry.signature())?;
                    report.suppressions += 1;
                }
            }
        }

        log::debug!(
            "compiled list {} ({name}): {} entries, {} suppressions, {} skipped, {} errors",
            list_id,
            report.compiled,
            report.suppressions,
            report.skipped,
            report.errors.len()
        );
        Ok((report, writer.finish()))
    }

    /// Load a previously compiled artifact. The artifact must have been
    /// produced with the same token-length cap this engine runs with.
    pub fn load_compiled(&mut self, text: &str) -> Result<CompileReport, EngineError> {
        let list_id = self.claim_list_id()?;
        let max_token_len = self.index.config().max_token_len;

        let list = read_compiled(text, list_id)?;
        if list.max_token_len != max_token_len {
            return Err(EngineError::TokenLenMismatch {
                expected: max_token_len,
                found: list.max_token_len,
            });
        }

        let mut report = CompileReport {
            list_id,
            ..CompileReport::default()
        };
        for entry in list.entries {
            if entry.is_badfilter() {
                self.index.add_suppression(entry.signature())?;
                report.suppressions += 1;
                continue;
            }
            let token = select_token(entry.kind, &entry.pattern, max_token_len);
            if token.is_none() {
                report.catch_all += 1;
            }
            self.index.insert(entry, token)?;
            report.compiled += 1;
        }

        log::debug!(
            "loaded compiled list {} ({}): {} entries",
            list_id,
            list.name,
            report.compiled
        );
        Ok(report)
    }

    pub fn freeze(&mut self) {
        self.index.freeze();
    }

    pub fn optimize(&mut self) -> Result<(), IndexError> {
        self.index.optimize()
    }

    /// Drop all loaded lists and return to the building state.
    pub fn reset(&mut self) {
        self.index.reset();
        self.next_list_id = 0;
    }

    pub fn match_request(&self, request: &RequestDescriptor<'_>) -> Result<Decision, IndexError> {
        self.index.match_request(request)
    }

    fn claim_list_id(&mut self) -> Result<u16, EngineError> {
        let id = self.next_list_id;
        self.next_list_id = self.next_list_id.checked_add(1).ok_or(EngineError::TooManyLists)?;
        Ok(id)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

fn report_line(report: &mut CompileReport, idx: usize, line: &str, error: &dyn std::fmt::Display) {
    log::warn!("line {}: rejected filter `{line}`: {error}", idx + 1);
    report.errors.push(LineError {
        line_no: idx + 1,
        line: line.to_string(),
        error: error.to_string(),
    });
}

/// Validation verdict for one line, for interactive checking.
#[derive(Debug, Clone, PartialEq)]
pub enum LineCheck {
    /// A valid network filter. `catch_all` warns that no token could be
    /// selected, so the filter is evaluated against every request.
    Filter { catch_all: bool },
    Skipped(SkipReason),
    Invalid(String),
}

/// Check one filter line without touching an engine.
pub fn check_line(line: &str, max_token_len: usize) -> LineCheck {
    let record = match parse_line(line) {
        Ok(ParsedLine::Filter(record)) => record,
        Ok(ParsedLine::Skip(reason)) => return LineCheck::Skipped(reason),
        Err(e) => return LineCheck::Invalid(e.to_string()),
    };
    match compile(&record, 0, max_token_len) {
        Ok(CompileOutput::Entry { token, .. }) => LineCheck::Filter {
            catch_all: token.is_none(),
        },
        Ok(CompileOutput::Suppression(_)) => LineCheck::Filter { catch_all: false },
        Err(e) => LineCheck::Invalid(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::index::DEFAULT_MAX_TOKEN_LEN;
    use sieve_core::types::{DecisionAction, RequestType};

    const LIST: &str = "\
! title: test list
||ads.example.com^
@@||ads.example.com^$domain=trusted.example
/banner/ads.$image
example.com##.banner
not$a$valid$option$frobnicate
";

    #[test]
    fn compile_list_reports() {
        let mut engine = Engine::default();
        let (report, artifact) = engine.compile_list("test", LIST).unwrap();
        assert_eq!(report.compiled, 3);
        assert_eq!(report.skipped, 2); // comment + cosmetic
        assert_eq!(report.errors.len(), 1);
        assert!(artifact.starts_with("sieve1\n"));
    }

    #[test]
    fn artifact_reloads_into_equivalent_engine() {
        let mut first = Engine::default();
        let (_, artifact) = first.compile_list("test", LIST).unwrap();
        first.freeze();

        let mut second = Engine::default();
        second.load_compiled(&artifact).unwrap();
        second.freeze();

        for (url, initiator, rt) in [
            ("https://ads.example.com/a.js", "news.example", RequestType::SCRIPT),
            ("https://ads.example.com/a.js", "trusted.example", RequestType::SCRIPT),
            ("https://cdn.example.com/banner/ads.png", "news.example", RequestType::IMAGE),
            ("https://cdn.example.com/other.png", "news.example", RequestType::IMAGE),
        ] {
            let req = RequestDescriptor::new(url, rt, initiator);
            assert_eq!(
                first.match_request(&req).unwrap(),
                second.match_request(&req).unwrap(),
                "{url} from {initiator}"
            );
        }
    }

    #[test]
    fn token_len_mismatch_rejected() {
        let mut writer_engine = Engine::new(IndexConfig { max_token_len: 8 });
        let (_, artifact) = writer_engine.compile_list("x", "||ads.example.com^\n").unwrap();

        let mut engine = Engine::default();
        assert!(matches!(
            engine.load_compiled(&artifact),
            Err(EngineError::TokenLenMismatch { expected: 16, found: 8 })
        ));
    }

    #[test]
    fn reset_restarts_list_ids() {
        let mut engine = Engine::default();
        let (r1, _) = engine.compile_list("a", "||x.example^\n").unwrap();
        let (r2, _) = engine.compile_list("b", "||y.example^\n").unwrap();
        assert_eq!((r1.list_id, r2.list_id), (0, 1));
        engine.reset();
        let (r3, _) = engine.compile_list("c", "||z.example^\n").unwrap();
        assert_eq!(r3.list_id, 0);
    }

    #[test]
    fn check_line_verdicts() {
        assert_eq!(
            check_line("! comment", DEFAULT_MAX_TOKEN_LEN),
            LineCheck::Skipped(SkipReason::Comment)
        );
        assert_eq!(
            check_line("||ads.example.com^", DEFAULT_MAX_TOKEN_LEN),
            LineCheck::Filter { catch_all: false }
        );
        assert_eq!(
            check_line("^ad^", DEFAULT_MAX_TOKEN_LEN),
            LineCheck::Filter { catch_all: true }
        );
        assert!(matches!(
            check_line("||x.com^$bogus-option", DEFAULT_MAX_TOKEN_LEN),
            LineCheck::Invalid(_)
        ));
    }

    #[test]
    fn badfilter_across_lists() {
        let mut engine = Engine::default();
        engine.compile_list("base", "||ads.example.com^\n").unwrap();
        engine
            .compile_list("overrides", "||ads.example.com^$badfilter\n")
            .unwrap();
        engine.freeze();

        let req = RequestDescriptor::new(
            "https://ads.example.com/a.js",
            RequestType::SCRIPT,
            "news.example",
        );
        assert_eq!(engine.match_request(&req).unwrap().action, DecisionAction::None);
    }
}
