//! RequestSieve CLI
//!
//! CLI tool for compiling filter lists, validating them and evaluating
//! requests against them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use serde::Serialize;

use sieve_compiler::{check_line, read_compiled, Engine, LineCheck, FORMAT_MARKER};
use sieve_core::index::{IndexConfig, DEFAULT_MAX_TOKEN_LEN};
use sieve_core::types::{DecisionAction, FilterAction, RequestDescriptor, RequestType};

#[derive(Parser)]
#[command(name = "sieve-cli")]
#[command(about = "RequestSieve filter list compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists into cacheable compiled-list artifacts
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output directory for the compiled artifacts
        #[arg(short, long, default_value = ".")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check a filter list, reporting rejected and catch-all lines
    Check {
        /// Filter list file to check
        #[arg(short, long)]
        input: String,
    },

    /// Dump compiled artifact info
    Info {
        /// Compiled artifact to inspect
        #[arg(short, long)]
        input: String,
    },

    /// Evaluate one request against a set of lists
    Match {
        /// Filter list files, source or compiled
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Request URL
        #[arg(short, long)]
        url: String,

        /// Request type (script, image, xhr, ...)
        #[arg(short = 't', long, default_value = "other")]
        request_type: String,

        /// Hostname of the initiating document
        #[arg(short = 'f', long, default_value = "")]
        from: String,

        /// Emit the decision as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            verbose,
        } => cmd_compile(&input, &output, verbose),
        Commands::Check { input } => cmd_check(&input),
        Commands::Info { input } => cmd_info(&input),
        Commands::Match {
            input,
            url,
            request_type,
            from,
            json,
        } => cmd_match(&input, &url, &request_type, &from, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(inputs: &[String], output: &str, verbose: bool) -> Result<(), String> {
    let out_dir = Path::new(output);
    fs::create_dir_all(out_dir).map_err(|e| format!("Failed to create '{output}': {e}"))?;

    let start = Instant::now();
    let mut total_entries = 0usize;
    let mut total_errors = 0usize;

    for path in inputs {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read '{path}': {e}"))?;
        let name = Path::new(path)
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();

        let mut engine = Engine::new(IndexConfig::default());
        let (report, artifact) = engine
            .compile_list(&name, &content)
            .map_err(|e| format!("Failed to compile '{path}': {e}"))?;

        let out_path: PathBuf = out_dir.join(format!("{name}.sieve"));
        fs::write(&out_path, &artifact)
            .map_err(|e| format!("Failed to write '{}': {e}", out_path.display()))?;

        total_entries += report.compiled;
        total_errors += report.errors.len();

        if verbose {
            println!(
                "  {name}: {} entries, {} suppressions, {} catch-all, {} rejected -> {}",
                report.compiled,
                report.suppressions,
                report.catch_all,
                report.errors.len(),
                out_path.display()
            );
            for err in &report.errors {
                println!("    line {}: {} ({})", err.line_no, err.line, err.error);
            }
        }
    }

    println!(
        "Compiled {} lists: {} entries, {} rejected lines in {:.1}ms",
        inputs.len(),
        total_entries,
        total_errors,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn cmd_check(input: &str) -> Result<(), String> {
    let content =
        fs::read_to_string(input).map_err(|e| format!("Failed to read '{input}': {e}"))?;

    let mut filters = 0usize;
    let mut catch_all = 0usize;
    let mut skipped = 0usize;
    let mut invalid = 0usize;

    for (idx, line) in content.lines().enumerate() {
        match check_line(line, DEFAULT_MAX_TOKEN_LEN) {
            LineCheck::Filter { catch_all: ca } => {
                filters += 1;
                if ca {
                    catch_all += 1;
                    println!("line {}: catch-all (no usable token): {line}", idx + 1);
                }
            }
            LineCheck::Skipped(_) => skipped += 1,
            LineCheck::Invalid(reason) => {
                invalid += 1;
                println!("line {}: rejected: {line} ({reason})", idx + 1);
            }
        }
    }

    println!("{filters} filters ({catch_all} catch-all), {skipped} skipped, {invalid} rejected");
    if invalid > 0 {
        return Err(format!("{invalid} invalid lines"));
    }
    Ok(())
}

fn cmd_info(input: &str) -> Result<(), String> {
    let content =
        fs::read_to_string(input).map_err(|e| format!("Failed to read '{input}': {e}"))?;
    let list = read_compiled(&content, 0).map_err(|e| format!("Invalid artifact: {e}"))?;

    let mut blocks = 0usize;
    let mut allows = 0usize;
    let mut modifies = 0usize;
    let mut badfilters = 0usize;
    let mut regexes = 0usize;
    for entry in &list.entries {
        if entry.is_badfilter() {
            badfilters += 1;
            continue;
        }
        match entry.action {
            FilterAction::Block | FilterAction::Redirect => blocks += 1,
            FilterAction::Allow => allows += 1,
            FilterAction::Removeparam => modifies += 1,
        }
        if entry.kind == sieve_core::types::PatternKind::Regex {
            regexes += 1;
        }
    }

    println!("Compiled list: {}", list.name);
    println!("  Format:        {FORMAT_MARKER}");
    println!("  Max token len: {}", list.max_token_len);
    println!("  Entries:       {}", list.entries.len());
    println!("  Block:         {blocks}");
    println!("  Allow:         {allows}");
    println!("  Modify:        {modifies}");
    println!("  Badfilter:     {badfilters}");
    println!("  Regex:         {regexes}");
    Ok(())
}

#[derive(Serialize)]
struct DecisionOutput {
    action: String,
    filter: Option<String>,
    list: Option<u16>,
}

fn cmd_match(
    inputs: &[String],
    url: &str,
    request_type: &str,
    from: &str,
    json: bool,
) -> Result<(), String> {
    let mut engine = Engine::new(IndexConfig::default());

    for path in inputs {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read '{path}': {e}"))?;
        if content.starts_with(FORMAT_MARKER) {
            engine
                .load_compiled(&content)
                .map_err(|e| format!("Failed to load '{path}': {e}"))?;
        } else {
            let name = Path::new(path)
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            engine
                .compile_list(&name, &content)
                .map_err(|e| format!("Failed to compile '{path}': {e}"))?;
        }
    }
    engine.freeze();

    let request = RequestDescriptor::new(url, RequestType::parse_name(request_type), from);
    let decision = engine
        .match_request(&request)
        .map_err(|e| format!("Match failed: {e}"))?;

    if json {
        let body = DecisionOutput {
            action: decision.action.to_string(),
            filter: decision.matched.as_ref().map(|m| m.filter.clone()),
            list: decision.matched.as_ref().map(|m| m.list_id),
        };
        let rendered =
            serde_json::to_string(&body).map_err(|e| format!("Failed to render JSON: {e}"))?;
        println!("{rendered}");
        return Ok(());
    }

    match decision.action {
        DecisionAction::None => match &decision.matched {
            Some(m) => println!("none (modified by: {} from list {})", m.filter, m.list_id),
            None => println!("none"),
        },
        action => {
            let m = decision.matched.as_ref();
            match m {
                Some(m) => println!("{action} by: {} (list {})", m.filter, m.list_id),
                None => println!("{action}"),
            }
        }
    }
    Ok(())
}
