//! zipnum-query - run one query against a zipnum index or cluster
//!
//! Usage:
//!   zipnum-query <config.json | ALL.summary> <command> [args] [options]
//!
//! Commands:
//!   lookup <key> [--start <key>] [--end <key>]
//!   prefix <prefix> [--exact]
//!   count [--start <key>] [--end <key>]
//!   page <n> [--size <lines>] [--count-only] [--start <key>] [--end <key>]
//!
//! Lines go to stdout; diagnostics go to stderr through `tracing`
//! (filter with `RUST_LOG`).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use zipnum::{CdxIndex, CdxLines, IndexConfig, KeyRange, Page, QueryParams};

const DEFAULT_PAGE_SIZE: u64 = 25;

fn print_usage() {
    println!("Usage: zipnum-query <config.json | summary-file> <command> [args] [options]");
    println!();
    println!("Commands:");
    println!("  lookup <key>       Lines from the block holding <key> onwards");
    println!("  prefix <prefix>    Lines whose key starts with <prefix>");
    println!("  count              Approximate number of blocks in range");
    println!("  page <n>           One page of lines");
    println!();
    println!("Options:");
    println!("  --start <key>      Lower line bound (inclusive)");
    println!("  --end <key>        Upper line bound (exclusive)");
    println!("  --exact            prefix: match the urlkey exactly");
    println!("  --size <n>         page: blocks per page (default {DEFAULT_PAGE_SIZE})");
    println!("  --count-only       page: print the number of pages");
    println!("  --max-blocks <n>   Cap on blocks fetched");
    println!("  --aggregate <n>    Max contiguous blocks merged per read");
    println!("  --dedup <n>        Collapse blocks sharing <n> timestamp digits");
    println!("  --best-status      With --dedup, keep the lowest-status line per group");
    println!("  --loc <file>       Location table (opens as a cluster)");
    println!();
    println!("Flags:");
    println!("  -V, --version      Print version information");
    println!("  -h, --help         Print this help message");
}

fn option<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn numeric_option<T: std::str::FromStr>(args: &[String], name: &str) -> Result<Option<T>> {
    match option(args, name) {
        Some(value) => match value.parse() {
            Ok(n) => Ok(Some(n)),
            Err(_) => bail!("{name} expects a number, got '{value}'"),
        },
        None => Ok(None),
    }
}

fn load_config(target: &str, args: &[String]) -> Result<IndexConfig> {
    let path = PathBuf::from(target);
    let mut config = if path.extension().is_some_and(|ext| ext == "json") {
        IndexConfig::read_from(&path)
            .with_context(|| format!("reading config {}", path.display()))?
    } else {
        IndexConfig::new(path)
    };
    if let Some(loc) = option(args, "--loc") {
        config.loc_path = Some(PathBuf::from(loc));
    }
    // One-shot queries never need the reload thread.
    config.check_interval_ms = 0;
    Ok(config)
}

fn query_params(base: QueryParams, args: &[String]) -> Result<QueryParams> {
    let mut params = base;
    if let Some(n) = numeric_option(args, "--max-blocks")? {
        params = params.with_max_blocks(n);
    }
    if let Some(n) = numeric_option(args, "--aggregate")? {
        params = params.with_max_aggregate_blocks(n);
    }
    if let Some(n) = numeric_option(args, "--dedup")? {
        params = params.with_timestamp_dedup_length(n);
    }
    if args.iter().any(|a| a == "--best-status") {
        params = params.with_best_status_dedup(true);
    }
    Ok(params)
}

fn print_lines(lines: CdxLines) -> u64 {
    let mut printed = 0;
    for line in lines {
        println!("{line}");
        printed += 1;
    }
    printed
}

fn run(args: &[String]) -> Result<()> {
    let target = &args[1];
    let command = args.get(2).map(|s| s.as_str()).unwrap_or("");
    let operand = args.get(3).filter(|a| !a.starts_with("--")).map(|s| s.as_str());

    let config = load_config(target, args)?;
    let index = zipnum::open(&config).with_context(|| format!("opening index {target}"))?;
    let params = query_params(index.default_params(), args)?;
    let range = KeyRange::new(
        option(args, "--start").unwrap_or(""),
        option(args, "--end").unwrap_or(""),
    );

    match command {
        "lookup" => {
            let key = operand.context("lookup needs a <key>")?;
            let n = print_lines(index.lookup_le(key, &range, &params));
            tracing::info!(lines = n, "lookup done");
        }
        "prefix" => {
            let prefix = operand.context("prefix needs a <prefix>")?;
            let exact = args.iter().any(|a| a == "--exact");
            let n = print_lines(index.lookup_prefix(prefix, prefix, exact, &params));
            tracing::info!(lines = n, "prefix done");
        }
        "count" => {
            println!("{}", index.count_lines(&range));
        }
        "page" => {
            let page: u64 = operand
                .context("page needs a page number")?
                .parse()
                .context("page number must be an integer")?;
            let size = numeric_option(args, "--size")?.unwrap_or(DEFAULT_PAGE_SIZE);
            let count_only = args.iter().any(|a| a == "--count-only");
            match index.get_page(&range, page, size, count_only, &params) {
                Page::Count(pages) => println!("{pages}"),
                Page::Lines(lines) => {
                    print_lines(lines);
                }
            }
        }
        "" => bail!("missing command (try --help)"),
        other => bail!("unknown command '{other}' (try --help)"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("zipnum-query {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("zipnum-query {}", env!("CARGO_PKG_VERSION"));
        println!();
        print_usage();
        return Ok(());
    }

    if args.len() < 3 {
        print_usage();
        std::process::exit(1);
    }

    if args[1].starts_with("--") {
        eprintln!("Error: '{}' looks like a flag, not an index path.", args[1]);
        eprintln!();
        eprintln!("Correct usage:");
        eprintln!("  zipnum-query /data/cdx/ALL.summary prefix 'com,example)/' --exact");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    run(&args)
}
