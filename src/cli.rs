//! Command-line driver for the table generator.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::Parser;

use crate::error::Result;
use crate::frontend::parse_grammar;
use crate::grammar::FirstSets;
use crate::lalr::{
    display_ancestors, display_collection, display_crossref, display_first, display_productions,
    display_repair, display_table, generate,
};
use crate::tables::ParseTables;

/// Scanner and parser generator with automatic locally least-cost error
/// repair.
#[derive(Debug, Parser)]
#[command(name = "sdtgen")]
pub struct Args {
    /// List the standardized grammar.
    #[arg(short = 'g')]
    grammar: bool,

    /// List the input file as it is parsed.
    #[arg(short = 'l')]
    listing: bool,

    /// Perform an input syntax check only.
    #[arg(short = 'q')]
    check_only: bool,

    /// List token regular expressions (handled by the scanner
    /// generator; accepted for compatibility).
    #[arg(short = 'r')]
    regexes: bool,

    /// List the LR parsing tables.
    #[arg(short = 't')]
    tables: bool,

    /// List shift-reduce and reduce-reduce conflict resolutions.
    #[arg(short = 'v')]
    pub verbose: bool,

    /// List a cross-reference of tokens.
    #[arg(short = 'x')]
    crossref: bool,

    /// Debug listings: a ancestors, e repair values, f first sets,
    /// g productions, i item collection (d, m, n, p, s belong to
    /// external collaborators and are accepted silently).
    #[arg(short = 'd', value_name = "letters")]
    debug: Option<String>,

    /// Tables output file; `-` writes to stdout.
    #[arg(short = 'w', value_name = "out", default_value = "tables.dat")]
    write: String,

    /// Grammar description; stdin when omitted.
    input: Option<PathBuf>,
}

/// Runs the generator.  Returns the process exit code.
pub fn run(args: &Args) -> Result<()> {
    let text = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    if args.listing {
        let mut out = io::stdout().lock();
        for (number, line) in text.lines().enumerate() {
            writeln!(out, "{:6}: {}", number + 1, line)?;
        }
    }

    let front = parse_grammar(&text)?;
    for warning in &front.warnings {
        tracing::warn!("{warning}");
    }
    if args.check_only {
        return Ok(());
    }

    let mut grammar = front.grammar;
    let debug = args.debug.as_deref().unwrap_or("");
    let mut out = io::stdout().lock();

    let tables = generate(&mut grammar)?;

    if args.grammar || debug.contains('g') {
        display_productions(&grammar, &mut out)?;
    }
    if args.crossref {
        display_crossref(&grammar, &mut out)?;
    }
    if debug.contains('f') {
        let first = FirstSets::compute(&grammar);
        display_first(&grammar, &first, &mut out)?;
    }
    if debug.contains('i') {
        display_collection(&grammar, &tables, &mut out)?;
    }
    if debug.contains('a') {
        display_ancestors(&grammar, &tables, &mut out)?;
    }
    if debug.contains('e') {
        display_repair(&grammar, &tables, &mut out)?;
    }
    if args.tables {
        display_table(&grammar, &tables, &mut out)?;
    }

    let parse_tables = ParseTables::build(&grammar, &tables, &front.scan)?;
    if args.write == "-" {
        parse_tables.write(&mut out, false)?;
    } else {
        let mut file = fs::File::create(&args.write)?;
        parse_tables.write(&mut file, false)?;
    }
    Ok(())
}
