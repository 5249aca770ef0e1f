//! sdtgen - Syntax Directed Translator Generator
//!
//! Generates a deterministic scanner, an LALR(1) parser, and automatic
//! locally least-cost error repair tables from a declarative grammar
//! description.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sdtgen::cli::{self, Args};

fn main() {
    let args = Args::parse();
    let default = if args.verbose { "sdtgen=info" } else { "sdtgen=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = cli::run(&args) {
        eprintln!("{error}");
        process::exit(1);
    }
}
