#![forbid(unsafe_code)]

//! `fdupe` — duplicate directory finder CLI entry point.

use clap::Parser;
use folderdupe::cli::Cli;

fn main() {
    let args = Cli::parse();
    if let Err(e) = folderdupe::cli::run(&args) {
        eprintln!("fdupe: {e}");
        std::process::exit(e.exit_code());
    }
}
