//! bfscope CLI Binary
//!
//! Command-line client for inspecting a Buildfarm backplane.

use anyhow::Context;
use bfscope::tooling::cli::{Cli, CliContext};
use clap::Parser;
use std::process;

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context = CliContext::from_cli(cli).context("Error initializing bfscope")?;
    let output = context.execute(&cli.command)?;
    Ok(output)
}

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
