use anyhow::Context;
use colored::Colorize;
use std::process::ExitCode;

fn main() -> ExitCode {
    match hybridqa::run().context("hybridqa failed") {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".bright_red().bold(), err);
            ExitCode::FAILURE
        }
    }
}
