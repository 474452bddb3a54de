//! stbl - Static site build planner

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = stbl::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
