//! Medical Image Viewer CLI Tool
//!
//! Renders and exports frames through the viewport engine.

use clap::Parser;
use medimg_view::cli::{run, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
