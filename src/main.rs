use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use claude_status_hud::app;
use claude_status_hud::cli::{Cli, Commands};
use claude_status_hud::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("claude-status-hud error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Transcript { path, no_cache }) => app::print_transcript(&path, no_cache),
        None => app::run_statusline(),
    }
}
