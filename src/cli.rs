use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "claude-status-hud",
    version,
    about = "Render a Claude Code status line from the host's stdin snapshot"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse a transcript and print the session snapshot as JSON.
    Transcript {
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// Ignore and leave untouched the on-disk parse cache.
        #[arg(long)]
        no_cache: bool,
    },
}
