use std::io;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, warn};

use crate::cache::MemoryCacheStore;
use crate::config::HudConfig;
use crate::config_counter::{ConfigCounts, count_configs};
use crate::git::git_branch;
use crate::i18n::translations;
use crate::input::{StdinInput, read_stdin_input};
use crate::render::{self, RenderContext};
use crate::transcript::{FileSource, SessionSnapshot, TranscriptParser, parse_transcript};
use crate::usage::{UsageLimits, fetch_usage_limits};

/// One status line tick: stdin in, rendered lines out.
pub fn run_statusline() -> Result<()> {
    let input = match read_stdin_input(io::stdin().lock()) {
        Ok(input) => input,
        Err(err) => {
            debug!(error = %err, "unusable status line input");
            return render::print_lines(&[render::warning_glyph()])
                .context("failed to write status line");
        }
    };
    let config = HudConfig::load();

    let gathered = gather(&input, &config);
    let ctx = RenderContext {
        input: &input,
        config: &config,
        transcript: &gathered.transcript,
        config_counts: gathered.config_counts,
        git_branch: gathered.git_branch.as_deref(),
        rate_limits: gathered.rate_limits.as_ref(),
        now: Utc::now(),
    };
    let lines = render::render_lines(&ctx, translations(&config));
    render::print_lines(&lines).context("failed to write status line")
}

struct Gathered {
    transcript: SessionSnapshot,
    config_counts: ConfigCounts,
    git_branch: Option<String>,
    rate_limits: Option<UsageLimits>,
}

fn gather(input: &StdinInput, config: &HudConfig) -> Gathered {
    let cwd = input.cwd.as_deref();
    let transcript_path = input.transcript_path.as_deref();
    let ttl = config.cache_ttl();

    thread::scope(|scope| {
        let transcript = scope.spawn(move || {
            transcript_path
                .map(parse_transcript)
                .unwrap_or_default()
        });
        let config_counts = scope.spawn(move || count_configs(cwd));
        let branch = scope.spawn(move || git_branch(cwd));
        let rate_limits = scope.spawn(move || fetch_usage_limits(ttl));

        Gathered {
            transcript: join_or_default(transcript, "transcript"),
            config_counts: join_or_default(config_counts, "config counts"),
            git_branch: join_or_default(branch, "git branch"),
            rate_limits: join_or_default(rate_limits, "usage limits"),
        }
    })
}

fn join_or_default<T: Default>(handle: thread::ScopedJoinHandle<'_, T>, aspect: &str) -> T {
    handle.join().unwrap_or_else(|_| {
        warn!(aspect, "status line worker panicked");
        T::default()
    })
}

/// Parses a transcript and prints the snapshot as pretty JSON.
pub fn print_transcript(path: &Path, no_cache: bool) -> Result<()> {
    println!("{}", transcript_json(path, no_cache)?);
    Ok(())
}

fn transcript_json(path: &Path, no_cache: bool) -> Result<String> {
    let snapshot = if no_cache {
        TranscriptParser::with_parts(MemoryCacheStore::default(), FileSource).parse(path)
    } else {
        parse_transcript(path)
    };
    serde_json::to_string_pretty(&snapshot).context("failed to encode snapshot")
}
