use std::io;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing_subscriber::{EnvFilter, fmt};

use crate::config;
use crate::i18n::Translations;

/// Diagnostics go to stderr; stdout belongs to the status line.
pub fn setup_tracing() {
    let default_level = if config::debug_enabled() {
        "debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .try_init();
}

/// Upper bound for helper processes (`git`, `security`).
pub const EXEC_TIMEOUT: Duration = Duration::from_secs(3);
const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs `command` to completion, killing it once `timeout` elapses.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    let started = Instant::now();
    loop {
        if child
            .try_wait()
            .with_context(|| format!("failed to poll {program}"))?
            .is_some()
        {
            return child
                .wait_with_output()
                .with_context(|| format!("failed to read {program} output"));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("{program} timed out after {}ms", timeout.as_millis());
        }
        thread::sleep(EXEC_POLL_INTERVAL);
    }
}

pub fn format_tokens(tokens: u64) -> String {
    if tokens >= 1_000_000 {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    } else if tokens >= 1_000 {
        format!("{}K", (tokens as f64 / 1_000.0).round() as u64)
    } else {
        tokens.to_string()
    }
}

pub fn format_cost(cost_usd: f64) -> String {
    if !cost_usd.is_finite() || cost_usd <= 0.0 {
        return "$0.00".to_string();
    }
    format!("${cost_usd:.2}")
}

/// Hours and minutes until `reset_at`, using the locale's short units.
pub fn format_time_remaining(reset_at: DateTime<Utc>, now: DateTime<Utc>, t: &Translations) -> String {
    let remaining = reset_at.signed_duration_since(now);
    if remaining.num_milliseconds() <= 0 {
        return format!("0{}", t.time.short_minutes);
    }
    let hours = remaining.num_hours();
    let minutes = remaining.num_minutes() % 60;
    if hours > 0 {
        format!(
            "{hours}{}{minutes}{}",
            t.time.short_hours, t.time.short_minutes
        )
    } else {
        format!("{minutes}{}", t.time.short_minutes)
    }
}

pub fn format_session_duration(session_start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(start) = session_start else {
        return String::new();
    };
    let minutes = now.signed_duration_since(start).num_minutes();
    if minutes < 1 {
        return "<1m".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}m");
    }
    format!("{}h{}m", minutes / 60, minutes % 60)
}

/// Elapsed time of an invocation; an open invocation counts up to `now`.
pub fn format_elapsed(
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> String {
    let ms = end.unwrap_or(now).signed_duration_since(start).num_milliseconds();
    if ms < 1_000 {
        return "<1s".to_string();
    }
    if ms < 60_000 {
        return format!("{}s", (ms as f64 / 1_000.0).round() as i64);
    }
    let minutes = ms / 60_000;
    let seconds = ((ms % 60_000) as f64 / 1_000.0).round() as i64;
    format!("{minutes}m{seconds}s")
}

pub fn shorten_model_name(name: &str) -> String {
    let trimmed = name.trim();
    let prefix_len = "claude".len();
    let Some(head) = trimmed.get(..prefix_len) else {
        return trimmed.to_string();
    };
    let rest = &trimmed[prefix_len..];
    let at_word_end = rest.is_empty() || rest.starts_with(char::is_whitespace);
    if head.eq_ignore_ascii_case("claude") && at_word_end {
        return rest.trim_start().to_string();
    }
    trimmed.to_string()
}

pub fn truncate(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let head: String = input.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}

/// Keeps the file name of a long path: `/very/long/dir/main.rs` → `.../main.rs`.
pub fn truncate_path(path: &str, max_chars: usize) -> String {
    if path.chars().count() <= max_chars {
        return path.to_string();
    }
    let file_name = path
        .rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path);
    if file_name.chars().count() >= max_chars {
        return truncate(file_name, max_chars);
    }
    format!("...{}{file_name}", std::path::MAIN_SEPARATOR)
}

pub fn context_percent(used_tokens: u64, window_tokens: u64) -> u8 {
    if window_tokens == 0 {
        return 100;
    }
    let pct = (used_tokens as f64 / window_tokens as f64 * 100.0).round();
    pct.min(100.0) as u8
}
