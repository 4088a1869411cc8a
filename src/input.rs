use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tokens reserved by the host for auto-compaction, counted as used.
pub const AUTOCOMPACT_BUFFER: u64 = 45_000;

/// Snapshot the host pipes to the status line command on every tick.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StdinInput {
    pub model: ModelInfo,
    pub context_window: ContextWindow,
    pub cost: CostInfo,
    pub cwd: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub display_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextWindow {
    pub context_window_size: u64,
    pub current_usage: Option<CurrentUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CurrentUsage {
    pub input_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CostInfo {
    pub total_cost_usd: f64,
}

impl CurrentUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.cache_creation_input_tokens + self.cache_read_input_tokens
    }
}

impl ContextWindow {
    /// Tokens counted against the window, including the compaction buffer.
    pub fn used_tokens(&self) -> Option<u64> {
        self.current_usage
            .as_ref()
            .map(|usage| usage.total() + AUTOCOMPACT_BUFFER)
    }
}

pub fn read_stdin_input<R: Read>(mut reader: R) -> Result<StdinInput> {
    let mut raw = String::new();
    reader
        .read_to_string(&mut raw)
        .context("failed to read status line input")?;
    serde_json::from_str(&raw).context("invalid status line JSON")
}
