use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_CACHE_TTL_SECONDS: u64 = 60;
pub const DEBUG_ENV: &str = "CLAUDE_HUD_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HudConfig {
    pub language: Language,
    pub plan: Plan,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    Auto,
    En,
    Ko,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Pro,
    #[default]
    Max,
    Max10,
    Max20,
}

impl Plan {
    pub fn shows_seven_day(self) -> bool {
        matches!(self, Self::Max | Self::Max10 | Self::Max20)
    }

    pub fn shows_seven_day_sonnet(self) -> bool {
        matches!(self, Self::Max | Self::Max20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
        }
    }
}

impl HudConfig {
    /// Falls back to defaults when the file is missing or invalid.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match Self::read(path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(err) => {
                debug!(error = %err, "using default config");
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        Ok(Some(parsed))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }
}

pub fn claude_home() -> PathBuf {
    if let Ok(custom) = env::var("CLAUDE_CONFIG_DIR") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    home_dir().join(".claude")
}

pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_path() -> PathBuf {
    claude_home().join("claude-status-hud.json")
}

pub fn transcript_cache_path() -> PathBuf {
    claude_home().join("claude-status-hud-transcript-cache.json")
}

pub fn git_cache_path() -> PathBuf {
    claude_home().join("claude-status-hud-git-cache.json")
}

pub fn usage_cache_path() -> PathBuf {
    env::temp_dir().join("claude-status-hud-usage.json")
}

pub fn credentials_path() -> PathBuf {
    claude_home().join(".credentials.json")
}

pub fn debug_enabled() -> bool {
    env::var(DEBUG_ENV).is_ok_and(|value| value.trim() == "1")
}
