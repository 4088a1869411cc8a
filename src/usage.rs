//! Subscription rate-limit lookup with a short-lived file cache.

use std::fs;
use std::path::Path;
#[cfg(target_os = "macos")]
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config;
#[cfg(target_os = "macos")]
use crate::util::{EXEC_TIMEOUT, run_with_timeout};

const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const USAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("claude-status-hud/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RateLimitWindow {
    pub utilization: f64,
    #[serde(default)]
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct UsageLimits {
    pub five_hour: Option<RateLimitWindow>,
    pub seven_day: Option<RateLimitWindow>,
    pub seven_day_sonnet: Option<RateLimitWindow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedUsage {
    data: UsageLimits,
    timestamp: DateTime<Utc>,
}

/// Cached limits when fresh enough, otherwise a live fetch. `None` whenever
/// credentials, network or decoding fail.
pub fn fetch_usage_limits(ttl: Duration) -> Option<UsageLimits> {
    let cache_path = config::usage_cache_path();
    if let Some(cached) = load_cached_usage(&cache_path, ttl, Utc::now()) {
        return Some(cached);
    }

    let token = read_access_token()?;
    match request_usage(&token) {
        Ok(limits) => {
            if let Err(err) = save_cached_usage(&cache_path, &limits) {
                debug!(error = %err, "usage cache write failed");
            }
            Some(limits)
        }
        Err(err) => {
            debug!(error = %err, "usage fetch failed");
            None
        }
    }
}

fn load_cached_usage(path: &Path, ttl: Duration, now: DateTime<Utc>) -> Option<UsageLimits> {
    let raw = fs::read_to_string(path).ok()?;
    let cached: CachedUsage = serde_json::from_str(&raw).ok()?;
    let age = now.signed_duration_since(cached.timestamp).to_std().ok()?;
    (age < ttl).then_some(cached.data)
}

fn save_cached_usage(path: &Path, limits: &UsageLimits) -> Result<()> {
    let cached = CachedUsage {
        data: limits.clone(),
        timestamp: Utc::now(),
    };
    let data = serde_json::to_string(&cached)?;
    fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn request_usage(token: &str) -> Result<UsageLimits> {
    let agent = ureq::AgentBuilder::new()
        .timeout(USAGE_FETCH_TIMEOUT)
        .build();
    let body = agent
        .get(USAGE_URL)
        .set("Accept", "application/json")
        .set("Content-Type", "application/json")
        .set("User-Agent", USER_AGENT)
        .set("Authorization", &format!("Bearer {token}"))
        .set("anthropic-beta", "oauth-2025-04-20")
        .call()
        .context("failed to fetch usage limits")?
        .into_string()
        .context("failed to decode usage response as UTF-8")?;
    parse_usage_body(&body)
}

fn parse_usage_body(body: &str) -> Result<UsageLimits> {
    let value: Value = serde_json::from_str(body).context("failed to parse usage response JSON")?;
    Ok(UsageLimits {
        five_hour: parse_window(value.get("five_hour")),
        seven_day: parse_window(value.get("seven_day")),
        seven_day_sonnet: parse_window(value.get("seven_day_sonnet")),
    })
}

fn parse_window(value: Option<&Value>) -> Option<RateLimitWindow> {
    let value = value.filter(|v| !v.is_null())?;
    let utilization = value.get("utilization").and_then(Value::as_f64)?;
    let resets_at = value
        .get("resets_at")
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|dt| dt.with_timezone(&Utc));
    Some(RateLimitWindow {
        utilization,
        resets_at,
    })
}

fn read_access_token() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        if let Some(token) = keychain_access_token() {
            return Some(token);
        }
    }
    let raw = fs::read_to_string(config::credentials_path()).ok()?;
    access_token_from_credentials(&raw)
}

#[cfg(target_os = "macos")]
fn keychain_access_token() -> Option<String> {
    let mut command = Command::new("security");
    command.args(["find-generic-password", "-s", "Claude Code-credentials", "-w"]);
    let output = match run_with_timeout(&mut command, EXEC_TIMEOUT) {
        Ok(output) => output,
        Err(err) => {
            debug!(error = %err, "keychain lookup failed");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    access_token_from_credentials(String::from_utf8_lossy(&output.stdout).trim())
}

fn access_token_from_credentials(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    value
        .get("claudeAiOauth")?
        .get("accessToken")?
        .as_str()
        .map(str::to_string)
        .filter(|token| !token.is_empty())
}
