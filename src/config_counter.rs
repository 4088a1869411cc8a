//! Counts the instruction files, rules, MCP servers and hooks that apply to
//! the current project.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use walkdir::WalkDir;

use crate::config;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigCounts {
    pub claude_md: usize,
    pub rules: usize,
    pub mcp_servers: usize,
    pub hooks: usize,
}

pub fn count_configs(cwd: Option<&Path>) -> ConfigCounts {
    count_configs_in(&config::home_dir(), &config::claude_home(), cwd)
}

fn count_configs_in(home: &Path, claude_home: &Path, cwd: Option<&Path>) -> ConfigCounts {
    let mut counts = ConfigCounts::default();

    if claude_home.join("CLAUDE.md").is_file() {
        counts.claude_md += 1;
    }
    counts.rules += count_rules(&claude_home.join("rules"));

    let user_settings = claude_home.join("settings.json");
    let user_settings_servers = mcp_server_names(&user_settings);
    counts.mcp_servers += user_settings_servers.len();
    counts.hooks += hook_count(&user_settings);

    // ~/.claude.json repeats servers already declared in settings.json.
    counts.mcp_servers += mcp_server_names(&home.join(".claude.json"))
        .difference(&user_settings_servers)
        .count();

    let Some(cwd) = cwd else {
        return counts;
    };

    for candidate in [
        cwd.join("CLAUDE.md"),
        cwd.join("CLAUDE.local.md"),
        cwd.join(".claude").join("CLAUDE.md"),
        cwd.join(".claude").join("CLAUDE.local.md"),
    ] {
        if candidate.is_file() {
            counts.claude_md += 1;
        }
    }
    counts.rules += count_rules(&cwd.join(".claude").join("rules"));
    counts.mcp_servers += mcp_server_names(&cwd.join(".mcp.json")).len();

    for settings in [
        cwd.join(".claude").join("settings.json"),
        cwd.join(".claude").join("settings.local.json"),
    ] {
        counts.mcp_servers += mcp_server_names(&settings).len();
        counts.hooks += hook_count(&settings);
    }

    counts
}

fn count_rules(rules_dir: &Path) -> usize {
    if !rules_dir.is_dir() {
        return 0;
    }
    WalkDir::new(rules_dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("md"))
        .count()
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn mcp_server_names(path: &Path) -> HashSet<String> {
    read_json(path)
        .as_ref()
        .and_then(|value| value.get("mcpServers"))
        .and_then(Value::as_object)
        .map(|servers| servers.keys().cloned().collect())
        .unwrap_or_default()
}

fn hook_count(path: &Path) -> usize {
    read_json(path)
        .as_ref()
        .and_then(|value| value.get("hooks"))
        .and_then(Value::as_object)
        .map_or(0, |hooks| hooks.len())
}
