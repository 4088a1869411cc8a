//! Turns the gathered data into the colorized status lines.

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use crossterm::style::{Attribute, Color, SetAttribute, Stylize};

use crate::config::HudConfig;
use crate::config_counter::ConfigCounts;
use crate::i18n::Translations;
use crate::input::StdinInput;
use crate::transcript::{AgentEntry, AgentStatus, SessionSnapshot, TodoStatus, ToolStatus};
use crate::usage::{RateLimitWindow, UsageLimits};
use crate::util::{
    context_percent, format_cost, format_elapsed, format_session_duration, format_time_remaining,
    format_tokens, shorten_model_name, truncate, truncate_path,
};

const PROGRESS_BAR_WIDTH: usize = 10;
const MAX_RUNNING_TOOLS: usize = 2;
const MAX_COMPLETED_TOOL_TYPES: usize = 4;
const MAX_AGENTS_DISPLAY: usize = 3;
const MAX_COMPLETED_AGENTS: usize = 2;
const MAX_AGENT_DESC_LENGTH: usize = 40;
const MAX_TODO_CONTENT_LENGTH: usize = 50;
const MAX_TARGET_LENGTH: usize = 20;
const CONTEXT_WARNING_PERCENT: u8 = 80;
const CONTEXT_CRITICAL_PERCENT: u8 = 90;

pub struct RenderContext<'a> {
    pub input: &'a StdinInput,
    pub config: &'a HudConfig,
    pub transcript: &'a SessionSnapshot,
    pub config_counts: ConfigCounts,
    pub git_branch: Option<&'a str>,
    pub rate_limits: Option<&'a UsageLimits>,
    pub now: DateTime<Utc>,
}

pub fn render_lines(ctx: &RenderContext<'_>, t: &Translations) -> Vec<String> {
    let mut lines = vec![session_line(ctx, t)];
    lines.extend(context_warning_line(ctx, t));
    lines.extend(project_line(ctx));
    lines.extend(activity_line(ctx));
    lines.extend(tools_line(ctx));
    lines.extend(agent_lines(ctx));
    lines.extend(todos_line(ctx, t));
    lines
}

/// Some hosts collapse runs of spaces, so they are sent as non-breaking.
pub fn print_lines(lines: &[String]) -> io::Result<()> {
    let mut out = io::stdout().lock();
    let reset = SetAttribute(Attribute::Reset);
    for line in lines {
        writeln!(out, "{reset}{}", line.replace(' ', "\u{00A0}"))?;
    }
    out.flush()
}

pub fn warning_glyph() -> String {
    "⚠️".yellow().to_string()
}

fn separator() -> String {
    format!(" {} ", "│".dim())
}

fn percent_color(percent: u8) -> Color {
    if percent <= 50 {
        Color::Green
    } else if percent <= 80 {
        Color::Yellow
    } else {
        Color::Red
    }
}

fn progress_bar(percent: u8, width: usize) -> String {
    let filled = ((f64::from(percent) / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    format!(
        "{}{}",
        "█".repeat(filled).with(percent_color(percent)),
        "░".repeat(width - filled).dim()
    )
}

fn session_line(ctx: &RenderContext<'_>, t: &Translations) -> String {
    let mut parts = vec![
        format!("🤖 {}", shorten_model_name(&ctx.input.model.display_name))
            .cyan()
            .to_string(),
    ];

    let window = &ctx.input.context_window;
    let Some(used) = window.used_tokens() else {
        parts.push(t.no_context.dim().to_string());
        return parts.join(&separator());
    };
    let total = window.context_window_size;
    let percent = context_percent(used, total);

    parts.push(progress_bar(percent, PROGRESS_BAR_WIDTH));
    parts.push(format!("{percent}%").with(percent_color(percent)).to_string());
    parts.push(format!("{}/{}", format_tokens(used), format_tokens(total)));
    parts.push(format_cost(ctx.input.cost.total_cost_usd).yellow().to_string());
    parts.extend(rate_limit_section(ctx, t));

    parts.join(&separator())
}

fn rate_limit_section(ctx: &RenderContext<'_>, t: &Translations) -> Option<String> {
    let Some(limits) = ctx.rate_limits else {
        return Some(warning_glyph());
    };

    let mut parts = Vec::new();
    if let Some(window) = &limits.five_hour {
        let mut text = limit_part(t.labels.five_hour, window);
        if let Some(reset_at) = window.resets_at {
            text.push_str(&format!(" ({})", format_time_remaining(reset_at, ctx.now, t)));
        }
        parts.push(text);
    }

    let plan = ctx.config.plan;
    if plan.shows_seven_day()
        && let Some(window) = &limits.seven_day
    {
        parts.push(limit_part(t.labels.seven_day, window));
    }
    if plan.shows_seven_day_sonnet()
        && let Some(window) = &limits.seven_day_sonnet
    {
        parts.push(limit_part(t.labels.seven_day_sonnet, window));
    }

    (!parts.is_empty()).then(|| parts.join(&separator()))
}

fn limit_part(label: &str, window: &RateLimitWindow) -> String {
    let pct = window.utilization.round().clamp(0.0, 100.0) as u8;
    format!("{label}: {}", format!("{pct}%").with(percent_color(pct)))
}

fn context_warning_line(ctx: &RenderContext<'_>, t: &Translations) -> Option<String> {
    let window = &ctx.input.context_window;
    if window.context_window_size == 0 {
        return None;
    }
    let percent = context_percent(window.used_tokens()?, window.context_window_size);
    let pct = percent.to_string();
    if percent >= CONTEXT_CRITICAL_PERCENT {
        Some(format!("🔴 {}", t.context_critical.replace("{pct}", &pct)).red().to_string())
    } else if percent >= CONTEXT_WARNING_PERCENT {
        Some(format!("⚠️ {}", t.context_warning.replace("{pct}", &pct)).yellow().to_string())
    } else {
        None
    }
}

fn project_line(ctx: &RenderContext<'_>) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(cwd) = &ctx.input.cwd {
        let project_name = cwd
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| cwd.display().to_string());
        let mut project = format!("📁 {}", project_name.yellow());
        if let Some(branch) = ctx.git_branch {
            project.push_str(&format!(" {}{}{}", "git:(".magenta(), branch.cyan(), ")".magenta()));
        }
        parts.push(project);
    }

    let counts = ctx.config_counts;
    for (count, label) in [
        (counts.claude_md, "CLAUDE.md"),
        (counts.rules, "rules"),
        (counts.mcp_servers, "MCPs"),
        (counts.hooks, "hooks"),
    ] {
        if count > 0 {
            parts.push(format!("{count} {label}").dim().to_string());
        }
    }

    let duration = format_session_duration(ctx.transcript.session_start, ctx.now);
    if !duration.is_empty() {
        parts.push(format!("⏱️ {duration}").dim().to_string());
    }

    (!parts.is_empty()).then(|| parts.join(&separator()))
}

fn activity_line(ctx: &RenderContext<'_>) -> Option<String> {
    let transcript = ctx.transcript;
    let mut parts = Vec::new();

    if transcript.is_thinking {
        parts.push("💭 thinking".magenta().to_string());
    }
    if let Some(skill) = &transcript.last_skill {
        parts.push(format!("🎯 skill:{}", skill.name).cyan().to_string());
    }
    if transcript.tool_call_count > 0
        || transcript.agent_call_count > 0
        || transcript.skill_call_count > 0
    {
        parts.push(
            format!(
                "T:{} A:{} S:{}",
                transcript.tool_call_count, transcript.agent_call_count, transcript.skill_call_count
            )
            .dim()
            .to_string(),
        );
    }

    (!parts.is_empty()).then(|| parts.join(&separator()))
}

fn tools_line(ctx: &RenderContext<'_>) -> Option<String> {
    let tools = &ctx.transcript.tools;
    let mut parts = Vec::new();

    let running: Vec<_> = tools
        .iter()
        .filter(|tool| tool.status == ToolStatus::Running)
        .collect();
    for tool in &running[running.len().saturating_sub(MAX_RUNNING_TOOLS)..] {
        let target = tool
            .target
            .as_deref()
            .map(|target| format!(": {}", truncate_path(target, MAX_TARGET_LENGTH)).dim().to_string())
            .unwrap_or_default();
        parts.push(format!("{} {}{target}", "◐".yellow(), tool.name.as_str().cyan()));
    }

    // Stable sort keeps first-seen order among equal counts.
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for tool in tools.iter().filter(|tool| tool.status != ToolStatus::Running) {
        match counts.iter_mut().find(|(name, _)| *name == tool.name) {
            Some((_, count)) => *count += 1,
            None => counts.push((tool.name.as_str(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    for (name, count) in counts.into_iter().take(MAX_COMPLETED_TOOL_TYPES) {
        parts.push(format!("{} {name} {}", "✓".green(), format!("×{count}").dim()));
    }

    (!parts.is_empty()).then(|| parts.join(" | "))
}

fn agent_lines(ctx: &RenderContext<'_>) -> Vec<String> {
    let agents = &ctx.transcript.agents;
    let completed: Vec<&AgentEntry> = agents
        .iter()
        .filter(|agent| agent.status == AgentStatus::Completed)
        .collect();
    let mut shown: Vec<&AgentEntry> = agents
        .iter()
        .filter(|agent| agent.status == AgentStatus::Running)
        .collect();
    shown.extend(&completed[completed.len().saturating_sub(MAX_COMPLETED_AGENTS)..]);

    shown[shown.len().saturating_sub(MAX_AGENTS_DISPLAY)..]
        .iter()
        .map(|agent| format_agent(agent, ctx.now))
        .collect()
}

fn format_agent(agent: &AgentEntry, now: DateTime<Utc>) -> String {
    let icon = match agent.status {
        AgentStatus::Running => "◐".yellow(),
        AgentStatus::Completed => "✓".green(),
    };
    let mut line = format!("{icon} {}", agent.agent_type.as_str().magenta());
    if let Some(model) = &agent.model {
        line.push_str(&format!(" {}", format!("[{model}]").dim()));
    }
    if let Some(description) = &agent.description {
        line.push_str(
            &format!(": {}", truncate(description, MAX_AGENT_DESC_LENGTH))
                .dim()
                .to_string(),
        );
    }
    let elapsed = format_elapsed(agent.start_time, agent.end_time, now);
    line.push_str(&format!(" {}", format!("({elapsed})").dim()));
    line
}

fn todos_line(ctx: &RenderContext<'_>, t: &Translations) -> Option<String> {
    let todos = &ctx.transcript.todos;
    if todos.is_empty() {
        return None;
    }

    let completed = todos
        .iter()
        .filter(|todo| todo.status == TodoStatus::Completed)
        .count();
    let total = todos.len();
    let progress = format!("({completed}/{total})").dim();

    match todos.iter().find(|todo| todo.status == TodoStatus::InProgress) {
        Some(current) => Some(format!(
            "{} {} {progress}",
            "▸".yellow(),
            truncate(&current.content, MAX_TODO_CONTENT_LENGTH)
        )),
        None if completed == total => {
            Some(format!("{} {} {progress}", "✓".green(), t.all_todos_complete))
        }
        None => None,
    }
}
