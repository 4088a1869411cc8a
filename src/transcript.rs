//! Incremental parsing of the Claude Code session transcript.
//!
//! The transcript is an append-only JSON Lines file. Every status line tick
//! re-runs this parser, so the accumulated [`SessionState`] is persisted
//! together with a byte cursor and only the bytes appended since the previous
//! tick are decoded.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStore, FileCacheStore};

/// Most recent tool invocations handed to the renderer.
pub const MAX_TRANSCRIPT_TOOLS: usize = 20;
/// Most recent agent invocations handed to the renderer.
pub const MAX_TRANSCRIPT_AGENTS: usize = 10;

const AGENT_TOOL: &str = "Task";
const SKILL_TOOL: &str = "Skill";
const TODO_TOOL: &str = "TodoWrite";
const COMMAND_TARGET_MAX_CHARS: usize = 30;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("failed to stat transcript {}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open transcript {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read transcript {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub status: ToolStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: AgentStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillRecord {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Invocations keyed by their `tool_use` id, kept in first-seen order.
///
/// Serialized as an array of `[id, entry]` pairs so the order survives the
/// cache round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationMap<T> {
    entries: Vec<(String, T)>,
    index: HashMap<String, usize>,
}

impl<T> Default for InvocationMap<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> InvocationMap<T> {
    /// Re-inserting a known id replaces the entry but keeps its position.
    pub fn insert(&mut self, id: String, entry: T) {
        if let Some(&position) = self.index.get(&id) {
            self.entries[position].1 = entry;
            return;
        }
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push((id, entry));
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.index.get(id).map(|&position| &self.entries[position].1)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        let position = *self.index.get(id)?;
        Some(&mut self.entries[position].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    /// Drops everything except the `keep` most recently inserted entries.
    pub fn retain_last(&mut self, keep: usize) {
        let excess = self.entries.len().saturating_sub(keep);
        if excess == 0 {
            return;
        }
        self.entries.drain(..excess);
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (id.clone(), position))
            .collect();
    }
}

impl<T: Clone> InvocationMap<T> {
    pub fn recent(&self, count: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(count);
        self.values().skip(skip).cloned().collect()
    }
}

impl<T> FromIterator<(String, T)> for InvocationMap<T> {
    fn from_iter<I: IntoIterator<Item = (String, T)>>(iter: I) -> Self {
        let mut map = Self::default();
        for (id, entry) in iter {
            map.insert(id, entry);
        }
        map
    }
}

impl<T: Serialize> Serialize for InvocationMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|(id, entry)| (id, entry)))
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for InvocationMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<(String, T)>::deserialize(deserializer).map(|pairs| pairs.into_iter().collect())
    }
}

/// Everything accumulated from the transcript so far. This is the `data`
/// payload of the persisted cache entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    pub tool_call_count: u64,
    pub agent_call_count: u64,
    pub skill_call_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_start: Option<DateTime<Utc>>,
    pub is_thinking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_skill: Option<SkillRecord>,
    pub tools: InvocationMap<ToolEntry>,
    pub agents: InvocationMap<AgentEntry>,
    pub todos: Vec<TodoEntry>,
}

/// Display-ready view of a [`SessionState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub tools: Vec<ToolEntry>,
    pub agents: Vec<AgentEntry>,
    pub todos: Vec<TodoEntry>,
    pub session_start: Option<DateTime<Utc>>,
    pub tool_call_count: u64,
    pub agent_call_count: u64,
    pub skill_call_count: u64,
    pub is_thinking: bool,
    pub last_skill: Option<SkillRecord>,
}

/// One decoded transcript line. Only the fields the classifier reads are
/// modelled; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TranscriptRecord {
    pub timestamp: Option<String>,
    pub message: Option<RecordMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RecordMessage {
    pub content: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentSegment {
    Thinking,
    Text,
    ToolUse {
        id: Option<String>,
        name: Option<String>,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: Option<String>,
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

impl SessionState {
    pub fn apply_record(&mut self, record: &TranscriptRecord) {
        let stamped = record
            .timestamp
            .as_deref()
            .and_then(parse_utc_timestamp);
        if self.session_start.is_none() {
            self.session_start = stamped;
        }
        let observed_at = stamped.unwrap_or_else(Utc::now);

        let Some(segments) = record
            .message
            .as_ref()
            .and_then(|message| message.content.as_array())
        else {
            return;
        };

        for raw in segments {
            let Ok(segment) = ContentSegment::deserialize(raw) else {
                continue;
            };
            match segment {
                ContentSegment::Thinking => self.is_thinking = true,
                ContentSegment::Text => self.is_thinking = false,
                ContentSegment::ToolUse {
                    id: Some(id),
                    name: Some(name),
                    input,
                } if !id.is_empty() && !name.is_empty() => {
                    self.start_invocation(id, &name, &input, observed_at);
                }
                ContentSegment::ToolResult {
                    tool_use_id: Some(id),
                    is_error,
                } => {
                    self.finish_invocation(&id, is_error.unwrap_or(false), observed_at);
                }
                _ => {}
            }
        }
    }

    fn start_invocation(&mut self, id: String, name: &str, input: &Value, at: DateTime<Utc>) {
        match name {
            AGENT_TOOL => {
                self.agents.insert(
                    id,
                    AgentEntry {
                        agent_type: str_at(input, &["subagent_type"])
                            .unwrap_or_else(|| "unknown".to_string()),
                        model: str_at(input, &["model"]),
                        description: str_at(input, &["description"]),
                        status: AgentStatus::Running,
                        start_time: at,
                        end_time: None,
                    },
                );
                self.agent_call_count += 1;
            }
            SKILL_TOOL => {
                self.last_skill = Some(SkillRecord {
                    name: str_at(input, &["skill"]).unwrap_or_else(|| "unknown".to_string()),
                    timestamp: at,
                });
                self.skill_call_count += 1;
            }
            TODO_TOOL => {
                if let Some(todos) = input.get("todos").and_then(Value::as_array) {
                    self.todos = decode_todos(todos);
                }
            }
            _ => {
                self.tools.insert(
                    id,
                    ToolEntry {
                        name: name.to_string(),
                        target: extract_target(name, input),
                        status: ToolStatus::Running,
                        start_time: at,
                        end_time: None,
                    },
                );
                self.tool_call_count += 1;
            }
        }
    }

    // Ids are shared between tools and agents; both are updated when both match.
    fn finish_invocation(&mut self, id: &str, is_error: bool, at: DateTime<Utc>) {
        if let Some(tool) = self.tools.get_mut(id) {
            tool.status = if is_error {
                ToolStatus::Error
            } else {
                ToolStatus::Completed
            };
            tool.end_time = Some(at);
        }
        if let Some(agent) = self.agents.get_mut(id) {
            agent.status = AgentStatus::Completed;
            agent.end_time = Some(at);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tools: self.tools.recent(MAX_TRANSCRIPT_TOOLS),
            agents: self.agents.recent(MAX_TRANSCRIPT_AGENTS),
            todos: self.todos.clone(),
            session_start: self.session_start,
            tool_call_count: self.tool_call_count,
            agent_call_count: self.agent_call_count,
            skill_call_count: self.skill_call_count,
            is_thinking: self.is_thinking,
            last_skill: self.last_skill.clone(),
        }
    }

    /// Copy with the invocation maps cut to twice the display limits, which is
    /// what gets persisted between ticks.
    pub fn bounded_for_cache(&self) -> SessionState {
        let mut bounded = self.clone();
        bounded.tools.retain_last(MAX_TRANSCRIPT_TOOLS * 2);
        bounded.agents.retain_last(MAX_TRANSCRIPT_AGENTS * 2);
        bounded
    }
}

fn decode_todos(raw: &[Value]) -> Vec<TodoEntry> {
    raw.iter()
        .enumerate()
        .filter_map(|(position, item)| {
            let mut todo = TodoEntry::deserialize(item).ok()?;
            if todo.id.is_empty() {
                todo.id = position.to_string();
            }
            Some(todo)
        })
        .collect()
}

fn extract_target(tool_name: &str, input: &Value) -> Option<String> {
    match tool_name {
        "Read" | "Write" | "Edit" => {
            str_at(input, &["file_path"]).or_else(|| str_at(input, &["path"]))
        }
        "Glob" | "Grep" => str_at(input, &["pattern"]),
        "Bash" => str_at(input, &["command"])
            .map(|command| truncate_command(&command, COMMAND_TARGET_MAX_CHARS)),
        _ => None,
    }
}

fn truncate_command(command: &str, max_chars: usize) -> String {
    let mut chars = command.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Line accounting for one pass of [`read_records`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    /// Non-blank lines examined.
    pub lines: usize,
    pub decoded: usize,
    pub failed: usize,
    /// Bytes fully processed; the next pass resumes here.
    pub consumed: u64,
}

impl ReadStats {
    pub fn mostly_undecodable(&self) -> bool {
        self.lines > 0 && self.failed * 2 > self.lines
    }
}

/// Decodes newline-delimited records from `reader` into `state`, in order.
///
/// Undecodable lines are skipped. An undecodable fragment at the very end
/// with no trailing newline is treated as a write still in progress: it is
/// left unconsumed so the next pass sees the completed line.
pub fn read_records<R: BufRead>(reader: &mut R, state: &mut SessionState) -> io::Result<ReadStats> {
    let mut stats = ReadStats::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = reader.read_until(b'\n', &mut buf)?;
        if bytes == 0 {
            break;
        }
        let terminated = buf.last() == Some(&b'\n');
        let line = buf.trim_ascii();
        if !line.is_empty() {
            match serde_json::from_slice::<TranscriptRecord>(line) {
                Ok(record) => {
                    state.apply_record(&record);
                    stats.decoded += 1;
                }
                Err(_) if !terminated => break,
                Err(_) => stats.failed += 1,
            }
            stats.lines += 1;
        }
        stats.consumed += bytes as u64;
    }
    Ok(stats)
}

/// Where transcript bytes come from.
pub trait TranscriptSource {
    type Reader: BufRead;

    /// Current length in bytes, or `None` when the transcript does not exist.
    fn size(&self, path: &Path) -> Result<Option<u64>, TranscriptError>;

    fn open_at(&self, path: &Path, offset: u64) -> Result<Self::Reader, TranscriptError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl TranscriptSource for FileSource {
    type Reader = BufReader<File>;

    fn size(&self, path: &Path) -> Result<Option<u64>, TranscriptError> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(TranscriptError::Stat {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn open_at(&self, path: &Path, offset: u64) -> Result<Self::Reader, TranscriptError> {
        let open_err = |source| TranscriptError::Open {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(open_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(open_err)?;
        Ok(BufReader::new(file))
    }
}

pub struct TranscriptParser<C = FileCacheStore, S = FileSource> {
    cache: C,
    source: S,
}

impl TranscriptParser {
    pub fn new() -> Self {
        Self::with_parts(FileCacheStore::default(), FileSource)
    }
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: CacheStore, S: TranscriptSource> TranscriptParser<C, S> {
    pub fn with_parts(cache: C, source: S) -> Self {
        Self { cache, source }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Never fails: a missing transcript or any I/O problem yields an empty
    /// (or partially filled) snapshot.
    pub fn parse(&self, transcript_path: &Path) -> SessionSnapshot {
        if transcript_path.as_os_str().is_empty() {
            return SessionSnapshot::default();
        }
        match self.parse_incremental(transcript_path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                debug!(error = %err, "transcript parse failed");
                SessionSnapshot::default()
            }
        }
    }

    fn parse_incremental(&self, path: &Path) -> Result<SessionSnapshot, TranscriptError> {
        let Some(file_size) = self.source.size(path)? else {
            return Ok(SessionSnapshot::default());
        };

        let (offset, mut state) = match self.cache.load(path, file_size) {
            Some(entry) if entry.file_size == file_size => return Ok(entry.data.snapshot()),
            Some(entry) => (entry.resume_at(), entry.data),
            None => (0, SessionState::default()),
        };

        match self.read_from(path, offset, &mut state) {
            Ok(stats) => {
                if offset == 0 && stats.mostly_undecodable() {
                    warn!(
                        path = %path.display(),
                        lines = stats.lines,
                        failed = stats.failed,
                        "most transcript lines could not be decoded"
                    );
                }
                self.cache.save(
                    CacheEntry::new(path, file_size, &state)
                        .with_resume_offset(offset + stats.consumed),
                );
            }
            // Keep what was decoded but leave the cache alone so the next
            // tick retries the unread tail.
            Err(err) => debug!(error = %err, "transcript read interrupted"),
        }

        Ok(state.snapshot())
    }

    fn read_from(
        &self,
        path: &Path,
        offset: u64,
        state: &mut SessionState,
    ) -> Result<ReadStats, TranscriptError> {
        let mut reader = self.source.open_at(path, offset)?;
        read_records(&mut reader, state).map_err(|source| TranscriptError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Parses `transcript_path` with the on-disk cache.
pub fn parse_transcript(transcript_path: &Path) -> SessionSnapshot {
    TranscriptParser::new().parse(transcript_path)
}

fn parse_utc_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    cursor.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use std::cell::RefCell;
    use std::io::{Cursor, Read as _, Write};
    use tempfile::TempDir;

    /// File-backed source that records every `open_at` offset.
    #[derive(Default)]
    struct RecordingSource {
        opened_at: RefCell<Vec<u64>>,
    }

    impl TranscriptSource for RecordingSource {
        type Reader = BufReader<File>;

        fn size(&self, path: &Path) -> Result<Option<u64>, TranscriptError> {
            FileSource.size(path)
        }

        fn open_at(&self, path: &Path, offset: u64) -> Result<Self::Reader, TranscriptError> {
            self.opened_at.borrow_mut().push(offset);
            FileSource.open_at(path, offset)
        }
    }

    fn memory_parser() -> TranscriptParser<MemoryCacheStore, RecordingSource> {
        TranscriptParser::with_parts(MemoryCacheStore::default(), RecordingSource::default())
    }

    fn write_transcript(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("session.jsonl");
        std::fs::write(&path, content).expect("write transcript");
        path
    }

    fn append(path: &Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open for append");
        file.write_all(content.as_bytes()).expect("append");
    }

    fn apply_lines(lines: &str) -> SessionState {
        let mut state = SessionState::default();
        read_records(&mut Cursor::new(lines.as_bytes()), &mut state).expect("read");
        state
    }

    #[test]
    fn completed_read_tool_carries_file_target() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_transcript(
            &dir,
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"a","name":"Read","input":{"file_path":"/x.py"}}]}}
{"timestamp":"2026-03-01T10:00:02Z","message":{"content":[{"type":"tool_result","tool_use_id":"a"}]}}
"#,
        );

        let snapshot = memory_parser().parse(&path);

        assert_eq!(snapshot.tools.len(), 1);
        let tool = &snapshot.tools[0];
        assert_eq!(tool.name, "Read");
        assert_eq!(tool.target.as_deref(), Some("/x.py"));
        assert_eq!(tool.status, ToolStatus::Completed);
        assert!(tool.end_time.is_some());
        assert_eq!(snapshot.tool_call_count, 1);
        assert_eq!(
            snapshot.session_start,
            parse_utc_timestamp("2026-03-01T10:00:00Z")
        );
    }

    #[test]
    fn unanswered_task_stays_running_agent() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_transcript(
            &dir,
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"b","name":"Task","input":{"subagent_type":"reviewer","model":"haiku","description":"Review the diff"}}]}}
"#,
        );

        let snapshot = memory_parser().parse(&path);

        assert!(snapshot.tools.is_empty());
        assert_eq!(snapshot.agents.len(), 1);
        let agent = &snapshot.agents[0];
        assert_eq!(agent.agent_type, "reviewer");
        assert_eq!(agent.model.as_deref(), Some("haiku"));
        assert_eq!(agent.description.as_deref(), Some("Review the diff"));
        assert_eq!(agent.status, AgentStatus::Running);
        assert_eq!(agent.end_time, None);
        assert_eq!(snapshot.agent_call_count, 1);
    }

    #[test]
    fn result_for_unknown_id_changes_nothing() {
        let mut state = apply_lines(
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"t1","name":"Grep","input":{"pattern":"fn main"}},{"type":"tool_use","id":"g1","name":"Task","input":{}}]}}
"#,
        );
        let before = state.clone();

        let stray = apply_lines(
            r#"{"timestamp":"2026-03-01T10:00:05Z","message":{"content":[{"type":"tool_result","tool_use_id":"never-seen"}]}}"#,
        );
        assert!(stray.tools.is_empty() && stray.agents.is_empty());

        read_records(
            &mut Cursor::new(
                br#"{"message":{"content":[{"type":"tool_result","tool_use_id":"never-seen","is_error":true}]}}"#
                    .as_slice(),
            ),
            &mut state,
        )
        .expect("read");
        assert_eq!(state.tools, before.tools);
        assert_eq!(state.agents, before.agents);
        assert_eq!(state.tools.get("t1").map(|t| t.status), Some(ToolStatus::Running));
        assert_eq!(
            state.agents.get("g1").map(|a| a.agent_type.as_str()),
            Some("unknown")
        );
    }

    #[test]
    fn errored_result_marks_tool_error() {
        let state = apply_lines(
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"x","name":"Bash","input":{"command":"cargo fmt"}}]}}
{"timestamp":"2026-03-01T10:00:01Z","message":{"content":[{"type":"tool_result","tool_use_id":"x","is_error":true}]}}
"#,
        );
        let tool = state.tools.get("x").expect("tool");
        assert_eq!(tool.status, ToolStatus::Error);
        assert_eq!(tool.target.as_deref(), Some("cargo fmt"));
    }

    #[test]
    fn todo_write_replaces_previous_list() {
        let state = apply_lines(
            r#"{"message":{"content":[{"type":"tool_use","id":"w1","name":"TodoWrite","input":{"todos":[{"id":"1","content":"first","status":"in_progress"}]}}]}}
{"message":{"content":[{"type":"tool_use","id":"w2","name":"TodoWrite","input":{"todos":[{"id":"2","content":"second","status":"pending"}]}}]}}
"#,
        );
        assert_eq!(
            state.todos,
            vec![TodoEntry {
                id: "2".to_string(),
                content: "second".to_string(),
                status: TodoStatus::Pending,
            }]
        );
        assert!(state.tools.is_empty());
        assert_eq!(state.tool_call_count, 0);
    }

    #[test]
    fn todo_without_id_gets_position_and_bad_entries_drop() {
        let state = apply_lines(
            r#"{"message":{"content":[{"type":"tool_use","id":"w","name":"TodoWrite","input":{"todos":[{"content":"a","status":"completed"},{"content":"b","status":"bogus"},{"content":"c","status":"pending"}]}}]}}"#,
        );
        let ids: Vec<&str> = state.todos.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2"]);
    }

    #[test]
    fn thinking_flag_cleared_by_later_text() {
        let state = apply_lines(
            r#"{"message":{"content":[{"type":"thinking","thinking":"hmm"}]}}
{"message":{"content":[{"type":"text","text":"done"}]}}
"#,
        );
        assert!(!state.is_thinking);

        let same_record = apply_lines(
            r#"{"message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"ok"}]}}"#,
        );
        assert!(!same_record.is_thinking);

        let still_thinking = apply_lines(
            r#"{"message":{"content":[{"type":"text","text":"start"}]}}
{"message":{"content":[{"type":"thinking","thinking":"hmm"}]}}
"#,
        );
        assert!(still_thinking.is_thinking);
    }

    #[test]
    fn skill_updates_last_skill_but_not_tools() {
        let state = apply_lines(
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"s1","name":"Skill","input":{"skill":"pdf"}}]}}
{"timestamp":"2026-03-01T10:01:00Z","message":{"content":[{"type":"tool_use","id":"s2","name":"Skill","input":{"skill":"xlsx"}}]}}
"#,
        );
        assert!(state.tools.is_empty());
        assert_eq!(state.skill_call_count, 2);
        let skill = state.last_skill.expect("last skill");
        assert_eq!(skill.name, "xlsx");
        assert_eq!(skill.timestamp, parse_utc_timestamp("2026-03-01T10:01:00Z").expect("ts"));
    }

    #[test]
    fn shared_id_updates_tool_and_agent() {
        let at = parse_utc_timestamp("2026-03-01T10:00:00Z").expect("ts");
        let mut state = SessionState::default();
        state.tools.insert(
            "dup".to_string(),
            ToolEntry {
                name: "Read".to_string(),
                target: None,
                status: ToolStatus::Running,
                start_time: at,
                end_time: None,
            },
        );
        state.agents.insert(
            "dup".to_string(),
            AgentEntry {
                agent_type: "explorer".to_string(),
                model: None,
                description: None,
                status: AgentStatus::Running,
                start_time: at,
                end_time: None,
            },
        );

        read_records(
            &mut Cursor::new(
                br#"{"timestamp":"2026-03-01T10:00:09Z","message":{"content":[{"type":"tool_result","tool_use_id":"dup"}]}}"#
                    .as_slice(),
            ),
            &mut state,
        )
        .expect("read");

        assert_eq!(state.tools.get("dup").map(|t| t.status), Some(ToolStatus::Completed));
        assert_eq!(
            state.agents.get("dup").map(|a| a.status),
            Some(AgentStatus::Completed)
        );
    }

    #[test]
    fn command_target_truncates_on_characters() {
        assert_eq!(truncate_command("ls", 30), "ls");
        let exact = "a".repeat(30);
        assert_eq!(truncate_command(&exact, 30), exact);
        let long = "é".repeat(31);
        assert_eq!(truncate_command(&long, 30), format!("{}...", "é".repeat(30)));
        assert_eq!(
            extract_target("Edit", &serde_json::json!({"path": "src/lib.rs"})).as_deref(),
            Some("src/lib.rs")
        );
        assert_eq!(extract_target("WebFetch", &serde_json::json!({"url": "x"})), None);
    }

    #[test]
    fn unknown_segments_and_string_content_are_ignored() {
        let state = apply_lines(
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"role":"user","content":"plain prompt"}}
{"message":{"content":[{"type":"image","source":{}},{"type":"tool_use","id":"","name":"Read"},{"type":"tool_use","name":"Read"}]}}
"#,
        );
        assert!(state.tools.is_empty());
        assert_eq!(state.tool_call_count, 0);
        assert!(state.session_start.is_some());
    }

    #[test]
    fn reader_skips_garbage_and_counts_it() {
        let mut state = SessionState::default();
        let stats = read_records(
            &mut Cursor::new(b"not json\n\n{\"message\":{}}\n{broken\n".as_slice()),
            &mut state,
        )
        .expect("read");
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.failed, 2);
        assert!(stats.mostly_undecodable());
        assert_eq!(stats.consumed, 33);
    }

    #[test]
    fn unchanged_file_is_served_from_cache_without_reading() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_transcript(
            &dir,
            r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"a","name":"Glob","input":{"pattern":"**/*.rs"}}]}}
"#,
        );
        let parser = memory_parser();

        let first = parser.parse(&path);
        let second = parser.parse(&path);

        assert_eq!(first, second);
        assert_eq!(*parser.source.opened_at.borrow(), vec![0]);
        assert_eq!(parser.cache().load_count(), 2);
        assert_eq!(parser.cache().save_count(), 1);
    }

    #[test]
    fn resumed_parse_matches_cold_parse() {
        let dir = TempDir::new().expect("temp dir");
        let head = r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"thinking","thinking":"plan"},{"type":"tool_use","id":"a","name":"Read","input":{"file_path":"/a.rs"}}]}}
{"timestamp":"2026-03-01T10:00:01Z","message":{"content":[{"type":"tool_use","id":"g","name":"Task","input":{"subagent_type":"explorer"}}]}}
"#;
        let tail = r#"{"timestamp":"2026-03-01T10:00:02Z","message":{"content":[{"type":"tool_result","tool_use_id":"a"},{"type":"text","text":"read it"}]}}
{"timestamp":"2026-03-01T10:00:03Z","message":{"content":[{"type":"tool_result","tool_use_id":"g"},{"type":"tool_use","id":"s","name":"Skill","input":{"skill":"docx"}}]}}
"#;
        let path = write_transcript(&dir, head);
        let incremental = memory_parser();
        incremental.parse(&path);
        append(&path, tail);
        let resumed = incremental.parse(&path);

        assert_eq!(
            *incremental.source.opened_at.borrow(),
            vec![0, head.len() as u64]
        );

        let cold = memory_parser().parse(&path);
        assert_eq!(resumed, cold);
        assert_eq!(resumed.tools[0].status, ToolStatus::Completed);
        assert_eq!(resumed.agents[0].status, AgentStatus::Completed);
        assert!(!resumed.is_thinking);
    }

    #[test]
    fn shrunk_file_forces_cold_scan() {
        let dir = TempDir::new().expect("temp dir");
        let line = r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"new","name":"Write","input":{"file_path":"/n.txt"}}]}}"#;
        let path = write_transcript(&dir, &format!("{line}\n"));
        assert!(std::fs::metadata(&path).expect("meta").len() < 500);

        let mut stale = SessionState::default();
        stale.tool_call_count = 99;
        let parser = TranscriptParser::with_parts(
            MemoryCacheStore::with_entry(CacheEntry::new(&path, 500, &stale)),
            RecordingSource::default(),
        );

        let snapshot = parser.parse(&path);

        assert_eq!(*parser.source.opened_at.borrow(), vec![0]);
        assert_eq!(snapshot.tool_call_count, 1);
        assert_eq!(snapshot.tools[0].target.as_deref(), Some("/n.txt"));
    }

    #[test]
    fn partial_tail_line_is_picked_up_once_complete() {
        let dir = TempDir::new().expect("temp dir");
        let complete = r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"a","name":"Read","input":{"file_path":"/a"}}]}}
"#;
        let partial = r#"{"timestamp":"2026-03-01T10:00:01Z","message":{"content":[{"type":"tool_res"#;
        let rest = r#"ult","tool_use_id":"a"}]}}
"#;
        let path = write_transcript(&dir, &format!("{complete}{partial}"));
        let parser = memory_parser();

        let first = parser.parse(&path);
        assert_eq!(first.tools[0].status, ToolStatus::Running);
        let entry = parser.cache().entry().expect("cached");
        assert_eq!(entry.file_size, (complete.len() + partial.len()) as u64);
        assert_eq!(entry.resume_at(), complete.len() as u64);

        append(&path, rest);
        let second = parser.parse(&path);
        assert_eq!(second.tools[0].status, ToolStatus::Completed);
        assert_eq!(
            *parser.source.opened_at.borrow(),
            vec![0, complete.len() as u64]
        );
    }

    #[test]
    fn unchanged_file_with_unfinished_tail_is_not_reopened() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_transcript(&dir, "{\"message\":{}}\n{\"message\":");
        let parser = memory_parser();

        let first = parser.parse(&path);
        let second = parser.parse(&path);
        let third = parser.parse(&path);

        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(*parser.source.opened_at.borrow(), vec![0]);
        let entry = parser.cache().entry().expect("cached");
        assert_eq!(entry.file_size, 26);
        assert_eq!(entry.resume_at(), 15);
    }

    #[test]
    fn mostly_undecodable_cold_file_still_yields_partial_snapshot() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_transcript(
            &dir,
            r#"not json
{"broken":
{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"a","name":"Grep","input":{"pattern":"todo"}}]}}
<<garbage>>
"#,
        );
        let parser = memory_parser();

        let snapshot = parser.parse(&path);

        assert_eq!(snapshot.tool_call_count, 1);
        assert_eq!(snapshot.tools[0].target.as_deref(), Some("todo"));
        assert_eq!(parser.cache().save_count(), 1);
        let size = std::fs::metadata(&path).expect("meta").len();
        assert_eq!(parser.cache().entry().map(|entry| entry.resume_at()), Some(size));
    }

    /// Yields its bytes, then fails instead of reporting end of file.
    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl io::Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::other("device went away")),
                read => Ok(read),
            }
        }
    }

    struct FailingSource {
        prefix: &'static str,
    }

    impl TranscriptSource for FailingSource {
        type Reader = BufReader<FailingReader>;

        fn size(&self, _path: &Path) -> Result<Option<u64>, TranscriptError> {
            Ok(Some(self.prefix.len() as u64 * 2))
        }

        fn open_at(&self, _path: &Path, _offset: u64) -> Result<Self::Reader, TranscriptError> {
            Ok(BufReader::new(FailingReader {
                data: Cursor::new(self.prefix.as_bytes().to_vec()),
            }))
        }
    }

    #[test]
    fn read_error_keeps_decoded_prefix_and_skips_save() {
        let parser = TranscriptParser::with_parts(
            MemoryCacheStore::default(),
            FailingSource {
                prefix: r#"{"timestamp":"2026-03-01T10:00:00Z","message":{"content":[{"type":"tool_use","id":"a","name":"Bash","input":{"command":"cargo fmt"}}]}}
"#,
            },
        );

        let snapshot = parser.parse(Path::new("/virtual/session.jsonl"));

        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].target.as_deref(), Some("cargo fmt"));
        assert_eq!(parser.cache().save_count(), 0);
        assert!(parser.cache().entry().is_none());
    }

    #[test]
    fn snapshot_keeps_most_recent_and_cache_keeps_double() {
        let mut lines = String::new();
        for n in 0..50 {
            lines.push_str(&format!(
                "{{\"timestamp\":\"2026-03-01T10:00:00Z\",\"message\":{{\"content\":[{{\"type\":\"tool_use\",\"id\":\"t{n}\",\"name\":\"Read\",\"input\":{{\"file_path\":\"/f{n}\"}}}}]}}}}\n"
            ));
        }
        let dir = TempDir::new().expect("temp dir");
        let path = write_transcript(&dir, &lines);
        let parser = memory_parser();

        let snapshot = parser.parse(&path);

        assert_eq!(snapshot.tools.len(), MAX_TRANSCRIPT_TOOLS);
        assert_eq!(snapshot.tools[0].target.as_deref(), Some("/f30"));
        assert_eq!(snapshot.tools[19].target.as_deref(), Some("/f49"));
        assert_eq!(snapshot.tool_call_count, 50);
        let cached = parser.cache().entry().expect("cached");
        assert_eq!(cached.data.tools.len(), MAX_TRANSCRIPT_TOOLS * 2);
        assert!(cached.data.tools.get("t10").is_some());
        assert!(cached.data.tools.get("t9").is_none());
    }

    #[test]
    fn missing_or_empty_path_yields_empty_snapshot() {
        let parser = memory_parser();
        assert_eq!(parser.parse(Path::new("")), SessionSnapshot::default());
        let dir = TempDir::new().expect("temp dir");
        assert_eq!(
            parser.parse(&dir.path().join("absent.jsonl")),
            SessionSnapshot::default()
        );
        assert_eq!(parser.parse(dir.path()), SessionSnapshot::default());
        assert_eq!(parser.cache().load_count(), 0);
        assert_eq!(parser.cache().save_count(), 0);
    }

    #[test]
    fn invocation_map_round_trips_in_order() {
        let map: InvocationMap<u32> = [("b", 2), ("a", 1), ("b", 3)]
            .into_iter()
            .map(|(id, v)| (id.to_string(), v))
            .collect();
        assert_eq!(map.len(), 2);
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec![3, 1]);

        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"[["b",3],["a",1]]"#);
        let back: InvocationMap<u32> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
    }
}
