//! Branch indexing: ordered session entries into a turn-level model.
//!
//! A turn is a maximal contiguous segment beginning with a user message (or
//! the branch start) and running up to, but not including, the next user
//! message. Compaction and branch-summary entries belong to no turn; their
//! file details feed the branch-wide file operations directly.

use crate::config::HandoffBudgets;
use crate::model::{collect_text_blocks, ContentBlock, StopReason, UserContent};
use crate::redact::{normalize, redact};
use crate::session::{SessionEntry, SessionMessage};
use crate::tokens::truncate_lines;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Words whose presence in a turn's search text marks it as high-signal.
const HIGH_SIGNAL_MARKERS: &[&str] = &[
    "must",
    "constraint",
    "decision",
    "blocked",
    "todo",
    "fix",
    "should",
    "require",
    "avoid",
    "risk",
    "bug",
    "prefer",
];

// ============================================================================
// Derived model
// ============================================================================

/// A tool call recorded on a turn.
#[derive(Debug, Clone)]
pub struct ToolCallInfo {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub entry_id: String,
}

impl ToolCallInfo {
    /// The `path` argument, when present.
    pub fn path_arg(&self) -> Option<&str> {
        self.arguments.get("path").and_then(Value::as_str)
    }

    /// The `command` argument, when present.
    pub fn command_arg(&self) -> Option<&str> {
        self.arguments.get("command").and_then(Value::as_str)
    }

    pub fn is_bash(&self) -> bool {
        self.name == "bash"
    }
}

/// A tool result recorded on a turn, content already truncated and scrubbed.
#[derive(Debug, Clone)]
pub struct ToolResultInfo {
    pub tool_call_id: String,
    pub tool_name: String,
    pub is_error: bool,
    pub content_text: String,
}

/// One conversation turn.
#[derive(Debug, Clone)]
pub struct Turn {
    pub index: usize,
    pub start_entry_id: String,
    pub entry_ids: Vec<String>,
    pub user_text: String,
    pub assistant_texts: Vec<String>,
    pub extra_texts: Vec<String>,
    pub tool_calls: Vec<ToolCallInfo>,
    pub tool_results: Vec<ToolResultInfo>,
    pub file_paths: BTreeSet<String>,
    pub has_error: bool,
    pub high_signal: bool,
    pub search_text: String,
    pub goal_score: i64,
}

/// Summary kind preserved from prior summarization entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Compaction,
    BranchSummary,
}

impl SummaryKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Compaction => "compaction",
            Self::BranchSummary => "branch_summary",
        }
    }
}

/// A prior summarization preserved verbatim.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub kind: SummaryKind,
    pub entry_id: String,
    pub summary: String,
}

/// Read/modified file sets for the branch; modification wins on overlap.
#[derive(Debug, Clone, Default)]
pub struct FileOperations {
    pub read: BTreeSet<String>,
    pub modified: BTreeSet<String>,
}

impl FileOperations {
    /// Read-only paths, sorted, with modified paths removed.
    pub fn read_only(&self) -> Vec<String> {
        self.read
            .iter()
            .filter(|p| !self.modified.contains(*p))
            .cloned()
            .collect()
    }

    /// Modified paths, sorted.
    pub fn modified_files(&self) -> Vec<String> {
        self.modified.iter().cloned().collect()
    }
}

/// The indexed branch.
#[derive(Debug, Clone, Default)]
pub struct BranchIndex {
    pub turns: Vec<Turn>,
    pub summaries: Vec<SummaryRecord>,
    pub file_ops: FileOperations,
    pub tool_calls_by_id: HashMap<String, ToolCallInfo>,
}

// ============================================================================
// Indexing
// ============================================================================

struct TurnBuilder {
    start_entry_id: String,
    entry_ids: Vec<String>,
    user_text: String,
    assistant_texts: Vec<String>,
    extra_texts: Vec<String>,
    tool_calls: Vec<ToolCallInfo>,
    tool_results: Vec<ToolResultInfo>,
    file_paths: BTreeSet<String>,
    has_error: bool,
}

impl TurnBuilder {
    fn new(start_entry_id: String, user_text: String) -> Self {
        Self {
            entry_ids: vec![start_entry_id.clone()],
            start_entry_id,
            user_text,
            assistant_texts: Vec::new(),
            extra_texts: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            file_paths: BTreeSet::new(),
            has_error: false,
        }
    }

    fn finalize(self, index: usize) -> Turn {
        let mut parts: Vec<String> = Vec::new();
        if !self.user_text.is_empty() {
            parts.push(self.user_text.clone());
        }
        parts.extend(self.assistant_texts.iter().cloned());
        parts.extend(self.extra_texts.iter().cloned());
        for call in &self.tool_calls {
            parts.push(tool_call_signature(call));
        }
        for result in &self.tool_results {
            if result.is_error {
                parts.push(result.content_text.clone());
            }
        }

        let search_text = normalize(&parts.join("\n")).to_lowercase();
        let high_signal = HIGH_SIGNAL_MARKERS
            .iter()
            .any(|marker| search_text.contains(marker));

        Turn {
            index,
            start_entry_id: self.start_entry_id,
            entry_ids: self.entry_ids,
            user_text: self.user_text,
            assistant_texts: self.assistant_texts,
            extra_texts: self.extra_texts,
            tool_calls: self.tool_calls,
            tool_results: self.tool_results,
            file_paths: self.file_paths,
            has_error: self.has_error,
            high_signal,
            search_text,
            goal_score: 0,
        }
    }
}

/// Search-text signature for a tool call: the command for bash, the path for
/// file tools.
fn tool_call_signature(call: &ToolCallInfo) -> String {
    if call.is_bash() {
        format!("bash {}", redact(call.command_arg().unwrap_or_default()))
    } else {
        match call.path_arg() {
            Some(path) => format!("{} {}", call.name, path),
            None => call.name.clone(),
        }
    }
}

pub(crate) fn user_content_text(content: &UserContent) -> String {
    match content {
        UserContent::Text(text) => text.clone(),
        UserContent::Blocks(blocks) => collect_text_blocks(blocks),
    }
}

fn extend_file_ops_from_details(file_ops: &mut FileOperations, details: Option<&Value>) {
    let Some(details) = details.and_then(Value::as_object) else {
        return;
    };
    if let Some(read) = details.get("readFiles").and_then(Value::as_array) {
        for path in read.iter().filter_map(Value::as_str) {
            file_ops.read.insert(path.to_string());
        }
    }
    if let Some(modified) = details.get("modifiedFiles").and_then(Value::as_array) {
        for path in modified.iter().filter_map(Value::as_str) {
            file_ops.modified.insert(path.to_string());
        }
    }
}

/// Index the branch entries into turns, summaries and file operations.
///
/// Deterministic for a given input sequence. Unknown entry kinds are skipped
/// silently; tool results whose call id matches nothing are retained on the
/// open turn.
pub fn index_branch(entries: &[SessionEntry], budgets: &HandoffBudgets) -> BranchIndex {
    let mut index = BranchIndex::default();
    let mut open: Option<TurnBuilder> = None;

    let finalize_open = |open: &mut Option<TurnBuilder>, index: &mut BranchIndex| {
        if let Some(builder) = open.take() {
            let turn_index = index.turns.len();
            index.turns.push(builder.finalize(turn_index));
        }
    };

    for entry in entries {
        match entry {
            SessionEntry::Message(message_entry) => {
                let entry_id = message_entry.base.id.clone().unwrap_or_default();
                match &message_entry.message {
                    SessionMessage::User { content } => {
                        finalize_open(&mut open, &mut index);
                        let user_text = normalize(&user_content_text(content));
                        open = Some(TurnBuilder::new(entry_id, user_text));
                    }
                    SessionMessage::Assistant { message } => {
                        let builder = open.get_or_insert_with(|| {
                            TurnBuilder::new(entry_id.clone(), String::new())
                        });
                        if builder.start_entry_id != entry_id {
                            builder.entry_ids.push(entry_id.clone());
                        }
                        if message.stop_reason == StopReason::Error
                            || message.error_message.is_some()
                        {
                            builder.has_error = true;
                        }
                        for block in &message.content {
                            match block {
                                ContentBlock::Text(text) => {
                                    let text = normalize(&text.text);
                                    if !text.is_empty() {
                                        builder.assistant_texts.push(text);
                                    }
                                }
                                ContentBlock::ToolCall(call) => {
                                    let info = ToolCallInfo {
                                        id: call.id.clone(),
                                        name: call.name.clone(),
                                        arguments: call.arguments.clone(),
                                        entry_id: entry_id.clone(),
                                    };
                                    if let Some(path) = info.path_arg() {
                                        builder.file_paths.insert(path.to_string());
                                        match info.name.as_str() {
                                            "read" => {
                                                index.file_ops.read.insert(path.to_string());
                                            }
                                            "write" | "edit" => {
                                                index.file_ops.modified.insert(path.to_string());
                                            }
                                            _ => {}
                                        }
                                    }
                                    index
                                        .tool_calls_by_id
                                        .insert(info.id.clone(), info.clone());
                                    builder.tool_calls.push(info);
                                }
                                ContentBlock::Thinking(_) => {}
                            }
                        }
                    }
                    SessionMessage::ToolResult {
                        tool_call_id,
                        tool_name,
                        content,
                        is_error,
                    } => {
                        let builder = open.get_or_insert_with(|| {
                            TurnBuilder::new(entry_id.clone(), String::new())
                        });
                        if builder.start_entry_id != entry_id {
                            builder.entry_ids.push(entry_id.clone());
                        }
                        let text = collect_text_blocks(content);
                        let content_text =
                            normalize(&truncate_lines(&text, budgets.max_tool_output_lines));
                        if *is_error {
                            builder.has_error = true;
                        }
                        builder.tool_results.push(ToolResultInfo {
                            tool_call_id: tool_call_id.clone(),
                            tool_name: tool_name.clone(),
                            is_error: *is_error,
                            content_text,
                        });
                    }
                }
            }
            SessionEntry::CustomMessage(custom) => {
                let entry_id = custom.base.id.clone().unwrap_or_default();
                let builder = open
                    .get_or_insert_with(|| TurnBuilder::new(entry_id.clone(), String::new()));
                if builder.start_entry_id != entry_id {
                    builder.entry_ids.push(entry_id);
                }
                let text = normalize(&custom.content);
                if !text.is_empty() {
                    builder.extra_texts.push(text);
                }
            }
            SessionEntry::Compaction(compaction) => {
                index.summaries.push(SummaryRecord {
                    kind: SummaryKind::Compaction,
                    entry_id: compaction.base.id.clone().unwrap_or_default(),
                    summary: compaction.summary.clone(),
                });
                extend_file_ops_from_details(&mut index.file_ops, compaction.details.as_ref());
            }
            SessionEntry::BranchSummary(summary) => {
                index.summaries.push(SummaryRecord {
                    kind: SummaryKind::BranchSummary,
                    entry_id: summary.base.id.clone().unwrap_or_default(),
                    summary: summary.summary.clone(),
                });
                extend_file_ops_from_details(&mut index.file_ops, summary.details.as_ref());
            }
            SessionEntry::Custom(_) | SessionEntry::Session(_) => {}
        }
    }

    finalize_open(&mut open, &mut index);
    index
}
