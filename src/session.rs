//! Session entry model and persistence access.
//!
//! Sessions are stored as JSONL files with a tree structure: every entry
//! carries an optional `parentId`, and the branch a user is working on is the
//! root-to-leaf path through that tree. The handoff engine consumes one
//! branch at a time, either through the [`SessionAccess`] capability (live
//! agent) or by loading session files directly (offline heuristics mode).

use crate::error::{Error, Result};
use crate::model::{AssistantMessage, ContentBlock, UserContent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::BufRead;
use std::path::{Path, PathBuf};

// ============================================================================
// Entries
// ============================================================================

/// Base entry fields shared by every entry kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryBase {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl EntryBase {
    pub fn new(parent_id: Option<String>) -> Self {
        Self {
            id: Some(uuid::Uuid::new_v4().to_string()),
            parent_id,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// An entry in a session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    Message(MessageEntry),
    CustomMessage(CustomMessageEntry),
    Compaction(CompactionEntry),
    BranchSummary(BranchSummaryEntry),
    Custom(CustomEntry),
    Session(SessionHeader),
}

impl SessionEntry {
    pub const fn base(&self) -> Option<&EntryBase> {
        match self {
            Self::Message(e) => Some(&e.base),
            Self::CustomMessage(e) => Some(&e.base),
            Self::Compaction(e) => Some(&e.base),
            Self::BranchSummary(e) => Some(&e.base),
            Self::Custom(e) => Some(&e.base),
            Self::Session(_) => None,
        }
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.base().and_then(|b| b.id.as_deref())
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.base().and_then(|b| b.parent_id.as_deref())
    }
}

/// Message entry wrapping a conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub message: SessionMessage,
}

/// Conversation message payload, tagged by role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "role",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SessionMessage {
    User {
        content: UserContent,
    },
    Assistant {
        #[serde(flatten)]
        message: AssistantMessage,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ContentBlock>,
        #[serde(default)]
        is_error: bool,
    },
}

/// User-invisible extension message attached to the open turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMessageEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    #[serde(default)]
    pub content: String,
}

/// Compaction entry: a prior summarization of older context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_kept_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Branch summary entry: a summarization of an abandoned sibling branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummaryEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Extension state entry; the handoff audit record is one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEntry {
    #[serde(flatten)]
    pub base: EntryBase,
    pub custom_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Session file header (first JSONL line).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub cwd: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "branchedFrom"
    )]
    pub parent_session: Option<String>,
}

/// The custom-entry type used for handoff audit records.
pub const HANDOFF_CUSTOM_TYPE: &str = "handoff";

// ============================================================================
// Branch path computation
// ============================================================================

/// Entries along the path from root to `leaf_id`, in chronological order.
///
/// Follows `parentId` links upward from the leaf. Entries whose parent is
/// missing from the file terminate the walk there (orphan tolerance); the
/// result is still totally ordered because it filters the original slice.
pub fn branch_to_leaf<'a>(entries: &'a [SessionEntry], leaf_id: &str) -> Vec<&'a SessionEntry> {
    let by_id: HashMap<&str, &SessionEntry> = entries
        .iter()
        .filter_map(|e| e.entry_id().map(|id| (id, e)))
        .collect();

    let mut path_ids: HashSet<&str> = HashSet::new();
    let mut cursor = Some(leaf_id);
    while let Some(id) = cursor {
        if !path_ids.insert(id) {
            tracing::warn!(entry_id = id, "Parent cycle detected in session entries");
            break;
        }
        let Some(entry) = by_id.get(id) else {
            tracing::warn!(entry_id = id, "Entry references missing parent");
            break;
        };
        cursor = entry.parent_id();
    }

    entries
        .iter()
        .filter(|e| {
            match e {
                // The header carries no id but belongs to every branch.
                SessionEntry::Session(_) => true,
                _ => e.entry_id().is_some_and(|id| path_ids.contains(id)),
            }
        })
        .collect()
}

/// Entries along the path to the last entry in the file.
pub fn current_branch(entries: &[SessionEntry]) -> Vec<&SessionEntry> {
    let Some(leaf_id) = entries.iter().rev().find_map(SessionEntry::entry_id) else {
        return Vec::new();
    };
    branch_to_leaf(entries, leaf_id)
}

// ============================================================================
// Session file loading (offline mode)
// ============================================================================

/// A session file loaded from disk.
#[derive(Debug, Clone)]
pub struct SessionFile {
    pub header: SessionHeader,
    pub entries: Vec<SessionEntry>,
    pub path: PathBuf,
    /// Number of unparsable JSONL lines skipped during loading.
    pub skipped_lines: usize,
}

impl SessionFile {
    /// Open a JSONL session file, skipping corrupted lines.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::SessionNotFound {
                path: path.display().to_string(),
            });
        }

        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| Error::session("Empty session file"))?
            .map_err(|e| Error::session(format!("Failed to read header: {e}")))?;
        let header: SessionHeader = serde_json::from_str(&header_line)
            .map_err(|e| Error::session(format!("Invalid header: {e}")))?;

        let mut entries = Vec::new();
        let mut skipped_lines = 0usize;
        for (line_num, line_res) in lines.enumerate() {
            let line =
                line_res.map_err(|e| Error::session(format!("Failed to read line: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<SessionEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    skipped_lines += 1;
                    tracing::warn!(
                        path = %path.display(),
                        line_number = line_num + 2,
                        error = %e,
                        "Skipping corrupted session entry"
                    );
                }
            }
        }

        Ok(Self {
            header,
            entries,
            path: path.to_path_buf(),
            skipped_lines,
        })
    }

    /// Entries along the path to the last entry in the file.
    pub fn current_branch(&self) -> Vec<&SessionEntry> {
        current_branch(&self.entries)
    }
}

// ============================================================================
// Capability trait
// ============================================================================

/// Narrow session-store capability consumed by the handoff controller.
///
/// Implemented by the host agent; the engine only reads the branch, appends
/// the audit record, and asks for a linked child session.
#[async_trait]
pub trait SessionAccess: Send + Sync {
    /// Entries on the current branch, root to leaf.
    fn branch(&self) -> Vec<SessionEntry>;

    /// Opaque handle to the current session file for parent linkage.
    fn session_file(&self) -> Option<PathBuf>;

    /// Append a custom entry to the current session.
    async fn append_custom_entry(&self, custom_type: &str, data: Value) -> Result<()>;

    /// Create a new session whose parent is the current session file,
    /// without starting a conversation. Returns true when the user
    /// cancelled the creation flow.
    async fn create_child_session(&self) -> Result<bool>;
}
