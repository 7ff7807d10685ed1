//! Offline heuristics mode.
//!
//! Consumes session JSONL files straight from the persistence layer and
//! emits the indexing/selection view of each one: `turns.jsonl` (one line
//! per turn) and `sessions.json` (one record per analyzed session goal).
//! Selection runs the same anchor algorithm the live handoff uses.

use crate::anchors::{select_anchors, tool_call_display, AnchorReason};
use crate::config::HandoffBudgets;
use crate::error::Result;
use crate::goal::{apply_goal_scores, GoalTokens};
use crate::indexer::{index_branch, Turn};
use crate::redact::normalize;
use crate::session::{
    branch_to_leaf, current_branch, SessionEntry, SessionFile, SessionMessage,
    HANDOFF_CUSTOM_TYPE,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// One line of `turns.jsonl`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    pub session_file: String,
    pub session_id: String,
    pub goal_source: String,
    pub goal: String,
    pub turn_index: usize,
    pub entry_id: String,
    pub user_text: String,
    pub assistant_text: String,
    pub tool_calls: Vec<String>,
    pub tool_errors: Vec<String>,
    pub file_paths: Vec<String>,
    pub has_error: bool,
    pub high_signal: bool,
    pub goal_score: i64,
    pub selected: bool,
    pub required: bool,
    pub reasons: Vec<String>,
}

/// One element of `sessions.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_file: String,
    pub session_id: String,
    pub goal_source: String,
    pub goal: String,
    pub turn_count: usize,
    pub selected_count: usize,
}

/// Everything derived from one (session, goal) pair.
#[derive(Debug, Clone)]
pub struct SessionAnalysis {
    pub session: SessionRecord,
    pub turns: Vec<TurnRecord>,
}

/// A goal derived from a session file.
struct GoalSpec {
    source: &'static str,
    goal: String,
    entries: Vec<SessionEntry>,
}

fn handoff_goal(entry: &SessionEntry) -> Option<String> {
    let SessionEntry::Custom(custom) = entry else {
        return None;
    };
    if custom.custom_type != HANDOFF_CUSTOM_TYPE {
        return None;
    }
    custom
        .data
        .as_ref()
        .and_then(|data| data.get("goal"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Derive the goals to analyze a session under.
///
/// Every recorded handoff yields one analysis over the branch that led to
/// it. Sessions without handoff records fall back to treating the last user
/// message as the goal for the turns before it.
fn session_goals(file: &SessionFile) -> Vec<GoalSpec> {
    let mut goals = Vec::new();

    for entry in &file.entries {
        let Some(goal) = handoff_goal(entry) else {
            continue;
        };
        let Some(entry_id) = entry.entry_id() else {
            continue;
        };
        let entries: Vec<SessionEntry> = branch_to_leaf(&file.entries, entry_id)
            .into_iter()
            .cloned()
            .collect();
        goals.push(GoalSpec {
            source: "handoff",
            goal,
            entries,
        });
    }

    if !goals.is_empty() {
        return goals;
    }

    let branch = current_branch(&file.entries);
    let last_user = branch.iter().rposition(|entry| {
        matches!(
            entry,
            SessionEntry::Message(m) if matches!(m.message, SessionMessage::User { .. })
        )
    });
    if let Some(pos) = last_user {
        if let SessionEntry::Message(user_entry) = branch[pos] {
            if let SessionMessage::User { content } = &user_entry.message {
                let goal = normalize(&crate::indexer::user_content_text(content));
                if !goal.is_empty() && pos > 0 {
                    goals.push(GoalSpec {
                        source: "last-user",
                        goal,
                        entries: branch[..pos].iter().map(|e| (*e).clone()).collect(),
                    });
                }
            }
        }
    }

    goals
}

fn reasons_for(turn: &Turn, anchor_reason: Option<AnchorReason>) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(reason) = anchor_reason {
        reasons.push(reason.label().to_string());
    }
    if turn.has_error && anchor_reason != Some(AnchorReason::Error) {
        reasons.push(AnchorReason::Error.label().to_string());
    }
    if turn.high_signal && anchor_reason != Some(AnchorReason::KeySignal) {
        reasons.push(AnchorReason::KeySignal.label().to_string());
    }
    reasons
}

/// Analyze one session file under every goal it yields.
pub fn analyze_session_file(path: &Path, budgets: &HandoffBudgets) -> Result<Vec<SessionAnalysis>> {
    let file = SessionFile::open(path)?;
    let session_file = path.display().to_string();
    let session_id = file.header.id.clone();

    let mut analyses = Vec::new();
    for spec in session_goals(&file) {
        let mut index = index_branch(&spec.entries, budgets);
        let goal_tokens = GoalTokens::new(&spec.goal);
        apply_goal_scores(&mut index, &goal_tokens);

        let anchors = select_anchors(&index, budgets);
        let selected: HashMap<usize, (bool, AnchorReason)> = anchors
            .iter()
            .map(|a| (a.turn.index, (a.required, a.reason)))
            .collect();

        let turns: Vec<TurnRecord> = index
            .turns
            .iter()
            .map(|turn| {
                let selection = selected.get(&turn.index).copied();
                TurnRecord {
                    session_file: session_file.clone(),
                    session_id: session_id.clone(),
                    goal_source: spec.source.to_string(),
                    goal: spec.goal.clone(),
                    turn_index: turn.index,
                    entry_id: turn.start_entry_id.clone(),
                    user_text: turn.user_text.clone(),
                    assistant_text: turn.assistant_texts.join("\n"),
                    tool_calls: turn.tool_calls.iter().map(tool_call_display).collect(),
                    tool_errors: turn
                        .tool_results
                        .iter()
                        .filter(|r| r.is_error)
                        .map(|r| format!("{}: {}", r.tool_name, r.content_text))
                        .collect(),
                    file_paths: turn.file_paths.iter().cloned().collect(),
                    has_error: turn.has_error,
                    high_signal: turn.high_signal,
                    goal_score: turn.goal_score,
                    selected: selection.is_some(),
                    required: selection.is_some_and(|(required, _)| required),
                    reasons: reasons_for(turn, selection.map(|(_, reason)| reason)),
                }
            })
            .collect();

        let selected_count = turns.iter().filter(|t| t.selected).count();
        analyses.push(SessionAnalysis {
            session: SessionRecord {
                session_file: session_file.clone(),
                session_id: session_id.clone(),
                goal_source: spec.source.to_string(),
                goal: spec.goal.clone(),
                turn_count: turns.len(),
                selected_count,
            },
            turns,
        });
    }

    if analyses.is_empty() {
        tracing::debug!(path = %path.display(), "No goal derivable; session skipped");
    }
    Ok(analyses)
}

/// Expand input paths (files or directories of `.jsonl` files) and analyze
/// each; unreadable files are skipped with a warning.
pub fn analyze_paths(paths: &[PathBuf], budgets: &HandoffBudgets) -> Vec<SessionAnalysis> {
    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        if path.is_dir() {
            let Ok(dir) = std::fs::read_dir(path) else {
                tracing::warn!(path = %path.display(), "Cannot read directory");
                continue;
            };
            let mut found: Vec<PathBuf> = dir
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    let mut analyses = Vec::new();
    for file in files {
        match analyze_session_file(&file, budgets) {
            Ok(mut result) => analyses.append(&mut result),
            Err(error) => {
                tracing::warn!(path = %file.display(), error = %error, "Skipping session file");
            }
        }
    }
    analyses
}

/// Write `turns.jsonl` and `sessions.json` under `out_dir`.
pub fn write_reports(out_dir: &Path, analyses: &[SessionAnalysis]) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(out_dir)?;

    let turns_path = out_dir.join("turns.jsonl");
    let mut turns_file = std::fs::File::create(&turns_path)?;
    for analysis in analyses {
        for turn in &analysis.turns {
            let line = serde_json::to_string(turn)?;
            writeln!(turns_file, "{line}")?;
        }
    }

    let sessions_path = out_dir.join("sessions.json");
    let sessions: Vec<&SessionRecord> = analyses.iter().map(|a| &a.session).collect();
    let json = serde_json::to_string_pretty(&sessions)?;
    std::fs::write(&sessions_path, json)?;

    Ok((turns_path, sessions_path))
}
