//! Handoff orchestration.
//!
//! Walks the full pipeline: index the branch, score turns against the goal,
//! select anchors, assemble the two pass inputs, run extract then compose,
//! repair missing file blocks, hand the prompt to the user's editor, record
//! the audit entry, and create the linked child session. Cancellation at any
//! suspension point returns control without mutating the session.

use crate::anchors::select_anchors;
use crate::bundle::{assemble_composer_input, assemble_extractor_input};
use crate::cancel::CancelSignal;
use crate::config::HandoffBudgets;
use crate::error::Result;
use crate::goal::{apply_goal_scores, GoalTokens};
use crate::indexer::index_branch;
use crate::llm::{friendly_error_message, CompletionClient, LlmDriver, PassOutcome};
use crate::operational::{collect_operational_items, compute_file_lists};
use crate::session::{SessionAccess, HANDOFF_CUSTOM_TYPE};
use async_trait::async_trait;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Error,
}

/// Narrow UI capability consumed by the controller.
#[async_trait]
pub trait HandoffUi: Send + Sync {
    /// Show a transient notification.
    fn notify(&self, message: &str, level: NotifyLevel);

    /// Open the editor over `initial`; None means the user cancelled.
    async fn edit_prompt(&self, title: &str, initial: &str) -> Option<String>;

    /// Seed the (new session's) editor without submitting.
    fn set_editor_text(&self, text: &str);
}

/// Everything the controller needs from the host.
pub struct HandoffDeps {
    pub session: Arc<dyn SessionAccess>,
    pub ui: Arc<dyn HandoffUi>,
    pub client: Arc<dyn CompletionClient>,
    pub model: String,
    pub api_key: Option<String>,
}

/// Parse a `/handoff <goal>` invocation. Returns the trimmed goal, which may
/// be empty when the user typed the bare command.
pub fn parse_handoff_command(input: &str) -> Option<&str> {
    let input = input.trim();
    let rest = input.strip_prefix("/handoff")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn write_escaped_path_list(out: &mut String, tag: &str, paths: &[String]) {
    let _ = write!(out, "<{tag}>");
    for path in paths {
        out.push('\n');
        for ch in path.chars() {
            match ch {
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                _ => out.push(ch),
            }
        }
    }
    let _ = write!(out, "\n</{tag}>");
}

/// Ensure the composed prompt carries both machine-parseable file blocks.
///
/// When either block is missing, both are appended from the computed lists;
/// a prompt that already has both is returned unchanged.
pub fn ensure_file_blocks(text: &str, read_files: &[String], modified_files: &[String]) -> String {
    let has_read = text.contains("<read-files>");
    let has_modified = text.contains("<modified-files>");
    if has_read && has_modified {
        return text.to_string();
    }

    let mut out = text.trim_end().to_string();
    out.push_str("\n\n");
    write_escaped_path_list(&mut out, "read-files", read_files);
    out.push_str("\n\n");
    write_escaped_path_list(&mut out, "modified-files", modified_files);
    out
}

/// Run the `/handoff <goal>` flow end to end.
///
/// Preconditions, transport failures and cancellations all surface as user
/// notifications; the current session is only mutated once the edited prompt
/// is accepted (the audit entry directly before child-session creation).
pub async fn run_handoff(
    goal: &str,
    deps: &HandoffDeps,
    budgets: &HandoffBudgets,
    signal: &CancelSignal,
) -> Result<()> {
    let goal = goal.trim();
    if goal.is_empty() {
        deps.ui
            .notify("Usage: /handoff <goal for the next session>", NotifyLevel::Error);
        return Ok(());
    }
    if deps.model.is_empty() {
        deps.ui
            .notify("No model selected for handoff", NotifyLevel::Error);
        return Ok(());
    }

    let entries = deps.session.branch();
    if entries.is_empty() {
        deps.ui
            .notify("No session entries to hand off", NotifyLevel::Error);
        return Ok(());
    }

    let mut index = index_branch(&entries, budgets);
    if index.turns.is_empty() {
        deps.ui
            .notify("No conversation turns to hand off", NotifyLevel::Error);
        return Ok(());
    }

    let goal_tokens = GoalTokens::new(goal);
    apply_goal_scores(&mut index, &goal_tokens);

    let (read_files, modified_files) = compute_file_lists(&index, budgets);
    let anchors = select_anchors(&index, budgets);
    let items = collect_operational_items(&index, budgets);

    let driver = LlmDriver::new(
        Arc::clone(&deps.client),
        deps.model.clone(),
        deps.api_key.clone(),
    );

    let extractor_input = assemble_extractor_input(
        goal,
        &index.summaries,
        &anchors,
        &items,
        &read_files,
        &modified_files,
        budgets,
    );
    let facts_bundle = match driver.extract(&extractor_input, signal).await {
        Ok(PassOutcome::Text(text)) => text,
        Ok(PassOutcome::Cancelled) => {
            deps.ui.notify("Cancelled", NotifyLevel::Info);
            return Ok(());
        }
        Err(error) => {
            deps.ui
                .notify(&friendly_error_message(&error), NotifyLevel::Error);
            return Ok(());
        }
    };

    let composer_input = assemble_composer_input(
        goal,
        &facts_bundle,
        &items,
        &read_files,
        &modified_files,
        budgets,
    );
    let composed = match driver.compose(&composer_input, signal).await {
        Ok(PassOutcome::Text(text)) => text,
        Ok(PassOutcome::Cancelled) => {
            deps.ui.notify("Cancelled", NotifyLevel::Info);
            return Ok(());
        }
        Err(error) => {
            deps.ui
                .notify(&friendly_error_message(&error), NotifyLevel::Error);
            return Ok(());
        }
    };

    let prompt = ensure_file_blocks(&composed, &read_files, &modified_files);

    let Some(edited) = deps.ui.edit_prompt("Handoff prompt", &prompt).await else {
        deps.ui.notify("Cancelled", NotifyLevel::Info);
        return Ok(());
    };

    // Mutations start here: audit entry first, then the child session.
    deps.session
        .append_custom_entry(
            HANDOFF_CUSTOM_TYPE,
            json!({
                "goal": goal,
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
        )
        .await?;

    let cancelled = deps.session.create_child_session().await?;
    if cancelled {
        deps.ui.notify("Cancelled", NotifyLevel::Info);
        return Ok(());
    }

    deps.ui.set_editor_text(&edited);
    Ok(())
}
