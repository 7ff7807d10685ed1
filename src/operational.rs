//! Operational highlights and file lists.
//!
//! Tool errors and notable bash invocations are ranked and deduplicated into
//! a short operational-context section; read/modified file lists are sorted,
//! capped, and stripped of sensitive paths.

use crate::config::HandoffBudgets;
use crate::indexer::{BranchIndex, Turn};
use crate::redact::is_sensitive_path;
use std::collections::HashSet;

/// Maximum characters for each rendered command/output fragment.
const MAX_FRAGMENT_CHARS: usize = 200;

/// A ranked operational highlight.
#[derive(Debug, Clone)]
pub struct OperationalItem {
    pub text: String,
    pub is_error: bool,
    pub score: i64,
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn item_score(turn: &Turn, is_error: bool) -> i64 {
    let base = if is_error { 5 } else { 1 };
    let goal_bonus = if turn.goal_score > 0 { 2 } else { 0 };
    base + goal_bonus + turn.goal_score
}

/// Collect, deduplicate and rank operational highlights.
///
/// Errors always outrank successes: every error item comes first (by score),
/// then successes fill the remaining slots, and the whole list is capped at
/// `max_operational_items`.
pub fn collect_operational_items(
    index: &BranchIndex,
    budgets: &HandoffBudgets,
) -> Vec<OperationalItem> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut errors: Vec<OperationalItem> = Vec::new();
    let mut successes: Vec<OperationalItem> = Vec::new();

    for turn in &index.turns {
        for result in &turn.tool_results {
            let call = index.tool_calls_by_id.get(&result.tool_call_id);
            let is_bash = call.is_some_and(|c| c.is_bash());
            if !result.is_error && !is_bash {
                continue;
            }

            let text = if is_bash {
                let command = call
                    .and_then(|c| c.command_arg())
                    .unwrap_or_default();
                let output = if result.content_text.is_empty() {
                    "ok".to_string()
                } else {
                    clip(&result.content_text, MAX_FRAGMENT_CHARS)
                };
                format!("bash: {}  -> {output}", clip(command, MAX_FRAGMENT_CHARS))
            } else {
                format!(
                    "{}: {}",
                    result.tool_name,
                    clip(&result.content_text, MAX_FRAGMENT_CHARS)
                )
            };

            if !seen.insert(text.clone()) {
                continue;
            }

            let item = OperationalItem {
                text,
                is_error: result.is_error,
                score: item_score(turn, result.is_error),
            };
            if item.is_error {
                errors.push(item);
            } else {
                successes.push(item);
            }
        }
    }

    errors.sort_by_key(|i| std::cmp::Reverse(i.score));
    successes.sort_by_key(|i| std::cmp::Reverse(i.score));

    let mut items = errors;
    items.extend(successes.into_iter().take(budgets.max_operational_items));
    items.truncate(budgets.max_operational_items);
    items
}

/// Sorted, capped, sensitive-free file lists: (read-only, modified).
pub fn compute_file_lists(index: &BranchIndex, budgets: &HandoffBudgets) -> (Vec<String>, Vec<String>) {
    let mut read = index.file_ops.read_only();
    let mut modified = index.file_ops.modified_files();
    read.truncate(budgets.max_file_entries);
    modified.truncate(budgets.max_file_entries);
    read.retain(|p| !is_sensitive_path(p));
    modified.retain(|p| !is_sensitive_path(p));
    (read, modified)
}
