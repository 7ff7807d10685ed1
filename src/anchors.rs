//! Anchor selection: which turns are carried verbatim into the extractor.
//!
//! Required anchors (first turn, recent turns, error or high-signal turns)
//! are always kept. Goal-matched turns fill the remaining anchor budget in
//! score order.

use crate::config::HandoffBudgets;
use crate::indexer::{BranchIndex, ToolCallInfo, Turn};
use crate::redact::is_sensitive_path;
use crate::tokens::{estimate_tokens, truncate_to_tokens};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Maximum bash command length shown in excerpts.
const MAX_COMMAND_DISPLAY_CHARS: usize = 180;

/// Why a turn was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorReason {
    FirstUser,
    Error,
    KeySignal,
    GoalMatch,
}

impl AnchorReason {
    pub const fn label(self) -> &'static str {
        match self {
            Self::FirstUser => "first user",
            Self::Error => "error",
            Self::KeySignal => "key signal",
            Self::GoalMatch => "goal match",
        }
    }
}

/// A selected turn with its rendered excerpt.
#[derive(Debug, Clone)]
pub struct Anchor<'a> {
    pub turn: &'a Turn,
    pub reason: AnchorReason,
    pub excerpt: String,
    pub required: bool,
}

/// Reason for a required turn; first-user wins over error over key-signal.
fn required_reason(turn: &Turn) -> AnchorReason {
    if turn.index == 0 {
        AnchorReason::FirstUser
    } else if turn.has_error {
        AnchorReason::Error
    } else {
        AnchorReason::KeySignal
    }
}

/// Display form of a tool call inside an excerpt.
pub fn tool_call_display(call: &ToolCallInfo) -> String {
    if call.is_bash() {
        let command: String = call
            .command_arg()
            .unwrap_or_default()
            .chars()
            .take(MAX_COMMAND_DISPLAY_CHARS)
            .collect();
        let quoted = serde_json::to_string(&command).unwrap_or_else(|_| "\"\"".to_string());
        format!("bash(command={quoted})")
    } else {
        match call.path_arg() {
            Some(path) if is_sensitive_path(path) => format!("{}(path=[redacted])", call.name),
            Some(path) => {
                let quoted = serde_json::to_string(path).unwrap_or_else(|_| "\"\"".to_string());
                format!("{}(path={quoted})", call.name)
            }
            None => format!("{}()", call.name),
        }
    }
}

/// Render a turn excerpt, then clamp it to `budget` tokens.
pub fn build_turn_excerpt(turn: &Turn, budget: i64) -> String {
    let mut out = String::new();

    if !turn.user_text.is_empty() {
        let _ = write!(out, "[User]: {}", turn.user_text);
    }

    if !turn.assistant_texts.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "[Assistant]: {}", turn.assistant_texts.join("\n"));
    }

    if !turn.tool_calls.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let displays: Vec<String> = turn.tool_calls.iter().map(tool_call_display).collect();
        let _ = write!(out, "[Assistant tool calls]: {}", displays.join("; "));
    }

    let errors: Vec<String> = turn
        .tool_results
        .iter()
        .filter(|r| r.is_error)
        .map(|r| format!("{}: {}", r.tool_name, r.content_text))
        .collect();
    if !errors.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "[Tool errors]: {}", errors.join("\n"));
    }

    if !turn.extra_texts.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "[Custom]: {}", turn.extra_texts.join("\n"));
    }

    truncate_to_tokens(&out, budget)
}

/// Select anchors for the branch under the configured budgets.
///
/// Required turns are always selected. Goal-matched turns are admitted in
/// score order while the accumulated token estimate stays below
/// `anchor_tokens`; the result is ordered by turn index.
pub fn select_anchors<'a>(index: &'a BranchIndex, budgets: &HandoffBudgets) -> Vec<Anchor<'a>> {
    let turns = &index.turns;
    if turns.is_empty() {
        return Vec::new();
    }

    let mut required_indices: BTreeSet<usize> = BTreeSet::new();
    required_indices.insert(0);
    let recent_start = turns.len().saturating_sub(budgets.recent_turn_count);
    for idx in recent_start..turns.len() {
        required_indices.insert(idx);
    }
    for turn in turns {
        if turn.has_error || turn.high_signal {
            required_indices.insert(turn.index);
        }
    }

    let mut anchors: Vec<Anchor<'a>> = Vec::new();
    let mut accumulated = 0i64;

    for &idx in &required_indices {
        let turn = &turns[idx];
        let excerpt = build_turn_excerpt(turn, budgets.required_anchor_tokens);
        accumulated += estimate_tokens(&excerpt) as i64;
        anchors.push(Anchor {
            turn,
            reason: required_reason(turn),
            excerpt,
            required: true,
        });
    }

    let mut optional: Vec<&Turn> = turns
        .iter()
        .filter(|t| !required_indices.contains(&t.index) && t.goal_score > 0)
        .collect();
    optional.sort_by_key(|t| (std::cmp::Reverse(t.goal_score), t.index));

    for turn in optional {
        if accumulated >= budgets.anchor_tokens {
            break;
        }
        let excerpt = build_turn_excerpt(turn, budgets.optional_anchor_tokens);
        accumulated += estimate_tokens(&excerpt) as i64;
        anchors.push(Anchor {
            turn,
            reason: AnchorReason::GoalMatch,
            excerpt,
            required: false,
        });
    }

    anchors.sort_by_key(|a| a.turn.index);
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{ToolResultInfo, Turn};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn make_turn(index: usize, user_text: &str) -> Turn {
        Turn {
            index,
            start_entry_id: format!("e{index}"),
            entry_ids: vec![format!("e{index}")],
            user_text: user_text.to_string(),
            assistant_texts: Vec::new(),
            extra_texts: Vec::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            file_paths: BTreeSet::new(),
            has_error: false,
            high_signal: false,
            search_text: user_text.to_lowercase(),
            goal_score: 0,
        }
    }

    fn index_of(turns: Vec<Turn>) -> BranchIndex {
        BranchIndex {
            turns,
            ..Default::default()
        }
    }

    #[test]
    fn excerpt_renders_sections_in_order() {
        let mut turn = make_turn(1, "please fix this");
        turn.assistant_texts = vec!["working on it".to_string()];
        turn.tool_calls = vec![ToolCallInfo {
            id: "c1".to_string(),
            name: "bash".to_string(),
            arguments: json!({"command": "npm test"}),
            entry_id: "a1".to_string(),
        }];
        turn.tool_results = vec![ToolResultInfo {
            tool_call_id: "c1".to_string(),
            tool_name: "bash".to_string(),
            is_error: true,
            content_text: "1 test failed".to_string(),
        }];
        turn.extra_texts = vec!["note".to_string()];

        let excerpt = build_turn_excerpt(&turn, 500);
        let expected = "[User]: please fix this\n\
                        [Assistant]: working on it\n\
                        [Assistant tool calls]: bash(command=\"npm test\")\n\
                        [Tool errors]: bash: 1 test failed\n\
                        [Custom]: note";
        assert_eq!(excerpt, expected);
    }

    #[test]
    fn excerpt_skips_empty_sections() {
        let turn = make_turn(2, "only a question");
        assert_eq!(build_turn_excerpt(&turn, 100), "[User]: only a question");
    }

    #[test]
    fn excerpt_masks_sensitive_paths() {
        let mut turn = make_turn(0, "read env");
        turn.tool_calls = vec![ToolCallInfo {
            id: "c1".to_string(),
            name: "read".to_string(),
            arguments: json!({"path": "/home/u/.env.production"}),
            entry_id: "a1".to_string(),
        }];
        let excerpt = build_turn_excerpt(&turn, 100);
        assert!(excerpt.contains("read(path=[redacted])"));
        assert!(!excerpt.contains(".env.production"));
    }

    #[test]
    fn excerpt_truncates_long_bash_commands() {
        let mut turn = make_turn(0, "run it");
        let long_command = "x".repeat(400);
        turn.tool_calls = vec![ToolCallInfo {
            id: "c1".to_string(),
            name: "bash".to_string(),
            arguments: json!({ "command": long_command }),
            entry_id: "a1".to_string(),
        }];
        let excerpt = build_turn_excerpt(&turn, 500);
        assert!(excerpt.contains(&"x".repeat(180)));
        assert!(!excerpt.contains(&"x".repeat(181)));
    }

    #[test]
    fn first_and_recent_and_flagged_turns_are_required() {
        let mut turns: Vec<Turn> = (0..8).map(|i| make_turn(i, &format!("turn {i}"))).collect();
        turns[3].has_error = true;
        turns[4].high_signal = true;
        let index = index_of(turns);

        let anchors = select_anchors(&index, &HandoffBudgets::default());
        let required: Vec<usize> = anchors
            .iter()
            .filter(|a| a.required)
            .map(|a| a.turn.index)
            .collect();
        assert_eq!(required, vec![0, 3, 4, 6, 7]);
    }

    #[test]
    fn reasons_follow_precedence() {
        let mut turns: Vec<Turn> = (0..4).map(|i| make_turn(i, &format!("turn {i}"))).collect();
        turns[0].has_error = true; // first-user wins anyway
        turns[2].has_error = true;
        turns[2].high_signal = true; // error wins over key signal
        turns[3].high_signal = true;
        let index = index_of(turns);

        let anchors = select_anchors(&index, &HandoffBudgets::default());
        let by_index: std::collections::HashMap<usize, AnchorReason> =
            anchors.iter().map(|a| (a.turn.index, a.reason)).collect();
        assert_eq!(by_index[&0], AnchorReason::FirstUser);
        assert_eq!(by_index[&2], AnchorReason::Error);
        assert_eq!(by_index[&3], AnchorReason::KeySignal);
    }

    #[test]
    fn goal_matched_turns_fill_the_budget_in_score_order() {
        let mut turns: Vec<Turn> = (0..10).map(|i| make_turn(i, &format!("turn {i}"))).collect();
        turns[4].goal_score = 5;
        turns[2].goal_score = 5; // tie broken by index
        turns[6].goal_score = 1;
        let index = index_of(turns);

        let anchors = select_anchors(&index, &HandoffBudgets::default());
        let optional: Vec<usize> = anchors
            .iter()
            .filter(|a| !a.required)
            .map(|a| a.turn.index)
            .collect();
        assert_eq!(optional, vec![2, 4, 6]);
        assert!(anchors
            .iter()
            .filter(|a| !a.required)
            .all(|a| a.reason == AnchorReason::GoalMatch));
    }

    #[test]
    fn zero_score_turns_are_never_optional_anchors() {
        let turns: Vec<Turn> = (0..10).map(|i| make_turn(i, &format!("turn {i}"))).collect();
        let index = index_of(turns);
        let anchors = select_anchors(&index, &HandoffBudgets::default());
        assert!(anchors.iter().all(|a| a.required));
    }

    #[test]
    fn required_anchors_survive_budget_pressure() {
        let mut turns: Vec<Turn> = (0..6)
            .map(|i| make_turn(i, &"very long user text ".repeat(50)))
            .collect();
        turns[1].has_error = true;
        turns[2].high_signal = true;
        let index = index_of(turns);

        let tight = HandoffBudgets {
            anchor_tokens: 10,
            ..Default::default()
        };
        let anchors = select_anchors(&index, &tight);
        let required: Vec<usize> = anchors.iter().map(|a| a.turn.index).collect();
        assert_eq!(required, vec![0, 1, 2, 4, 5]);
    }

    #[test]
    fn optional_admission_stops_once_budget_is_reached() {
        let mut turns: Vec<Turn> = (0..20)
            .map(|i| {
                let mut t = make_turn(i, &"padding text that costs tokens ".repeat(30));
                t.goal_score = 1;
                t
            })
            .collect();
        turns[0].goal_score = 0;
        let index = index_of(turns);

        let tight = HandoffBudgets {
            anchor_tokens: 800,
            required_anchor_tokens: 200,
            optional_anchor_tokens: 200,
            recent_turn_count: 2,
            ..Default::default()
        };
        let anchors = select_anchors(&index, &tight);
        let optional_count = anchors.iter().filter(|a| !a.required).count();
        // 3 required anchors at ~200 tokens each leave room for roughly one
        // optional before the 800-token ceiling is crossed.
        assert!(optional_count >= 1);
        assert!(optional_count <= 2);
        // Selection is still ordered by turn index.
        let indices: Vec<usize> = anchors.iter().map(|a| a.turn.index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn selection_is_deterministic() {
        let mut turns: Vec<Turn> = (0..8).map(|i| make_turn(i, &format!("turn {i}"))).collect();
        turns[3].goal_score = 2;
        turns[5].goal_score = 2;
        let index = index_of(turns);
        let budgets = HandoffBudgets::default();

        let a: Vec<(usize, bool)> = select_anchors(&index, &budgets)
            .iter()
            .map(|an| (an.turn.index, an.required))
            .collect();
        let b: Vec<(usize, bool)> = select_anchors(&index, &budgets)
            .iter()
            .map(|an| (an.turn.index, an.required))
            .collect();
        assert_eq!(a, b);
    }
}
