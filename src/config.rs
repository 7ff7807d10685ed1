//! Handoff budget configuration.
//!
//! A plain value object: every knob has a built-in default and can be
//! overridden per invocation, e.g. from a host settings JSON blob.

use serde::Deserialize;

/// Token and count budgets governing bundle assembly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HandoffBudgets {
    /// Overall budget for the extractor (pass 1) input.
    pub max_extract_tokens: i64,
    /// Combined budget for prior compaction/branch summaries.
    pub summary_tokens: i64,
    /// Ceiling for a single summary entry.
    pub summary_entry_tokens: i64,
    /// Overall budget for anchor excerpts.
    pub anchor_tokens: i64,
    /// Per-excerpt budget for required anchors.
    pub required_anchor_tokens: i64,
    /// Per-excerpt budget for goal-matched optional anchors.
    pub optional_anchor_tokens: i64,
    /// Budget for the operational-context section.
    pub operational_tokens: i64,
    /// Budget for the file-list section.
    pub file_tokens: i64,
    /// Overall budget for the composer (pass 2) input.
    pub compose_input_tokens: i64,
    /// Lines of tool output retained per tool result.
    pub max_tool_output_lines: usize,
    /// Cap on operational highlight items.
    pub max_operational_items: usize,
    /// Trailing turns that are always required anchors.
    pub recent_turn_count: usize,
    /// Cap on each emitted file list.
    pub max_file_entries: usize,
}

impl Default for HandoffBudgets {
    fn default() -> Self {
        Self {
            max_extract_tokens: 7000,
            summary_tokens: 1800,
            summary_entry_tokens: 600,
            anchor_tokens: 2600,
            required_anchor_tokens: 220,
            optional_anchor_tokens: 260,
            operational_tokens: 800,
            file_tokens: 400,
            compose_input_tokens: 2200,
            max_tool_output_lines: 8,
            max_operational_items: 10,
            recent_turn_count: 2,
            max_file_entries: 60,
        }
    }
}

impl HandoffBudgets {
    /// Parse overrides from a host settings value; absent fields keep their
    /// defaults, an unparsable value falls back to all defaults.
    pub fn from_settings(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_are_stable() {
        let budgets = HandoffBudgets::default();
        assert_eq!(budgets.max_extract_tokens, 7000);
        assert_eq!(budgets.anchor_tokens, 2600);
        assert_eq!(budgets.compose_input_tokens, 2200);
        assert_eq!(budgets.max_tool_output_lines, 8);
        assert_eq!(budgets.recent_turn_count, 2);
        assert_eq!(budgets.max_file_entries, 60);
    }

    #[test]
    fn settings_override_individual_fields() {
        let budgets =
            HandoffBudgets::from_settings(&json!({"anchorTokens": 500, "recentTurnCount": 4}));
        assert_eq!(budgets.anchor_tokens, 500);
        assert_eq!(budgets.recent_turn_count, 4);
        assert_eq!(budgets.summary_tokens, 1800);
    }

    #[test]
    fn invalid_settings_fall_back_to_defaults() {
        let budgets = HandoffBudgets::from_settings(&json!("nonsense"));
        assert_eq!(budgets.max_extract_tokens, 7000);
    }
}
