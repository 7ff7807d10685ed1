//! Bundle assembly: the two LLM pass inputs.
//!
//! Both artifacts are plain labelled-section strings. Per-section budgets
//! bound each part, and the whole artifact passes through a final token
//! truncation so the overall budget holds no matter what the branch holds.

use crate::anchors::Anchor;
use crate::config::HandoffBudgets;
use crate::indexer::SummaryRecord;
use crate::operational::OperationalItem;
use crate::redact::redact;
use crate::tokens::truncate_to_tokens;
use std::fmt::Write as _;

const EMPTY_SECTION: &str = "(none)";

fn push_section(out: &mut String, label: &str, body: &str) {
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(label);
    out.push('\n');
    if body.is_empty() {
        out.push_str(EMPTY_SECTION);
    } else {
        out.push_str(body);
    }
}

fn render_summaries(summaries: &[SummaryRecord], budgets: &HandoffBudgets) -> String {
    if summaries.is_empty() {
        return String::new();
    }

    let per_entry = budgets
        .summary_entry_tokens
        .min(budgets.summary_tokens / summaries.len() as i64);

    let mut out = String::new();
    for record in summaries {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let _ = writeln!(out, "[{} {}]", record.kind.label(), record.entry_id);
        out.push_str(&truncate_to_tokens(&redact(&record.summary), per_entry));
    }
    out
}

fn render_anchors(anchors: &[Anchor<'_>]) -> String {
    let mut out = String::new();
    for anchor in anchors {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let _ = writeln!(
            out,
            "### Turn {} ({})",
            anchor.turn.index + 1,
            anchor.reason.label()
        );
        out.push_str(&anchor.excerpt);
    }
    out
}

fn render_operational(items: &[OperationalItem], budget: i64) -> String {
    let mut out = String::new();
    for item in items {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("- ");
        out.push_str(&item.text);
    }
    truncate_to_tokens(&out, budget)
}

fn render_files(read: &[String], modified: &[String], budget: i64) -> String {
    if read.is_empty() && modified.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    if !read.is_empty() {
        out.push_str("Read-only:\n");
        for path in read {
            let _ = writeln!(out, "- {path}");
        }
    }
    if !modified.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("Modified:\n");
        for path in modified {
            let _ = writeln!(out, "- {path}");
        }
    }
    truncate_to_tokens(out.trim_end(), budget)
}

/// Assemble the extractor (pass 1) input.
pub fn assemble_extractor_input(
    goal: &str,
    summaries: &[SummaryRecord],
    anchors: &[Anchor<'_>],
    items: &[OperationalItem],
    read_files: &[String],
    modified_files: &[String],
    budgets: &HandoffBudgets,
) -> String {
    let mut out = format!("Goal: {goal}");
    push_section(&mut out, "Summaries:", &render_summaries(summaries, budgets));
    push_section(&mut out, "Anchors:", &render_anchors(anchors));
    push_section(
        &mut out,
        "Operational context:",
        &render_operational(items, budgets.operational_tokens),
    );
    push_section(
        &mut out,
        "Files:",
        &render_files(read_files, modified_files, budgets.file_tokens),
    );
    truncate_to_tokens(&out, budgets.max_extract_tokens)
}

/// Assemble the composer (pass 2) input from the pass-1 facts bundle.
pub fn assemble_composer_input(
    goal: &str,
    facts_bundle: &str,
    items: &[OperationalItem],
    read_files: &[String],
    modified_files: &[String],
    budgets: &HandoffBudgets,
) -> String {
    let mut out = format!("Goal: {goal}");
    push_section(&mut out, "Extracted facts bundle:", facts_bundle.trim());
    push_section(
        &mut out,
        "Operational context:",
        &render_operational(items, budgets.operational_tokens),
    );
    push_section(
        &mut out,
        "Files:",
        &render_files(read_files, modified_files, budgets.file_tokens),
    );
    truncate_to_tokens(&out, budgets.compose_input_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::{select_anchors, AnchorReason};
    use crate::indexer::{BranchIndex, SummaryKind, Turn};
    use crate::tokens::estimate_tokens;
    use proptest::prelude::*;
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

    fn summary(kind: SummaryKind, id: &str, text: &str) -> SummaryRecord {
        SummaryRecord {
            kind,
            entry_id: id.to_string(),
            summary: text.to_string(),
        }
    }

    #[test]
    fn extractor_input_has_all_sections_in_order() {
        let index = BranchIndex {
            turns: vec![make_turn(0, "start here")],
            ..Default::default()
        };
        let anchors = select_anchors(&index, &HandoffBudgets::default());
        let summaries = vec![summary(SummaryKind::Compaction, "c1", "earlier work")];
        let items = vec![OperationalItem {
            text: "bash: make  -> ok".to_string(),
            is_error: false,
            score: 1,
        }];
        let read = vec!["src/a.rs".to_string()];
        let modified = vec!["src/b.rs".to_string()];

        let input = assemble_extractor_input(
            "continue migration",
            &summaries,
            &anchors,
            &items,
            &read,
            &modified,
            &HandoffBudgets::default(),
        );

        assert!(input.starts_with("Goal: continue migration"));
        let summaries_at = input.find("Summaries:").expect("summaries section");
        let anchors_at = input.find("Anchors:").expect("anchors section");
        let operational_at = input.find("Operational context:").expect("operational");
        let files_at = input.find("Files:").expect("files section");
        assert!(summaries_at < anchors_at);
        assert!(anchors_at < operational_at);
        assert!(operational_at < files_at);

        assert!(input.contains("[compaction c1]\nearlier work"));
        assert!(input.contains("### Turn 1 (first user)\n[User]: start here"));
        assert!(input.contains("- bash: make  -> ok"));
        assert!(input.contains("Read-only:\n- src/a.rs"));
        assert!(input.contains("Modified:\n- src/b.rs"));
    }

    #[test]
    fn empty_sections_render_none() {
        let input = assemble_extractor_input(
            "goal",
            &[],
            &[],
            &[],
            &[],
            &[],
            &HandoffBudgets::default(),
        );
        assert!(input.contains("Summaries:\n(none)"));
        assert!(input.contains("Anchors:\n(none)"));
        assert!(input.contains("Operational context:\n(none)"));
        assert!(input.contains("Files:\n(none)"));
    }

    #[test]
    fn summary_budget_splits_across_entries() {
        let long = "s".repeat(8000);
        let summaries = vec![
            summary(SummaryKind::Compaction, "c1", &long),
            summary(SummaryKind::BranchSummary, "b1", &long),
            summary(SummaryKind::Compaction, "c2", &long),
        ];
        let budgets = HandoffBudgets::default();
        let rendered = render_summaries(&summaries, &budgets);
        // 1800 / 3 = 600 tokens = 2400 bytes per entry, marker included.
        for chunk in rendered.split("\n\n") {
            assert!(estimate_tokens(chunk) <= 610);
        }
        assert!(rendered.contains("[branch_summary b1]"));
    }

    #[test]
    fn summaries_are_redacted() {
        let summaries = vec![summary(
            SummaryKind::Compaction,
            "c1",
            "set TOKEN=verysecretvalue before running",
        )];
        let rendered = render_summaries(&summaries, &HandoffBudgets::default());
        assert!(!rendered.contains("verysecretvalue"));
        assert!(rendered.contains("TOKEN=[REDACTED]"));
    }

    #[test]
    fn composer_input_carries_facts_bundle() {
        let input = assemble_composer_input(
            "ship it",
            "## Goal\nship it\n\n## Decisions\n- none",
            &[],
            &[],
            &[],
            &HandoffBudgets::default(),
        );
        assert!(input.starts_with("Goal: ship it"));
        assert!(input.contains("Extracted facts bundle:\n## Goal"));
        assert!(input.contains("Operational context:\n(none)"));
    }

    #[test]
    fn anchor_reasons_appear_in_headers() {
        let mut turns: Vec<Turn> = (0..4).map(|i| make_turn(i, &format!("turn {i}"))).collect();
        turns[1].has_error = true;
        let index = BranchIndex {
            turns,
            ..Default::default()
        };
        let anchors = select_anchors(&index, &HandoffBudgets::default());
        let rendered = render_anchors(&anchors);
        assert!(rendered.contains("### Turn 1 (first user)"));
        assert!(rendered.contains("### Turn 2 (error)"));
        assert!(anchors.iter().any(|a| a.reason == AnchorReason::Error));
    }

    proptest! {
        // Overall budgets hold for arbitrary goals and summary contents.
        #[test]
        fn extractor_budget_always_holds(
            goal in "\\PC{0,400}",
            summary_text in "\\PC{0,4000}",
        ) {
            let budgets = HandoffBudgets {
                max_extract_tokens: 300,
                ..Default::default()
            };
            let summaries = vec![summary(SummaryKind::Compaction, "c1", &summary_text)];
            let input = assemble_extractor_input(
                &goal, &summaries, &[], &[], &[], &[], &budgets,
            );
            prop_assert!(estimate_tokens(&input) <= 300);
        }

        #[test]
        fn composer_budget_always_holds(facts in "\\PC{0,6000}") {
            let budgets = HandoffBudgets {
                compose_input_tokens: 250,
                ..Default::default()
            };
            let input = assemble_composer_input("goal", &facts, &[], &[], &[], &budgets);
            prop_assert!(estimate_tokens(&input) <= 250);
        }
    }
}
