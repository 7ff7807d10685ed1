//! Goal-conditioned turn scoring.
//!
//! The goal is tokenized once; every turn is scored against the tokens and
//! against its own file paths. Scores only order turns relative to each
//! other, so the weights are small integers.

use crate::indexer::{BranchIndex, Turn};

/// A tokenized goal, ready for scoring.
#[derive(Debug, Clone)]
pub struct GoalTokens {
    goal_lower: String,
    tokens: Vec<String>,
}

impl GoalTokens {
    /// Tokenize: lowercase, split on anything outside `[a-z0-9_./-]`, keep
    /// tokens of length >= 3.
    pub fn new(goal: &str) -> Self {
        let goal_lower = goal.to_lowercase();
        let tokens = goal_lower
            .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '/' | '-')))
            .filter(|t| t.len() >= 3)
            .map(str::to_string)
            .collect();
        Self { goal_lower, tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Score one turn against the goal.
    pub fn score_turn(&self, turn: &Turn) -> i64 {
        if self.tokens.is_empty() {
            return 0;
        }

        let mut score = 0i64;
        for token in &self.tokens {
            if turn.search_text.contains(token.as_str()) {
                score += if token.len() > 4 { 2 } else { 1 };
            }
        }

        for path in &turn.file_paths {
            let path_lower = path.to_lowercase();
            if self.goal_lower.contains(&path_lower) {
                score += 3;
            }
            for token in &self.tokens {
                if path_lower.contains(token.as_str()) {
                    score += 1;
                }
            }
        }

        score
    }
}

/// Score every turn in place.
pub fn apply_goal_scores(index: &mut BranchIndex, goal: &GoalTokens) {
    for turn in &mut index.turns {
        turn.goal_score = goal.score_turn(turn);
    }
}
