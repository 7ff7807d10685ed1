//! Cheap deterministic token estimation for budgeting.
//!
//! Four bytes per token, rounded up. Intentionally crude: budgets here bound
//! prompt assembly, they do not bill anyone.

/// Approximate bytes per token for English/code text.
const BYTES_PER_TOKEN: usize = 4;

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(BYTES_PER_TOKEN)
}

/// Floor `index` to the nearest char boundary of `text`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Truncate `text` so its estimated token count never exceeds `max_tokens`.
///
/// The truncation marker counts against the budget: the output, marker
/// included, stays within `4 * max_tokens` bytes. Non-positive budgets yield
/// the empty string.
pub fn truncate_to_tokens(text: &str, max_tokens: i64) -> String {
    if max_tokens <= 0 {
        return String::new();
    }
    #[allow(clippy::cast_sign_loss)]
    let max_bytes = max_tokens as usize * BYTES_PER_TOKEN;
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let keep = max_bytes.saturating_sub(TRUNCATION_MARKER.len());
    if keep == 0 {
        // Budget too small for the marker itself; hard cut.
        return text[..floor_char_boundary(text, max_bytes)].to_string();
    }
    let cut = floor_char_boundary(text, keep);
    let mut out = text[..cut].to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Keep the first `max_lines` lines, noting how many were dropped.
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let total = text.lines().count();
    if total <= max_lines {
        return text.to_string();
    }

    let kept = text
        .lines()
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n");
    let dropped = total - max_lines;
    format!("{kept}\n...[{dropped} more lines truncated]")
}
