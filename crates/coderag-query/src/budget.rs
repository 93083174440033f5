//! Token budget for the serialized result list.

use coderag_core::{FusedResult, Result};

/// Estimation ratio used for budgeting; no tokenizer is involved.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of a text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// What [`apply_token_budget`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BudgetReport {
    /// Results whose content was shortened.
    pub trimmed: usize,
    /// Lowest-ranked results removed because not even their fields fit.
    pub dropped: usize,
}

/// Fit the JSON serialization of `results` into `max_tokens`.
///
/// Works upward from the lowest rank. A result whose fields fit in what is
/// left keeps a prefix of its content (cut on a char boundary, with
/// `metadata.truncated = true`); one that does not fit even with empty
/// content is removed. Scores, ranks and order of the survivors are left
/// alone.
pub fn apply_token_budget(results: &mut Vec<FusedResult>, max_tokens: usize) -> Result<BudgetReport> {
    let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut report = BudgetReport::default();
    let mut total = serialized_chars(results.as_slice())?;

    while total > budget {
        let Some(last) = results.last_mut() else {
            break;
        };

        let full = serialized_chars(&*last)?;
        let mut stripped = last.clone();
        stripped.content.clear();
        stripped.metadata.truncated = true;
        let without_content = total - full + serialized_chars(&stripped)?;

        let room = budget.saturating_sub(without_content);
        if without_content < budget {
            let kept = content_prefix(&last.content, room);
            if kept > 0 {
                last.content.truncate(kept);
                last.metadata.truncated = true;
                report.trimmed += 1;
                break;
            }
        }

        results.pop();
        report.dropped += 1;
        total = serialized_chars(results.as_slice())?;
    }

    Ok(report)
}

fn serialized_chars<T: serde::Serialize + ?Sized>(value: &T) -> Result<usize> {
    Ok(serde_json::to_string(value)?.chars().count())
}

/// Byte length of the longest prefix of `content` whose JSON-escaped form
/// is at most `room` chars.
fn content_prefix(content: &str, room: usize) -> usize {
    let mut used = 0;
    for (i, c) in content.char_indices() {
        used += escaped_len(c);
        if used > room {
            return i;
        }
    }
    content.len()
}

/// Chars `c` occupies inside a JSON string.
fn escaped_len(c: char) -> usize {
    match c {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if (c as u32) < 0x20 => 6,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderag_core::ResultMetadata;
    use std::collections::BTreeMap;

    fn result(rank: u32, content: &str) -> FusedResult {
        FusedResult {
            rank,
            chunk_id: format!("r:{}", rank),
            repo: "r".to_string(),
            content: content.to_string(),
            fused_score: 1.0 / rank as f32,
            per_source_scores: BTreeMap::new(),
            metadata: ResultMetadata::default(),
        }
    }

    fn size(results: &[FusedResult]) -> usize {
        serde_json::to_string(results).unwrap().chars().count()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_within_budget_is_untouched() {
        let mut results = vec![result(1, "abcd"), result(2, "efgh")];
        let max_tokens = size(&results).div_ceil(CHARS_PER_TOKEN);
        let report = apply_token_budget(&mut results, max_tokens).unwrap();
        assert_eq!(report, BudgetReport::default());
        assert_eq!(results[1].content, "efgh");
        assert!(!results[1].metadata.truncated);
    }

    #[test]
    fn test_lowest_ranked_trimmed_first() {
        let a = "a".repeat(40);
        let b = "b".repeat(40);
        let c = "c".repeat(40);
        let mut results = vec![result(1, &a), result(2, &b), result(3, &c)];
        let max_tokens = (size(&results) - 20) / CHARS_PER_TOKEN;

        let report = apply_token_budget(&mut results, max_tokens).unwrap();
        assert_eq!(report, BudgetReport { trimmed: 1, dropped: 0 });
        assert!(size(&results) <= max_tokens * CHARS_PER_TOKEN);
        assert_eq!(results[0].content, a);
        assert_eq!(results[1].content, b);
        assert!(!results[1].metadata.truncated);
        assert!(results[2].content.len() < 40);
        assert!(results[2].metadata.truncated);
        assert_eq!(results[2].fused_score, 1.0 / 3.0);
    }

    #[test]
    fn test_results_whose_fields_do_not_fit_are_dropped() {
        let first = result(1, "fn login() {}");
        let max_tokens = size(&[first.clone()]).div_ceil(CHARS_PER_TOKEN);
        let mut results = vec![first.clone(), result(2, "fn logout() {}"), result(3, "x")];

        let report = apply_token_budget(&mut results, max_tokens).unwrap();
        assert_eq!(report.dropped, 2);
        assert_eq!(results, vec![first]);
    }

    #[test]
    fn test_tiny_budget_drops_everything() {
        let mut results = vec![result(1, "abcd"), result(2, "efgh")];
        let report = apply_token_budget(&mut results, 1).unwrap();
        assert_eq!(report.dropped, 2);
        assert!(results.is_empty());
    }

    #[test]
    fn test_escaped_content_is_charged() {
        let content = "say \"hi\"\n\ttab\\slash\n".repeat(10);
        let mut results = vec![result(1, &content)];
        let max_tokens = (size(&results) - 40) / CHARS_PER_TOKEN;

        apply_token_budget(&mut results, max_tokens).unwrap();
        assert!(size(&results) <= max_tokens * CHARS_PER_TOKEN);
        assert!(content.starts_with(&results[0].content));
        assert!(results[0].metadata.truncated);
    }

    #[test]
    fn test_multibyte_content_trimmed_on_char_boundary() {
        let content = "héllo wörld ✓✓✓✓".repeat(4);
        let mut results = vec![result(1, &content)];
        let max_tokens = (size(&results) - 10) / CHARS_PER_TOKEN;

        apply_token_budget(&mut results, max_tokens).unwrap();
        assert!(size(&results) <= max_tokens * CHARS_PER_TOKEN);
        assert!(content.starts_with(&results[0].content));
        assert!(results[0].content.chars().count() < content.chars().count());
    }
}
