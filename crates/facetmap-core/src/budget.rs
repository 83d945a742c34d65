//! Greedy token-budget selection over an ordered list of segments.

use crate::tokenizer::TokenCounter;

/// The prefix of segments that fits within a token budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetSelection<'a, S> {
    pub kept: &'a [S],
    /// Sum of the per-segment token counts of `kept`.
    pub total_tokens: usize,
    /// Number of segments offered to the selector.
    pub offered: usize,
}

impl<S> BudgetSelection<'_, S> {
    /// True when no segment fit: the paper has nothing to send.
    pub fn is_exhausted(&self) -> bool {
        self.kept.is_empty()
    }
}

/// Keep segments in order while the running total stays within `budget`.
///
/// Stops at the first segment that would overflow, so the result is always a
/// prefix of `segments`. Segments are never truncated; a first segment larger
/// than the whole budget yields an empty selection.
pub fn select_within_budget<'a, S, C>(
    segments: &'a [S],
    counter: &C,
    budget: usize,
) -> BudgetSelection<'a, S>
where
    S: AsRef<str>,
    C: TokenCounter + ?Sized,
{
    let mut total = 0usize;
    let mut end = 0usize;
    for seg in segments {
        let tokens = counter.count_tokens(seg.as_ref());
        match total.checked_add(tokens) {
            Some(next) if next <= budget => {
                total = next;
                end += 1;
            }
            _ => break,
        }
    }
    BudgetSelection {
        kept: &segments[..end],
        total_tokens: total,
        offered: segments.len(),
    }
}
