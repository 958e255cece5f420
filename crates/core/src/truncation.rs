//! Token-budget truncation of prompt segments.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SerializerError};
use crate::template::Role;

/// Tokens kept verbatim at the end of a segment that has to be cut.
///
/// Three covers the closing turn delimiter for the common tokenizers; it is
/// tokenizer dependent, hence configurable.
pub const DEFAULT_TAIL_PRESERVE: usize = 3;

/// How a prompt body is brought under its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Drop whole segments from the front (oldest first). If nothing
    /// survives, cut the last segment to its head plus `tail_preserve`
    /// final tokens.
    DropOldest { tail_preserve: usize },
    /// Keep the first `budget` tokens of the concatenated body.
    KeepHead,
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        Self::DropOldest {
            tail_preserve: DEFAULT_TAIL_PRESERVE,
        }
    }
}

/// A tokenized segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSegment {
    pub role: Role,
    pub ids: Vec<u32>,
}

impl TokenSegment {
    pub fn new(role: Role, ids: Vec<u32>) -> Self {
        Self { role, ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn concat(segments: &[TokenSegment]) -> Vec<u32> {
    segments.iter().flat_map(|s| s.ids.iter().copied()).collect()
}

/// Fit `segments` into at most `budget` tokens, preserving order.
///
/// A zero budget or an empty segment list yields an empty sequence.
pub fn fit_to_budget(segments: &[TokenSegment], budget: usize, policy: TruncationPolicy) -> Vec<u32> {
    let total: usize = segments.iter().map(TokenSegment::len).sum();
    if total <= budget {
        return concat(segments);
    }

    match policy {
        TruncationPolicy::KeepHead => {
            let mut ids = concat(segments);
            ids.truncate(budget);
            ids
        }
        TruncationPolicy::DropOldest { tail_preserve } => {
            let mut excess = total - budget;
            let mut first_kept = 0;
            while excess > 0 && first_kept < segments.len() {
                excess = excess.saturating_sub(segments[first_kept].len());
                first_kept += 1;
            }

            if first_kept < segments.len() {
                return concat(&segments[first_kept..]);
            }

            // Nothing fits whole: keep the head of the latest segment and its
            // closing tokens.
            let Some(last) = segments.last() else {
                return Vec::new();
            };
            cut_keeping_tail(&last.ids, budget, tail_preserve)
        }
    }
}

/// `ids[..budget - tail] ++ ids[len - tail..]`, with `tail` capped at `budget`.
fn cut_keeping_tail(ids: &[u32], budget: usize, tail_preserve: usize) -> Vec<u32> {
    if ids.len() <= budget {
        return ids.to_vec();
    }
    let tail = tail_preserve.min(budget);
    let head = budget - tail;
    let mut out = Vec::with_capacity(budget);
    out.extend_from_slice(&ids[..head]);
    out.extend_from_slice(&ids[ids.len() - tail..]);
    out
}

/// Assemble a prompt: fixed header, truncated body, fixed trailer.
///
/// The body budget is `max_source_length` minus the fixed parts. A non-empty
/// body with no room left is a `LengthInvariant` error rather than a prompt
/// whose body has been dropped entirely.
pub fn fit_prompt(
    header: &[TokenSegment],
    body: &[TokenSegment],
    trailer: &[TokenSegment],
    max_source_length: usize,
    policy: TruncationPolicy,
) -> Result<Vec<u32>> {
    let fixed: usize = header.iter().chain(trailer).map(TokenSegment::len).sum();
    let budget = max_source_length.saturating_sub(fixed);
    if budget == 0 && body.iter().any(|s| !s.is_empty()) {
        return Err(SerializerError::LengthInvariant(format!(
            "fixed prompt parts take {} of {} source tokens, leaving none for the body",
            fixed, max_source_length
        )));
    }

    let mut ids = concat(header);
    ids.extend(fit_to_budget(body, budget, policy));
    ids.extend(concat(trailer));
    Ok(ids)
}
