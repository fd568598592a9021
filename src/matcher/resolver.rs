/// Turns raw, overlapping phrase hits into a disjoint span set.
///
/// Spans are first filtered by character length, then resolved greedily:
/// longest first, earlier start first on equal length, emission order after
/// that. A span is accepted only if it shares no token with an accepted span.
use std::cmp::Reverse;

use super::MatchSpan;
use crate::text::NormalizedDoc;

const DEFAULT_MIN_LEN: usize = 3;
const DEFAULT_MIN_ACRONYM_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanResolver {
    /// Minimum character length of a match.
    pub min_len: usize,
    /// Minimum character length when the matched text is upper-case.
    pub min_acronym_len: usize,
}

impl Default for SpanResolver {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_LEN,
            min_acronym_len: DEFAULT_MIN_ACRONYM_LEN,
        }
    }
}

impl SpanResolver {
    /// Whether `text` is long enough to count as a match.
    #[must_use]
    pub fn is_long_enough(&self, text: &str) -> bool {
        let min_len = if is_upper_case(text) {
            self.min_acronym_len
        } else {
            self.min_len
        };
        text.chars().count() >= min_len
    }

    /// Filter then resolve `spans` over `doc`; output is sorted by start.
    #[must_use]
    pub fn resolve(&self, doc: &NormalizedDoc, spans: Vec<MatchSpan>) -> Vec<MatchSpan> {
        let mut candidates: Vec<(usize, MatchSpan)> = spans
            .into_iter()
            .filter_map(|span| {
                let text = span.text(doc);
                self.is_long_enough(text)
                    .then(|| (text.chars().count(), span))
            })
            .collect();

        // Stable: equal keys keep emission order.
        candidates.sort_by_key(|&(len, span)| (Reverse(len), span.start));

        let mut claimed = vec![false; doc.len()];
        let mut accepted = Vec::new();
        for (_, span) in candidates {
            let end = span.end.min(claimed.len());
            if span.start >= end || claimed[span.start..end].iter().any(|&c| c) {
                continue;
            }
            claimed[span.start..end].iter_mut().for_each(|c| *c = true);
            accepted.push(span);
        }

        accepted.sort_by_key(|span| span.start);
        accepted
    }
}

/// At least one cased character and no lower-case ones.
fn is_upper_case(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}
