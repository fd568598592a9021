/// Context windows around matched spans.
use std::collections::HashSet;
use std::ops::Range;

use crate::matcher::MatchSpan;
use crate::text::NormalizedDoc;

use super::Extract;

pub const DEFAULT_TOKEN_WINDOW_SIZE: usize = 50;
pub const DEFAULT_SENTENCE_WINDOW_SIZE: usize = 2;

/// Dual window policy: `sentence_window_size` sentences either side of the
/// matching sentence, unless that spans more than `2 * token_window_size`
/// tokens, in which case `token_window_size` tokens either side of the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub token_window_size: usize,
    pub sentence_window_size: usize,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            token_window_size: DEFAULT_TOKEN_WINDOW_SIZE,
            sentence_window_size: DEFAULT_SENTENCE_WINDOW_SIZE,
        }
    }
}

impl WindowPolicy {
    #[must_use]
    pub fn max_window_tokens(&self) -> usize {
        self.token_window_size * 2
    }

    /// Token range of the context window around `span`.
    #[must_use]
    pub fn context(&self, doc: &NormalizedDoc, span: &MatchSpan) -> Range<usize> {
        let sentences = doc.sentences();
        let Some(sent_idx) = doc.sentence_index(span.start) else {
            return self.token_window(doc, span);
        };

        let first = sent_idx.saturating_sub(self.sentence_window_size);
        let last = (sent_idx + self.sentence_window_size).min(sentences.len() - 1);
        let start = sentences[first].start.min(span.start);
        let end = sentences[last].end.max(span.end);

        if end - start > self.max_window_tokens() {
            self.token_window(doc, span)
        } else {
            start..end
        }
    }

    fn token_window(&self, doc: &NormalizedDoc, span: &MatchSpan) -> Range<usize> {
        span.start.saturating_sub(self.token_window_size)
            ..(span.end + self.token_window_size).min(doc.len())
    }
}

/// A token window inside one document of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub doc_index: usize,
    pub start: usize,
    pub end: usize,
}

/// Merge overlapping or abutting windows of the same document.
///
/// Windows are ordered by document then start; a window starting at or
/// before the current end extends it, and contained windows disappear.
#[must_use]
pub fn merge_windows(mut windows: Vec<Window>) -> Vec<Window> {
    windows.sort_by_key(|w| (w.doc_index, w.start));

    let mut merged: Vec<Window> = Vec::with_capacity(windows.len());
    for window in windows {
        match merged.last_mut() {
            Some(current)
                if current.doc_index == window.doc_index && window.start <= current.end =>
            {
                current.end = current.end.max(window.end);
            }
            _ => merged.push(window),
        }
    }
    merged
}

/// Drop extracts whose text was already seen; the first occurrence wins.
#[must_use]
pub fn dedupe_by_text(extracts: Vec<Extract>) -> Vec<Extract> {
    let mut seen = HashSet::new();
    extracts
        .into_iter()
        .filter(|e| seen.insert(e.text.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{Normalizer, RuleNormalizer};

    fn window(doc_index: usize, start: usize, end: usize) -> Window {
        Window {
            doc_index,
            start,
            end,
        }
    }

    #[test]
    fn test_sentence_window() {
        let doc = RuleNormalizer::default()
            .normalize("One. Two. Septic shock today. Three. Four. Five.");
        let span = MatchSpan::from_tokens(&doc, 4, 6, 1);
        let policy = WindowPolicy {
            token_window_size: 50,
            sentence_window_size: 1,
        };

        let range = policy.context(&doc, &span);
        assert_eq!(doc.slice(range.start, range.end), "Two. Septic shock today. Three.");
    }

    #[test]
    fn test_sentence_window_clamped_at_edges() {
        let doc = RuleNormalizer::default().normalize("Septic shock. Fine.");
        let span = MatchSpan::from_tokens(&doc, 0, 2, 1);
        let range = WindowPolicy::default().context(&doc, &span);
        assert_eq!(range, 0..doc.len());
    }

    #[test]
    fn test_falls_back_to_token_window() {
        let filler = "word ".repeat(30);
        let text = format!("{filler}septic shock {filler}");
        let doc = RuleNormalizer::default().normalize(&text);
        let span = MatchSpan::from_tokens(&doc, 30, 32, 1);
        let policy = WindowPolicy {
            token_window_size: 5,
            sentence_window_size: 2,
        };

        assert_eq!(policy.context(&doc, &span), 25..37);
    }

    #[test]
    fn test_token_window_clamped() {
        let doc = RuleNormalizer::default().normalize(&"word ".repeat(20));
        let span = MatchSpan::from_tokens(&doc, 1, 2, 1);
        let policy = WindowPolicy {
            token_window_size: 3,
            sentence_window_size: 0,
        };
        assert_eq!(policy.context(&doc, &span), 0..5);
    }

    #[test]
    fn test_merge_overlapping_and_abutting() {
        let merged = merge_windows(vec![
            window(0, 10, 20),
            window(0, 0, 5),
            window(0, 5, 8),
            window(0, 12, 15),
            window(0, 18, 25),
            window(1, 0, 4),
        ]);
        assert_eq!(merged, vec![window(0, 0, 8), window(0, 10, 25), window(1, 0, 4)]);
    }

    #[test]
    fn test_merge_keeps_documents_apart() {
        let merged = merge_windows(vec![window(1, 0, 10), window(0, 0, 10)]);
        assert_eq!(merged, vec![window(0, 0, 10), window(1, 0, 10)]);
    }

    #[test]
    fn test_dedupe_by_text() {
        let extract = |doc_index: usize, text: &str| Extract {
            doc_index,
            start: 0,
            end: 1,
            char_start: 0,
            char_end: text.len(),
            text: text.to_string(),
        };
        let deduped = dedupe_by_text(vec![
            extract(0, "Patient denies chest pain."),
            extract(1, "Chest pain on exertion."),
            extract(2, "Patient denies chest pain."),
        ]);
        let docs: Vec<usize> = deduped.iter().map(|e| e.doc_index).collect();
        assert_eq!(docs, vec![0, 1]);
    }
}
