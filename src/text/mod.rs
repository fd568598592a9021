/// Text normalization shared by phrase compilation and document matching.
///
/// A [`Normalizer`] turns raw text into a [`NormalizedDoc`]: tokens carrying
/// their folded form and byte offsets into the source, plus sentence
/// boundaries expressed as token ranges. Patterns and documents must go
/// through the same normalizer for matches to line up.
pub mod tokenizer;

use std::ops::Range;

use serde::{Deserialize, Serialize};

pub use tokenizer::RuleNormalizer;

/// How token text is folded before matching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMode {
    /// Lower-case only.
    #[default]
    Lower,
    /// Lower-case plus light suffix stripping ("arteries" -> "artery").
    Lemma,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte range of the token in the source text.
    pub range: Range<usize>,
    /// Folded form used for matching.
    pub norm: String,
}

/// Half-open token range `[start, end)` forming one sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sentence {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDoc {
    text: String,
    tokens: Vec<Token>,
    sentences: Vec<Sentence>,
}

impl NormalizedDoc {
    /// Assemble a document. Sentences must cover the tokens in order.
    #[must_use]
    pub fn new(text: String, tokens: Vec<Token>, sentences: Vec<Sentence>) -> Self {
        Self {
            text,
            tokens,
            sentences,
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Byte range in the source covered by tokens `[start, end)`.
    #[must_use]
    pub fn byte_range(&self, start: usize, end: usize) -> Range<usize> {
        if start >= end || end > self.tokens.len() {
            return 0..0;
        }
        self.tokens[start].range.start..self.tokens[end - 1].range.end
    }

    /// Source text covered by tokens `[start, end)`.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> &str {
        &self.text[self.byte_range(start, end)]
    }

    /// Index of the sentence containing token `token`.
    #[must_use]
    pub fn sentence_index(&self, token: usize) -> Option<usize> {
        let idx = self.sentences.partition_point(|s| s.end <= token);
        self.sentences
            .get(idx)
            .filter(|s| s.start <= token && token < s.end)
            .map(|_| idx)
    }

    /// Folded token forms joined by single spaces, with the byte offset at
    /// which each token starts in the joined string.
    #[must_use]
    pub fn joined_norms(&self) -> (String, Vec<usize>) {
        let mut joined = String::new();
        let mut starts = Vec::with_capacity(self.tokens.len());
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                joined.push(' ');
            }
            starts.push(joined.len());
            joined.push_str(&token.norm);
        }
        (joined, starts)
    }
}

/// Tokenization and folding policy.
///
/// Implementations must be `Send + Sync` so a compiled phrase index can be
/// shared behind `Arc`.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, text: &str) -> NormalizedDoc;

    /// Folded tokens of a pattern phrase.
    fn normalize_phrase(&self, phrase: &str) -> Vec<String> {
        self.normalize(phrase)
            .tokens
            .into_iter()
            .map(|t| t.norm)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_index_and_slice() {
        let doc = RuleNormalizer::default().normalize("Fever noted. Septic shock developed.");
        assert_eq!(doc.sentences().len(), 2);
        assert_eq!(doc.sentence_index(0), Some(0));
        assert_eq!(doc.sentence_index(3), Some(1));
        assert_eq!(doc.sentence_index(99), None);
        assert_eq!(doc.slice(3, 5), "Septic shock");
    }

    #[test]
    fn test_joined_norms() {
        let doc = RuleNormalizer::default().normalize("Septic  Shock");
        let (joined, starts) = doc.joined_norms();
        assert_eq!(joined, "septic shock");
        assert_eq!(starts, vec![0, 7]);
    }

    #[test]
    fn test_byte_range_empty() {
        let doc = RuleNormalizer::default().normalize("abc");
        assert_eq!(doc.byte_range(1, 1), 0..0);
        assert_eq!(doc.slice(0, 5), "");
    }
}
