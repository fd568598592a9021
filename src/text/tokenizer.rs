/// Rule-based tokenizer and sentence splitter.
///
/// Tokens are numbers (with internal `.`, `,`, `:` or `/`), words (with
/// internal apostrophes) or single punctuation characters. A sentence ends
/// after a `.`, `!` or `?` token, and a line break always starts a new one.
use std::sync::LazyLock;

use regex::Regex;

use super::{NormalizeMode, NormalizedDoc, Normalizer, Sentence, Token};

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\p{N}+(?:[.,:/]\p{N}+)*|[\p{L}\p{N}]+(?:['’]\p{L}+)*|[^\s\p{L}\p{N}]").unwrap()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleNormalizer {
    mode: NormalizeMode,
}

impl RuleNormalizer {
    #[must_use]
    pub fn new(mode: NormalizeMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn mode(&self) -> NormalizeMode {
        self.mode
    }

    fn fold(&self, token: &str) -> String {
        let lower = token.to_lowercase();
        match self.mode {
            NormalizeMode::Lower => lower,
            NormalizeMode::Lemma => fold_lemma(lower),
        }
    }
}

impl Normalizer for RuleNormalizer {
    fn normalize(&self, text: &str) -> NormalizedDoc {
        let mut tokens = Vec::new();
        let mut sentences = Vec::new();
        let mut sentence_start = 0;
        let mut prev_end = 0;

        for m in TOKEN.find_iter(text) {
            let idx = tokens.len();
            if idx > sentence_start && text[prev_end..m.start()].contains('\n') {
                sentences.push(Sentence {
                    start: sentence_start,
                    end: idx,
                });
                sentence_start = idx;
            }

            tokens.push(Token {
                range: m.range(),
                norm: self.fold(m.as_str()),
            });
            prev_end = m.end();

            if matches!(m.as_str(), "." | "!" | "?") {
                sentences.push(Sentence {
                    start: sentence_start,
                    end: idx + 1,
                });
                sentence_start = idx + 1;
            }
        }

        if sentence_start < tokens.len() {
            sentences.push(Sentence {
                start: sentence_start,
                end: tokens.len(),
            });
        }

        NormalizedDoc::new(text.to_string(), tokens, sentences)
    }
}

/// Strip common English plural endings from a lower-cased word.
fn fold_lemma(word: String) -> String {
    if word.chars().count() <= 4 || !word.chars().all(char::is_alphabetic) {
        return word;
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with('s') && !["ss", "us", "is"].iter().any(|s| word.ends_with(s)) {
        return word[..word.len() - 1].to_string();
    }
    word
}
