/// Ontology phrase matching over normalized text.
///
/// - [`automaton`]: pure multi-pattern matcher over folded token sequences
/// - [`resolver`]: short-span filtering and longest-match overlap resolution
/// - [`phrase_index`]: ontology-backed index tying both to a [`Normalizer`]
///
/// [`Normalizer`]: crate::text::Normalizer
pub mod automaton;
pub mod phrase_index;
pub mod resolver;

use thiserror::Error;

use crate::ontology::Cui;
use crate::text::NormalizedDoc;

pub use automaton::PhraseAutomaton;
pub use phrase_index::PhraseIndex;
pub use resolver::SpanResolver;

/// Errors raised while compiling a phrase index.
#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("concept {cui} has no synonyms in the loaded ontology")]
    MissingSynonyms { cui: Cui },

    #[error("failed to build phrase automaton: {0}")]
    Automaton(String),
}

/// One concept occurrence in a document.
///
/// `start..end` are token offsets; `char_start..char_end` are the matching
/// byte offsets into the document's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub cui: Cui,
    pub doc_index: usize,
}

impl MatchSpan {
    /// Span over tokens `[start, end)` of `doc`.
    #[must_use]
    pub fn from_tokens(doc: &NormalizedDoc, start: usize, end: usize, cui: Cui) -> Self {
        let range = doc.byte_range(start, end);
        Self {
            start,
            end,
            char_start: range.start,
            char_end: range.end,
            cui,
            doc_index: 0,
        }
    }

    #[must_use]
    pub fn text<'d>(&self, doc: &'d NormalizedDoc) -> &'d str {
        doc.text().get(self.char_start..self.char_end).unwrap_or_default()
    }

    #[must_use]
    pub fn token_len(&self) -> usize {
        self.end - self.start
    }
}

/// A document together with its resolved, disjoint concept spans.
#[derive(Debug, Clone)]
pub struct AnnotatedDoc {
    /// Position of the document in the batch it was annotated with.
    pub index: usize,
    pub doc: NormalizedDoc,
    /// Disjoint spans sorted by start offset.
    pub spans: Vec<MatchSpan>,
}

impl AnnotatedDoc {
    /// Distinct concept ids found in the document, in span order.
    #[must_use]
    pub fn cuis(&self) -> Vec<Cui> {
        let mut cuis = Vec::new();
        for span in &self.spans {
            if !cuis.contains(&span.cui) {
                cuis.push(span.cui);
            }
        }
        cuis
    }

    #[must_use]
    pub fn has_matches(&self) -> bool {
        !self.spans.is_empty()
    }
}
