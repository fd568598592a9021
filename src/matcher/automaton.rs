/// Multi-pattern phrase automaton over folded tokens.
///
/// Patterns and documents are both reduced to their folded tokens joined by
/// single spaces; an Aho-Corasick automaton then reports every occurrence,
/// overlaps included. Hits that do not start and end on token boundaries are
/// discarded, so "shock" never fires inside "shocked".
use std::collections::{BTreeMap, BTreeSet};

use aho_corasick::{AhoCorasick, MatchKind};
use tracing::debug;

use super::{MatchSpan, MatcherError};
use crate::ontology::Cui;
use crate::text::NormalizedDoc;

#[derive(Debug, Clone, Default)]
pub struct PhraseAutomaton {
    automaton: Option<AhoCorasick>,
    /// Concept labels per pattern id.
    labels: Vec<Vec<Cui>>,
}

impl PhraseAutomaton {
    /// Compile `(label, folded tokens)` patterns. Identical phrases under
    /// several labels share one pattern and report every label.
    pub fn build<I>(patterns: I) -> Result<Self, MatcherError>
    where
        I: IntoIterator<Item = (Cui, Vec<String>)>,
    {
        let mut phrase_labels: BTreeMap<String, BTreeSet<Cui>> = BTreeMap::new();
        for (cui, tokens) in patterns {
            if tokens.is_empty() {
                continue;
            }
            phrase_labels
                .entry(tokens.join(" "))
                .or_default()
                .insert(cui);
        }

        if phrase_labels.is_empty() {
            return Ok(Self::default());
        }

        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::Standard)
            .build(phrase_labels.keys())
            .map_err(|e| MatcherError::Automaton(e.to_string()))?;

        debug!("Compiled phrase automaton with {} patterns", phrase_labels.len());

        Ok(Self {
            automaton: Some(automaton),
            labels: phrase_labels
                .into_values()
                .map(|cuis| cuis.into_iter().collect())
                .collect(),
        })
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// All token-aligned occurrences, sorted by start then end then label.
    #[must_use]
    pub fn find(&self, doc: &NormalizedDoc) -> Vec<MatchSpan> {
        let Some(automaton) = &self.automaton else {
            return Vec::new();
        };
        if doc.is_empty() {
            return Vec::new();
        }

        let (joined, starts) = doc.joined_norms();
        let bytes = joined.as_bytes();
        let mut spans = Vec::new();

        for hit in automaton.find_overlapping_iter(&joined) {
            let (s, e) = (hit.start(), hit.end());
            let starts_on_boundary = s == 0 || bytes[s - 1] == b' ';
            let ends_on_boundary = e == bytes.len() || bytes[e] == b' ';
            if !starts_on_boundary || !ends_on_boundary {
                continue;
            }
            let Ok(first) = starts.binary_search(&s) else {
                continue;
            };
            let end = starts.partition_point(|&offset| offset < e);
            for &cui in &self.labels[hit.pattern().as_usize()] {
                spans.push(MatchSpan::from_tokens(doc, first, end, cui));
            }
        }

        spans.sort_by_key(|span| (span.start, span.end, span.cui));
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{Normalizer, RuleNormalizer};

    fn pattern(cui: Cui, phrase: &str) -> (Cui, Vec<String>) {
        (cui, RuleNormalizer::default().normalize_phrase(phrase))
    }

    #[test]
    fn test_finds_overlapping_phrases() {
        let automaton =
            PhraseAutomaton::build(vec![pattern(1, "septic shock"), pattern(2, "shock")]).unwrap();
        let doc = RuleNormalizer::default().normalize("Pt developed Septic Shock on day 3.");
        let spans = automaton.find(&doc);

        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end, spans[0].cui), (2, 4, 1));
        assert_eq!((spans[1].start, spans[1].end, spans[1].cui), (3, 4, 2));
        assert_eq!(spans[0].text(&doc), "Septic Shock");
    }

    #[test]
    fn test_requires_token_boundaries() {
        let automaton = PhraseAutomaton::build(vec![pattern(1, "shock")]).unwrap();
        let doc = RuleNormalizer::default().normalize("He was shocked; aftershock");
        assert!(automaton.find(&doc).is_empty());
    }

    #[test]
    fn test_shared_phrase_reports_every_label() {
        let automaton =
            PhraseAutomaton::build(vec![pattern(5, "cold"), pattern(3, "Cold")]).unwrap();
        assert_eq!(automaton.pattern_count(), 1);
        let doc = RuleNormalizer::default().normalize("a cold");
        let cuis: Vec<Cui> = automaton.find(&doc).iter().map(|s| s.cui).collect();
        assert_eq!(cuis, vec![3, 5]);
    }

    #[test]
    fn test_empty_automaton() {
        let automaton = PhraseAutomaton::build(Vec::new()).unwrap();
        assert!(automaton.is_empty());
        let doc = RuleNormalizer::default().normalize("anything");
        assert!(automaton.find(&doc).is_empty());
    }

    #[test]
    fn test_repeated_occurrences() {
        let automaton = PhraseAutomaton::build(vec![pattern(1, "fever")]).unwrap();
        let doc = RuleNormalizer::default().normalize("fever, then fever again");
        let starts: Vec<usize> = automaton.find(&doc).iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 3]);
    }
}
