/// Search-term driven context retrieval.
///
/// Given a batch of notes and free-text search terms, [`ConceptRetriever`]
/// finds the concepts each term denotes, annotates the notes with the shared
/// [`PhraseIndex`], and returns merged, deduplicated context windows per term.
pub mod notes;
pub mod window;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::matcher::{AnnotatedDoc, MatcherError, PhraseIndex};
use crate::ontology::{Cui, OntologyLookup};

pub use notes::{Note, deduplicate_note_lines, render_extracts, sort_chronologically};
pub use window::{Window, WindowPolicy};

/// A window of note text attributed to one search term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Extract {
    /// Index of the note in the retrieval batch.
    pub doc_index: usize,
    /// Token offsets of the window.
    pub start: usize,
    pub end: usize,
    /// Byte offsets of the window in the note text.
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// Result of one retrieval call. Every requested term is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Retrieval {
    /// Concepts each search term resolved to; negative ids are free-text
    /// terms that matched no concept.
    pub concepts: BTreeMap<String, Vec<Cui>>,
    pub extracts: BTreeMap<String, Vec<Extract>>,
}

impl Retrieval {
    /// Extracts for `term`; empty when the term was not found.
    #[must_use]
    pub fn get(&self, term: &str) -> &[Extract] {
        self.extracts.get(term).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Extract])> {
        self.extracts
            .iter()
            .map(|(term, extracts)| (term.as_str(), extracts.as_slice()))
    }

    #[must_use]
    pub fn total_extracts(&self) -> usize {
        self.extracts.values().map(Vec::len).sum()
    }
}

pub struct ConceptRetriever {
    index: Arc<PhraseIndex>,
    lookup: Arc<OntologyLookup>,
    window: WindowPolicy,
    include_child_cuis: bool,
}

impl ConceptRetriever {
    #[must_use]
    pub fn new(index: Arc<PhraseIndex>, lookup: Arc<OntologyLookup>) -> Self {
        Self {
            index,
            lookup,
            window: WindowPolicy::default(),
            include_child_cuis: true,
        }
    }

    #[must_use]
    pub fn from_config(
        index: Arc<PhraseIndex>,
        lookup: Arc<OntologyLookup>,
        config: &Config,
    ) -> Self {
        Self::new(index, lookup)
            .with_window(WindowPolicy {
                token_window_size: config.token_window_size,
                sentence_window_size: config.sentence_window_size,
            })
            .with_include_child_cuis(config.include_child_cuis)
    }

    #[must_use]
    pub fn with_window(mut self, window: WindowPolicy) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_include_child_cuis(mut self, include: bool) -> Self {
        self.include_child_cuis = include;
        self
    }

    #[must_use]
    pub fn index(&self) -> &PhraseIndex {
        &self.index
    }

    /// First id handed to unmatched search terms: below every label in the
    /// index, so terms registered with `add_non_ontology_term` never collide.
    #[must_use]
    pub fn first_synthetic_id(&self) -> Cui {
        self.index.labels().min().map_or(0, |min| min.min(0)) - 1
    }

    /// Concepts denoted by each term. Terms matching nothing get their own
    /// synthetic negative id, counting down from [`Self::first_synthetic_id`]
    /// in term order.
    #[must_use]
    pub fn search_term_cuis(
        &self,
        search_terms: &BTreeSet<String>,
    ) -> BTreeMap<String, Vec<Cui>> {
        let mut next_synthetic = self.first_synthetic_id();
        search_terms
            .iter()
            .map(|term| {
                let mut cuis = self.index.annotate(term).cuis();
                if cuis.is_empty() {
                    cuis.push(next_synthetic);
                    next_synthetic -= 1;
                }
                (term.clone(), cuis)
            })
            .collect()
    }

    /// Reverse index from concept id to the terms claiming it, including
    /// descendants when `include_child_cuis` is set.
    #[must_use]
    pub fn cui_to_search_terms(
        &self,
        term_cuis: &BTreeMap<String, Vec<Cui>>,
    ) -> HashMap<Cui, BTreeSet<String>> {
        let mut reverse: HashMap<Cui, BTreeSet<String>> = HashMap::new();
        for (term, cuis) in term_cuis {
            for &cui in cuis {
                reverse.entry(cui).or_default().insert(term.clone());
                if self.include_child_cuis && cui > 0 {
                    for child in self.lookup.get_child_cuis(cui) {
                        reverse.entry(child).or_default().insert(term.clone());
                    }
                }
            }
        }
        reverse
    }

    /// Windowed extracts from `texts` for every search term.
    pub fn retrieve<S, T, I>(&self, texts: &[S], search_terms: I) -> Result<Retrieval, MatcherError>
    where
        S: AsRef<str>,
        T: AsRef<str>,
        I: IntoIterator<Item = T>,
    {
        let search_terms: BTreeSet<String> = search_terms
            .into_iter()
            .map(|t| t.as_ref().to_string())
            .collect();

        let term_cuis = self.search_term_cuis(&search_terms);
        let first_synthetic = self.first_synthetic_id();
        let synthetic: Vec<(Cui, &str)> = term_cuis
            .iter()
            .filter(|(_, cuis)| cuis.iter().all(|&c| c <= first_synthetic))
            .flat_map(|(term, cuis)| cuis.iter().map(move |&c| (c, term.as_str())))
            .collect();
        let synthetic_terms = synthetic.len();
        let extra = if synthetic.is_empty() {
            None
        } else {
            Some(self.index.compile_terms(synthetic.iter().copied())?)
        };
        let cui_to_terms = self.cui_to_search_terms(&term_cuis);

        let docs = self.index.annotate_many_with(texts, extra.as_ref());

        let mut term_windows: BTreeMap<&str, Vec<Window>> = BTreeMap::new();
        for doc in &docs {
            for span in &doc.spans {
                let Some(terms) = cui_to_terms.get(&span.cui) else {
                    continue;
                };
                let range = self.window.context(&doc.doc, span);
                for term in terms {
                    term_windows.entry(term.as_str()).or_default().push(Window {
                        doc_index: doc.index,
                        start: range.start,
                        end: range.end,
                    });
                }
            }
        }

        let mut extracts: BTreeMap<String, Vec<Extract>> = search_terms
            .iter()
            .map(|term| (term.clone(), Vec::new()))
            .collect();
        for (term, windows) in term_windows {
            let merged = window::merge_windows(windows);
            let materialized = merged.iter().map(|w| to_extract(&docs, w)).collect();
            extracts.insert(term.to_string(), window::dedupe_by_text(materialized));
        }

        let retrieval = Retrieval {
            concepts: term_cuis,
            extracts,
        };
        debug!(
            "Retrieved {} extracts for {} search terms over {} notes ({} synthetic terms)",
            retrieval.total_extracts(),
            search_terms.len(),
            texts.len(),
            synthetic_terms
        );
        Ok(retrieval)
    }
}

fn to_extract(docs: &[AnnotatedDoc], window: &Window) -> Extract {
    let doc = &docs[window.doc_index].doc;
    let range = doc.byte_range(window.start, window.end);
    Extract {
        doc_index: window.doc_index,
        start: window.start,
        end: window.end,
        char_start: range.start,
        char_end: range.end,
        text: doc.text()[range].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{Normalizer, RuleNormalizer};

    fn terms(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn lookup() -> Arc<OntologyLookup> {
        Arc::new(OntologyLookup::new(
            HashMap::from([(1, "Sepsis".to_string()), (2, "Septic shock".to_string())]),
            HashMap::from([
                (1, terms(&["sepsis", "septicaemia"])),
                (2, terms(&["septic shock"])),
                (3, terms(&["chest pain"])),
            ]),
            HashMap::from([(1, BTreeSet::from([2]))]),
        ))
    }

    fn retriever(keep_child_cuis: bool) -> ConceptRetriever {
        let lookup = lookup();
        let normalizer: Arc<dyn Normalizer> = Arc::new(RuleNormalizer::default());
        let index = PhraseIndex::build([1, 3], &lookup, normalizer, keep_child_cuis).unwrap();
        ConceptRetriever::new(Arc::new(index), lookup)
    }

    #[test]
    fn test_child_concept_attributed_to_parent_term() {
        for keep_child_cuis in [false, true] {
            let result = retriever(keep_child_cuis)
                .retrieve(&["Pt developed septic shock on day 3."], ["sepsis"])
                .unwrap();
            let extracts = result.get("sepsis");
            assert_eq!(extracts.len(), 1, "keep_child_cuis={keep_child_cuis}");
            assert_eq!(extracts[0].text, "Pt developed septic shock on day 3.");
            assert_eq!(extracts[0].doc_index, 0);
            assert_eq!(result.concepts["sepsis"], vec![1]);
        }
    }

    #[test]
    fn test_children_excluded_when_disabled() {
        let result = retriever(true)
            .with_include_child_cuis(false)
            .retrieve(&["Pt developed septic shock on day 3."], ["sepsis"])
            .unwrap();
        assert!(result.get("sepsis").is_empty());
    }

    #[test]
    fn test_unknown_term_is_empty_not_error() {
        let result = retriever(false)
            .retrieve(&["Patient comfortable overnight."], ["unobtainium"])
            .unwrap();
        assert!(result.get("unobtainium").is_empty());
        assert!(result.extracts.contains_key("unobtainium"));
        assert_eq!(result.concepts["unobtainium"], vec![-1]);
    }

    #[test]
    fn test_unknown_term_found_verbatim() {
        let result = retriever(false)
            .retrieve(
                &["Sepsis resolved.", "Mobility limited by frailty. Physio to review."],
                ["frailty", "sepsis", "zzz"],
            )
            .unwrap();
        let extracts = result.get("frailty");
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].doc_index, 1);
        assert_eq!(result.concepts["frailty"], vec![-1]);
        assert_eq!(result.concepts["zzz"], vec![-2]);
        assert_eq!(result.get("sepsis")[0].text, "Sepsis resolved.");
    }

    #[test]
    fn test_identical_extracts_deduplicated() {
        let result = retriever(false)
            .retrieve(
                &["Patient denies chest pain.", "Patient denies chest pain."],
                ["chest pain"],
            )
            .unwrap();
        let extracts = result.get("chest pain");
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].doc_index, 0);
        assert_eq!(extracts[0].text, "Patient denies chest pain.");
    }

    #[test]
    fn test_overlapping_windows_merged() {
        let policy = WindowPolicy {
            token_window_size: 50,
            sentence_window_size: 0,
        };
        let result = retriever(false)
            .with_window(policy)
            .retrieve(&["Sepsis on admission. Septicaemia treated. Unrelated."], ["sepsis"])
            .unwrap();
        let extracts = result.get("sepsis");
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].text, "Sepsis on admission. Septicaemia treated.");
    }

    #[test]
    fn test_synthetic_ids_avoid_registered_terms() {
        let lookup = lookup();
        let normalizer: Arc<dyn Normalizer> = Arc::new(RuleNormalizer::default());
        let mut index = PhraseIndex::build([1], &lookup, normalizer, false).unwrap();
        index.add_non_ontology_term(-1, "falls").unwrap();
        let retriever = ConceptRetriever::new(Arc::new(index), lookup);

        assert_eq!(retriever.first_synthetic_id(), -2);
        let result = retriever
            .retrieve(&["Recurrent falls at home."], ["frailty", "falls"])
            .unwrap();
        assert!(result.get("frailty").is_empty());
        assert_eq!(result.concepts["frailty"], vec![-2]);
        // The registered term keeps its own id
        assert_eq!(result.concepts["falls"], vec![-1]);
        assert_eq!(result.get("falls").len(), 1);
    }

    #[test]
    fn test_term_shared_by_two_search_terms() {
        let result = retriever(false)
            .retrieve(&["Septicaemia noted."], ["sepsis", "septicaemia"])
            .unwrap();
        assert_eq!(result.get("sepsis").len(), 1);
        assert_eq!(result.get("septicaemia").len(), 1);
        assert_eq!(result.total_extracts(), 2);
    }
}
