/// Ontology-backed phrase index.
///
/// Compiles the synonyms of a working set of root concepts (and all of their
/// descendants) into a [`PhraseAutomaton`], and annotates documents with the
/// resolved concept spans. Once built the index is read-only and can be
/// shared across threads behind `Arc`.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use super::{AnnotatedDoc, MatchSpan, MatcherError, PhraseAutomaton, SpanResolver};
use crate::ontology::{Cui, OntologyLookup};
use crate::text::{NormalizedDoc, Normalizer};

pub struct PhraseIndex {
    normalizer: Arc<dyn Normalizer>,
    resolver: SpanResolver,
    keep_child_cuis: bool,
    /// Folded phrases per reported label.
    patterns: BTreeMap<Cui, BTreeSet<Vec<String>>>,
    automaton: PhraseAutomaton,
}

impl std::fmt::Debug for PhraseIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhraseIndex")
            .field("keep_child_cuis", &self.keep_child_cuis)
            .field("labels", &self.patterns.len())
            .field("patterns", &self.automaton.pattern_count())
            .finish()
    }
}

impl PhraseIndex {
    /// An index with no patterns.
    #[must_use]
    pub fn new(normalizer: Arc<dyn Normalizer>, keep_child_cuis: bool) -> Self {
        Self {
            normalizer,
            resolver: SpanResolver::default(),
            keep_child_cuis,
            patterns: BTreeMap::new(),
            automaton: PhraseAutomaton::default(),
        }
    }

    /// Build an index over `root_cuis` and every descendant.
    ///
    /// With `keep_child_cuis` each descendant is reported under its own id;
    /// otherwise descendant synonyms are folded into the root's label.
    /// Fails if any root has no synonyms.
    pub fn build<I>(
        root_cuis: I,
        lookup: &OntologyLookup,
        normalizer: Arc<dyn Normalizer>,
        keep_child_cuis: bool,
    ) -> Result<Self, MatcherError>
    where
        I: IntoIterator<Item = Cui>,
    {
        let mut index = Self::new(normalizer, keep_child_cuis);
        let mut roots = 0usize;
        for cui in root_cuis {
            index.insert_root(cui, lookup)?;
            roots += 1;
        }
        index.compile()?;
        info!(
            "Phrase index built: {roots} roots, {} labels, {} patterns",
            index.patterns.len(),
            index.automaton.pattern_count()
        );
        Ok(index)
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: SpanResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Add one more root concept and recompile.
    pub fn add_root_cui(&mut self, cui: Cui, lookup: &OntologyLookup) -> Result<(), MatcherError> {
        self.insert_root(cui, lookup)?;
        self.compile()
    }

    /// Register a free-text term under a caller-chosen id, typically a
    /// negative one so it cannot collide with real concepts.
    pub fn add_non_ontology_term(&mut self, id: Cui, term: &str) -> Result<(), MatcherError> {
        self.insert_phrase(id, term);
        self.compile()
    }

    /// Compile free-text terms into a separate automaton using this index's
    /// normalizer, for use with [`PhraseIndex::annotate_many_with`].
    pub fn compile_terms<'t, I>(&self, terms: I) -> Result<PhraseAutomaton, MatcherError>
    where
        I: IntoIterator<Item = (Cui, &'t str)>,
    {
        PhraseAutomaton::build(
            terms
                .into_iter()
                .map(|(id, term)| (id, self.normalizer.normalize_phrase(term))),
        )
    }

    fn insert_root(&mut self, cui: Cui, lookup: &OntologyLookup) -> Result<(), MatcherError> {
        let synonyms = lookup.synonyms(cui);
        if synonyms.is_empty() {
            return Err(MatcherError::MissingSynonyms { cui });
        }
        for synonym in synonyms {
            self.insert_phrase(cui, synonym);
        }

        let children = lookup.get_child_cuis(cui);
        for &child in &children {
            let label = if self.keep_child_cuis { child } else { cui };
            for synonym in lookup.synonyms(child) {
                self.insert_phrase(label, synonym);
            }
        }
        debug!("Root {cui}: {} synonyms, {} descendants", synonyms.len(), children.len());
        Ok(())
    }

    fn insert_phrase(&mut self, label: Cui, phrase: &str) {
        let tokens = self.normalizer.normalize_phrase(phrase);
        if !tokens.is_empty() {
            self.patterns.entry(label).or_default().insert(tokens);
        }
    }

    fn compile(&mut self) -> Result<(), MatcherError> {
        self.automaton = PhraseAutomaton::build(
            self.patterns
                .iter()
                .flat_map(|(&cui, phrases)| phrases.iter().map(move |p| (cui, p.clone()))),
        )?;
        Ok(())
    }

    #[must_use]
    pub fn normalizer(&self) -> &Arc<dyn Normalizer> {
        &self.normalizer
    }

    #[must_use]
    pub fn resolver(&self) -> SpanResolver {
        self.resolver
    }

    /// Labels the index can report.
    pub fn labels(&self) -> impl Iterator<Item = Cui> + '_ {
        self.patterns.keys().copied()
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.automaton.pattern_count()
    }

    /// Raw, possibly overlapping hits in `text`.
    ///
    /// When nothing matches and the text contains `/`, the search is retried
    /// once with slashes replaced by spaces ("anxiety/depression"). The
    /// replacement keeps byte offsets unchanged.
    #[must_use]
    pub fn match_text(&self, text: &str) -> Vec<MatchSpan> {
        let hits = self.automaton.find(&self.normalizer.normalize(text));
        if hits.is_empty() && text.contains('/') {
            return self
                .automaton
                .find(&self.normalizer.normalize(&text.replace('/', " ")));
        }
        hits
    }

    /// [`PhraseIndex::match_text`] over a batch; spans carry their batch index.
    #[must_use]
    pub fn match_many<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Vec<MatchSpan>> {
        texts
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                let mut hits = self.match_text(text.as_ref());
                hits.iter_mut().for_each(|h| h.doc_index = idx);
                hits
            })
            .collect()
    }

    /// Normalize `text` and attach its resolved, disjoint concept spans.
    #[must_use]
    pub fn annotate(&self, text: &str) -> AnnotatedDoc {
        self.annotate_with(text, 0, None)
    }

    #[must_use]
    pub fn annotate_many<S: AsRef<str>>(&self, texts: &[S]) -> Vec<AnnotatedDoc> {
        self.annotate_many_with(texts, None)
    }

    /// Annotate a batch, also matching the patterns of `extra`.
    #[must_use]
    pub fn annotate_many_with<S: AsRef<str>>(
        &self,
        texts: &[S],
        extra: Option<&PhraseAutomaton>,
    ) -> Vec<AnnotatedDoc> {
        texts
            .iter()
            .enumerate()
            .map(|(idx, text)| self.annotate_with(text.as_ref(), idx, extra))
            .collect()
    }

    fn annotate_with(
        &self,
        text: &str,
        index: usize,
        extra: Option<&PhraseAutomaton>,
    ) -> AnnotatedDoc {
        let doc = self.normalizer.normalize(text);
        let spans = self.resolve(&doc, extra);
        if spans.is_empty() && text.contains('/') {
            let retry = self.normalizer.normalize(&text.replace('/', " "));
            let spans = self.resolve(&retry, extra);
            return Self::finish(retry, spans, index);
        }
        Self::finish(doc, spans, index)
    }

    fn resolve(&self, doc: &NormalizedDoc, extra: Option<&PhraseAutomaton>) -> Vec<MatchSpan> {
        let mut hits = self.automaton.find(doc);
        if let Some(extra) = extra {
            hits.extend(extra.find(doc));
        }
        self.resolver.resolve(doc, hits)
    }

    fn finish(doc: NormalizedDoc, mut spans: Vec<MatchSpan>, index: usize) -> AnnotatedDoc {
        spans.iter_mut().for_each(|s| s.doc_index = index);
        AnnotatedDoc { index, doc, spans }
    }
}
