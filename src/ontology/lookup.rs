/// In-memory SNOMED CT concept indices.
///
/// Holds three maps built from a release: concept id to preferred term,
/// concept id to synonym set and parent id to direct child ids. Ids that are
/// referenced but absent resolve to empty collections.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::release::{self, DescriptionRow, RelationshipRow, ReleaseFiles};
use super::{Cui, OntologyError};

/// `typeId` of fully specified / preferred term descriptions.
pub const PREFERRED_TERM_TYPE_ID: &str = "900000000000003001";
/// `typeId` of synonym descriptions.
pub const SYNONYM_TYPE_ID: &str = "900000000000013009";
/// `typeId` of the "is a" relationship.
pub const IS_A_RELATIONSHIP_TYPE_ID: &str = "116680003";

pub const PREFERRED_TERMS_FILE: &str = "cui_to_preferred_term.json";
pub const SYNONYMS_FILE: &str = "cui_to_synonyms.json";
pub const CHILDREN_FILE: &str = "parent_to_child_cuis.json";

// Trailing semantic tag, e.g. " (disorder)"
static SEMANTIC_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" \(.*?\)$").unwrap());
// Leading acronym in synonyms such as "MI - Myocardial infarction"
static LEADING_ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]{2,4}) - ").unwrap());

static NO_TERMS: BTreeSet<String> = BTreeSet::new();
static NO_CUIS: BTreeSet<Cui> = BTreeSet::new();

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OntologyLookup {
    cui_to_preferred_term: HashMap<Cui, String>,
    cui_to_synonyms: HashMap<Cui, BTreeSet<String>>,
    parent_to_child_cuis: HashMap<Cui, BTreeSet<Cui>>,
}

impl OntologyLookup {
    #[must_use]
    pub fn new(
        cui_to_preferred_term: HashMap<Cui, String>,
        cui_to_synonyms: HashMap<Cui, BTreeSet<String>>,
        parent_to_child_cuis: HashMap<Cui, BTreeSet<Cui>>,
    ) -> Self {
        Self {
            cui_to_preferred_term,
            cui_to_synonyms,
            parent_to_child_cuis,
        }
    }

    /// Build the lookup from raw release tables.
    pub fn load_from_raw_files(files: &ReleaseFiles) -> Result<Self, OntologyError> {
        let active_cuis = release::read_active_concepts(&files.concepts)?;
        let descriptions = release::read_active_descriptions(&files.descriptions)?;
        let relationships = release::read_active_relationships(&files.relationships)?;
        Ok(Self::from_release_rows(
            &active_cuis,
            descriptions,
            relationships,
        ))
    }

    /// Fold active release rows into the three indices.
    ///
    /// Rows must already be filtered to `active == 1`; this restricts them to
    /// active concepts and the relevant type markers.
    #[must_use]
    pub fn from_release_rows(
        active_cuis: &HashSet<Cui>,
        descriptions: Vec<DescriptionRow>,
        relationships: Vec<RelationshipRow>,
    ) -> Self {
        let mut cui_to_preferred_term = HashMap::new();
        let mut cui_to_synonyms: HashMap<Cui, BTreeSet<String>> = HashMap::new();

        for row in descriptions {
            if !active_cuis.contains(&row.concept_id) {
                continue;
            }
            match row.type_id.as_str() {
                PREFERRED_TERM_TYPE_ID => {
                    cui_to_preferred_term
                        .entry(row.concept_id)
                        .or_insert_with(|| strip_semantic_tag(&row.term).to_string());
                }
                SYNONYM_TYPE_ID => {
                    let synonyms = cui_to_synonyms.entry(row.concept_id).or_default();
                    if let Some(acronym) = leading_acronym(&row.term) {
                        synonyms.insert(acronym.to_lowercase());
                    }
                    synonyms.insert(row.term.to_lowercase());
                }
                _ => {}
            }
        }

        let mut parent_to_child_cuis: HashMap<Cui, BTreeSet<Cui>> = HashMap::new();
        let mut edges = 0usize;
        for row in relationships {
            if row.type_id != IS_A_RELATIONSHIP_TYPE_ID
                || !active_cuis.contains(&row.source_id)
                || !active_cuis.contains(&row.destination_id)
            {
                continue;
            }
            if parent_to_child_cuis
                .entry(row.destination_id)
                .or_default()
                .insert(row.source_id)
            {
                edges += 1;
            }
        }

        info!(
            "Ontology built: {} preferred terms, {} concepts with synonyms, {} is-a edges",
            cui_to_preferred_term.len(),
            cui_to_synonyms.len(),
            edges
        );

        Self {
            cui_to_preferred_term,
            cui_to_synonyms,
            parent_to_child_cuis,
        }
    }

    #[must_use]
    pub fn preferred_term(&self, cui: Cui) -> Option<&str> {
        self.cui_to_preferred_term.get(&cui).map(String::as_str)
    }

    /// Case-folded synonyms of `cui`; empty when the id is unknown.
    #[must_use]
    pub fn synonyms(&self, cui: Cui) -> &BTreeSet<String> {
        self.cui_to_synonyms.get(&cui).unwrap_or(&NO_TERMS)
    }

    #[must_use]
    pub fn direct_child_cuis(&self, parent_cui: Cui) -> &BTreeSet<Cui> {
        self.parent_to_child_cuis
            .get(&parent_cui)
            .unwrap_or(&NO_CUIS)
    }

    /// Every concept reachable below `parent_cui` through is-a edges.
    ///
    /// Each id is expanded at most once, so cyclic hierarchies terminate and
    /// shared sub-trees are not re-walked. `parent_cui` itself is never part
    /// of the result, even when a cycle leads back to it.
    #[must_use]
    pub fn get_child_cuis(&self, parent_cui: Cui) -> BTreeSet<Cui> {
        let mut descendants = BTreeSet::new();
        let mut stack: Vec<Cui> = self.direct_child_cuis(parent_cui).iter().copied().collect();

        while let Some(cui) = stack.pop() {
            if cui == parent_cui || !descendants.insert(cui) {
                continue;
            }
            stack.extend(
                self.direct_child_cuis(cui)
                    .iter()
                    .copied()
                    .filter(|child| !descendants.contains(child)),
            );
        }

        debug!("{} descendants below {parent_cui}", descendants.len());
        descendants
    }

    /// Concepts with `name` among their synonyms (case-insensitive).
    #[must_use]
    pub fn find_cuis(&self, name: &str) -> BTreeSet<Cui> {
        let name = name.to_lowercase();
        self.cui_to_synonyms
            .iter()
            .filter(|(_, synonyms)| synonyms.contains(&name))
            .map(|(&cui, _)| cui)
            .collect()
    }

    #[must_use]
    pub fn concept_count(&self) -> usize {
        let mut cuis: HashSet<Cui> = self.cui_to_preferred_term.keys().copied().collect();
        cuis.extend(self.cui_to_synonyms.keys().copied());
        cuis.len()
    }

    /// Write the three indices as JSON files into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<(), OntologyError> {
        fs::create_dir_all(dir).map_err(|source| OntologyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let preferred: BTreeMap<Cui, &String> = self
            .cui_to_preferred_term
            .iter()
            .map(|(&k, v)| (k, v))
            .collect();
        write_json(&dir.join(PREFERRED_TERMS_FILE), &preferred)?;

        let synonyms: BTreeMap<Cui, &BTreeSet<String>> =
            self.cui_to_synonyms.iter().map(|(&k, v)| (k, v)).collect();
        write_json(&dir.join(SYNONYMS_FILE), &synonyms)?;

        let children: BTreeMap<Cui, Vec<String>> = self
            .parent_to_child_cuis
            .iter()
            .map(|(&parent, children)| (parent, children.iter().map(Cui::to_string).collect()))
            .collect();
        write_json(&dir.join(CHILDREN_FILE), &children)?;

        info!("Saved ontology lookup to {}", dir.display());
        Ok(())
    }

    /// Read back a lookup written by [`OntologyLookup::save`].
    pub fn load(dir: &Path) -> Result<Self, OntologyError> {
        let cui_to_preferred_term: HashMap<Cui, String> =
            read_json(&dir.join(PREFERRED_TERMS_FILE))?;
        let cui_to_synonyms: HashMap<Cui, BTreeSet<String>> = read_json(&dir.join(SYNONYMS_FILE))?;

        let children_path = dir.join(CHILDREN_FILE);
        let raw_children: HashMap<Cui, Vec<String>> = read_json(&children_path)?;
        let mut parent_to_child_cuis = HashMap::with_capacity(raw_children.len());
        for (parent, children) in raw_children {
            let children = children
                .iter()
                .map(|child| {
                    child.parse::<Cui>().map_err(|e| OntologyError::Parse {
                        path: children_path.clone(),
                        line: 0,
                        message: format!("invalid child id {child:?} of {parent}: {e}"),
                    })
                })
                .collect::<Result<BTreeSet<Cui>, _>>()?;
            parent_to_child_cuis.insert(parent, children);
        }

        info!(
            "Loaded ontology lookup from {} ({} concepts)",
            dir.display(),
            cui_to_preferred_term.len()
        );
        Ok(Self {
            cui_to_preferred_term,
            cui_to_synonyms,
            parent_to_child_cuis,
        })
    }
}

fn strip_semantic_tag(term: &str) -> &str {
    match SEMANTIC_TAG.find(term) {
        Some(m) => &term[..m.start()],
        None => term,
    }
}

fn leading_acronym(term: &str) -> Option<&str> {
    LEADING_ACRONYM
        .captures(term)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), OntologyError> {
    let data = serde_json::to_string(value).map_err(|source| OntologyError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(|source| OntologyError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, OntologyError> {
    let data = fs::read_to_string(path).map_err(|source| OntologyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| OntologyError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn edges(pairs: &[(Cui, Cui)]) -> HashMap<Cui, BTreeSet<Cui>> {
        let mut map: HashMap<Cui, BTreeSet<Cui>> = HashMap::new();
        for &(parent, child) in pairs {
            map.entry(parent).or_default().insert(child);
        }
        map
    }

    fn description(cui: Cui, term: &str, type_id: &str) -> DescriptionRow {
        DescriptionRow {
            concept_id: cui,
            term: term.to_string(),
            type_id: type_id.to_string(),
        }
    }

    fn is_a(child: Cui, parent: Cui) -> RelationshipRow {
        RelationshipRow {
            source_id: child,
            destination_id: parent,
            type_id: IS_A_RELATIONSHIP_TYPE_ID.to_string(),
        }
    }

    #[test]
    fn test_child_cuis_transitive() {
        let children = edges(&[(1, 2), (2, 3), (3, 4), (1, 5)]);
        let lookup = OntologyLookup::new(HashMap::new(), HashMap::new(), children);
        assert_eq!(lookup.get_child_cuis(1), BTreeSet::from([2, 3, 4, 5]));
        assert_eq!(lookup.get_child_cuis(3), BTreeSet::from([4]));
        assert!(lookup.get_child_cuis(4).is_empty());
        assert!(lookup.get_child_cuis(999).is_empty());
    }

    #[test]
    fn test_child_cuis_terminates_on_cycle() {
        // A=1 -> B=2 -> C=3 -> A, plus A -> D=4
        let children = edges(&[(1, 2), (2, 3), (3, 1), (1, 4)]);
        let lookup = OntologyLookup::new(HashMap::new(), HashMap::new(), children);
        assert_eq!(lookup.get_child_cuis(1), BTreeSet::from([2, 3, 4]));
        assert_eq!(lookup.get_child_cuis(2), BTreeSet::from([1, 3, 4]));
    }

    #[test]
    fn test_child_cuis_self_loop() {
        let lookup = OntologyLookup::new(HashMap::new(), HashMap::new(), edges(&[(7, 7)]));
        assert!(lookup.get_child_cuis(7).is_empty());
    }

    #[test]
    fn test_from_release_rows() {
        let active = HashSet::from([1, 2, 3]);
        let descriptions = vec![
            description(1, "Sepsis (disorder)", PREFERRED_TERM_TYPE_ID),
            description(1, "Sepsis syndrome (disorder)", PREFERRED_TERM_TYPE_ID),
            description(1, "Sepsis", SYNONYM_TYPE_ID),
            description(1, "Septicaemia", SYNONYM_TYPE_ID),
            description(1, "sepsis", SYNONYM_TYPE_ID),
            description(2, "Septic shock (disorder)", PREFERRED_TERM_TYPE_ID),
            description(2, "Septic shock", SYNONYM_TYPE_ID),
            description(3, "MI - Myocardial infarction", SYNONYM_TYPE_ID),
            description(9, "Inactive concept", SYNONYM_TYPE_ID),
            description(2, "Definition text", "900000000000550004"),
        ];
        let relationships = vec![
            is_a(2, 1),
            is_a(2, 1),
            is_a(9, 1),
            RelationshipRow {
                source_id: 3,
                destination_id: 1,
                type_id: "363698007".to_string(),
            },
        ];

        let lookup = OntologyLookup::from_release_rows(&active, descriptions, relationships);

        assert_eq!(lookup.preferred_term(1), Some("Sepsis"));
        assert_eq!(lookup.preferred_term(2), Some("Septic shock"));
        assert_eq!(lookup.preferred_term(3), None);
        assert_eq!(
            lookup.synonyms(1),
            &BTreeSet::from(["sepsis".to_string(), "septicaemia".to_string()])
        );
        assert!(lookup.synonyms(3).contains("mi"));
        assert!(lookup.synonyms(3).contains("mi - myocardial infarction"));
        assert!(lookup.synonyms(9).is_empty());
        assert_eq!(lookup.direct_child_cuis(1), &BTreeSet::from([2]));
        assert_eq!(lookup.find_cuis("SEPTICAEMIA"), BTreeSet::from([1]));
    }

    #[test]
    fn test_strip_semantic_tag() {
        assert_eq!(strip_semantic_tag("Asthma (disorder)"), "Asthma");
        assert_eq!(strip_semantic_tag("Asthma"), "Asthma");
        assert_eq!(strip_semantic_tag("Pain (finding) of limb"), "Pain (finding) of limb");
    }

    #[test]
    fn test_save_load_round_trip() {
        let lookup = OntologyLookup::new(
            HashMap::from([(1, "Sepsis".to_string()), (2, "Septic shock".to_string())]),
            HashMap::from([
                (1, BTreeSet::from(["sepsis".to_string(), "septicaemia".to_string()])),
                (2, BTreeSet::from(["septic shock".to_string()])),
            ]),
            edges(&[(1, 2), (2, 1)]),
        );

        let dir = tempdir().unwrap();
        let target = dir.path().join("lookup");
        lookup.save(&target).unwrap();
        let loaded = OntologyLookup::load(&target).unwrap();
        assert_eq!(loaded, lookup);

        let raw = fs::read_to_string(target.join(CHILDREN_FILE)).unwrap();
        assert_eq!(raw, r#"{"1":["2"],"2":["1"]}"#);
    }

    #[test]
    fn test_load_missing_dir() {
        let err = OntologyLookup::load(Path::new("/nonexistent/lookup")).unwrap_err();
        assert!(matches!(err, OntologyError::Io { .. }));
    }
}
