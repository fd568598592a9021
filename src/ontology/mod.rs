/// SNOMED CT ontology loading and lookup.
///
/// Raw RF2 release tables are parsed by [`release`], then folded into the
/// in-memory indices served by [`lookup::OntologyLookup`].
pub mod lookup;
pub mod release;

use std::path::PathBuf;

use thiserror::Error;

pub use lookup::OntologyLookup;
pub use release::ReleaseFiles;

/// Concept identifier.
///
/// Real SNOMED ids are positive; negative ids are reserved for free-text
/// terms registered outside the ontology.
pub type Cui = i64;

/// Errors raised while building, saving or loading an ontology.
#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table {path} (line {line}): {message}")]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("table {path} is missing required column `{column}`")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("invalid lookup file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
