//! # snomed-retriever: concept-driven context retrieval for clinical notes
//!
//! Builds a SNOMED CT lookup from a raw RF2 release, compiles concept
//! synonyms into a token-aligned phrase matcher, and pulls sentence or token
//! windows out of free-text notes for each free-text search term.
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration loading and validation
//! - **[`ontology`]**: RF2 table parsing and the persisted concept lookup
//! - **[`text`]**: tokenization, case folding, sentence boundaries
//! - **[`matcher`]**: phrase automaton, longest-span resolution, annotation
//! - **[`retriever`]**: search-term resolution, context windows, note rendering

pub mod config;
pub mod matcher;
pub mod ontology;
pub mod retriever;
pub mod text;
