/// RF2 release table parsing.
///
/// Every table is tab-separated with a header row. Files of one family
/// (international core, national extension, drug extension) are read in order
/// and concatenated; only rows whose `active` column is `"1"` are kept.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info};

use super::{Cui, OntologyError};

const ACTIVE: &str = "1";

/// The three table families of a release, each core-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseFiles {
    pub concepts: Vec<PathBuf>,
    pub descriptions: Vec<PathBuf>,
    pub relationships: Vec<PathBuf>,
}

impl ReleaseFiles {
    /// Locate the snapshot tables below `dir`.
    ///
    /// `Full` and `Delta` tables are ignored: they carry historical rows, so
    /// a retired concept would still show an `active` row there.
    /// International (`_INT`) tables sort ahead of extension tables so that
    /// first-occurrence rules favour the core release.
    pub fn discover(dir: &Path) -> Result<Self, OntologyError> {
        Ok(Self {
            concepts: find_tables(dir, "sct2_Concept_Snapshot*.txt")?,
            descriptions: find_tables(dir, "sct2_Description_Snapshot*.txt")?,
            relationships: find_tables(dir, "sct2_Relationship_Snapshot*.txt")?,
        })
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.concepts.is_empty()
            && !self.descriptions.is_empty()
            && !self.relationships.is_empty()
    }
}

fn find_tables(dir: &Path, file_pattern: &str) -> Result<Vec<PathBuf>, OntologyError> {
    let pattern = dir.join("**").join(file_pattern);
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| OntologyError::Parse {
        path: dir.to_path_buf(),
        line: 0,
        message: format!("invalid glob pattern {pattern}: {e}"),
    })?;

    let mut files: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
    files.sort_by_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (!name.contains("_INT"), name)
    });
    debug!("{} tables match {file_pattern} under {}", files.len(), dir.display());
    Ok(files)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionRow {
    pub concept_id: Cui,
    pub term: String,
    pub type_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipRow {
    pub source_id: Cui,
    pub destination_id: Cui,
    pub type_id: String,
}

/// Ids of all active concepts across the concept tables.
pub fn read_active_concepts(paths: &[PathBuf]) -> Result<HashSet<Cui>, OntologyError> {
    let mut active = HashSet::new();
    for path in paths {
        read_active_rows(path, &["id"], |line, fields| {
            active.insert(parse_cui(path, line, fields[0])?);
            Ok(())
        })?;
    }
    info!("Loaded {} active concepts", active.len());
    Ok(active)
}

/// Active description rows, in file order.
pub fn read_active_descriptions(paths: &[PathBuf]) -> Result<Vec<DescriptionRow>, OntologyError> {
    let mut rows = Vec::new();
    for path in paths {
        read_active_rows(path, &["conceptId", "term", "typeId"], |line, fields| {
            rows.push(DescriptionRow {
                concept_id: parse_cui(path, line, fields[0])?,
                term: fields[1].to_string(),
                type_id: fields[2].to_string(),
            });
            Ok(())
        })?;
    }
    info!("Loaded {} active descriptions", rows.len());
    Ok(rows)
}

/// Active relationship rows, in file order.
pub fn read_active_relationships(
    paths: &[PathBuf],
) -> Result<Vec<RelationshipRow>, OntologyError> {
    let mut rows = Vec::new();
    for path in paths {
        read_active_rows(
            path,
            &["sourceId", "destinationId", "typeId"],
            |line, fields| {
                rows.push(RelationshipRow {
                    source_id: parse_cui(path, line, fields[0])?,
                    destination_id: parse_cui(path, line, fields[1])?,
                    type_id: fields[2].to_string(),
                });
                Ok(())
            },
        )?;
    }
    info!("Loaded {} active relationships", rows.len());
    Ok(rows)
}

/// Stream the active rows of one table, handing `visit` the requested
/// columns in the order they were asked for.
fn read_active_rows<F>(
    path: &Path,
    columns: &[&'static str],
    mut visit: F,
) -> Result<(), OntologyError>
where
    F: FnMut(u64, &[&str]) -> Result<(), OntologyError>,
{
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .quoting(false)
        .flexible(false)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let active_idx = column_index(path, &headers, "active")?;
    let indices = columns
        .iter()
        .map(|&column| column_index(path, &headers, column))
        .collect::<Result<Vec<_>, _>>()?;

    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(csv_error(path, e)),
        }
        if record.get(active_idx) != Some(ACTIVE) {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line());
        let fields: Vec<&str> = indices
            .iter()
            .map(|&i| record.get(i).unwrap_or_default())
            .collect();
        visit(line, &fields)?;
    }
    Ok(())
}

fn column_index(
    path: &Path,
    headers: &StringRecord,
    column: &'static str,
) -> Result<usize, OntologyError> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| OntologyError::MissingColumn {
            path: path.to_path_buf(),
            column,
        })
}

fn parse_cui(path: &Path, line: u64, value: &str) -> Result<Cui, OntologyError> {
    value.parse::<Cui>().map_err(|e| OntologyError::Parse {
        path: path.to_path_buf(),
        line,
        message: format!("invalid concept id {value:?}: {e}"),
    })
}

fn csv_error(path: &Path, err: csv::Error) -> OntologyError {
    let line = err.position().map_or(0, |p| p.line());
    match err.into_kind() {
        csv::ErrorKind::Io(source) => OntologyError::Io {
            path: path.to_path_buf(),
            source,
        },
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => OntologyError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("expected {expected_len} columns, found {len}"),
        },
        csv::ErrorKind::Utf8 { err, .. } => OntologyError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("invalid UTF-8: {err}"),
        },
        other => OntologyError::Parse {
            path: path.to_path_buf(),
            line,
            message: format!("{other:?}"),
        },
    }
}
