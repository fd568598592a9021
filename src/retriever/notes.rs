/// Clinical note model and prompt-ready rendering of extracts.
use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Extract;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
}

impl Note {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Stable sort by timestamp; undated notes come first.
pub fn sort_chronologically(notes: &mut [Note]) {
    notes.sort_by_key(|note| note.timestamp);
}

/// Drop blank lines and lines already seen in an earlier note. Notes left
/// with no lines are removed.
#[must_use]
pub fn deduplicate_note_lines(notes: &[Note]) -> Vec<Note> {
    let mut seen: HashSet<&str> = HashSet::new();
    notes
        .iter()
        .filter_map(|note| {
            let lines: Vec<&str> = note
                .text
                .split('\n')
                .filter(|line| !line.is_empty() && seen.insert(*line))
                .collect();
            (!lines.is_empty()).then(|| Note {
                text: lines.join("\n"),
                timestamp: note.timestamp,
            })
        })
        .collect()
}

/// Render extracts as provenance-labelled blocks separated by blank lines:
/// `Physician Note {index}, {timestamp}: {text}`.
#[must_use]
pub fn render_extracts(extracts: &[Extract], notes: &[Note]) -> String {
    extracts
        .iter()
        .map(|extract| {
            let timestamp = notes
                .get(extract.doc_index)
                .and_then(|note| note.timestamp);
            match timestamp {
                Some(ts) => format!(
                    "Physician Note {}, {}: {}",
                    extract.doc_index,
                    ts.format(TIMESTAMP_FORMAT),
                    extract.text.trim()
                ),
                None => format!("Physician Note {}: {}", extract.doc_index, extract.text.trim()),
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
