use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

use super::{IngestError, Result};
use crate::records::RecordSet;

// Identifier length ceiling shared by PostgreSQL (NAMEDATALEN - 1) and most other engines
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w]+").unwrap();
    static ref UNDERSCORES: Regex = Regex::new(r"__+").unwrap();
}

fn strip_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Canonicalize a raw header into a safe, bounded identifier:
/// `"  Numéro de la Réclamation "` becomes `"numero_de_la_reclamation"`.
pub fn normalize_column_name(raw: &str) -> String {
    let name = strip_diacritics(raw.trim());
    // Lowercasing can reintroduce combining marks (e.g. U+0130), strip them again
    let name = strip_diacritics(&name.to_lowercase());
    let name = NON_WORD.replace_all(&name, "_");
    let name = UNDERSCORES.replace_all(&name, "_");
    let name: String = name
        .trim_matches('_')
        .chars()
        .take(MAX_IDENTIFIER_LENGTH)
        .collect();

    // Truncation can leave a trailing underscore behind
    name.trim_end_matches('_').to_string()
}

/// Raw headers that ended up with the same canonical name. Only the last of them
/// survives reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCollision {
    pub normalized: String,
    pub raw: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NormalizedColumns {
    pub records: RecordSet,
    pub collisions: Vec<HeaderCollision>,
}

pub fn normalize_columns(file_name: &str, records: &RecordSet) -> Result<NormalizedColumns> {
    let raw_names = records.column_names();
    let names: Vec<String> = raw_names
        .iter()
        .map(|n| normalize_column_name(n))
        .collect();

    let mut seen: HashMap<&str, Vec<String>> = HashMap::new();
    let mut order = vec![];
    for (raw, name) in raw_names.iter().zip(names.iter()) {
        let entry = seen.entry(name.as_str()).or_default();
        if entry.is_empty() {
            order.push(name.as_str());
        }
        entry.push(raw.clone());
    }

    let collisions: Vec<HeaderCollision> = order
        .into_iter()
        .filter_map(|name| {
            let raw = &seen[name];
            (raw.len() > 1).then(|| HeaderCollision {
                normalized: name.to_string(),
                raw: raw.clone(),
            })
        })
        .collect();

    for collision in &collisions {
        warn!(
            "Headers {:?} in {file_name} all normalize to '{}', keeping the last one",
            collision.raw, collision.normalized
        );
    }

    let records =
        records
            .with_column_names(names)
            .map_err(|source| IngestError::Arrow {
                path: file_name.into(),
                source,
            })?;

    Ok(NormalizedColumns {
        records,
        collisions,
    })
}
