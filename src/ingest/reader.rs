use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use itertools::Itertools;
use tracing::{info, warn};

use super::{IngestError, Result};
use crate::records::RecordSet;

const UTF8_BOM: char = '\u{feff}';

// Multi-byte delimiters can't be handed to a byte-oriented CSV parser, so the rare
// glyph is swapped for the ASCII unit separator before parsing.
const GLYPH_STAND_IN: char = '\u{1f}';

pub const DEFAULT_SAMPLE_SIZE: usize = 4096;
pub const DEFAULT_MIN_COLUMNS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delimiter {
    Semicolon,
    Comma,
    // '¤', used by some upstream exports whose free-text fields are full of ; and ,
    Currency,
}

impl Delimiter {
    pub const CANDIDATES: [Delimiter; 3] =
        [Delimiter::Semicolon, Delimiter::Comma, Delimiter::Currency];

    pub fn as_char(&self) -> char {
        match self {
            Delimiter::Semicolon => ';',
            Delimiter::Comma => ',',
            Delimiter::Currency => '¤',
        }
    }

    fn parser_byte(&self) -> u8 {
        match self {
            Delimiter::Semicolon => b';',
            Delimiter::Comma => b',',
            Delimiter::Currency => GLYPH_STAND_IN as u8,
        }
    }

    fn prepare<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            Delimiter::Currency => text.replace('¤', &GLYPH_STAND_IN.to_string()).into(),
            _ => text.into(),
        }
    }

    // Undo `prepare` inside field values
    fn restore(&self, value: &str) -> String {
        match self {
            Delimiter::Currency => value.replace(GLYPH_STAND_IN, "¤"),
            _ => value.to_string(),
        }
    }

    fn field(&self, value: &str) -> Option<String> {
        if value.is_empty() {
            None
        } else {
            Some(self.restore(value))
        }
    }

    /// Trial order for the resilient reader: the sniffed delimiter first, then the
    /// fixed fallbacks, without repeats.
    pub fn trial_order(sniffed: Delimiter) -> Vec<Delimiter> {
        std::iter::once(sniffed)
            .chain([Delimiter::Semicolon, Delimiter::Comma, Delimiter::Currency])
            .unique()
            .collect()
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.as_char())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    pub sample_size: usize,
    /// File names that always go through the lenient, binary-safe path.
    pub lenient_files: Vec<String>,
    /// A strict parse yielding fewer columns than this is treated as a failure.
    pub min_columns: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            lenient_files: vec![],
            min_columns: DEFAULT_MIN_COLUMNS,
        }
    }
}

/// Count the delimiter outside of double-quoted sections.
fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Guess the delimiter from a sample of the file.
///
/// A candidate qualifies when it appears in the header line and at least 90% of the
/// sampled lines contain it the same number of times. Among qualifying candidates the
/// most consistent wins, then the most frequent. Returns `None` if nothing qualifies.
pub fn sniff_delimiter(sample: &str) -> Option<Delimiter> {
    let sample = sample.trim_start_matches(UTF8_BOM);
    let mut lines: Vec<&str> = sample.lines().collect();
    // The last line is probably cut off by the sample boundary
    if lines.len() > 1 && !sample.ends_with('\n') {
        lines.pop();
    }
    let lines: Vec<&str> = lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
    let header = lines.first()?;

    Delimiter::CANDIDATES
        .iter()
        .filter_map(|&delimiter| {
            let expected = count_unquoted(header, delimiter.as_char());
            if expected == 0 {
                return None;
            }
            let matching = lines
                .iter()
                .filter(|l| count_unquoted(l, delimiter.as_char()) == expected)
                .count();
            let consistency = matching as f64 / lines.len() as f64;
            (consistency >= 0.9).then_some((delimiter, consistency, expected))
        })
        // max_by keeps the last maximum, so iterate in reverse to prefer earlier candidates
        .rev()
        .max_by(|(_, c1, n1), (_, c2, n2)| c1.total_cmp(c2).then(n1.cmp(n2)))
        .map(|(delimiter, _, _)| delimiter)
}

/// Parses raw delimited files into all-text record sets.
#[derive(Debug, Clone, Default)]
pub struct DelimitedReader {
    options: ReaderOptions,
}

impl DelimitedReader {
    pub fn new(options: ReaderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    fn is_lenient(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|name| self.options.lenient_files.iter().any(|f| f == name))
            .unwrap_or(false)
    }

    pub fn read(&self, path: &Path) -> Result<RecordSet> {
        if self.is_lenient(path) {
            self.read_lenient(path, Delimiter::Currency)
        } else {
            self.read_resilient(path)
        }
    }

    fn read_bytes(path: &Path) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_sample(&self, path: &Path) -> std::io::Result<String> {
        let mut buffer = Vec::with_capacity(self.options.sample_size);
        File::open(path)?
            .take(self.options.sample_size as u64)
            .read_to_end(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn detect_delimiter(&self, path: &Path) -> Delimiter {
        match self.read_sample(path).map(|s| sniff_delimiter(&s)) {
            Ok(Some(delimiter)) => delimiter,
            Ok(None) => {
                warn!(
                    "Could not detect the delimiter of {}, defaulting to ';'",
                    path.display()
                );
                Delimiter::Semicolon
            }
            Err(e) => {
                warn!(
                    "Could not sample {} to detect its delimiter ({e}), defaulting to ';'",
                    path.display()
                );
                Delimiter::Semicolon
            }
        }
    }

    /// Try every candidate delimiter in turn; the first strict parse that succeeds wins.
    pub fn read_resilient(&self, path: &Path) -> Result<RecordSet> {
        let sniffed = self.detect_delimiter(path);
        let bytes = Self::read_bytes(path)?;
        let file_name = display_name(path);

        let mut attempts = vec![];
        for delimiter in Delimiter::trial_order(sniffed) {
            match self.parse_strict(&bytes, delimiter) {
                Ok(records) => {
                    info!("Read {file_name} with delimiter {delimiter}");
                    return Ok(records);
                }
                Err(reason) => {
                    warn!("Parsing {file_name} with delimiter {delimiter} failed: {reason}");
                    attempts.push(format!("{delimiter}: {reason}"));
                }
            }
        }

        Err(IngestError::Parse {
            path: path.to_path_buf(),
            attempts,
        })
    }

    fn parse_strict(&self, bytes: &[u8], delimiter: Delimiter) -> Result<RecordSet, String> {
        let text = std::str::from_utf8(bytes).map_err(|e| format!("invalid UTF-8: {e}"))?;
        let text = delimiter.prepare(text.trim_start_matches(UTF8_BOM));

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter.parser_byte())
            .quote(b'"')
            .has_headers(true)
            .flexible(false)
            .from_reader(text.as_bytes());

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| e.to_string())?
            .iter()
            .map(|h| delimiter.restore(h))
            .collect();
        if header.len() < self.options.min_columns {
            return Err(format!(
                "found {} column(s), expected at least {}",
                header.len(),
                self.options.min_columns
            ));
        }

        let mut rows = vec![];
        for record in reader.records() {
            let record = record.map_err(|e| e.to_string())?;
            rows.push(record.iter().map(|v| delimiter.field(v)).collect());
        }

        RecordSet::from_text_rows(header, rows).map_err(|e| e.to_string())
    }

    /// Binary-safe read for sources with unreliable encoding: undecodable bytes become
    /// U+FFFD, quotes are not interpreted, short rows are padded with nulls and rows
    /// with too many fields are skipped with a warning.
    pub fn read_lenient(&self, path: &Path, delimiter: Delimiter) -> Result<RecordSet> {
        let bytes = Self::read_bytes(path)?;
        let file_name = display_name(path);
        let decoded = String::from_utf8_lossy(&bytes);
        let text = delimiter.prepare(decoded.trim_start_matches(UTF8_BOM));

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter.parser_byte())
            .quoting(false)
            .has_headers(true)
            .flexible(true)
            .from_reader(text.as_bytes());

        let header: Vec<String> = match reader.headers() {
            Ok(h) => h.iter().map(|h| delimiter.restore(h)).collect(),
            Err(e) => {
                warn!("No usable header in {file_name}: {e}");
                vec![]
            }
        };

        let mut rows: Vec<Vec<Option<String>>> = vec![];
        let mut skipped = 0usize;
        for record in reader.records() {
            match record {
                Ok(record) if record.len() <= header.len() => {
                    let mut row: Vec<Option<String>> =
                        record.iter().map(|v| delimiter.field(v)).collect();
                    row.resize(header.len(), None);
                    rows.push(row);
                }
                Ok(record) => {
                    skipped += 1;
                    let line = record.position().map(|p| p.line()).unwrap_or_default();
                    warn!(
                        "Skipping line {line} of {file_name}: expected {} fields, saw {}",
                        header.len(),
                        record.len()
                    );
                }
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping malformed row in {file_name}: {e}");
                }
            }
        }

        info!(
            "Read {file_name} with delimiter {delimiter} in lenient mode ({} rows, {skipped} skipped)",
            rows.len()
        );
        RecordSet::from_text_rows(header, rows).map_err(|source| IngestError::Arrow {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
