//! Untyped decoding of `;`-delimited telemetry exports.
//!
//! The table keeps every cell as text; typing (timestamps, numbers) happens in
//! `moh-core`. Null handling is decided here so downstream code only ever sees
//! `Option<String>`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::errors::ParserError;

pub const DELIMITER: u8 = b';';

/// Cell contents that are read as a missing value rather than as text.
pub const NULL_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

pub fn is_null_token(cell: &str) -> bool {
    NULL_TOKENS.contains(&cell)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .and_then(|cell| cell.as_deref())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

pub fn read_csv_file(path: &Path) -> Result<CsvTable, ParserError> {
    let mut file = File::open(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ParserError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ParserError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|source| ParserError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    parse_csv(&content)
}

pub fn parse_csv(content: &str) -> Result<CsvTable, ParserError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = reader.records();

    let header = records.next().ok_or(ParserError::MissingHeader)??;
    let headers = disambiguate_headers(header.iter());
    let width = headers.len();

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.len() > width {
            let line = record.position().map(|pos| pos.line()).unwrap_or(0);
            return Err(ParserError::DataRow {
                line,
                message: format!("expected {} fields, found {}", width, record.len()),
            });
        }

        let mut cells: Vec<Option<String>> = record
            .iter()
            .map(|cell| {
                if is_null_token(cell) {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        // Short rows are padded with nulls.
        cells.resize(width, None);
        rows.push(cells);
    }

    Ok(CsvTable { headers, rows })
}

fn disambiguate_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut headers = Vec::new();

    for (idx, name) in raw.enumerate() {
        let base = if name.is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            name.to_string()
        };

        let count = seen.entry(base.clone()).or_insert(0);
        let header = if *count == 0 {
            base.clone()
        } else {
            format!("{}.{}", base, count)
        };
        *count += 1;
        headers.push(header);
    }

    headers
}
