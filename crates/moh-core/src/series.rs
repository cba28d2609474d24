use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use moh_parser::CsvTable;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::timestamp::parse_timestamp;

pub const DEFAULT_TIMESTAMP_COLUMN: &str = "Timestamp";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesError {
    #[error("cannot find '{column}' column in CSV")]
    MissingTimestampColumn { column: String },
    #[error("row {row} has malformed timestamp '{value}'")]
    MalformedTimestamp { row: usize, value: String },
    #[error("missing keys in CSV: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
}

/// A single telemetry scalar. Nulls never reach this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl TelemetryValue {
    /// Types a CSV cell: integers first, then finite floats, otherwise text.
    pub fn from_cell(cell: &str) -> Self {
        let trimmed = cell.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return TelemetryValue::Integer(value);
        }
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => TelemetryValue::Float(value),
            _ => TelemetryValue::Text(cell.to_string()),
        }
    }

    /// Best-effort numeric view. Anything that is not a finite number is absent.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            TelemetryValue::Integer(value) => *value as f64,
            TelemetryValue::Float(value) => *value,
            TelemetryValue::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        TelemetryValue::Float(value)
    }
}

impl From<i64> for TelemetryValue {
    fn from(value: i64) -> Self {
        TelemetryValue::Integer(value)
    }
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        TelemetryValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub values: BTreeMap<String, TelemetryValue>,
}

impl TelemetryRecord {
    pub fn new(timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<TelemetryValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&TelemetryValue> {
        self.values.get(key)
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub timestamp_column: String,
    /// Zone applied to timestamps written without an offset.
    pub timezone: Tz,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            timezone: chrono_tz::UTC,
        }
    }
}

/// Timestamp-ordered telemetry rows plus the set of columns they were read from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    columns: Vec<String>,
    records: Vec<TelemetryRecord>,
}

impl TimeSeries {
    /// Builds a series over an explicit column universe. Records are stably
    /// sorted by timestamp.
    pub fn new(columns: Vec<String>, mut records: Vec<TelemetryRecord>) -> Self {
        records.sort_by_key(|record| record.timestamp);
        Self { columns, records }
    }

    /// Builds a series whose columns are the union of the records' keys, in
    /// first-seen order.
    pub fn from_records(records: Vec<TelemetryRecord>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for key in record.values.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        Self::new(columns, records)
    }

    pub fn load(table: &CsvTable, options: &LoadOptions) -> Result<Self, SeriesError> {
        let ts_idx = table.column_index(&options.timestamp_column).ok_or_else(|| {
            SeriesError::MissingTimestampColumn {
                column: options.timestamp_column.clone(),
            }
        })?;

        let columns: Vec<(usize, &String)> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != ts_idx)
            .collect();

        let mut records = Vec::with_capacity(table.row_count());
        for (row_idx, cells) in table.rows.iter().enumerate() {
            let raw_ts = table.cell(row_idx, ts_idx).unwrap_or_default();
            let timestamp = parse_timestamp(raw_ts, options.timezone).ok_or_else(|| {
                SeriesError::MalformedTimestamp {
                    row: row_idx + 1,
                    value: raw_ts.to_string(),
                }
            })?;

            let mut record = TelemetryRecord::new(timestamp);
            for (col_idx, name) in &columns {
                if let Some(Some(cell)) = cells.get(*col_idx) {
                    record
                        .values
                        .insert((*name).clone(), TelemetryValue::from_cell(cell));
                }
            }
            records.push(record);
        }

        let series = Self::new(
            columns.into_iter().map(|(_, name)| name.clone()).collect(),
            records,
        );
        info!(
            rows = series.len(),
            columns = series.columns.len(),
            "loaded time series"
        );
        Ok(series)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, key: &str) -> bool {
        self.columns.iter().any(|column| column == key)
    }

    pub fn max_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.records.last().map(|record| record.timestamp)
    }

    /// Fails with every requested key that is not a column of this series.
    pub fn validate_keys<S: AsRef<str>>(&self, keys: &[S]) -> Result<(), SeriesError> {
        let missing: Vec<String> = keys
            .iter()
            .map(|key| key.as_ref())
            .filter(|key| !self.has_column(key))
            .map(str::to_string)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SeriesError::MissingKeys(missing))
        }
    }

    /// Records at or after `start`, keeping the column universe.
    pub fn since(&self, start: DateTime<FixedOffset>) -> Self {
        let first = self
            .records
            .partition_point(|record| record.timestamp < start);
        Self {
            columns: self.columns.clone(),
            records: self.records[first..].to_vec(),
        }
    }
}
