//! Maximum oscillation per hour (MoH).
//!
//! Every observation is assigned to the wall-clock hour it falls in, and each
//! bucket keeps a running min/max per key. A bucket becomes an output record
//! only when every computed key has at least one numeric observation in it; a
//! single observation gives a spread of zero, which is still a value.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use tracing::{debug, info, warn};

use crate::series::{TelemetryRecord, TelemetryValue, TimeSeries};
use crate::timestamp::truncate_to_hour;

pub const MOH_SUFFIX: &str = "_MoH";

pub fn moh_column(key: &str) -> String {
    format!("{}{}", key, MOH_SUFFIX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscillationOutcome {
    /// One record per complete hour bucket, keyed by `<key>_MoH`.
    pub series: TimeSeries,
    /// Requested keys that were present and aggregated.
    pub computed_keys: Vec<String>,
    /// Requested keys that are not columns of the input.
    pub skipped_keys: Vec<String>,
    /// Hour buckets dropped because at least one key had no numeric value.
    pub incomplete_buckets: usize,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    min: f64,
    max: f64,
}

impl Span {
    fn observe(slot: &mut Option<Span>, value: f64) {
        match slot {
            Some(span) => {
                span.min = span.min.min(value);
                span.max = span.max.max(value);
            }
            None => *slot = Some(Span { min: value, max: value }),
        }
    }
}

struct HourBucket {
    start: DateTime<FixedOffset>,
    spans: Vec<Option<Span>>,
}

pub fn compute_oscillation<S: AsRef<str>>(series: &TimeSeries, keys: &[S]) -> OscillationOutcome {
    let mut computed_keys: Vec<String> = Vec::new();
    let mut skipped_keys: Vec<String> = Vec::new();

    for key in keys.iter().map(|key| key.as_ref()) {
        if computed_keys.iter().any(|k| k == key) || skipped_keys.iter().any(|k| k == key) {
            continue;
        }
        if series.has_column(key) {
            computed_keys.push(key.to_string());
        } else {
            warn!(key, "key not found in data, MoH will not be computed for it");
            skipped_keys.push(key.to_string());
        }
    }

    let mut buckets: BTreeMap<i64, HourBucket> = BTreeMap::new();
    if !computed_keys.is_empty() {
        for record in series.records() {
            let start = truncate_to_hour(record.timestamp);
            let bucket = buckets
                .entry(start.timestamp_millis())
                .or_insert_with(|| HourBucket {
                    start,
                    spans: vec![None; computed_keys.len()],
                });

            for (slot, key) in bucket.spans.iter_mut().zip(&computed_keys) {
                if let Some(value) = record.get(key).and_then(TelemetryValue::as_f64) {
                    Span::observe(slot, value);
                }
            }
        }
    }

    let columns: Vec<String> = computed_keys.iter().map(|key| moh_column(key)).collect();
    let mut records = Vec::with_capacity(buckets.len());
    let mut incomplete_buckets = 0usize;

    for bucket in buckets.into_values() {
        let Some(spans) = bucket.spans.into_iter().collect::<Option<Vec<Span>>>() else {
            incomplete_buckets += 1;
            continue;
        };

        let mut record = TelemetryRecord::new(bucket.start);
        for (column, span) in columns.iter().zip(spans) {
            record
                .values
                .insert(column.clone(), TelemetryValue::Float(span.max - span.min));
        }
        records.push(record);
    }

    if incomplete_buckets > 0 {
        debug!(incomplete_buckets, "dropped hour buckets with incomplete data");
    }
    info!(
        hours = records.len(),
        keys = computed_keys.len(),
        "finished MoH computation"
    );

    OscillationOutcome {
        series: TimeSeries::new(columns, records),
        computed_keys,
        skipped_keys,
        incomplete_buckets,
    }
}
