//! Record-by-record delivery to the telemetry endpoint.
//!
//! One request per record, strictly in order. A failed record is logged with
//! its payload and the loop moves on; there is no retry.

use std::fmt;

use async_trait::async_trait;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::events::{EventSink, PipelineEvent};
use crate::series::{TelemetryRecord, TelemetryValue, TimeSeries};

/// Oscillation values are sent with this many decimals.
pub const OSCILLATION_DECIMALS: i32 = 3;
const RAW_PROGRESS_EVERY: usize = 100;
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Raw,
    Oscillation,
}

impl UploadKind {
    pub fn progress_every(&self) -> usize {
        match self {
            UploadKind::Raw => RAW_PROGRESS_EVERY,
            UploadKind::Oscillation => 1,
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadKind::Raw => f.write_str("raw"),
            UploadKind::Oscillation => f.write_str("oscillation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Complete,
    CompletedWithFailures { failed: usize },
}

impl UploadStatus {
    pub fn from_failures(failed: usize) -> Self {
        if failed == 0 {
            UploadStatus::Complete
        } else {
            UploadStatus::CompletedWithFailures { failed }
        }
    }

    pub fn failed(&self) -> usize {
        match self {
            UploadStatus::Complete => 0,
            UploadStatus::CompletedWithFailures { failed } => *failed,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Complete => f.write_str("complete"),
            UploadStatus::CompletedWithFailures { failed } => {
                write!(f, "completed with {} failed record(s)", failed)
            }
        }
    }
}

/// Wire body: `{"ts": <epoch millis>, "values": {...}}`, values in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPayload {
    pub ts: i64,
    pub values: Vec<(String, TelemetryValue)>,
}

struct OrderedValues<'a>(&'a [(String, TelemetryValue)]);

impl Serialize for OrderedValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for TelemetryPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TelemetryPayload", 2)?;
        state.serialize_field("ts", &self.ts)?;
        state.serialize_field("values", &OrderedValues(&self.values))?;
        state.end()
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

impl TelemetryPayload {
    /// Builds the body for `record`, keeping only the requested keys that hold a
    /// value. Oscillation values are rounded; raw values pass through.
    pub fn from_record<S: AsRef<str>>(record: &TelemetryRecord, keys: &[S], kind: UploadKind) -> Self {
        let mut values: Vec<(String, TelemetryValue)> = Vec::with_capacity(keys.len());
        for key in keys.iter().map(|key| key.as_ref()) {
            if values.iter().any(|(existing, _)| existing == key) {
                continue;
            }
            let Some(value) = record.get(key) else {
                continue;
            };
            let value = match (kind, value) {
                (UploadKind::Oscillation, TelemetryValue::Float(v)) => {
                    TelemetryValue::Float(round_to(*v, OSCILLATION_DECIMALS))
                }
                _ => value.clone(),
            };
            values.push((key.to_string(), value));
        }

        Self {
            ts: record.timestamp_millis(),
            values,
        }
    }
}

/// Scales by `10^decimals`, rounds half to even, and scales back.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

#[async_trait]
pub trait TelemetryTransport: Send + Sync {
    async fn send(&self, payload: &TelemetryPayload) -> Result<(), UploadError>;
}

/// Posts payloads as JSON to `{host}/api/v1/{token}/telemetry`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &UploadConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
        })
    }
}

#[async_trait]
impl TelemetryTransport for HttpTransport {
    async fn send(&self, payload: &TelemetryPayload) -> Result<(), UploadError> {
        let response = self.client.post(&self.endpoint).json(payload).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|idx| body.is_char_boundary(*idx))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(UploadError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    pub index: usize,
    pub ts: i64,
    pub error: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReport {
    pub kind: UploadKind,
    pub total: usize,
    pub delivered: usize,
    pub failures: Vec<RecordFailure>,
}

impl UploadReport {
    pub fn status(&self) -> UploadStatus {
        UploadStatus::from_failures(self.failures.len())
    }

    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

/// Sends every record of `series` once, in order.
///
/// For raw uploads `keys` are the requested telemetry keys; for oscillation
/// uploads pass the derived series' own columns.
pub async fn upload_series<S: AsRef<str>>(
    transport: &dyn TelemetryTransport,
    series: &TimeSeries,
    keys: &[S],
    kind: UploadKind,
    events: &EventSink,
) -> UploadReport {
    let total = series.len();
    info!(%kind, total, "sending records");
    events.emit(PipelineEvent::UploadStarted { kind, total });

    let mut report = UploadReport {
        kind,
        total,
        delivered: 0,
        failures: Vec::new(),
    };

    for (index, record) in series.records().iter().enumerate() {
        let payload = TelemetryPayload::from_record(record, keys, kind);

        match transport.send(&payload).await {
            Ok(()) => {
                report.delivered += 1;
                debug!(%kind, index, ts = payload.ts, "record sent");
            }
            Err(err) => {
                warn!(
                    %kind,
                    index,
                    ts = payload.ts,
                    error = %err,
                    payload = %payload,
                    "failed to send record"
                );
                let failure = RecordFailure {
                    index,
                    ts: payload.ts,
                    error: err.to_string(),
                    payload: payload.to_string(),
                };
                events.emit(PipelineEvent::RecordFailed {
                    kind,
                    index,
                    ts: failure.ts,
                    error: failure.error.clone(),
                    payload: failure.payload.clone(),
                });
                report.failures.push(failure);
            }
        }

        if index % kind.progress_every() == 0 {
            events.emit(PipelineEvent::Progress {
                kind,
                sent: index + 1,
                total,
                ts: payload.ts,
            });
        }
    }

    let status = report.status();
    match status {
        UploadStatus::Complete => info!(%kind, delivered = report.delivered, "upload complete"),
        UploadStatus::CompletedWithFailures { failed } => {
            warn!(%kind, delivered = report.delivered, failed, "upload completed with failures")
        }
    }
    events.emit(PipelineEvent::UploadFinished {
        kind,
        total,
        delivered: report.delivered,
        status,
    });

    report
}
