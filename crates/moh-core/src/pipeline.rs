use std::path::{Path, PathBuf};
use std::sync::Arc;

use moh_parser::read_csv_file;
use tracing::{info, warn};

use crate::config::UploadConfig;
use crate::error::Result;
use crate::events::{EventSink, PipelineEvent};
use crate::oscillation::compute_oscillation;
use crate::series::{LoadOptions, TimeSeries};
use crate::upload::{
    upload_series, HttpTransport, TelemetryTransport, UploadKind, UploadReport, UploadStatus,
};
use crate::window::{apply_time_filter, WindowOutcome};

/// Filter keyword that disables time filtering.
pub const ALL_DATA: &str = "all";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub csv_path: PathBuf,
    pub keys: Vec<String>,
    pub compute_moh: bool,
    pub time_filter: Option<String>,
    pub load: LoadOptions,
}

impl PipelineConfig {
    pub fn new(csv_path: impl Into<PathBuf>, keys: Vec<String>) -> Self {
        Self {
            csv_path: csv_path.into(),
            keys,
            compute_moh: false,
            time_filter: None,
            load: LoadOptions::default(),
        }
    }

    fn effective_time_filter(&self) -> Option<&str> {
        self.time_filter
            .as_deref()
            .filter(|expr| !expr.trim().eq_ignore_ascii_case(ALL_DATA))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscillationStage {
    Disabled,
    /// Computed, but no hour bucket had data for every key.
    Empty,
    Uploaded(UploadReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub rows_loaded: usize,
    pub rows_selected: usize,
    pub window: Option<WindowSummary>,
    pub raw: UploadReport,
    pub oscillation: OscillationStage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowSummary {
    Filtered,
    Ignored { reason: String },
}

impl RunSummary {
    pub fn status(&self) -> UploadStatus {
        let mut failed = self.raw.failures.len();
        if let OscillationStage::Uploaded(report) = &self.oscillation {
            failed += report.failures.len();
        }
        UploadStatus::from_failures(failed)
    }
}

pub fn load_series(path: &Path, options: &LoadOptions) -> Result<TimeSeries> {
    let table = read_csv_file(path)?;
    Ok(TimeSeries::load(&table, options)?)
}

pub struct UploadPipeline {
    config: PipelineConfig,
    transport: Arc<dyn TelemetryTransport>,
    events: EventSink,
}

impl UploadPipeline {
    pub fn new(config: PipelineConfig, transport: Arc<dyn TelemetryTransport>) -> Self {
        Self {
            config,
            transport,
            events: EventSink::disabled(),
        }
    }

    /// Pipeline posting over HTTP with a single client for the whole run.
    pub fn with_http(config: PipelineConfig, upload: &UploadConfig) -> Result<Self> {
        let transport = HttpTransport::new(upload)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Loads the configured CSV and runs every stage. Load and validation
    /// errors abort before anything is sent.
    pub async fn run(&self) -> Result<RunSummary> {
        let series = load_series(&self.config.csv_path, &self.config.load)?;
        self.run_series(series).await
    }

    pub async fn run_series(&self, series: TimeSeries) -> Result<RunSummary> {
        let rows_loaded = series.len();
        self.events.emit(PipelineEvent::Loaded {
            rows: rows_loaded,
            columns: series.columns().to_vec(),
        });

        // 1. trailing time window (fails open)
        let (series, window) = match self.config.effective_time_filter() {
            Some(expr) => {
                let outcome = apply_time_filter(series, expr);
                let summary = match &outcome {
                    WindowOutcome::Filtered { start, end, series, .. } => {
                        self.events.emit(PipelineEvent::WindowApplied {
                            start: *start,
                            end: *end,
                            rows: series.len(),
                        });
                        WindowSummary::Filtered
                    }
                    WindowOutcome::Ignored { reason, .. } => {
                        self.events.emit(PipelineEvent::WindowIgnored {
                            reason: reason.clone(),
                        });
                        WindowSummary::Ignored {
                            reason: reason.clone(),
                        }
                    }
                };
                (outcome.into_series(), Some(summary))
            }
            None => (series, None),
        };

        // 2. every requested key must be a column
        series.validate_keys(&self.config.keys)?;

        // 3. raw rows
        let raw = upload_series(
            self.transport.as_ref(),
            &series,
            &self.config.keys,
            UploadKind::Raw,
            &self.events,
        )
        .await;

        // 4. hourly oscillation
        let oscillation = if self.config.compute_moh {
            self.upload_oscillation(&series).await
        } else {
            OscillationStage::Disabled
        };

        let summary = RunSummary {
            rows_loaded,
            rows_selected: series.len(),
            window,
            raw,
            oscillation,
        };

        let status = summary.status();
        match status {
            UploadStatus::Complete => info!(%status, "run finished"),
            UploadStatus::CompletedWithFailures { .. } => warn!(%status, "run finished"),
        }
        self.events.emit(PipelineEvent::Finished { status });

        Ok(summary)
    }

    async fn upload_oscillation(&self, series: &TimeSeries) -> OscillationStage {
        let outcome = compute_oscillation(series, &self.config.keys);
        for key in &outcome.skipped_keys {
            self.events.emit(PipelineEvent::OscillationSkippedKey { key: key.clone() });
        }

        if outcome.series.is_empty() {
            info!("no oscillation data to send");
            self.events.emit(PipelineEvent::OscillationEmpty);
            return OscillationStage::Empty;
        }

        self.events.emit(PipelineEvent::OscillationComputed {
            records: outcome.series.len(),
        });
        let report = upload_series(
            self.transport.as_ref(),
            &outcome.series,
            outcome.series.columns(),
            UploadKind::Oscillation,
            &self.events,
        )
        .await;
        OscillationStage::Uploaded(report)
    }
}
