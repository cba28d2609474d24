use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use moh_core::error::PipelineError;
use moh_core::events::{EventSink, PipelineEvent};
use moh_core::pipeline::{OscillationStage, PipelineConfig, UploadPipeline, WindowSummary};
use moh_core::series::{SeriesError, TelemetryValue};
use moh_core::upload::{
    TelemetryPayload, TelemetryTransport, UploadError, UploadKind, UploadStatus,
};
use moh_parser::ParserError;
use tempfile::NamedTempFile;

/// Records every payload and fails the calls whose position is listed.
#[derive(Default)]
struct ScriptedTransport {
    sent: Mutex<Vec<TelemetryPayload>>,
    fail_calls: HashSet<usize>,
}

impl ScriptedTransport {
    fn failing(calls: &[usize]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_calls: calls.iter().copied().collect(),
        }
    }

    fn sent(&self) -> Vec<TelemetryPayload> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryTransport for ScriptedTransport {
    async fn send(&self, payload: &TelemetryPayload) -> Result<(), UploadError> {
        let mut sent = self.sent.lock().unwrap();
        let call = sent.len();
        sent.push(payload.clone());
        if self.fail_calls.contains(&call) {
            Err(UploadError::Status {
                status: 503,
                body: "unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn csv_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write csv");
    file
}

const TEMPERATURE_CSV: &str = "Timestamp;Temperature;Humidity\n\
2025-07-28 11:05:00;18.0;\n\
2025-07-28 10:05:00;20.0;61\n\
2025-07-28 10:35:00;26.5;NaN\n";

fn temperature(payload: &TelemetryPayload, key: &str) -> Option<TelemetryValue> {
    payload
        .values
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}

#[tokio::test]
async fn uploads_raw_rows_then_hourly_oscillation() {
    let file = csv_file(TEMPERATURE_CSV);
    let mut config = PipelineConfig::new(file.path(), vec!["Temperature".to_string()]);
    config.compute_moh = true;

    let transport = Arc::new(ScriptedTransport::default());
    let pipeline = UploadPipeline::new(config, transport.clone());
    let summary = pipeline.run().await.expect("run");

    let sent = transport.sent();
    assert_eq!(sent.len(), 5);

    // raw rows in timestamp order, only requested keys
    let raw: Vec<_> = sent[..3].iter().map(|p| temperature(p, "Temperature")).collect();
    assert_eq!(
        raw,
        vec![
            Some(TelemetryValue::Float(20.0)),
            Some(TelemetryValue::Float(26.5)),
            Some(TelemetryValue::Float(18.0)),
        ]
    );
    assert!(sent[..3].iter().all(|p| p.values.len() == 1));

    // oscillation: 6.5 for the first hour, 0 for the single-reading hour
    assert_eq!(sent[3].ts, 1_753_696_800_000);
    assert_eq!(temperature(&sent[3], "Temperature_MoH"), Some(TelemetryValue::Float(6.5)));
    assert_eq!(sent[4].ts, 1_753_700_400_000);
    assert_eq!(temperature(&sent[4], "Temperature_MoH"), Some(TelemetryValue::Float(0.0)));

    assert_eq!(summary.rows_loaded, 3);
    assert_eq!(summary.raw.delivered, 3);
    match &summary.oscillation {
        OscillationStage::Uploaded(report) => {
            assert_eq!(report.kind, UploadKind::Oscillation);
            assert_eq!(report.delivered, 2);
        }
        other => panic!("expected oscillation upload, got {other:?}"),
    }
    assert_eq!(summary.status(), UploadStatus::Complete);
}

#[tokio::test]
async fn null_cells_are_left_out_of_payloads() {
    let file = csv_file(TEMPERATURE_CSV);
    let config = PipelineConfig::new(
        file.path(),
        vec!["Temperature".to_string(), "Humidity".to_string()],
    );
    let transport = Arc::new(ScriptedTransport::default());
    UploadPipeline::new(config, transport.clone())
        .run()
        .await
        .expect("run");

    let sent = transport.sent();
    let humidity: Vec<_> = sent.iter().map(|p| temperature(p, "Humidity")).collect();
    assert_eq!(humidity, vec![Some(TelemetryValue::Integer(61)), None, None]);
}

#[tokio::test]
async fn failed_record_does_not_stop_the_run() {
    let file = csv_file(TEMPERATURE_CSV);
    let mut config = PipelineConfig::new(file.path(), vec!["Temperature".to_string()]);
    config.compute_moh = true;

    // second raw row and first oscillation record fail
    let transport = Arc::new(ScriptedTransport::failing(&[1, 3]));
    let (events, mut rx) = EventSink::channel();
    let pipeline = UploadPipeline::new(config, transport.clone()).with_events(events);
    let summary = pipeline.run().await.expect("run completes");
    drop(pipeline);

    assert_eq!(transport.sent().len(), 5);
    assert_eq!(summary.raw.delivered, 2);
    assert_eq!(summary.raw.failures[0].index, 1);
    assert_eq!(summary.status(), UploadStatus::CompletedWithFailures { failed: 2 });

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(PipelineEvent::Loaded { rows: 3, .. })));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::Finished {
            status: UploadStatus::CompletedWithFailures { failed: 2 }
        })
    ));
    let failed: Vec<(UploadKind, usize)> = events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::RecordFailed { kind, index, .. } => Some((*kind, *index)),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![(UploadKind::Raw, 1), (UploadKind::Oscillation, 0)]);
}

#[tokio::test]
async fn missing_keys_abort_before_upload() {
    let file = csv_file(TEMPERATURE_CSV);
    let config = PipelineConfig::new(
        file.path(),
        vec!["Temperature".to_string(), "Pressure".to_string()],
    );
    let transport = Arc::new(ScriptedTransport::default());
    let err = UploadPipeline::new(config, transport.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Series(SeriesError::MissingKeys(ref keys)) if keys == &["Pressure".to_string()]
    ));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn load_errors_are_fatal() {
    let transport = Arc::new(ScriptedTransport::default());

    let missing = PipelineConfig::new("/definitely/not/here.csv", vec!["T".to_string()]);
    let err = UploadPipeline::new(missing, transport.clone())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Parser(ParserError::NotFound { .. })));

    let file = csv_file("Time;T\n2025-07-28 10:00:00;1\n");
    let no_ts = PipelineConfig::new(file.path(), vec!["T".to_string()]);
    let err = UploadPipeline::new(no_ts, transport.clone())
        .run()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Series(SeriesError::MissingTimestampColumn { .. })
    ));

    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn time_filter_narrows_and_bad_filter_fails_open() {
    let file = csv_file(TEMPERATURE_CSV);

    let mut config = PipelineConfig::new(file.path(), vec!["Temperature".to_string()]);
    config.time_filter = Some("0d".to_string());
    let transport = Arc::new(ScriptedTransport::default());
    let summary = UploadPipeline::new(config, transport.clone())
        .run()
        .await
        .expect("run");
    assert_eq!(summary.rows_selected, 1);
    assert_eq!(summary.window, Some(WindowSummary::Filtered));
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(transport.sent()[0].ts, 1_753_700_700_000);

    let mut config = PipelineConfig::new(file.path(), vec!["Temperature".to_string()]);
    config.time_filter = Some("xyz".to_string());
    let transport = Arc::new(ScriptedTransport::default());
    let summary = UploadPipeline::new(config, transport.clone())
        .run()
        .await
        .expect("run");
    assert_eq!(summary.rows_selected, 3);
    assert!(matches!(summary.window, Some(WindowSummary::Ignored { .. })));
    assert_eq!(transport.sent().len(), 3);

    let mut config = PipelineConfig::new(file.path(), vec!["Temperature".to_string()]);
    config.time_filter = Some("ALL".to_string());
    let transport = Arc::new(ScriptedTransport::default());
    let summary = UploadPipeline::new(config, transport.clone())
        .run()
        .await
        .expect("run");
    assert_eq!(summary.window, None);
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test]
async fn empty_oscillation_is_reported_not_sent() {
    let file = csv_file(
        "Timestamp;Temperature;Status\n\
         2025-07-28 10:05:00;20.0;ok\n\
         2025-07-28 10:35:00;21.0;ok\n",
    );
    let mut config = PipelineConfig::new(
        file.path(),
        vec!["Temperature".to_string(), "Status".to_string()],
    );
    config.compute_moh = true;

    let transport = Arc::new(ScriptedTransport::default());
    let summary = UploadPipeline::new(config, transport.clone())
        .run()
        .await
        .expect("run");

    assert_eq!(summary.oscillation, OscillationStage::Empty);
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(summary.status(), UploadStatus::Complete);
}
