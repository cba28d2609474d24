use chrono::DateTime;
use moh_core::series::{TelemetryRecord, TimeSeries};
use moh_core::window::{apply_time_filter, TimeWindow, WindowOutcome, WindowParseError, WindowUnit};

fn at(ts: &str) -> TelemetryRecord {
    let timestamp = DateTime::parse_from_rfc3339(ts).expect("timestamp");
    TelemetryRecord::new(timestamp).with_value("T", 1.0)
}

fn series() -> TimeSeries {
    TimeSeries::from_records(vec![
        at("2024-01-15T00:00:00Z"),
        at("2024-12-31T12:00:00Z"),
        at("2025-02-28T12:00:00Z"),
        at("2025-03-24T12:00:00Z"),
        at("2025-03-31T00:00:00Z"),
        at("2025-03-31T12:00:00Z"),
        at("2025-03-31T12:00:00Z"),
    ])
}

fn kept(outcome: &WindowOutcome) -> Vec<String> {
    outcome
        .series()
        .records()
        .iter()
        .map(|r| r.timestamp.to_rfc3339())
        .collect()
}

#[test]
fn parses_expressions_case_insensitively() {
    assert_eq!(
        "7D".parse::<TimeWindow>(),
        Ok(TimeWindow { amount: 7, unit: WindowUnit::Days })
    );
    assert_eq!(
        "1m".parse::<TimeWindow>(),
        Ok(TimeWindow { amount: 1, unit: WindowUnit::Months })
    );
    assert_eq!(
        "2y".parse::<TimeWindow>(),
        Ok(TimeWindow { amount: 2, unit: WindowUnit::Years })
    );
    assert_eq!(
        "7 D".parse::<TimeWindow>(),
        Ok(TimeWindow { amount: 7, unit: WindowUnit::Days })
    );
    assert_eq!("".parse::<TimeWindow>(), Err(WindowParseError::Empty));
    assert_eq!("7W".parse::<TimeWindow>(), Err(WindowParseError::UnknownUnit('W')));
    assert_eq!(
        "xD".parse::<TimeWindow>(),
        Err(WindowParseError::InvalidAmount("x".to_string()))
    );
    assert_eq!(
        "-3D".parse::<TimeWindow>(),
        Err(WindowParseError::InvalidAmount("-3".to_string()))
    );
}

#[test]
fn zero_days_keeps_only_the_latest_timestamp() {
    let outcome = apply_time_filter(series(), "0D");
    assert!(outcome.is_filtered());
    assert_eq!(
        kept(&outcome),
        vec!["2025-03-31T12:00:00+00:00", "2025-03-31T12:00:00+00:00"]
    );
}

#[test]
fn days_are_fixed_spans() {
    let outcome = apply_time_filter(series(), "7D");
    assert_eq!(
        kept(&outcome),
        vec![
            "2025-03-24T12:00:00+00:00",
            "2025-03-31T00:00:00+00:00",
            "2025-03-31T12:00:00+00:00",
            "2025-03-31T12:00:00+00:00",
        ]
    );
}

#[test]
fn spaced_magnitude_is_applied() {
    let outcome = apply_time_filter(series(), " 7 d ");
    assert!(outcome.is_filtered());
    assert_eq!(outcome.series().len(), 4);
}

#[test]
fn months_clamp_to_end_of_month() {
    // 2025-03-31 minus one month is 2025-02-28
    let outcome = apply_time_filter(series(), "1M");
    match &outcome {
        WindowOutcome::Filtered { start, .. } => assert_eq!(
            start.map(|s| s.to_rfc3339()),
            Some("2025-02-28T12:00:00+00:00".to_string())
        ),
        other => panic!("expected filtered outcome, got {other:?}"),
    }
    assert_eq!(outcome.series().len(), 5);
}

#[test]
fn years_are_calendar_years() {
    let outcome = apply_time_filter(series(), "1Y");
    assert_eq!(outcome.series().len(), 6);
    assert_eq!(kept(&outcome)[0], "2024-12-31T12:00:00+00:00");
}

#[test]
fn malformed_filter_fails_open() {
    let original = series();
    for expr in ["xyz", "", "7", "D", "7 days"] {
        match apply_time_filter(original.clone(), expr) {
            WindowOutcome::Ignored { series, reason } => {
                assert_eq!(series, original);
                assert!(reason.contains("invalid time filter"), "{reason}");
            }
            other => panic!("'{expr}' should be ignored, got {other:?}"),
        }
    }
}

#[test]
fn out_of_range_filter_fails_open() {
    let outcome = apply_time_filter(series(), "4000000000Y");
    assert!(!outcome.is_filtered());
    assert_eq!(outcome.into_series(), series());
}

#[test]
fn empty_series_filters_to_empty() {
    let outcome = apply_time_filter(TimeSeries::default(), "7D");
    assert!(outcome.is_filtered());
    assert!(outcome.series().is_empty());
}
