use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use moh_core::config::{parse_timezone, UploadConfig, DEFAULT_HOST};
use moh_core::events::{EventSink, PipelineEvent};
use moh_core::pipeline::{load_series, PipelineConfig, UploadPipeline};
use moh_core::series::{LoadOptions, TimeSeries, DEFAULT_TIMESTAMP_COLUMN};
use moh_core::upload::UploadKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log directives used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Upload CSV telemetry to a device endpoint, optionally with the hourly
/// maximum oscillation (MoH) of each key.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to the `;`-delimited CSV file
    #[arg(long)]
    csv: PathBuf,

    /// Telemetry keys to send (e.g. --keys "Temperature" "Relative humidity")
    #[arg(long, num_args = 1.., value_name = "KEY")]
    keys: Vec<String>,

    /// Device access token
    #[arg(long, env = "MOH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Telemetry API base URL
    #[arg(long, env = "MOH_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// List the telemetry columns found in the CSV and exit
    #[arg(long)]
    list_columns: bool,

    /// Also compute and send the hourly maximum oscillation
    #[arg(long)]
    moh: bool,

    /// Only send the trailing period, e.g. 7D, 1M, 2Y, or "all"
    #[arg(long, value_name = "ND|NM|NY|all")]
    time_filter: Option<String>,

    /// Timezone for timestamps written without an offset
    #[arg(long, env = "MOH_TIMEZONE", default_value = "UTC")]
    timezone: String,

    /// Name of the timestamp column
    #[arg(long, default_value = DEFAULT_TIMESTAMP_COLUMN)]
    timestamp_column: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "MOH_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let load = LoadOptions {
        timestamp_column: cli.timestamp_column.clone(),
        timezone: parse_timezone(&cli.timezone)?,
    };
    let series = load_series(&cli.csv, &load)
        .with_context(|| format!("cannot load {}", cli.csv.display()))?;

    if cli.list_columns {
        print!("{}", column_listing(&series));
        return Ok(());
    }

    let token = upload_token(&cli.keys, cli.token.as_deref())?;

    let upload = UploadConfig::new(&cli.host, token)?
        .with_timeout(Duration::from_secs(cli.timeout_secs));
    info!(host = upload.host(), "telemetry endpoint configured");

    let config = PipelineConfig {
        csv_path: cli.csv.clone(),
        keys: cli.keys.clone(),
        compute_moh: cli.moh,
        time_filter: cli.time_filter.clone(),
        load,
    };

    let (events, mut rx) = EventSink::channel();
    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render(&event);
        }
    });

    let pipeline = UploadPipeline::with_http(config, &upload)?.with_events(events);
    let result = pipeline.run_series(series).await;
    drop(pipeline);
    renderer.await.context("progress renderer stopped")?;

    result?;
    Ok(())
}

/// Telemetry columns of `series`, one ` - name` line each.
fn column_listing(series: &TimeSeries) -> String {
    let mut out = String::from("Parameters in CSV:\n");
    for column in series.columns() {
        out.push_str(" - ");
        out.push_str(column);
        out.push('\n');
    }
    out
}

/// Uploading needs at least one key and a token; returns the token.
fn upload_token<'a>(keys: &[String], token: Option<&'a str>) -> Result<&'a str> {
    if keys.is_empty() {
        bail!("give at least one key with --keys, or use --list-columns to see the available parameters");
    }
    match token {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ => bail!("a device token is required (--token or MOH_TOKEN)"),
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn render(event: &PipelineEvent) {
    match event {
        PipelineEvent::Loaded { rows, .. } => println!("Loaded {} records from CSV.", rows),
        PipelineEvent::WindowApplied {
            start: Some(start),
            end: Some(end),
            rows,
        } => println!("Data filtered from {} to {} ({} records).", start, end, rows),
        PipelineEvent::WindowApplied { .. } => println!("No data to filter."),
        PipelineEvent::WindowIgnored { reason } => println!("{}. Using all data.", reason),
        PipelineEvent::UploadStarted { kind, total } => match kind {
            UploadKind::Raw => println!("Sending {} records.", total),
            UploadKind::Oscillation => println!("Sending {} oscillation records.", total),
        },
        PipelineEvent::Progress {
            kind,
            sent,
            total,
            ts,
        } => match kind {
            UploadKind::Raw => println!("Progress: Records sent {}/{}.", sent, total),
            UploadKind::Oscillation => {
                println!("Progress sending oscillations: {}/{} (ts {}).", sent, total, ts)
            }
        },
        PipelineEvent::RecordFailed {
            kind,
            index,
            error,
            payload,
            ..
        } => {
            println!("Failed to send {} record {}: {}", kind, index, error);
            println!("Payload failed: {}", payload);
        }
        PipelineEvent::UploadFinished { kind, status, .. } => {
            println!("Upload of {} data {}.", kind, status)
        }
        PipelineEvent::OscillationSkippedKey { key } => {
            println!("Warning: key '{}' not found, MoH will not be computed for it.", key)
        }
        PipelineEvent::OscillationComputed { records } => {
            println!("Computed MoH for {} hours.", records)
        }
        PipelineEvent::OscillationEmpty => println!("MoH data empty."),
        PipelineEvent::Finished { status } => println!("Process {}.", status),
    }
}
