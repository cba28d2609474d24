//! Progress events published by a pipeline run.
//!
//! Front-ends (the CLI, or anything driving the pipeline interactively) consume
//! these from a channel. Nothing in the pipeline depends on them being read.

use chrono::{DateTime, FixedOffset};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::upload::{UploadKind, UploadStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Loaded {
        rows: usize,
        columns: Vec<String>,
    },
    WindowApplied {
        start: Option<DateTime<FixedOffset>>,
        end: Option<DateTime<FixedOffset>>,
        rows: usize,
    },
    WindowIgnored {
        reason: String,
    },
    UploadStarted {
        kind: UploadKind,
        total: usize,
    },
    Progress {
        kind: UploadKind,
        sent: usize,
        total: usize,
        ts: i64,
    },
    RecordFailed {
        kind: UploadKind,
        index: usize,
        ts: i64,
        error: String,
        payload: String,
    },
    UploadFinished {
        kind: UploadKind,
        total: usize,
        delivered: usize,
        status: UploadStatus,
    },
    OscillationSkippedKey {
        key: String,
    },
    OscillationComputed {
        records: usize,
    },
    OscillationEmpty,
    Finished {
        status: UploadStatus,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(sender: UnboundedSender<PipelineEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            // A closed receiver only means nobody is watching.
            let _ = sender.send(event);
        }
    }
}
