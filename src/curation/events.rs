//! Progress notifications from a running pipeline.
//!
//! Stages never touch progress bars or stdout directly. They push events into
//! an [`EventSink`]; the binary decides how to render them.

use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};

use super::stats::{RunSummary, Stage, StageStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        stage: Stage,
        total: usize,
    },
    StageProgress {
        stage: Stage,
        current: usize,
        total: usize,
    },
    StageFinished {
        stage: Stage,
        status: StageStatus,
        errors: usize,
    },
    Summary {
        summary: RunSummary,
    },
}

/// Sending half of the event channel. A disabled sink drops every event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<PipelineEvent>>,
}

impl EventSink {
    pub fn new(sender: Sender<PipelineEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// A connected sink and its receiver
    pub fn channel() -> (Self, Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            // A receiver that went away only means nobody is watching
            let _ = sender.send(event);
        }
    }

    pub fn stage_started(&self, stage: Stage, total: usize) {
        self.emit(PipelineEvent::StageStarted { stage, total });
    }

    pub fn progress(&self, stage: Stage, current: usize, total: usize) {
        self.emit(PipelineEvent::StageProgress {
            stage,
            current,
            total,
        });
    }

    pub fn stage_finished(&self, stage: Stage, status: StageStatus, errors: usize) {
        self.emit(PipelineEvent::StageFinished {
            stage,
            status,
            errors,
        });
    }
}
