//! JSON output for GUI integration
//!
//! When --json-progress flag is enabled, pipeline events are emitted as JSON
//! lines to stdout, replacing progress bars and the summary table.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::curation::PipelineEvent;

/// Last progress emission timestamp (milliseconds since epoch)
/// Used for throttling progress updates to ~25 FPS (40ms between updates)
static LAST_PROGRESS_MS: AtomicU64 = AtomicU64::new(0);

const PROGRESS_INTERVAL_MS: u64 = 40;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonMessage<'a> {
    /// Configuration or startup failure before the pipeline ran
    Error { message: &'a str },
}

fn emit(value: &impl Serialize) {
    if let Ok(json) = serde_json::to_string(value) {
        println!("{}", json);
    }
}

/// Emit a pipeline event as one JSON line.
///
/// Progress updates are throttled to at most one every 40ms; the final update
/// of a stage (current == total) is always emitted.
pub fn emit_event(event: &PipelineEvent) {
    if let PipelineEvent::StageProgress { current, total, .. } = event {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let last_ms = LAST_PROGRESS_MS.load(Ordering::Relaxed);

        if !should_emit_progress(now_ms, last_ms, *current, *total) {
            return;
        }
        LAST_PROGRESS_MS.store(now_ms, Ordering::Relaxed);
    }
    emit(event);
}

pub fn emit_error(message: &str) {
    emit(&JsonMessage::Error { message });
}

fn should_emit_progress(now_ms: u64, last_ms: u64, current: usize, total: usize) -> bool {
    current >= total || now_ms.saturating_sub(last_ms) >= PROGRESS_INTERVAL_MS
}
