//! Still-frame extraction from videos, with blur rejection.
//!
//! Videos are independent: each worker writes only files named after its own
//! video, so the pool needs no coordination beyond summing the results.

use rayon::prelude::*;
use std::ops::AddAssign;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use super::events::EventSink;
use super::sharpness::{is_sharp, sharpness_score};
use super::stats::{RunSummary, Stage, StageReport};
use super::video::VideoDecoder;
use super::MediaAsset;
use crate::config_file::ExtractionMode;
use crate::error::{CurationError, Result};
use crate::utils::{ensure_dir, save_jpeg};

/// JPEG quality for extracted frames
pub const FRAME_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSettings {
    pub mode: ExtractionMode,
    pub interval_seconds: f64,
    pub blur_threshold: f64,
    pub jobs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub videos: usize,
    pub extracted: usize,
    pub discarded_blurry: usize,
    pub failed_videos: usize,
}

impl AddAssign for ExtractionStats {
    fn add_assign(&mut self, other: Self) {
        self.videos += other.videos;
        self.extracted += other.extracted;
        self.discarded_blurry += other.discarded_blurry;
        self.failed_videos += other.failed_videos;
    }
}

impl StageReport for ExtractionStats {
    const STAGE: Stage = Stage::Extract;

    fn errors(&self) -> usize {
        self.failed_videos
    }

    fn log_tally(&self) {
        info!(
            "Frame extraction: {} videos, {} frames extracted, {} discarded as blurry, {} errors",
            self.videos,
            self.extracted,
            self.discarded_blurry,
            self.errors()
        );
    }

    fn record(&self, summary: &mut RunSummary) {
        summary.frames_extracted += self.extracted;
        summary.discarded_blurry += self.discarded_blurry;
        summary.errors += self.errors();
    }
}

/// Frames between samples in interval mode, never less than one
pub fn frame_step(fps: f64, interval_seconds: f64) -> usize {
    let step = (fps * interval_seconds).round();
    if step.is_finite() && step >= 1.0 {
        step as usize
    } else {
        1
    }
}

/// What one video produced. Counters cover everything written before a
/// failure, so a video that breaks halfway still reports its saved frames.
#[derive(Debug, Default)]
struct VideoOutcome {
    stats: ExtractionStats,
    error: Option<CurationError>,
}

/// A fatal extraction error, with the counters for every frame already on disk
#[derive(Debug)]
pub struct ExtractionFailure {
    pub partial: ExtractionStats,
    pub error: CurationError,
}

impl From<CurationError> for ExtractionFailure {
    fn from(error: CurationError) -> Self {
        Self {
            partial: ExtractionStats::default(),
            error,
        }
    }
}

/// Extract frames from every video into `output_dir`.
///
/// Transient per-video failures (decode errors, unreadable streams) are logged
/// and counted. Failing to prepare the output directory or the worker pool,
/// or an I/O failure while writing frames, aborts the stage.
pub fn extract_frames(
    videos: &[MediaAsset],
    output_dir: &Path,
    settings: &ExtractionSettings,
    decoder: &dyn VideoDecoder,
    events: &EventSink,
) -> std::result::Result<ExtractionStats, ExtractionFailure> {
    let total = videos.len();
    info!(
        "Extracting frames from {} videos ({}, {} workers)",
        total, settings.mode, settings.jobs
    );
    events.stage_started(Stage::Extract, total);

    ensure_dir(output_dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.jobs.max(1))
        .build()
        .map_err(|e| CurationError::Config(format!("could not start worker pool: {}", e)))?;

    let completed = AtomicUsize::new(0);
    let results: Vec<(&MediaAsset, VideoOutcome)> = pool.install(|| {
        videos
            .par_iter()
            .map(|video| {
                let outcome = extract_video(video, output_dir, settings, decoder);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                events.progress(Stage::Extract, done, total);
                (video, outcome)
            })
            .collect()
    });

    let mut stats = ExtractionStats {
        videos: total,
        ..Default::default()
    };
    let mut fatal = None;
    for (video, outcome) in results {
        stats += outcome.stats;
        match outcome.error {
            None => {}
            Some(e) if e.is_transient() => {
                warn!("Frame extraction failed for {}: {}", video.path.display(), e);
                stats.failed_videos += 1;
            }
            Some(e) => {
                fatal.get_or_insert(e);
            }
        }
    }

    if let Some(error) = fatal {
        return Err(ExtractionFailure {
            partial: stats,
            error,
        });
    }

    stats.log_tally();
    Ok(stats)
}

fn extract_video(
    video: &MediaAsset,
    output_dir: &Path,
    settings: &ExtractionSettings,
    decoder: &dyn VideoDecoder,
) -> VideoOutcome {
    let mut stats = ExtractionStats::default();
    let result = match settings.mode {
        ExtractionMode::FirstOnly => {
            extract_first(video, output_dir, settings, decoder, &mut stats)
        }
        ExtractionMode::Interval => {
            extract_interval(video, output_dir, settings, decoder, &mut stats)
        }
    };
    VideoOutcome {
        stats,
        error: result.err(),
    }
}

fn extract_first(
    video: &MediaAsset,
    output_dir: &Path,
    settings: &ExtractionSettings,
    decoder: &dyn VideoDecoder,
    stats: &mut ExtractionStats,
) -> Result<()> {
    let mut source = decoder.open(&video.path, true)?;
    let frame = source
        .next_frame()?
        .ok_or_else(|| CurationError::NoFrames(video.path.clone()))?;

    let score = sharpness_score(&frame);
    if is_sharp(score, settings.blur_threshold) {
        let path = output_dir.join(format!("{}.jpg", video.output_prefix()));
        save_jpeg(&frame, &path, FRAME_JPEG_QUALITY)?;
        stats.extracted += 1;
    } else {
        debug!("Blurry ({:.0}): {}", score, video.path.display());
        stats.discarded_blurry += 1;
    }
    Ok(())
}

fn extract_interval(
    video: &MediaAsset,
    output_dir: &Path,
    settings: &ExtractionSettings,
    decoder: &dyn VideoDecoder,
    stats: &mut ExtractionStats,
) -> Result<()> {
    let mut source = decoder.open(&video.path, false)?;
    let fps = source
        .fps()
        .ok_or_else(|| CurationError::InvalidFrameRate(video.path.clone()))?;
    let step = frame_step(fps, settings.interval_seconds);
    let prefix = video.output_prefix();

    let mut index = 0usize;
    while let Some(frame) = source.next_frame()? {
        if index % step == 0 {
            let score = sharpness_score(&frame);
            if is_sharp(score, settings.blur_threshold) {
                let name = format!("{}_f{:04}.jpg", prefix, stats.extracted);
                save_jpeg(&frame, &output_dir.join(name), FRAME_JPEG_QUALITY)?;
                stats.extracted += 1;
            } else {
                stats.discarded_blurry += 1;
            }
        }
        index += 1;
    }

    if index == 0 {
        return Err(CurationError::NoFrames(video.path.clone()));
    }
    debug!(
        "{}: {} frames read, step {}, {} saved",
        video.path.display(),
        index,
        step,
        stats.extracted
    );
    Ok(())
}
