//! Stage sequencing for a curation run.
//!
//! Stages run strictly one after another: dedup, extract, filter, route,
//! enhance, cleanup. Each stage reports its own stats, which are folded into a
//! single [`RunSummary`]. A fatal stage error stops the run but the partial
//! summary is still produced and attached to the returned [`PipelineFailure`].

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config_file::{CurationConfig, EnhancerBackend};
use crate::curation::detection::ScriptDetectorLoader;
use crate::curation::enhance::EnhanceSettings;
use crate::curation::router::RouteTargets;
use crate::curation::{
    deduplicate, enhance_pending, extract_frames, filter_images, list_images, list_videos,
    route_images, CodeFormer, DetectorLoader, Enhancer, EventSink, ExtractionSettings,
    FaceRestorer, FfmpegDecoder, FilterPolicy, LanczosEnhancer, MediaAsset, PipelineEvent,
    RealEsrgan, RoutingThresholds, RunSummary, Stage, StageReport, StageStatus, VideoDecoder,
};
use crate::error::CurationError;

/// A run that stopped on a fatal error, with everything gathered before it
#[derive(Debug, Error)]
#[error("pipeline aborted: {source}")]
pub struct PipelineFailure {
    pub summary: RunSummary,
    #[source]
    pub source: CurationError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub removed: usize,
    pub failures: usize,
}

impl StageReport for CleanupStats {
    const STAGE: Stage = Stage::Cleanup;

    fn errors(&self) -> usize {
        self.failures
    }

    fn log_tally(&self) {
        info!(
            "Cleanup: {} intermediate directories removed, {} errors",
            self.removed,
            self.errors()
        );
    }

    fn record(&self, summary: &mut RunSummary) {
        summary.errors += self.errors();
    }
}

pub struct Pipeline {
    config: CurationConfig,
    decoder: Box<dyn VideoDecoder>,
    detector: Box<dyn DetectorLoader>,
    enhancer: Box<dyn Enhancer>,
    faces: Option<Box<dyn FaceRestorer>>,
    events: EventSink,
    cancel: Arc<AtomicBool>,
    only: Option<Stage>,
}

impl Pipeline {
    /// Pipeline with the external collaborators described by `config`
    pub fn new(config: CurationConfig) -> Self {
        let decoder = FfmpegDecoder::new(config.frames.decode_timeout());
        let detector =
            ScriptDetectorLoader::new(config.filter.detector.clone(), config.filter.confidence);
        let enhancer: Box<dyn Enhancer> = match config.enhance.backend {
            EnhancerBackend::Realesrgan => Box::new(RealEsrgan::locate(
                config.enhance.realesrgan_path.as_deref(),
                &config.enhance.output_format,
                config.enhance.timeout(),
            )),
            EnhancerBackend::Lanczos => Box::new(LanczosEnhancer::default()),
        };

        Self {
            config,
            decoder: Box::new(decoder),
            detector: Box::new(detector),
            enhancer,
            faces: None,
            events: EventSink::disabled(),
            cancel: Arc::new(AtomicBool::new(false)),
            only: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Box<dyn VideoDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn DetectorLoader>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_enhancer(mut self, enhancer: Box<dyn Enhancer>) -> Self {
        self.enhancer = enhancer;
        self
    }

    /// Use this restorer instead of looking up the configured face command
    pub fn with_face_restorer(mut self, faces: Box<dyn FaceRestorer>) -> Self {
        self.faces = Some(faces);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run a single stage against the current directory state
    pub fn only(mut self, stage: Stage) -> Self {
        self.only = Some(stage);
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &CurationConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunSummary, PipelineFailure> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        let outcome = self.run_stages(&mut summary);

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        summary.final_count = list_images(&self.config.directories.final_dataset).len();

        match outcome {
            Ok(()) => {
                if summary.interrupted {
                    warn!("Pipeline interrupted; partial results kept");
                } else {
                    info!(
                        "Pipeline complete: final dataset has {} images",
                        summary.final_count
                    );
                }
                self.events.emit(PipelineEvent::Summary {
                    summary: summary.clone(),
                });
                Ok(summary)
            }
            Err(source) => {
                summary.errors += 1;
                error!("Pipeline aborted: {}", source);
                self.events.emit(PipelineEvent::Summary {
                    summary: summary.clone(),
                });
                Err(PipelineFailure { summary, source })
            }
        }
    }

    fn run_stages(&self, summary: &mut RunSummary) -> Result<(), CurationError> {
        self.take_inventory(summary);

        for stage in Stage::iter() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Interrupted before stage '{}'", stage);
                summary.interrupted = true;
                return Ok(());
            }

            if !self.should_run(stage) {
                summary.stages.insert(stage, StageStatus::Skipped);
                self.events.stage_finished(stage, StageStatus::Skipped, 0);
                continue;
            }

            info!("Stage: {}", stage.label());
            match stage {
                Stage::Dedup => self.run_dedup(summary),
                Stage::Extract => self.run_extract(summary)?,
                Stage::Filter => self.run_filter(summary),
                Stage::Route => self.run_route(summary)?,
                Stage::Enhance => self.run_enhance(summary)?,
                Stage::Cleanup => self.run_cleanup(summary),
            }
        }
        Ok(())
    }

    fn should_run(&self, stage: Stage) -> bool {
        if let Some(only) = self.only {
            return stage == only;
        }
        match stage {
            Stage::Filter => self.config.filter.enabled,
            Stage::Enhance => self.config.enhance.enabled,
            Stage::Cleanup => self.config.cleanup_intermediate,
            Stage::Dedup | Stage::Extract | Stage::Route => true,
        }
    }

    fn take_inventory(&self, summary: &mut RunSummary) {
        let raw = &self.config.directories.raw;
        let images = list_images(raw);
        let videos = list_videos(raw);
        summary.images_downloaded = images.len();
        summary.videos_downloaded = videos.len();

        let mut per_target: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for asset in &images {
            per_target.entry(target_label(asset)).or_default().0 += 1;
        }
        for asset in &videos {
            per_target.entry(target_label(asset)).or_default().1 += 1;
        }

        info!(
            "Raw inventory: {} images, {} videos in {}",
            images.len(),
            videos.len(),
            raw.display()
        );
        for (target, (image_count, video_count)) in &per_target {
            info!("  {}: {} images, {} videos", target, image_count, video_count);
        }
    }

    fn finish<R: StageReport>(&self, summary: &mut RunSummary, report: &R, status: StageStatus) {
        report.record(summary);
        summary.stages.insert(R::STAGE, status);
        self.events.stage_finished(R::STAGE, status, report.errors());
    }

    fn fail(&self, summary: &mut RunSummary, stage: Stage, error: CurationError) -> CurationError {
        summary.stages.insert(stage, StageStatus::Failed);
        self.events.stage_finished(stage, StageStatus::Failed, 1);
        error
    }

    fn run_dedup(&self, summary: &mut RunSummary) {
        let stats = deduplicate(
            &self.config.directories.raw,
            self.config.dedup.threshold,
            &self.events,
        );
        self.finish(summary, &stats, StageStatus::Completed);
    }

    fn run_extract(&self, summary: &mut RunSummary) -> Result<(), CurationError> {
        let videos = list_videos(&self.config.directories.raw);
        let settings = ExtractionSettings {
            mode: self.config.frames.mode,
            interval_seconds: self.config.frames.interval_seconds,
            blur_threshold: self.config.frames.blur_threshold,
            jobs: self.config.effective_jobs(),
        };

        match extract_frames(
            &videos,
            &self.config.directories.frames,
            &settings,
            self.decoder.as_ref(),
            &self.events,
        ) {
            Ok(stats) => {
                self.finish(summary, &stats, StageStatus::Completed);
                Ok(())
            }
            Err(failure) => {
                failure.partial.record(summary);
                Err(self.fail(summary, Stage::Extract, failure.error))
            }
        }
    }

    /// Images the filter and router work on: raw images plus extracted frames
    fn working_set(&self) -> Vec<MediaAsset> {
        let mut images = list_images(&self.config.directories.raw);
        images.extend(list_images(&self.config.directories.frames));
        images
    }

    fn run_filter(&self, summary: &mut RunSummary) {
        let policy = FilterPolicy {
            confidence: self.config.filter.confidence,
            min_person_ratio: self.config.filter.min_person_ratio,
        };
        let stats = filter_images(
            &self.working_set(),
            self.detector.as_ref(),
            &policy,
            &self.events,
        );
        let status = if stats.aborted {
            StageStatus::Failed
        } else {
            StageStatus::Completed
        };
        self.finish(summary, &stats, status);
    }

    fn run_route(&self, summary: &mut RunSummary) -> Result<(), CurationError> {
        let dirs = &self.config.directories;
        let targets = RouteTargets {
            final_dir: dirs.final_dataset.clone(),
            pending_2x: dirs.pending_2x(),
            pending_4x: dirs.pending_4x(),
        };
        let thresholds = RoutingThresholds {
            min_no_upscale: self.config.routing.min_no_upscale,
            min_2x: self.config.routing.min_2x,
        };

        match route_images(
            &self.working_set(),
            &targets,
            &thresholds,
            self.config.routing.on_collision,
            &self.events,
        ) {
            Ok(stats) => {
                self.finish(summary, &stats, StageStatus::Completed);
                Ok(())
            }
            Err(e) => Err(self.fail(summary, Stage::Route, e)),
        }
    }

    fn run_enhance(&self, summary: &mut RunSummary) -> Result<(), CurationError> {
        let dirs = &self.config.directories;
        let settings =
            EnhanceSettings::from_config(&self.config.enhance, self.config.routing.on_collision);

        let located;
        let faces: Option<&dyn FaceRestorer> = match &self.faces {
            Some(faces) => Some(faces.as_ref()),
            None if self.config.enhance.face_enhance => {
                located = CodeFormer::locate(
                    &self.config.enhance.face_command,
                    self.config.enhance.face_fidelity,
                    self.config.enhance.face_timeout(),
                );
                located.as_ref().map(|c| c as &dyn FaceRestorer)
            }
            None => None,
        };

        match enhance_pending(
            &dirs.pending_4x(),
            &dirs.pending_2x(),
            &dirs.final_dataset,
            self.enhancer.as_ref(),
            faces,
            &settings,
            &self.events,
        ) {
            Ok(stats) => {
                self.finish(summary, &stats, StageStatus::Completed);
                Ok(())
            }
            Err(e) => Err(self.fail(summary, Stage::Enhance, e)),
        }
    }

    fn run_cleanup(&self, summary: &mut RunSummary) {
        let mut stats = CleanupStats::default();

        // Intermediate copies are only disposable once routing has committed them
        if self.only.is_none()
            && summary.stage_status(Stage::Route) != Some(StageStatus::Completed)
        {
            warn!("Skipping cleanup: routing did not complete");
            summary.stages.insert(Stage::Cleanup, StageStatus::Skipped);
            self.events.stage_finished(Stage::Cleanup, StageStatus::Skipped, 0);
            return;
        }

        let dirs = &self.config.directories;
        // Queued images only reach the final dataset through enhancement
        let enhanced = self.only.is_some()
            || summary.stage_status(Stage::Enhance) == Some(StageStatus::Completed);
        let mut removable = vec![&dirs.frames];
        if enhanced || list_images(&dirs.pending).is_empty() {
            removable.push(&dirs.pending);
        } else {
            warn!(
                "Keeping {}: its images were not enhanced into the final dataset",
                dirs.pending.display()
            );
        }

        let total = removable.len();
        self.events.stage_started(Stage::Cleanup, total);
        for (i, dir) in removable.into_iter().enumerate() {
            match remove_dir(dir) {
                Ok(true) => stats.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", dir.display(), e);
                    stats.failures += 1;
                }
            }
            self.events.progress(Stage::Cleanup, i + 1, total);
        }

        stats.log_tally();
        self.finish(summary, &stats, StageStatus::Completed);
    }
}

fn target_label(asset: &MediaAsset) -> String {
    asset.target.clone().unwrap_or_else(|| "(flat)".to_string())
}

/// Remove a directory tree; `Ok(false)` if it did not exist
fn remove_dir(dir: &Path) -> std::io::Result<bool> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
