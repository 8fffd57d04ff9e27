//! Person-presence filter.
//!
//! Images without a confident person detection, or whose largest person covers
//! too little of the frame, are deleted. Images run through the detector one
//! at a time.

use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::detection::{Detection, DetectorLoader};
use super::events::EventSink;
use super::stats::{RunSummary, Stage, StageReport};
use super::MediaAsset;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPolicy {
    /// Person detections below this confidence are ignored
    pub confidence: f32,
    /// Minimum share of the image the largest person box must cover
    pub min_person_ratio: f64,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            min_person_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterDecision {
    Keep { ratio: f64 },
    NoPerson,
    TooSmall { ratio: f64 },
}

impl FilterDecision {
    pub fn keeps(&self) -> bool {
        matches!(self, FilterDecision::Keep { .. })
    }
}

/// Apply the person policy to one image's detections
pub fn evaluate(
    detections: &[Detection],
    width: u32,
    height: u32,
    policy: &FilterPolicy,
) -> FilterDecision {
    let image_area = width as f64 * height as f64;

    let largest_ratio = detections
        .iter()
        .filter(|d| d.is_person() && d.confidence >= policy.confidence)
        .map(|d| d.area() / image_area)
        .fold(None, |best: Option<f64>, ratio| {
            Some(best.map_or(ratio, |b| b.max(ratio)))
        });

    match largest_ratio {
        None => FilterDecision::NoPerson,
        Some(ratio) if ratio >= policy.min_person_ratio => FilterDecision::Keep { ratio },
        Some(ratio) => FilterDecision::TooSmall { ratio },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub processed: usize,
    pub kept: usize,
    pub deleted_no_person: usize,
    pub deleted_too_small: usize,
    pub detector_errors: usize,
    pub unreadable: usize,
    pub delete_failures: usize,
    /// The detector could not be loaded and nothing was filtered
    pub aborted: bool,
}

impl StageReport for FilterStats {
    const STAGE: Stage = Stage::Filter;

    fn errors(&self) -> usize {
        self.detector_errors + self.unreadable + self.delete_failures + usize::from(self.aborted)
    }

    fn log_tally(&self) {
        if self.aborted {
            info!("Content filter: aborted, no images filtered");
            return;
        }
        info!(
            "Content filter: {} processed, {} kept, {} deleted (no person), {} deleted (too small), {} errors",
            self.processed,
            self.kept,
            self.deleted_no_person,
            self.deleted_too_small,
            self.errors()
        );
    }

    fn record(&self, summary: &mut RunSummary) {
        summary.filtered_no_person += self.deleted_no_person;
        summary.filtered_too_small += self.deleted_too_small;
        summary.errors += self.errors();
    }
}

/// Run the person filter over `images`, deleting those that fail the policy.
///
/// A detector that fails to load aborts the stage with zero progress. A
/// detector failure on a single image keeps that image.
pub fn filter_images(
    images: &[MediaAsset],
    loader: &dyn DetectorLoader,
    policy: &FilterPolicy,
    events: &EventSink,
) -> FilterStats {
    let total = images.len();
    let mut stats = FilterStats::default();

    let mut detector = match loader.load() {
        Ok(detector) => detector,
        Err(e) => {
            error!("Content filter cannot run: {}", e);
            stats.aborted = true;
            stats.log_tally();
            return stats;
        }
    };

    info!(
        "Filtering {} images (confidence >= {}, person ratio >= {})",
        total, policy.confidence, policy.min_person_ratio
    );
    events.stage_started(Stage::Filter, total);

    for (i, image) in images.iter().enumerate() {
        stats.processed += 1;

        let (width, height) = match image::image_dimensions(&image.path) {
            Ok((w, h)) if w > 0 && h > 0 => (w, h),
            Ok(_) => {
                warn!("Skipping {}: zero-sized image", image.path.display());
                stats.unreadable += 1;
                events.progress(Stage::Filter, i + 1, total);
                continue;
            }
            Err(e) => {
                warn!("Skipping {}: {}", image.path.display(), e);
                stats.unreadable += 1;
                events.progress(Stage::Filter, i + 1, total);
                continue;
            }
        };

        match detector.detect(&image.path) {
            Ok(detections) => {
                let decision = evaluate(&detections, width, height, policy);
                apply_decision(&image.path, decision, &mut stats);
            }
            Err(e) => {
                warn!("Keeping {} after detector failure: {}", image.path.display(), e);
                stats.detector_errors += 1;
                stats.kept += 1;
            }
        }

        events.progress(Stage::Filter, i + 1, total);
    }

    stats.log_tally();
    stats
}

fn apply_decision(path: &Path, decision: FilterDecision, stats: &mut FilterStats) {
    match decision {
        FilterDecision::Keep { ratio } => {
            debug!("Keep {} (person ratio {:.3})", path.display(), ratio);
            stats.kept += 1;
            return;
        }
        FilterDecision::NoPerson => debug!("Delete {}: no person", path.display()),
        FilterDecision::TooSmall { ratio } => {
            debug!("Delete {}: person too small ({:.3})", path.display(), ratio)
        }
    }

    match fs::remove_file(path) {
        Ok(()) => match decision {
            FilterDecision::NoPerson => stats.deleted_no_person += 1,
            _ => stats.deleted_too_small += 1,
        },
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            stats.delete_failures += 1;
        }
    }
}
