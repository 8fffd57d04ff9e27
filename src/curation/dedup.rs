//! Near-duplicate removal for the raw image pool.
//!
//! Candidates are visited from the largest file to the smallest. A candidate
//! whose fingerprint lies within the threshold of any image already kept is a
//! duplicate; otherwise it becomes a kept representative. Comparisons are
//! only ever made against kept images, so the grouping is not transitive.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::catalog::list_images;
use super::events::EventSink;
use super::fingerprint::{fingerprint_file, Fingerprint};
use super::stats::{RunSummary, Stage, StageReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub candidate: Candidate,
    /// Kept image this one was matched against
    pub representative: PathBuf,
    pub distance: u32,
}

#[derive(Debug, Default)]
pub struct DedupPlan {
    pub kept: Vec<Candidate>,
    pub duplicates: Vec<Duplicate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub candidates: usize,
    /// Files that could not be decoded; left in place
    pub unreadable: usize,
    pub kept: usize,
    pub deleted: usize,
    pub delete_failures: usize,
}

impl StageReport for DedupStats {
    const STAGE: Stage = Stage::Dedup;

    fn errors(&self) -> usize {
        self.delete_failures
    }

    fn log_tally(&self) {
        info!(
            "Deduplication: {} candidates, {} kept, {} deleted, {} unreadable, {} errors",
            self.candidates,
            self.kept,
            self.deleted,
            self.unreadable,
            self.errors()
        );
    }

    fn record(&self, summary: &mut RunSummary) {
        summary.duplicates_removed += self.deleted;
        summary.errors += self.errors();
    }
}

/// Decide which candidates are duplicates, without touching the filesystem.
///
/// Larger files are visited first so they become the representatives; equal
/// sizes fall back to path order to keep the outcome deterministic.
pub fn plan_deduplication(mut candidates: Vec<Candidate>, threshold: u32) -> DedupPlan {
    candidates.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));

    let mut plan = DedupPlan::default();
    for candidate in candidates {
        let nearest = plan
            .kept
            .iter()
            .enumerate()
            .map(|(index, kept)| (index, kept.fingerprint.distance(candidate.fingerprint)))
            .min_by_key(|(_, distance)| *distance);

        match nearest {
            Some((index, distance)) if distance <= threshold => {
                let representative = plan.kept[index].path.clone();
                plan.duplicates.push(Duplicate {
                    candidate,
                    representative,
                    distance,
                });
            }
            _ => plan.kept.push(candidate),
        }
    }
    plan
}

/// Remove near-duplicate images under `root`, keeping the largest copy of each
pub fn deduplicate(root: &Path, threshold: u32, events: &EventSink) -> DedupStats {
    let images = list_images(root);
    let total = images.len();
    let mut stats = DedupStats {
        candidates: total,
        ..Default::default()
    };

    info!("Deduplicating {} images (threshold {})", total, threshold);
    events.stage_started(Stage::Dedup, total);

    let mut candidates = Vec::with_capacity(total);
    for (i, asset) in images.into_iter().enumerate() {
        match fingerprint_file(&asset.path) {
            Ok(fingerprint) => candidates.push(Candidate {
                path: asset.path,
                size: asset.size,
                fingerprint,
            }),
            Err(e) => {
                warn!("Skipping {}", e);
                stats.unreadable += 1;
            }
        }
        events.progress(Stage::Dedup, i + 1, total);
    }

    let plan = plan_deduplication(candidates, threshold);
    stats.kept = plan.kept.len();

    for duplicate in &plan.duplicates {
        debug!(
            "{} duplicates {} (distance {})",
            duplicate.candidate.path.display(),
            duplicate.representative.display(),
            duplicate.distance
        );
        match fs::remove_file(&duplicate.candidate.path) {
            Ok(()) => stats.deleted += 1,
            Err(e) => {
                warn!(
                    "Failed to delete duplicate {}: {}",
                    duplicate.candidate.path.display(),
                    e
                );
                stats.delete_failures += 1;
            }
        }
    }

    stats.log_tally();
    stats
}
