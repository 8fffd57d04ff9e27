//! Run-level statistics.
//!
//! Each stage returns its own stats value; the orchestrator folds them into a
//! single [`RunSummary`] through [`StageReport::record`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::AddAssign;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Pipeline stages, in execution order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Dedup,
    Extract,
    Filter,
    Route,
    Enhance,
    Cleanup,
}

impl Stage {
    /// Human-readable name for progress bars and the summary table
    pub fn label(self) -> &'static str {
        match self {
            Stage::Dedup => "Deduplicating",
            Stage::Extract => "Extracting frames",
            Stage::Filter => "Filtering content",
            Stage::Route => "Routing by resolution",
            Stage::Enhance => "Enhancing",
            Stage::Cleanup => "Cleaning up",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// Disabled by configuration or not selected with `--only`
    Skipped,
    /// Aborted by a precondition or fatal error
    Failed,
}

/// The externally visible result of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub images_downloaded: usize,
    pub videos_downloaded: usize,
    pub duplicates_removed: usize,
    pub frames_extracted: usize,
    pub discarded_blurry: usize,
    pub filtered_no_person: usize,
    pub filtered_too_small: usize,
    pub routed_final: usize,
    pub routed_2x: usize,
    pub routed_4x: usize,
    pub upscaled: usize,
    pub faces_enhanced: usize,
    pub fallback_copies: usize,
    pub errors: usize,
    pub elapsed_secs: f64,
    pub final_count: usize,
    pub stages: BTreeMap<Stage, StageStatus>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn stage_status(&self, stage: Stage) -> Option<StageStatus> {
        self.stages.get(&stage).copied()
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|(_, status)| **status == StageStatus::Failed)
            .map(|(stage, _)| *stage)
            .collect()
    }
}

impl AddAssign<&RunSummary> for RunSummary {
    fn add_assign(&mut self, other: &RunSummary) {
        self.images_downloaded += other.images_downloaded;
        self.videos_downloaded += other.videos_downloaded;
        self.duplicates_removed += other.duplicates_removed;
        self.frames_extracted += other.frames_extracted;
        self.discarded_blurry += other.discarded_blurry;
        self.filtered_no_person += other.filtered_no_person;
        self.filtered_too_small += other.filtered_too_small;
        self.routed_final += other.routed_final;
        self.routed_2x += other.routed_2x;
        self.routed_4x += other.routed_4x;
        self.upscaled += other.upscaled;
        self.faces_enhanced += other.faces_enhanced;
        self.fallback_copies += other.fallback_copies;
        self.errors += other.errors;
        self.elapsed_secs += other.elapsed_secs;
        self.final_count += other.final_count;
        self.interrupted |= other.interrupted;

        for (stage, status) in &other.stages {
            // a failure anywhere stays visible in the merged record
            match self.stages.get(stage) {
                Some(StageStatus::Failed) => {}
                _ => {
                    self.stages.insert(*stage, *status);
                }
            }
        }
    }
}

/// Stats value produced by one stage
pub trait StageReport {
    const STAGE: Stage;

    /// Per-asset errors counted during the stage
    fn errors(&self) -> usize;

    /// Log the end-of-stage tally at `info`
    fn log_tally(&self);

    /// Fold this stage's counters into the run summary
    fn record(&self, summary: &mut RunSummary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_stage_order_and_names() {
        let stages: Vec<String> = Stage::iter().map(|s| s.to_string()).collect();
        assert_eq!(
            stages,
            vec!["dedup", "extract", "filter", "route", "enhance", "cleanup"]
        );
        assert!(Stage::Dedup < Stage::Route);
        assert_eq!("route".parse::<Stage>().unwrap(), Stage::Route);
        assert!("nonsense".parse::<Stage>().is_err());
    }

    #[test]
    fn test_summaries_accumulate() {
        let mut total = RunSummary {
            duplicates_removed: 2,
            errors: 1,
            ..Default::default()
        };
        total.stages.insert(Stage::Filter, StageStatus::Failed);

        let mut other = RunSummary {
            duplicates_removed: 3,
            routed_final: 4,
            interrupted: true,
            ..Default::default()
        };
        other.stages.insert(Stage::Filter, StageStatus::Completed);
        other.stages.insert(Stage::Route, StageStatus::Completed);

        total += &other;
        assert_eq!(total.duplicates_removed, 5);
        assert_eq!(total.routed_final, 4);
        assert_eq!(total.errors, 1);
        assert!(total.interrupted);
        assert_eq!(total.stage_status(Stage::Filter), Some(StageStatus::Failed));
        assert_eq!(total.stage_status(Stage::Route), Some(StageStatus::Completed));
        assert_eq!(total.failed_stages(), vec![Stage::Filter]);
    }

    #[test]
    fn test_summary_serializes_stage_keys() {
        let mut summary = RunSummary::default();
        summary.stages.insert(Stage::Dedup, StageStatus::Completed);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["stages"]["dedup"], "completed");
        assert_eq!(json["errors"], 0);
    }
}
