use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config_file::{CliOverrides, CollisionPolicy, EnhancerBackend, ExtractionMode};
use crate::curation::Stage;

#[derive(Parser, Debug, Default)]
#[command(
    name = "media-curator",
    version,
    about = "Curates downloaded images and videos into a clean, resolution-routed training set",
    long_about = "
Media Curator

Turns a noisy pile of downloaded images and videos into a deduplicated,
person-filtered image set, sorted by resolution into the final dataset or an
upscale queue.

Stages (in order):
  dedup    remove near-duplicate images, keeping the largest copy
  extract  pull sharp still frames out of videos
  filter   delete images without a prominent person (optional)
  route    copy images to final/ or pending/2x, pending/4x by resolution
  enhance  upscale the pending queues into the final dataset (optional)
  cleanup  remove frames/ and pending/ after routing (optional)

Directory layout:
  <raw>/<target>/*     downloaded media, one subdirectory per target
  <frames>/*           extracted video frames
  <pending>/2x, 4x     images waiting for upscaling
  <final>/*            the curated dataset

Example Usage:
  # Full run with defaults (./raw_downloads -> ./final_dataset)
  media-curator

  # Use a config file and override the worker count
  media-curator --config curator.json -j 8

  # Sample a frame every second instead of only the first frame
  media-curator --mode interval --interval 1.0

  # Skip person filtering and upscaling, verbose logging
  media-curator --no-filter --no-enhance -v

  # Re-run only the routing stage against the current directories
  media-curator --only route

  # Machine-readable progress for a GUI
  media-curator --json-progress"
)]
pub struct Args {
    /// JSON configuration file; command-line flags override its values
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Raw downloads directory (<raw>/<target>/*)
    #[arg(long = "raw", value_name = "DIR")]
    pub raw_dir: Option<PathBuf>,

    /// Directory for extracted video frames
    #[arg(long = "frames", value_name = "DIR")]
    pub frames_dir: Option<PathBuf>,

    /// Directory holding the 2x/ and 4x/ upscale queues
    #[arg(long = "pending", value_name = "DIR")]
    pub pending_dir: Option<PathBuf>,

    /// Final dataset directory
    #[arg(long = "final", value_name = "DIR")]
    pub final_dir: Option<PathBuf>,

    /// Number of frame-extraction workers (0 = auto-detect CPU cores)
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    pub jobs: Option<usize>,

    /// Maximum fingerprint distance for two images to count as duplicates
    #[arg(long = "dedup-threshold", value_name = "BITS")]
    pub dedup_threshold: Option<u32>,

    /// Frame extraction mode: first_only or interval
    #[arg(long = "mode", value_name = "MODE")]
    pub mode: Option<ExtractionMode>,

    /// Seconds between sampled frames in interval mode
    #[arg(long = "interval", value_name = "SECONDS")]
    pub interval_seconds: Option<f64>,

    /// Minimum Laplacian variance for a frame to be kept
    #[arg(long = "blur-threshold", value_name = "SCORE")]
    pub blur_threshold: Option<f64>,

    /// Disable the person filter
    #[arg(long = "no-filter")]
    pub no_filter: bool,

    /// Person detection script (run with the configured interpreter)
    #[arg(long = "detector-script", value_name = "FILE")]
    pub detector_script: Option<PathBuf>,

    /// Minimum share of the image covered by the largest person (0.0-1.0)
    #[arg(long = "min-person-ratio", value_name = "RATIO")]
    pub min_person_ratio: Option<f64>,

    /// Confidence threshold for person detections (0.0-1.0)
    #[arg(long = "confidence", value_name = "THRESHOLD")]
    pub confidence: Option<f32>,

    /// Shorter side (px) at or above which no upscaling is needed
    #[arg(long = "min-no-upscale", value_name = "PX")]
    pub min_no_upscale: Option<u32>,

    /// Shorter side (px) at or above which a 2x upscale suffices
    #[arg(long = "min-2x", value_name = "PX")]
    pub min_2x: Option<u32>,

    /// What to do when a routed file name already exists: rename or overwrite
    #[arg(long = "on-collision", value_name = "POLICY")]
    pub on_collision: Option<CollisionPolicy>,

    /// Disable the enhancement stage
    #[arg(long = "no-enhance")]
    pub no_enhance: bool,

    /// Enhancement backend: realesrgan or lanczos
    #[arg(long = "enhancer", value_name = "BACKEND")]
    pub enhancer: Option<EnhancerBackend>,

    /// Skip face restoration after upscaling
    #[arg(long = "no-face-enhance")]
    pub no_face_enhance: bool,

    /// Remove the frames and pending directories after routing
    #[arg(long = "cleanup")]
    pub cleanup: bool,

    /// Run a single stage: dedup, extract, filter, route, enhance or cleanup
    #[arg(long = "only", value_name = "STAGE")]
    pub only: Option<Stage>,

    /// Emit JSON lines on stdout instead of progress bars (for GUI integration)
    #[arg(long = "json-progress")]
    pub json_progress: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long = "print-config")]
    pub print_config: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Flags the user actually passed, for merging over the config file
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            raw_dir: self.raw_dir.clone(),
            frames_dir: self.frames_dir.clone(),
            pending_dir: self.pending_dir.clone(),
            final_dir: self.final_dir.clone(),
            jobs: self.jobs,
            dedup_threshold: self.dedup_threshold,
            extraction_mode: self.mode,
            interval_seconds: self.interval_seconds,
            blur_threshold: self.blur_threshold,
            disable_filter: self.no_filter,
            detector_script: self.detector_script.clone(),
            min_person_ratio: self.min_person_ratio,
            confidence: self.confidence,
            min_no_upscale: self.min_no_upscale,
            min_2x: self.min_2x,
            on_collision: self.on_collision,
            disable_enhance: self.no_enhance,
            enhancer_backend: self.enhancer,
            disable_face_enhance: self.no_face_enhance,
            cleanup: self.cleanup,
        }
    }

    /// Default log filter when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
