use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};

/// Complete pipeline configuration, loaded from a JSON file.
///
/// Every section has defaults, so an empty `{}` file (or no file at all) is a
/// valid configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CurationConfig {
    pub directories: DirectoryConfig,
    /// Worker threads for frame extraction (0 = number of CPUs)
    pub parallel_jobs: usize,
    pub dedup: DedupConfig,
    pub frames: FrameConfig,
    pub filter: FilterConfig,
    pub routing: RoutingConfig,
    pub enhance: EnhanceConfig,
    /// Remove the frames and pending directories after a successful run
    pub cleanup_intermediate: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DirectoryConfig {
    /// `<raw>/<target_id>/*` as produced by acquisition
    pub raw: PathBuf,
    pub frames: PathBuf,
    /// Holds the `2x/` and `4x/` upscale queues
    pub pending: PathBuf,
    pub final_dataset: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum Hamming distance (inclusive) at which two fingerprints are duplicates
    pub threshold: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtractionMode {
    FirstOnly,
    Interval,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FrameConfig {
    pub mode: ExtractionMode,
    pub interval_seconds: f64,
    /// Minimum Laplacian variance for a frame to be kept
    pub blur_threshold: f64,
    /// Decoding budget per video
    pub decode_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub enabled: bool,
    /// Largest person box must cover at least this fraction of the image
    pub min_person_ratio: f64,
    /// Detections below this confidence are ignored
    pub confidence: f32,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub interpreter: PathBuf,
    pub script: Option<PathBuf>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CollisionPolicy {
    /// A later copy with the same name replaces the earlier one
    Overwrite,
    /// A later copy with the same name but different content gets a hash suffix
    Rename,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub min_no_upscale: u32,
    pub min_2x: u32,
    pub on_collision: CollisionPolicy,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnhancerBackend {
    Realesrgan,
    Lanczos,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EnhanceConfig {
    pub enabled: bool,
    pub backend: EnhancerBackend,
    pub realesrgan_path: Option<PathBuf>,
    pub photo_model: String,
    pub illustration_model: String,
    pub model_2x: String,
    pub output_format: String,
    pub timeout_secs: u64,
    pub face_enhance: bool,
    pub face_command: PathBuf,
    pub face_fidelity: f32,
    pub face_timeout_secs: u64,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            directories: DirectoryConfig::default(),
            parallel_jobs: 4,
            dedup: DedupConfig::default(),
            frames: FrameConfig::default(),
            filter: FilterConfig::default(),
            routing: RoutingConfig::default(),
            enhance: EnhanceConfig::default(),
            cleanup_intermediate: false,
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            raw: PathBuf::from("./raw_downloads"),
            frames: PathBuf::from("./extracted_frames"),
            pending: PathBuf::from("./pending_upscale"),
            final_dataset: PathBuf::from("./final_dataset"),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { threshold: 8 }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::FirstOnly,
            interval_seconds: 0.5,
            blur_threshold: 100.0,
            decode_timeout_secs: 120,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_person_ratio: 0.05,
            confidence: 0.5,
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            script: None,
            model: "yolov8n.pt".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_no_upscale: 2048,
            min_2x: 1024,
            on_collision: CollisionPolicy::Rename,
        }
    }
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: EnhancerBackend::Realesrgan,
            realesrgan_path: None,
            photo_model: "realesrgan-x4plus".to_string(),
            illustration_model: "realesrgan-x4plus-anime".to_string(),
            model_2x: "realesrgan-x2plus".to_string(),
            output_format: "jpg".to_string(),
            timeout_secs: 300,
            face_enhance: true,
            face_command: PathBuf::from("codeformer"),
            face_fidelity: 0.7,
            face_timeout_secs: 120,
        }
    }
}

impl FrameConfig {
    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs)
    }
}

impl DetectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EnhanceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn face_timeout(&self) -> Duration {
        Duration::from_secs(self.face_timeout_secs)
    }
}

impl DirectoryConfig {
    pub fn pending_2x(&self) -> PathBuf {
        self.pending.join("2x")
    }

    pub fn pending_4x(&self) -> PathBuf {
        self.pending.join("4x")
    }
}

/// Values given on the command line; `None` means "keep the file/default value"
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub raw_dir: Option<PathBuf>,
    pub frames_dir: Option<PathBuf>,
    pub pending_dir: Option<PathBuf>,
    pub final_dir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub dedup_threshold: Option<u32>,
    pub extraction_mode: Option<ExtractionMode>,
    pub interval_seconds: Option<f64>,
    pub blur_threshold: Option<f64>,
    pub disable_filter: bool,
    pub detector_script: Option<PathBuf>,
    pub min_person_ratio: Option<f64>,
    pub confidence: Option<f32>,
    pub min_no_upscale: Option<u32>,
    pub min_2x: Option<u32>,
    pub on_collision: Option<CollisionPolicy>,
    pub disable_enhance: bool,
    pub enhancer_backend: Option<EnhancerBackend>,
    pub disable_face_enhance: bool,
    pub cleanup: bool,
}

impl CurationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: CurationConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded configuration.
    /// Command-line values take precedence over config file values.
    pub fn merge_with_cli(mut self, cli: &CliOverrides) -> Self {
        if let Some(raw) = &cli.raw_dir {
            self.directories.raw = raw.clone();
        }
        if let Some(frames) = &cli.frames_dir {
            self.directories.frames = frames.clone();
        }
        if let Some(pending) = &cli.pending_dir {
            self.directories.pending = pending.clone();
        }
        if let Some(final_dir) = &cli.final_dir {
            self.directories.final_dataset = final_dir.clone();
        }
        if let Some(jobs) = cli.jobs {
            self.parallel_jobs = jobs;
        }
        if let Some(threshold) = cli.dedup_threshold {
            self.dedup.threshold = threshold;
        }
        if let Some(mode) = cli.extraction_mode {
            self.frames.mode = mode;
        }
        if let Some(interval) = cli.interval_seconds {
            self.frames.interval_seconds = interval;
        }
        if let Some(blur) = cli.blur_threshold {
            self.frames.blur_threshold = blur;
        }
        if cli.disable_filter {
            self.filter.enabled = false;
        }
        if let Some(script) = &cli.detector_script {
            self.filter.detector.script = Some(script.clone());
        }
        if let Some(ratio) = cli.min_person_ratio {
            self.filter.min_person_ratio = ratio;
        }
        if let Some(confidence) = cli.confidence {
            self.filter.confidence = confidence;
        }
        if let Some(min_no_upscale) = cli.min_no_upscale {
            self.routing.min_no_upscale = min_no_upscale;
        }
        if let Some(min_2x) = cli.min_2x {
            self.routing.min_2x = min_2x;
        }
        if let Some(policy) = cli.on_collision {
            self.routing.on_collision = policy;
        }
        if cli.disable_enhance {
            self.enhance.enabled = false;
        }
        if let Some(backend) = cli.enhancer_backend {
            self.enhance.backend = backend;
        }
        if cli.disable_face_enhance {
            self.enhance.face_enhance = false;
        }
        if cli.cleanup {
            self.cleanup_intermediate = true;
        }
        self
    }

    /// Number of frame-extraction workers after resolving `0` to the CPU count
    pub fn effective_jobs(&self) -> usize {
        if self.parallel_jobs == 0 {
            num_cpus::get()
        } else {
            self.parallel_jobs
        }
    }

    /// Reject configurations that would make a stage misbehave
    pub fn validate(&self) -> Result<()> {
        if self.parallel_jobs > 64 {
            return Err(anyhow::anyhow!(
                "Job count too high (max 64), got: {}",
                self.parallel_jobs
            ));
        }
        if self.routing.min_2x > self.routing.min_no_upscale {
            return Err(anyhow::anyhow!(
                "routing.min_2x ({}) must not exceed routing.min_no_upscale ({})",
                self.routing.min_2x,
                self.routing.min_no_upscale
            ));
        }
        if !(0.0..=1.0).contains(&self.filter.min_person_ratio) {
            return Err(anyhow::anyhow!(
                "filter.min_person_ratio must be between 0.0 and 1.0, got: {}",
                self.filter.min_person_ratio
            ));
        }
        if !(0.0..=1.0).contains(&self.filter.confidence) {
            return Err(anyhow::anyhow!(
                "filter.confidence must be between 0.0 and 1.0, got: {}",
                self.filter.confidence
            ));
        }
        if self.frames.mode == ExtractionMode::Interval && !(self.frames.interval_seconds > 0.0) {
            return Err(anyhow::anyhow!(
                "frames.interval_seconds must be positive, got: {}",
                self.frames.interval_seconds
            ));
        }
        if self.frames.blur_threshold < 0.0 {
            return Err(anyhow::anyhow!(
                "frames.blur_threshold must not be negative, got: {}",
                self.frames.blur_threshold
            ));
        }
        if self.frames.decode_timeout_secs == 0
            || self.filter.detector.timeout_secs == 0
            || self.enhance.timeout_secs == 0
            || self.enhance.face_timeout_secs == 0
        {
            return Err(anyhow::anyhow!("Timeouts must be at least one second"));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CurationConfig::default();
        assert_eq!(config.parallel_jobs, 4);
        assert_eq!(config.dedup.threshold, 8);
        assert_eq!(config.frames.mode, ExtractionMode::FirstOnly);
        assert_eq!(config.frames.blur_threshold, 100.0);
        assert!(config.filter.enabled);
        assert_eq!(config.filter.min_person_ratio, 0.05);
        assert_eq!(config.filter.confidence, 0.5);
        assert_eq!(config.routing.min_no_upscale, 2048);
        assert_eq!(config.routing.min_2x, 1024);
        assert_eq!(config.enhance.timeout_secs, 300);
        assert!(!config.cleanup_intermediate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "directories": { "raw": "/data/raw" },
            "frames": { "mode": "interval", "interval_seconds": 1.5 },
            "routing": { "on_collision": "overwrite" }
        }"#;
        let config: CurationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.directories.raw, PathBuf::from("/data/raw"));
        assert_eq!(config.directories.frames, PathBuf::from("./extracted_frames"));
        assert_eq!(config.frames.mode, ExtractionMode::Interval);
        assert_eq!(config.frames.interval_seconds, 1.5);
        assert_eq!(config.frames.blur_threshold, 100.0);
        assert_eq!(config.routing.on_collision, CollisionPolicy::Overwrite);
        assert_eq!(config.routing.min_2x, 1024);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curator.json");
        fs::write(&path, r#"{ "parallel_jobs": 2, "dedup": { "threshold": 5 } }"#).unwrap();

        let config = CurationConfig::load(&path).unwrap();
        assert_eq!(config.parallel_jobs, 2);
        assert_eq!(config.dedup.threshold, 5);

        fs::write(&path, "not json").unwrap();
        assert!(CurationConfig::load(&path).is_err());
    }

    #[test]
    fn test_cli_overrides_take_precedence() {
        let overrides = CliOverrides {
            raw_dir: Some(PathBuf::from("in")),
            jobs: Some(8),
            extraction_mode: Some(ExtractionMode::Interval),
            disable_filter: true,
            min_2x: Some(512),
            cleanup: true,
            ..Default::default()
        };
        let config = CurationConfig::default().merge_with_cli(&overrides);
        assert_eq!(config.directories.raw, PathBuf::from("in"));
        assert_eq!(config.parallel_jobs, 8);
        assert_eq!(config.frames.mode, ExtractionMode::Interval);
        assert!(!config.filter.enabled);
        assert_eq!(config.routing.min_2x, 512);
        assert!(config.cleanup_intermediate);
        // untouched values survive
        assert_eq!(config.dedup.threshold, 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CurationConfig::default();
        config.routing.min_2x = 4096;
        assert!(config.validate().is_err());

        let mut config = CurationConfig::default();
        config.filter.min_person_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = CurationConfig::default();
        config.frames.mode = ExtractionMode::Interval;
        config.frames.interval_seconds = 0.0;
        assert!(config.validate().is_err());

        let mut config = CurationConfig::default();
        config.enhance.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_jobs() {
        let mut config = CurationConfig::default();
        assert_eq!(config.effective_jobs(), 4);
        config.parallel_jobs = 0;
        assert!(config.effective_jobs() >= 1);
    }
}
