//! Curation stages and the types they share.
//!
//! Every stage reads from and writes to plain directories. Directory
//! membership is the pipeline state; nothing else is persisted between runs.

pub mod catalog;
pub mod dedup;
pub mod detection;
pub mod enhance;
pub mod events;
pub mod filter;
pub mod fingerprint;
pub mod frames;
pub mod router;
pub mod sharpness;
pub mod stats;
pub mod style_hint;
pub mod video;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::{Path, PathBuf};

use crate::utils::sanitize_filename_component;

pub use catalog::{list_images, list_videos, IMAGE_EXTENSIONS, VIDEO_EXTENSIONS};
pub use dedup::{deduplicate, DedupStats};
pub use detection::{Detection, DetectorLoader, PersonDetector, ScriptDetector};
pub use enhance::{
    enhance_pending, CodeFormer, EnhanceRequest, EnhanceStats, Enhancer, FaceRestorer,
    LanczosEnhancer, RealEsrgan,
};
pub use events::{EventSink, PipelineEvent};
pub use filter::{filter_images, FilterDecision, FilterPolicy, FilterStats};
pub use fingerprint::Fingerprint;
pub use frames::{extract_frames, ExtractionFailure, ExtractionSettings, ExtractionStats};
pub use router::{classify, route_images, Route, RoutingStats, RoutingThresholds};
pub use stats::{RunSummary, Stage, StageReport, StageStatus};
pub use style_hint::{analyze_style, StyleHint};
pub use video::{FfmpegDecoder, VideoDecoder, VideoSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

/// One image or video file inside a stage directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    /// Per-target subdirectory the file was found in, `None` for the flat level
    pub target: Option<String>,
    /// Size in bytes at scan time
    pub size: u64,
}

impl MediaAsset {
    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }

    /// Filename prefix for anything derived from this asset: `<target>_<stem>`,
    /// or just `<stem>` for files at the flat level
    pub fn output_prefix(&self) -> String {
        let stem = sanitize_filename_component(&self.stem());
        match &self.target {
            Some(target) => format!("{}_{}", sanitize_filename_component(target), stem),
            None => stem,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_prefix() {
        let asset = MediaAsset {
            path: PathBuf::from("raw/alice/clip 01.mp4"),
            kind: MediaKind::Video,
            target: Some("alice".to_string()),
            size: 10,
        };
        assert_eq!(asset.output_prefix(), "alice_clip 01");
        assert_eq!(asset.file_name(), "clip 01.mp4");

        let flat = MediaAsset {
            target: None,
            ..asset
        };
        assert_eq!(flat.output_prefix(), "clip 01");
    }
}
