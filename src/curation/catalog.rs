//! Read-only enumeration of media files in a stage directory.
//!
//! Scans the flat level of a stage root plus exactly one level of per-target
//! subdirectories, matching the `<root>/<target_id>/*` layout produced by
//! acquisition and the flat `<root>/*` layout of intermediate stages.

use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use super::{MediaAsset, MediaKind};
use crate::utils::has_valid_extension;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// All images under `root` (flat level and one level of subdirectories)
pub fn list_images(root: &Path) -> Vec<MediaAsset> {
    scan(root, MediaKind::Image, IMAGE_EXTENSIONS)
}

/// All videos under `root` (flat level and one level of subdirectories)
pub fn list_videos(root: &Path) -> Vec<MediaAsset> {
    scan(root, MediaKind::Video, VIDEO_EXTENSIONS)
}

fn scan(root: &Path, kind: MediaKind, extensions: &[&str]) -> Vec<MediaAsset> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut assets = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() || !has_valid_extension(entry.path(), extensions) {
            continue;
        }

        let target = if entry.depth() == 2 {
            entry
                .path()
                .parent()
                .and_then(|parent| parent.file_name())
                .map(|name| name.to_string_lossy().to_string())
        } else {
            None
        };

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);

        assets.push(MediaAsset {
            path: entry.into_path(),
            kind,
            target,
            size,
        });
    }

    assets
}
