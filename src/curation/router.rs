//! Resolution-based routing into the final dataset or an upscale queue.
//!
//! Sources are copied, never moved or deleted.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::Display;
use tracing::{debug, info, warn};

use super::events::EventSink;
use super::stats::{RunSummary, Stage, StageReport};
use super::{file_stem, MediaAsset};
use crate::config_file::CollisionPolicy;
use crate::error::{CurationError, Result};
use crate::utils::{ensure_dir, files_identical, generate_content_hash, get_file_extension};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    #[strum(serialize = "final")]
    Final,
    #[strum(serialize = "2x")]
    Upscale2x,
    #[strum(serialize = "4x")]
    Upscale4x,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingThresholds {
    /// Shorter side at or above this goes straight to the final dataset
    pub min_no_upscale: u32,
    /// Shorter side at or above this needs a 2x upscale, below it 4x
    pub min_2x: u32,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            min_no_upscale: 2048,
            min_2x: 1024,
        }
    }
}

/// Destination directories for each route
#[derive(Debug, Clone)]
pub struct RouteTargets {
    pub final_dir: PathBuf,
    pub pending_2x: PathBuf,
    pub pending_4x: PathBuf,
}

impl RouteTargets {
    pub fn dir_for(&self, route: Route) -> &Path {
        match route {
            Route::Final => &self.final_dir,
            Route::Upscale2x => &self.pending_2x,
            Route::Upscale4x => &self.pending_4x,
        }
    }
}

pub fn classify(width: u32, height: u32, thresholds: &RoutingThresholds) -> Route {
    let min_dim = width.min(height);
    if min_dim >= thresholds.min_no_upscale {
        Route::Final
    } else if min_dim >= thresholds.min_2x {
        Route::Upscale2x
    } else {
        Route::Upscale4x
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingStats {
    pub processed: usize,
    pub routed_final: usize,
    pub routed_2x: usize,
    pub routed_4x: usize,
    /// Copies written under a disambiguated name
    pub renamed: usize,
    pub unreadable: usize,
    pub copy_failures: usize,
}

impl StageReport for RoutingStats {
    const STAGE: Stage = Stage::Route;

    fn errors(&self) -> usize {
        self.unreadable + self.copy_failures
    }

    fn log_tally(&self) {
        info!(
            "Routing: {} processed, {} final, {} need 2x, {} need 4x, {} renamed, {} errors",
            self.processed,
            self.routed_final,
            self.routed_2x,
            self.routed_4x,
            self.renamed,
            self.errors()
        );
    }

    fn record(&self, summary: &mut RunSummary) {
        summary.routed_final += self.routed_final;
        summary.routed_2x += self.routed_2x;
        summary.routed_4x += self.routed_4x;
        summary.errors += self.errors();
    }
}

/// Classify each image and copy it into the matching destination
pub fn route_images(
    images: &[MediaAsset],
    targets: &RouteTargets,
    thresholds: &RoutingThresholds,
    on_collision: CollisionPolicy,
    events: &EventSink,
) -> Result<RoutingStats> {
    let total = images.len();
    info!("Routing {} images by resolution", total);
    events.stage_started(Stage::Route, total);

    ensure_dir(&targets.final_dir)?;
    ensure_dir(&targets.pending_2x)?;
    ensure_dir(&targets.pending_4x)?;

    let mut stats = RoutingStats::default();
    for (i, image) in images.iter().enumerate() {
        stats.processed += 1;
        events.progress(Stage::Route, i + 1, total);

        let (width, height) = match image::image_dimensions(&image.path) {
            Ok((w, h)) if w > 0 && h > 0 => (w, h),
            Ok(_) => {
                warn!("Cannot route {}: zero-sized image", image.path.display());
                stats.unreadable += 1;
                continue;
            }
            Err(e) => {
                warn!("Cannot route {}: {}", image.path.display(), e);
                stats.unreadable += 1;
                continue;
            }
        };

        let route = classify(width, height, thresholds);
        match copy_into(&image.path, targets.dir_for(route), on_collision) {
            Ok((destination, renamed)) => {
                debug!(
                    "{} ({}x{}) -> {} as {}",
                    image.path.display(),
                    width,
                    height,
                    route,
                    destination.display()
                );
                if renamed {
                    stats.renamed += 1;
                }
                match route {
                    Route::Final => stats.routed_final += 1,
                    Route::Upscale2x => stats.routed_2x += 1,
                    Route::Upscale4x => stats.routed_4x += 1,
                }
            }
            Err(e) => {
                warn!("Failed to copy {}: {}", image.path.display(), e);
                stats.copy_failures += 1;
            }
        }
    }

    stats.log_tally();
    Ok(stats)
}

/// Pick the path in `dir` for a file named `<stem>.<ext>` whose content comes
/// from `source`.
///
/// [`CollisionPolicy::Overwrite`] always takes the plain name. With
/// [`CollisionPolicy::Rename`] the plain name is used when it is free or
/// `holds_same_content` accepts the file already there. Otherwise the name
/// gains the 8-char content hash of `source`, and a counter on top if another
/// file already took that too. Returns the path and whether it was renamed.
pub fn claim_destination(
    source: &Path,
    dir: &Path,
    stem: &str,
    ext: Option<&str>,
    policy: CollisionPolicy,
    holds_same_content: impl Fn(&Path) -> Result<bool>,
) -> Result<(PathBuf, bool)> {
    let named = |suffix: &str| match ext {
        Some(ext) => dir.join(format!("{}{}.{}", stem, suffix, ext)),
        None => dir.join(format!("{}{}", stem, suffix)),
    };

    let plain = named("");
    if policy == CollisionPolicy::Overwrite || !plain.exists() || holds_same_content(&plain)? {
        return Ok((plain, false));
    }

    let hash = generate_content_hash(source)?;
    let mut candidate = named(&format!("_{}", hash));
    let mut counter = 2;
    while candidate.exists() && !holds_same_content(&candidate)? {
        candidate = named(&format!("_{}_{}", hash, counter));
        counter += 1;
    }
    Ok((candidate, true))
}

/// Copy `source` into `dir` under its own name.
///
/// With [`CollisionPolicy::Rename`], an existing destination whose content
/// differs is left alone and the copy becomes `<stem>_<hash8>.<ext>`.
/// Returns the destination and whether it was renamed.
pub fn copy_into(source: &Path, dir: &Path, policy: CollisionPolicy) -> Result<(PathBuf, bool)> {
    if source.file_name().is_none() {
        return Err(CurationError::io(
            source,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        ));
    }
    let extension = get_file_extension(source);
    let (destination, renamed) = claim_destination(
        source,
        dir,
        &file_stem(source),
        extension.as_deref(),
        policy,
        |existing| files_identical(source, existing),
    )?;

    fs::copy(source, &destination).map_err(|e| CurationError::io(source, e))?;
    Ok((destination, renamed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curation::catalog::list_images;
    use crate::curation::test_support::{flat, write_image};

    fn targets(root: &Path) -> RouteTargets {
        RouteTargets {
            final_dir: root.join("final"),
            pending_2x: root.join("pending/2x"),
            pending_4x: root.join("pending/4x"),
        }
    }

    #[test]
    fn test_classification_boundaries() {
        let t = RoutingThresholds::default();
        assert_eq!(classify(2048, 4000, &t), Route::Final);
        assert_eq!(classify(4000, 2047, &t), Route::Upscale2x);
        assert_eq!(classify(1024, 1024, &t), Route::Upscale2x);
        assert_eq!(classify(1023, 3000, &t), Route::Upscale4x);
        assert_eq!(classify(1, 1, &t), Route::Upscale4x);
    }

    #[test]
    fn test_route_copies_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write_image(&src.join("a/big.png"), &flat(64, 80, 1));
        write_image(&src.join("a/mid.png"), &flat(100, 32, 2));
        write_image(&src.join("a/small.png"), &flat(31, 31, 3));
        std::fs::write(src.join("a/broken.jpg"), b"not an image").unwrap();

        let thresholds = RoutingThresholds {
            min_no_upscale: 64,
            min_2x: 32,
        };
        let t = targets(dir.path());
        let images = list_images(&src);
        let stats = route_images(
            &images,
            &t,
            &thresholds,
            CollisionPolicy::Rename,
            &EventSink::disabled(),
        )
        .unwrap();

        assert_eq!(stats.processed, 4);
        assert_eq!(stats.routed_final, 1);
        assert_eq!(stats.routed_2x, 1);
        assert_eq!(stats.routed_4x, 1);
        assert_eq!(stats.unreadable, 1);
        assert_eq!(stats.errors(), 1);

        assert!(t.final_dir.join("big.png").exists());
        assert!(t.pending_2x.join("mid.png").exists());
        assert!(t.pending_4x.join("small.png").exists());
        assert_eq!(list_images(&src).len(), 4);
    }

    #[test]
    fn test_name_collisions_follow_policy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write_image(&src.join("alice/photo.png"), &flat(40, 40, 10));
        write_image(&src.join("bob/photo.png"), &flat(40, 40, 200));
        write_image(&src.join("carol/same.png"), &flat(40, 40, 7));
        write_image(&src.join("dave/same.png"), &flat(40, 40, 7));

        let renaming = targets(&dir.path().join("renaming"));
        let stats = route_images(
            &list_images(&src),
            &renaming,
            &RoutingThresholds::default(),
            CollisionPolicy::Rename,
            &EventSink::disabled(),
        )
        .unwrap();
        assert_eq!(stats.routed_4x, 4);
        assert_eq!(stats.renamed, 1);
        // identical content shares one file, different content gets a second
        assert_eq!(list_images(&renaming.pending_4x).len(), 3);

        let overwriting = targets(&dir.path().join("overwriting"));
        let stats = route_images(
            &list_images(&src),
            &overwriting,
            &RoutingThresholds::default(),
            CollisionPolicy::Overwrite,
            &EventSink::disabled(),
        )
        .unwrap();
        assert_eq!(stats.renamed, 0);
        assert_eq!(list_images(&overwriting.pending_4x).len(), 2);
    }

    #[test]
    fn test_renamed_copy_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a/shot.png");
        let b = dir.path().join("b/shot.png");
        write_image(&a, &flat(8, 8, 0));
        write_image(&b, &flat(8, 8, 255));
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let (first, renamed) = copy_into(&a, &out, CollisionPolicy::Rename).unwrap();
        assert!(!renamed);
        assert_eq!(first, out.join("shot.png"));

        let (second, renamed) = copy_into(&b, &out, CollisionPolicy::Rename).unwrap();
        assert!(renamed);
        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("shot_") && name.ends_with(".png"));
        assert_eq!(name.len(), "shot_".len() + 8 + ".png".len());
    }

    #[test]
    fn test_rename_never_replaces_an_existing_hashed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in/shot.png");
        write_image(&source, &flat(8, 8, 40));
        let out = dir.path().join("out");
        write_image(&out.join("shot.png"), &flat(8, 8, 0));
        let hash = generate_content_hash(&source).unwrap();
        let occupied = out.join(format!("shot_{}.png", hash));
        std::fs::write(&occupied, b"unrelated bytes").unwrap();

        let (copied, renamed) = copy_into(&source, &out, CollisionPolicy::Rename).unwrap();
        assert!(renamed);
        assert_eq!(copied, out.join(format!("shot_{}_2.png", hash)));
        assert_eq!(std::fs::read(&occupied).unwrap(), b"unrelated bytes");
        assert!(files_identical(&source, &copied).unwrap());

        // the same content again reuses its hashed copy
        std::fs::remove_file(&occupied).unwrap();
        let (again, _) = copy_into(&source, &out, CollisionPolicy::Rename).unwrap();
        assert_eq!(again, out.join(format!("shot_{}.png", hash)));
    }
}
