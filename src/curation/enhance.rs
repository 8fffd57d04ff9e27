//! Enhancement of the upscale queues into the final dataset.
//!
//! The 4x queue is processed before the 2x queue. Every queued image ends up
//! in the final directory: as an upscaled `<stem>_upscaled.<fmt>` when the
//! enhancer succeeds, or as an unmodified copy when it does not. Name clashes
//! in the final directory follow the configured collision policy.

use image::imageops::{self, FilterType};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::catalog::list_images;
use super::events::EventSink;
use super::router::{claim_destination, copy_into};
use super::stats::{RunSummary, Stage, StageReport};
use super::style_hint::analyze_style;
use super::{file_stem, MediaAsset};
use crate::config_file::{CollisionPolicy, EnhanceConfig};
use crate::error::{CurationError, Result};
use crate::utils::{ensure_dir, files_identical, get_file_extension, is_command_available, run_with_timeout, save_jpeg};

pub const REALESRGAN_EXECUTABLE: &str = "realesrgan-ncnn-vulkan";

/// One enhancement call
#[derive(Debug, Clone, Copy)]
pub struct EnhanceRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub scale: u32,
    pub model: &'a str,
}

pub trait Enhancer {
    fn name(&self) -> &str;

    /// Whether the backend can run at all on this machine
    fn check_available(&self) -> Result<()>;

    /// Write an enhanced version of `request.input` to `request.output`
    fn enhance(&self, request: &EnhanceRequest) -> Result<()>;
}

pub trait FaceRestorer {
    /// Restore faces in `image`, replacing it in place
    fn restore(&self, image: &Path) -> Result<()>;
}

/// Model names and output settings for the stage
#[derive(Debug, Clone)]
pub struct EnhanceSettings {
    pub photo_model: String,
    pub illustration_model: String,
    pub model_2x: String,
    pub output_format: String,
    pub on_collision: CollisionPolicy,
}

impl EnhanceSettings {
    pub fn from_config(config: &EnhanceConfig, on_collision: CollisionPolicy) -> Self {
        Self {
            photo_model: config.photo_model.clone(),
            illustration_model: config.illustration_model.clone(),
            model_2x: config.model_2x.clone(),
            output_format: config.output_format.clone(),
            on_collision,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnhanceStats {
    pub queued: usize,
    pub upscaled: usize,
    pub faces_enhanced: usize,
    /// Originals copied to the final dataset instead of an upscaled version
    pub fallback_copies: usize,
    pub failures: usize,
    pub copy_failures: usize,
    pub enhancer_unavailable: bool,
}

impl StageReport for EnhanceStats {
    const STAGE: Stage = Stage::Enhance;

    fn errors(&self) -> usize {
        self.failures + self.copy_failures
    }

    fn log_tally(&self) {
        info!(
            "Enhancement: {} queued, {} upscaled, {} faces enhanced, {} copied unenhanced, {} errors",
            self.queued,
            self.upscaled,
            self.faces_enhanced,
            self.fallback_copies,
            self.errors()
        );
    }

    fn record(&self, summary: &mut RunSummary) {
        summary.upscaled += self.upscaled;
        summary.faces_enhanced += self.faces_enhanced;
        summary.fallback_copies += self.fallback_copies;
        summary.errors += self.errors();
    }
}

/// Enhance everything in the 4x and 2x queues into `final_dir`
pub fn enhance_pending(
    pending_4x: &Path,
    pending_2x: &Path,
    final_dir: &Path,
    enhancer: &dyn Enhancer,
    faces: Option<&dyn FaceRestorer>,
    settings: &EnhanceSettings,
    events: &EventSink,
) -> Result<EnhanceStats> {
    let queue: Vec<(MediaAsset, u32)> = list_images(pending_4x)
        .into_iter()
        .map(|asset| (asset, 4))
        .chain(list_images(pending_2x).into_iter().map(|asset| (asset, 2)))
        .collect();

    let total = queue.len();
    let mut stats = EnhanceStats {
        queued: total,
        ..Default::default()
    };
    events.stage_started(Stage::Enhance, total);
    ensure_dir(final_dir)?;

    if let Err(e) = enhancer.check_available() {
        warn!("{}; copying {} originals to the final dataset", e, total);
        stats.enhancer_unavailable = true;
        for (i, (asset, _)) in queue.iter().enumerate() {
            fallback_copy(&asset.path, final_dir, settings.on_collision, &mut stats);
            events.progress(Stage::Enhance, i + 1, total);
        }
        stats.log_tally();
        return Ok(stats);
    }

    info!("Enhancing {} images with {}", total, enhancer.name());
    for (i, (asset, scale)) in queue.iter().enumerate() {
        match enhance_one(&asset.path, *scale, final_dir, enhancer, faces, settings) {
            Ok(face_restored) => {
                stats.upscaled += 1;
                if face_restored {
                    stats.faces_enhanced += 1;
                }
            }
            Err(e) => {
                warn!("Enhancement failed, copying original {}: {}", asset.path.display(), e);
                stats.failures += 1;
                fallback_copy(&asset.path, final_dir, settings.on_collision, &mut stats);
            }
        }
        events.progress(Stage::Enhance, i + 1, total);
    }

    stats.log_tally();
    Ok(stats)
}

/// Model for a queued image: the 2x queue always uses the 2x model, the 4x
/// queue picks by style
pub fn choose_model<'a>(scale: u32, is_illustration: bool, settings: &'a EnhanceSettings) -> &'a str {
    if scale == 2 {
        &settings.model_2x
    } else if is_illustration {
        &settings.illustration_model
    } else {
        &settings.photo_model
    }
}

fn enhance_one(
    input: &Path,
    scale: u32,
    final_dir: &Path,
    enhancer: &dyn Enhancer,
    faces: Option<&dyn FaceRestorer>,
    settings: &EnhanceSettings,
) -> Result<bool> {
    let is_illustration = if scale == 2 {
        false
    } else {
        let image = image::open(input).map_err(|source| CurationError::Decode {
            path: input.to_path_buf(),
            source,
        })?;
        analyze_style(&image.to_rgb8()).is_illustration
    };
    let model = choose_model(scale, is_illustration, settings);

    let stem = format!("{}_upscaled", file_stem(input));
    let staged = final_dir.join(format!(".{}.partial.{}", stem, settings.output_format));
    debug!("{}: {}x with {}", input.display(), scale, model);

    let restored = match render_upscale(input, &staged, scale, model, enhancer, faces) {
        Ok(restored) => restored,
        Err(e) => {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
    };

    // naming follows the upscaled bytes so an unchanged re-run lands on the same file
    let (output, renamed) = claim_destination(
        &staged,
        final_dir,
        &stem,
        Some(settings.output_format.as_str()),
        settings.on_collision,
        |existing| files_identical(&staged, existing),
    )?;
    if renamed {
        debug!("{} is taken by another image, using {}", stem, output.display());
    }
    fs::rename(&staged, &output).map_err(|e| CurationError::io(&output, e))?;
    Ok(restored)
}

/// Run the enhancer (and face restoration, when present) into `output`.
/// Returns whether faces were restored.
fn render_upscale(
    input: &Path,
    output: &Path,
    scale: u32,
    model: &str,
    enhancer: &dyn Enhancer,
    faces: Option<&dyn FaceRestorer>,
) -> Result<bool> {
    enhancer.enhance(&EnhanceRequest {
        input,
        output,
        scale,
        model,
    })?;

    if !output.is_file() {
        return Err(CurationError::CommandFailed {
            command: enhancer.name().to_string(),
            stderr: format!("no output written to {}", output.display()),
        });
    }

    let Some(restorer) = faces else {
        return Ok(false);
    };
    match restorer.restore(output) {
        Ok(()) => Ok(true),
        Err(e) => {
            debug!("Face restoration skipped for {}: {}", output.display(), e);
            Ok(false)
        }
    }
}

fn fallback_copy(source: &Path, final_dir: &Path, policy: CollisionPolicy, stats: &mut EnhanceStats) {
    match copy_into(source, final_dir, policy) {
        Ok(_) => stats.fallback_copies += 1,
        Err(e) => {
            warn!("Failed to copy {} to the final dataset: {}", source.display(), e);
            stats.copy_failures += 1;
        }
    }
}

/// Real-ESRGAN (ncnn/Vulkan build) run as an external executable
#[derive(Debug, Clone)]
pub struct RealEsrgan {
    executable: Option<PathBuf>,
    output_format: String,
    timeout: Duration,
}

impl RealEsrgan {
    /// Resolve the executable from the configured path, well-known install
    /// locations, then `PATH`
    pub fn locate(configured: Option<&Path>, output_format: &str, timeout: Duration) -> Self {
        let executable = configured
            .filter(|path| path.is_file())
            .map(Path::to_path_buf)
            .or_else(|| well_known_locations().into_iter().find(|path| path.is_file()))
            .or_else(|| find_on_path(REALESRGAN_EXECUTABLE));

        match &executable {
            Some(path) => info!("Found Real-ESRGAN at: {}", path.display()),
            None => debug!("Real-ESRGAN executable not found"),
        }

        Self {
            executable,
            output_format: output_format.to_string(),
            timeout,
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    fn require_executable(&self) -> Result<&Path> {
        self.executable.as_deref().ok_or_else(|| {
            CurationError::EnhancerUnavailable(format!(
                "{} not found (set enhance.realesrgan_path or install it on PATH)",
                REALESRGAN_EXECUTABLE
            ))
        })
    }
}

fn well_known_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = env::var_os("HOME").map(PathBuf::from) {
        locations.push(home.join("ai-pipeline/Real-ESRGAN").join(REALESRGAN_EXECUTABLE));
        locations.push(home.join("Real-ESRGAN").join(REALESRGAN_EXECUTABLE));
    }
    locations.push(PathBuf::from("/usr/local/bin").join(REALESRGAN_EXECUTABLE));
    locations.push(PathBuf::from("/usr/bin").join(REALESRGAN_EXECUTABLE));
    locations.push(PathBuf::from("/opt/realesrgan-ncnn-vulkan").join(REALESRGAN_EXECUTABLE));
    locations
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

impl Enhancer for RealEsrgan {
    fn name(&self) -> &str {
        "Real-ESRGAN"
    }

    fn check_available(&self) -> Result<()> {
        self.require_executable().map(|_| ())
    }

    fn enhance(&self, request: &EnhanceRequest) -> Result<()> {
        let executable = self.require_executable()?;

        let mut command = Command::new(executable);
        command
            .arg("-i")
            .arg(request.input)
            .arg("-o")
            .arg(request.output)
            .arg("-n")
            .arg(request.model)
            .arg("-s")
            .arg(request.scale.to_string())
            .arg("-f")
            .arg(&self.output_format);

        if let Some(models) = executable.parent().map(|dir| dir.join("models")) {
            if models.is_dir() {
                command.arg("-m").arg(models);
            }
        }

        let output = run_with_timeout(&mut command, self.timeout)?;
        if !output.status.success() {
            return Err(CurationError::CommandFailed {
                command: self.name().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Pure-Rust fallback: Lanczos3 resize followed by an unsharp mask
#[derive(Debug, Clone)]
pub struct LanczosEnhancer {
    quality: u8,
}

impl LanczosEnhancer {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for LanczosEnhancer {
    fn default() -> Self {
        Self::new(95)
    }
}

impl Enhancer for LanczosEnhancer {
    fn name(&self) -> &str {
        "Lanczos"
    }

    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    fn enhance(&self, request: &EnhanceRequest) -> Result<()> {
        let image = image::open(request.input)
            .map_err(|source| CurationError::Decode {
                path: request.input.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let scale = request.scale.max(1);
        let resized = imageops::resize(
            &image,
            image.width() * scale,
            image.height() * scale,
            FilterType::Lanczos3,
        );

        // stronger sharpening for the larger upscale
        let sigma = if scale >= 4 { 2.0 } else { 1.5 };
        let sharpened = imageops::unsharpen(&resized, sigma, 3);

        match get_file_extension(request.output).as_deref() {
            Some("jpg") | Some("jpeg") => save_jpeg(&sharpened, request.output, self.quality),
            _ => sharpened
                .save(request.output)
                .map_err(|source| CurationError::Encode {
                    path: request.output.to_path_buf(),
                    source,
                }),
        }
    }
}

/// CodeFormer face restoration run as an external command
#[derive(Debug, Clone)]
pub struct CodeFormer {
    command: PathBuf,
    fidelity: f32,
    timeout: Duration,
}

impl CodeFormer {
    /// `None` when the command cannot be started
    pub fn locate(command: &Path, fidelity: f32, timeout: Duration) -> Option<Self> {
        if !is_command_available(command, "--help") {
            debug!("Face restoration unavailable: {} not found", command.display());
            return None;
        }
        Some(Self {
            command: command.to_path_buf(),
            fidelity,
            timeout,
        })
    }
}

impl FaceRestorer for CodeFormer {
    fn restore(&self, image: &Path) -> Result<()> {
        let parent = image.parent().unwrap_or_else(|| Path::new("."));
        let scratch = parent.join(".face_restore");
        ensure_dir(&scratch)?;

        let result = run_with_timeout(
            Command::new(&self.command)
                .arg("-i")
                .arg(image)
                .arg("-o")
                .arg(&scratch)
                .arg("-w")
                .arg(self.fidelity.to_string())
                .arg("--face_upsample"),
            self.timeout,
        )
        .and_then(|output| {
            if !output.status.success() {
                return Err(CurationError::CommandFailed {
                    command: "codeformer".to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            let restored = image
                .file_name()
                .map(|name| scratch.join(name))
                .filter(|path| path.is_file())
                .ok_or_else(|| CurationError::CommandFailed {
                    command: "codeformer".to_string(),
                    stderr: "no restored image produced".to_string(),
                })?;
            fs::rename(&restored, image).map_err(|e| CurationError::io(image, e))
        });

        let _ = fs::remove_dir_all(&scratch);
        result
    }
}
