//! Synthetic media and in-memory collaborators for tests.

use image::{Rgb, RgbImage};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use super::detection::{Detection, DetectorLoader, PersonDetector};
use super::enhance::{EnhanceRequest, Enhancer, FaceRestorer};
use super::video::{VideoDecoder, VideoSource};
use crate::error::{CurationError, Result};

/// Image whose 8×8 average hash is exactly `pattern`.
/// `size` should be a multiple of 8.
pub fn block_image(pattern: u64, size: u32) -> RgbImage {
    let cell = (size / 8).max(1);
    RgbImage::from_fn(size, size, |x, y| {
        let bit = (y / cell).min(7) * 8 + (x / cell).min(7);
        if pattern & (1u64 << bit) != 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Flip the lowest `count` bits
pub fn flip_bits(pattern: u64, count: u32) -> u64 {
    if count >= 64 {
        !pattern
    } else {
        pattern ^ ((1u64 << count) - 1)
    }
}

/// Deterministic, well-spread 64-bit patterns (splitmix64)
pub fn distinct_patterns(count: usize) -> Vec<u64> {
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    (0..count)
        .map(|_| {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        })
        .collect()
}

pub fn checkerboard(width: u32, height: u32, cell: u32) -> RgbImage {
    let cell = cell.max(1);
    RgbImage::from_fn(width, height, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

pub fn flat(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

/// Save an image, creating parent directories; format follows the extension
pub fn write_image(path: &Path, image: &RgbImage) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    image.save(path).unwrap();
}

/// Placeholder file for a video that a fake decoder will serve
pub fn write_dummy(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"not really a video").unwrap();
}

#[derive(Debug, Clone)]
pub struct FakeClip {
    fps: Option<f64>,
    frames: Vec<RgbImage>,
    fail_after: Option<usize>,
}

impl FakeClip {
    pub fn new(fps: Option<f64>, frames: Vec<RgbImage>) -> Self {
        Self {
            fps,
            frames,
            fail_after: None,
        }
    }

    /// Serve `count` frames, then report a decode error
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }
}

/// Decoder serving clips by file name; unknown files fail to open
#[derive(Debug, Clone, Default)]
pub struct FakeDecoder {
    clips: HashMap<String, FakeClip>,
}

impl FakeDecoder {
    pub fn with_clip(mut self, file_name: &str, clip: FakeClip) -> Self {
        self.clips.insert(file_name.to_string(), clip);
        self
    }
}

struct FakeSource {
    path: PathBuf,
    fps: Option<f64>,
    frames: VecDeque<RgbImage>,
    served: usize,
    fail_after: Option<usize>,
}

impl VideoSource for FakeSource {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.fail_after == Some(self.served) {
            return Err(CurationError::VideoDecode {
                path: self.path.clone(),
                reason: "scripted decode failure".to_string(),
            });
        }
        self.served += 1;
        Ok(self.frames.pop_front())
    }
}

impl VideoDecoder for FakeDecoder {
    fn open(&self, path: &Path, first_only: bool) -> Result<Box<dyn VideoSource>> {
        let name = file_name(path);
        let clip = self.clips.get(&name).ok_or_else(|| CurationError::VideoOpen {
            path: path.to_path_buf(),
            reason: "unknown clip".to_string(),
        })?;
        let mut frames: VecDeque<RgbImage> = clip.frames.iter().cloned().collect();
        if first_only {
            frames.truncate(1);
        }
        Ok(Box::new(FakeSource {
            path: path.to_path_buf(),
            fps: clip.fps,
            frames,
            served: 0,
            fail_after: clip.fail_after,
        }))
    }
}

/// Detector answering from a table keyed by file name.
/// Unknown files get no detections.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    responses: HashMap<String, Option<Vec<Detection>>>,
}

impl ScriptedDetector {
    pub fn respond(&mut self, file_name: &str, detections: Vec<Detection>) {
        self.responses.insert(file_name.to_string(), Some(detections));
    }

    pub fn fail(&mut self, file_name: &str) {
        self.responses.insert(file_name.to_string(), None);
    }

    pub fn into_loader(self) -> impl DetectorLoader {
        move || -> Result<Box<dyn PersonDetector>> { Ok(Box::new(self.clone())) }
    }
}

impl PersonDetector for ScriptedDetector {
    fn detect(&mut self, image: &Path) -> Result<Vec<Detection>> {
        match self.responses.get(&file_name(image)) {
            Some(Some(detections)) => Ok(detections.clone()),
            Some(None) => Err(CurationError::Detection {
                path: image.to_path_buf(),
                reason: "scripted failure".to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

/// Detector that sees a full-frame person in every image
pub struct AcceptAll;

impl PersonDetector for AcceptAll {
    fn detect(&mut self, _image: &Path) -> Result<Vec<Detection>> {
        Ok(vec![Detection::person([0.0, 0.0, 1.0e6, 1.0e6], 1.0)])
    }
}

pub fn accept_all_loader() -> impl DetectorLoader {
    || -> Result<Box<dyn PersonDetector>> { Ok(Box::new(AcceptAll)) }
}

pub fn unavailable_loader() -> impl DetectorLoader {
    || -> Result<Box<dyn PersonDetector>> {
        Err(CurationError::DetectorUnavailable(
            "model weights missing".to_string(),
        ))
    }
}

/// Enhancer that copies its input and records every call
#[derive(Debug, Default)]
pub struct FakeEnhancer {
    fail_on: Option<String>,
    calls: RefCell<Vec<(String, u32, String)>>,
}

impl FakeEnhancer {
    pub fn failing_on(file_name: &str) -> Self {
        Self {
            fail_on: Some(file_name.to_string()),
            ..Default::default()
        }
    }

    /// `(input file name, scale, model)` per call, in order
    pub fn calls(&self) -> Vec<(String, u32, String)> {
        self.calls.borrow().clone()
    }
}

impl Enhancer for FakeEnhancer {
    fn name(&self) -> &str {
        "fake"
    }

    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    fn enhance(&self, request: &EnhanceRequest) -> Result<()> {
        let name = file_name(request.input);
        self.calls
            .borrow_mut()
            .push((name.clone(), request.scale, request.model.to_string()));

        if self.fail_on.as_deref() == Some(name.as_str()) {
            return Err(CurationError::CommandFailed {
                command: "fake".to_string(),
                stderr: "scripted failure".to_string(),
            });
        }
        fs::copy(request.input, request.output)
            .map(|_| ())
            .map_err(|e| CurationError::io(request.input, e))
    }
}

pub struct FakeFaces;

impl FaceRestorer for FakeFaces {
    fn restore(&self, _image: &Path) -> Result<()> {
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
