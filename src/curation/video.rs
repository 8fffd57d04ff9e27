//! Video decoding seam.
//!
//! The frame extractor only needs a frame rate and a sequential stream of RGB
//! frames. [`FfmpegDecoder`] provides both by decoding in-process with
//! libavformat/libavcodec and converting every frame to RGB24 with swscale.

use ffmpeg_next as ffmpeg;
use image::{imageops, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{CurationError, Result};

/// An opened video, read front to back
pub trait VideoSource {
    /// Frames per second, if the container reports a usable rate
    fn fps(&self) -> Option<f64>;

    /// The next decoded frame, or `None` at end of stream
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

pub trait VideoDecoder: Send + Sync {
    /// Open `path` for decoding. With `first_only` the source may stop after
    /// the first frame.
    fn open(&self, path: &Path, first_only: bool) -> Result<Box<dyn VideoSource>>;
}

/// Initialize FFmpeg once per process
fn init_ffmpeg() -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    INIT.get_or_init(|| {
        ffmpeg::init().map_err(|e| e.to_string())?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
    .clone()
    .map_err(|reason| CurationError::VideoOpen {
        path: PathBuf::new(),
        reason: format!("FFmpeg initialization failed: {}", reason),
    })
}

/// Decoder backed by the FFmpeg libraries
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    /// Decoding budget per video
    timeout: Duration,
}

impl FfmpegDecoder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path, first_only: bool) -> Result<Box<dyn VideoSource>> {
        init_ffmpeg()?;
        let open_error = |reason: String| CurationError::VideoOpen {
            path: path.to_path_buf(),
            reason,
        };

        let input = ffmpeg::format::input(&path).map_err(|e| open_error(e.to_string()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| open_error("no video stream".to_string()))?;
        let stream_index = stream.index();

        let average = stream.avg_frame_rate();
        let fps = frame_rate(average.numerator(), average.denominator()).or_else(|| {
            let base = stream.rate();
            frame_rate(base.numerator(), base.denominator())
        });

        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|e| open_error(format!("failed to create video decoder: {}", e)))?;

        debug!(
            "{}: {}x{} {:?} at {:?} fps",
            path.display(),
            decoder.width(),
            decoder.height(),
            decoder.format(),
            fps
        );

        Ok(Box::new(FfmpegSource {
            path: path.to_path_buf(),
            input,
            decoder,
            stream_index,
            scaler: None,
            fps,
            first_only,
            delivered: 0,
            draining: false,
            deadline: Instant::now() + self.timeout,
            timeout: self.timeout,
        }))
    }
}

/// Scaler cached for one input geometry
struct RgbScaler {
    context: ffmpeg::software::scaling::context::Context,
    format: ffmpeg::format::Pixel,
    width: u32,
    height: u32,
}

struct FfmpegSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    scaler: Option<RgbScaler>,
    fps: Option<f64>,
    first_only: bool,
    delivered: usize,
    draining: bool,
    deadline: Instant,
    timeout: Duration,
}

impl FfmpegSource {
    fn decode_error(&self, reason: impl std::fmt::Display) -> CurationError {
        CurationError::VideoDecode {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Pull decoded frames, feeding packets until one is ready or the stream ends
    fn receive(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
            if self.draining {
                return Ok(None);
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if packet.stream() != self.stream_index {
                        continue;
                    }
                    // A corrupt packet costs one frame, not the video
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        debug!("{}: skipping packet: {}", self.path.display(), e);
                    }
                }
                Err(ffmpeg::Error::Eof) => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| self.decode_error(e))?;
                    self.draining = true;
                }
                Err(e) => return Err(self.decode_error(e)),
            }
        }
    }

    fn to_rgb(&mut self, frame: &ffmpeg::frame::Video) -> Result<RgbImage> {
        let (format, width, height) = (frame.format(), frame.width(), frame.height());
        let stale = !matches!(
            &self.scaler,
            Some(s) if s.format == format && s.width == width && s.height == height
        );
        if stale {
            let context = ffmpeg::software::scaling::context::Context::get(
                format,
                width,
                height,
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                ffmpeg::software::scaling::flag::Flags::BILINEAR,
            )
            .map_err(|e| self.decode_error(format!("failed to create scaler: {}", e)))?;
            self.scaler = Some(RgbScaler {
                context,
                format,
                width,
                height,
            });
        }

        let mut rgb = ffmpeg::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler
                .context
                .run(frame, &mut rgb)
                .map_err(|e| CurationError::VideoDecode {
                    path: self.path.clone(),
                    reason: format!("failed to convert frame: {}", e),
                })?;
        }

        // Geometry comes from the converted frame, never from container metadata
        let image = rgb_from_plane(rgb.width(), rgb.height(), rgb.stride(0), rgb.data(0))
            .ok_or_else(|| self.decode_error("frame buffer shorter than its geometry"))?;

        let rotation = frame
            .side_data(ffmpeg::frame::side_data::Type::DisplayMatrix)
            .and_then(|side| display_rotation(side.data()))
            .unwrap_or(0);
        Ok(apply_rotation(image, rotation))
    }
}

impl VideoSource for FfmpegSource {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.first_only && self.delivered > 0 {
            return Ok(None);
        }
        // Checked between frames; a single slow decode is not interrupted
        if Instant::now() >= self.deadline {
            return Err(CurationError::Timeout {
                command: format!("decoding {}", self.path.display()),
                timeout: self.timeout,
            });
        }

        let Some(frame) = self.receive()? else {
            return Ok(None);
        };
        let image = self.to_rgb(&frame)?;
        self.delivered += 1;
        Ok(Some(image))
    }
}

/// Frames per second from a rational rate, `None` for 0/0 and friends
pub fn frame_rate(numerator: i32, denominator: i32) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    let fps = f64::from(numerator) / f64::from(denominator);
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Copy a packed RGB24 plane into an image, dropping per-row padding.
///
/// `stride` is the byte length of one row in `data`, which FFmpeg pads past
/// `width * 3` for alignment.
pub fn rgb_from_plane(width: u32, height: u32, stride: usize, data: &[u8]) -> Option<RgbImage> {
    let row_len = width as usize * 3;
    if width == 0 || height == 0 || stride < row_len {
        return None;
    }
    let needed = stride * (height as usize - 1) + row_len;
    if data.len() < needed {
        return None;
    }

    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in data.chunks(stride).take(height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }
    RgbImage::from_raw(width, height, pixels)
}

/// Clockwise rotation in degrees (0, 90, 180 or 270) encoded by a display
/// matrix: nine native-endian i32 values, 16.16 fixed point for the first two
/// columns.
pub fn display_rotation(matrix: &[u8]) -> Option<u32> {
    if matrix.len() < 36 {
        return None;
    }
    let value = |i: usize| {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&matrix[i * 4..i * 4 + 4]);
        f64::from(i32::from_ne_bytes(bytes))
    };

    let scale_x = value(0).hypot(value(3));
    let scale_y = value(1).hypot(value(4));
    if scale_x == 0.0 || scale_y == 0.0 {
        return None;
    }
    let degrees = (value(1) / scale_y).atan2(value(0) / scale_x).to_degrees();
    let quarter = ((degrees / 90.0).round() as i64).rem_euclid(4);
    Some(quarter as u32 * 90)
}

fn apply_rotation(image: RgbImage, clockwise: u32) -> RgbImage {
    match clockwise {
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        _ => image,
    }
}
