use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{CurationError, Result};

/// How often a running external command is polled for completion
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Create a styled progress bar
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Format duration in a human-readable way
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 3600 {
        let hours = total_secs / 3600;
        let mins = (total_secs % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else if total_secs >= 60 {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        format!("{}m {}s", mins, secs)
    } else if total_secs > 0 {
        format!("{}.{:03}s", total_secs, millis)
    } else {
        format!("{}ms", duration.as_millis())
    }
}

/// Get file extension in lowercase
pub fn get_file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Check if a file has one of the specified extensions (case-insensitive)
pub fn has_valid_extension(path: &Path, extensions: &[&str]) -> bool {
    match get_file_extension(path) {
        Some(ext) => extensions.contains(&ext.as_str()),
        None => false,
    }
}

/// Make a string safe to embed in a filename.
///
/// Path separators, reserved characters and control characters become `_`,
/// runs of `_` collapse to one, and leading/trailing `_` are trimmed.
pub fn sanitize_filename_component(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut prev_was_underscore = false;

    for ch in name.chars() {
        let ch = match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        if ch == '_' {
            if !prev_was_underscore {
                result.push(ch);
            }
            prev_was_underscore = true;
        } else {
            result.push(ch);
            prev_was_underscore = false;
        }
    }

    let trimmed = result.trim_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Generate an 8-character hash from file content.
///
/// Streams the whole file through SHA-256, so files that share a name, size
/// and header still get different suffixes.
pub fn generate_content_hash(file_path: &Path) -> Result<String> {
    let mut file = File::open(file_path).map_err(|e| CurationError::io(file_path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| CurationError::io(file_path, e))?;

    let hex_hash = format!("{:x}", hasher.finalize());
    Ok(hex_hash[..8].to_string())
}

/// Whether two files have the same length and bytes
pub fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = std::fs::metadata(a).map_err(|e| CurationError::io(a, e))?;
    let meta_b = std::fs::metadata(b).map_err(|e| CurationError::io(b, e))?;
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    let bytes_a = std::fs::read(a).map_err(|e| CurationError::io(a, e))?;
    let bytes_b = std::fs::read(b).map_err(|e| CurationError::io(b, e))?;
    Ok(bytes_a == bytes_b)
}

/// Create a directory (and parents), mapping failures to a path-aware error
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| CurationError::io(path, e))
}

/// Write an RGB image as a JPEG at the given quality (1-100)
pub fn save_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let file = File::create(path).map_err(|e| CurationError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode_image(image)
        .map_err(|source| CurationError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    writer.flush().map_err(|e| CurationError::io(path, e))
}

/// Human-readable program name of a command, for logs and errors
pub fn describe_command(command: &Command) -> String {
    Path::new(command.get_program())
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| command.get_program().to_string_lossy().to_string())
}

/// Check whether an executable can be started at all
pub fn is_command_available(program: &Path, version_arg: &str) -> bool {
    Command::new(program)
        .arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Run an external command to completion, killing it once `timeout` elapses.
///
/// Stdout and stderr are drained on helper threads so a chatty child can never
/// block on a full pipe. A non-zero exit status is returned as-is in the
/// `Output`; only spawn failures and timeouts are errors.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<Output> {
    let label = describe_command(command);

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CurationError::CommandFailed {
            command: label.clone(),
            stderr: e.to_string(),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || drain_pipe(stdout));
    let stderr_reader = thread::spawn(move || drain_pipe(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CurationError::Timeout {
                    command: label,
                    timeout,
                });
            }
            Ok(None) => thread::sleep(COMMAND_POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(CurationError::CommandFailed {
                    command: label,
                    stderr: e.to_string(),
                });
            }
        }
    };

    Ok(Output {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

fn drain_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_secs(1)), "1.000s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h 2m");
    }

    #[test]
    fn test_has_valid_extension_is_case_insensitive() {
        let exts = ["jpg", "png"];
        assert!(has_valid_extension(&PathBuf::from("a/b/photo.JPG"), &exts));
        assert!(has_valid_extension(&PathBuf::from("photo.png"), &exts));
        assert!(!has_valid_extension(&PathBuf::from("clip.mp4"), &exts));
        assert!(!has_valid_extension(&PathBuf::from("README"), &exts));
    }

    #[test]
    fn test_sanitize_filename_component() {
        assert_eq!(sanitize_filename_component("alice"), "alice");
        assert_eq!(sanitize_filename_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_filename_component("__x::y__"), "x_y");
        assert_eq!(sanitize_filename_component("tab\there"), "tab_here");
        assert_eq!(sanitize_filename_component("///"), "unnamed");
        assert_eq!(sanitize_filename_component("café"), "café");
    }

    #[test]
    fn test_content_hash_distinguishes_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let c = dir.path().join("c.bin");
        std::fs::write(&a, b"first").unwrap();
        std::fs::write(&b, b"second").unwrap();
        std::fs::write(&c, b"first").unwrap();

        let hash_a = generate_content_hash(&a).unwrap();
        assert_eq!(hash_a.len(), 8);
        assert_ne!(hash_a, generate_content_hash(&b).unwrap());
        assert_eq!(hash_a, generate_content_hash(&c).unwrap());

        assert!(files_identical(&a, &c).unwrap());
        assert!(!files_identical(&a, &b).unwrap());
    }

    #[test]
    fn test_content_hash_covers_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut head = vec![7u8; 64 * 1024];
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        std::fs::write(&a, &head).unwrap();
        *head.last_mut().unwrap() = 8;
        std::fs::write(&b, &head).unwrap();

        assert_ne!(
            generate_content_hash(&a).unwrap(),
            generate_content_hash(&b).unwrap()
        );
    }

    #[test]
    fn test_save_jpeg_round_trips_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        save_jpeg(&RgbImage::new(40, 30), &path, 95).unwrap();
        assert_eq!(image::image_dimensions(&path).unwrap(), (40, 30));

        let missing_dir = dir.path().join("missing/frame.jpg");
        assert!(matches!(
            save_jpeg(&RgbImage::new(4, 4), &missing_dir, 95),
            Err(CurationError::Io { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_captures_output() {
        let output = run_with_timeout(
            Command::new("sh").arg("-c").arg("echo hello; echo oops 1>&2"),
            Duration::from_secs(10),
        )
        .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_timeout_kills_slow_command() {
        let started = Instant::now();
        let result = run_with_timeout(
            Command::new("sh").arg("-c").arg("sleep 5"),
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(CurationError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program_is_command_failure() {
        let result = run_with_timeout(
            &mut Command::new("definitely-not-a-real-program-xyz"),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(CurationError::CommandFailed { .. })));
    }
}
