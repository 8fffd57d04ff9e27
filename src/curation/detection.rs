//! Person detection seam.
//!
//! The content filter talks to a [`PersonDetector`] obtained from a
//! [`DetectorLoader`]. Loading is separate from detecting so that a missing
//! model aborts the filter stage before any image is touched.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::debug;

use crate::config_file::DetectorConfig;
use crate::error::{CurationError, Result};
use crate::utils::{is_command_available, run_with_timeout};

pub const PERSON_CLASS: &str = "person";

/// One detected object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x_min, y_min, x_max, y_max]` in pixels
    #[serde(rename = "box")]
    pub bounding_box: [f64; 4],
    pub confidence: f32,
    pub class: String,
    #[serde(default)]
    pub class_id: i32,
}

impl Detection {
    pub fn person(bounding_box: [f64; 4], confidence: f32) -> Self {
        Self {
            bounding_box,
            confidence,
            class: PERSON_CLASS.to_string(),
            class_id: 0,
        }
    }

    pub fn is_person(&self) -> bool {
        self.class == PERSON_CLASS
    }

    /// Box area in square pixels; inverted boxes have zero area
    pub fn area(&self) -> f64 {
        let [x_min, y_min, x_max, y_max] = self.bounding_box;
        (x_max - x_min).max(0.0) * (y_max - y_min).max(0.0)
    }
}

pub trait PersonDetector {
    /// All detections for one image. Errors are per-image.
    fn detect(&mut self, image: &Path) -> Result<Vec<Detection>>;
}

pub trait DetectorLoader {
    /// Initialise the detector; failure means the filter cannot run at all
    fn load(&self) -> Result<Box<dyn PersonDetector>>;
}

impl<F> DetectorLoader for F
where
    F: Fn() -> Result<Box<dyn PersonDetector>>,
{
    fn load(&self) -> Result<Box<dyn PersonDetector>> {
        self()
    }
}

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    detections: Vec<Detection>,
    #[serde(default)]
    error: Option<String>,
}

/// Detector that runs an external detection script once per image.
///
/// The script is invoked as
/// `<interpreter> <script> --image <path> --model <model> --conf <c> --output-format json`
/// and must print `{"detections": [...], "error": null}` on stdout.
#[derive(Debug, Clone)]
pub struct ScriptDetector {
    interpreter: PathBuf,
    script: PathBuf,
    model: String,
    confidence: f32,
    timeout: Duration,
}

impl ScriptDetector {
    pub fn load(config: &DetectorConfig, confidence: f32) -> Result<Self> {
        let script = config.script.clone().ok_or_else(|| {
            CurationError::DetectorUnavailable("no detector script configured".to_string())
        })?;

        if !script.is_file() {
            return Err(CurationError::DetectorUnavailable(format!(
                "detector script not found: {}",
                script.display()
            )));
        }

        if !is_command_available(&config.interpreter, "--version") {
            return Err(CurationError::DetectorUnavailable(format!(
                "interpreter cannot be started: {}",
                config.interpreter.display()
            )));
        }

        Ok(Self {
            interpreter: config.interpreter.clone(),
            script,
            model: config.model.clone(),
            confidence,
            timeout: config.timeout(),
        })
    }
}

impl PersonDetector for ScriptDetector {
    fn detect(&mut self, image: &Path) -> Result<Vec<Detection>> {
        let output = run_with_timeout(
            Command::new(&self.interpreter)
                .arg(&self.script)
                .arg("--image")
                .arg(image)
                .arg("--model")
                .arg(&self.model)
                .arg("--conf")
                .arg(self.confidence.to_string())
                .arg("--output-format")
                .arg("json"),
            self.timeout,
        )?;

        if !output.status.success() {
            return Err(CurationError::Detection {
                path: image.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: ScriptOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| CurationError::Detection {
                path: image.to_path_buf(),
                reason: format!(
                    "unparseable detector output: {} | raw output: {}",
                    e,
                    String::from_utf8_lossy(&output.stdout).trim()
                ),
            })?;

        if let Some(error) = parsed.error {
            return Err(CurationError::Detection {
                path: image.to_path_buf(),
                reason: error,
            });
        }

        debug!(
            "{}: {} detections",
            image.display(),
            parsed.detections.len()
        );
        Ok(parsed.detections)
    }
}

/// Loads a [`ScriptDetector`] from configuration
#[derive(Debug, Clone)]
pub struct ScriptDetectorLoader {
    config: DetectorConfig,
    confidence: f32,
}

impl ScriptDetectorLoader {
    pub fn new(config: DetectorConfig, confidence: f32) -> Self {
        Self { config, confidence }
    }
}

impl DetectorLoader for ScriptDetectorLoader {
    fn load(&self) -> Result<Box<dyn PersonDetector>> {
        Ok(Box::new(ScriptDetector::load(&self.config, self.confidence)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_detection_area() {
        let d = Detection::person([10.0, 20.0, 30.0, 70.0], 0.9);
        assert_eq!(d.area(), 1000.0);
        assert!(d.is_person());

        let inverted = Detection::person([30.0, 20.0, 10.0, 70.0], 0.9);
        assert_eq!(inverted.area(), 0.0);
    }

    #[test]
    fn test_parse_script_output() {
        let json = r#"{
            "detections": [
                {"box": [0, 0, 50, 100], "confidence": 0.91, "class": "person", "class_id": 0},
                {"box": [5.5, 5.5, 10.0, 10.0], "confidence": 0.4, "class": "dog", "class_id": 16}
            ],
            "error": null
        }"#;
        let parsed: ScriptOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.detections.len(), 2);
        assert_eq!(parsed.detections[0].bounding_box, [0.0, 0.0, 50.0, 100.0]);
        assert_eq!(parsed.detections[1].class, "dog");
        assert!(parsed.error.is_none());
    }

    #[test]
    fn test_load_without_script_is_unavailable() {
        let config = DetectorConfig::default();
        assert!(matches!(
            ScriptDetector::load(&config, 0.5),
            Err(CurationError::DetectorUnavailable(_))
        ));

        let config = DetectorConfig {
            script: Some(PathBuf::from("/definitely/missing/detect.py")),
            ..Default::default()
        };
        assert!(matches!(
            ScriptDetectorLoader::new(config, 0.5).load(),
            Err(CurationError::DetectorUnavailable(_))
        ));
    }

    #[test]
    fn test_closure_loader() {
        struct Nobody;
        impl PersonDetector for Nobody {
            fn detect(&mut self, _image: &Path) -> Result<Vec<Detection>> {
                Ok(Vec::new())
            }
        }

        let loader = || -> Result<Box<dyn PersonDetector>> { Ok(Box::new(Nobody)) };
        let mut detector = loader.load().unwrap();
        assert!(detector.detect(Path::new("x.jpg")).unwrap().is_empty());
    }

    #[cfg(unix)]
    fn shell_detector(dir: &Path, body: &str) -> ScriptDetector {
        let script = dir.join("detect.sh");
        fs::write(&script, body).unwrap();
        let config = DetectorConfig {
            interpreter: PathBuf::from("sh"),
            script: Some(script),
            timeout_secs: 10,
            ..Default::default()
        };
        ScriptDetector::load(&config, 0.5).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_script_detector_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut detector = shell_detector(
            dir.path(),
            r#"echo '{"detections":[{"box":[1,2,3,4],"confidence":0.8,"class":"person","class_id":0}],"error":null}'"#,
        );
        let detections = detector.detect(&dir.path().join("img.jpg")).unwrap();
        assert_eq!(detections, vec![Detection::person([1.0, 2.0, 3.0, 4.0], 0.8)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_script_errors_are_detection_failures() {
        let dir = tempfile::tempdir().unwrap();

        let mut reported = shell_detector(
            dir.path(),
            r#"echo '{"detections":[],"error":"model exploded"}'"#,
        );
        let err = reported.detect(Path::new("img.jpg")).unwrap_err();
        assert!(err.to_string().contains("model exploded"));
        assert!(err.is_transient());

        let mut crashed = shell_detector(dir.path(), "echo boom >&2; exit 3");
        assert!(matches!(
            crashed.detect(Path::new("img.jpg")),
            Err(CurationError::Detection { .. })
        ));

        let mut garbled = shell_detector(dir.path(), "echo not-json");
        assert!(matches!(
            garbled.detect(Path::new("img.jpg")),
            Err(CurationError::Detection { .. })
        ));
    }
}
