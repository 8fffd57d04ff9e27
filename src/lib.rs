// Library exports for reuse by GUI and other applications
pub mod cli;
pub mod config_file;
pub mod curation;
pub mod error;
pub mod json_output;
pub mod pipeline;
pub mod report;
pub mod utils;

// Re-export commonly used types
pub use config_file::{CliOverrides, CurationConfig};
pub use curation::{EventSink, PipelineEvent, RunSummary, Stage, StageStatus};
pub use error::{CurationError, Result};
pub use pipeline::{Pipeline, PipelineFailure};
