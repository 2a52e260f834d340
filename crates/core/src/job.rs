//! Parameters for a single plate-tracking run.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Server-side directory scanned when no files are uploaded.
pub const DEFAULT_VIDEO_DIR: &str = "data/videos";

/// Server-side directory receiving the result video and segment JSON.
pub const DEFAULT_OUTPUT_DIR: &str = "data/outputs";

/// What to search for and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    /// Plate text to match, e.g. `"51F-123.45"`.
    pub plate: String,
    /// Directory of source videos on the server.
    pub video_dir: String,
    /// Directory the server writes results to.
    pub output_dir: String,
}

impl JobParams {
    /// Params targeting the default server directories.
    pub fn new(plate: impl Into<String>) -> Self {
        Self {
            plate: plate.into(),
            video_dir: DEFAULT_VIDEO_DIR.to_string(),
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
        }
    }

    pub fn with_video_dir(mut self, video_dir: impl Into<String>) -> Self {
        self.video_dir = video_dir.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<String>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Reject params the server could never act on.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut errors = Vec::new();

        if self.plate.trim().is_empty() {
            errors.push("Plate must not be empty");
        }
        if self.video_dir.trim().is_empty() {
            errors.push("Video directory must not be empty");
        }
        if self.output_dir.trim().is_empty() {
            errors.push("Output directory must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(errors.join("; ")))
        }
    }
}
