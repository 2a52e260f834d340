//! Derived UI state maintained by the session controller.
//!
//! [`ViewState`] is what a front end renders: the feedback line, which
//! controls are enabled, the crop gallery, the trajectory panel and the
//! current result link. It holds no I/O and no session bookkeeping.

use vjts_core::gallery::CropGallery;
use vjts_core::trajectory::TrajectoryPanel;

/// Styling hint for the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    /// Work in progress (a spinner is appropriate).
    Info,
    Success,
    Warning,
    Error,
}

/// The single feedback area: either a status line or raw log content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Status { text: String, kind: StatusKind },
    /// Verbatim payload the client could not interpret.
    Log(String),
}

impl Feedback {
    pub fn text(&self) -> &str {
        match self {
            Feedback::Status { text, .. } | Feedback::Log(text) => text,
        }
    }
}

/// Link to the finished result video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLink {
    /// Server-side path reported in the `result` event.
    pub result_ref: String,
    /// `/download/result?path=...` URL, also usable for playback.
    pub download_url: String,
}

/// Everything a front end needs to draw.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub feedback: Feedback,
    pub run_enabled: bool,
    pub cancel_enabled: bool,
    pub crops: CropGallery,
    pub trajectory: Option<TrajectoryPanel>,
    pub result: Option<ResultLink>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            feedback: Feedback::Status {
                text: "Ready".to_string(),
                kind: StatusKind::Success,
            },
            run_enabled: true,
            cancel_enabled: false,
            crops: CropGallery::new(),
            trajectory: None,
            result: None,
        }
    }
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, text: impl Into<String>, kind: StatusKind) {
        self.feedback = Feedback::Status {
            text: text.into(),
            kind,
        };
    }

    pub fn show_log(&mut self, content: impl Into<String>) {
        self.feedback = Feedback::Log(content.into());
    }

    /// Clear everything a previous run left behind.
    pub fn reset_for_run(&mut self) {
        self.crops.reset();
        self.trajectory = None;
        self.result = None;
    }

    /// Controls while a job is being uploaded or streamed.
    pub fn set_busy(&mut self, cancellable: bool) {
        self.run_enabled = false;
        self.cancel_enabled = cancellable;
    }

    /// Controls once no job is active.
    pub fn set_idle(&mut self) {
        self.run_enabled = true;
        self.cancel_enabled = false;
    }

    /// Clear result link and trajectory panel after a failed run.
    pub fn clear_result(&mut self) {
        self.result = None;
        self.trajectory = None;
    }
}
