//! Typed events decoded from the job event stream.
//!
//! The server multiplexes several slots over one SSE stream: the default
//! `message` slot carries JSON objects tagged by `"type"`, while `job_id`,
//! `crop`, `cancelled` and `result` are named events. [`decode`] turns an
//! [`SseFrame`] into a [`ProgressEvent`]; anything it cannot interpret
//! becomes [`ProgressEvent::Malformed`] or [`ProgressEvent::Unrecognized`]
//! rather than an error.

use serde::Deserialize;
use vjts_core::trajectory::Segment;

use crate::sse::{SseFrame, DEFAULT_EVENT};

/// SSE event names used by the server.
pub const EVENT_JOB_ID: &str = "job_id";
pub const EVENT_CROP: &str = "crop";
pub const EVENT_CANCELLED: &str = "cancelled";
pub const EVENT_RESULT: &str = "result";

/// `error` value the server uses when a job ended because the user cancelled.
pub const ERROR_CANCELLED: &str = "cancelled";

/// Everything the session controller can receive from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Pipeline stage change, e.g. `"start"`.
    Status { stage: String },
    /// A video file started processing.
    VideoStart { path: String },
    /// Periodic frame progress. `message` wins over frame/matched when present.
    Progress {
        frame: u64,
        matched: bool,
        message: Option<String>,
    },
    /// A video finished with this many matching segments.
    VideoDone { segment_count: u64 },
    /// Segments were concatenated into the result video.
    ConcatDone,
    /// Server-assigned job identifier, needed for cancellation.
    JobId { id: String },
    /// A plate crop image reference (usually a data URL).
    Crop { image_ref: String },
    /// Terminal: the job was cancelled.
    Cancelled { message: Option<String> },
    /// Terminal: the job finished, successfully or not.
    Result(JobResult),
    /// Non-terminal error reported on the default slot.
    Error { kind: String, message: Option<String> },
    /// The payload on `event` was not valid JSON.
    Malformed { event: String, raw: String },
    /// Valid payload of a shape or name this client does not know.
    Unrecognized { raw: String },
}

/// Outcome carried by the `result` event.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// The job ran to completion.
    Completed(ResultPayload),
    /// The job failed or was cancelled server-side.
    Failed {
        error: String,
        message: Option<String>,
    },
}

/// Successful result data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPayload {
    /// Server path of the concatenated result video, if any segment matched.
    pub result_video: Option<String>,
    pub segments: Vec<Segment>,
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// JSON bodies on the default slot, tagged by `"type"`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DefaultMessage {
    Status {
        stage: String,
    },
    VideoStart {
        path: String,
    },
    Progress {
        #[serde(default)]
        frame: u64,
        #[serde(default)]
        matched: bool,
        #[serde(default)]
        message: Option<String>,
    },
    VideoDone {
        #[serde(default)]
        segments: u64,
    },
    ConcatDone,
    ConcatError {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct JobIdBody {
    job_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CancelledBody {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResultBody {
    result_video: Option<String>,
    segments: Option<Vec<Segment>>,
    error: Option<String>,
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one frame into a [`ProgressEvent`].
pub fn decode(frame: &SseFrame) -> ProgressEvent {
    match frame.event.as_str() {
        DEFAULT_EVENT => decode_default(&frame.data),
        EVENT_CROP => ProgressEvent::Crop {
            image_ref: frame.data.clone(),
        },
        EVENT_JOB_ID => decode_json::<JobIdBody>(frame)
            .map(|body| ProgressEvent::JobId { id: body.job_id })
            .unwrap_or_else(|fallback| fallback),
        EVENT_CANCELLED => decode_cancelled(frame),
        EVENT_RESULT => decode_json::<ResultBody>(frame)
            .map(|body| ProgressEvent::Result(body.into_result()))
            .unwrap_or_else(|fallback| fallback),
        _ => ProgressEvent::Unrecognized {
            raw: frame.data.clone(),
        },
    }
}

fn decode_default(data: &str) -> ProgressEvent {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(_) => {
            return ProgressEvent::Malformed {
                event: DEFAULT_EVENT.to_string(),
                raw: data.to_string(),
            }
        }
    };

    match serde_json::from_value::<DefaultMessage>(value.clone()) {
        Ok(msg) => msg.into(),
        Err(_) => ProgressEvent::Unrecognized {
            raw: serde_json::to_string_pretty(&value).unwrap_or_else(|_| data.to_string()),
        },
    }
}

/// A `cancelled` body that is not JSON still ends the job; it just has no message.
fn decode_cancelled(frame: &SseFrame) -> ProgressEvent {
    let message = if frame.data.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<CancelledBody>(&frame.data) {
            Ok(body) => body.message,
            Err(e) => {
                tracing::warn!(error = %e, raw = %frame.data, "Unreadable cancelled payload");
                None
            }
        }
    };
    ProgressEvent::Cancelled { message }
}

/// Parse a named event's JSON body, falling back to `Malformed` or
/// `Unrecognized` depending on whether the text was JSON at all.
fn decode_json<T: serde::de::DeserializeOwned>(frame: &SseFrame) -> Result<T, ProgressEvent> {
    let value: serde_json::Value =
        serde_json::from_str(&frame.data).map_err(|_| ProgressEvent::Malformed {
            event: frame.event.clone(),
            raw: frame.data.clone(),
        })?;

    serde_json::from_value(value).map_err(|e| {
        tracing::warn!(event = %frame.event, error = %e, "Unexpected payload shape");
        if frame.event == EVENT_RESULT {
            // Keep the result slot terminal even when its shape is unknown.
            ProgressEvent::Malformed {
                event: frame.event.clone(),
                raw: frame.data.clone(),
            }
        } else {
            ProgressEvent::Unrecognized {
                raw: frame.data.clone(),
            }
        }
    })
}

impl From<DefaultMessage> for ProgressEvent {
    fn from(msg: DefaultMessage) -> Self {
        match msg {
            DefaultMessage::Status { stage } => ProgressEvent::Status { stage },
            DefaultMessage::VideoStart { path } => ProgressEvent::VideoStart { path },
            DefaultMessage::Progress {
                frame,
                matched,
                message,
            } => ProgressEvent::Progress {
                frame,
                matched,
                message,
            },
            DefaultMessage::VideoDone { segments } => ProgressEvent::VideoDone {
                segment_count: segments,
            },
            DefaultMessage::ConcatDone => ProgressEvent::ConcatDone,
            DefaultMessage::ConcatError { message } => ProgressEvent::Error {
                kind: "concat_error".to_string(),
                message,
            },
            DefaultMessage::Error { message } => ProgressEvent::Error {
                kind: "error".to_string(),
                message,
            },
        }
    }
}

impl ResultBody {
    /// `result_video` takes precedence over an `error` field.
    fn into_result(self) -> JobResult {
        match (self.result_video, self.error) {
            (Some(video), _) => JobResult::Completed(ResultPayload {
                result_video: Some(video),
                segments: self.segments.unwrap_or_default(),
            }),
            (None, Some(error)) => JobResult::Failed {
                error,
                message: self.message,
            },
            (None, None) => JobResult::Completed(ResultPayload {
                result_video: None,
                segments: self.segments.unwrap_or_default(),
            }),
        }
    }
}
