//! Job session state machine.
//!
//! [`SessionController`] owns at most one [`JobSession`] and the derived
//! [`ViewState`]. Every external input has one entry point:
//!
//! - [`start`](SessionController::start): a run is requested,
//! - [`dispatch`](SessionController::dispatch): a message arrived on the channel,
//! - [`cancel`](SessionController::cancel): the user asked to stop,
//! - [`show_more_crops`](SessionController::show_more_crops): gallery paging.
//!
//! ```text
//! Idle -> Uploading -> Streaming -> Idle
//!   \________________/    |  ^
//!                         v  |  (cancel rejected)
//!                      Terminating
//! ```
//!
//! Every terminal path (result, cancelled event, acknowledged cancel,
//! transport error) closes the channel, clears the job id and restores the
//! idle controls. Messages arriving after that are dropped.

use std::path::PathBuf;

use vjts_core::error::CoreError;
use vjts_core::job::JobParams;
use vjts_core::trajectory::render_trajectory;

use crate::api::{ApiError, JobService};
use crate::channel::{ChannelMessage, EventChannel};
use crate::messages::{
    decode, JobResult, ProgressEvent, ResultPayload, ERROR_CANCELLED, EVENT_CANCELLED, EVENT_RESULT,
};
use crate::view::{ResultLink, StatusKind, ViewState};

/// Lifecycle phase of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Uploading,
    Streaming,
    /// A cancel request is in flight.
    Terminating,
}

/// The single active job, if any.
pub struct JobSession {
    job_id: Option<String>,
    channel: Option<EventChannel>,
    status: SessionStatus,
}

impl Default for JobSession {
    fn default() -> Self {
        Self {
            job_id: None,
            channel: None,
            status: SessionStatus::Idle,
        }
    }
}

impl JobSession {
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn has_open_channel(&self) -> bool {
        self.channel.is_some()
    }

    /// Close the channel and forget the job. Safe to call repeatedly.
    fn teardown(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            tracing::debug!(job_id = ?self.job_id, "Event channel closed");
        }
        self.job_id = None;
        self.status = SessionStatus::Idle;
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// The job finished. `result` is `None` when nothing matched.
    Completed { result: Option<ResultLink> },
    /// The server reported a failure.
    Failed { message: String },
    /// Cancelled by the user, via event or result.
    Cancelled { message: Option<String> },
    /// The stream broke before a terminal event.
    TransportError { message: String },
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The session is still streaming.
    Continue,
    /// The session ended with this outcome.
    Terminal(Terminal),
    /// No channel was open; the message was ignored.
    Dropped,
}

/// Result of [`SessionController::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No job id recorded; nothing was sent.
    NoActiveJob,
    /// The server acknowledged; the channel was closed locally.
    Requested,
    /// The server refused; the session keeps streaming.
    Rejected { message: String },
}

/// Errors returned to the caller of a controller operation.
///
/// The view already shows a human-readable message for each of these.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Could not open event stream: {0}")]
    Stream(#[source] ApiError),

    #[error("Cancel request failed: {0}")]
    Cancel(#[source] ApiError),
}

/// Drives one job at a time against a [`JobService`].
pub struct SessionController<S> {
    service: S,
    session: JobSession,
    view: ViewState,
}

impl<S: JobService> SessionController<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            session: JobSession::default(),
            view: ViewState::new(),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn session(&self) -> &JobSession {
        &self.session
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Begin a new run, tearing down any previous one first.
    ///
    /// With `files`, they are uploaded and the returned upload directory
    /// replaces `params.video_dir`. On error the controller is Idle again
    /// and no channel is open.
    pub async fn start(
        &mut self,
        files: &[PathBuf],
        mut params: JobParams,
    ) -> Result<(), ControllerError> {
        if self.session.has_open_channel() {
            tracing::info!(job_id = ?self.session.job_id, "Closing previous session");
        }
        self.session.teardown();
        self.view.reset_for_run();

        if let Err(e) = params.validate() {
            self.view.set_status(format!("Error: {e}"), StatusKind::Error);
            self.view.set_idle();
            return Err(e.into());
        }

        self.view.set_busy(false);
        self.view
            .set_status("Running video processing...", StatusKind::Info);

        if files.is_empty() {
            self.view.set_status(
                format!(
                    "No files to upload, processing server directory {}",
                    params.video_dir
                ),
                StatusKind::Info,
            );
        } else {
            self.session.status = SessionStatus::Uploading;
            self.view.set_status(
                format!("Uploading {} file(s)...", files.len()),
                StatusKind::Info,
            );

            let upload_dir = match self.service.upload(files).await {
                Ok(response) => response.upload_dir().map(str::to_string),
                Err(e) => return Err(self.fail_upload(e.to_string())),
            };
            let Some(upload_dir) = upload_dir else {
                return Err(self.fail_upload("server returned no upload directory".to_string()));
            };

            tracing::info!(upload_dir = %upload_dir, "Upload complete");
            self.view.set_status(
                "Upload complete, starting processing...",
                StatusKind::Info,
            );
            params.video_dir = upload_dir;
        }

        match self.service.open_events(&params).await {
            Ok(channel) => {
                self.session.channel = Some(channel);
                self.session.status = SessionStatus::Streaming;
                self.view.set_busy(true);
                tracing::info!(
                    plate = %params.plate,
                    video_dir = %params.video_dir,
                    output_dir = %params.output_dir,
                    "Job session streaming",
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open event stream");
                self.session.teardown();
                self.view.set_status(
                    format!("Error: could not open event stream: {e}"),
                    StatusKind::Error,
                );
                self.view.set_idle();
                Err(ControllerError::Stream(e))
            }
        }
    }

    /// Wait for the next message on the open channel.
    ///
    /// Returns `None` when no channel is open. A channel whose sender
    /// vanished yields a transport error so the session still terminates.
    pub async fn next_message(&mut self) -> Option<ChannelMessage> {
        let channel = self.session.channel.as_mut()?;
        Some(channel.recv().await.unwrap_or_else(|| {
            ChannelMessage::TransportError("Event stream closed".to_string())
        }))
    }

    /// Handle one inbound channel message.
    pub fn dispatch(&mut self, message: ChannelMessage) -> Dispatch {
        match message {
            ChannelMessage::Frame(frame) => {
                if !self.session.has_open_channel() {
                    tracing::debug!(event = %frame.event, "Dropping frame for closed session");
                    return Dispatch::Dropped;
                }
                let event = decode(&frame);
                self.on_event(event)
            }
            ChannelMessage::TransportError(message) => self.on_transport_error(message),
        }
    }

    /// Handle one decoded event.
    pub fn on_event(&mut self, event: ProgressEvent) -> Dispatch {
        if !self.session.has_open_channel() {
            tracing::debug!(?event, "Dropping event for closed session");
            return Dispatch::Dropped;
        }

        let session = &mut self.session;
        let view = &mut self.view;

        match event {
            ProgressEvent::JobId { id } => {
                handle_job_id(session, id);
                Dispatch::Continue
            }
            ProgressEvent::Crop { image_ref } => {
                view.crops.push(image_ref);
                tracing::debug!(total = view.crops.len(), "Crop received");
                Dispatch::Continue
            }
            ProgressEvent::Cancelled { message } => handle_cancelled(session, view, message),
            ProgressEvent::Result(result) => {
                handle_result(session, view, &self.service, result)
            }
            ProgressEvent::Malformed { event, raw } => {
                handle_malformed(session, view, &event, raw)
            }
            ProgressEvent::Unrecognized { raw } => {
                view.show_log(raw);
                Dispatch::Continue
            }
            other => {
                handle_progress(view, other);
                Dispatch::Continue
            }
        }
    }

    /// The channel failed: tear down and restore the controls.
    pub fn on_transport_error(&mut self, message: String) -> Dispatch {
        if !self.session.has_open_channel() {
            return Dispatch::Dropped;
        }
        tracing::warn!(job_id = ?self.session.job_id, error = %message, "Event stream failed");
        self.session.teardown();
        self.view
            .set_status(format!("Connection lost: {message}"), StatusKind::Error);
        self.view.set_idle();
        Dispatch::Terminal(Terminal::TransportError { message })
    }

    /// Ask the server to cancel the current job.
    ///
    /// Without a recorded job id nothing is sent. On acknowledgement the
    /// channel is closed immediately; the server's own `cancelled` event,
    /// if it still arrives, is dropped.
    pub async fn cancel(&mut self) -> Result<CancelOutcome, ControllerError> {
        let Some(job_id) = self.session.job_id.clone() else {
            self.view
                .set_status("No active job to cancel", StatusKind::Warning);
            return Ok(CancelOutcome::NoActiveJob);
        };

        let previous = self.session.status;
        self.session.status = SessionStatus::Terminating;
        tracing::info!(job_id = %job_id, "Requesting cancellation");

        match self.service.cancel(&job_id).await {
            Ok(ack) if ack.is_cancelled() => {
                self.session.teardown();
                self.view.set_status("Cancelling job...", StatusKind::Warning);
                self.view.set_idle();
                Ok(CancelOutcome::Requested)
            }
            Ok(ack) => {
                self.session.status = previous;
                let message = ack.message.unwrap_or_else(|| {
                    format!("Cancel rejected by server (status: {})", ack.status)
                });
                tracing::warn!(job_id = %job_id, message = %message, "Cancel rejected");
                self.view.set_status(message.clone(), StatusKind::Error);
                Ok(CancelOutcome::Rejected { message })
            }
            Err(e) => {
                self.session.status = previous;
                tracing::warn!(job_id = %job_id, error = %e, "Cancel request failed");
                self.view
                    .set_status(format!("Cancel failed: {e}"), StatusKind::Error);
                Err(ControllerError::Cancel(e))
            }
        }
    }

    /// Reveal the next page of crops.
    pub fn show_more_crops(&mut self) {
        self.view.crops.show_more();
    }

    /// Pump the channel until the session ends.
    ///
    /// Returns `None` if no channel was open.
    pub async fn run_until_terminal(&mut self) -> Option<Terminal> {
        while let Some(message) = self.next_message().await {
            if let Dispatch::Terminal(terminal) = self.dispatch(message) {
                return Some(terminal);
            }
        }
        None
    }

    fn fail_upload(&mut self, reason: String) -> ControllerError {
        tracing::warn!(reason = %reason, "Upload failed");
        self.session.teardown();
        self.view
            .set_status(format!("Error: Upload failed: {reason}"), StatusKind::Error);
        self.view.set_idle();
        ControllerError::Upload(reason)
    }
}

// ---- individual event handlers ----

/// End the session and restore idle controls.
fn finish(session: &mut JobSession, view: &mut ViewState, terminal: Terminal) -> Dispatch {
    tracing::info!(job_id = ?session.job_id, outcome = ?terminal, "Job session finished");
    session.teardown();
    view.set_idle();
    Dispatch::Terminal(terminal)
}

fn handle_job_id(session: &mut JobSession, id: String) {
    if let Some(previous) = session.job_id.as_deref().filter(|p| *p != id) {
        tracing::debug!(previous, new = %id, "Job id replaced");
    }
    tracing::info!(job_id = %id, "Job id received");
    session.job_id = Some(id);
}

fn handle_progress(view: &mut ViewState, event: ProgressEvent) {
    match event {
        ProgressEvent::Status { stage } => {
            view.set_status(format!("Stage: {stage}"), StatusKind::Info);
        }
        ProgressEvent::VideoStart { path } => {
            let name = path
                .rsplit(|c: char| c == '/' || c == '\\')
                .next()
                .unwrap_or(&path);
            view.set_status(format!("Processing {name}"), StatusKind::Info);
        }
        ProgressEvent::Progress {
            frame,
            matched,
            message,
        } => {
            let text = message.unwrap_or_else(|| {
                let suffix = if matched { " - plate found!" } else { "" };
                format!("Frame {frame}{suffix}")
            });
            view.set_status(text, StatusKind::Info);
        }
        ProgressEvent::VideoDone { segment_count } => {
            view.set_status(
                format!("Video done ({segment_count} segments)"),
                StatusKind::Success,
            );
        }
        ProgressEvent::ConcatDone => {
            view.set_status("Building result video...", StatusKind::Info);
        }
        ProgressEvent::Error { kind, message } => {
            tracing::warn!(kind = %kind, message = ?message, "Server reported an error");
            let detail = message.unwrap_or_else(|| kind.clone());
            view.set_status(format!("Error ({kind}): {detail}"), StatusKind::Error);
        }
        other => {
            tracing::debug!(?other, "Event has no status text");
        }
    }
}

fn handle_cancelled(
    session: &mut JobSession,
    view: &mut ViewState,
    message: Option<String>,
) -> Dispatch {
    let text = match &message {
        Some(m) => format!("Job cancelled: {m}"),
        None => "Job cancelled".to_string(),
    };
    view.set_status(text, StatusKind::Warning);
    finish(session, view, Terminal::Cancelled { message })
}

fn handle_result<S: JobService>(
    session: &mut JobSession,
    view: &mut ViewState,
    service: &S,
    result: JobResult,
) -> Dispatch {
    match result {
        JobResult::Completed(ResultPayload {
            result_video: Some(result_ref),
            segments,
        }) => {
            let link = ResultLink {
                download_url: service.download_url(&result_ref),
                result_ref,
            };
            view.set_status("Done! Result video ready", StatusKind::Success);
            view.result = Some(link.clone());
            view.trajectory = if segments.is_empty() {
                None
            } else {
                render_trajectory(&segments)
            };
            finish(session, view, Terminal::Completed { result: Some(link) })
        }
        JobResult::Completed(ResultPayload {
            result_video: None, ..
        }) => {
            view.set_status("Done: no matching segments found", StatusKind::Success);
            view.clear_result();
            finish(session, view, Terminal::Completed { result: None })
        }
        JobResult::Failed { error, message } if error == ERROR_CANCELLED => {
            let text = match &message {
                Some(m) => format!("Job cancelled by user: {m}"),
                None => "Job cancelled by user".to_string(),
            };
            view.set_status(text, StatusKind::Warning);
            view.clear_result();
            finish(session, view, Terminal::Cancelled { message })
        }
        JobResult::Failed { error, message } => {
            let detail = message.unwrap_or(error);
            view.set_status(format!("Job failed: {detail}"), StatusKind::Error);
            view.clear_result();
            finish(session, view, Terminal::Failed { message: detail })
        }
    }
}

fn handle_malformed(
    session: &mut JobSession,
    view: &mut ViewState,
    event: &str,
    raw: String,
) -> Dispatch {
    tracing::warn!(event, raw = %raw, "Malformed event payload");
    match event {
        EVENT_RESULT => {
            let message = "unreadable result from server".to_string();
            view.set_status(format!("Job failed: {message}"), StatusKind::Error);
            view.clear_result();
            finish(session, view, Terminal::Failed { message })
        }
        EVENT_CANCELLED => handle_cancelled(session, view, None),
        _ => {
            view.show_log(raw);
            Dispatch::Continue
        }
    }
}
