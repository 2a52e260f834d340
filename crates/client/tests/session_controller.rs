//! Integration tests for `SessionController`.
//!
//! A scripted `FakeService` stands in for the HTTP API so the state machine
//! can be driven without a server: each opened event stream is an mpsc
//! channel whose sender the test keeps.

use std::path::PathBuf;
use std::sync::Mutex;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::mpsc;

use vjts_client::api::{ApiError, CancelAck, JobService, UploadResponse};
use vjts_client::channel::{ChannelMessage, EventChannel};
use vjts_client::session::{
    CancelOutcome, ControllerError, Dispatch, SessionController, SessionStatus, Terminal,
};
use vjts_client::sse::SseFrame;
use vjts_client::view::{Feedback, StatusKind};
use vjts_core::gallery::INITIAL_VISIBLE_CROPS;
use vjts_core::job::JobParams;

// ---------------------------------------------------------------------------
// Fake service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Upload(usize),
    OpenEvents(JobParams),
    Cancel(String),
}

enum UploadBehavior {
    Dir(&'static str),
    NoDir,
    Fail,
}

enum CancelBehavior {
    Ack(&'static str, Option<&'static str>),
    Fail,
}

struct FakeService {
    upload: UploadBehavior,
    cancel: CancelBehavior,
    fail_open: bool,
    calls: Mutex<Vec<Call>>,
    senders: Mutex<Vec<mpsc::Sender<ChannelMessage>>>,
}

impl FakeService {
    fn new() -> Self {
        Self {
            upload: UploadBehavior::Dir("data/videos/uploads/abc123"),
            cancel: CancelBehavior::Ack("cancelled", None),
            fail_open: false,
            calls: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Sender for the `n`th opened stream.
    fn sender(&self, n: usize) -> mpsc::Sender<ChannelMessage> {
        self.senders.lock().unwrap()[n].clone()
    }

    fn server_error() -> ApiError {
        ApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        }
    }
}

#[async_trait]
impl JobService for FakeService {
    async fn upload(&self, files: &[PathBuf]) -> Result<UploadResponse, ApiError> {
        self.calls.lock().unwrap().push(Call::Upload(files.len()));
        match self.upload {
            UploadBehavior::Dir(dir) => Ok(UploadResponse {
                upload_dir: Some(dir.to_string()),
                saved: Vec::new(),
            }),
            UploadBehavior::NoDir => Ok(UploadResponse::default()),
            UploadBehavior::Fail => Err(Self::server_error()),
        }
    }

    async fn open_events(&self, params: &JobParams) -> Result<EventChannel, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::OpenEvents(params.clone()));
        if self.fail_open {
            return Err(Self::server_error());
        }
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(tx);
        Ok(EventChannel::from_receiver(rx))
    }

    async fn cancel(&self, job_id: &str) -> Result<CancelAck, ApiError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Cancel(job_id.to_string()));
        match self.cancel {
            CancelBehavior::Ack(status, message) => Ok(CancelAck {
                status: status.to_string(),
                message: message.map(str::to_string),
            }),
            CancelBehavior::Fail => Err(Self::server_error()),
        }
    }

    fn download_url(&self, result_ref: &str) -> String {
        format!("http://vjts.test/download/result?path={result_ref}")
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn params() -> JobParams {
    JobParams::new("51F12345")
}

fn frame(data: &str) -> ChannelMessage {
    ChannelMessage::Frame(SseFrame::message(data))
}

fn named(event: &str, data: &str) -> ChannelMessage {
    ChannelMessage::Frame(SseFrame::new(event, data))
}

async fn streaming(service: FakeService) -> SessionController<FakeService> {
    let mut controller = SessionController::new(service);
    controller.start(&[], params()).await.unwrap();
    controller
}

fn status_of(controller: &SessionController<FakeService>) -> (String, StatusKind) {
    match &controller.view().feedback {
        Feedback::Status { text, kind } => (text.clone(), *kind),
        Feedback::Log(text) => panic!("expected a status line, got log {text:?}"),
    }
}

fn assert_idle(controller: &SessionController<FakeService>) {
    assert_eq!(controller.session().status(), SessionStatus::Idle);
    assert!(!controller.session().has_open_channel());
    assert!(controller.session().job_id().is_none());
    assert!(controller.view().run_enabled);
    assert!(!controller.view().cancel_enabled);
}

const RESULT_WITH_TRAJECTORY: &str = r#"{
    "result_video": "data/outputs/VJTS_51F12345.mp4",
    "segments": [
        {"start_time": 5.0, "end_time": 12.34, "trajectory": {"speed_px_per_sec": 100.0}},
        {"start_time": 20.0, "end_time": 25.0}
    ]
}"#;

// ---------------------------------------------------------------------------
// start()
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_without_files_streams_server_directory() {
    let controller = streaming(FakeService::new()).await;

    assert_eq!(controller.service().calls(), vec![Call::OpenEvents(params())]);
    assert_eq!(controller.session().status(), SessionStatus::Streaming);
    assert!(controller.session().has_open_channel());
    assert!(!controller.view().run_enabled);
    assert!(controller.view().cancel_enabled);
}

#[tokio::test]
async fn start_with_files_uses_returned_upload_dir() {
    let mut controller = SessionController::new(FakeService::new());
    let files = vec![PathBuf::from("cam1.mp4"), PathBuf::from("cam2.mp4")];

    controller.start(&files, params()).await.unwrap();

    let expected = params().with_video_dir("data/videos/uploads/abc123");
    assert_eq!(
        controller.service().calls(),
        vec![Call::Upload(2), Call::OpenEvents(expected)]
    );
    assert_eq!(controller.session().status(), SessionStatus::Streaming);
}

#[tokio::test]
async fn upload_without_directory_aborts_before_streaming() {
    let mut service = FakeService::new();
    service.upload = UploadBehavior::NoDir;
    let mut controller = SessionController::new(service);

    let result = controller.start(&[PathBuf::from("a.mp4")], params()).await;

    assert_matches!(result, Err(ControllerError::Upload(_)));
    assert_eq!(controller.service().calls(), vec![Call::Upload(1)]);
    assert_idle(&controller);
    let (text, kind) = status_of(&controller);
    assert!(text.starts_with("Error: Upload failed"));
    assert_eq!(kind, StatusKind::Error);
}

#[tokio::test]
async fn upload_transport_failure_returns_to_idle() {
    let mut service = FakeService::new();
    service.upload = UploadBehavior::Fail;
    let mut controller = SessionController::new(service);

    let result = controller.start(&[PathBuf::from("a.mp4")], params()).await;

    assert_matches!(result, Err(ControllerError::Upload(reason)) if reason.contains("502"));
    assert_idle(&controller);
}

#[tokio::test]
async fn invalid_params_make_no_requests() {
    let mut controller = SessionController::new(FakeService::new());

    let result = controller.start(&[], JobParams::new("  ")).await;

    assert_matches!(result, Err(ControllerError::Validation(_)));
    assert!(controller.service().calls().is_empty());
    assert_idle(&controller);
}

#[tokio::test]
async fn stream_open_failure_restores_controls() {
    let mut service = FakeService::new();
    service.fail_open = true;
    let mut controller = SessionController::new(service);

    let result = controller.start(&[], params()).await;

    assert_matches!(result, Err(ControllerError::Stream(_)));
    assert_idle(&controller);
}

#[tokio::test]
async fn new_run_closes_previous_channel() {
    let mut controller = streaming(FakeService::new()).await;
    let first = controller.service().sender(0);

    controller.start(&[], params()).await.unwrap();

    assert!(first.is_closed());
    assert!(!controller.service().sender(1).is_closed());
    assert!(controller.session().has_open_channel());
}

#[tokio::test]
async fn new_run_resets_gallery_trajectory_and_result() {
    let mut controller = streaming(FakeService::new()).await;
    for i in 0..10 {
        controller.dispatch(named("crop", &format!("crop-{i}")));
    }
    controller.show_more_crops();
    controller.dispatch(named("result", RESULT_WITH_TRAJECTORY));
    assert!(controller.view().result.is_some());
    assert!(controller.view().trajectory.is_some());

    controller.start(&[], params()).await.unwrap();

    let view = controller.view();
    assert!(view.crops.is_empty());
    assert!(view.trajectory.is_none());
    assert!(view.result.is_none());

    controller.dispatch(named("crop", "a"));
    for i in 0..6 {
        controller.dispatch(named("crop", &format!("b{i}")));
    }
    assert_eq!(controller.view().crops.visible_count(), INITIAL_VISIBLE_CROPS);
}

// ---------------------------------------------------------------------------
// Non-terminal events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_id_is_recorded() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(named("job_id", r#"{"job_id":"JOB-1"}"#));

    assert_eq!(dispatch, Dispatch::Continue);
    assert_eq!(controller.session().job_id(), Some("JOB-1"));
}

#[tokio::test]
async fn status_progress_events_update_text_only() {
    let mut controller = streaming(FakeService::new()).await;

    controller.dispatch(frame(r#"{"type":"video_start","path":"data/videos/cam7.mp4"}"#));
    assert_eq!(status_of(&controller).0, "Processing cam7.mp4");

    controller.dispatch(frame(r#"{"type":"progress","frame":40,"matched":true}"#));
    assert_eq!(status_of(&controller).0, "Frame 40 - plate found!");

    controller.dispatch(frame(
        r#"{"type":"progress","frame":50,"matched":false,"message":"Scanning cam7"}"#,
    ));
    assert_eq!(status_of(&controller).0, "Scanning cam7");

    controller.dispatch(frame(r#"{"type":"video_done","segments":2}"#));
    assert_eq!(
        status_of(&controller),
        ("Video done (2 segments)".to_string(), StatusKind::Success)
    );

    assert_eq!(controller.session().status(), SessionStatus::Streaming);
}

#[tokio::test]
async fn crops_are_shown_newest_first() {
    let mut controller = streaming(FakeService::new()).await;

    for i in 0..6 {
        controller.dispatch(named("crop", &format!("crop-{i}")));
    }

    let shown: Vec<&str> = controller.view().crops.visible().collect();
    assert_eq!(shown, vec!["crop-5", "crop-4", "crop-3", "crop-2"]);
    assert_eq!(controller.view().crops.hidden_count(), 2);

    controller.show_more_crops();
    assert_eq!(controller.view().crops.visible_count(), 6);
}

#[tokio::test]
async fn malformed_default_message_is_shown_raw_and_keeps_streaming() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(frame("<<not json>>"));

    assert_eq!(dispatch, Dispatch::Continue);
    assert_eq!(
        controller.view().feedback,
        Feedback::Log("<<not json>>".to_string())
    );
    assert!(controller.session().has_open_channel());
}

#[tokio::test]
async fn server_error_message_is_not_terminal() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(frame(r#"{"type":"concat_error","message":"ffmpeg"}"#));

    assert_eq!(dispatch, Dispatch::Continue);
    assert_eq!(status_of(&controller).1, StatusKind::Error);
    assert!(controller.session().has_open_channel());
}

// ---------------------------------------------------------------------------
// Terminal events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn result_renders_link_and_trajectory_then_closes() {
    let mut controller = streaming(FakeService::new()).await;
    controller.dispatch(named("job_id", r#"{"job_id":"JOB-1"}"#));

    let dispatch = controller.dispatch(named("result", RESULT_WITH_TRAJECTORY));

    let Dispatch::Terminal(Terminal::Completed { result: Some(link) }) = dispatch else {
        panic!("expected completion with a result link");
    };
    assert_eq!(
        link.download_url,
        "http://vjts.test/download/result?path=data/outputs/VJTS_51F12345.mp4"
    );
    assert_eq!(controller.view().result.as_ref(), Some(&link));

    let panel = controller.view().trajectory.as_ref().unwrap();
    assert_eq!(panel.blocks.len(), 1);
    assert_eq!(panel.blocks[0].start, "0:05.0");
    assert_eq!(panel.blocks[0].end, "0:12.3");
    assert!(panel.disclaimer.is_some());

    assert_idle(&controller);
    assert_eq!(status_of(&controller).1, StatusKind::Success);
}

#[tokio::test]
async fn result_without_video_reports_no_match() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(named("result", r#"{"result_video":null,"segments":[]}"#));

    assert_eq!(
        dispatch,
        Dispatch::Terminal(Terminal::Completed { result: None })
    );
    assert!(controller.view().result.is_none());
    assert_idle(&controller);
}

#[tokio::test]
async fn result_error_cancelled_takes_user_cancel_path() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(named("result", r#"{"error":"cancelled"}"#));

    assert_eq!(
        dispatch,
        Dispatch::Terminal(Terminal::Cancelled { message: None })
    );
    let (text, kind) = status_of(&controller);
    assert_eq!(text, "Job cancelled by user");
    assert_eq!(kind, StatusKind::Warning);
    assert_idle(&controller);
}

#[tokio::test]
async fn result_error_reports_failure_message() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(named(
        "result",
        r#"{"error":"job_failed","message":"video codec not supported"}"#,
    ));

    assert_eq!(
        dispatch,
        Dispatch::Terminal(Terminal::Failed {
            message: "video codec not supported".to_string()
        })
    );
    assert_eq!(
        status_of(&controller),
        (
            "Job failed: video codec not supported".to_string(),
            StatusKind::Error
        )
    );
    assert!(controller.view().result.is_none());
    assert!(controller.view().trajectory.is_none());
    assert_idle(&controller);
}

#[tokio::test]
async fn unreadable_result_is_terminal_failure() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(named("result", "{truncated"));

    assert_matches!(dispatch, Dispatch::Terminal(Terminal::Failed { .. }));
    assert_idle(&controller);
}

#[tokio::test]
async fn cancelled_event_is_terminal() {
    let mut controller = streaming(FakeService::new()).await;
    controller.dispatch(named("job_id", r#"{"job_id":"JOB-9"}"#));

    let dispatch = controller.dispatch(named("cancelled", r#"{"message":"Stopped"}"#));

    assert_eq!(
        dispatch,
        Dispatch::Terminal(Terminal::Cancelled {
            message: Some("Stopped".to_string())
        })
    );
    assert_eq!(status_of(&controller).0, "Job cancelled: Stopped");
    assert_idle(&controller);
}

#[tokio::test]
async fn transport_error_tears_down_session() {
    let mut controller = streaming(FakeService::new()).await;

    let dispatch = controller.dispatch(ChannelMessage::TransportError("reset by peer".into()));

    assert_matches!(dispatch, Dispatch::Terminal(Terminal::TransportError { message }) if message == "reset by peer");
    assert_idle(&controller);
    assert_eq!(status_of(&controller).1, StatusKind::Error);
}

#[tokio::test]
async fn events_after_terminal_are_dropped() {
    let mut controller = streaming(FakeService::new()).await;
    let sender = controller.service().sender(0);

    controller.dispatch(named("result", RESULT_WITH_TRAJECTORY));

    assert!(sender.is_closed());
    assert_eq!(controller.dispatch(named("crop", "late")), Dispatch::Dropped);
    assert_eq!(
        controller.dispatch(named("cancelled", "{}")),
        Dispatch::Dropped
    );
    assert_eq!(
        controller.dispatch(ChannelMessage::TransportError("late".into())),
        Dispatch::Dropped
    );
    assert!(controller.view().crops.is_empty());
    assert!(controller.view().result.is_some());
}

// ---------------------------------------------------------------------------
// Channel pumping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_until_terminal_processes_in_arrival_order() {
    let mut controller = streaming(FakeService::new()).await;
    let sender = controller.service().sender(0);

    sender.send(named("job_id", r#"{"job_id":"JOB-2"}"#)).await.unwrap();
    sender.send(named("crop", "first")).await.unwrap();
    sender.send(named("crop", "second")).await.unwrap();
    sender.send(named("result", RESULT_WITH_TRAJECTORY)).await.unwrap();

    let terminal = controller.run_until_terminal().await;

    assert_matches!(terminal, Some(Terminal::Completed { result: Some(_) }));
    let crops: Vec<&str> = controller.view().crops.visible().collect();
    assert_eq!(crops, vec!["second", "first"]);
    assert!(controller.next_message().await.is_none());
}

#[tokio::test]
async fn stream_ending_without_terminal_is_transport_error() {
    let mut controller = streaming(FakeService::new()).await;
    let sender = controller.service().sender(0);
    sender.send(frame(r#"{"type":"status","stage":"start"}"#)).await.unwrap();

    // Drop every handle to the sender side.
    drop(sender);
    controller.service().senders.lock().unwrap().clear();

    let terminal = controller.run_until_terminal().await;

    assert_matches!(terminal, Some(Terminal::TransportError { .. }));
    assert_idle(&controller);
}

// ---------------------------------------------------------------------------
// cancel()
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_without_job_id_sends_nothing() {
    let mut controller = streaming(FakeService::new()).await;

    let outcome = controller.cancel().await.unwrap();

    assert_eq!(outcome, CancelOutcome::NoActiveJob);
    assert_eq!(controller.service().calls(), vec![Call::OpenEvents(params())]);
    assert_eq!(status_of(&controller).0, "No active job to cancel");
    assert!(controller.session().has_open_channel());
}

#[tokio::test]
async fn cancel_when_idle_sends_nothing() {
    let mut controller = SessionController::new(FakeService::new());

    let outcome = controller.cancel().await.unwrap();

    assert_eq!(outcome, CancelOutcome::NoActiveJob);
    assert!(controller.service().calls().is_empty());
}

#[tokio::test]
async fn acknowledged_cancel_closes_channel_without_waiting() {
    let mut controller = streaming(FakeService::new()).await;
    let sender = controller.service().sender(0);
    controller.dispatch(named("job_id", r#"{"job_id":"JOB-3"}"#));

    let outcome = controller.cancel().await.unwrap();

    assert_eq!(outcome, CancelOutcome::Requested);
    assert!(controller
        .service()
        .calls()
        .contains(&Call::Cancel("JOB-3".to_string())));
    assert_idle(&controller);
    assert_eq!(status_of(&controller).0, "Cancelling job...");

    // The server's own cancelled event can no longer be delivered.
    assert!(sender.send(named("cancelled", "{}")).await.is_err());
    assert_eq!(
        controller.dispatch(named("cancelled", "{}")),
        Dispatch::Dropped
    );
}

#[tokio::test]
async fn rejected_cancel_keeps_session_streaming() {
    let mut service = FakeService::new();
    service.cancel = CancelBehavior::Ack("not_found", Some("Job already finished"));
    let mut controller = streaming(service).await;
    controller.dispatch(named("job_id", r#"{"job_id":"JOB-4"}"#));

    let outcome = controller.cancel().await.unwrap();

    assert_eq!(
        outcome,
        CancelOutcome::Rejected {
            message: "Job already finished".to_string()
        }
    );
    assert_eq!(controller.session().status(), SessionStatus::Streaming);
    assert_eq!(controller.session().job_id(), Some("JOB-4"));
    assert!(controller.session().has_open_channel());

    // A terminal event may still arrive later.
    let dispatch = controller.dispatch(named("cancelled", "{}"));
    assert_matches!(dispatch, Dispatch::Terminal(Terminal::Cancelled { .. }));
}

#[tokio::test]
async fn failed_cancel_request_leaves_session_unchanged() {
    let mut service = FakeService::new();
    service.cancel = CancelBehavior::Fail;
    let mut controller = streaming(service).await;
    controller.dispatch(named("job_id", r#"{"job_id":"JOB-5"}"#));

    let result = controller.cancel().await;

    assert_matches!(result, Err(ControllerError::Cancel(_)));
    assert_eq!(controller.session().status(), SessionStatus::Streaming);
    assert_eq!(controller.session().job_id(), Some("JOB-5"));
    let (text, kind) = status_of(&controller);
    assert!(text.starts_with("Cancel failed"));
    assert_eq!(kind, StatusKind::Error);
}
