//! HTTP client for the VJTS job endpoints.
//!
//! [`JobService`] is the seam the session controller talks through;
//! [`VjtsApi`] implements it over [`reqwest`] against a live server
//! (`/upload`, `/events`, `/cancel`, `/download/result`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use vjts_core::job::JobParams;

use crate::channel::EventChannel;
use crate::config::ClientConfig;

/// Response of `POST /upload`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UploadResponse {
    /// Server directory holding the uploaded files. Missing means failure.
    #[serde(default)]
    pub upload_dir: Option<String>,
    /// Server paths of the saved files.
    #[serde(default)]
    pub saved: Vec<String>,
}

impl UploadResponse {
    /// The usable upload directory, treating an empty string as absent.
    pub fn upload_dir(&self) -> Option<&str> {
        self.upload_dir.as_deref().filter(|d| !d.is_empty())
    }
}

/// Response of `POST /cancel`.
///
/// `status` is required: a body without it is not a cancel response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CancelAck {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// `status` value acknowledging a cancellation.
pub const CANCEL_ACK_STATUS: &str = "cancelled";

impl CancelAck {
    pub fn is_cancelled(&self) -> bool {
        self.status == CANCEL_ACK_STATUS
    }
}

/// Errors from the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, body decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("VJTS API error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// Reading an upload or writing a download failed locally.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network operations the session controller needs.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Upload local videos in a single multipart request.
    async fn upload(&self, files: &[PathBuf]) -> Result<UploadResponse, ApiError>;

    /// Open the event stream for a new job.
    async fn open_events(&self, params: &JobParams) -> Result<EventChannel, ApiError>;

    /// Ask the server to cancel a running job.
    async fn cancel(&self, job_id: &str) -> Result<CancelAck, ApiError>;

    /// Download/playback URL for a server-side result path.
    fn download_url(&self, result_ref: &str) -> String;
}

/// reqwest-backed [`JobService`] for one VJTS server.
pub struct VjtsApi {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

impl VjtsApi {
    /// Build a client from configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.request_timeout(),
        ))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: Url, request_timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            request_timeout,
        }
    }

    /// Stream the result video at `result_ref` into `dest`.
    ///
    /// Returns the number of bytes written. A partially written file is
    /// removed when the transfer fails.
    pub async fn download_result(&self, result_ref: &str, dest: &Path) -> Result<u64, ApiError> {
        let response = self
            .client
            .get(self.download_url(result_ref))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let written = match Self::write_body(response, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                    tracing::warn!(dest = %dest.display(), error = %remove_err, "Failed to remove partial download");
                }
                tracing::warn!(dest = %dest.display(), error = %e, "Result download failed");
                return Err(e);
            }
        };

        tracing::info!(dest = %dest.display(), bytes = written, "Result video downloaded");
        Ok(written)
    }

    /// Absolute URL for `path` below the base URL, keeping any base prefix.
    pub fn endpoint(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}/{path}"));
        url.set_query(None);
        url
    }

    // ---- private helpers ----

    /// Build the multipart form, one streamed `files` part per local file.
    async fn build_upload_form(files: &[PathBuf]) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for path in files {
            let file = tokio::fs::File::open(path).await?;
            let len = file.metadata().await?.len();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.mp4".to_string());
            tracing::debug!(file = %path.display(), bytes = len, "Adding upload part");

            let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
            form = form.part(
                "files",
                Part::stream_with_length(body, len).file_name(file_name),
            );
        }
        Ok(form)
    }

    /// Copy a response body into `file` chunk by chunk.
    async fn write_body(
        response: reqwest::Response,
        file: &mut tokio::fs::File,
    ) -> Result<u64, ApiError> {
        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Ensure the response has a success status code, otherwise capture
    /// the status and body in [`ApiError::Status`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobService for VjtsApi {
    async fn upload(&self, files: &[PathBuf]) -> Result<UploadResponse, ApiError> {
        let form = Self::build_upload_form(files).await?;

        let response = self
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await?;

        let upload: UploadResponse = Self::parse_response(response).await?;
        tracing::info!(
            files = files.len(),
            upload_dir = ?upload.upload_dir,
            "Upload finished",
        );
        Ok(upload)
    }

    async fn open_events(&self, params: &JobParams) -> Result<EventChannel, ApiError> {
        let response = self
            .client
            .get(self.endpoint("events"))
            .query(&[
                ("plate", params.plate.as_str()),
                ("video_dir", params.video_dir.as_str()),
                ("output_dir", params.output_dir.as_str()),
            ])
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        tracing::info!(plate = %params.plate, video_dir = %params.video_dir, "Event stream opened");
        Ok(EventChannel::spawn(response))
    }

    async fn cancel(&self, job_id: &str) -> Result<CancelAck, ApiError> {
        let response = self
            .client
            .post(self.endpoint("cancel"))
            .form(&[("job_id", job_id)])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // A rejection still carries a readable `{status, message}` body.
        match serde_json::from_str::<CancelAck>(&body) {
            Ok(ack) if !ack.status.trim().is_empty() => Ok(ack),
            _ if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                body,
            }),
            Ok(_) => Err(ApiError::Status {
                status: status.as_u16(),
                body: format!("cancel response without status: {body}"),
            }),
            Err(e) => Err(ApiError::Status {
                status: status.as_u16(),
                body: format!("unreadable cancel response ({e}): {body}"),
            }),
        }
    }

    fn download_url(&self, result_ref: &str) -> String {
        let mut url = self.endpoint("download/result");
        url.query_pairs_mut().append_pair("path", result_ref);
        url.to_string()
    }
}
