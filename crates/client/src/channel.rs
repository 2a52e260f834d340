//! Background reader for a job's event stream.
//!
//! [`EventChannel::spawn`] starts one task that reads the HTTP body,
//! decodes SSE frames and forwards them in arrival order over an mpsc
//! channel. The session controller holds the [`EventChannel`] and pulls
//! one [`ChannelMessage`] at a time, so handlers never overlap.
//!
//! Closing (explicitly or by drop) cancels the reader task and drops the
//! receiver: anything still in flight is discarded.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sse::{SseDecoder, SseFrame};

/// Buffered frames between the reader task and the controller.
const CHANNEL_CAPACITY: usize = 256;

/// What the reader task forwards to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// One decoded server-sent event.
    Frame(SseFrame),
    /// The stream failed or ended. Always the last message of a channel.
    TransportError(String),
}

/// An open event stream for one job.
#[derive(Debug)]
pub struct EventChannel {
    rx: mpsc::Receiver<ChannelMessage>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EventChannel {
    /// Wrap an existing receiver. Used by tests and alternative transports.
    pub fn from_receiver(rx: mpsc::Receiver<ChannelMessage>) -> Self {
        Self {
            rx,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Start reading `response` in the background.
    ///
    /// The response status must already have been checked.
    pub fn spawn(response: reqwest::Response) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!("Event stream reader cancelled");
                }
                _ = read_stream(response, &tx) => {}
            }
        });

        Self {
            rx,
            cancel,
            task: Some(task),
        }
    }

    /// Wait for the next message. `None` once the sender side is gone.
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Stop the reader and refuse further messages.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pump the response body through the SSE decoder until it ends.
async fn read_stream(response: reqwest::Response, tx: &mpsc::Sender<ChannelMessage>) {
    let mut decoder = SseDecoder::new();
    let mut bytes_stream = response.bytes_stream();

    while let Some(chunk_result) = bytes_stream.next().await {
        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Event stream read failed");
                let _ = tx
                    .send(ChannelMessage::TransportError(format!(
                        "Event stream read failed: {e}"
                    )))
                    .await;
                return;
            }
        };

        for frame in decoder.feed(&chunk) {
            tracing::trace!(event = %frame.event, "SSE frame received");
            if tx.send(ChannelMessage::Frame(frame)).await.is_err() {
                // Receiver closed; nobody is listening any more.
                return;
            }
        }
    }

    if let Some(frame) = decoder.finish() {
        if tx.send(ChannelMessage::Frame(frame)).await.is_err() {
            return;
        }
    }

    tracing::debug!("Event stream ended");
    let _ = tx
        .send(ChannelMessage::TransportError(
            "Event stream closed by server".to_string(),
        ))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (tx, rx) = mpsc::channel(8);
        let mut channel = EventChannel::from_receiver(rx);

        tx.send(ChannelMessage::Frame(SseFrame::message("1"))).await.unwrap();
        tx.send(ChannelMessage::Frame(SseFrame::message("2"))).await.unwrap();

        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Frame(SseFrame::message("1")))
        );
        assert_eq!(
            channel.recv().await,
            Some(ChannelMessage::Frame(SseFrame::message("2")))
        );
    }

    #[tokio::test]
    async fn close_rejects_further_sends() {
        let (tx, rx) = mpsc::channel(8);
        let mut channel = EventChannel::from_receiver(rx);

        channel.close();
        assert!(channel.is_closed());
        assert!(tx
            .send(ChannelMessage::Frame(SseFrame::message("late")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn dropping_channel_disconnects_sender() {
        let (tx, rx) = mpsc::channel(8);
        drop(EventChannel::from_receiver(rx));
        assert!(tx.is_closed());
    }
}
