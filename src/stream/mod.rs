//! Streaming side of the gateway: SSE line decoding, per-stream index
//! stabilization and the task that turns a vendor body into canonical events.
pub mod body;
mod decode;
pub mod index;
pub mod sse;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{ErrorKind, GatewayError};
use crate::protocol::canonical::CanonicalStreamEvent;
use crate::protocol::Converter;

pub use body::TrackedBody;
pub use index::{output_key, ItemKey, StreamIndexContext};
pub use sse::{SseLine, SseLineDecoder, DONE_SENTINEL};

/// Default bound of the event channel between decode task and caller.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How a stream ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The vendor sent the `[DONE]` sentinel.
    Sentinel,
    /// The body ended without a sentinel.
    Eof,
}

/// Totals reported by a cleanly finished decode task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub events: u64,
    pub chunks: u64,
    pub end: StreamEnd,
}

/// Caller side of one canonical event stream.
///
/// Events arrive in sequence order. The channel closing without a trailing
/// `error` event means the stream completed cleanly. Dropping the handle
/// cancels the decode task.
pub struct CanonicalEventStream {
    rx: mpsc::Receiver<CanonicalStreamEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<StreamSummary, GatewayError>>>,
}

impl CanonicalEventStream {
    /// Next event, or `None` once the decode task has stopped sending.
    pub async fn recv(&mut self) -> Option<CanonicalStreamEvent> {
        self.rx.recv().await
    }

    /// Ask the decode task to stop. Already queued events stay readable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// This stream's own token, a child of the one it was spawned with.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop consuming and wait for the decode task to exit.
    ///
    /// Drain with [`CanonicalEventStream::recv`] until `None` first to
    /// observe a clean completion; finishing earlier cancels the task.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the stream, [`GatewayError::Aborted`]
    /// when it was cancelled, or [`GatewayError::Internal`] if the task
    /// panicked.
    pub async fn finish(mut self) -> Result<StreamSummary, GatewayError> {
        self.rx.close();
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return Err(GatewayError::internal("stream already finished"));
        };
        match task.await {
            Ok(result) => result,
            Err(err) => Err(GatewayError::internal(format!("stream task failed: {err}"))),
        }
    }
}

impl Stream for CanonicalEventStream {
    type Item = CanonicalStreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for CanonicalEventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for CanonicalEventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanonicalEventStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.task.is_none())
            .finish_non_exhaustive()
    }
}

/// Spawn the decode task for one vendor SSE body.
///
/// The task owns `body` and a fresh [`StreamIndexContext`]; it is the only
/// sender on a channel bounded to `capacity` events (at least one).
/// It stops when `cancel` fires, but the handle only ever cancels its own
/// child of `cancel`, so other streams sharing the caller's token keep running.
/// Must be called from within a tokio runtime.
pub fn spawn_event_stream<S, E>(
    body: S,
    converter: Arc<dyn Converter>,
    cancel: CancellationToken,
    capacity: usize,
) -> CanonicalEventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let cancel = cancel.child_token();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let span = tracing::debug_span!("canonical_stream", provider = converter.source());
    let task_cancel = cancel.clone();

    let task = tokio::spawn(
        async move {
            tracing::debug!("stream started");
            let result =
                decode::run_decode(body, converter, StreamIndexContext::new(), tx, task_cancel)
                    .await;
            match &result {
                Ok(summary) => tracing::debug!(
                    events = summary.events,
                    chunks = summary.chunks,
                    end = ?summary.end,
                    "stream completed"
                ),
                Err(err) if err.kind() == ErrorKind::Aborted => tracing::debug!(
                    events = err.context().get("events").unwrap_or("0"),
                    "stream aborted"
                ),
                Err(err) => tracing::warn!(error = %err, "stream failed"),
            }
            result
        }
        .instrument(span),
    );

    CanonicalEventStream {
        rx,
        cancel,
        task: Some(task),
    }
}
