use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, GatewayError};
use crate::protocol::canonical::CanonicalStreamEvent;
use crate::protocol::Converter;

use super::index::StreamIndexContext;
use super::sse::{sse_line_stream, SseLine};
use super::{StreamEnd, StreamSummary};

/// Body of the per-stream decode task.
///
/// Owns the body until it returns, so every exit path drops it exactly once.
pub(crate) async fn run_decode<S, E>(
    body: S,
    converter: Arc<dyn Converter>,
    mut ctx: StreamIndexContext,
    tx: mpsc::Sender<CanonicalStreamEvent>,
    cancel: CancellationToken,
) -> Result<StreamSummary, GatewayError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let lines = sse_line_stream(body);
    futures_util::pin_mut!(lines);
    let mut events = 0_u64;
    let mut chunks = 0_u64;

    let end = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(aborted(events)),
            next = lines.next() => next,
        };

        let payload = match next {
            None => break StreamEnd::Eof,
            Some(Ok(SseLine::Done)) => break StreamEnd::Sentinel,
            Some(Ok(SseLine::Data(payload))) => payload,
            Some(Err(err)) => {
                return Err(fail(err, converter.source(), &mut ctx, &tx, &cancel).await);
            }
        };
        chunks += 1;

        let decoded = match converter.chunk_to_events(payload.as_bytes(), &mut ctx) {
            Ok(decoded) => decoded,
            Err(err) => {
                let err = if err.kind() == ErrorKind::StreamError {
                    err
                } else {
                    GatewayError::stream(err.to_string()).with_payload(payload.as_bytes())
                };
                return Err(fail(err, converter.source(), &mut ctx, &tx, &cancel).await);
            }
        };
        for event in decoded {
            if !send(&tx, &cancel, event).await {
                return Err(aborted(events));
            }
            events += 1;
        }
    };

    Ok(StreamSummary { events, chunks, end })
}

/// Race `event` against cancellation; `false` when the stream must stop.
async fn send(
    tx: &mpsc::Sender<CanonicalStreamEvent>,
    cancel: &CancellationToken,
    event: CanonicalStreamEvent,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// Deliver `err` in-band as the final event, then hand it back.
async fn fail(
    err: GatewayError,
    source: &str,
    ctx: &mut StreamIndexContext,
    tx: &mpsc::Sender<CanonicalStreamEvent>,
    cancel: &CancellationToken,
) -> GatewayError {
    let response_id = ctx.response_id().unwrap_or_default().to_owned();
    let mut event = CanonicalStreamEvent::error(source, response_id, err.to_payload());
    ctx.stamp(&mut event, None);
    if !send(tx, cancel, event).await {
        tracing::debug!("stream closed before the error event could be delivered");
    }
    err
}

fn aborted(events: u64) -> GatewayError {
    GatewayError::aborted("stream cancelled").with_context("events", events.to_string())
}
