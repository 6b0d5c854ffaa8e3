//! Canonical contract and the per-vendor converters.

pub mod canonical;
pub mod gemini;
pub mod mapping;
pub mod openai_chat;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::GatewayError;
use crate::stream::index::StreamIndexContext;
use canonical::{CanonicalRequest, CanonicalResponse, CanonicalStreamEvent};

pub use gemini::GeminiConverter;
pub use openai_chat::OpenAiChatConverter;

/// Vendor tag of the `OpenAI` Chat Completions protocol.
pub const OPENAI: &str = "openai";
/// Vendor tag of the Gemini generateContent protocol.
pub const GEMINI: &str = "gemini";

/// Bidirectional translation between one vendor's wire format and the
/// canonical contract.
///
/// Implementations are stateless; per-stream state lives in the
/// [`StreamIndexContext`] handed to [`Converter::chunk_to_events`].
pub trait Converter: Send + Sync {
    /// Vendor tag written to `source` of everything this converter produces.
    fn source(&self) -> &'static str;

    /// Decode a complete vendor response body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] when the body is not a valid
    /// vendor response.
    fn to_contract(&self, body: &[u8]) -> Result<CanonicalResponse, GatewayError>;

    /// Encode a canonical response in this vendor's wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] when `response.source` names
    /// another vendor.
    fn from_contract(&self, response: &CanonicalResponse) -> Result<Value, GatewayError>;

    /// Decode one SSE data payload into zero or more stamped events.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::StreamError`] when the payload is malformed.
    fn chunk_to_events(
        &self,
        chunk: &[u8],
        ctx: &mut StreamIndexContext,
    ) -> Result<Vec<CanonicalStreamEvent>, GatewayError>;

    /// Encode one canonical event as a vendor stream chunk.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] when `event.source` names
    /// another vendor.
    fn event_to_chunk(&self, event: &CanonicalStreamEvent) -> Result<Value, GatewayError>;

    /// Decode a vendor request body.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] when the body is not a valid
    /// vendor request.
    fn request_to_contract(&self, body: &[u8]) -> Result<CanonicalRequest, GatewayError>;

    /// Encode a canonical request for this vendor.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] when the request cannot be
    /// expressed in this vendor's wire format.
    fn request_from_contract(&self, request: &CanonicalRequest) -> Result<Value, GatewayError>;

    /// Data payload that terminates this vendor's SSE streams, if any.
    fn stream_terminator(&self) -> Option<&'static str> {
        None
    }
}

/// Re-emit canonical events as this converter's SSE text.
///
/// # Errors
///
/// Propagates the first [`Converter::event_to_chunk`] failure.
pub fn encode_events_as_sse<'a, I>(
    converter: &dyn Converter,
    events: I,
) -> Result<String, GatewayError>
where
    I: IntoIterator<Item = &'a CanonicalStreamEvent>,
{
    let mut out = String::new();
    for event in events {
        let chunk = converter.event_to_chunk(event)?;
        crate::stream::sse::push_data_frame(&mut out, &chunk.to_string());
    }
    if let Some(terminator) = converter.stream_terminator() {
        crate::stream::sse::push_data_frame(&mut out, terminator);
    }
    Ok(out)
}

pub(crate) fn decode_wire<T, F>(body: &[u8], what: &str, make_error: F) -> Result<T, GatewayError>
where
    T: DeserializeOwned,
    F: FnOnce(String) -> GatewayError,
{
    serde_json::from_slice(body)
        .map_err(|err| make_error(format!("invalid {what}: {err}")).with_payload(body))
}

pub(crate) fn encode_wire<T: Serialize>(value: &T, what: &str) -> Result<Value, GatewayError> {
    serde_json::to_value(value)
        .map_err(|err| GatewayError::internal(format!("failed to encode {what}: {err}")))
}

pub(crate) fn ensure_source(expected: &str, actual: &str) -> Result<(), GatewayError> {
    if expected == actual {
        return Ok(());
    }
    Err(
        GatewayError::invalid_argument(format!(
            "source mismatch: converter handles {expected}, got {actual}"
        ))
        .with_context("expected", expected)
        .with_context("actual", actual),
    )
}
