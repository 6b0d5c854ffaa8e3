//! Per-vendor transport capabilities, the provider registry and the
//! adapter that drives one provider over HTTP.
mod adapter;
pub mod gemini;
pub mod openai;
pub mod registry;

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalRequest, CanonicalResponse};
use crate::protocol::Converter;
use crate::stream::{spawn_event_stream, CanonicalEventStream};

pub use adapter::{Adapter, Channel, RequestOptions};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use registry::{ProviderFactory, ProviderOptions, ProviderRegistry};

/// Response body as handed to [`Provider::parse_stream_response`].
pub type BodyStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// What the transport needs to know about one vendor.
///
/// The entry points with default bodies wire the vendor's [`Converter`]
/// into the request/response cycle; implementations rarely override them.
pub trait Provider: Send + Sync {
    /// Registry name, also the `source` tag of its converter's output.
    fn name(&self) -> &'static str;

    /// Endpoint path (or absolute URL) for `model`.
    fn api_endpoint(&self, model: &str, streaming: bool) -> String;

    /// Vendor default headers, authentication included.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] when `credential` cannot be
    /// carried in a header.
    fn headers(&self, credential: &str) -> Result<HeaderMap, GatewayError>;

    fn supports_streaming(&self) -> bool;

    fn converter(&self) -> Arc<dyn Converter>;

    /// Serialize `request` as this vendor's request body.
    ///
    /// # Errors
    ///
    /// Propagates [`Converter::request_from_contract`] failures.
    fn create_request(&self, request: &CanonicalRequest) -> Result<Bytes, GatewayError> {
        let value = self.converter().request_from_contract(request)?;
        serde_json::to_vec(&value)
            .map(Bytes::from)
            .map_err(|err| GatewayError::internal(format!("failed to serialize request: {err}")))
    }

    /// Decode a buffered non-streaming response body.
    ///
    /// # Errors
    ///
    /// Propagates [`Converter::to_contract`] failures.
    fn parse_response(&self, body: &[u8]) -> Result<CanonicalResponse, GatewayError> {
        self.converter().to_contract(body)
    }

    /// Start decoding a streaming response body into canonical events.
    fn parse_stream_response(
        &self,
        body: BodyStream,
        cancel: CancellationToken,
        capacity: usize,
    ) -> CanonicalEventStream {
        spawn_event_stream(body, self.converter(), cancel, capacity)
    }
}

pub(crate) fn header_value(value: &str) -> Result<http::HeaderValue, GatewayError> {
    http::HeaderValue::from_str(value)
        .map_err(|_| GatewayError::invalid_argument("credential contains invalid header characters"))
}
