use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::ChannelConfig;
use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalRequest, CanonicalResponse};
use crate::stream::{CanonicalEventStream, TrackedBody};
use crate::transport::{header_map_from_pairs, join_endpoint, merge_headers, HttpTransport};

use super::Provider;

/// Where and how to reach one upstream.
#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    /// Overrides applied on top of provider and caller headers.
    pub headers: HeaderMap,
    pub proxy: Option<String>,
}

impl Channel {
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] for an invalid header override.
    pub fn from_config(config: &ChannelConfig) -> Result<Self, GatewayError> {
        let headers = header_map_from_pairs(
            config
                .headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )
        .map_err(|err| err.with_context("channel", config.name.clone()))?;
        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            headers,
            proxy: config
                .proxy
                .as_deref()
                .map(str::trim)
                .filter(|proxy| !proxy.is_empty())
                .map(str::to_owned),
        })
    }
}

/// Per-call settings.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Caller headers; override provider defaults, lose to channel overrides.
    pub headers: HeaderMap,
    /// Cancels a stream; a fresh token is used when absent.
    pub cancel: Option<CancellationToken>,
    /// Pre-encoded vendor body sent instead of encoding the request.
    pub raw_body: Option<Bytes>,
}

/// One provider bound to one channel and the shared transport.
pub struct Adapter {
    channel: Channel,
    provider: Arc<dyn Provider>,
    transport: Arc<HttpTransport>,
}

impl Adapter {
    #[must_use]
    pub fn new(channel: Channel, provider: Arc<dyn Provider>, transport: Arc<HttpTransport>) -> Self {
        Self {
            channel,
            provider,
            transport,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.channel.name
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Send `request` and decode the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] or [`GatewayError::RequestFailed`]
    /// from the transport, or the converter's error for an undecodable body.
    pub async fn complete(
        &self,
        request: &CanonicalRequest,
        options: &RequestOptions,
    ) -> Result<CanonicalResponse, GatewayError> {
        let span = tracing::debug_span!(
            "upstream",
            channel = %self.channel.name,
            provider = self.provider.name(),
            model = %request.model,
            stream = false,
        );
        async {
            let (url, headers, body) = self.prepare(request, options, false)?;
            let response = self
                .transport
                .send(&url, &headers, body, self.channel.proxy.as_deref())
                .await
                .map_err(|err| self.tag(err))?;
            let bytes = HttpTransport::read_body(response)
                .await
                .map_err(|err| self.tag(err))?;
            self.provider
                .parse_response(&bytes)
                .map_err(|err| self.tag(err))
        }
        .instrument(span)
        .await
    }

    /// Send `request` as a streaming call and start decoding its events.
    ///
    /// The returned handle owns the response body; it is released once on
    /// every exit path of the decode task.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unimplemented`] without any network call when
    /// the provider cannot stream, [`GatewayError::Aborted`] when cancelled
    /// before the response arrived, and transport errors otherwise.
    pub async fn stream(
        &self,
        request: &CanonicalRequest,
        options: &RequestOptions,
    ) -> Result<CanonicalEventStream, GatewayError> {
        if !self.provider.supports_streaming() {
            return Err(self.tag(GatewayError::unimplemented(format!(
                "provider {} does not support streaming",
                self.provider.name()
            ))));
        }
        let cancel = options.cancel.clone().unwrap_or_default();
        let span = tracing::debug_span!(
            "upstream",
            channel = %self.channel.name,
            provider = self.provider.name(),
            model = %request.model,
            stream = true,
        );

        async {
            let (url, headers, body) = self.prepare(request, options, true)?;
            let send = self
                .transport
                .send(&url, &headers, body, self.channel.proxy.as_deref());
            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(self.tag(GatewayError::aborted("cancelled before response")));
                }
                response = send => response.map_err(|err| self.tag(err))?,
            };

            let channel = self.channel.name.clone();
            let body = TrackedBody::new(response.bytes_stream(), move || {
                tracing::debug!(channel = %channel, "upstream body released");
            });
            Ok(self.provider.parse_stream_response(
                body.boxed(),
                cancel,
                self.transport.channel_capacity(),
            ))
        }
        .instrument(span)
        .await
    }

    fn prepare(
        &self,
        request: &CanonicalRequest,
        options: &RequestOptions,
        streaming: bool,
    ) -> Result<(url::Url, HeaderMap, Bytes), GatewayError> {
        let endpoint = self.provider.api_endpoint(&request.model, streaming);
        let url = join_endpoint(&self.channel.base_url, &endpoint).map_err(|err| self.tag(err))?;
        let vendor_headers = self
            .provider
            .headers(&self.channel.api_key)
            .map_err(|err| self.tag(err))?;
        let headers = merge_headers([
            &json_content_type(),
            &vendor_headers,
            &options.headers,
            &self.channel.headers,
        ]);

        let body = match &options.raw_body {
            Some(raw) => raw.clone(),
            None => {
                let request = if request.stream == streaming {
                    Cow::Borrowed(request)
                } else {
                    let mut owned = request.clone();
                    owned.stream = streaming;
                    Cow::Owned(owned)
                };
                self.provider
                    .create_request(&request)
                    .map_err(|err| self.tag(err))?
            }
        };
        Ok((url, headers, body))
    }

    fn tag(&self, err: GatewayError) -> GatewayError {
        err.with_context("channel", self.channel.name.clone())
    }
}

/// Bottom header layer: every body the adapter sends is JSON.
fn json_content_type() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    headers
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("channel", &self.channel.name)
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}
