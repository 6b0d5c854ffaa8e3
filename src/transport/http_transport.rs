use std::time::Duration;

use bytes::Bytes;
use rustc_hash::FxHashMap;

use crate::config::TransportConfig;
use crate::error::GatewayError;

use super::sanitize::{sanitize_upstream_error, strip_html};

fn build_reqwest_client(
    config: &TransportConfig,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, GatewayError> {
    let pool_idle_timeout = (config.pool_idle_timeout_secs > 0)
        .then(|| Duration::from_secs(config.pool_idle_timeout_secs));
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.request_timeout_secs));

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|err| {
            GatewayError::invalid_argument(format!("invalid proxy URL: {err}"))
                .with_context("proxy", proxy_url.to_owned())
        })?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| GatewayError::internal(format!("failed to build HTTP client: {err}")))
}

/// Shared HTTP client for every channel.
///
/// Holds one pooled `reqwest` client plus one per configured proxy. The
/// transport never retries; a request is sent exactly once.
#[derive(Debug)]
pub struct HttpTransport {
    base_client: reqwest::Client,
    proxy_clients: FxHashMap<String, reqwest::Client>,
    config: TransportConfig,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error when the TLS/HTTP client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, GatewayError> {
        Self::with_proxies(config, std::iter::empty::<&str>())
    }

    /// Build the transport with a client per distinct proxy URL up front.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidArgument`] for a malformed proxy URL.
    pub fn with_proxies<I, S>(config: &TransportConfig, proxy_urls: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base_client = build_reqwest_client(config, None)?;
        let mut proxy_clients = FxHashMap::default();
        for proxy_url in proxy_urls {
            let proxy_url = proxy_url.as_ref().trim();
            if proxy_url.is_empty() || proxy_clients.contains_key(proxy_url) {
                continue;
            }
            let client = build_reqwest_client(config, Some(proxy_url))?;
            proxy_clients.insert(proxy_url.to_owned(), client);
        }
        Ok(Self {
            base_client,
            proxy_clients,
            config: config.clone(),
        })
    }

    /// Bound of the event channel for streams opened through this transport.
    #[must_use]
    pub fn channel_capacity(&self) -> usize {
        self.config.stream_channel_capacity.max(1)
    }

    fn client_for(&self, proxy_url: Option<&str>) -> Result<reqwest::Client, GatewayError> {
        let Some(proxy_url) = proxy_url.map(str::trim).filter(|url| !url.is_empty()) else {
            return Ok(self.base_client.clone());
        };
        if let Some(client) = self.proxy_clients.get(proxy_url) {
            return Ok(client.clone());
        }
        tracing::debug!(proxy_url, "building HTTP client for unregistered proxy");
        build_reqwest_client(&self.config, Some(proxy_url))
    }

    /// POST `body` to `url` and check the status.
    ///
    /// On success the response is returned with its body unread.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when the request could not be
    /// completed (connect, TLS, timeout) and [`GatewayError::RequestFailed`]
    /// for any non-2xx status. In the latter case the error body has already
    /// been read and the response released.
    pub async fn send(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: Bytes,
        proxy_url: Option<&str>,
    ) -> Result<reqwest::Response, GatewayError> {
        let client = self.client_for(proxy_url)?;
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));

        tracing::debug!(url = %redacted(url), "dispatching upstream request");
        let response = client.execute(request).await.map_err(|err| {
            let message = strip_html(&error_chain(&err));
            tracing::warn!(url = %redacted(url), error = %message, "upstream request failed");
            GatewayError::unavailable(message).with_context("url", redacted(url))
        })?;

        let status = response.status();
        tracing::debug!(status = status.as_u16(), "upstream responded");
        if status.is_success() {
            return Ok(response);
        }

        let error_body = response.bytes().await.unwrap_or_default();
        let message = sanitize_upstream_error(&error_body);
        tracing::warn!(status = status.as_u16(), error = %message, "upstream returned error status");
        Err(GatewayError::request_failed(status.as_u16(), message)
            .with_context("url", redacted(url)))
    }

    /// Read a successful response body to the end, releasing the response.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unavailable`] when the body cannot be read.
    pub async fn read_body(response: reqwest::Response) -> Result<Bytes, GatewayError> {
        response.bytes().await.map_err(|err| {
            GatewayError::unavailable(format!(
                "failed to read response body: {}",
                strip_html(&error_chain(&err))
            ))
        })
    }
}

/// Error text including its sources; `reqwest` keeps the useful part there.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// URL without its query string, which may carry credentials.
fn redacted(url: &url::Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
